//! Node property validation

use super::{ErrorList, FieldError, Path};
use crate::crd::LinstorNodeProperty;
use crate::properties::{
    FieldPath, MSG_EXACTLY_ONE_SOURCE, MSG_TEMPLATE_OR_DELIMITER, MSG_WILDCARD_NOT_ALLOWED,
    MSG_WILDCARD_REQUIRED,
};

pub fn validate_properties(properties: &[LinstorNodeProperty], path: &Path) -> ErrorList {
    let mut errors = ErrorList::new();
    for (i, property) in properties.iter().enumerate() {
        let path = path.index(i);

        if property.name.is_empty() {
            errors.push(FieldError::required(&path.child("name"), "Property name must not be empty"));
        }

        if property.source_count() != 1 {
            errors.push(FieldError::invalid(&path, property.name.as_str(), MSG_EXACTLY_ONE_SOURCE));
        }

        if let Some(source) = &property.value_from {
            let path = path.child("valueFrom").child("nodeFieldRef");
            match FieldPath::parse(&source.node_field_ref) {
                Err(e) => errors.push(FieldError::invalid(
                    &path,
                    source.node_field_ref.as_str(),
                    format!("Invalid reference format: {}", e),
                )),
                Ok(field) if field.has_wildcard() => errors.push(FieldError::invalid(
                    &path,
                    source.node_field_ref.as_str(),
                    MSG_WILDCARD_NOT_ALLOWED,
                )),
                Ok(_) => {}
            }
        }

        if let Some(expansion) = &property.expand_from {
            let path = path.child("expandFrom");
            let ref_path = path.child("nodeFieldRef");
            match FieldPath::parse(&expansion.node_field_ref) {
                Err(e) => errors.push(FieldError::invalid(
                    &ref_path,
                    expansion.node_field_ref.as_str(),
                    format!("Invalid reference format: {}", e),
                )),
                Ok(field) if !field.has_wildcard() => errors.push(FieldError::invalid(
                    &ref_path,
                    expansion.node_field_ref.as_str(),
                    MSG_WILDCARD_REQUIRED,
                )),
                Ok(_) => {}
            }

            if expansion.name_template.is_some() && expansion.delimiter.is_some() {
                errors.push(FieldError::forbidden(&path, MSG_TEMPLATE_OR_DELIMITER));
            }
        }
    }
    errors
}
