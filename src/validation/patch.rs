//! Patch validation

use super::{ErrorList, FieldError, Path};
use crate::crd::Patch;
use crate::manifests::satellite::SATELLITE_POD_NAME;
use crate::patch::{get_target, CompiledSelector, ParsedPatch};

/// A patch must parse as either form and must have a target
pub fn validate_patches(patches: &[Patch], path: &Path) -> ErrorList {
    let mut errors = ErrorList::new();
    for (i, patch) in patches.iter().enumerate() {
        let path = path.index(i);

        if let ParsedPatch::Unparseable {
            merge_error,
            json_error,
        } = ParsedPatch::parse(&patch.patch)
        {
            errors.push(FieldError::invalid(
                &path.child("patch"),
                patch.patch.as_str(),
                format!(
                    "Failed to parse patch as either Strategic Merge Patch ({}) or JSON Patch ({})",
                    merge_error, json_error
                ),
            ));
        }

        match get_target(patch) {
            None => errors.push(FieldError::required(
                &path.child("target"),
                "Patch does not have a target and is not a valid Strategic Merge Patch",
            )),
            Some(target) => {
                if let Err(e) = CompiledSelector::compile(&target) {
                    errors.push(FieldError::invalid(
                        &path.child("target"),
                        target.to_string(),
                        e.to_string(),
                    ));
                }
            }
        }
    }
    errors
}

/// Warn about patches aimed at the seed satellite Pod instead of its DaemonSet
pub fn warn_on_bare_satellite_pod_patch(patches: &[Patch], path: &Path) -> Vec<String> {
    patches
        .iter()
        .enumerate()
        .filter_map(|(i, patch)| {
            let target = get_target(patch)?;
            (target.kind == "Pod" && target.name == SATELLITE_POD_NAME).then(|| {
                format!(
                    "Patch {} is targeting Pod '{}': consider targeting the DaemonSet 'linstor-satellite' instead",
                    path.index(i),
                    SATELLITE_POD_NAME
                )
            })
        })
        .collect()
}
