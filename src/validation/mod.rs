//! Admission validation
//!
//! Pure functions checking a resource spec (and, for updates, the previously
//! accepted spec). Every defect is collected as a field-pathed
//! [`FieldError`]; nothing fails fast, so one rejected submission reports all
//! of its problems. Warnings never block acceptance.

pub mod patch;
pub mod properties;
pub mod resources;
pub mod storage_pool;

pub use patch::{validate_patches, warn_on_bare_satellite_pod_patch};
pub use properties::validate_properties;
pub use resources::{
    validate_cluster, validate_external_controller, validate_node_selector,
    validate_pod_template, validate_satellite, validate_satellite_configuration,
};
pub use storage_pool::validate_storage_pools;

// =============================================================================
// Field Paths
// =============================================================================

/// Path to a field, rendered as `spec.storagePools[0].name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path(String);

impl Path {
    pub fn new(root: &str) -> Self {
        Self(root.to_string())
    }

    pub fn child(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{}", self.0, name))
        }
    }

    pub fn index(&self, index: usize) -> Self {
        Self(format!("{}[{}]", self.0, index))
    }

    pub fn key(&self, key: &str) -> Self {
        Self(format!("{}[{}]", self.0, key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Field Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Invalid,
    Required,
    Forbidden,
    Duplicate,
    NotSupported,
}

/// A single validation defect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub error_type: ErrorType,
    pub field: String,
    pub value: Option<String>,
    pub detail: String,
}

impl FieldError {
    pub fn invalid(path: &Path, value: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Invalid,
            field: path.to_string(),
            value: Some(value.into()),
            detail: detail.into(),
        }
    }

    pub fn required(path: &Path, detail: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Required,
            field: path.to_string(),
            value: None,
            detail: detail.into(),
        }
    }

    pub fn forbidden(path: &Path, detail: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Forbidden,
            field: path.to_string(),
            value: None,
            detail: detail.into(),
        }
    }

    pub fn duplicate(path: &Path, value: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Duplicate,
            field: path.to_string(),
            value: Some(value.into()),
            detail: String::new(),
        }
    }

    pub fn not_supported(path: &Path, value: impl Into<String>, supported: &[&str]) -> Self {
        Self {
            error_type: ErrorType::NotSupported,
            field: path.to_string(),
            value: Some(value.into()),
            detail: format!("supported values: {}", supported.join(", ")),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.value.as_deref().unwrap_or_default();
        match self.error_type {
            ErrorType::Invalid => write!(f, "{}: Invalid value: {:?}: {}", self.field, value, self.detail),
            ErrorType::Required => write!(f, "{}: Required value: {}", self.field, self.detail),
            ErrorType::Forbidden => write!(f, "{}: Forbidden: {}", self.field, self.detail),
            ErrorType::Duplicate => write!(f, "{}: Duplicate value: {:?}", self.field, value),
            ErrorType::NotSupported => {
                write!(f, "{}: Unsupported value: {:?}: {}", self.field, value, self.detail)
            }
        }
    }
}

/// All defects found in one validation call
pub type ErrorList = Vec<FieldError>;

/// Outcome of validating a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: ErrorList,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Zero errors means the object is admissible
    pub fn is_admissible(&self) -> bool {
        self.errors.is_empty()
    }

    /// All errors as one message, as shown in an admission response
    pub fn message(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}
