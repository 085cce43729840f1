//! Container image resolution
//!
//! Components are resolved to image references through [`ImageResolver`].
//! [`ImageConfig`] reads the mapping from one or more YAML documents of the
//! form:
//!
//! ```yaml
//! base: quay.io/piraeusdatastore
//! components:
//!   linstor-satellite:
//!     image: piraeus-server
//!     tag: v1.29.0
//! ```
//!
//! Documents are consulted in order; the first one defining a component wins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};

pub const COMPONENT_CONTROLLER: &str = "linstor-controller";
pub const COMPONENT_SATELLITE: &str = "linstor-satellite";
pub const COMPONENT_DRBD_MODULE_LOADER: &str = "drbd-module-loader";
pub const COMPONENT_DRBD_SHUTDOWN_GUARD: &str = "drbd-shutdown-guard";
pub const COMPONENT_DRBD_REACTOR: &str = "drbd-reactor";

const DEFAULT_BASE: &str = "quay.io/piraeusdatastore";

/// Maps a component name to a full image reference
pub trait ImageResolver: Send + Sync {
    fn image(&self, component: &str) -> Result<String>;
}

/// Image of a single component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentImage {
    pub image: String,
    #[serde(default)]
    pub tag: String,
}

/// One image configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfigDocument {
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentImage>,
}

impl ImageConfigDocument {
    fn reference(&self, component: &ComponentImage) -> String {
        let repository = if component.image.contains('/') || self.base.is_empty() {
            component.image.clone()
        } else {
            format!("{}/{}", self.base.trim_end_matches('/'), component.image)
        };
        if component.tag.is_empty() {
            repository
        } else {
            format!("{}:{}", repository, component.tag)
        }
    }
}

/// Ordered list of image configuration documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    documents: Vec<ImageConfigDocument>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        let components = [
            (COMPONENT_CONTROLLER, "piraeus-server", "v1.29.0"),
            (COMPONENT_SATELLITE, "piraeus-server", "v1.29.0"),
            (COMPONENT_DRBD_MODULE_LOADER, "drbd9-jammy", "v9.2.12"),
            (COMPONENT_DRBD_SHUTDOWN_GUARD, "drbd-shutdown-guard", "v1.0.0"),
            (COMPONENT_DRBD_REACTOR, "drbd-reactor", "v1.6.0"),
        ]
        .into_iter()
        .map(|(name, image, tag)| {
            (
                name.to_string(),
                ComponentImage {
                    image: image.into(),
                    tag: tag.into(),
                },
            )
        })
        .collect();

        Self {
            documents: vec![ImageConfigDocument {
                base: DEFAULT_BASE.into(),
                components,
            }],
        }
    }
}

impl ImageConfig {
    /// Parse a (possibly multi-document) YAML string
    pub fn from_yaml(source: &str) -> Result<Self> {
        let mut documents = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(source) {
            let value = serde_yaml::Value::deserialize(doc)?;
            if value.is_null() {
                continue;
            }
            documents.push(serde_yaml::from_value(value)?);
        }
        if documents.is_empty() {
            return Err(Error::Configuration("image configuration is empty".into()));
        }
        Ok(Self { documents })
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&source)?;
        info!(path = %path.display(), documents = config.documents.len(), "Loaded image configuration");
        Ok(config)
    }

    pub fn documents(&self) -> &[ImageConfigDocument] {
        &self.documents
    }

    /// Replace the tag of the first document defining `component`.
    ///
    /// Used to run satellites at the version of an external controller.
    pub fn pin_tag(&mut self, component: &str, tag: impl Into<String>) -> Result<()> {
        let entry = self
            .documents
            .iter_mut()
            .find_map(|doc| doc.components.get_mut(component))
            .ok_or_else(|| Error::MissingImage(component.to_string()))?;
        entry.tag = tag.into();
        Ok(())
    }
}

impl ImageResolver for ImageConfig {
    fn image(&self, component: &str) -> Result<String> {
        self.documents
            .iter()
            .find_map(|doc| doc.components.get(component).map(|c| doc.reference(c)))
            .ok_or_else(|| Error::MissingImage(component.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"
base: example.com/base
components:
  linstor-satellite:
    image: satellite-image
    tag: v1.2.3
  other-image:
    image: other
    tag: v0.1.2
---
base: example.com/extra
components:
  linstor-controller:
    image: controller-image
    tag: v2.0.0
  other-image:
    image: another
    tag: v2.1.0
  full:
    image: registry.example.com/full/image
"#;

    #[test]
    fn test_default_config() {
        let config = ImageConfig::default();
        assert_eq!(
            config.image(COMPONENT_SATELLITE).unwrap(),
            "quay.io/piraeusdatastore/piraeus-server:v1.29.0"
        );
        assert!(config.image(COMPONENT_DRBD_REACTOR).is_ok());
    }

    #[test]
    fn test_multi_document_resolution() {
        let config = ImageConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.documents().len(), 2);
        assert_eq!(
            config.image("linstor-satellite").unwrap(),
            "example.com/base/satellite-image:v1.2.3"
        );
        assert_eq!(
            config.image("linstor-controller").unwrap(),
            "example.com/extra/controller-image:v2.0.0"
        );
        assert_eq!(config.image("other-image").unwrap(), "example.com/base/other:v0.1.2");
        assert_eq!(config.image("full").unwrap(), "registry.example.com/full/image");
        assert_matches!(config.image("missing"), Err(Error::MissingImage(c)) if c == "missing");
    }

    #[test]
    fn test_pin_tag() {
        let mut config = ImageConfig::from_yaml(CONFIG).unwrap();
        config.pin_tag(COMPONENT_SATELLITE, "v1.30.0").unwrap();
        assert_eq!(
            config.image(COMPONENT_SATELLITE).unwrap(),
            "example.com/base/satellite-image:v1.30.0"
        );
        assert!(config.pin_tag("missing", "v1").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let config = ImageConfig::load(file.path()).unwrap();
        assert_eq!(config, ImageConfig::from_yaml(CONFIG).unwrap());

        assert_matches!(ImageConfig::from_yaml(""), Err(Error::Configuration(_)));
        assert_matches!(
            ImageConfig::load(Path::new("/nonexistent/images.yaml")),
            Err(Error::Io(_))
        );
    }
}
