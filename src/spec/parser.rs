//! Spec document parser.
//!
//! This module loads a spec document from a YAML file or string. Parsing only
//! checks the document shape; graph invariants are checked by
//! [`super::graph::validate`].

use std::path::Path;
use tracing::{debug, info};

use crate::error::{ConvergeError, Result, SpecError};

use super::resource::Spec;

/// Parser for spec documents.
#[derive(Debug, Default)]
pub struct SpecParser;

impl SpecParser {
    /// Creates a new spec parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Loads a spec from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Spec> {
        let path = path.as_ref();
        info!("Loading spec from: {}", path.display());

        if !path.exists() {
            return Err(ConvergeError::Spec(SpecError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvergeError::Spec(SpecError::parse(
                format!("Failed to read file: {e}"),
                Some(path.display().to_string()),
            ))
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a spec from a YAML string.
    ///
    /// An empty document or a missing `resources` key yields an empty spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or has an unexpected shape.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Spec> {
        debug!("Parsing YAML spec");

        if content.trim().is_empty() {
            return Ok(Spec::default());
        }

        let spec: Spec = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ConvergeError::Spec(SpecError::parse(format!("YAML parse error: {e}"), location))
        })?;

        debug!("Parsed spec with {} resources", spec.len());
        Ok(spec)
    }

    /// Serializes a spec back to YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self, spec: &Spec) -> Result<String> {
        serde_yaml::to_string(spec).map_err(|e| {
            ConvergeError::Spec(SpecError::parse(format!("YAML serialize error: {e}"), None))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::resource::KUBERNETES;
    use serde_json::json;
    use std::io::Write;

    const SINGLE_NAMESPACE: &str = r"
resources:
- id: v1:Namespace:default
  type: Kubernetes
  attributes:
    apiVersion: v1
    kind: Namespace
    metadata:
      name: default
      creationTimestamp: null
    spec: {}
    status: {}
";

    #[test]
    fn test_parse_single_resource() {
        let spec = SpecParser::new()
            .parse_yaml(SINGLE_NAMESPACE, None)
            .expect("spec should parse");

        assert_eq!(spec.len(), 1);
        let ns = &spec.resources[0];
        assert_eq!(ns.id, "v1:Namespace:default");
        assert_eq!(ns.resource_type, KUBERNETES);
        assert_eq!(ns.kind(), "Namespace");
        assert_eq!(
            ns.attributes.get("metadata"),
            Some(&json!({"name": "default", "creationTimestamp": null}))
        );
        assert_eq!(ns.attributes.get("spec"), Some(&json!({})));
        assert!(ns.depends_on.is_empty());
    }

    #[test]
    fn test_parse_depends_on_and_extensions() {
        let yaml = r"
resources:
- id: v1:Namespace:default
  type: Kubernetes
  attributes:
    kind: Namespace
- id: v1:ServiceAccount:default:sa
  type: Kubernetes
  attributes:
    kind: ServiceAccount
  dependsOn:
  - v1:Namespace:default
  extensions:
    owner: platform
";
        let spec = SpecParser::new().parse_yaml(yaml, None).expect("spec should parse");

        assert_eq!(spec.len(), 2);
        assert_eq!(spec.resources[1].depends_on, vec!["v1:Namespace:default"]);
        assert_eq!(spec.resources[1].extensions.get("owner"), Some(&json!("platform")));
    }

    #[test]
    fn test_unknown_top_level_shape_fails() {
        let result = SpecParser::new().parse_yaml("k1: v1", None);
        assert!(matches!(
            result,
            Err(ConvergeError::Spec(SpecError::Parse { .. }))
        ));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let yaml = r"
resources:
- id: no-type
  attributes: {}
";
        let result = SpecParser::new().parse_yaml(yaml, None);
        assert!(matches!(
            result,
            Err(ConvergeError::Spec(SpecError::Parse { .. }))
        ));
    }

    #[test]
    fn test_empty_resources_is_valid() {
        let parser = SpecParser::new();
        assert!(parser.parse_yaml("", None).expect("empty doc").is_empty());
        assert!(parser.parse_yaml("resources: []", None).expect("empty list").is_empty());
        assert!(parser.parse_yaml("resources:", None).expect("null list").is_empty());
        assert!(parser.parse_yaml("{}", None).expect("no key").is_empty());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("spec.yaml");
        let mut file = std::fs::File::create(&path).expect("create spec file");
        file.write_all(SINGLE_NAMESPACE.as_bytes()).expect("write spec");

        let spec = SpecParser::new().load_file(&path).expect("load spec");
        assert_eq!(spec.ids(), vec!["v1:Namespace:default"]);

        let missing = SpecParser::new().load_file(dir.path().join("absent.yaml"));
        assert!(matches!(
            missing,
            Err(ConvergeError::Spec(SpecError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_yaml_roundtrip_preserves_spec() {
        let parser = SpecParser::new();
        let spec = parser.parse_yaml(SINGLE_NAMESPACE, None).expect("parse");
        let yaml = parser.to_yaml(&spec).expect("serialize");
        assert_eq!(parser.parse_yaml(&yaml, None).expect("reparse"), spec);
    }
}
