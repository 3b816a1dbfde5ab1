// Standard library imports
use std::fs;
use std::path::Path;

// External crate imports
use tracing::debug;
use wvm_core::error::{Result, WvmError};

use crate::compose::{ComposeConfig, SUPPORTED_COMPOSE_VERSION};

impl ComposeConfig {
    /// Load and validate a compose document from disk.
    ///
    /// Validation is all-or-nothing: a document that names an unsupported
    /// version or an undeclared dependency never yields a partial config.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            WvmError::Config(format!(
                "Cannot read compose file {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!("Loaded compose file from {}", path.display());
        Self::from_str(&content)
    }

    /// Parse and validate a compose document from a string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: ComposeConfig = serde_yaml_ng::from_str(content)
            .map_err(|e| WvmError::Config(format!("Malformed compose document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that must hold before a plan can be built.
    pub fn validate(&self) -> Result<()> {
        match self.version.as_deref() {
            Some(SUPPORTED_COMPOSE_VERSION) => {}
            Some(other) => {
                return Err(WvmError::Config(format!(
                    "Unsupported compose version '{}' (supported: '{}')",
                    other, SUPPORTED_COMPOSE_VERSION
                )));
            }
            None => {
                return Err(WvmError::Config(
                    "Missing required field: version".to_string(),
                ));
            }
        }

        for (name, vm) in &self.vms {
            for dep in &vm.depends_on {
                if !self.vms.contains_key(dep) {
                    return Err(WvmError::Config(format!(
                        "VM '{}' depends on unknown VM '{}'",
                        name, dep
                    )));
                }
                if dep == name {
                    return Err(WvmError::Config(format!(
                        "VM '{}' depends on itself",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_document() {
        let config = ComposeConfig::from_str(
            r#"
version: "1"
vms:
  workstation:
    depends_on: []
"#,
        )
        .expect("minimal document should load");
        assert_eq!(config.vms.len(), 1);
        assert!(config.vms.contains_key("workstation"));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compose.yaml");
        std::fs::write(&path, "version: \"1\"\nvms:\n  workstation: {}\n").unwrap();

        let config = ComposeConfig::load(&path).unwrap();
        assert!(config.vms.contains_key("workstation"));

        let err = ComposeConfig::load(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("Cannot read compose file"));
    }

    #[test]
    fn accepts_numeric_version() {
        let config = ComposeConfig::from_str("version: 1\nvms: {}\n")
            .expect("numeric version should be accepted");
        assert_eq!(config.version.as_deref(), Some("1"));
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = ComposeConfig::from_str("version: \"2\"\nvms: {}\n").unwrap_err();
        assert!(err.to_string().contains("Unsupported compose version"));
    }

    #[test]
    fn rejects_missing_version() {
        let err = ComposeConfig::from_str("vms: {}\n").unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = ComposeConfig::from_str(
            r#"
version: "1"
vms:
  a:
    depends_on: [ghost]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown VM 'ghost'"));
    }

    #[test]
    fn empty_vm_map_is_valid() {
        let config = ComposeConfig::from_str("version: \"1\"\nvms: {}\n").unwrap();
        assert!(config.vms.is_empty());
    }

    #[test]
    fn preserves_declaration_order() {
        let config = ComposeConfig::from_str(
            r#"
version: "1"
vms:
  zebra: {}
  apple: {}
  mango: {}
"#,
        )
        .unwrap();
        let names: Vec<_> = config.vms.keys().cloned().collect();
        assert_eq!(names, vec!["zebra", "apple", "mango"]);
    }

    #[test]
    fn parses_health_check_and_expectations() {
        let config = ComposeConfig::from_str(
            r#"
version: "1"
vms:
  desktop:
    config: ./desktop.yaml
    health_check:
      retries: 10
      interval_secs: 2
    expectations:
      packages: [vim, firefox]
      services: [cups]
      disk_limit_pct: 85
"#,
        )
        .unwrap();
        let vm = &config.vms["desktop"];
        let hc = vm.health_check.as_ref().unwrap();
        assert_eq!(hc.retries, 10);
        assert_eq!(hc.interval_secs, 2);
        let exp = vm.expectations.as_ref().unwrap();
        assert_eq!(exp.packages, vec!["vim", "firefox"]);
        assert_eq!(exp.disk_limit_pct, 85);
    }
}
