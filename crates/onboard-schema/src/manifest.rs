use crate::check::VerificationCheck;
use crate::ledger::Category;
use crate::types::PackageName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Filenames probed in a repository, in order. First hit wins.
pub const MANIFEST_CANDIDATES: &[&str] =
    &[".onboard.yaml", ".onboard.yml", "onboard.yaml", "onboard.yml"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("manifest name must not be empty")]
    EmptyName,
    #[error("setup step #{index} is invalid: {reason}")]
    InvalidStep { index: usize, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub setup_steps: Vec<SetupStep>,
    #[serde(default)]
    pub verification: VerificationSection,
    #[serde(default)]
    pub documentation: DocumentationSection,
    #[serde(default)]
    pub git: GitSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Dependencies {
    #[serde(default)]
    pub system: Vec<PackageName>,
    #[serde(default)]
    pub npm: Vec<PackageName>,
    #[serde(default, alias = "pip")]
    pub python: Vec<PackageName>,
}

impl Dependencies {
    pub fn packages(&self, category: Category) -> &[PackageName] {
        match category {
            Category::System => &self.system,
            Category::Npm => &self.npm,
            Category::Python => &self.python,
        }
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|c| self.packages(*c).is_empty())
    }

    pub fn total(&self) -> usize {
        Category::ALL.iter().map(|c| self.packages(*c).len()).sum()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSection {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
}

impl EnvironmentSection {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SetupStep {
    pub name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VerificationSection {
    #[serde(default)]
    pub checks: Vec<VerificationCheck>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DocumentationSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

impl Default for DocumentationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: None,
            sections: Vec::new(),
            custom: None,
        }
    }
}

/// Git settings written to an includable config file by the config generator.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GitSection {
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Manifest {
    fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::EmptyName);
        }
        for (index, step) in self.setup_steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ManifestError::InvalidStep {
                    index,
                    reason: "name must not be empty".to_owned(),
                });
            }
            if step.command.trim().is_empty() {
                return Err(ManifestError::InvalidStep {
                    index,
                    reason: format!("'{}' has an empty command", step.name),
                });
            }
        }
        Ok(())
    }
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    let manifest: Manifest = serde_yaml::from_str(input)?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckKind, Priority};

    const FULL: &str = r#"
name: widgets
description: Widget factory monorepo
dependencies:
  system: [git, jq]
  npm: [typescript]
  pip: [black]
environment:
  required: [DATABASE_URL]
  optional: [SENTRY_DSN]
setup_steps:
  - name: install hooks
    command: ./scripts/hooks.sh
    description: Installs git hooks
verification:
  checks:
    - type: command
      command: git --version
      priority: critical
    - type: file
      path: .env
      should_exist: true
documentation:
  output_dir: docs/onboarding
  sections: [setup, troubleshooting]
git:
  config:
    pull.rebase: "true"
"#;

    #[test]
    fn parses_full_manifest() {
        let manifest = parse_manifest_str(FULL).expect("should parse");
        assert_eq!(manifest.name, "widgets");
        assert_eq!(manifest.dependencies.system.len(), 2);
        assert_eq!(manifest.dependencies.python, vec![PackageName::new("black")]);
        assert_eq!(manifest.dependencies.total(), 4);
        assert_eq!(manifest.environment.required, vec!["DATABASE_URL"]);
        assert_eq!(manifest.setup_steps.len(), 1);
        assert_eq!(manifest.verification.checks.len(), 2);
        assert_eq!(manifest.verification.checks[0].priority, Priority::Critical);
        assert!(matches!(
            manifest.verification.checks[1].kind,
            CheckKind::File { .. }
        ));
        assert!(manifest.documentation.enabled);
        assert_eq!(
            manifest.git.config.get("pull.rebase").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn parses_minimal_manifest() {
        let manifest = parse_manifest_str("name: tiny\n").expect("should parse");
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.environment.is_empty());
        assert!(manifest.verification.checks.is_empty());
        assert!(manifest.documentation.enabled);
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        assert!(parse_manifest_str("name: x\nbogus: 1\n").is_err());
    }

    #[test]
    fn rejects_unknown_dependency_category() {
        let err = parse_manifest_str("name: x\ndependencies:\n  cargo: [ripgrep]\n");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(matches!(
            parse_manifest_str("name: '  '\n"),
            Err(ManifestError::EmptyName)
        ));
    }

    #[test]
    fn rejects_step_without_command() {
        let input = "name: x\nsetup_steps:\n  - name: build\n    command: ''\n";
        assert!(matches!(
            parse_manifest_str(input),
            Err(ManifestError::InvalidStep { index: 0, .. })
        ));
    }

    #[test]
    fn parse_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".onboard.yaml");
        fs::write(&path, "name: on-disk\n").unwrap();
        assert_eq!(parse_manifest_file(&path).unwrap().name, "on-disk");
    }

    #[test]
    fn candidate_order_prefers_hidden_yaml() {
        assert_eq!(MANIFEST_CANDIDATES[0], ".onboard.yaml");
        assert_eq!(MANIFEST_CANDIDATES.len(), 4);
    }
}
