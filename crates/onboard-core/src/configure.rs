use crate::CoreError;
use onboard_schema::{Checksum, Manifest, RepoRef};
use onboard_store::{Artifact, ArtifactKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Where generated configuration lands.
#[derive(Debug, Clone)]
pub struct ConfigTargets {
    pub project_dir: PathBuf,
    /// Home directory for SSH configuration. SSH generation is skipped when unset.
    pub home_dir: Option<PathBuf>,
    pub git_config: PathBuf,
}

impl ConfigTargets {
    pub fn env_file(&self) -> PathBuf {
        self.project_dir.join(".env")
    }

    pub fn ssh_file(&self, repo: &RepoRef) -> Option<PathBuf> {
        self.home_dir.as_ref().map(|home| {
            home.join(".ssh/config.d")
                .join(format!("onboard-{}-{}", repo.owner, repo.repo))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    Created,
    /// The file already existed and was left untouched.
    Skipped,
    /// Dry-run only: the file would be created.
    Planned,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigItem {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub status: ConfigStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConfigItem {
    fn new(kind: ArtifactKind, path: PathBuf, status: ConfigStatus) -> Self {
        Self {
            kind,
            path,
            status,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigReport {
    pub items: Vec<ConfigItem>,
    /// Files created by this run, with their checksums.
    #[serde(skip)]
    pub artifacts: Vec<Artifact>,
}

impl ConfigReport {
    pub fn created(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ConfigStatus::Created)
            .count()
    }

    /// The file that could not be written. Generation stops there; files
    /// created before it are still listed in `artifacts`.
    pub fn failure(&self) -> Option<&ConfigItem> {
        self.items.iter().find(|i| i.status == ConfigStatus::Failed)
    }
}

struct PlannedFile {
    kind: ArtifactKind,
    path: PathBuf,
    content: String,
    private: bool,
}

/// Writes `.env`, SSH and git configuration derived from the manifest.
///
/// Existing files are never overwritten and never recorded as created, so
/// rollback only ever removes what onboard itself wrote.
pub struct ConfigGenerator {
    targets: ConfigTargets,
    env: Option<BTreeMap<String, String>>,
}

impl ConfigGenerator {
    pub fn new(targets: ConfigTargets) -> Self {
        Self { targets, env: None }
    }

    /// Read variable values from `env` instead of the process environment.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    fn lookup(&self, var: &str) -> Option<String> {
        match self.env {
            Some(ref env) => env.get(var).cloned(),
            None => std::env::var(var).ok(),
        }
    }

    fn plan(&self, manifest: &Manifest, repo: Option<&RepoRef>) -> Vec<PlannedFile> {
        let mut files = Vec::new();

        if !manifest.environment.is_empty() {
            files.push(PlannedFile {
                kind: ArtifactKind::Env,
                path: self.targets.env_file(),
                content: self.render_env(manifest),
                private: true,
            });
        }

        if let Some(repo) = repo.filter(|r| r.is_ssh()) {
            if let Some(path) = self.targets.ssh_file(repo) {
                files.push(PlannedFile {
                    kind: ArtifactKind::Ssh,
                    path,
                    content: render_ssh(repo),
                    private: true,
                });
            }
        }

        if !manifest.git.config.is_empty() {
            files.push(PlannedFile {
                kind: ArtifactKind::Git,
                path: self.targets.git_config.clone(),
                content: render_git_config(&manifest.name, &manifest.git.config),
                private: false,
            });
        }

        files
    }

    pub fn generate(&self, manifest: &Manifest, repo: Option<&RepoRef>) -> ConfigReport {
        let mut report = ConfigReport::default();
        for file in self.plan(manifest, repo) {
            if file.path.exists() {
                debug!("{} exists, leaving it alone", file.path.display());
                report
                    .items
                    .push(ConfigItem::new(file.kind, file.path, ConfigStatus::Skipped));
                continue;
            }
            if let Err(e) = write_new_file(&file.path, &file.content, file.private) {
                warn!("cannot write {}: {e}", file.path.display());
                report.items.push(ConfigItem {
                    error: Some(e.to_string()),
                    ..ConfigItem::new(file.kind, file.path, ConfigStatus::Failed)
                });
                break;
            }
            info!("wrote {} configuration to {}", file.kind, file.path.display());
            report.artifacts.push(Artifact {
                kind: file.kind,
                path: file.path.clone(),
                checksum: Checksum::of(file.content.as_bytes()),
            });
            report
                .items
                .push(ConfigItem::new(file.kind, file.path, ConfigStatus::Created));
        }
        report
    }

    /// Dry-run: what [`generate`](Self::generate) would do, without writing.
    pub fn preview(&self, manifest: &Manifest, repo: Option<&RepoRef>) -> ConfigReport {
        let items = self
            .plan(manifest, repo)
            .into_iter()
            .map(|file| {
                let status = if file.path.exists() {
                    ConfigStatus::Skipped
                } else {
                    ConfigStatus::Planned
                };
                ConfigItem::new(file.kind, file.path, status)
            })
            .collect();
        ConfigReport {
            items,
            artifacts: Vec::new(),
        }
    }

    fn render_env(&self, manifest: &Manifest) -> String {
        let mut out = format!("# Generated by onboard for {}\n", manifest.name);
        if !manifest.environment.required.is_empty() {
            out.push_str("\n# Required\n");
            for var in &manifest.environment.required {
                let value = self.lookup(var).unwrap_or_default();
                if value.is_empty() {
                    warn!("required variable {var} is not set; leaving it empty in .env");
                }
                let _ = writeln!(out, "{var}={}", quote_env_value(&value));
            }
        }
        if !manifest.environment.optional.is_empty() {
            out.push_str("\n# Optional\n");
            for var in &manifest.environment.optional {
                let _ = writeln!(out, "# {var}=");
            }
        }
        out
    }
}

fn quote_env_value(value: &str) -> String {
    if value.is_empty()
        || value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@".contains(c))
    {
        value.to_owned()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn render_ssh(repo: &RepoRef) -> String {
    let mut out = format!(
        "# Generated by onboard for {}\n# Include from ~/.ssh/config with: Include config.d/*\nHost {}\n  HostName {}\n",
        repo.slug(),
        repo.host,
        repo.host
    );
    if let Some(ref user) = repo.user {
        let _ = writeln!(out, "  User {user}");
    }
    out.push_str("  AddKeysToAgent yes\n");
    out
}

/// Render `section.key` / `section.subsection.key` pairs as an includable git
/// config file. Keys without a section are dropped.
pub(crate) fn render_git_config(name: &str, config: &BTreeMap<String, String>) -> String {
    let mut sections: BTreeMap<String, Vec<(&str, &str)>> = BTreeMap::new();
    for (key, value) in config {
        let Some((head, leaf)) = key.rsplit_once('.') else {
            warn!("ignoring git config key '{key}' without a section");
            continue;
        };
        let header = match head.split_once('.') {
            Some((section, sub)) => format!("[{section} \"{sub}\"]"),
            None => format!("[{head}]"),
        };
        sections.entry(header).or_default().push((leaf, value));
    }

    let mut out = format!(
        "# Generated by onboard for {name}\n# Enable with: git config include.path ../.onboard/gitconfig\n"
    );
    for (header, entries) in sections {
        let _ = writeln!(out, "{header}");
        for (leaf, value) in entries {
            let _ = writeln!(out, "\t{leaf} = {value}");
        }
    }
    out
}

fn write_new_file(path: &Path, content: &str, private: bool) -> Result<(), CoreError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    if private {
        restrict_to_owner(tmp.as_file())?;
    }
    tmp.persist_noclobber(path).map_err(|e| CoreError::Io(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_to_owner(file: &std::fs::File) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_file: &std::fs::File) -> Result<(), std::io::Error> {
    Ok(())
}
