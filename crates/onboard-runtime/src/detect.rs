use crate::manager::{managers_for_profile, PackageManager, KNOWN_MANAGERS};
use crate::RuntimeError;
use onboard_schema::EnvironmentProfile;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// Tools whose versions are recorded in the profile.
pub const TRACKED_TOOLS: &[&str] = &["git", "node", "npm", "python3", "gh"];

/// Inspects the machine onboard runs on.
pub trait EnvironmentProbe: Send + Sync {
    fn detect(&self) -> Result<EnvironmentProfile, RuntimeError>;

    /// Package managers usable on this machine, in the order the profile lists
    /// them.
    fn package_managers(&self, profile: &EnvironmentProfile) -> Vec<Arc<dyn PackageManager>>;
}

pub fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Probe backed by the real host: `PATH` lookups, `/etc/os-release`, `$SHELL`.
pub struct HostProbe {
    os_release: PathBuf,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self {
            os_release: PathBuf::from("/etc/os-release"),
        }
    }
}

impl HostProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnvironmentProbe for HostProbe {
    fn detect(&self) -> Result<EnvironmentProfile, RuntimeError> {
        let package_managers: Vec<String> = KNOWN_MANAGERS
            .iter()
            .filter(|spec| command_exists(spec.probe))
            .map(|spec| spec.name.to_owned())
            .collect();

        let mut tool_versions = BTreeMap::new();
        for tool in TRACKED_TOOLS {
            if let Some(version) = tool_version(tool) {
                tool_versions.insert((*tool).to_owned(), version);
            }
        }

        let profile = EnvironmentProfile {
            os: std::env::consts::OS.to_owned(),
            distro: read_distro(&self.os_release),
            shell: std::env::var("SHELL").ok().filter(|s| !s.is_empty()),
            package_managers,
            tool_versions,
        };
        debug!(
            "detected {} with managers [{}]",
            profile.os_label(),
            profile.package_managers.join(", ")
        );
        Ok(profile)
    }

    fn package_managers(&self, profile: &EnvironmentProfile) -> Vec<Arc<dyn PackageManager>> {
        managers_for_profile(profile)
    }
}

fn read_distro(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| parse_os_release_id(&content))
}

/// The `ID=` value of an os-release file, unquoted.
pub(crate) fn parse_os_release_id(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let value = line.trim().strip_prefix("ID=")?;
        let value = value.trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_owned())
    })
}

fn tool_version(tool: &str) -> Option<String> {
    let output = Command::new(tool).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    // Some Pythons print the version on stderr.
    let text = if stdout.trim().is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        stdout.into_owned()
    };
    parse_version(&text)
}

/// First version-looking token in `--version` output: `git version 2.43.0`
/// yields `2.43.0`, `v20.11.1` yields `20.11.1`.
pub(crate) fn parse_version(output: &str) -> Option<String> {
    let first_line = output.lines().next()?;
    first_line
        .split_whitespace()
        .map(|tok| tok.trim_start_matches('v').trim_end_matches(','))
        .find(|tok| tok.starts_with(|c: char| c.is_ascii_digit()) && tok.contains('.'))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_release_id_is_parsed() {
        let content = "NAME=\"Debian GNU/Linux\"\nID=debian\nVERSION_ID=\"12\"\n";
        assert_eq!(parse_os_release_id(content).as_deref(), Some("debian"));
    }

    #[test]
    fn os_release_id_is_unquoted() {
        let content = "ID=\"opensuse-tumbleweed\"\nID_LIKE=\"opensuse suse\"\n";
        assert_eq!(
            parse_os_release_id(content).as_deref(),
            Some("opensuse-tumbleweed")
        );
    }

    #[test]
    fn os_release_without_id_is_none() {
        assert!(parse_os_release_id("NAME=Foo\n").is_none());
        assert!(parse_os_release_id("ID=\n").is_none());
    }

    #[test]
    fn read_distro_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("os-release");
        std::fs::write(&path, "ID=fedora\n").unwrap();
        assert_eq!(read_distro(&path).as_deref(), Some("fedora"));
        assert!(read_distro(&dir.path().join("missing")).is_none());
    }

    #[test]
    fn version_tokens_are_extracted() {
        assert_eq!(
            parse_version("git version 2.43.0\n").as_deref(),
            Some("2.43.0")
        );
        assert_eq!(parse_version("v20.11.1\n").as_deref(), Some("20.11.1"));
        assert_eq!(parse_version("Python 3.12.1").as_deref(), Some("3.12.1"));
        assert_eq!(
            parse_version("gh version 2.40.1 (2023-12-13)\nhttps://github.com/cli/cli").as_deref(),
            Some("2.40.1")
        );
        assert!(parse_version("no digits here").is_none());
    }

    #[test]
    fn command_exists_for_sh() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely-not-a-real-command-xyz"));
    }

    #[test]
    fn host_probe_reports_current_os() {
        let profile = HostProbe::new().detect().unwrap();
        assert_eq!(profile.os, std::env::consts::OS);
    }
}
