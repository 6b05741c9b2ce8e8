use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The host as seen by one invocation: OS family, shell, package managers and
/// tool versions. Built once per run and only persisted inside the state
/// snapshot that used it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentProfile {
    /// `std::env::consts::OS` (`linux`, `macos`, `windows`, ...).
    pub os: String,
    /// Distribution id from `/etc/os-release` on Linux.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Names of package managers found on `PATH`, in preference order.
    #[serde(default)]
    pub package_managers: Vec<String>,
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
}

impl EnvironmentProfile {
    pub fn has_manager(&self, name: &str) -> bool {
        self.package_managers.iter().any(|m| m == name)
    }

    pub fn tool_version(&self, tool: &str) -> Option<&str> {
        self.tool_versions.get(tool).map(String::as_str)
    }

    /// `os` plus the distribution when known, e.g. `linux (debian)`.
    pub fn os_label(&self) -> String {
        match self.distro {
            Some(ref d) => format!("{} ({d})", self.os),
            None => self.os.clone(),
        }
    }
}
