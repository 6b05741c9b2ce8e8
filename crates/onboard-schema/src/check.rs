//! Verification check definitions as declared under `verification.checks`.
//!
//! A check is a closed tagged union over `command`, `http`, `port` and `file`
//! sharing `priority`, `tags`, an optional display `name` and an optional
//! per-check `timeout` in seconds. Unknown `type` tags fail at parse time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Check priority. Ordering is `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!(
                "unknown priority '{other}', expected low|medium|high|critical"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Per-check timeout in seconds; the engine default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(flatten)]
    pub kind: CheckKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckKind {
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_output: Option<String>,
    },
    Http {
        url: String,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
    },
    Port {
        port: u16,
        #[serde(default = "default_host")]
        host: String,
    },
    File {
        path: String,
        #[serde(default = "default_should_exist")]
        should_exist: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contains: Option<String>,
    },
}

/// The closed set of check type tags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Command,
    Http,
    Port,
    File,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckType::Command => write!(f, "command"),
            CheckType::Http => write!(f, "http"),
            CheckType::Port => write!(f, "port"),
            CheckType::File => write!(f, "file"),
        }
    }
}

fn default_expected_status() -> u16 {
    200
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_should_exist() -> bool {
    true
}

impl CheckKind {
    pub fn check_type(&self) -> CheckType {
        match self {
            CheckKind::Command { .. } => CheckType::Command,
            CheckKind::Http { .. } => CheckType::Http,
            CheckKind::Port { .. } => CheckType::Port,
            CheckKind::File { .. } => CheckType::File,
        }
    }
}

impl VerificationCheck {
    /// Display name: the declared `name`, else a description derived from the target.
    pub fn display_name(&self) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        match &self.kind {
            CheckKind::Command { command, .. } => format!("command: {command}"),
            CheckKind::Http { url, .. } => format!("http: {url}"),
            CheckKind::Port { host, port } => format!("port: {host}:{port}"),
            CheckKind::File { path, .. } => format!("file: {path}"),
        }
    }

    pub fn check_type(&self) -> CheckType {
        self.kind.check_type()
    }

    pub fn has_any_tag<'a>(&self, wanted: impl IntoIterator<Item = &'a str>) -> bool {
        wanted
            .into_iter()
            .any(|w| self.tags.iter().any(|t| t == w))
    }
}
