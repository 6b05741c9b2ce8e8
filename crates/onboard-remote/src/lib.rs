//! Remote collaborators for onboard.
//!
//! This crate provides the `ManifestSource` trait for fetching manifest files
//! out of a hosted repository (backed by the `gh` CLI, plus an in-memory mock),
//! and the typed troubleshooting collaborator: a request/response contract with
//! an HTTP implementation and an explicit "unavailable" outcome that callers map
//! to a manual-resolution default.

pub mod config;
pub mod gh;
pub mod mock;
pub mod troubleshoot;

pub use config::TroubleshooterConfig;
pub use gh::GhCliSource;
pub use mock::{MockSource, MockTroubleshooter};
pub use troubleshoot::{
    ErrorContext, ErrorInfo, HttpTroubleshooter, NoTroubleshooter, Resolution,
    TroubleshootOutcome, TroubleshootRequest, Troubleshooter,
};

use onboard_schema::RepoRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("required tool '{tool}' is not available: {hint}")]
    ToolUnavailable { tool: String, hint: String },
    #[error("fetching {path} from {slug} failed: {reason}")]
    Fetch {
        slug: String,
        path: String,
        reason: String,
    },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Where manifest files come from.
pub trait ManifestSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with [`RemoteError::ToolUnavailable`] when the helper program the
    /// source shells out to is missing. Callers check this once per resolution.
    fn ensure_available(&self) -> Result<(), RemoteError>;

    /// Raw content of `path` at the repository's default branch.
    /// `Ok(None)` means the repository has no such file.
    fn fetch(&self, repo: &RepoRef, path: &str) -> Result<Option<String>, RemoteError>;
}
