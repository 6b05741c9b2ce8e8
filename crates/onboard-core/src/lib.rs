//! Core orchestration engine for onboard.
//!
//! This crate ties together manifest resolution, environment detection, package
//! installation, configuration generation, verification, and rollback into the
//! `Engine`: the phase orchestrator that records every phase in the
//! installation state, plus the independently invocable verify and rollback
//! operations that read back from it. It also provides artifact drift
//! detection, the advisory state lock, cancellation, and user settings.

pub mod concurrency;
pub mod configure;
pub mod docs;
pub mod drift;
pub mod engine;
pub mod installer;
pub mod lifecycle;
pub mod resolver;
pub mod rollback;
pub mod settings;
pub mod setup;
pub mod verify;

pub use concurrency::{install_signal_handler, CancelToken, StateLock};
pub use configure::{ConfigGenerator, ConfigItem, ConfigReport, ConfigStatus, ConfigTargets};
pub use docs::DocumentationGenerator;
pub use drift::{check_artifact, diff_artifacts, ArtifactDrift, DriftReport, DriftStatus};
pub use engine::{Engine, InitOptions, InitReport, ManifestInput};
pub use installer::DependencyInstaller;
pub use lifecycle::{validate_transition, CheckState};
pub use resolver::{ManifestOrigin, ManifestResolver, ResolveOptions, ResolvedManifest};
pub use rollback::{
    ItemOutcome, PhaseReport, RollbackEngine, RollbackItem, RollbackOptions, RollbackPhase,
    RollbackReport,
};
pub use settings::Settings;
pub use setup::{SetupReport, SetupStatus, SetupStepResult};
pub use verify::{
    CheckResult, CheckStatus, VerificationEngine, VerificationReport, VerifyFilter, VerifyOptions,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] onboard_schema::ManifestError),
    #[error(transparent)]
    Reference(#[from] onboard_schema::ReferenceError),
    #[error("store error: {0}")]
    Store(#[from] onboard_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] onboard_runtime::RuntimeError),
    #[error("remote error: {0}")]
    Remote(#[from] onboard_remote::RemoteError),
    #[error("no manifest could be fetched for {slug}: {reason}")]
    RemoteFetch { slug: String, reason: String },
    #[error("refusing to roll back: {0}")]
    RollbackSafety(String),
    #[error("no installation recorded in {0}")]
    NotInitialized(String),
    #[error("another onboard operation holds the lock at {0}")]
    Locked(String),
    #[error("invalid check transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("invalid settings: {0}")]
    Settings(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// A command the user can run to get past this error, where one exists.
    pub fn remedy(&self) -> Option<String> {
        match self {
            CoreError::RollbackSafety(_) => {
                Some("rerun with --unsafe to uninstall dependencies".to_owned())
            }
            CoreError::NotInitialized(_) => Some("onboard init <repo-ref>".to_owned()),
            CoreError::Locked(_) => {
                Some("wait for the other onboard process to finish, then retry".to_owned())
            }
            CoreError::Remote(onboard_remote::RemoteError::ToolUnavailable { hint, .. }) => {
                Some(hint.clone())
            }
            CoreError::RemoteFetch { .. } => Some(
                "check the repository reference, or pass --manifest <path> to use a local manifest"
                    .to_owned(),
            ),
            CoreError::Store(onboard_store::StoreError::StateCorrupt { path, .. }) => Some(format!(
                "inspect or remove {path}, then run `onboard init` again"
            )),
            CoreError::Store(onboard_store::StoreError::VersionMismatch { .. }) => {
                Some("upgrade onboard, or remove .onboard/state.json and re-run init".to_owned())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_safety_suggests_unsafe_flag() {
        let e = CoreError::RollbackSafety("dependencies selected".to_owned());
        assert!(e.remedy().unwrap().contains("--unsafe"));
    }

    #[test]
    fn state_corrupt_remedy_names_the_file() {
        let e = CoreError::Store(onboard_store::StoreError::StateCorrupt {
            path: "/p/.onboard/state.json".to_owned(),
            reason: "bad".to_owned(),
        });
        assert!(e.remedy().unwrap().contains("/p/.onboard/state.json"));
    }

    #[test]
    fn invalid_reference_is_transparent() {
        let e: CoreError = onboard_schema::RepoRef::parse("nope").unwrap_err().into();
        assert!(e.to_string().starts_with("invalid repository reference"));
        assert!(e.remedy().is_none());
    }

    #[test]
    fn cancelled_has_no_remedy() {
        assert!(CoreError::Cancelled.remedy().is_none());
    }
}
