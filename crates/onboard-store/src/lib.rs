//! Installation state persistence, manifest cache, and on-disk layout for onboard.
//!
//! This crate provides the storage layer: `StateLayout` for the per-project
//! `.onboard/` directory, `StateStore` for the single checksummed
//! `InstallationState` document (atomic whole-file writes), and `ManifestCache`
//! for time-boxed manifest content keyed by `(owner, repo)`.

pub mod cache;
pub mod layout;
pub mod state;

pub use cache::{default_cache_dir, CacheStats, CachedManifest, ManifestCache, DEFAULT_CACHE_TTL};
pub use layout::StateLayout;
pub use state::{
    Artifact, ArtifactKind, CheckCounts, InstallationState, Phase, StateStore, StepRecord,
    StepStatus, VerificationSummary, MAX_VERIFICATION_HISTORY, STATE_FORMAT_VERSION,
};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee rename durability without it, so every atomic
/// write in this crate follows `persist()` with a parent-directory fsync.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("installation state at {path} is corrupt: {reason}")]
    StateCorrupt { path: String, reason: String },
    #[error("unsupported state format version: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("invalid cache key '{0}'")]
    InvalidCacheKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_state_corrupt() {
        let e = StoreError::StateCorrupt {
            path: "/p/.onboard/state.json".to_owned(),
            reason: "checksum mismatch".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/p/.onboard/state.json"));
        assert!(msg.contains("checksum mismatch"));
    }

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 1,
            found: 7,
        };
        let msg = e.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains('7'));
    }

    #[test]
    fn store_error_display_invalid_cache_key() {
        let e = StoreError::InvalidCacheKey("../etc".to_owned());
        assert!(e.to_string().contains("../etc"));
    }
}
