use crate::layout::StateLayout;
use crate::{fsync_dir, StoreError};
use onboard_schema::{Checksum, EnvironmentProfile, Ledger, Manifest, RepoRef};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::debug;

/// Current state document format version.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Verification history retention. Oldest entries are evicted first.
pub const MAX_VERIFICATION_HISTORY: usize = 10;

/// One stage of the setup pipeline, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Resolve,
    Detect,
    Install,
    Setup,
    Configure,
    Verify,
    Document,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Resolve => write!(f, "resolve"),
            Phase::Detect => write!(f, "detect"),
            Phase::Install => write!(f, "install"),
            Phase::Setup => write!(f, "setup"),
            Phase::Configure => write!(f, "configure"),
            Phase::Verify => write!(f, "verify"),
            Phase::Document => write!(f, "document"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    /// The phase completed but some units of work inside it failed.
    Partial,
    Failed,
    RolledBack,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Partial => write!(f, "partial"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Persisted outcome of one executed phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub name: Phase,
    pub status: StepStatus,
    #[serde(default)]
    pub result: serde_json::Value,
    pub timestamp: String,
}

impl StepRecord {
    pub fn new(name: Phase, status: StepStatus, result: serde_json::Value) -> Self {
        Self {
            name,
            status,
            result,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Env,
    Ssh,
    Git,
    Documentation,
}

impl ArtifactKind {
    /// The phase whose rollback removes this artifact.
    pub fn phase(self) -> Phase {
        match self {
            ArtifactKind::Env | ArtifactKind::Ssh | ArtifactKind::Git => Phase::Configure,
            ArtifactKind::Documentation => Phase::Document,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Env => write!(f, "env"),
            ArtifactKind::Ssh => write!(f, "ssh"),
            ArtifactKind::Git => write!(f, "git"),
            ArtifactKind::Documentation => write!(f, "documentation"),
        }
    }
}

/// A file onboard created, with the checksum it had when written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub checksum: Checksum,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    pub timestamp: String,
    pub success: bool,
    #[serde(default)]
    pub has_critical_failures: bool,
    pub summary: CheckCounts,
}

/// The single source of truth for what happened on this machine/project pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationState {
    pub format_version: u32,
    pub installed: bool,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepoRef>,
    /// Snapshot taken at orchestration time; later verify/rollback runs read
    /// this copy, never the upstream manifest.
    pub manifest: Manifest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentProfile>,
    #[serde(default)]
    pub dependencies: Ledger,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub verification_history: Vec<VerificationSummary>,
    /// blake3 checksum over the document with this field unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl InstallationState {
    pub fn new(manifest: Manifest, repository: Option<RepoRef>) -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            installed: false,
            timestamp: chrono::Utc::now().to_rfc3339(),
            repository,
            manifest,
            environment: None,
            dependencies: Ledger::default(),
            artifacts: Vec::new(),
            steps: Vec::new(),
            verification_history: Vec::new(),
            checksum: None,
        }
    }

    /// Append a step record in execution order.
    pub fn record_step(&mut self, record: StepRecord) {
        self.timestamp.clone_from(&record.timestamp);
        self.steps.push(record);
    }

    /// The most recent record for `phase`, if that phase ran.
    pub fn step(&self, phase: Phase) -> Option<&StepRecord> {
        self.steps.iter().rev().find(|s| s.name == phase)
    }

    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    /// Mark every record of `phase` as reversed.
    pub fn mark_rolled_back(&mut self, phase: Phase) {
        for step in self.steps.iter_mut().filter(|s| s.name == phase) {
            step.status = StepStatus::RolledBack;
        }
        self.timestamp = chrono::Utc::now().to_rfc3339();
    }

    pub fn artifacts_for(&self, phase: Phase) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind.phase() == phase)
    }

    /// Append a verification summary, keeping only the most recent
    /// [`MAX_VERIFICATION_HISTORY`] entries.
    pub fn push_verification(&mut self, summary: VerificationSummary) {
        self.verification_history.push(summary);
        if self.verification_history.len() > MAX_VERIFICATION_HISTORY {
            let excess = self.verification_history.len() - MAX_VERIFICATION_HISTORY;
            self.verification_history.drain(..excess);
        }
    }

    pub fn last_verification(&self) -> Option<&VerificationSummary> {
        self.verification_history.last()
    }

    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// Reads and writes the installation state as a whole document.
///
/// Writes go through a temp file in the same directory followed by an atomic
/// rename, so concurrent readers observe either the old or the new document.
pub struct StateStore {
    layout: StateLayout,
}

impl StateStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn exists(&self) -> bool {
        self.layout.state_file().exists()
    }

    /// Load the state. `Ok(None)` means nothing has been recorded yet;
    /// an unreadable or tampered document is `StateCorrupt`.
    pub fn load(&self) -> Result<Option<InstallationState>, StoreError> {
        let path = self.layout.state_file();
        if !path.exists() {
            return Ok(None);
        }
        let corrupt = |reason: String| StoreError::StateCorrupt {
            path: path.display().to_string(),
            reason,
        };

        let content = fs::read_to_string(&path).map_err(|e| corrupt(e.to_string()))?;
        let state: InstallationState =
            serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;

        if state.format_version != STATE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: state.format_version,
            });
        }

        if let Some(ref expected) = state.checksum {
            let actual = state.compute_checksum()?;
            if actual != *expected {
                return Err(corrupt(format!(
                    "checksum mismatch: expected {expected}, got {actual}"
                )));
            }
        }

        Ok(Some(state))
    }

    pub fn save(&self, state: &InstallationState) -> Result<(), StoreError> {
        self.layout.initialize()?;
        let dir = self.layout.root();
        let dest = self.layout.state_file();

        let mut with_checksum = state.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        debug!("state written to {}", dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onboard_schema::parse_manifest_str;

    fn test_store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(StateLayout::new(dir.path()));
        (dir, store)
    }

    fn sample_state() -> InstallationState {
        let manifest = parse_manifest_str("name: widgets\n").unwrap();
        let repo = RepoRef::parse("https://github.com/acme/widgets").unwrap();
        InstallationState::new(manifest, Some(repo))
    }

    fn summary(n: usize) -> VerificationSummary {
        VerificationSummary {
            timestamp: format!("2025-01-01T00:00:{n:02}Z"),
            success: true,
            has_critical_failures: false,
            summary: CheckCounts {
                total: n,
                passed: n,
                failed: 0,
            },
        }
    }

    #[test]
    fn load_without_state_returns_none() {
        let (_dir, store) = test_store();
        assert!(store.load().unwrap().is_none());
        assert!(!store.exists());
    }

    #[test]
    fn save_then_load_preserves_steps_in_order() {
        let (_dir, store) = test_store();
        let mut state = sample_state();
        state.record_step(StepRecord::new(
            Phase::Resolve,
            StepStatus::Success,
            serde_json::json!({"source": "cache"}),
        ));
        state.record_step(StepRecord::new(
            Phase::Detect,
            StepStatus::Success,
            serde_json::Value::Null,
        ));
        store.save(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.steps[0].name, Phase::Resolve);
        assert_eq!(loaded.steps[1].name, Phase::Detect);
        assert!(loaded.checksum.is_some(), "save() must embed a checksum");
        assert_eq!(loaded.manifest.name, "widgets");
    }

    #[test]
    fn tampered_state_is_corrupt() {
        let (_dir, store) = test_store();
        store.save(&sample_state()).unwrap();
        let path = store.layout().state_file();
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("widgets", "gadgets")).unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::StateCorrupt { .. })
        ));
    }

    #[test]
    fn unparseable_state_is_corrupt() {
        let (_dir, store) = test_store();
        store.layout().initialize().unwrap();
        fs::write(store.layout().state_file(), "{ not json").unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, StoreError::StateCorrupt { .. }));
        assert!(err.to_string().contains("corrupt"));
    }

    #[test]
    fn future_format_version_is_rejected() {
        let (_dir, store) = test_store();
        let mut state = sample_state();
        state.format_version = 99;
        store.save(&state).unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn history_is_bounded_to_most_recent_ten() {
        let mut state = sample_state();
        for n in 0..MAX_VERIFICATION_HISTORY {
            state.push_verification(summary(n));
        }
        assert_eq!(state.verification_history.len(), 10);

        state.push_verification(summary(10));
        assert_eq!(state.verification_history.len(), 10);
        assert_eq!(state.verification_history[0].summary.total, 1);
        assert_eq!(state.last_verification().unwrap().summary.total, 10);
    }

    #[test]
    fn history_serializes_as_camel_case() {
        let mut state = sample_state();
        state.push_verification(summary(1));
        let json = serde_json::to_value(&state).unwrap();
        assert!(json["verificationHistory"].is_array());
        assert!(json["verificationHistory"][0]["hasCriticalFailures"].is_boolean());
        assert!(json["installed"].is_boolean());
    }

    #[test]
    fn step_returns_latest_record_for_phase() {
        let mut state = sample_state();
        state.record_step(StepRecord::new(
            Phase::Install,
            StepStatus::Failed,
            serde_json::Value::Null,
        ));
        state.record_step(StepRecord::new(
            Phase::Install,
            StepStatus::Success,
            serde_json::Value::Null,
        ));
        assert_eq!(state.step(Phase::Install).unwrap().status, StepStatus::Success);
        assert!(state.step(Phase::Verify).is_none());
        assert_eq!(state.failed_step().unwrap().name, Phase::Install);
    }

    #[test]
    fn mark_rolled_back_and_artifact_filtering() {
        let mut state = sample_state();
        state.record_step(StepRecord::new(
            Phase::Configure,
            StepStatus::Success,
            serde_json::Value::Null,
        ));
        state.artifacts.push(Artifact {
            kind: ArtifactKind::Env,
            path: PathBuf::from("/p/.env"),
            checksum: Checksum::of(b"A=\n"),
        });
        state.artifacts.push(Artifact {
            kind: ArtifactKind::Documentation,
            path: PathBuf::from("/p/docs/ONBOARDING.md"),
            checksum: Checksum::of(b"# hi\n"),
        });

        assert_eq!(state.artifacts_for(Phase::Configure).count(), 1);
        assert_eq!(state.artifacts_for(Phase::Document).count(), 1);

        state.mark_rolled_back(Phase::Configure);
        assert_eq!(
            state.step(Phase::Configure).unwrap().status,
            StepStatus::RolledBack
        );
    }
}
