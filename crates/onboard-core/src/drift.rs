use crate::CoreError;
use onboard_schema::Checksum;
use onboard_store::{Artifact, InstallationState};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
    Intact,
    Modified,
    Missing,
}

impl DriftStatus {
    pub fn describe(self) -> &'static str {
        match self {
            DriftStatus::Intact => "unchanged since it was generated",
            DriftStatus::Modified => "modified since it was generated",
            DriftStatus::Missing => "missing since it was generated",
        }
    }
}

/// Compare a recorded artifact with what is on disk now.
pub fn check_artifact(artifact: &Artifact) -> Result<DriftStatus, CoreError> {
    match fs::read(&artifact.path) {
        Ok(bytes) if Checksum::of(&bytes) == artifact.checksum => Ok(DriftStatus::Intact),
        Ok(_) => Ok(DriftStatus::Modified),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DriftStatus::Missing),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactDrift {
    pub path: PathBuf,
    pub status: DriftStatus,
}

/// Drift of every artifact recorded in the installation state.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub artifacts: Vec<ArtifactDrift>,
    pub has_drift: bool,
}

pub fn diff_artifacts(state: &InstallationState) -> Result<DriftReport, CoreError> {
    let mut artifacts = Vec::with_capacity(state.artifacts.len());
    for artifact in &state.artifacts {
        artifacts.push(ArtifactDrift {
            path: artifact.path.clone(),
            status: check_artifact(artifact)?,
        });
    }
    let has_drift = artifacts.iter().any(|a| a.status != DriftStatus::Intact);
    Ok(DriftReport {
        artifacts,
        has_drift,
    })
}
