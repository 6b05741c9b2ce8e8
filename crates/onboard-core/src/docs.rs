use crate::CoreError;
use onboard_store::InstallationState;
use std::path::{Path, PathBuf};

/// Output directory used when the manifest names none.
pub const DEFAULT_DOCS_DIR: &str = "docs/onboarding";

/// Renders onboarding documentation from the recorded installation.
///
/// Invoked last by the orchestrator when the manifest enables documentation.
/// Every path returned is recorded as a documentation artifact, so rollback
/// can remove it later.
pub trait DocumentationGenerator: Send + Sync {
    fn generate(
        &self,
        state: &InstallationState,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, CoreError>;
}

/// `<project>/<documentation.output_dir>`, or the default directory.
pub fn output_dir(project_dir: &Path, state: &InstallationState) -> PathBuf {
    let relative = state
        .manifest
        .documentation
        .output_dir
        .as_deref()
        .unwrap_or(DEFAULT_DOCS_DIR);
    project_dir.join(relative)
}
