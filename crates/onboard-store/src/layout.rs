use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_DIR: &str = ".onboard";

/// Directory layout of the per-project onboard directory.
///
/// Everything onboard persists for one machine/project pair lives under
/// `<project>/.onboard/`. Directories are created lazily on
/// [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StateLayout {
    project: PathBuf,
}

impl StateLayout {
    pub fn new(project: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
        }
    }

    #[inline]
    pub fn project_dir(&self) -> &Path {
        &self.project
    }

    #[inline]
    pub fn root(&self) -> PathBuf {
        self.project.join(STATE_DIR)
    }

    #[inline]
    pub fn state_file(&self) -> PathBuf {
        self.root().join("state.json")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root().join(".lock")
    }

    /// Includable git config written by the config generator.
    #[inline]
    pub fn git_config_file(&self) -> PathBuf {
        self.root().join("gitconfig")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.root())?;
        Ok(())
    }
}
