//! Host environment detection and package manager backends for onboard.
//!
//! This crate implements the execution layer underneath the installer: the
//! `EnvironmentProbe` trait with a `HostProbe` that inspects the real machine
//! (OS family, shell, package managers on `PATH`, tool versions), the
//! `PackageManager` trait with a static registry of command-backed managers
//! (apt, dnf, zypper, pacman, brew, npm, pip), and mock implementations of both
//! for tests.

pub mod detect;
pub mod manager;
pub mod mock;

pub use detect::{command_exists, EnvironmentProbe, HostProbe, TRACKED_TOOLS};
pub use manager::{
    managers_for_profile, select_manager, CommandManager, ManagerSpec, PackageManager,
    KNOWN_MANAGERS,
};
pub use mock::{MockPackageManager, MockProbe};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("package manager '{0}' is not known to onboard")]
    UnknownManager(String),
    #[error("{manager} failed for '{package}': {reason}")]
    CommandFailed {
        manager: String,
        package: String,
        reason: String,
    },
    #[error("environment detection failed: {0}")]
    Detection(String),
}
