//! Setup manifest schema, repository references, and shared data types for onboard.
//!
//! This crate defines the schema layer: YAML manifest parsing (`Manifest`),
//! repository reference parsing (`RepoRef`), typed verification check
//! definitions (`VerificationCheck`), the detected `EnvironmentProfile`, and the
//! installer `Ledger` with its pure `calculate_summary` reducer.

pub mod check;
pub mod ledger;
pub mod manifest;
pub mod profile;
pub mod reference;
pub mod types;

pub use check::{CheckKind, CheckType, Priority, VerificationCheck};
pub use ledger::{calculate_summary, Category, CategoryLedger, FailedPackage, InstallSummary, Ledger};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, Dependencies, DocumentationSection,
    EnvironmentSection, GitSection, Manifest, ManifestError, SetupStep, VerificationSection,
    MANIFEST_CANDIDATES,
};
pub use profile::EnvironmentProfile;
pub use reference::{RefKind, ReferenceError, RepoRef};
pub use types::{Checksum, PackageName};
