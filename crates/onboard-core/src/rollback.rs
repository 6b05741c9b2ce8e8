use crate::drift::{check_artifact, DriftStatus};
use crate::installer::DependencyInstaller;
use crate::CoreError;
use onboard_runtime::PackageManager;
use onboard_schema::{Category, PackageName};
use onboard_store::{InstallationState, Phase};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A reversible phase. Variants are declared in reversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackPhase {
    Documentation,
    Configuration,
    Dependencies,
}

impl RollbackPhase {
    pub const ALL: [RollbackPhase; 3] = [
        RollbackPhase::Documentation,
        RollbackPhase::Configuration,
        RollbackPhase::Dependencies,
    ];

    /// The pipeline phase whose work this reverses.
    pub fn phase(self) -> Phase {
        match self {
            RollbackPhase::Documentation => Phase::Document,
            RollbackPhase::Configuration => Phase::Configure,
            RollbackPhase::Dependencies => Phase::Install,
        }
    }
}

impl fmt::Display for RollbackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackPhase::Documentation => write!(f, "documentation"),
            RollbackPhase::Configuration => write!(f, "configuration"),
            RollbackPhase::Dependencies => write!(f, "dependencies"),
        }
    }
}

impl FromStr for RollbackPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docs" | "documentation" => Ok(RollbackPhase::Documentation),
            "config" | "configuration" => Ok(RollbackPhase::Configuration),
            "deps" | "dependencies" => Ok(RollbackPhase::Dependencies),
            other => Err(format!(
                "unknown rollback phase '{other}', expected docs|config|deps"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOptions {
    /// Phases to reverse. Empty selects documentation and configuration, plus
    /// dependencies when `allow_unsafe` is set.
    pub phases: Vec<RollbackPhase>,
    /// Permit uninstalling packages.
    pub allow_unsafe: bool,
    /// Reverse items even when they drifted since they were recorded.
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Reversed,
    WouldReverse,
    SkippedDrift { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackItem {
    /// A file path or `<category>:<package>`.
    pub target: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: RollbackPhase,
    pub nothing_to_do: bool,
    pub items: Vec<RollbackItem>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackReport {
    pub dry_run: bool,
    pub phases: Vec<PhaseReport>,
    /// Dependencies had work to reverse but were left alone because
    /// `allow_unsafe` was not given.
    pub kept_dependencies: bool,
}

impl RollbackReport {
    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.phases
            .iter()
            .flat_map(|p| &p.items)
            .filter(|i| pred(&i.outcome))
            .count()
    }

    pub fn reversed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Reversed | ItemOutcome::WouldReverse))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::SkippedDrift { .. }))
    }

    pub fn failures(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn nothing_to_do(&self) -> bool {
        self.phases.iter().all(|p| p.nothing_to_do)
    }
}

/// Reverses recorded phases of an installation.
///
/// Works only from the [`InstallationState`]: artifacts carry the checksum
/// they were written with, and the dependency ledger names the packages that
/// onboard itself installed (skipped packages predate onboard and are never
/// touched). The state is updated in place; the caller persists it.
pub struct RollbackEngine {
    managers: Vec<Arc<dyn PackageManager>>,
}

impl RollbackEngine {
    pub fn new(managers: Vec<Arc<dyn PackageManager>>) -> Self {
        Self { managers }
    }

    pub fn run(
        &self,
        state: &mut InstallationState,
        options: &RollbackOptions,
    ) -> Result<RollbackReport, CoreError> {
        let deps_pending = has_installed_packages(state);
        let mut report = RollbackReport {
            dry_run: options.dry_run,
            ..RollbackReport::default()
        };

        let mut selected: Vec<RollbackPhase> = if options.phases.is_empty() {
            let mut all = vec![RollbackPhase::Documentation, RollbackPhase::Configuration];
            if options.allow_unsafe {
                all.push(RollbackPhase::Dependencies);
            } else {
                report.kept_dependencies = deps_pending;
            }
            all
        } else {
            options.phases.clone()
        };
        selected.sort();
        selected.dedup();

        if selected.contains(&RollbackPhase::Dependencies) && deps_pending && !options.allow_unsafe
        {
            return Err(CoreError::RollbackSafety(
                "uninstalling dependencies can break other software on this machine".to_owned(),
            ));
        }

        for phase in selected {
            let phase_report = match phase {
                RollbackPhase::Documentation | RollbackPhase::Configuration => {
                    reverse_artifacts(state, phase, options)
                }
                RollbackPhase::Dependencies => self.reverse_dependencies(state, options),
            };
            if phase_report.nothing_to_do {
                debug!("rollback {phase}: nothing to do");
            }
            report.phases.push(phase_report);
        }

        info!(
            "rollback{}: {} reversed, {} skipped, {} failed",
            if options.dry_run { " (dry run)" } else { "" },
            report.reversed(),
            report.skipped(),
            report.failures()
        );
        Ok(report)
    }

    fn reverse_dependencies(
        &self,
        state: &mut InstallationState,
        options: &RollbackOptions,
    ) -> PhaseReport {
        let mut report = PhaseReport {
            phase: RollbackPhase::Dependencies,
            nothing_to_do: !has_installed_packages(state),
            items: Vec::new(),
        };
        if report.nothing_to_do {
            return report;
        }

        let profile = state.environment.clone().unwrap_or_default();
        let selector = DependencyInstaller::new(self.managers.clone());

        for category in Category::ALL {
            let installed = state.dependencies.category(category).installed.clone();
            if installed.is_empty() {
                continue;
            }
            let manager = selector.manager_for(&profile, category);
            let mut removed: Vec<PackageName> = Vec::new();

            for package in installed.iter().rev() {
                let target = format!("{category}:{package}");
                let outcome = match manager {
                    None => ItemOutcome::Failed {
                        reason: format!("no package manager available for {category} packages"),
                    },
                    Some(manager) => {
                        let outcome = uninstall_one(manager.as_ref(), package, options);
                        if outcome == ItemOutcome::Reversed {
                            removed.push(package.clone());
                        }
                        outcome
                    }
                };
                report.items.push(RollbackItem { target, outcome });
            }

            if !removed.is_empty() {
                state
                    .dependencies
                    .category_mut(category)
                    .installed
                    .retain(|p| !removed.contains(p));
            }
        }

        if !options.dry_run && !has_installed_packages(state) {
            state.mark_rolled_back(Phase::Install);
        }
        report
    }
}

fn has_installed_packages(state: &InstallationState) -> bool {
    state
        .dependencies
        .iter()
        .any(|(_, ledger)| !ledger.installed.is_empty())
}

fn uninstall_one(
    manager: &dyn PackageManager,
    package: &PackageName,
    options: &RollbackOptions,
) -> ItemOutcome {
    if !options.force {
        match manager.is_installed(package) {
            Ok(true) => {}
            Ok(false) => {
                return ItemOutcome::SkippedDrift {
                    reason: format!("{package} is no longer installed via {}", manager.name()),
                }
            }
            Err(e) => {
                return ItemOutcome::Failed {
                    reason: format!("cannot query {package}: {e}"),
                }
            }
        }
    }
    if options.dry_run {
        return ItemOutcome::WouldReverse;
    }
    match manager.uninstall(package) {
        Ok(()) => {
            info!("uninstalled {package} via {}", manager.name());
            ItemOutcome::Reversed
        }
        Err(e) => {
            warn!("uninstalling {package} failed: {e}");
            ItemOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

fn reverse_artifacts(
    state: &mut InstallationState,
    phase: RollbackPhase,
    options: &RollbackOptions,
) -> PhaseReport {
    let artifacts: Vec<_> = state.artifacts_for(phase.phase()).cloned().collect();
    let mut report = PhaseReport {
        phase,
        nothing_to_do: artifacts.is_empty(),
        items: Vec::new(),
    };
    let mut removed: Vec<PathBuf> = Vec::new();

    for artifact in artifacts.iter().rev() {
        let target = artifact.path.display().to_string();
        let drift = if options.force {
            Ok(None)
        } else {
            check_artifact(artifact).map(Some)
        };

        let outcome = match drift {
            Err(e) => ItemOutcome::Failed {
                reason: e.to_string(),
            },
            Ok(Some(status @ (DriftStatus::Modified | DriftStatus::Missing))) => {
                warn!("{target} is {}; skipping", status.describe());
                ItemOutcome::SkippedDrift {
                    reason: status.describe().to_owned(),
                }
            }
            Ok(_) if options.dry_run => ItemOutcome::WouldReverse,
            Ok(_) => match std::fs::remove_file(&artifact.path) {
                Ok(()) => {
                    info!("removed {target}");
                    removed.push(artifact.path.clone());
                    ItemOutcome::Reversed
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    removed.push(artifact.path.clone());
                    ItemOutcome::Reversed
                }
                Err(e) => ItemOutcome::Failed {
                    reason: e.to_string(),
                },
            },
        };
        report.items.push(RollbackItem { target, outcome });
    }

    if !options.dry_run && !artifacts.is_empty() {
        let phase_kind = phase.phase();
        state
            .artifacts
            .retain(|a| !(a.kind.phase() == phase_kind && removed.contains(&a.path)));
        if state.artifacts_for(phase_kind).next().is_none() {
            state.mark_rolled_back(phase_kind);
        }
    }
    report
}
