use crate::concurrency::{CancelToken, StateLock};
use crate::configure::{ConfigGenerator, ConfigReport, ConfigStatus, ConfigTargets};
use crate::docs::{self, DocumentationGenerator};
use crate::drift::{check_artifact, diff_artifacts, DriftReport, DriftStatus};
use crate::installer::DependencyInstaller;
use crate::resolver::{ManifestOrigin, ManifestResolver, ResolveOptions, ResolvedManifest};
use crate::rollback::{RollbackEngine, RollbackOptions, RollbackReport};
use crate::settings::Settings;
use crate::setup::{preview_setup_steps, run_setup_steps, SetupReport};
use crate::verify::{VerificationEngine, VerificationReport, VerifyFilter};
use crate::CoreError;
use onboard_remote::{
    ErrorContext, ErrorInfo, ManifestSource, NoTroubleshooter, Resolution, TroubleshootRequest,
    Troubleshooter,
};
use onboard_runtime::EnvironmentProbe;
use onboard_schema::{
    calculate_summary, Category, Checksum, EnvironmentProfile, InstallSummary, Ledger, Priority,
    RepoRef,
};
use onboard_store::{
    Artifact, ArtifactKind, InstallationState, ManifestCache, Phase, StateLayout, StateStore,
    StepRecord, StepStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where `init` takes its manifest from.
#[derive(Debug, Clone)]
pub enum ManifestInput {
    Repo(RepoRef),
    /// A manifest file on disk. Cache and remote are bypassed; `repo`, when
    /// given, still drives SSH configuration.
    Local {
        path: PathBuf,
        repo: Option<RepoRef>,
    },
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub input: ManifestInput,
    pub resolve: ResolveOptions,
    /// Report what would happen without installing, running, or writing
    /// anything. No state is persisted.
    pub dry_run: bool,
    pub skip_verify: bool,
}

impl InitOptions {
    pub fn repo(repo: RepoRef) -> Self {
        Self {
            input: ManifestInput::Repo(repo),
            resolve: ResolveOptions::default(),
            dry_run: false,
            skip_verify: false,
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            input: ManifestInput::Local {
                path: path.into(),
                repo: None,
            },
            resolve: ResolveOptions::default(),
            dry_run: false,
            skip_verify: false,
        }
    }
}

/// Outcome of one `init` run.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub project: String,
    pub dry_run: bool,
    pub origin: ManifestOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentProfile>,
    pub dependencies: Ledger,
    pub summary: InstallSummary,
    pub setup: SetupReport,
    pub configuration: ConfigReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    pub documentation: Vec<PathBuf>,
    /// The phase that halted the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl InitReport {
    fn new(resolved: &ResolvedManifest, dry_run: bool) -> Self {
        Self {
            project: resolved.manifest.name.clone(),
            dry_run,
            origin: resolved.origin.clone(),
            environment: None,
            dependencies: Ledger::default(),
            summary: InstallSummary::default(),
            setup: SetupReport::default(),
            configuration: ConfigReport::default(),
            verification: None,
            documentation: Vec::new(),
            failed_phase: None,
            error: None,
            resolution: None,
        }
    }

    /// Failed packages, failed checks, and a halting phase failure outside
    /// verification.
    pub fn failures(&self) -> usize {
        let halted = self
            .failed_phase
            .is_some_and(|phase| phase != Phase::Verify);
        self.summary.failed
            + self.verification.as_ref().map_or(0, |v| v.summary.failed)
            + usize::from(halted)
    }

    pub fn is_success(&self) -> bool {
        self.failed_phase.is_none() && self.failures() == 0
    }
}

/// Central orchestration engine for onboarding one project directory.
///
/// `init` sequences resolve, detect, install, setup, configure, verify and
/// document, recording one [`StepRecord`] per executed phase and persisting
/// the whole state after each one. A phase that cannot complete halts the run
/// and points at rollback; it never triggers rollback itself. `verify` and
/// `rollback` work later from the persisted state alone.
pub struct Engine {
    layout: StateLayout,
    store: StateStore,
    resolver: ManifestResolver,
    probe: Arc<dyn EnvironmentProbe>,
    troubleshooter: Arc<dyn Troubleshooter>,
    documentation: Option<Arc<dyn DocumentationGenerator>>,
    settings: Settings,
    cancel: CancelToken,
    home_dir: Option<PathBuf>,
    env: Option<BTreeMap<String, String>>,
}

impl Engine {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        source: Arc<dyn ManifestSource>,
        cache: ManifestCache,
        probe: Arc<dyn EnvironmentProbe>,
    ) -> Self {
        let layout = StateLayout::new(project_dir);
        Self {
            store: StateStore::new(layout.clone()),
            layout,
            resolver: ManifestResolver::new(source, cache),
            probe,
            troubleshooter: Arc::new(NoTroubleshooter),
            documentation: None,
            settings: Settings::default(),
            cancel: CancelToken::new(),
            home_dir: std::env::var_os("HOME").map(PathBuf::from),
            env: None,
        }
    }

    #[must_use]
    pub fn with_troubleshooter(mut self, troubleshooter: Arc<dyn Troubleshooter>) -> Self {
        self.troubleshooter = troubleshooter;
        self
    }

    #[must_use]
    pub fn with_documentation(mut self, generator: Arc<dyn DocumentationGenerator>) -> Self {
        self.documentation = Some(generator);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Home directory used for SSH configuration. `None` disables it.
    #[must_use]
    pub fn with_home_dir(mut self, home: Option<PathBuf>) -> Self {
        self.home_dir = home;
        self
    }

    /// Variable values for `.env` generation instead of the process
    /// environment.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn project_dir(&self) -> &Path {
        self.layout.project_dir()
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn resolver(&self) -> &ManifestResolver {
        &self.resolver
    }

    pub fn init(&self, options: &InitOptions) -> Result<InitReport, CoreError> {
        self.cancel.check()?;
        let _lock = if options.dry_run {
            None
        } else {
            Some(StateLock::acquire_or_fail(&self.layout.lock_file())?)
        };

        // Nothing is written until the manifest resolves, so a failed
        // resolution leaves any earlier state untouched.
        let (resolved, repo) = match options.input {
            ManifestInput::Repo(ref repo) => {
                (self.resolver.resolve(repo, &options.resolve)?, Some(repo.clone()))
            }
            ManifestInput::Local { ref path, ref repo } => {
                (ManifestResolver::resolve_local(path)?, repo.clone())
            }
        };
        info!(
            "onboarding {} into {}",
            resolved.manifest.name,
            self.project_dir().display()
        );

        let previous = if options.dry_run {
            None
        } else {
            self.previous_state()
        };

        let mut run = Run {
            engine: self,
            state: InstallationState::new(resolved.manifest.clone(), repo),
            report: InitReport::new(&resolved, options.dry_run),
            previous,
            dry_run: options.dry_run,
            configured: false,
        };
        run.record(
            Phase::Resolve,
            StepStatus::Success,
            serde_json::to_value(&resolved.origin)?,
        )?;

        run.execute(options.skip_verify)?;
        run.keep_previous_artifacts();

        run.state.installed = run.report.failed_phase.is_none();
        run.persist()?;
        match run.report.failed_phase {
            Some(phase) => warn!("onboarding halted in {phase} phase"),
            None => info!(
                "onboarding complete with {} failure(s)",
                run.report.failures()
            ),
        }
        Ok(run.report)
    }

    /// Re-run the recorded manifest's checks and append the result to the
    /// verification history.
    pub fn verify(&self, filter: &VerifyFilter) -> Result<VerificationReport, CoreError> {
        let _lock = StateLock::acquire_or_fail(&self.layout.lock_file())?;
        let mut state = self.load_required()?;

        let engine = VerificationEngine::new(self.settings.verify_options(), self.cancel.clone());
        let report = engine.run(
            &state.manifest.verification.checks,
            filter,
            self.project_dir(),
        )?;

        state.push_verification(report.to_summary());
        self.store.save(&state)?;
        Ok(report)
    }

    pub fn rollback(&self, options: &RollbackOptions) -> Result<RollbackReport, CoreError> {
        self.cancel.check()?;
        let _lock = if options.dry_run {
            None
        } else {
            Some(StateLock::acquire_or_fail(&self.layout.lock_file())?)
        };
        let mut state = self.load_required()?;

        // Managers come from the environment recorded at install time.
        let profile = state.environment.clone().unwrap_or_default();
        let managers = self.probe.package_managers(&profile);
        let report = RollbackEngine::new(managers).run(&mut state, options)?;

        if !options.dry_run && report.reversed() > 0 {
            state.installed = false;
            self.store.save(&state)?;
        }
        Ok(report)
    }

    pub fn status(&self) -> Result<Option<InstallationState>, CoreError> {
        Ok(self.store.load()?)
    }

    pub fn drift(&self) -> Result<DriftReport, CoreError> {
        let state = self.load_required()?;
        diff_artifacts(&state)
    }

    fn load_required(&self) -> Result<InstallationState, CoreError> {
        self.store.load()?.ok_or_else(|| {
            CoreError::NotInitialized(self.project_dir().display().to_string())
        })
    }

    /// The state being replaced. A corrupt document is not fatal here: init
    /// overwrites it.
    fn previous_state(&self) -> Option<InstallationState> {
        match self.store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!("ignoring unreadable previous state: {e}");
                None
            }
        }
    }
}

/// One in-flight `init`.
struct Run<'a> {
    engine: &'a Engine,
    state: InstallationState,
    report: InitReport,
    previous: Option<InstallationState>,
    dry_run: bool,
    /// Whether the configure phase ran, successfully or not.
    configured: bool,
}

impl Run<'_> {
    fn persist(&self) -> Result<(), CoreError> {
        if !self.dry_run {
            self.engine.store.save(&self.state)?;
        }
        Ok(())
    }

    /// Append the phase record and persist the whole state.
    fn record(
        &mut self,
        phase: Phase,
        status: StepStatus,
        result: serde_json::Value,
    ) -> Result<(), CoreError> {
        debug!("phase {phase}: {status}");
        self.state
            .record_step(StepRecord::new(phase, status, result));
        self.persist()
    }

    /// Record `phase` as failed with a troubleshooting hint. Forward progress
    /// stops after this.
    fn halt(
        &mut self,
        phase: Phase,
        message: String,
        tool: Option<&str>,
        detail: serde_json::Value,
    ) -> Result<(), CoreError> {
        warn!("{phase} failed: {message}");
        let profile = self.report.environment.as_ref();
        let request = TroubleshootRequest {
            error: ErrorInfo {
                kind: phase.to_string(),
                message: message.clone(),
            },
            context: ErrorContext {
                os: profile.map_or_else(|| std::env::consts::OS.to_owned(), EnvironmentProfile::os_label),
                tool_version: tool
                    .and_then(|t| profile.and_then(|p| p.tool_version(t)))
                    .map(str::to_owned),
                failed_step: phase.to_string(),
            },
        };
        let resolution = self
            .engine
            .troubleshooter
            .diagnose(&request)
            .into_resolution();

        self.record(
            phase,
            StepStatus::Failed,
            serde_json::json!({
                "error": message,
                "resolution": resolution,
                "detail": detail,
            }),
        )?;
        self.report.failed_phase = Some(phase);
        self.report.error = Some(message);
        self.report.resolution = Some(resolution);
        Ok(())
    }

    fn execute(&mut self, skip_verify: bool) -> Result<(), CoreError> {
        self.engine.cancel.check()?;
        let Some(profile) = self.detect()? else {
            return Ok(());
        };

        self.engine.cancel.check()?;
        self.install(&profile)?;

        self.engine.cancel.check()?;
        if !self.setup()? {
            return Ok(());
        }

        self.engine.cancel.check()?;
        if !self.configure()? {
            return Ok(());
        }

        if self.dry_run || skip_verify {
            debug!("verification not run");
        } else {
            self.engine.cancel.check()?;
            if !self.verify()? {
                return Ok(());
            }
        }

        if !self.dry_run {
            self.engine.cancel.check()?;
            self.document()?;
        }
        Ok(())
    }

    fn detect(&mut self) -> Result<Option<EnvironmentProfile>, CoreError> {
        match self.engine.probe.detect() {
            Ok(profile) => {
                info!(
                    "detected {} with managers [{}]",
                    profile.os_label(),
                    profile.package_managers.join(", ")
                );
                self.state.environment = Some(profile.clone());
                self.report.environment = Some(profile.clone());
                self.record(
                    Phase::Detect,
                    StepStatus::Success,
                    serde_json::to_value(&profile)?,
                )?;
                Ok(Some(profile))
            }
            Err(e) => {
                self.halt(Phase::Detect, e.to_string(), None, serde_json::Value::Null)?;
                Ok(None)
            }
        }
    }

    /// Partial failures are recorded and the run continues.
    fn install(&mut self, profile: &EnvironmentProfile) -> Result<(), CoreError> {
        let deps = &self.state.manifest.dependencies;
        let installer = DependencyInstaller::new(self.engine.probe.package_managers(profile));
        let ledger = if self.dry_run {
            installer.preview(deps, profile)
        } else {
            installer.install(deps, profile)
        };
        let summary = calculate_summary(&ledger);
        let status = if summary.failed > 0 {
            StepStatus::Partial
        } else {
            StepStatus::Success
        };

        self.state.dependencies = ledger.clone();
        if !self.dry_run {
            self.carry_forward_packages();
        }
        self.report.dependencies = ledger;
        self.report.summary = summary;
        self.record(Phase::Install, status, serde_json::to_value(summary)?)
    }

    fn setup(&mut self) -> Result<bool, CoreError> {
        let steps = &self.state.manifest.setup_steps;
        let report = if self.dry_run {
            preview_setup_steps(steps)
        } else {
            run_setup_steps(steps, self.engine.project_dir(), &self.engine.cancel)?
        };
        let result = serde_json::to_value(&report)?;

        let failure = report.failed_step().map(|step| {
            let tool = step.command.split_whitespace().next().map(str::to_owned);
            let mut message = format!("setup step '{}' failed", step.name);
            if let Some(code) = step.exit_code {
                let _ = write!(message, " with exit code {code}");
            }
            if let Some(stderr) = step.stderr.as_deref().filter(|s| !s.is_empty()) {
                let _ = write!(message, ": {stderr}");
            }
            (message, tool)
        });
        self.report.setup = report;

        match failure {
            Some((message, tool)) => {
                self.halt(Phase::Setup, message, tool.as_deref(), result)?;
                Ok(false)
            }
            None => {
                self.record(Phase::Setup, StepStatus::Success, result)?;
                Ok(true)
            }
        }
    }

    fn configure(&mut self) -> Result<bool, CoreError> {
        let targets = ConfigTargets {
            project_dir: self.engine.project_dir().to_path_buf(),
            home_dir: self.engine.home_dir.clone(),
            git_config: self.engine.layout.git_config_file(),
        };
        let mut generator = ConfigGenerator::new(targets);
        if let Some(ref env) = self.engine.env {
            generator = generator.with_env(env.clone());
        }

        let manifest = &self.state.manifest;
        let repo = self.state.repository.as_ref();
        let report = if self.dry_run {
            generator.preview(manifest, repo)
        } else {
            generator.generate(manifest, repo)
        };
        self.configured = true;

        // Files written before a failure are recorded either way so rollback
        // can remove them.
        self.carry_forward(&report);
        self.state.artifacts.extend(report.artifacts.iter().cloned());
        let result = serde_json::to_value(&report)?;
        let failure = report.failure().map(|item| {
            format!(
                "cannot write {} configuration to {}: {}",
                item.kind,
                item.path.display(),
                item.error.as_deref().unwrap_or("unknown error")
            )
        });
        self.report.configuration = report;

        match failure {
            Some(message) => {
                self.halt(Phase::Configure, message, None, result)?;
                Ok(false)
            }
            None => {
                self.record(Phase::Configure, StepStatus::Success, result)?;
                Ok(true)
            }
        }
    }

    /// A halt before configuration leaves every file a previous run created
    /// in place, so ownership of all of them carries over.
    fn keep_previous_artifacts(&mut self) {
        if self.configured {
            return;
        }
        if let Some(ref previous) = self.previous {
            debug!(
                "configuration not reached; keeping {} earlier artifact(s)",
                previous.artifacts.len()
            );
            self.state.artifacts.clone_from(&previous.artifacts);
        }
    }

    /// Packages an earlier run installed come back as skipped on a re-run.
    /// They stay recorded as installed so rollback can still remove them.
    fn carry_forward_packages(&mut self) {
        let Some(ref previous) = self.previous else {
            return;
        };
        for category in Category::ALL {
            let earlier = &previous.dependencies.category(category).installed;
            let ledger = self.state.dependencies.category_mut(category);
            let (owned, skipped): (Vec<_>, Vec<_>) = std::mem::take(&mut ledger.skipped)
                .into_iter()
                .partition(|p| earlier.contains(p));
            for package in &owned {
                debug!("keeping ownership of {category} package {package}");
            }
            ledger.skipped = skipped;
            ledger.installed.extend(owned);
        }
    }

    /// Files a previous run created and this run left alone stay owned by
    /// onboard, as long as they are unchanged.
    fn carry_forward(&mut self, config: &ConfigReport) {
        let Some(ref previous) = self.previous else {
            return;
        };
        for item in config
            .items
            .iter()
            .filter(|i| i.status == ConfigStatus::Skipped)
        {
            let earlier = previous
                .artifacts
                .iter()
                .find(|a| a.kind == item.kind && a.path == item.path);
            if let Some(artifact) = earlier {
                if matches!(check_artifact(artifact), Ok(DriftStatus::Intact)) {
                    debug!("keeping ownership of {}", artifact.path.display());
                    self.state.artifacts.push(artifact.clone());
                }
            }
        }
    }

    /// A critical check failure halts the run.
    fn verify(&mut self) -> Result<bool, CoreError> {
        let engine =
            VerificationEngine::new(self.engine.settings.verify_options(), self.engine.cancel.clone());
        let report = engine.run(
            &self.state.manifest.verification.checks,
            &VerifyFilter::default(),
            self.engine.project_dir(),
        )?;
        self.state.push_verification(report.to_summary());
        let summary = serde_json::to_value(report.to_summary())?;
        let critical = report.has_critical_failures;
        let status = if report.success {
            StepStatus::Success
        } else {
            StepStatus::Partial
        };
        let failed: Vec<String> = report
            .checks
            .iter()
            .filter(|c| !c.success && c.priority == Priority::Critical)
            .map(|c| c.name.clone())
            .collect();
        self.report.verification = Some(report);

        if critical {
            self.halt(
                Phase::Verify,
                format!("critical checks failed: {}", failed.join(", ")),
                None,
                summary,
            )?;
            return Ok(false);
        }
        self.record(Phase::Verify, status, summary)?;
        Ok(true)
    }

    fn document(&mut self) -> Result<(), CoreError> {
        if !self.state.manifest.documentation.enabled {
            return Ok(());
        }
        let Some(generator) = self.engine.documentation.clone() else {
            debug!("documentation enabled but no generator configured");
            return Ok(());
        };

        let output_dir = docs::output_dir(self.engine.project_dir(), &self.state);
        let written = generator
            .generate(&self.state, &output_dir)
            .and_then(|paths| record_documents(&paths));

        match written {
            Ok(artifacts) => {
                let files: Vec<PathBuf> = artifacts.iter().map(|a| a.path.clone()).collect();
                info!("wrote {} documentation file(s)", files.len());
                self.state.artifacts.extend(artifacts);
                self.report.documentation.clone_from(&files);
                self.record(
                    Phase::Document,
                    StepStatus::Success,
                    serde_json::json!({ "files": files }),
                )
            }
            Err(e) => self.halt(Phase::Document, e.to_string(), None, serde_json::Value::Null),
        }
    }
}

fn record_documents(paths: &[PathBuf]) -> Result<Vec<Artifact>, CoreError> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)?;
            Ok(Artifact {
                kind: ArtifactKind::Documentation,
                path: path.clone(),
                checksum: Checksum::of(&bytes),
            })
        })
        .collect()
}
