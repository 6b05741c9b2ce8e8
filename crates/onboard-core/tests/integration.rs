use onboard_core::{
    CoreError, DocumentationGenerator, DriftStatus, Engine, InitOptions, ResolveOptions,
    RollbackOptions, RollbackPhase, Settings, VerifyFilter,
};
use onboard_remote::{MockSource, MockTroubleshooter, Resolution};
use onboard_runtime::{MockPackageManager, MockProbe, PackageManager};
use onboard_schema::{Category, Priority, RepoRef};
use onboard_store::{ArtifactKind, InstallationState, Phase, StepStatus, MAX_VERIFICATION_HISTORY};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

/// Answers every request with `status` until the test process exits.
fn serve_status(status: u16) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
            }
            let _ = write!(
                stream,
                "HTTP/1.1 {status} Stub\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
        }
    });
    port
}

fn manifest(port: u16, marker_command: &str) -> String {
    format!(
        r"
name: widgets
dependencies:
  system: [git, jq]
  npm: [typescript]
environment:
  required: [API_KEY]
  optional: [DEBUG]
setup_steps:
  - name: marker
    command: {marker_command}
git:
  config:
    core.autocrlf: input
verification:
  checks:
    - type: file
      name: env-file
      path: .env
      contains: API_KEY
      priority: critical
    - type: http
      name: health
      url: http://127.0.0.1:{port}/health
      priority: high
      tags: [service]
    - type: command
      name: setup-marker
      command: test -f setup-ran
      priority: low
"
    )
}

struct ReadmeDocs;

impl DocumentationGenerator for ReadmeDocs {
    fn generate(
        &self,
        state: &InstallationState,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, CoreError> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join("SETUP.md");
        fs::write(&path, format!("# {}\n", state.manifest.name))?;
        Ok(vec![path])
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    project: PathBuf,
    cache: PathBuf,
    apt: Arc<MockPackageManager>,
    npm: Arc<MockPackageManager>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(&project).unwrap();
        Self {
            project,
            cache: dir.path().join("cache"),
            apt: Arc::new(MockPackageManager::new("apt", Category::System).with_installed(&["git"])),
            npm: Arc::new(MockPackageManager::new("npm", Category::Npm)),
            _dir: dir,
        }
    }

    fn probe(&self) -> Arc<MockProbe> {
        let managers: Vec<Arc<dyn PackageManager>> = vec![
            Arc::clone(&self.apt) as Arc<dyn PackageManager>,
            Arc::clone(&self.npm) as Arc<dyn PackageManager>,
        ];
        Arc::new(MockProbe::new(managers))
    }

    fn engine_with(&self, source: MockSource) -> Engine {
        Engine::new(
            &self.project,
            Arc::new(source),
            onboard_store::ManifestCache::new(&self.cache),
            self.probe(),
        )
        .with_home_dir(None)
        .with_env(BTreeMap::from([("API_KEY".to_owned(), "secret".to_owned())]))
        .with_documentation(Arc::new(ReadmeDocs))
    }

    fn engine(&self, manifest: &str) -> Engine {
        self.engine_with(MockSource::new().with_file("acme/widgets", ".onboard.yaml", manifest))
    }
}

fn widgets() -> RepoRef {
    RepoRef::parse("https://github.com/acme/widgets.git").unwrap()
}

#[test]
fn full_init_records_state_and_artifacts() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));

    let report = engine.init(&InitOptions::repo(widgets())).unwrap();
    assert!(report.is_success(), "unexpected failures: {report:?}");
    assert_eq!(report.summary.installed, 2);
    assert_eq!(report.summary.skipped, 1);
    assert!(fx.apt.has("jq"));
    assert!(fx.npm.has("typescript"));

    let verification = report.verification.as_ref().unwrap();
    assert_eq!(verification.summary.total, 3);
    assert_eq!(verification.summary.passed, 3);

    let env = fs::read_to_string(fx.project.join(".env")).unwrap();
    assert!(env.contains("API_KEY=secret"));
    assert!(env.contains("# DEBUG="));
    assert!(fx.project.join(".onboard/gitconfig").exists());
    assert!(fx.project.join("docs/onboarding/SETUP.md").exists());

    let state = engine.status().unwrap().unwrap();
    assert!(state.installed);
    let phases: Vec<_> = state.steps.iter().map(|s| (s.name, s.status)).collect();
    assert_eq!(
        phases,
        vec![
            (Phase::Resolve, StepStatus::Success),
            (Phase::Detect, StepStatus::Success),
            (Phase::Install, StepStatus::Success),
            (Phase::Setup, StepStatus::Success),
            (Phase::Configure, StepStatus::Success),
            (Phase::Verify, StepStatus::Success),
            (Phase::Document, StepStatus::Success),
        ]
    );
    let kinds: Vec<_> = state.artifacts.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![ArtifactKind::Env, ArtifactKind::Git, ArtifactKind::Documentation]
    );
    assert_eq!(state.dependencies.system.skipped.len(), 1);
    assert!(state.environment.is_some());
}

#[test]
fn second_init_is_served_from_cache() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let content = manifest(port, "touch setup-ran");
    fx.engine(&content).init(&InitOptions::repo(widgets())).unwrap();

    let source = MockSource::new().offline();
    let engine = fx.engine_with(source);
    let report = engine.init(&InitOptions::repo(widgets())).unwrap();
    assert_eq!(serde_json::to_value(&report.origin).unwrap()["source"], "cache");

    let no_cache = InitOptions {
        resolve: ResolveOptions { use_cache: false },
        ..InitOptions::repo(widgets())
    };
    let err = fx
        .engine_with(MockSource::new().offline())
        .init(&no_cache)
        .unwrap_err();
    assert!(matches!(err, CoreError::RemoteFetch { .. }));
}

#[test]
fn failed_resolution_leaves_previous_state_untouched() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    engine.init(&InitOptions::repo(widgets())).unwrap();
    let before = fs::read_to_string(fx.project.join(".onboard/state.json")).unwrap();

    let missing = RepoRef::parse("git@github.com:acme/unknown.git").unwrap();
    let err = engine.init(&InitOptions::repo(missing)).unwrap_err();
    assert!(matches!(err, CoreError::RemoteFetch { .. }));
    assert!(err.remedy().unwrap().contains("--manifest"));

    let after = fs::read_to_string(fx.project.join(".onboard/state.json")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn missing_helper_tool_is_reported() {
    let fx = Fixture::new();
    let engine = fx.engine_with(MockSource::new().without_tool());
    let err = engine.init(&InitOptions::repo(widgets())).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Remote(onboard_remote::RemoteError::ToolUnavailable { .. })
    ));
}

#[test]
fn setup_failure_halts_with_troubleshooting_hint() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let troubleshooter = Arc::new(MockTroubleshooter::resolving(Resolution {
        cause: "missing toolchain".to_owned(),
        fix: "install make".to_owned(),
        command: Some("sudo apt install make".to_owned()),
    }));
    let engine = fx
        .engine(&manifest(port, "'echo no make >&2; exit 2'"))
        .with_troubleshooter(Arc::clone(&troubleshooter) as Arc<dyn onboard_remote::Troubleshooter>);

    let report = engine.init(&InitOptions::repo(widgets())).unwrap();
    assert_eq!(report.failed_phase, Some(Phase::Setup));
    assert!(!report.is_success());
    assert!(report.error.as_deref().unwrap().contains("no make"));
    assert_eq!(report.resolution.as_ref().unwrap().fix, "install make");
    assert!(!fx.project.join(".env").exists(), "configure must not run");

    let requests = troubleshooter.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].context.failed_step, "setup");
    assert_eq!(requests[0].context.os, "linux (mock)");

    let state = engine.status().unwrap().unwrap();
    assert!(!state.installed);
    let failed = state.failed_step().unwrap();
    assert_eq!(failed.name, Phase::Setup);
    assert_eq!(failed.result["resolution"]["cause"], "missing toolchain");
    assert!(state.step(Phase::Configure).is_none());
}

#[test]
fn unavailable_troubleshooter_falls_back_to_manual() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx
        .engine(&manifest(port, "'exit 1'"))
        .with_troubleshooter(Arc::new(MockTroubleshooter::unavailable()));
    let report = engine.init(&InitOptions::repo(widgets())).unwrap();
    assert_eq!(report.resolution.unwrap(), Resolution::manual());
}

#[test]
fn critical_verification_failure_stops_before_documentation() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx
        .engine(&manifest(port, "touch setup-ran"))
        .with_env(BTreeMap::new());
    // An existing .env without API_KEY makes the critical file check fail.
    fs::write(fx.project.join(".env"), "OTHER=1\n").unwrap();

    let report = engine.init(&InitOptions::repo(widgets())).unwrap();
    assert_eq!(report.failed_phase, Some(Phase::Verify));
    assert!(report.verification.as_ref().unwrap().has_critical_failures);
    assert!(!fx.project.join("docs/onboarding/SETUP.md").exists());

    let state = engine.status().unwrap().unwrap();
    assert_eq!(state.step(Phase::Verify).unwrap().status, StepStatus::Failed);
    assert!(state.step(Phase::Document).is_none());
    assert!(
        state.artifacts.iter().all(|a| a.kind != ArtifactKind::Env),
        "a pre-existing .env is never recorded as created"
    );
}

#[test]
fn non_critical_failures_are_partial() {
    let fx = Fixture::new();
    let port = serve_status(503);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    let report = engine.init(&InitOptions::repo(widgets())).unwrap();
    assert!(report.failed_phase.is_none());
    assert_eq!(report.failures(), 1);

    let state = engine.status().unwrap().unwrap();
    assert_eq!(state.step(Phase::Verify).unwrap().status, StepStatus::Partial);
    assert!(state.installed);
}

#[test]
fn verify_appends_bounded_history() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    engine.init(&InitOptions::repo(widgets())).unwrap();

    for _ in 0..MAX_VERIFICATION_HISTORY + 2 {
        engine.verify(&VerifyFilter::default()).unwrap();
    }
    let state = engine.status().unwrap().unwrap();
    assert_eq!(state.verification_history.len(), MAX_VERIFICATION_HISTORY);
}

#[test]
fn verify_uses_recorded_manifest_and_filters() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    engine.init(&InitOptions::repo(widgets())).unwrap();

    let critical_only = VerifyFilter {
        min_priority: Some(Priority::Critical),
        tags: Vec::new(),
    };
    let report = engine.verify(&critical_only).unwrap();
    assert_eq!(report.summary.total, 1);
    assert_eq!(report.checks[0].name, "env-file");

    let service = VerifyFilter {
        min_priority: None,
        tags: vec!["service".to_owned()],
    };
    let report = engine.verify(&service).unwrap();
    assert_eq!(report.summary.total, 1);
    assert_eq!(report.checks[0].name, "health");

    fs::remove_file(fx.project.join("setup-ran")).unwrap();
    let report = engine.verify(&VerifyFilter::default()).unwrap();
    assert!(!report.success);
    assert!(!report.has_critical_failures);
}

#[test]
fn rollback_reverses_config_and_docs_but_keeps_packages() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    engine.init(&InitOptions::repo(widgets())).unwrap();

    let report = engine.rollback(&RollbackOptions::default()).unwrap();
    assert!(report.kept_dependencies);
    assert_eq!(report.reversed(), 3);
    assert!(!fx.project.join(".env").exists());
    assert!(!fx.project.join("docs/onboarding/SETUP.md").exists());
    assert!(fx.apt.has("jq"));

    let state = engine.status().unwrap().unwrap();
    assert!(!state.installed);
    assert!(state.artifacts.is_empty());
    assert_eq!(state.step(Phase::Configure).unwrap().status, StepStatus::RolledBack);
    assert_eq!(state.step(Phase::Document).unwrap().status, StepStatus::RolledBack);
    assert_eq!(state.step(Phase::Install).unwrap().status, StepStatus::Success);

    let again = engine
        .rollback(&RollbackOptions {
            phases: vec![RollbackPhase::Configuration, RollbackPhase::Documentation],
            ..RollbackOptions::default()
        })
        .unwrap();
    assert!(again.nothing_to_do());
}

#[test]
fn dependency_rollback_requires_unsafe() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    engine.init(&InitOptions::repo(widgets())).unwrap();

    let deps = RollbackOptions {
        phases: vec![RollbackPhase::Dependencies],
        ..RollbackOptions::default()
    };
    let err = engine.rollback(&deps).unwrap_err();
    assert!(matches!(err, CoreError::RollbackSafety(_)));
    assert!(err.remedy().unwrap().contains("--unsafe"));

    let report = engine
        .rollback(&RollbackOptions {
            allow_unsafe: true,
            ..deps.clone()
        })
        .unwrap();
    assert_eq!(report.reversed(), 2);
    assert!(!fx.apt.has("jq"));
    assert!(fx.apt.has("git"), "pre-existing packages are never removed");
    assert!(!fx.npm.has("typescript"));

    let state = engine.status().unwrap().unwrap();
    assert_eq!(state.step(Phase::Install).unwrap().status, StepStatus::RolledBack);

    let again = engine
        .rollback(&RollbackOptions {
            allow_unsafe: true,
            ..deps
        })
        .unwrap();
    assert!(again.nothing_to_do());
}

#[test]
fn rollback_dry_run_and_drift() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    engine.init(&InitOptions::repo(widgets())).unwrap();
    fs::write(fx.project.join(".env"), "API_KEY=edited\n").unwrap();

    let drift = engine.drift().unwrap();
    assert!(drift.has_drift);
    assert!(drift
        .artifacts
        .iter()
        .any(|a| a.status == DriftStatus::Modified));

    let selection = RollbackOptions {
        phases: vec![RollbackPhase::Configuration],
        dry_run: true,
        ..RollbackOptions::default()
    };
    let preview = engine.rollback(&selection).unwrap();
    assert_eq!(preview.skipped(), 1);
    assert_eq!(preview.reversed(), 1);
    assert!(fx.project.join(".onboard/gitconfig").exists());

    let real = engine
        .rollback(&RollbackOptions {
            dry_run: false,
            ..selection
        })
        .unwrap();
    assert_eq!(real.skipped(), 1);
    assert!(fx.project.join(".env").exists());
    assert!(!fx.project.join(".onboard/gitconfig").exists());
}

#[test]
fn reinit_keeps_ownership_of_unchanged_files() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    engine.init(&InitOptions::repo(widgets())).unwrap();
    engine.init(&InitOptions::repo(widgets())).unwrap();

    let state = engine.status().unwrap().unwrap();
    assert!(state
        .artifacts
        .iter()
        .any(|a| a.kind == ArtifactKind::Env));
    assert_eq!(
        state.steps.iter().filter(|s| s.name == Phase::Resolve).count(),
        1,
        "a new run replaces the whole state"
    );
}

#[test]
fn reinit_keeps_packages_installed_by_the_first_run() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    engine.init(&InitOptions::repo(widgets())).unwrap();

    let second = engine.init(&InitOptions::repo(widgets())).unwrap();
    assert_eq!(second.summary.installed, 0, "nothing new to install");

    let state = engine.status().unwrap().unwrap();
    assert_eq!(state.dependencies.system.installed, ["jq"]);
    assert_eq!(state.dependencies.system.skipped, ["git"]);
    assert_eq!(state.dependencies.npm.installed, ["typescript"]);

    let report = engine
        .rollback(&RollbackOptions {
            phases: vec![RollbackPhase::Dependencies],
            allow_unsafe: true,
            ..RollbackOptions::default()
        })
        .unwrap();
    assert_eq!(report.reversed(), 2);
    assert!(!fx.apt.has("jq"));
    assert!(fx.apt.has("git"));
    assert!(!fx.npm.has("typescript"));
}

#[test]
fn reinit_halted_before_configuration_keeps_earlier_files() {
    let fx = Fixture::new();
    let port = serve_status(200);
    fx.engine(&manifest(port, "touch setup-ran"))
        .init(&InitOptions::repo(widgets()))
        .unwrap();

    let engine = fx.engine(&manifest(port, "'exit 1'"));
    let fresh = InitOptions {
        resolve: ResolveOptions { use_cache: false },
        ..InitOptions::repo(widgets())
    };
    let report = engine.init(&fresh).unwrap();
    assert_eq!(report.failed_phase, Some(Phase::Setup));

    let state = engine.status().unwrap().unwrap();
    let kinds: Vec<_> = state.artifacts.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![ArtifactKind::Env, ArtifactKind::Git, ArtifactKind::Documentation]
    );

    let report = engine
        .rollback(&RollbackOptions {
            phases: vec![RollbackPhase::Configuration],
            ..RollbackOptions::default()
        })
        .unwrap();
    assert_eq!(report.reversed(), 2);
    assert!(!fx.project.join(".env").exists());
}

#[test]
fn configuration_failure_records_files_written_before_it() {
    let fx = Fixture::new();
    let port = serve_status(200);
    // A regular file where the home directory should be: the SSH config
    // cannot be written after `.env` already was.
    let home = fx.project.join("not-a-home");
    fs::write(&home, "").unwrap();
    let engine = fx
        .engine(&manifest(port, "touch setup-ran"))
        .with_home_dir(Some(home));
    let ssh = RepoRef::parse("git@github.com:acme/widgets.git").unwrap();

    let report = engine.init(&InitOptions::repo(ssh)).unwrap();
    assert_eq!(report.failed_phase, Some(Phase::Configure));
    assert!(report.error.as_deref().unwrap().contains("ssh"));
    assert!(fx.project.join(".env").exists());

    let state = engine.status().unwrap().unwrap();
    assert!(state.artifacts.iter().any(|a| a.kind == ArtifactKind::Env));
    assert_eq!(state.failed_step().unwrap().name, Phase::Configure);

    let report = engine
        .rollback(&RollbackOptions {
            phases: vec![RollbackPhase::Configuration],
            ..RollbackOptions::default()
        })
        .unwrap();
    assert!(!report.nothing_to_do());
    assert!(!fx.project.join(".env").exists());
}

#[test]
fn corrupt_state_is_fatal_for_verify_but_not_for_init() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let engine = fx.engine(&manifest(port, "touch setup-ran"));
    engine.init(&InitOptions::repo(widgets())).unwrap();
    fs::write(fx.project.join(".onboard/state.json"), "{ truncated").unwrap();

    let err = engine.verify(&VerifyFilter::default()).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Store(onboard_store::StoreError::StateCorrupt { .. })
    ));
    assert!(err.remedy().is_some());

    engine.init(&InitOptions::repo(widgets())).unwrap();
    assert!(engine.status().unwrap().is_some());
}

#[test]
fn local_manifest_bypasses_remote() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let path = fx.project.join("onboard.yaml");
    fs::write(&path, manifest(port, "touch setup-ran")).unwrap();

    let source = MockSource::new().without_tool();
    let engine = fx.engine_with(source);
    let report = engine.init(&InitOptions::local(&path)).unwrap();
    assert!(report.is_success());
    assert_eq!(
        serde_json::to_value(&report.origin).unwrap()["source"],
        "local"
    );
}

#[test]
fn settings_drive_verification() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let settings = Settings::from_toml("verify_workers = 1\ncheck_timeout_secs = 1\n").unwrap();
    let slow = format!(
        "{}    - type: command\n      name: slow\n      command: sleep 5\n",
        manifest(port, "touch setup-ran")
    );
    let engine = fx.engine(&slow).with_settings(settings);
    let report = engine
        .init(&InitOptions {
            skip_verify: true,
            ..InitOptions::repo(widgets())
        })
        .unwrap();
    assert!(report.verification.is_none());

    let report = engine.verify(&VerifyFilter::default()).unwrap();
    let slow = report.checks.iter().find(|c| c.name == "slow").unwrap();
    assert_eq!(slow.status, onboard_core::CheckStatus::Errored);
}

#[test]
fn cancelled_init_writes_nothing() {
    let fx = Fixture::new();
    let port = serve_status(200);
    let token = onboard_core::CancelToken::new();
    token.cancel();
    let engine = fx
        .engine(&manifest(port, "touch setup-ran"))
        .with_cancel_token(token);
    assert!(matches!(
        engine.init(&InitOptions::repo(widgets())),
        Err(CoreError::Cancelled)
    ));
    assert!(engine.status().unwrap().is_none());
}
