use super::{json_pretty, Context, EXIT_FAILURE, EXIT_SUCCESS};
use onboard_core::{diff_artifacts, DriftStatus, Settings, StateLock};
use onboard_remote::{GhCliSource, ManifestSource};
use onboard_runtime::{EnvironmentProbe, HostProbe};
use onboard_store::{StateLayout, StateStore};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();

    check_environment(&HostProbe::new(), &mut checks);
    check_source(&GhCliSource::new(), &mut checks);
    check_settings(&mut checks);

    let layout = StateLayout::new(ctx.project.clone());
    if layout.root().exists() {
        check_state(&layout, &mut checks);
        check_lock(&layout, &mut checks);
    } else {
        checks.push(Check::info(
            "state",
            "Project not initialized (state is created by `onboard init`)",
        ));
    }

    print_results(&checks, ctx.json)
}

fn check_environment(probe: &dyn EnvironmentProbe, checks: &mut Vec<Check>) {
    let profile = match probe.detect() {
        Ok(profile) => profile,
        Err(e) => {
            checks.push(Check::fail(
                "environment",
                &format!("Environment detection failed: {e}"),
            ));
            return;
        }
    };

    let shell = profile.shell.as_deref().unwrap_or("unknown shell");
    checks.push(Check::info(
        "environment",
        &format!("Host: {}, {shell}", profile.os_label()),
    ));

    if profile.package_managers.is_empty() {
        checks.push(Check::warn(
            "package_managers",
            "No supported package manager found on PATH",
        ));
    } else {
        checks.push(Check::pass(
            "package_managers",
            &format!("Package managers: {}", profile.package_managers.join(", ")),
        ));
    }

    if !profile.tool_versions.is_empty() {
        let tools: Vec<String> = profile
            .tool_versions
            .iter()
            .map(|(tool, version)| format!("{tool} {version}"))
            .collect();
        checks.push(Check::info(
            "tools",
            &format!("Tools: {}", tools.join(", ")),
        ));
    }
}

fn check_source(source: &dyn ManifestSource, checks: &mut Vec<Check>) {
    match source.ensure_available() {
        Ok(()) => checks.push(Check::pass(
            "manifest_source",
            &format!("Manifest source '{}' is available", source.name()),
        )),
        // init --manifest still works without it.
        Err(e) => checks.push(Check::warn("manifest_source", &e.to_string())),
    }
}

fn check_settings(checks: &mut Vec<Check>) {
    let location = Settings::default_path()
        .map_or_else(|| "defaults".to_owned(), |p| p.display().to_string());
    match Settings::load_default() {
        Ok(settings) => {
            let troubleshooter = if settings.troubleshooter.is_some() {
                "troubleshooter configured"
            } else {
                "no troubleshooter"
            };
            checks.push(Check::pass(
                "settings",
                &format!("Settings OK ({location}, {troubleshooter})"),
            ));
        }
        Err(e) => checks.push(Check::fail("settings", &e.to_string())),
    }
}

fn check_state(layout: &StateLayout, checks: &mut Vec<Check>) {
    let store = StateStore::new(layout.clone());
    match store.load() {
        Ok(Some(state)) => {
            let installed = if state.installed {
                "installed"
            } else {
                "not fully installed"
            };
            checks.push(Check::pass(
                "state",
                &format!(
                    "State for '{}' is intact ({installed}, {} steps)",
                    state.manifest.name,
                    state.steps.len()
                ),
            ));
            match diff_artifacts(&state) {
                Ok(report) if report.has_drift => {
                    let drifted = report
                        .artifacts
                        .iter()
                        .filter(|a| a.status != DriftStatus::Intact)
                        .count();
                    checks.push(Check::warn(
                        "artifacts",
                        &format!(
                            "{drifted} of {} generated files changed since init",
                            report.artifacts.len()
                        ),
                    ));
                }
                Ok(report) => checks.push(Check::pass(
                    "artifacts",
                    &format!("{} generated files unchanged", report.artifacts.len()),
                )),
                Err(e) => checks.push(Check::warn(
                    "artifacts",
                    &format!("Cannot check generated files: {e}"),
                )),
            }
        }
        Ok(None) => checks.push(Check::info("state", "No installation recorded yet")),
        Err(e) => checks.push(Check::fail("state", &e.to_string())),
    }
}

fn check_lock(layout: &StateLayout, checks: &mut Vec<Check>) {
    match StateLock::try_acquire(&layout.lock_file()) {
        Ok(Some(_)) => checks.push(Check::pass("state_lock", "State lock is free")),
        Ok(None) => checks.push(Check::warn(
            "state_lock",
            "State lock is held by another onboard process",
        )),
        Err(e) => checks.push(Check::fail(
            "state_lock",
            &format!("Cannot check state lock: {e}"),
        )),
    }
}

fn print_results(checks: &[Check], json_output: bool) -> Result<u8, String> {
    let healthy = checks.iter().all(|c| c.status != "fail");
    if json_output {
        let json = serde_json::json!({
            "healthy": healthy,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("onboard doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if healthy {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if healthy { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onboard_remote::MockSource;
    use onboard_runtime::MockProbe;

    #[test]
    fn missing_source_tool_is_a_warning() {
        let mut checks = Vec::new();
        check_source(&GhCliSource::new().with_program("onboard-no-such-gh"), &mut checks);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, "warn");
    }

    #[test]
    fn available_source_passes() {
        let mut checks = Vec::new();
        check_source(&MockSource::new(), &mut checks);
        assert_eq!(checks[0].status, "pass");
    }

    #[test]
    fn probe_without_managers_warns() {
        let mut checks = Vec::new();
        check_environment(&MockProbe::new(Vec::new()), &mut checks);
        assert!(checks
            .iter()
            .any(|c| c.name == "package_managers" && c.status == "warn"));
    }

    #[test]
    fn corrupt_state_fails() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        std::fs::write(layout.state_file(), "{ not json").unwrap();

        let mut checks = Vec::new();
        check_state(&layout, &mut checks);
        assert_eq!(checks[0].status, "fail");
        check_lock(&layout, &mut checks);
        assert_eq!(checks[1].status, "pass");
    }
}
