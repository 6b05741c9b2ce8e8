use crate::concurrency::CancelToken;
use crate::CoreError;
use onboard_schema::SetupStep;
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use tracing::{info, warn};

/// Lines of stderr kept from a failed step.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupStatus {
    Succeeded,
    Failed,
    /// Dry-run only: the step would run.
    Planned,
    /// Not reached because an earlier step failed.
    NotRun,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStepResult {
    pub name: String,
    pub command: String,
    pub status: SetupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SetupReport {
    pub steps: Vec<SetupStepResult>,
}

impl SetupReport {
    pub fn failed_step(&self) -> Option<&SetupStepResult> {
        self.steps.iter().find(|s| s.status == SetupStatus::Failed)
    }
}

/// Run manifest setup steps in order through `sh -c` inside `project_dir`.
/// The first failing step stops the sequence; later steps are reported as
/// not run.
pub fn run_setup_steps(
    steps: &[SetupStep],
    project_dir: &Path,
    cancel: &CancelToken,
) -> Result<SetupReport, CoreError> {
    let mut report = SetupReport::default();
    let mut halted = false;

    for step in steps {
        if halted {
            report.steps.push(result(step, SetupStatus::NotRun, None, None));
            continue;
        }
        cancel.check()?;

        info!("setup step '{}': {}", step.name, step.command);
        let outcome = Command::new("sh")
            .arg("-c")
            .arg(&step.command)
            .current_dir(project_dir)
            .output();

        let entry = match outcome {
            Ok(output) if output.status.success() => {
                result(step, SetupStatus::Succeeded, output.status.code(), None)
            }
            Ok(output) => {
                halted = true;
                let stderr = tail(&String::from_utf8_lossy(&output.stderr));
                warn!("setup step '{}' failed with {}", step.name, output.status);
                result(step, SetupStatus::Failed, output.status.code(), Some(stderr))
            }
            Err(e) => {
                halted = true;
                warn!("setup step '{}' could not start: {e}", step.name);
                result(step, SetupStatus::Failed, None, Some(e.to_string()))
            }
        };
        report.steps.push(entry);
    }

    Ok(report)
}

/// Dry-run: list the commands that would run.
pub fn preview_setup_steps(steps: &[SetupStep]) -> SetupReport {
    SetupReport {
        steps: steps
            .iter()
            .map(|step| result(step, SetupStatus::Planned, None, None))
            .collect(),
    }
}

fn result(
    step: &SetupStep,
    status: SetupStatus,
    exit_code: Option<i32>,
    stderr: Option<String>,
) -> SetupStepResult {
    SetupStepResult {
        name: step.name.clone(),
        command: step.command.clone(),
        status,
        exit_code,
        stderr,
    }
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
