use super::{colorize_status, core_error, json_pretty, status_word, Context, EXIT_SUCCESS};
use onboard_core::{diff_artifacts, CoreError, DriftReport};
use onboard_schema::calculate_summary;
use onboard_store::InstallationState;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let engine = ctx.engine()?;
    let state = engine
        .status()
        .map_err(|e| core_error(&e))?
        .ok_or_else(|| {
            core_error(&CoreError::NotInitialized(
                engine.project_dir().display().to_string(),
            ))
        })?;
    let drift = diff_artifacts(&state).map_err(|e| core_error(&e))?;

    if ctx.json {
        let payload = serde_json::json!({
            "state": state,
            "drift": drift,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_state(&state, &drift);
    }
    Ok(EXIT_SUCCESS)
}

fn print_state(state: &InstallationState, drift: &DriftReport) {
    println!("project:    {}", state.manifest.name);
    if let Some(ref repo) = state.repository {
        println!("repository: {repo}");
    }
    println!(
        "installed:  {}",
        if state.installed { "yes" } else { "no" }
    );
    println!("updated:    {}", state.timestamp);
    if let Some(ref env) = state.environment {
        println!("host:       {}", env.os_label());
    }

    println!();
    println!("steps:");
    for step in &state.steps {
        println!(
            "  {:<10} {}  {}",
            step.name.to_string(),
            colorize_status(&step.status.to_string()),
            step.timestamp
        );
    }

    let summary = calculate_summary(&state.dependencies);
    println!();
    println!(
        "dependencies: {} installed, {} skipped, {} failed",
        summary.installed, summary.skipped, summary.failed
    );

    if !drift.artifacts.is_empty() {
        println!();
        println!("artifacts:");
        for artifact in &drift.artifacts {
            println!(
                "  {} {}",
                colorize_status(&status_word(&artifact.status)),
                artifact.path.display()
            );
        }
    }

    println!();
    match state.last_verification() {
        Some(v) => println!(
            "last verification: {}/{} passed at {}{}",
            v.summary.passed,
            v.summary.total,
            v.timestamp,
            if v.has_critical_failures {
                " (critical failures)"
            } else {
                ""
            }
        ),
        None => println!("last verification: never"),
    }
}
