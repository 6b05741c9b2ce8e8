use super::{
    colorize_status, core_error, json_pretty, mark, spin_fail, spin_ok, status_word, Context,
    EXIT_FAILURE, EXIT_SUCCESS,
};
use onboard_core::{InitOptions, InitReport, ManifestInput, ManifestOrigin, ResolveOptions};
use onboard_schema::RepoRef;
use std::path::Path;

pub fn run(
    ctx: &Context,
    repo: Option<&str>,
    manifest: Option<&Path>,
    resolve: ResolveOptions,
    dry_run: bool,
    skip_verify: bool,
) -> Result<u8, String> {
    let repo = repo
        .map(RepoRef::parse)
        .transpose()
        .map_err(|e| e.to_string())?;
    let input = match (manifest, repo) {
        (Some(path), repo) => ManifestInput::Local {
            path: path.to_path_buf(),
            repo,
        },
        (None, Some(repo)) => ManifestInput::Repo(repo),
        (None, None) => {
            return Err("a repository reference or --manifest <path> is required".to_owned())
        }
    };
    let options = InitOptions {
        input,
        resolve,
        dry_run,
        skip_verify,
    };

    let engine = ctx.engine()?;
    let pb = ctx.spinner(if dry_run {
        "planning onboarding..."
    } else {
        "onboarding..."
    });
    let report = match engine.init(&options) {
        Ok(report) => report,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "onboarding failed");
            }
            return Err(core_error(&e));
        }
    };
    if let Some(ref pb) = pb {
        let msg = format!("{} {}", report.project, outcome_word(&report));
        if report.is_success() {
            spin_ok(pb, &msg);
        } else {
            spin_fail(pb, &msg);
        }
    }

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

fn outcome_word(report: &InitReport) -> &'static str {
    match (report.dry_run, report.is_success()) {
        (true, _) => "planned",
        (false, true) => "onboarded",
        (false, false) if report.failed_phase.is_some() => "halted",
        (false, false) => "onboarded with failures",
    }
}

fn origin_label(origin: &ManifestOrigin) -> String {
    match origin {
        ManifestOrigin::Cache => "cache".to_owned(),
        ManifestOrigin::Remote { path } => format!("remote {path}"),
        ManifestOrigin::StaleCache { age_secs } => {
            format!("stale cache, {}h old", age_secs / 3600)
        }
        ManifestOrigin::Local { path } => path.display().to_string(),
    }
}

fn print_report(report: &InitReport) {
    let suffix = if report.dry_run { " (dry run)" } else { "" };
    println!(
        "project: {}{suffix}\nmanifest: {}",
        report.project,
        origin_label(&report.origin)
    );
    if let Some(ref env) = report.environment {
        println!(
            "environment: {} [{}]",
            env.os_label(),
            env.package_managers.join(", ")
        );
    }

    let s = &report.summary;
    println!(
        "dependencies: {} installed, {} skipped, {} failed",
        s.installed, s.skipped, s.failed
    );
    for (category, ledger) in report.dependencies.iter() {
        for failed in &ledger.failed {
            println!("  ✗ {category}:{} {}", failed.package, failed.reason);
        }
    }

    for step in &report.setup.steps {
        println!(
            "setup: {} {}",
            step.name,
            colorize_status(&status_word(&step.status))
        );
    }

    for item in &report.configuration.items {
        println!(
            "config: {} {} {}",
            item.kind,
            item.path.display(),
            colorize_status(&status_word(&item.status))
        );
    }

    if let Some(ref v) = report.verification {
        println!(
            "verification: {}/{} checks passed",
            v.summary.passed, v.summary.total
        );
        for check in v.checks.iter().filter(|c| !c.success) {
            println!(
                "  {} [{}] {} {}",
                mark(false),
                check.priority,
                check.name,
                check.error.as_deref().unwrap_or_default()
            );
        }
    }

    for doc in &report.documentation {
        println!("docs: {}", doc.display());
    }

    if let Some(phase) = report.failed_phase {
        println!();
        println!(
            "halted in {phase} phase: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
        if let Some(ref resolution) = report.resolution {
            println!("  cause: {}", resolution.cause);
            println!("  fix:   {}", resolution.fix);
            if let Some(ref command) = resolution.command {
                println!("  run:   {command}");
            }
        }
        if !report.dry_run {
            println!("hint: onboard rollback to undo what was done so far");
        }
    }
}
