use super::{colorize_status, core_error, json_pretty, Context, EXIT_FAILURE, EXIT_SUCCESS};
use onboard_core::{ItemOutcome, RollbackOptions, RollbackReport};

pub fn run(ctx: &Context, options: &RollbackOptions) -> Result<u8, String> {
    let engine = ctx.engine()?;
    let report = engine.rollback(options).map_err(|e| core_error(&e))?;

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(if report.failures() == 0 {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

fn print_report(report: &RollbackReport) {
    if report.nothing_to_do() {
        println!("nothing to roll back");
    }
    for phase in &report.phases {
        if phase.nothing_to_do {
            println!("{}: nothing to do", phase.phase);
            continue;
        }
        println!("{}:", phase.phase);
        for item in &phase.items {
            let (word, reason) = describe(&item.outcome);
            let reason = reason.map(|r| format!(" ({r})")).unwrap_or_default();
            println!("  {} {}{reason}", colorize_status(word), item.target);
        }
    }
    if report.kept_dependencies {
        println!("dependencies kept; pass --unsafe to uninstall them");
    }

    let verb = if report.dry_run {
        "would be reversed"
    } else {
        "reversed"
    };
    println!(
        "{} {verb}, {} skipped, {} failed",
        report.reversed(),
        report.skipped(),
        report.failures()
    );
    if report.skipped() > 0 {
        println!("hint: rerun with --force to reverse items that changed since init");
    }
}

fn describe(outcome: &ItemOutcome) -> (&'static str, Option<&str>) {
    match outcome {
        ItemOutcome::Reversed => ("reversed", None),
        ItemOutcome::WouldReverse => ("would_reverse", None),
        ItemOutcome::SkippedDrift { reason } => ("skipped_drift", Some(reason.as_str())),
        ItemOutcome::Failed { reason } => ("failed", Some(reason.as_str())),
    }
}
