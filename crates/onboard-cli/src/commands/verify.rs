use super::{
    colorize_status, core_error, json_pretty, spin_fail, spin_ok, status_word, Context,
    EXIT_FAILURE, EXIT_SUCCESS,
};
use onboard_core::{VerificationReport, VerifyFilter};

pub fn run(ctx: &Context, filter: &VerifyFilter) -> Result<u8, String> {
    let engine = ctx.engine()?;
    let pb = ctx.spinner("running verification checks...");
    let report = match engine.verify(filter) {
        Ok(report) => report,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "verification could not run");
            }
            return Err(core_error(&e));
        }
    };
    if let Some(ref pb) = pb {
        let msg = format!(
            "{}/{} checks passed",
            report.summary.passed, report.summary.total
        );
        if report.success {
            spin_ok(pb, &msg);
        } else {
            spin_fail(pb, &msg);
        }
    }

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report, ctx.verbose);
    }
    Ok(if report.success {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

fn print_report(report: &VerificationReport, verbose: bool) {
    if report.checks.is_empty() {
        println!("no checks matched");
        return;
    }
    for check in report.checks.iter().filter(|c| verbose || !c.success) {
        let timing = if verbose {
            format!(" ({} ms)", check.duration_ms)
        } else {
            String::new()
        };
        println!(
            "  {} {} [{}, {}]{timing}",
            colorize_status(&status_word(&check.status)),
            check.name,
            check.check_type,
            check.priority
        );
        if let Some(ref error) = check.error {
            println!("      {error}");
        }
    }
    if report.has_critical_failures {
        println!("critical checks failed");
    } else if report.success {
        println!("all {} checks passed", report.summary.total);
    } else {
        println!(
            "{} of {} checks failed",
            report.summary.failed, report.summary.total
        );
    }
}
