use recall_core::ts::{format_rfc3339, now_utc};
use recall_lessons::{DecayOutcome, DecayReport, LessonsManager};
use recall_store::{RecallConfig, RecallPaths};

/// `recall decay [--now] [--json]`
pub fn execute(
    config: &RecallConfig,
    paths: &RecallPaths,
    force: bool,
    json: bool,
) -> anyhow::Result<()> {
    paths.ensure_layout()?;
    let manager = LessonsManager::open(paths.clone(), config);
    let now = now_utc();

    let outcome = if force {
        DecayOutcome::Ran(manager.decay_now(now)?)
    } else {
        manager.decay_if_due(now)?
    };

    match outcome {
        DecayOutcome::Skipped { last_run, next_due } => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "ran": false,
                        "last_run": format_rfc3339(last_run),
                        "next_due": format_rfc3339(next_due),
                    })
                );
            } else {
                println!(
                    "decay not due (last run {}, next due {})",
                    format_rfc3339(last_run),
                    format_rfc3339(next_due)
                );
            }
        }
        DecayOutcome::Ran(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }
    Ok(())
}

fn print_report(report: &DecayReport) {
    println!(
        "scanned {} lessons: {} decayed, {} promoted, {} reactivated",
        report.scanned, report.decayed, report.promoted, report.reactivated
    );
    for change in &report.changes {
        println!(
            "  {:<8} {:<7} {} -> {}",
            change.lesson_id,
            change.scope.as_str(),
            change.from.as_str(),
            change.to.as_str()
        );
    }
}
