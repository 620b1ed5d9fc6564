use recall_core::ts::format_rfc3339;
use recall_monitor::HealthSummary;
use recall_store::{RecallConfig, RecallPaths};

/// `recall health [--json]`
///
/// Replays the whole event log once and prints the health summary.
pub fn execute(config: &RecallConfig, paths: &RecallPaths, json: bool) -> anyhow::Result<()> {
    let mut monitor = crate::cmd_watch::monitor(config, paths);
    monitor.replay();
    let view = monitor.view();
    let health = view.health_summary();

    if json {
        let out = serde_json::json!({
            "log_path": paths.log_path,
            "health": health,
            "projects": view.projects().into_iter().collect::<std::collections::BTreeMap<_, _>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_health(paths, &health);
    let projects = view.projects();
    if !projects.is_empty() {
        println!();
        println!("Projects:");
        for (name, p) in projects {
            println!(
                "  {name:<24} sessions {:>4}  citations {:>5}  rate {:.2}",
                p.sessions,
                p.citations,
                p.citation_rate()
            );
        }
    }
    Ok(())
}

fn print_health(paths: &RecallPaths, h: &HealthSummary) {
    println!("Event log: {}", paths.log_path.display());
    if let Some(fault) = &h.tail_error {
        println!("  TAIL ERROR: {}", fault.message);
    }
    println!("Sessions:  {} ({} open)", h.sessions, h.open_sessions);
    let source = if h.lessons_from_census { "stores" } else { "declared" };
    println!(
        "Lessons:   {} total, {} active, {} decayed, {} promoted ({source})",
        h.lessons.total, h.lessons.active, h.lessons.decayed, h.lessons.promoted
    );
    println!(
        "Citations: {} (rate {:.2}, last {}m {:.2})",
        h.citations, h.citation_rate, h.window_minutes, h.windowed_citation_rate
    );
    println!(
        "Records:   {} ({} malformed, {} resets)",
        h.records, h.malformed, h.resets
    );
    if let Some(ts) = h.last_event {
        println!("Last event: {}", format_rfc3339(ts));
    }
    if let Some(d) = &h.last_decay {
        println!(
            "Last decay: {} ({} scanned, {} decayed, {} promoted)",
            format_rfc3339(d.at),
            d.scanned,
            d.decayed,
            d.promoted
        );
    }
}
