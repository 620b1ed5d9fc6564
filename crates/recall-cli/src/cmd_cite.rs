use recall_core::ts::now_utc;
use recall_lessons::LessonsManager;
use recall_store::{RecallConfig, RecallPaths};

fn open(config: &RecallConfig, paths: &RecallPaths) -> anyhow::Result<LessonsManager> {
    paths.ensure_layout()?;
    Ok(LessonsManager::open(paths.clone(), config))
}

/// `recall session-start <session>`
pub fn start(config: &RecallConfig, paths: &RecallPaths, session: &str) -> anyhow::Result<()> {
    let mut manager = open(config, paths)?;
    manager.start_session(session, now_utc())?;
    let (system, project) = manager.stores().sizes()?;
    println!("session {session} started ({system} system, {project} project lessons)");
    Ok(())
}

/// `recall cite <lesson> --session <session>`
pub fn cite(
    config: &RecallConfig,
    paths: &RecallPaths,
    session: &str,
    lesson: &str,
    json: bool,
) -> anyhow::Result<()> {
    let mut manager = open(config, paths)?;
    let outcome = manager.cite(session, lesson, now_utc())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.newly_credited {
        println!(
            "{lesson} ({}): {} -> {} uses",
            outcome.scope.as_str(),
            outcome.uses_before,
            outcome.uses_after
        );
    } else {
        println!(
            "{lesson} ({}): already credited in this session, {} uses",
            outcome.scope.as_str(),
            outcome.count()
        );
    }
    Ok(())
}

/// `recall session-end <session>`
pub fn end(config: &RecallConfig, paths: &RecallPaths, session: &str) -> anyhow::Result<()> {
    let mut manager = open(config, paths)?;
    let now = now_utc();
    manager.end_session(session, now)?;
    let pruned = manager.citations().prune_idle(now, config.session_idle())?;
    if pruned > 0 {
        println!("session {session} ended (pruned {pruned} idle session(s))");
    } else {
        println!("session {session} ended");
    }
    Ok(())
}
