mod cmd_cite;
mod cmd_config;
mod cmd_decay;
mod cmd_health;
mod cmd_watch;
#[cfg(feature = "tui")]
mod tui;

use std::path::Path;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "recall",
    version,
    about = "Lesson citation tracking and event-log dashboard for coding agents"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a session and log its starting lesson counts
    SessionStart {
        /// Session identifier
        session: String,
    },
    /// Credit a lesson citation (once per session)
    Cite {
        /// Lesson identifier (e.g. L001)
        lesson: String,
        /// Session identifier
        #[arg(long)]
        session: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Release a session's citation state and prune idle sessions
    SessionEnd {
        /// Session identifier
        session: String,
    },
    /// Run the decay/promotion scan if it is due
    Decay {
        /// Scan even if the minimum interval has not elapsed
        #[arg(long)]
        now: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarize sessions, lessons and citation rate from the event log
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Live dashboard over the event log
    Watch {
        /// Print new events as plain lines instead of the interactive UI
        #[arg(long)]
        plain: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        cmd: cmd_config::ConfigCmd,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    let (config, paths) = recall_store::resolve(&repo_root)?;

    let interactive = matches!(cli.cmd, Command::Watch { plain: false }) && cfg!(feature = "tui");
    init_logging(interactive.then_some(paths.monitor_log.as_path()));

    match cli.cmd {
        Command::SessionStart { session } => cmd_cite::start(&config, &paths, &session),
        Command::Cite {
            lesson,
            session,
            json,
        } => cmd_cite::cite(&config, &paths, &session, &lesson, json),
        Command::SessionEnd { session } => cmd_cite::end(&config, &paths, &session),
        Command::Decay { now, json } => cmd_decay::execute(&config, &paths, now, json),
        Command::Health { json } => cmd_health::execute(&config, &paths, json),
        Command::Watch { plain } => cmd_watch::execute(&config, &paths, plain),
        Command::Config { cmd } => cmd_config::run(cmd, &paths),
    }
}

/// Log to stderr, or to `file` when the terminal belongs to the dashboard.
/// `RECALL_LOG` takes an `EnvFilter` directive; the default is `warn`.
fn init_logging(file: Option<&Path>) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("RECALL_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    let log_file = file.and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match (file, log_file) {
        (Some(_), Some(f)) => {
            let _ = builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(f))
                .try_init();
        }
        (Some(_), None) => {
            let _ = builder.with_writer(std::io::sink).try_init();
        }
        (None, _) => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
