mod app;
mod ui;

use std::path::Path;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyEventKind};
use recall_monitor::Monitor;

use app::App;

/// Run the dashboard until the user quits. The monitor replays the log
/// before the first frame and then ticks on its own thread.
pub fn run(monitor: Monitor, log_path: &Path, refresh: Duration) -> anyhow::Result<()> {
    let handle = monitor.spawn()?;

    let mut terminal = ratatui::init();
    let result = event_loop(
        &mut terminal,
        App::new(handle.cell(), log_path.to_path_buf()),
        refresh,
    );
    ratatui::restore();

    handle.stop();
    result
}

fn event_loop(
    terminal: &mut ratatui::DefaultTerminal,
    mut app: App,
    refresh: Duration,
) -> anyhow::Result<()> {
    let mut last_refresh = Instant::now();
    app.refresh_data();

    loop {
        terminal.draw(|f| ui::render(f, &app))?;

        if event::poll(Duration::from_millis(250))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    app.handle_key(key);
                }
                _ => {}
            }
        }

        if last_refresh.elapsed() >= refresh {
            app.refresh_data();
            last_refresh = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
