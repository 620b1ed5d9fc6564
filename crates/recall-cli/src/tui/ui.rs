use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{BarChart, Block, Borders, List, ListItem, Paragraph, Sparkline, Tabs};
use ratatui::Frame;

use recall_core::ts::format_rfc3339;
use recall_core::Level;
use recall_monitor::FeedEntry;

use super::app::{App, Tab};
use crate::cmd_watch::feed_line;

/// Render the full TUI frame.
pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // tabs
            Constraint::Min(5),    // main area
            Constraint::Length(1), // status bar
        ])
        .split(f.area());

    render_tabs(f, app, chunks[0]);
    match app.tab {
        Tab::Live => render_live(f, app, chunks[1]),
        Tab::Health => render_health(f, app, chunks[1]),
        Tab::State => render_state(f, app, chunks[1]),
        Tab::Session => render_session(f, app, chunks[1]),
        Tab::Charts => render_charts(f, app, chunks[1]),
    }
    render_status_bar(f, app, chunks[2]);
}

fn render_tabs(f: &mut Frame, app: &App, area: Rect) {
    let titles: Vec<String> = Tab::ALL
        .iter()
        .enumerate()
        .map(|(i, t)| format!("F{} {}", i + 1, t.title()))
        .collect();
    let tabs = Tabs::new(titles)
        .select(app.tab.index())
        .block(Block::default().borders(Borders::ALL).title(" recall "))
        .style(Style::default().fg(Color::DarkGray))
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    f.render_widget(tabs, area);
}

fn block(title: String) -> Block<'static> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
}

fn feed_style(entry: &FeedEntry) -> Style {
    match entry {
        FeedEntry::Reset(_) => Style::default().fg(Color::Magenta),
        FeedEntry::Record(r) => match r.level {
            Level::Error => Style::default().fg(Color::Red),
            Level::Warn => Style::default().fg(Color::Yellow),
            Level::Debug | Level::Trace => Style::default().fg(Color::DarkGray),
            Level::Info | Level::Unknown => Style::default(),
        },
    }
}

fn render_live(f: &mut Frame, app: &App, area: Rect) {
    let feed = app.view.live_feed(usize::MAX);
    let title = format!(" Live Activity ({}) ", feed.len());
    let max_width = area.width.saturating_sub(2) as usize;

    // Newest first.
    let items: Vec<ListItem> = feed
        .iter()
        .rev()
        .skip(app.feed_scroll)
        .map(|entry| {
            let line = truncate_str(&feed_line(entry), max_width);
            ListItem::new(Line::from(Span::styled(line, feed_style(entry))))
        })
        .collect();

    f.render_widget(List::new(items).block(block(title)), area);
}

fn render_health(f: &mut Frame, app: &App, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let h = app.view.health_summary();
    let source = if h.lessons_from_census {
        "from stores"
    } else {
        "declared at session start"
    };
    let mut lines = vec![
        Line::from(format!(" Sessions     {} ({} open)", h.sessions, h.open_sessions)),
        Line::from(format!(" Lessons      {} ({source})", h.lessons.total)),
        Line::from(Span::styled(
            format!("   active     {}", h.lessons.active),
            Style::default().fg(Color::Green),
        )),
        Line::from(Span::styled(
            format!("   decayed    {}", h.lessons.decayed),
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(Span::styled(
            format!("   promoted   {}", h.lessons.promoted),
            Style::default().fg(Color::Yellow),
        )),
        Line::from(format!(" Citations    {}", h.citations)),
        Line::from(format!(" Rate         {:.2}", h.citation_rate)),
        Line::from(format!(
            " Rate ({}m)   {:.2}",
            h.window_minutes, h.windowed_citation_rate
        )),
        Line::from(format!(
            " Records      {} ({} malformed)",
            h.records, h.malformed
        )),
    ];
    if let Some(d) = &h.last_decay {
        lines.push(Line::from(format!(
            " Last decay   {} ({} decayed, {} promoted)",
            format_rfc3339(d.at),
            d.decayed,
            d.promoted
        )));
    }
    f.render_widget(Paragraph::new(lines).block(block(" Health ".into())), cols[0]);

    let projects = app.view.projects();
    let items: Vec<ListItem> = projects
        .iter()
        .map(|(name, p)| {
            ListItem::new(Line::from(format!(
                " {name:<20} sess {:>3}  cites {:>4}  rate {:.2}",
                p.sessions,
                p.citations,
                p.citation_rate()
            )))
        })
        .collect();
    let title = format!(" Projects ({}) ", projects.len());
    f.render_widget(List::new(items).block(block(title)), cols[1]);
}

fn render_state(f: &mut Frame, app: &App, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(12), Constraint::Min(3)])
        .split(area);

    let s = app.view.tail_state();
    let mut lines = vec![
        Line::from(format!(" Log          {}", app.log_path.display())),
        Line::from(format!(" Offset       {}", s.offset)),
        Line::from(format!(" Bytes read   {}", s.tail.bytes_read)),
        Line::from(format!(" Records      {}", s.totals.records)),
        Line::from(format!(" Malformed    {}", s.tail.malformed)),
        Line::from(format!(" Unknown      {}", s.totals.unknown_kinds)),
        Line::from(format!(" Error events {}", s.totals.error_events)),
        Line::from(format!(" Decay runs   {}", s.totals.decay_runs)),
    ];
    match &s.tail_error {
        Some(fault) => lines.push(Line::from(Span::styled(
            format!(
                " Tailer       {} ({})",
                if fault.fatal { "stopped" } else { "retrying" },
                fault.message
            ),
            Style::default().fg(Color::Red),
        ))),
        None => lines.push(Line::from(Span::styled(
            " Tailer       ok",
            Style::default().fg(Color::Green),
        ))),
    }
    f.render_widget(Paragraph::new(lines).block(block(" Tailer ".into())), rows[0]);

    let items: Vec<ListItem> = s
        .resets
        .iter()
        .rev()
        .map(|m| {
            let after = m
                .after
                .map(format_rfc3339)
                .unwrap_or_else(|| "start".into());
            ListItem::new(Line::from(format!(
                " {:<9} after {after}  ({} records before, {} sessions cleared)",
                m.reason.as_str(),
                m.records_before,
                m.sessions_cleared
            )))
        })
        .collect();
    let title = format!(" Resets ({}) ", s.resets.len());
    f.render_widget(List::new(items).block(block(title)), rows[1]);
}

fn render_session(f: &mut Frame, app: &App, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let sessions = app.sessions();
    let items: Vec<ListItem> = sessions
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let status = if s.stats.is_open() { "+" } else { "-" };
            let text = format!(
                " {status} {:<20.20} {:>3} cites",
                s.stats.session_id, s.citation_count
            );
            let style = if i == app.session_index {
                Style::default().add_modifier(Modifier::BOLD).fg(Color::Cyan)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(Span::styled(text, style)))
        })
        .collect();
    let title = format!(" Sessions ({}) ", sessions.len());
    f.render_widget(List::new(items).block(block(title)), cols[0]);

    let lines = match app.selected_session() {
        None => vec![Line::from(" no sessions yet")],
        Some(s) => {
            let opt_ts = |t: Option<time::OffsetDateTime>| {
                t.map(format_rfc3339).unwrap_or_else(|| "-".into())
            };
            let mut lines = vec![
                Line::from(format!(" Session   {}", s.stats.session_id)),
                Line::from(format!(
                    " Project   {}",
                    s.stats.project.as_deref().unwrap_or("-")
                )),
                Line::from(format!(
                    " PID       {}",
                    s.stats.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
                )),
                Line::from(format!(" Started   {}", opt_ts(s.stats.started))),
                Line::from(format!(" Last seen {}", format_rfc3339(s.stats.last_seen))),
                Line::from(format!(" Ended     {}", opt_ts(s.stats.ended))),
                Line::from(format!(
                    " Lessons   {} ({} system, {} project)",
                    s.stats.total_lessons, s.stats.system_count, s.stats.project_count
                )),
                Line::from(format!(
                    " Hooks     {} runs, mean {:.1}ms",
                    s.stats.hook_runs, s.mean_hook_ms
                )),
                Line::from(format!(" Duration  {}s", s.duration_secs)),
                Line::from(format!(
                    " Citations {} ({} lessons)",
                    s.citation_count, s.distinct_lessons
                )),
            ];
            for (lesson, n) in &s.stats.citations {
                lines.push(Line::from(format!("   {lesson:<10} x{n}")));
            }
            lines
        }
    };
    f.render_widget(Paragraph::new(lines).block(block(" Detail ".into())), cols[1]);
}

fn render_charts(f: &mut Frame, app: &App, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(area);

    let hooks = app.view.hook_names();
    let items: Vec<ListItem> = hooks
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let style = if i == app.hook_index {
                Style::default().add_modifier(Modifier::BOLD).fg(Color::Cyan)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(Span::styled(format!(" {name}"), style)))
        })
        .collect();
    let title = format!(" Hooks ({}) ", hooks.len());
    f.render_widget(List::new(items).block(block(title)), cols[0]);

    let Some(chart) = app.selected_hook().and_then(|h| app.view.timing_chart(&h)) else {
        let empty = Paragraph::new(" no hook timings yet").block(block(" Timing ".into()));
        f.render_widget(empty, cols[1]);
        return;
    };

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(6), Constraint::Length(6)])
        .split(cols[1]);

    let summary = format!(
        " {} runs  mean {:.1}ms  max {:.1}ms",
        chart.count, chart.mean_ms, chart.max_ms
    );
    f.render_widget(
        Paragraph::new(summary).block(block(format!(" {} ", chart.hook))),
        rows[0],
    );

    let labels: Vec<String> = chart
        .percentiles
        .iter()
        .map(|(p, _)| format!("p{p:.0}"))
        .collect();
    let data: Vec<(&str, u64)> = labels
        .iter()
        .zip(&chart.percentiles)
        .map(|(label, (_, ms))| (label.as_str(), ms.round() as u64))
        .collect();
    let bars = BarChart::default()
        .block(block(" Percentiles (ms) ".into()))
        .data(data.as_slice())
        .bar_width(6)
        .bar_gap(2)
        .bar_style(Style::default().fg(Color::Cyan))
        .value_style(Style::default().fg(Color::Black).bg(Color::Cyan));
    f.render_widget(bars, rows[1]);

    let recent: Vec<u64> = chart.recent.iter().map(|ms| ms.round() as u64).collect();
    let spark = Sparkline::default()
        .block(block(" Recent runs ".into()))
        .data(&recent)
        .style(Style::default().fg(Color::Yellow));
    f.render_widget(spark, rows[2]);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let pause_indicator = if app.paused { " [PAUSED]" } else { "" };
    let (text, style) = if let Some(err) = &app.error {
        (
            format!(" TAIL ERROR: {err}"),
            Style::default().fg(Color::White).bg(Color::Red),
        )
    } else {
        (
            format!(
                " recall watch | {}{pause_indicator} | F1-F5/Tab:switch  j/k:scroll  Space:pause  q:quit",
                app.tab.title()
            ),
            Style::default().fg(Color::White).bg(Color::DarkGray),
        )
    };
    let bar = Paragraph::new(Line::from(Span::styled(text, style)));
    f.render_widget(bar, area);
}

fn truncate_str(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{truncated}...")
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use recall_monitor::SnapshotCell;
    use std::path::PathBuf;

    #[test]
    fn truncate_str_marks_overflow() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello...");
    }

    #[test]
    fn every_tab_renders_without_data() {
        let mut app = App::new(SnapshotCell::default(), PathBuf::from("/tmp/debug.log"));
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        for tab in Tab::ALL {
            app.tab = tab;
            terminal.draw(|f| render(f, &app)).unwrap();
        }
    }
}
