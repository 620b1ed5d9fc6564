use std::path::PathBuf;

use recall_monitor::{DashboardViewModel, SessionSummary, SnapshotCell};

/// Which tab is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Live,
    Health,
    State,
    Session,
    Charts,
}

impl Tab {
    pub const ALL: [Tab; 5] = [Tab::Live, Tab::Health, Tab::State, Tab::Session, Tab::Charts];

    pub fn title(self) -> &'static str {
        match self {
            Tab::Live => "Live Activity",
            Tab::Health => "Health",
            Tab::State => "State",
            Tab::Session => "Session",
            Tab::Charts => "Charts",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Tab::Live => 0,
            Tab::Health => 1,
            Tab::State => 2,
            Tab::Session => 3,
            Tab::Charts => 4,
        }
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

/// Application state for the dashboard.
pub struct App {
    pub log_path: PathBuf,
    pub should_quit: bool,
    pub tab: Tab,
    pub paused: bool,

    // Data
    pub view: DashboardViewModel,
    pub error: Option<String>,

    // Scroll positions
    pub feed_scroll: usize,
    pub session_index: usize,
    pub hook_index: usize,

    cell: SnapshotCell,
}

impl App {
    pub fn new(cell: SnapshotCell, log_path: PathBuf) -> Self {
        Self {
            log_path,
            should_quit: false,
            tab: Tab::Live,
            paused: false,
            view: cell.view(),
            error: None,
            feed_scroll: 0,
            session_index: 0,
            hook_index: 0,
            cell,
        }
    }

    /// Pick up the latest published snapshot (unless paused).
    pub fn refresh_data(&mut self) {
        if self.paused {
            return;
        }
        self.view = self.cell.view();
        self.error = self
            .view
            .snapshot()
            .tail_error
            .as_ref()
            .map(|f| f.message.clone());
        self.clamp_scroll();
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.view.sessions()
    }

    pub fn selected_session(&self) -> Option<SessionSummary> {
        self.sessions().into_iter().nth(self.session_index)
    }

    pub fn selected_hook(&self) -> Option<String> {
        self.view.hook_names().into_iter().nth(self.hook_index)
    }

    /// Handle a key press.
    pub fn handle_key(&mut self, key: crossterm::event::KeyEvent) {
        use crossterm::event::KeyCode;

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab => self.tab = self.tab.next(),
            KeyCode::BackTab => self.tab = self.tab.prev(),
            KeyCode::F(n @ 1..=5) => self.tab = Tab::ALL[usize::from(n) - 1],
            KeyCode::Char(c @ '1'..='5') => self.tab = Tab::ALL[c as usize - '1' as usize],
            KeyCode::Char(' ') => self.paused = !self.paused,
            KeyCode::Char('j') | KeyCode::Down => self.scroll_down(),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_up(),
            KeyCode::Home => *self.active_scroll_mut() = 0,
            _ => {}
        }
    }

    fn scroll_down(&mut self) {
        let max = self.active_len();
        let scroll = self.active_scroll_mut();
        if *scroll + 1 < max {
            *scroll += 1;
        }
    }

    fn scroll_up(&mut self) {
        let scroll = self.active_scroll_mut();
        *scroll = scroll.saturating_sub(1);
    }

    fn active_len(&self) -> usize {
        match self.tab {
            Tab::Live => self.view.snapshot().feed.len(),
            Tab::Session => self.view.snapshot().sessions.len(),
            Tab::Charts => self.view.snapshot().hooks.len(),
            Tab::Health | Tab::State => 0,
        }
    }

    fn active_scroll_mut(&mut self) -> &mut usize {
        match self.tab {
            Tab::Session => &mut self.session_index,
            Tab::Charts => &mut self.hook_index,
            Tab::Live | Tab::Health | Tab::State => &mut self.feed_scroll,
        }
    }

    /// Keep selections valid after sessions were cleared by a log reset.
    fn clamp_scroll(&mut self) {
        let snap = self.view.snapshot();
        self.session_index = self.session_index.min(snap.sessions.len().saturating_sub(1));
        self.hook_index = self.hook_index.min(snap.hooks.len().saturating_sub(1));
        self.feed_scroll = self.feed_scroll.min(snap.feed.len().saturating_sub(1));
    }
}
