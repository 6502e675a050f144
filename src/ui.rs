use std::collections::{BTreeMap, HashMap};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::block::{Position, Title};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tracing::{debug, info, warn};

use crate::api::DEFAULT_QR_SIZE;
use crate::bookmark::{self, ArchiveSnapshot, Bookmark, LinkStatus, RepoStats, ScrapeResult};
use crate::cards::CardState;
use crate::clipboard::Clipboard;
use crate::config::{Config, ThemeMode, ITEMS_PER_PAGE_CHOICES};
use crate::data::{BookmarkService, RepoService, ToolService};
use crate::forms::{
    BookmarkForm, FormAction, FormField, FormKind, FormStatus, TagAutocomplete, TextField,
};
use crate::keys::KeyPress;
use crate::library::{Library, SortOrder};
use crate::modal::{CloseTrigger, EscapeOutcome, ModalStack, Surface, DEFAULT_TRIGGERS};
use crate::nav::{Dispatch, NavDelegate, Navigator, CONFIRM_WINDOW, MODAL_SCROLL_STEP};
use crate::qr::{self, QrMatrix};
use crate::storage::{self, Store};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_WARNING: Color = Color::Rgb(249, 226, 175);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const STATUS_TTL: Duration = Duration::from_secs(6);
const CARD_HEIGHT: u16 = 3;
const SETTINGS_ITEMS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    panel_focused_bg: Color,
    selected_bg: Color,
    border_idle: Color,
    border_focused: Color,
    text_primary: Color,
    text_secondary: Color,
    accent: Color,
    success: Color,
    warning: Color,
    error: Color,
}

const DARK: Palette = Palette {
    bg: COLOR_BG,
    panel_bg: COLOR_PANEL_BG,
    panel_focused_bg: COLOR_PANEL_FOCUSED_BG,
    selected_bg: COLOR_PANEL_SELECTED_BG,
    border_idle: COLOR_BORDER_IDLE,
    border_focused: COLOR_BORDER_FOCUSED,
    text_primary: COLOR_TEXT_PRIMARY,
    text_secondary: COLOR_TEXT_SECONDARY,
    accent: COLOR_ACCENT,
    success: COLOR_SUCCESS,
    warning: COLOR_WARNING,
    error: COLOR_ERROR,
};

const LIGHT: Palette = Palette {
    bg: Color::Rgb(239, 241, 245),
    panel_bg: Color::Rgb(230, 233, 239),
    panel_focused_bg: Color::Rgb(204, 208, 218),
    selected_bg: Color::Rgb(188, 192, 204),
    border_idle: Color::Rgb(204, 208, 218),
    border_focused: Color::Rgb(30, 102, 245),
    text_primary: Color::Rgb(76, 79, 105),
    text_secondary: Color::Rgb(108, 111, 133),
    accent: Color::Rgb(30, 102, 245),
    success: Color::Rgb(64, 160, 43),
    warning: Color::Rgb(223, 142, 29),
    error: Color::Rgb(210, 15, 57),
};

fn palette(theme: ThemeMode) -> Palette {
    match theme {
        ThemeMode::Dark => DARK,
        ThemeMode::Light => LIGHT,
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

const CLOSE_BUTTON: &str = "[x]";

/// Cells of the `[x]` drawn on the top border of a surface.
fn close_button_area(popup: Rect) -> Rect {
    let width = CLOSE_BUTTON.len() as u16;
    Rect {
        x: popup.right().saturating_sub(width + 1),
        y: popup.y,
        width,
        height: 1,
    }
}

fn contains(area: Rect, column: u16, row: u16) -> bool {
    column >= area.x
        && column < area.x.saturating_add(area.width)
        && row >= area.y
        && row < area.y.saturating_add(area.height)
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusKind {
    Info,
    Success,
    Error,
}

enum AsyncResponse {
    Bookmarks {
        request_id: u64,
        repo: String,
        result: Result<Vec<Bookmark>>,
    },
    Tags {
        repo: String,
        result: Result<BTreeMap<String, usize>>,
    },
    Created {
        result: Result<String>,
    },
    Updated {
        id: u64,
        result: Result<String>,
    },
    Deleted {
        results: Vec<(u64, Result<String>)>,
    },
    Favorite {
        id: u64,
        result: Result<Bookmark>,
    },
    Visited {
        id: u64,
        result: Result<()>,
    },
    Notes {
        id: u64,
        notes: String,
        result: Result<String>,
    },
    Status {
        id: u64,
        result: Result<Bookmark>,
    },
    Archive {
        id: u64,
        result: Result<Option<ArchiveSnapshot>>,
    },
    Qr {
        id: u64,
        result: Result<QrMatrix>,
    },
    Scrape {
        url: String,
        result: Result<ScrapeResult>,
    },
    Repos {
        result: Result<Vec<RepoStats>>,
    },
    RepoCreated {
        name: String,
        result: Result<String>,
    },
    RepoDeleted {
        name: String,
        result: Result<String>,
    },
}

enum ArchiveLookup {
    Loading,
    Found(ArchiveSnapshot),
    Missing,
    Failed(String),
}

enum QrView {
    Loading,
    Ready(QrMatrix),
    Failed(String),
}

/// Navigator commands queued during one dispatch and applied afterwards, so
/// the navigator and the rest of the model are never borrowed together.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    OpenDetail(Bookmark),
    OpenInTab(Bookmark),
    PasteNew,
    NewBookmark,
    Edit(Bookmark),
    ToggleFavorite(Bookmark),
    Yank(Bookmark),
    Delete(Bookmark),
    OpenQr(Bookmark),
    ToggleHelp,
    OpenSettings,
    Reload,
    ToggleTheme,
    ToggleSortMenu,
    NextPage,
    PrevPage,
}

#[derive(Debug, Default)]
struct CommandQueue(Vec<Command>);

impl NavDelegate for CommandQueue {
    fn open_detail(&mut self, bookmark: &Bookmark) {
        self.0.push(Command::OpenDetail(bookmark.clone()));
    }
    fn open_in_tab(&mut self, bookmark: &Bookmark) {
        self.0.push(Command::OpenInTab(bookmark.clone()));
    }
    fn paste_new(&mut self) {
        self.0.push(Command::PasteNew);
    }
    fn new_bookmark(&mut self) {
        self.0.push(Command::NewBookmark);
    }
    fn edit(&mut self, bookmark: &Bookmark) {
        self.0.push(Command::Edit(bookmark.clone()));
    }
    fn toggle_favorite(&mut self, bookmark: &Bookmark) {
        self.0.push(Command::ToggleFavorite(bookmark.clone()));
    }
    fn yank_url(&mut self, bookmark: &Bookmark) {
        self.0.push(Command::Yank(bookmark.clone()));
    }
    fn delete(&mut self, bookmark: &Bookmark) {
        self.0.push(Command::Delete(bookmark.clone()));
    }
    fn open_qr(&mut self, bookmark: &Bookmark) {
        self.0.push(Command::OpenQr(bookmark.clone()));
    }
    fn toggle_help(&mut self) {
        self.0.push(Command::ToggleHelp);
    }
    fn open_settings(&mut self) {
        self.0.push(Command::OpenSettings);
    }
    fn reload(&mut self) {
        self.0.push(Command::Reload);
    }
    fn toggle_theme(&mut self) {
        self.0.push(Command::ToggleTheme);
    }
    fn toggle_sort_menu(&mut self) {
        self.0.push(Command::ToggleSortMenu);
    }
    fn next_page(&mut self) {
        self.0.push(Command::NextPage);
    }
    fn prev_page(&mut self) {
        self.0.push(Command::PrevPage);
    }
}

pub struct Options {
    pub config: Config,
    pub bookmarks: Arc<dyn BookmarkService>,
    pub repos: Arc<dyn RepoService>,
    pub tools: Arc<dyn ToolService>,
    pub store: Option<Arc<Store>>,
    pub clipboard: Box<dyn Clipboard>,
    pub sort: SortOrder,
    pub status_message: String,
}

pub struct Model {
    config: Config,
    repo: String,
    theme: ThemeMode,
    compact: bool,
    vim_mode: bool,
    library: Library,
    nav: Navigator,
    modals: ModalStack,
    tags: BTreeMap<String, usize>,
    search: TextField,
    search_tags: TagAutocomplete,
    search_focused: bool,
    input_focused: bool,
    sort_menu: Option<usize>,
    form: Option<BookmarkForm>,
    notes: Option<(u64, TextField)>,
    repo_input: TextField,
    repos: Vec<RepoStats>,
    repo_cursor: usize,
    repo_confirm: Option<(String, Instant)>,
    settings_cursor: usize,
    archives: HashMap<u64, ArchiveLookup>,
    qr_codes: HashMap<u64, QrView>,
    bookmark_service: Arc<dyn BookmarkService>,
    repo_service: Arc<dyn RepoService>,
    tool_service: Arc<dyn ToolService>,
    store: Option<Arc<Store>>,
    clipboard: Box<dyn Clipboard>,
    status_message: String,
    status_kind: StatusKind,
    status_since: Instant,
    spinner: Spinner,
    in_flight: usize,
    next_request_id: u64,
    pending_list: Option<u64>,
    needs_redraw: bool,
    should_quit: bool,
    list_area: Rect,
    list_offset: usize,
    popup_area: Option<Rect>,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let config = opts.config;
        let mut library = Library::new(config.ui.items_per_page);
        library.set_sort(opts.sort);

        let mut modals = ModalStack::new();
        for surface in [Surface::Help, Surface::Settings, Surface::Repositories] {
            modals.register(surface, &DEFAULT_TRIGGERS);
        }

        let mut model = Self {
            repo: config.server.repo.clone(),
            theme: config.ui.theme,
            compact: config.ui.compact,
            vim_mode: config.keyboard.vim_mode,
            nav: Navigator::new(config.keyboard.keybinds.clone()),
            library,
            modals,
            tags: BTreeMap::new(),
            search: TextField::default(),
            search_tags: TagAutocomplete::default(),
            search_focused: false,
            input_focused: false,
            sort_menu: None,
            form: None,
            notes: None,
            repo_input: TextField::default(),
            repos: Vec::new(),
            repo_cursor: 0,
            repo_confirm: None,
            settings_cursor: 0,
            archives: HashMap::new(),
            qr_codes: HashMap::new(),
            bookmark_service: opts.bookmarks,
            repo_service: opts.repos,
            tool_service: opts.tools,
            store: opts.store,
            clipboard: opts.clipboard,
            status_message: opts.status_message,
            status_kind: StatusKind::Info,
            status_since: Instant::now(),
            spinner: Spinner::new(),
            in_flight: 0,
            next_request_id: 1,
            pending_list: None,
            needs_redraw: true,
            should_quit: false,
            list_area: Rect::default(),
            list_offset: 0,
            popup_area: None,
            response_tx,
            response_rx,
            config,
        };
        model.reload();
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) => {
                        if let Some(press) = KeyPress::from_event(&key) {
                            if let Err(err) = self.handle_key(&press) {
                                self.set_error(format!("Error: {:#}", err));
                            }
                            self.mark_dirty();
                        }
                    }
                    Event::Mouse(mouse) => {
                        if self.handle_mouse(mouse) {
                            self.mark_dirty();
                        }
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if self.should_quit {
                break;
            }

            if self.poll_async() {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.tick(last_tick) {
                    self.mark_dirty();
                }
            }
        }

        info!("leaving event loop");
        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.status_kind = StatusKind::Info;
        self.status_since = Instant::now();
    }

    fn set_success(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.status_kind = StatusKind::Success;
        self.status_since = Instant::now();
    }

    fn set_error(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.status_kind = StatusKind::Error;
        self.status_since = Instant::now();
        warn!(message = %self.status_message, "status error");
    }

    fn tick(&mut self, now: Instant) -> bool {
        let mut dirty = self.nav.tick(now);

        if let Some(url) = self.form.as_mut().and_then(|form| form.scrape_due(now)) {
            self.request_scrape(url);
            dirty = true;
        }
        let confirm_expired = matches!(&self.repo_confirm, Some((_, deadline)) if now >= *deadline);
        if confirm_expired {
            self.repo_confirm = None;
            dirty = true;
        }
        if self.status_kind != StatusKind::Info
            && now.duration_since(self.status_since) >= STATUS_TTL
        {
            self.status_message.clear();
            self.status_kind = StatusKind::Info;
            dirty = true;
        }
        if self.is_loading() {
            dirty |= self.spinner.advance();
        } else {
            self.spinner.reset();
        }
        dirty
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce() -> AsyncResponse + Send + 'static,
    {
        let tx = self.response_tx.clone();
        self.in_flight += 1;
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn refresh_cards(&mut self) {
        self.nav.replace_cards(self.library.visible());
    }

    /// A leading `#` switches the search bar from text to tag filtering.
    fn apply_search(&mut self) {
        let value = self.search.value().trim().to_string();
        match value.strip_prefix('#') {
            Some(tag) => {
                self.search_tags.update(tag);
                self.library.set_query("");
                self.library.set_tag(Some(tag));
            }
            None => {
                self.search_tags.hide();
                self.library.set_tag(None);
                self.library.set_query(&value);
            }
        }
        self.refresh_cards();
    }

    fn focus_input(&mut self) {
        self.input_focused = true;
        self.nav.on_focus();
    }

    fn blur_input(&mut self) {
        self.input_focused = false;
        self.search_focused = false;
        self.nav.on_blur();
    }

    fn save_pref(&mut self, key: &str, value: &str) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.set_pref(key, value) {
            warn!(key, error = %err, "failed to persist preference");
            self.set_error(format!("Could not save preference: {}", err));
        }
    }

    // ---- loading -------------------------------------------------------

    fn reload(&mut self) {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending_list = Some(request_id);
        let repo = self.repo.clone();
        debug!(repo = %repo, request_id, "loading bookmarks");

        let service = Arc::clone(&self.bookmark_service);
        let target = repo.clone();
        self.spawn(move || AsyncResponse::Bookmarks {
            request_id,
            result: service.list(&target),
            repo: target,
        });

        let service = Arc::clone(&self.bookmark_service);
        self.spawn(move || AsyncResponse::Tags {
            result: service.tags(&repo),
            repo,
        });
    }

    fn load_repos(&mut self) {
        let service = Arc::clone(&self.repo_service);
        self.spawn(move || AsyncResponse::Repos {
            result: service.list(),
        });
    }

    fn request_scrape(&mut self, url: String) {
        let tools = Arc::clone(&self.tool_service);
        self.spawn(move || AsyncResponse::Scrape {
            result: tools.scrape(&url),
            url,
        });
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match message {
            AsyncResponse::Bookmarks {
                request_id,
                repo,
                result,
            } => {
                if self.pending_list != Some(request_id) || repo != self.repo {
                    return;
                }
                self.pending_list = None;
                match result {
                    Ok(bookmarks) => {
                        info!(repo = %repo, count = bookmarks.len(), "bookmarks loaded");
                        self.library.set_bookmarks(bookmarks);
                        self.refresh_cards();
                        if self.status_kind == StatusKind::Info {
                            self.status_message.clear();
                        }
                    }
                    Err(err) => self.set_error(format!("Failed to load bookmarks: {:#}", err)),
                }
            }
            AsyncResponse::Tags { repo, result } => {
                if repo != self.repo {
                    return;
                }
                match result {
                    Ok(tags) => {
                        if let Some(form) = self.form.as_mut() {
                            form.autocomplete.set_tags(tags.clone());
                        }
                        self.search_tags.set_tags(tags.clone());
                        self.tags = tags;
                    }
                    Err(err) => debug!(error = %err, "tag list unavailable"),
                }
            }
            AsyncResponse::Created { result } => match result {
                Ok(message) => {
                    self.modals.close(Surface::NewBookmark);
                    self.after_close(Surface::NewBookmark);
                    self.set_success(message);
                    self.reload();
                }
                Err(err) => self.form_failed(err),
            },
            AsyncResponse::Updated { id, result } => match result {
                Ok(message) => {
                    self.modals.close(Surface::Edit(id));
                    self.after_close(Surface::Edit(id));
                    self.set_success(message);
                    self.reload();
                }
                Err(err) => self.form_failed(err),
            },
            AsyncResponse::Deleted { results } => {
                let mut failures = Vec::new();
                let mut deleted = 0;
                for (id, result) in results {
                    match result {
                        Ok(_) => {
                            self.nav.mark_deleted(id);
                            deleted += 1;
                        }
                        Err(err) => failures.push(format!("#{id}: {:#}", err)),
                    }
                }
                if failures.is_empty() {
                    let noun = if deleted == 1 { "bookmark" } else { "bookmarks" };
                    self.set_success(format!("Deleted {deleted} {noun}"));
                } else {
                    self.set_error(format!("Delete failed: {}", failures.join("; ")));
                }
                if deleted > 0 {
                    self.reload();
                }
            }
            AsyncResponse::Favorite { id, result } => match result {
                Ok(bookmark) => {
                    let label = if bookmark.favorite {
                        "Added to favorites"
                    } else {
                        "Removed from favorites"
                    };
                    self.apply_bookmark(bookmark);
                    self.set_success(format!("{label} (#{id})"));
                }
                Err(err) => self.set_error(format!("Favorite failed: {:#}", err)),
            },
            AsyncResponse::Visited { id, result } => match result {
                Ok(()) => {
                    if let Some(mut bookmark) = self.library.get(id).cloned() {
                        bookmark.visit_count += 1;
                        bookmark.last_visit = Utc::now().format("%Y%m%d%H%M%S").to_string();
                        self.apply_bookmark(bookmark);
                    }
                }
                Err(err) => debug!(id, error = %err, "visit not recorded"),
            },
            AsyncResponse::Notes { id, notes, result } => match result {
                Ok(message) => {
                    if let Some(mut bookmark) = self.library.get(id).cloned() {
                        bookmark.notes = notes;
                        self.apply_bookmark(bookmark);
                    }
                    self.modals.close(Surface::Notes(id));
                    self.after_close(Surface::Notes(id));
                    self.set_success(message);
                }
                Err(err) => self.set_error(format!("Saving notes failed: {:#}", err)),
            },
            AsyncResponse::Status { id, result } => match result {
                Ok(bookmark) => {
                    let summary = format!(
                        "#{id}: {} {}",
                        bookmark.status_code,
                        bookmark.status_text.trim()
                    );
                    let healthy = bookmark.status() == LinkStatus::Ok;
                    self.apply_bookmark(bookmark);
                    if healthy {
                        self.set_success(summary);
                    } else {
                        self.set_error(summary);
                    }
                }
                Err(err) => self.set_error(format!("Status check failed: {:#}", err)),
            },
            AsyncResponse::Archive { id, result } => {
                let lookup = match result {
                    Ok(Some(snapshot)) => ArchiveLookup::Found(snapshot),
                    Ok(None) => ArchiveLookup::Missing,
                    Err(err) => ArchiveLookup::Failed(format!("{:#}", err)),
                };
                self.archives.insert(id, lookup);
            }
            AsyncResponse::Qr { id, result } => {
                let view = match result {
                    Ok(matrix) => QrView::Ready(matrix),
                    Err(err) => QrView::Failed(format!("{:#}", err)),
                };
                self.qr_codes.insert(id, view);
            }
            AsyncResponse::Scrape { url, result } => {
                let Some(form) = self.form.as_mut() else {
                    return;
                };
                if form.field(FormField::Url).value().trim() != url {
                    return;
                }
                match result {
                    Ok(scraped) => form.apply_scrape(&scraped),
                    Err(err) => debug!(url = %url, error = %err, "scrape failed"),
                }
            }
            AsyncResponse::Repos { result } => match result {
                Ok(repos) => {
                    self.repos = repos;
                    self.repo_cursor = self
                        .repos
                        .iter()
                        .position(|r| r.name == self.repo)
                        .unwrap_or(0)
                        .min(self.repos.len().saturating_sub(1));
                }
                Err(err) => self.set_error(format!("Failed to list repositories: {:#}", err)),
            },
            AsyncResponse::RepoCreated { name, result } => match result {
                Ok(message) => {
                    info!(repo = %name, "repository created");
                    self.modals.close(Surface::NewRepository);
                    self.after_close(Surface::NewRepository);
                    self.set_success(message);
                    self.load_repos();
                }
                Err(err) => self.set_error(format!("Creating {name} failed: {:#}", err)),
            },
            AsyncResponse::RepoDeleted { name, result } => match result {
                Ok(message) => {
                    info!(repo = %name, "repository deleted");
                    self.set_success(message);
                    self.load_repos();
                }
                Err(err) => self.set_error(format!("Deleting {name} failed: {:#}", err)),
            },
        }
    }

    fn apply_bookmark(&mut self, bookmark: Bookmark) {
        self.library.update(bookmark.clone());
        self.nav.cards_mut().update_bookmark(bookmark);
    }

    fn form_failed(&mut self, err: anyhow::Error) {
        let message = format!("{:#}", err);
        if let Some(form) = self.form.as_mut() {
            form.fail(message.clone());
            self.focus_input();
        }
        self.set_error(message);
    }

    // ---- input ----------------------------------------------------------

    /// Routes one key press. Returns `true` when the app should exit.
    pub fn handle_key(&mut self, press: &KeyPress) -> Result<bool> {
        self.handle_key_at(press, Instant::now())
    }

    fn handle_key_at(&mut self, press: &KeyPress, now: Instant) -> Result<bool> {
        let utility = &self.config.keyboard.keybinds.utility;
        let quit = utility.quit.matches(press);
        let escape = utility.escape.key.clone();
        let close = utility.close.key.clone();

        if press.is_ctrl("c") || (!self.input_focused && quit) {
            self.should_quit = true;
            return Ok(true);
        }
        if press.is_plain("F2") && !self.input_focused && self.modals.depth() == 0 {
            self.open_settings();
            return Ok(false);
        }

        if self.input_focused {
            self.handle_input_key(press, now)?;
            return Ok(false);
        }

        if let Some(top) = self.modals.current() {
            match self.modals.route_escape(press, &escape, &close, false) {
                EscapeOutcome::Closed(surface) => {
                    self.after_close(surface);
                    return Ok(false);
                }
                EscapeOutcome::NotHandled => {}
                EscapeOutcome::Blurred | EscapeOutcome::Ignored => return Ok(false),
            }
            if self.handle_surface_key(top, press, now)? {
                return Ok(false);
            }
            if self.vim_mode {
                let mut queue = CommandQueue::default();
                self.nav
                    .handle_key(press, now, &mut self.modals, &mut queue);
                self.apply_commands(queue.0)?;
            } else if press.is_plain("ArrowDown") {
                self.modals.scroll_by(MODAL_SCROLL_STEP);
            } else if press.is_plain("ArrowUp") {
                self.modals.scroll_by(-MODAL_SCROLL_STEP);
            }
            return Ok(false);
        }

        if self.sort_menu.is_some() && self.handle_sort_menu_key(press) {
            return Ok(false);
        }

        let search = &self.config.keyboard.keybinds.search;
        if search.search.matches(press) || search.focus.matches(press) {
            self.search_focused = true;
            self.focus_input();
            return Ok(false);
        }
        if self.config.keyboard.keybinds.utility.repositories.matches(press) {
            self.open_repositories();
            return Ok(false);
        }

        if self.vim_mode {
            let mut queue = CommandQueue::default();
            let dispatch = self
                .nav
                .handle_key(press, now, &mut self.modals, &mut queue);
            if dispatch == Dispatch::Suppressed {
                debug!("key suppressed in insert mode");
            }
            self.apply_commands(queue.0)?;
            return Ok(false);
        }

        match press.key.as_str() {
            "ArrowDown" if !press.ctrl => self.nav.move_by(1),
            "ArrowUp" if !press.ctrl => self.nav.move_by(-1),
            "PageDown" => self.apply_command(Command::NextPage)?,
            "PageUp" => self.apply_command(Command::PrevPage)?,
            "Enter" => {
                if let Some(bookmark) = self.nav.current().cloned() {
                    self.open_detail(&bookmark);
                }
            }
            "Escape" => self.nav.cards_mut().clear_confirmations(),
            _ => {}
        }
        Ok(false)
    }

    fn handle_input_key(&mut self, press: &KeyPress, now: Instant) -> Result<()> {
        let utility = &self.config.keyboard.keybinds.utility;
        let escape = utility.escape.key.clone();
        let close = utility.close.key.clone();

        let autocomplete_open = self
            .form
            .as_ref()
            .map(|form| form.autocomplete.is_open())
            .unwrap_or(false);
        if !(autocomplete_open && press.is_plain("Escape"))
            && self.modals.route_escape(press, &escape, &close, true) == EscapeOutcome::Blurred
        {
            self.blur_input();
            return Ok(());
        }

        if self.search_focused {
            if press.is_plain("Enter") {
                self.blur_input();
                return Ok(());
            }
            if press.is_plain("Tab") {
                if let Some(name) = self.search_tags.suggestions().first().map(|s| s.name.clone()) {
                    self.search.set(&format!("#{name}"));
                    self.apply_search();
                }
                return Ok(());
            }
            if self.search.handle_key(press) {
                self.apply_search();
            }
            return Ok(());
        }

        match self.modals.current() {
            Some(Surface::Edit(_)) | Some(Surface::NewBookmark) => {
                let dropdown = self.config.keyboard.keybinds.dropdown.clone();
                let Some(form) = self.form.as_mut() else {
                    return Ok(());
                };
                if press.is_ctrl("l") {
                    let removed = form.clean_url();
                    if removed.is_empty() {
                        self.set_status("No tracking parameters found");
                    } else {
                        self.set_success(format!("Removed {}", removed.join(", ")));
                    }
                    return Ok(());
                }
                if form.handle_key(press, &dropdown, now) == FormAction::Submit {
                    self.submit_form();
                }
            }
            Some(Surface::Notes(id)) => {
                if press.is_plain("Enter") || press.is_ctrl("s") {
                    self.save_notes(id);
                } else if let Some((_, field)) = self.notes.as_mut() {
                    field.handle_key(press);
                }
            }
            Some(Surface::NewRepository) => {
                if press.is_plain("Enter") {
                    self.create_repo();
                } else {
                    self.repo_input.handle_key(press);
                }
            }
            _ => self.blur_input(),
        }
        Ok(())
    }

    /// Keys specific to the visible surface. Returns whether the key was used.
    fn handle_surface_key(&mut self, surface: Surface, press: &KeyPress, now: Instant) -> Result<bool> {
        let refocus = press.is_plain("i") || press.is_plain("Enter") || press.is_plain("Tab");
        match surface {
            Surface::Help => {
                if self.config.keyboard.keybinds.utility.help.matches(press) {
                    self.modals.close(Surface::Help);
                    return Ok(true);
                }
                Ok(false)
            }
            Surface::Settings => Ok(self.handle_settings_key(press)),
            Surface::Detail(id) => self.handle_detail_key(id, press, now),
            Surface::Edit(_) | Surface::NewBookmark => {
                if press.is_ctrl("s") {
                    self.submit_form();
                    return Ok(true);
                }
                if refocus && self.form.as_ref().map(|f| !f.is_locked()).unwrap_or(false) {
                    self.focus_input();
                    return Ok(true);
                }
                Ok(false)
            }
            Surface::Notes(id) => {
                if press.is_ctrl("s") {
                    self.save_notes(id);
                    return Ok(true);
                }
                if refocus {
                    self.focus_input();
                    return Ok(true);
                }
                Ok(false)
            }
            Surface::NewRepository => {
                if refocus {
                    self.focus_input();
                    return Ok(true);
                }
                Ok(false)
            }
            Surface::QrCode(_) => Ok(false),
            Surface::Repositories => Ok(self.handle_repositories_key(press, now)),
        }
    }

    fn handle_settings_key(&mut self, press: &KeyPress) -> bool {
        let nav = &self.config.keyboard.keybinds.navigation;
        if nav.down.matches(press) || press.is_plain("ArrowDown") {
            self.settings_cursor = (self.settings_cursor + 1) % SETTINGS_ITEMS;
            return true;
        }
        if nav.up.matches(press) || press.is_plain("ArrowUp") {
            self.settings_cursor = (self.settings_cursor + SETTINGS_ITEMS - 1) % SETTINGS_ITEMS;
            return true;
        }
        if press.is_plain("Enter") || press.is_plain(" ") {
            self.toggle_setting(self.settings_cursor);
            return true;
        }
        false
    }

    fn toggle_setting(&mut self, index: usize) {
        match index {
            0 => {
                self.vim_mode = !self.vim_mode;
                let value = self.vim_mode.to_string();
                self.save_pref(storage::PREF_VIM_MODE, &value);
                self.set_status(if self.vim_mode {
                    "Vim mode enabled"
                } else {
                    "Vim mode disabled (F2 opens settings)"
                });
            }
            1 => {
                self.compact = !self.compact;
                let value = self.compact.to_string();
                self.save_pref(storage::PREF_COMPACT_MODE, &value);
            }
            2 => self.toggle_theme(),
            _ => {
                let current = self.library.per_page();
                let next = ITEMS_PER_PAGE_CHOICES
                    .iter()
                    .position(|n| *n == current)
                    .map(|i| ITEMS_PER_PAGE_CHOICES[(i + 1) % ITEMS_PER_PAGE_CHOICES.len()])
                    .unwrap_or(ITEMS_PER_PAGE_CHOICES[0]);
                self.library.set_per_page(next);
                self.refresh_cards();
                self.save_pref(storage::PREF_ITEMS_PER_PAGE, &next.to_string());
            }
        }
    }

    fn handle_detail_key(&mut self, id: u64, press: &KeyPress, now: Instant) -> Result<bool> {
        let Some(bookmark) = self.library.get(id).cloned() else {
            return Ok(false);
        };
        let actions = &self.config.keyboard.keybinds.actions;
        if press.is_plain("e") {
            self.open_edit(&bookmark);
        } else if press.is_plain("o") || actions.open_tab.matches(press) {
            self.open_in_browser(&bookmark);
        } else if press.is_plain("s") {
            let service = Arc::clone(&self.bookmark_service);
            let repo = self.repo.clone();
            self.set_status(format!("Checking {}…", bookmark.url));
            self.spawn(move || AsyncResponse::Status {
                id,
                result: service.check_status(&repo, id),
            });
        } else if press.is_plain("a") {
            self.archives.insert(id, ArchiveLookup::Loading);
            let tools = Arc::clone(&self.tool_service);
            let url = bookmark.url.clone();
            self.spawn(move || AsyncResponse::Archive {
                id,
                result: tools.archive(&url),
            });
        } else if press.is_plain("n") {
            self.notes = Some((id, TextField::new(&bookmark.notes)));
            self.modals.register(Surface::Notes(id), &DEFAULT_TRIGGERS);
            self.modals.open(Surface::Notes(id));
            self.focus_input();
        } else if actions.qrcode.matches(press) {
            self.open_qr(&bookmark);
        } else if actions.favorite.matches(press) {
            self.toggle_favorite(&bookmark);
        } else if actions.yank.matches_shifted(press) {
            self.yank(&bookmark);
        } else if actions.delete.matches_shifted(press) {
            self.delete_from_detail(id, now);
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    fn delete_from_detail(&mut self, id: u64, now: Instant) {
        self.nav.cards_mut().expire_confirmations(now);
        let Some(index) = self.nav.cards().position(id) else {
            return;
        };
        match self.nav.cards().state(index) {
            Some(CardState::Confirming { .. }) => {
                self.nav.cards_mut().set_state(index, CardState::Deleting);
                if let Some(bookmark) = self.nav.cards().get(index).map(|c| c.bookmark.clone()) {
                    self.modals.close(Surface::Detail(id));
                    self.delete_bookmarks(vec![bookmark]);
                }
            }
            Some(CardState::Idle) => {
                self.nav.cards_mut().set_state(
                    index,
                    CardState::Confirming {
                        deadline: now + CONFIRM_WINDOW,
                    },
                );
                self.set_status("Press D again to delete");
            }
            _ => {}
        }
    }

    fn handle_repositories_key(&mut self, press: &KeyPress, now: Instant) -> bool {
        let nav = &self.config.keyboard.keybinds.navigation;
        if nav.down.matches(press) || press.is_plain("ArrowDown") {
            if !self.repos.is_empty() {
                self.repo_cursor = (self.repo_cursor + 1).min(self.repos.len() - 1);
            }
            self.repo_confirm = None;
            return true;
        }
        if nav.up.matches(press) || press.is_plain("ArrowUp") {
            self.repo_cursor = self.repo_cursor.saturating_sub(1);
            self.repo_confirm = None;
            return true;
        }
        if press.is_plain("Enter") {
            if let Some(name) = self.repos.get(self.repo_cursor).map(|r| r.name.clone()) {
                self.switch_repo(&name);
            }
            return true;
        }
        if press.is_plain("n") {
            self.repo_input.clear();
            self.modals.register(Surface::NewRepository, &DEFAULT_TRIGGERS);
            self.modals.open(Surface::NewRepository);
            self.focus_input();
            return true;
        }
        if press.is_plain("R") {
            self.load_repos();
            return true;
        }
        if self.config.keyboard.keybinds.actions.delete.matches_shifted(press) {
            let Some(name) = self.repos.get(self.repo_cursor).map(|r| r.name.clone()) else {
                return true;
            };
            if name == self.repo {
                self.set_error("Cannot delete the active repository");
                return true;
            }
            let confirmed = matches!(&self.repo_confirm, Some((pending, deadline)) if *pending == name && now < *deadline);
            if confirmed {
                self.repo_confirm = None;
                let service = Arc::clone(&self.repo_service);
                self.spawn(move || AsyncResponse::RepoDeleted {
                    result: service.delete(&name),
                    name,
                });
            } else {
                self.set_status(format!("Press D again to delete {name}"));
                self.repo_confirm = Some((name, now + CONFIRM_WINDOW));
            }
            return true;
        }
        false
    }

    fn handle_sort_menu_key(&mut self, press: &KeyPress) -> bool {
        let Some(index) = self.sort_menu else {
            return false;
        };
        let binds = &self.config.keyboard.keybinds;
        let count = SortOrder::ALL.len();
        if binds.navigation.down.matches(press) || press.is_plain("ArrowDown") {
            self.sort_menu = Some((index + 1) % count);
        } else if binds.navigation.up.matches(press) || press.is_plain("ArrowUp") {
            self.sort_menu = Some((index + count - 1) % count);
        } else if press.is_plain("Enter") {
            let order = SortOrder::ALL[index];
            self.sort_menu = None;
            self.library.set_sort(order);
            self.refresh_cards();
            self.save_pref(storage::PREF_SORT_ORDER, order.as_str());
            self.set_status(format!("Sorted by {}", order.label().to_lowercase()));
        } else if press.is_plain("Escape") || binds.utility.sort.matches(press) {
            self.sort_menu = None;
        } else {
            return false;
        }
        true
    }

    fn handle_mouse(&mut self, event: MouseEvent) -> bool {
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some(top) = self.modals.current() {
                    let (inside, on_close) = self
                        .popup_area
                        .map(|area| {
                            (
                                contains(area, event.column, event.row),
                                contains(close_button_area(area), event.column, event.row),
                            )
                        })
                        .unwrap_or((false, false));
                    let trigger = if on_close {
                        Some(CloseTrigger::CloseButton)
                    } else if !inside {
                        Some(CloseTrigger::Backdrop)
                    } else {
                        None
                    };
                    if trigger.is_some_and(|trigger| self.modals.trigger(top, trigger)) {
                        self.after_close(top);
                    }
                    return true;
                }
                if self.sort_menu.is_some() {
                    self.sort_menu = None;
                    return true;
                }
                let inner = self.list_inner();
                if !contains(inner, event.column, event.row) {
                    return false;
                }
                let row = (event.row - inner.y) / self.card_height();
                let index = self.list_offset + row as usize;
                if index < self.nav.cards().len() {
                    if self.nav.cursor() == Some(index) {
                        if let Some(bookmark) = self.nav.current().cloned() {
                            self.open_detail(&bookmark);
                        }
                    } else {
                        self.nav.select(index);
                    }
                }
                true
            }
            MouseEventKind::ScrollDown => {
                if self.modals.depth() > 0 {
                    self.modals.scroll_by(MODAL_SCROLL_STEP);
                } else {
                    self.nav.move_by(1);
                }
                true
            }
            MouseEventKind::ScrollUp => {
                if self.modals.depth() > 0 {
                    self.modals.scroll_by(-MODAL_SCROLL_STEP);
                } else {
                    self.nav.move_by(-1);
                }
                true
            }
            _ => false,
        }
    }

    fn card_height(&self) -> u16 {
        if self.compact {
            1
        } else {
            CARD_HEIGHT
        }
    }

    fn list_inner(&self) -> Rect {
        Rect {
            x: self.list_area.x.saturating_add(1),
            y: self.list_area.y.saturating_add(1),
            width: self.list_area.width.saturating_sub(2),
            height: self.list_area.height.saturating_sub(2),
        }
    }

    // ---- commands --------------------------------------------------------

    fn apply_commands(&mut self, commands: Vec<Command>) -> Result<()> {
        let mut deletes = Vec::new();
        for command in commands {
            match command {
                Command::Delete(bookmark) => deletes.push(bookmark),
                other => self.apply_command(other)?,
            }
        }
        if !deletes.is_empty() {
            self.delete_bookmarks(deletes);
        }
        Ok(())
    }

    fn apply_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::OpenDetail(bookmark) => self.open_detail(&bookmark),
            Command::OpenInTab(bookmark) => self.open_in_browser(&bookmark),
            Command::PasteNew => self.paste_new()?,
            Command::NewBookmark => self.open_new_form(None),
            Command::Edit(bookmark) => self.open_edit(&bookmark),
            Command::ToggleFavorite(bookmark) => self.toggle_favorite(&bookmark),
            Command::Yank(bookmark) => self.yank(&bookmark),
            Command::Delete(bookmark) => self.delete_bookmarks(vec![bookmark]),
            Command::OpenQr(bookmark) => self.open_qr(&bookmark),
            Command::ToggleHelp => self.modals.toggle(Surface::Help),
            Command::OpenSettings => self.open_settings(),
            Command::Reload => {
                self.set_status("Reloading…");
                self.reload();
            }
            Command::ToggleTheme => self.toggle_theme(),
            Command::ToggleSortMenu => {
                self.sort_menu = match self.sort_menu {
                    Some(_) => None,
                    None => Some(self.library.sort().index()),
                };
            }
            Command::NextPage => {
                if self.library.next_page() {
                    self.refresh_cards();
                }
            }
            Command::PrevPage => {
                if self.library.prev_page() {
                    self.refresh_cards();
                }
            }
        }
        Ok(())
    }

    fn open_detail(&mut self, bookmark: &Bookmark) {
        let surface = Surface::Detail(bookmark.id);
        self.modals.register(surface, &DEFAULT_TRIGGERS);
        self.modals.open(surface);
    }

    fn open_settings(&mut self) {
        self.settings_cursor = 0;
        self.modals.open(Surface::Settings);
    }

    fn open_repositories(&mut self) {
        self.repo_confirm = None;
        self.modals.open(Surface::Repositories);
        self.load_repos();
    }

    fn open_in_browser(&mut self, bookmark: &Bookmark) {
        if let Err(err) = webbrowser::open(&bookmark.url) {
            self.set_error(format!("Failed to open browser: {}", err));
            return;
        }
        self.set_status(format!("Opened {}", bookmark.url));
        let service = Arc::clone(&self.bookmark_service);
        let repo = self.repo.clone();
        let id = bookmark.id;
        self.spawn(move || AsyncResponse::Visited {
            id,
            result: service.add_visit(&repo, id),
        });
    }

    fn open_new_form(&mut self, url: Option<&str>) {
        self.form = Some(BookmarkForm::new_bookmark(url, self.tags.clone(), Instant::now()));
        self.modals.register(Surface::NewBookmark, &DEFAULT_TRIGGERS);
        self.modals.open(Surface::NewBookmark);
        self.focus_input();
    }

    fn open_edit(&mut self, bookmark: &Bookmark) {
        let surface = Surface::Edit(bookmark.id);
        self.form = Some(BookmarkForm::edit(bookmark, self.tags.clone()));
        self.modals.register(surface, &DEFAULT_TRIGGERS);
        self.modals.open(surface);
        self.focus_input();
    }

    fn paste_new(&mut self) -> Result<()> {
        let text = self.clipboard.read_text()?;
        let text = text.trim();
        if bookmark::is_valid_url(text) {
            self.open_new_form(Some(text));
        } else {
            self.set_status("Clipboard does not contain a URL");
        }
        Ok(())
    }

    fn yank(&mut self, bookmark: &Bookmark) {
        match self.clipboard.write_text(&bookmark.url) {
            Ok(()) => self.set_success(format!("Copied {}", bookmark.url)),
            Err(err) => self.set_error(format!("Copy failed: {:#}", err)),
        }
    }

    fn toggle_favorite(&mut self, bookmark: &Bookmark) {
        let service = Arc::clone(&self.bookmark_service);
        let repo = self.repo.clone();
        let id = bookmark.id;
        self.spawn(move || AsyncResponse::Favorite {
            id,
            result: service.toggle_favorite(&repo, id),
        });
    }

    fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
        let value = self.theme.as_str();
        self.save_pref(storage::PREF_THEME_MODE, value);
    }

    fn open_qr(&mut self, bookmark: &Bookmark) {
        let id = bookmark.id;
        let surface = Surface::QrCode(id);
        self.modals.register(surface, &DEFAULT_TRIGGERS);
        self.modals.open(surface);
        if matches!(self.qr_codes.get(&id), Some(QrView::Ready(_))) {
            return;
        }
        self.qr_codes.insert(id, QrView::Loading);
        let tools = Arc::clone(&self.tool_service);
        let url = bookmark.url.clone();
        self.spawn(move || AsyncResponse::Qr {
            id,
            result: tools.qr(&url, DEFAULT_QR_SIZE).and_then(|payload| {
                if payload.base64.is_empty() {
                    return Err(anyhow!("{}", payload.message));
                }
                qr::matrix_from_base64(&payload.base64)
            }),
        });
    }

    /// Deletes in descending id order; the server renumbers ids after each
    /// delete, so lower ids stay valid.
    fn delete_bookmarks(&mut self, mut bookmarks: Vec<Bookmark>) {
        bookmarks.sort_by_key(|b| std::cmp::Reverse(b.id));
        let ids: Vec<u64> = bookmarks.iter().map(|b| b.id).collect();
        info!(?ids, "deleting bookmarks");
        let service = Arc::clone(&self.bookmark_service);
        let repo = self.repo.clone();
        self.spawn(move || AsyncResponse::Deleted {
            results: ids
                .into_iter()
                .map(|id| (id, service.delete(&repo, id)))
                .collect(),
        });
    }

    fn submit_form(&mut self) {
        let Some(form) = self.form.as_mut() else {
            return;
        };
        if form.is_locked() {
            return;
        }
        if let Err(message) = form.validate() {
            form.fail(message);
            return;
        }
        let service = Arc::clone(&self.bookmark_service);
        let repo = self.repo.clone();
        match form.kind() {
            FormKind::New => {
                let payload = form.to_new();
                form.begin_submit();
                self.blur_input();
                self.spawn(move || AsyncResponse::Created {
                    result: service.create(&repo, &payload),
                });
            }
            FormKind::Edit(id) => {
                let Some(updated) = form.to_updated() else {
                    return;
                };
                form.begin_submit();
                self.blur_input();
                self.spawn(move || AsyncResponse::Updated {
                    id,
                    result: service.update(&repo, &updated),
                });
            }
        }
    }

    fn save_notes(&mut self, id: u64) {
        let Some((_, field)) = self.notes.as_ref() else {
            return;
        };
        let notes = field.value().trim().to_string();
        self.blur_input();
        let service = Arc::clone(&self.bookmark_service);
        let repo = self.repo.clone();
        self.spawn(move || AsyncResponse::Notes {
            id,
            result: service.update_notes(&repo, id, &notes),
            notes,
        });
    }

    fn create_repo(&mut self) {
        let name = self.repo_input.value().trim().to_string();
        if name.is_empty() {
            self.set_error("Repository name is required");
            return;
        }
        self.blur_input();
        let service = Arc::clone(&self.repo_service);
        self.spawn(move || AsyncResponse::RepoCreated {
            result: service.create(&name),
            name,
        });
    }

    fn switch_repo(&mut self, name: &str) {
        if name == self.repo {
            self.modals.close(Surface::Repositories);
            return;
        }
        info!(from = %self.repo, to = %name, "switching repository");
        self.repo = name.to_string();
        self.save_pref(storage::PREF_DEFAULT_REPO, name);
        self.modals.close_all();
        self.blur_input();
        self.form = None;
        self.notes = None;
        self.archives.clear();
        self.qr_codes.clear();
        self.tags.clear();
        self.library.set_bookmarks(Vec::new());
        self.refresh_cards();
        self.set_status(format!("Switched to {name}"));
        self.reload();
    }

    /// Cleanup after a surface left the stack.
    fn after_close(&mut self, surface: Surface) {
        match surface {
            Surface::Edit(_) | Surface::NewBookmark => self.form = None,
            Surface::Notes(_) => self.notes = None,
            Surface::NewRepository => self.repo_input.clear(),
            Surface::Repositories => self.repo_confirm = None,
            _ => {}
        }
        if self.input_focused {
            self.blur_input();
        }
    }

    // ---- drawing ---------------------------------------------------------

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let colors = palette(self.theme);
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(colors.bg)), full);

        let show_search = self.search_focused || !self.search.is_empty();
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(if show_search { 3 } else { 0 }),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        frame.render_widget(self.status_line(colors), layout[0]);
        if show_search {
            self.draw_search(frame, layout[1], colors);
        }
        self.draw_cards(frame, layout[2], colors);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(colors.text_secondary)
                    .bg(colors.panel_bg)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[3]);

        if let Some(index) = self.sort_menu {
            self.draw_sort_menu(frame, layout[2], index, colors);
        }

        self.popup_area = None;
        if let Some(surface) = self.modals.current() {
            self.draw_surface(frame, layout[2], surface, colors);
        }
    }

    fn status_line(&self, colors: Palette) -> Paragraph<'static> {
        let mut spans = vec![Span::styled(
            format!(" {} ", self.repo),
            Style::default()
                .fg(colors.bg)
                .bg(colors.accent)
                .add_modifier(Modifier::BOLD),
        )];
        let counts = if self.library.matching() == self.library.total() {
            format!(" {} bookmarks", self.library.total())
        } else {
            format!(" {}/{} bookmarks", self.library.matching(), self.library.total())
        };
        spans.push(Span::raw(counts));
        spans.push(Span::raw(format!(
            " · page {}/{} · {}",
            self.library.page(),
            self.library.page_count(),
            self.library.sort().label()
        )));
        if self.nav.is_multi_select() {
            spans.push(Span::styled(
                format!(" · VISUAL ({})", self.nav.selection().len()),
                Style::default().fg(colors.warning).add_modifier(Modifier::BOLD),
            ));
        }
        if self.is_loading() {
            spans.push(Span::raw(format!(" {}", self.spinner.frame())));
        }
        if !self.status_message.is_empty() {
            let color = match self.status_kind {
                StatusKind::Info => colors.text_primary,
                StatusKind::Success => colors.success,
                StatusKind::Error => colors.error,
            };
            spans.push(Span::raw("  "));
            spans.push(Span::styled(self.status_message.clone(), Style::default().fg(color)));
        }
        Paragraph::new(Line::from(spans)).style(
            Style::default()
                .fg(colors.text_primary)
                .bg(colors.panel_focused_bg)
                .add_modifier(Modifier::BOLD),
        )
    }

    fn draw_search(&self, frame: &mut Frame<'_>, area: Rect, colors: Palette) {
        let border = if self.search_focused {
            colors.border_focused
        } else {
            colors.border_idle
        };
        let mut spans = vec![Span::raw(self.search.value().to_string())];
        if self.search_focused && self.search_tags.is_open() {
            let hint = self
                .search_tags
                .suggestions()
                .iter()
                .map(|s| format!("#{} ({})", s.name, s.count))
                .collect::<Vec<_>>()
                .join("  ");
            if !hint.is_empty() {
                spans.push(Span::styled(
                    format!("   {hint}"),
                    Style::default().fg(colors.text_secondary),
                ));
            }
        }
        let input = Paragraph::new(Line::from(spans))
            .style(Style::default().fg(colors.text_primary).bg(colors.panel_bg))
            .block(
                Block::default()
                    .title(Span::styled(" Search ", Style::default().fg(colors.accent)))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(border))
                    .style(Style::default().bg(colors.panel_bg)),
            );
        frame.render_widget(input, area);
        if self.search_focused {
            frame.set_cursor(
                area.x + 1 + self.search.cursor_column() as u16,
                area.y + 1,
            );
        }
    }

    fn draw_cards(&mut self, frame: &mut Frame<'_>, area: Rect, colors: Palette) {
        self.list_area = area;
        let now = Utc::now();
        let cursor = self.nav.cursor();
        let selection = self.nav.selection();
        let items: Vec<ListItem> = if self.nav.cards().is_empty() {
            let message = if self.pending_list.is_some() {
                "Loading bookmarks…"
            } else if self.library.total() > 0 {
                "No bookmarks match the current filter"
            } else {
                "No bookmarks yet. Press a to add one."
            };
            vec![ListItem::new(Line::from(Span::styled(
                message,
                Style::default()
                    .fg(colors.text_secondary)
                    .add_modifier(Modifier::ITALIC),
            )))]
        } else {
            self.nav
                .cards()
                .iter()
                .enumerate()
                .map(|(index, card)| {
                    let lines = card_lines(
                        &card.bookmark,
                        card.state,
                        selection.contains(&index),
                        self.compact,
                        now,
                        colors,
                    );
                    let mut item = ListItem::new(lines);
                    if cursor == Some(index) {
                        item = item.style(Style::default().bg(colors.selected_bg));
                    }
                    item
                })
                .collect()
        };

        let title = format!(" Bookmarks · {} ", self.repo);
        let list = List::new(items).block(
            Block::default()
                .title(Span::styled(
                    title,
                    Style::default().fg(colors.accent).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(if self.modals.depth() == 0 {
                    colors.border_focused
                } else {
                    colors.border_idle
                }))
                .style(Style::default().bg(colors.panel_bg)),
        );

        let mut state = ListState::default().with_offset(self.list_offset);
        state.select(cursor);
        frame.render_stateful_widget(list, area, &mut state);
        self.list_offset = state.offset();
    }

    fn draw_sort_menu(&self, frame: &mut Frame<'_>, area: Rect, index: usize, colors: Palette) {
        let width = 22.min(area.width);
        let height = (SortOrder::ALL.len() as u16 + 2).min(area.height);
        let popup = Rect {
            x: area.x + area.width.saturating_sub(width + 1),
            y: area.y + 1,
            width,
            height,
        };
        let current = self.library.sort();
        let items: Vec<ListItem> = SortOrder::ALL
            .iter()
            .map(|order| {
                let marker = if *order == current { "● " } else { "  " };
                ListItem::new(format!("{marker}{}", order.label()))
            })
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .title(Span::styled(" Sort ", Style::default().fg(colors.accent)))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(colors.border_focused))
                    .style(Style::default().bg(colors.panel_bg).fg(colors.text_primary)),
            )
            .highlight_style(
                Style::default()
                    .bg(colors.selected_bg)
                    .add_modifier(Modifier::BOLD),
            );
        let mut state = ListState::default().with_selected(Some(index));
        frame.render_widget(Clear, popup);
        frame.render_stateful_widget(list, popup, &mut state);
    }

    fn draw_surface(&mut self, frame: &mut Frame<'_>, area: Rect, surface: Surface, colors: Palette) {
        let (percent_x, percent_y) = match surface {
            Surface::Help => (70, 80),
            Surface::Settings => (50, 40),
            Surface::Detail(_) => (75, 80),
            Surface::Edit(_) | Surface::NewBookmark => (70, 70),
            Surface::Notes(_) | Surface::NewRepository => (60, 30),
            Surface::QrCode(_) => (60, 90),
            Surface::Repositories => (60, 60),
        };
        let popup = centered_rect(percent_x, percent_y, area);
        self.popup_area = Some(popup);
        frame.render_widget(Clear, popup);

        let block = Block::default()
            .title(Span::styled(
                format!(" {} ", surface.title()),
                Style::default().fg(colors.accent).add_modifier(Modifier::BOLD),
            ))
            .title(
                Title::from(Span::styled(CLOSE_BUTTON, Style::default().fg(colors.text_secondary)))
                    .alignment(Alignment::Right),
            )
            .title(
                Title::from(Span::styled(
                    format!(" {} ", surface_hint(surface)),
                    Style::default()
                        .fg(colors.text_secondary)
                        .add_modifier(Modifier::ITALIC),
                ))
                .position(Position::Bottom),
            )
            .borders(Borders::ALL)
            .border_style(Style::default().fg(colors.border_focused))
            .style(Style::default().bg(colors.panel_bg).fg(colors.text_primary));
        let inner = block.inner(popup);
        frame.render_widget(block, popup);

        let scroll = self.modals.scroll_offset(surface);
        let body = match surface {
            Surface::Help => self.help_body(colors),
            Surface::Settings => self.settings_body(colors),
            Surface::Detail(id) => self.detail_body(id, colors),
            Surface::Edit(_) | Surface::NewBookmark => {
                self.draw_form(frame, inner, colors);
                return;
            }
            Surface::Notes(_) => {
                let value = self.notes.as_ref().map(|(_, f)| f.clone()).unwrap_or_default();
                self.draw_single_input(frame, inner, "Notes", &value, colors);
                return;
            }
            Surface::NewRepository => {
                let value = self.repo_input.clone();
                self.draw_single_input(frame, inner, "Name", &value, colors);
                return;
            }
            Surface::QrCode(id) => self.qr_body(id, colors),
            Surface::Repositories => self.repositories_body(colors),
        };
        let paragraph = Paragraph::new(body)
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));
        frame.render_widget(paragraph, inner);
    }

    fn help_body(&self, colors: Palette) -> Text<'static> {
        let mut lines = Vec::new();
        for (category, binds) in self.config.keyboard.keybinds.help_rows() {
            lines.push(Line::from(Span::styled(
                category.to_string(),
                Style::default().fg(colors.accent).add_modifier(Modifier::BOLD),
            )));
            for bind in binds {
                lines.push(Line::from(vec![
                    Span::styled(
                        format!("  {:>8}  ", bind.label()),
                        Style::default()
                            .fg(colors.text_primary)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(
                        bind.description.clone(),
                        Style::default().fg(colors.text_secondary),
                    ),
                ]));
            }
            lines.push(Line::default());
        }
        lines.push(Line::from(Span::styled(
            "Press ? anytime to toggle this help",
            Style::default()
                .fg(colors.text_secondary)
                .add_modifier(Modifier::ITALIC),
        )));
        Text::from(lines)
    }

    fn settings_body(&self, colors: Palette) -> Text<'static> {
        let check = |on: bool| if on { "[x]" } else { "[ ]" };
        let rows = [
            format!("{} Vim mode", check(self.vim_mode)),
            format!("{} Compact mode", check(self.compact)),
            format!("{} Dark mode", check(self.theme == ThemeMode::Dark)),
            format!("    Items per page: {}", self.library.per_page()),
        ];
        let lines = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let style = if index == self.settings_cursor {
                    Style::default()
                        .bg(colors.selected_bg)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                Line::from(Span::styled(row, style))
            })
            .collect::<Vec<_>>();
        Text::from(lines)
    }

    fn detail_body(&self, id: u64, colors: Palette) -> Text<'static> {
        let Some(bookmark) = self.library.get(id) else {
            return Text::from("Bookmark not found");
        };
        let now = Utc::now();
        let label = |name: &str| {
            Span::styled(
                format!("{name:<12}"),
                Style::default().fg(colors.text_secondary),
            )
        };
        let value = |text: String| Span::styled(text, Style::default().fg(colors.text_primary));
        let when = |raw: &str| {
            if raw.trim().is_empty() {
                "never".to_string()
            } else {
                format!(
                    "{} ({})",
                    bookmark::format_timestamp(raw),
                    bookmark::relative_time(raw, now)
                )
            }
        };

        let mut lines = vec![
            Line::from(Span::styled(
                bookmark.display_title().to_string(),
                Style::default().fg(colors.accent).add_modifier(Modifier::BOLD),
            )),
            Line::default(),
            Line::from(vec![label("URL"), value(bookmark.url.clone())]),
            Line::from(vec![label("Domain"), value(bookmark.domain())]),
            Line::from(vec![label("Tags"), value(bookmark.tags_label())]),
            Line::from(vec![label("Created"), value(when(&bookmark.created_at))]),
            Line::from(vec![label("Updated"), value(when(&bookmark.updated_at))]),
            Line::from(vec![label("Last visit"), value(when(&bookmark.last_visit))]),
            Line::from(vec![label("Visits"), value(bookmark.visit_count.to_string())]),
            Line::from(vec![
                label("Favorite"),
                value(if bookmark.favorite { "yes" } else { "no" }.to_string()),
            ]),
        ];

        let status_color = match bookmark.status() {
            LinkStatus::Ok => colors.success,
            LinkStatus::Redirect => colors.warning,
            LinkStatus::Error => colors.error,
            LinkStatus::Unknown => colors.text_secondary,
        };
        let status = if bookmark.status_code == 0 {
            "not checked".to_string()
        } else {
            format!("{} {}", bookmark.status_code, bookmark.status_text.trim())
        };
        lines.push(Line::from(vec![
            label("Status"),
            Span::styled(status, Style::default().fg(status_color)),
        ]));
        if !bookmark.last_checked.is_empty() {
            lines.push(Line::from(vec![label("Checked"), value(when(&bookmark.last_checked))]));
        }

        let archive = match self.archives.get(&id) {
            Some(ArchiveLookup::Loading) => "looking up snapshot…".to_string(),
            Some(ArchiveLookup::Found(snapshot)) => format!(
                "{} ({})",
                snapshot.archive_url,
                bookmark::format_timestamp(&snapshot.archive_timestamp)
            ),
            Some(ArchiveLookup::Missing) => "no snapshot found".to_string(),
            Some(ArchiveLookup::Failed(err)) => format!("lookup failed: {err}"),
            None if !bookmark.archive_url.is_empty() => bookmark.archive_url.clone(),
            None => "press a to look up".to_string(),
        };
        lines.push(Line::from(vec![label("Archive"), value(archive)]));

        if let Some(card) = self.nav.cards().position(id).and_then(|i| self.nav.cards().get(i)) {
            if card.is_confirming() {
                lines.push(Line::default());
                lines.push(Line::from(Span::styled(
                    "Press D again to delete this bookmark",
                    Style::default().fg(colors.error).add_modifier(Modifier::BOLD),
                )));
            }
        }

        lines.push(Line::default());
        lines.push(Line::from(label("Description")));
        for line in textwrap::wrap(&bookmark.desc, 72) {
            lines.push(Line::from(value(line.into_owned())));
        }
        lines.push(Line::default());
        lines.push(Line::from(label("Notes")));
        if bookmark.notes.trim().is_empty() {
            lines.push(Line::from(Span::styled(
                "none, press n to add",
                Style::default()
                    .fg(colors.text_secondary)
                    .add_modifier(Modifier::ITALIC),
            )));
        } else {
            for line in bookmark.notes.lines() {
                lines.push(Line::from(value(line.to_string())));
            }
        }
        Text::from(lines)
    }

    fn draw_form(&self, frame: &mut Frame<'_>, area: Rect, colors: Palette) {
        let Some(form) = self.form.as_ref() else {
            return;
        };
        let mut constraints: Vec<Constraint> =
            FormField::ALL.iter().map(|_| Constraint::Length(3)).collect();
        constraints.push(Constraint::Min(0));
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(area);

        for (field, row) in FormField::ALL.iter().zip(rows.iter()) {
            let focused = self.input_focused && form.focus() == *field;
            let border = if focused {
                colors.border_focused
            } else {
                colors.border_idle
            };
            let input = Paragraph::new(form.field(*field).value().to_string()).block(
                Block::default()
                    .title(Span::styled(
                        format!(" {} ", field.label()),
                        Style::default().fg(colors.text_secondary),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(border)),
            );
            frame.render_widget(input, *row);
            if focused {
                frame.set_cursor(
                    row.x + 1 + form.field(*field).cursor_column() as u16,
                    row.y + 1,
                );
            }
        }

        let footer_area = rows[FormField::ALL.len()];
        let mut lines = Vec::new();
        match form.status() {
            FormStatus::Editing => {}
            FormStatus::Submitting => lines.push(Line::from(Span::styled(
                format!("{} Saving…", self.spinner.frame()),
                Style::default().fg(colors.accent),
            ))),
            FormStatus::Failed(message) => lines.push(Line::from(Span::styled(
                message.clone(),
                Style::default().fg(colors.error),
            ))),
            FormStatus::Saved(message) => lines.push(Line::from(Span::styled(
                message.clone(),
                Style::default().fg(colors.success),
            ))),
        }
        frame.render_widget(Paragraph::new(lines), footer_area);

        if form.autocomplete.is_open() && form.focus() == FormField::Tags {
            self.draw_autocomplete(frame, rows[3], area, colors);
        }
    }

    fn draw_autocomplete(&self, frame: &mut Frame<'_>, anchor: Rect, bounds: Rect, colors: Palette) {
        let Some(form) = self.form.as_ref() else {
            return;
        };
        let suggestions = form.autocomplete.suggestions();
        let items: Vec<ListItem> = if suggestions.is_empty() {
            vec![ListItem::new(Span::styled(
                format!("No tags found, \"{}\" will be created", form.autocomplete.query()),
                Style::default()
                    .fg(colors.text_secondary)
                    .add_modifier(Modifier::ITALIC),
            ))]
        } else {
            suggestions
                .iter()
                .map(|s| ListItem::new(format!("{} ({})", s.name, s.count)))
                .collect()
        };
        let height = (items.len() as u16 + 2).min(bounds.bottom().saturating_sub(anchor.bottom()));
        if height < 3 {
            return;
        }
        let popup = Rect {
            x: anchor.x + 2,
            y: anchor.bottom(),
            width: anchor.width.saturating_sub(4).min(48),
            height,
        };
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(colors.border_focused))
                    .style(Style::default().bg(colors.panel_focused_bg)),
            )
            .highlight_style(
                Style::default()
                    .bg(colors.selected_bg)
                    .add_modifier(Modifier::BOLD),
            );
        let mut state = ListState::default().with_selected(form.autocomplete.selected());
        frame.render_widget(Clear, popup);
        frame.render_stateful_widget(list, popup, &mut state);
    }

    fn draw_single_input(
        &self,
        frame: &mut Frame<'_>,
        area: Rect,
        label: &str,
        field: &TextField,
        colors: Palette,
    ) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(area);
        let border = if self.input_focused {
            colors.border_focused
        } else {
            colors.border_idle
        };
        let input = Paragraph::new(field.value().to_string()).block(
            Block::default()
                .title(Span::styled(
                    format!(" {label} "),
                    Style::default().fg(colors.text_secondary),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        );
        frame.render_widget(input, rows[0]);
        if self.input_focused {
            frame.set_cursor(rows[0].x + 1 + field.cursor_column() as u16, rows[0].y + 1);
        }
    }

    fn qr_body(&self, id: u64, colors: Palette) -> Text<'static> {
        let url = self
            .library
            .get(id)
            .map(|b| b.url.clone())
            .unwrap_or_default();
        let mut lines = match self.qr_codes.get(&id) {
            Some(QrView::Ready(matrix)) => matrix
                .render_lines()
                .into_iter()
                .map(|line| {
                    Line::from(Span::styled(
                        line,
                        Style::default().fg(Color::Black).bg(Color::White),
                    ))
                    .alignment(Alignment::Center)
                })
                .collect::<Vec<_>>(),
            Some(QrView::Failed(err)) => vec![Line::from(Span::styled(
                format!("QR code unavailable: {err}"),
                Style::default().fg(colors.error),
            ))],
            Some(QrView::Loading) | None => vec![Line::from(format!(
                "{} Generating QR code…",
                self.spinner.frame()
            ))],
        };
        lines.push(Line::default());
        lines.push(
            Line::from(Span::styled(url, Style::default().fg(colors.text_secondary)))
                .alignment(Alignment::Center),
        );
        Text::from(lines)
    }

    fn repositories_body(&self, colors: Palette) -> Text<'static> {
        if self.repos.is_empty() {
            return Text::from(Line::from(Span::styled(
                "Loading repositories…",
                Style::default()
                    .fg(colors.text_secondary)
                    .add_modifier(Modifier::ITALIC),
            )));
        }
        let lines = self
            .repos
            .iter()
            .enumerate()
            .map(|(index, repo)| {
                let marker = if repo.name == self.repo { "● " } else { "  " };
                let confirming = matches!(&self.repo_confirm, Some((name, _)) if *name == repo.name);
                let mut style = Style::default().fg(colors.text_primary);
                if index == self.repo_cursor {
                    style = style.bg(colors.selected_bg).add_modifier(Modifier::BOLD);
                }
                if confirming {
                    style = style.fg(colors.error);
                }
                Line::from(Span::styled(
                    format!(
                        "{marker}{:<20} {:>5} bookmarks {:>4} tags {:>4} favorites",
                        repo.name, repo.bookmarks, repo.tags, repo.favorites
                    ),
                    style,
                ))
            })
            .collect::<Vec<_>>();
        Text::from(lines)
    }

    fn footer_text(&self) -> String {
        if self.search_focused {
            return "Search: type to filter · #tag filter by tag · Tab complete tag · Enter apply · Esc leave"
                .to_string();
        }
        if self.sort_menu.is_some() {
            return "Sort: j/k choose · Enter apply · Esc close".to_string();
        }
        if let Some(surface) = self.modals.current() {
            if self.input_focused {
                return match surface {
                    Surface::Edit(_) | Surface::NewBookmark => {
                        "Tab/S-Tab field · Enter next/save · Ctrl-s save · Ctrl-l clean URL · Esc leave input"
                            .to_string()
                    }
                    _ => "Enter save · Esc leave input".to_string(),
                };
            }
            return format!("{} · Esc/q close", surface_hint(surface));
        }

        let mut parts: Vec<String> = Vec::new();
        if self.vim_mode {
            parts.push("j/k move".to_string());
            parts.push("Enter open".to_string());
            parts.push("a add".to_string());
            parts.push("/ search".to_string());
            parts.push("s sort".to_string());
            parts.push("r repositories".to_string());
            parts.push("? help".to_string());
        } else {
            parts.push("↑/↓ move".to_string());
            parts.push("Enter open".to_string());
            parts.push("PgUp/PgDn page".to_string());
            parts.push("/ search".to_string());
            parts.push("F2 settings".to_string());
        }
        if self.nav.is_multi_select() {
            parts.push("Space select · D delete selected".to_string());
        }
        parts.push("Q quit".to_string());
        parts.join(" · ")
    }
}

fn surface_hint(surface: Surface) -> &'static str {
    match surface {
        Surface::Help => "j/k scroll",
        Surface::Settings => "j/k move · Enter toggle",
        Surface::Detail(_) => "e edit · o open · s status · a archive · n notes · c QR · D delete",
        Surface::Edit(_) | Surface::NewBookmark => "i edit · Ctrl-s save",
        Surface::Notes(_) | Surface::NewRepository => "i edit · Enter save",
        Surface::QrCode(_) => "scan with your phone",
        Surface::Repositories => "Enter switch · n new · D delete · R refresh",
    }
}

fn card_lines(
    bookmark: &Bookmark,
    state: CardState,
    selected: bool,
    compact: bool,
    now: chrono::DateTime<Utc>,
    colors: Palette,
) -> Vec<Line<'static>> {
    let marker = if selected { "◆ " } else { "  " };
    let star = if bookmark.favorite { "★ " } else { "" };
    let mut title_style = Style::default()
        .fg(colors.text_primary)
        .add_modifier(Modifier::BOLD);
    let mut meta_style = Style::default().fg(colors.text_secondary);
    let mut notice = None;
    match state {
        CardState::Idle => {}
        CardState::Confirming { .. } => {
            title_style = title_style.fg(colors.error);
            notice = Some(("press D again to delete", colors.error));
        }
        CardState::Deleting => {
            title_style = title_style.add_modifier(Modifier::DIM);
            meta_style = meta_style.add_modifier(Modifier::DIM);
            notice = Some(("deleting…", colors.warning));
        }
        CardState::Deleted => {
            title_style = title_style.add_modifier(Modifier::CROSSED_OUT);
            meta_style = meta_style.add_modifier(Modifier::CROSSED_OUT);
            notice = Some(("deleted", colors.text_secondary));
        }
    }

    let mut first = vec![
        Span::styled(marker.to_string(), Style::default().fg(colors.warning)),
        Span::styled(star.to_string(), Style::default().fg(colors.warning)),
        Span::styled(bookmark.display_title().to_string(), title_style),
    ];
    if compact {
        first.push(Span::styled(format!("  {}", bookmark.domain()), meta_style));
    }
    if let Some((text, color)) = notice {
        first.push(Span::styled(
            format!("  [{text}]"),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
    }
    if compact {
        return vec![Line::from(first)];
    }

    let mut meta = vec![Span::styled(format!("    {}", bookmark.domain()), meta_style)];
    if !bookmark.tags.is_empty() {
        meta.push(Span::styled(
            format!(" · {}", bookmark.tags_label()),
            Style::default().fg(colors.accent),
        ));
    }
    let age = bookmark::relative_time(&bookmark.created_at, now);
    if !age.is_empty() {
        meta.push(Span::styled(format!(" · {age}"), meta_style));
    }
    if bookmark.status() == LinkStatus::Error {
        meta.push(Span::styled(
            format!(" · {}", bookmark.status_code),
            Style::default().fg(colors.error),
        ));
    }

    let desc = bookmark.desc.lines().next().unwrap_or("").to_string();
    vec![
        Line::from(first),
        Line::from(meta),
        Line::from(Span::styled(format!("    {desc}"), meta_style)),
    ]
}

#[cfg(test)]
impl Model {
    /// Drains worker responses until nothing is in flight.
    fn wait_idle(&mut self) {
        while self.in_flight > 0 {
            match self.response_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(message) => self.handle_async_response(message),
                Err(_) => panic!("worker did not answer"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;
    use crate::data::{MockBookmarkService, MockRepoService, MockToolService};
    use crate::storage::Options as StoreOptions;
    use tempfile::tempdir;

    fn model_with(store: Option<Arc<Store>>, clipboard: &str) -> Model {
        let bookmarks = Arc::new(MockBookmarkService::sample());
        let mut model = Model::new(Options {
            config: Config::default(),
            bookmarks: bookmarks.clone(),
            repos: Arc::new(MockRepoService::new(bookmarks)),
            tools: Arc::new(MockToolService),
            store,
            clipboard: Box::new(MemoryClipboard::with_text(clipboard)),
            sort: SortOrder::Oldest,
            status_message: String::new(),
        });
        model.wait_idle();
        model
    }

    fn press(model: &mut Model, keys: &str) {
        for ch in keys.chars() {
            model.handle_key(&KeyPress::char(ch)).unwrap();
        }
    }

    #[test]
    fn loads_sample_repository() {
        let model = model_with(None, "");
        assert_eq!(model.nav.cards().len(), 5);
        assert_eq!(model.nav.cursor(), None);
        assert!(!model.tags.is_empty());
    }

    #[test]
    fn moves_past_the_end_and_clamps() {
        let mut model = model_with(None, "");
        press(&mut model, "jjjjjjj");
        assert_eq!(model.nav.cursor(), Some(4));
    }

    #[test]
    fn two_phase_delete_removes_bookmark() {
        let mut model = model_with(None, "");
        press(&mut model, "j");
        press(&mut model, "D");
        assert!(model.nav.cards().get(0).unwrap().is_confirming());
        press(&mut model, "D");
        model.wait_idle();
        assert_eq!(model.library.total(), 4);
        assert_eq!(model.nav.cards().len(), 4);
    }

    #[test]
    fn enter_opens_detail_and_escape_closes() {
        let mut model = model_with(None, "");
        press(&mut model, "j");
        model.handle_key(&KeyPress::named("Enter")).unwrap();
        let id = model.nav.current().unwrap().id;
        assert_eq!(model.modals.current(), Some(Surface::Detail(id)));
        press(&mut model, "j");
        assert_eq!(model.modals.scroll_offset(Surface::Detail(id)), 3);
        assert_eq!(model.nav.cursor(), Some(0));
        model.handle_key(&KeyPress::named("Escape")).unwrap();
        assert_eq!(model.modals.current(), None);
    }

    #[test]
    fn paste_opens_form_and_escape_blurs_before_closing() {
        let mut model = model_with(None, "https://example.org/article");
        press(&mut model, "P");
        assert_eq!(model.modals.current(), Some(Surface::NewBookmark));
        assert!(model.input_focused);
        assert!(model.nav.is_insert_mode());
        let form = model.form.as_ref().unwrap();
        assert_eq!(form.field(FormField::Url).value(), "https://example.org/article");

        press(&mut model, "q");
        assert_eq!(model.modals.current(), Some(Surface::NewBookmark));

        model.handle_key(&KeyPress::named("Escape")).unwrap();
        assert!(!model.input_focused);
        assert_eq!(model.modals.current(), Some(Surface::NewBookmark));
        model.handle_key(&KeyPress::named("Escape")).unwrap();
        assert_eq!(model.modals.current(), None);
        assert!(model.form.is_none());
    }

    #[test]
    fn new_bookmark_is_created_and_listed() {
        let mut model = model_with(None, "https://example.org/new");
        press(&mut model, "P");
        model.handle_key(&KeyPress::char('s').with_ctrl()).unwrap();
        model.wait_idle();
        assert_eq!(model.modals.current(), None);
        assert_eq!(model.library.total(), 6);
    }

    #[test]
    fn search_filters_cards_live() {
        let mut model = model_with(None, "");
        press(&mut model, "/");
        assert!(model.search_focused);
        press(&mut model, "rust");
        assert_eq!(model.nav.cards().len(), 3);
        model.handle_key(&KeyPress::named("Enter")).unwrap();
        assert!(!model.search_focused);
        assert!(!model.nav.is_insert_mode());
    }

    #[test]
    fn hash_prefix_filters_by_tag() {
        let mut model = model_with(None, "");
        press(&mut model, "/");
        press(&mut model, "#tui");
        assert_eq!(model.nav.cards().len(), 1);
        assert_eq!(model.library.tag(), Some("tui"));
        assert_eq!(model.library.query(), "");

        for _ in 0..3 {
            model.handle_key(&KeyPress::named("Backspace")).unwrap();
        }
        press(&mut model, "rus");
        model.handle_key(&KeyPress::named("Tab")).unwrap();
        assert_eq!(model.search.value(), "#rust");
        assert_eq!(model.nav.cards().len(), 3);

        for _ in 0..5 {
            model.handle_key(&KeyPress::named("Backspace")).unwrap();
        }
        press(&mut model, "hacker");
        assert_eq!(model.library.tag(), None);
        assert_eq!(model.nav.cards().len(), 1);
    }

    #[test]
    fn paste_without_url_only_reports() {
        let mut model = model_with(None, "not a url");
        press(&mut model, "P");
        assert_eq!(model.modals.current(), None);
        assert!(model.form.is_none());
        assert!(!model.input_focused);
        assert_eq!(model.status_message, "Clipboard does not contain a URL");
    }

    #[test]
    fn detail_delete_after_window_rearms() {
        let mut model = model_with(None, "");
        press(&mut model, "j");
        model.handle_key(&KeyPress::named("Enter")).unwrap();
        let id = model.nav.current().unwrap().id;
        let t0 = Instant::now();
        model.handle_key_at(&KeyPress::char('D'), t0).unwrap();
        assert!(model.nav.cards().get(0).unwrap().is_confirming());

        model
            .handle_key_at(&KeyPress::char('D'), t0 + Duration::from_millis(3100))
            .unwrap();
        assert_eq!(model.in_flight, 0);
        assert_eq!(model.library.total(), 5);
        assert!(model.nav.cards().get(0).unwrap().is_confirming());
        assert_eq!(model.modals.current(), Some(Surface::Detail(id)));
    }

    #[test]
    fn settings_toggles_persist() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            Store::open(StoreOptions {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let mut model = model_with(Some(store.clone()), "");
        press(&mut model, "S");
        assert_eq!(model.modals.current(), Some(Surface::Settings));
        model.handle_key(&KeyPress::named("Enter")).unwrap();
        assert!(!model.vim_mode);
        press(&mut model, "jj");
        model.handle_key(&KeyPress::named("Enter")).unwrap();
        assert_eq!(model.theme, ThemeMode::Light);

        let prefs = store.load_preferences().unwrap();
        assert_eq!(prefs.vim_mode, Some(false));
        assert_eq!(prefs.theme_mode, Some(ThemeMode::Light));
    }

    #[test]
    fn sort_menu_applies_order() {
        let mut model = model_with(None, "");
        press(&mut model, "s");
        assert_eq!(model.sort_menu, Some(SortOrder::Oldest.index()));
        press(&mut model, "k");
        model.handle_key(&KeyPress::named("Enter")).unwrap();
        assert_eq!(model.library.sort(), SortOrder::Newest);
        assert!(model.sort_menu.is_none());
    }

    #[test]
    fn repositories_create_and_switch() {
        let mut model = model_with(None, "");
        press(&mut model, "r");
        model.wait_idle();
        assert_eq!(model.repos.len(), 1);
        press(&mut model, "n");
        press(&mut model, "work");
        model.handle_key(&KeyPress::named("Enter")).unwrap();
        model.wait_idle();
        assert_eq!(model.modals.current(), Some(Surface::Repositories));
        assert_eq!(model.repos.len(), 2);
        let work = model.repos.iter().position(|r| r.name == "work").unwrap();
        model.repo_cursor = work;
        model.handle_key(&KeyPress::named("Enter")).unwrap();
        model.wait_idle();
        assert_eq!(model.repo, "work");
        assert_eq!(model.library.total(), 0);
    }

    #[test]
    fn compact_cards_are_single_line() {
        let bookmark = Bookmark {
            id: 1,
            url: "https://example.com".into(),
            title: "Example".into(),
            ..Bookmark::default()
        };
        let now = Utc::now();
        assert_eq!(card_lines(&bookmark, CardState::Idle, false, true, now, DARK).len(), 1);
        assert_eq!(card_lines(&bookmark, CardState::Idle, false, false, now, DARK).len(), 3);
    }

    #[test]
    fn mouse_closes_surface_from_button_or_backdrop() {
        let mut model = model_with(None, "");
        press(&mut model, "?");
        assert_eq!(model.modals.current(), Some(Surface::Help));
        let popup = Rect::new(10, 5, 40, 20);
        model.popup_area = Some(popup);
        let click = |column, row| MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column,
            row,
            modifiers: crossterm::event::KeyModifiers::NONE,
        };

        model.handle_mouse(click(20, 10));
        assert_eq!(model.modals.current(), Some(Surface::Help));
        let button = close_button_area(popup);
        assert_eq!(button.right(), popup.right() - 1);
        model.handle_mouse(click(button.x + 1, button.y));
        assert_eq!(model.modals.current(), None);

        press(&mut model, "?");
        model.handle_mouse(click(2, 2));
        assert_eq!(model.modals.current(), None);
    }

    #[test]
    fn centered_rect_stays_inside() {
        let area = Rect::new(0, 0, 100, 40);
        let popup = centered_rect(50, 50, area);
        assert!(popup.x >= 25 && popup.right() <= 75);
        assert!(popup.y >= 10 && popup.bottom() <= 30);
    }
}
