use std::collections::HashMap;
use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;
use url::Url;

use crate::api::{ApiError, Id, Post};
use crate::data::Services;
use crate::detail::{self, CommentEntry, DetailState, DetailView, PostPage, SubmitOutcome};
use crate::feed::{self, CardDetails, FeedState, FeedView, NO_MATCHES_MESSAGE};
use crate::format;
use crate::loading::{LoadingCounter, Ticket};
use crate::media::Preloader;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(203, 166, 247);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(203, 166, 247);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const SEARCH_PLACEHOLDER: &str = "Search posts...";
const COMMENT_PLACEHOLDER: &str = "Share your thoughts...";
const NO_COMMENTS_MESSAGE: &str = "No comments yet. Be the first to share your thoughts!";
const EXCERPT_LINES: usize = 2;

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

enum Screen {
    Feed,
    Detail(DetailView),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Normal,
    Search,
    Compose,
}

enum AsyncResponse {
    Feed {
        request_id: u64,
        result: Result<Vec<Post>, ApiError>,
    },
    CardDetails {
        request_id: u64,
        details: HashMap<Id, CardDetails>,
    },
    Detail {
        request_id: u64,
        result: Result<PostPage, ApiError>,
    },
    Comment {
        request_id: u64,
        result: Result<CommentEntry, ApiError>,
    },
}

fn wrap_with_prefixes(
    text: &str,
    width: usize,
    first_prefix: &str,
    rest_prefix: &str,
    style: Style,
) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return vec![Line::from(Span::styled(String::new(), style))];
    }

    let min_width = first_prefix
        .chars()
        .count()
        .max(rest_prefix.chars().count())
        .saturating_add(1);
    let options = WrapOptions::new(width.max(min_width))
        .break_words(true)
        .initial_indent(first_prefix)
        .subsequent_indent(rest_prefix);

    wrap(text, options)
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

fn wrap_plain(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    wrap_with_prefixes(text, width, "", "", style)
}

fn wrap_with_prefix(text: &str, width: usize, prefix: &str, style: Style) -> Vec<Line<'static>> {
    wrap_with_prefixes(text, width, prefix, prefix, style)
}

fn pad_lines_to_width(lines: &mut [Line<'static>], width: u16) {
    let width = width as usize;
    if width == 0 {
        return;
    }

    for line in lines {
        let current_width: usize = line
            .spans
            .iter()
            .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
            .sum();
        if current_width >= width {
            continue;
        }
        let pad_style = line.spans.last().map(|span| span.style).unwrap_or_default();
        line.spans
            .push(Span::styled(" ".repeat(width - current_width), pad_style));
    }
}

fn image_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(str::to_string)
        })
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| "image".to_string())
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    let border_style = if focused {
        Style::default().fg(COLOR_BORDER_FOCUSED)
    } else {
        Style::default().fg(COLOR_BORDER_IDLE)
    };
    let title_style = if focused {
        Style::default()
            .fg(COLOR_ACCENT)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(COLOR_TEXT_SECONDARY)
    };
    Block::default()
        .title(Span::styled(title, title_style))
        .borders(Borders::ALL)
        .border_style(border_style)
        .style(Style::default().bg(COLOR_PANEL_BG))
        .padding(Padding::horizontal(1))
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("1 {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// One card in the post list: title, meta line, excerpt and byline.
fn post_card_lines(
    post: &Post,
    details: Option<&CardDetails>,
    width: usize,
    words_per_minute: usize,
    selected: bool,
) -> Vec<Line<'static>> {
    let bg = if selected {
        COLOR_PANEL_SELECTED_BG
    } else {
        COLOR_PANEL_BG
    };
    let title_style = Style::default()
        .fg(if selected { COLOR_ACCENT } else { COLOR_TEXT_PRIMARY })
        .bg(bg)
        .add_modifier(Modifier::BOLD);
    let secondary = Style::default().fg(COLOR_TEXT_SECONDARY).bg(bg);
    let body = Style::default().fg(COLOR_TEXT_PRIMARY).bg(bg);

    let mut lines = wrap_plain(&post.title, width, title_style);
    lines.push(Line::from(Span::styled(
        format!(
            "{} · {} · {} min read",
            format::category(post),
            format::short_date(&post.created_at),
            format::read_time_minutes(&post.content, words_per_minute)
        ),
        secondary,
    )));

    let excerpt = post.excerpt.as_deref().unwrap_or(&post.content);
    if !excerpt.trim().is_empty() {
        let mut wrapped = wrap_plain(excerpt, width, body);
        if wrapped.len() > EXCERPT_LINES {
            wrapped.truncate(EXCERPT_LINES);
            if let Some(last) = wrapped.last_mut() {
                last.spans.push(Span::styled("…", body));
            }
        }
        lines.extend(wrapped);
    }

    let mut byline = Vec::new();
    if let Some(details) = details {
        if let Some(author) = &details.author {
            byline.push(format!("by {}", author.name));
        }
        if let Some(count) = details.comment_count {
            byline.push(plural(count, "comment"));
        }
    }
    lines.push(Line::from(Span::styled(byline.join(" · "), secondary)));
    lines.push(Line::from(Span::styled(String::new(), body)));
    lines
}

/// Full post page: header, content, then the comment thread.
fn page_lines(
    page: &PostPage,
    width: usize,
    words_per_minute: usize,
    now: DateTime<Utc>,
) -> Vec<Line<'static>> {
    let primary = Style::default().fg(COLOR_TEXT_PRIMARY);
    let secondary = Style::default().fg(COLOR_TEXT_SECONDARY);
    let post = &page.post;

    let mut lines = wrap_plain(
        &post.title,
        width,
        Style::default()
            .fg(COLOR_ACCENT)
            .add_modifier(Modifier::BOLD),
    );
    let meta = format!(
        "{} · By {} · {} · {} min read · {}",
        format::category(post),
        page.author.name,
        format::long_date(&post.created_at),
        format::read_time_minutes(&post.content, words_per_minute),
        plural(page.comments.len(), "comment")
    );
    lines.extend(wrap_plain(&meta, width, secondary));
    if !post.thumbnail.is_empty() {
        lines.push(Line::from(Span::styled(
            format!("[image: {}]", image_label(&post.thumbnail)),
            secondary.add_modifier(Modifier::ITALIC),
        )));
    }
    lines.push(Line::default());

    for paragraph in post.content.lines() {
        if paragraph.trim().is_empty() {
            lines.push(Line::default());
        } else {
            lines.extend(wrap_plain(paragraph, width, primary));
        }
    }
    lines.push(Line::default());

    lines.push(Line::from(Span::styled(
        format!("Comments ({})", page.comments.len()),
        Style::default()
            .fg(COLOR_TEXT_PRIMARY)
            .add_modifier(Modifier::BOLD),
    )));
    if page.comments.is_empty() {
        lines.push(Line::from(Span::styled(NO_COMMENTS_MESSAGE, secondary)));
    }
    for entry in &page.comments {
        lines.push(Line::from(vec![
            Span::styled(
                entry.author_name().to_string(),
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" · {}", format::relative_time(&entry.comment.created_at, &now)),
                secondary,
            ),
        ]));
        lines.extend(wrap_with_prefix(&entry.comment.text, width, "  ", primary));
        lines.push(Line::default());
    }
    lines
}

pub struct Options {
    pub services: Services,
    pub preloader: Arc<Preloader>,
    pub loading: LoadingCounter,
    /// Comments are posted as this user.
    pub user_id: Id,
    pub words_per_minute: usize,
    /// Open this post instead of the list.
    pub initial_post: Option<Id>,
    /// Shown in the status line, e.g. the API base URL.
    pub source: String,
}

pub struct Model {
    services: Services,
    preloader: Arc<Preloader>,
    loading: LoadingCounter,
    user_id: Id,
    words_per_minute: usize,
    source: String,
    feed: FeedView,
    screen: Screen,
    mode: InputMode,
    detail_scroll: u16,
    detail_max_scroll: u16,
    status_message: String,
    flash: Option<String>,
    spinner: Spinner,
    needs_redraw: bool,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let mut model = Self {
            services: options.services,
            preloader: options.preloader,
            loading: options.loading,
            user_id: options.user_id,
            words_per_minute: options.words_per_minute,
            source: options.source,
            feed: FeedView::new(),
            screen: Screen::Feed,
            mode: InputMode::Normal,
            detail_scroll: 0,
            detail_max_scroll: 0,
            status_message: String::new(),
            flash: None,
            spinner: Spinner::new(),
            needs_redraw: true,
            response_tx,
            response_rx,
            next_request_id: 1,
        };

        match options.initial_post {
            Some(post_id) => model.open_post(post_id),
            None => model.start_feed_load(),
        }
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
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
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key) {
                            break;
                        }
                        self.mark_dirty();
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.loading.is_busy()
    }

    fn next_ticket(&mut self) -> Ticket {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        Ticket::new(request_id)
    }

    /// Runs `job` on a background thread while holding a loading guard. The
    /// response is sent only if the ticket is still live when the job ends.
    fn spawn_worker<F>(&self, ticket: Ticket, job: F)
    where
        F: FnOnce() -> AsyncResponse + Send + 'static,
    {
        let guard = self.loading.begin();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let _guard = guard;
            if ticket.is_cancelled() {
                return;
            }
            let response = job();
            if !ticket.is_cancelled() {
                let _ = tx.send(response);
            }
        });
    }

    fn start_feed_load(&mut self) {
        let ticket = self.next_ticket();
        self.feed.begin_load(ticket.clone());
        self.status_message = format!("Loading posts from {}…", self.source);

        let request_id = ticket.request_id();
        let services = self.services.clone();
        let preloader = self.preloader.clone();
        self.spawn_worker(ticket, move || AsyncResponse::Feed {
            request_id,
            result: feed::load_feed(&services, &preloader),
        });
    }

    fn start_card_details(&mut self) {
        let posts = self.feed.posts().to_vec();
        if posts.is_empty() {
            return;
        }
        let ticket = self.next_ticket();
        self.feed.begin_details(ticket.clone());

        let request_id = ticket.request_id();
        let services = self.services.clone();
        self.spawn_worker(ticket, move || AsyncResponse::CardDetails {
            request_id,
            details: feed::load_card_details(&services, &posts),
        });
    }

    fn open_post(&mut self, post_id: Id) {
        self.feed.cancel_pending();
        let ticket = self.next_ticket();
        let mut view = DetailView::new(post_id.clone());
        view.begin_load(ticket.clone());
        self.screen = Screen::Detail(view);
        self.mode = InputMode::Normal;
        self.detail_scroll = 0;
        self.flash = None;
        self.status_message = format!("Loading post {post_id}…");
        tracing::debug!(post = %post_id, "ui: opening post");

        let request_id = ticket.request_id();
        let services = self.services.clone();
        let preloader = self.preloader.clone();
        self.spawn_worker(ticket, move || AsyncResponse::Detail {
            request_id,
            result: detail::load_page(&services, &preloader, &post_id),
        });
    }

    fn show_feed(&mut self, flash: Option<String>) {
        if let Screen::Detail(view) = &mut self.screen {
            view.cancel_pending();
        }
        self.screen = Screen::Feed;
        self.mode = InputMode::Normal;
        self.flash = flash;

        if self.feed.needs_load() {
            self.start_feed_load();
            return;
        }
        if self.feed.needs_details() {
            self.start_card_details();
        }
        self.status_message = self.feed_status();
    }

    fn feed_status(&self) -> String {
        match self.feed.state() {
            FeedState::Loading => format!("Loading posts from {}…", self.source),
            FeedState::Ready { posts, filtered } => {
                if self.feed.search().is_empty() {
                    format!("{} · {}", plural(posts.len(), "post"), self.source)
                } else {
                    format!(
                        "{} of {} match \"{}\"",
                        filtered.len(),
                        plural(posts.len(), "post"),
                        self.feed.search()
                    )
                }
            }
            FeedState::Error(_) => format!("Could not load posts from {}", self.source),
        }
    }

    fn submit_comment(&mut self) {
        let ticket = self.next_ticket();
        let Screen::Detail(view) = &mut self.screen else {
            return;
        };
        match view.prepare_submission(ticket.clone(), &self.user_id, Utc::now()) {
            Ok(draft) => {
                self.status_message = "Posting comment…".to_string();
                let request_id = ticket.request_id();
                let services = self.services.clone();
                self.spawn_worker(ticket, move || AsyncResponse::Comment {
                    request_id,
                    result: detail::submit_comment(&services, &draft),
                });
            }
            Err(err) => {
                self.status_message = err.to_string();
            }
        }
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Feed { request_id, result } => {
                if !self.feed.finish_load(request_id, result) {
                    return;
                }
                if matches!(self.screen, Screen::Feed) {
                    self.status_message = self.feed_status();
                }
                if self.feed.needs_details() {
                    self.start_card_details();
                }
            }
            AsyncResponse::CardDetails {
                request_id,
                details,
            } => {
                self.feed.finish_details(request_id, details);
            }
            AsyncResponse::Detail { request_id, result } => {
                let Screen::Detail(view) = &mut self.screen else {
                    return;
                };
                if !view.finish_load(request_id, result) {
                    return;
                }
                self.status_message = match view.state() {
                    DetailState::Ready(page) => format!(
                        "{} · {}",
                        page.post.title,
                        plural(page.comments.len(), "comment")
                    ),
                    DetailState::Error(_) => "Could not load post".to_string(),
                    DetailState::Loading => self.status_message.clone(),
                };
            }
            AsyncResponse::Comment { request_id, result } => {
                let Screen::Detail(view) = &mut self.screen else {
                    return;
                };
                match view.finish_submission(request_id, result) {
                    SubmitOutcome::Appended => {
                        self.mode = InputMode::Normal;
                        self.detail_scroll = u16::MAX;
                        self.status_message = "Comment posted.".to_string();
                    }
                    SubmitOutcome::Redirect(message) => self.show_feed(Some(message)),
                    SubmitOutcome::Retained(message) => self.status_message = message,
                    SubmitOutcome::Misfiled(message) => {
                        self.mode = InputMode::Normal;
                        self.status_message = message;
                    }
                    SubmitOutcome::Ignored => {}
                }
            }
        }
    }

    /// Returns true when the app should quit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return true;
        }
        // A flash lasts until the next key.
        self.flash = None;

        let on_feed = matches!(self.screen, Screen::Feed);
        match (on_feed, self.mode) {
            (true, InputMode::Search) => self.handle_search_key(key.code),
            (true, _) => return self.handle_feed_key(key.code),
            (false, InputMode::Compose) => self.handle_compose_key(key.code),
            (false, _) => return self.handle_detail_key(key.code),
        }
        false
    }

    fn handle_feed_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('j') | KeyCode::Down => self.feed.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.feed.move_selection(-1),
            KeyCode::Char('/') => self.mode = InputMode::Search,
            KeyCode::Esc if !self.feed.search().is_empty() => {
                self.feed.set_search("");
                self.status_message = self.feed_status();
            }
            KeyCode::Enter => {
                if let Some(post) = self.feed.selected_post() {
                    let id = post.id.clone();
                    self.open_post(id);
                }
            }
            _ => {}
        }
        false
    }

    fn handle_search_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc | KeyCode::Enter => self.mode = InputMode::Normal,
            KeyCode::Backspace => self.feed.pop_search_char(),
            KeyCode::Down => self.feed.move_selection(1),
            KeyCode::Up => self.feed.move_selection(-1),
            KeyCode::Char(ch) => self.feed.push_search_char(ch),
            _ => return,
        }
        self.status_message = self.feed_status();
    }

    fn handle_detail_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') => return true,
            KeyCode::Esc | KeyCode::Backspace | KeyCode::Char('h') => self.show_feed(None),
            KeyCode::Char('j') | KeyCode::Down => {
                self.detail_scroll = self.detail_scroll.saturating_add(1).min(self.detail_max_scroll);
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.detail_scroll = self.detail_scroll.saturating_sub(1);
            }
            KeyCode::PageDown | KeyCode::Char(' ') => {
                self.detail_scroll = self.detail_scroll.saturating_add(10).min(self.detail_max_scroll);
            }
            KeyCode::PageUp => self.detail_scroll = self.detail_scroll.saturating_sub(10),
            KeyCode::Char('c') => {
                if let Screen::Detail(view) = &self.screen {
                    if view.page().is_some() {
                        self.mode = InputMode::Compose;
                    }
                }
            }
            _ => {}
        }
        false
    }

    fn handle_compose_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => self.mode = InputMode::Normal,
            KeyCode::Enter => self.submit_comment(),
            KeyCode::Backspace => {
                if let Screen::Detail(view) = &mut self.screen {
                    view.pop_draft_char();
                }
            }
            KeyCode::Char(ch) => {
                if let Screen::Detail(view) = &mut self.screen {
                    view.push_draft_char(ch);
                }
            }
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let (status_text, status_color) = match &self.flash {
            Some(flash) => (flash.clone(), COLOR_ERROR),
            None if self.is_loading() => (
                format!("{} {}", self.spinner.frame(), self.status_message),
                COLOR_TEXT_PRIMARY,
            ),
            None => (self.status_message.clone(), COLOR_TEXT_PRIMARY),
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(status_color)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        if matches!(self.screen, Screen::Feed) {
            self.draw_feed(frame, layout[1]);
        } else {
            self.draw_detail(frame, layout[1]);
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);
    }

    fn draw_feed(&self, frame: &mut Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(area);

        let searching = self.mode == InputMode::Search;
        let search_block = pane_block("Search".to_string(), searching);
        let search_inner = search_block.inner(chunks[0]);
        let search_line = if self.feed.search().is_empty() && !searching {
            Line::from(Span::styled(
                SEARCH_PLACEHOLDER,
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))
        } else {
            Line::from(Span::styled(
                self.feed.search().to_string(),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            ))
        };
        frame.render_widget(Paragraph::new(search_line).block(search_block), chunks[0]);
        if searching {
            let offset = UnicodeWidthStr::width(self.feed.search()) as u16;
            frame.set_cursor(
                (search_inner.x + offset).min(search_inner.right().saturating_sub(1)),
                search_inner.y,
            );
        }

        let title = match self.feed.state() {
            FeedState::Ready { posts, filtered } if filtered.len() != posts.len() => {
                format!("Posts ({}/{})", filtered.len(), posts.len())
            }
            FeedState::Ready { posts, .. } => format!("Posts ({})", posts.len()),
            _ => "Posts".to_string(),
        };
        let block = pane_block(title, !searching);
        let inner = block.inner(chunks[1]);
        let width = inner.width.max(1) as usize;

        let message = |text: String, color: Color| {
            Paragraph::new(text)
                .style(Style::default().fg(color))
                .wrap(Wrap { trim: true })
                .block(block.clone())
        };

        match self.feed.state() {
            FeedState::Loading => frame.render_widget(
                message(format!("{} Loading posts…", self.spinner.frame()), COLOR_ACCENT),
                chunks[1],
            ),
            FeedState::Error(error) => {
                frame.render_widget(message(error.clone(), COLOR_ERROR), chunks[1])
            }
            FeedState::Ready { filtered, .. } if filtered.is_empty() => frame.render_widget(
                message(NO_MATCHES_MESSAGE.to_string(), COLOR_TEXT_SECONDARY),
                chunks[1],
            ),
            FeedState::Ready { filtered, .. } => {
                let selected = self.feed.selected();
                let items: Vec<ListItem> = filtered
                    .iter()
                    .enumerate()
                    .map(|(idx, post)| {
                        let mut lines = post_card_lines(
                            post,
                            self.feed.details_for(&post.id),
                            width,
                            self.words_per_minute,
                            idx == selected,
                        );
                        if idx == selected {
                            pad_lines_to_width(&mut lines, inner.width);
                        }
                        ListItem::new(lines)
                    })
                    .collect();
                let mut state = ListState::default().with_selected(Some(selected));
                frame.render_stateful_widget(
                    List::new(items).block(block.clone()),
                    chunks[1],
                    &mut state,
                );
            }
        }
    }

    fn draw_detail(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let Screen::Detail(view) = &self.screen else {
            return;
        };
        let composing = self.mode == InputMode::Compose;
        let ready = view.page().is_some();

        let constraints = if ready {
            [Constraint::Min(0), Constraint::Length(3)]
        } else {
            [Constraint::Min(0), Constraint::Length(0)]
        };
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(area);

        let title = match view.page() {
            Some(page) => format::category(&page.post).to_string(),
            None => format!("Post {}", view.post_id()),
        };
        let block = pane_block(title, !composing);
        let inner = block.inner(chunks[0]);
        let width = inner.width.max(1) as usize;

        let lines = match view.state() {
            DetailState::Loading => vec![Line::from(Span::styled(
                format!("{} Loading post…", self.spinner.frame()),
                Style::default().fg(COLOR_ACCENT),
            ))],
            DetailState::Error(message) => {
                let mut lines = wrap_plain(message, width, Style::default().fg(COLOR_ERROR));
                lines.push(Line::default());
                lines.push(Line::from(Span::styled(
                    "Press Esc to go back to the list.",
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )));
                lines
            }
            DetailState::Ready(page) => page_lines(page, width, self.words_per_minute, Utc::now()),
        };

        let max_scroll = lines.len().saturating_sub(inner.height as usize);
        let max_scroll = u16::try_from(max_scroll).unwrap_or(u16::MAX);
        let scroll = self.detail_scroll.min(max_scroll);
        let content = Paragraph::new(Text::from(lines))
            .block(block)
            .scroll((scroll, 0));
        frame.render_widget(content, chunks[0]);

        if ready {
            let (draft_color, compose_title) = if view.is_submitting() {
                (COLOR_SUCCESS, "Posting…".to_string())
            } else {
                (COLOR_ACCENT, "Add a comment".to_string())
            };
            let compose_block = pane_block(compose_title, composing);
            let compose_inner = compose_block.inner(chunks[1]);
            let line = if view.draft().is_empty() && !composing {
                Line::from(Span::styled(
                    COMMENT_PLACEHOLDER,
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                ))
            } else {
                Line::from(Span::styled(
                    view.draft().to_string(),
                    Style::default().fg(if composing { draft_color } else { COLOR_TEXT_PRIMARY }),
                ))
            };
            let draft_width = UnicodeWidthStr::width(view.draft()) as u16;
            let visible = compose_inner.width.saturating_sub(1);
            let shift = draft_width.saturating_sub(visible);
            frame.render_widget(
                Paragraph::new(line).block(compose_block).scroll((0, shift)),
                chunks[1],
            );
            if composing {
                frame.set_cursor(
                    compose_inner.x + draft_width.min(visible),
                    compose_inner.y,
                );
            }
        }

        self.detail_max_scroll = max_scroll;
        self.detail_scroll = scroll;
    }

    fn footer_text(&self) -> String {
        match (&self.screen, self.mode) {
            (Screen::Feed, InputMode::Search) => {
                "Type to filter by title · ↑/↓ move · Enter/Esc done".to_string()
            }
            (Screen::Feed, _) => {
                "j/k move · / search · Enter open · Esc clear search · q quit".to_string()
            }
            (Screen::Detail(_), InputMode::Compose) => {
                "Type your comment · Enter post · Esc cancel".to_string()
            }
            (Screen::Detail(_), _) => {
                "j/k scroll · c comment · Esc back · q quit".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Comment, CommentDraft};
    use crate::data::{CommentService, MockBlog};
    use crate::media::ImageLoader;
    use ratatui::backend::TestBackend;

    struct NoopLoader;

    impl ImageLoader for NoopLoader {
        fn load(&self, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Lists comments normally but reports the post as gone on create.
    struct PostGoneOnCreate(Arc<MockBlog>);

    impl CommentService for PostGoneOnCreate {
        fn list_comments(&self, post_id: &Id) -> Result<Vec<Comment>, ApiError> {
            self.0.list_comments(post_id)
        }

        fn create_comment(&self, draft: &CommentDraft) -> Result<Comment, ApiError> {
            Err(ApiError::NotFound(format!("post {}", draft.post_id)))
        }
    }

    fn model_with(services: Services, initial_post: Option<Id>) -> Model {
        Model::new(Options {
            services,
            preloader: Arc::new(Preloader::new(Arc::new(NoopLoader), 1)),
            loading: LoadingCounter::new(),
            user_id: Id::from(1),
            words_per_minute: 200,
            initial_post,
            source: "demo".to_string(),
        })
    }

    fn settle(model: &mut Model) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let idle = !model.loading.is_busy();
            let changed = model.poll_async();
            if idle && !changed && !model.loading.is_busy() {
                return;
            }
            assert!(Instant::now() < deadline, "background work did not settle");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn press(model: &mut Model, code: KeyCode) -> bool {
        model.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(model: &mut Model, text: &str) {
        for ch in text.chars() {
            press(model, KeyCode::Char(ch));
        }
    }

    fn rendered(model: &mut Model) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 40)).unwrap();
        terminal.draw(|frame| model.draw(frame)).unwrap();
        let buffer = terminal.backend().buffer();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer.get(x, y).symbol());
            }
            out.push('\n');
        }
        out
    }

    fn total_width(line: &Line<'_>) -> usize {
        line.spans
            .iter()
            .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
            .sum()
    }

    #[test]
    fn pad_lines_extends_to_width() {
        let mut lines = vec![Line::from(vec![Span::raw("abc")])];
        pad_lines_to_width(&mut lines, 6);
        assert_eq!(lines[0].spans.len(), 2);
        assert_eq!(total_width(&lines[0]), 6);
    }

    #[test]
    fn pad_lines_supports_wide_glyphs() {
        let mut lines = vec![Line::from(vec![Span::raw("🦀")])];
        pad_lines_to_width(&mut lines, 3);
        assert_eq!(total_width(&lines[0]), 3);
    }

    #[test]
    fn wrap_with_prefix_indents_every_line() {
        let lines = wrap_with_prefix("one two three four", 10, "  ", Style::default());
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line.spans[0].content.starts_with("  "));
            assert!(total_width(line) <= 10);
        }
    }

    #[test]
    fn image_label_uses_last_path_segment() {
        assert_eq!(image_label("https://img.example/a/cover.png"), "cover.png");
        assert_eq!(image_label("https://img.example/"), "image");
    }

    #[test]
    fn card_truncates_long_excerpts() {
        let post = Post {
            id: Id::from(1),
            title: "Short".into(),
            content: "word ".repeat(200),
            excerpt: None,
            thumbnail: String::new(),
            category: None,
            author_id: Id::from(1),
            created_at: Utc::now(),
        };
        let lines = post_card_lines(&post, None, 20, 200, false);
        // title, meta, two excerpt lines, byline, spacer
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn list_loads_and_filters_by_keystroke() {
        let mut model = model_with(Services::from_mock(Arc::new(MockBlog::sample())), None);
        settle(&mut model);
        assert_eq!(model.feed.filtered().len(), 3);

        let screen = rendered(&mut model);
        assert!(screen.contains("Hello World"));
        assert!(screen.contains("by Ada Lovelace"));

        press(&mut model, KeyCode::Char('/'));
        type_text(&mut model, "debug");
        assert_eq!(model.feed.filtered().len(), 1);
        press(&mut model, KeyCode::Enter);
        assert_eq!(model.mode, InputMode::Normal);

        type_text(&mut model, "zzz");
        assert_eq!(model.feed.search(), "debug");

        press(&mut model, KeyCode::Char('/'));
        type_text(&mut model, "zzz");
        assert!(rendered(&mut model).contains(NO_MATCHES_MESSAGE));
    }

    #[test]
    fn failed_list_shows_static_error() {
        let mut model = model_with(Services::from_mock(Arc::new(MockBlog::unavailable())), None);
        settle(&mut model);
        assert!(rendered(&mut model).contains(feed::FEED_ERROR_MESSAGE));
    }

    #[test]
    fn open_post_comment_and_return() {
        let blog = Arc::new(MockBlog::sample().with_next_comment_id(99));
        let mut model = model_with(Services::from_mock(blog.clone()), None);
        settle(&mut model);

        press(&mut model, KeyCode::Enter);
        settle(&mut model);
        let screen = rendered(&mut model);
        assert!(screen.contains("Hello World"));
        assert!(screen.contains("Grace Hopper"));

        press(&mut model, KeyCode::Char('c'));
        type_text(&mut model, "nice post");
        press(&mut model, KeyCode::Enter);
        settle(&mut model);

        let Screen::Detail(view) = &model.screen else {
            panic!("expected detail screen");
        };
        let last = &view.page().unwrap().comments.last().unwrap().comment;
        assert_eq!(last.id, Id::from(99));
        assert_eq!(view.draft(), "");
        assert_eq!(model.mode, InputMode::Normal);

        press(&mut model, KeyCode::Esc);
        assert!(matches!(model.screen, Screen::Feed));
        assert_eq!(model.feed.filtered().len(), 3);
    }

    #[test]
    fn blank_comment_is_not_sent() {
        let blog = Arc::new(MockBlog::sample());
        let mut model = model_with(Services::from_mock(blog.clone()), Some(Id::from(1)));
        settle(&mut model);

        press(&mut model, KeyCode::Char('c'));
        type_text(&mut model, "   ");
        press(&mut model, KeyCode::Enter);
        settle(&mut model);

        assert_eq!(blog.create_calls(), 0);
        assert_eq!(model.mode, InputMode::Compose);
    }

    #[test]
    fn missing_post_shows_detail_error() {
        let mut model = model_with(
            Services::from_mock(Arc::new(MockBlog::sample())),
            Some(Id::from(404)),
        );
        settle(&mut model);
        assert!(rendered(&mut model).contains(detail::DETAIL_ERROR_MESSAGE));
    }

    #[test]
    fn post_gone_on_submit_returns_to_list_with_message() {
        let blog = Arc::new(MockBlog::sample());
        let services = Services {
            comments: Arc::new(PostGoneOnCreate(blog.clone())),
            ..Services::from_mock(blog)
        };
        let mut model = model_with(services, Some(Id::from(2)));
        settle(&mut model);

        press(&mut model, KeyCode::Char('c'));
        type_text(&mut model, "hello?");
        press(&mut model, KeyCode::Enter);
        settle(&mut model);

        assert!(matches!(model.screen, Screen::Feed));
        assert_eq!(model.flash.as_deref(), Some(detail::POST_GONE_MESSAGE));
        assert!(rendered(&mut model).contains(detail::POST_GONE_MESSAGE));
        assert_eq!(model.feed.posts().len(), 3);
    }

    #[test]
    fn flash_clears_on_the_next_key() {
        let blog = Arc::new(MockBlog::sample());
        let services = Services {
            comments: Arc::new(PostGoneOnCreate(blog.clone())),
            ..Services::from_mock(blog)
        };
        let mut model = model_with(services, Some(Id::from(2)));
        settle(&mut model);
        press(&mut model, KeyCode::Char('c'));
        type_text(&mut model, "hello?");
        press(&mut model, KeyCode::Enter);
        settle(&mut model);
        assert!(model.flash.is_some());

        press(&mut model, KeyCode::Char('j'));

        assert!(model.flash.is_none());
        assert!(!rendered(&mut model).contains(detail::POST_GONE_MESSAGE));
        assert!(matches!(model.screen, Screen::Feed));
    }

    #[test]
    fn leaving_detail_drops_late_page() {
        let mut model = model_with(
            Services::from_mock(Arc::new(MockBlog::sample())),
            Some(Id::from(1)),
        );
        press(&mut model, KeyCode::Esc);
        settle(&mut model);
        assert!(matches!(model.screen, Screen::Feed));
        assert_eq!(model.feed.posts().len(), 3);
    }
}
