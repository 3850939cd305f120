use std::collections::HashMap;

use crate::api::{ApiError, Id, Post, Profile};
use crate::data::Services;
use crate::loading::Ticket;
use crate::media::Preloader;

pub const FEED_ERROR_MESSAGE: &str = "Failed to fetch posts. Please try again later.";
pub const NO_MATCHES_MESSAGE: &str = "No posts found matching your search.";

#[derive(Debug, Clone, PartialEq)]
pub enum FeedState {
    Loading,
    Ready { posts: Vec<Post>, filtered: Vec<Post> },
    Error(String),
}

/// Author and comment count shown on a post card. Either may be missing
/// when its request failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardDetails {
    pub author: Option<Profile>,
    pub comment_count: Option<usize>,
}

/// Post list screen: all posts fetched once, filtered by title as the
/// search term changes.
pub struct FeedView {
    state: FeedState,
    search: String,
    selected: usize,
    details: HashMap<Id, CardDetails>,
    pending_load: Option<Ticket>,
    pending_details: Option<Ticket>,
}

impl Default for FeedView {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedView {
    pub fn new() -> Self {
        Self {
            state: FeedState::Loading,
            search: String::new(),
            selected: 0,
            details: HashMap::new(),
            pending_load: None,
            pending_details: None,
        }
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, FeedState::Loading)
    }

    pub fn begin_load(&mut self, ticket: Ticket) {
        if let Some(previous) = self.pending_load.replace(ticket) {
            previous.cancel();
        }
        self.state = FeedState::Loading;
    }

    /// Applies the result of the load identified by `request_id`. Returns
    /// false when the response is stale and was dropped.
    pub fn finish_load(&mut self, request_id: u64, result: Result<Vec<Post>, ApiError>) -> bool {
        match &self.pending_load {
            Some(ticket) if ticket.accepts(request_id) => {}
            _ => return false,
        }
        self.pending_load = None;

        self.state = match result {
            Ok(posts) => {
                let filtered = filter_posts(&posts, &self.search);
                FeedState::Ready { posts, filtered }
            }
            Err(err) => {
                tracing::error!(error = %err, "feed: failed to load posts");
                FeedState::Error(FEED_ERROR_MESSAGE.to_string())
            }
        };
        self.clamp_selection();
        true
    }

    pub fn begin_details(&mut self, ticket: Ticket) {
        if let Some(previous) = self.pending_details.replace(ticket) {
            previous.cancel();
        }
    }

    pub fn finish_details(&mut self, request_id: u64, details: HashMap<Id, CardDetails>) -> bool {
        match &self.pending_details {
            Some(ticket) if ticket.accepts(request_id) => {}
            _ => return false,
        }
        self.pending_details = None;
        self.details.extend(details);
        true
    }

    pub fn details_for(&self, id: &Id) -> Option<&CardDetails> {
        self.details.get(id)
    }

    /// True when the view shows Loading but nothing is in flight, as after
    /// leaving the list before the first load finished.
    pub fn needs_load(&self) -> bool {
        self.is_loading() && self.pending_load.is_none()
    }

    pub fn needs_details(&self) -> bool {
        self.pending_details.is_none()
            && self
                .posts()
                .iter()
                .any(|post| !self.details.contains_key(&post.id))
    }

    /// Cancels in-flight requests so their responses are ignored.
    pub fn cancel_pending(&mut self) {
        for ticket in [self.pending_load.take(), self.pending_details.take()]
            .into_iter()
            .flatten()
        {
            ticket.cancel();
        }
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
        self.refilter();
    }

    pub fn push_search_char(&mut self, ch: char) {
        self.search.push(ch);
        self.refilter();
    }

    pub fn pop_search_char(&mut self) {
        if self.search.pop().is_some() {
            self.refilter();
        }
    }

    pub fn posts(&self) -> &[Post] {
        match &self.state {
            FeedState::Ready { posts, .. } => posts,
            _ => &[],
        }
    }

    pub fn filtered(&self) -> &[Post] {
        match &self.state {
            FeedState::Ready { filtered, .. } => filtered,
            _ => &[],
        }
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_post(&self) -> Option<&Post> {
        self.filtered().get(self.selected)
    }

    pub fn move_selection(&mut self, delta: i32) {
        let len = self.filtered().len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        let next = self.selected as i64 + delta as i64;
        self.selected = next.clamp(0, len as i64 - 1) as usize;
    }

    fn refilter(&mut self) {
        if let FeedState::Ready { posts, filtered } = &mut self.state {
            *filtered = filter_posts(posts, &self.search);
        }
        self.clamp_selection();
    }

    fn clamp_selection(&mut self) {
        let len = self.filtered().len();
        self.selected = self.selected.min(len.saturating_sub(1));
    }
}

/// Posts whose title contains `term`, ignoring case, in their original
/// order. An empty term keeps every post.
pub fn filter_posts(posts: &[Post], term: &str) -> Vec<Post> {
    if term.is_empty() {
        return posts.to_vec();
    }
    let needle = term.to_lowercase();
    posts
        .iter()
        .filter(|post| post.title.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Fetches every post, then preloads their thumbnails. Preload failures are
/// logged and do not fail the load.
pub fn load_feed(services: &Services, preloader: &Preloader) -> Result<Vec<Post>, ApiError> {
    let posts = services.posts.list_posts()?;
    tracing::info!(count = posts.len(), "feed: posts loaded");
    if let Err(err) = preloader.preload(posts.iter().map(|post| post.thumbnail.as_str())) {
        tracing::warn!(error = %err, "feed: thumbnails not fully preloaded");
    }
    Ok(posts)
}

/// Best-effort author and comment count for each post. Each distinct author
/// is fetched once.
pub fn load_card_details(services: &Services, posts: &[Post]) -> HashMap<Id, CardDetails> {
    let mut authors: HashMap<Id, Option<Profile>> = HashMap::new();
    let mut details = HashMap::with_capacity(posts.len());

    for post in posts {
        let author = authors
            .entry(post.author_id.clone())
            .or_insert_with(|| match services.profiles.get_profile(&post.author_id) {
                Ok(profile) => Some(profile),
                Err(err) => {
                    tracing::debug!(author = %post.author_id, error = %err, "feed: author unavailable");
                    None
                }
            })
            .clone();
        let comment_count = match services.comments.list_comments(&post.id) {
            Ok(comments) => Some(comments.len()),
            Err(err) => {
                tracing::debug!(post = %post.id, error = %err, "feed: comment count unavailable");
                None
            }
        };
        details.insert(
            post.id.clone(),
            CardDetails {
                author,
                comment_count,
            },
        );
    }
    details
}
