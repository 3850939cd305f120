use std::collections::HashMap;
use std::thread;

use chrono::{DateTime, Utc};

use crate::api::{ApiError, Comment, CommentDraft, Id, Post, Profile};
use crate::data::Services;
use crate::loading::Ticket;
use crate::media::Preloader;

pub const DETAIL_ERROR_MESSAGE: &str = "Failed to fetch post details. Please try again later.";
pub const POST_GONE_MESSAGE: &str = "That post is no longer available.";
pub const MISFILED_MESSAGE: &str =
    "Comment saved, but under a different post. It will not appear here.";
pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, PartialEq)]
pub struct CommentEntry {
    pub comment: Comment,
    pub author: Option<Profile>,
}

impl CommentEntry {
    pub fn author_name(&self) -> &str {
        self.author
            .as_ref()
            .map(|profile| profile.name.as_str())
            .unwrap_or(ANONYMOUS)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostPage {
    pub post: Post,
    pub author: Profile,
    pub comments: Vec<CommentEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetailState {
    Loading,
    Ready(PostPage),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The comment was appended and the input cleared.
    Appended,
    /// The post is gone; go back to the list and show the message.
    Redirect(String),
    /// The draft is kept for another attempt.
    Retained(String),
    /// The server stored the comment under a different post. The draft is
    /// cleared since resending would duplicate it.
    Misfiled(String),
    /// Stale response for a submission this view no longer waits on.
    Ignored,
}

/// One visit to a post's page. Owns the page data and the comment draft.
pub struct DetailView {
    post_id: Id,
    state: DetailState,
    draft: String,
    pending_load: Option<Ticket>,
    pending_submit: Option<Ticket>,
}

impl DetailView {
    pub fn new(post_id: Id) -> Self {
        Self {
            post_id,
            state: DetailState::Loading,
            draft: String::new(),
            pending_load: None,
            pending_submit: None,
        }
    }

    pub fn post_id(&self) -> &Id {
        &self.post_id
    }

    pub fn state(&self) -> &DetailState {
        &self.state
    }

    pub fn page(&self) -> Option<&PostPage> {
        match &self.state {
            DetailState::Ready(page) => Some(page),
            _ => None,
        }
    }

    pub fn begin_load(&mut self, ticket: Ticket) {
        if let Some(previous) = self.pending_load.replace(ticket) {
            previous.cancel();
        }
        self.state = DetailState::Loading;
    }

    pub fn finish_load(&mut self, request_id: u64, result: Result<PostPage, ApiError>) -> bool {
        match &self.pending_load {
            Some(ticket) if ticket.accepts(request_id) => {}
            _ => return false,
        }
        self.pending_load = None;

        self.state = match result {
            Ok(page) => DetailState::Ready(page),
            Err(err) => {
                tracing::error!(post = %self.post_id, error = %err, "detail: failed to load post");
                DetailState::Error(DETAIL_ERROR_MESSAGE.to_string())
            }
        };
        true
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn push_draft_char(&mut self, ch: char) {
        self.draft.push(ch);
    }

    pub fn pop_draft_char(&mut self) {
        self.draft.pop();
    }

    pub fn is_submitting(&self) -> bool {
        self.pending_submit.is_some()
    }

    /// Validates the draft and builds the request body. Blank drafts are
    /// rejected here so no request is made for them.
    pub fn prepare_submission(
        &mut self,
        ticket: Ticket,
        user_id: &Id,
        now: DateTime<Utc>,
    ) -> Result<CommentDraft, ApiError> {
        if self.pending_submit.is_some() {
            return Err(ApiError::Validation("a comment is already being posted".into()));
        }
        let DetailState::Ready(page) = &self.state else {
            return Err(ApiError::Validation("the post has not loaded yet".into()));
        };
        if self.draft.trim().is_empty() {
            return Err(ApiError::Validation("comment text is required".into()));
        }

        let draft = CommentDraft {
            post_id: page.post.id.clone(),
            user_id: user_id.clone(),
            text: self.draft.clone(),
            created_at: now,
        };
        self.pending_submit = Some(ticket);
        Ok(draft)
    }

    pub fn finish_submission(
        &mut self,
        request_id: u64,
        result: Result<CommentEntry, ApiError>,
    ) -> SubmitOutcome {
        match &self.pending_submit {
            Some(ticket) if ticket.accepts(request_id) => {}
            _ => return SubmitOutcome::Ignored,
        }
        self.pending_submit = None;

        match result {
            Ok(entry) => {
                let DetailState::Ready(page) = &mut self.state else {
                    return SubmitOutcome::Ignored;
                };
                if entry.comment.post_id != page.post.id {
                    tracing::warn!(
                        comment = %entry.comment.id,
                        post = %page.post.id,
                        "detail: created comment belongs to another post"
                    );
                    self.draft.clear();
                    return SubmitOutcome::Misfiled(MISFILED_MESSAGE.to_string());
                }
                page.comments.push(entry);
                self.draft.clear();
                SubmitOutcome::Appended
            }
            Err(err) if err.is_not_found() => {
                tracing::warn!(post = %self.post_id, "detail: post disappeared while commenting");
                SubmitOutcome::Redirect(POST_GONE_MESSAGE.to_string())
            }
            Err(err) => {
                tracing::error!(post = %self.post_id, error = %err, "detail: failed to add comment");
                SubmitOutcome::Retained(format!("Could not post comment: {err}"))
            }
        }
    }

    pub fn cancel_pending(&mut self) {
        for ticket in [self.pending_load.take(), self.pending_submit.take()]
            .into_iter()
            .flatten()
        {
            ticket.cancel();
        }
    }
}

/// Fetches the post and its comments concurrently, then the author, then
/// preloads the thumbnail and avatar. Any fetch failure fails the page;
/// commenter names and images are best-effort.
pub fn load_page(
    services: &Services,
    preloader: &Preloader,
    post_id: &Id,
) -> Result<PostPage, ApiError> {
    let (post, comments) = thread::scope(|scope| {
        let comments = scope.spawn(|| services.comments.list_comments(post_id));
        let post = services.posts.get_post(post_id);
        let comments = match comments.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        (post, comments)
    });
    let post = post?;
    let comments = comments?;
    let author = services.profiles.get_profile(&post.author_id)?;

    let comments: Vec<Comment> = comments
        .into_iter()
        .filter(|comment| comment.post_id == post.id)
        .collect();
    let comments = attach_commenters(services, comments, &author);

    if let Err(err) = preloader.preload([post.thumbnail.as_str(), author.image.as_str()]) {
        tracing::warn!(post = %post.id, error = %err, "detail: images not fully preloaded");
    }

    Ok(PostPage {
        post,
        author,
        comments,
    })
}

/// Creates the comment, then looks up the commenter for display.
pub fn submit_comment(services: &Services, draft: &CommentDraft) -> Result<CommentEntry, ApiError> {
    let comment = services.comments.create_comment(draft)?;
    let author = match services.profiles.get_profile(&comment.user_id) {
        Ok(profile) => Some(profile),
        Err(err) => {
            tracing::debug!(user = %comment.user_id, error = %err, "detail: commenter unavailable");
            None
        }
    };
    Ok(CommentEntry { comment, author })
}

fn attach_commenters(
    services: &Services,
    comments: Vec<Comment>,
    post_author: &Profile,
) -> Vec<CommentEntry> {
    let mut profiles: HashMap<Id, Option<Profile>> = HashMap::new();
    profiles.insert(post_author.id.clone(), Some(post_author.clone()));

    comments
        .into_iter()
        .map(|comment| {
            let author = profiles
                .entry(comment.user_id.clone())
                .or_insert_with(|| match services.profiles.get_profile(&comment.user_id) {
                    Ok(profile) => Some(profile),
                    Err(err) => {
                        tracing::debug!(user = %comment.user_id, error = %err, "detail: commenter unavailable");
                        None
                    }
                })
                .clone();
            CommentEntry { comment, author }
        })
        .collect()
}
