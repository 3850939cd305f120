use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::api::{self, ApiError, Comment, CommentDraft, Id, Post, Profile};

pub trait PostService: Send + Sync {
    fn list_posts(&self) -> Result<Vec<Post>, ApiError>;
    fn get_post(&self, id: &Id) -> Result<Post, ApiError>;
}

pub trait ProfileService: Send + Sync {
    fn get_profile(&self, id: &Id) -> Result<Profile, ApiError>;
}

pub trait CommentService: Send + Sync {
    fn list_comments(&self, post_id: &Id) -> Result<Vec<Comment>, ApiError>;
    fn create_comment(&self, draft: &CommentDraft) -> Result<Comment, ApiError>;
}

/// The three service seams the views load through.
#[derive(Clone)]
pub struct Services {
    pub posts: Arc<dyn PostService>,
    pub profiles: Arc<dyn ProfileService>,
    pub comments: Arc<dyn CommentService>,
}

impl Services {
    pub fn from_client(client: Arc<api::Client>) -> Self {
        Self {
            posts: Arc::new(ApiPostService::new(client.clone())),
            profiles: Arc::new(ApiProfileService::new(client.clone())),
            comments: Arc::new(ApiCommentService::new(client)),
        }
    }

    pub fn from_mock(blog: Arc<MockBlog>) -> Self {
        Self {
            posts: blog.clone(),
            profiles: blog.clone(),
            comments: blog,
        }
    }
}

pub struct ApiPostService {
    client: Arc<api::Client>,
}

impl ApiPostService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl PostService for ApiPostService {
    fn list_posts(&self) -> Result<Vec<Post>, ApiError> {
        self.client.list_posts()
    }

    fn get_post(&self, id: &Id) -> Result<Post, ApiError> {
        self.client.get_post(id)
    }
}

pub struct ApiProfileService {
    client: Arc<api::Client>,
}

impl ApiProfileService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ProfileService for ApiProfileService {
    fn get_profile(&self, id: &Id) -> Result<Profile, ApiError> {
        self.client.get_profile(id)
    }
}

pub struct ApiCommentService {
    client: Arc<api::Client>,
}

impl ApiCommentService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for ApiCommentService {
    fn list_comments(&self, post_id: &Id) -> Result<Vec<Comment>, ApiError> {
        self.client.list_comments(post_id)
    }

    fn create_comment(&self, draft: &CommentDraft) -> Result<Comment, ApiError> {
        self.client.create_comment(draft)
    }
}

/// In-memory blog used by `--demo` and by tests. Behaves like the REST API,
/// including `NotFound` for unknown ids and server-side id assignment.
#[derive(Default)]
pub struct MockBlog {
    posts: Vec<Post>,
    profiles: Vec<Profile>,
    comments: Mutex<Vec<Comment>>,
    next_comment_id: AtomicUsize,
    unavailable: bool,
    calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl MockBlog {
    pub fn new(posts: Vec<Post>, profiles: Vec<Profile>, comments: Vec<Comment>) -> Self {
        let next = comments.len() + 1;
        Self {
            posts,
            profiles,
            comments: Mutex::new(comments),
            next_comment_id: AtomicUsize::new(next),
            ..Default::default()
        }
    }

    /// Every call fails as if the server answered 503.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn with_next_comment_id(self, id: usize) -> Self {
        self.next_comment_id.store(id, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn sample() -> Self {
        let now = Utc::now();
        let profiles = vec![
            sample_profile(1, "Ada Lovelace"),
            sample_profile(2, "Grace Hopper"),
            sample_profile(3, "Ken Thompson"),
        ];
        let posts = vec![
            sample_post(
                1,
                "Hello World",
                "Welcome to the blog. Use j/k to move through posts, / to search by title and Enter to read one.",
                Some("Announcements"),
                1,
                now - Duration::days(12),
            ),
            sample_post(
                2,
                "Notes on Compilers",
                "A compiler is a program that turns one language into another. This post walks through lexing, parsing and code generation in a small expression language.",
                Some("Engineering"),
                3,
                now - Duration::days(5),
            ),
            sample_post(
                3,
                "Debugging Stories",
                "The first actual case of a bug being found was a moth in a relay. Every debugging session since has been a search for the moth.",
                None,
                2,
                now - Duration::hours(30),
            ),
        ];
        let comments = vec![
            sample_comment(1, 1, 2, "Glad to see this up and running.", now - Duration::days(11)),
            sample_comment(2, 2, 1, "Would love a follow-up on register allocation.", now - Duration::days(4)),
            sample_comment(3, 2, 2, "Seconded!", now - Duration::hours(50)),
        ];
        Self::new(posts, profiles, comments)
    }

    fn check_available(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(ApiError::Status {
                status: 503,
                path: "/".into(),
            });
        }
        Ok(())
    }
}

impl PostService for MockBlog {
    fn list_posts(&self) -> Result<Vec<Post>, ApiError> {
        self.check_available()?;
        Ok(self.posts.clone())
    }

    fn get_post(&self, id: &Id) -> Result<Post, ApiError> {
        self.check_available()?;
        self.posts
            .iter()
            .find(|post| &post.id == id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("post {id}")))
    }
}

impl ProfileService for MockBlog {
    fn get_profile(&self, id: &Id) -> Result<Profile, ApiError> {
        self.check_available()?;
        self.profiles
            .iter()
            .find(|profile| &profile.id == id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("profile {id}")))
    }
}

impl CommentService for MockBlog {
    fn list_comments(&self, post_id: &Id) -> Result<Vec<Comment>, ApiError> {
        self.check_available()?;
        Ok(self
            .comments
            .lock()
            .iter()
            .filter(|comment| &comment.post_id == post_id)
            .cloned()
            .collect())
    }

    fn create_comment(&self, draft: &CommentDraft) -> Result<Comment, ApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if draft.text.trim().is_empty() {
            return Err(ApiError::Validation("comment text is required".into()));
        }
        if !self.posts.iter().any(|post| post.id == draft.post_id) {
            return Err(ApiError::NotFound(format!("post {}", draft.post_id)));
        }
        let id = self.next_comment_id.fetch_add(1, Ordering::SeqCst);
        let comment = Comment {
            id: Id::from(id as i64),
            post_id: draft.post_id.clone(),
            user_id: draft.user_id.clone(),
            text: draft.text.clone(),
            created_at: draft.created_at,
        };
        self.comments.lock().push(comment.clone());
        Ok(comment)
    }
}

fn sample_profile(id: i64, name: &str) -> Profile {
    Profile {
        id: Id::from(id),
        name: name.into(),
        image: String::new(),
    }
}

fn sample_post(
    id: i64,
    title: &str,
    content: &str,
    category: Option<&str>,
    author: i64,
    created_at: DateTime<Utc>,
) -> Post {
    Post {
        id: Id::from(id),
        title: title.into(),
        content: content.into(),
        excerpt: None,
        thumbnail: String::new(),
        category: category.map(str::to_string),
        author_id: Id::from(author),
        created_at,
    }
}

fn sample_comment(
    id: i64,
    post: i64,
    user: i64,
    text: &str,
    created_at: DateTime<Utc>,
) -> Comment {
    Comment {
        id: Id::from(id),
        post_id: Id::from(post),
        user_id: Id::from(user),
        text: text.into(),
        created_at,
    }
}
