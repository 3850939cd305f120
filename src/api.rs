use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("rejected: {0}")]
    Validation(String),
    #[error("unexpected status {status} from {path}")]
    Status { status: u16, path: String },
    #[error("malformed {what} payload: {reason}")]
    Decode { what: &'static str, reason: String },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

/// Record identifier. The API may hand out numeric or string ids; both are
/// kept as text and numeric ones are written back as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(String);

impl Id {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn as_number(&self) -> Option<i64> {
        self.0
            .parse::<i64>()
            .ok()
            .filter(|parsed| parsed.to_string() == self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_number() {
            Some(number) => serializer.serialize_i64(number),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }

        let id = match RawId::deserialize(deserializer)? {
            RawId::Number(number) => number.to_string(),
            RawId::Text(text) => text.trim().to_string(),
        };
        if id.is_empty() {
            return Err(serde::de::Error::custom("id must not be empty"));
        }
        Ok(Id(id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub author_id: Id,
    pub created_at: DateTime<Utc>,
}

impl Post {
    fn sanitized(mut self) -> Self {
        self.thumbnail = sanitize_image_url(&self.thumbnail);
        self.excerpt = self.excerpt.filter(|excerpt| !excerpt.trim().is_empty());
        self.category = self.category.filter(|category| !category.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub image: String,
}

impl Profile {
    fn sanitized(mut self) -> Self {
        self.image = sanitize_image_url(&self.image);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub user_id: Id,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDraft {
    pub post_id: Id,
    pub user_id: Id,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api: user agent required");
        }
        let base = if config.base_url.trim().is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            config.base_url.trim().to_string()
        };
        let base_url =
            Url::parse(&base).with_context(|| format!("api: invalid base url {base:?}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            bail!("api: base url must be http or https, got {base:?}");
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("api: build http client")?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn list_posts(&self) -> Result<Vec<Post>, ApiError> {
        let url = self.endpoint(&["posts"]);
        let bytes = expect_success(self.send(self.http.get(url))?, "posts")?;
        let posts = decode_list::<Post>("post", &bytes)?;
        Ok(posts.into_iter().map(Post::sanitized).collect())
    }

    pub fn get_post(&self, id: &Id) -> Result<Post, ApiError> {
        let url = self.endpoint(&["posts", id.as_str()]);
        let bytes = expect_success(self.send(self.http.get(url))?, &format!("post {id}"))?;
        decode_one::<Post>("post", &bytes).map(Post::sanitized)
    }

    pub fn get_profile(&self, id: &Id) -> Result<Profile, ApiError> {
        let url = self.endpoint(&["profiles", id.as_str()]);
        let bytes = expect_success(self.send(self.http.get(url))?, &format!("profile {id}"))?;
        decode_one::<Profile>("profile", &bytes).map(Profile::sanitized)
    }

    pub fn list_comments(&self, post_id: &Id) -> Result<Vec<Comment>, ApiError> {
        let mut url = self.endpoint(&["comments"]);
        url.query_pairs_mut().append_pair("postId", post_id.as_str());
        let bytes = expect_success(
            self.send(self.http.get(url))?,
            &format!("comments for post {post_id}"),
        )?;
        let comments = decode_list::<Comment>("comment", &bytes)?;
        Ok(comments
            .into_iter()
            .filter(|comment| {
                let matches = &comment.post_id == post_id;
                if !matches {
                    tracing::warn!(
                        comment = %comment.id,
                        expected = %post_id,
                        actual = %comment.post_id,
                        "dropping comment that belongs to another post"
                    );
                }
                matches
            })
            .collect())
    }

    pub fn create_comment(&self, draft: &CommentDraft) -> Result<Comment, ApiError> {
        if draft.text.trim().is_empty() {
            return Err(ApiError::Validation("comment text is required".into()));
        }
        let url = self.endpoint(&["comments"]);
        let request = self.http.post(url).json(draft);
        let bytes = expect_success(self.send(request)?, &format!("post {}", draft.post_id))?;
        decode_one::<Comment>("comment", &bytes)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()?;
        tracing::debug!(url = %response.url(), status = %response.status(), "api response");
        Ok(response)
    }
}

fn expect_success(response: Response, resource: &str) -> Result<Vec<u8>, ApiError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(resource.to_string()));
    }
    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        let body = response.text().unwrap_or_default();
        let message = body.trim();
        return Err(ApiError::Validation(if message.is_empty() {
            format!("request rejected with status {status}")
        } else {
            message.to_string()
        }));
    }
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            path: response.url().path().to_string(),
        });
    }
    Ok(response.bytes()?.to_vec())
}

fn decode_one<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|err| ApiError::Decode {
        what,
        reason: err.to_string(),
    })
}

fn decode_list<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<Vec<T>, ApiError> {
    let values: Vec<Value> = decode_one(what, bytes)?;
    Ok(values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!(what, index, error = %err, "skipping malformed entry");
                None
            }
        })
        .collect())
}

fn sanitize_image_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => trimmed.to_string(),
        _ => String::new(),
    }
}
