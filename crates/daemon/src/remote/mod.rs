// Remote article service boundary.
//
// Every call returns `Ok(None)` (or `Ok(false)`) when the server reports the
// target as missing, and a classified `RemoteError` for anything else that
// went wrong. The sync engine decides per record kind what "missing" means.

pub mod http;

use std::future::Future;

use serde::{Deserialize, Serialize};
use shelf_common::action::ErrorType;
use shelf_common::types::AnnotationRange;

pub use http::HttpRemoteApi;

// ── Types ───────────────────────────────────────────────────────────

/// Article as returned by the server after an add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArticle {
    pub id: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Fields pushed by an article modification. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticlePatch {
    pub archive: Option<bool>,
    pub starred: Option<bool>,
    pub title: Option<String>,
    /// Full replacement set of tag labels.
    pub tags: Option<Vec<String>>,
}

impl ArticlePatch {
    pub fn is_empty(&self) -> bool {
        self.archive.is_none()
            && self.starred.is_none()
            && self.title.is_none()
            && self.tags.is_none()
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Classified failure of a remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Server unreachable: connection refused, DNS failure, timeout.
    NoNetwork { message: String },
    /// Credentials missing, expired or refused (401/403).
    Unauthorized { message: String },
    /// Client configuration is unusable (bad base URL, missing token).
    Configuration { message: String },
    /// Server rejected this specific request (4xx other than 401/403/404/408/429).
    Rejected { status: u16, message: String },
    /// Server is throttling or timed out waiting for us (429/408). Applies to
    /// every request, not just the one that got it.
    RateLimited { status: u16, retry_after_secs: Option<u64>, message: String },
    /// Server failed (5xx).
    Server { status: u16, message: String },
    /// Anything else: malformed response, protocol error.
    Transport { message: String },
}

impl RemoteError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::NoNetwork { .. } => ErrorType::NoNetwork,
            Self::Unauthorized { .. } => ErrorType::IncorrectCredentials,
            Self::Configuration { .. } => ErrorType::IncorrectConfiguration,
            Self::Rejected { .. } => ErrorType::NegativeResponse,
            Self::RateLimited { .. } => ErrorType::Temporary,
            Self::Server { .. } => ErrorType::ServerError,
            Self::Transport { .. } => ErrorType::Unknown,
        }
    }

    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited { retry_after_secs: Some(secs), .. } => {
                Some(std::time::Duration::from_secs(*secs))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoNetwork { message } => write!(f, "remote: network unavailable: {message}"),
            Self::Unauthorized { message } => write!(f, "remote: unauthorized: {message}"),
            Self::Configuration { message } => write!(f, "remote: bad configuration: {message}"),
            Self::Rejected { status, message } => {
                write!(f, "remote: request rejected with {status}: {message}")
            }
            Self::RateLimited { status, retry_after_secs: Some(secs), message } => {
                write!(f, "remote: rate limited ({status}), retry after {secs}s: {message}")
            }
            Self::RateLimited { status, retry_after_secs: None, message } => {
                write!(f, "remote: rate limited ({status}): {message}")
            }
            Self::Server { status, message } => {
                write!(f, "remote: server error {status}: {message}")
            }
            Self::Transport { message } => write!(f, "remote: transport error: {message}"),
        }
    }
}

impl std::error::Error for RemoteError {}

// ── Trait ───────────────────────────────────────────────────────────

/// Remote calls consumed by the sync engine. Trait-based for testability.
///
/// All methods return `Send` futures so a sync run can be driven from the
/// task runner's worker on a multi-threaded runtime.
pub trait RemoteApi: Send + Sync + 'static {
    /// Cheap connectivity check run before a sync.
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;

    fn add_article(
        &self,
        url: &str,
        origin_url: Option<&str>,
    ) -> impl Future<Output = Result<Option<RemoteArticle>, RemoteError>> + Send;

    fn modify_article(
        &self,
        article_id: i64,
        patch: &ArticlePatch,
    ) -> impl Future<Output = Result<Option<()>, RemoteError>> + Send;

    /// `Ok(false)` when the article was already gone.
    fn delete_article(
        &self,
        article_id: i64,
    ) -> impl Future<Output = Result<bool, RemoteError>> + Send;

    fn delete_tag(
        &self,
        article_id: i64,
        tag_id: i64,
    ) -> impl Future<Output = Result<Option<()>, RemoteError>> + Send;

    /// Returns the server id of the new annotation.
    fn add_annotation(
        &self,
        article_id: i64,
        ranges: &[AnnotationRange],
        text: &str,
        quote: Option<&str>,
    ) -> impl Future<Output = Result<Option<i64>, RemoteError>> + Send;

    fn update_annotation(
        &self,
        annotation_id: i64,
        text: &str,
    ) -> impl Future<Output = Result<Option<()>, RemoteError>> + Send;

    fn delete_annotation(
        &self,
        annotation_id: i64,
    ) -> impl Future<Output = Result<Option<()>, RemoteError>> + Send;
}
