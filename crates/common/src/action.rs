// Action request/result envelope used to submit work to the task runner and
// to report outcomes to observers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::change::{ArticleChangeType, UnknownChangeType};

/// Kind of work an `ActionRequest` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// `extra` = change type name (`archive`, `favorite`, `title`, `tags`).
    ArticleChange,
    /// `extra` = comma-separated remote tag ids.
    ArticleTagsDelete,
    /// `extra` = local annotation id.
    AnnotationAdd,
    /// `extra` = local annotation id.
    AnnotationUpdate,
    /// `extra` = remote annotation id.
    AnnotationDelete,
    ArticleDelete,
    /// `extra` = url, `extra2` = origin url.
    AddLink,
    /// `extra` = reading progress as a decimal number.
    SetArticleProgress,
    SyncQueue,
    /// Uses `update_type`.
    UpdateArticles,
    SweepDeletedArticles,
}

/// How thorough an article update should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    Full,
    Fast,
}

/// Immutable request submitted to the task runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    article_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    update_type: Option<UpdateType>,
}

/// A request whose payload cannot be interpreted for its action.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("{action:?} request requires an article id")]
    MissingArticleId { action: Action },

    #[error("{action:?} request requires `{field}`")]
    MissingField { action: Action, field: &'static str },

    #[error("{action:?} request has invalid `{field}`: {value}")]
    InvalidField { action: Action, field: &'static str, value: String },

    #[error(transparent)]
    ChangeType(#[from] UnknownChangeType),

    #[error("{action:?} is not served as a simple request")]
    NotSimple { action: Action },
}

impl ActionRequest {
    pub fn new(action: Action) -> Self {
        Self { action, article_id: None, extra: None, extra2: None, update_type: None }
    }

    pub fn with_article_id(mut self, article_id: i64) -> Self {
        self.article_id = Some(article_id);
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    pub fn with_extra2(mut self, extra2: impl Into<String>) -> Self {
        self.extra2 = Some(extra2.into());
        self
    }

    pub fn with_update_type(mut self, update_type: UpdateType) -> Self {
        self.update_type = Some(update_type);
        self
    }

    // ── Constructors for common requests ───────────────────────────

    pub fn sync_queue() -> Self {
        Self::new(Action::SyncQueue)
    }

    pub fn add_link(url: impl Into<String>, origin_url: Option<String>) -> Self {
        let mut request = Self::new(Action::AddLink).with_extra(url);
        request.extra2 = origin_url;
        request
    }

    pub fn article_change(article_id: i64, change: ArticleChangeType) -> Self {
        Self::new(Action::ArticleChange).with_article_id(article_id).with_extra(change.as_str())
    }

    pub fn set_progress(article_id: i64, progress: f64) -> Self {
        Self::new(Action::SetArticleProgress)
            .with_article_id(article_id)
            .with_extra(progress.to_string())
    }

    pub fn update_articles(update_type: UpdateType) -> Self {
        Self::new(Action::UpdateArticles).with_update_type(update_type)
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn article_id(&self) -> Option<i64> {
        self.article_id
    }

    pub fn extra(&self) -> Option<&str> {
        self.extra.as_deref()
    }

    pub fn extra2(&self) -> Option<&str> {
        self.extra2.as_deref()
    }

    pub fn update_type(&self) -> Option<UpdateType> {
        self.update_type
    }

    // ── Typed payload parsing ──────────────────────────────────────

    pub fn require_article_id(&self) -> Result<i64, RequestError> {
        self.article_id.ok_or(RequestError::MissingArticleId { action: self.action })
    }

    pub fn require_extra(&self) -> Result<&str, RequestError> {
        self.extra
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or(RequestError::MissingField { action: self.action, field: "extra" })
    }

    pub fn change_type(&self) -> Result<ArticleChangeType, RequestError> {
        Ok(self.require_extra()?.parse()?)
    }

    /// Parses `extra` as an integer id (local or remote annotation id).
    pub fn extra_id(&self) -> Result<i64, RequestError> {
        let raw = self.require_extra()?;
        raw.trim().parse().map_err(|_| RequestError::InvalidField {
            action: self.action,
            field: "extra",
            value: raw.to_string(),
        })
    }

    /// Splits `extra` into tag ids. Empty segments are dropped.
    pub fn tag_ids(&self) -> Result<Vec<String>, RequestError> {
        let raw = self.require_extra()?;
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn progress(&self) -> Result<f64, RequestError> {
        let raw = self.require_extra()?;
        raw.trim().parse::<f64>().ok().filter(|value| value.is_finite()).ok_or_else(|| {
            RequestError::InvalidField { action: self.action, field: "extra", value: raw.to_string() }
        })
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// Classified failure of an action or of a single replayed queue item.
///
/// Variants are declared from least to most severe; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Remote entity absent.
    NotFound,
    /// Local prerequisite of a queued record vanished.
    NotFoundLocally,
    /// Server explicitly rejected the request.
    NegativeResponse,
    /// Retry soon; nothing is wrong with the request.
    Temporary,
    /// No connectivity; nothing was changed.
    NoNetwork,
    /// Server failed (5xx).
    ServerError,
    Unknown,
    IncorrectCredentials,
    IncorrectConfiguration,
}

impl ErrorType {
    /// Rank used by `ActionResult::update_with`. Higher is more severe.
    pub fn severity(self) -> u8 {
        self as u8
    }

    /// Per-item errors that leave a sync run going: the item stays queued but
    /// later items are still replayed.
    pub fn is_item_local(self) -> bool {
        matches!(self, Self::NotFoundLocally | Self::NegativeResponse)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NOT_FOUND",
            Self::NotFoundLocally => "NOT_FOUND_LOCALLY",
            Self::NegativeResponse => "NEGATIVE_RESPONSE",
            Self::Temporary => "TEMPORARY",
            Self::NoNetwork => "NO_NETWORK",
            Self::ServerError => "SERVER_ERROR",
            Self::Unknown => "UNKNOWN",
            Self::IncorrectCredentials => "INCORRECT_CREDENTIALS",
            Self::IncorrectConfiguration => "INCORRECT_CONFIGURATION",
        };
        f.write_str(name)
    }
}

/// Underlying cause attached to a failed result.
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync>;

/// Outcome of an action: success, or exactly one error type with an optional
/// message and cause.
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    error_type: Option<ErrorType>,
    message: Option<String>,
    cause: Option<ErrorCause>,
}

impl ActionResult {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn error(error_type: ErrorType) -> Self {
        Self { error_type: Some(error_type), message: None, cause: None }
    }

    pub fn error_with_message(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self { error_type: Some(error_type), message: Some(message.into()), cause: None }
    }

    pub fn with_cause(mut self, cause: ErrorCause) -> Self {
        if self.message.is_none() {
            self.message = Some(cause.to_string());
        }
        self.cause = Some(cause);
        self
    }

    pub fn is_success(&self) -> bool {
        self.error_type.is_none()
    }

    pub fn error_type(&self) -> Option<ErrorType> {
        self.error_type
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// Folds another result into this one. The first recorded error wins
    /// unless `other` carries a strictly more severe error type. Successes
    /// never downgrade a recorded failure.
    pub fn update_with(&mut self, other: ActionResult) {
        let Some(incoming) = other.error_type else {
            return;
        };

        let replace = match self.error_type {
            None => true,
            Some(current) => incoming.severity() > current.severity(),
        };

        if replace {
            *self = other;
        }
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error_type, &self.message) {
            (None, _) => f.write_str("success"),
            (Some(error_type), None) => write!(f, "{error_type}"),
            (Some(error_type), Some(message)) => write!(f, "{error_type}: {message}"),
        }
    }
}
