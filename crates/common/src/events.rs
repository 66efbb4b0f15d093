// Observer notifications published by the daemon service.

use serde::{Deserialize, Serialize};

use crate::action::{ActionRequest, ActionResult};

/// What happened to a locally stored article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleChangeKind {
    Archived,
    Unarchived,
    Favorited,
    Unfavorited,
    TitleChanged,
    TagsChanged,
    AnnotationsChanged,
    ProgressChanged,
    Deleted,
}

/// Which long-running operation a started/progress/finished event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SyncQueue,
    UpdateArticles,
    SweepDeletedArticles,
}

#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// Offline queue length changed. `local_change` is true when a local
    /// mutation was queued, false when a sync run trimmed the queue.
    QueueChanged { queue_length: u64, local_change: bool },
    ArticleChanged { article_id: i64, change: ArticleChangeKind },
    /// Every local row was removed.
    EverythingRemoved,
    Started { operation: Operation, request: ActionRequest },
    Progress { operation: Operation, request: ActionRequest, current: u64, total: u64 },
    /// `queue_length` is only present for `Operation::SyncQueue`.
    Finished {
        operation: Operation,
        request: ActionRequest,
        result: ActionResult,
        queue_length: Option<u64>,
    },
    /// At least one queued link was uploaded during a sync run.
    LinkUploaded,
    /// Final result of every request the service handled.
    ActionCompleted { request: ActionRequest, result: ActionResult },
}

impl ServiceEvent {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QueueChanged { .. } => "queue_changed",
            Self::ArticleChanged { .. } => "article_changed",
            Self::EverythingRemoved => "everything_removed",
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Finished { .. } => "finished",
            Self::LinkUploaded => "link_uploaded",
            Self::ActionCompleted { .. } => "action_completed",
        }
    }
}
