// Local mutations and queue-only requests, each applied inside the caller's
// transaction. Nothing here touches the remote service.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use shelf_common::action::{Action, ActionRequest, RequestError};
use shelf_common::change::ArticleChangeType;
use shelf_common::events::ArticleChangeKind;
use shelf_common::types::{Article, NewAnnotation};
use tracing::{debug, warn};

use crate::queue::OfflineQueue;
use crate::store::annotations::AnnotationStore;
use crate::store::articles::{ArticleStore, TagStore};
use crate::store::db::clear_entities;

/// A user-initiated mutation of local data. Everything except `SetProgress`
/// and the dead-item maintenance queues a change for the next sync.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalOperation {
    Archive { article_id: i64, archived: bool },
    Favorite { article_id: i64, favorite: bool },
    ChangeTitle { article_id: i64, title: String },
    /// Clamped to 0..=100.
    SetProgress { article_id: i64, progress: f64 },
    /// Replaces the article's tag labels.
    SetTags { article_id: i64, labels: Vec<String> },
    AddAnnotation { article_id: i64, annotation: NewAnnotation },
    UpdateAnnotation { article_id: i64, local_annotation_id: i64, text: String },
    DeleteAnnotation { article_id: i64, local_annotation_id: i64 },
    DeleteArticle { article_id: i64 },
    AddLink { url: String, origin_url: Option<String> },
    /// Move dead queue items back to pending.
    RequeueDead,
    /// Drop dead queue items for good.
    DiscardDead,
    /// Remove every local row and every queued change.
    Wipe,
}

impl LocalOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Archive { .. } => "archive",
            Self::Favorite { .. } => "favorite",
            Self::ChangeTitle { .. } => "change_title",
            Self::SetProgress { .. } => "set_progress",
            Self::SetTags { .. } => "set_tags",
            Self::AddAnnotation { .. } => "add_annotation",
            Self::UpdateAnnotation { .. } => "update_annotation",
            Self::DeleteAnnotation { .. } => "delete_annotation",
            Self::DeleteArticle { .. } => "delete_article",
            Self::AddLink { .. } => "add_link",
            Self::RequeueDead => "requeue_dead",
            Self::DiscardDead => "discard_dead",
            Self::Wipe => "wipe",
        }
    }
}

/// Queue-only forms of the simple action requests: the caller already
/// changed its local rows and only wants the change recorded.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QueueOnly {
    ArticleChange { article_id: i64, change: ArticleChangeType },
    TagsDelete { article_id: i64, tag_ids: Vec<String> },
    AnnotationAdd { article_id: i64, local_annotation_id: i64 },
    AnnotationUpdate { article_id: i64, local_annotation_id: i64 },
    AnnotationDelete { article_id: i64, remote_annotation_id: i64 },
    ArticleDelete { article_id: i64 },
    AddLink { url: String, origin_url: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Queue(QueueOnly),
    Local(LocalOperation),
}

/// What an applied step changed, for the events published after commit.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Applied {
    pub article_changes: Vec<(i64, ArticleChangeKind)>,
    pub queue_changed: bool,
    pub everything_removed: bool,
}

impl Applied {
    fn queued(queue_changed: bool) -> Self {
        Self { queue_changed, ..Self::default() }
    }

    fn changed(mut self, article_id: i64, change: ArticleChangeKind) -> Self {
        self.article_changes.push((article_id, change));
        self
    }
}

/// Interpret a simple (non-sync, non-update) request.
pub(crate) fn parse_request(request: &ActionRequest) -> Result<Step, RequestError> {
    let step = match request.action() {
        Action::ArticleChange => Step::Queue(QueueOnly::ArticleChange {
            article_id: request.require_article_id()?,
            change: request.change_type()?,
        }),
        Action::ArticleTagsDelete => Step::Queue(QueueOnly::TagsDelete {
            article_id: request.require_article_id()?,
            tag_ids: request.tag_ids()?,
        }),
        Action::AnnotationAdd => Step::Queue(QueueOnly::AnnotationAdd {
            article_id: request.require_article_id()?,
            local_annotation_id: request.extra_id()?,
        }),
        Action::AnnotationUpdate => Step::Queue(QueueOnly::AnnotationUpdate {
            article_id: request.require_article_id()?,
            local_annotation_id: request.extra_id()?,
        }),
        Action::AnnotationDelete => Step::Queue(QueueOnly::AnnotationDelete {
            article_id: request.require_article_id()?,
            remote_annotation_id: request.extra_id()?,
        }),
        Action::ArticleDelete => {
            Step::Queue(QueueOnly::ArticleDelete { article_id: request.require_article_id()? })
        }
        Action::AddLink => Step::Queue(QueueOnly::AddLink {
            url: request.require_extra()?.trim().to_string(),
            origin_url: request.extra2().map(str::to_string),
        }),
        Action::SetArticleProgress => Step::Local(LocalOperation::SetProgress {
            article_id: request.require_article_id()?,
            progress: request.progress()?,
        }),
        action @ (Action::SyncQueue | Action::UpdateArticles | Action::SweepDeletedArticles) => {
            return Err(RequestError::NotSimple { action });
        }
    };
    Ok(step)
}

pub(crate) fn apply(conn: &Connection, step: &Step, now: DateTime<Utc>) -> Result<Applied> {
    match step {
        Step::Queue(queued) => apply_queue_only(conn, queued, now),
        Step::Local(operation) => apply_local(conn, operation, now),
    }
}

fn apply_queue_only(conn: &Connection, step: &QueueOnly, now: DateTime<Utc>) -> Result<Applied> {
    let queue = OfflineQueue::new(conn);
    let changed = match step {
        QueueOnly::ArticleChange { article_id, change } => {
            queue.enqueue_article_change(*article_id, *change, now)?
        }
        QueueOnly::TagsDelete { article_id, tag_ids } => {
            queue.enqueue_tags_delete(*article_id, tag_ids, now)?
        }
        QueueOnly::AnnotationAdd { article_id, local_annotation_id } => {
            queue.enqueue_annotation_add(*article_id, *local_annotation_id, now)?
        }
        QueueOnly::AnnotationUpdate { article_id, local_annotation_id } => {
            queue.enqueue_annotation_update(*article_id, *local_annotation_id, now)?
        }
        QueueOnly::AnnotationDelete { article_id, remote_annotation_id } => {
            queue.enqueue_annotation_delete(*article_id, *remote_annotation_id, now)?
        }
        QueueOnly::ArticleDelete { article_id } => {
            queue.enqueue_article_delete(*article_id, now)?
        }
        QueueOnly::AddLink { url, origin_url } => {
            queue.enqueue_link(url, origin_url.as_deref(), now)?
        }
    };
    Ok(Applied::queued(changed))
}

fn apply_local(conn: &Connection, operation: &LocalOperation, now: DateTime<Utc>) -> Result<Applied> {
    match operation {
        LocalOperation::Archive { article_id, archived } => {
            let Some(mut article) = article_or_warn(conn, *article_id, operation)? else {
                return Ok(Applied::default());
            };
            let mut applied = Applied::default();
            if article.archived != *archived {
                article.archived = *archived;
                touch(conn, &mut article, now)?;
                let kind =
                    if *archived { ArticleChangeKind::Archived } else { ArticleChangeKind::Unarchived };
                applied = applied.changed(*article_id, kind);
            }
            applied.queue_changed = OfflineQueue::new(conn).enqueue_article_change(
                *article_id,
                ArticleChangeType::Archive,
                now,
            )?;
            Ok(applied)
        }
        LocalOperation::Favorite { article_id, favorite } => {
            let Some(mut article) = article_or_warn(conn, *article_id, operation)? else {
                return Ok(Applied::default());
            };
            let mut applied = Applied::default();
            if article.favorite != *favorite {
                article.favorite = *favorite;
                touch(conn, &mut article, now)?;
                let kind = if *favorite {
                    ArticleChangeKind::Favorited
                } else {
                    ArticleChangeKind::Unfavorited
                };
                applied = applied.changed(*article_id, kind);
            }
            applied.queue_changed = OfflineQueue::new(conn).enqueue_article_change(
                *article_id,
                ArticleChangeType::Favorite,
                now,
            )?;
            Ok(applied)
        }
        LocalOperation::ChangeTitle { article_id, title } => {
            let Some(mut article) = article_or_warn(conn, *article_id, operation)? else {
                return Ok(Applied::default());
            };
            if article.title == *title {
                debug!(article_id, "title unchanged");
                return Ok(Applied::default());
            }
            article.title = title.clone();
            touch(conn, &mut article, now)?;
            let queue_changed = OfflineQueue::new(conn).enqueue_article_change(
                *article_id,
                ArticleChangeType::Title,
                now,
            )?;
            Ok(Applied::queued(queue_changed).changed(*article_id, ArticleChangeKind::TitleChanged))
        }
        LocalOperation::SetProgress { article_id, progress } => {
            let Some(mut article) = article_or_warn(conn, *article_id, operation)? else {
                return Ok(Applied::default());
            };
            let progress = clamp_progress(*progress);
            if article.progress == progress {
                return Ok(Applied::default());
            }
            article.progress = progress;
            touch(conn, &mut article, now)?;
            Ok(Applied::default().changed(*article_id, ArticleChangeKind::ProgressChanged))
        }
        LocalOperation::SetTags { article_id, labels } => set_tags(conn, *article_id, labels, now),
        LocalOperation::AddAnnotation { article_id, annotation } => {
            let Some(article) = article_or_warn(conn, *article_id, operation)? else {
                return Ok(Applied::default());
            };
            let local_id = AnnotationStore::insert(conn, article.id, annotation)?;
            let queue_changed =
                OfflineQueue::new(conn).enqueue_annotation_add(*article_id, local_id, now)?;
            debug!(article_id, local_annotation_id = local_id, "annotation added");
            Ok(Applied::queued(queue_changed)
                .changed(*article_id, ArticleChangeKind::AnnotationsChanged))
        }
        LocalOperation::UpdateAnnotation { article_id, local_annotation_id, text } => {
            let Some(annotation) = AnnotationStore::get(conn, *local_annotation_id)? else {
                warn!(article_id, local_annotation_id, "annotation not found; update ignored");
                return Ok(Applied::default());
            };
            if annotation.text == *text {
                debug!(local_annotation_id, "annotation text unchanged");
                return Ok(Applied::default());
            }
            AnnotationStore::update_text(conn, *local_annotation_id, text)?;
            let queue_changed = OfflineQueue::new(conn).enqueue_annotation_update(
                *article_id,
                *local_annotation_id,
                now,
            )?;
            Ok(Applied::queued(queue_changed)
                .changed(*article_id, ArticleChangeKind::AnnotationsChanged))
        }
        LocalOperation::DeleteAnnotation { article_id, local_annotation_id } => {
            let Some(annotation) = AnnotationStore::get(conn, *local_annotation_id)? else {
                warn!(article_id, local_annotation_id, "annotation not found; delete ignored");
                return Ok(Applied::default());
            };
            AnnotationStore::delete(conn, annotation.id)?;
            let queue = OfflineQueue::new(conn);
            let before = queue.length()?;
            // Queued add/update records would only fail NOT_FOUND_LOCALLY now.
            let dropped = queue.drop_annotation_records(*article_id, *local_annotation_id)?;
            if let Some(remote_id) = annotation.annotation_id {
                queue.enqueue_annotation_delete(*article_id, remote_id, now)?;
            }
            debug!(article_id, local_annotation_id, dropped, "annotation deleted");
            Ok(Applied::queued(queue.length()? != before)
                .changed(*article_id, ArticleChangeKind::AnnotationsChanged))
        }
        LocalOperation::DeleteArticle { article_id } => {
            let Some(article) = article_or_warn(conn, *article_id, operation)? else {
                return Ok(Applied::default());
            };
            ArticleStore::delete(conn, article.id)?;
            let queue = OfflineQueue::new(conn);
            let before = queue.length()?;
            let dropped = queue.drop_article_records(*article_id)?;
            queue.enqueue_article_delete(*article_id, now)?;
            debug!(article_id, dropped, "article deleted");
            Ok(Applied::queued(queue.length()? != before)
                .changed(*article_id, ArticleChangeKind::Deleted))
        }
        LocalOperation::AddLink { url, origin_url } => {
            let url = url.trim();
            if url.is_empty() {
                warn!("empty link url; add ignored");
                return Ok(Applied::default());
            }
            let queue_changed =
                OfflineQueue::new(conn).enqueue_link(url, origin_url.as_deref(), now)?;
            Ok(Applied::queued(queue_changed))
        }
        LocalOperation::RequeueDead => {
            let moved = OfflineQueue::new(conn).requeue_dead(now)?;
            debug!(moved, "requeued dead queue items");
            Ok(Applied::queued(moved > 0))
        }
        LocalOperation::DiscardDead => {
            let dropped = OfflineQueue::new(conn).discard_dead()?;
            debug!(dropped, "discarded dead queue items");
            // Dead items are not part of the pending length.
            Ok(Applied::default())
        }
        LocalOperation::Wipe => {
            clear_entities(conn)?;
            OfflineQueue::new(conn).clear()?;
            Ok(Applied { queue_changed: true, everything_removed: true, ..Applied::default() })
        }
    }
}

/// Reconcile the article's labels with `labels`. Removed tags that the
/// server knows about are queued for deletion; any difference queues a tags
/// push.
fn set_tags(
    conn: &Connection,
    article_id: i64,
    labels: &[String],
    now: DateTime<Utc>,
) -> Result<Applied> {
    let Some(article) = ArticleStore::get_by_article_id(conn, article_id)? else {
        warn!(article_id, "article not found; set_tags ignored");
        return Ok(Applied::default());
    };

    let mut wanted: Vec<&str> = Vec::with_capacity(labels.len());
    for label in labels.iter().map(|label| label.trim()) {
        if !label.is_empty() && !wanted.contains(&label) {
            wanted.push(label);
        }
    }

    let current = TagStore::for_article(conn, article.id)?;
    let mut removed_remote_ids = Vec::new();
    let mut changed = false;

    for tag in &current {
        if wanted.contains(&tag.label.as_str()) {
            continue;
        }
        TagStore::unlink(conn, article.id, tag.id)?;
        if let Some(tag_id) = tag.tag_id {
            removed_remote_ids.push(tag_id.to_string());
        }
        changed = true;
    }

    for label in wanted {
        if current.iter().any(|tag| tag.label == label) {
            continue;
        }
        let tag = match TagStore::find_by_label(conn, label)? {
            Some(tag) => tag,
            None => TagStore::insert(conn, label, None)?,
        };
        TagStore::link(conn, article.id, tag.id)?;
        changed = true;
    }

    if !changed {
        return Ok(Applied::default());
    }

    let queue = OfflineQueue::new(conn);
    let deletes_queued = queue.enqueue_tags_delete(article_id, &removed_remote_ids, now)?;
    let change_queued = queue.enqueue_article_change(article_id, ArticleChangeType::Tags, now)?;

    Ok(Applied::queued(deletes_queued || change_queued)
        .changed(article_id, ArticleChangeKind::TagsChanged))
}

fn article_or_warn(
    conn: &Connection,
    article_id: i64,
    operation: &LocalOperation,
) -> Result<Option<Article>> {
    let article = ArticleStore::get_by_article_id(conn, article_id)?;
    if article.is_none() {
        warn!(article_id, operation = operation.name(), "article not found; operation ignored");
    }
    Ok(article)
}

fn touch(conn: &Connection, article: &mut Article, now: DateTime<Utc>) -> Result<()> {
    article.updated_at = now;
    ArticleStore::update(conn, article)?;
    Ok(())
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        return 0.0;
    }
    progress.clamp(0.0, 100.0)
}
