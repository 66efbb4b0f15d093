// Sync engine: replays the offline queue against the remote service.
//
// Per run: CheckingNetwork → Replaying → Trimming → Done, with an early
// Done(NO_NETWORK) when the server is unreachable.
//
// Item outcomes:
//   success                              → completed
//   NOT_FOUND on a tolerant kind         → completed (intent already moot)
//   NOT_FOUND_LOCALLY / NEGATIVE_RESPONSE→ retained, soft failure recorded
//   anything else                        → retained, run stops here
//
// No `&Connection` is held across an `.await`: database access goes through
// the synchronous helpers at the bottom of this file, which return owned data.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use shelf_common::action::{ActionRequest, ActionResult, ErrorType};
use shelf_common::change::{ArticleChangeType, ChangeRecord, ChangeSet};
use shelf_common::events::{Operation, ServiceEvent};
use shelf_common::types::Annotation;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::events::EventBus;
use crate::queue::{ItemState, OfflineQueue, QueueItem};
use crate::remote::{ArticlePatch, RemoteApi, RemoteError};
use crate::store::annotations::AnnotationStore;
use crate::store::articles::{ArticleStore, TagStore};
use crate::store::db::LocalDb;

pub const DEFAULT_MAX_SOFT_FAILURES: u32 = 8;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Soft failures after which a queued item is moved to `dead`.
    pub max_soft_failures: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { max_soft_failures: DEFAULT_MAX_SOFT_FAILURES }
    }
}

/// Outcome of one sync run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub result: ActionResult,
    /// Pending length after the run; the pre-run length if nothing changed.
    pub queue_length: u64,
    pub link_uploaded: bool,
    /// Queue item ids removed by this run, in queue order.
    pub completed: Vec<i64>,
    /// Queue item ids that failed softly and stay queued (or went dead).
    pub retained: Vec<i64>,
}

/// What to do with a replayed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Retain { message: String },
    Stop,
}

/// Classify the result of replaying `record`.
pub fn disposition(record: &ChangeRecord, result: &ActionResult) -> Disposition {
    match result.error_type() {
        None => Disposition::Completed,
        Some(ErrorType::NotFound) if record.tolerates_not_found() => Disposition::Completed,
        Some(error_type) if error_type.is_item_local() => {
            Disposition::Retain { message: result.to_string() }
        }
        Some(_) => Disposition::Stop,
    }
}

pub struct SyncEngine<'a, R: RemoteApi> {
    db: &'a mut LocalDb,
    remote: &'a R,
    events: &'a EventBus,
    options: SyncOptions,
    link_uploaded: bool,
}

impl<'a, R: RemoteApi> SyncEngine<'a, R> {
    pub fn new(db: &'a mut LocalDb, remote: &'a R, events: &'a EventBus) -> Self {
        Self { db, remote, events, options: SyncOptions::default(), link_uploaded: false }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one sync. `Err` is reserved for local database failures while
    /// snapshotting or trimming the queue; remote failures end up in
    /// `SyncReport::result`.
    pub async fn run(&mut self, request: &ActionRequest) -> Result<SyncReport> {
        let span = info_span!("sync_run", run_id = %Uuid::new_v4());
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&mut self, request: &ActionRequest) -> Result<SyncReport> {
        self.link_uploaded = false;

        if !self.remote.is_reachable().await {
            info!("remote unreachable; sync skipped");
            return Ok(SyncReport {
                result: ActionResult::error(ErrorType::NoNetwork),
                queue_length: pending_length(self.db.connection())?,
                link_uploaded: false,
                completed: Vec::new(),
                retained: Vec::new(),
            });
        }

        let items = snapshot(self.db.connection())?;
        let total = items.len() as u64;
        info!(items = total, "sync started");

        let mut result = ActionResult::success();
        let mut completed = Vec::new();
        let mut retained: Vec<(i64, String)> = Vec::new();

        for (index, item) in items.iter().enumerate() {
            self.events.publish(ServiceEvent::Progress {
                operation: Operation::SyncQueue,
                request: request.clone(),
                current: index as u64,
                total,
            });
            debug!(queue_item = item.id, kind = item.record.kind().as_str(), "replaying");

            let item_result = self.replay(&item.record).await;
            match disposition(&item.record, &item_result) {
                Disposition::Completed => {
                    if !item_result.is_success() {
                        info!(queue_item = item.id, "remote entity already gone; item resolved");
                    }
                    completed.push(item.id);
                }
                Disposition::Retain { message } => {
                    warn!(queue_item = item.id, error = %message, "item failed; kept queued");
                    retained.push((item.id, message));
                }
                Disposition::Stop => {
                    warn!(queue_item = item.id, error = %item_result, "item failed; stopping run");
                    result.update_with(item_result);
                    break;
                }
            }
        }

        let snapshot_length = total;
        let trimmed = trim(self.db, &completed, &retained, self.options.max_soft_failures)?;
        let queue_length = trimmed.queue_length.unwrap_or(snapshot_length);

        if !completed.is_empty() || trimmed.died > 0 {
            self.events
                .publish(ServiceEvent::QueueChanged { queue_length, local_change: false });
        }
        if self.link_uploaded {
            self.events.publish(ServiceEvent::LinkUploaded);
        }

        info!(
            completed = completed.len(),
            retained = retained.len(),
            queue_length,
            result = %result,
            "sync finished"
        );

        Ok(SyncReport {
            result,
            queue_length,
            link_uploaded: self.link_uploaded,
            completed,
            retained: retained.into_iter().map(|(id, _)| id).collect(),
        })
    }

    async fn replay(&mut self, record: &ChangeRecord) -> ActionResult {
        let outcome = match record {
            ChangeRecord::AddLink { url, origin_url } => {
                self.replay_add_link(url, origin_url.as_deref()).await
            }
            ChangeRecord::ArticleChange { article_id, changes } => {
                self.replay_article_change(*article_id, changes).await
            }
            ChangeRecord::TagsDelete { article_id, tag_ids } => {
                self.replay_tags_delete(*article_id, tag_ids).await
            }
            ChangeRecord::AnnotationAdd { article_id, local_annotation_id } => {
                self.replay_annotation_add(*article_id, *local_annotation_id).await
            }
            ChangeRecord::AnnotationUpdate { local_annotation_id, .. } => {
                self.replay_annotation_update(*local_annotation_id).await
            }
            ChangeRecord::AnnotationDelete { remote_annotation_id, .. } => {
                remote_outcome(self.remote.delete_annotation(*remote_annotation_id).await)
            }
            ChangeRecord::ArticleDelete { article_id } => {
                match self.remote.delete_article(*article_id).await {
                    Ok(true) => Ok(ActionResult::success()),
                    Ok(false) => Ok(ActionResult::error(ErrorType::NotFound)),
                    Err(e) => Err(e),
                }
            }
        };

        match outcome {
            Ok(result) => result,
            Err(e) => remote_error_result(e),
        }
    }

    async fn replay_add_link(
        &mut self,
        url: &str,
        origin_url: Option<&str>,
    ) -> Result<ActionResult, RemoteError> {
        if url.trim().is_empty() {
            warn!("queued link has no url; skipping");
            return Ok(ActionResult::success());
        }

        match self.remote.add_article(url, origin_url).await? {
            Some(article) => {
                debug!(article_id = article.id, "link uploaded");
                self.link_uploaded = true;
                Ok(ActionResult::success())
            }
            None => Ok(ActionResult::error_with_message(
                ErrorType::NotFound,
                "server reported not found while adding link",
            )),
        }
    }

    async fn replay_article_change(
        &mut self,
        article_id: i64,
        changes: &ChangeSet,
    ) -> Result<ActionResult, RemoteError> {
        let patch = match article_patch(self.db.connection(), article_id, changes) {
            Ok(Some(patch)) => patch,
            Ok(None) => return Ok(not_found_locally("article is not found locally")),
            Err(e) => return Ok(local_error(e)),
        };
        if patch.is_empty() {
            return Ok(ActionResult::success());
        }

        Ok(match self.remote.modify_article(article_id, &patch).await? {
            Some(()) => ActionResult::success(),
            None => ActionResult::error(ErrorType::NotFound),
        })
    }

    async fn replay_tags_delete(
        &mut self,
        article_id: i64,
        tag_ids: &[String],
    ) -> Result<ActionResult, RemoteError> {
        let mut parsed = Vec::with_capacity(tag_ids.len());
        for tag_id in tag_ids {
            match tag_id.trim().parse::<i64>() {
                Ok(id) => parsed.push(id),
                Err(_) => {
                    return Ok(ActionResult::error_with_message(
                        ErrorType::NegativeResponse,
                        format!("tag id `{tag_id}` is not a number"),
                    ))
                }
            }
        }

        let mut missing = false;
        for tag_id in parsed {
            if self.remote.delete_tag(article_id, tag_id).await?.is_none() {
                debug!(article_id, tag_id, "tag already gone remotely");
                missing = true;
            }
        }

        Ok(if missing { ActionResult::error(ErrorType::NotFound) } else { ActionResult::success() })
    }

    async fn replay_annotation_add(
        &mut self,
        article_id: i64,
        local_annotation_id: i64,
    ) -> Result<ActionResult, RemoteError> {
        let annotation = match load_annotation(self.db.connection(), local_annotation_id) {
            Ok(Some(annotation)) => annotation,
            Ok(None) => return Ok(not_found_locally("annotation is not found locally")),
            Err(e) => return Ok(local_error(e)),
        };
        if let Some(remote_id) = annotation.annotation_id {
            debug!(local_annotation_id, remote_id, "annotation already uploaded");
            return Ok(ActionResult::success());
        }

        let created = self
            .remote
            .add_annotation(
                article_id,
                &annotation.ranges,
                &annotation.text,
                annotation.quote.as_deref(),
            )
            .await?;
        let Some(remote_id) = created else {
            warn!(article_id, local_annotation_id, "article not found remotely; annotation not added");
            return Ok(ActionResult::error(ErrorType::NotFound));
        };

        if let Err(e) = store_remote_id(self.db.connection(), local_annotation_id, remote_id) {
            return Ok(local_error(e));
        }
        debug!(local_annotation_id, remote_id, "annotation uploaded");
        Ok(ActionResult::success())
    }

    async fn replay_annotation_update(
        &mut self,
        local_annotation_id: i64,
    ) -> Result<ActionResult, RemoteError> {
        let annotation = match load_annotation(self.db.connection(), local_annotation_id) {
            Ok(Some(annotation)) => annotation,
            Ok(None) => return Ok(not_found_locally("annotation is not found locally")),
            Err(e) => return Ok(local_error(e)),
        };
        let Some(remote_id) = annotation.annotation_id else {
            debug!(local_annotation_id, "annotation not uploaded yet; the add carries the text");
            return Ok(ActionResult::success());
        };

        Ok(match self.remote.update_annotation(remote_id, &annotation.text).await? {
            Some(()) => ActionResult::success(),
            None => ActionResult::error(ErrorType::NotFound),
        })
    }
}

fn remote_outcome(outcome: Result<Option<()>, RemoteError>) -> Result<ActionResult, RemoteError> {
    Ok(match outcome? {
        Some(()) => ActionResult::success(),
        None => ActionResult::error(ErrorType::NotFound),
    })
}

fn remote_error_result(error: RemoteError) -> ActionResult {
    ActionResult::error_with_message(error.error_type(), error.to_string())
        .with_cause(Arc::new(error))
}

fn not_found_locally(message: &str) -> ActionResult {
    ActionResult::error_with_message(ErrorType::NotFoundLocally, message)
}

fn local_error(error: anyhow::Error) -> ActionResult {
    let message = format!("{error:#}");
    let cause: Box<dyn std::error::Error + Send + Sync> = error.into();
    ActionResult::error_with_message(ErrorType::Unknown, message).with_cause(Arc::from(cause))
}

// ── Synchronous database helpers ────────────────────────────────────

fn pending_length(conn: &Connection) -> Result<u64> {
    OfflineQueue::new(conn).length()
}

fn snapshot(conn: &Connection) -> Result<Vec<QueueItem>> {
    OfflineQueue::new(conn).items().context("failed to snapshot offline queue")
}

/// Current local values for every field named in `changes`. `None` when the
/// article no longer exists locally.
fn article_patch(
    conn: &Connection,
    article_id: i64,
    changes: &ChangeSet,
) -> Result<Option<ArticlePatch>> {
    let Some(article) = ArticleStore::get_by_article_id(conn, article_id)? else {
        return Ok(None);
    };

    let mut patch = ArticlePatch::default();
    for change in changes.iter() {
        match change {
            ArticleChangeType::Archive => patch.archive = Some(article.archived),
            ArticleChangeType::Favorite => patch.starred = Some(article.favorite),
            ArticleChangeType::Title => patch.title = Some(article.title.clone()),
            ArticleChangeType::Tags => {
                let labels = TagStore::for_article(conn, article.id)?
                    .into_iter()
                    .map(|tag| tag.label)
                    .collect();
                patch.tags = Some(labels);
            }
        }
    }
    Ok(Some(patch))
}

fn load_annotation(conn: &Connection, local_id: i64) -> Result<Option<Annotation>> {
    AnnotationStore::get(conn, local_id)
}

fn store_remote_id(conn: &Connection, local_id: i64, remote_id: i64) -> Result<()> {
    if !AnnotationStore::set_remote_id(conn, local_id, remote_id)? {
        warn!(local_id, remote_id, "annotation vanished before its remote id was stored");
    }
    Ok(())
}

struct Trimmed {
    /// `None` when the run changed nothing.
    queue_length: Option<u64>,
    died: usize,
}

/// Remove completed items and record soft failures in one transaction.
fn trim(
    db: &mut LocalDb,
    completed: &[i64],
    retained: &[(i64, String)],
    max_soft_failures: u32,
) -> Result<Trimmed> {
    if completed.is_empty() && retained.is_empty() {
        return Ok(Trimmed { queue_length: None, died: 0 });
    }

    let now = Utc::now();
    let tx = db.transaction()?;
    let queue = OfflineQueue::new(&tx);

    queue.dequeue(completed)?;
    let mut died = 0;
    for (id, message) in retained {
        if queue.record_soft_failure(*id, message, max_soft_failures, now)? == ItemState::Dead {
            warn!(queue_item = id, error = %message, "item exhausted its retries; moved to dead");
            died += 1;
        }
    }
    let queue_length = queue.length()?;

    tx.commit().context("failed to commit queue trim")?;
    Ok(Trimmed { queue_length: Some(queue_length), died })
}
