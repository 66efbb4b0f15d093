// The service run by the task runner: local mutations, queue-only requests,
// sync runs and article updates, one job at a time.
//
// Every request ends with exactly one `ActionCompleted` event. Local
// mutations commit their entity change and queue change in one transaction
// and publish only after the commit.

pub mod operations;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use shelf_common::action::{Action, ActionRequest, ActionResult, ErrorType, UpdateType};
use shelf_common::events::{Operation, ServiceEvent};
use tracing::{debug, error, info, warn};

use crate::events::EventBus;
use crate::queue::OfflineQueue;
use crate::remote::RemoteApi;
use crate::runner::TaskHandler;
use crate::store::db::LocalDb;
use crate::sync::{SyncEngine, SyncOptions};

pub use operations::LocalOperation;
use operations::{Applied, Step};

/// Work accepted by [`ShelfService`].
#[derive(Debug, Clone)]
pub enum Task {
    Request(ActionRequest),
    Local(LocalOperation),
}

impl From<ActionRequest> for Task {
    fn from(request: ActionRequest) -> Self {
        Self::Request(request)
    }
}

impl From<LocalOperation> for Task {
    fn from(operation: LocalOperation) -> Self {
        Self::Local(operation)
    }
}

// ── Article updates ─────────────────────────────────────────────────

/// Reports progress of a long-running operation as `Progress` events.
pub struct ProgressReporter<'a> {
    events: &'a EventBus,
    request: &'a ActionRequest,
    operation: Operation,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(events: &'a EventBus, request: &'a ActionRequest, operation: Operation) -> Self {
        Self { events, request, operation }
    }

    pub fn report(&self, current: u64, total: u64) {
        self.events.publish(ServiceEvent::Progress {
            operation: self.operation,
            request: self.request.clone(),
            current,
            total,
        });
    }
}

/// Pulls article state from the server into the local database.
#[async_trait]
pub trait ArticleUpdater: Send + Sync {
    async fn update_articles(
        &self,
        db: &mut LocalDb,
        update_type: UpdateType,
        progress: &ProgressReporter<'_>,
    ) -> Result<ActionResult>;

    /// Remove local articles that no longer exist on the server.
    async fn sweep_deleted_articles(
        &self,
        db: &mut LocalDb,
        progress: &ProgressReporter<'_>,
    ) -> Result<ActionResult>;
}

// ── Service ─────────────────────────────────────────────────────────

pub struct ShelfService<R: RemoteApi> {
    db: LocalDb,
    remote: R,
    events: EventBus,
    updater: Option<Box<dyn ArticleUpdater>>,
    sync_options: SyncOptions,
}

impl<R: RemoteApi> ShelfService<R> {
    pub fn new(db: LocalDb, remote: R, events: EventBus) -> Self {
        Self { db, remote, events, updater: None, sync_options: SyncOptions::default() }
    }

    pub fn with_updater(mut self, updater: Box<dyn ArticleUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn with_sync_options(mut self, options: SyncOptions) -> Self {
        self.sync_options = options;
        self
    }

    pub fn db(&self) -> &LocalDb {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut LocalDb {
        &mut self.db
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Serve one request and publish its `ActionCompleted` event.
    pub async fn serve(&mut self, request: ActionRequest) -> Result<ActionResult> {
        info!(action = ?request.action(), article_id = ?request.article_id(), "serving request");

        let outcome = match request.action() {
            Action::SyncQueue => self.sync_queue(&request).await,
            Action::UpdateArticles | Action::SweepDeletedArticles => {
                self.update_articles(&request).await
            }
            _ => self.serve_simple(&request),
        };

        let result = match &outcome {
            Ok(result) => result.clone(),
            Err(e) => {
                error!(action = ?request.action(), error = %e, "request failed");
                ActionResult::error_with_message(ErrorType::Unknown, format!("{e:#}"))
            }
        };
        debug!(action = ?request.action(), %result, "request completed");
        self.events.publish(ServiceEvent::ActionCompleted { request, result: result.clone() });

        outcome.map(|_| result)
    }

    /// Apply one local mutation.
    pub fn perform(&mut self, operation: LocalOperation) -> Result<()> {
        debug!(operation = operation.name(), "applying local operation");
        self.apply_step(&Step::Local(operation))
    }

    fn serve_simple(&mut self, request: &ActionRequest) -> Result<ActionResult> {
        let step = match operations::parse_request(request) {
            Ok(step) => step,
            Err(e) => {
                warn!(action = ?request.action(), error = %e, "malformed request ignored");
                return Ok(ActionResult::error(ErrorType::Unknown).with_cause(Arc::new(e)));
            }
        };
        self.apply_step(&step)?;
        Ok(ActionResult::success())
    }

    fn apply_step(&mut self, step: &Step) -> Result<()> {
        let tx = self.db.transaction()?;
        let applied = operations::apply(&tx, step, Utc::now())?;
        let queue_length =
            if applied.queue_changed { Some(OfflineQueue::new(&tx).length()?) } else { None };
        tx.commit()?;

        self.publish_applied(applied, queue_length);
        Ok(())
    }

    fn publish_applied(&self, applied: Applied, queue_length: Option<u64>) {
        if applied.everything_removed {
            self.events.publish(ServiceEvent::EverythingRemoved);
        }
        for (article_id, change) in applied.article_changes {
            self.events.publish(ServiceEvent::ArticleChanged { article_id, change });
        }
        if let Some(queue_length) = queue_length {
            self.events.publish(ServiceEvent::QueueChanged { queue_length, local_change: true });
        }
    }

    async fn sync_queue(&mut self, request: &ActionRequest) -> Result<ActionResult> {
        self.events.publish(ServiceEvent::Started {
            operation: Operation::SyncQueue,
            request: request.clone(),
        });

        let report = SyncEngine::new(&mut self.db, &self.remote, &self.events)
            .with_options(self.sync_options.clone())
            .run(request)
            .await;

        let (result, queue_length) = match report {
            Ok(report) => (report.result, Some(report.queue_length)),
            Err(e) => {
                error!(error = %e, "sync run failed locally");
                (ActionResult::error_with_message(ErrorType::Unknown, format!("{e:#}")), None)
            }
        };

        self.events.publish(ServiceEvent::Finished {
            operation: Operation::SyncQueue,
            request: request.clone(),
            result: result.clone(),
            queue_length,
        });
        Ok(result)
    }

    async fn update_articles(&mut self, request: &ActionRequest) -> Result<ActionResult> {
        let operation = match request.action() {
            Action::SweepDeletedArticles => Operation::SweepDeletedArticles,
            _ => Operation::UpdateArticles,
        };
        self.events.publish(ServiceEvent::Started { operation, request: request.clone() });

        let result = if !self.remote.is_reachable().await {
            info!(?operation, "remote unreachable; update skipped");
            ActionResult::error(ErrorType::NoNetwork)
        } else {
            match &self.updater {
                None => ActionResult::error_with_message(
                    ErrorType::Unknown,
                    "no article updater configured",
                ),
                Some(updater) => {
                    let progress = ProgressReporter::new(&self.events, request, operation);
                    let outcome = match operation {
                        Operation::SweepDeletedArticles => {
                            updater.sweep_deleted_articles(&mut self.db, &progress).await
                        }
                        _ => {
                            let update_type = request.update_type().unwrap_or(UpdateType::Fast);
                            updater.update_articles(&mut self.db, update_type, &progress).await
                        }
                    };
                    outcome.unwrap_or_else(|e| {
                        error!(?operation, error = %e, "article update failed");
                        ActionResult::error_with_message(ErrorType::Unknown, format!("{e:#}"))
                    })
                }
            }
        };

        self.events.publish(ServiceEvent::Finished {
            operation,
            request: request.clone(),
            result: result.clone(),
            queue_length: None,
        });
        Ok(result)
    }
}

impl<R: RemoteApi> TaskHandler for ShelfService<R> {
    type Task = Task;

    async fn handle(&mut self, task: Task) -> Result<()> {
        match task {
            Task::Request(request) => self.serve(request).await.map(|_| ()),
            Task::Local(operation) => self.perform(operation),
        }
    }
}
