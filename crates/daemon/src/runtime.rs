// Standalone daemon wiring: config → database → remote → service → runner.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use shelf_common::action::ActionRequest;
use shelf_common::events::ServiceEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{self, ShelfConfig};
use crate::events::EventBus;
use crate::remote::{HttpRemoteApi, RemoteApi};
use crate::runner::{RunnerConfig, RunnerError, TaskRunner};
use crate::security;
use crate::service::{ShelfService, Task};
use crate::store::db::LocalDb;

/// Command-line overrides for a standalone run.
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub config_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    /// Submit a sync as soon as the daemon is up.
    pub sync_now: bool,
}

/// Arguments of `shelfd login`.
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub config_path: Option<PathBuf>,
    /// Written to `[server] url` when given.
    pub server_url: Option<String>,
    pub token: String,
}

/// A started service: its runner plus the event logger.
pub struct Daemon<R: RemoteApi> {
    runner: TaskRunner<ShelfService<R>>,
    events: EventBus,
    logger: JoinHandle<()>,
}

impl<R: RemoteApi> Daemon<R> {
    /// Must be called from inside a tokio runtime.
    pub fn start(service: ShelfService<R>, config: RunnerConfig) -> Result<Self, RunnerError> {
        let events = service.events().clone();
        let logger = spawn_event_logger(&events);
        let runner = TaskRunner::new(service, config)?;
        Ok(Self { runner, events, logger })
    }

    pub fn submit(&self, task: impl Into<Task>) -> Result<(), RunnerError> {
        self.runner.submit(task.into())
    }

    pub fn request_sync(&self) -> Result<(), RunnerError> {
        self.submit(ActionRequest::sync_queue())
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Serve until `shutdown` resolves, submitting a sync every
    /// `sync_interval` when one is set. The in-flight job is allowed to finish.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()>,
        sync_interval: Option<Duration>,
    ) -> Result<()> {
        let mut ticker = sync_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = next_tick(&mut ticker) => {
                    debug!("periodic sync due");
                    self.request_sync().context("failed to submit periodic sync")?;
                }
            }
        }

        info!("daemon shutting down");
        self.runner.shutdown();
        self.runner.join().await;
        self.logger.abort();
        Ok(())
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

pub async fn run_standalone(options: DaemonOptions) -> Result<()> {
    let config = match &options.config_path {
        Some(path) => ShelfConfig::load_from(path)
            .with_context(|| format!("failed to load config from `{}`", path.display()))?,
        None => ShelfConfig::load().context("failed to load config")?,
    };

    let db_path = options
        .db_path
        .clone()
        .or_else(|| config.db_path())
        .ok_or_else(|| anyhow!("could not determine database path; pass --db"))?;
    let db = LocalDb::open(&db_path)?;

    let base_url = config
        .server
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("no server url configured; set [server] url in config.toml"))?;
    let token = match security::access_token() {
        Ok(token) => token,
        Err(error) => {
            warn!(error = %error, "could not read access token; continuing without one");
            None
        }
    };
    if token.is_none() {
        warn!("no access token available; sync will fail with INCORRECT_CONFIGURATION");
    }
    let remote = HttpRemoteApi::new(base_url, token, config.server.timeout())
        .context("failed to build remote client")?;

    let service = ShelfService::new(db, remote, EventBus::new())
        .with_sync_options(config.sync_options());
    let daemon = Daemon::start(service, config.runner_config())?;

    info!(db_path = %db_path.display(), server = base_url, "shelf daemon started");
    if options.sync_now {
        daemon.request_sync()?;
    }

    daemon
        .run_until(
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            config.sync_interval(),
        )
        .await
}

/// Store the access token in the keychain and, when a server url is given,
/// record it in the config file.
pub fn login(options: LoginOptions) -> Result<()> {
    if let Some(url) = &options.server_url {
        let path = match &options.config_path {
            Some(path) => path.clone(),
            None => config::config_path()
                .ok_or_else(|| anyhow!("could not determine home directory; pass --config"))?,
        };
        write_server_url(&path, url)?;
        info!(config = %path.display(), server = url.trim(), "server url saved");
    }
    security::store_access_token(&options.token)?;
    info!("access token stored in keychain");
    Ok(())
}

pub fn logout() -> Result<()> {
    security::clear_access_token()?;
    info!("access token removed from keychain");
    Ok(())
}

/// Set `[server] url` in the config at `path`, keeping every other setting.
fn write_server_url(path: &Path, url: &str) -> Result<ShelfConfig> {
    let mut config = ShelfConfig::load_or_default(Some(path))
        .with_context(|| format!("failed to load config from `{}`", path.display()))?;
    config.set_server_url(url)?;
    config
        .save_to(path)
        .with_context(|| format!("failed to write config to `{}`", path.display()))?;
    Ok(config)
}

fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &ServiceEvent) {
    match event {
        ServiceEvent::QueueChanged { queue_length, local_change } => {
            info!(queue_length, local_change, "queue changed");
        }
        ServiceEvent::ArticleChanged { article_id, change } => {
            debug!(article_id, ?change, "article changed");
        }
        ServiceEvent::EverythingRemoved => info!("local data wiped"),
        ServiceEvent::Started { operation, .. } => info!(?operation, "operation started"),
        ServiceEvent::Progress { operation, current, total, .. } => {
            debug!(?operation, current, total, "operation progress");
        }
        ServiceEvent::Finished { operation, result, queue_length, .. } => {
            info!(?operation, %result, ?queue_length, "operation finished");
        }
        ServiceEvent::LinkUploaded => info!("link uploaded"),
        ServiceEvent::ActionCompleted { request, result } => {
            debug!(action = ?request.action(), %result, "action completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ArticlePatch, RemoteArticle, RemoteError};
    use shelf_common::action::{Action, ErrorType};
    use shelf_common::types::AnnotationRange;

    /// A server that is never reachable.
    struct Unreachable;

    impl RemoteApi for Unreachable {
        async fn is_reachable(&self) -> bool {
            false
        }

        async fn add_article(
            &self,
            _url: &str,
            _origin_url: Option<&str>,
        ) -> Result<Option<RemoteArticle>, RemoteError> {
            Err(RemoteError::NoNetwork { message: "offline".into() })
        }

        async fn modify_article(
            &self,
            _article_id: i64,
            _patch: &ArticlePatch,
        ) -> Result<Option<()>, RemoteError> {
            Err(RemoteError::NoNetwork { message: "offline".into() })
        }

        async fn delete_article(&self, _article_id: i64) -> Result<bool, RemoteError> {
            Err(RemoteError::NoNetwork { message: "offline".into() })
        }

        async fn delete_tag(&self, _article_id: i64, _tag_id: i64) -> Result<Option<()>, RemoteError> {
            Err(RemoteError::NoNetwork { message: "offline".into() })
        }

        async fn add_annotation(
            &self,
            _article_id: i64,
            _ranges: &[AnnotationRange],
            _text: &str,
            _quote: Option<&str>,
        ) -> Result<Option<i64>, RemoteError> {
            Err(RemoteError::NoNetwork { message: "offline".into() })
        }

        async fn update_annotation(
            &self,
            _annotation_id: i64,
            _text: &str,
        ) -> Result<Option<()>, RemoteError> {
            Err(RemoteError::NoNetwork { message: "offline".into() })
        }

        async fn delete_annotation(&self, _annotation_id: i64) -> Result<Option<()>, RemoteError> {
            Err(RemoteError::NoNetwork { message: "offline".into() })
        }
    }

    fn daemon() -> Daemon<Unreachable> {
        let db = LocalDb::open_in_memory().expect("database should open");
        let service = ShelfService::new(db, Unreachable, EventBus::new());
        Daemon::start(service, RunnerConfig::default()).expect("daemon should start")
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sync_fires_every_interval() {
        let daemon = daemon();
        let mut rx = daemon.events().subscribe();

        daemon
            .run_until(tokio::time::sleep(Duration::from_millis(3500)), Some(Duration::from_secs(1)))
            .await
            .expect("daemon should stop cleanly");

        let mut syncs = 0;
        while let Ok(event) = rx.try_recv() {
            if let ServiceEvent::ActionCompleted { request, result } = event {
                assert_eq!(request.action(), Action::SyncQueue);
                assert_eq!(result.error_type(), Some(ErrorType::NoNetwork));
                syncs += 1;
            }
        }
        assert_eq!(syncs, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_interval_means_no_sync() {
        let daemon = daemon();
        let mut rx = daemon.events().subscribe();

        daemon
            .run_until(tokio::time::sleep(Duration::from_secs(10)), None)
            .await
            .expect("daemon should stop cleanly");

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn server_url_is_merged_into_existing_config() {
        let dir = tempfile::TempDir::new().expect("tempdir should be created");
        let path = dir.path().join("config.toml");
        let mut existing = ShelfConfig::default();
        existing.sync.interval_sec = 900;
        existing.save_to(&path).expect("config should save");

        write_server_url(&path, "https://wallabag.example.com").expect("url should be written");

        let loaded = ShelfConfig::load_from(&path).expect("config should load");
        assert_eq!(loaded.server.url.as_deref(), Some("https://wallabag.example.com"));
        assert_eq!(loaded.sync.interval_sec, 900);
    }

    #[test]
    fn invalid_server_url_leaves_config_untouched() {
        let dir = tempfile::TempDir::new().expect("tempdir should be created");
        let path = dir.path().join("config.toml");

        assert!(write_server_url(&path, "ftp://nope").is_err());
        assert!(!path.exists());
    }
}
