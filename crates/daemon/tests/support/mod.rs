// Scripted in-memory remote shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use shelf_daemon::remote::{ArticlePatch, RemoteApi, RemoteArticle, RemoteError};
use shelf_daemon::store::articles::{ArticleStore, NewArticle};
use shelf_daemon::store::db::LocalDb;
use shelf_common::types::AnnotationRange;

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddArticle { url: String, origin_url: Option<String> },
    ModifyArticle { article_id: i64, patch: ArticlePatch },
    DeleteArticle(i64),
    DeleteTag { article_id: i64, tag_id: i64 },
    AddAnnotation { article_id: i64, text: String, quote: Option<String> },
    UpdateAnnotation { annotation_id: i64, text: String },
    DeleteAnnotation(i64),
}

/// Outcome of the next remote call. Calls past the end of the script succeed.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    NotFound,
    Fail(RemoteError),
}

#[derive(Default)]
struct Inner {
    unreachable: AtomicBool,
    calls: Mutex<Vec<Call>>,
    script: Mutex<VecDeque<Reply>>,
    next_id: AtomicI64,
}

#[derive(Clone, Default)]
pub struct MockRemote {
    inner: Arc<Inner>,
}

impl MockRemote {
    pub fn new() -> Self {
        let remote = Self::default();
        remote.inner.next_id.store(1000, Ordering::SeqCst);
        remote
    }

    pub fn unreachable() -> Self {
        let remote = Self::new();
        remote.inner.unreachable.store(true, Ordering::SeqCst);
        remote
    }

    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.inner.script.lock().expect("script lock").extend(replies);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().expect("calls lock").clone()
    }

    fn next(&self, call: Call) -> Reply {
        self.inner.calls.lock().expect("calls lock").push(call);
        self.inner.script.lock().expect("script lock").pop_front().unwrap_or(Reply::Ok)
    }

    fn new_id(&self) -> i64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn unit(&self, call: Call) -> Result<Option<()>, RemoteError> {
        match self.next(call) {
            Reply::Ok => Ok(Some(())),
            Reply::NotFound => Ok(None),
            Reply::Fail(error) => Err(error),
        }
    }
}

impl RemoteApi for MockRemote {
    async fn is_reachable(&self) -> bool {
        !self.inner.unreachable.load(Ordering::SeqCst)
    }

    async fn add_article(
        &self,
        url: &str,
        origin_url: Option<&str>,
    ) -> Result<Option<RemoteArticle>, RemoteError> {
        let call =
            Call::AddArticle { url: url.to_string(), origin_url: origin_url.map(str::to_string) };
        match self.next(call) {
            Reply::Ok => Ok(Some(RemoteArticle {
                id: self.new_id(),
                url: Some(url.to_string()),
                title: None,
            })),
            Reply::NotFound => Ok(None),
            Reply::Fail(error) => Err(error),
        }
    }

    async fn modify_article(
        &self,
        article_id: i64,
        patch: &ArticlePatch,
    ) -> Result<Option<()>, RemoteError> {
        self.unit(Call::ModifyArticle { article_id, patch: patch.clone() })
    }

    async fn delete_article(&self, article_id: i64) -> Result<bool, RemoteError> {
        match self.next(Call::DeleteArticle(article_id)) {
            Reply::Ok => Ok(true),
            Reply::NotFound => Ok(false),
            Reply::Fail(error) => Err(error),
        }
    }

    async fn delete_tag(&self, article_id: i64, tag_id: i64) -> Result<Option<()>, RemoteError> {
        self.unit(Call::DeleteTag { article_id, tag_id })
    }

    async fn add_annotation(
        &self,
        article_id: i64,
        _ranges: &[AnnotationRange],
        text: &str,
        quote: Option<&str>,
    ) -> Result<Option<i64>, RemoteError> {
        let call = Call::AddAnnotation {
            article_id,
            text: text.to_string(),
            quote: quote.map(str::to_string),
        };
        match self.next(call) {
            Reply::Ok => Ok(Some(self.new_id())),
            Reply::NotFound => Ok(None),
            Reply::Fail(error) => Err(error),
        }
    }

    async fn update_annotation(
        &self,
        annotation_id: i64,
        text: &str,
    ) -> Result<Option<()>, RemoteError> {
        self.unit(Call::UpdateAnnotation { annotation_id, text: text.to_string() })
    }

    async fn delete_annotation(&self, annotation_id: i64) -> Result<Option<()>, RemoteError> {
        self.unit(Call::DeleteAnnotation(annotation_id))
    }
}

pub fn server_error() -> RemoteError {
    RemoteError::Server { status: 500, message: "internal error".into() }
}

pub fn rejected() -> RemoteError {
    RemoteError::Rejected { status: 422, message: "validation failed".into() }
}

pub fn rate_limited() -> RemoteError {
    RemoteError::RateLimited {
        status: 429,
        retry_after_secs: Some(60),
        message: "too many requests".into(),
    }
}

pub fn seed_article(db: &LocalDb, article_id: i64) -> i64 {
    ArticleStore::insert(
        db.connection(),
        &NewArticle::new(article_id, format!("https://example.com/{article_id}"), "Title"),
        Utc::now(),
    )
    .expect("article should insert")
}
