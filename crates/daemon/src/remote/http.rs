// reqwest client for a wallabag-compatible v2 API.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shelf_common::types::AnnotationRange;
use tracing::{debug, trace};
use url::Url;

use super::{ArticlePatch, RemoteApi, RemoteArticle, RemoteError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 512;

pub struct HttpRemoteApi {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl HttpRemoteApi {
    /// `access_token` may be absent; every authenticated call then fails with
    /// `RemoteError::Configuration`.
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let mut base_url = Url::parse(base_url.trim()).map_err(|e| RemoteError::Configuration {
            message: format!("invalid server url `{base_url}`: {e}"),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(RemoteError::Configuration {
                message: format!("server url must be http or https, got `{}`", base_url.scheme()),
            });
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| RemoteError::Configuration {
                message: format!("failed to build http client: {e}"),
            })?;

        Ok(Self { client, base_url, access_token })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url.join(path).map_err(|e| RemoteError::Configuration {
            message: format!("invalid endpoint `{path}`: {e}"),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, RemoteError> {
        let token = self.access_token.as_deref().ok_or_else(|| RemoteError::Configuration {
            message: "no access token configured".to_string(),
        })?;
        Ok(self.client.request(method, self.endpoint(path)?).bearer_auth(token))
    }

    /// Send and classify. `Ok(None)` is a 404.
    async fn send(&self, request: RequestBuilder) -> Result<Option<Response>, RemoteError> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        trace!(status = status.as_u16(), url = %response.url(), "remote response");

        if status.is_success() {
            return Ok(Some(response));
        }
        if status == StatusCode::NOT_FOUND {
            debug!(url = %response.url(), "remote reported not found");
            return Ok(None);
        }

        let retry_after_secs = retry_after_secs(&response);
        let message = error_body(response).await;
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                RemoteError::Unauthorized { message }
            }
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                RemoteError::RateLimited { status: status.as_u16(), retry_after_secs, message }
            }
            s if s.is_client_error() => RemoteError::Rejected { status: s.as_u16(), message },
            s if s.is_server_error() => RemoteError::Server { status: s.as_u16(), message },
            s => RemoteError::Transport { message: format!("unexpected status {s}: {message}") },
        })
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Option<Response>, RemoteError> {
        self.send(self.request(method, path)?.json(body)).await
    }
}

fn classify_transport(error: reqwest::Error) -> RemoteError {
    if error.is_connect() || error.is_timeout() {
        RemoteError::NoNetwork { message: error.to_string() }
    } else {
        RemoteError::Transport { message: error.to_string() }
    }
}

/// Delay-seconds form of `Retry-After`; HTTP dates are ignored.
fn retry_after_secs(response: &Response) -> Option<u64> {
    response.headers().get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

async fn error_body(response: Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, RemoteError> {
    response.json::<T>().await.map_err(|e| RemoteError::Transport {
        message: format!("failed to decode response body: {e}"),
    })
}

// ── Wire bodies ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct AddEntryBody<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin_url: Option<&'a str>,
}

#[derive(Serialize)]
struct PatchEntryBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    archive: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    starred: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<String>,
}

impl<'a> From<&'a ArticlePatch> for PatchEntryBody<'a> {
    fn from(patch: &'a ArticlePatch) -> Self {
        Self {
            archive: patch.archive.map(u8::from),
            starred: patch.starred.map(u8::from),
            title: patch.title.as_deref(),
            tags: patch.tags.as_ref().map(|tags| tags.join(",")),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeBody<'a> {
    start: &'a str,
    end: &'a str,
    start_offset: i64,
    end_offset: i64,
}

#[derive(Serialize)]
struct AddAnnotationBody<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote: Option<&'a str>,
    ranges: Vec<RangeBody<'a>>,
}

#[derive(Serialize)]
struct UpdateAnnotationBody<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct AnnotationCreated {
    id: i64,
}

// ── RemoteApi ───────────────────────────────────────────────────────

impl RemoteApi for HttpRemoteApi {
    async fn is_reachable(&self) -> bool {
        let Ok(url) = self.endpoint("api/info") else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "remote unreachable");
                false
            }
        }
    }

    async fn add_article(
        &self,
        url: &str,
        origin_url: Option<&str>,
    ) -> Result<Option<RemoteArticle>, RemoteError> {
        let body = AddEntryBody { url, origin_url };
        match self.send_json(Method::POST, "api/entries.json", &body).await? {
            Some(response) => decode::<RemoteArticle>(response).await.map(Some),
            None => Ok(None),
        }
    }

    async fn modify_article(
        &self,
        article_id: i64,
        patch: &ArticlePatch,
    ) -> Result<Option<()>, RemoteError> {
        let path = format!("api/entries/{article_id}.json");
        let body = PatchEntryBody::from(patch);
        Ok(self.send_json(Method::PATCH, &path, &body).await?.map(|_| ()))
    }

    async fn delete_article(&self, article_id: i64) -> Result<bool, RemoteError> {
        let path = format!("api/entries/{article_id}.json");
        Ok(self.send(self.request(Method::DELETE, &path)?).await?.is_some())
    }

    async fn delete_tag(&self, article_id: i64, tag_id: i64) -> Result<Option<()>, RemoteError> {
        let path = format!("api/entries/{article_id}/tags/{tag_id}.json");
        Ok(self.send(self.request(Method::DELETE, &path)?).await?.map(|_| ()))
    }

    async fn add_annotation(
        &self,
        article_id: i64,
        ranges: &[AnnotationRange],
        text: &str,
        quote: Option<&str>,
    ) -> Result<Option<i64>, RemoteError> {
        let path = format!("api/annotations/{article_id}.json");
        let body = AddAnnotationBody {
            text,
            quote,
            ranges: ranges
                .iter()
                .map(|range| RangeBody {
                    start: &range.start,
                    end: &range.end,
                    start_offset: range.start_offset,
                    end_offset: range.end_offset,
                })
                .collect(),
        };
        match self.send_json(Method::POST, &path, &body).await? {
            Some(response) => Ok(Some(decode::<AnnotationCreated>(response).await?.id)),
            None => Ok(None),
        }
    }

    async fn update_annotation(
        &self,
        annotation_id: i64,
        text: &str,
    ) -> Result<Option<()>, RemoteError> {
        let path = format!("api/annotations/{annotation_id}.json");
        let body = UpdateAnnotationBody { text };
        Ok(self.send_json(Method::PUT, &path, &body).await?.map(|_| ()))
    }

    async fn delete_annotation(&self, annotation_id: i64) -> Result<Option<()>, RemoteError> {
        let path = format!("api/annotations/{annotation_id}.json");
        Ok(self.send(self.request(Method::DELETE, &path)?).await?.map(|_| ()))
    }
}
