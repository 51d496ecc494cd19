use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::entities::packages::PackageKind;
use common::services::github_import::{CandidatePreview, ImportRequest, PreviewResult};
use common::services::publish::{PackageDetail, PublishResult};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Response envelope used by every registry endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i32,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadPayload {
    pub path: String,
    /// Base64 (standard alphabet).
    pub content: String,
}

impl UploadPayload {
    pub fn new(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            content: STANDARD.encode(bytes),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishUpload {
    pub slug: String,
    pub display_name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub files: Vec<UploadPayload>,
}

/// Registry operations the sync command depends on.
#[async_trait]
pub trait Registry: Send + Sync {
    /// `None` when the slug has never been published.
    async fn package(&self, kind: PackageKind, slug: &str) -> Result<Option<PackageDetail>>;
    async fn publish(&self, kind: PackageKind, upload: &PublishUpload) -> Result<PublishResult>;
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt)
}

pub struct RegistryClient {
    http: Client,
    base_url: String,
    token: Option<String>,
    retry_base: Duration,
}

impl RegistryClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Self::with_builder(base_url, token, Client::builder())
    }

    fn with_builder(
        base_url: &str,
        token: Option<String>,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self> {
        let http = builder
            .user_agent(concat!("clawhub-cli/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            retry_base: RETRY_BASE_DELAY,
        })
    }

    #[cfg(test)]
    fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request built by `build`, retrying 429 and 5xx answers with
    /// exponential backoff. Other statuses are returned as-is.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let mut request = build(&self.http);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let resp = request.send().await?;
            let status = resp.status();
            if !is_retryable(status) || attempt >= MAX_RETRIES {
                return Ok(resp);
            }

            let delay = backoff(self.retry_base, attempt);
            tracing::warn!(
                status = status.as_u16(),
                attempt = attempt + 1,
                "Registry request failed, retrying in {}ms",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn read<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let status = resp.status();
        let text = resp.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&text)
            .with_context(|| format!("Unexpected registry response ({}): {}", status, text))?;

        if !status.is_success() {
            anyhow::bail!("Registry error {}: {}", envelope.code, envelope.message);
        }
        envelope
            .data
            .ok_or_else(|| anyhow::anyhow!("Registry response had no data"))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let resp = self.send(|http| http.post(&url).json(body)).await?;
        Self::read(resp).await
    }

    pub async fn preview(&self, url: &str) -> Result<PreviewResult> {
        self.post_json("/api/import/github/preview", &serde_json::json!({ "url": url }))
            .await
    }

    pub async fn preview_candidate(&self, url: &str, candidate_path: &str) -> Result<CandidatePreview> {
        self.post_json(
            "/api/import/github/candidate",
            &serde_json::json!({ "url": url, "candidatePath": candidate_path }),
        )
        .await
    }

    pub async fn import(&self, request: &ImportRequest) -> Result<PublishResult> {
        self.post_json("/api/import/github", request).await
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn package(&self, kind: PackageKind, slug: &str) -> Result<Option<PackageDetail>> {
        let url = self.url(&format!("/api/packages/{}/{}", kind, slug));
        let resp = self.send(|http| http.get(&url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read(resp).await.map(Some)
    }

    async fn publish(&self, kind: PackageKind, upload: &PublishUpload) -> Result<PublishResult> {
        self.post_json(&format!("/api/packages/{}/publish", kind), upload)
            .await
    }
}
