use crate::error::ImportError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

const DEFAULT_USER_AGENT: &str = "ClawHub/1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    Follow,
    /// Return 3xx responses to the caller untouched.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub redirect: RedirectPolicy,
    pub accept: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            redirect: RedirectPolicy::Follow,
            accept: None,
        }
    }

    pub fn manual_redirects(mut self) -> Self {
        self.redirect = RedirectPolicy::Manual;
        self
    }

    pub fn accept(mut self, value: &str) -> Self {
        self.accept = Some(value.to_string());
        self
    }
}

#[async_trait]
pub trait ResponseBody: Send {
    /// Reads the whole body, failing with `ArchiveTooLarge` as soon as more
    /// than `max_bytes` arrive.
    async fn read_limited(self: Box<Self>, max_bytes: u64) -> Result<Vec<u8>, ImportError>;
}

pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: BTreeMap<String, String>,
    pub body: Box<dyn ResponseBody>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub fn from_bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Box::new(BufferedBody(body.into())),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub async fn json<T: serde::de::DeserializeOwned>(
        self,
        max_bytes: u64,
    ) -> Result<T, ImportError> {
        let bytes = self.body.read_limited(max_bytes).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ImportError::Transport(format!("invalid JSON from GitHub: {}", e)))
    }
}

/// Body that is already in memory.
pub struct BufferedBody(pub Vec<u8>);

#[async_trait]
impl ResponseBody for BufferedBody {
    async fn read_limited(self: Box<Self>, max_bytes: u64) -> Result<Vec<u8>, ImportError> {
        if self.0.len() as u64 > max_bytes {
            return Err(ImportError::ArchiveTooLarge(format!(
                "response exceeds {} bytes",
                max_bytes
            )));
        }
        Ok(self.0)
    }
}

struct StreamingBody(reqwest::Response);

#[async_trait]
impl ResponseBody for StreamingBody {
    async fn read_limited(self: Box<Self>, max_bytes: u64) -> Result<Vec<u8>, ImportError> {
        let mut response = self.0;
        let mut buf = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ImportError::Transport(e.to_string()))?
        {
            if (buf.len() + chunk.len()) as u64 > max_bytes {
                return Err(ImportError::ArchiveTooLarge(format!(
                    "response exceeds {} bytes",
                    max_bytes
                )));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

/// Outbound HTTP used by the import resolver.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub fn build_github_client(token: Option<&str>, follow_redirects: bool) -> Result<Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT.parse()?);

    if let Some(raw_token) = token {
        let token = raw_token.trim();
        if !token.is_empty() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", token).parse()?,
            );
        }
    }

    let redirect = if follow_redirects {
        reqwest::redirect::Policy::limited(5)
    } else {
        reqwest::redirect::Policy::none()
    };

    Ok(Client::builder()
        .default_headers(headers)
        .redirect(redirect)
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

/// reqwest-backed fetcher. Keeps one client per redirect policy since reqwest
/// fixes the policy at build time.
#[derive(Clone)]
pub struct ReqwestFetcher {
    follow: Client,
    manual: Client,
}

impl ReqwestFetcher {
    pub fn new(token: Option<&str>) -> Result<Self> {
        Ok(Self {
            follow: build_github_client(token, true)?,
            manual: build_github_client(token, false)?,
        })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let client = match request.redirect {
            RedirectPolicy::Follow => &self.follow,
            RedirectPolicy::Manual => &self.manual,
        };
        let mut builder = client.get(&request.url);
        if let Some(accept) = &request.accept {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }

        let response = builder.send().await?;
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        Ok(HttpResponse {
            status: response.status().as_u16(),
            headers,
            body: Box::new(StreamingBody(response)),
        })
    }
}
