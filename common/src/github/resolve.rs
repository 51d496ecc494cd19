use crate::error::ImportError;
use crate::github::http::{HttpFetcher, HttpRequest};
use crate::github::url::{is_commit_sha, ParsedGithubImportUrl, ResolvedRepoRef};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;

const GITHUB_API_ACCEPT: &str = "application/vnd.github+json";
const MAX_API_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Everything but unreserved characters, so a ref stays one path segment.
const REF_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Hosts the resolver talks to. Overridable so tests and GitHub Enterprise
/// mirrors can point elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubEndpoints {
    pub web_url: String,
    pub api_url: String,
    pub codeload_host: String,
}

impl Default for GithubEndpoints {
    fn default() -> Self {
        Self {
            web_url: "https://github.com".to_string(),
            api_url: "https://api.github.com".to_string(),
            codeload_host: "codeload.github.com".to_string(),
        }
    }
}

impl GithubEndpoints {
    fn web(&self) -> &str {
        self.web_url.trim_end_matches('/')
    }

    fn api(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
}

/// Pins a parsed URL to a commit SHA.
///
/// With an explicit ref the commits API answers directly. Without one the
/// `HEAD.zip` archive link is requested without following redirects; GitHub
/// answers with a redirect to the codeload host whose path carries the SHA.
pub async fn resolve_github_commit(
    parsed: &ParsedGithubImportUrl,
    fetcher: &dyn HttpFetcher,
    endpoints: &GithubEndpoints,
) -> Result<ResolvedRepoRef, ImportError> {
    let commit = match &parsed.git_ref {
        Some(git_ref) => resolve_explicit_ref(parsed, git_ref, fetcher, endpoints).await?,
        None => resolve_default_branch_head(parsed, fetcher, endpoints).await?,
    };
    tracing::debug!(
        owner = %parsed.owner,
        repo = %parsed.repo,
        commit = %commit,
        "Resolved GitHub import commit"
    );
    Ok(ResolvedRepoRef::new(parsed, commit))
}

async fn resolve_explicit_ref(
    parsed: &ParsedGithubImportUrl,
    git_ref: &str,
    fetcher: &dyn HttpFetcher,
    endpoints: &GithubEndpoints,
) -> Result<String, ImportError> {
    if is_commit_sha(git_ref) {
        return Ok(git_ref.to_ascii_lowercase());
    }

    let url = format!(
        "{}/repos/{}/{}/commits/{}",
        endpoints.api(),
        parsed.owner,
        parsed.repo,
        utf8_percent_encode(git_ref, REF_SEGMENT)
    );
    let response = fetcher
        .fetch(HttpRequest::get(url).accept(GITHUB_API_ACCEPT))
        .await?;
    if !response.is_success() {
        return Err(ImportError::UpstreamStatus {
            status: response.status,
            context: format!("resolving ref {}", git_ref),
        });
    }

    let commit: CommitResponse = response.json(MAX_API_RESPONSE_BYTES).await?;
    if !is_commit_sha(&commit.sha) {
        return Err(ImportError::InvalidCommit(commit.sha));
    }
    Ok(commit.sha.to_ascii_lowercase())
}

async fn resolve_default_branch_head(
    parsed: &ParsedGithubImportUrl,
    fetcher: &dyn HttpFetcher,
    endpoints: &GithubEndpoints,
) -> Result<String, ImportError> {
    let url = format!(
        "{}/{}/{}/archive/HEAD.zip",
        endpoints.web(),
        parsed.owner,
        parsed.repo
    );
    let response = fetcher
        .fetch(HttpRequest::get(url.clone()).manual_redirects())
        .await?;
    if !response.is_redirect() {
        return Err(ImportError::UpstreamStatus {
            status: response.status,
            context: "resolving default branch".to_string(),
        });
    }

    let location = response
        .header("location")
        .ok_or_else(|| ImportError::InvalidCommit("redirect without location".to_string()))?;
    let base = url::Url::parse(&url).map_err(|e| ImportError::InvalidUrl(e.to_string()))?;
    let target = base
        .join(location)
        .map_err(|e| ImportError::InvalidCommit(format!("bad redirect location: {}", e)))?;

    let host = target.host_str().unwrap_or_default();
    if target.scheme() != "https" || host != endpoints.codeload_host {
        return Err(ImportError::UnexpectedRedirectHost(host.to_string()));
    }

    target
        .path_segments()
        .and_then(|mut segments| segments.find(|s| is_commit_sha(s)))
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| ImportError::InvalidCommit(format!("no commit in {}", target)))
}

/// Downloads the archive for a pinned commit. A declared `content-length`
/// over the cap fails before any of the body is read; the streamed body is
/// capped as well.
pub async fn fetch_github_zip_bytes(
    resolved: &ResolvedRepoRef,
    fetcher: &dyn HttpFetcher,
    endpoints: &GithubEndpoints,
    max_zip_bytes: u64,
) -> Result<Vec<u8>, ImportError> {
    let url = format!(
        "https://{}/{}/{}/zip/{}",
        endpoints.codeload_host, resolved.owner, resolved.repo, resolved.commit
    );
    let response = fetcher.fetch(HttpRequest::get(url)).await?;
    if !response.is_success() {
        return Err(ImportError::UpstreamStatus {
            status: response.status,
            context: "downloading archive".to_string(),
        });
    }

    if let Some(length) = response.content_length() {
        if length > max_zip_bytes {
            return Err(ImportError::ArchiveTooLarge(format!(
                "archive is {} bytes, limit is {}",
                length, max_zip_bytes
            )));
        }
    }

    let bytes = response.body.read_limited(max_zip_bytes).await?;
    tracing::info!(
        owner = %resolved.owner,
        repo = %resolved.repo,
        commit = %resolved.commit,
        bytes = bytes.len(),
        "Downloaded GitHub archive"
    );
    Ok(bytes)
}
