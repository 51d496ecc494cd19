use super::app_auth::TokenSource;
use super::USER_AGENT;
use crate::ports::{MirrorRepository, RefUpdate, TreeChange, TreeEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: GitObject,
}

#[derive(Deserialize)]
struct CommitResponse {
    tree: GitObject,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

impl TreeResponse {
    /// Stale-path detection needs every entry under the prefix, so a
    /// truncated listing is refused rather than diffed.
    fn into_complete(self, tree_sha: &str) -> Result<Vec<TreeEntry>> {
        if self.truncated {
            anyhow::bail!(
                "tree listing for {} was truncated after {} entries",
                tree_sha,
                self.tree.len()
            );
        }
        Ok(self.tree)
    }
}

#[derive(Deserialize)]
struct ContentResponse {
    content: String,
}

/// Git Data API client bound to one `owner/name` repository.
pub struct GitDataClient {
    client: Client,
    api_url: String,
    repo: String,
    tokens: Arc<dyn TokenSource>,
}

impl GitDataClient {
    pub fn new(api_url: &str, repo: &str, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo: repo.trim_matches('/').to_string(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{}", self.api_url, self.repo, path)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response> {
        let token = self.tokens.token().await?;
        let url = self.url(path);
        tracing::debug!(%method, %url, "GitHub request");

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json");
        if let Some(body) = body {
            request = request.json(&body);
        }
        Ok(request.send().await?)
    }

    async fn expect_ok(resp: Response, context: &str) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = resp.text().await.unwrap_or_default();
        Err(anyhow::anyhow!(
            "{} failed: {} {}",
            context,
            status,
            detail.chars().take(200).collect::<String>()
        ))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, context: &str) -> Result<T> {
        let resp = self.send(Method::GET, path, None).await?;
        Ok(Self::expect_ok(resp, context).await?.json().await?)
    }

    async fn post_for_sha(&self, path: &str, body: Value, context: &str) -> Result<String> {
        let resp = self.send(Method::POST, path, Some(body)).await?;
        let object: GitObject = Self::expect_ok(resp, context).await?.json().await?;
        Ok(object.sha)
    }
}

#[async_trait]
impl MirrorRepository for GitDataClient {
    async fn default_branch(&self) -> Result<String> {
        let info: RepoInfo = self.get_json("", "Repository lookup").await?;
        Ok(info.default_branch)
    }

    async fn branch_head(&self, branch: &str) -> Result<String> {
        let reference: RefResponse = self
            .get_json(&format!("/git/ref/heads/{}", branch), "Ref lookup")
            .await?;
        Ok(reference.object.sha)
    }

    async fn commit_tree(&self, commit_sha: &str) -> Result<String> {
        let commit: CommitResponse = self
            .get_json(&format!("/git/commits/{}", commit_sha), "Commit lookup")
            .await?;
        Ok(commit.tree.sha)
    }

    async fn list_tree(&self, tree_sha: &str) -> Result<Vec<TreeEntry>> {
        let tree: TreeResponse = self
            .get_json(&format!("/git/trees/{}?recursive=1", tree_sha), "Tree listing")
            .await?;
        tree.into_complete(tree_sha)
    }

    async fn read_file(&self, path: &str, branch: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .send(
                Method::GET,
                &format!("/contents/{}?ref={}", path, branch),
                None,
            )
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let content: ContentResponse = Self::expect_ok(resp, "Content read").await?.json().await?;
        let compact: String = content
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .context("Invalid base64 in contents response")?;
        Ok(Some(bytes))
    }

    async fn create_blob(&self, content: Vec<u8>) -> Result<String> {
        self.post_for_sha(
            "/git/blobs",
            json!({ "content": STANDARD.encode(content), "encoding": "base64" }),
            "Blob creation",
        )
        .await
    }

    async fn create_tree(&self, base_tree: &str, changes: Vec<TreeChange>) -> Result<String> {
        self.post_for_sha(
            "/git/trees",
            json!({ "base_tree": base_tree, "tree": changes }),
            "Tree creation",
        )
        .await
    }

    async fn create_commit(&self, message: &str, tree_sha: &str, parent: &str) -> Result<String> {
        self.post_for_sha(
            "/git/commits",
            json!({ "message": message, "tree": tree_sha, "parents": [parent] }),
            "Commit creation",
        )
        .await
    }

    async fn update_branch(&self, branch: &str, commit_sha: &str) -> Result<RefUpdate> {
        let resp = self
            .send(
                Method::PATCH,
                &format!("/git/refs/heads/{}", branch),
                Some(json!({ "sha": commit_sha, "force": false })),
            )
            .await?;
        if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(RefUpdate::Rejected);
        }
        Self::expect_ok(resp, "Ref update").await?;
        Ok(RefUpdate::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::app_auth::StaticToken;

    fn client() -> GitDataClient {
        GitDataClient::new(
            "http://127.0.0.1:1/",
            "/acme/skills/",
            Arc::new(StaticToken("t".into())),
        )
        .unwrap()
    }

    #[test]
    fn urls_are_scoped_to_the_repository() {
        let client = client();
        assert_eq!(
            client.url("/git/ref/heads/main"),
            "http://127.0.0.1:1/repos/acme/skills/git/ref/heads/main"
        );
        assert_eq!(client.url(""), "http://127.0.0.1:1/repos/acme/skills");
    }

    #[test]
    fn deletions_serialize_with_null_sha() {
        let body = json!({ "tree": vec![TreeChange::delete("skills/a/old.md")] });
        assert_eq!(body["tree"][0]["sha"], Value::Null);
        assert_eq!(body["tree"][0]["type"], "blob");
    }

    #[test]
    fn truncated_tree_listing_is_an_error() {
        let listing = json!({
            "sha": "t1",
            "tree": [{ "path": "skills/a/SKILL.md", "mode": "100644", "type": "blob", "sha": "b1" }],
            "truncated": true,
        });
        let tree: TreeResponse = serde_json::from_value(listing.clone()).unwrap();
        let err = tree.into_complete("t1").unwrap_err();
        assert!(err.to_string().contains("truncated"));

        let mut complete = listing;
        complete["truncated"] = Value::Bool(false);
        let tree: TreeResponse = serde_json::from_value(complete).unwrap();
        let entries = tree.into_complete("t1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "skills/a/SKILL.md");
    }

    #[tokio::test]
    async fn client_forwards_transport_errors() {
        let client = client();
        let mirror: &dyn MirrorRepository = &client;
        assert!(mirror.default_branch().await.is_err());
        assert!(mirror.read_file("skills/_meta.json", "main").await.is_err());
        assert!(mirror.update_branch("main", "abc").await.is_err());
    }
}
