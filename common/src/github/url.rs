use crate::domain::paths::{normalize_repo_path, parent_dir};
use crate::error::ImportError;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

/// A GitHub import URL broken into its parts. `path` is empty for the
/// repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedGithubImportUrl {
    pub owner: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub path: String,
    pub original_url: String,
}

impl ParsedGithubImportUrl {
    pub fn repo_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }
}

/// A parsed URL pinned to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRepoRef {
    pub owner: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub path: String,
    pub commit: String,
    pub repo_url: String,
    pub original_url: String,
}

impl ResolvedRepoRef {
    pub fn new(parsed: &ParsedGithubImportUrl, commit: String) -> Self {
        Self {
            owner: parsed.owner.clone(),
            repo: parsed.repo.clone(),
            git_ref: parsed.git_ref.clone(),
            path: parsed.path.clone(),
            commit,
            repo_url: parsed.repo_url(),
            original_url: parsed.original_url.clone(),
        }
    }
}

pub fn is_commit_sha(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_valid_name(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Path segments arrive percent-encoded; folder names with spaces or
/// non-ASCII characters only match archive entries once decoded.
fn decode_segment(segment: &str) -> Result<String, ImportError> {
    let decoded = percent_decode_str(segment)
        .decode_utf8()
        .map_err(|_| ImportError::InvalidUrl("path is not valid UTF-8".to_string()))?;
    if decoded.contains('\\') {
        return Err(ImportError::InvalidUrl(
            "backslashes are not allowed".to_string(),
        ));
    }
    if decoded == "." || decoded == ".." {
        return Err(ImportError::InvalidUrl("path traversal is not allowed".to_string()));
    }
    Ok(decoded.into_owned())
}

/// Accepts `https://github.com/{owner}/{repo}` plus its `/tree/{ref}/{path}`
/// and `/blob/{ref}/{path}/{file}` forms. Blob URLs target the file's parent
/// directory. Refs are taken as a single path segment.
pub fn parse_github_import_url(raw: &str) -> Result<ParsedGithubImportUrl, ImportError> {
    let original_url = raw.trim().to_string();
    let lowered = original_url.to_ascii_lowercase();
    if lowered.contains("%5c") || original_url.contains('\\') {
        return Err(ImportError::InvalidUrl(
            "backslashes are not allowed".to_string(),
        ));
    }

    let url = url::Url::parse(&original_url)
        .map_err(|e| ImportError::InvalidUrl(format!("{}", e)))?;
    if url.scheme() != "https" {
        return Err(ImportError::InvalidUrl("only https URLs are supported".to_string()));
    }
    if url.host_str() != Some("github.com") || url.port().is_some() {
        return Err(ImportError::InvalidUrl("only github.com URLs are supported".to_string()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ImportError::InvalidUrl("credentials are not allowed".to_string()));
    }

    let segments: Vec<String> = url
        .path_segments()
        .map(|s| {
            s.filter(|seg| !seg.is_empty())
                .map(decode_segment)
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();
    if segments.len() < 2 {
        return Err(ImportError::InvalidUrl("expected /{owner}/{repo}".to_string()));
    }

    let owner = segments[0].as_str();
    let repo = segments[1].strip_suffix(".git").unwrap_or(segments[1].as_str());
    if !is_valid_name(owner) || !is_valid_name(repo) {
        return Err(ImportError::InvalidUrl("invalid owner or repository name".to_string()));
    }

    let (git_ref, path) = match segments.get(2).map(String::as_str) {
        None => (None, String::new()),
        Some("tree") => {
            let git_ref = segments
                .get(3)
                .ok_or_else(|| ImportError::InvalidUrl("tree URL is missing a ref".to_string()))?;
            (Some(git_ref.clone()), segments[4..].join("/"))
        }
        Some("blob") => {
            let git_ref = segments
                .get(3)
                .ok_or_else(|| ImportError::InvalidUrl("blob URL is missing a ref".to_string()))?;
            if segments.len() < 5 {
                return Err(ImportError::InvalidUrl(
                    "blob URL is missing a file path".to_string(),
                ));
            }
            (Some(git_ref.clone()), parent_dir(&segments[4..].join("/")))
        }
        Some(other) => {
            return Err(ImportError::InvalidUrl(format!(
                "unsupported GitHub URL form: /{}",
                other
            )))
        }
    };

    let path = normalize_repo_path(&path);
    if path.split('/').any(|seg| seg == "." || seg == "..") {
        return Err(ImportError::InvalidUrl("path traversal is not allowed".to_string()));
    }

    Ok(ParsedGithubImportUrl {
        owner: owner.to_string(),
        repo: repo.to_string(),
        git_ref,
        path,
        original_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidates::{candidates_in_scope, ImportCandidate};

    #[test]
    fn parses_tree_url_with_nested_path() -> anyhow::Result<()> {
        let url = "https://github.com/a/b/tree/main/skills/foo";
        let parsed = parse_github_import_url(url)?;
        assert_eq!(
            parsed,
            ParsedGithubImportUrl {
                owner: "a".to_string(),
                repo: "b".to_string(),
                git_ref: Some("main".to_string()),
                path: "skills/foo".to_string(),
                original_url: url.to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn parses_root_url_and_strips_git_suffix() -> anyhow::Result<()> {
        let parsed = parse_github_import_url("https://github.com/acme/skills.git/")?;
        assert_eq!(parsed.repo, "skills");
        assert_eq!(parsed.git_ref, None);
        assert_eq!(parsed.path, "");
        assert_eq!(parsed.repo_url(), "https://github.com/acme/skills");
        Ok(())
    }

    #[test]
    fn blob_url_targets_parent_directory() -> anyhow::Result<()> {
        let parsed = parse_github_import_url("https://github.com/a/b/blob/dev/skills/foo/SKILL.md")?;
        assert_eq!(parsed.git_ref.as_deref(), Some("dev"));
        assert_eq!(parsed.path, "skills/foo");

        let root = parse_github_import_url("https://github.com/a/b/blob/dev/SKILL.md")?;
        assert_eq!(root.path, "");
        Ok(())
    }

    #[test]
    fn rejects_other_schemes_and_hosts() {
        for url in [
            "http://github.com/a/b",
            "https://gitlab.com/a/b",
            "https://www.github.com/a/b",
            "https://github.com:8443/a/b",
            "https://user@github.com/a/b",
        ] {
            assert!(
                matches!(parse_github_import_url(url), Err(ImportError::InvalidUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_malformed_tree_and_blob() {
        assert!(parse_github_import_url("https://github.com/a/b/tree").is_err());
        assert!(parse_github_import_url("https://github.com/a/b/blob/main").is_err());
        assert!(parse_github_import_url("https://github.com/a/b/pulls").is_err());
        assert!(parse_github_import_url("https://github.com/a").is_err());
    }

    #[test]
    fn rejects_encoded_backslashes_and_traversal() {
        assert!(parse_github_import_url("https://github.com/a/b/tree/main/x%5C..%5Cy").is_err());
        assert!(parse_github_import_url("https://github.com/a/b/tree/main/x%5cy").is_err());
    }

    #[test]
    fn encoded_segments_are_decoded() -> anyhow::Result<()> {
        let parsed =
            parse_github_import_url("https://github.com/a/b/tree/feature%2Dx/my%20skills/caf%C3%A9")?;
        assert_eq!(parsed.git_ref.as_deref(), Some("feature-x"));
        assert_eq!(parsed.path, "my skills/café");

        let blob = parse_github_import_url("https://github.com/a/b/blob/main/my%20skills/foo/SKILL.md")?;
        assert_eq!(blob.path, "my skills/foo");
        Ok(())
    }

    #[test]
    fn decoded_path_matches_archive_candidates() -> anyhow::Result<()> {
        let parsed = parse_github_import_url("https://github.com/a/b/tree/main/my%20skills/foo")?;
        let candidates = vec![ImportCandidate {
            path: "my skills/foo".to_string(),
            readme_path: "my skills/foo/SKILL.md".to_string(),
            name: None,
            description: None,
        }];
        assert_eq!(candidates_in_scope(candidates, &parsed.path).len(), 1);
        Ok(())
    }

    #[test]
    fn encoded_separators_cannot_smuggle_traversal() {
        assert!(parse_github_import_url("https://github.com/a/b/tree/main/x%2F..%2Fy").is_err());
        assert!(parse_github_import_url("https://github.com/a/b/tree/main/%ff").is_err());
    }

    #[test]
    fn commit_sha_shape() {
        assert!(is_commit_sha(&"a".repeat(40)));
        assert!(!is_commit_sha(&"a".repeat(39)));
        assert!(!is_commit_sha(&"g".repeat(40)));
    }
}
