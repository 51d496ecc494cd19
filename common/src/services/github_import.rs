use super::publish::{PublishActor, PublishRequest, PublishResult, PublishService, UploadFile};
use super::ServiceError;
use crate::domain::archive::{extract_zip_entries, strip_github_zip_root, ZipEntryMap};
use crate::domain::candidates::{candidates_in_scope, detect_github_import_candidates, ImportCandidate};
use crate::domain::paths::{is_path_under_root, normalize_repo_path, sanitize_path};
use crate::domain::references::compute_default_selected_paths;
use crate::domain::skill::{
    bump_version, display_name_from_slug, sanitize_slug, slug_attempts, VersionBump,
    INITIAL_VERSION,
};
use crate::entities::package_versions::VersionSource;
use crate::entities::packages::PackageKind;
use crate::error::ImportError;
use crate::github::http::HttpFetcher;
use crate::github::{
    fetch_github_zip_bytes, parse_github_import_url, resolve_github_commit, GithubEndpoints,
    ResolvedRepoRef,
};
use crate::settings::ImportSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub resolved: ResolvedRepoRef,
    pub candidates: Vec<ImportCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFile {
    pub path: String,
    pub size: u64,
    pub default_selected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePreview {
    pub resolved: ResolvedRepoRef,
    pub candidate: ImportCandidate,
    pub files: Vec<CandidateFile>,
    pub default_selected_paths: Vec<String>,
    pub suggested_slug: String,
    pub suggested_display_name: String,
    pub suggested_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub url: String,
    pub commit: String,
    pub candidate_path: String,
    pub selected_paths: Vec<String>,
    pub slug: String,
    pub display_name: String,
    pub version: String,
    #[serde(default)]
    pub changelog: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[async_trait]
pub trait GithubImportService: Send + Sync {
    async fn preview(&self, url: &str) -> Result<PreviewResult, ServiceError>;

    async fn preview_candidate(
        &self,
        actor: &PublishActor,
        url: &str,
        candidate_path: &str,
    ) -> Result<CandidatePreview, ServiceError>;

    async fn import(
        &self,
        actor: &PublishActor,
        request: ImportRequest,
    ) -> Result<PublishResult, ServiceError>;
}

/// Archive contents for one resolved URL, with candidates already scoped to
/// the URL's path.
struct LoadedArchive {
    resolved: ResolvedRepoRef,
    files: ZipEntryMap,
    candidates: Vec<ImportCandidate>,
}

impl LoadedArchive {
    fn candidate(&self, candidate_path: &str) -> Result<&ImportCandidate, ImportError> {
        let wanted = normalize_repo_path(candidate_path);
        self.candidates
            .iter()
            .find(|c| c.path == wanted)
            .ok_or(ImportError::CandidateNotFound(wanted))
    }
}

pub struct GithubImportServiceImpl {
    fetcher: Arc<dyn HttpFetcher>,
    publish: Arc<dyn PublishService>,
    endpoints: GithubEndpoints,
    limits: ImportSettings,
}

impl GithubImportServiceImpl {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        publish: Arc<dyn PublishService>,
        endpoints: GithubEndpoints,
        limits: ImportSettings,
    ) -> Self {
        Self {
            fetcher,
            publish,
            endpoints,
            limits,
        }
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedRepoRef, ImportError> {
        let parsed = parse_github_import_url(url)?;
        resolve_github_commit(&parsed, self.fetcher.as_ref(), &self.endpoints).await
    }

    async fn load(&self, resolved: ResolvedRepoRef) -> Result<LoadedArchive, ImportError> {
        let zip = fetch_github_zip_bytes(
            &resolved,
            self.fetcher.as_ref(),
            &self.endpoints,
            self.limits.max_zip_bytes,
        )
        .await?;
        let files = strip_github_zip_root(extract_zip_entries(&zip, &self.limits.archive_limits())?);
        let candidates = candidates_in_scope(detect_github_import_candidates(&files), &resolved.path);
        if candidates.is_empty() {
            return Err(ImportError::NoSkillFound);
        }
        Ok(LoadedArchive {
            resolved,
            files,
            candidates,
        })
    }

    /// First slug in `base`, `base-2`, ... that is free or already owned by
    /// the actor, along with the version to suggest for it.
    async fn suggest_slug(
        &self,
        actor: &PublishActor,
        base: &str,
    ) -> Result<(String, String), ServiceError> {
        for slug in slug_attempts(base) {
            match self.publish.slug_holder(PackageKind::Skill, &slug).await? {
                None => return Ok((slug, INITIAL_VERSION.to_string())),
                Some(holder) if holder.owner_user_id == actor.user_id => {
                    let version = bump_version(holder.latest_version.as_deref(), VersionBump::Patch);
                    return Ok((slug, version));
                }
                Some(_) => continue,
            }
        }
        Err(ImportError::SlugUnavailable(base.to_string()).into())
    }
}

/// Name a candidate is known by before the user edits it: the marker's
/// `name`, else its folder, else the repository.
fn candidate_base_name(candidate: &ImportCandidate, resolved: &ResolvedRepoRef) -> String {
    if let Some(name) = candidate.name.as_deref().filter(|n| !n.trim().is_empty()) {
        return name.trim().to_string();
    }
    candidate
        .path
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(&resolved.repo)
        .to_string()
}

fn relative_to_root(path: &str, root: &str) -> String {
    if root.is_empty() {
        return path.to_string();
    }
    path.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
        .to_string()
}

#[async_trait]
impl GithubImportService for GithubImportServiceImpl {
    async fn preview(&self, url: &str) -> Result<PreviewResult, ServiceError> {
        let resolved = self.resolve(url).await?;
        let loaded = self.load(resolved).await?;
        Ok(PreviewResult {
            resolved: loaded.resolved,
            candidates: loaded.candidates,
        })
    }

    async fn preview_candidate(
        &self,
        actor: &PublishActor,
        url: &str,
        candidate_path: &str,
    ) -> Result<CandidatePreview, ServiceError> {
        let resolved = self.resolve(url).await?;
        let loaded = self.load(resolved).await?;
        let candidate = loaded.candidate(candidate_path)?.clone();

        let default_selected_paths = compute_default_selected_paths(&candidate, &loaded.files);
        let defaults: BTreeSet<&str> = default_selected_paths.iter().map(String::as_str).collect();
        let files = loaded
            .files
            .iter()
            .filter(|(path, _)| is_path_under_root(path, &candidate.path))
            .map(|(path, bytes)| CandidateFile {
                default_selected: defaults.contains(path.as_str()),
                path: path.clone(),
                size: bytes.len() as u64,
            })
            .collect();

        let base_name = candidate_base_name(&candidate, &loaded.resolved);
        let (suggested_slug, suggested_version) =
            self.suggest_slug(actor, &sanitize_slug(&base_name)).await?;
        let suggested_display_name = match candidate.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => display_name_from_slug(&base_name),
        };

        Ok(CandidatePreview {
            resolved: loaded.resolved,
            candidate,
            files,
            default_selected_paths,
            suggested_slug,
            suggested_display_name,
            suggested_version,
        })
    }

    async fn import(
        &self,
        actor: &PublishActor,
        request: ImportRequest,
    ) -> Result<PublishResult, ServiceError> {
        let resolved = self.resolve(&request.url).await?;
        let expected = request.commit.trim().to_ascii_lowercase();
        if expected != resolved.commit {
            return Err(ImportError::CommitMismatch {
                expected,
                actual: resolved.commit,
            }
            .into());
        }

        let loaded = self.load(resolved).await?;
        let candidate = loaded.candidate(&request.candidate_path)?.clone();

        let selected: BTreeSet<String> = request
            .selected_paths
            .iter()
            .map(|p| normalize_repo_path(p))
            .filter(|p| !p.is_empty())
            .collect();
        if selected.is_empty() {
            return Err(ImportError::NoFilesSelected.into());
        }

        let mut total_bytes: u64 = 0;
        for path in &selected {
            if !is_path_under_root(path, &candidate.path) {
                return Err(ImportError::OutsideScope(path.clone()).into());
            }
            let bytes = loaded
                .files
                .get(path)
                .ok_or_else(|| ImportError::FileNotFound(path.clone()))?;
            total_bytes += bytes.len() as u64;
        }
        if !selected.contains(&candidate.readme_path) {
            return Err(ImportError::MarkerNotSelected(candidate.readme_path.clone()).into());
        }
        if total_bytes > self.limits.max_selected_bytes {
            return Err(ImportError::SelectionTooLarge {
                total: total_bytes,
                max: self.limits.max_selected_bytes,
            }
            .into());
        }

        let mut uploads = Vec::with_capacity(selected.len());
        for path in &selected {
            let relative = relative_to_root(path, &candidate.path);
            if sanitize_path(&relative).is_none() {
                return Err(ImportError::InvalidPath(relative).into());
            }
            let bytes = loaded.files.get(path).cloned().unwrap_or_default();
            uploads.push(UploadFile {
                path: relative,
                bytes,
            });
        }

        let files = self.publish.store_files(uploads).await?;
        let resolved = loaded.resolved;
        let source = VersionSource {
            kind: "github".to_string(),
            url: resolved.original_url.clone(),
            repo: format!("{}/{}", resolved.owner, resolved.repo),
            git_ref: resolved.git_ref.clone(),
            commit: resolved.commit.clone(),
            path: candidate.path.clone(),
            imported_at: chrono::Utc::now().timestamp_millis(),
        };

        tracing::info!(
            repo = %source.repo,
            commit = %source.commit,
            path = %source.path,
            files = files.len(),
            "Importing skill from GitHub"
        );

        self.publish
            .publish(
                actor,
                PublishRequest {
                    kind: PackageKind::Skill,
                    slug: request.slug,
                    display_name: request.display_name,
                    version: request.version,
                    changelog: request.changelog.unwrap_or_default(),
                    tags: request.tags.unwrap_or_else(|| vec!["latest".to_string()]),
                    summary: candidate.description.clone(),
                    files,
                    source: Some(source),
                },
            )
            .await
    }
}
