use crate::client::RegistryClient;
use anyhow::Result;
use common::domain::paths::{is_path_under_root, join_repo_path, normalize_repo_path};
use common::services::github_import::{CandidatePreview, ImportRequest, PreviewResult};
use common::services::publish::PublishResult;

#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub url: String,
    pub path: String,
    pub slug: Option<String>,
    pub version: Option<String>,
    pub select: Vec<String>,
}

/// `--select` values may be given relative to the candidate folder or as full
/// repo paths.
pub fn resolve_selection(candidate_path: &str, raw: &str) -> String {
    let normalized = normalize_repo_path(raw);
    let candidate = normalize_repo_path(candidate_path);
    if candidate.is_empty() || is_path_under_root(&normalized, &candidate) {
        normalized
    } else {
        join_repo_path(&candidate, &normalized)
    }
}

/// Builds the import request from a candidate preview, letting explicit
/// arguments override the server's suggestions.
pub fn build_request(preview: &CandidatePreview, args: &RunArgs) -> ImportRequest {
    let selected_paths = if args.select.is_empty() {
        preview.default_selected_paths.clone()
    } else {
        let mut paths: Vec<String> = args
            .select
            .iter()
            .map(|p| resolve_selection(&preview.candidate.path, p))
            .collect();
        if !paths.contains(&preview.candidate.readme_path) {
            paths.insert(0, preview.candidate.readme_path.clone());
        }
        paths
    };

    ImportRequest {
        url: args.url.clone(),
        commit: preview.resolved.commit.clone(),
        candidate_path: preview.candidate.path.clone(),
        selected_paths,
        slug: args
            .slug
            .clone()
            .unwrap_or_else(|| preview.suggested_slug.clone()),
        display_name: preview.suggested_display_name.clone(),
        version: args
            .version
            .clone()
            .unwrap_or_else(|| preview.suggested_version.clone()),
        changelog: None,
        tags: None,
    }
}

pub fn print_preview(preview: &PreviewResult) {
    let resolved = &preview.resolved;
    println!("{}/{} @ {}", resolved.owner, resolved.repo, resolved.commit);
    if preview.candidates.is_empty() {
        println!("No skills found.");
        return;
    }
    for candidate in &preview.candidates {
        let path = if candidate.path.is_empty() {
            "."
        } else {
            candidate.path.as_str()
        };
        match (&candidate.name, &candidate.description) {
            (Some(name), Some(desc)) => println!("  {}  {} - {}", path, name, desc),
            (Some(name), None) => println!("  {}  {}", path, name),
            _ => println!("  {}", path),
        }
    }
}

pub fn print_candidate(preview: &CandidatePreview) {
    println!(
        "{} ({}) v{}",
        preview.suggested_slug, preview.suggested_display_name, preview.suggested_version
    );
    for file in &preview.files {
        let mark = if file.default_selected { "x" } else { " " };
        println!("  [{}] {} ({} bytes)", mark, file.path, file.size);
    }
}

pub async fn run(client: &RegistryClient, args: &RunArgs) -> Result<PublishResult> {
    let preview = client.preview_candidate(&args.url, &args.path).await?;
    let request = build_request(&preview, args);
    tracing::info!(
        slug = %request.slug,
        commit = %request.commit,
        files = request.selected_paths.len(),
        "Importing from GitHub"
    );
    client.import(&request).await
}
