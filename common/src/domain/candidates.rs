use crate::domain::archive::ZipEntryMap;
use crate::domain::markdown::read_marker_summary;
use crate::domain::paths::{is_candidate_under_resolved_path, join_repo_path, parent_dir};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker file names in preference order. Matching is case-sensitive.
pub const MARKER_FILES: [&str; 2] = ["SKILL.md", "skills.md"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCandidate {
    /// Directory of the skill; empty for the archive root.
    pub path: String,
    pub readme_path: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// One candidate per directory that directly contains a marker file, ordered
/// by path (root first).
pub fn detect_github_import_candidates(entries: &ZipEntryMap) -> Vec<ImportCandidate> {
    let mut markers: BTreeMap<String, &str> = BTreeMap::new();
    for path in entries.keys() {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let Some(rank) = MARKER_FILES.iter().position(|m| *m == file_name) else {
            continue;
        };
        let dir = parent_dir(path);
        let better = markers
            .get(&dir)
            .and_then(|existing| MARKER_FILES.iter().position(|m| m == existing))
            .map(|existing_rank| rank < existing_rank)
            .unwrap_or(true);
        if better {
            markers.insert(dir, MARKER_FILES[rank]);
        }
    }

    markers
        .into_iter()
        .map(|(dir, marker)| {
            let readme_path = join_repo_path(&dir, marker);
            let summary = entries
                .get(&readme_path)
                .map(|bytes| read_marker_summary(&String::from_utf8_lossy(bytes)))
                .unwrap_or_default();
            ImportCandidate {
                path: dir,
                readme_path,
                name: summary.name,
                description: summary.description,
            }
        })
        .collect()
}

pub fn candidates_in_scope(candidates: Vec<ImportCandidate>, scope: &str) -> Vec<ImportCandidate> {
    candidates
        .into_iter()
        .filter(|c| is_candidate_under_resolved_path(&c.path, scope))
        .collect()
}
