use crate::domain::archive::ZipEntryMap;
use crate::domain::candidates::ImportCandidate;
use crate::domain::markdown::{
    extract_markdown_relative_targets, is_markdown_path, resolve_markdown_target,
};
use crate::domain::paths::{is_path_under_root, normalize_repo_path};
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Files reachable from the candidate's marker through relative markdown
/// links, restricted to the candidate folder.
///
/// Worklist traversal with a visited set, so reference cycles terminate.
/// Non-markdown files are selected when referenced but never scanned. The
/// marker comes first, the rest follow in path order.
pub fn compute_default_selected_paths(
    candidate: &ImportCandidate,
    files: &ZipEntryMap,
) -> Vec<String> {
    let root = normalize_repo_path(&candidate.path);
    let marker = normalize_repo_path(&candidate.readme_path);
    if !files.contains_key(&marker) {
        return Vec::new();
    }

    let mut visited: HashSet<String> = HashSet::from([marker.clone()]);
    let mut selected: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::from([marker.clone()]);

    while let Some(current) = queue.pop_front() {
        if !is_markdown_path(&current) {
            continue;
        }
        let Some(bytes) = files.get(&current) else {
            continue;
        };
        let Ok(text) = std::str::from_utf8(bytes) else {
            continue;
        };

        for target in extract_markdown_relative_targets(text) {
            let Some(resolved) = resolve_markdown_target(&current, &target) else {
                continue;
            };
            if !files.contains_key(&resolved) || !is_path_under_root(&resolved, &root) {
                continue;
            }
            if visited.insert(resolved.clone()) {
                selected.insert(resolved.clone());
                queue.push_back(resolved);
            }
        }
    }

    selected.remove(&marker);
    std::iter::once(marker).chain(selected).collect()
}
