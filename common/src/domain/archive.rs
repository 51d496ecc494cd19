use crate::domain::paths::normalize_repo_path;
use crate::error::ImportError;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Normalized relative path -> raw bytes.
pub type ZipEntryMap = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_files: 5_000,
            max_file_bytes: 10 * 1024 * 1024,
            max_total_bytes: 200 * 1024 * 1024,
        }
    }
}

/// Canonicalizes a raw zip entry name. Returns `None` for names that are empty
/// after cleanup or that try to climb out of the archive.
pub fn normalize_zip_entry_path(raw: &str) -> Option<String> {
    let mut path = raw.replace('\0', "").replace('\\', "/");
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest.to_string();
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest.to_string();
        } else {
            break;
        }
    }
    if path.is_empty() || path.contains("..") {
        return None;
    }
    Some(path)
}

fn is_junk_entry(path: &str) -> bool {
    path.starts_with("__MACOSX/")
        || path
            .rsplit('/')
            .next()
            .map(|name| name == ".DS_Store")
            .unwrap_or(false)
}

pub fn extract_zip_entries(
    zip_data: &[u8],
    limits: &ArchiveLimits,
) -> Result<ZipEntryMap, ImportError> {
    let mut archive = ZipArchive::new(Cursor::new(zip_data))
        .map_err(|e| ImportError::InvalidZip(e.to_string()))?;

    if archive.len() > limits.max_files {
        return Err(ImportError::TooManyFiles {
            count: archive.len(),
            max: limits.max_files,
        });
    }

    let mut files = BTreeMap::new();
    let mut total_bytes: u64 = 0;
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ImportError::InvalidZip(e.to_string()))?;
        if file.is_dir() {
            continue;
        }

        let Some(path) = normalize_zip_entry_path(file.name()) else {
            tracing::debug!(entry = %file.name(), "Dropping zip entry with unsafe path");
            continue;
        };
        if is_junk_entry(&path) {
            continue;
        }
        if file.size() > limits.max_file_bytes {
            tracing::debug!(path = %path, size = file.size(), "Dropping oversized zip entry");
            continue;
        }

        // Declared sizes can lie; never read past the per-file cap.
        let mut content = Vec::new();
        file.by_ref()
            .take(limits.max_file_bytes + 1)
            .read_to_end(&mut content)
            .map_err(|e| ImportError::InvalidZip(e.to_string()))?;
        if content.len() as u64 > limits.max_file_bytes {
            tracing::debug!(path = %path, "Dropping zip entry that inflated past the cap");
            continue;
        }

        total_bytes += content.len() as u64;
        if total_bytes > limits.max_total_bytes {
            return Err(ImportError::ArchiveTooLarge(format!(
                "decompressed size exceeds {} bytes",
                limits.max_total_bytes
            )));
        }

        if files.contains_key(&path) {
            tracing::warn!(path = %path, "Duplicate zip entry after normalization; keeping first");
            continue;
        }
        files.insert(path, content);
    }

    Ok(files)
}

/// GitHub wraps archive content in a single `{repo}-{sha}/` directory. When
/// every path shares exactly one top-level directory it is removed; otherwise
/// the map is returned unchanged.
pub fn strip_github_zip_root(entries: ZipEntryMap) -> ZipEntryMap {
    let mut roots = BTreeSet::new();
    for path in entries.keys() {
        match path.split_once('/') {
            Some((first, _)) => {
                roots.insert(first.to_string());
            }
            None => return entries,
        }
    }
    if roots.len() != 1 {
        return entries;
    }

    let prefix = match roots.into_iter().next() {
        Some(root) => format!("{}/", root),
        None => return entries,
    };
    entries
        .into_iter()
        .filter_map(|(path, bytes)| {
            let rel = path.strip_prefix(&prefix)?.to_string();
            if rel.is_empty() {
                None
            } else {
                Some((rel, bytes))
            }
        })
        .collect()
}

/// Files under `root`, keyed by their path relative to it.
pub fn subtree_file_map(all_files: &ZipEntryMap, root: &str) -> ZipEntryMap {
    let root = normalize_repo_path(root);
    let mut out = BTreeMap::new();
    for (path, bytes) in all_files {
        if root.is_empty() {
            out.insert(path.clone(), bytes.clone());
            continue;
        }
        if let Some(rel) = path
            .strip_prefix(&root)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            if !rel.is_empty() {
                out.insert(rel.to_string(), bytes.clone());
            }
        }
    }
    out
}


#[cfg(test)]
mod tests {
    use super::test_support::create_zip;
    use super::*;

    fn map(entries: &[(&str, &str)]) -> ZipEntryMap {
        entries
            .iter()
            .map(|(p, b)| (p.to_string(), b.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn normalize_zip_entry_path_cleans_prefixes_and_separators() {
        assert_eq!(
            normalize_zip_entry_path("./a\\b.md").as_deref(),
            Some("a/b.md")
        );
        assert_eq!(normalize_zip_entry_path("/x/y").as_deref(), Some("x/y"));
        assert_eq!(normalize_zip_entry_path("a\0b").as_deref(), Some("ab"));
        assert_eq!(normalize_zip_entry_path("../evil"), None);
        assert_eq!(normalize_zip_entry_path("./"), None);
    }

    #[test]
    fn extract_drops_junk_entries() -> anyhow::Result<()> {
        let zip = create_zip(&[
            ("repo/SKILL.md", "# hi"),
            ("__MACOSX/repo/._SKILL.md", "junk"),
            ("repo/.DS_Store", "junk"),
        ]);
        let entries = extract_zip_entries(&zip, &ArchiveLimits::default())?;
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["repo/SKILL.md"]);
        Ok(())
    }

    #[test]
    fn extract_drops_files_over_single_file_cap() -> anyhow::Result<()> {
        let zip = create_zip(&[("small.txt", "ok"), ("big.txt", "0123456789")]);
        let limits = ArchiveLimits {
            max_file_bytes: 5,
            ..ArchiveLimits::default()
        };
        let entries = extract_zip_entries(&zip, &limits)?;
        assert!(entries.contains_key("small.txt"));
        assert!(!entries.contains_key("big.txt"));
        Ok(())
    }

    #[test]
    fn extract_fails_when_total_exceeds_cap() {
        let zip = create_zip(&[("a.txt", "12345"), ("b.txt", "67890")]);
        let limits = ArchiveLimits {
            max_total_bytes: 8,
            ..ArchiveLimits::default()
        };
        let err = extract_zip_entries(&zip, &limits).unwrap_err();
        assert!(matches!(err, ImportError::ArchiveTooLarge(_)));
    }

    #[test]
    fn extract_fails_fast_on_entry_count() {
        let zip = create_zip(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let limits = ArchiveLimits {
            max_files: 2,
            ..ArchiveLimits::default()
        };
        let err = extract_zip_entries(&zip, &limits).unwrap_err();
        assert!(matches!(err, ImportError::TooManyFiles { count: 3, max: 2 }));
    }

    #[test]
    fn extract_rejects_garbage_bytes() {
        let err = extract_zip_entries(b"not a zip", &ArchiveLimits::default()).unwrap_err();
        assert!(matches!(err, ImportError::InvalidZip(_)));
    }

    #[test]
    fn strip_root_removes_single_shared_directory() {
        let stripped = strip_github_zip_root(map(&[
            ("repo-1/skill/SKILL.md", "x"),
            ("repo-1/README.md", "y"),
        ]));
        assert_eq!(
            stripped.keys().cloned().collect::<Vec<_>>(),
            vec!["README.md".to_string(), "skill/SKILL.md".to_string()]
        );
    }

    #[test]
    fn strip_root_passes_through_multiple_roots_or_root_files() {
        let multi = map(&[("a/x", "1"), ("b/y", "2")]);
        assert_eq!(strip_github_zip_root(multi.clone()), multi);

        let root_file = map(&[("a/x", "1"), ("README.md", "2")]);
        assert_eq!(strip_github_zip_root(root_file.clone()), root_file);

        let empty = ZipEntryMap::new();
        assert_eq!(strip_github_zip_root(empty.clone()), empty);
    }

    #[test]
    fn subtree_file_map_rebases_paths() {
        let files = map(&[
            ("skills/a/SKILL.md", "a"),
            ("skills/a/docs/x.md", "x"),
            ("skills/ab/SKILL.md", ""),
        ]);
        let sub = subtree_file_map(&files, "skills/a/");
        assert_eq!(
            sub.keys().cloned().collect::<Vec<_>>(),
            vec!["SKILL.md".to_string(), "docs/x.md".to_string()]
        );
        assert_eq!(subtree_file_map(&files, "").len(), 3);
    }
}
