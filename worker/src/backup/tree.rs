use crate::ports::TreeEntry;
use anyhow::Result;
use common::domain::skill::{is_valid_handle, verify_slug};
use std::collections::BTreeSet;

/// Directory holding one package inside the mirror: `{root}/{owner}/{slug}`.
/// Owner and slug must each stay one segment under the root.
pub fn item_prefix(root: &str, owner: &str, slug: &str) -> Result<String> {
    if !is_valid_handle(owner) {
        anyhow::bail!("owner handle {:?} is not a valid path segment", owner);
    }
    verify_slug(slug)?;
    let root = root.trim_matches('/');
    if root.is_empty() {
        Ok(format!("{}/{}", owner, slug))
    } else {
        Ok(format!("{}/{}/{}", root, owner, slug))
    }
}

/// Blobs under `prefix` in the base tree that the new file set no longer has.
pub fn stale_paths(entries: &[TreeEntry], prefix: &str, keep: &BTreeSet<String>) -> Vec<String> {
    let dir = format!("{}/", prefix);
    entries
        .iter()
        .filter(|entry| entry.is_blob() && entry.path.starts_with(&dir))
        .filter(|entry| !keep.contains(&entry.path))
        .map(|entry| entry.path.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(path: &str) -> TreeEntry {
        TreeEntry {
            path: path.into(),
            mode: "100644".into(),
            kind: "blob".into(),
            sha: Some("s".into()),
        }
    }

    #[test]
    fn prefix_ignores_surrounding_slashes() {
        assert_eq!(item_prefix("/skills/", "alice", "demo").unwrap(), "skills/alice/demo");
        assert_eq!(item_prefix("", "alice", "demo").unwrap(), "alice/demo");
    }

    #[test]
    fn prefix_refuses_owners_that_leave_the_root() {
        for owner in ["..", "../other", "a/b", "a\\b", ""] {
            assert!(item_prefix("skills", owner, "demo").is_err(), "{owner:?}");
        }
        assert!(item_prefix("skills", "alice", "../demo").is_err());
    }

    #[test]
    fn only_untracked_blobs_under_prefix_are_stale() {
        let entries = vec![
            blob("skills/alice/demo/SKILL.md"),
            blob("skills/alice/demo/old.md"),
            blob("skills/alice/demo-two/SKILL.md"),
            blob("skills/bob/demo/SKILL.md"),
            TreeEntry {
                path: "skills/alice/demo/docs".into(),
                mode: "040000".into(),
                kind: "tree".into(),
                sha: Some("t".into()),
            },
        ];
        let keep: BTreeSet<String> = ["skills/alice/demo/SKILL.md".to_string()].into();

        assert_eq!(
            stale_paths(&entries, "skills/alice/demo", &keep),
            vec!["skills/alice/demo/old.md"]
        );
    }
}
