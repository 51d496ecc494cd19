/// Canonical form used for every candidate/selection comparison: no empty
/// segments, no leading or trailing slash. The empty string is the repo root.
pub fn normalize_repo_path(path: &str) -> String {
    path.trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Final gate before a path is written into a stored file list.
///
/// Returns `None` for anything that must be rejected; callers treat that as a
/// validation failure rather than skipping the file.
pub fn sanitize_path(path: &str) -> Option<String> {
    if path.is_empty() || path.contains("..") || path.contains('\\') {
        return None;
    }
    let stripped = path.strip_prefix('/').unwrap_or(path);
    if stripped.is_empty() {
        return None;
    }
    Some(stripped.to_string())
}

/// True when `path` equals `root` or sits below it. An empty root contains
/// everything.
pub fn is_path_under_root(path: &str, root: &str) -> bool {
    let root = normalize_repo_path(root);
    let path = normalize_repo_path(path);
    if root.is_empty() {
        return true;
    }
    path == root
        || path
            .strip_prefix(&root)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

pub fn is_candidate_under_resolved_path(candidate_path: &str, resolved_path: &str) -> bool {
    is_path_under_root(candidate_path, resolved_path)
}

/// Joins a normalized directory and a relative name; the root directory has no
/// prefix.
pub fn join_repo_path(dir: &str, name: &str) -> String {
    let dir = normalize_repo_path(dir);
    if dir.is_empty() {
        normalize_repo_path(name)
    } else {
        normalize_repo_path(&format!("{}/{}", dir, name))
    }
}

pub fn parent_dir(path: &str) -> String {
    let path = normalize_repo_path(path);
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_repo_path_collapses_and_trims_slashes() {
        assert_eq!(normalize_repo_path("/skills//foo/"), "skills/foo");
        assert_eq!(normalize_repo_path("skills/foo"), "skills/foo");
        assert_eq!(normalize_repo_path("/"), "");
        assert_eq!(normalize_repo_path(""), "");
    }

    #[test]
    fn sanitize_path_rejects_traversal_and_backslashes() {
        assert_eq!(sanitize_path(""), None);
        assert_eq!(sanitize_path("../etc/passwd"), None);
        assert_eq!(sanitize_path("a/../b"), None);
        assert_eq!(sanitize_path("dir\\file.md"), None);
        assert_eq!(sanitize_path("/"), None);
    }

    #[test]
    fn sanitize_path_strips_one_leading_slash() {
        assert_eq!(sanitize_path("/SKILL.md").as_deref(), Some("SKILL.md"));
        assert_eq!(sanitize_path("docs/a.md").as_deref(), Some("docs/a.md"));
    }

    #[test]
    fn candidate_scope_matches_exact_or_slash_prefix() {
        assert!(is_candidate_under_resolved_path("skills/foo", "skills/foo"));
        assert!(is_candidate_under_resolved_path("skills/foo/bar", "skills/foo"));
        assert!(!is_candidate_under_resolved_path("skills/foobar", "skills/foo"));
        assert!(!is_candidate_under_resolved_path("other", "skills"));
    }

    #[test]
    fn empty_scope_contains_every_candidate() {
        assert!(is_candidate_under_resolved_path("", ""));
        assert!(is_candidate_under_resolved_path("a/b", ""));
    }

    #[test]
    fn scope_comparison_ignores_trailing_slashes() {
        assert!(is_candidate_under_resolved_path("skills/foo/", "skills/foo"));
        assert!(is_candidate_under_resolved_path("skills/foo", "/skills/foo/"));
    }

    #[test]
    fn join_and_parent_handle_root() {
        assert_eq!(join_repo_path("", "SKILL.md"), "SKILL.md");
        assert_eq!(join_repo_path("a/b", "c.md"), "a/b/c.md");
        assert_eq!(parent_dir("a/b/c.md"), "a/b");
        assert_eq!(parent_dir("c.md"), "");
    }
}
