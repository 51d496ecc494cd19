use anyhow::{Context, Result};
use common::domain::candidates::MARKER_FILES;
use common::domain::hashing::{fingerprint, sha256_hex};
use common::domain::markdown::read_marker_summary;
use common::domain::paths::sanitize_path;
use common::domain::skill::{display_name_from_slug, sanitize_slug};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const MAX_DEPTH: usize = 8;
const SKIPPED_DIRS: [&str; 2] = ["node_modules", "target"];

#[derive(Debug, Clone)]
pub struct LocalFile {
    /// Forward-slash path relative to the skill folder.
    pub path: String,
    pub sha256: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct LocalSkill {
    pub dir: PathBuf,
    pub slug: String,
    pub display_name: String,
    pub summary: Option<String>,
    pub files: Vec<LocalFile>,
    pub fingerprint: String,
}

/// Dotfiles, dot-directories and dependency folders are never part of a skill.
fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.')
        || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

fn marker_in(dir: &Path) -> Option<PathBuf> {
    MARKER_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Every directory under `roots` that directly holds a marker file, sorted
/// and deduplicated.
pub fn discover_skill_dirs(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();
    for root in roots {
        if !root.is_dir() {
            anyhow::bail!("Not a directory: {}", root.display());
        }
        let walker = WalkDir::new(root)
            .max_depth(MAX_DEPTH)
            .into_iter()
            .filter_entry(|e| !is_skipped(e))
            .filter_map(|e| e.ok());
        for entry in walker {
            let is_marker = entry.file_type().is_file()
                && MARKER_FILES.contains(&entry.file_name().to_string_lossy().as_ref());
            if let (true, Some(parent)) = (is_marker, entry.path().parent()) {
                found.insert(parent.to_path_buf());
            }
        }
    }
    Ok(found.into_iter().collect())
}

fn relative_path(dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(dir).ok()?;
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    sanitize_path(&joined)
}

/// Lists the files belonging to the skill at `dir`. Nested folders with their
/// own marker file are separate skills and are left out.
fn list_files(dir: &Path) -> Vec<(String, PathBuf)> {
    let walker = WalkDir::new(dir)
        .max_depth(MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if is_skipped(e) {
                return false;
            }
            e.depth() == 0 || !e.file_type().is_dir() || marker_in(e.path()).is_none()
        })
        .filter_map(|e| e.ok());

    let mut files = Vec::new();
    for entry in walker.filter(|e| e.file_type().is_file()) {
        match relative_path(dir, entry.path()) {
            Some(rel) => files.push((rel, entry.into_path())),
            None => tracing::warn!(path = %entry.path().display(), "Skipping file with unusable path"),
        }
    }
    files
}

/// Reads and hashes a skill folder.
pub async fn load_skill(dir: &Path) -> Result<LocalSkill> {
    let marker = marker_in(dir)
        .with_context(|| format!("No SKILL.md in {}", dir.display()))?;
    let marker_text = tokio::fs::read_to_string(&marker)
        .await
        .with_context(|| format!("Failed to read {}", marker.display()))?;
    let summary = read_marker_summary(&marker_text);

    let folder_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let slug = sanitize_slug(summary.name.as_deref().unwrap_or(&folder_name));
    let display_name = summary
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| display_name_from_slug(&folder_name));

    let mut files = Vec::new();
    for (path, abs) in list_files(dir) {
        let bytes = tokio::fs::read(&abs)
            .await
            .with_context(|| format!("Failed to read {}", abs.display()))?;
        files.push(LocalFile {
            sha256: sha256_hex(&bytes),
            path,
            bytes,
        });
    }

    let fingerprint = fingerprint(files.iter().map(|f| (f.path.as_str(), f.sha256.as_str())));
    Ok(LocalSkill {
        dir: dir.to_path_buf(),
        slug,
        display_name,
        summary: summary.description,
        files,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn discovers_marker_dirs_and_skips_hidden_ones() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "alpha/SKILL.md", "# Alpha");
        write(root, "group/beta/skills.md", "# Beta");
        write(root, ".git/hooks/SKILL.md", "# nope");
        write(root, "node_modules/pkg/SKILL.md", "# nope");
        write(root, "notes/readme.md", "no marker");

        let dirs = discover_skill_dirs(&[root.to_path_buf()]).unwrap();
        assert_eq!(dirs, vec![root.join("alpha"), root.join("group/beta")]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_skill_dirs(&[tmp.path().join("absent")]).is_err());
    }

    #[tokio::test]
    async fn load_skill_hashes_files_and_reads_frontmatter() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("weather_tool");
        write(
            &dir,
            "SKILL.md",
            "---\nname: Weather Tool\ndescription: Forecasts\n---\n# Weather",
        );
        write(&dir, "scripts/run.sh", "echo hi");
        write(&dir, ".DS_Store", "junk");
        write(&dir, "nested/SKILL.md", "# Separate skill");
        write(&dir, "nested/extra.txt", "not ours");

        let skill = load_skill(&dir).await.unwrap();
        assert_eq!(skill.slug, "weather-tool");
        assert_eq!(skill.display_name, "Weather Tool");
        assert_eq!(skill.summary.as_deref(), Some("Forecasts"));

        let paths: Vec<_> = skill.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["SKILL.md", "scripts/run.sh"]);
        assert_eq!(skill.files[1].sha256, sha256_hex(b"echo hi"));
        assert_eq!(
            skill.fingerprint,
            fingerprint(skill.files.iter().map(|f| (f.path.as_str(), f.sha256.as_str())))
        );
    }

    #[tokio::test]
    async fn folder_name_is_used_without_frontmatter() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("my_cool-skill");
        write(&dir, "skills.md", "# Plain");

        let skill = load_skill(&dir).await.unwrap();
        assert_eq!(skill.slug, "my-cool-skill");
        assert_eq!(skill.display_name, "My Cool Skill");
        assert!(skill.summary.is_none());
    }

    #[tokio::test]
    async fn fingerprint_tracks_content_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("demo");
        write(&dir, "SKILL.md", "# v1");
        let before = load_skill(&dir).await.unwrap().fingerprint;

        write(&dir, "SKILL.md", "# v2");
        let after = load_skill(&dir).await.unwrap().fingerprint;
        assert_ne!(before, after);
    }
}
