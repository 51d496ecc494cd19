use anyhow::Result;
use semver::Version;

pub const MAX_SLUG_LEN: usize = 64;
pub const SLUG_ATTEMPTS: usize = 50;
pub const INITIAL_VERSION: &str = "1.0.0";
pub const MAX_HANDLE_LEN: usize = 64;

pub fn verify_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(anyhow::anyhow!("Slug must be 1-64 characters"));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(anyhow::anyhow!(
            "Slug must only contain lowercase letters, numbers, and hyphens"
        ));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(anyhow::anyhow!("Slug must not start or end with a hyphen"));
    }
    if slug.contains("--") {
        return Err(anyhow::anyhow!("Slug must not contain consecutive hyphens"));
    }
    Ok(())
}

/// Owner handles become a directory name in the backup mirror, so they must
/// be a single safe path segment.
pub fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= MAX_HANDLE_LEN
        && !handle.starts_with('.')
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Lowercases and replaces every run of disallowed characters with a single
/// hyphen. Falls back to `skill` when nothing usable is left.
pub fn sanitize_slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_hyphen = false;
    for c in raw.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    // Leave room for a `-NN` dedup suffix.
    out.truncate(MAX_SLUG_LEN - 3);
    let out = out.trim_end_matches('-').to_string();
    if out.is_empty() {
        "skill".to_string()
    } else {
        out
    }
}

/// `base`, `base-2`, `base-3`, ... up to `SLUG_ATTEMPTS` entries.
pub fn slug_attempts(base: &str) -> impl Iterator<Item = String> + '_ {
    (1..=SLUG_ATTEMPTS).map(move |n| {
        if n == 1 {
            base.to_string()
        } else {
            format!("{}-{}", base, n)
        }
    })
}

/// Human title from a folder or repo name: `my_cool-skill` -> `My Cool Skill`.
pub fn display_name_from_slug(raw: &str) -> String {
    raw.split(['-', '_', ' ', '.'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_version(raw: &str) -> Result<Version> {
    Version::parse(raw.trim()).map_err(|e| anyhow::anyhow!("Invalid semver '{}': {}", raw, e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionBump {
    #[default]
    Patch,
    Minor,
    Major,
}

impl std::str::FromStr for VersionBump {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "patch" => Ok(VersionBump::Patch),
            "minor" => Ok(VersionBump::Minor),
            "major" => Ok(VersionBump::Major),
            other => Err(anyhow::anyhow!("Unknown bump kind: {}", other)),
        }
    }
}

/// Next release after `latest`; pre-release and build metadata are dropped.
/// An unparsable latest version restarts at `1.0.0`.
pub fn bump_version(latest: Option<&str>, bump: VersionBump) -> String {
    let Some(current) = latest.and_then(|v| parse_version(v).ok()) else {
        return INITIAL_VERSION.to_string();
    };
    let next = match bump {
        VersionBump::Patch => Version::new(current.major, current.minor, current.patch + 1),
        VersionBump::Minor => Version::new(current.major, current.minor + 1, 0),
        VersionBump::Major => Version::new(current.major + 1, 0, 0),
    };
    next.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_must_be_a_single_path_segment() {
        for handle in ["alice", "Bob_99", "j.doe", "a-b"] {
            assert!(is_valid_handle(handle), "{handle} should be accepted");
        }
        for handle in ["", "..", ".hidden", "a/b", "../x", "a\\b", "al ice", "ä"] {
            assert!(!is_valid_handle(handle), "{handle:?} should be rejected");
        }
        assert!(!is_valid_handle(&"a".repeat(MAX_HANDLE_LEN + 1)));
    }

    #[test]
    fn verify_slug_rejects_invalid_characters() {
        let err = verify_slug("Bad_Name").unwrap_err();
        assert!(err.to_string().contains("lowercase"));
        assert!(verify_slug("-x").is_err());
        assert!(verify_slug("a--b").is_err());
        assert!(verify_slug("").is_err());
    }

    #[test]
    fn verify_slug_accepts_valid_slug() -> Result<()> {
        verify_slug("good-name-2")?;
        Ok(())
    }

    #[test]
    fn sanitize_slug_collapses_separators() {
        assert_eq!(sanitize_slug("  My Cool_Skill!! "), "my-cool-skill");
        assert_eq!(sanitize_slug("--x--y--"), "x-y");
        assert_eq!(sanitize_slug("???"), "skill");
        assert!(verify_slug(&sanitize_slug(&"a".repeat(200))).is_ok());
    }

    #[test]
    fn slug_attempts_are_numbered_from_two() {
        let attempts: Vec<String> = slug_attempts("demo").take(3).collect();
        assert_eq!(attempts, vec!["demo", "demo-2", "demo-3"]);
        assert_eq!(slug_attempts("demo").count(), SLUG_ATTEMPTS);
    }

    #[test]
    fn display_name_title_cases_words() {
        assert_eq!(display_name_from_slug("my_cool-skill"), "My Cool Skill");
    }

    #[test]
    fn bump_version_defaults_and_increments() {
        assert_eq!(bump_version(None, VersionBump::Patch), "1.0.0");
        assert_eq!(bump_version(Some("garbage"), VersionBump::Patch), "1.0.0");
        assert_eq!(bump_version(Some("1.2.3"), VersionBump::Patch), "1.2.4");
        assert_eq!(bump_version(Some("1.2.3-beta.1"), VersionBump::Minor), "1.3.0");
        assert_eq!(bump_version(Some("1.2.3"), VersionBump::Major), "2.0.0");
    }
}
