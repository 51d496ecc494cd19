use crate::domain::paths::parent_dir;
use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

#[derive(Debug, Clone)]
pub struct ParsedMarkdown {
    pub metadata: Option<Value>,
    pub body: String,
}

pub fn parse_markdown_frontmatter(input: &str) -> Result<ParsedMarkdown> {
    let Some((frontmatter_str, body)) = split_frontmatter(input) else {
        return Ok(ParsedMarkdown {
            metadata: None,
            body: input.to_string(),
        });
    };

    let yaml_value: serde_yaml::Value = serde_yaml::from_str(&frontmatter_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse YAML frontmatter: {}", e))?;
    let metadata = serde_json::to_value(yaml_value)?;

    Ok(ParsedMarkdown {
        metadata: Some(metadata),
        body,
    })
}

fn split_frontmatter(input: &str) -> Option<(String, String)> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut lines = input.lines();
    let first = lines.next().unwrap_or_default();
    if first.trim_end() != "---" {
        return None;
    }
    let mut fm_lines = Vec::new();
    for line in lines.by_ref() {
        if line.trim_end() == "---" {
            break;
        }
        fm_lines.push(line);
    }
    let fm = fm_lines.join("\n");
    let body = lines.collect::<Vec<_>>().join("\n");
    Some((fm, body))
}

/// Name and description advertised by a marker file, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerSummary {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Reads `name`/`description` from the frontmatter block. Frontmatter that is
/// not valid YAML still yields whatever plain `key: value` lines it contains.
pub fn read_marker_summary(input: &str) -> MarkerSummary {
    let Some((frontmatter, _)) = split_frontmatter(input) else {
        return MarkerSummary::default();
    };

    let from_yaml = serde_yaml::from_str::<serde_yaml::Value>(&frontmatter)
        .ok()
        .filter(|v| v.is_mapping());
    let lookup = |key: &str| -> Option<String> {
        let value = match &from_yaml {
            Some(yaml) => yaml.get(key).and_then(|v| match v {
                serde_yaml::Value::String(s) => Some(s.clone()),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                serde_yaml::Value::Bool(b) => Some(b.to_string()),
                _ => None,
            }),
            None => frontmatter.lines().find_map(|line| {
                let (k, v) = line.split_once(':')?;
                (k.trim() == key).then(|| unquote(v.trim()).to_string())
            }),
        }?;
        let value = value.trim().to_string();
        (!value.is_empty()).then_some(value)
    };

    MarkerSummary {
        name: lookup("name"),
        description: lookup("description"),
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

static LINK_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"!?\[[^\]]*\]\(\s*(<[^>]*>|[^)\s]+)(?:\s+(?:"[^"]*"|'[^']*'|\([^)]*\)))?\s*\)"#,
    )
    .expect("link pattern is valid")
});

static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*:").expect("scheme pattern is valid"));

fn strip_fragment_and_query(target: &str) -> &str {
    let end = target.find(['#', '?']).unwrap_or(target.len());
    &target[..end]
}

fn is_relative_target(target: &str) -> bool {
    !target.is_empty() && !target.starts_with('/') && !URL_SCHEME.is_match(target)
}

/// Relative link and image targets in document order, deduplicated, with any
/// `#fragment` or `?query` removed.
pub fn extract_markdown_relative_targets(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for captures in LINK_TARGET.captures_iter(text) {
        let Some(raw) = captures.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let raw = raw
            .strip_prefix('<')
            .and_then(|r| r.strip_suffix('>'))
            .unwrap_or(raw)
            .trim();
        if URL_SCHEME.is_match(raw) {
            continue;
        }
        let target = strip_fragment_and_query(raw);
        if !is_relative_target(target) {
            continue;
        }
        if seen.insert(target.to_string()) {
            out.push(target.to_string());
        }
    }
    out
}

/// Resolves `target` against the directory holding `source_path`.
///
/// Returns `None` for absolute targets and for targets that climb above the
/// archive root.
pub fn resolve_markdown_target(source_path: &str, target: &str) -> Option<String> {
    let target = strip_fragment_and_query(target.trim());
    if !is_relative_target(target) {
        return None;
    }

    let base = parent_dir(source_path);
    let mut segments: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    let resolved = segments.join("/");
    if resolved.is_empty() || resolved.contains("..") {
        None
    } else {
        Some(resolved)
    }
}

pub fn is_markdown_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".md") || lower.ends_with(".markdown") || lower.ends_with(".mdx")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_markdown_frontmatter_returns_none_when_missing() -> Result<()> {
        let parsed = parse_markdown_frontmatter("# Title")?;
        assert!(parsed.metadata.is_none());
        assert_eq!(parsed.body, "# Title");
        Ok(())
    }

    #[test]
    fn parse_markdown_frontmatter_parses_yaml_when_present() -> Result<()> {
        let parsed = parse_markdown_frontmatter("---\nname: a\n---\n# Body")?;
        assert_eq!(
            parsed
                .metadata
                .as_ref()
                .and_then(|m| m.get("name"))
                .and_then(|v| v.as_str()),
            Some("a")
        );
        assert_eq!(parsed.body, "# Body");
        Ok(())
    }

    #[test]
    fn marker_summary_reads_name_and_description() {
        let summary = read_marker_summary("---\nname: demo\ndescription: Does things\n---\n# x");
        assert_eq!(summary.name.as_deref(), Some("demo"));
        assert_eq!(summary.description.as_deref(), Some("Does things"));
    }

    #[test]
    fn marker_summary_falls_back_to_plain_lines_on_bad_yaml() {
        let summary = read_marker_summary("---\nname: \"demo\"\ndescription: a: b: [\n---\n");
        assert_eq!(summary.name.as_deref(), Some("demo"));
        assert_eq!(summary.description.as_deref(), Some("a: b: ["));
    }

    #[test]
    fn marker_summary_empty_without_frontmatter() {
        assert_eq!(read_marker_summary("# Title"), MarkerSummary::default());
    }

    #[test]
    fn extracts_links_images_and_angle_targets() {
        let text = r#"See [guide](docs/guide.md#setup) and ![logo](img/logo.png "Logo").
Also [spaced](<docs/with space.md> 'title') and [q](ref.md?raw=1)."#;
        assert_eq!(
            extract_markdown_relative_targets(text),
            vec![
                "docs/guide.md".to_string(),
                "img/logo.png".to_string(),
                "docs/with space.md".to_string(),
                "ref.md".to_string(),
            ]
        );
    }

    #[test]
    fn skips_absolute_and_scheme_targets() {
        let text = "[a](https://x.dev) [b](mailto:a@b.c) [c](/root.md) [d](#top) [e](./ok.md)";
        assert_eq!(extract_markdown_relative_targets(text), vec!["./ok.md"]);
    }

    #[test]
    fn extraction_deduplicates_in_document_order() {
        let text = "[a](b.md) [again](b.md#x) [c](a.md)";
        assert_eq!(extract_markdown_relative_targets(text), vec!["b.md", "a.md"]);
    }

    #[test]
    fn resolve_is_stable_under_fragment_and_query() {
        let plain = resolve_markdown_target("skill/SKILL.md", "x.md");
        assert_eq!(plain.as_deref(), Some("skill/x.md"));
        assert_eq!(resolve_markdown_target("skill/SKILL.md", "x.md#a"), plain);
        assert_eq!(resolve_markdown_target("skill/SKILL.md", "x.md?b"), plain);
    }

    #[test]
    fn resolve_handles_dot_segments() {
        assert_eq!(
            resolve_markdown_target("skill/docs/a.md", "../img/./b.png").as_deref(),
            Some("skill/img/b.png")
        );
    }

    #[test]
    fn resolve_rejects_escape_and_absolute() {
        assert_eq!(resolve_markdown_target("SKILL.md", "../x.md"), None);
        assert_eq!(resolve_markdown_target("skill/SKILL.md", "/x.md"), None);
        assert_eq!(resolve_markdown_target("skill/SKILL.md", "https://a/b"), None);
    }
}
