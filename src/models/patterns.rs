//! Tracked-pattern declarations read from `.gitattributes`

use std::path::Path;

use glob::{MatchOptions, Pattern};

/// Attribute token marking a pattern as offloaded
pub const LFS_MARKER: &str = "filter=lfs";

/// Name of the attributes file at the vault root
pub const ATTRIBUTES_FILE: &str = ".gitattributes";

/// `*` never crosses a `/`; only `**` recurses.
pub const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// The set of glob patterns whose files are offloaded
#[derive(Debug, Clone, Default)]
pub struct TrackedPatterns {
    patterns: Vec<Pattern>,
}

impl TrackedPatterns {
    /// Parse attributes text, keeping the pattern of every line that carries the marker
    pub fn parse(content: &str) -> Self {
        let patterns = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let pattern = parts.next()?;
                if !parts.any(|attr| attr == LFS_MARKER) {
                    return None;
                }
                match Pattern::new(pattern) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        tracing::warn!("Ignoring invalid tracked pattern {}: {}", pattern, e);
                        None
                    }
                }
            })
            .collect();

        Self { patterns }
    }

    /// Load from `<root>/.gitattributes`; missing or unreadable yields an empty set
    pub async fn load(root: &Path) -> Self {
        match tokio::fs::read_to_string(root.join(ATTRIBUTES_FILE)).await {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not read {}: {}", ATTRIBUTES_FILE, e);
                }
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn as_strs(&self) -> Vec<&str> {
        self.patterns.iter().map(Pattern::as_str).collect()
    }

    /// Whether a root-relative path (with `/` separators) is tracked
    pub fn matches(&self, rel_path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(rel_path, MATCH_OPTIONS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_only_marked_lines() {
        let patterns = TrackedPatterns::parse(
            "# assets\n*.png filter=lfs diff=lfs merge=lfs -text\n*.md text\n\nassets/** filter=lfs -text\n",
        );
        assert_eq!(patterns.as_strs(), vec!["*.png", "assets/**"]);
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        let patterns = TrackedPatterns::parse("*.png filter=lfs\n");
        assert!(patterns.matches("a.png"));
        assert!(!patterns.matches("images/a.png"));
    }

    #[test]
    fn test_recursive_wildcard() {
        let patterns = TrackedPatterns::parse("**/*.png filter=lfs\n");
        assert!(patterns.matches("images/deep/a.png"));
        assert!(!patterns.matches("images/a.jpg"));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let patterns = TrackedPatterns::load(dir.path()).await;
        assert!(patterns.is_empty());
    }
}
