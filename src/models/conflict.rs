//! Conflict-related model types

use serde::{Deserialize, Serialize};

/// A file left with merge conflicts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictFile {
    /// File path relative to the vault root
    pub path: String,
    /// Raw working-tree content, including conflict markers
    pub content: String,
}

/// How the user wants a conflicting path settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Our (local) version
    KeepLocal,
    /// Their (remote) version
    KeepRemote,
    /// Both bodies, markers removed
    KeepBoth,
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep-local" | "local" | "l" => Ok(Resolution::KeepLocal),
            "keep-remote" | "remote" | "r" => Ok(Resolution::KeepRemote),
            "keep-both" | "both" | "b" => Ok(Resolution::KeepBoth),
            other => Err(format!("Unknown resolution: {}", other)),
        }
    }
}

const MARKER_OURS: &str = "<<<<<<<";
const MARKER_SEPARATOR: &str = "=======";
const MARKER_THEIRS: &str = ">>>>>>>";

fn is_marker(line: &str, marker: &str) -> bool {
    line.strip_prefix(marker)
        .map(|rest| rest.is_empty() || rest.starts_with(' '))
        .unwrap_or(false)
}

/// Remove conflict markers, keeping both sides' bodies in place.
///
/// Only complete `<<<<<<<` / `=======` / `>>>>>>>` triples are treated as
/// markers. Marker-looking lines outside such a triple are left alone.
pub fn strip_conflict_markers(content: &str) -> String {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut drop = vec![false; lines.len()];

    let bare = |l: &str| l.trim_end_matches(['\n', '\r']).to_string();

    let mut i = 0;
    while i < lines.len() {
        if !is_marker(&bare(lines[i]), MARKER_OURS) {
            i += 1;
            continue;
        }

        let separator = (i + 1..lines.len())
            .take_while(|&j| !is_marker(&bare(lines[j]), MARKER_OURS))
            .find(|&j| bare(lines[j]) == MARKER_SEPARATOR);
        let closing = separator.and_then(|sep| {
            (sep + 1..lines.len())
                .take_while(|&j| {
                    !is_marker(&bare(lines[j]), MARKER_OURS) && bare(lines[j]) != MARKER_SEPARATOR
                })
                .find(|&j| is_marker(&bare(lines[j]), MARKER_THEIRS))
        });

        match (separator, closing) {
            (Some(sep), Some(end)) => {
                drop[i] = true;
                drop[sep] = true;
                drop[end] = true;
                i = end + 1;
            }
            _ => i += 1,
        }
    }

    lines
        .iter()
        .zip(drop)
        .filter(|(_, d)| !d)
        .map(|(l, _)| *l)
        .collect()
}

/// Whether content still contains a complete conflict region
pub fn has_conflict_markers(content: &str) -> bool {
    strip_conflict_markers(content) != content
}
