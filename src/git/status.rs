// src/git/status.rs

//! Parsing of `git status -s -b` output.

use std::sync::LazyLock;

use regex::Regex;

static AHEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ahead (\d+)").expect("ahead pattern is valid"));
static BEHIND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"behind (\d+)").expect("behind pattern is valid"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub ahead: u32,
    pub behind: u32,
    /// Any entry besides the `##` branch header.
    pub dirty: bool,
}

/// Counts are read from the `##` header line when present, otherwise from
/// the whole text. Missing counts are zero.
pub fn parse_status(output: &str) -> StatusSummary {
    let header = output
        .lines()
        .find(|line| line.starts_with("##"))
        .unwrap_or(output);

    StatusSummary {
        ahead: capture_count(&AHEAD, header),
        behind: capture_count(&BEHIND, header),
        dirty: output
            .lines()
            .any(|line| !line.trim().is_empty() && !line.starts_with("##")),
    }
}

fn capture_count(pattern: &Regex, text: &str) -> u32 {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_without_counts_is_zero() {
        let s = parse_status("## main...origin/main");
        assert_eq!(s, StatusSummary::default());
        assert_eq!(parse_status(""), StatusSummary::default());
    }

    #[test]
    fn ahead_and_behind_are_read_from_header() {
        let s = parse_status("## feature...origin/feature [ahead 3, behind 12]\n M src/lib.rs");
        assert_eq!(s.ahead, 3);
        assert_eq!(s.behind, 12);
        assert!(s.dirty);
    }

    #[test]
    fn file_names_do_not_count_as_header() {
        let s = parse_status("## main...origin/main [behind 2]\n?? notes/ahead 9.txt");
        assert_eq!(s.ahead, 0);
        assert_eq!(s.behind, 2);
        assert!(s.dirty);
    }

    #[test]
    fn absurd_counts_fall_back_to_zero() {
        let s = parse_status("## main...origin/main [ahead 99999999999999]");
        assert_eq!(s.ahead, 0);
    }
}
