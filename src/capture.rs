//! Pane scroll-back parsing.
//!
//! Captured buffers arrive with terminal escape sequences and whatever line
//! endings the agent's TUI produced. Everything downstream (state detection,
//! activity hashing, tails) works on the cleaned line vector built here.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Strip ANSI escape sequences from captured output.
pub fn strip_ansi(input: &str) -> String {
    // CSI (ESC [ params intermediates final), OSC (ESC ] ... BEL|ST), and
    // two-byte escapes (ESC + one char).
    static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[^\[\]]",
        )
        .unwrap()
    });
    ANSI_RE.replace_all(input, "").into_owned()
}

/// Split a buffer into lines, accepting LF, CRLF and bare CR.
///
/// A single trailing empty line caused by a terminating newline is dropped;
/// any further trailing empty lines are kept.
pub fn split_lines(buf: &str) -> Vec<String> {
    if buf.is_empty() {
        return Vec::new();
    }
    let normalized = buf.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = normalized.split('\n').map(str::to_string).collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Strip escapes and split in one pass.
pub fn clean_lines(raw: &str) -> Vec<String> {
    split_lines(&strip_ansi(raw))
}

/// Last `n` lines of `lines` (all of them when fewer exist).
pub fn tail(lines: &[String], n: usize) -> &[String] {
    let start = lines.len().saturating_sub(n);
    &lines[start..]
}

/// Stable hash of the visible content.
///
/// Trailing whitespace on each line and trailing blank lines are ignored, so
/// a redraw that only pads the screen does not count as activity.
pub fn content_hash(lines: &[String]) -> u64 {
    let mut end = lines.len();
    while end > 0 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    let mut hasher = Sha256::new();
    for line in &lines[..end] {
        hasher.update(line.trim_end().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

pub fn hash_hex(hash: u64) -> String {
    format!("{hash:016x}")
}

/// Maximum rune length for previews surfaced in responses.
pub const PREVIEW_RUNES: usize = 50;

/// Truncate to at most `max` characters, appending `...` when cut.
pub fn truncate_runes(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Last non-blank line, trimmed on the right.
pub fn last_nonblank(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .rev()
        .map(|l| l.trim_end())
        .find(|l| !l.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strip_ansi_removes_csi_and_osc() {
        assert_eq!(strip_ansi("\x1b[31mERROR\x1b[0m: boom"), "ERROR: boom");
        assert_eq!(strip_ansi("\x1b]0;title\x07text"), "text");
        assert_eq!(strip_ansi("\x1b[?25lhidden cursor"), "hidden cursor");
        assert_eq!(strip_ansi("plain\ttext é"), "plain\ttext é");
    }

    #[test]
    fn split_lines_cases() {
        assert!(split_lines("").is_empty());
        assert_eq!(split_lines("a\n"), v(&["a"]));
        assert_eq!(split_lines("a\r\nb"), v(&["a", "b"]));
        assert_eq!(split_lines("a\rb\n"), v(&["a", "b"]));
        assert_eq!(split_lines("\n\n\n"), v(&["", "", ""]));
        assert_eq!(split_lines("a\n\n"), v(&["a", ""]));
    }

    #[test]
    fn split_lines_preserves_inner_whitespace() {
        assert_eq!(split_lines("  a\tb  \nč"), v(&["  a\tb  ", "č"]));
    }

    #[test]
    fn hash_ignores_trailing_padding() {
        let a = v(&["line one", "line two"]);
        let b = v(&["line one   ", "line two", "", "  "]);
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_changes_with_content() {
        let a = v(&["line one", "line two"]);
        let b = v(&["line one", "line three"]);
        assert_ne!(content_hash(&a), content_hash(&b));
        assert_eq!(hash_hex(content_hash(&a)).len(), 16);
    }

    #[test]
    fn truncate_counts_runes() {
        assert_eq!(truncate_runes("short", 50), "short");
        let long = "é".repeat(60);
        let cut = truncate_runes(&long, 50);
        assert_eq!(cut.chars().count(), 50);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn tail_and_last_nonblank() {
        let lines = v(&["a", "b", "c", "  "]);
        assert_eq!(tail(&lines, 2), &lines[2..]);
        assert_eq!(tail(&lines, 10).len(), 4);
        assert_eq!(last_nonblank(&lines), Some("c"));
        assert_eq!(last_nonblank(&[]), None);
    }

    proptest! {
        #[test]
        fn split_join_round_trip(buf in "[a-z \t\r\n]{0,64}") {
            let normalized = buf.replace("\r\n", "\n").replace('\r', "\n");
            let joined = split_lines(&buf).join("\n");
            let expected = normalized.strip_suffix('\n').unwrap_or(&normalized);
            prop_assert_eq!(joined, expected);
        }
    }
}
