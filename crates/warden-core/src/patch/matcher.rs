//! Context search for hunks.
//!
//! A hunk carries no line numbers, so its position is found by searching
//! the original lines for its context + removed block. Strategies are tried
//! in order, each stricter match winning over a looser one:
//!
//! 1. exact
//! 2. ignoring trailing whitespace
//! 3. ignoring leading and trailing whitespace
//!
//! Searches never look before `start`, so hunks must appear in file order.

/// How loosely a block matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fuzz {
    Exact,
    TrailingWhitespace,
    Trimmed,
}

/// A pure matcher: `(lines, pattern, start) -> first match index >= start`.
pub type Matcher = fn(&[&str], &[&str], usize) -> Option<usize>;

/// The cascade, strictest first.
pub const STRATEGIES: [(Fuzz, Matcher); 3] = [
    (Fuzz::Exact, match_exact),
    (Fuzz::TrailingWhitespace, match_trim_end),
    (Fuzz::Trimmed, match_trimmed),
];

fn match_exact(lines: &[&str], pattern: &[&str], start: usize) -> Option<usize> {
    find_with(lines, pattern, start, |a, b| a == b)
}

fn match_trim_end(lines: &[&str], pattern: &[&str], start: usize) -> Option<usize> {
    find_with(lines, pattern, start, |a, b| a.trim_end() == b.trim_end())
}

fn match_trimmed(lines: &[&str], pattern: &[&str], start: usize) -> Option<usize> {
    find_with(lines, pattern, start, |a, b| a.trim() == b.trim())
}

fn find_with(
    lines: &[&str],
    pattern: &[&str],
    start: usize,
    eq: impl Fn(&str, &str) -> bool,
) -> Option<usize> {
    if pattern.len() > lines.len() {
        return None;
    }
    let last = lines.len() - pattern.len();
    (start..=last).find(|&i| {
        lines[i..i + pattern.len()]
            .iter()
            .zip(pattern)
            .all(|(line, expected)| eq(*line, *expected))
    })
}

/// Locate `pattern` in `lines` at or after `start`.
///
/// An empty pattern matches at `start`. When `end_of_file` is set the block
/// is first tried flush against the end of the file (ignoring the empty
/// element a trailing newline leaves behind) before falling back to a
/// forward search.
pub fn seek_sequence(
    lines: &[&str],
    pattern: &[&str],
    start: usize,
    end_of_file: bool,
) -> Option<(usize, Fuzz)> {
    if start > lines.len() {
        return None;
    }
    if end_of_file {
        let content_len = match lines.last() {
            Some(last) if last.is_empty() => lines.len() - 1,
            _ => lines.len(),
        };
        if let Some(at) = content_len.checked_sub(pattern.len()) {
            if at >= start {
                let window = &lines[..content_len];
                for (fuzz, matcher) in STRATEGIES {
                    if matcher(window, pattern, at) == Some(at) {
                        return Some((at, fuzz));
                    }
                }
            }
        }
    }

    if pattern.is_empty() {
        return Some((start, Fuzz::Exact));
    }

    STRATEGIES
        .iter()
        .find_map(|(fuzz, matcher)| matcher(lines, pattern, start).map(|at| (at, *fuzz)))
}
