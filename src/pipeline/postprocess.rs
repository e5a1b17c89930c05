//! Deterministic text cleanup applied to converter output.
//!
//! Two entry points share one set of line rules:
//!
//! - [`clean_text`] for raw page text from the simple converter. Content is
//!   never reflowed, only whitespace and invisible characters are touched.
//! - [`clean_markdown`] for Markdown written by the layout backend. Adds
//!   heading spacing and table repairs on top of the text rules. Fenced code
//!   blocks pass through the Markdown-only rules untouched.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so every later rule can split on `\n`.
//! Invisible characters go before blank-line collapsing, since a line holding
//! only a zero-width space is blank once the character is removed.

use once_cell::sync::Lazy;
use regex::Regex;

/// Cleanup for plain extracted text.
///
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of blank lines to at most two
/// 5. End with exactly one newline (empty input stays empty)
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

/// Cleanup for backend Markdown: the [`clean_text`] rules plus
/// heading spacing, missing table separators, and stray mid-table separators.
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = normalise_heading_spacing(&s);
    let s = fix_table_separators(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

// ── Line endings ─────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Invisible characters ─────────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Trailing whitespace ──────────────────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Blank lines ──────────────────────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").into_owned()
}

// ── Final newline ────────────────────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

// ── Fenced code tracking ─────────────────────────────────────────────────────

/// Tracks whether the current line sits inside a ``` or ~~~ fence.
#[derive(Default)]
pub(crate) struct FenceTracker {
    open: Option<&'static str>,
}

impl FenceTracker {
    /// Feed one line; returns `true` if the line is code (fence lines included).
    pub(crate) fn observe(&mut self, line: &str) -> bool {
        let t = line.trim_start();
        let marker = if t.starts_with("```") {
            Some("```")
        } else if t.starts_with("~~~") {
            Some("~~~")
        } else {
            None
        };
        match (self.open, marker) {
            (None, Some(m)) => {
                self.open = Some(m);
                true
            }
            (Some(open), Some(m)) if open == m => {
                self.open = None;
                true
            }
            (Some(_), _) => true,
            (None, None) => false,
        }
    }
}

// ── Heading spacing ──────────────────────────────────────────────────────────

static RE_ATX_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

pub(crate) fn is_heading(line: &str) -> bool {
    RE_ATX_HEADING.is_match(line)
}

/// Blank line before and after every ATX heading outside code fences.
fn normalise_heading_spacing(input: &str) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(input.len() / 32 + 8);
    let mut fences = FenceTracker::default();
    let mut after_heading = false;

    for line in input.lines() {
        let code = fences.observe(line);
        let heading = !code && is_heading(line);

        let needs_gap = (heading || after_heading) && !line.is_empty();
        if needs_gap && out.last().is_some_and(|l| !l.is_empty()) {
            out.push("");
        }
        out.push(line);
        after_heading = heading;
    }
    out.join("\n")
}

// ── Tables ───────────────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|')
        && t.contains('-')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Insert a separator after a header row that lacks one and drop any
/// separator that is not the second row of its table.
fn fix_table_separators(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
    let mut fences = FenceTracker::default();
    let mut row = 0usize;

    for (i, line) in lines.iter().enumerate() {
        if fences.observe(line) || !is_table_row(line) {
            row = 0;
            out.push((*line).to_string());
            continue;
        }
        row += 1;

        if is_separator_row(line) {
            if row == 2 {
                out.push((*line).to_string());
            } else {
                row -= 1;
            }
            continue;
        }

        out.push((*line).to_string());
        if row == 1 {
            let next = lines.get(i + 1).copied().unwrap_or("");
            if is_table_row(next) && !is_separator_row(next) {
                let cols = line.trim().matches('|').count().saturating_sub(1).max(1);
                let sep: String = std::iter::once("|")
                    .chain(std::iter::repeat_n(" --- |", cols))
                    .collect();
                out.push(sep);
                row = 2;
            }
        }
    }
    out.join("\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────
