//! Heading-level correction for backend Markdown.
//!
//! Layout backends detect headings well but assign levels poorly: a paper's
//! title, "1 Introduction" and "3.2.1 Ablation" often all come out as `#`.
//! This pass re-derives levels from the heading text itself.
//!
//! ## Rules
//!
//! | Heading text                      | Depth                       |
//! |-----------------------------------|-----------------------------|
//! | `3`, `3.`, `3 Intro`              | 1                           |
//! | `3.2 Setup`, `3.2.1 Ablation`     | number of numeric parts     |
//! | `第三章 …`, `Chapter 3 …`          | 1                           |
//! | `第二节 …`                         | 2                           |
//!
//! The first unnumbered heading seen before any numbered one is the document
//! title and becomes `#`. When a title exists, numbered headings shift down
//! one level and later unnumbered headings are at least `##`. Levels are
//! clamped to `1..=6`. Text inside fenced code blocks is never touched.

use super::postprocess::{is_heading, FenceTracker};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_DOTTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}(?:\.\d{1,3})*)\.?(?:\s|$)").unwrap());
static RE_CHAPTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:第[0-9一二三四五六七八九十百零〇两]+章|(?i:chapter)\s+\d+\b)").unwrap()
});
static RE_SECTION_CN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^第[0-9一二三四五六七八九十百零〇两]+节").unwrap());

/// Structural depth implied by the heading text, or `None` if unnumbered.
pub fn numbering_depth(text: &str) -> Option<usize> {
    let text = text.trim();
    if RE_CHAPTER.is_match(text) {
        return Some(1);
    }
    if RE_SECTION_CN.is_match(text) {
        return Some(2);
    }
    RE_DOTTED
        .captures(text)
        .map(|caps| caps[1].split('.').count())
}

/// Rewrite ATX heading levels in `markdown`. Non-heading lines are kept
/// byte-for-byte.
pub fn correct_title_levels(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut fences = FenceTracker::default();
    let mut has_title = false;
    let mut seen_numbered = false;
    let mut seen_unnumbered = false;

    for line in markdown.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        if fences.observe(body) || !is_heading(body) {
            out.push_str(line);
            continue;
        }

        let old_level = body.bytes().take_while(|b| *b == b'#').count();
        let text = body[old_level..].trim();

        let level = match numbering_depth(text) {
            Some(depth) => {
                seen_numbered = true;
                depth + usize::from(has_title)
            }
            None if !seen_numbered && !seen_unnumbered => {
                seen_unnumbered = true;
                has_title = true;
                1
            }
            None => {
                seen_unnumbered = true;
                if has_title {
                    old_level.max(2)
                } else {
                    old_level
                }
            }
        }
        .clamp(1, 6);

        out.push_str(&"#".repeat(level));
        out.push(' ');
        out.push_str(text);
        out.push_str(&line[body.len()..]);
    }
    out
}
