//! Markdown cleanup for crawled documentation pages
//!
//! Crawled pages arrive as markdown with navigation chrome, feedback
//! widgets, and cookie banners rendered inline. [`clean`] is a line-oriented
//! filter that strips those before chunking or before a page is returned
//! from search. [`truncate`] cuts content to a character budget at the most
//! natural boundary available.

use regex::Regex;
use std::sync::LazyLock;

/// Header sections removed wholesale, including their body.
static SKIP_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^#{1,6}\s*(related\s+(articles|pages|links|resources)|see\s+also|next\s+steps|additional\s+resources|feedback|contribute|help\s+us\s+improve)\b",
    )
    .unwrap()
});

/// Table-of-contents headers: the header goes, then any link-only list lines
/// under it until real content shows up.
static TOC_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^#{1,6}\s*(in\s+this\s+(article|page|section|document|guide)|on\s+this\s+page|table\s+of\s+contents|contents|quick\s+links|navigation|jump\s+to)\b",
    )
    .unwrap()
});

static HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s").unwrap());

/// A list item whose entire payload is one markdown link.
static TOC_LINK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*+]?\s*\[[^\]]*\]\([^)]*\)\s*$").unwrap()
});

static LINE_NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // breadcrumb chains: at least three segments joined by >, ›, », or /
        r"^\s*[^>›»/\n]+(\s*[>›»/]\s*[^>›»/\n]+){2,}\s*$",
        r"(?i)^\s*last\s+(updated|modified|edited)\b",
        r"(?i)^\s*edit\s+this\s+page",
        r"(?i)was\s+this\s+(page|article)\s+helpful",
        r"(?i)^\s*rate\s+this\b",
        r"(?i)did\s+this\s+help",
        r"(?i)^\s*\d+\s+min(ute)?\s+read\s*$",
        r"(?i)^\s*(share|tweet|follow\s+us)\b",
        r"(?i)(cookie\s+(policy|settings|preferences)|we\s+use\s+cookies|accept\s+(all\s+)?cookies)",
        // pure in-page anchor links
        r"^\s*\[[^\]]*\]\(#[^)]*\)\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

fn header_level(line: &str) -> Option<usize> {
    HEADER.captures(line).map(|c| c[1].len())
}

fn is_line_noise(line: &str) -> bool {
    LINE_NOISE.iter().any(|re| re.is_match(line))
}

/// Strip navigation, TOC, and feedback boilerplate from markdown.
///
/// Deterministic and idempotent: `clean(clean(x)) == clean(x)`.
pub fn clean(markdown: &str) -> String {
    let mut out: Vec<&str> = Vec::new();

    // Level of the section currently being skipped, if any.
    let mut skip_until_level: Option<usize> = None;
    let mut in_toc = false;

    for line in markdown.lines() {
        if let Some(level) = header_level(line) {
            in_toc = false;

            if let Some(skip_level) = skip_until_level {
                if level > skip_level {
                    continue;
                }
                skip_until_level = None;
            }

            if SKIP_SECTION.is_match(line) {
                skip_until_level = Some(level);
                continue;
            }
            if TOC_SECTION.is_match(line) {
                in_toc = true;
                continue;
            }

            out.push(line);
            continue;
        }

        if skip_until_level.is_some() {
            continue;
        }

        if in_toc {
            if line.trim().is_empty() || TOC_LINK_LINE.is_match(line) {
                continue;
            }
            // First real content line ends the TOC run.
            in_toc = false;
        }

        if is_line_noise(line) {
            out.push("");
            continue;
        }

        out.push(line);
    }

    let joined = out.join("\n");
    let collapsed = EXCESS_NEWLINES.replace_all(&joined, "\n\n");
    collapsed.trim().to_string()
}

/// Appended to truncated output; the truncation window shrinks to make room
/// so the result never exceeds the requested length.
pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated...]";

/// Cut `content` down to at most `max_len` characters, preferring a paragraph
/// break after 70% of the budget, then a sentence end after 80%, then a word
/// boundary after 90%, then a hard cut.
pub fn truncate(content: &str, max_len: usize) -> String {
    if content.len() <= max_len {
        return content.to_string();
    }

    let budget = max_len.saturating_sub(TRUNCATION_MARKER.len());
    let window = safe_slice(content, budget);

    let cut = find_boundary(window, budget * 7 / 10, "\n\n")
        .or_else(|| find_boundary(window, budget * 8 / 10, ". "))
        .or_else(|| find_boundary(window, budget * 9 / 10, " "))
        .unwrap_or(window.len());

    format!("{}{}", window[..cut].trim_end(), TRUNCATION_MARKER)
}

/// Latest occurrence of `pat` at or after `min_pos`, returning the cut
/// position just past the pattern's content.
fn find_boundary(window: &str, min_pos: usize, pat: &str) -> Option<usize> {
    window
        .rfind(pat)
        .map(|i| if pat == ". " { i + 1 } else { i })
        .filter(|&i| i >= min_pos)
}

fn safe_slice(content: &str, mut end: usize) -> &str {
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_skip_sections_with_body() {
        let input = "# Guide\n\nReal content.\n\n## See Also\n\n- [Other](https://x.test/a)\n\nmore see-also text\n\n## Usage\n\nUsage text.";
        let cleaned = clean(input);
        assert!(cleaned.contains("Real content."));
        assert!(cleaned.contains("Usage text."));
        assert!(!cleaned.contains("See Also"));
        assert!(!cleaned.contains("see-also text"));
    }

    #[test]
    fn skip_section_ends_at_equal_level_header() {
        let input = "## Feedback\n\nTell us things.\n\n### Sub-feedback\n\nnested\n\n## Kept\n\nkept body";
        let cleaned = clean(input);
        assert!(!cleaned.contains("Tell us things"));
        assert!(!cleaned.contains("nested"));
        assert!(cleaned.contains("kept body"));
    }

    #[test]
    fn toc_drops_link_lines_until_content() {
        let input = "## On this page\n\n- [Intro](#intro)\n- [Setup](#setup)\n\nIntro paragraph stays.\n";
        let cleaned = clean(input);
        assert!(!cleaned.contains("On this page"));
        assert!(!cleaned.contains("#intro"));
        assert!(cleaned.contains("Intro paragraph stays."));
    }

    #[test]
    fn line_noise_removed() {
        let input = "Home > Docs > API > Reference\n\nBody text.\n\nLast updated: 2024-01-01\n\nWas this page helpful?\n\n3 min read";
        let cleaned = clean(input);
        assert_eq!(cleaned, "Body text.");
    }

    #[test]
    fn anchor_only_links_removed_but_real_links_kept() {
        let input = "[skip](#main)\n\nSee [the guide](https://docs.test/guide) for details.";
        let cleaned = clean(input);
        assert!(!cleaned.contains("#main"));
        assert!(cleaned.contains("https://docs.test/guide"));
    }

    #[test]
    fn collapses_newline_runs() {
        let cleaned = clean("a\n\n\n\n\nb");
        assert_eq!(cleaned, "a\n\nb");
    }

    #[test]
    fn clean_is_idempotent() {
        let input = "# T\n\nHome > Docs > Here\n\ntext\n\n## Next Steps\n\ngo away\n\n## Keep\n\nbody";
        let once = clean(input);
        assert_eq!(clean(&once), once);
    }

    #[test]
    fn truncate_short_input_unchanged() {
        assert_eq!(truncate("short", 100), "short");
    }

    #[test]
    fn truncate_prefers_paragraph_break() {
        let content = format!("{}\n\n{}", "a".repeat(80), "b".repeat(80));
        let out = truncate(&content, 120);
        assert!(out.starts_with(&"a".repeat(80)));
        assert!(!out.contains('b'));
        assert!(out.ends_with("[Content truncated...]"));
        assert!(out.len() <= 120);
    }

    #[test]
    fn truncate_falls_back_to_sentence() {
        let content = format!("{}. {}", "a".repeat(85), "b".repeat(85));
        let out = truncate(&content, 120);
        assert!(out.starts_with(&"a".repeat(85)));
        assert!(!out.contains('b'));
    }

    #[test]
    fn truncate_hard_cut_when_no_boundary() {
        let content = "x".repeat(300);
        let out = truncate(&content, 100);
        assert!(out.len() <= 100);
        assert!(out.ends_with("[Content truncated...]"));
    }
}
