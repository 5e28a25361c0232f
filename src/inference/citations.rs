//! Rendering of web-search sources into the `### ONLINE_SEARCH` block.
//!
//! Downstream rendering looks for the header token and the `#<n> - ` line
//! prefix, so the layout here must stay byte-for-byte stable:
//!
//! ```text
//! ### ONLINE_SEARCH
//! #1 - [Title](https://example.com)
//! #2 - [https://other.example](https://other.example)
//! Queries: first query, second query
//! ```

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::types::Citation;

pub const ONLINE_SEARCH_HEADER: &str = "### ONLINE_SEARCH";

/// Title used for Gemini grounding chunks that have neither title nor URL.
pub const GROUNDING_FALLBACK_TITLE: &str = "result";

/// Title used for OpenRouter citations that arrive without one.
pub const CITATION_FALLBACK_TITLE: &str = "Web Result";

static INDEXED_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"### ONLINE_SEARCH[\s\S]*#\d+\s-").expect("indexed section pattern is valid")
});

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// True when `text` already holds an ONLINE_SEARCH header followed by a numbered entry.
pub fn has_indexed_section(text: &str) -> bool {
    text.contains(ONLINE_SEARCH_HEADER) && INDEXED_SECTION.is_match(text)
}

/// Drops repeated sources, keyed by URL, then title. First occurrence wins.
///
/// Entries with neither a URL nor a title can't be compared and are all kept.
pub fn dedup(citations: &[Citation]) -> Vec<&Citation> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut unique = Vec::new();
    for citation in citations {
        let keep = match non_empty(&citation.url).or_else(|| non_empty(&citation.title)) {
            Some(key) => seen.insert(key),
            None => true,
        };
        if keep {
            unique.push(citation);
        }
    }
    unique
}

/// Renders `#<n> - [<title>](<url>)` lines, or just `#<n> - <title>` when there is no URL.
pub fn render_lines(citations: &[Citation], fallback_title: &str) -> Vec<String> {
    dedup(citations)
        .into_iter()
        .enumerate()
        .map(|(idx, c)| {
            let url = non_empty(&c.url);
            let title = non_empty(&c.title).or(url).unwrap_or(fallback_title);
            let link = match url {
                Some(url) => format!("[{title}]({url})"),
                None => title.to_string(),
            };
            format!("#{} - {}", idx + 1, link)
        })
        .collect()
}

/// Builds the complete block: header, numbered sources, then an optional `Queries:` line.
pub fn online_search_block(citations: &[Citation], queries: &[String], fallback_title: &str) -> String {
    let mut block = vec![ONLINE_SEARCH_HEADER.to_string()];
    block.extend(render_lines(citations, fallback_title));
    if !queries.is_empty() {
        block.push(format!("Queries: {}", queries.join(", ")));
    }
    block.join("\n")
}

/// Appends grounding results to `existing`.
///
/// Returns the text untouched when there are no sources or when it already
/// carries a numbered ONLINE_SEARCH list, so re-running on prior output does
/// not stack a second block. An existing bare header gets the list directly
/// beneath it; otherwise a blank line separates the block from the answer.
pub fn format_online_search(citations: &[Citation], queries: &[String], existing: &str) -> String {
    if citations.is_empty() {
        return existing.to_string();
    }

    let has_header = existing.contains(ONLINE_SEARCH_HEADER);
    if has_header && INDEXED_SECTION.is_match(existing) {
        return existing.to_string();
    }

    let block = online_search_block(citations, queries, GROUNDING_FALLBACK_TITLE);
    if has_header {
        format!("{}\n{}", existing.trim(), block)
    } else {
        format!("{}\n\n{}", existing.trim(), block)
    }
}

/// The text OpenRouter appends after the answer when it returned url citations.
pub fn citation_appendix(citations: &[Citation]) -> Option<String> {
    if citations.is_empty() {
        return None;
    }
    Some(format!(
        "\n\n{}",
        online_search_block(citations, &[], CITATION_FALLBACK_TITLE)
    ))
}
