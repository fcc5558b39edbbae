//! JSON extraction from free-form model output.
//!
//! Models asked for structured output frequently wrap it in markdown fences,
//! prepend an explanation, or get cut off mid-object. The extractor tries,
//! in order:
//!
//! 1. a fenced block tagged ```` ```json ````
//! 2. any fenced block whose body parses as JSON
//! 3. the whole trimmed content
//! 4. every balanced `{...}` / `[...]` span, last one first (reasoning models
//!    tend to put the answer after their thinking)
//!
//! [`extract_json_candidates`] returns all of them in that order so a typed
//! caller can skip spans of the wrong shape, such as a trailing `[1, 2]`
//! aside. Truncation is reported separately from "no JSON at all" so callers
//! can produce a useful error.
//!
//! ```
//! use cognito_score::utils::json_extraction::{try_extract_json_from_response, JsonExtractionResult};
//!
//! let reply = "Sure! Here it is:\n```json\n{\"questions\": []}\n```";
//! assert_eq!(
//!     try_extract_json_from_response(reply),
//!     JsonExtractionResult::Success("{\"questions\": []}".to_string())
//! );
//! ```

use std::sync::OnceLock;

use regex::Regex;

/// Outcome of a JSON extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// Content that parses as JSON.
    Success(String),
    /// JSON was started but never closed.
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    NotFound,
}

impl JsonExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }

    pub fn json(&self) -> Option<&str> {
        match self {
            JsonExtractionResult::Success(json) => Some(json),
            _ => None,
        }
    }
}

/// Bracket bookkeeping for a scanned string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonStructureAnalysis {
    pub unclosed_braces: usize,
    pub unclosed_brackets: usize,
    /// Scanning ended inside a string literal.
    pub in_string: bool,
    /// Byte offset of the first `{` or `[` outside a string.
    pub json_start: Option<usize>,
}

impl JsonStructureAnalysis {
    pub fn is_unbalanced(&self) -> bool {
        self.unclosed_braces > 0 || self.unclosed_brackets > 0 || self.in_string
    }
}

/// Scans `s` tracking brace/bracket depth outside string literals.
pub fn analyze_json_structure(s: &str) -> JsonStructureAnalysis {
    let mut braces: isize = 0;
    let mut brackets: isize = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut json_start = None;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                json_start.get_or_insert(i);
                braces += 1;
            }
            '}' if !in_string => braces -= 1,
            '[' if !in_string => {
                json_start.get_or_insert(i);
                brackets += 1;
            }
            ']' if !in_string => brackets -= 1,
            _ => {}
        }
    }

    JsonStructureAnalysis {
        unclosed_braces: braces.max(0) as usize,
        unclosed_brackets: brackets.max(0) as usize,
        in_string,
        json_start,
    }
}

/// Returns the byte index of the bracket closing the one at the start of `s`.
///
/// `s` must start with `{` or `[`. Nested structures and string literals
/// (including escaped quotes) are skipped.
pub fn find_closing(s: &str) -> Option<usize> {
    let (open, close) = match s.chars().next()? {
        '{' => ('{', '}'),
        '[' => ('[', ']'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_-]*)[ \t]*\r?\n(.*?)```").ok())
        .as_ref()
}

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Bodies of all fenced code blocks, paired with their language tag.
fn fenced_blocks(content: &str) -> Vec<(String, String)> {
    let Some(fence) = fence_regex() else {
        return Vec::new();
    };
    fence
        .captures_iter(content)
        .map(|cap| {
            (
                cap[1].to_lowercase(),
                cap.get(2).map_or("", |m| m.as_str()).trim().to_string(),
            )
        })
        .collect()
}

/// Every balanced object/array span that parses, in order of appearance.
fn balanced_spans(content: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut offset = 0;

    while offset < content.len() {
        let rest = &content[offset..];
        let Some(rel_start) = rest.find(|c: char| c == '{' || c == '[') else {
            break;
        };
        let start = offset + rel_start;
        match find_closing(&content[start..]) {
            Some(rel_end) => {
                let candidate = &content[start..=start + rel_end];
                if parses(candidate) {
                    spans.push(candidate);
                    offset = start + rel_end + 1;
                } else {
                    offset = start + 1;
                }
            }
            None => offset = start + 1,
        }
    }

    spans
}

/// Every JSON document in a model response, most likely answer first.
///
/// Order: ```` ```json ```` fences, other fences that parse, the whole trimmed
/// content, then balanced spans from last to first. Callers that know the
/// target shape should take the first candidate that deserializes.
pub fn extract_json_candidates(content: &str) -> Vec<String> {
    let trimmed = content.trim();
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        if !candidates.iter().any(|c| c == candidate) {
            candidates.push(candidate.to_string());
        }
    };

    let blocks = fenced_blocks(trimmed);
    for (_, body) in blocks.iter().filter(|(lang, _)| lang == "json") {
        if parses(body) {
            push(body.as_str());
        }
    }
    for (_, body) in &blocks {
        if parses(body) {
            push(body.as_str());
        }
    }

    if (trimmed.starts_with('{') || trimmed.starts_with('[')) && parses(trimmed) {
        push(trimmed);
    }

    for span in balanced_spans(trimmed).into_iter().rev() {
        push(span);
    }

    candidates
}

/// Attempts to pull a JSON document out of a model response.
///
/// Returns the first of [`extract_json_candidates`], or a truncation or
/// not-found diagnosis when there is none.
pub fn try_extract_json_from_response(content: &str) -> JsonExtractionResult {
    if let Some(first) = extract_json_candidates(content).into_iter().next() {
        return JsonExtractionResult::Success(first);
    }
    diagnose(content.trim())
}

/// Explains why no JSON document could be extracted from `trimmed`.
fn diagnose(trimmed: &str) -> JsonExtractionResult {
    let analysis = analyze_json_structure(trimmed);
    match analysis.json_start {
        Some(start) if analysis.is_unbalanced() => JsonExtractionResult::Truncated {
            partial_json: trimmed[start..].to_string(),
            unclosed_braces: analysis.unclosed_braces,
            unclosed_brackets: analysis.unclosed_brackets,
        },
        _ => JsonExtractionResult::NotFound,
    }
}

/// Returns at most `max_chars` characters of `s`, respecting char boundaries.
pub fn preview(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
