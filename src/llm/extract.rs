//! JSON extraction from model output.
//!
//! Models asked for JSON frequently wrap it in markdown fences or pad it
//! with prose. Extraction tries strategies in order of reliability:
//!
//! 1. A fenced ```json code block
//! 2. A generic fenced code block whose body looks like JSON
//! 3. The whole response, trimmed, if it is a balanced JSON value
//! 4. A brace-depth scan for the first balanced object or array

use regex::Regex;
use std::sync::OnceLock;

fn json_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("static regex must compile")
    })
}

fn generic_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```\s*(.*?)\s*```").expect("static regex must compile"))
}

/// Extract the most plausible JSON payload from raw model output.
///
/// Returns `None` when no candidate is found; the candidate is not
/// guaranteed to parse, only to be bracket-balanced.
pub fn extract_json(content: &str) -> Option<String> {
    if let Some(captures) = json_fence_re().captures(content) {
        let inner = captures[1].trim();
        if looks_like_json(inner) {
            return Some(inner.to_string());
        }
    }

    if let Some(captures) = generic_fence_re().captures(content) {
        let inner = captures[1].trim();
        if looks_like_json(inner) && is_balanced(inner) {
            return Some(inner.to_string());
        }
    }

    let trimmed = content.trim();
    if looks_like_json(trimmed) && is_balanced(trimmed) {
        return Some(trimmed.to_string());
    }

    scan_balanced_value(content)
}

fn looks_like_json(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[')
}

/// Check that braces and brackets balance, ignoring those inside strings.
fn is_balanced(text: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }

    depth == 0 && !in_string
}

/// Scan for the first balanced top-level object or array embedded in prose.
fn scan_balanced_value(content: &str) -> Option<String> {
    let start = content.find(['{', '['])?;
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_fenced_json_block() {
        let content = "Here is the result:\n```json\n{\"score\": 0.8}\n```\nDone.";
        assert_eq!(extract_json(content), Some("{\"score\": 0.8}".to_string()));
    }

    #[test]
    fn test_extracts_generic_fence() {
        let content = "```\n{\"ok\": true}\n```";
        assert_eq!(extract_json(content), Some("{\"ok\": true}".to_string()));
    }

    #[test]
    fn test_extracts_direct_json() {
        let content = "  {\"a\": [1, 2, 3]}  ";
        assert_eq!(extract_json(content), Some("{\"a\": [1, 2, 3]}".to_string()));
    }

    #[test]
    fn test_extracts_embedded_object_from_prose() {
        let content = "Sure! The analysis is {\"verdict\": \"viable\"} as requested.";
        assert_eq!(
            extract_json(content),
            Some("{\"verdict\": \"viable\"}".to_string())
        );
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let content = "{\"text\": \"uses { and } freely\", \"n\": 1}";
        assert_eq!(extract_json(content), Some(content.to_string()));
    }

    #[test]
    fn test_no_json_returns_none() {
        assert_eq!(extract_json("I could not produce an answer."), None);
    }

    #[test]
    fn test_truncated_json_returns_none() {
        assert_eq!(extract_json("{\"partial\": [1, 2"), None);
    }

    #[test]
    fn test_fenced_block_wins_over_prose_braces() {
        let content = "Notation like {x} aside:\n```json\n{\"value\": 1}\n```";
        assert_eq!(extract_json(content), Some("{\"value\": 1}".to_string()));
    }
}
