//! Recovery parsing for backend replies.
//!
//! Generative backends rarely return clean JSON: replies arrive wrapped in
//! prose, markdown code fences, or with trailing commentary. The helpers
//! here strip the wrapping and pull out the first balanced `{...}` span.

/// Strip markdown code fencing from a reply, if present.
///
/// Handles ```` ```json ```` / ```` ``` ```` fences; anything outside the
/// first fenced block is dropped. Replies without fences pass through.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(fence_start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[fence_start + 3..];
    // Skip the language tag on the opening fence line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(fence_end) => body[..fence_end].trim(),
        None => body.trim(),
    }
}

/// Extract the first balanced `{...}` span from a reply and parse it.
///
/// Tracks brace depth while respecting JSON string literals and escapes,
/// so braces inside string values do not unbalance the scan.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let body = strip_code_fences(text);
    let start = body.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in body[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let span = &body[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str(span).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Largest index `<= max` that sits on a char boundary of `text`.
pub fn floor_char_boundary(text: &str, max: usize) -> usize {
    if max >= text.len() {
        return text.len();
    }
    let mut index = max;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_fences_with_language_tag() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_passthrough_without_fence() {
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_object_from_surrounding_prose() {
        let reply = "Sure! My pick: {\"winner\": \"a\", \"reasoning\": \"best\"} hope that helps";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value, json!({"winner": "a", "reasoning": "best"}));
    }

    #[test]
    fn test_extract_respects_braces_inside_strings() {
        let reply = "{\"reasoning\": \"loves {curly} braces\", \"winner\": \"b\"}";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["winner"], "b");
    }

    #[test]
    fn test_extract_nested_objects() {
        let reply = "noise {\"outer\": {\"inner\": 1}, \"winner\": \"c\"} trailing {bad";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["outer"]["inner"], 1);
    }

    #[test]
    fn test_extract_unbalanced_returns_none() {
        assert!(extract_json_object("{\"winner\": \"a\"").is_none());
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn test_extract_escaped_quotes() {
        let reply = r#"{"reasoning": "said \"hi\" {", "winner": "d"}"#;
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["winner"], "d");
    }

    #[test]
    fn test_floor_char_boundary_multibyte() {
        let text = "héllo";
        // Index 2 splits the two-byte 'é'
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(floor_char_boundary(text, 100), text.len());
    }
}
