//! Clean-up helpers for text produced by language models.

/// Strip a markdown code fence around a JSON payload.
///
/// Models often wrap tool arguments as ```` ```json {...} ``` ````; tools expect
/// the bare JSON. Text without a fence is only trimmed.
pub fn clean_json_block(raw: &str) -> &str {
    let mut s = raw.trim();

    for prefix in ["```json", "```JSON", "```Json", "```"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest;
            break;
        }
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Truncate `text` to at most `max_len` bytes on a char boundary.
///
/// Returns the (possibly shortened) text and whether it was cut.
pub fn truncate(text: &str, max_len: usize) -> (String, bool) {
    if text.len() <= max_len {
        return (text.to_string(), false);
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (format!("{}... (truncated)", &text[..end]), true)
}
