/// Return the body of the first fenced code block in `text`, or the trimmed
/// text itself when it carries no fences.
///
/// The language tag on the opening fence (```` ```yaml ````, ```` ```yml ````,
/// …) is discarded. An unterminated fence yields everything after it.
pub fn extract_code_block(text: &str) -> String {
    let Some(open) = text.find("```") else {
        return text.trim().to_string();
    };
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
    let body = &after_fence[body_start..];
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim().to_string()
}
