//! Markdown code-fence removal for generator output.
//!
//! Generators are asked for bare markup but frequently wrap it as
//! ```` ```html\n...\n``` ````. The text arrives cumulatively, so this also has
//! to behave on prefixes of a fenced block (an unfinished opening fence, or a
//! body whose closing fence has not arrived yet).

const FENCE: &str = "```";

/// Strip a leading/trailing triple-backtick fence (with an optional language
/// tag) and the surrounding whitespace.
///
/// - `"```html\n<p>Hi</p>\n```"` becomes `"<p>Hi</p>"`.
/// - An opening fence that is still being streamed (`"```htm"`) yields `""`.
/// - Text without fences is only trimmed.
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix(FENCE) {
        body = match rest.find('\n') {
            Some(newline) if is_language_tag(&rest[..newline]) => &rest[newline + 1..],
            Some(_) => rest,
            None if is_language_tag(rest) => return "",
            None => rest,
        };
    }

    body = body.trim_end();
    if let Some(rest) = body.strip_suffix(FENCE) {
        body = rest;
    }
    body.trim()
}

// A fence info string: empty or a single word such as `html`, `json`, `c++`.
fn is_language_tag(s: &str) -> bool {
    let s = s.trim();
    !s.contains('<') && !s.contains(char::is_whitespace) && !s.contains('`')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_html_fence() {
        assert_eq!(strip_code_fence("```html\n<p>Hi</p>\n```"), "<p>Hi</p>");
    }

    #[test]
    fn strips_fence_without_language_tag() {
        assert_eq!(strip_code_fence("```\n<div></div>\n```\n"), "<div></div>");
    }

    #[test]
    fn strips_other_language_tags() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn leaves_unfenced_text_trimmed() {
        assert_eq!(strip_code_fence("  <p>x</p>\n"), "<p>x</p>");
    }

    #[test]
    fn partial_opening_fence_yields_nothing() {
        assert_eq!(strip_code_fence("```"), "");
        assert_eq!(strip_code_fence("```ht"), "");
    }

    #[test]
    fn open_fence_without_closing_fence_mid_stream() {
        assert_eq!(strip_code_fence("```html\n<div>A"), "<div>A");
    }

    #[test]
    fn inline_fence_keeps_markup_on_first_line() {
        assert_eq!(strip_code_fence("```<b>x</b>```"), "<b>x</b>");
    }
}
