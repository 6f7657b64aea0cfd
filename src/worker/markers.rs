//! Vendor response markers and output cleanup
//!
//! Worker executables echo the full chat-templated prompt before generating,
//! so the response is located by scanning stdout for the first known
//! "assistant speaks now" marker. The table is ordered: specific formats come
//! before generic ones, otherwise `Assistant:` would match inside
//! `### Assistant:` or inside a prompt that merely quotes it.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// A start-of-response marker and how many bytes to skip once it matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartMarker {
    pub pattern: &'static str,
    pub skip: usize,
}

impl StartMarker {
    const fn new(pattern: &'static str) -> Self {
        Self {
            pattern,
            skip: pattern.len(),
        }
    }
}

/// Start markers in priority order
pub const START_MARKERS: &[StartMarker] = &[
    StartMarker::new("<|start_header_id|>assistant<|end_header_id|>"),
    StartMarker::new("<|assistant|>"),
    StartMarker::new("<|im_start|>assistant"),
    StartMarker::new("### Assistant:"),
    StartMarker::new("Assistant:"),
];

/// End-of-turn markers; the response is cut at the earliest one present
pub const END_MARKERS: &[&str] = &[
    "<|eot_id|>",
    "<|start_header_id|>",
    "<|",
    "<|end|>",
    "<|im_end|>",
    "</s>",
    "<|endoftext|>",
    "<|user|>",
    "User:",
    "###",
];

/// Find where the response begins in the accumulated output
///
/// Returns the byte offset just past the matched marker together with the
/// marker itself. The first table entry present anywhere in `buffer` wins,
/// regardless of where a lower-priority marker occurs.
pub fn find_response_start(buffer: &str) -> Option<(usize, &'static StartMarker)> {
    START_MARKERS.iter().find_map(|marker| {
        buffer
            .find(marker.pattern)
            .map(|pos| (pos + marker.skip, marker))
    })
}

fn ansi_escape() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ANSI pattern"))
}

/// Remove terminal color and cursor sequences some workers emit
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ansi_escape().replace_all(text, "")
}

/// Strip trailing vendor tokens from a captured response
pub fn clean_response(text: &str) -> String {
    let text = strip_ansi(text);
    let text = text.as_ref();
    let cut = END_MARKERS
        .iter()
        .filter_map(|marker| text.find(marker))
        .min()
        .unwrap_or(text.len());

    trim_unterminated_tag(&text[..cut]).trim().to_string()
}

/// Drop a dangling `<token` left by a generation that was cut off
///
/// Falls back to the last sentence-ending punctuation before the bracket;
/// if there is none, everything from the bracket on is dropped.
fn trim_unterminated_tag(text: &str) -> &str {
    let Some(open) = text.rfind('<') else {
        return text;
    };
    if text[open..].contains('>') {
        return text;
    }

    let before = &text[..open];
    match before.rfind(['.', '!', '?']) {
        Some(end) => &before[..=end],
        None => before,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_specific_marker_before_generic() {
        let output = "<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\nSure. Assistant: here";
        let (start, marker) = find_response_start(output).unwrap();

        assert_eq!(marker.pattern, "<|im_start|>assistant");
        assert_eq!(&output[start..], "\nSure. Assistant: here");
    }

    #[test]
    fn test_priority_beats_position() {
        // The generic marker appears first, but the header pair has priority
        let output = "Assistant: echo <|start_header_id|>assistant<|end_header_id|>answer";
        let (start, marker) = find_response_start(output).unwrap();

        assert_eq!(marker.pattern, START_MARKERS[0].pattern);
        assert_eq!(&output[start..], "answer");
    }

    #[test]
    fn test_markdown_heading_marker() {
        let output = "### User: q\n### Assistant: a";
        let (start, marker) = find_response_start(output).unwrap();
        assert_eq!(marker.pattern, "### Assistant:");
        assert_eq!(&output[start..], " a");
    }

    #[test]
    fn test_no_marker() {
        assert!(find_response_start("loading model... done").is_none());
    }

    #[test]
    fn test_clean_cuts_at_earliest_end_marker() {
        assert_eq!(clean_response("Hello there<|end|>more"), "Hello there");
        assert_eq!(clean_response(" Fine.</s> User: again"), "Fine.");
        assert_eq!(clean_response("Answer\n### next"), "Answer");
        assert_eq!(clean_response("Done<|eot_id|>"), "Done");
    }

    #[test]
    fn test_clean_strips_terminal_colors() {
        assert_eq!(clean_response("\x1b[32mGreen\x1b[0m answer<|im_end|>"), "Green answer");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_clean_trims_unterminated_tag() {
        assert_eq!(
            clean_response("First sentence. Second one <im_sta"),
            "First sentence."
        );
        assert_eq!(clean_response("No punctuation <tok"), "No punctuation");
        assert_eq!(clean_response("Keep <b>bold</b> text"), "Keep <b>bold</b> text");
    }

    #[test]
    fn test_clean_plain_text_untouched() {
        assert_eq!(clean_response("  plain answer  "), "plain answer");
    }
}
