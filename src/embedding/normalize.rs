//! Text cleanup applied before tokenization
//!
//! Pathological input (huge pastes, typographic quotes copied from word
//! processors, invisible zero-width characters) either blows up the token count
//! or produces unknown-token soup. Everything here maps such input onto plain
//! characters the vocabulary knows.

/// Default cap on characters fed to the tokenizer
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8000;

/// Normalize text for embedding
///
/// Caps the input at `max_chars` characters, replaces backticks and non-ASCII
/// quote/dash variants with ASCII equivalents, drops zero-width characters,
/// turns control characters into spaces and collapses whitespace runs.
pub fn normalize_text(text: &str, max_chars: usize) -> String {
    let mut cleaned = String::with_capacity(text.len().min(max_chars * 4));

    for c in text.chars().take(max_chars) {
        match c {
            // Zero-width space/joiners, word joiner, BOM
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => {}
            '`' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{00B4}' => {
                cleaned.push('\'')
            }
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{00AB}'
            | '\u{00BB}' => cleaned.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => cleaned.push('-'),
            '\u{2026}' => cleaned.push_str("..."),
            '\u{00A0}' | '\u{202F}' => cleaned.push(' '),
            c if c.is_control() => cleaned.push(' '),
            c => cleaned.push(c),
        }
    }

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
