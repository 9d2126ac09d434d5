//! Speech text sanitizer.
//!
//! Language models answer in markdown and emoji; synthesis providers read
//! those symbols aloud. `sanitize_for_speech` applies an ordered list of
//! substitutions, then keeps only characters from a fixed allow-list.

use once_cell::sync::Lazy;
use regex::Regex;

/// Ordered substitution rules. Order matters: code blocks must go before
/// inline code, bold before italic.
static RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"&", " and "),
        (r"@", " at "),
        (r"```[\s\S]*?```", ""),
        (r"`[^`]+`", ""),
        (r"\[([^\]]+)\]\([^)]+\)", "$1"),
        (r"\*\*([^*]+)\*\*", "$1"),
        (r"\*([^*]+)\*", "$1"),
        (r"__([^_]+)__", "$1"),
        (r"_([^_]+)_", "$1"),
        (r"(?m)^#{1,6}\s+", ""),
        (r"(?m)^[*+\-]\s+", ""),
        (r"(?m)^>\s+", ""),
        (r"(?m)^[\-*]{3,}$", ""),
        (r"<[^>]+>", ""),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("sanitizer patterns are valid"),
            replacement,
        )
    })
    .collect()
});

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Punctuation kept besides letters, digits and whitespace.
const ALLOWED_PUNCTUATION: &str = ".,!?:;'\"-_()[]{}$%=+";

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(c)
}

/// Collapses runs of the same sentence punctuation (`!!!` → `!`).
fn collapse_repeated_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous = None;
    for c in text.chars() {
        if matches!(c, '.' | ',' | '!' | '?') && previous == Some(c) {
            continue;
        }
        out.push(c);
        previous = Some(c);
    }
    out
}

/// Strips markdown, emoji and decorative symbols so only speakable text
/// remains. Returns an empty string if nothing speakable is left.
pub fn sanitize_for_speech(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut cleaned = text.to_string();
    for (pattern, replacement) in RULES.iter() {
        cleaned = pattern.replace_all(&cleaned, *replacement).into_owned();
    }

    let filtered: String = cleaned.chars().filter(|c| is_allowed(*c)).collect();
    let single_spaced = WHITESPACE_RUN.replace_all(&filtered, " ");

    collapse_repeated_punctuation(&single_spaced)
        .trim()
        .to_string()
}
