//! Text helpers shared by the framework output parsers.

use regex::Regex;
use std::sync::LazyLock;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ANSI escape pattern is valid")
});

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("number pattern is valid"));

/// Remove terminal color and cursor escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").replace('\r', "")
}

/// First unsigned integer appearing in `text`.
pub fn extract_number(text: &str) -> Option<usize> {
    FIRST_NUMBER
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
}

/// Integer immediately before `keyword`, e.g. `3` in `"3 passed"`.
pub fn count_before(text: &str, keyword: &str) -> Option<usize> {
    let idx = text.find(keyword)?;
    let head = text[..idx].trim_end();
    let rest = head.trim_end_matches(|c: char| c.is_ascii_digit());
    head[rest.len()..].parse().ok()
}

/// First capture group of `re` in `text`, parsed as a float.
pub fn capture_f64(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// First capture group of `re` in `text`, parsed as an integer.
pub fn capture_usize(re: &Regex, text: &str) -> Option<usize> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
