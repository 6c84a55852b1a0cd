use std::sync::OnceLock;

use regex::Regex;

/// Characters kept in a summary before truncation.
pub const SUMMARY_CHARS: usize = 1200;

const TRUNCATION_MARKER: &str = "\n\n…";

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid script regex"))
}

fn style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<style\b.*?</style\s*>").expect("valid style regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid tag regex"))
}

fn space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Plain text from HTML: drop script/style blocks and tags, collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let text = script_re().replace_all(html, " ");
    let text = style_re().replace_all(&text, " ");
    let text = tag_re().replace_all(&text, " ");
    space_re().replace_all(&text, " ").trim().to_string()
}

/// Rough token estimate: four characters per token, at least one.
pub fn approx_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

/// First [`SUMMARY_CHARS`] characters, with a marker when truncated.
pub fn summarize(text: &str) -> String {
    let mut summary: String = text.chars().take(SUMMARY_CHARS).collect();
    if text.chars().nth(SUMMARY_CHARS).is_some() {
        summary.push_str(TRUNCATION_MARKER);
    }
    summary
}
