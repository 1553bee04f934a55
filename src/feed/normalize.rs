//! Text cleanup, language detection and lenient timestamp parsing for
//! feed entries.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use lingua::{Language, LanguageDetector, LanguageDetectorBuilder};
use once_cell::sync::Lazy;
use regex::Regex;

/// Language code stored when detection has nothing to go on.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Characters fed to the detector.
const DETECTION_SAMPLE_CHARS: usize = 1000;

static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<iframe\b[^>]*>.*?</iframe\s*>",
    )
    .unwrap()
});
static BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?p\b[^>]*>|<br\s*/?>|</(div|li|h[1-6])\s*>").unwrap());
static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static HSPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\r\x0B\x0C\u{00A0}\u{2009}\u{202F}]+").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static DETECTOR: Lazy<LanguageDetector> = Lazy::new(|| {
    LanguageDetectorBuilder::from_languages(&[
        Language::English,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Italian,
        Language::Portuguese,
        Language::Dutch,
        Language::Russian,
        Language::Arabic,
        Language::Chinese,
        Language::Japanese,
        Language::Korean,
        Language::Turkish,
        Language::Polish,
        Language::Indonesian,
        Language::Hindi,
    ])
    .build()
});

/// Converts an HTML fragment into plain text.
///
/// Script, style and iframe blocks are dropped with their contents.
/// Paragraph, `<br>` and block-closing tags become line breaks, every other
/// tag is removed, entities are decoded, runs of horizontal whitespace
/// collapse to one space and more than one blank line collapses to one.
pub fn clean_html(input: &str) -> String {
    if input.trim().is_empty() {
        return String::new();
    }

    let without_blocks = BLOCK_RE.replace_all(input, "");
    let with_breaks = BREAK_RE.replace_all(&without_blocks, "\n");
    let without_tags = HTML_TAG_RE.replace_all(&with_breaks, "");
    let decoded = html_escape::decode_html_entities(&without_tags);
    let compact = HSPACE_RE.replace_all(&decoded, " ");

    let lines: Vec<&str> = compact.lines().map(str::trim).collect();
    let joined = lines.join("\n");
    BLANK_LINES_RE
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

/// Detects the ISO 639-1 code of `text`, or [`UNKNOWN_LANGUAGE`].
pub fn detect_language(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return UNKNOWN_LANGUAGE.to_string();
    }

    let sample: String = trimmed.chars().take(DETECTION_SAMPLE_CHARS).collect();
    match DETECTOR.detect_language_of(sample.as_str()) {
        Some(language) => language.iso_code_639_1().to_string().to_lowercase(),
        None => UNKNOWN_LANGUAGE.to_string(),
    }
}

/// Parses the date formats seen in the wild that strict feed parsers reject.
///
/// Tries RFC 3339, RFC 2822, then a handful of naive layouts interpreted as
/// UTC. Returns `None` when nothing matches.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Feeds often carry a wrong or spelled-out weekday; the date itself wins
    parse_dated(raw).or_else(|| strip_weekday(raw).and_then(parse_dated))
}

fn parse_dated(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%a, %d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M:%S",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Drops a leading `Mon,` / `Tuesday,` token.
fn strip_weekday(raw: &str) -> Option<&str> {
    let (head, rest) = raw.split_once(',')?;
    let head = head.trim();
    (head.len() >= 3 && head.chars().all(|c| c.is_ascii_alphabetic())).then(|| rest.trim_start())
}
