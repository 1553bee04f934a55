use chrono::{DateTime, Utc};
use feed_rs::model;
use feed_rs::parser;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::{Captures, Regex};
use serde::Serialize;
use thiserror::Error;

use super::normalize::parse_timestamp;

/// Language assumed for a feed that declares none.
pub const DEFAULT_FEED_LANGUAGE: &str = "en";

/// Raised when a body decodes neither as-is nor after sanitizing.
#[derive(Debug, Error)]
#[error("Feed could not be parsed: {0}")]
pub struct ParseError(pub String);

/// Feed-level fields, each already resolved through its fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedMetadata {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: String,
    pub image: String,
    pub published: DateTime<Utc>,
}

/// A media reference found on an entry, with its declared MIME type if any.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaHint {
    pub url: String,
    pub mime: Option<String>,
}

impl MediaHint {
    /// True when the MIME type says image, or there is no MIME type and the
    /// URL path ends in a known image extension.
    pub fn is_image(&self) -> bool {
        match &self.mime {
            Some(mime) => mime.trim().to_ascii_lowercase().starts_with("image/"),
            None => has_image_extension(&self.url),
        }
    }
}

/// One decoded item, in document order.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub title: String,
    pub link: String,
    /// Full content body when present, otherwise the summary.
    pub content_html: String,
    pub summary_html: String,
    /// `None` when neither a published nor an updated date was readable.
    pub published: Option<DateTime<Utc>>,
    pub media_thumbnails: Vec<String>,
    pub media_contents: Vec<MediaHint>,
    /// Links carrying `rel="enclosure"`.
    pub enclosures: Vec<MediaHint>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DecodedFeed {
    pub meta: FeedMetadata,
    pub entries: Vec<Entry>,
    /// Set when the body was not well-formed XML but still decoded.
    pub bozo: bool,
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes an RSS, Atom or JSON feed body.
///
/// A body that fails the strict parse is sanitized and parsed again; if that
/// works the result is flagged `bozo`. A body that parses but has no items
/// is `Ok` with an empty entry list.
pub fn decode(bytes: &[u8]) -> Result<DecodedFeed, ParseError> {
    let well_formed = is_well_formed(bytes);

    let (feed, recovered) = match parse_strict(bytes) {
        Ok(feed) => (feed, false),
        Err(strict_err) => {
            let Some(cleaned) = sanitize(bytes) else {
                return Err(ParseError(strict_err.to_string()));
            };
            match parse_strict(cleaned.as_bytes()) {
                Ok(feed) => {
                    tracing::debug!(error = %strict_err, "Recovered malformed feed after sanitizing");
                    (feed, true)
                }
                Err(_) => return Err(ParseError(strict_err.to_string())),
            }
        }
    };

    let now = Utc::now();
    let meta = extract_metadata(&feed, now);
    let entries = feed.entries.into_iter().map(convert_entry).collect();

    Ok(DecodedFeed {
        meta,
        entries,
        bozo: recovered || !well_formed,
    })
}

fn parse_strict(bytes: &[u8]) -> Result<model::Feed, parser::ParseFeedError> {
    parser::Builder::new()
        .timestamp_parser(parse_timestamp)
        .build()
        .parse(bytes)
}

fn extract_metadata(feed: &model::Feed, now: DateTime<Utc>) -> FeedMetadata {
    let title = feed
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();

    let link = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    let description = feed
        .description
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();

    let language = feed
        .language
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_FEED_LANGUAGE.to_string());

    let image = feed
        .logo
        .as_ref()
        .or(feed.icon.as_ref())
        .map(|img| img.uri.trim().to_string())
        .unwrap_or_default();

    FeedMetadata {
        title,
        link,
        description,
        language,
        image,
        published: feed.published.or(feed.updated).unwrap_or(now),
    }
}

fn convert_entry(entry: model::Entry) -> Entry {
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();

    let link = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.iter().find(|l| l.rel.as_deref() != Some("enclosure")))
        .map(|l| l.href.trim().to_string())
        .or_else(|| {
            // RSS guid with isPermaLink
            let id = entry.id.trim();
            (id.starts_with("http://") || id.starts_with("https://")).then(|| id.to_string())
        })
        .unwrap_or_default();

    let summary_html = entry.summary.map(|s| s.content).unwrap_or_default();
    let body = entry
        .content
        .and_then(|c| c.body)
        .filter(|b| !b.trim().is_empty());

    let mut media_thumbnails = Vec::new();
    let mut media_contents = Vec::new();
    let mut media_description = None;
    for object in entry.media {
        media_thumbnails.extend(object.thumbnails.into_iter().map(|t| t.image.uri));
        media_contents.extend(object.content.into_iter().filter_map(|c| {
            c.url.map(|url| MediaHint {
                url: url.to_string(),
                mime: c.content_type.map(|m| m.to_string()),
            })
        }));
        if media_description.is_none() {
            media_description = object.description.map(|d| d.content);
        }
    }

    // YouTube and other media feeds carry the text in media:description only.
    let content_html = body
        .or_else(|| (!summary_html.trim().is_empty()).then(|| summary_html.clone()))
        .or(media_description)
        .unwrap_or_default();

    let enclosures = entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| MediaHint {
            url: l.href.clone(),
            mime: l.media_type.clone(),
        })
        .collect();

    let categories = entry
        .categories
        .into_iter()
        .filter_map(|c| {
            let name = c.label.unwrap_or(c.term);
            let name = name.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect();

    Entry {
        title,
        link,
        content_html,
        summary_html,
        published: entry.published.or(entry.updated),
        media_thumbnails,
        media_contents,
        enclosures,
        categories,
    }
}

// ============================================================================
// Recovery
// ============================================================================

static AMPERSAND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]{1,7};|#[xX][0-9a-fA-F]{1,6};|[A-Za-z][A-Za-z0-9]{0,31};)?").unwrap()
});

const XML_ENTITIES: &[&str] = &["&amp;", "&lt;", "&gt;", "&quot;", "&apos;"];

/// Best-effort repair of a body that failed the strict parse.
///
/// Drops everything before the first `<`, strips control characters XML
/// forbids, escapes bare `&` and turns HTML named entities into numeric
/// references. Returns `None` when there is no markup at all.
fn sanitize(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let start = text.find('<')?;
    let text = text[start..].trim_start_matches('\u{feff}');

    let stripped: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();

    let escaped = AMPERSAND_RE.replace_all(&stripped, |caps: &Captures| {
        let whole = &caps[0];
        match caps.get(1) {
            None => "&amp;".to_string(),
            Some(_) if whole.starts_with("&#") || XML_ENTITIES.contains(&whole) => {
                whole.to_string()
            }
            Some(_) => {
                let decoded = html_escape::decode_html_entities(whole);
                if decoded == whole {
                    format!("&amp;{}", &whole[1..])
                } else {
                    decoded
                        .chars()
                        .map(|c| format!("&#{};", c as u32))
                        .collect()
                }
            }
        }
    });

    Some(escaped.into_owned())
}

/// Scans the body with a strict XML reader.
///
/// JSON feeds are not XML and are treated as well-formed.
fn is_well_formed(bytes: &[u8]) -> bool {
    let first = bytes
        .iter()
        .copied()
        .find(|b| !b.is_ascii_whitespace());
    if matches!(first, Some(b'{') | Some(b'[')) {
        return true;
    }

    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = true;
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                depth += 1;
                seen_root = true;
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Empty(_)) => seen_root = true,
            Ok(Event::Text(text)) => {
                if text.unescape().is_err() {
                    return false;
                }
            }
            Ok(Event::Eof) => return seen_root && depth == 0,
            Ok(_) => {}
            Err(_) => return false,
        }
        buf.clear();
    }
}

fn has_image_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    [".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".bmp", ".svg"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example News</title>
    <link>https://news.example.com/</link>
    <description>All the news</description>
    <language>fr</language>
    <image><url>https://news.example.com/logo.png</url><title>x</title><link>https://news.example.com/</link></image>
    <item>
      <title>First</title>
      <link>https://news.example.com/a/1</link>
      <description>&lt;p&gt;Summary one&lt;/p&gt;</description>
      <pubDate>Tue, 05 Mar 2024 10:20:30 GMT</pubDate>
      <category>World</category>
      <media:thumbnail url="https://cdn.example.com/t1.jpg"/>
    </item>
    <item>
      <title>Second</title>
      <link>https://news.example.com/a/2</link>
      <description>Summary two</description>
      <enclosure url="https://cdn.example.com/e2.png" type="image/png" length="100"/>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Blog</title>
  <link rel="self" href="https://blog.example.com/feed.atom"/>
  <link rel="alternate" href="https://blog.example.com/"/>
  <updated>2024-01-01T00:00:00Z</updated>
  <id>urn:uuid:blog</id>
  <entry>
    <title>Post</title>
    <id>urn:uuid:post-1</id>
    <link rel="alternate" href="https://blog.example.com/post-1"/>
    <link rel="enclosure" type="image/jpeg" href="https://blog.example.com/cover.jpg"/>
    <updated>2024-01-02T00:00:00Z</updated>
    <summary>Short</summary>
    <content type="html">&lt;p&gt;Full body&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn test_decode_rss_metadata_and_entries() {
        let decoded = decode(RSS.as_bytes()).unwrap();
        assert!(!decoded.bozo);
        assert_eq!(decoded.meta.title, "Example News");
        assert_eq!(decoded.meta.description, "All the news");
        assert_eq!(decoded.meta.language, "fr");
        assert_eq!(decoded.meta.image, "https://news.example.com/logo.png");
        assert!(decoded.meta.link.starts_with("https://news.example.com"));

        assert_eq!(decoded.entries.len(), 2);
        let first = &decoded.entries[0];
        assert_eq!(first.title, "First");
        assert_eq!(first.link, "https://news.example.com/a/1");
        assert!(first.content_html.contains("Summary one"));
        assert!(first.published.is_some());
        assert_eq!(first.categories, vec!["World".to_string()]);
        assert_eq!(first.media_thumbnails, vec!["https://cdn.example.com/t1.jpg".to_string()]);

        let second = &decoded.entries[1];
        assert!(second.published.is_none());
        assert!(second
            .media_contents
            .iter()
            .chain(second.enclosures.iter())
            .any(|m| m.url == "https://cdn.example.com/e2.png" && m.is_image()));
    }

    #[test]
    fn test_decode_atom_prefers_content_and_alternate_link() {
        let decoded = decode(ATOM.as_bytes()).unwrap();
        assert_eq!(decoded.meta.link, "https://blog.example.com/");
        assert_eq!(decoded.meta.language, DEFAULT_FEED_LANGUAGE);

        let entry = &decoded.entries[0];
        assert_eq!(entry.link, "https://blog.example.com/post-1");
        assert!(entry.content_html.contains("Full body"));
        assert_eq!(entry.summary_html, "Short");
        assert_eq!(entry.published, Some("2024-01-02T00:00:00Z".parse().unwrap()));
        assert_eq!(
            entry.enclosures,
            vec![MediaHint {
                url: "https://blog.example.com/cover.jpg".to_string(),
                mime: Some("image/jpeg".to_string()),
            }]
        );
    }

    #[test]
    fn test_missing_optional_fields_fall_back() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel>
            <item><link>https://x.example.com/1</link></item>
        </channel></rss>"#;
        let before = Utc::now();
        let decoded = decode(xml.as_bytes()).unwrap();
        assert_eq!(decoded.meta.title, "");
        assert_eq!(decoded.meta.description, "");
        assert_eq!(decoded.meta.image, "");
        assert_eq!(decoded.meta.language, "en");
        assert!(decoded.meta.published >= before);
        assert_eq!(decoded.entries[0].title, "");
    }

    #[test]
    fn test_pub_date_with_mismatched_weekday_keeps_its_date() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Dates</title>
            <item><link>https://x.example.com/1</link><pubDate>Mon, 05 Mar 2024 10:20:30 GMT</pubDate></item>
            <item><link>https://x.example.com/2</link><pubDate>Tuesday, 05 Mar 2024 10:20:30 GMT</pubDate></item>
            </channel></rss>"#;
        let decoded = decode(xml.as_bytes()).unwrap();
        let expected = "2024-03-05T10:20:30+00:00"
            .parse::<DateTime<Utc>>()
            .unwrap();
        assert_eq!(decoded.entries.len(), 2);
        for entry in &decoded.entries {
            assert_eq!(entry.published, Some(expected), "{}", entry.link);
        }
    }

    #[test]
    fn test_parsed_but_empty_is_ok() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Quiet</title></channel></rss>"#;
        let decoded = decode(xml.as_bytes()).unwrap();
        assert!(decoded.entries.is_empty());
        assert_eq!(decoded.meta.title, "Quiet");
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(decode(b"this is definitely not a feed").is_err());
        assert!(decode(b"").is_err());
    }

    #[test]
    fn test_bare_ampersand_recovers_as_bozo() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel>
            <title>Salt & Pepper</title>
            <item><title>Fish & Chips</title><link>https://food.example.com/1</link></item>
        </channel></rss>"#;
        let decoded = decode(xml.as_bytes()).unwrap();
        assert!(decoded.bozo);
        assert!(decoded.meta.title.contains("Pepper"));
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].link, "https://food.example.com/1");
    }

    #[test]
    fn test_sanitize_rewrites_entities() {
        let cleaned = sanitize(b"junk\x01 <a>x &nbsp; &amp; &bogus; & y\x0b</a>").unwrap();
        assert_eq!(cleaned, "<a>x &#160; &amp; &amp;bogus; &amp; y</a>");
        assert!(sanitize(b"no markup here").is_none());
    }

    #[test]
    fn test_well_formed_scan() {
        assert!(is_well_formed(RSS.as_bytes()));
        assert!(!is_well_formed(b"<rss><channel></rss>"));
        assert!(!is_well_formed(b"<rss><channel>"));
        assert!(!is_well_formed(b"<rss>a & b</rss>"));
        assert!(is_well_formed(br#"{"version": "https://jsonfeed.org/version/1.1"}"#));
    }

    #[test]
    fn test_media_hint_image_detection() {
        let by_mime = MediaHint {
            url: "https://x/y".to_string(),
            mime: Some("image/webp".to_string()),
        };
        let by_ext = MediaHint {
            url: "https://x/y.JPG?w=200".to_string(),
            mime: None,
        };
        let video = MediaHint {
            url: "https://x/y.jpg".to_string(),
            mime: Some("video/mp4".to_string()),
        };
        assert!(by_mime.is_image());
        assert!(by_ext.is_image());
        assert!(!video.is_image());
    }
}
