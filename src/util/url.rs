use thiserror::Error;
use url::Url;

/// Errors that can occur while turning user input into a feed URL.
#[derive(Error, Debug)]
pub enum UrlError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// A YouTube channel id with characters outside `[A-Za-z0-9_-]`.
    #[error("Invalid YouTube channel id: {0:?}")]
    InvalidChannelId(String),
}

/// Normalizes a candidate feed URL before any store lookup.
///
/// Trims surrounding whitespace, strips a single trailing slash and lowercases
/// the whole string, so `" HTTPS://Example.com/Feed/ "` and
/// `"https://example.com/feed"` map to the same feed record.
///
/// # Examples
///
/// ```
/// use feedmill::util::normalize_feed_url;
///
/// assert_eq!(normalize_feed_url("  https://Example.com/rss/ "), "https://example.com/rss");
/// ```
pub fn normalize_feed_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    trimmed.to_lowercase()
}

/// Builds the Atom feed URL of a YouTube channel's uploads.
///
/// ```
/// use feedmill::util::youtube_feed_url;
///
/// assert_eq!(
///     youtube_feed_url("UC_x5XG1OV2P6uZZ5FSM9Ttw").unwrap(),
///     "https://www.youtube.com/feeds/videos.xml?channel_id=UC_x5XG1OV2P6uZZ5FSM9Ttw"
/// );
/// ```
pub fn youtube_feed_url(channel_id: &str) -> Result<String, UrlError> {
    let id = channel_id.trim();
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(UrlError::InvalidChannelId(channel_id.to_string()));
    }
    Ok(format!("https://www.youtube.com/feeds/videos.xml?channel_id={}", id))
}

/// Parses a URL and checks that it can be fetched over HTTP(S).
///
/// # Errors
///
/// Returns [`UrlError`] if the string does not parse, uses a non-HTTP scheme,
/// or carries no host.
pub fn parse_http_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    Ok(url)
}

/// Derives the domain used as the soft uniqueness signal for feeds.
///
/// This is the URL's network location: host plus an explicit port when one is
/// present. Two feed paths on the same site share a domain.
pub fn domain_of(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Resolves a possibly relative reference against a base URL.
///
/// Absolute references are returned unchanged; protocol-relative `//cdn/...`
/// references inherit the base scheme. Returns `None` when neither the
/// reference nor the base is usable.
pub fn resolve_against(base: &str, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    if let Ok(abs) = Url::parse(reference) {
        return Some(abs.to_string());
    }
    let base = Url::parse(base).ok()?;
    base.join(reference).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_youtube_feed_url_keeps_case_and_rejects_junk() {
        assert_eq!(
            youtube_feed_url(" UCabc-DEF_123 ").unwrap(),
            "https://www.youtube.com/feeds/videos.xml?channel_id=UCabc-DEF_123"
        );
        assert!(matches!(
            youtube_feed_url(""),
            Err(UrlError::InvalidChannelId(_))
        ));
        assert!(matches!(
            youtube_feed_url("UC1&x=2"),
            Err(UrlError::InvalidChannelId(_))
        ));
        assert_eq!(
            domain_of(&youtube_feed_url("UCabc").unwrap()).as_deref(),
            Some("www.youtube.com")
        );
    }

    #[test]
    fn test_normalize_trims_and_lowercases() {
        assert_eq!(
            normalize_feed_url("  HTTPS://Example.COM/Feed/  "),
            "https://example.com/feed"
        );
    }

    #[test]
    fn test_normalize_strips_only_one_trailing_slash() {
        assert_eq!(normalize_feed_url("https://a.com//"), "https://a.com/");
    }

    #[test]
    fn test_parse_http_url_accepts_http_and_https() {
        assert!(parse_http_url("https://example.com/feed.xml").is_ok());
        assert!(parse_http_url("http://news.example.org").is_ok());
    }

    #[test]
    fn test_parse_http_url_rejects_other_schemes() {
        assert!(matches!(
            parse_http_url("file:///etc/passwd"),
            Err(UrlError::UnsupportedScheme(_))
        ));
        assert!(parse_http_url("ftp://example.com").is_err());
        assert!(parse_http_url("not a url").is_err());
    }

    #[test]
    fn test_domain_of_includes_explicit_port() {
        assert_eq!(
            domain_of("https://blog.example.com/feed"),
            Some("blog.example.com".to_string())
        );
        assert_eq!(
            domain_of("http://127.0.0.1:8080/rss"),
            Some("127.0.0.1:8080".to_string())
        );
        assert_eq!(domain_of("garbage"), None);
    }

    #[test]
    fn test_domain_shared_by_sibling_feeds() {
        assert_eq!(
            domain_of("https://example.com/feed"),
            domain_of("https://example.com/comments/feed")
        );
    }

    #[test]
    fn test_resolve_against() {
        assert_eq!(
            resolve_against("https://example.com/posts/1", "/img/a.png").as_deref(),
            Some("https://example.com/img/a.png")
        );
        assert_eq!(
            resolve_against("https://example.com/posts/1", "//cdn.example.com/b.jpg").as_deref(),
            Some("https://cdn.example.com/b.jpg")
        );
        assert_eq!(
            resolve_against("not a base", "https://x.org/c.gif").as_deref(),
            Some("https://x.org/c.gif")
        );
        assert_eq!(resolve_against("https://example.com", "   "), None);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in "[a-zA-Z0-9:/._-]{0,40}") {
            let once = normalize_feed_url(&s);
            let twice = normalize_feed_url(&once);
            // A second pass can only strip one more trailing slash.
            let twice_slash = format!("{}/", twice);
            prop_assert!(twice == once || twice_slash == once);
        }

        #[test]
        fn normalize_has_no_uppercase(s in "[ -~]{0,40}") {
            let n = normalize_feed_url(&s);
            prop_assert_eq!(n.to_lowercase(), n);
        }
    }
}
