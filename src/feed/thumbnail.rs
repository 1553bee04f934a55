//! Thumbnail resolution for feed entries.
//!
//! Steps one to four read only what the feed already carried; step five
//! fetches the article page and reads its Open-Graph style metadata. Each
//! step runs only when the previous ones produced nothing.

use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::parser::Entry;
use crate::config::ThumbnailConfig;
use crate::fetch::HttpFetcher;
use crate::util::resolve_against;

static IMG_SRC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap());
static IMG_SRCSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<img\b[^>]*?\bsrcset\s*=\s*["']([^"']+)["']"#).unwrap());

/// Page metadata consulted in step five, in order of preference.
const PAGE_IMAGE_SELECTORS: &[(&str, &str)] = &[
    ("meta[property='og:image']", "content"),
    ("meta[property='og:image:url']", "content"),
    ("meta[name='twitter:image']", "content"),
    ("meta[property='twitter:image']", "content"),
    ("link[rel='image_src']", "href"),
];

/// Clones share one page-fetch budget, so `concurrency` caps page requests
/// across every feed of a pass, not per feed.
#[derive(Debug, Clone)]
pub struct ThumbnailResolver {
    fetcher: HttpFetcher,
    fetch_pages: bool,
    concurrency: usize,
    permits: Arc<Semaphore>,
    timeout: Duration,
    validate_with_head: bool,
}

impl ThumbnailResolver {
    pub fn new(fetcher: HttpFetcher, config: &ThumbnailConfig) -> Self {
        Self {
            fetcher,
            fetch_pages: config.fetch_og_images,
            concurrency: config.concurrency.max(1),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            timeout: Duration::from_secs(config.timeout_secs),
            validate_with_head: config.validate_with_head,
        }
    }

    /// Resolves a thumbnail from the entry alone (steps one to four).
    ///
    /// Returns an empty string when the entry carries no usable image.
    pub fn resolve(&self, entry: &Entry) -> String {
        resolve_from_entry(entry)
    }

    /// Resolves thumbnails for several article links from their pages
    /// (step five).
    ///
    /// Pages are fetched with bounded concurrency, a single attempt and the
    /// short page timeout. Links whose page is unreachable or carries no
    /// image metadata are absent from the result.
    pub async fn resolve_batch(&self, links: &[String]) -> HashMap<String, String> {
        if !self.fetch_pages || links.is_empty() {
            return HashMap::new();
        }

        stream::iter(links.iter().cloned())
            .map(|link| async move {
                let image = self.resolve_page(&link).await;
                (link, image)
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|(link, image)| async move { image.map(|url| (link, url)) })
            .collect()
            .await
    }

    async fn resolve_page(&self, link: &str) -> Option<String> {
        let _permit = self.permits.acquire().await.ok()?;
        let html = match self.fetcher.fetch_page(link, self.timeout).await {
            Ok(html) => html,
            Err(e) => {
                tracing::debug!(article = %link, error = %e, "Article page fetch failed");
                return None;
            }
        };

        let image = extract_page_image(&html, link)?;

        if self.validate_with_head {
            if let Err(e) = self.fetcher.head(&image, self.timeout).await {
                tracing::debug!(article = %link, image = %image, error = %e, "Dropping unreachable page image");
                return None;
            }
        }

        Some(image)
    }
}

/// Steps one to four of the fallback chain.
pub fn resolve_from_entry(entry: &Entry) -> String {
    // 1. media thumbnail
    if let Some(url) = entry.media_thumbnails.iter().find_map(|u| clean_url(u, &entry.link)) {
        return url;
    }

    // 2. media content that is an image
    if let Some(url) = entry
        .media_contents
        .iter()
        .filter(|m| m.is_image())
        .find_map(|m| clean_url(&m.url, &entry.link))
    {
        return url;
    }

    // 3. image enclosures
    if let Some(url) = entry
        .enclosures
        .iter()
        .filter(|m| m.mime.as_deref().is_some_and(|t| t.starts_with("image/")))
        .find_map(|m| clean_url(&m.url, &entry.link))
    {
        return url;
    }

    // 4. first inline image
    [&entry.content_html, &entry.summary_html]
        .into_iter()
        .find_map(|html| first_inline_image(html, &entry.link))
        .unwrap_or_default()
}

fn first_inline_image(html: &str, base: &str) -> Option<String> {
    if html.is_empty() {
        return None;
    }

    if let Some(url) = IMG_SRC_RE
        .captures_iter(html)
        .find_map(|caps| clean_url(&caps[1], base))
    {
        return Some(url);
    }

    IMG_SRCSET_RE.captures_iter(html).find_map(|caps| {
        let candidate = caps[1].split(',').next()?.split_whitespace().next()?;
        clean_url(candidate, base)
    })
}

/// Reads the preferred image URL out of an article page.
pub fn extract_page_image(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);

    PAGE_IMAGE_SELECTORS.iter().find_map(|(selector, attr)| {
        let sel = Selector::parse(selector).ok()?;
        document
            .select(&sel)
            .filter_map(|el| el.value().attr(attr))
            .find_map(|value| clean_url(value, page_url))
    })
}

/// Decodes `&amp;`, resolves relative references and drops inline data URIs.
fn clean_url(raw: &str, base: &str) -> Option<String> {
    let decoded = raw.trim().replace("&amp;", "&");
    if decoded.is_empty() || decoded.starts_with("data:") {
        return None;
    }
    resolve_against(base, &decoded).or(Some(decoded))
}
