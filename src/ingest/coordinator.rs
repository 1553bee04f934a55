use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use super::cache::LinkCache;
use super::outcome::{FailureReason, FeedOutcome, PassSummary, Stage};
use crate::config::Config;
use crate::feed::{
    clean_html, decode, detect_language, DecodedFeed, Entry, ThumbnailResolver, UNKNOWN_LANGUAGE,
};
use crate::fetch::{FetchError, HttpFetcher};
use crate::storage::{Feed, NewArticle, NewFeed, Store, StoreError};
use crate::util::{domain_of, normalize_feed_url, parse_http_url, youtube_feed_url};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum IngestError {
    /// The URL could not be fetched or did not decode as a feed
    #[error("Invalid feed {url}: {reason}")]
    InvalidFeed { url: String, reason: String },

    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    /// The store failed in a way that affects the whole operation
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Context
// ============================================================================

/// Everything a pass needs, built once and shared by all workers.
pub struct IngestContext {
    pub store: Arc<dyn Store>,
    pub fetcher: HttpFetcher,
    pub thumbnails: ThumbnailResolver,
    pub links: LinkCache,
    pub max_concurrent_feeds: usize,
}

impl IngestContext {
    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::from_config(config)?;
        let thumbnails = ThumbnailResolver::new(fetcher.clone(), &config.thumbnails);
        Ok(Self {
            store,
            fetcher,
            thumbnails,
            links: LinkCache::new(config.link_cache_capacity),
            max_concurrent_feeds: config.max_concurrent_feeds.max(1),
        })
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Drives feeds through fetch, decode, dedup, enrichment and persistence.
///
/// Cheap to clone; clones share the same context and link cache.
#[derive(Clone)]
pub struct IngestionCoordinator {
    ctx: Arc<IngestContext>,
}

/// Counts from the dedup-and-insert step of one feed.
#[derive(Debug, Default, Clone, Copy)]
struct Persisted {
    inserted: usize,
    skipped: usize,
}

impl IngestionCoordinator {
    pub fn new(ctx: IngestContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Result<Self, FetchError> {
        Ok(Self::new(IngestContext::from_config(store, config)?))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    /// Runs every stored feed through the pipeline once.
    ///
    /// Per-feed failures are reported in the summary and never abort the
    /// pass. Only failing to list the feeds does.
    pub async fn run_pass(&self) -> Result<PassSummary, IngestError> {
        let started = Instant::now();
        let feeds = self.ctx.store.all_feeds().await?;
        tracing::info!(feeds = feeds.len(), "Starting ingestion pass");

        let outcomes: Vec<FeedOutcome> = stream::iter(feeds)
            .map(|feed| async move { self.process_feed(&feed).await })
            .buffer_unordered(self.ctx.max_concurrent_feeds)
            .collect()
            .await;

        let summary = PassSummary::from_outcomes(outcomes, started.elapsed());
        tracing::info!(
            feeds_ok = summary.feeds_ok,
            feeds_failed = summary.feeds_failed,
            new_articles = summary.new_articles,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Ingestion pass complete"
        );
        Ok(summary)
    }

    /// Runs one stored feed through the pipeline.
    pub async fn refresh_feed(&self, url: &str) -> Result<FeedOutcome, IngestError> {
        let feed = self.find_feed(url).await?;
        Ok(self.process_feed(&feed).await)
    }

    /// Looks a stored feed up by its URL as given, then by its normalized form.
    pub async fn find_feed(&self, url: &str) -> Result<Feed, IngestError> {
        let exact = url.trim();
        if let Some(feed) = self.ctx.store.feed_by_url(exact).await? {
            return Ok(feed);
        }
        let normalized = normalize_feed_url(url);
        let found = self.ctx.store.feed_by_url(&normalized).await?;
        found.ok_or(IngestError::FeedNotFound(normalized))
    }

    /// Registers a feed, or returns the existing one for the same URL or domain.
    ///
    /// A new feed is fetched and decoded before anything is stored; its
    /// initial entries go through the same dedup and insert path as a pass.
    pub async fn add_feed(&self, raw_url: &str) -> Result<Feed, IngestError> {
        self.register(normalize_feed_url(raw_url)).await
    }

    /// Registers the uploads feed of a YouTube channel.
    ///
    /// Channel ids are case-sensitive, so the URL is stored as built rather
    /// than lowercased. The domain rule still applies: once one channel is
    /// registered, further channels return that feed.
    pub async fn add_youtube_channel(&self, channel_id: &str) -> Result<Feed, IngestError> {
        let url = youtube_feed_url(channel_id).map_err(|e| IngestError::InvalidFeed {
            url: channel_id.to_string(),
            reason: e.to_string(),
        })?;
        self.register(url).await
    }

    async fn register(&self, url: String) -> Result<Feed, IngestError> {
        parse_http_url(&url).map_err(|e| IngestError::InvalidFeed {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        if let Some(existing) = self.ctx.store.feed_by_url(&url).await? {
            tracing::debug!(feed = %url, "Feed already registered");
            return Ok(existing);
        }

        let domain = domain_of(&url).unwrap_or_default();
        if let Some(existing) = self.ctx.store.feed_by_domain(&domain).await? {
            tracing::info!(
                feed = %url,
                existing = %existing.url,
                domain = %domain,
                "Domain already has a feed, not registering another"
            );
            return Ok(existing);
        }

        let bytes = self.ctx.fetcher.fetch(&url).await.map_err(|e| IngestError::InvalidFeed {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let decoded = decode(&bytes).map_err(|e| IngestError::InvalidFeed {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if decoded.bozo {
            tracing::warn!(feed = %url, "Registering feed that is not well-formed XML");
        }

        let language = feed_language(&decoded);
        let new_feed = NewFeed {
            url: url.clone(),
            link: decoded.meta.link.clone(),
            title: clean_html(&decoded.meta.title),
            description: clean_html(&decoded.meta.description),
            language: language.clone(),
            image: decoded.meta.image.clone(),
            domain,
        };
        let feed_id = self.ctx.store.insert_or_get_feed(&new_feed).await?;
        tracing::info!(feed = %url, feed_id, entries = decoded.entries.len(), "Registered feed");

        let now = Utc::now();
        match self
            .persist_entries(&url, feed_id, &language, decoded.entries, now)
            .await {
            Ok(persisted) => {
                self.finish_bookkeeping(feed_id, &url, persisted.inserted, now, None)
                    .await;
            }
            Err(e) => {
                tracing::warn!(feed = %url, error = %e, "Initial articles could not be stored");
                let reason = FailureReason::StoreFailed(e.to_string()).to_string();
                self.finish_bookkeeping(feed_id, &url, 0, now, Some(&reason))
                    .await;
            }
        }

        self.ctx
            .store
            .feed_by_url(&url)
            .await?
            .ok_or_else(|| IngestError::FeedNotFound(url.clone()))
    }

    // ========================================================================
    // Per-feed pipeline
    // ========================================================================

    async fn process_feed(&self, feed: &Feed) -> FeedOutcome {
        let url = feed.url.as_str();

        log_stage(url, &Stage::Fetching);
        let bytes = match self.ctx.fetcher.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .fail(feed, FailureReason::FetchFailed(e.to_string()))
                    .await
            }
        };

        log_stage(url, &Stage::Decoding);
        let decoded = match decode(&bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                return self
                    .fail(feed, FailureReason::ParseFailed(e.to_string()))
                    .await
            }
        };
        if decoded.entries.is_empty() {
            return self.fail(feed, FailureReason::NoEntries).await;
        }

        let bozo = decoded.bozo;
        let now = Utc::now();
        let persisted = match self
            .persist_entries(url, feed.id, &feed.language, decoded.entries, now)
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                return self
                    .fail(feed, FailureReason::StoreFailed(e.to_string()))
                    .await
            }
        };

        self.finish_bookkeeping(feed.id, url, persisted.inserted, now, None)
            .await;

        log_stage(url, &Stage::Done);
        if persisted.inserted > 0 {
            tracing::info!(feed = %url, new_articles = persisted.inserted, "Stored new articles");
        }
        FeedOutcome {
            feed_url: feed.url.clone(),
            stage: Stage::Done,
            new_articles: persisted.inserted,
            skipped: persisted.skipped,
            bozo,
        }
    }

    /// Dedups, enriches and inserts the entries of one feed.
    async fn persist_entries(
        &self,
        url: &str,
        feed_id: i64,
        feed_language: &str,
        entries: Vec<Entry>,
        now: DateTime<Utc>,
    ) -> Result<Persisted, StoreError> {
        let total = entries.len();

        // Drop linkless entries and repeats of a link within the same feed
        let mut seen = HashSet::new();
        let entries: Vec<Entry> = entries
            .into_iter()
            .filter(|e| !e.link.is_empty() && seen.insert(e.link.clone()))
            .collect();
        if entries.is_empty() {
            return Ok(Persisted {
                inserted: 0,
                skipped: total,
            });
        }

        log_stage(url, &Stage::Deduplicating);
        let links: Vec<String> = entries.iter().map(|e| e.link.clone()).collect();
        let existing = self.ctx.store.existing_links(&links).await?;
        let unseen: Vec<String> = links
            .into_iter()
            .filter(|link| !existing.contains(link))
            .collect();
        let claimed: HashSet<String> = self.ctx.links.claim(unseen).into_iter().collect();
        if claimed.is_empty() {
            return Ok(Persisted {
                inserted: 0,
                skipped: total,
            });
        }

        log_stage(url, &Stage::Enriching);
        let mut articles: Vec<NewArticle> = entries
            .iter()
            .filter(|e| claimed.contains(&e.link))
            .map(|entry| self.build_article(feed_id, feed_language, entry, now))
            .collect();

        let missing: Vec<String> = articles
            .iter()
            .filter(|a| a.thumbnail.is_empty())
            .map(|a| a.link.clone())
            .collect();
        if !missing.is_empty() {
            let found = self.ctx.thumbnails.resolve_batch(&missing).await;
            for article in articles.iter_mut().filter(|a| a.thumbnail.is_empty()) {
                if let Some(url) = found.get(&article.link) {
                    article.thumbnail = url.clone();
                }
            }
        }

        log_stage(url, &Stage::Persisting);
        match self.ctx.store.insert_articles(&articles).await {
            Ok(inserted) => Ok(Persisted {
                inserted,
                skipped: total - inserted,
            }),
            Err(e) => {
                let claimed: Vec<String> = claimed.into_iter().collect();
                self.ctx.links.release(&claimed);
                Err(e)
            }
        }
    }

    fn build_article(
        &self,
        feed_id: i64,
        feed_language: &str,
        entry: &Entry,
        now: DateTime<Utc>,
    ) -> NewArticle {
        let title = clean_html(&entry.title);
        let description = clean_html(&entry.content_html);

        let sample = if description.is_empty() { &title } else { &description };
        let language = match detect_language(sample) {
            lang if lang == UNKNOWN_LANGUAGE => feed_language.to_string(),
            lang => lang,
        };

        NewArticle {
            feed_id,
            title,
            description,
            link: entry.link.clone(),
            published: entry.published.unwrap_or(now),
            thumbnail: self.ctx.thumbnails.resolve(entry),
            language,
            category: entry.categories.first().cloned(),
        }
    }

    async fn fail(&self, feed: &Feed, reason: FailureReason) -> FeedOutcome {
        tracing::warn!(feed = %feed.url, reason = %reason, "Feed failed");
        let message = reason.to_string();
        let outcome = FeedOutcome::failed(&feed.url, reason);
        log_stage(&feed.url, &outcome.stage);
        self.finish_bookkeeping(feed.id, &feed.url, 0, Utc::now(), Some(&message))
            .await;
        outcome
    }

    /// Records the check, plus the update when something new was stored.
    /// Bookkeeping failures are logged; the articles are already persisted.
    async fn finish_bookkeeping(
        &self,
        feed_id: i64,
        url: &str,
        inserted: usize,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) {
        if inserted > 0 {
            if let Err(e) = self.ctx.store.record_feed_updated(feed_id, at, inserted).await {
                tracing::warn!(feed = %url, error = %e, "Failed to record feed update");
            }
        }
        if let Err(e) = self.ctx.store.touch_feed_checked(feed_id, at, error).await {
            tracing::warn!(feed = %url, error = %e, "Failed to record feed check");
        }
    }
}

fn log_stage(url: &str, stage: &Stage) {
    tracing::debug!(feed = %url, stage = %stage, "Feed stage");
}

/// First confident detection over the feed description and entry bodies,
/// else the declared language.
fn feed_language(decoded: &DecodedFeed) -> String {
    std::iter::once(decoded.meta.description.as_str())
        .chain(decoded.entries.iter().map(|e| e.content_html.as_str()))
        .map(clean_html)
        .filter(|text| !text.is_empty())
        .map(|text| detect_language(&text))
        .find(|lang| lang != UNKNOWN_LANGUAGE)
        .unwrap_or_else(|| decoded.meta.language.clone())
}
