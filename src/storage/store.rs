use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::schema::Database;
use super::types::{Article, Feed, FeedQuery, NewArticle, NewFeed, StoreError};

/// The content store as seen by the ingestion pipeline and the service facade.
///
/// `Database` is the production implementation. The trait exists so callers
/// hold an `Arc<dyn Store>` and tests can wrap a real store to observe calls.
#[async_trait]
pub trait Store: Send + Sync {
    /// Subset of `links` already stored. Called once per feed per pass.
    async fn existing_links(&self, links: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Inserts what it can, skipping duplicate links; returns the inserted count.
    async fn insert_articles(&self, articles: &[NewArticle]) -> Result<usize, StoreError>;

    async fn set_article_thumbnail(&self, link: &str, thumbnail: &str) -> Result<bool, StoreError>;

    async fn feed_exists(&self, url: &str) -> Result<bool, StoreError>;

    async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError>;

    async fn feed_by_domain(&self, domain: &str) -> Result<Option<Feed>, StoreError>;

    async fn insert_or_get_feed(&self, feed: &NewFeed) -> Result<i64, StoreError>;

    async fn all_feeds(&self) -> Result<Vec<Feed>, StoreError>;

    async fn feed_articles(&self, feed_id: i64, limit: i64) -> Result<Vec<Article>, StoreError>;

    async fn search_feeds(&self, query: &FeedQuery) -> Result<Vec<Feed>, StoreError>;

    async fn touch_feed_checked(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn record_feed_updated(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
        added: usize,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl Store for Database {
    async fn existing_links(&self, links: &[String]) -> Result<HashSet<String>, StoreError> {
        Database::existing_links(self, links).await
    }

    async fn insert_articles(&self, articles: &[NewArticle]) -> Result<usize, StoreError> {
        Database::insert_articles(self, articles).await
    }

    async fn set_article_thumbnail(&self, link: &str, thumbnail: &str) -> Result<bool, StoreError> {
        Database::set_article_thumbnail(self, link, thumbnail).await
    }

    async fn feed_exists(&self, url: &str) -> Result<bool, StoreError> {
        Database::feed_exists(self, url).await
    }

    async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        Database::feed_by_url(self, url).await
    }

    async fn feed_by_domain(&self, domain: &str) -> Result<Option<Feed>, StoreError> {
        Database::feed_by_domain(self, domain).await
    }

    async fn insert_or_get_feed(&self, feed: &NewFeed) -> Result<i64, StoreError> {
        Database::insert_or_get_feed(self, feed).await
    }

    async fn all_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        Database::all_feeds(self).await
    }

    async fn feed_articles(&self, feed_id: i64, limit: i64) -> Result<Vec<Article>, StoreError> {
        Database::feed_articles(self, feed_id, limit).await
    }

    async fn search_feeds(&self, query: &FeedQuery) -> Result<Vec<Feed>, StoreError> {
        Database::search_feeds(self, query).await
    }

    async fn touch_feed_checked(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        Database::touch_feed_checked(self, feed_id, at, error).await
    }

    async fn record_feed_updated(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
        added: usize,
    ) -> Result<(), StoreError> {
        Database::record_feed_updated(self, feed_id, at, added).await
    }
}
