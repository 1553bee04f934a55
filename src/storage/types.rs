use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Content store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database lock
    #[error("The content store is locked by another process")]
    Locked,

    /// Migration failed
    #[error("Store migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Store error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return StoreError::Locked;
        }
        StoreError::Database(err)
    }
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all show up as
// message text through sqlx.
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// One subscribed source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feed {
    pub id: i64,
    /// Normalized feed URL, unique across the store
    pub url: String,
    /// Canonical site link
    pub link: String,
    pub title: String,
    pub description: String,
    pub language: String,
    pub image: String,
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    /// Set only when a pass persisted at least one new article
    pub last_updated: Option<DateTime<Utc>>,
    pub total_articles: i64,
    pub last_error: Option<String>,
}

/// One stored feed entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    /// Cleaned plain text
    pub description: String,
    /// Canonical link, unique across every feed
    pub link: String,
    pub published: DateTime<Utc>,
    pub thumbnail: String,
    pub language: String,
    pub category: Option<String>,
    /// Full article body, filled lazily outside the ingestion pipeline
    pub content: Option<String>,
    pub fetched: bool,
    pub created_at: DateTime<Utc>,
}

/// Feed fields known at registration time.
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub url: String,
    pub link: String,
    pub title: String,
    pub description: String,
    pub language: String,
    pub image: String,
    pub domain: String,
}

/// An article ready for insertion.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: i64,
    pub title: String,
    pub description: String,
    pub link: String,
    pub published: DateTime<Utc>,
    pub thumbnail: String,
    pub language: String,
    pub category: Option<String>,
}

/// Case-insensitive substring filters; every given criterion must match.
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub title: Option<String>,
    pub link: Option<String>,
    pub domain: Option<String>,
}

impl FeedQuery {
    pub fn is_empty(&self) -> bool {
        [&self.title, &self.link, &self.domain]
            .iter()
            .all(|c| c.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

// ============================================================================
// Row Types
// ============================================================================

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Internal row type for Feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub url: String,
    pub link: String,
    pub title: String,
    pub description: String,
    pub language: String,
    pub image: String,
    pub domain: String,
    pub created_at: i64,
    pub last_checked: Option<i64>,
    pub last_updated: Option<i64>,
    pub total_articles: i64,
    pub last_error: Option<String>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            url: self.url,
            link: self.link,
            title: self.title,
            description: self.description,
            language: self.language,
            image: self.image,
            domain: self.domain,
            created_at: from_millis(self.created_at),
            last_checked: self.last_checked.map(from_millis),
            last_updated: self.last_updated.map(from_millis),
            total_articles: self.total_articles,
            last_error: self.last_error,
        }
    }
}

/// Internal row type for Article queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub description: String,
    pub link: String,
    pub published: i64,
    pub thumbnail: String,
    pub language: String,
    pub category: Option<String>,
    pub content: Option<String>,
    pub fetched: bool,
    pub created_at: i64,
}

impl ArticleRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            description: self.description,
            link: self.link,
            published: from_millis(self.published),
            thumbnail: self.thumbnail,
            language: self.language,
            category: self.category,
            content: self.content,
            fetched: self.fetched,
            created_at: from_millis(self.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_messages_detected() {
        assert!(is_lock_error("error returned from database: (code: 5) database is locked"));
        assert!(is_lock_error("SQLITE_BUSY"));
        assert!(!is_lock_error("no such table: feeds"));
    }

    #[test]
    fn test_feed_query_emptiness() {
        assert!(FeedQuery::default().is_empty());
        assert!(FeedQuery {
            title: Some("  ".into()),
            ..FeedQuery::default()
        }
        .is_empty());
        assert!(!FeedQuery {
            domain: Some("example".into()),
            ..FeedQuery::default()
        }
        .is_empty());
    }

    #[test]
    fn test_millis_round_trip_keeps_precision() {
        let ms = 1_709_634_030_123;
        assert_eq!(from_millis(ms).timestamp_millis(), ms);
    }
}
