use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Feed, FeedQuery, FeedRow, NewFeed, StoreError};

const FEED_COLUMNS: &str = "id, url, link, title, description, language, image, domain, \
     created_at, last_checked, last_updated, total_articles, last_error";

impl Database {
    // ========================================================================
    // Feed Registration
    // ========================================================================

    /// Inserts a feed, or returns the id of the existing row with the same URL.
    pub async fn insert_or_get_feed(&self, feed: &NewFeed) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO feeds (url, link, title, description, language, image, domain, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
        "#,
        )
        .bind(&feed.url)
        .bind(&feed.link)
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(&feed.language)
        .bind(&feed.image)
        .bind(&feed.domain)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(&feed.url)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(id)
    }

    // ========================================================================
    // Feed Queries
    // ========================================================================

    pub async fn feed_exists(&self, url: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM feeds WHERE url = ? LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {} FROM feeds WHERE url = ?", FEED_COLUMNS))
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(FeedRow::into_feed))
    }

    /// Oldest feed registered under `domain`, if any.
    pub async fn feed_by_domain(&self, domain: &str) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedRow> = sqlx::query_as(&format!(
            "SELECT {} FROM feeds WHERE domain = ? ORDER BY id LIMIT 1",
            FEED_COLUMNS
        ))
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeedRow::into_feed))
    }

    pub async fn all_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedRow> =
            sqlx::query_as(&format!("SELECT {} FROM feeds ORDER BY id", FEED_COLUMNS))
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    /// Case-insensitive substring search over title, link and domain.
    ///
    /// Criteria are ANDed; an empty query returns every feed.
    pub async fn search_feeds(&self, query: &FeedQuery) -> Result<Vec<Feed>, StoreError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM feeds WHERE 1 = 1", FEED_COLUMNS));

        for (column, needle) in [
            ("title", &query.title),
            ("link", &query.link),
            ("domain", &query.domain),
        ] {
            let Some(needle) = needle.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
                continue;
            };
            builder.push(format!(" AND instr(lower({}), lower(", column));
            builder.push_bind(needle.to_string());
            builder.push(")) > 0");
        }
        builder.push(" ORDER BY id");

        let rows: Vec<FeedRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    // ========================================================================
    // Feed Bookkeeping
    // ========================================================================

    /// Records a completed check. `error` replaces the stored error text;
    /// `None` clears it.
    pub async fn touch_feed_checked(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE feeds SET last_checked = ?, last_error = ? WHERE id = ?")
            .bind(at.timestamp_millis())
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Marks a feed as having new content and bumps its article counter.
    pub async fn record_feed_updated(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
        added: usize,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE feeds SET last_updated = ?, total_articles = total_articles + ? WHERE id = ?",
        )
        .bind(at.timestamp_millis())
        .bind(added as i64)
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_feed(url: &str, domain: &str, title: &str) -> NewFeed {
        NewFeed {
            url: url.to_string(),
            link: format!("https://{}/", domain),
            title: title.to_string(),
            description: String::new(),
            language: "en".to_string(),
            image: String::new(),
            domain: domain.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_or_get_feed_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        let feed = new_feed("https://a.example.com/rss", "a.example.com", "A");

        let first = db.insert_or_get_feed(&feed).await.unwrap();
        let second = db.insert_or_get_feed(&feed).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(db.all_feeds().await.unwrap().len(), 1);
        assert!(db.feed_exists("https://a.example.com/rss").await.unwrap());
        assert!(!db.feed_exists("https://b.example.com/rss").await.unwrap());
    }

    #[tokio::test]
    async fn test_feed_by_domain_returns_oldest() {
        let db = Database::open(":memory:").await.unwrap();
        db.insert_or_get_feed(&new_feed("https://a.example.com/rss", "a.example.com", "First"))
            .await
            .unwrap();
        db.insert_or_get_feed(&new_feed("https://a.example.com/atom", "a.example.com", "Second"))
            .await
            .unwrap();

        let found = db.feed_by_domain("a.example.com").await.unwrap().unwrap();
        assert_eq!(found.title, "First");
        assert!(db.feed_by_domain("other.example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_feed_has_no_check_history() {
        let db = Database::open(":memory:").await.unwrap();
        db.insert_or_get_feed(&new_feed("https://a.example.com/rss", "a.example.com", "A"))
            .await
            .unwrap();
        let feed = db.feed_by_url("https://a.example.com/rss").await.unwrap().unwrap();
        assert_eq!(feed.last_checked, None);
        assert_eq!(feed.last_updated, None);
        assert_eq!(feed.total_articles, 0);
        assert_eq!(feed.language, "en");
    }

    #[tokio::test]
    async fn test_touch_and_record_updates() {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .insert_or_get_feed(&new_feed("https://a.example.com/rss", "a.example.com", "A"))
            .await
            .unwrap();
        let at = Utc::now();

        db.touch_feed_checked(id, at, Some("HTTP error: status 500"))
            .await
            .unwrap();
        let feed = db.feed_by_url("https://a.example.com/rss").await.unwrap().unwrap();
        assert_eq!(feed.last_checked.map(|t| t.timestamp_millis()), Some(at.timestamp_millis()));
        assert_eq!(feed.last_error.as_deref(), Some("HTTP error: status 500"));
        assert_eq!(feed.last_updated, None);

        db.record_feed_updated(id, at, 3).await.unwrap();
        db.record_feed_updated(id, at, 2).await.unwrap();
        db.touch_feed_checked(id, at, None).await.unwrap();
        let feed = db.feed_by_url("https://a.example.com/rss").await.unwrap().unwrap();
        assert_eq!(feed.total_articles, 5);
        assert!(feed.last_updated.is_some());
        assert_eq!(feed.last_error, None);
    }

    #[tokio::test]
    async fn test_search_feeds_case_insensitive_and_combined() {
        let db = Database::open(":memory:").await.unwrap();
        db.insert_or_get_feed(&new_feed("https://tech.example.com/rss", "tech.example.com", "Tech Daily"))
            .await
            .unwrap();
        db.insert_or_get_feed(&new_feed("https://news.example.org/rss", "news.example.org", "World News"))
            .await
            .unwrap();

        let by_title = db
            .search_feeds(&FeedQuery {
                title: Some("tech".into()),
                ..FeedQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].title, "Tech Daily");

        let by_domain = db
            .search_feeds(&FeedQuery {
                domain: Some("EXAMPLE".into()),
                ..FeedQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(by_domain.len(), 2);

        let combined = db
            .search_feeds(&FeedQuery {
                title: Some("news".into()),
                domain: Some(".com".into()),
                link: None,
            })
            .await
            .unwrap();
        assert!(combined.is_empty());

        let everything = db.search_feeds(&FeedQuery::default()).await.unwrap();
        assert_eq!(everything.len(), 2);
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let db = Database::open(":memory:").await.unwrap();
        db.insert_or_get_feed(&new_feed("https://a.example.com/rss", "a.example.com", "Plain"))
            .await
            .unwrap();
        let found = db
            .search_feeds(&FeedQuery {
                title: Some("%".into()),
                ..FeedQuery::default()
            })
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
