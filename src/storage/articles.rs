use chrono::Utc;
use sqlx::QueryBuilder;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{Article, ArticleRow, NewArticle, StoreError};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Links per `IN (...)` lookup, well under SQLite's bound-parameter limit.
const LOOKUP_CHUNK: usize = 500;

/// Rows per multi-row insert (9 columns * 50 = 450 parameters).
const INSERT_CHUNK: usize = 50;

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

impl Database {
    // ========================================================================
    // Deduplication
    // ========================================================================

    /// Returns the subset of `links` already stored, in one query per chunk.
    pub async fn existing_links(&self, links: &[String]) -> Result<HashSet<String>, StoreError> {
        let mut found = HashSet::new();

        for chunk in links.chunks(LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT link FROM articles WHERE link IN (");
            let mut separated = builder.separated(", ");
            for link in chunk {
                separated.push_bind(link);
            }
            separated.push_unseparated(")");

            let rows: Vec<(String,)> = builder
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
            found.extend(rows.into_iter().map(|(link,)| link));
        }

        Ok(found)
    }

    /// Inserts articles, skipping any whose link is already stored.
    ///
    /// Returns the number of rows actually inserted. A duplicate link never
    /// aborts the batch: the other rows still persist.
    pub async fn insert_articles(&self, articles: &[NewArticle]) -> Result<usize, StoreError> {
        if articles.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        let mut total_inserted: usize = 0;

        for chunk in articles.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO articles \
                 (feed_id, title, description, link, published, thumbnail, language, category, created_at) ",
            );
            builder.push_values(chunk, |mut b, article| {
                b.push_bind(article.feed_id)
                    .push_bind(&article.title)
                    .push_bind(&article.description)
                    .push_bind(&article.link)
                    .push_bind(article.published.timestamp_millis())
                    .push_bind(&article.thumbnail)
                    .push_bind(&article.language)
                    .push_bind(&article.category)
                    .push_bind(now);
            });
            builder.push(" ON CONFLICT(link) DO NOTHING");
            builder.build().execute(&mut *tx).await?;

            // changes() counts only the rows this statement inserted
            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await?;
            total_inserted += changes.0 as usize;
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(total_inserted)
    }

    /// Back-fills the thumbnail of a stored article that has none.
    ///
    /// Returns false when the article is missing or already has a thumbnail.
    pub async fn set_article_thumbnail(
        &self,
        link: &str,
        thumbnail: &str,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE articles SET thumbnail = ? WHERE link = ? AND thumbnail = ''")
                .bind(thumbnail)
                .bind(link)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Newest-first articles of one feed.
    pub async fn feed_articles(&self, feed_id: i64, limit: i64) -> Result<Vec<Article>, StoreError> {
        let limit = limit.clamp(1, MAX_ARTICLES);
        let rows: Vec<ArticleRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, title, description, link, published, thumbnail,
                   language, category, content, fetched, created_at
            FROM articles
            WHERE feed_id = ?
            ORDER BY published DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ArticleRow::into_article).collect())
    }

    pub async fn article_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
