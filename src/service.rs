//! Entry points consumed by an outer serving layer (HTTP API, CLI).

use std::time::Duration;

use crate::ingest::{spawn_scheduler, IngestError, IngestionCoordinator, SchedulerHandle};
use crate::storage::{Article, Feed, FeedQuery};

/// Items returned by [`FeedService::get_feed_items`] when no limit is given.
pub const DEFAULT_ITEMS_LIMIT: i64 = 20;

/// Upper bound on items returned by one [`FeedService::get_feed_items`] call.
pub const MAX_ITEMS_LIMIT: i64 = 100;

/// Acknowledgement that background refreshing has started.
#[derive(Debug)]
pub struct RefreshAck {
    pub message: String,
    pub interval: Duration,
    /// Stops the background loop when no longer needed.
    pub handle: SchedulerHandle,
}

#[derive(Clone)]
pub struct FeedService {
    coordinator: IngestionCoordinator,
}

impl FeedService {
    pub fn new(coordinator: IngestionCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &IngestionCoordinator {
        &self.coordinator
    }

    pub async fn add_feed(&self, url: &str) -> Result<Feed, IngestError> {
        self.coordinator.add_feed(url).await
    }

    pub async fn add_youtube_channel(&self, channel_id: &str) -> Result<Feed, IngestError> {
        self.coordinator.add_youtube_channel(channel_id).await
    }

    /// Newest-first articles of one feed.
    ///
    /// `limit` defaults to [`DEFAULT_ITEMS_LIMIT`] and is clamped to
    /// `1..=MAX_ITEMS_LIMIT`. An unknown feed is `FeedNotFound`; a known feed
    /// without articles is an empty list.
    pub async fn get_feed_items(
        &self,
        feed_url: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Article>, IngestError> {
        let feed = self.coordinator.find_feed(feed_url).await?;

        let limit = limit
            .unwrap_or(DEFAULT_ITEMS_LIMIT)
            .clamp(1, MAX_ITEMS_LIMIT);
        Ok(self.coordinator.store().feed_articles(feed.id, limit).await?)
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>, IngestError> {
        Ok(self.coordinator.store().all_feeds().await?)
    }

    /// Case-insensitive substring search; all given criteria must match.
    pub async fn search_feeds(&self, query: &FeedQuery) -> Result<Vec<Feed>, IngestError> {
        Ok(self.coordinator.store().search_feeds(query).await?)
    }

    /// Starts periodic ingestion in the background and returns immediately.
    ///
    /// An interval of zero minutes is treated as one minute.
    pub fn trigger_background_refresh(&self, interval_minutes: u64) -> RefreshAck {
        let interval = Duration::from_secs(interval_minutes.max(1).saturating_mul(60));
        let handle = spawn_scheduler(self.coordinator.clone(), interval);
        RefreshAck {
            message: format!(
                "Background refresh started, every {} minute(s)",
                interval.as_secs() / 60
            ),
            interval,
            handle,
        }
    }
}
