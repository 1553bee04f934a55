//! The ingestion pipeline: per-feed fetch, decode, dedup, enrichment and
//! persistence, run concurrently across feeds and on a schedule.

mod cache;
mod coordinator;
mod outcome;
mod scheduler;

pub use cache::LinkCache;
pub use coordinator::{IngestContext, IngestError, IngestionCoordinator};
pub use outcome::{FailureReason, FeedOutcome, PassSummary, Stage};
pub use scheduler::{spawn_scheduler, SchedulerHandle};
