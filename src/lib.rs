//! Concurrent RSS/Atom ingestion with link-level deduplication.
//!
//! Feeds are fetched with bounded concurrency and retry, decoded leniently,
//! checked against the store in one bulk query per feed, enriched with a
//! cleaned description, detected language and thumbnail, then inserted so
//! that an article link exists at most once across the whole store.
//!
//! [`service::FeedService`] is the entry point for callers;
//! [`ingest::IngestionCoordinator`] drives the pipeline itself.

pub mod config;
pub mod feed;
pub mod fetch;
pub mod ingest;
pub mod service;
pub mod storage;
pub mod util;

pub use config::Config;
pub use ingest::{IngestError, IngestionCoordinator, PassSummary};
pub use service::FeedService;
pub use storage::{Article, Database, Feed, Store};
