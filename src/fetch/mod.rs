//! HTTP fetch layer: header rotation, bounded reads and retry with backoff.
mod headers;
mod http;
mod retry;

pub use headers::{HeaderPool, DEFAULT_USER_AGENTS};
pub use http::{FetchError, HttpFetcher};
pub use retry::RetryPolicy;
