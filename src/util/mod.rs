//! Utility functions shared by the fetch, feed and ingest layers.
//!
//! - **URL handling**: normalization of user-supplied feed URLs, HTTP(S)
//!   validation, domain derivation and relative-reference resolution
//!
//! # Examples
//!
//! ```
//! use feedmill::util::{domain_of, normalize_feed_url};
//!
//! let url = normalize_feed_url("https://Example.com/feed/");
//! assert_eq!(url, "https://example.com/feed");
//! assert_eq!(domain_of(&url).as_deref(), Some("example.com"));
//! ```

mod url;

pub use self::url::{
    domain_of, normalize_feed_url, parse_http_url, resolve_against, youtube_feed_url, UrlError,
};
