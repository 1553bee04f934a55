//! Feed decoding and per-entry enrichment.
//!
//! - [`parser`] turns raw bytes into [`FeedMetadata`] plus ordered [`Entry`]
//!   values, recovering malformed XML where it can
//! - [`thumbnail`] picks a representative image for each entry
//! - [`normalize`] cleans HTML, detects language and parses loose dates

mod normalize;
mod parser;
mod thumbnail;

pub use normalize::{clean_html, detect_language, parse_timestamp, UNKNOWN_LANGUAGE};
pub use parser::{
    decode, DecodedFeed, Entry, FeedMetadata, MediaHint, ParseError, DEFAULT_FEED_LANGUAGE,
};
pub use thumbnail::{extract_page_image, resolve_from_entry, ThumbnailResolver};
