mod articles;
mod feeds;
mod schema;
mod store;
mod types;

pub use schema::Database;
pub use store::Store;
pub use types::{Article, Feed, FeedQuery, NewArticle, NewFeed, StoreError};
