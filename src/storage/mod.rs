mod news;
mod schema;
mod sources;
mod store;
mod types;

pub use schema::Database;
pub use store::NewsStore;
pub use types::{Category, DatabaseError, NewNewsItem, NewsItem, Source};
