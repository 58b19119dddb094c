mod articles;
mod relations;
mod schema;
mod statuses;
mod types;

pub use schema::Database;
pub use types::DatabaseError;
pub(crate) use types::StoredArticle;
