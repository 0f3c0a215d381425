mod open;
mod models;
mod insert;
mod query;

pub use open::{CacheError, CacheStore};
pub use models::*;
pub use query::CacheStats;
