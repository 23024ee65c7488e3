mod repository;

pub use repository::{CacheEntry, CacheRepository};
