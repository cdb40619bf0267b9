pub mod error;
pub mod glob;
pub mod types;

pub use error::{CacheError, Result};
pub use glob::GlobPattern;
pub use types::{
    CacheCounters, CacheStats, CachedResponse, MemoryStats, MemoryStoreConfig, StoredValue,
};
