//! Standard task library
//!
//! Ready-made collaborators for execution trees: closure-backed and delay
//! tasks, plus the cache contract with an in-memory implementation.

pub mod cache;
mod func;
mod time;

pub use cache::{cache_key, Cache, CacheError, MemoryCache};
pub use func::FnTask;
pub use time::DelayTask;
