//! In-process result caching.

mod registry;
mod ttl;

pub use registry::CacheRegistry;
pub use ttl::{TtlCache, DEFAULT_TTL};
