// Session cache: vendor sessions keyed by gateway identity, with explicit expiry.

pub mod keys;
pub mod lock;
pub mod models;
pub mod operations;

pub use lock::KeyedLocks;
pub use models::CachedSession;
pub use operations::{MemorySessionStore, RedisSessionStore, SessionStore, StoreError};
