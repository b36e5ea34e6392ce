/// Cached record types
pub mod session;

pub use session::CachedSession;
