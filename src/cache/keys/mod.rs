/// Cache key builders
pub mod session_keys;

pub use session_keys::capital_session_key;
