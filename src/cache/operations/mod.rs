/// Session store implementations
pub mod session;

pub use session::*;
