mod auth;
mod error_handler;

pub use auth::{capital_auth, mt5_auth};
pub use error_handler::log_errors;
