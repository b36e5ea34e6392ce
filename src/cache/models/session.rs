use serde::{Deserialize, Serialize};

/// A Capital.com vendor session held on behalf of a gateway user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CachedSession {
    pub username: String,
    /// `CST` header value
    pub cst: String,
    /// `X-SECURITY-TOKEN` header value
    pub security_token: String,
    pub client_id: String,
    pub account_id: String,
    pub timezone_offset: f64,
    pub created_at: i64, // Unix timestamp
    pub expires_at: i64, // Unix timestamp
}

impl CachedSession {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
