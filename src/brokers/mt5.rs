//! Capability interface over a cloud-hosted MetaTrader 5 account.
//!
//! `Mt5Provisioner` manages the hosted account (lookup, creation, deployment)
//! and opens connections; `Mt5Connection` is the live handle the gateway acts
//! through. Order and deal types use MT5's numeric codes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::VendorError;

/// MT5 order type names, indexed by their numeric code.
pub const ORDER_TYPES: [&str; 8] = [
    "buy",
    "sell",
    "buy_limit",
    "sell_limit",
    "buy_stop",
    "sell_stop",
    "buy_stop_limit",
    "sell_stop_limit",
];

pub const UNKNOWN_ORDER_TYPE: &str = "unknown";

pub fn order_type_name(code: i64) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|i| ORDER_TYPES.get(i))
        .copied()
        .unwrap_or(UNKNOWN_ORDER_TYPE)
}

/// Inverse of [`order_type_name`]; names outside the table map to 0.
pub fn order_type_code(name: &str) -> i64 {
    ORDER_TYPES
        .iter()
        .position(|t| *t == name)
        .map_or(0, |i| i as i64)
}

pub fn is_known_order_type(name: &str) -> bool {
    ORDER_TYPES.contains(&name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mt5Account {
    pub id: String,
    pub name: String,
    pub login: String,
    pub server: String,
    pub state: String,
}

impl Mt5Account {
    pub fn is_deployed(&self) -> bool {
        self.state.eq_ignore_ascii_case("DEPLOYED")
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub login: String,
    pub password: String,
    pub server: String,
    pub platform: &'static str,
    pub magic: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountInformation {
    pub login: String,
    pub name: String,
    pub server: String,
    pub currency: String,
    pub company: String,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub leverage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mt5Price {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSpecification {
    pub symbol: String,
    pub digits: u32,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mt5Position {
    pub ticket: String,
    pub symbol: String,
    pub type_code: i64,
    pub volume: f64,
    pub open_price: f64,
    pub current_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub profit: f64,
    pub swap: f64,
    pub commission: f64,
    pub time: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mt5Deal {
    pub ticket: String,
    pub position_id: Option<String>,
    pub symbol: Option<String>,
    pub type_code: i64,
    pub entry_type: Option<String>,
    pub volume: f64,
    pub price: Option<f64>,
    pub profit: f64,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: String,
    pub type_code: i64,
    pub volume: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub symbol: String,
    pub type_code: i64,
    pub volume: f64,
    pub price: f64,
    pub stop_limit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeOutcome {
    pub order_id: Option<String>,
    pub position_id: Option<String>,
    pub price: Option<f64>,
    pub code: String,
    pub message: String,
}

#[async_trait]
pub trait Mt5Provisioner: Send + Sync {
    async fn find_account(
        &self,
        login: &str,
        server: &str,
    ) -> Result<Option<Mt5Account>, VendorError>;

    async fn create_account(&self, account: &NewAccount) -> Result<Mt5Account, VendorError>;

    async fn update_password(
        &self,
        account: &Mt5Account,
        password: &str,
    ) -> Result<(), VendorError>;

    async fn deploy(&self, account_id: &str) -> Result<(), VendorError>;

    /// Restarts a deployed account so its terminal logs in with the
    /// currently stored credentials.
    async fn redeploy(&self, account_id: &str) -> Result<(), VendorError>;

    /// Resolves once the account reports `DEPLOYED`. Unbounded; callers
    /// wrap it in a timeout.
    async fn wait_deployed(&self, account_id: &str) -> Result<(), VendorError>;

    /// Resolves once the terminal is logged in at the broker. A broker that
    /// keeps refusing the stored credentials yields a 401 `Status` error.
    /// Unbounded like `wait_deployed`.
    async fn wait_connected(&self, account_id: &str) -> Result<(), VendorError>;

    async fn connect(&self, account: &Mt5Account) -> Result<Arc<dyn Mt5Connection>, VendorError>;
}

#[async_trait]
pub trait Mt5Connection: Send + Sync {
    fn account_id(&self) -> &str;

    async fn account_information(&self) -> Result<AccountInformation, VendorError>;

    async fn symbol_price(&self, symbol: &str) -> Result<Mt5Price, VendorError>;

    async fn symbol_specification(&self, symbol: &str)
    -> Result<SymbolSpecification, VendorError>;

    async fn positions(&self) -> Result<Vec<Mt5Position>, VendorError>;

    async fn history_deals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Mt5Deal>, VendorError>;

    async fn market_order(&self, order: &MarketOrder) -> Result<TradeOutcome, VendorError>;

    async fn pending_order(&self, order: &PendingOrder) -> Result<TradeOutcome, VendorError>;

    async fn modify_position(
        &self,
        ticket: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<TradeOutcome, VendorError>;

    async fn close_position(&self, ticket: &str) -> Result<TradeOutcome, VendorError>;

    async fn close(&self) -> Result<(), VendorError>;
}
