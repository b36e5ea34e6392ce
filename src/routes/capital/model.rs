use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::brokers::capital::{
    Direction, MarketDetails, VendorAccount, VendorPosition, VendorTrade, WorkingOrderType,
};
use crate::common::{missing, parse_vendor_time, present_owned};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "identifier")]
    pub username: Option<String>,
    pub password: Option<String>,
}

impl LoginRequest {
    pub fn validate(self) -> Result<(String, String), AppError> {
        match (present_owned(self.username), self.password.filter(|p| !p.is_empty())) {
            (Some(username), Some(password)) => Ok((username, password)),
            (username, password) => Err(AppError::missing_fields(&missing(&[
                ("username", username.is_some()),
                ("password", password.is_some()),
            ]))),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: i64,
    pub account_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account_id: String,
    pub account_name: String,
    pub account_type: String,
    pub status: String,
    pub balance: f64,
    pub currency: String,
    pub profit_loss: f64,
    pub available: f64,
}

impl From<&VendorAccount> for AccountSnapshot {
    fn from(account: &VendorAccount) -> Self {
        AccountSnapshot {
            account_id: account.account_id.clone(),
            account_name: account.account_name.clone(),
            account_type: account.account_type.clone(),
            status: account.status.clone(),
            balance: account.balance.balance,
            currency: account.currency.clone(),
            profit_loss: account.balance.profit_loss,
            available: account.balance.available,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    pub time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_status: Option<String>,
}

impl From<&MarketDetails> for Quote {
    fn from(market: &MarketDetails) -> Self {
        let bid = market.snapshot.bid;
        let ask = market.snapshot.offer;
        Quote {
            symbol: market.instrument.epic.clone(),
            name: market.instrument.name.clone(),
            bid,
            ask,
            spread: ask - bid,
            time: market
                .snapshot
                .update_time
                .as_deref()
                .and_then(parse_vendor_time),
            market_status: market.snapshot.market_status.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub deal_id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub volume: f64,
    pub open_time: Option<DateTime<Utc>>,
    pub open_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub profit: f64,
    pub currency: Option<String>,
}

impl From<&VendorPosition> for PositionView {
    fn from(p: &VendorPosition) -> Self {
        let opened = p
            .position
            .created_date_utc
            .as_deref()
            .or(p.position.created_date.as_deref());
        PositionView {
            deal_id: p.position.deal_id.clone(),
            symbol: p.market.epic.clone(),
            kind: p.position.direction.as_lower().to_string(),
            volume: p.position.size,
            open_time: opened.and_then(parse_vendor_time),
            open_price: p.position.level,
            stop_loss: p.position.stop_level,
            take_profit: p.position.limit_level,
            profit: p.position.upl,
            currency: p.position.currency.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeView {
    pub deal_id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub volume: f64,
    pub open_time: Option<DateTime<Utc>>,
    pub open_price: Option<f64>,
    pub close_time: Option<DateTime<Utc>>,
    pub close_price: Option<f64>,
    pub profit: Option<f64>,
    pub currency: Option<String>,
}

impl From<&VendorTrade> for TradeView {
    fn from(t: &VendorTrade) -> Self {
        TradeView {
            deal_id: t.deal_id.clone(),
            symbol: t.epic.clone(),
            kind: t.direction.as_lower().to_string(),
            volume: t.size,
            open_time: t.open_date.as_deref().and_then(parse_vendor_time),
            open_price: t.open_level,
            close_time: t.close_date.as_deref().and_then(parse_vendor_time),
            close_price: t.close_level,
            profit: t.profit_and_loss,
            currency: t.currency.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub symbol: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub volume: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderKind {
    Market(Direction),
    Working {
        direction: Direction,
        order_type: WorkingOrderType,
        level: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidTrade {
    pub symbol: String,
    pub kind: OrderKind,
    pub volume: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl TradeRequest {
    pub fn validate(self) -> Result<ValidTrade, AppError> {
        let (symbol, kind, volume) = match (present_owned(self.symbol), present_owned(self.kind), self.volume) {
            (Some(symbol), Some(kind), Some(volume)) => (symbol, kind.to_ascii_lowercase(), volume),
            (symbol, kind, volume) => {
                return Err(AppError::missing_fields(&missing(&[
                    ("symbol", symbol.is_some()),
                    ("type", kind.is_some()),
                    ("volume", volume.is_some()),
                ])));
            }
        };

        let (direction, working) = match kind.as_str() {
            "buy" => (Direction::Buy, None),
            "sell" => (Direction::Sell, None),
            "buy_limit" => (Direction::Buy, Some(WorkingOrderType::Limit)),
            "sell_limit" => (Direction::Sell, Some(WorkingOrderType::Limit)),
            "buy_stop" => (Direction::Buy, Some(WorkingOrderType::Stop)),
            "sell_stop" => (Direction::Sell, Some(WorkingOrderType::Stop)),
            other => {
                return Err(AppError::validation(format!("Unsupported order type: {other}"))
                    .with_detail("field", "type"));
            }
        };

        let kind = match working {
            None => OrderKind::Market(direction),
            Some(order_type) => {
                let level = self.price.ok_or_else(|| AppError::missing_fields(&["price"]))?;
                OrderKind::Working {
                    direction,
                    order_type,
                    level,
                }
            }
        };

        Ok(ValidTrade {
            symbol,
            kind,
            volume,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponse {
    pub success: bool,
    pub deal_id: String,
    pub deal_reference: String,
    pub open_time: Option<DateTime<Utc>>,
    pub open_price: Option<f64>,
    pub operation_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyRequest {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl ModifyRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.stop_loss.is_none() && self.take_profit.is_none() {
            return Err(AppError::validation("Provide stopLoss or takeProfit")
                .with_detail("missing", ["stopLoss", "takeProfit"]));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionActionResponse {
    pub success: bool,
    pub deal_id: String,
    pub deal_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<Uuid>,
}
