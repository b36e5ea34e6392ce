use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::brokers::mt5::{
    AccountInformation, MarketOrder, Mt5Deal, Mt5Position, Mt5Price, PendingOrder,
    SymbolSpecification, TradeOutcome, is_known_order_type, order_type_code, order_type_name,
};
use crate::common::{missing, present_owned};
use crate::error::AppError;

pub use crate::routes::capital::model::ModifyRequest;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// MT5 logins are numeric but clients send them either way.
    pub login: Option<Value>,
    pub password: Option<String>,
    pub server: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
    pub server: String,
}

impl LoginRequest {
    pub fn validate(self) -> Result<Credentials, AppError> {
        let login = match self.login {
            Some(Value::String(s)) => present_owned(Some(s)),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let password = self.password.filter(|p| !p.is_empty());
        let server = present_owned(self.server);

        match (login, password, server) {
            (Some(login), Some(password), Some(server)) => Ok(Credentials {
                login,
                password,
                server,
            }),
            (login, password, server) => Err(AppError::missing_fields(&missing(&[
                ("login", login.is_some()),
                ("password", password.is_some()),
                ("server", server.is_some()),
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

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
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

impl From<AccountInformation> for AccountView {
    fn from(info: AccountInformation) -> Self {
        AccountView {
            login: info.login,
            name: info.name,
            server: info.server,
            currency: info.currency,
            company: info.company,
            balance: info.balance,
            equity: info.equity,
            margin: info.margin,
            free_margin: info.free_margin,
            leverage: info.leverage,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    /// In points: `(ask - bid) * 10^digits`.
    pub spread: f64,
    pub digits: u32,
    pub time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub fn spread_points(bid: f64, ask: f64, digits: u32) -> f64 {
    (ask - bid) * 10f64.powi(digits as i32)
}

impl Quote {
    pub fn new(price: Mt5Price, spec: SymbolSpecification) -> Self {
        Quote {
            spread: spread_points(price.bid, price.ask, spec.digits),
            symbol: price.symbol,
            bid: price.bid,
            ask: price.ask,
            digits: spec.digits,
            time: price.time,
            description: spec.description,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub ticket: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub volume: f64,
    pub open_time: Option<DateTime<Utc>>,
    pub open_price: f64,
    pub current_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub profit: f64,
    pub swap: f64,
    pub commission: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl From<Mt5Position> for PositionView {
    fn from(p: Mt5Position) -> Self {
        PositionView {
            ticket: p.ticket,
            symbol: p.symbol,
            kind: order_type_name(p.type_code),
            volume: p.volume,
            open_time: p.time,
            open_price: p.open_price,
            current_price: p.current_price,
            stop_loss: p.stop_loss,
            take_profit: p.take_profit,
            profit: p.profit,
            swap: p.swap,
            commission: p.commission,
            comment: p.comment,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealView {
    pub ticket: String,
    pub position_id: Option<String>,
    pub symbol: Option<String>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub entry_type: Option<String>,
    pub volume: f64,
    pub price: Option<f64>,
    pub profit: f64,
    pub time: Option<DateTime<Utc>>,
}

impl From<Mt5Deal> for DealView {
    fn from(d: Mt5Deal) -> Self {
        DealView {
            ticket: d.ticket,
            position_id: d.position_id,
            symbol: d.symbol,
            kind: order_type_name(d.type_code),
            entry_type: d.entry_type,
            volume: d.volume,
            price: d.price,
            profit: d.profit,
            time: d.time,
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
    pub price: Option<f64>,
    pub stop_limit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mt5Order {
    Market(MarketOrder),
    Pending(PendingOrder),
}

impl TradeRequest {
    pub fn validate(self) -> Result<Mt5Order, AppError> {
        let (symbol, kind, volume) =
            match (present_owned(self.symbol), present_owned(self.kind), self.volume) {
                (Some(symbol), Some(kind), Some(volume)) => {
                    (symbol, kind.to_ascii_lowercase(), volume)
                }
                (symbol, kind, volume) => {
                    return Err(AppError::missing_fields(&missing(&[
                        ("symbol", symbol.is_some()),
                        ("type", kind.is_some()),
                        ("volume", volume.is_some()),
                    ])));
                }
            };

        if !is_known_order_type(&kind) {
            return Err(AppError::validation(format!("Unsupported order type: {kind}"))
                .with_detail("field", "type"));
        }

        let type_code = order_type_code(&kind);
        if kind == "buy" || kind == "sell" {
            return Ok(Mt5Order::Market(MarketOrder {
                symbol,
                type_code,
                volume,
                stop_loss: self.stop_loss,
                take_profit: self.take_profit,
            }));
        }

        let price = self
            .price
            .ok_or_else(|| AppError::missing_fields(&["price"]))?;
        Ok(Mt5Order::Pending(PendingOrder {
            symbol,
            type_code,
            volume,
            price,
            stop_limit_price: self.stop_limit_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
        }))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponse {
    pub success: bool,
    pub ticket: Option<String>,
    pub position_id: Option<String>,
    pub open_price: Option<f64>,
    pub code: String,
    pub message: String,
}

impl From<TradeOutcome> for TradeResponse {
    fn from(outcome: TradeOutcome) -> Self {
        TradeResponse {
            success: true,
            ticket: outcome.order_id,
            position_id: outcome.position_id,
            open_price: outcome.price,
            code: outcome.code,
            message: outcome.message,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionActionResponse {
    pub success: bool,
    pub ticket: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(kind: &str, price: Option<f64>) -> TradeRequest {
        TradeRequest {
            symbol: Some("EURUSD".into()),
            kind: Some(kind.into()),
            volume: Some(0.1),
            price,
            stop_limit_price: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[test]
    fn spread_scales_by_digits() {
        let (bid, ask) = (1.08512, 1.08527);
        for digits in 0..=8u32 {
            let expected = (ask - bid) * 10f64.powi(digits as i32);
            assert_eq!(spread_points(bid, ask, digits), expected, "digits {digits}");
        }
        assert!((spread_points(bid, ask, 5) - 15.0).abs() < 1e-6);
    }

    #[test]
    fn numeric_login_is_accepted() {
        let req: LoginRequest = serde_json::from_value(json!({
            "login": 51234567, "password": "secret", "server": "ICMarkets-Demo"
        }))
        .unwrap();
        assert_eq!(req.validate().unwrap().login, "51234567");
    }

    #[test]
    fn missing_login_fields_are_listed() {
        let req: LoginRequest = serde_json::from_value(json!({ "login": "", "password": "x" })).unwrap();
        match req.validate() {
            Err(AppError::Validation { details, .. }) => {
                assert_eq!(details.unwrap()["missing"], json!(["login", "server"]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn market_and_pending_orders() {
        match request("SELL", None).validate().unwrap() {
            Mt5Order::Market(order) => assert_eq!(order.type_code, 1),
            other => panic!("expected market order, got {other:?}"),
        }
        match request("buy_stop_limit", Some(1.1)).validate().unwrap() {
            Mt5Order::Pending(order) => {
                assert_eq!(order.type_code, 6);
                assert_eq!(order.price, 1.1);
            }
            other => panic!("expected pending order, got {other:?}"),
        }
    }

    #[test]
    fn pending_without_price_and_unknown_types_are_rejected() {
        assert!(request("buy_limit", None).validate().is_err());
        assert!(matches!(
            request("market", Some(1.0)).validate(),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn unknown_position_type_renders_as_unknown() {
        let view = PositionView::from(Mt5Position {
            ticket: "1".into(),
            symbol: "XAUUSD".into(),
            type_code: 42,
            volume: 1.0,
            open_price: 2000.0,
            current_price: None,
            stop_loss: None,
            take_profit: None,
            profit: 0.0,
            swap: 0.0,
            commission: 0.0,
            time: None,
            comment: None,
        });
        assert_eq!(view.kind, "unknown");
    }
}
