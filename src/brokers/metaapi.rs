//! MetaApi cloud implementation of the MT5 capability traits.
//!
//! Provisioning calls go to the provisioning API, trading and market data
//! calls to the client API. Both authenticate with the `auth-token` header.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::mt5::{
    AccountInformation, MarketOrder, Mt5Account, Mt5Connection, Mt5Deal, Mt5Position, Mt5Price,
    Mt5Provisioner, NewAccount, PendingOrder, SymbolSpecification, TradeOutcome,
    is_known_order_type, order_type_code, order_type_name,
};
use super::string_or_number;
use crate::error::VendorError;

const AUTH_HEADER: &str = "auth-token";
const DEPLOY_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Consecutive `DISCONNECTED_FROM_BROKER` polls after which the broker is
/// taken to have refused the credentials.
const BROKER_REFUSAL_POLLS: u32 = 10;

/// Trade return codes that mean the request went through.
const TRADE_SUCCESS_CODES: [i64; 4] = [0, 10008, 10009, 10010];

fn parse_base(url: &str) -> Result<Url, VendorError> {
    Url::parse(url).map_err(|e| VendorError::Decode(format!("invalid MetaApi url {url}: {e}")))
}

/// `base/users/current/accounts/<segments...>`, each segment escaped.
fn accounts_url(base: &Url, segments: &[&str]) -> Result<Url, VendorError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| VendorError::Decode(format!("{base} cannot be a base url")))?
        .pop_if_empty()
        .extend(["users", "current", "accounts"])
        .extend(segments);
    Ok(url)
}

async fn check(response: Response) -> Result<Response, VendorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let code = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|c| c.as_str()).map(String::from));

    Err(VendorError::Status {
        status: status.as_u16(),
        code,
        message: text,
    })
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, VendorError> {
    let response = check(request.send().await?).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| VendorError::Decode(e.to_string()))
}

/// Maps `POSITION_TYPE_BUY`, `ORDER_TYPE_SELL_LIMIT`, `DEAL_TYPE_SELL`, ...
/// to the MT5 numeric code, or -1 when the name is not an order type.
fn vendor_type_code(kind: &str) -> i64 {
    let name = ["POSITION_TYPE_", "ORDER_TYPE_", "DEAL_TYPE_"]
        .iter()
        .find_map(|prefix| kind.strip_prefix(prefix))
        .unwrap_or(kind)
        .to_ascii_lowercase();
    if is_known_order_type(&name) {
        order_type_code(&name)
    } else {
        -1
    }
}

fn action_type(code: i64) -> String {
    format!("ORDER_TYPE_{}", order_type_name(code).to_ascii_uppercase())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountDto {
    #[serde(rename = "_id", alias = "id")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    login: String,
    #[serde(default)]
    server: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    connection_status: String,
}

/// What a `connectionStatus` poll means for a login in progress.
#[derive(Debug, PartialEq)]
enum BrokerLink {
    Connected,
    Refused,
    Pending,
}

fn broker_link(status: &str, refusals: u32) -> BrokerLink {
    match status {
        "CONNECTED" => BrokerLink::Connected,
        "DISCONNECTED_FROM_BROKER" if refusals >= BROKER_REFUSAL_POLLS => BrokerLink::Refused,
        _ => BrokerLink::Pending,
    }
}

impl From<AccountDto> for Mt5Account {
    fn from(dto: AccountDto) -> Self {
        Mt5Account {
            id: dto.id,
            name: dto.name,
            login: dto.login,
            server: dto.server,
            state: dto.state,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountDto<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    login: &'a str,
    password: &'a str,
    server: &'a str,
    platform: &'a str,
    magic: u64,
}

#[derive(Debug, Deserialize)]
struct CreatedDto {
    id: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfoDto {
    #[serde(default, deserialize_with = "string_or_number")]
    login: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    server: String,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    broker: String,
    #[serde(default)]
    balance: f64,
    #[serde(default)]
    equity: f64,
    #[serde(default)]
    margin: f64,
    #[serde(default)]
    free_margin: f64,
    #[serde(default)]
    leverage: f64,
}

#[derive(Debug, Deserialize)]
struct PriceDto {
    symbol: String,
    bid: f64,
    ask: f64,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SpecificationDto {
    symbol: String,
    digits: u32,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionDto {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    symbol: String,
    #[serde(rename = "type")]
    kind: String,
    volume: f64,
    open_price: f64,
    #[serde(default)]
    current_price: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
    #[serde(default)]
    profit: f64,
    #[serde(default)]
    swap: f64,
    #[serde(default)]
    commission: f64,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    comment: Option<String>,
}

impl From<PositionDto> for Mt5Position {
    fn from(dto: PositionDto) -> Self {
        Mt5Position {
            ticket: dto.id,
            symbol: dto.symbol,
            type_code: vendor_type_code(&dto.kind),
            volume: dto.volume,
            open_price: dto.open_price,
            current_price: dto.current_price,
            stop_loss: dto.stop_loss,
            take_profit: dto.take_profit,
            profit: dto.profit,
            swap: dto.swap,
            commission: dto.commission,
            time: dto.time,
            comment: dto.comment,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DealDto {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    entry_type: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    volume: f64,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    profit: f64,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    position_id: Option<String>,
}

impl From<DealDto> for Mt5Deal {
    fn from(dto: DealDto) -> Self {
        Mt5Deal {
            ticket: dto.id,
            position_id: dto.position_id,
            symbol: dto.symbol,
            type_code: vendor_type_code(&dto.kind),
            entry_type: dto.entry_type,
            volume: dto.volume,
            price: dto.price,
            profit: dto.profit,
            time: dto.time,
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct TradeDto<'a> {
    action_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    open_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    take_profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeResponseDto {
    numeric_code: i64,
    #[serde(default)]
    string_code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    position_id: Option<String>,
}

pub struct MetaApiProvisioner {
    http: Client,
    provisioning_url: Url,
    client_url: Url,
    token: String,
}

impl MetaApiProvisioner {
    pub fn new(
        provisioning_url: &str,
        client_url: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, VendorError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            provisioning_url: parse_base(provisioning_url)?,
            client_url: parse_base(client_url)?,
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, VendorError> {
        let url = accounts_url(&self.provisioning_url, segments)?;
        Ok(self
            .http
            .request(method, url)
            .header(AUTH_HEADER, &self.token))
    }

    async fn account(&self, account_id: &str) -> Result<AccountDto, VendorError> {
        send(self.request(Method::GET, &[account_id])?).await
    }
}

#[async_trait]
impl Mt5Provisioner for MetaApiProvisioner {
    async fn find_account(
        &self,
        login: &str,
        server: &str,
    ) -> Result<Option<Mt5Account>, VendorError> {
        let request = self
            .request(Method::GET, &[])?
            .query(&[("query", login), ("platform", "mt5")]);
        let accounts: Vec<AccountDto> = send(request).await?;

        Ok(accounts
            .into_iter()
            .map(Mt5Account::from)
            .find(|a| a.login == login && a.server == server))
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Mt5Account, VendorError> {
        tracing::info!(login = %account.login, server = %account.server, "Provisioning MetaApi account");

        let body = CreateAccountDto {
            name: &account.name,
            kind: "cloud",
            login: &account.login,
            password: &account.password,
            server: &account.server,
            platform: account.platform,
            magic: account.magic,
        };
        let created: CreatedDto = send(self.request(Method::POST, &[])?.json(&body)).await?;

        Ok(Mt5Account {
            id: created.id,
            name: account.name.clone(),
            login: account.login.clone(),
            server: account.server.clone(),
            state: created.state,
        })
    }

    async fn update_password(
        &self,
        account: &Mt5Account,
        password: &str,
    ) -> Result<(), VendorError> {
        let body = serde_json::json!({
            "name": account.name,
            "password": password,
            "server": account.server,
        });
        let response = self
            .request(Method::PUT, &[account.id.as_str()])?
            .json(&body)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn deploy(&self, account_id: &str) -> Result<(), VendorError> {
        tracing::info!(account = %account_id, "Deploying MetaApi account");
        let response = self
            .request(Method::POST, &[account_id, "deploy"])?
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn redeploy(&self, account_id: &str) -> Result<(), VendorError> {
        tracing::info!(account = %account_id, "Redeploying MetaApi account");
        let response = self
            .request(Method::POST, &[account_id, "redeploy"])?
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn wait_deployed(&self, account_id: &str) -> Result<(), VendorError> {
        loop {
            let account = Mt5Account::from(self.account(account_id).await?);
            if account.is_deployed() {
                return Ok(());
            }
            tracing::debug!(account = %account_id, state = %account.state, "Waiting for deployment");
            tokio::time::sleep(DEPLOY_POLL_INTERVAL).await;
        }
    }

    async fn wait_connected(&self, account_id: &str) -> Result<(), VendorError> {
        let mut refusals = 0;
        loop {
            let account = self.account(account_id).await?;
            if account.connection_status == "DISCONNECTED_FROM_BROKER" {
                refusals += 1;
            } else {
                refusals = 0;
            }
            match broker_link(&account.connection_status, refusals) {
                BrokerLink::Connected => return Ok(()),
                BrokerLink::Refused => {
                    return Err(VendorError::Status {
                        status: 401,
                        code: Some("E_AUTH".into()),
                        message: "broker refused the account credentials".into(),
                    });
                }
                BrokerLink::Pending => {
                    tracing::debug!(
                        account = %account_id,
                        status = %account.connection_status,
                        "Waiting for broker connection"
                    );
                    tokio::time::sleep(DEPLOY_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn connect(&self, account: &Mt5Account) -> Result<Arc<dyn Mt5Connection>, VendorError> {
        let connection = MetaApiConnection {
            http: self.http.clone(),
            client_url: self.client_url.clone(),
            token: self.token.clone(),
            account_id: account.id.clone(),
        };

        // handshake: the terminal must answer before the handle is usable
        connection.account_information().await?;
        tracing::info!(account = %account.id, "MetaApi connection established");

        Ok(Arc::new(connection))
    }
}

pub struct MetaApiConnection {
    http: Client,
    client_url: Url,
    token: String,
    account_id: String,
}

impl MetaApiConnection {
    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, VendorError> {
        let mut all = vec![self.account_id.as_str()];
        all.extend_from_slice(segments);
        let url = accounts_url(&self.client_url, &all)?;
        Ok(self
            .http
            .request(method, url)
            .header(AUTH_HEADER, &self.token))
    }

    async fn trade(&self, body: &TradeDto<'_>) -> Result<TradeOutcome, VendorError> {
        let response: TradeResponseDto =
            send(self.request(Method::POST, &["trade"])?.json(body)).await?;

        if !TRADE_SUCCESS_CODES.contains(&response.numeric_code) {
            return Err(VendorError::Rejected {
                code: response.string_code,
                message: response.message,
            });
        }

        Ok(TradeOutcome {
            order_id: response.order_id,
            position_id: response.position_id,
            price: None,
            code: response.string_code,
            message: response.message,
        })
    }
}

#[async_trait]
impl Mt5Connection for MetaApiConnection {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn account_information(&self) -> Result<AccountInformation, VendorError> {
        let dto: AccountInfoDto = send(self.request(Method::GET, &["account-information"])?).await?;
        Ok(AccountInformation {
            login: dto.login,
            name: dto.name,
            server: dto.server,
            currency: dto.currency,
            company: dto.broker,
            balance: dto.balance,
            equity: dto.equity,
            margin: dto.margin,
            free_margin: dto.free_margin,
            leverage: dto.leverage,
        })
    }

    async fn symbol_price(&self, symbol: &str) -> Result<Mt5Price, VendorError> {
        let dto: PriceDto =
            send(self.request(Method::GET, &["symbols", symbol, "current-price"])?).await?;
        Ok(Mt5Price {
            symbol: dto.symbol,
            bid: dto.bid,
            ask: dto.ask,
            time: dto.time,
        })
    }

    async fn symbol_specification(
        &self,
        symbol: &str,
    ) -> Result<SymbolSpecification, VendorError> {
        let dto: SpecificationDto =
            send(self.request(Method::GET, &["symbols", symbol, "specification"])?).await?;
        Ok(SymbolSpecification {
            symbol: dto.symbol,
            digits: dto.digits,
            description: dto.description,
        })
    }

    async fn positions(&self) -> Result<Vec<Mt5Position>, VendorError> {
        let positions: Vec<PositionDto> = send(self.request(Method::GET, &["positions"])?).await?;
        Ok(positions.into_iter().map(Mt5Position::from).collect())
    }

    async fn history_deals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Mt5Deal>, VendorError> {
        let from = from.to_rfc3339_opts(SecondsFormat::Millis, true);
        let to = to.to_rfc3339_opts(SecondsFormat::Millis, true);
        let deals: Vec<DealDto> =
            send(self.request(Method::GET, &["history-deals", "time", from.as_str(), to.as_str()])?).await?;
        Ok(deals.into_iter().map(Mt5Deal::from).collect())
    }

    async fn market_order(&self, order: &MarketOrder) -> Result<TradeOutcome, VendorError> {
        self.trade(&TradeDto {
            action_type: action_type(order.type_code),
            symbol: Some(&order.symbol),
            volume: Some(order.volume),
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            ..Default::default()
        })
        .await
    }

    async fn pending_order(&self, order: &PendingOrder) -> Result<TradeOutcome, VendorError> {
        let mut outcome = self
            .trade(&TradeDto {
                action_type: action_type(order.type_code),
                symbol: Some(&order.symbol),
                volume: Some(order.volume),
                open_price: Some(order.price),
                stop_limit_price: order.stop_limit_price,
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
                ..Default::default()
            })
            .await?;
        outcome.price = Some(order.price);
        Ok(outcome)
    }

    async fn modify_position(
        &self,
        ticket: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<TradeOutcome, VendorError> {
        self.trade(&TradeDto {
            action_type: "POSITION_MODIFY".into(),
            position_id: Some(ticket),
            stop_loss,
            take_profit,
            ..Default::default()
        })
        .await
    }

    async fn close_position(&self, ticket: &str) -> Result<TradeOutcome, VendorError> {
        self.trade(&TradeDto {
            action_type: "POSITION_CLOSE_ID".into(),
            position_id: Some(ticket),
            ..Default::default()
        })
        .await
    }

    async fn close(&self) -> Result<(), VendorError> {
        // REST handles hold no socket; the hosted terminal stays deployed
        tracing::debug!(account = %self.account_id, "MetaApi connection released");
        Ok(())
    }
}
