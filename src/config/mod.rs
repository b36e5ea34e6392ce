use std::env;
use std::time::Duration;

const CAPITAL_LIVE_URL: &str = "https://api-capital.backend-capital.com/api/v1";
const CAPITAL_DEMO_URL: &str = "https://demo-api-capital.backend-capital.com/api/v1";
const METAAPI_PROVISIONING_URL: &str =
    "https://mt-provisioning-api-v1.agiliumtrade.agiliumtrade.ai";
const METAAPI_CLIENT_URL: &str = "https://mt-client-api-v1.new-york.agiliumtrade.ai";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub redis_url: Option<String>,
    pub capital_api_key: String,
    pub capital_base_url: String,
    pub capital_session_ttl_secs: u64,
    pub metaapi_token: String,
    pub metaapi_provisioning_url: String,
    pub metaapi_client_url: String,
    pub mt5_magic: u64,
    pub mt5_deploy_timeout_secs: u64,
    pub upstream_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let jwt_expiration = optional("JWT_EXPIRATION")
            .map(|v| parse::<u64>("JWT_EXPIRATION", v.trim_end_matches('h')))
            .transpose()?
            .unwrap_or(24);

        let demo = optional("CAPITAL_DEMO")
            .map(|v| parse::<bool>("CAPITAL_DEMO", &v))
            .transpose()?
            .unwrap_or(true);
        let capital_base_url = optional("CAPITAL_BASE_URL").unwrap_or_else(|| {
            if demo {
                CAPITAL_DEMO_URL.to_string()
            } else {
                CAPITAL_LIVE_URL.to_string()
            }
        });

        Ok(Config {
            server_host: optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            server_port: parse_or("SERVER_PORT", 3000)?,
            api_base_uri: optional("API_BASE_URI").unwrap_or_else(|| "/api".into()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            redis_url: optional("REDIS_URL"),
            capital_api_key: required("CAPITAL_API_KEY")?,
            capital_base_url,
            capital_session_ttl_secs: parse_or("CAPITAL_SESSION_TTL", 600)?,
            metaapi_token: required("METAAPI_TOKEN")?,
            metaapi_provisioning_url: optional("METAAPI_PROVISIONING_URL")
                .unwrap_or_else(|| METAAPI_PROVISIONING_URL.into()),
            metaapi_client_url: optional("METAAPI_CLIENT_URL")
                .unwrap_or_else(|| METAAPI_CLIENT_URL.into()),
            mt5_magic: parse_or("MT5_MAGIC", 0)?,
            mt5_deploy_timeout_secs: parse_or("MT5_DEPLOY_TIMEOUT", 60)?,
            upstream_timeout_secs: parse_or("UPSTREAM_TIMEOUT", 30)?,
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn capital_session_ttl(&self) -> Duration {
        Duration::from_secs(self.capital_session_ttl_secs)
    }

    pub fn mt5_deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.mt5_deploy_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(v) => parse(name, &v),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reports_variable_name() {
        let err = parse::<u16>("SERVER_PORT", "eighty").unwrap_err();
        assert_eq!(err.to_string(), "invalid value for SERVER_PORT: eighty");
    }

    #[test]
    fn parse_accepts_surrounding_whitespace() {
        assert_eq!(parse::<u64>("MT5_MAGIC", " 42 ").unwrap(), 42);
        assert!(parse::<bool>("CAPITAL_DEMO", "false").map(|v| !v).unwrap());
    }
}
