//! Process configuration
//!
//! Connection parameters and cache settings come from the environment
//! (optionally seeded from a `.env` file). Secrets are never printed: the
//! `Debug` output of [`WarehouseConfig`] redacts the token.

use crate::cache::CacheConfig;
use crate::error::{Result, WarehouseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// How the bearer token in [`WarehouseConfig::token`] was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    OAuth,
    KeyPairJwt,
    ProgrammaticAccessToken,
}

impl TokenType {
    /// Value of the `X-Snowflake-Authorization-Token-Type` header
    pub fn header_value(&self) -> &'static str {
        match self {
            TokenType::OAuth => "OAUTH",
            TokenType::KeyPairJwt => "KEYPAIR_JWT",
            TokenType::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
        }
    }
}

impl FromStr for TokenType {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oauth" => Ok(TokenType::OAuth),
            "keypair_jwt" | "jwt" => Ok(TokenType::KeyPairJwt),
            "programmatic_access_token" | "pat" => Ok(TokenType::ProgrammaticAccessToken),
            other => Err(WarehouseError::ConfigError(format!(
                "unknown token type '{}'",
                other
            ))),
        }
    }
}

/// Connection parameters for the Snowflake warehouse
#[derive(Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Account identifier, e.g. `myorg-myaccount`
    pub account: String,
    /// Principal the token was issued to
    pub user: String,
    /// Bearer token; never logged or serialized
    #[serde(skip_serializing, default)]
    pub token: String,
    pub token_type: TokenType,
    /// Compute resource that runs the statements
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub role: Option<String>,
    /// Overrides `https://<account>.snowflakecomputing.com`
    pub endpoint: Option<String>,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    /// Delay between polls of a statement still executing
    pub poll_interval: Duration,
}

impl WarehouseConfig {
    pub fn new(
        account: impl Into<String>,
        user: impl Into<String>,
        token: impl Into<String>,
        warehouse: impl Into<String>,
        database: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            user: user.into(),
            token: token.into(),
            token_type: TokenType::OAuth,
            warehouse: warehouse.into(),
            database: database.into(),
            schema: schema.into(),
            role: None,
            endpoint: None,
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = token_type;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, query: Duration) -> Self {
        self.connect_timeout = connect;
        self.query_timeout = query;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Base URL of the SQL API, without a trailing slash
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }

    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| WarehouseError::ConfigError(format!("{} is not set", key)))
        };

        let mut config = Self::new(
            required("SNOWFLAKE_ACCOUNT")?,
            required("SNOWFLAKE_USER")?,
            required("SNOWFLAKE_TOKEN")?,
            required("SNOWFLAKE_WAREHOUSE")?,
            required("SNOWFLAKE_DATABASE")?,
            required("SNOWFLAKE_SCHEMA")?,
        );

        if let Some(token_type) = lookup("SNOWFLAKE_TOKEN_TYPE") {
            config.token_type = token_type.parse()?;
        }
        config.role = lookup("SNOWFLAKE_ROLE").filter(|v| !v.trim().is_empty());
        config.endpoint = lookup("SNOWFLAKE_ENDPOINT").filter(|v| !v.trim().is_empty());
        if let Some(secs) = parse_secs(&lookup, "SNOWFLAKE_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "SNOWFLAKE_QUERY_TIMEOUT_SECS")? {
            config.query_timeout = secs;
        }

        config.validate()?;
        debug!("Loaded warehouse configuration: {:?}", config);
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("account", &self.account),
            ("user", &self.user),
            ("token", &self.token),
            ("warehouse", &self.warehouse),
            ("database", &self.database),
            ("schema", &self.schema),
        ] {
            if value.trim().is_empty() {
                return Err(WarehouseError::ConfigError(format!("{} must not be empty", name)));
            }
        }
        if self.connect_timeout.is_zero() || self.query_timeout.is_zero() {
            return Err(WarehouseError::ConfigError(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

/// Everything the process needs at start-up
#[derive(Debug, Clone)]
pub struct Settings {
    pub warehouse: WarehouseConfig,
    pub cache: CacheConfig,
}

impl Settings {
    /// Load `.env` (if present) and then read both sections from the environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            warehouse: WarehouseConfig::from_lookup(&lookup)?,
            cache: CacheConfig::from_lookup(&lookup)?,
        })
    }
}

/// Parse an optional whole-seconds variable
pub(crate) fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    parse_number::<u64, F>(lookup, key).map(|v| v.map(Duration::from_secs))
}

/// Parse an optional numeric variable
pub(crate) fn parse_number<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            WarehouseError::ConfigError(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
    }
}
