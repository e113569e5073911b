// src/config.rs
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://vgcassistant.com";
pub const DEFAULT_UPSTREAM_PATH: &str = "/bot";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("UPSTREAM_ENDPOINTS must contain at least one endpoint")]
    NoEndpoints,
}

/// How the forwarded query is assembled from the chat history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    #[default]
    LastUser,
    AllUserJoined,
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-user" | "last_user" => Ok(QueryMode::LastUser),
            "all-user-joined" | "all_user_joined" => Ok(QueryMode::AllUserJoined),
            other => Err(format!(
                "expected `last-user` or `all-user-joined`, got `{other}`"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub upstream_endpoints: Vec<String>,
    pub upstream_path: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub backoff_jitter: Duration,
    pub query_mode: QueryMode,
    pub public_access: bool,
    pub default_temperature: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            upstream_endpoints: vec![DEFAULT_ENDPOINT.to_string()],
            upstream_path: DEFAULT_UPSTREAM_PATH.to_string(),
            request_timeout: Duration::from_millis(30_000),
            max_retries: 3,
            backoff_base: Duration::from_millis(2_000),
            backoff_cap: Duration::from_millis(15_000),
            backoff_jitter: Duration::from_millis(1_000),
            query_mode: QueryMode::LastUser,
            public_access: true,
            default_temperature: 0.5,
        }
    }
}

impl GatewayConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to honour `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let upstream_endpoints = match get("UPSTREAM_ENDPOINTS") {
            Some(raw) => parse_endpoints(&raw)?,
            None => defaults.upstream_endpoints,
        };

        let upstream_path = get("UPSTREAM_PATH")
            .map(|p| p.trim().to_string())
            .unwrap_or(defaults.upstream_path);

        let request_timeout = millis_or(
            "REQUEST_TIMEOUT_MS",
            get("REQUEST_TIMEOUT_MS"),
            defaults.request_timeout,
        )?;
        if request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_MS",
                value: "0".to_string(),
                reason: "timeout must be greater than zero".to_string(),
            });
        }

        let backoff_base = millis_or(
            "BACKOFF_BASE_MS",
            get("BACKOFF_BASE_MS"),
            defaults.backoff_base,
        )?;
        let backoff_cap = millis_or(
            "BACKOFF_CAP_MS",
            get("BACKOFF_CAP_MS"),
            defaults.backoff_cap,
        )?;
        if backoff_cap < backoff_base {
            return Err(ConfigError::Invalid {
                key: "BACKOFF_CAP_MS",
                value: backoff_cap.as_millis().to_string(),
                reason: format!(
                    "cap must not be below BACKOFF_BASE_MS ({} ms)",
                    backoff_base.as_millis()
                ),
            });
        }

        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", get("BIND_ADDR"), defaults.bind_addr)?,
            upstream_endpoints,
            upstream_path,
            request_timeout,
            max_retries: parse_or("MAX_RETRIES", get("MAX_RETRIES"), defaults.max_retries)?,
            backoff_base,
            backoff_cap,
            backoff_jitter: millis_or(
                "BACKOFF_JITTER_MS",
                get("BACKOFF_JITTER_MS"),
                defaults.backoff_jitter,
            )?,
            query_mode: parse_or("QUERY_MODE", get("QUERY_MODE"), defaults.query_mode)?,
            public_access: match get("PUBLIC_ACCESS") {
                Some(raw) => parse_bool("PUBLIC_ACCESS", &raw)?,
                None => defaults.public_access,
            },
            default_temperature: parse_or(
                "DEFAULT_TEMPERATURE",
                get("DEFAULT_TEMPERATURE"),
                defaults.default_temperature,
            )?,
        })
    }
}

fn parse_endpoints(raw: &str) -> Result<Vec<String>, ConfigError> {
    let endpoints: Vec<String> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if endpoints.is_empty() {
        return Err(ConfigError::NoEndpoints);
    }
    if let Some(bad) = endpoints
        .iter()
        .find(|e| !(e.starts_with("http://") || e.starts_with("https://")))
    {
        return Err(ConfigError::Invalid {
            key: "UPSTREAM_ENDPOINTS",
            value: bad.clone(),
            reason: "endpoint must start with http:// or https://".to_string(),
        });
    }
    Ok(endpoints)
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            })
        }
    }
}

fn millis_or(
    key: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => parse_or::<u64>(key, Some(raw), 0).map(Duration::from_millis),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
