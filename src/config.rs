//! Environment-driven configuration
//!
//! Server:
//! - `CHAT_HUB_BIND`: listen address (default `127.0.0.1:5080`)
//! - `CHAT_HUB_JWT_SECRET`: token signing secret (required, min 32 chars)
//! - `CHAT_HUB_STAFF_ROLE`: role marking support staff (default `staff`)
//! - `CHAT_HUB_SEND_BUFFER`: per-connection outbound queue length (default 256)
//! - `CHAT_HUB_LOG`: log level when `RUST_LOG` is unset (default `info`)
//! - `CHAT_HUB_DEV_USERS`: users the in-memory store starts with, as
//!   `id:role` pairs (`1:customer,2:staff`); other users join as `customer`
//!
//! Client:
//! - `CHAT_HUB_URL`: hub endpoint (default `ws://127.0.0.1:5080/hub`)
//! - `CHAT_HUB_RETRY_INITIAL_MS` (500), `CHAT_HUB_RETRY_MAX_MS` (30000),
//!   `CHAT_HUB_RETRY_MAX_ATTEMPTS` (8)
//! - `CHAT_HUB_INBOUND_BUFFER`: events queued from the hub before the reader
//!   waits on the application (default 256)

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::api::auth::MIN_SECRET_LEN;
use crate::client::ExponentialBackoff;
use crate::error::ConfigError;
use crate::types::UserId;

pub const DEFAULT_BIND: &str = "127.0.0.1:5080";
pub const DEFAULT_URL: &str = "ws://127.0.0.1:5080/hub";

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind: SocketAddr,
    pub jwt_secret: String,
    pub staff_role: String,
    pub send_buffer: usize,
    pub log_level: String,
    /// Seed users for the in-memory store
    pub dev_users: Vec<(UserId, String)>,
}

impl HubConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("CHAT_HUB_JWT_SECRET").ok_or(ConfigError::Missing("CHAT_HUB_JWT_SECRET"))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "CHAT_HUB_JWT_SECRET",
                reason: format!("must be at least {} characters", MIN_SECRET_LEN),
            });
        }

        let send_buffer = parse_or(&lookup, "CHAT_HUB_SEND_BUFFER", 256usize)?;
        if send_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "CHAT_HUB_SEND_BUFFER",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            bind: parse_or(&lookup, "CHAT_HUB_BIND", default_bind())?,
            jwt_secret,
            staff_role: lookup("CHAT_HUB_STAFF_ROLE").unwrap_or_else(|| "staff".to_string()),
            send_buffer,
            log_level: lookup("CHAT_HUB_LOG").unwrap_or_else(|| "info".to_string()),
            dev_users: match lookup("CHAT_HUB_DEV_USERS") {
                Some(raw) => parse_users(&raw)?,
                None => Vec::new(),
            },
        })
    }
}

fn parse_users(raw: &str) -> Result<Vec<(UserId, String)>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "CHAT_HUB_DEV_USERS",
        reason,
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, role) = entry
                .split_once(':')
                .ok_or_else(|| invalid(format!("expected id:role, got '{}'", entry)))?;
            let id = id
                .trim()
                .parse::<i64>()
                .map_err(|e| invalid(format!("bad user id '{}': {}", id.trim(), e)))?;
            let role = role.trim();
            if role.is_empty() {
                return Err(invalid(format!("missing role for user {}", id)));
            }
            Ok((UserId(id), role.to_string()))
        })
        .collect()
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5080))
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub url: String,
    pub backoff: ExponentialBackoff,
    pub inbound_buffer: usize,
}

impl SupervisorConfig {
    /// Defaults pointed at `url`
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff: ExponentialBackoff::default(),
            inbound_buffer: 256,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::for_url(DEFAULT_URL)
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ExponentialBackoff::default();
        let initial_ms = parse_or(
            &lookup,
            "CHAT_HUB_RETRY_INITIAL_MS",
            defaults.initial_delay.as_millis() as u64,
        )?;
        let max_ms = parse_or(
            &lookup,
            "CHAT_HUB_RETRY_MAX_MS",
            defaults.max_delay.as_millis() as u64,
        )?;
        if max_ms < initial_ms {
            return Err(ConfigError::Invalid {
                name: "CHAT_HUB_RETRY_MAX_MS",
                reason: "must not be smaller than CHAT_HUB_RETRY_INITIAL_MS".to_string(),
            });
        }
        let max_attempts = parse_or(&lookup, "CHAT_HUB_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?;
        let inbound_buffer = parse_or(&lookup, "CHAT_HUB_INBOUND_BUFFER", 256usize)?;
        if inbound_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "CHAT_HUB_INBOUND_BUFFER",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            url: lookup("CHAT_HUB_URL").unwrap_or_else(|| DEFAULT_URL.to_string()),
            backoff: ExponentialBackoff::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                max_attempts,
            ),
            inbound_buffer,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
