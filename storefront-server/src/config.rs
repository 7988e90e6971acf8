//! Process configuration read from environment variables.
//!
//! | Variable                  | Default   |
//! |---------------------------|-----------|
//! | `DATABASE_URL`            | required  |
//! | `HOST`                    | `0.0.0.0` |
//! | `PORT`                    | `8080`    |
//! | `DB_MAX_CONNECTIONS`      | `10`      |
//! | `DB_ACQUIRE_TIMEOUT_SECS` | `30`      |
//! | `ORDER_DEADLINE_SECS`     | `60`      |
//! | `ORDER_MAX_ATTEMPTS`      | `3`       |
//! | `RUN_MIGRATIONS`          | `true`    |

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use nutype::nutype;
use storefront::{MaxAttempts, RetryPolicy};
use storefront_postgres::{MaxConnections, PostgresConfig};
use thiserror::Error;

/// Why the configuration could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{name} must be set")]
    Missing {
        /// Variable name.
        name: &'static str,
    },

    /// A variable is set to something unusable.
    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value as found in the environment.
        value: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Timeout in whole seconds, 1..=3600.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3600),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, FromStr, Into)
)]
pub struct TimeoutSecs(u64);

impl TimeoutSecs {
    /// The timeout as a [`Duration`].
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into_inner())
    }
}

/// Everything the server binary needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Interface to bind.
    pub host: IpAddr,
    /// Port to bind.
    pub port: u16,
    /// Pool size.
    pub db_max_connections: MaxConnections,
    /// How long a request waits for a pooled connection.
    pub db_acquire_timeout: TimeoutSecs,
    /// Upper bound on one request: an order placement with its retries, or a
    /// catalog listing.
    pub order_deadline: TimeoutSecs,
    /// Placement attempts before a conflict is reported.
    pub order_max_attempts: MaxAttempts,
    /// Apply embedded migrations at startup.
    pub run_migrations: bool,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing {
                name: "DATABASE_URL",
            })?;

        Ok(Self {
            database_url,
            host: parse_or(&lookup, "HOST", "0.0.0.0")?,
            port: parse_or(&lookup, "PORT", "8080")?,
            db_max_connections: MaxConnections::new(parse_or::<_, NonZeroU32>(
                &lookup,
                "DB_MAX_CONNECTIONS",
                "10",
            )?),
            db_acquire_timeout: parse_or(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", "30")?,
            order_deadline: parse_or(&lookup, "ORDER_DEADLINE_SECS", "60")?,
            order_max_attempts: parse_or(&lookup, "ORDER_MAX_ATTEMPTS", "3")?,
            run_migrations: parse_or(&lookup, "RUN_MIGRATIONS", "true")?,
        })
    }

    /// Address to listen on.
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Pool settings for the catalog store.
    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            max_connections: self.db_max_connections,
            acquire_timeout: self.db_acquire_timeout.as_duration(),
            ..PostgresConfig::default()
        }
    }

    /// Retry policy for the reservation engine.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.order_max_attempts)
    }
}

/// Parse `name`, falling back to `default` when unset. Defaults go through
/// the same validation as explicit values.
fn parse_or<F, T>(lookup: &F, name: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let value = lookup(name).unwrap_or_else(|| default.to_string());
    value
        .trim()
        .parse()
        .map_err(|error: T::Err| ConfigError::Invalid {
            name,
            reason: error.to_string(),
            value,
        })
}
