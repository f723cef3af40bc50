//! Engine configuration.
//!
//! Configuration is loaded from `TENDERO_*` environment variables with
//! fallback to defaults.
//!
//! | Variable | Default |
//! |---|---|
//! | `TENDERO_DB_PATH` | `tendero.db` |
//! | `TENDERO_DB_MAX_CONNECTIONS` | `5` |
//! | `TENDERO_DB_BUSY_TIMEOUT_MS` | `5000` |
//! | `TENDERO_DEFAULT_CREDIT_LIMIT_CENTS` | `50000` |
//! | `TENDERO_CREDIT_TERM_DAYS` | `30` |
//! | `TENDERO_CREDIT_LIMIT_POLICY` | `soft` (`soft` or `enforce`) |
//! | `TENDERO_OVERPAYMENT_POLICY` | `reject` (`reject` or `allow`) |
//! | `TENDERO_STAGNANT_DAYS` | `14` |
//! | `TENDERO_OUTBOX_BATCH_SIZE` | `50` |
//! | `TENDERO_OUTBOX_MAX_ATTEMPTS` | `10` |
//! | `TENDERO_OUTBOX_POLL_SECS` | `5` |

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tendero_core::DEFAULT_STAGNANT_DAYS;
use tendero_db::DbConfig;

// =============================================================================
// Policies
// =============================================================================

/// What a deferred sale does when it pushes a balance past the credit limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditLimitPolicy {
    /// Accept the sale, log a warning and flag the `credit_charge` event.
    Soft,
    /// Refuse the sale with a validation error.
    Enforce,
}

impl FromStr for CreditLimitPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "soft" => Ok(CreditLimitPolicy::Soft),
            "enforce" => Ok(CreditLimitPolicy::Enforce),
            _ => Err(ConfigError::InvalidValue("TENDERO_CREDIT_LIMIT_POLICY".to_string())),
        }
    }
}

/// What a payment larger than the outstanding balance does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverpaymentPolicy {
    /// Refuse the payment with a validation error.
    Reject,
    /// Accept it; the balance goes negative (store owes the customer).
    Allow,
}

impl FromStr for OverpaymentPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(OverpaymentPolicy::Reject),
            "allow" => Ok(OverpaymentPolicy::Allow),
            _ => Err(ConfigError::InvalidValue("TENDERO_OVERPAYMENT_POLICY".to_string())),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Pool size
    pub db_max_connections: u32,

    /// How long a writer waits for the write lock, in milliseconds
    pub db_busy_timeout_ms: u64,

    /// Limit given to credit accounts opened by a deferred sale
    pub default_credit_limit_cents: i64,

    /// Days from opening until a credit account is due
    pub credit_term_days: i64,

    pub credit_limit_policy: CreditLimitPolicy,

    pub overpayment_policy: OverpaymentPolicy,

    /// Default threshold of the stagnant-stock report
    pub stagnant_days: i64,

    /// Events delivered per relay pass
    pub outbox_batch_size: u32,

    /// Delivery attempts before an event is left for inspection
    pub outbox_max_attempts: i64,

    /// Seconds between relay passes
    pub outbox_poll_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            db_path: PathBuf::from("tendero.db"),
            db_max_connections: 5,
            db_busy_timeout_ms: 5000,
            default_credit_limit_cents: 50_000,
            credit_term_days: 30,
            credit_limit_policy: CreditLimitPolicy::Soft,
            overpayment_policy: OverpaymentPolicy::Reject,
            stagnant_days: DEFAULT_STAGNANT_DAYS,
            outbox_batch_size: 50,
            outbox_max_attempts: 10,
            outbox_poll_secs: 5,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from any key lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            db_path: lookup("TENDERO_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),

            db_max_connections: parse_or(&lookup, "TENDERO_DB_MAX_CONNECTIONS", defaults.db_max_connections)?,

            db_busy_timeout_ms: parse_or(&lookup, "TENDERO_DB_BUSY_TIMEOUT_MS", defaults.db_busy_timeout_ms)?,

            default_credit_limit_cents: parse_or(
                &lookup,
                "TENDERO_DEFAULT_CREDIT_LIMIT_CENTS",
                defaults.default_credit_limit_cents,
            )?,

            credit_term_days: parse_or(&lookup, "TENDERO_CREDIT_TERM_DAYS", defaults.credit_term_days)?,

            credit_limit_policy: parse_or(&lookup, "TENDERO_CREDIT_LIMIT_POLICY", defaults.credit_limit_policy)?,

            overpayment_policy: parse_or(&lookup, "TENDERO_OVERPAYMENT_POLICY", defaults.overpayment_policy)?,

            stagnant_days: parse_or(&lookup, "TENDERO_STAGNANT_DAYS", defaults.stagnant_days)?,

            outbox_batch_size: parse_or(&lookup, "TENDERO_OUTBOX_BATCH_SIZE", defaults.outbox_batch_size)?,

            outbox_max_attempts: parse_or(&lookup, "TENDERO_OUTBOX_MAX_ATTEMPTS", defaults.outbox_max_attempts)?,

            outbox_poll_secs: parse_or(&lookup, "TENDERO_OUTBOX_POLL_SECS", defaults.outbox_poll_secs)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidValue("TENDERO_DB_MAX_CONNECTIONS".to_string()));
        }
        if self.default_credit_limit_cents < 0 {
            return Err(ConfigError::InvalidValue("TENDERO_DEFAULT_CREDIT_LIMIT_CENTS".to_string()));
        }
        if self.credit_term_days <= 0 {
            return Err(ConfigError::InvalidValue("TENDERO_CREDIT_TERM_DAYS".to_string()));
        }
        if self.stagnant_days < 0 {
            return Err(ConfigError::InvalidValue("TENDERO_STAGNANT_DAYS".to_string()));
        }
        if self.outbox_batch_size == 0 {
            return Err(ConfigError::InvalidValue("TENDERO_OUTBOX_BATCH_SIZE".to_string()));
        }
        if self.outbox_max_attempts <= 0 {
            return Err(ConfigError::InvalidValue("TENDERO_OUTBOX_MAX_ATTEMPTS".to_string()));
        }

        Ok(())
    }

    /// Pool settings for [`tendero_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.db_path.clone())
            .max_connections(self.db_max_connections)
            .busy_timeout(Duration::from_millis(self.db_busy_timeout_ms))
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_poll_secs.max(1))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}
