//! # Lending Configuration
//!
//! Configuration management for the lending engine and the sweeper.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     LIBRIS_DB_PATH=/var/lib/libris/libris.db                           │
//! │     LIBRIS_FINE_RATE_CENTS=25                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/libris/libris.toml (Linux)                               │
//! │     ~/Library/Application Support/org.libris.libris/libris.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     10 cents per overdue day, 14 day blacklist window                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # libris.toml
//! [database]
//! path = "./libris.db"
//! max_connections = 5
//! busy_timeout_ms = 2000
//!
//! [policy]
//! fine_rate_cents = 10
//! blacklist_window_days = 14
//! default_period_value = 14
//! default_period_unit = "days"
//!
//! [sweep]
//! enabled = true
//! interval_secs = 300
//!
//! [timeouts]
//! operation_ms = 5000
//! ```
//!
//! The `[policy]` section becomes an explicit [`LibraryPolicy`] value via
//! [`LendingConfig::policy`]; nothing reads it from a global.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use libris_core::validation::{validate_blacklist_window_days, validate_fine_rate};
use libris_core::{LibraryPolicy, LoanPeriod, Money};
use libris_db::DbConfig;

use crate::error::{LendingError, LendingResult};

// =============================================================================
// Database Settings
// =============================================================================

/// Where the SQLite file lives and how the pool behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a statement waits on a SQLite lock before failing busy.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("libris.db")
}
fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout() -> u64 {
    2_000
}
fn default_acquire_timeout() -> u64 {
    3_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }
}

// =============================================================================
// Policy Settings
// =============================================================================

/// Library-wide lending policy as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Fine per started overdue day, in minor units.
    #[serde(default = "default_fine_rate")]
    pub fine_rate_cents: i64,

    #[serde(default = "default_blacklist_window")]
    pub blacklist_window_days: i64,

    /// Loan period given to new titles that don't name one.
    #[serde(default = "default_period_value")]
    pub default_period_value: i64,

    #[serde(default = "default_period_unit")]
    pub default_period_unit: String,
}

fn default_fine_rate() -> i64 {
    libris_core::DEFAULT_FINE_RATE_CENTS
}
fn default_blacklist_window() -> i64 {
    libris_core::DEFAULT_BLACKLIST_WINDOW_DAYS
}
fn default_period_value() -> i64 {
    LoanPeriod::default().value()
}
fn default_period_unit() -> String {
    LoanPeriod::default().unit().as_str().to_string()
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            fine_rate_cents: default_fine_rate(),
            blacklist_window_days: default_blacklist_window(),
            default_period_value: default_period_value(),
            default_period_unit: default_period_unit(),
        }
    }
}

// =============================================================================
// Sweep Settings
// =============================================================================

/// Periodic overdue sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_sweep_interval() -> u64 {
    300
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Backoff for `Transient` failures, see [`crate::retry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Give up once this much time has passed since the first attempt.
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

fn default_initial_backoff() -> u64 {
    50
}
fn default_max_backoff() -> u64 {
    2_000
}
fn default_max_elapsed() -> u64 {
    15_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

// =============================================================================
// Timeout Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Deadline for one engine operation, storage included.
    #[serde(default = "default_operation_timeout")]
    pub operation_ms: u64,
}

fn default_operation_timeout() -> u64 {
    5_000
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            operation_ms: default_operation_timeout(),
        }
    }
}

// =============================================================================
// Main Lending Configuration
// =============================================================================

/// Complete lending configuration.
///
/// ## Example Config File
/// ```toml
/// [database]
/// path = "/var/lib/libris/libris.db"
///
/// [policy]
/// fine_rate_cents = 25
/// blacklist_window_days = 7
///
/// [sweep]
/// interval_secs = 60
///
/// [retry]
/// initial_backoff_ms = 50
/// max_backoff_ms = 2000
/// max_elapsed_ms = 15000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LendingConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub policy: PolicySettings,

    #[serde(default)]
    pub sweep: SweepSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl LendingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (libris.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> LendingResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading lending config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> LendingResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| LendingError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Lending config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> LendingResult<()> {
        // Policy values go through the same checks the engine relies on
        self.policy().map_err(|e| LendingError::InvalidConfig(e.to_string()))?;

        if self.database.path.as_os_str().is_empty() {
            return Err(LendingError::InvalidConfig("database.path is empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(LendingError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.sweep.interval_secs == 0 {
            return Err(LendingError::InvalidConfig(
                "sweep.interval_secs must be greater than 0".into(),
            ));
        }

        if self.timeouts.operation_ms == 0 {
            return Err(LendingError::InvalidConfig(
                "timeouts.operation_ms must be greater than 0".into(),
            ));
        }

        // A lock wait must give up before the operation deadline does.
        if self.database.busy_timeout_ms >= self.timeouts.operation_ms {
            return Err(LendingError::InvalidConfig(
                "database.busy_timeout_ms must be less than timeouts.operation_ms".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(LendingError::InvalidConfig(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LIBRIS_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(rate) = std::env::var("LIBRIS_FINE_RATE_CENTS") {
            match rate.parse::<i64>() {
                Ok(r) => self.policy.fine_rate_cents = r,
                Err(_) => warn!(value = %rate, "Ignoring non-numeric LIBRIS_FINE_RATE_CENTS"),
            }
        }

        if let Ok(days) = std::env::var("LIBRIS_BLACKLIST_WINDOW_DAYS") {
            match days.parse::<i64>() {
                Ok(d) => self.policy.blacklist_window_days = d,
                Err(_) => warn!(value = %days, "Ignoring non-numeric LIBRIS_BLACKLIST_WINDOW_DAYS"),
            }
        }

        if let Ok(secs) = std::env::var("LIBRIS_SWEEP_INTERVAL_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                debug!(interval_secs = s, "Overriding sweep interval from environment");
                self.sweep.interval_secs = s;
            }
        }

        if let Ok(ms) = std::env::var("LIBRIS_OPERATION_TIMEOUT_MS") {
            if let Ok(m) = ms.parse::<u64>() {
                self.timeouts.operation_ms = m;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "libris", "libris")
            .map(|dirs| dirs.config_dir().join("libris.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The explicit policy value handed to the engine.
    pub fn policy(&self) -> LendingResult<LibraryPolicy> {
        let fine_rate_per_day = Money::from_cents(self.policy.fine_rate_cents);
        validate_fine_rate(fine_rate_per_day)?;
        validate_blacklist_window_days(self.policy.blacklist_window_days)?;
        let default_period = LoanPeriod::parse(
            self.policy.default_period_value,
            &self.policy.default_period_unit,
        )?;

        Ok(LibraryPolicy {
            fine_rate_per_day,
            blacklist_window_days: self.policy.blacklist_window_days,
            default_period,
        })
    }

    /// Pool configuration for [`libris_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
            .acquire_timeout(Duration::from_millis(self.database.acquire_timeout_ms))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.operation_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep.interval_secs)
    }
}
