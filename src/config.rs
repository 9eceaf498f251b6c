// src/config.rs
use crate::domain::errors::{AppError, AppResult};
use dotenv::dotenv;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Reconciliation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Reconciliation thresholds and toggles
    pub recon: ReconConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Thresholds and toggles consumed by the reconciliation passes.
///
/// Every tolerance the passes use lives here; call sites never read the
/// environment directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconConfig {
    /// PnL ratio at or below which a position is force-closed (e.g. -0.10)
    pub loss_cut_ratio: Decimal,

    /// PnL ratio at or above which an unprotected profit is locked in
    pub profit_guard_ratio: Decimal,

    /// Absolute price tolerance for pending-order drift and SL/TP matching
    pub price_tolerance: Decimal,

    /// Absolute quantity tolerance for order/trade matching
    pub qty_tolerance: Decimal,

    /// Relative tolerance for filled-position drift self-healing
    pub drift_tolerance: Decimal,

    /// Absolute price tolerance when matching protective orders to SL/TP
    pub tp_sl_price_tolerance: Decimal,

    /// Tolerance for split-closure quantity sums
    pub split_sum_tolerance: Decimal,

    /// Safety margin subtracted from the history window start
    pub history_margin_minutes: i64,

    /// Purge orders/positions outside the account's selected market
    pub purge_other_symbols: bool,

    /// Short-circuit all exchange calls (local/offline environments)
    pub offline: bool,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            loss_cut_ratio: Decimal::new(-10, 2),      // -0.10
            profit_guard_ratio: Decimal::new(10, 2),   // 0.10
            price_tolerance: Decimal::new(1, 4),       // 0.0001
            qty_tolerance: Decimal::new(1, 6),         // 0.000001
            drift_tolerance: Decimal::new(2, 3),       // 0.002
            tp_sl_price_tolerance: Decimal::new(1, 2), // 0.01
            split_sum_tolerance: Decimal::new(1, 8),   // 1e-8
            history_margin_minutes: 5,
            purge_other_symbols: false,
            offline: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,

    /// Log to file
    pub to_file: bool,

    /// Log file path
    pub file_path: Option<String>,
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let defaults = ReconConfig::default();
        let recon = ReconConfig {
            loss_cut_ratio: env_decimal("LOSS_CUT_RATIO", defaults.loss_cut_ratio),
            profit_guard_ratio: env_decimal("PROFIT_GUARD_RATIO", defaults.profit_guard_ratio),
            price_tolerance: env_decimal("PRICE_TOLERANCE", defaults.price_tolerance),
            qty_tolerance: env_decimal("QTY_TOLERANCE", defaults.qty_tolerance),
            drift_tolerance: env_decimal("DRIFT_TOLERANCE", defaults.drift_tolerance),
            tp_sl_price_tolerance: env_decimal(
                "TP_SL_PRICE_TOLERANCE",
                defaults.tp_sl_price_tolerance,
            ),
            split_sum_tolerance: env_decimal("SPLIT_SUM_TOLERANCE", defaults.split_sum_tolerance),
            history_margin_minutes: env::var("HISTORY_MARGIN_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.history_margin_minutes),
            purge_other_symbols: env_bool(
                "FUTURES_STRICT_PURGE_OTHER_SYMBOLS",
                defaults.purge_other_symbols,
            ),
            offline: env_bool("APP_OFFLINE", defaults.offline),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            to_file: env_bool("LOG_TO_FILE", false),
            file_path: env::var("LOG_FILE_PATH").ok(),
        };

        Ok(Config { recon, logging })
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| AppError::Config(format!("Failed to open config file: {}", e)))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| AppError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();

        // Set log level
        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };

        builder.filter_level(log_level);

        // Configure output
        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path)
                    .map_err(|e| AppError::Config(format!("Failed to create log file: {}", e)))?;

                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        // Initialize the logger
        builder.init();

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recon: ReconConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                to_file: false,
                file_path: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_tolerances() {
        let config = ReconConfig::default();
        assert_eq!(config.loss_cut_ratio, dec!(-0.10));
        assert_eq!(config.profit_guard_ratio, dec!(0.10));
        assert_eq!(config.price_tolerance, dec!(0.0001));
        assert_eq!(config.qty_tolerance, dec!(0.000001));
        assert_eq!(config.drift_tolerance, dec!(0.002));
        assert_eq!(config.tp_sl_price_tolerance, dec!(0.01));
        assert_eq!(config.history_margin_minutes, 5);
        assert!(!config.purge_other_symbols);
    }

    #[test]
    fn config_file_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.recon.price_tolerance, config.recon.price_tolerance);
        assert_eq!(parsed.logging.level, config.logging.level);
    }
}
