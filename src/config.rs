use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::runloop::DispatchMode;

impl FromStr for DispatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" | "single" => Ok(DispatchMode::Direct),
            "executor" | "multi" => Ok(DispatchMode::Executor),
            other => Err(ConfigError::InvalidValue(format!(
                "TABLECAST_DISPATCH_MODE must be 'direct' or 'executor', got '{other}'"
            ))),
        }
    }
}

/// Server configuration loaded from environment variables. Fixed at process
/// start; nothing here is mutable at runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    /// Path to the well-log CSV dataset
    pub data_path: PathBuf,
    /// Name the table is hosted under
    pub table_name: String,
    /// Row capacity of the streamed table (the visible window size)
    pub max_rows: usize,
    /// Nominal tick period
    pub tick_interval: Duration,
    /// Jitter fraction applied per tick
    pub tick_jitter: f64,
    /// Cross-thread dispatch mode
    pub dispatch_mode: DispatchMode,
    /// Blocking-pool size used by executor mode
    pub executor_threads: usize,
    /// Deadline for cross-thread calls
    pub dispatch_timeout: Duration,
    /// Directory of viewer UI assets
    pub static_dir: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables. Invalid values are
    /// fatal; the process must not start with them.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_rows: usize = env::var("TABLECAST_MAX_ROWS")
            .unwrap_or_else(|_| "200".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("TABLECAST_MAX_ROWS".to_string()))?;
        if max_rows == 0 {
            return Err(ConfigError::InvalidValue(
                "TABLECAST_MAX_ROWS must be positive".to_string(),
            ));
        }

        let tick_ms: u64 = env::var("TABLECAST_TICK_INTERVAL_MS")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("TABLECAST_TICK_INTERVAL_MS".to_string()))?;
        if tick_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "TABLECAST_TICK_INTERVAL_MS must be positive".to_string(),
            ));
        }

        let tick_jitter: f64 = env::var("TABLECAST_TICK_JITTER")
            .unwrap_or_else(|_| "0.1".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("TABLECAST_TICK_JITTER".to_string()))?;
        if !(0.0..=1.0).contains(&tick_jitter) {
            return Err(ConfigError::InvalidValue(
                "TABLECAST_TICK_JITTER must be in [0, 1]".to_string(),
            ));
        }

        let port: u16 = env::var("TABLECAST_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let executor_threads: usize = env::var("TABLECAST_EXECUTOR_THREADS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("TABLECAST_EXECUTOR_THREADS".to_string()))?;
        if executor_threads == 0 {
            return Err(ConfigError::InvalidValue(
                "TABLECAST_EXECUTOR_THREADS must be positive".to_string(),
            ));
        }

        Ok(Self {
            port,
            bind_addr: env::var("TABLECAST_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            data_path: env::var("TABLECAST_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("archive/well_log.csv")),
            table_name: env::var("TABLECAST_TABLE_NAME")
                .unwrap_or_else(|_| "data_source_one".to_string()),
            max_rows,
            tick_interval: Duration::from_millis(tick_ms),
            tick_jitter,
            dispatch_mode: env::var("TABLECAST_DISPATCH_MODE")
                .unwrap_or_else(|_| "executor".to_string())
                .parse()?,
            executor_threads,
            dispatch_timeout: Duration::from_millis(
                env::var("TABLECAST_DISPATCH_TIMEOUT_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .map_err(|_| {
                        ConfigError::InvalidValue("TABLECAST_DISPATCH_TIMEOUT_MS".to_string())
                    })?,
            ),
            static_dir: env::var("TABLECAST_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        })
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_mode_parses_both_spellings() {
        assert_eq!("direct".parse::<DispatchMode>().unwrap(), DispatchMode::Direct);
        assert_eq!("multi".parse::<DispatchMode>().unwrap(), DispatchMode::Executor);
        assert!("both".parse::<DispatchMode>().is_err());
    }

    // One test so the env mutations can't interleave with each other
    #[test]
    fn zero_values_are_fatal_at_load() {
        env::set_var("TABLECAST_EXECUTOR_THREADS", "0");
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::InvalidValue(msg)) if msg.contains("TABLECAST_EXECUTOR_THREADS")
        ));
        env::remove_var("TABLECAST_EXECUTOR_THREADS");

        env::set_var("TABLECAST_PORT", "0");
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::InvalidPort)
        ));
        env::remove_var("TABLECAST_PORT");

        env::set_var("TABLECAST_MAX_ROWS", "0");
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::InvalidValue(_))
        ));
        env::remove_var("TABLECAST_MAX_ROWS");

        assert!(ServerConfig::from_env().is_ok());
    }
}
