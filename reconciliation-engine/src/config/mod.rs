//! Configuration module for reconciliation-engine.

use crate::engine::Tolerance;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub history_page_size: u32,
    pub command_buffer: usize,
    pub store_retry: RetryConfig,
    /// Overrides the currency-derived tolerance when set.
    pub tolerance_minor_units: Option<u32>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: "reconciliation-engine".to_string(),
            history_page_size: 25,
            command_buffer: 64,
            store_retry: RetryConfig::default(),
            tolerance_minor_units: None,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = Self::default();

        let tolerance_minor_units = match env::var("RECON_TOLERANCE_MINOR_UNITS") {
            Ok(raw) => {
                let units: u32 = raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "RECON_TOLERANCE_MINOR_UNITS must be a non-negative integer, got {:?}",
                        raw
                    ))
                })?;
                if units > Tolerance::MAX_MINOR_UNITS {
                    return Err(AppError::ConfigError(anyhow::anyhow!(
                        "RECON_TOLERANCE_MINOR_UNITS must be at most {}",
                        Tolerance::MAX_MINOR_UNITS
                    )));
                }
                Some(units)
            }
            Err(_) => None,
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            history_page_size: env::var("RECON_HISTORY_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.history_page_size),
            command_buffer: env::var("RECON_COMMAND_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.command_buffer),
            store_retry: RetryConfig {
                max_retries: env::var("RECON_STORE_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.store_retry.max_retries),
                initial_backoff: env::var("RECON_STORE_INITIAL_BACKOFF_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.store_retry.initial_backoff),
                ..defaults.store_retry
            },
            tolerance_minor_units,
        })
    }

    /// Tolerance for a bank account in `currency`.
    pub fn tolerance_for(&self, currency: &str) -> Tolerance {
        match self.tolerance_minor_units {
            Some(units) => Tolerance::for_minor_units(units),
            None => Tolerance::for_currency(currency),
        }
    }
}
