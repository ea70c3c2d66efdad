//! Configuration shared by every Riverwatch service

use crate::error::{Result, RiverwatchError};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub http_bind: String,
    /// Empty means no durable store is configured
    pub database_url: String,
    pub db_pool_size: usize,
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "riverwatch".to_string(),
            http_bind: "0.0.0.0:8000".to_string(),
            database_url: String::new(),
            db_pool_size: 16,
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            http_bind: env::var("HTTP_BIND").unwrap_or(defaults.http_bind),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            db_pool_size: env::var("DB_POOL_SIZE")
                .unwrap_or_else(|_| "16".to_string())
                .parse()
                .map_err(|e| RiverwatchError::Config(format!("Invalid DB_POOL_SIZE: {}", e)))?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logs: env::var("JSON_LOGS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        })
    }

    pub fn has_database(&self) -> bool {
        !self.database_url.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_database() {
        let config = ServiceConfig::default();
        assert!(!config.has_database());
        assert_eq!(config.db_pool_size, 16);
    }
}
