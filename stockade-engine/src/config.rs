//! Database Connection Pool Configuration
//!
//! PostgreSQL connection pooling via deadpool-postgres. Configuration
//! comes from `STOCKADE_DB_*` environment variables with sensible local
//! defaults.

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use stockade_core::{StoreError, StoreResult};
use tokio_postgres::NoTls;

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
    /// Upper bound on waiting for a product row lock inside a
    /// reservation transaction. Applied per-transaction via
    /// `SET LOCAL lock_timeout`.
    pub lock_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "stockade".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("STOCKADE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("STOCKADE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("STOCKADE_DB_NAME").unwrap_or_else(|_| "stockade".to_string()),
            user: std::env::var("STOCKADE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("STOCKADE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("STOCKADE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("STOCKADE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            lock_timeout: Duration::from_millis(
                std::env::var("STOCKADE_DB_LOCK_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> StoreResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool {
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}
