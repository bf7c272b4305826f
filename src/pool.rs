//! Connection pool construction
//!
//! Builds explicitly owned deadpool pools from a validated configuration.
//! There is no shared or global pool: callers construct one and pass it to
//! each engine component, which keeps test substitution straightforward.

use crate::config::DatabaseConfig;
use crate::error::EngineError;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::debug;

/// Connection-establishment timeout; no query-level timeout is applied
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a connection pool sized per the configuration
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, EngineError> {
    create_pool_sized(config, config.pool_size)
}

/// Create a single-connection pool for pre-flight probes
pub fn create_probe_pool(config: &DatabaseConfig) -> Result<Pool, EngineError> {
    create_pool_sized(config, 1)
}

fn create_pool_sized(config: &DatabaseConfig, max_size: usize) -> Result<Pool, EngineError> {
    config.validated()?;

    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.username.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let mut pool_cfg = PoolConfig::new(max_size);
    pool_cfg.timeouts.create = Some(CONNECT_TIMEOUT);
    pool_cfg.timeouts.wait = Some(CONNECT_TIMEOUT);
    cfg.pool = Some(pool_cfg);

    let pool = if config.tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| EngineError::Config(format!("Failed to create TLS pool: {}", e)))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| EngineError::Config(format!("Failed to create pool: {}", e)))?
    };

    debug!(
        "Created pool (max {}) for {}",
        max_size,
        config.display_string()
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_pool_without_io() {
        // Pool construction is lazy; no connection is opened here
        let config = DatabaseConfig::default();
        let pool = create_pool(&config).unwrap();
        assert_eq!(pool.status().max_size, config.pool_size);
    }

    #[test]
    fn test_probe_pool_is_single_connection() {
        let pool = create_probe_pool(&DatabaseConfig::default()).unwrap();
        assert_eq!(pool.status().max_size, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_pool_creation() {
        let config = DatabaseConfig {
            host: String::new(),
            ..DatabaseConfig::default()
        };
        assert!(create_pool(&config).is_err());
    }
}
