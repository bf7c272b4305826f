//! Connection tester
//!
//! Pre-flight validation of configuration and connectivity, run before any
//! schema or import operation. Malformed input is rejected before a single
//! network call; real connection failures are classified into a small fixed
//! taxonomy for the caller.

use crate::config::DatabaseConfig;
use crate::error::{ConnectivityKind, EngineError, EngineResult};
use crate::pool;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, warn};

/// Result of testing a connection
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classified_cause: Option<ConnectivityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

impl ConnectionResult {
    fn rejected(err: EngineError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            classified_cause: err.connectivity_kind(),
            latency_ms: None,
            server_version: None,
        }
    }
}

pub struct ConnectionTester;

impl ConnectionTester {
    /// Validate the configuration, then probe the database once.
    ///
    /// Opens a single-connection pool, issues one minimal query, and closes
    /// the pool on every path.
    pub async fn test(config: &DatabaseConfig) -> ConnectionResult {
        if let Err(err) = config.validated() {
            return ConnectionResult::rejected(err);
        }

        let probe_pool = match pool::create_probe_pool(config) {
            Ok(probe_pool) => probe_pool,
            Err(err) => return ConnectionResult::rejected(err),
        };

        let start = Instant::now();
        let outcome = Self::probe(&probe_pool).await;
        probe_pool.close();

        match outcome {
            Ok(server_version) => {
                let latency = start.elapsed();
                debug!(
                    "Connection test succeeded for {} in {}ms",
                    config.display_string(),
                    latency.as_millis()
                );
                ConnectionResult {
                    success: true,
                    message: format!("Connected to {}", config.display_string()),
                    classified_cause: None,
                    latency_ms: Some(latency.as_millis() as u64),
                    server_version: Some(server_version),
                }
            }
            Err(err) => {
                warn!("Connection test failed for {}: {}", config.display_string(), err);
                ConnectionResult::rejected(err)
            }
        }
    }

    async fn probe(probe_pool: &deadpool_postgres::Pool) -> EngineResult<String> {
        let client = probe_pool.get().await?;
        let row = client
            .query_one("SELECT version()", &[])
            .await
            .map_err(EngineError::connectivity)?;
        Ok(row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_port_rejected_before_io() {
        let config = DatabaseConfig {
            port: 0,
            ..DatabaseConfig::default()
        };

        let result = tokio_test::block_on(ConnectionTester::test(&config));

        assert!(!result.success);
        assert!(result.message.contains("port"));
        // Validation failures carry no connectivity classification
        assert!(result.classified_cause.is_none());
        assert!(result.latency_ms.is_none());
    }

    #[tokio::test]
    async fn test_empty_database_name_rejected_before_io() {
        let config = DatabaseConfig {
            database: String::new(),
            ..DatabaseConfig::default()
        };

        let result = ConnectionTester::test(&config).await;

        assert!(!result.success);
        assert!(result.message.contains("database"));
    }

    #[test]
    fn test_rejected_result_serializes_without_optional_fields() {
        let result = ConnectionResult::rejected(EngineError::Config("port out of range".into()));
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["success"], false);
        assert!(json.get("classifiedCause").is_none());
        assert!(json.get("latencyMs").is_none());
    }

    #[test]
    fn test_connectivity_error_keeps_classification() {
        let err = EngineError::Connectivity {
            kind: ConnectivityKind::AuthenticationFailed,
            message: "password authentication failed".to_string(),
        };
        let result = ConnectionResult::rejected(err);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["classifiedCause"], "authentication failed");
    }
}
