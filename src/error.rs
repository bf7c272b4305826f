//! Error handling module
//!
//! Provides the engine-wide error taxonomy and connectivity classification.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Classified cause of a connectivity failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectivityKind {
    #[serde(rename = "authentication failed")]
    AuthenticationFailed,
    #[serde(rename = "host unreachable")]
    HostUnreachable,
    #[serde(rename = "target database absent")]
    DatabaseAbsent,
    #[serde(rename = "dns resolution failed")]
    DnsFailure,
    #[serde(rename = "unclassified")]
    Unclassified,
}

impl fmt::Display for ConnectivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectivityKind::AuthenticationFailed => "authentication failed",
            ConnectivityKind::HostUnreachable => "host unreachable",
            ConnectivityKind::DatabaseAbsent => "target database absent",
            ConnectivityKind::DnsFailure => "dns resolution failed",
            ConnectivityKind::Unclassified => "unclassified",
        };
        write!(f, "{}", label)
    }
}

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connectivity error ({kind}): {message}")]
    Connectivity {
        kind: ConnectivityKind,
        message: String,
    },

    #[error("Schema error on table \"{table}\": {message}")]
    Schema { table: String, message: String },

    #[error("Sync error on table \"{table}\" ({row}): {message}")]
    Sync {
        table: String,
        row: String,
        message: String,
    },
}

impl EngineError {
    /// Wrap a driver error as a classified connectivity failure
    pub fn connectivity(err: tokio_postgres::Error) -> Self {
        let (kind, message) = classify_db_error(&err);
        EngineError::Connectivity { kind, message }
    }

    /// Wrap a DDL failure with the table it was applied to
    pub fn schema(table: &str, err: tokio_postgres::Error) -> Self {
        EngineError::Schema {
            table: table.to_string(),
            message: err.to_string(),
        }
    }

    /// Wrap an import failure with the failing table and row context
    pub fn sync(table: &str, row: impl Into<String>, err: tokio_postgres::Error) -> Self {
        EngineError::Sync {
            table: table.to_string(),
            row: row.into(),
            message: err.to_string(),
        }
    }

    /// Classified connectivity cause, if this is a connectivity error
    pub fn connectivity_kind(&self) -> Option<ConnectivityKind> {
        match self {
            EngineError::Connectivity { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<deadpool_postgres::PoolError> for EngineError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(e) => EngineError::connectivity(e),
            deadpool_postgres::PoolError::Timeout(_) => EngineError::Connectivity {
                kind: ConnectivityKind::HostUnreachable,
                message: "timed out waiting for a database connection".to_string(),
            },
            other => EngineError::Connectivity {
                kind: ConnectivityKind::Unclassified,
                message: other.to_string(),
            },
        }
    }
}

/// Classify a driver error into the connectivity taxonomy.
///
/// Server-reported errors carry a SQLSTATE code and are matched on it;
/// everything else (socket, DNS, TLS) only has a message to go on.
pub fn classify_db_error(err: &tokio_postgres::Error) -> (ConnectivityKind, String) {
    if let Some(db) = err.as_db_error() {
        let code = db.code();
        let kind = if code == &SqlState::INVALID_PASSWORD
            || code == &SqlState::INVALID_AUTHORIZATION_SPECIFICATION
        {
            ConnectivityKind::AuthenticationFailed
        } else if code == &SqlState::INVALID_CATALOG_NAME {
            ConnectivityKind::DatabaseAbsent
        } else {
            ConnectivityKind::Unclassified
        };
        return (kind, db.message().to_string());
    }

    let message = err.to_string();
    (classify_message(&message), message)
}

/// Message-based fallback classification for errors without a SQLSTATE
pub fn classify_message(message: &str) -> ConnectivityKind {
    let lower = message.to_lowercase();

    if lower.contains("password authentication failed")
        || lower.contains("authentication failed")
    {
        ConnectivityKind::AuthenticationFailed
    } else if lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("nodename nor servname")
        || lower.contains("no such host")
    {
        ConnectivityKind::DnsFailure
    } else if lower.contains("connection refused")
        || lower.contains("timed out")
        || lower.contains("network unreachable")
        || lower.contains("no route to host")
    {
        ConnectivityKind::HostUnreachable
    } else if lower.contains("database") && lower.contains("does not exist") {
        ConnectivityKind::DatabaseAbsent
    } else {
        ConnectivityKind::Unclassified
    }
}

/// Result type alias for fallible engine internals
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_dns_failure() {
        let kind = classify_message("error connecting to server: failed to lookup address information");
        assert_eq!(kind, ConnectivityKind::DnsFailure);
    }

    #[test]
    fn test_classify_connection_refused() {
        let kind = classify_message("error connecting to server: Connection refused (os error 111)");
        assert_eq!(kind, ConnectivityKind::HostUnreachable);
    }

    #[test]
    fn test_classify_auth_failure() {
        let kind = classify_message("db error: FATAL: password authentication failed for user \"pantry\"");
        assert_eq!(kind, ConnectivityKind::AuthenticationFailed);
    }

    #[test]
    fn test_classify_missing_database() {
        let kind = classify_message("db error: FATAL: database \"pantry\" does not exist");
        assert_eq!(kind, ConnectivityKind::DatabaseAbsent);
    }

    #[test]
    fn test_classify_unknown_message() {
        let kind = classify_message("something completely unexpected");
        assert_eq!(kind, ConnectivityKind::Unclassified);
    }

    #[test]
    fn test_dns_checked_before_host() {
        // Lookup failures must not fall into the host-unreachable bucket
        let kind = classify_message("failed to lookup address information: Name or service not known");
        assert_eq!(kind, ConnectivityKind::DnsFailure);
    }

    #[test]
    fn test_connectivity_kind_serializes_with_spaces() {
        let json = serde_json::to_string(&ConnectivityKind::AuthenticationFailed).unwrap();
        assert_eq!(json, "\"authentication failed\"");
        let json = serde_json::to_string(&ConnectivityKind::DatabaseAbsent).unwrap();
        assert_eq!(json, "\"target database absent\"");
    }

    #[test]
    fn test_sync_error_names_table_and_row() {
        let err = EngineError::Sync {
            table: "articles".to_string(),
            row: "sourceId a1".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Sync error on table \"articles\" (sourceId a1): boom"
        );
    }
}
