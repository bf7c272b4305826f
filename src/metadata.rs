//! Metadata storage layer
//!
//! Persisted single-row-per-key bookkeeping in the `app_metadata` table:
//! application name, schema version, catalog fingerprint, migration and
//! last-sync timestamps. Rows are upserted by key.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use tokio_postgres::GenericClient;
use tracing::debug;

/// Well-known bookkeeping keys
pub mod keys {
    pub const APP_NAME: &str = "app_name";
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const CATALOG_FINGERPRINT: &str = "catalog_fingerprint";
    pub const SCHEMA_MIGRATED_AT: &str = "schema_migrated_at";
    pub const LAST_SYNC_AT: &str = "last_sync_at";
}

/// A bookkeeping row
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub meta_key: String,
    pub meta_value: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert a bookkeeping row on any client, including an open transaction.
///
/// Rebuild runs this inside its transaction (failure is fatal there); the
/// import pipeline runs it on a savepoint so a failure stays best-effort.
pub async fn upsert_with<C: GenericClient>(
    client: &C,
    key: &str,
    value: &str,
    description: Option<&str>,
) -> Result<(), tokio_postgres::Error> {
    let query = r#"
        INSERT INTO app_metadata (meta_key, meta_value, description, created_at, updated_at)
        VALUES ($1, $2, $3, now(), now())
        ON CONFLICT (meta_key) DO UPDATE
        SET meta_value = EXCLUDED.meta_value,
            description = COALESCE(EXCLUDED.description, app_metadata.description),
            updated_at = now()
    "#;

    client.execute(query, &[&key, &value, &description]).await?;
    Ok(())
}

/// Store service over the persisted bookkeeping table
pub struct MetadataStore {
    pool: Pool,
}

impl MetadataStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Upsert a value by key
    pub async fn upsert(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> EngineResult<()> {
        let client = self.pool.get().await?;
        let conn: &tokio_postgres::Client = &client;
        upsert_with(conn, key, value, description)
            .await
            .map_err(|e| EngineError::sync("app_metadata", format!("key {}", key), e))?;

        debug!("Upserted metadata key \"{}\"", key);
        Ok(())
    }

    /// Fetch a bookkeeping row by key
    pub async fn get(&self, key: &str) -> EngineResult<Option<MetadataEntry>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT meta_key, meta_value, description, created_at, updated_at
                 FROM app_metadata WHERE meta_key = $1",
                &[&key],
            )
            .await
            .map_err(EngineError::connectivity)?;

        Ok(row.map(|r| MetadataEntry {
            meta_key: r.get(0),
            meta_value: r.get(1),
            description: r.get(2),
            created_at: r.get(3),
            updated_at: r.get(4),
        }))
    }
}
