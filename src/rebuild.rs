//! Schema rebuild
//!
//! Destructive drop-and-recreate path used for structural version
//! migrations. Backups are taken best-effort before anything destructive
//! runs; the drop/recreate/bookkeeping sequence executes in a single
//! transaction, so any failure leaves the database exactly as it was.
//! This path must only run on an explicit operator-triggered call.

use crate::catalog::{
    backup_table_sql, create_index_sql, create_table_sql, drop_backup_sql, drop_table_sql, Catalog,
    BACKUP_SUFFIX,
};
use crate::error::{EngineError, EngineResult};
use crate::metadata::{self, keys};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use tracing::{info, warn};

/// Result of a rebuild run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildResult {
    pub success: bool,
    pub message: String,
    pub tables_rebuilt: Vec<String>,
    /// Backup copies left behind for the operator to inspect or drop
    pub backups_created: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RebuildResult {
    fn failure(err: EngineError, backups_created: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            success: false,
            message: "Schema rebuild failed; transaction rolled back".to_string(),
            tables_rebuilt: Vec::new(),
            backups_created,
            warnings,
            migrated_at: None,
            error: Some(err.to_string()),
        }
    }
}

/// Executes the destructive full-rebuild path
pub struct SchemaRebuilder {
    pool: Pool,
}

impl SchemaRebuilder {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Back up, drop, and recreate every managed table from the catalog.
    pub async fn rebuild(&self, catalog: &Catalog) -> RebuildResult {
        let mut client = match self.pool.get().await {
            Ok(client) => client,
            Err(e) => return RebuildResult::failure(e.into(), Vec::new(), Vec::new()),
        };

        // Step 1: best-effort row copies, outside the transaction. A missing
        // table (first deployment) or an older backup that will not drop is
        // a warning, never an abort. The copies are left for the operator;
        // the engine never deletes them except to make room for the next
        // backup of the same table.
        let mut backups_created = Vec::new();
        let mut warnings = Vec::new();

        for table in catalog.tables() {
            if let Err(e) = client.execute(&drop_backup_sql(table.name), &[]).await {
                warnings.push(format!(
                    "could not clear previous backup of \"{}\": {}",
                    table.name, e
                ));
                continue;
            }
            match client.execute(&backup_table_sql(table.name), &[]).await {
                Ok(_) => backups_created.push(format!("{}{}", table.name, BACKUP_SUFFIX)),
                Err(e) => warnings.push(format!("backup of \"{}\" skipped: {}", table.name, e)),
            }
        }

        for warning in &warnings {
            warn!("{}", warning);
        }

        // Steps 2-6: one transaction; dropping the guard aborts it
        let conn: &mut tokio_postgres::Client = &mut client;
        match Self::rebuild_in_transaction(conn, catalog).await {
            Ok((tables_rebuilt, migrated_at)) => {
                info!(
                    "Rebuilt {} tables at catalog version {}",
                    tables_rebuilt.len(),
                    catalog.version
                );
                RebuildResult {
                    success: true,
                    message: format!("Rebuilt {} table(s) from the catalog", tables_rebuilt.len()),
                    tables_rebuilt,
                    backups_created,
                    warnings,
                    migrated_at: Some(migrated_at),
                    error: None,
                }
            }
            Err(err) => {
                warn!("Rebuild failed, rolled back: {}", err);
                RebuildResult::failure(err, backups_created, warnings)
            }
        }
    }

    async fn rebuild_in_transaction(
        client: &mut tokio_postgres::Client,
        catalog: &Catalog,
    ) -> EngineResult<(Vec<String>, DateTime<Utc>)> {
        let transaction = client
            .transaction()
            .await
            .map_err(EngineError::connectivity)?;

        // Drop children before parents
        for table in catalog.tables().iter().rev() {
            transaction
                .execute(&drop_table_sql(table.name), &[])
                .await
                .map_err(|e| EngineError::schema(table.name, e))?;
        }

        // Recreate parents before children, indexes included
        let mut tables_rebuilt = Vec::new();
        for table in catalog.tables() {
            transaction
                .execute(&create_table_sql(table), &[])
                .await
                .map_err(|e| EngineError::schema(table.name, e))?;

            for index in &table.indexes {
                transaction
                    .execute(&create_index_sql(table.name, index), &[])
                    .await
                    .map_err(|e| EngineError::schema(table.name, e))?;
            }

            tables_rebuilt.push(table.name.to_string());
        }

        // Step 5: bookkeeping inside the transaction; a failure here rolls
        // the whole rebuild back like any other step.
        let migrated_at = Utc::now();
        metadata::upsert_with(
            &transaction,
            keys::SCHEMA_VERSION,
            catalog.version,
            Some("catalog version the schema was last rebuilt from"),
        )
        .await
        .map_err(|e| EngineError::schema("app_metadata", e))?;

        metadata::upsert_with(
            &transaction,
            keys::CATALOG_FINGERPRINT,
            &catalog.fingerprint(),
            Some("checksum of the declared catalog shape"),
        )
        .await
        .map_err(|e| EngineError::schema("app_metadata", e))?;

        metadata::upsert_with(
            &transaction,
            keys::SCHEMA_MIGRATED_AT,
            &migrated_at.to_rfc3339(),
            Some("timestamp of the last schema rebuild"),
        )
        .await
        .map_err(|e| EngineError::schema("app_metadata", e))?;

        transaction
            .commit()
            .await
            .map_err(EngineError::connectivity)?;

        Ok((tables_rebuilt, migrated_at))
    }
}
