//! Schema reconciliation
//!
//! Non-destructive diff-and-patch between the declared catalog and a live
//! snapshot: missing tables are created, missing columns are added, and
//! nothing is ever altered or dropped. Each DDL statement is independent and
//! additive, so reconciliation is safe to re-run after a partial failure:
//! the fresh snapshot shows already-applied changes as already present.

use crate::catalog::{add_column_sql, create_index_sql, create_table_sql, Catalog};
use crate::error::{EngineError, EngineResult};
use crate::introspect::{PostgresIntrospector, SchemaSnapshot};
use deadpool_postgres::Pool;
use serde::Serialize;
use tracing::{info, warn};

/// A single planned additive change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SchemaChange {
    CreateTable { table: String },
    AddColumn { table: String, column: String },
}

/// Output of the pure planning step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilePlan {
    pub changes: Vec<SchemaChange>,
    /// Live columns the catalog does not know about; reported, never touched
    pub warnings: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Diff the declared catalog against a live snapshot.
///
/// Table creations are ordered before column additions, and both follow
/// catalog order, so referenced tables exist before anything references
/// them.
pub fn plan_changes(catalog: &Catalog, snapshot: &SchemaSnapshot) -> ReconcilePlan {
    let mut changes = Vec::new();
    let mut warnings = Vec::new();

    for table in catalog.tables() {
        if !snapshot.has_table(table.name) {
            changes.push(SchemaChange::CreateTable {
                table: table.name.to_string(),
            });
        }
    }

    for table in catalog.tables() {
        let live_columns = match snapshot.columns(table.name) {
            Some(columns) => columns,
            None => continue, // covered by CreateTable above
        };

        for column in &table.columns {
            if !live_columns.contains(column.name) {
                changes.push(SchemaChange::AddColumn {
                    table: table.name.to_string(),
                    column: column.name.to_string(),
                });
            }
        }

        for live_column in live_columns {
            if table.column(live_column).is_none() {
                warnings.push(format!(
                    "column \"{}\".\"{}\" exists in the database but is not declared; leaving it untouched",
                    table.name, live_column
                ));
            }
        }
    }

    ReconcilePlan { changes, warnings }
}

/// Result of a reconcile run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub success: bool,
    pub message: String,
    /// True when the live schema already matched the catalog
    pub up_to_date: bool,
    pub tables_created: Vec<String>,
    /// Applied additions as "table.column"
    pub columns_added: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconcileResult {
    fn failure(err: EngineError) -> Self {
        Self {
            success: false,
            message: "Schema reconciliation failed".to_string(),
            up_to_date: false,
            tables_created: Vec::new(),
            columns_added: Vec::new(),
            warnings: Vec::new(),
            error: Some(err.to_string()),
        }
    }
}

/// Executes reconcile plans against a live database
pub struct SchemaReconciler {
    pool: Pool,
}

impl SchemaReconciler {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Bring the live schema up to the catalog, additively.
    ///
    /// Deliberately not transactional: every statement is idempotent on
    /// re-run, and a partial failure leaves a strictly closer-to-target
    /// schema behind.
    pub async fn reconcile(&self, catalog: &Catalog) -> ReconcileResult {
        match self.try_reconcile(catalog).await {
            Ok(result) => result,
            Err(err) => {
                warn!("Reconcile failed: {}", err);
                ReconcileResult::failure(err)
            }
        }
    }

    async fn try_reconcile(&self, catalog: &Catalog) -> EngineResult<ReconcileResult> {
        let snapshot = PostgresIntrospector::describe(&self.pool).await?;
        let plan = plan_changes(catalog, &snapshot);

        if plan.is_empty() {
            info!("Schema is up to date ({} live tables)", snapshot.table_count());
            return Ok(ReconcileResult {
                success: true,
                message: "Schema is up to date".to_string(),
                up_to_date: true,
                tables_created: Vec::new(),
                columns_added: Vec::new(),
                warnings: plan.warnings,
                error: None,
            });
        }

        let client = self.pool.get().await?;

        let mut tables_created = Vec::new();
        let mut columns_added = Vec::new();

        for change in &plan.changes {
            match change {
                SchemaChange::CreateTable { table } => {
                    // Plans are derived from the catalog, so the spec lookup
                    // cannot miss; guard anyway rather than panic mid-DDL.
                    let spec = catalog.find_table(table).ok_or_else(|| EngineError::Schema {
                        table: table.clone(),
                        message: "table missing from catalog".to_string(),
                    })?;

                    client
                        .execute(&create_table_sql(spec), &[])
                        .await
                        .map_err(|e| EngineError::schema(table, e))?;

                    for index in &spec.indexes {
                        client
                            .execute(&create_index_sql(spec.name, index), &[])
                            .await
                            .map_err(|e| EngineError::schema(table, e))?;
                    }

                    info!("Created table \"{}\"", table);
                    tables_created.push(table.clone());
                }
                SchemaChange::AddColumn { table, column } => {
                    let spec = catalog
                        .find_table(table)
                        .and_then(|t| t.column(column))
                        .ok_or_else(|| EngineError::Schema {
                            table: table.clone(),
                            message: format!("column \"{}\" missing from catalog", column),
                        })?;

                    client
                        .execute(&add_column_sql(table, spec), &[])
                        .await
                        .map_err(|e| EngineError::schema(table, e))?;

                    info!("Added column \"{}\".\"{}\"", table, column);
                    columns_added.push(format!("{}.{}", table, column));
                }
            }
        }

        for warning in &plan.warnings {
            warn!("{}", warning);
        }

        Ok(ReconcileResult {
            success: true,
            message: format!(
                "Applied {} schema change(s)",
                tables_created.len() + columns_added.len()
            ),
            up_to_date: false,
            tables_created,
            columns_added,
            warnings: plan.warnings,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use pretty_assertions::assert_eq;

    fn live(tables: &[(&str, &[&str])]) -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::empty();
        for (name, columns) in tables {
            snapshot.tables.insert(
                name.to_string(),
                columns.iter().map(|c| c.to_string()).collect(),
            );
        }
        snapshot
    }

    #[test]
    fn test_empty_database_creates_every_table() {
        let catalog = default_catalog();
        let plan = plan_changes(&catalog, &SchemaSnapshot::empty());

        let created: Vec<&str> = plan
            .changes
            .iter()
            .map(|c| match c {
                SchemaChange::CreateTable { table } => table.as_str(),
                other => panic!("unexpected change on empty database: {:?}", other),
            })
            .collect();

        assert_eq!(created, catalog.table_names());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_plan_is_empty_when_schema_matches() {
        let catalog = default_catalog();
        let mut snapshot = SchemaSnapshot::empty();
        for table in catalog.tables() {
            snapshot.tables.insert(
                table.name.to_string(),
                table.columns.iter().map(|c| c.name.to_string()).collect(),
            );
        }

        let plan = plan_changes(&catalog, &snapshot);
        assert!(plan.is_empty());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_missing_column_is_added_not_recreated() {
        let catalog = default_catalog();
        // suppliers exists but lacks everything except id and name
        let mut snapshot = live(&[("suppliers", &["id", "name"])]);
        for table in catalog.tables().iter().skip(1) {
            snapshot.tables.insert(
                table.name.to_string(),
                table.columns.iter().map(|c| c.name.to_string()).collect(),
            );
        }

        let plan = plan_changes(&catalog, &snapshot);

        assert!(plan
            .changes
            .iter()
            .all(|c| !matches!(c, SchemaChange::CreateTable { .. })));
        assert!(plan.changes.contains(&SchemaChange::AddColumn {
            table: "suppliers".to_string(),
            column: "email".to_string(),
        }));
    }

    #[test]
    fn test_tables_planned_before_columns() {
        let catalog = default_catalog();
        let snapshot = live(&[("suppliers", &["id"])]);
        let plan = plan_changes(&catalog, &snapshot);

        let first_column = plan
            .changes
            .iter()
            .position(|c| matches!(c, SchemaChange::AddColumn { .. }))
            .unwrap();
        let last_table = plan
            .changes
            .iter()
            .rposition(|c| matches!(c, SchemaChange::CreateTable { .. }))
            .unwrap();

        assert!(last_table < first_column);
    }

    #[test]
    fn test_unmanaged_column_warns_but_is_not_dropped() {
        let catalog = default_catalog();
        let mut snapshot = live(&[]);
        for table in catalog.tables() {
            let mut columns: std::collections::HashSet<String> =
                table.columns.iter().map(|c| c.name.to_string()).collect();
            if table.name == "suppliers" {
                columns.insert("legacy_code".to_string());
            }
            snapshot.tables.insert(table.name.to_string(), columns);
        }

        let plan = plan_changes(&catalog, &snapshot);

        // Monotonic safety: nothing to apply, only a warning
        assert!(plan.is_empty());
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("legacy_code"));
    }

    #[test]
    fn test_replan_after_apply_is_empty() {
        // Scenario A: applying the plan then re-planning yields no changes
        let catalog = default_catalog();
        let mut snapshot = SchemaSnapshot::empty();

        let first = plan_changes(&catalog, &snapshot);
        assert!(!first.is_empty());

        // Simulate applying every planned change to the live schema
        for change in &first.changes {
            match change {
                SchemaChange::CreateTable { table } => {
                    let spec = catalog.find_table(table).unwrap();
                    snapshot.tables.insert(
                        table.clone(),
                        spec.columns.iter().map(|c| c.name.to_string()).collect(),
                    );
                }
                SchemaChange::AddColumn { table, column } => {
                    snapshot
                        .tables
                        .get_mut(table)
                        .unwrap()
                        .insert(column.clone());
                }
            }
        }

        let second = plan_changes(&catalog, &snapshot);
        assert!(second.is_empty());
    }
}
