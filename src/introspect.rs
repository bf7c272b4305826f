//! Schema introspection module
//!
//! Reads the live database's actual tables and columns. The snapshot is the
//! engine's only view of reality: it is produced fresh on every call and
//! never cached, so a reconcile that follows a partial failure always sees
//! what actually exists.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Schema namespace the engine manages; nothing outside it is ever touched
pub const MANAGED_SCHEMA: &str = "public";

/// Live schema shape at a point in time: table name -> set of column names.
///
/// Types are deliberately not captured; type drift is out of scope at this
/// layer, and comparing names alone keeps reconciliation purely additive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub tables: HashMap<String, HashSet<String>>,
}

impl SchemaSnapshot {
    /// Snapshot of an empty database (used by tests and planning)
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            tables: HashMap::new(),
        }
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn columns(&self, table: &str) -> Option<&HashSet<String>> {
        self.tables.get(table)
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

/// Schema introspector for PostgreSQL
pub struct PostgresIntrospector;

impl PostgresIntrospector {
    /// Describe the live schema scoped to the managed namespace.
    ///
    /// Any connectivity problem propagates; a partial snapshot is never
    /// returned.
    pub async fn describe(pool: &Pool) -> EngineResult<SchemaSnapshot> {
        let client = pool.get().await?;

        let table_query = r#"
            SELECT t.table_name
            FROM information_schema.tables t
            WHERE t.table_schema = $1
              AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
        "#;

        let table_rows = client
            .query(table_query, &[&MANAGED_SCHEMA])
            .await
            .map_err(EngineError::connectivity)?;

        let mut tables: HashMap<String, HashSet<String>> = table_rows
            .iter()
            .map(|row| (row.get::<_, String>("table_name"), HashSet::new()))
            .collect();

        let column_query = r#"
            SELECT c.table_name, c.column_name
            FROM information_schema.columns c
            WHERE c.table_schema = $1
            ORDER BY c.table_name, c.ordinal_position
        "#;

        let column_rows = client
            .query(column_query, &[&MANAGED_SCHEMA])
            .await
            .map_err(EngineError::connectivity)?;

        for row in column_rows {
            let table: String = row.get("table_name");
            let column: String = row.get("column_name");
            if let Some(columns) = tables.get_mut(&table) {
                columns.insert(column);
            }
        }

        let snapshot = SchemaSnapshot {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            tables,
        };

        debug!("Introspected {} live tables", snapshot.table_count());

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(table: &str, columns: &[&str]) -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::empty();
        snapshot.tables.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        snapshot
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = SchemaSnapshot::empty();
        assert_eq!(snapshot.table_count(), 0);
        assert!(!snapshot.has_table("suppliers"));
    }

    #[test]
    fn test_snapshot_lookups() {
        let snapshot = snapshot_with("suppliers", &["id", "name"]);
        assert!(snapshot.has_table("suppliers"));
        let columns = snapshot.columns("suppliers").unwrap();
        assert!(columns.contains("id"));
        assert!(columns.contains("name"));
        assert!(!columns.contains("email"));
    }
}
