//! Schema catalog
//!
//! The static, declarative description of every table the engine manages.
//! The catalog is the sole source of truth for desired structure: reconcile
//! and rebuild both derive their DDL from it, and it is the only place from
//! which identifiers are ever interpolated into SQL text. Values always
//! travel as bound parameters.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Version stamp recorded in bookkeeping whenever the schema is rebuilt
pub const CATALOG_VERSION: &str = "1.2";

/// Suffix appended to a managed table's name for its rebuild backup copy
pub const BACKUP_SUFFIX: &str = "_backup";

/// Foreign key clause on a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForeignKeySpec {
    pub table: &'static str,
    pub column: &'static str,
    /// Referential action, e.g. "SET NULL" or "CASCADE"
    pub on_delete: &'static str,
}

/// Declared column
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub nullable: bool,
    pub default: Option<&'static str>,
    pub references: Option<ForeignKeySpec>,
}

impl ColumnSpec {
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self {
            name,
            sql_type,
            nullable: true,
            default: None,
            references: None,
        }
    }

    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub const fn default_expr(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    pub const fn references(
        mut self,
        table: &'static str,
        column: &'static str,
        on_delete: &'static str,
    ) -> Self {
        self.references = Some(ForeignKeySpec {
            table,
            column,
            on_delete,
        });
        self
    }

    /// Render the column definition used by CREATE TABLE and ADD COLUMN
    fn render(&self) -> String {
        let mut def = format!("\"{}\" {}", self.name, self.sql_type);
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = self.default {
            def.push_str(&format!(" DEFAULT {}", default));
        }
        if let Some(fk) = self.references {
            def.push_str(&format!(
                " REFERENCES \"{}\" (\"{}\") ON DELETE {}",
                fk.table, fk.column, fk.on_delete
            ));
        }
        def
    }
}

/// Declared index
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

/// Declared table: an ordered list of columns plus its indexes
#[derive(Debug, Clone, Serialize)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    /// Find a declared column by name
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// The declared target schema, ordered so that referenced tables precede
/// the tables that reference them. The order is load-bearing: rebuild drops
/// in reverse and recreates forward, and import inserts parents first.
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub version: &'static str,
    pub tables: Vec<TableSpec>,
}

impl Catalog {
    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }

    pub fn find_table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Checksum over the declared shape, stable across process runs.
    ///
    /// Recorded in bookkeeping on rebuild so drift from the deployed catalog
    /// is detectable without re-deriving DDL.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        let mut table_names: Vec<&str> = self.tables.iter().map(|t| t.name).collect();
        table_names.sort_unstable();
        for name in &table_names {
            hasher.update(name.as_bytes());
        }

        for table in &self.tables {
            for col in &table.columns {
                hasher.update(
                    format!("{}.{}:{}:{}", table.name, col.name, col.sql_type, col.nullable)
                        .as_bytes(),
                );
            }
            for idx in &table.indexes {
                hasher.update(format!("{}#{}", table.name, idx.name).as_bytes());
            }
        }

        let result = hasher.finalize();
        format!("{:x}", result)
    }
}

// =============================================================================
// DDL RENDERING
// =============================================================================

/// Full CREATE TABLE statement with all declared columns
pub fn create_table_sql(table: &TableSpec) -> String {
    let columns: Vec<String> = table.columns.iter().map(|c| format!("    {}", c.render())).collect();
    format!(
        "CREATE TABLE \"{}\" (\n{}\n);",
        table.name,
        columns.join(",\n")
    )
}

/// Single additive ALTER TABLE ... ADD COLUMN statement
pub fn add_column_sql(table_name: &str, column: &ColumnSpec) -> String {
    format!(
        "ALTER TABLE \"{}\" ADD COLUMN {};",
        table_name,
        column.render()
    )
}

/// CREATE INDEX statement; IF NOT EXISTS keeps re-runs additive
pub fn create_index_sql(table_name: &str, index: &IndexSpec) -> String {
    let cols: Vec<String> = index.columns.iter().map(|c| format!("\"{}\"", c)).collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS \"{}\" ON \"{}\" ({});",
        if index.unique { "UNIQUE " } else { "" },
        index.name,
        table_name,
        cols.join(", ")
    )
}

/// Cascading drop used by rebuild, in reverse catalog order
pub fn drop_table_sql(table_name: &str) -> String {
    format!("DROP TABLE IF EXISTS \"{}\" CASCADE;", table_name)
}

/// Full row copy into the backup table
pub fn backup_table_sql(table_name: &str) -> String {
    format!(
        "CREATE TABLE \"{}{}\" AS TABLE \"{}\";",
        table_name, BACKUP_SUFFIX, table_name
    )
}

/// Drop a stale backup left by an earlier rebuild run
pub fn drop_backup_sql(table_name: &str) -> String {
    format!("DROP TABLE IF EXISTS \"{}{}\";", table_name, BACKUP_SUFFIX)
}

// =============================================================================
// DOMAIN CATALOG
// =============================================================================

/// The catalog backing the Pantry domain entities.
///
/// Order: suppliers before articles (supplier reference), recipes before
/// recipe_ingredients (recipe and article references), bookkeeping last.
pub fn default_catalog() -> Catalog {
    Catalog {
        version: CATALOG_VERSION,
        tables: vec![
            TableSpec {
                name: "suppliers",
                columns: vec![
                    ColumnSpec::new("id", "SERIAL PRIMARY KEY").not_null(),
                    ColumnSpec::new("name", "VARCHAR(255)").not_null(),
                    ColumnSpec::new("contact_person", "VARCHAR(255)"),
                    ColumnSpec::new("email", "VARCHAR(255)"),
                    ColumnSpec::new("phone", "VARCHAR(50)"),
                    ColumnSpec::new("address", "TEXT"),
                    ColumnSpec::new("created_at", "TIMESTAMPTZ")
                        .not_null()
                        .default_expr("now()"),
                    ColumnSpec::new("updated_at", "TIMESTAMPTZ")
                        .not_null()
                        .default_expr("now()"),
                ],
                indexes: vec![IndexSpec {
                    name: "idx_suppliers_name",
                    columns: &["name"],
                    unique: false,
                }],
            },
            TableSpec {
                name: "articles",
                columns: vec![
                    ColumnSpec::new("id", "SERIAL PRIMARY KEY").not_null(),
                    ColumnSpec::new("supplier_id", "INTEGER").references(
                        "suppliers",
                        "id",
                        "SET NULL",
                    ),
                    ColumnSpec::new("name", "VARCHAR(255)").not_null(),
                    ColumnSpec::new("category", "VARCHAR(100)")
                        .not_null()
                        .default_expr("'uncategorized'"),
                    ColumnSpec::new("unit", "VARCHAR(20)")
                        .not_null()
                        .default_expr("'kg'"),
                    ColumnSpec::new("price_per_unit", "NUMERIC(10, 2)")
                        .not_null()
                        .default_expr("0"),
                    ColumnSpec::new("allergens", "TEXT[]")
                        .not_null()
                        .default_expr("'{}'"),
                    ColumnSpec::new("additives", "TEXT[]")
                        .not_null()
                        .default_expr("'{}'"),
                    ColumnSpec::new("nutrition", "JSONB")
                        .not_null()
                        .default_expr("'{}'::jsonb"),
                    ColumnSpec::new("created_at", "TIMESTAMPTZ")
                        .not_null()
                        .default_expr("now()"),
                    ColumnSpec::new("updated_at", "TIMESTAMPTZ")
                        .not_null()
                        .default_expr("now()"),
                ],
                indexes: vec![
                    IndexSpec {
                        name: "idx_articles_supplier_id",
                        columns: &["supplier_id"],
                        unique: false,
                    },
                    IndexSpec {
                        name: "idx_articles_name",
                        columns: &["name"],
                        unique: false,
                    },
                ],
            },
            TableSpec {
                name: "recipes",
                columns: vec![
                    ColumnSpec::new("id", "SERIAL PRIMARY KEY").not_null(),
                    ColumnSpec::new("name", "VARCHAR(255)").not_null(),
                    ColumnSpec::new("description", "TEXT"),
                    ColumnSpec::new("servings", "INTEGER")
                        .not_null()
                        .default_expr("1"),
                    ColumnSpec::new("instructions", "TEXT"),
                    ColumnSpec::new("created_at", "TIMESTAMPTZ")
                        .not_null()
                        .default_expr("now()"),
                    ColumnSpec::new("updated_at", "TIMESTAMPTZ")
                        .not_null()
                        .default_expr("now()"),
                ],
                indexes: vec![IndexSpec {
                    name: "idx_recipes_name",
                    columns: &["name"],
                    unique: false,
                }],
            },
            TableSpec {
                name: "recipe_ingredients",
                columns: vec![
                    ColumnSpec::new("id", "SERIAL PRIMARY KEY").not_null(),
                    ColumnSpec::new("recipe_id", "INTEGER")
                        .not_null()
                        .references("recipes", "id", "CASCADE"),
                    ColumnSpec::new("article_id", "INTEGER").references(
                        "articles",
                        "id",
                        "SET NULL",
                    ),
                    ColumnSpec::new("quantity", "NUMERIC(12, 3)")
                        .not_null()
                        .default_expr("0"),
                    ColumnSpec::new("unit", "VARCHAR(20)")
                        .not_null()
                        .default_expr("'g'"),
                ],
                indexes: vec![
                    IndexSpec {
                        name: "idx_recipe_ingredients_recipe_id",
                        columns: &["recipe_id"],
                        unique: false,
                    },
                    IndexSpec {
                        name: "idx_recipe_ingredients_article_id",
                        columns: &["article_id"],
                        unique: false,
                    },
                ],
            },
            TableSpec {
                name: "app_metadata",
                columns: vec![
                    ColumnSpec::new("id", "SERIAL PRIMARY KEY").not_null(),
                    ColumnSpec::new("meta_key", "VARCHAR(100) UNIQUE").not_null(),
                    ColumnSpec::new("meta_value", "TEXT").not_null(),
                    ColumnSpec::new("description", "TEXT"),
                    ColumnSpec::new("created_at", "TIMESTAMPTZ")
                        .not_null()
                        .default_expr("now()"),
                    ColumnSpec::new("updated_at", "TIMESTAMPTZ")
                        .not_null()
                        .default_expr("now()"),
                ],
                indexes: vec![],
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parents_precede_children() {
        let catalog = default_catalog();
        let names = catalog.table_names();
        let pos = |n: &str| names.iter().position(|t| *t == n).unwrap();

        assert!(pos("suppliers") < pos("articles"));
        assert!(pos("recipes") < pos("recipe_ingredients"));
        assert!(pos("articles") < pos("recipe_ingredients"));
    }

    #[test]
    fn test_create_table_sql_renders_constraints() {
        let catalog = default_catalog();
        let articles = catalog.find_table("articles").unwrap();
        let sql = create_table_sql(articles);

        assert!(sql.starts_with("CREATE TABLE \"articles\" (\n"));
        assert!(sql.contains("\"name\" VARCHAR(255) NOT NULL"));
        assert!(sql.contains("\"category\" VARCHAR(100) NOT NULL DEFAULT 'uncategorized'"));
        assert!(sql.contains(
            "\"supplier_id\" INTEGER REFERENCES \"suppliers\" (\"id\") ON DELETE SET NULL"
        ));
        assert!(sql.ends_with(");"));
    }

    #[test]
    fn test_add_column_sql() {
        let col = ColumnSpec::new("note", "TEXT");
        assert_eq!(
            add_column_sql("suppliers", &col),
            "ALTER TABLE \"suppliers\" ADD COLUMN \"note\" TEXT;"
        );

        let col = ColumnSpec::new("unit", "VARCHAR(20)")
            .not_null()
            .default_expr("'kg'");
        assert_eq!(
            add_column_sql("articles", &col),
            "ALTER TABLE \"articles\" ADD COLUMN \"unit\" VARCHAR(20) NOT NULL DEFAULT 'kg';"
        );
    }

    #[test]
    fn test_index_sql() {
        let idx = IndexSpec {
            name: "idx_articles_name",
            columns: &["name"],
            unique: false,
        };
        assert_eq!(
            create_index_sql("articles", &idx),
            "CREATE INDEX IF NOT EXISTS \"idx_articles_name\" ON \"articles\" (\"name\");"
        );
    }

    #[test]
    fn test_drop_and_backup_sql() {
        assert_eq!(
            drop_table_sql("recipes"),
            "DROP TABLE IF EXISTS \"recipes\" CASCADE;"
        );
        assert_eq!(
            backup_table_sql("recipes"),
            "CREATE TABLE \"recipes_backup\" AS TABLE \"recipes\";"
        );
        assert_eq!(
            drop_backup_sql("recipes"),
            "DROP TABLE IF EXISTS \"recipes_backup\";"
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = default_catalog().fingerprint();
        let b = default_catalog().fingerprint();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_shape() {
        let mut catalog = default_catalog();
        catalog.tables[0]
            .columns
            .push(ColumnSpec::new("note", "TEXT"));
        assert_ne!(catalog.fingerprint(), default_catalog().fingerprint());
    }
}
