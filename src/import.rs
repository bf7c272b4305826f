//! Data import pipeline
//!
//! Atomically replaces the domain tables' contents from an externally
//! supplied hierarchical batch. Source-side identifiers are remapped to
//! freshly assigned destination ids through an ephemeral per-run IdMap,
//! populated strictly parent-before-child and discarded when the run ends.
//! Each table is cleared before reinsertion, so the import is a
//! full-replace operation: re-running the same batch yields identical row
//! counts, never duplicates.

use crate::error::{EngineError, EngineResult};
use crate::metadata::{self, keys};
use chrono::Utc;
use deadpool_postgres::Pool;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Documented field defaults applied to omitted optional article attributes
pub mod defaults {
    pub const CATEGORY: &str = "uncategorized";
    pub const ARTICLE_UNIT: &str = "kg";
    pub const INGREDIENT_UNIT: &str = "g";
    pub const SERVINGS: i32 = 1;
}

/// Tables cleared by a full-replace run, children before parents
const CLEAR_ORDER: [&str; 4] = ["recipe_ingredients", "recipes", "articles", "suppliers"];

/// Tables touched by an import, in insertion order
const TOUCHED_TABLES: [&str; 4] = ["suppliers", "articles", "recipes", "recipe_ingredients"];

// =============================================================================
// BATCH WIRE TYPES
// =============================================================================

/// Externally supplied hierarchical batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    #[serde(default)]
    pub suppliers: Vec<SupplierRecord>,
    #[serde(default)]
    pub articles: Vec<ArticleRecord>,
    #[serde(default)]
    pub recipes: Vec<RecipeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierRecord {
    pub source_id: String,
    pub name: String,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRecord {
    pub source_id: String,
    pub name: String,
    /// Source-side supplier reference, resolved through the IdMap
    #[serde(default)]
    pub supplier_source_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub price_per_unit: Option<Decimal>,
    #[serde(default)]
    pub allergens: Option<Vec<String>>,
    #[serde(default)]
    pub additives: Option<Vec<String>>,
    #[serde(default)]
    pub nutrition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeRecord {
    #[serde(default)]
    pub source_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub servings: Option<i32>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<IngredientRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientRecord {
    /// Source-side article reference, resolved through the IdMap
    #[serde(default)]
    pub article_source_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub unit: Option<String>,
}

// =============================================================================
// ID REMAPPING
// =============================================================================

/// Entity namespaces within the IdMap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Supplier,
    Article,
}

impl EntityKind {
    fn label(self) -> &'static str {
        match self {
            EntityKind::Supplier => "supplier",
            EntityKind::Article => "article",
        }
    }
}

/// Ephemeral per-run map from source id to freshly assigned destination id.
///
/// Entries exist only for rows actually inserted in the current run. The map
/// lives on the stack of a single import call and is never persisted.
#[derive(Debug, Default)]
pub struct IdMap {
    entries: HashMap<(EntityKind, String), i32>,
}

impl IdMap {
    pub fn record(&mut self, kind: EntityKind, source_id: &str, id: i32) {
        self.entries.insert((kind, source_id.to_string()), id);
    }

    pub fn resolve(&self, kind: EntityKind, source_id: &str) -> Option<i32> {
        self.entries.get(&(kind, source_id.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of resolving a source-side reference against the IdMap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// The record declared no reference at all
    Missing,
    Mapped(i32),
    /// A reference was declared but its source id was not in this batch
    Unresolved,
}

fn resolve_reference(ids: &IdMap, kind: EntityKind, source_id: Option<&str>) -> Resolution {
    match source_id {
        None => Resolution::Missing,
        Some(id) => match ids.resolve(kind, id) {
            Some(mapped) => Resolution::Mapped(mapped),
            None => Resolution::Unresolved,
        },
    }
}

/// How unresolved references are treated.
///
/// The original system silently nulled them; `Lenient` preserves that
/// behavior explicitly, `Strict` aborts the batch instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceMode {
    #[default]
    Lenient,
    Strict,
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Per-table row counts of an import run
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub suppliers: usize,
    pub articles: usize,
    pub recipes: usize,
    pub recipe_ingredients: usize,
}

impl SyncCounts {
    pub fn total(&self) -> usize {
        self.suppliers + self.articles + self.recipes + self.recipe_ingredients
    }
}

/// Result of an import run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    pub run_id: Uuid,
    pub tables: Vec<String>,
    pub counts: SyncCounts,
    /// References nulled in lenient mode because their source id was absent
    pub unresolved_refs: usize,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    fn failure(run_id: Uuid, err: EngineError) -> Self {
        Self {
            success: false,
            message: "Data import failed; transaction rolled back".to_string(),
            run_id,
            tables: Vec::new(),
            counts: SyncCounts::default(),
            unresolved_refs: 0,
            warnings: Vec::new(),
            error: Some(err.to_string()),
        }
    }
}

/// Transactional full-replace importer
pub struct DataImportPipeline {
    pool: Pool,
    mode: ReferenceMode,
}

impl DataImportPipeline {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            mode: ReferenceMode::default(),
        }
    }

    pub fn with_mode(pool: Pool, mode: ReferenceMode) -> Self {
        Self { pool, mode }
    }

    /// Replace the domain tables' contents from the batch, atomically.
    ///
    /// Precondition: the schema has already been reconciled or rebuilt.
    pub async fn import_batch(&self, batch: &ImportBatch) -> SyncResult {
        let run_id = Uuid::new_v4();
        match self.try_import(run_id, batch).await {
            Ok(result) => result,
            Err(err) => {
                warn!("Import run {} failed: {}", run_id, err);
                SyncResult::failure(run_id, err)
            }
        }
    }

    async fn try_import(&self, run_id: Uuid, batch: &ImportBatch) -> EngineResult<SyncResult> {
        let mut client = self.pool.get().await?;
        let conn: &mut tokio_postgres::Client = &mut client;
        let mut transaction = conn
            .transaction()
            .await
            .map_err(EngineError::connectivity)?;

        let mut ids = IdMap::default();
        let mut counts = SyncCounts::default();
        let mut warnings = Vec::new();
        let mut unresolved_refs = 0usize;

        // Full replace: clear children before parents so no row ever
        // references a vanished parent mid-transaction
        for table in CLEAR_ORDER {
            transaction
                .execute(&format!("DELETE FROM \"{}\"", table), &[])
                .await
                .map_err(|e| EngineError::sync(table, "full-replace clear", e))?;
        }

        // Step 1: suppliers. The IdMap must know every supplier before any
        // article tries to resolve one.
        for supplier in &batch.suppliers {
            let row = transaction
                .query_one(
                    "INSERT INTO suppliers (name, contact_person, email, phone, address)
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING id",
                    &[
                        &supplier.name,
                        &supplier.contact_person,
                        &supplier.email,
                        &supplier.phone,
                        &supplier.address,
                    ],
                )
                .await
                .map_err(|e| {
                    EngineError::sync("suppliers", format!("sourceId {}", supplier.source_id), e)
                })?;

            ids.record(EntityKind::Supplier, &supplier.source_id, row.get(0));
            counts.suppliers += 1;
        }

        // Step 2: articles, with supplier references remapped
        for article in &batch.articles {
            let row_label = format!("sourceId {}", article.source_id);
            let supplier_id = self.remap(
                &ids,
                EntityKind::Supplier,
                article.supplier_source_id.as_deref(),
                "articles",
                &row_label,
                &mut warnings,
                &mut unresolved_refs,
            )?;

            let category = article.category.as_deref().unwrap_or(defaults::CATEGORY);
            let unit = article.unit.as_deref().unwrap_or(defaults::ARTICLE_UNIT);
            let price = article.price_per_unit.unwrap_or(Decimal::ZERO);
            let allergens = article.allergens.clone().unwrap_or_default();
            let additives = article.additives.clone().unwrap_or_default();
            let nutrition = article
                .nutrition
                .clone()
                .unwrap_or_else(|| serde_json::json!({}));

            let row = transaction
                .query_one(
                    "INSERT INTO articles
                         (supplier_id, name, category, unit, price_per_unit,
                          allergens, additives, nutrition)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     RETURNING id",
                    &[
                        &supplier_id,
                        &article.name,
                        &category,
                        &unit,
                        &price,
                        &allergens,
                        &additives,
                        &nutrition,
                    ],
                )
                .await
                .map_err(|e| EngineError::sync("articles", row_label.clone(), e))?;

            ids.record(EntityKind::Article, &article.source_id, row.get(0));
            counts.articles += 1;
        }

        // Step 3: recipes, then their nested ingredient rows against the
        // freshly assigned recipe id
        for recipe in &batch.recipes {
            let row_label = match &recipe.source_id {
                Some(id) => format!("sourceId {}", id),
                None => format!("name {}", recipe.name),
            };
            let servings = recipe.servings.unwrap_or(defaults::SERVINGS);

            let row = transaction
                .query_one(
                    "INSERT INTO recipes (name, description, servings, instructions)
                     VALUES ($1, $2, $3, $4)
                     RETURNING id",
                    &[
                        &recipe.name,
                        &recipe.description,
                        &servings,
                        &recipe.instructions,
                    ],
                )
                .await
                .map_err(|e| EngineError::sync("recipes", row_label.clone(), e))?;

            let recipe_id: i32 = row.get(0);
            counts.recipes += 1;

            for (position, ingredient) in recipe.ingredients.iter().enumerate() {
                let ingredient_label = format!("{}, ingredient {}", row_label, position + 1);
                let article_id = self.remap(
                    &ids,
                    EntityKind::Article,
                    ingredient.article_source_id.as_deref(),
                    "recipe_ingredients",
                    &ingredient_label,
                    &mut warnings,
                    &mut unresolved_refs,
                )?;

                let quantity = ingredient.quantity.unwrap_or(Decimal::ZERO);
                let unit = ingredient
                    .unit
                    .as_deref()
                    .unwrap_or(defaults::INGREDIENT_UNIT);

                transaction
                    .execute(
                        "INSERT INTO recipe_ingredients (recipe_id, article_id, quantity, unit)
                         VALUES ($1, $2, $3, $4)",
                        &[&recipe_id, &article_id, &quantity, &unit],
                    )
                    .await
                    .map_err(|e| EngineError::sync("recipe_ingredients", ingredient_label.clone(), e))?;

                counts.recipe_ingredients += 1;
            }
        }

        // Step 4: best-effort bookkeeping on a savepoint so a failure here
        // cannot poison the surrounding transaction
        let finished_at = Utc::now();
        if let Err(e) = record_last_sync(&mut transaction, &finished_at.to_rfc3339()).await {
            warn!("last-sync bookkeeping skipped: {}", e);
            warnings.push(format!("last-sync bookkeeping skipped: {}", e));
        }

        transaction
            .commit()
            .await
            .map_err(EngineError::connectivity)?;

        // The IdMap drops with this scope; it is never persisted
        info!(
            "Import run {} replaced {} rows across {} tables ({} remapped ids, {} unresolved)",
            run_id,
            counts.total(),
            TOUCHED_TABLES.len(),
            ids.len(),
            unresolved_refs
        );

        Ok(SyncResult {
            success: true,
            message: format!("Imported {} row(s)", counts.total()),
            run_id,
            tables: TOUCHED_TABLES.iter().map(|t| t.to_string()).collect(),
            counts,
            unresolved_refs,
            warnings,
            error: None,
        })
    }

    /// Resolve a source reference per the configured mode
    #[allow(clippy::too_many_arguments)]
    fn remap(
        &self,
        ids: &IdMap,
        kind: EntityKind,
        source_id: Option<&str>,
        table: &str,
        row: &str,
        warnings: &mut Vec<String>,
        unresolved_refs: &mut usize,
    ) -> EngineResult<Option<i32>> {
        match resolve_reference(ids, kind, source_id) {
            Resolution::Missing => Ok(None),
            Resolution::Mapped(id) => Ok(Some(id)),
            Resolution::Unresolved => {
                let source_id = source_id.unwrap_or_default();
                match self.mode {
                    ReferenceMode::Strict => Err(EngineError::Sync {
                        table: table.to_string(),
                        row: row.to_string(),
                        message: format!(
                            "unresolved {} reference \"{}\"",
                            kind.label(),
                            source_id
                        ),
                    }),
                    ReferenceMode::Lenient => {
                        let warning = format!(
                            "{} ({}): {} reference \"{}\" not in this batch; imported without it",
                            table,
                            row,
                            kind.label(),
                            source_id
                        );
                        warn!("{}", warning);
                        warnings.push(warning);
                        *unresolved_refs += 1;
                        Ok(None)
                    }
                }
            }
        }
    }
}

async fn record_last_sync(
    transaction: &mut tokio_postgres::Transaction<'_>,
    at: &str,
) -> Result<(), tokio_postgres::Error> {
    let savepoint = transaction.transaction().await?;
    metadata::upsert_with(
        &savepoint,
        keys::LAST_SYNC_AT,
        at,
        Some("timestamp of the last successful data import"),
    )
    .await?;
    savepoint.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_id_map_round_trip() {
        let mut ids = IdMap::default();
        ids.record(EntityKind::Supplier, "s1", 10);
        ids.record(EntityKind::Article, "s1", 20); // same source id, other kind

        assert_eq!(ids.resolve(EntityKind::Supplier, "s1"), Some(10));
        assert_eq!(ids.resolve(EntityKind::Article, "s1"), Some(20));
        assert_eq!(ids.resolve(EntityKind::Supplier, "s2"), None);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_resolution_distinguishes_missing_from_unresolved() {
        let mut ids = IdMap::default();
        ids.record(EntityKind::Supplier, "s1", 7);

        assert_eq!(
            resolve_reference(&ids, EntityKind::Supplier, None),
            Resolution::Missing
        );
        assert_eq!(
            resolve_reference(&ids, EntityKind::Supplier, Some("s1")),
            Resolution::Mapped(7)
        );
        assert_eq!(
            resolve_reference(&ids, EntityKind::Supplier, Some("ghost")),
            Resolution::Unresolved
        );
    }

    #[test]
    fn test_reference_mode_defaults_to_lenient() {
        assert_eq!(ReferenceMode::default(), ReferenceMode::Lenient);
    }

    #[test]
    fn test_clear_order_is_reverse_of_insertion_order() {
        let mut reversed: Vec<&str> = TOUCHED_TABLES.to_vec();
        reversed.reverse();
        assert_eq!(CLEAR_ORDER.to_vec(), reversed);
    }

    #[test]
    fn test_batch_deserializes_camel_case() {
        let json = r#"{
            "suppliers": [{"sourceId": "s1", "name": "Acme"}],
            "articles": [{"sourceId": "a1", "name": "Flour", "supplierSourceId": "s1"}],
            "recipes": [{
                "name": "Bread",
                "ingredients": [{"articleSourceId": "a1", "quantity": "0.5"}]
            }]
        }"#;

        let batch: ImportBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.suppliers.len(), 1);
        assert_eq!(batch.suppliers[0].source_id, "s1");
        assert_eq!(batch.articles[0].supplier_source_id.as_deref(), Some("s1"));
        assert_eq!(
            batch.recipes[0].ingredients[0].article_source_id.as_deref(),
            Some("a1")
        );
        // Omitted optionals stay None until defaults apply at insert time
        assert!(batch.articles[0].category.is_none());
        assert!(batch.articles[0].nutrition.is_none());
    }

    #[test]
    fn test_empty_batch_deserializes() {
        let batch: ImportBatch = serde_json::from_str("{}").unwrap();
        assert!(batch.suppliers.is_empty());
        assert!(batch.articles.is_empty());
        assert!(batch.recipes.is_empty());
    }

    #[test]
    fn test_sync_counts_total() {
        let counts = SyncCounts {
            suppliers: 1,
            articles: 2,
            recipes: 3,
            recipe_ingredients: 4,
        };
        assert_eq!(counts.total(), 10);
    }
}
