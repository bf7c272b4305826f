//! pantry-sync: schema provisioning and data-import engine
//!
//! The engine behind the Pantry catering backend's database layer. It owns
//! three operations against a PostgreSQL target:
//!
//! - **Reconcile**: non-destructive diff-and-patch of the live schema
//!   against the declared catalog (create missing tables, add missing
//!   columns, never remove anything).
//! - **Rebuild**: destructive drop-and-recreate for structural version
//!   migrations, with best-effort backups and a single all-or-nothing
//!   transaction.
//! - **Import**: transactional full-replace load of externally supplied
//!   supplier/article/recipe data, remapping source ids to freshly
//!   assigned destination ids.
//!
//! A [`tester::ConnectionTester`] validates configuration and connectivity
//! before any of the above runs. Every public operation returns a
//! serializable result with an explicit success flag rather than erroring
//! past the crate boundary; the HTTP layer that consumes these results
//! lives outside this crate.

pub mod catalog;
pub mod config;
pub mod error;
pub mod import;
pub mod introspect;
pub mod metadata;
pub mod pool;
pub mod rebuild;
pub mod reconcile;
pub mod tester;

pub use catalog::{default_catalog, Catalog, ColumnSpec, IndexSpec, TableSpec, CATALOG_VERSION};
pub use config::DatabaseConfig;
pub use error::{ConnectivityKind, EngineError, EngineResult};
pub use import::{DataImportPipeline, ImportBatch, ReferenceMode, SyncResult};
pub use introspect::{PostgresIntrospector, SchemaSnapshot};
pub use metadata::MetadataStore;
pub use pool::create_pool;
pub use rebuild::{RebuildResult, SchemaRebuilder};
pub use reconcile::{ReconcileResult, SchemaReconciler};
pub use tester::{ConnectionResult, ConnectionTester};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with structured logging.
///
/// For binaries and tests that embed the engine; repeated calls are no-ops.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pantry_sync=debug"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .try_init();
}
