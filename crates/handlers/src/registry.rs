//! Bundle registry for managing handler bundles.

use std::cmp::Reverse;
use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use tracing::{debug, info, trace, warn};

use prism_core::ports::HandlerRegistry;

use crate::bundle::HandlerBundle;

/// Registry for managing handler bundles.
///
/// Owns the bundles between startup and the moment the indexer takes
/// their handlers: view migrations, purge of their entity kinds, then
/// conversion into the event router.
///
/// # Example
///
/// ```ignore
/// let mut registry = BundleRegistry::new();
///
/// registry.register(Box::new(AssetBundle));
/// registry.register(Box::new(MultiSigBundle::new(SweepConfig::default())));
///
/// // Run migrations for all bundles (tracked, idempotent)
/// registry.run_migrations(&pool).await?;
///
/// // Convert to HandlerRegistry for the indexer
/// let handlers = registry.into_handler_registry();
/// ```
pub struct BundleRegistry {
    bundles: Vec<Box<dyn HandlerBundle>>,
}

impl BundleRegistry {
    /// Create a new empty bundle registry.
    pub fn new() -> Self {
        Self {
            bundles: Vec::new(),
        }
    }

    /// Register a handler bundle.
    ///
    /// Bundles are stored and will be processed in priority order
    /// (higher priority first) when migrations are run.
    pub fn register(&mut self, bundle: Box<dyn HandlerBundle>) {
        info!(bundle = bundle.name(), "📦 Registering handler bundle");
        self.bundles.push(bundle);
    }

    /// Apply every bundle's view migrations in priority order.
    ///
    /// Applied migrations are recorded in `bundle_migrations` with a content
    /// checksum. Bundle migrations only define views over the entity table,
    /// so a migration whose content changed is applied again and its
    /// checksum updated. Each migration and its record commit together.
    pub async fn run_migrations(&self, pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
        let mut sorted: Vec<_> = self.bundles.iter().collect();
        sorted.sort_by_key(|b| Reverse(b.priority()));

        let mut applied = 0usize;
        for bundle in sorted {
            for (index, migration) in bundle.migrations().iter().enumerate() {
                let checksum = compute_checksum(migration);

                let recorded: Option<(String,)> = sqlx::query_as(
                    "SELECT checksum FROM bundle_migrations WHERE bundle_name = $1 AND migration_index = $2",
                )
                .bind(bundle.name())
                .bind(index as i32)
                .fetch_optional(pool)
                .await?;

                match recorded {
                    Some((found,)) if found == checksum => {
                        trace!(bundle = bundle.name(), migration = index, "Migration up to date");
                        continue;
                    }
                    Some((found,)) => warn!(
                        bundle = bundle.name(),
                        migration = index,
                        %found,
                        expected = %checksum,
                        "⚠️  View definition changed, re-applying"
                    ),
                    None => debug!(bundle = bundle.name(), migration = index, "Applying migration"),
                }

                let mut tx = pool.begin().await?;
                sqlx::raw_sql(migration).execute(&mut *tx).await?;
                sqlx::query(
                    r#"
                    INSERT INTO bundle_migrations (bundle_name, migration_index, checksum)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (bundle_name, migration_index) DO UPDATE SET
                        checksum = EXCLUDED.checksum,
                        applied_at = NOW()
                    "#,
                )
                .bind(bundle.name())
                .bind(index as i32)
                .bind(&checksum)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                applied += 1;
            }
        }

        if applied > 0 {
            info!(applied, "🗄️  Bundle views applied");
        }
        Ok(())
    }

    /// Convert this registry into a HandlerRegistry.
    ///
    /// This extracts all handlers from all bundles and registers them
    /// with a new HandlerRegistry. The BundleRegistry is consumed.
    pub fn into_handler_registry(self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();

        // Sort by priority for deterministic handler registration
        let mut sorted = self.bundles;
        sorted.sort_by_key(|b| Reverse(b.priority()));

        for bundle in sorted {
            let handlers = bundle.handlers();
            debug!(
                bundle = bundle.name(),
                handlers = handlers.len(),
                "Extracting handlers"
            );

            for handler in handlers {
                registry.register(handler);
            }
        }

        info!(routes = registry.route_count(), "🧭 Event routes registered");
        registry
    }

    /// Get the names of all registered bundles.
    pub fn bundle_names(&self) -> Vec<&'static str> {
        self.bundles.iter().map(|b| b.name()).collect()
    }

    /// Get the number of registered bundles.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Check if no bundles are registered.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// All entity kinds projected by the registered bundles, deduplicated.
    pub fn entity_kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self
            .bundles
            .iter()
            .flat_map(|b| b.entity_kinds().iter().copied())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Delete every projected entity owned by the registered bundles.
    ///
    /// Returns the number of rows deleted.
    pub async fn purge_entities(&self, pool: &sqlx::PgPool) -> Result<u64, sqlx::Error> {
        let kinds: Vec<String> = self.entity_kinds().iter().map(|k| k.to_string()).collect();
        debug!(kinds = kinds.len(), "Purging bundle entities");

        let result = sqlx::query("DELETE FROM entities WHERE kind = ANY($1)")
            .bind(&kinds)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}

impl Default for BundleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex blake2b-128 of the migration text, stable across builds.
fn compute_checksum(content: &str) -> String {
    hex::encode(Blake2b::<U16>::digest(content.as_bytes()))
}
