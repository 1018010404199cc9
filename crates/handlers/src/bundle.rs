//! Handler bundle trait definition.

use std::sync::Arc;

use prism_core::ports::EventHandler;

/// A self-contained bundle of handlers for one business domain.
///
/// Bundles provide a plugin-like architecture where each bundle can:
/// - Register one or more event handlers
/// - Declare the entity kinds it projects
/// - Ship SQL migrations (relational views over its entity kinds)
///
/// # Example
///
/// ```ignore
/// pub struct MyBundle;
///
/// impl HandlerBundle for MyBundle {
///     fn name(&self) -> &'static str { "my_bundle" }
///
///     fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
///         vec![Arc::new(MyHandler)]
///     }
///
///     fn entity_kinds(&self) -> &'static [&'static str] {
///         &["MyEntity"]
///     }
/// }
/// ```
pub trait HandlerBundle: Send + Sync {
    /// Unique name identifying this bundle.
    ///
    /// Used for logging and migration tracking.
    fn name(&self) -> &'static str;

    /// Returns all event handlers provided by this bundle.
    ///
    /// These handlers will be registered with the indexer's HandlerRegistry.
    fn handlers(&self) -> Vec<Arc<dyn EventHandler>>;

    /// SQL migration statements for this bundle.
    ///
    /// Migrations are executed in order, after the core schema exists.
    /// Each string should be a complete SQL statement or set of statements.
    fn migrations(&self) -> &'static [&'static str] {
        &[]
    }

    /// Ordering of migrations and handler registration (higher = earlier).
    fn priority(&self) -> i32 {
        0
    }

    /// Entity kinds projected by this bundle.
    ///
    /// Rows of these kinds are deleted when running `--purge`.
    fn entity_kinds(&self) -> &'static [&'static str] {
        &[]
    }
}
