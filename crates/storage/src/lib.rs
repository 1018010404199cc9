//! Storage layer for the prism indexer.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `prism-core`: connection pooling, the core schema migrations,
//! the projected entity store and the atomic per-block commit.
//!
//! # Architecture
//!
//! The storage layer follows the repository pattern:
//!
//! - [`postgres::Database`] - Connection pool management
//! - [`postgres::PgRepositories`] - Composite repository for all entity types
//! - [`postgres::PgEntityStore`] - JSONB document store read by the change sets
//!
//! # Usage
//!
//! ```ignore
//! use prism_storage::{Database, DatabaseConfig, PgRepositories};
//!
//! // Connect to the database
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//!
//! // Run migrations
//! db.migrate().await?;
//!
//! // Create repositories
//! let repositories = Arc::new(PgRepositories::new(Arc::new(db)));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgEntityStore, PgRepositories, PurgeStats};
