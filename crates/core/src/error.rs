//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Projection rule violations (shape, referential, reconciliation)
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Blockchain RPC errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Domain Errors
// =============================================================================

/// Projection rule violations.
///
/// Every variant except [`DomainError::Chain`] raised from a best-effort
/// read-back is fatal for the enclosing block: the block is retried in
/// full and nothing it wrote is committed.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An event's parameters did not match the layout selected for its
    /// runtime version.
    #[error("Decoding error in {event}: {reason}")]
    Decoding {
        /// `Module.method` of the offending event.
        event: String,
        /// What did not match.
        reason: String,
    },

    /// A handler expected an entity to exist already.
    #[error("Missing {kind} '{id}'")]
    MissingEntity {
        /// Entity kind (e.g. `Instruction`).
        kind: &'static str,
        /// Deterministic id that was looked up.
        id: String,
    },

    /// A counter or set adjustment could not be applied as a whole.
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// The runtime is not covered by the version resolver.
    #[error("Unsupported runtime {spec_name} v{spec_version}")]
    UnsupportedRuntime {
        spec_name: String,
        spec_version: u32,
    },

    /// Generic validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Chain read-back failed.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
}

impl DomainError {
    /// Build a [`DomainError::Decoding`] for the given event.
    pub fn decoding(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decoding {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`DomainError::MissingEntity`].
    pub fn missing(kind: &'static str, id: impl Into<String>) -> Self {
        Self::MissingEntity {
            kind,
            id: id.into(),
        }
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
///
/// These errors originate from storage operations like queries,
/// transactions, and data serialization.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database constraint was violated (unique, foreign key, etc.).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The per-block change set outgrew its limit.
    #[error("Change set limit exceeded: {0}")]
    ChangeSetLimit(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Blockchain RPC and connectivity errors.
///
/// These errors occur when communicating with the Substrate node
/// via WebSocket RPC.
#[derive(Debug, Error)]
pub enum ChainError {
    /// WebSocket connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Block subscription failed or disconnected.
    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    /// Runtime metadata could not be fetched or parsed.
    #[error("Metadata error: {0}")]
    MetadataError(String),

    /// Block could not be fetched.
    #[error("Block fetch error at {at}: {message}")]
    BlockFetchError {
        /// Block number or hash that failed to fetch.
        at: String,
        /// Error details.
        message: String,
    },

    /// Live storage read failed.
    #[error("Storage read {pallet}.{entry} failed: {message}")]
    StorageReadError {
        pallet: String,
        entry: String,
        message: String,
    },

    /// Operation timed out waiting for block.
    #[error("Timeout waiting for block {0}")]
    Timeout(u64),
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the main error type returned by [`crate::services::IndexerService`].
/// It wraps all lower-level errors and adds indexer-specific variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Blockchain connectivity error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// A block kept failing after all retries. Nothing from it was persisted.
    #[error("Block {number} failed to index after {attempts} attempt(s): {source}")]
    BlockFailed {
        number: u64,
        attempts: u32,
        #[source]
        source: Box<IndexerError>,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Connected chain doesn't match stored data.
    ///
    /// This is a fatal error that requires manual intervention.
    #[error("Chain mismatch: connected to {connected} but database contains data for {expected}")]
    ChainMismatch {
        /// Genesis hash of connected chain.
        connected: String,
        /// Genesis hash expected by database.
        expected: String,
    },

    /// The incoming block does not extend the indexed chain.
    #[error("Block {number} does not extend the indexed chain (parent hash mismatch)")]
    Discontinuity { number: u64 },

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
