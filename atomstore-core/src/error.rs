//! Error types for the store.
//!
//! Everything here is a programmer error (a wiring bug or a broken observer),
//! never a user-facing runtime condition. Callers are expected to propagate
//! these with `?` and fail fast.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::NodeId;

/// Error type returned by fallible observers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The handle was not created by this store instance.
    #[error("unknown atom {id}: handle was not created by this store")]
    UnknownAtom { id: NodeId },

    /// Selectors are derived and can never be written directly.
    #[error("selector {id} is read-only")]
    ReadOnlyWrite { id: NodeId },

    /// An atom was written from inside its own notification pass.
    #[error("re-entrant write to {id} during its own notification pass")]
    ReentrantWrite { id: NodeId },

    /// Re-entrant writes kept the atom changing past the configured bound.
    #[error("notification of {id} did not settle after {passes} passes")]
    NotificationLimit { id: NodeId, passes: usize },

    /// Another atom in this store already uses the key.
    #[error("duplicate atom key '{key}'")]
    DuplicateKey { key: String },

    /// A selector's compute function read something it did not declare.
    #[error("selector {selector} read undeclared dependency {dependency}")]
    UndeclaredDependency { selector: NodeId, dependency: NodeId },

    /// The stored value does not have the handle's type.
    #[error("{id} does not hold a value of type {expected}")]
    TypeMismatch { id: NodeId, expected: &'static str },

    /// A fallible observer returned an error.
    #[error("observer of {id} failed: {source}")]
    Observer {
        id: NodeId,
        #[source]
        source: BoxError,
    },

    /// An observer panicked during notification.
    #[error("observer of {id} panicked: {message}")]
    ObserverPanicked { id: NodeId, message: String },

    /// A selector's compute function panicked while a write was notifying
    /// its observers.
    #[error("selector {id} panicked while recomputing: {message}")]
    SelectorPanicked { id: NodeId, message: String },
}

/// Errors produced while loading a [`StoreConfig`](crate::config::StoreConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
