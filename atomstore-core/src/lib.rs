//! Atomstore Core
//!
//! This crate provides a small reactive state container. It implements:
//!
//! - A store owning named units of state (atoms)
//! - Read-only derived values (selectors) with lazy recomputation
//! - Synchronous, push-based change notification
//! - Bindings that tie subscriptions to a component's lifetime
//!
//! Observers never reference each other: they only know the store and the
//! handles they read or write.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: the store, atom and selector handles, subscriptions, bindings
//! - `graph`: the dependency graph between atoms and selectors
//! - `config`: store configuration
//! - `error`: error types
//! - `board`: a ready-made application state (text input, text display,
//!   post list) built on the store
//!
//! # Example
//!
//! ```rust
//! use atomstore_core::reactive::Store;
//!
//! let store = Store::new();
//!
//! // Create an atom
//! let count = store.create_atom(0);
//!
//! // Create a derived value
//! let doubled = store.map(&count, |c: &i32| c * 2).unwrap();
//!
//! // Observe it
//! let _sub = store
//!     .subscribe(&doubled, |d| println!("Doubled: {d}"))
//!     .unwrap();
//!
//! // Update the atom
//! store.write(&count, 5).unwrap();
//! // Observer already ran, printed: "Doubled: 10"
//! assert_eq!(store.read(&doubled).unwrap(), 10);
//! ```

pub mod board;
pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{ReentrancyPolicy, StoreConfig};
pub use error::{BoxError, ConfigError, Result, StoreError};
pub use reactive::{Atom, Handle, Selector, Store, Subscription};
