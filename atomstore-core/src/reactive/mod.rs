//! Reactive Store
//!
//! This module implements the store and its primitives: atoms, selectors,
//! subscriptions and bindings.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An atom is a single, independently writable unit of state. Writing it
//! replaces the value and notifies everybody observing it.
//!
//! ## Selectors
//!
//! A selector is a read-only value derived from atoms or other selectors.
//! It caches its result and only recomputes after one of its dependencies
//! changed.
//!
//! ## Subscriptions and Bindings
//!
//! A subscription is a callback registered on one node. Bindings wrap
//! subscriptions (and writes) for presentation components, and tie the
//! registration to the component's lifetime.
//!
//! # Implementation Notes
//!
//! Dependencies are declared explicitly when a selector is created instead
//! of being discovered while it runs. Notification is push-based and
//! synchronous: a write returns only after every observer has run.

mod atom;
mod binding;
mod context;
mod selector;
mod store;
mod subscriber;

pub use atom::{Atom, Handle};
pub use binding::{Reader, ReaderBinding, Writer, WriterBinding};
pub use selector::{Dependencies, Selector};
pub use store::{NodeInfo, Store};
pub use subscriber::{Subscription, SubscriptionId};
