//! Keeper - hierarchical coordination store
//!
//! A namespace of persistent and ephemeral nodes with atomic create-if-absent
//! and change notifications. Ephemeral nodes are bound to a leased session and
//! disappear when the lease lapses or the session closes.
//!
//! - [`Keeper`]: the in-process store (also backs the HTTP service)
//! - [`MemorySession`]: a [`CoordinationStore`] handle onto an in-process keeper
//! - [`RemoteStore`]: a [`CoordinationStore`] talking to the `keeper` service

pub mod api;
pub mod client;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod store;

pub use client::{RemoteStore, RemoteStoreConfig};
pub use error::KeeperError;
pub use memory::{Keeper, MemorySession};
pub use store::{CoordinationStore, CreateMode, SessionId, WatchEvent};
