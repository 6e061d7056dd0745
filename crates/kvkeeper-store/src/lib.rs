//! Backend access for kvkeeper.
//!
//! This crate provides:
//! - The [`KvClient`] / [`Connector`] contract a key-value backend is
//!   reached through, and [`MemoryBackend`], an in-process implementation
//! - [`ConnectionCache`], idle-evicting reference-counted connections
//! - [`PermissionResolver`], the key ranges a user may read
//! - [`build_tree`], directory trees over a flat key listing

pub mod backend;
pub mod connection;
pub mod error;
pub mod memory;
pub mod permission;
pub mod tree;

pub use backend::{
    ClusterStatus, Connector, Credential, KeyValue, KvClient, MAX_LEASE_TTL, Member, OPEN_END,
    Permission, PermissionKind, ROOT_USER, RangeRequest, connection_key, prefix_end,
};
pub use connection::{ClientHandle, ConnectionCache, SharedClient, open_connection};
pub use error::{BackendError, BackendResult, Result, StoreError};
pub use memory::{MemoryBackend, MemoryClient, MemoryConnector};
pub use permission::{KeyRange, PermissionResolver, Visibility};
pub use tree::{Node, build_tree, sort_listing};
