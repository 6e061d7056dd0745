//! Backend client contract.
//!
//! The key-value store is reached through a [`KvClient`] obtained from a
//! [`Connector`]. Keys and values are raw bytes; range queries follow the
//! usual prefix / `[from, end)` semantics of the store:
//!
//! - an empty `end` selects the single key `from`
//! - an `end` of `"\0"` selects every key from `from` onwards

use std::fmt;

use async_trait::async_trait;
use kvkeeper_config::BackendConfig;
use serde::{Deserialize, Serialize};

use crate::error::BackendResult;

/// Range end meaning "no upper bound".
pub const OPEN_END: &[u8] = b"\0";

/// Longest lease time-to-live the store grants, in seconds.
pub const MAX_LEASE_TTL: i64 = 9_000_000_000;

/// Name of the built-in superuser.
pub const ROOT_USER: &str = "root";

/// Credentials used to open a backend connection.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Backend endpoint address.
    pub address: String,
    /// User name; empty for anonymous access.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credential {
    /// Create a credential.
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Key identifying this credential's connection in the connection cache.
    pub fn cache_key(&self) -> String {
        connection_key(&self.address, &self.username)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection cache key for an address and user.
pub fn connection_key(address: &str, username: &str) -> String {
    format!("{address}-{username}")
}

/// A stored key with its metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Revision at which the key was created.
    pub create_revision: i64,
    /// Revision of the last modification.
    pub mod_revision: i64,
    /// Number of modifications since creation.
    pub version: i64,
    /// Attached lease id, 0 when none.
    pub lease: i64,
}

/// Which keys a range query selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeRequest {
    /// Every key starting with the given bytes.
    Prefix(Vec<u8>),
    /// Keys in `[from, end)`, with the empty and `"\0"` end conventions.
    Between { from: Vec<u8>, end: Vec<u8> },
}

/// Access granted by a permission entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    Read,
    Write,
    ReadWrite,
}

impl PermissionKind {
    /// Whether this grant allows reading.
    pub fn grants_read(self) -> bool {
        matches!(self, PermissionKind::Read | PermissionKind::ReadWrite)
    }

    /// Whether this grant allows writing.
    pub fn grants_write(self) -> bool {
        matches!(self, PermissionKind::Write | PermissionKind::ReadWrite)
    }
}

/// A permission entry attached to a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub kind: PermissionKind,
    pub key: Vec<u8>,
    pub range_end: Vec<u8>,
}

impl Permission {
    /// Create a permission over `[key, range_end)`.
    pub fn new(kind: PermissionKind, key: impl Into<Vec<u8>>, range_end: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            key: key.into(),
            range_end: range_end.into(),
        }
    }
}

/// Status reported by the backend member answering the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterStatus {
    pub version: String,
    /// Physical database size in bytes.
    pub db_size: i64,
    /// Logical database size in use in bytes.
    pub db_size_in_use: i64,
    /// Member id of the current leader.
    pub leader: u64,
}

/// A cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: u64,
    pub name: String,
}

/// A live connection to a backend.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Endpoint this client is connected to.
    fn endpoint(&self) -> &str;

    /// User the client authenticated as; empty for anonymous clients.
    fn username(&self) -> &str;

    /// Password the client authenticated with.
    fn password(&self) -> &str;

    /// Fetch a single key.
    async fn get(&self, key: &[u8]) -> BackendResult<Option<KeyValue>>;

    /// Fetch a range of keys, sorted by key. With `keys_only` values are empty.
    async fn range(&self, request: &RangeRequest, keys_only: bool) -> BackendResult<Vec<KeyValue>>;

    /// Write a key, returning the previous key-value if there was one.
    async fn put(&self, key: &[u8], value: &[u8], lease: Option<i64>)
    -> BackendResult<Option<KeyValue>>;

    /// Delete a key, or every key under it when `prefix` is set.
    async fn delete(&self, key: &[u8], prefix: bool) -> BackendResult<u64>;

    /// Grant a lease with the given time-to-live in seconds.
    async fn lease_grant(&self, ttl_secs: i64) -> BackendResult<i64>;

    /// Remaining time-to-live of a lease in seconds, -1 when expired.
    async fn lease_time_to_live(&self, lease: i64) -> BackendResult<i64>;

    /// Verify a user name and password.
    async fn authenticate(&self, username: &str, password: &str) -> BackendResult<()>;

    /// Whether authentication is enabled on the backend.
    async fn auth_status(&self) -> BackendResult<bool>;

    /// Roles granted to a user.
    async fn user_roles(&self, username: &str) -> BackendResult<Vec<String>>;

    /// Permission entries of a role.
    async fn role_permissions(&self, role: &str) -> BackendResult<Vec<Permission>>;

    /// Status of the answering member.
    async fn status(&self) -> BackendResult<ClusterStatus>;

    /// Cluster members.
    async fn members(&self) -> BackendResult<Vec<Member>>;

    /// Release the connection. Called exactly once by the owning handle.
    fn close(&self) -> BackendResult<()>;
}

/// Opens backend connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `backend` as the user in `credential`.
    async fn connect(
        &self,
        backend: &BackendConfig,
        credential: &Credential,
    ) -> BackendResult<Box<dyn KvClient>>;
}

/// Smallest key greater than every key with the given prefix.
///
/// Returns [`OPEN_END`] when no such key exists (empty prefix or all
/// `0xff` bytes).
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    OPEN_END.to_vec()
}
