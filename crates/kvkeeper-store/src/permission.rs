//! Permission-scoped key listing.

use tracing::debug;

use crate::backend::{KeyValue, KvClient, ROOT_USER, RangeRequest};
use crate::error::{Result, StoreError};

/// A half-open byte range `[from, end)` of the keyspace.
///
/// An empty `end` selects the single key `from`; an `end` of `"\0"`
/// selects everything from `from` onwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub from: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(from: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            from: from.into(),
            end: end.into(),
        }
    }
}

/// What part of the keyspace a connection may read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// The whole keyspace.
    Unrestricted,
    /// Only these ranges, in role order. Duplicates are kept.
    Ranges(Vec<KeyRange>),
}

/// Resolves the readable key ranges of a connection's user.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    superuser: String,
}

impl Default for PermissionResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionResolver {
    pub fn new() -> Self {
        Self {
            superuser: ROOT_USER.to_string(),
        }
    }

    /// Treat `name` as the superuser instead of `root`.
    pub fn with_superuser(mut self, name: impl Into<String>) -> Self {
        self.superuser = name.into();
        self
    }

    /// Resolve what `client`'s user may read.
    ///
    /// Anonymous connections and the superuser see everything. For anyone
    /// else every read or read-write grant of every role is collected; a
    /// failed role or permission lookup fails the whole resolution.
    pub async fn resolve(&self, client: &dyn KvClient) -> Result<Visibility> {
        let username = client.username();
        if username.is_empty() || username == self.superuser {
            return Ok(Visibility::Unrestricted);
        }

        let roles = client
            .user_roles(username)
            .await
            .map_err(|source| StoreError::PermissionLookupFailure {
                context: format!("get user '{username}' failed"),
                source,
            })?;

        let mut ranges = Vec::new();
        for role in &roles {
            let permissions = client.role_permissions(role).await.map_err(|source| {
                StoreError::PermissionLookupFailure {
                    context: format!("get role '{role}' failed"),
                    source,
                }
            })?;
            ranges.extend(
                permissions
                    .into_iter()
                    .filter(|p| p.kind.grants_read())
                    .map(|p| KeyRange::new(p.key, p.range_end)),
            );
        }

        debug!(uname = %username, roles = roles.len(), ranges = ranges.len(), "Resolved permitted ranges");
        Ok(Visibility::Ranges(ranges))
    }

    /// Keep only the ranges starting under `prefix`.
    pub fn scope_to_prefix(ranges: Vec<KeyRange>, prefix: &[u8]) -> Vec<KeyRange> {
        ranges
            .into_iter()
            .filter(|r| r.from.starts_with(prefix))
            .collect()
    }

    /// List the keys under `prefix` that `client`'s user may read.
    ///
    /// Restricted users get one range query per permitted range, results
    /// concatenated in range order. Any failing range fails the listing.
    pub async fn list(
        &self,
        client: &dyn KvClient,
        prefix: &[u8],
        keys_only: bool,
    ) -> Result<Vec<KeyValue>> {
        match self.resolve(client).await? {
            Visibility::Unrestricted => client
                .range(&RangeRequest::Prefix(prefix.to_vec()), keys_only)
                .await
                .map_err(|source| StoreError::RangeQueryFailure {
                    from: String::from_utf8_lossy(prefix).into_owned(),
                    source,
                }),
            Visibility::Ranges(ranges) => {
                let mut kvs = Vec::new();
                for range in Self::scope_to_prefix(ranges, prefix) {
                    let from = String::from_utf8_lossy(&range.from).into_owned();
                    let request = RangeRequest::Between {
                        from: range.from,
                        end: range.end,
                    };
                    let found = client
                        .range(&request, keys_only)
                        .await
                        .map_err(|source| StoreError::RangeQueryFailure { from, source })?;
                    kvs.extend(found);
                }
                Ok(kvs)
            }
        }
    }
}
