//! In-process backend.
//!
//! [`MemoryBackend`] keeps a sorted keyspace with revisions, leases,
//! users and roles in process memory and serves it through the same
//! [`KvClient`] contract a network client would. Grants are enforced the
//! way the store enforces them once authentication is enabled: a request
//! must fall entirely inside one permission range of one of the caller's
//! roles, and `root` may do anything.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kvkeeper_config::BackendConfig;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::backend::{
    ClusterStatus, Connector, Credential, KeyValue, KvClient, MAX_LEASE_TTL, Member, OPEN_END,
    Permission, ROOT_USER, RangeRequest, prefix_end,
};
use crate::error::{BackendError, BackendResult};

const SERVER_VERSION: &str = "3.5.0";

#[derive(Debug)]
struct Lease {
    expires_at: Instant,
}

#[derive(Debug)]
struct User {
    password: String,
    roles: Vec<String>,
}

#[derive(Debug)]
struct State {
    kvs: BTreeMap<Vec<u8>, KeyValue>,
    revision: i64,
    leases: HashMap<i64, Lease>,
    next_lease: i64,
    users: HashMap<String, User>,
    roles: HashMap<String, Vec<Permission>>,
    auth_enabled: bool,
    member: Member,
    range_requests: Vec<RangeRequest>,
    opened: usize,
    closed: usize,
}

impl State {
    fn expire_leases(&mut self) {
        let now = Instant::now();
        let expired: Vec<i64> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        if expired.is_empty() {
            return;
        }

        for id in &expired {
            self.leases.remove(id);
        }
        let before = self.kvs.len();
        self.kvs.retain(|_, kv| !expired.contains(&kv.lease));
        if self.kvs.len() != before {
            self.revision += 1;
        }
    }

    fn select(&self, from: &[u8], end: &[u8]) -> Vec<KeyValue> {
        if end.is_empty() {
            return self.kvs.get(from).cloned().into_iter().collect();
        }
        let upper = if end == OPEN_END {
            Bound::Unbounded
        } else if end <= from {
            return Vec::new();
        } else {
            Bound::Excluded(end)
        };
        self.kvs
            .range::<[u8], _>((Bound::Included(from), upper))
            .map(|(_, kv)| kv.clone())
            .collect()
    }

    fn is_root(&self, user: &str) -> bool {
        user == ROOT_USER
            || self
                .users
                .get(user)
                .is_some_and(|u| u.roles.iter().any(|r| r == ROOT_USER))
    }

    fn authorize(&self, user: &str, from: &[u8], end: &[u8], write: bool) -> BackendResult<()> {
        if !self.auth_enabled {
            return Ok(());
        }
        if user.is_empty() {
            return Err(BackendError::Rejected(
                "etcdserver: user name is empty".to_string(),
            ));
        }
        if self.is_root(user) {
            return Ok(());
        }
        let account = self.users.get(user).ok_or_else(|| {
            BackendError::Rejected("etcdserver: user name not found".to_string())
        })?;

        let allowed = account
            .roles
            .iter()
            .filter_map(|role| self.roles.get(role))
            .flatten()
            .filter(|perm| {
                if write {
                    perm.kind.grants_write()
                } else {
                    perm.kind.grants_read()
                }
            })
            .any(|perm| covers(&perm.key, &perm.range_end, from, end));

        if allowed {
            Ok(())
        } else {
            Err(BackendError::Rejected(
                "etcdserver: permission denied".to_string(),
            ))
        }
    }

    fn db_size(&self) -> i64 {
        self.kvs
            .values()
            .map(|kv| (kv.key.len() + kv.value.len()) as i64)
            .sum()
    }
}

/// Interval `[start, end)` selected by a key and range end; `None` end is unbounded.
fn interval(key: &[u8], end: &[u8]) -> (Vec<u8>, Option<Vec<u8>>) {
    if end.is_empty() {
        let mut single = key.to_vec();
        single.push(0);
        (key.to_vec(), Some(single))
    } else if end == OPEN_END {
        (key.to_vec(), None)
    } else {
        (key.to_vec(), Some(end.to_vec()))
    }
}

fn covers(perm_key: &[u8], perm_end: &[u8], from: &[u8], end: &[u8]) -> bool {
    let (grant_start, grant_end) = interval(perm_key, perm_end);
    let (start, stop) = interval(from, end);
    if grant_start > start {
        return false;
    }
    match (grant_end, stop) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(grant_end), Some(stop)) => stop <= grant_end,
    }
}

fn span(request: &RangeRequest) -> (Vec<u8>, Vec<u8>) {
    match request {
        RangeRequest::Prefix(prefix) if prefix.is_empty() => (Vec::new(), OPEN_END.to_vec()),
        RangeRequest::Prefix(prefix) => (prefix.clone(), prefix_end(prefix)),
        RangeRequest::Between { from, end } => (from.clone(), end.clone()),
    }
}

/// A key-value store living in process memory.
///
/// Cloning yields another handle to the same data.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new("default")
    }
}

impl MemoryBackend {
    /// Create an empty backend whose single member has the given name.
    pub fn new(member_name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                kvs: BTreeMap::new(),
                revision: 1,
                leases: HashMap::new(),
                next_lease: 1,
                users: HashMap::new(),
                roles: HashMap::new(),
                auth_enabled: false,
                member: Member {
                    id: 1,
                    name: member_name.into(),
                },
                range_requests: Vec::new(),
                opened: 0,
                closed: 0,
            })),
        }
    }

    /// Create or replace a user.
    pub fn add_user(&self, name: &str, password: &str, roles: &[&str]) {
        self.state.lock().users.insert(
            name.to_string(),
            User {
                password: password.to_string(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
        );
    }

    /// Create or replace a role.
    pub fn add_role(&self, name: &str, permissions: Vec<Permission>) {
        self.state
            .lock()
            .roles
            .insert(name.to_string(), permissions);
    }

    /// Turn on authentication and permission checks.
    pub fn enable_auth(&self) {
        self.state.lock().auth_enabled = true;
    }

    /// Write a key bypassing permission checks.
    pub fn seed(&self, key: &str, value: &str) {
        let mut state = self.state.lock();
        write_key(&mut state, key.as_bytes(), value.as_bytes(), 0);
    }

    /// Every range request served so far, oldest first.
    pub fn range_requests(&self) -> Vec<RangeRequest> {
        self.state.lock().range_requests.clone()
    }

    /// Number of client connections opened.
    pub fn opened_connections(&self) -> usize {
        self.state.lock().opened
    }

    /// Number of client connections closed.
    pub fn closed_connections(&self) -> usize {
        self.state.lock().closed
    }

    /// Open a client without going through a [`Connector`].
    pub fn client(&self, endpoint: &str, credential: &Credential) -> BackendResult<MemoryClient> {
        let mut state = self.state.lock();
        if state.auth_enabled && !credential.username.is_empty() {
            let valid = state
                .users
                .get(&credential.username)
                .is_some_and(|u| u.password == credential.password);
            if !valid {
                return Err(BackendError::Rejected(
                    "etcdserver: authentication failed, invalid user ID or password".to_string(),
                ));
            }
        }
        state.opened += 1;

        Ok(MemoryClient {
            backend: self.clone(),
            endpoint: endpoint.to_string(),
            username: credential.username.clone(),
            password: credential.password.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

fn write_key(state: &mut State, key: &[u8], value: &[u8], lease: i64) -> Option<KeyValue> {
    state.revision += 1;
    let revision = state.revision;
    let previous = state.kvs.get(key).cloned();
    let (create_revision, version) = match &previous {
        Some(prev) => (prev.create_revision, prev.version + 1),
        None => (revision, 1),
    };
    state.kvs.insert(
        key.to_vec(),
        KeyValue {
            key: key.to_vec(),
            value: value.to_vec(),
            create_revision,
            mod_revision: revision,
            version,
            lease,
        },
    );
    previous
}

/// Client for a [`MemoryBackend`].
pub struct MemoryClient {
    backend: MemoryBackend,
    endpoint: String,
    username: String,
    password: String,
    closed: AtomicBool,
}

impl MemoryClient {
    fn state(&self) -> BackendResult<MutexGuard<'_, State>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        let mut state = self.backend.state.lock();
        state.expire_leases();
        Ok(state)
    }
}

#[async_trait]
impl KvClient for MemoryClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn password(&self) -> &str {
        &self.password
    }

    async fn get(&self, key: &[u8]) -> BackendResult<Option<KeyValue>> {
        let state = self.state()?;
        state.authorize(&self.username, key, b"", false)?;
        Ok(state.kvs.get(key).cloned())
    }

    async fn range(&self, request: &RangeRequest, keys_only: bool) -> BackendResult<Vec<KeyValue>> {
        let mut state = self.state()?;
        let (from, end) = span(request);
        state.authorize(&self.username, &from, &end, false)?;
        state.range_requests.push(request.clone());

        let mut kvs = state.select(&from, &end);
        if keys_only {
            for kv in &mut kvs {
                kv.value.clear();
            }
        }
        Ok(kvs)
    }

    async fn put(
        &self,
        key: &[u8],
        value: &[u8],
        lease: Option<i64>,
    ) -> BackendResult<Option<KeyValue>> {
        let mut state = self.state()?;
        state.authorize(&self.username, key, b"", true)?;
        let lease = lease.unwrap_or(0);
        if lease != 0 && !state.leases.contains_key(&lease) {
            return Err(BackendError::Rejected(
                "etcdserver: requested lease not found".to_string(),
            ));
        }
        Ok(write_key(&mut state, key, value, lease))
    }

    async fn delete(&self, key: &[u8], prefix: bool) -> BackendResult<u64> {
        let mut state = self.state()?;
        let (from, end) = if prefix {
            span(&RangeRequest::Prefix(key.to_vec()))
        } else {
            (key.to_vec(), Vec::new())
        };
        state.authorize(&self.username, &from, &end, true)?;

        let doomed: Vec<Vec<u8>> = state
            .select(&from, &end)
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        if !doomed.is_empty() {
            state.revision += 1;
            for key in &doomed {
                state.kvs.remove(key);
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn lease_grant(&self, ttl_secs: i64) -> BackendResult<i64> {
        if ttl_secs <= 0 {
            return Err(BackendError::Request(format!(
                "lease TTL must be positive, got {ttl_secs}"
            )));
        }
        if ttl_secs > MAX_LEASE_TTL {
            return Err(BackendError::Request(
                "etcdserver: too large lease TTL".to_string(),
            ));
        }
        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(ttl_secs.unsigned_abs()))
            .ok_or_else(|| BackendError::Request(format!("lease TTL {ttl_secs}s out of range")))?;

        let mut state = self.state()?;
        let id = state.next_lease;
        state.next_lease += 1;
        state.leases.insert(id, Lease { expires_at });
        Ok(id)
    }

    async fn lease_time_to_live(&self, lease: i64) -> BackendResult<i64> {
        let state = self.state()?;
        Ok(state.leases.get(&lease).map_or(-1, |l| {
            let remaining = l.expires_at.saturating_duration_since(Instant::now());
            // Round up so a freshly granted lease reports its full TTL.
            remaining.as_secs() as i64 + i64::from(remaining.subsec_nanos() > 0)
        }))
    }

    async fn authenticate(&self, username: &str, password: &str) -> BackendResult<()> {
        let state = self.state()?;
        if !state.auth_enabled {
            return Ok(());
        }
        match state.users.get(username) {
            Some(user) if user.password == password => Ok(()),
            _ => Err(BackendError::Rejected(
                "etcdserver: authentication failed, invalid user ID or password".to_string(),
            )),
        }
    }

    async fn auth_status(&self) -> BackendResult<bool> {
        Ok(self.state()?.auth_enabled)
    }

    async fn user_roles(&self, username: &str) -> BackendResult<Vec<String>> {
        let state = self.state()?;
        if state.auth_enabled && self.username != username && !state.is_root(&self.username) {
            return Err(BackendError::Rejected(
                "etcdserver: permission denied".to_string(),
            ));
        }
        state
            .users
            .get(username)
            .map(|u| u.roles.clone())
            .ok_or_else(|| BackendError::Rejected("etcdserver: user name not found".to_string()))
    }

    async fn role_permissions(&self, role: &str) -> BackendResult<Vec<Permission>> {
        let state = self.state()?;
        if state.auth_enabled && !state.is_root(&self.username) {
            let has_role = state
                .users
                .get(&self.username)
                .is_some_and(|u| u.roles.iter().any(|r| r == role));
            if !has_role {
                return Err(BackendError::Rejected(
                    "etcdserver: permission denied".to_string(),
                ));
            }
        }
        state
            .roles
            .get(role)
            .cloned()
            .ok_or_else(|| BackendError::Rejected("etcdserver: role name not found".to_string()))
    }

    async fn status(&self) -> BackendResult<ClusterStatus> {
        let state = self.state()?;
        let size = state.db_size();
        Ok(ClusterStatus {
            version: SERVER_VERSION.to_string(),
            db_size: size,
            db_size_in_use: size,
            leader: state.member.id,
        })
    }

    async fn members(&self) -> BackendResult<Vec<Member>> {
        Ok(vec![self.state()?.member.clone()])
    }

    fn close(&self) -> BackendResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(BackendError::Closed);
        }
        self.backend.state.lock().closed += 1;
        debug!(endpoint = %self.endpoint, username = %self.username, "Memory client closed");
        Ok(())
    }
}

/// Connector routing endpoints to in-process backends.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    backends: HashMap<String, MemoryBackend>,
}

impl MemoryConnector {
    /// Create a connector with no backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `backend` under `endpoints`.
    pub fn with_backend(mut self, endpoints: impl Into<String>, backend: MemoryBackend) -> Self {
        self.backends.insert(endpoints.into(), backend);
        self
    }

    /// Backend served under `endpoints`.
    pub fn backend(&self, endpoints: &str) -> Option<&MemoryBackend> {
        self.backends.get(endpoints)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        backend: &BackendConfig,
        credential: &Credential,
    ) -> BackendResult<Box<dyn KvClient>> {
        let store = self.backends.get(&backend.endpoints).ok_or_else(|| {
            BackendError::Unreachable(format!(
                "dial tcp {}: connection refused",
                backend.endpoints
            ))
        })?;
        let client = store.client(&backend.endpoints, credential)?;
        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PermissionKind;

    fn anonymous(backend: &MemoryBackend) -> MemoryClient {
        backend
            .client("mem", &Credential::new("mem", "", ""))
            .unwrap()
    }

    fn keys(kvs: &[KeyValue]) -> Vec<String> {
        kvs.iter()
            .map(|kv| String::from_utf8_lossy(&kv.key).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_put_get_revisions() {
        let backend = MemoryBackend::default();
        let client = anonymous(&backend);

        assert!(client.put(b"a", b"1", None).await.unwrap().is_none());
        let prev = client.put(b"a", b"2", None).await.unwrap().unwrap();
        assert_eq!(prev.value, b"1");

        let kv = client.get(b"a").await.unwrap().unwrap();
        assert_eq!(kv.value, b"2");
        assert_eq!(kv.create_revision, prev.create_revision);
        assert_eq!(kv.mod_revision, prev.mod_revision + 1);
        assert_eq!(kv.version, 2);
    }

    #[tokio::test]
    async fn test_range_requests() {
        let backend = MemoryBackend::default();
        for key in ["a/1", "a/2", "b", "c"] {
            backend.seed(key, "v");
        }
        let client = anonymous(&backend);

        let prefixed = client
            .range(&RangeRequest::Prefix(b"a/".to_vec()), true)
            .await
            .unwrap();
        assert_eq!(keys(&prefixed), vec!["a/1", "a/2"]);
        assert!(prefixed.iter().all(|kv| kv.value.is_empty()));

        let between = RangeRequest::Between {
            from: b"a/2".to_vec(),
            end: b"c".to_vec(),
        };
        assert_eq!(keys(&client.range(&between, false).await.unwrap()), vec!["a/2", "b"]);

        let open = RangeRequest::Between {
            from: b"b".to_vec(),
            end: OPEN_END.to_vec(),
        };
        assert_eq!(keys(&client.range(&open, false).await.unwrap()), vec!["b", "c"]);

        let single = RangeRequest::Between {
            from: b"c".to_vec(),
            end: Vec::new(),
        };
        assert_eq!(keys(&client.range(&single, false).await.unwrap()), vec!["c"]);

        assert_eq!(backend.range_requests().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let backend = MemoryBackend::default();
        for key in ["dir/", "dir/a", "dir/b", "dirt"] {
            backend.seed(key, "v");
        }
        let client = anonymous(&backend);

        assert_eq!(client.delete(b"dir/", false).await.unwrap(), 1);
        assert_eq!(client.delete(b"dir/", true).await.unwrap(), 2);
        assert!(client.get(b"dirt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lease_expiry_removes_keys() {
        let backend = MemoryBackend::default();
        let client = anonymous(&backend);

        let lease = client.lease_grant(1).await.unwrap();
        assert_eq!(client.lease_time_to_live(lease).await.unwrap(), 1);
        client.put(b"temp", b"v", Some(lease)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(client.get(b"temp").await.unwrap().is_none());
        assert_eq!(client.lease_time_to_live(lease).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_put_with_unknown_lease_rejected() {
        let backend = MemoryBackend::default();
        let client = anonymous(&backend);
        let err = client.put(b"k", b"v", Some(42)).await.unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_lease_ttl_bounds() {
        let backend = MemoryBackend::default();
        let client = anonymous(&backend);

        for ttl in [0, -5, MAX_LEASE_TTL + 1, i64::MAX] {
            let err = client.lease_grant(ttl).await.unwrap_err();
            assert!(matches!(err, BackendError::Request(_)), "ttl {ttl}: {err}");
        }

        let lease = client.lease_grant(MAX_LEASE_TTL).await.unwrap();
        assert!(client.lease_time_to_live(lease).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_auth_checks() {
        let backend = MemoryBackend::default();
        backend.add_user("root", "rootpw", &["root"]);
        backend.add_user("alice", "pw", &["reader"]);
        backend.add_role(
            "reader",
            vec![Permission::new(PermissionKind::Read, "app/", "app0")],
        );
        backend.seed("app/x", "1");
        backend.seed("other", "2");
        backend.enable_auth();

        let bad = backend.client("mem", &Credential::new("mem", "alice", "wrong"));
        assert!(matches!(bad, Err(BackendError::Rejected(_))));

        let alice = backend
            .client("mem", &Credential::new("mem", "alice", "pw"))
            .unwrap();
        assert!(alice.get(b"app/x").await.unwrap().is_some());
        assert!(alice.get(b"other").await.unwrap_err().is_rejection());
        assert!(alice.put(b"app/x", b"2", None).await.unwrap_err().is_rejection());
        assert_eq!(alice.user_roles("alice").await.unwrap(), vec!["reader"]);
        assert!(alice.user_roles("root").await.is_err());

        let anon = anonymous(&backend);
        assert!(anon.auth_status().await.unwrap());
        assert!(anon.get(b"app/x").await.unwrap_err().is_rejection());
    }

    #[tokio::test]
    async fn test_close_once() {
        let backend = MemoryBackend::default();
        let client = anonymous(&backend);

        assert!(client.close().is_ok());
        assert_eq!(client.close(), Err(BackendError::Closed));
        assert_eq!(client.get(b"a").await, Err(BackendError::Closed));
        assert_eq!(backend.closed_connections(), 1);
    }

    #[tokio::test]
    async fn test_connector_unknown_endpoint() {
        let connector = MemoryConnector::new().with_backend("127.0.0.1:2379", MemoryBackend::default());
        let result = connector
            .connect(
                &BackendConfig::adhoc("10.9.9.9:2379"),
                &Credential::new("10.9.9.9:2379", "", ""),
            )
            .await;
        assert!(matches!(result, Err(BackendError::Unreachable(_))));
    }

    #[test]
    fn test_covers() {
        assert!(covers(b"a", b"c", b"a", b"b"));
        assert!(covers(b"a", b"c", b"b", b""));
        assert!(!covers(b"a", b"c", b"b", b"d"));
        assert!(covers(b"a", OPEN_END, b"b", OPEN_END));
        assert!(!covers(b"a", b"z", b"b", OPEN_END));
        assert!(covers(b"x", b"", b"x", b""));
        assert!(!covers(b"x", b"", b"x", b"y"));
    }
}
