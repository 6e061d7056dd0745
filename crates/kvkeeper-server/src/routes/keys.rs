//! Key operations on the session's connected backend.

use axum::{
    Form, Json,
    extract::State,
    response::{IntoResponse, Response},
};
use kvkeeper_store::{MAX_LEASE_TTL, Node, build_tree, sort_listing};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ServerError};
use crate::session::{Connected, SessionCookie};
use crate::state::AppState;

/// A single node.
#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub node: Node,
}

/// A list of nodes.
#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
pub struct PutForm {
    pub key: String,
    #[serde(default)]
    pub value: String,
    /// Lease time-to-live in seconds; empty for no lease.
    #[serde(default)]
    pub ttl: String,
}

#[derive(Debug, Deserialize)]
pub struct GetForm {
    pub key: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    pub key: String,
    #[serde(default)]
    pub dir: String,
}

#[derive(Debug, Deserialize)]
pub struct PathForm {
    #[serde(default)]
    pub key: String,
}

/// Write a key, optionally under a fresh lease.
///
/// The created and modified indexes are derived from the previous value's
/// revisions, and are 0 for a new key.
pub async fn put_handler(
    Connected { client, host, cookie }: Connected,
    Form(form): Form<PutForm>,
) -> Result<(SessionCookie, Json<NodeResponse>)> {
    debug!(host = %host, uname = %client.username(), key = %form.key, "PUT");

    let ttl = if form.ttl.is_empty() {
        0
    } else {
        form.ttl
            .parse::<i64>()
            .map_err(|e| ServerError::BadRequest(format!("ttl parse failed: {e}")))?
    };
    if ttl < 0 {
        return Err(ServerError::BadRequest(format!("ttl must not be negative, got {ttl}")));
    }
    if ttl > MAX_LEASE_TTL {
        return Err(ServerError::BadRequest(format!(
            "ttl must not exceed {MAX_LEASE_TTL} seconds, got {ttl}"
        )));
    }

    let lease = if ttl > 0 {
        Some(client.lease_grant(ttl).await?)
    } else {
        None
    };

    let previous = client
        .put(form.key.as_bytes(), form.value.as_bytes(), lease)
        .await?;
    let (created_index, modified_index) = previous
        .map(|prev| (prev.create_revision + 1, prev.mod_revision + 1))
        .unwrap_or((0, 0));

    let node = Node {
        key: form.key,
        value: Some(form.value),
        ttl,
        created_index,
        modified_index,
        ..Default::default()
    };
    Ok((cookie, Json(NodeResponse { node })))
}

/// Read a single key, or with `prefix=true` list the readable keys under it.
pub async fn get_handler(
    State(state): State<AppState>,
    Connected { client, host, cookie }: Connected,
    Form(form): Form<GetForm>,
) -> Result<Response> {
    debug!(host = %host, uname = %client.username(), key = %form.key, prefix = %form.prefix, "GET");

    if form.prefix == "true" {
        let kvs = state
            .permissions
            .list(&**client, form.key.as_bytes(), true)
            .await?;
        let nodes = kvs.iter().map(Node::leaf).collect();
        return Ok((cookie, Json(NodesResponse { nodes })).into_response());
    }

    let kv = client
        .get(form.key.as_bytes())
        .await?
        .ok_or_else(|| ServerError::NotFound("The key does not exist.".to_string()))?;

    let ttl = if kv.lease > 0 {
        client.lease_time_to_live(kv.lease).await?.max(0)
    } else {
        0
    };

    let node = Node {
        key: form.key,
        value: Some(String::from_utf8_lossy(&kv.value).into_owned()),
        ttl,
        ..Node::leaf(&kv)
    };
    Ok((cookie, Json(NodeResponse { node })).into_response())
}

/// Delete a key, and with `dir=true` everything under it.
pub async fn delete_handler(
    Connected { client, host, cookie }: Connected,
    Form(form): Form<DeleteForm>,
) -> Result<(SessionCookie, &'static str)> {
    debug!(host = %host, uname = %client.username(), key = %form.key, dir = %form.dir, "DELETE");

    client.delete(form.key.as_bytes(), false).await?;
    if form.dir == "true" {
        let removed = client.delete(form.key.as_bytes(), true).await?;
        debug!(key = %form.key, removed, "Deleted directory contents");
    }

    Ok((cookie, "ok"))
}

/// The readable keys under a directory, as a tree split on the backend's separator.
pub async fn getpath_handler(
    State(state): State<AppState>,
    Connected { client, host, cookie }: Connected,
    Form(form): Form<PathForm>,
) -> Result<(SessionCookie, Json<NodesResponse>)> {
    debug!(host = %host, uname = %client.username(), key = %form.key, "GET path");

    let mut kvs = state
        .permissions
        .list(&**client, form.key.as_bytes(), true)
        .await?;
    sort_listing(&mut kvs);

    let separator = state.backend_config(&host).separator;
    let nodes = build_tree(form.key.as_bytes(), separator.as_bytes(), &kvs);
    Ok((cookie, Json(NodesResponse { nodes })))
}
