//! Configured backends.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// One backend offered to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub host: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HostsResponse {
    pub hosts: Vec<HostInfo>,
}

/// List the configured backends in config order.
pub async fn hosts_handler(State(state): State<AppState>) -> Json<HostsResponse> {
    let hosts = state
        .keeper
        .backends
        .iter()
        .map(|b| HostInfo {
            host: b.endpoints.clone(),
            name: b.name.clone(),
        })
        .collect();

    Json(HostsResponse { hosts })
}
