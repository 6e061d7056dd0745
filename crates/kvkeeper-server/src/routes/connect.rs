//! Backend login.
//!
//! `POST /v3/connect` attaches the browser session to a backend. An
//! existing login for the same host and user is reused; otherwise a cached
//! connection for `host-user` is checked against the presented password, or
//! a new one is opened and registered. The outcome is reported in the body:
//! `running` with cluster info, `login` when the credentials need to be
//! entered again, or `error`.

use axum::{Form, Json, extract::State};
use kvkeeper_session::SessionStore;
use kvkeeper_store::{
    BackendResult, Credential, KvClient, SharedClient, StoreError, connection_key, open_connection,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::session::{BrowserSession, CURRENT_HOST, Login, SessionCookie, login_key};
use crate::state::AppState;

const KB: i64 = 1 << 10;
const MB: i64 = 1 << 20;
const GB: i64 = 1 << 30;

/// Login form.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectForm {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub uname: String,
    #[serde(default)]
    pub passwd: String,
}

/// Cluster summary shown after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub version: String,
    pub size: String,
    pub size_in_use: String,
    /// Name of the leader member.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Connect outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConnectResponse {
    Running { info: ClusterInfo },
    Login { message: String },
    Error { message: String },
}

impl ConnectResponse {
    fn from_failure(error: &StoreError) -> Self {
        if error.needs_login() {
            ConnectResponse::Login {
                message: error.to_string(),
            }
        } else {
            ConnectResponse::Error {
                message: error.to_string(),
            }
        }
    }
}

pub async fn connect_handler(
    State(state): State<AppState>,
    session: BrowserSession,
    Form(form): Form<ConnectForm>,
) -> Result<(SessionCookie, Json<ConnectResponse>)> {
    if form.host.is_empty() {
        return Err(ServerError::BadRequest("host is required".to_string()));
    }

    let deadline = state.config.connect_timeout;
    let response = match tokio::time::timeout(deadline, connect(&state, &session.store, &form)).await {
        Ok(response) => response?,
        Err(_) => {
            warn!(host = %form.host, uname = %form.uname, "Connect timed out");
            ConnectResponse::Error {
                message: format!("connect to {} timed out after {:?}", form.host, deadline),
            }
        }
    };

    Ok((session.cookie, Json(response)))
}

async fn connect(state: &AppState, store: &SessionStore, form: &ConnectForm) -> Result<ConnectResponse> {
    if let Some(response) = resume(state, store, form).await? {
        return Ok(response);
    }

    let key = connection_key(&form.host, &form.uname);
    let cached = state.connections.resolve(&key);
    let reused = cached.is_some();

    let client = match cached {
        Some(client) => {
            if let Err(response) = verify_password(&client, form).await {
                return Ok(response);
            }
            client
        }
        None => {
            let backend = state.backend_config(&form.host);
            let credential = Credential::new(&form.host, &form.uname, &form.passwd);
            match open_connection(state.connector.as_ref(), &backend, &credential).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(host = %form.host, uname = %form.uname, error = %e, "Connect failed");
                    return Ok(ConnectResponse::from_failure(&e));
                }
            }
        }
    };

    let info = match cluster_info(&**client, &form.host).await {
        Ok(info) => info,
        Err(e) => {
            warn!(host = %form.host, error = %e, "Failed to read cluster info");
            return Ok(ConnectResponse::Error {
                message: e.to_string(),
            });
        }
    };

    store.set_as(
        login_key(&form.host),
        &Login {
            host: form.host.clone(),
            uname: form.uname.clone(),
        },
    )?;
    store.set_as(CURRENT_HOST, &form.host)?;

    if !reused && state.connections.register(key, client).is_err() {
        debug!(host = %form.host, uname = %form.uname, "Lost registration race, dropping new connection");
    }

    info!(host = %form.host, uname = %form.uname, "Connected");
    Ok(ConnectResponse::Running { info })
}

/// Reuse the session's existing login for the host when the user did not change.
async fn resume(
    state: &AppState,
    store: &SessionStore,
    form: &ConnectForm,
) -> Result<Option<ConnectResponse>> {
    let Some(login) = store.get_as::<Login>(&login_key(&form.host))? else {
        return Ok(None);
    };
    if !form.uname.is_empty() && form.uname != login.uname {
        debug!(host = %form.host, from = %login.uname, to = %form.uname, "Switching user");
        return Ok(None);
    }
    let Some(client) = state
        .connections
        .resolve(&connection_key(&form.host, &login.uname))
    else {
        return Ok(None);
    };

    let response = match cluster_info(&**client, &form.host).await {
        Ok(info) => {
            store.set_as(CURRENT_HOST, &form.host)?;
            ConnectResponse::Running { info }
        }
        Err(e) => {
            warn!(host = %form.host, uname = %login.uname, error = %e, "Failed to read cluster info");
            ConnectResponse::Error {
                message: e.to_string(),
            }
        }
    };
    Ok(Some(response))
}

/// Check the presented password against a cached connection's.
async fn verify_password(
    client: &SharedClient,
    form: &ConnectForm,
) -> std::result::Result<(), ConnectResponse> {
    if client.password().is_empty() {
        return Ok(());
    }
    if form.passwd.is_empty() {
        return Err(ConnectResponse::Login {
            message: "Password required".to_string(),
        });
    }
    if constant_time_eq(client.password(), &form.passwd) {
        return Ok(());
    }

    client
        .authenticate(&form.uname, &form.passwd)
        .await
        .map_err(|e| {
            warn!(host = %form.host, uname = %form.uname, error = %e, "Authentication failed");
            ConnectResponse::from_failure(&StoreError::AuthenticationFailure(e))
        })
}

/// Version, database sizes and leader name of the cluster.
pub async fn cluster_info(client: &dyn KvClient, host: &str) -> BackendResult<ClusterInfo> {
    let status = client.status().await?;
    let members = client.members().await?;
    let name = members
        .into_iter()
        .find(|m| m.id == status.leader)
        .map(|m| m.name);

    debug!(host = %host, version = %status.version, "Read cluster status");
    Ok(ClusterInfo {
        version: status.version,
        size: size_format(status.db_size),
        size_in_use: size_format(status.db_size_in_use),
        name,
    })
}

/// Human readable byte size with up to two decimals.
pub fn size_format(size: i64) -> String {
    if size > GB {
        format!("{}GB", trim_decimals(size as f64 / GB as f64))
    } else if size > MB {
        format!("{}MB", trim_decimals(size as f64 / MB as f64))
    } else if size > KB {
        format!("{}KB", trim_decimals(size as f64 / KB as f64))
    } else {
        format!("{size}B")
    }
}

fn trim_decimals(value: f64) -> String {
    let formatted = format!("{value:.2}");
    if let Some(whole) = formatted.strip_suffix(".00") {
        whole.to_string()
    } else if let Some(one) = formatted.strip_suffix('0') {
        one.to_string()
    } else {
        formatted
    }
}

/// Compare two strings in constant time.
///
/// Strings of different length compare unequal after a dummy comparison
/// of the same cost.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    if a_bytes.len() == b_bytes.len() {
        a_bytes.ct_eq(b_bytes).into()
    } else {
        let _ = a_bytes.ct_eq(a_bytes);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_format() {
        assert_eq!(size_format(0), "0B");
        assert_eq!(size_format(1024), "1024B");
        assert_eq!(size_format(1536), "1.5KB");
        assert_eq!(size_format(20 * 1024 * 1024 + 1), "20MB");
        assert_eq!(size_format(1_288_490_189), "1.2GB");
        assert_eq!(size_format(1100), "1.07KB");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("s3cret", "s3cret"));
        assert!(!constant_time_eq("s3cret", "s3creT"));
        assert!(!constant_time_eq("short", "longer-password"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn test_connect_response_shape() {
        let running = serde_json::to_value(ConnectResponse::Running {
            info: ClusterInfo {
                version: "3.5.0".to_string(),
                size: "20KB".to_string(),
                size_in_use: "20KB".to_string(),
                name: Some("default".to_string()),
            },
        })
        .unwrap();
        assert_eq!(running["status"], "running");
        assert_eq!(running["info"]["sizeInUse"], "20KB");

        let login = serde_json::to_value(ConnectResponse::Login {
            message: "Password required".to_string(),
        })
        .unwrap();
        assert_eq!(
            login,
            serde_json::json!({"status": "login", "message": "Password required"})
        );
    }
}
