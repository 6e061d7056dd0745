//! Login and permission scoping against a backend with authentication enabled.

mod common;

use anyhow::Result;
use kvkeeper_store::{MemoryBackend, Permission, PermissionKind};
use serde_json::Value;

fn secured_backend() -> MemoryBackend {
    let backend = MemoryBackend::default();
    backend.add_user("root", "rootpw", &["root"]);
    backend.add_user("alice", "pw", &["app"]);
    backend.add_role(
        "app",
        vec![Permission::new(PermissionKind::ReadWrite, "app/", "app0")],
    );
    for key in ["app/db/host", "app/name", "secret/token", "top"] {
        backend.seed(key, "v");
    }
    backend.enable_auth();
    backend
}

async fn tree_keys(client: &reqwest::Client, base_url: &str, key: &str) -> Result<Vec<String>> {
    let tree: Value = client
        .get(format!("{base_url}/v3/getpath"))
        .query(&[("key", key)])
        .send()
        .await?
        .json()
        .await?;
    Ok(tree["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| n["key"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default())
}

#[tokio::test]
async fn test_wrong_password_asks_for_login() -> Result<()> {
    let server = common::TestServer::start_with(secured_backend()).await?;

    let body = server.connect("alice", "nope").await?;
    assert_eq!(body["status"], "login");
    assert!(server.state.connections.is_empty());
    assert_eq!(server.backend.opened_connections(), 0);

    let body = server.connect("alice", "pw").await?;
    assert_eq!(body["status"], "running");
    assert_eq!(server.state.connections.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_listing_is_scoped_to_grants() -> Result<()> {
    let server = common::TestServer::start_with(secured_backend()).await?;
    server.connect("alice", "pw").await?;

    let keys = tree_keys(&server.client, &server.base_url(), "").await?;
    assert_eq!(keys, vec!["app/"]);

    let keys = tree_keys(&server.client, &server.base_url(), "app/").await?;
    assert_eq!(keys, vec!["app/db/", "app/name"]);

    // Reading outside the grant is refused by the backend.
    let resp = server
        .client
        .get(server.url("/v3/get"))
        .query(&[("key", "secret/token")])
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 403);

    Ok(())
}

#[tokio::test]
async fn test_root_sees_everything() -> Result<()> {
    let server = common::TestServer::start_with(secured_backend()).await?;
    let body = server.connect("root", "rootpw").await?;
    assert_eq!(body["status"], "running");

    let keys = tree_keys(&server.client, &server.base_url(), "").await?;
    assert_eq!(keys, vec!["app/", "secret/", "top"]);

    Ok(())
}

#[tokio::test]
async fn test_second_browser_shares_connection() -> Result<()> {
    let server = common::TestServer::start_with(secured_backend()).await?;
    server.connect("alice", "pw").await?;

    let other = common::browser()?;
    let base = server.base_url();

    let body = common::connect_as(&other, &base, "alice", "").await?;
    assert_eq!(body["status"], "login");
    assert_eq!(body["message"], "Password required");

    let body = common::connect_as(&other, &base, "alice", "wrong").await?;
    assert_eq!(body["status"], "login");

    let body = common::connect_as(&other, &base, "alice", "pw").await?;
    assert_eq!(body["status"], "running");

    assert_eq!(server.state.connections.len(), 1);
    assert_eq!(server.backend.opened_connections(), 1);

    let keys = tree_keys(&other, &base, "app/").await?;
    assert_eq!(keys, vec!["app/db/", "app/name"]);

    Ok(())
}

#[tokio::test]
async fn test_switching_user_opens_new_connection() -> Result<()> {
    let server = common::TestServer::start_with(secured_backend()).await?;
    server.connect("alice", "pw").await?;

    let body = server.connect("root", "rootpw").await?;
    assert_eq!(body["status"], "running");
    assert_eq!(server.state.connections.len(), 2);

    let keys = tree_keys(&server.client, &server.base_url(), "").await?;
    assert_eq!(keys, vec!["app/", "secret/", "top"]);

    Ok(())
}
