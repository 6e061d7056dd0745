//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use kvkeeper_config::{BackendConfig, KeeperConfig};
use kvkeeper_server::{AppState, Server, ServerConfig};
use kvkeeper_store::{MemoryBackend, MemoryConnector};

/// Endpoint the in-process backend is served under.
pub const HOST: &str = "127.0.0.1:2379";

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// Cookie-keeping HTTP client, one browser.
    pub client: Client,
    /// The backend behind [`HOST`].
    pub backend: MemoryBackend,
    /// Application state shared with the running server.
    pub state: AppState,
    shutdown: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server over an empty backend without authentication.
    pub async fn start() -> Result<Self> {
        Self::start_with(MemoryBackend::default()).await
    }

    /// Start a server over the given backend.
    pub async fn start_with(backend: MemoryBackend) -> Result<Self> {
        let addr = find_available_port().await?;

        let mut keeper = KeeperConfig::default();
        keeper.backends = vec![BackendConfig {
            name: "test".to_string(),
            ..BackendConfig::adhoc(HOST)
        }];

        let connector = MemoryConnector::new().with_backend(HOST, backend.clone());
        let config = ServerConfig::new()
            .with_bind_address(addr)
            .with_request_logging(false);
        let state = AppState::new(config, keeper, connector);

        let shutdown = CancellationToken::new();
        let server = Server::new(state.clone());
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let _ = server.run_on(addr, token).await;
        });

        let client = browser()?;
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            backend,
            state,
            shutdown,
            _handle: handle,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Log in with this server's browser client.
    pub async fn connect(&self, uname: &str, passwd: &str) -> Result<serde_json::Value> {
        connect_as(&self.client, &self.base_url(), uname, passwd).await
    }

    /// Check if server is healthy.
    pub async fn health(&self) -> Result<bool> {
        let resp = self.client.get(self.url("/health")).send().await?;
        Ok(resp.status().is_success())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A fresh browser with its own cookie jar.
pub fn browser() -> Result<Client> {
    Ok(Client::builder().cookie_store(true).build()?)
}

/// Log in to [`HOST`] with `client`.
pub async fn connect_as(
    client: &Client,
    base_url: &str,
    uname: &str,
    passwd: &str,
) -> Result<serde_json::Value> {
    let resp = client
        .post(format!("{base_url}/v3/connect"))
        .form(&[("host", HOST), ("uname", uname), ("passwd", passwd)])
        .send()
        .await?;
    Ok(resp.json().await?)
}

/// Find an available port for the test server.
async fn find_available_port() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
