//! API routes.

pub mod connect;
pub mod health;
pub mod hosts;
pub mod keys;

pub use connect::{ClusterInfo, ConnectForm, ConnectResponse, connect_handler, size_format};
pub use health::{HealthResponse, health_routes};
pub use hosts::{HostInfo, HostsResponse, hosts_handler};
pub use keys::{
    NodeResponse, NodesResponse, delete_handler, get_handler, getpath_handler, put_handler,
};
