//! Configuration for kvkeeper.
//!
//! Provides the server configuration model with:
//! - Listen address and log level
//! - The list of backends an operator may connect to, each with its own
//!   key separator
//! - Session and connection cache lifetimes
//!
//! Files are YAML by default; a `.toml` extension switches to TOML.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{DEFAULT_CONFIG_FILE, LoadedConfig, load_config, load_config_file};
pub use error::{ConfigError, Result};
pub use types::*;
