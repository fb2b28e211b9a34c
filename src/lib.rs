//! Kapeta configuration SDK
//!
//! Service instances use this crate to discover their own network identity,
//! resolve the addresses of the services and operators they depend on, and
//! read instance-scoped configuration.
//!
//! Two resolution strategies implement the [`ConfigProvider`] contract:
//!
//! - [`providers::EnvironmentConfigProvider`] reads everything from process
//!   environment variables - the shape an orchestrated (Kubernetes)
//!   deployment injects.
//! - [`providers::LocalConfigProvider`] talks to the locally running cluster
//!   service over HTTP and registers the instance with it - the shape of a
//!   local development run.
//!
//! [`Config`] picks the strategy from the declared system type and resolves
//! it once per application:
//!
//! ```no_run
//! use kapeta_config::Config;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::new();
//! let provider = config.init("/path/to/block").await?;
//! let port = provider.get_server_port("rest").await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod mock;
pub mod model;
pub mod providers;

pub use bootstrap::Config;
pub use error::{ConfigError, Result};
pub use providers::{
    BlockInstanceDetails, ConfigProvider, EnvironmentConfigProvider, Identity, InstanceOperator,
    InstanceOperatorPort, InstanceValue, LocalConfigProvider, ResourceInfo,
    DEFAULT_SERVER_PORT_TYPE,
};
