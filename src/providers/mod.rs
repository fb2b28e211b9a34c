//! Configuration provider contract and shared value types
//!
//! A [`ConfigProvider`] is the full observable surface an application depends
//! on: its own identity, the port/host it should serve on, addresses of the
//! services and operators it consumes, generic instance configuration, and
//! topology lookups over the deployment plan.
//!
//! Two strategies implement the contract: [`EnvironmentConfigProvider`]
//! resolves everything from process environment variables, and
//! [`LocalConfigProvider`] resolves everything from the locally running
//! cluster service over HTTP.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::model::{Connection, Kind};

pub mod environment;
pub mod local;

pub use environment::EnvironmentConfigProvider;
pub use local::{AssetStore, ClusterAssetStore, LocalConfigProvider};

/// Port type assumed when the caller passes an empty one
pub const DEFAULT_SERVER_PORT_TYPE: &str = "rest";

/// Resolved identity of a block instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Identity {
    pub system_id: String,
    pub instance_id: String,
}

/// Describes an addressable dependency endpoint
///
/// `port` is canonically a string; numeric ports on the wire are coerced to
/// their decimal form during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceInfo {
    pub host: String,
    #[serde(deserialize_with = "crate::model::string_or_number")]
    pub port: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub protocol: String,
    pub options: Map<String, Value>,
    pub credentials: HashMap<String, String>,
}

/// Username/password pair carried by some resource credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultCredentials {
    pub username: String,
    pub password: String,
}

/// One exposed port of an externally operated resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOperatorPort {
    pub protocol: String,
    pub port: u16,
}

/// Describes an externally operated resource (e.g. a managed database)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOperator {
    pub hostname: String,
    pub ports: HashMap<String, InstanceOperatorPort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Result of a topology query: a peer instance, its block definition and the
/// connections that tie it to the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockInstanceDetails {
    pub instance_id: String,
    pub block: Kind,
    pub connections: Vec<Connection>,
}

/// Shape of a configuration value that references another instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceValue {
    pub id: String,
}

/// Capability surface both resolution strategies implement
///
/// Operations that cannot find a value fail with an explicit error rather
/// than silently returning defaults; the accessors have no failure modes.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Raw block definition this provider was constructed with
    fn block_definition(&self) -> &Value;

    /// Reference of the block this instance runs
    fn block_reference(&self) -> &str;

    /// Identifier of the deployed system (plan) this instance belongs to
    fn system_id(&self) -> &str;

    /// Identifier of this instance within the system
    fn instance_id(&self) -> &str;

    /// Identifier of the resolution strategy ("kubernetes" or "local")
    fn provider_id(&self) -> &str;

    /// Port this instance should listen on for the given logical port type.
    /// An empty `port_type` means [`DEFAULT_SERVER_PORT_TYPE`].
    async fn get_server_port(&self, port_type: &str) -> Result<String>;

    /// Host this instance should bind to
    async fn get_server_host(&self) -> Result<String>;

    /// Network address of a declared service dependency
    async fn get_service_address(&self, resource_name: &str, port_type: &str) -> Result<String>;

    /// Structured descriptor of an externally operated dependency
    async fn get_resource_info(
        &self,
        resource_type: &str,
        port_type: &str,
        resource_name: &str,
    ) -> Result<ResourceInfo>;

    /// Network host of another instance within the same deployment
    async fn get_instance_host(&self, instance_id: &str) -> Result<String>;

    /// Generic lookup into the instance configuration map.
    /// `Ok(None)` on a miss; `Err` only when the configuration source itself
    /// is broken (malformed payload).
    fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Like [`get`](Self::get), returning `default` on a miss
    fn get_or_default(&self, path: &str, default: Value) -> Result<Value> {
        Ok(self.get(path)?.unwrap_or(default))
    }

    /// The instance providing a resource this instance consumes
    async fn get_instance_for_consumer(&self, resource_name: &str) -> Result<BlockInstanceDetails>;

    /// Operator descriptor for an externally managed resource instance
    async fn get_instance_operator(&self, instance_id: &str) -> Result<InstanceOperator>;

    /// All instances consuming a resource this instance provides, one entry
    /// per distinct consumer instance
    async fn get_instances_for_provider(
        &self,
        resource_name: &str,
    ) -> Result<Vec<BlockInstanceDetails>>;
}

/// Derives the environment-variable suffix for a free-form name:
/// uppercased, surrounding whitespace trimmed, `.` `,` `-` replaced by `_`.
pub fn to_env_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '.' | ',' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Identity and overlay state shared by both strategies
///
/// The identity is set exactly once - either from constructor arguments or
/// adopted during identity resolution - and never changes afterwards.
#[derive(Debug, Clone)]
pub struct ProviderIdentity {
    block_ref: String,
    system_id: String,
    instance_id: String,
    block_definition: Value,
    environment: HashMap<String, String>,
}

impl ProviderIdentity {
    pub(crate) fn new(
        block_ref: impl Into<String>,
        system_id: impl Into<String>,
        instance_id: impl Into<String>,
        block_definition: Value,
        environment: HashMap<String, String>,
    ) -> Self {
        Self {
            block_ref: block_ref.into(),
            system_id: system_id.into(),
            instance_id: instance_id.into(),
            block_definition,
            environment,
        }
    }

    pub fn block_reference(&self) -> &str {
        &self.block_ref
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn block_definition(&self) -> &Value {
        &self.block_definition
    }

    pub(crate) fn set_identity(&mut self, identity: &Identity) {
        self.system_id = identity.system_id.clone();
        self.instance_id = identity.instance_id.clone();
    }

    /// Looks up a named variable in the process environment, falling back to
    /// the static environment-configuration overlay.
    pub fn lookup_env(&self, name: &str) -> Option<String> {
        match std::env::var(name) {
            Ok(value) => Some(value),
            Err(_) => self.environment.get(name).cloned(),
        }
    }

    /// Like [`lookup_env`](Self::lookup_env) with a default
    pub fn env_or_default(&self, name: &str, default: &str) -> String {
        self.lookup_env(name)
            .unwrap_or_else(|| default.to_string())
    }
}
