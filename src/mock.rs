//! Canned-value provider for consumer tests
//!
//! Applications that take a [`ConfigProvider`] at their seams can hand them a
//! [`MockConfigProvider`] loaded with exactly the values a test needs.
//! Operations without a canned value fail the same way a real provider
//! reports an unconfigured lookup.
//!
//! ```
//! use kapeta_config::mock::MockConfigProvider;
//! use kapeta_config::providers::ConfigProvider;
//!
//! # tokio_test::block_on(async {
//! let provider = MockConfigProvider::new("my-block:local")
//!     .with_server_port("rest", "8080")
//!     .with_service_address("users", "rest", "http://users:8080");
//!
//! assert_eq!(provider.get_server_port("rest").await.unwrap(), "8080");
//! # });
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{ConfigError, Result};
use crate::providers::{
    BlockInstanceDetails, ConfigProvider, InstanceOperator, ResourceInfo,
    DEFAULT_SERVER_PORT_TYPE,
};

/// [`ConfigProvider`] implementation backed by canned values
#[derive(Default)]
pub struct MockConfigProvider {
    block_ref: String,
    system_id: String,
    instance_id: String,
    block_definition: Value,
    server_host: Option<String>,
    server_ports: HashMap<String, String>,
    service_addresses: HashMap<(String, String), String>,
    resource_infos: HashMap<(String, String), ResourceInfo>,
    instance_hosts: HashMap<String, String>,
    operators: HashMap<String, InstanceOperator>,
    consumer_instances: HashMap<String, BlockInstanceDetails>,
    provider_instances: HashMap<String, Vec<BlockInstanceDetails>>,
    configuration: Map<String, Value>,
}

impl MockConfigProvider {
    pub fn new(block_ref: impl Into<String>) -> Self {
        Self {
            block_ref: block_ref.into(),
            ..Self::default()
        }
    }

    pub fn with_identity(
        mut self,
        system_id: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        self.system_id = system_id.into();
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_block_definition(mut self, block_definition: Value) -> Self {
        self.block_definition = block_definition;
        self
    }

    pub fn with_server_host(mut self, host: impl Into<String>) -> Self {
        self.server_host = Some(host.into());
        self
    }

    pub fn with_server_port(mut self, port_type: impl Into<String>, port: impl Into<String>) -> Self {
        self.server_ports.insert(port_type.into(), port.into());
        self
    }

    pub fn with_service_address(
        mut self,
        resource_name: impl Into<String>,
        port_type: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        self.service_addresses
            .insert((resource_name.into(), port_type.into()), address.into());
        self
    }

    pub fn with_resource_info(
        mut self,
        resource_name: impl Into<String>,
        port_type: impl Into<String>,
        info: ResourceInfo,
    ) -> Self {
        self.resource_infos
            .insert((resource_name.into(), port_type.into()), info);
        self
    }

    pub fn with_instance_host(
        mut self,
        instance_id: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        self.instance_hosts.insert(instance_id.into(), host.into());
        self
    }

    pub fn with_instance_operator(
        mut self,
        instance_id: impl Into<String>,
        operator: InstanceOperator,
    ) -> Self {
        self.operators.insert(instance_id.into(), operator);
        self
    }

    pub fn with_instance_for_consumer(
        mut self,
        resource_name: impl Into<String>,
        details: BlockInstanceDetails,
    ) -> Self {
        self.consumer_instances.insert(resource_name.into(), details);
        self
    }

    pub fn with_instances_for_provider(
        mut self,
        resource_name: impl Into<String>,
        details: Vec<BlockInstanceDetails>,
    ) -> Self {
        self.provider_instances.insert(resource_name.into(), details);
        self
    }

    pub fn with_config_value(mut self, path: impl Into<String>, value: Value) -> Self {
        self.configuration.insert(path.into(), value);
        self
    }

    fn missing<T>(what: impl Into<String>) -> Result<T> {
        Err(ConfigError::MissingValue(what.into()))
    }
}

#[async_trait]
impl ConfigProvider for MockConfigProvider {
    fn block_definition(&self) -> &Value {
        &self.block_definition
    }

    fn block_reference(&self) -> &str {
        &self.block_ref
    }

    fn system_id(&self) -> &str {
        &self.system_id
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn provider_id(&self) -> &str {
        "mock"
    }

    async fn get_server_port(&self, port_type: &str) -> Result<String> {
        let port_type = if port_type.is_empty() {
            DEFAULT_SERVER_PORT_TYPE
        } else {
            port_type
        };
        match self.server_ports.get(port_type) {
            Some(port) => Ok(port.clone()),
            None => Self::missing(format!("server port {port_type}")),
        }
    }

    async fn get_server_host(&self) -> Result<String> {
        match &self.server_host {
            Some(host) => Ok(host.clone()),
            None => Self::missing("server host"),
        }
    }

    async fn get_service_address(&self, resource_name: &str, port_type: &str) -> Result<String> {
        let key = (resource_name.to_string(), port_type.to_string());
        match self.service_addresses.get(&key) {
            Some(address) => Ok(address.clone()),
            None => Self::missing(format!("service address {resource_name}/{port_type}")),
        }
    }

    async fn get_resource_info(
        &self,
        _resource_type: &str,
        port_type: &str,
        resource_name: &str,
    ) -> Result<ResourceInfo> {
        let key = (resource_name.to_string(), port_type.to_string());
        match self.resource_infos.get(&key) {
            Some(info) => Ok(info.clone()),
            None => Self::missing(format!("resource {resource_name}/{port_type}")),
        }
    }

    async fn get_instance_host(&self, instance_id: &str) -> Result<String> {
        match self.instance_hosts.get(instance_id) {
            Some(host) => Ok(host.clone()),
            None => Err(ConfigError::UnknownInstance(instance_id.to_string())),
        }
    }

    fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.configuration.get(path).cloned())
    }

    async fn get_instance_for_consumer(&self, resource_name: &str) -> Result<BlockInstanceDetails> {
        match self.consumer_instances.get(resource_name) {
            Some(details) => Ok(details.clone()),
            None => Err(ConfigError::ConnectionNotFound(resource_name.to_string())),
        }
    }

    async fn get_instance_operator(&self, instance_id: &str) -> Result<InstanceOperator> {
        match self.operators.get(instance_id) {
            Some(operator) => Ok(operator.clone()),
            None => Self::missing(format!("operator {instance_id}")),
        }
    }

    async fn get_instances_for_provider(
        &self,
        resource_name: &str,
    ) -> Result<Vec<BlockInstanceDetails>> {
        match self.provider_instances.get(resource_name) {
            Some(details) => Ok(details.clone()),
            None => Self::missing(format!("provider instances {resource_name}")),
        }
    }
}
