//! Environment-variable-driven resolution strategy
//!
//! In an orchestrated deployment the platform injects everything an instance
//! needs as environment variables. Each operation derives a deterministic
//! variable name from its logical inputs, looks it up in the process
//! environment (falling back to the static overlay file), and decodes
//! structured payloads from JSON. A malformed payload means the deployment
//! itself is broken and is surfaced as an explicit error.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::read_config_file;
use crate::error::{ConfigError, Result};
use crate::providers::{
    to_env_name, BlockInstanceDetails, ConfigProvider, InstanceOperator, ProviderIdentity,
    ResourceInfo, DEFAULT_SERVER_PORT_TYPE,
};

const KAPETA_INSTANCE_CONFIG: &str = "KAPETA_INSTANCE_CONFIG";
const KAPETA_BLOCK_HOSTS: &str = "KAPETA_BLOCK_HOSTS";

const DEFAULT_SERVER_PORT: &str = "80";
const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Resolves all configuration from process environment variables
pub struct EnvironmentConfigProvider {
    identity: ProviderIdentity,
    configuration: OnceLock<Map<String, Value>>,
    instance_hosts: OnceLock<HashMap<String, String>>,
}

impl EnvironmentConfigProvider {
    /// Creates the provider, loading the environment-configuration overlay.
    pub fn new(
        block_ref: impl Into<String>,
        system_id: impl Into<String>,
        instance_id: impl Into<String>,
        block_definition: Value,
    ) -> Result<Self> {
        let environment = read_config_file()?;
        Ok(Self {
            identity: ProviderIdentity::new(
                block_ref,
                system_id,
                instance_id,
                block_definition,
                environment,
            ),
            configuration: OnceLock::new(),
            instance_hosts: OnceLock::new(),
        })
    }

    fn decode_env<T: DeserializeOwned>(&self, variable: &str, what: &'static str) -> Result<T> {
        let raw = self.identity.lookup_env(variable).ok_or_else(|| {
            ConfigError::MissingEnvironmentVariable {
                what,
                variable: variable.to_string(),
            }
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::InvalidEnvironmentPayload {
            variable: variable.to_string(),
            source,
        })
    }

    /// Parses `KAPETA_INSTANCE_CONFIG` at most once. A missing variable is a
    /// miss on every call (nothing is cached); a present variable is parsed
    /// and cached exactly once.
    fn configuration(&self) -> Result<Option<&Map<String, Value>>> {
        if let Some(map) = self.configuration.get() {
            return Ok(Some(map));
        }

        let Some(raw) = self.identity.lookup_env(KAPETA_INSTANCE_CONFIG) else {
            debug!(
                "missing environment variable for instance configuration: {}",
                KAPETA_INSTANCE_CONFIG
            );
            return Ok(None);
        };

        let map: Map<String, Value> = serde_json::from_str(&raw).map_err(|source| {
            ConfigError::InvalidEnvironmentPayload {
                variable: KAPETA_INSTANCE_CONFIG.to_string(),
                source,
            }
        })?;

        Ok(Some(self.configuration.get_or_init(|| map)))
    }

    fn instance_hosts(&self) -> Result<&HashMap<String, String>> {
        if let Some(hosts) = self.instance_hosts.get() {
            return Ok(hosts);
        }

        let hosts: HashMap<String, String> =
            self.decode_env(KAPETA_BLOCK_HOSTS, "block hosts")?;
        Ok(self.instance_hosts.get_or_init(|| hosts))
    }
}

#[async_trait]
impl ConfigProvider for EnvironmentConfigProvider {
    fn block_definition(&self) -> &Value {
        self.identity.block_definition()
    }

    fn block_reference(&self) -> &str {
        self.identity.block_reference()
    }

    fn system_id(&self) -> &str {
        self.identity.system_id()
    }

    fn instance_id(&self) -> &str {
        self.identity.instance_id()
    }

    fn provider_id(&self) -> &str {
        "kubernetes"
    }

    async fn get_server_port(&self, port_type: &str) -> Result<String> {
        let port_type = if port_type.is_empty() {
            DEFAULT_SERVER_PORT_TYPE
        } else {
            port_type
        };

        let variable = format!("KAPETA_PROVIDER_PORT_{}", to_env_name(port_type));
        Ok(self
            .identity
            .env_or_default(&variable, DEFAULT_SERVER_PORT))
    }

    async fn get_server_host(&self) -> Result<String> {
        // Any host within the container
        Ok(self
            .identity
            .env_or_default("KAPETA_PROVIDER_HOST", DEFAULT_SERVER_HOST))
    }

    async fn get_service_address(&self, resource_name: &str, port_type: &str) -> Result<String> {
        let variable = format!(
            "KAPETA_CONSUMER_SERVICE_{}_{}",
            to_env_name(resource_name),
            to_env_name(port_type)
        );
        self.identity.lookup_env(&variable).ok_or(
            ConfigError::MissingEnvironmentVariable {
                what: "internal resource",
                variable,
            },
        )
    }

    async fn get_resource_info(
        &self,
        _resource_type: &str,
        port_type: &str,
        resource_name: &str,
    ) -> Result<ResourceInfo> {
        let variable = format!(
            "KAPETA_CONSUMER_RESOURCE_{}_{}",
            to_env_name(resource_name),
            to_env_name(port_type)
        );
        self.decode_env(&variable, "operator resource")
    }

    async fn get_instance_host(&self, instance_id: &str) -> Result<String> {
        let hosts = self.instance_hosts()?;
        hosts
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownInstance(instance_id.to_string()))
    }

    fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self
            .configuration()?
            .and_then(|map| map.get(path))
            .cloned())
    }

    async fn get_instance_for_consumer(&self, resource_name: &str) -> Result<BlockInstanceDetails> {
        let variable = format!(
            "KAPETA_INSTANCE_FOR_CONSUMER_{}",
            to_env_name(resource_name)
        );
        self.decode_env(&variable, "consumer instance")
    }

    async fn get_instance_operator(&self, instance_id: &str) -> Result<InstanceOperator> {
        let variable = format!("KAPETA_INSTANCE_OPERATOR_{}", to_env_name(instance_id));
        self.decode_env(&variable, "instance operator")
    }

    async fn get_instances_for_provider(
        &self,
        resource_name: &str,
    ) -> Result<Vec<BlockInstanceDetails>> {
        let variable = format!(
            "KAPETA_INSTANCES_FOR_PROVIDER_{}",
            to_env_name(resource_name)
        );
        self.decode_env(&variable, "provider instances")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{env_lock, EnvGuard};

    fn provider() -> EnvironmentConfigProvider {
        EnvironmentConfigProvider::new(
            "block-ref",
            "system-id",
            "instance-id",
            serde_json::json!({"kind": "kapeta/block-type-service"}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn server_port_resolves_per_type_and_defaults_to_rest() {
        let _lock = env_lock();
        let _rest = EnvGuard::set("KAPETA_PROVIDER_PORT_REST", "8080");
        let _grpc = EnvGuard::set("KAPETA_PROVIDER_PORT_GRPC", "8081");

        let provider = provider();
        assert_eq!(provider.get_server_port("rest").await.unwrap(), "8080");
        assert_eq!(provider.get_server_port("grpc").await.unwrap(), "8081");
        assert_eq!(provider.get_server_port("").await.unwrap(), "8080");
    }

    #[tokio::test]
    async fn server_port_falls_back_to_80() {
        let _lock = env_lock();
        let _cleared = EnvGuard::remove("KAPETA_PROVIDER_PORT_HTTP2");

        assert_eq!(provider().get_server_port("http2").await.unwrap(), "80");
    }

    #[tokio::test]
    async fn server_host_defaults_to_all_interfaces() {
        let _lock = env_lock();
        let _cleared = EnvGuard::remove("KAPETA_PROVIDER_HOST");
        assert_eq!(provider().get_server_host().await.unwrap(), "0.0.0.0");

        let _host = EnvGuard::set("KAPETA_PROVIDER_HOST", "localhost");
        assert_eq!(provider().get_server_host().await.unwrap(), "localhost");
    }

    #[tokio::test]
    async fn service_address_errors_name_the_derived_variable() {
        let _lock = env_lock();
        let _foo = EnvGuard::set("KAPETA_CONSUMER_SERVICE_FOO_REST", "10.0.0.1:8080");
        let _bar = EnvGuard::set("KAPETA_CONSUMER_SERVICE_BAR_GRPC", "10.0.0.2:8081");

        let provider = provider();
        assert_eq!(
            provider.get_service_address("foo", "rest").await.unwrap(),
            "10.0.0.1:8080"
        );
        assert_eq!(
            provider.get_service_address("bar", "grpc").await.unwrap(),
            "10.0.0.2:8081"
        );

        let err = provider
            .get_service_address("baz", "rest")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing environment variable for internal resource: KAPETA_CONSUMER_SERVICE_BAZ_REST"
        );
    }

    #[tokio::test]
    async fn resource_info_decodes_either_port_shape() {
        let _lock = env_lock();
        let _foo = EnvGuard::set(
            "KAPETA_CONSUMER_RESOURCE_FOO_REST",
            r#"{"host": "10.0.0.1", "port": "8080"}"#,
        );
        let _bar = EnvGuard::set(
            "KAPETA_CONSUMER_RESOURCE_BAR_GRPC",
            r#"{"host": "10.0.0.2", "port": 8081}"#,
        );

        let provider = provider();
        let info = provider.get_resource_info("db", "rest", "foo").await.unwrap();
        assert_eq!(info.host, "10.0.0.1");
        assert_eq!(info.port, "8080");

        let info = provider.get_resource_info("db", "grpc", "bar").await.unwrap();
        assert_eq!(info.port, "8081");

        let err = provider
            .get_resource_info("db", "rest", "baz")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing environment variable for operator resource: KAPETA_CONSUMER_RESOURCE_BAZ_REST"
        );
    }

    #[tokio::test]
    async fn resource_info_with_malformed_payload_is_fatal() {
        let _lock = env_lock();
        let _bad = EnvGuard::set("KAPETA_CONSUMER_RESOURCE_BROKEN_REST", "not-json");

        let err = provider()
            .get_resource_info("db", "rest", "broken")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnvironmentPayload { .. }
        ));
    }

    #[test]
    fn get_reads_instance_config_and_is_idempotent() {
        let _lock = env_lock();
        let _config = EnvGuard::set("KAPETA_INSTANCE_CONFIG", r#"{"foo": "bar"}"#);

        let provider = provider();
        let first = provider.get("foo").unwrap();
        let second = provider.get("foo").unwrap();
        assert_eq!(first, Some(Value::String("bar".to_string())));
        assert_eq!(first, second);
        assert_eq!(provider.get("baz").unwrap(), None);
    }

    #[test]
    fn get_or_default_fills_misses() {
        let _lock = env_lock();
        let _config = EnvGuard::set("KAPETA_INSTANCE_CONFIG", r#"{"foo": "bar"}"#);

        let provider = provider();
        assert_eq!(
            provider
                .get_or_default("foo", Value::String("qux".into()))
                .unwrap(),
            Value::String("bar".into())
        );
        assert_eq!(
            provider
                .get_or_default("missing", Value::String("qux".into()))
                .unwrap(),
            Value::String("qux".into())
        );
    }

    #[test]
    fn get_without_config_variable_is_a_miss() {
        let _lock = env_lock();
        let _cleared = EnvGuard::remove("KAPETA_INSTANCE_CONFIG");

        assert_eq!(provider().get("anything").unwrap(), None);
    }

    #[test]
    fn malformed_instance_config_is_fatal() {
        let _lock = env_lock();
        let _bad = EnvGuard::set("KAPETA_INSTANCE_CONFIG", "{broken");

        assert!(matches!(
            provider().get("foo"),
            Err(ConfigError::InvalidEnvironmentPayload { .. })
        ));
    }

    #[tokio::test]
    async fn instance_host_resolves_from_block_hosts() {
        let _lock = env_lock();
        let _hosts = EnvGuard::set("KAPETA_BLOCK_HOSTS", r#"{"instance-id": "10.0.0.1"}"#);

        let provider = provider();
        assert_eq!(
            provider.get_instance_host("instance-id").await.unwrap(),
            "10.0.0.1"
        );

        let err = provider
            .get_instance_host("unknown-instance-id")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown instance id when resolving host: unknown-instance-id"
        );
    }

    #[tokio::test]
    async fn instance_host_without_block_hosts_is_an_error() {
        let _lock = env_lock();
        let _cleared = EnvGuard::remove("KAPETA_BLOCK_HOSTS");

        assert!(matches!(
            provider().get_instance_host("any").await,
            Err(ConfigError::MissingEnvironmentVariable { .. })
        ));
    }

    #[tokio::test]
    async fn instance_for_consumer_decodes_details() {
        let _lock = env_lock();
        let _details = EnvGuard::set(
            "KAPETA_INSTANCE_FOR_CONSUMER_TESTRESOURCE",
            r#"{"instanceId": "instance-id", "block": {"kind": "kapeta/block-type-service"}, "connections": []}"#,
        );

        let details = provider()
            .get_instance_for_consumer("TestResource")
            .await
            .unwrap();
        assert_eq!(details.instance_id, "instance-id");
        assert!(details.connections.is_empty());
    }

    #[tokio::test]
    async fn instance_operator_normalizes_the_id() {
        let _lock = env_lock();
        let _operator = EnvGuard::set(
            "KAPETA_INSTANCE_OPERATOR_12E0023C_0814_402F_9C62_25A7C1FCD906",
            r#"{"hostname": "test-host", "ports": {"http": {"protocol": "http", "port": 80}}}"#,
        );

        let operator = provider()
            .get_instance_operator("12E0023C-0814-402F-9C62-25A7C1FCD906")
            .await
            .unwrap();
        assert_eq!(operator.hostname, "test-host");
        assert_eq!(operator.ports["http"].port, 80);
    }

    #[tokio::test]
    async fn instances_for_provider_decodes_the_list() {
        let _lock = env_lock();
        let _instances = EnvGuard::set(
            "KAPETA_INSTANCES_FOR_PROVIDER_TESTRESOURCE",
            r#"[{"instanceId": "a"}, {"instanceId": "b"}]"#,
        );

        let provider = provider();
        let instances = provider
            .get_instances_for_provider("TestResource")
            .await
            .unwrap();
        assert_eq!(instances.len(), 2);

        let _bad = EnvGuard::set("KAPETA_INSTANCES_FOR_PROVIDER_TESTRESOURCE", "invalid-json");
        assert!(provider
            .get_instances_for_provider("TestResource")
            .await
            .is_err());
    }

    #[test]
    fn accessors_reflect_construction() {
        let provider = provider();
        assert_eq!(provider.block_reference(), "block-ref");
        assert_eq!(provider.system_id(), "system-id");
        assert_eq!(provider.instance_id(), "instance-id");
        assert_eq!(provider.provider_id(), "kubernetes");
        assert_eq!(
            provider.block_definition()["kind"],
            "kapeta/block-type-service"
        );
    }
}
