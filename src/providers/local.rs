//! Coordination-service-driven resolution strategy
//!
//! During local development a cluster service runs on the developer machine
//! and brokers identity, configuration and topology. This provider performs
//! an identity-resolution and self-registration handshake on construction,
//! then answers every lookup with a fresh HTTP call.
//!
//! Response policy shared by all GET lookups: 404 means "no value
//! configured" and yields an empty result, any other status above 399 is a
//! failure carrying the status code, and 2xx bodies are decoded according to
//! the operation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{read_config_file, ClusterConfig};
use crate::error::{ConfigError, Result};
use crate::model::{AssetWrapper, Kind, Plan};
use crate::providers::{
    to_env_name, BlockInstanceDetails, ConfigProvider, Identity, InstanceOperator,
    ProviderIdentity, ResourceInfo, DEFAULT_SERVER_PORT_TYPE,
};

const KAPETA_ENVIRONMENT_TYPE: &str = "KAPETA_ENVIRONMENT_TYPE";
const HEADER_KAPETA_BLOCK: &str = "X-Kapeta-Block";
const HEADER_KAPETA_SYSTEM: &str = "X-Kapeta-System";
const HEADER_KAPETA_INSTANCE: &str = "X-Kapeta-Instance";
const HEADER_KAPETA_ENVIRONMENT: &str = "X-Kapeta-Environment";

const DEFAULT_ENVIRONMENT_TYPE: &str = "process";
const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches deployment assets (plans and block kinds) by reference.
///
/// The provider fetches the plan fresh on every topology query; an
/// implementation injected for tests can serve canned assets instead.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn get_plan(&self, system_id: &str) -> Result<Plan>;
    async fn get_kind(&self, reference: &str) -> Result<Kind>;
}

/// HTTP plumbing shared by the provider and its default asset store
#[derive(Debug, Clone)]
struct ClusterClient {
    http: reqwest::Client,
    base_url: String,
    block_ref: String,
    system_id: String,
    instance_id: String,
}

impl ClusterClient {
    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let environment = std::env::var(KAPETA_ENVIRONMENT_TYPE)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT_TYPE.to_string());

        self.http
            .request(method, url)
            .header(HEADER_KAPETA_ENVIRONMENT, environment)
            .header(HEADER_KAPETA_BLOCK, &self.block_ref)
            .header(HEADER_KAPETA_SYSTEM, &self.system_id)
            .header(HEADER_KAPETA_INSTANCE, &self.instance_id)
    }

    async fn get_raw(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = self.request(Method::GET, url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.as_u16() > 399 {
            return Err(ConfigError::Http {
                status: status.as_u16(),
            });
        }

        Ok(Some(response.bytes().await?.to_vec()))
    }

    /// GET returning the raw body as text; 404 yields an empty string.
    async fn get_string(&self, url: &str) -> Result<String> {
        Ok(self
            .get_raw(url)
            .await?
            .map(|body| String::from_utf8_lossy(&body).into_owned())
            .unwrap_or_default())
    }

    /// GET decoding the body as JSON; 404 yields `None`.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        match self.get_raw(url).await? {
            Some(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|source| ConfigError::InvalidResponseBody { source }),
            None => Ok(None),
        }
    }

    async fn deregister(&self) {
        let url = self.instances_url();
        if let Err(err) = self.request(Method::DELETE, &url).send().await {
            warn!("failed to notify instance stopped: {}", err);
        }
    }

    fn encode(&self, text: &str) -> String {
        urlencoding::encode(&text.to_lowercase()).into_owned()
    }

    fn config_base_url(&self) -> String {
        format!("{}/config", self.base_url)
    }

    fn identity_url(&self) -> String {
        format!("{}/identity", self.config_base_url())
    }

    fn instance_config_url(&self) -> String {
        format!("{}/instance", self.config_base_url())
    }

    fn provider_port_url(&self, port_type: &str) -> String {
        format!("{}/provides/{}", self.config_base_url(), self.encode(port_type))
    }

    fn service_client_url(&self, resource_name: &str, port_type: &str) -> String {
        format!(
            "{}/consumes/{}/{}",
            self.config_base_url(),
            self.encode(resource_name),
            self.encode(port_type)
        )
    }

    fn resource_info_url(
        &self,
        operator_type: &str,
        port_type: &str,
        resource_name: &str,
    ) -> String {
        format!(
            "{}/consumes/resource/{}/{}/{}",
            self.config_base_url(),
            self.encode(operator_type),
            self.encode(port_type),
            self.encode(resource_name)
        )
    }

    fn operator_url(&self, instance_id: &str) -> String {
        format!("{}/operator/{}", self.config_base_url(), self.encode(instance_id))
    }

    fn instances_url(&self) -> String {
        format!("{}/instances", self.base_url)
    }

    fn instance_host_url(&self, instance_id: &str) -> String {
        format!(
            "{}/{}/{}/address/public",
            self.instances_url(),
            self.encode(&self.system_id),
            self.encode(instance_id)
        )
    }

    fn asset_url(&self, reference: &str) -> String {
        format!(
            "{}/assets/read?ref={}&ensure=false",
            self.base_url,
            self.encode(reference)
        )
    }
}

/// Default [`AssetStore`]: reads wrapped assets from the cluster service
pub struct ClusterAssetStore {
    client: ClusterClient,
}

impl ClusterAssetStore {
    async fn get_asset<T: DeserializeOwned>(&self, reference: &str) -> Result<T> {
        let url = self.client.asset_url(reference);
        let wrapper: AssetWrapper<T> = self
            .client
            .get_json(&url)
            .await?
            .ok_or_else(|| ConfigError::MissingValue(format!("asset {reference}")))?;
        Ok(wrapper.data)
    }
}

#[async_trait]
impl AssetStore for ClusterAssetStore {
    async fn get_plan(&self, system_id: &str) -> Result<Plan> {
        self.get_asset(system_id).await
    }

    async fn get_kind(&self, reference: &str) -> Result<Kind> {
        self.get_asset(reference).await
    }
}

/// Resolves all configuration from the locally running cluster service
pub struct LocalConfigProvider {
    identity: ProviderIdentity,
    configuration: Map<String, Value>,
    client: ClusterClient,
    assets: Arc<dyn AssetStore>,
}

impl LocalConfigProvider {
    /// Builds the provider against the cluster service resolved from local
    /// cluster configuration.
    ///
    /// Construction runs the full handshake - identity resolution,
    /// configuration load, self-registration, shutdown hook - and fails as a
    /// whole if any step fails.
    pub async fn new(
        block_ref: impl Into<String>,
        system_id: impl Into<String>,
        instance_id: impl Into<String>,
        block_definition: Value,
    ) -> Result<Self> {
        Self::build(
            block_ref.into(),
            system_id.into(),
            instance_id.into(),
            block_definition,
            None,
        )
        .await
    }

    /// Like [`new`](Self::new), with an injected asset store for topology
    /// queries.
    pub async fn with_asset_store(
        block_ref: impl Into<String>,
        system_id: impl Into<String>,
        instance_id: impl Into<String>,
        block_definition: Value,
        assets: Arc<dyn AssetStore>,
    ) -> Result<Self> {
        Self::build(
            block_ref.into(),
            system_id.into(),
            instance_id.into(),
            block_definition,
            Some(assets),
        )
        .await
    }

    async fn build(
        block_ref: String,
        system_id: String,
        instance_id: String,
        block_definition: Value,
        assets: Option<Arc<dyn AssetStore>>,
    ) -> Result<Self> {
        let environment = read_config_file()?;
        let base_url = ClusterConfig::load().service_address();
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let mut identity_state = ProviderIdentity::new(
            block_ref,
            system_id,
            instance_id,
            block_definition,
            environment,
        );

        // Identity resolution still runs with the constructor-supplied
        // identity in the request headers.
        let mut client = ClusterClient {
            http,
            base_url,
            block_ref: identity_state.block_reference().to_string(),
            system_id: identity_state.system_id().to_string(),
            instance_id: identity_state.instance_id().to_string(),
        };

        info!(
            "Resolving identity for block: {}",
            identity_state.block_reference()
        );
        let identity: Identity = client
            .get_json(&client.identity_url())
            .await?
            .ok_or_else(|| ConfigError::MissingValue("identity".to_string()))?;
        info!(
            system_id = %identity.system_id,
            instance_id = %identity.instance_id,
            "Identity resolved"
        );

        identity_state.set_identity(&identity);
        client.system_id = identity.system_id;
        client.instance_id = identity.instance_id;

        let configuration: Map<String, Value> = client
            .get_json(&client.instance_config_url())
            .await?
            .unwrap_or_default();

        let provider = Self {
            identity: identity_state,
            configuration,
            assets: assets.unwrap_or_else(|| {
                Arc::new(ClusterAssetStore {
                    client: client.clone(),
                })
            }),
            client,
        };

        provider.register_instance().await?;
        provider.spawn_shutdown_hook();

        Ok(provider)
    }

    async fn register_instance(&self) -> Result<()> {
        let url = self.client.instances_url();
        let body = serde_json::json!({ "pid": std::process::id() });

        let response = self
            .client
            .request(Method::PUT, &url)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConfigError::Registration {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    /// Notifies the cluster service that this instance stopped.
    ///
    /// Best effort: a failure is logged and swallowed, since the process is
    /// on its way out when this runs.
    pub async fn notify_stopped(&self) {
        self.client.deregister().await;
    }

    /// Deregisters and exits the process when SIGINT/SIGTERM arrives.
    fn spawn_shutdown_hook(&self) {
        let client = self.client.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            client.deregister().await;
            std::process::exit(0);
        });
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("failed to install SIGTERM handler: {}", err);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

#[async_trait]
impl ConfigProvider for LocalConfigProvider {
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
        "local"
    }

    async fn get_server_port(&self, port_type: &str) -> Result<String> {
        let port_type = if port_type.is_empty() {
            DEFAULT_SERVER_PORT_TYPE
        } else {
            port_type
        };

        let variable = format!("KAPETA_LOCAL_SERVER_PORT_{}", to_env_name(port_type));
        if let Some(port) = self.identity.lookup_env(&variable) {
            return Ok(port);
        }

        let url = self.client.provider_port_url(port_type);
        self.client.get_string(&url).await
    }

    async fn get_server_host(&self) -> Result<String> {
        Ok(self
            .identity
            .env_or_default("KAPETA_LOCAL_SERVER", DEFAULT_SERVER_HOST))
    }

    async fn get_service_address(&self, resource_name: &str, port_type: &str) -> Result<String> {
        let url = self.client.service_client_url(resource_name, port_type);
        self.client.get_string(&url).await
    }

    async fn get_resource_info(
        &self,
        resource_type: &str,
        port_type: &str,
        resource_name: &str,
    ) -> Result<ResourceInfo> {
        let url = self
            .client
            .resource_info_url(resource_type, port_type, resource_name);
        self.client
            .get_json(&url)
            .await?
            .ok_or_else(|| ConfigError::MissingValue(format!("resource {resource_name}")))
    }

    async fn get_instance_host(&self, instance_id: &str) -> Result<String> {
        let url = self.client.instance_host_url(instance_id);
        self.client.get_string(&url).await
    }

    fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.configuration.get(path).cloned())
    }

    async fn get_instance_for_consumer(&self, resource_name: &str) -> Result<BlockInstanceDetails> {
        let plan = self.assets.get_plan(self.identity.system_id()).await?;

        let connection = plan
            .spec
            .connections
            .iter()
            .find(|connection| {
                connection.consumer.block_id == self.identity.instance_id()
                    && connection.consumer.resource_name == resource_name
            })
            .ok_or_else(|| ConfigError::ConnectionNotFound(resource_name.to_string()))?;

        let instance = plan
            .spec
            .blocks
            .iter()
            .find(|block| block.id == connection.provider.block_id)
            .ok_or_else(|| {
                ConfigError::InstanceNotFound(connection.provider.block_id.clone())
            })?;

        let block = self.assets.get_kind(&instance.block.reference).await?;

        Ok(BlockInstanceDetails {
            instance_id: connection.provider.block_id.clone(),
            block,
            connections: vec![connection.clone()],
        })
    }

    async fn get_instance_operator(&self, instance_id: &str) -> Result<InstanceOperator> {
        let url = self.client.operator_url(instance_id);
        self.client
            .get_json(&url)
            .await?
            .ok_or_else(|| ConfigError::MissingValue(format!("operator {instance_id}")))
    }

    async fn get_instances_for_provider(
        &self,
        resource_name: &str,
    ) -> Result<Vec<BlockInstanceDetails>> {
        let plan = self.assets.get_plan(self.identity.system_id()).await?;

        let matching = plan.spec.connections.iter().filter(|connection| {
            connection.provider.block_id == self.identity.instance_id()
                && connection.provider.resource_name == resource_name
        });

        // One entry per distinct consumer instance, in connection-scan order.
        let mut details: Vec<BlockInstanceDetails> = Vec::new();
        for connection in matching {
            let consumer_id = &connection.consumer.block_id;

            if let Some(entry) = details
                .iter_mut()
                .find(|entry| &entry.instance_id == consumer_id)
            {
                entry.connections.push(connection.clone());
                continue;
            }

            let instance = plan
                .spec
                .blocks
                .iter()
                .find(|block| &block.id == consumer_id)
                .ok_or_else(|| ConfigError::InstanceNotFound(consumer_id.clone()))?;

            let block = self.assets.get_kind(&instance.block.reference).await?;

            details.push(BlockInstanceDetails {
                instance_id: consumer_id.clone(),
                block,
                connections: vec![connection.clone()],
            });
        }

        Ok(details)
    }
}
