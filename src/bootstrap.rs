//! Provider selection and one-time initialization
//!
//! [`Config`] is the application-owned entry point: it reads the block
//! definition, picks the resolution strategy from the declared system type,
//! and resolves a provider at most once for its lifetime. Callbacks
//! registered before resolution fire when it completes, in registration
//! order; callbacks registered afterwards fire immediately.

use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::providers::{
    ConfigProvider, EnvironmentConfigProvider, InstanceValue, LocalConfigProvider,
};

const KAPETA_SYSTEM_TYPE: &str = "KAPETA_SYSTEM_TYPE";
const KAPETA_SYSTEM_ID: &str = "KAPETA_SYSTEM_ID";
const KAPETA_BLOCK_REF: &str = "KAPETA_BLOCK_REF";
const KAPETA_INSTANCE_ID: &str = "KAPETA_INSTANCE_ID";

const DEFAULT_SYSTEM_TYPE: &str = "development";

const BLOCK_DEFINITION_FILE: &str = "kapeta.yml";

type ReadyCallback = Box<dyn FnOnce(&Arc<dyn ConfigProvider>) + Send>;

#[derive(Default)]
struct State {
    provider: Option<Arc<dyn ConfigProvider>>,
    callbacks: Vec<ReadyCallback>,
}

/// Application-owned configuration context
///
/// Holds at most one resolved provider. Cheap to share behind an `Arc`;
/// every method takes `&self`.
#[derive(Default)]
pub struct Config {
    state: Mutex<State>,
    // Serializes concurrent init attempts so only one performs the handshake.
    init_lock: tokio::sync::Mutex<()>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        // State stays consistent even if a ready callback panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once a provider has been resolved
    pub fn is_ready(&self) -> bool {
        self.lock_state().provider.is_some()
    }

    /// The resolved provider, if initialization has completed
    pub fn provider(&self) -> Option<Arc<dyn ConfigProvider>> {
        self.lock_state().provider.clone()
    }

    fn require_provider(&self) -> Result<Arc<dyn ConfigProvider>> {
        self.provider().ok_or(ConfigError::NotInitialized)
    }

    /// Registers a callback for the moment the provider resolves.
    ///
    /// Registered after resolution, the callback runs immediately and
    /// synchronously; before, it is queued and runs in registration order
    /// once [`init`](Self::init) succeeds.
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce(&Arc<dyn ConfigProvider>) + Send + 'static,
    {
        let mut state = self.lock_state();
        match &state.provider {
            Some(provider) => {
                let provider = provider.clone();
                drop(state);
                callback(&provider);
            }
            None => state.callbacks.push(Box::new(callback)),
        }
    }

    /// Resolves the provider for the block in `block_dir`.
    ///
    /// At most one resolution happens per [`Config`]; later calls (even with
    /// a different directory) return the provider from the first successful
    /// initialization.
    pub async fn init(&self, block_dir: impl AsRef<Path>) -> Result<Arc<dyn ConfigProvider>> {
        let _guard = self.init_lock.lock().await;
        if let Some(existing) = self.provider() {
            return Ok(existing);
        }

        let block_definition = read_block_definition(block_dir.as_ref())?;
        let block_name = block_definition
            .get("metadata")
            .and_then(|metadata| metadata.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConfigError::InvalidBlockDefinition(block_dir.as_ref().display().to_string())
            })?;

        let block_ref = env_or_default(KAPETA_BLOCK_REF, &format!("{block_name}:local"));
        let system_type = env_or_default(KAPETA_SYSTEM_TYPE, DEFAULT_SYSTEM_TYPE).to_lowercase();
        let system_id = env_or_default(KAPETA_SYSTEM_ID, "");
        let instance_id = env_or_default(KAPETA_INSTANCE_ID, "");

        debug!(%system_type, %block_ref, "resolving configuration provider");

        let provider: Arc<dyn ConfigProvider> = match system_type.as_str() {
            "k8s" | "kubernetes" => Arc::new(EnvironmentConfigProvider::new(
                block_ref,
                system_id,
                instance_id,
                block_definition,
            )?),
            // Self-registration with the cluster service only happens here.
            "development" | "dev" | "local" => Arc::new(
                LocalConfigProvider::new(block_ref, system_id, instance_id, block_definition)
                    .await?,
            ),
            other => return Err(ConfigError::UnknownEnvironment(other.to_string())),
        };

        let callbacks = {
            let mut state = self.lock_state();
            state.provider = Some(provider.clone());
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(&provider);
        }

        Ok(provider)
    }

    /// Generic config lookup on the resolved provider
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        self.require_provider()?.get(path)
    }

    /// Generic config lookup with a default on miss
    pub fn get_or_default(&self, path: &str, default: Value) -> Result<Value> {
        self.require_provider()?.get_or_default(path, default)
    }

    /// Reads a config value shaped like `{"id": ...}` and resolves the
    /// referenced instance's host; `default` when the path is unset.
    pub async fn get_as_instance_host(&self, path: &str, default: &str) -> Result<String> {
        let provider = self.require_provider()?;

        let Some(value) = provider.get(path)? else {
            return Ok(default.to_string());
        };
        let instance: InstanceValue =
            serde_json::from_value(value).map_err(|source| ConfigError::InvalidResponseBody {
                source,
            })?;

        provider.get_instance_host(&instance.id).await
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Loads `{block_dir}/kapeta.yml` as a JSON value
fn read_block_definition(block_dir: &Path) -> Result<Value> {
    let path = block_dir.join(BLOCK_DEFINITION_FILE);
    if !path.exists() {
        return Err(ConfigError::BlockDefinitionNotFound(
            block_dir.display().to_string(),
        ));
    }

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
        path: path.clone(),
        source,
    })?;

    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::FileParse {
            path: path.clone(),
            source: Box::new(source),
        })?;

    serde_json::to_value(yaml).map_err(|source| ConfigError::FileParse {
        path,
        source: Box::new(source),
    })
}
