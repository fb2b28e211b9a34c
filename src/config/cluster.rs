//! Local cluster service address resolution
//!
//! The local strategy reaches the cluster service over HTTP. Host and port
//! come from environment overrides when present, else from the
//! `cluster-service.yml` file in the kapeta home directory, else from fixed
//! defaults.

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_CLUSTER_HOST: &str = "127.0.0.1";
pub const DEFAULT_CLUSTER_PORT: &str = "35100";

const CLUSTER_CONFIG_FILE: &str = "cluster-service.yml";
const KAPETA_LOCAL_CLUSTER_HOST: &str = "KAPETA_LOCAL_CLUSTER_HOST";
const KAPETA_LOCAL_CLUSTER_PORT: &str = "KAPETA_LOCAL_CLUSTER_PORT";
const KAPETA_HOME: &str = "KAPETA_HOME";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClusterConfigFile {
    cluster: ClusterSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClusterSection {
    host: Option<String>,
    #[serde(deserialize_with = "optional_string_or_number")]
    port: Option<String>,
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    crate::model::string_or_number(deserializer).map(Some)
}

/// Resolved cluster service endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    host: String,
    port: String,
}

impl ClusterConfig {
    /// Resolves host and port from environment, file and defaults.
    ///
    /// An unreadable or malformed config file is logged and treated as
    /// absent; resolution falls through to the defaults.
    pub fn load() -> Self {
        let env_host = env::var(KAPETA_LOCAL_CLUSTER_HOST)
            .ok()
            .filter(|v| !v.is_empty());
        let env_port = env::var(KAPETA_LOCAL_CLUSTER_PORT)
            .ok()
            .filter(|v| !v.is_empty());

        // The file is only consulted for values the environment leaves open.
        let file = if env_host.is_some() && env_port.is_some() {
            None
        } else {
            Self::read_file()
        };

        let host = env_host
            .or_else(|| file.as_ref().and_then(|f| f.cluster.host.clone()))
            .unwrap_or_else(|| DEFAULT_CLUSTER_HOST.to_string());

        let port = env_port
            .or_else(|| file.as_ref().and_then(|f| f.cluster.port.clone()))
            .unwrap_or_else(|| DEFAULT_CLUSTER_PORT.to_string());

        Self { host, port }
    }

    /// Base URL of the cluster service
    pub fn service_address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Path of the cluster configuration file:
    /// `$KAPETA_HOME/cluster-service.yml`, defaulting the home directory to
    /// `~/.kapeta`.
    pub fn config_file_path() -> PathBuf {
        let base = env::var(KAPETA_HOME)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                PathBuf::from(env::var("HOME").unwrap_or_default()).join(".kapeta")
            });
        base.join(CLUSTER_CONFIG_FILE)
    }

    fn read_file() -> Option<ClusterConfigFile> {
        let path = Self::config_file_path();
        if !path.exists() {
            return None;
        }

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("error reading cluster config file {:?}: {}", path, err);
                return None;
            }
        };

        match serde_yaml::from_str(&raw) {
            Ok(parsed) => {
                debug!("read cluster config from file: {:?}", path);
                Some(parsed)
            }
            Err(err) => {
                warn!("error parsing cluster config file {:?}: {}", path, err);
                None
            }
        }
    }
}
