//! Error types for configuration resolution
//!
//! Every fallible operation in this crate returns [`ConfigError`]. The
//! variants distinguish between a value that is simply absent, a value that
//! is present but undecodable (a broken deployment), a failure to reach the
//! local cluster service, and a deployment plan that does not contain what
//! it should.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while resolving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A lookup key had no value anywhere in scope
    #[error("missing environment variable for {what}: {variable}")]
    MissingEnvironmentVariable {
        what: &'static str,
        variable: String,
    },

    /// An instance id was not present in the host lookup table
    #[error("unknown instance id when resolving host: {0}")]
    UnknownInstance(String),

    /// An environment variable held a payload that failed to decode
    #[error("invalid JSON in environment variable: {variable}")]
    InvalidEnvironmentPayload {
        variable: String,
        #[source]
        source: serde_json::Error,
    },

    /// A cluster service response body failed to decode
    #[error("failed to decode response body")]
    InvalidResponseBody {
        #[source]
        source: serde_json::Error,
    },

    /// A required lookup came back empty from the cluster service
    #[error("no value configured for {0}")]
    MissingValue(String),

    /// The cluster service answered with a failure status
    #[error("request failed - Status: {status}")]
    Http { status: u16 },

    /// The cluster service could not be reached
    #[error("request failed")]
    Transport(#[from] reqwest::Error),

    /// Instance self-registration was rejected
    #[error("failed to register instance: {status}\n\t{body}")]
    Registration { status: u16, body: String },

    /// No connection in the plan matches the consumed resource
    #[error("could not find connection for consumer {0}")]
    ConnectionNotFound(String),

    /// A connection references a block instance the plan does not define
    #[error("could not find instance {0} in plan")]
    InstanceNotFound(String),

    /// A configuration file could not be read
    #[error("failed to read {path:?}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file held content that failed to decode
    #[error("failed to parse {path:?}")]
    FileParse {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The block directory has no kapeta.yml
    #[error("kapeta.yml file not found in path: {0}. Path must be absolute and point to a folder with a valid block definition")]
    BlockDefinitionNotFound(String),

    /// The block definition is missing its metadata.name
    #[error("kapeta.yml file contained invalid YML: {0}")]
    InvalidBlockDefinition(String),

    /// The declared system type matches no known strategy
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    /// A provider was requested before initialization completed
    #[error("configuration not yet initialized")]
    NotInitialized,
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
