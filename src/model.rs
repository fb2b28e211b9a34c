//! Typed projection of the deployment plan schema
//!
//! The cluster service hands out assets (plans and block kinds) as JSON.
//! Only the fields the topology queries traverse are modeled here; everything
//! else stays an opaque [`serde_json::Value`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A versioned asset definition (block kind, plan, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Kind {
    pub kind: String,
    pub metadata: Metadata,
    pub spec: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A deployed system: block instances plus the connections between them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    pub kind: String,
    pub metadata: Metadata,
    pub spec: PlanSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanSpec {
    pub blocks: Vec<BlockInstance>,
    pub connections: Vec<Connection>,
}

/// One running deployment of a block within a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockInstance {
    pub id: String,
    pub name: String,
    pub block: AssetReference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetReference {
    #[serde(rename = "ref")]
    pub reference: String,
}

/// A declared link from a consumer resource to a provider resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub provider: Endpoint,
    pub consumer: Endpoint,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoint {
    pub block_id: String,
    pub resource_name: String,
}

/// Envelope the asset-read endpoint wraps every asset in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetWrapper<T> {
    pub data: T,
}

/// Accepts a string or a number, yielding the decimal string form.
///
/// Ports show up both ways on the wire depending on who serialized them;
/// the canonical in-memory representation is a string.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrNumber;

    impl serde::de::Visitor<'_> for StringOrNumber {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or a number")
        }

        fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_f64<E: serde::de::Error>(self, value: f64) -> Result<String, E> {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}
