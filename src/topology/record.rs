//! Topology Records
//!
//! Schema types for the store-declared topology. Records are written by
//! external database-side agents as well as by the coordinator, so
//! parsing is tolerant: ports arrive as strings or numbers, unknown
//! role/status strings degrade to their unset variants, a bad timestamp
//! counts as missing, and unknown fields round-trip through an `extra`
//! bag. The coordinator writes raw UTF-8 JSON; [`decode_record`] also
//! accepts base64-wrapped JSON from legacy writers.

use std::collections::BTreeMap;

use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Role of a database node in the replication topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeRole {
    /// Write-accepting primary
    Master,
    /// Read-only replica
    Slave,
    /// Not yet assigned
    #[default]
    Unset,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Slave => "slave",
            NodeRole::Unset => "",
        }
    }
}

impl From<String> for NodeRole {
    fn from(value: String) -> Self {
        match value.as_str() {
            "master" => NodeRole::Master,
            "slave" => NodeRole::Slave,
            _ => NodeRole::Unset,
        }
    }
}

impl From<NodeRole> for String {
    fn from(value: NodeRole) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness status of a database node as last recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeStatus {
    Online,
    Failed,
    #[default]
    Unknown,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Failed => "failed",
            NodeStatus::Unknown => "unknown",
        }
    }
}

impl From<String> for NodeStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "online" => NodeStatus::Online,
            "failed" => NodeStatus::Failed,
            _ => NodeStatus::Unknown,
        }
    }
}

impl From<NodeStatus> for String {
    fn from(value: NodeStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A database node's registration record, keyed `nodes/<node_id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default)]
    pub host: String,

    /// Backend port; arrives as a JSON string or number, kept as a string
    #[serde(default, deserialize_with = "de_port")]
    pub port: String,

    #[serde(default)]
    pub role: NodeRole,

    #[serde(default)]
    pub status: NodeStatus,

    /// RFC-3339 UTC; unparseable timestamps count as missing
    #[serde(
        default,
        deserialize_with = "de_last_seen",
        serialize_with = "ser_last_seen",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen: Option<DateTime<Utc>>,

    /// Opaque replication position, may be empty
    #[serde(default)]
    pub gtid_position: String,

    /// Unknown fields, preserved across rewrites
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl NodeRecord {
    /// Create a fresh record for the given endpoint
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            role: NodeRole::Unset,
            status: NodeStatus::Unknown,
            last_seen: Some(Utc::now()),
            gtid_position: String::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Resolve the probe endpoint. `None` when the record is not
    /// well-formed: empty host, or a non-empty port outside 1..=65535.
    /// An empty port defaults to 3306.
    pub fn endpoint(&self) -> Option<(&str, u16)> {
        if self.host.is_empty() {
            return None;
        }
        if self.port.is_empty() {
            return Some((&self.host, 3306));
        }
        match self.port.trim().parse::<u16>() {
            Ok(port) if port > 0 => Some((&self.host, port)),
            _ => None,
        }
    }

    /// True when `last_seen` is missing or older than `max_age`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self.last_seen {
            Some(seen) => now.signed_duration_since(seen) > max_age,
            None => true,
        }
    }

    /// Serialize to the store's wire encoding (raw UTF-8 JSON)
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Informational replication mirror, keyed `topology/slaves/<node_id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveRecord {
    #[serde(default)]
    pub master_node_id: String,

    /// Replication lag behind the source, in seconds
    #[serde(default)]
    pub replication_lag: u64,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SlaveRecord {
    pub fn new(master_node_id: impl Into<String>, replication_lag: u64) -> Self {
        Self {
            master_node_id: master_node_id.into(),
            replication_lag,
            extra: BTreeMap::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Decode a store value that is either raw JSON or base64-wrapped JSON.
///
/// The coordinator always writes raw JSON; the base64 path exists for
/// one release so records written by legacy agents keep parsing.
pub fn decode_record<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    if let Ok(value) = serde_json::from_slice(bytes) {
        return Some(value);
    }
    let trimmed: Vec<u8> = bytes
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(&trimmed)
        .ok()?;
    serde_json::from_slice(&decoded).ok()
}

fn de_port<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct PortVisitor;

    impl<'de> Visitor<'de> for PortVisitor {
        type Value = String;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a port number or string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_none<E: de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }

        fn visit_unit<E: de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }
    }

    deserializer.deserialize_any(PortVisitor)
}

fn de_last_seen<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }))
}

fn ser_last_seen<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => serializer.serialize_none(),
    }
}
