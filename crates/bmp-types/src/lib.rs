#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Identity reported for Loc-RIB events, which carry no real peer.
pub const LOC_RIB_PEER: &str = "0.0.0.0";
pub const ZERO_DISTINGUISHER: &str = "0:0";
pub const RD_INSTANCE_PEER_TYPE: &str = "route distinguisher instance";

/// Fields that change from run to run and never take part in a comparison.
pub const VOLATILE_FIELDS: [&str; 3] = ["timestamp", "seq", "nxhp_link-local"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    Update,
    Withdraw,
    PeerUp,
    PeerDown,
    Other(String),
}

impl MessageType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Update => "update",
            Self::Withdraw => "withdraw",
            Self::PeerUp => "peer up",
            Self::PeerDown => "peer down",
            Self::Other(tag) => tag,
        }
    }

    #[must_use]
    pub fn is_withdraw(&self) -> bool {
        matches!(self, Self::Withdraw)
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "update" => Self::Update,
            "withdraw" => Self::Withdraw,
            "peer up" => Self::PeerUp,
            "peer down" => Self::PeerDown,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from(tag.as_str()))
    }
}

/// Which RIB view an event was exported from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Policy {
    PrePolicy,
    PostPolicy,
    LocRib,
    Other(String),
}

impl Policy {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PrePolicy => "pre-policy",
            Self::PostPolicy => "post-policy",
            Self::LocRib => "loc-rib",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for Policy {
    fn from(tag: &str) -> Self {
        match tag {
            "pre-policy" => Self::PrePolicy,
            "post-policy" => Self::PostPolicy,
            "loc-rib" => Self::LocRib,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Policy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Policy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from(tag.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub const ALL: [Self; 2] = [Self::Ipv4, Self::Ipv6];

    /// Routing-table keys only distinguish families by the `::` marker.
    #[must_use]
    pub fn of_prefix(prefix: &str) -> Self {
        if prefix.contains("::") {
            Self::Ipv6
        } else {
            Self::Ipv4
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Negotiated OPEN parameters reported on peer up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInfo {
    #[serde(default)]
    pub my_as: Option<u64>,
    #[serde(default)]
    pub bgp_id: Option<String>,
}

impl OpenInfo {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            my_as: object.get("my_as").and_then(Value::as_u64),
            bgp_id: object.get("bgp_id").and_then(Value::as_str).map(str::to_owned),
        })
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("event is not a json object")]
    NotAnObject,
    #[error("event has no seq field")]
    MissingSeq,
    #[error("seq must be a non-negative integer, found {value}")]
    InvalidSeq { value: Value },
}

/// One event emitted by the collector, validated on read.
///
/// `seq` is required; the protocol fields are optional because their
/// presence depends on the message kind. The decoded object is kept whole
/// so snapshots can reproduce exactly what the collector wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub seq: u64,
    pub log_type: Option<MessageType>,
    pub policy: Option<Policy>,
    pub ip_prefix: Option<String>,
    pub peer_ip: Option<String>,
    pub peer_type: Option<String>,
    pub peer_distinguisher: Option<String>,
    pub peer_bgp_id: Option<String>,
    pub open_tx: Option<OpenInfo>,
    pub open_rx: Option<OpenInfo>,
    fields: Map<String, Value>,
}

impl EventRecord {
    pub fn from_json_str(line: &str) -> Result<Self, RecordError> {
        Self::from_value(serde_json::from_str(line)?)
    }

    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        let Value::Object(fields) = value else {
            return Err(RecordError::NotAnObject);
        };
        let seq = match fields.get("seq") {
            None => return Err(RecordError::MissingSeq),
            Some(raw) => raw
                .as_u64()
                .ok_or_else(|| RecordError::InvalidSeq { value: raw.clone() })?,
        };

        Ok(Self {
            seq,
            log_type: str_field(&fields, "bmp_log_type").map(MessageType::from),
            policy: str_field(&fields, "policy").map(Policy::from),
            ip_prefix: str_field(&fields, "ip_prefix").map(str::to_owned),
            peer_ip: str_field(&fields, "peer_ip").map(str::to_owned),
            peer_type: str_field(&fields, "peer_type").map(str::to_owned),
            peer_distinguisher: str_field(&fields, "peer_distinguisher").map(str::to_owned),
            peer_bgp_id: str_field(&fields, "peer_bgp_id").map(str::to_owned),
            open_tx: fields.get("open_tx").and_then(OpenInfo::from_value),
            open_rx: fields.get("open_rx").and_then(OpenInfo::from_value),
            fields,
        })
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn is_type(&self, log_type: &MessageType) -> bool {
        self.log_type.as_ref() == Some(log_type)
    }

    #[must_use]
    pub fn is_policy(&self, policy: &Policy) -> bool {
        self.policy.as_ref() == Some(policy)
    }

    /// The peer address, unless it is missing or [`LOC_RIB_PEER`].
    ///
    /// Only the IPv4 placeholder is special; a peer at `::` is an ordinary
    /// peer address.
    #[must_use]
    pub fn peer_address(&self) -> Option<&str> {
        self.peer_ip
            .as_deref()
            .filter(|peer_ip| *peer_ip != LOC_RIB_PEER)
    }

    /// Record body with the volatile fields dropped and keys sorted.
    #[must_use]
    pub fn comparable_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(key, _)| !VOLATILE_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<BTreeMap<_, _>>()
            .into_iter()
            .collect()
    }
}

fn str_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}
