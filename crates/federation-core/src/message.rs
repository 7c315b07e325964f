//! Wire messages exchanged between federation peers
//!
//! Messages travel as JSON. The payload is discriminated by the `type` field,
//! and its fields sit next to the envelope fields:
//!
//! ```json
//! {"from_node":"a","to_node":"b","timestamp":1700000000000,
//!  "version":{"a":3},"type":"delta","threat_delta":{...}}
//! ```

use crate::counter::PnCounter;
use crate::error::{Error, Result};
use crate::lww_map::{Delta, LwwMap};
use crate::set::OrSet;
use crate::unix_millis;
use crate::vclock::{NodeId, VectorClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Threat intelligence is keyed JSON documents
pub type ThreatIntelMap = LwwMap<Value>;

/// Complete replicated state of one node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub threat_intel: ThreatIntelMap,
    pub rules: OrSet<String>,
    pub metrics: PnCounter,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a snapshot; nothing is produced unless the whole input parses
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Message kind, as carried in the `type` field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Delta,
    Full,
    Request,
    Response,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Delta => "delta",
            SyncType::Full => "full",
            SyncType::Request => "request",
            SyncType::Response => "response",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncPayload {
    /// Threat-intel registers the receiver may lack, plus the sender's
    /// complete rule set and metric counter
    Delta {
        threat_delta: Delta<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rules_delta: Option<OrSet<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metrics_delta: Option<PnCounter>,
    },
    /// Unsolicited complete snapshot (JSON-encoded [`Snapshot`])
    Full { full_state: String },
    /// Ask the receiver for its complete snapshot
    Request,
    /// Snapshot sent in answer to a request
    Response { full_state: String },
}

impl SyncPayload {
    pub fn sync_type(&self) -> SyncType {
        match self {
            SyncPayload::Delta { .. } => SyncType::Delta,
            SyncPayload::Full { .. } => SyncType::Full,
            SyncPayload::Request => SyncType::Request,
            SyncPayload::Response { .. } => SyncType::Response,
        }
    }
}

/// Unit of anti-entropy exchange
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub from_node: NodeId,
    pub to_node: NodeId,
    /// Send time (unix millis)
    pub timestamp: u64,
    /// Sender's threat-intel version when the message was built
    #[serde(default)]
    pub version: VectorClock,
    #[serde(flatten)]
    pub payload: SyncPayload,
}

impl SyncMessage {
    pub fn new(from: NodeId, to: NodeId, version: VectorClock, payload: SyncPayload) -> Self {
        Self {
            from_node: from,
            to_node: to,
            timestamp: unix_millis(),
            version,
            payload,
        }
    }

    pub fn sync_type(&self) -> SyncType {
        self.payload.sync_type()
    }

    /// Decode the snapshot carried by a `full` or `response` message
    pub fn snapshot(&self) -> Result<Snapshot> {
        match &self.payload {
            SyncPayload::Full { full_state } | SyncPayload::Response { full_state } => {
                Snapshot::from_json(full_state)
            }
            other => Err(Error::UnexpectedPayload {
                expected: "full or response",
                actual: other.sync_type().as_str(),
            }),
        }
    }
}

/// Body returned by a peer that accepted a sync message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncAck {
    pub status: String,
    /// Receiver's threat-intel version after applying the message
    #[serde(default)]
    pub version: VectorClock,
    /// Answer to a `request`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<SyncMessage>,
}

impl SyncAck {
    pub fn synced(version: VectorClock) -> Self {
        Self {
            status: "synced".to_string(),
            version,
            reply: None,
        }
    }

    pub fn with_reply(mut self, reply: SyncMessage) -> Self {
        self.reply = Some(reply);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> Snapshot {
        let node = NodeId::from("a");
        let mut threat_intel = ThreatIntelMap::new(node.clone());
        threat_intel.insert("ip:1.2.3.4", json!({"verdict": "malicious"}));
        let mut rules = OrSet::new();
        rules.add("rule-7".to_string(), "a-1");
        let mut metrics = PnCounter::new(node);
        metrics.increment(3);
        Snapshot {
            threat_intel,
            rules,
            metrics,
        }
    }

    #[test]
    fn test_delta_message_wire_shape() {
        let snap = snapshot();
        let msg = SyncMessage::new(
            NodeId::from("a"),
            NodeId::from("b"),
            snap.threat_intel.version().clone(),
            SyncPayload::Delta {
                threat_delta: snap.threat_intel.compute_delta(&VectorClock::new()),
                rules_delta: Some(snap.rules.clone()),
                metrics_delta: None,
            },
        );

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "delta");
        assert_eq!(value["from_node"], "a");
        assert_eq!(value["version"]["a"], 1);
        assert!(value.get("threat_delta").is_some());
        assert!(value.get("metrics_delta").is_none());

        let back: SyncMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.sync_type(), SyncType::Delta);
    }

    #[test]
    fn test_request_has_no_payload_fields() {
        let msg = SyncMessage::new(
            NodeId::from("a"),
            NodeId::from("b"),
            VectorClock::new(),
            SyncPayload::Request,
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "request");
        assert!(msg.snapshot().is_err());
    }

    #[test]
    fn test_full_state_snapshot_decodes() {
        let snap = snapshot();
        let msg = SyncMessage::new(
            NodeId::from("a"),
            NodeId::from("b"),
            VectorClock::new(),
            SyncPayload::Full {
                full_state: snap.to_json().unwrap(),
            },
        );
        let decoded = msg.snapshot().unwrap();
        assert_eq!(decoded, snap);
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let msg = SyncMessage::new(
            NodeId::from("a"),
            NodeId::from("b"),
            VectorClock::new(),
            SyncPayload::Response {
                full_state: "{\"threat_intel\": 17".to_string(),
            },
        );
        assert!(matches!(msg.snapshot(), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = r#"{"from_node":"a","to_node":"b","timestamp":1,"version":{},"type":"gossip"}"#;
        assert!(serde_json::from_str::<SyncMessage>(raw).is_err());
    }

    #[test]
    fn test_ack_roundtrip_with_reply() {
        let reply = SyncMessage::new(
            NodeId::from("b"),
            NodeId::from("a"),
            VectorClock::new(),
            SyncPayload::Response {
                full_state: snapshot().to_json().unwrap(),
            },
        );
        let ack = SyncAck::synced(VectorClock::new()).with_reply(reply);
        let json = serde_json::to_string(&ack).unwrap();
        let back: SyncAck = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ack);
    }
}
