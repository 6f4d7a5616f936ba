use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// A string-keyed mapping of arbitrary JSON values, the payload shape shared
/// by every envelope kind.
pub type Payload = serde_json::Map<String, Value>;

/// One immutable observation published on the bus.
///
/// Born at publish, never mutated, garbage collected once delivered to every
/// matching subscriber.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Opaque, unique identifier. Consumers rely only on equality.
    pub id: String,
    /// Dotted event type, e.g. `"github.issue.opened"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Producer tag. Workflow-originated events carry `"workflow:<name>"`.
    pub source: String,
    /// Unix seconds at publish time.
    pub timestamp: i64,
    /// Arbitrary string-keyed payload.
    pub payload: Payload,
}

impl Event {
    /// Builds a new event with a fresh random id and the given timestamp.
    #[must_use]
    pub fn new(id: String, event_type: impl Into<String>, source: impl Into<String>, timestamp: i64, payload: Payload) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            source: source.into(),
            timestamp,
            payload,
        }
    }

    /// Decodes an event from JSON bytes, for use on the hot dispatch path
    /// where only the envelope shape matters.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes the event as canonical JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Cheap, partial decode used by the routing path: only the `source` field is
/// required to apply the self-event guard.
pub fn decode_source(bytes: &[u8]) -> Result<String> {
    #[derive(Deserialize)]
    struct SourceOnly {
        source: String,
    }
    let s: SourceOnly = serde_json::from_slice(bytes)?;
    Ok(s.source)
}

/// Fields signed when a command secret is configured, in the canonical
/// field order `{command, payload, source}`. Any reimplementation must
/// reproduce this exact field order; `serde_json` serializes struct fields
/// in declaration order, which is what makes this struct do the job.
#[derive(Serialize)]
struct SignedFields<'a> {
    command: &'a str,
    payload: &'a Payload,
    source: &'a str,
}

/// An instruction targeted at a specific agent. Fire-and-forget: accepted or
/// rejected at the receiver, never acknowledged on the bus.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Command {
    /// Command name, interpreted by the receiving agent.
    pub command: String,
    /// Arbitrary string-keyed payload.
    pub payload: Payload,
    /// Producer tag. Workflow-originated commands carry `"workflow:<name>"`.
    pub source: String,
    /// Hex-lowercase HMAC-SHA256 signature, present when a secret is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Command {
    /// Builds an unsigned command.
    #[must_use]
    pub fn new(command: impl Into<String>, payload: Payload, source: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            payload,
            source: source.into(),
            signature: None,
        }
    }

    /// The canonical JSON bytes of `{command, payload, source}`, signed or
    /// verified against a configured secret.
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let fields = SignedFields {
            command: &self.command,
            payload: &self.payload,
            source: &self.source,
        };
        Ok(serde_json::to_vec(&fields)?)
    }

    /// Signs the command in place with the given secret.
    ///
    /// An empty secret is a configured no-op: the command is left unsigned.
    pub fn sign(&mut self, secret: &[u8]) -> Result<()> {
        if secret.is_empty() {
            self.signature = None;
            return Ok(());
        }
        let bytes = self.canonical_bytes()?;
        self.signature = Some(crate::signing::hmac_hex(secret, &bytes));
        Ok(())
    }

    /// Verifies the command's signature against the given secret.
    ///
    /// An empty secret always verifies true (signing was a no-op). A
    /// configured secret with a missing signature always verifies false.
    #[must_use]
    pub fn verify(&self, secret: &[u8]) -> bool {
        if secret.is_empty() {
            return true;
        }
        let Some(signature) = &self.signature else {
            return false;
        };
        let Ok(bytes) = self.canonical_bytes() else {
            return false;
        };
        crate::signing::hmac_verify(secret, &bytes, signature)
    }

    /// Decodes a command from JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes the command as JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Verifies the command, returning an error naming the command on failure.
    pub fn require_valid(&self, secret: &[u8]) -> Result<()> {
        if self.verify(secret) {
            Ok(())
        } else {
            Err(ProtocolError::SignatureRejected {
                command: self.command.clone(),
            })
        }
    }
}

/// An agent's self-description, sent on connect and replayable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    /// Agent name; the identity key in the registry.
    pub name: String,
    /// Free-form semantic version string.
    pub version: String,
    /// Set of capability tags the agent advertises.
    pub capabilities: HashSet<String>,
    /// Set of command names the agent accepts.
    pub commands: HashSet<String>,
}

impl Registration {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Liveness and counters emitted periodically by every connected agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    /// Agent name.
    pub name: String,
    /// Free-form status string (e.g. `"ok"`).
    pub status: String,
    /// RFC3339 timestamp of the last event the agent processed.
    pub last_event: String,
    /// Monotonic count of events the agent has processed since connect.
    pub events_processed: u64,
    /// Monotonic count of errors the agent has recorded since connect.
    pub errors: u64,
}

impl Heartbeat {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::new(
            "evt-1".to_owned(),
            "github.issue.opened",
            "github",
            1_700_000_000,
            payload(&[("number", Value::from(42))]),
        );
        let bytes = event.encode().unwrap();
        let decoded = Event::decode(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn decode_source_ignores_other_fields() {
        let event = Event::new(
            "evt-2".to_owned(),
            "loop.tick",
            "workflow:looper",
            0,
            Payload::new(),
        );
        let bytes = event.encode().unwrap();
        assert_eq!(decode_source(&bytes).unwrap(), "workflow:looper");
    }

    #[test]
    fn command_sign_and_verify_round_trip() {
        let mut cmd = Command::new("add_label", payload(&[("label", Value::from("triage"))]), "workflow:auto-label");
        cmd.sign(b"s3cr3t").unwrap();
        assert!(cmd.signature.is_some());
        assert!(cmd.verify(b"s3cr3t"));
        assert!(!cmd.verify(b"wrong-secret"));
    }

    #[test]
    fn empty_secret_disables_signing_and_always_verifies() {
        let mut cmd = Command::new("noop", Payload::new(), "workflow:x");
        cmd.sign(b"").unwrap();
        assert!(cmd.signature.is_none());
        assert!(cmd.verify(b""));
    }

    #[test]
    fn missing_signature_with_configured_secret_fails_verification() {
        let cmd = Command::new("noop", Payload::new(), "workflow:x");
        assert!(!cmd.verify(b"a-secret"));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut cmd = Command::new("add_label", payload(&[("label", Value::from("triage"))]), "workflow:auto-label");
        cmd.sign(b"s3cr3t").unwrap();
        cmd.payload.insert("label".to_owned(), Value::from("tampered"));
        assert!(!cmd.verify(b"s3cr3t"));
    }
}
