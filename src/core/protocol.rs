// src/core/protocol.rs

//! The wire-level message model: named commands, connection identifiers, and
//! the internal routing envelope.
//!
//! A command travels as a single frame holding a JSON object with a `name`
//! field and a base64-encoded `body` field, so arbitrary byte payloads
//! survive the text envelope bit-for-bit.

use crate::core::HubError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A process-unique, opaque token identifying one live connection.
///
/// Generated from a random UUID, so it is collision-resistant for the
/// process lifetime and never reused while the connection is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

/// The wire-level message envelope exchanged with peers.
///
/// The hub never interprets `body`; only the handler registered for `name`
/// does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(with = "base64_body")]
    pub body: Bytes,
}

impl Command {
    pub fn new(name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    /// Serializes the command into its wire frame.
    pub fn encode(&self) -> Bytes {
        // A (String, String) JSON object cannot fail to serialize.
        let data = serde_json::to_vec(self).expect("command serialization cannot fail");
        Bytes::from(data)
    }

    /// Parses one wire frame back into a command.
    pub fn decode(data: &[u8]) -> Result<Self, HubError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// The internal routing envelope carrying a pre-serialized command and an
/// optional destination. Built at the call site so the hub loop performs no
/// serialization; never appears on the wire.
#[derive(Debug, Clone)]
pub(crate) struct Packet {
    /// `None` means broadcast to every registered connection.
    pub to: Option<ConnectionId>,
    pub message: Bytes,
}

mod base64_body {
    //! Serde adapter encoding the command body as standard base64, matching
    //! the envelope produced by the wire protocol's reference peers.

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
