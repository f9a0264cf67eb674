/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::{MessageKind, MessageType};

/// Generates a new type-prefixed, time-ordered message identifier (`msg_...`).
pub(crate) fn new_message_id() -> String {
    use mti::prelude::*;
    "msg".create_type_id::<V7>().to_string()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// A bus endpoint: the client (bus name) plus an optional shard.
///
/// Runtimes with the same address form one consumer group and compete for
/// the messages routed to it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// The bus name.
    pub client: String,
    /// The partition key, if any.
    pub shard: Option<String>,
}

impl Address {
    /// Address of an unsharded client.
    #[must_use]
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            shard: None,
        }
    }

    /// Address of one shard of a client.
    #[must_use]
    pub fn sharded(client: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            shard: Some(shard.into()),
        }
    }

    /// Queue name used by transports: `client` or `client/shard`.
    #[must_use]
    pub fn queue_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shard {
            Some(shard) => write!(f, "{}/{}", self.client, shard),
            None => f.write_str(&self.client),
        }
    }
}

/// Self-describing header carried by every envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Unique id of this message.
    pub message_id: String,
    /// Identity of the payload shape.
    pub message_type: MessageType,
    /// Command or event.
    pub kind: MessageKind,
    /// The bus that sent the message, with its shard.
    pub sender: Address,
    /// Target of a command. `None` for events.
    pub destination: Option<Address>,
    /// Id shared by every message of one conversation.
    pub correlation_id: String,
    /// MIME type of the body, as produced by the codec.
    pub content_type: String,
    /// Number of previous delivery attempts.
    pub delivery_count: u32,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl EnvelopeHeader {
    /// Creates a header with a fresh message id. A missing correlation id
    /// starts a new conversation keyed by the message id.
    #[must_use]
    pub fn new(
        message_type: MessageType,
        kind: MessageKind,
        sender: Address,
        destination: Option<Address>,
        correlation_id: Option<String>,
        content_type: impl Into<String>,
    ) -> Self {
        let message_id = new_message_id();
        let correlation_id = correlation_id.unwrap_or_else(|| message_id.clone());
        Self {
            message_id,
            message_type,
            kind,
            sender,
            destination,
            correlation_id,
            content_type: content_type.into(),
            delivery_count: 0,
            timestamp: now_millis(),
        }
    }
}

/// A header plus an opaque, codec-encoded body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Routing and identity metadata.
    pub header: EnvelopeHeader,
    /// Encoded payload.
    pub body: Vec<u8>,
}

impl Envelope {
    /// Creates a new envelope.
    #[must_use]
    pub fn new(header: EnvelopeHeader, body: Vec<u8>) -> Self {
        Self { header, body }
    }

    /// Shorthand for `header.message_type`.
    #[must_use]
    pub fn message_type(&self) -> &MessageType {
        &self.header.message_type
    }

    /// Shorthand for `header.message_id`.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.header.message_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_starts_a_conversation_when_uncorrelated() {
        let header = EnvelopeHeader::new(
            MessageType::from_static("Ping"),
            MessageKind::Command,
            Address::new("caller"),
            Some(Address::sharded("svc", "eu")),
            None,
            "application/json",
        );
        assert!(header.message_id.starts_with("msg_"));
        assert_eq!(header.correlation_id, header.message_id);
        assert_eq!(header.delivery_count, 0);
        assert_eq!(
            header.destination.as_ref().map(Address::queue_name).as_deref(),
            Some("svc/eu")
        );
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }
}
