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
use std::sync::Arc;

use tracing::trace;

use super::{new_message_id, Address, Envelope, EnvelopeHeader, MessageKind, MessageType};
use crate::common::BusError;
use crate::traits::{BusCodec, BusMessage, TransportConnection};

/// The outbound path shared by every conversation and initiator of one runtime.
pub(crate) struct BusOutbox {
    origin: Address,
    codec: Arc<dyn BusCodec>,
    connection: Arc<dyn TransportConnection>,
}

impl BusOutbox {
    pub(crate) fn new(
        origin: Address,
        codec: Arc<dyn BusCodec>,
        connection: Arc<dyn TransportConnection>,
    ) -> Self {
        Self {
            origin,
            codec,
            connection,
        }
    }

    pub(crate) fn origin(&self) -> &Address {
        &self.origin
    }

    /// Encodes `message` and hands it to the transport.
    pub(crate) async fn deliver<M: BusMessage>(
        &self,
        message: &M,
        destination: Option<Address>,
        correlation_id: Option<String>,
    ) -> Result<(), BusError> {
        let body = self.codec.encode_message(message)?;
        let header = EnvelopeHeader::new(
            M::message_type(),
            M::KIND,
            self.origin.clone(),
            destination,
            correlation_id,
            self.codec.content_type(),
        );
        trace!(
            message_type = %header.message_type,
            message_id = %header.message_id,
            destination = ?header.destination,
            "Delivering outbound message"
        );
        self.connection.publish(Envelope::new(header, body)).await
    }

    pub(crate) async fn republish(&self, envelope: Envelope) -> Result<(), BusError> {
        self.connection.publish(envelope).await
    }
}

fn ensure_kind<M: BusMessage>(expected: MessageKind, operation: &str) -> Result<(), BusError> {
    if M::KIND == expected {
        Ok(())
    } else {
        Err(BusError::Configuration(format!(
            "cannot {operation} '{}': it is declared as a {} and {operation} takes a {expected}",
            M::message_type(),
            M::KIND,
        )))
    }
}

/// Context for one inbound message, handed to consumers and hooks.
///
/// Exposes who sent the message and lets the handler answer, send further
/// commands or publish events. Outbound messages keep the inbound
/// correlation id, so a whole exchange can be traced end to end.
#[derive(Clone)]
pub struct Conversation {
    inbound: Arc<Envelope>,
    outbox: Arc<BusOutbox>,
}

impl Conversation {
    pub(crate) fn new(inbound: Arc<Envelope>, outbox: Arc<BusOutbox>) -> Self {
        Self { inbound, outbox }
    }

    /// Name of the bus that sent the message.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.inbound.header.sender.client
    }

    /// Shard of the sending bus, if any.
    #[must_use]
    pub fn sender_shard(&self) -> Option<&str> {
        self.inbound.header.sender.shard.as_deref()
    }

    /// Full address of the sending bus.
    #[must_use]
    pub fn sender_address(&self) -> &Address {
        &self.inbound.header.sender
    }

    /// Id of the inbound message.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.inbound.header.message_id
    }

    /// Correlation id of the exchange.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.inbound.header.correlation_id
    }

    /// Type of the inbound message.
    #[must_use]
    pub fn message_type(&self) -> &MessageType {
        &self.inbound.header.message_type
    }

    /// Number of earlier delivery attempts of the inbound message.
    #[must_use]
    pub fn delivery_count(&self) -> u32 {
        self.inbound.header.delivery_count
    }

    /// Name of the bus processing the message.
    #[must_use]
    pub fn bus_name(&self) -> &str {
        &self.outbox.origin().client
    }

    /// Sends a command back to the sender (and its shard).
    pub async fn reply<M: BusMessage>(&self, message: &M) -> Result<(), BusError> {
        ensure_kind::<M>(MessageKind::Command, "reply")?;
        self.outbox
            .deliver(
                message,
                Some(self.inbound.header.sender.clone()),
                Some(self.correlation_id().to_string()),
            )
            .await
    }

    /// Sends a command to `client`.
    pub async fn send<M: BusMessage>(&self, client: &str, message: &M) -> Result<(), BusError> {
        ensure_kind::<M>(MessageKind::Command, "send")?;
        self.outbox
            .deliver(
                message,
                Some(Address::new(client)),
                Some(self.correlation_id().to_string()),
            )
            .await
    }

    /// Sends a command to one shard of `client`.
    pub async fn send_to_shard<M: BusMessage>(
        &self,
        client: &str,
        shard: &str,
        message: &M,
    ) -> Result<(), BusError> {
        ensure_kind::<M>(MessageKind::Command, "send")?;
        self.outbox
            .deliver(
                message,
                Some(Address::sharded(client, shard)),
                Some(self.correlation_id().to_string()),
            )
            .await
    }

    /// Publishes an event to every subscriber.
    pub async fn publish<M: BusMessage>(&self, message: &M) -> Result<(), BusError> {
        ensure_kind::<M>(MessageKind::Event, "publish")?;
        self.outbox
            .deliver(message, None, Some(self.correlation_id().to_string()))
            .await
    }

    /// Re-addresses the inbound command to `client` unchanged.
    ///
    /// The original sender is kept so the new recipient replies to it.
    pub async fn forward(&self, client: &str) -> Result<(), BusError> {
        if self.inbound.header.kind != MessageKind::Command {
            return Err(BusError::Configuration(format!(
                "cannot forward event '{}'; only commands have a destination",
                self.message_type()
            )));
        }
        let mut envelope = (*self.inbound).clone();
        envelope.header.message_id = new_message_id();
        envelope.header.destination = Some(Address::new(client));
        envelope.header.delivery_count = 0;
        self.outbox.republish(envelope).await
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("message_type", self.message_type())
            .field("message_id", &self.message_id())
            .field("sender", self.sender_address())
            .field("correlation_id", &self.correlation_id())
            .finish()
    }
}

/// Outbound capability with no inbound message.
///
/// Returned by `BusRuntime::start` and passed to `on_start`/`on_stop` hooks.
#[derive(Clone)]
pub struct Initiator {
    outbox: Arc<BusOutbox>,
}

impl Initiator {
    pub(crate) fn new(outbox: Arc<BusOutbox>) -> Self {
        Self { outbox }
    }

    /// Name of the bus.
    #[must_use]
    pub fn bus_name(&self) -> &str {
        &self.outbox.origin().client
    }

    /// Sends a command to `client`, starting a new conversation.
    pub async fn send<M: BusMessage>(&self, client: &str, message: &M) -> Result<(), BusError> {
        ensure_kind::<M>(MessageKind::Command, "send")?;
        self.outbox
            .deliver(message, Some(Address::new(client)), None)
            .await
    }

    /// Sends a command to one shard of `client`.
    pub async fn send_to_shard<M: BusMessage>(
        &self,
        client: &str,
        shard: &str,
        message: &M,
    ) -> Result<(), BusError> {
        ensure_kind::<M>(MessageKind::Command, "send")?;
        self.outbox
            .deliver(message, Some(Address::sharded(client, shard)), None)
            .await
    }

    /// Publishes an event to every subscriber.
    pub async fn publish<M: BusMessage>(&self, message: &M) -> Result<(), BusError> {
        ensure_kind::<M>(MessageKind::Event, "publish")?;
        self.outbox.deliver(message, None, None).await
    }
}

impl fmt::Debug for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initiator")
            .field("origin", self.outbox.origin())
            .finish()
    }
}
