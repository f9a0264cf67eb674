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

use async_trait::async_trait;
use futures::stream::BoxStream;
use url::Url;

use crate::common::{BusError, ReconnectPolicy};
use crate::message::{Address, Envelope, EnvelopeHeader, MessageKind, MessageType};

/// Stream of inbound deliveries.
///
/// Ends with `None` after the connection is closed, or after yielding a
/// terminal `Err` once reconnection has been given up.
pub type EnvelopeStream = BoxStream<'static, Result<Delivery, BusError>>;

/// Everything a transport needs to open a connection for one runtime.
#[derive(Clone, Debug)]
pub struct TransportBinding {
    /// Broker endpoint.
    pub endpoint: Url,
    /// Address of the runtime (bus name and shard).
    pub address: Address,
    /// How to retry when the broker is unreachable.
    pub reconnect: ReconnectPolicy,
}

/// Selects the messages a subscription receives.
///
/// A runtime opens one subscription for the commands addressed to it and one
/// per event subscriber, so a failing subscriber is redelivered on its own.
#[derive(Clone, Debug)]
pub struct SubscriptionFilter {
    /// The address that owns the queue.
    pub queue: Address,
    /// Names the event subscriber this queue belongs to; `None` for the
    /// command queue.
    pub subscription: Option<String>,
    /// Event types whose broadcasts are bound to the queue.
    pub events: Vec<MessageType>,
}

impl SubscriptionFilter {
    /// Commands addressed to `queue`.
    #[must_use]
    pub fn commands(queue: Address) -> Self {
        Self {
            queue,
            subscription: None,
            events: Vec::new(),
        }
    }

    /// Broadcasts of `events` for the subscriber named `subscription`.
    #[must_use]
    pub fn events(
        queue: Address,
        subscription: impl Into<String>,
        events: Vec<MessageType>,
    ) -> Self {
        Self {
            queue,
            subscription: Some(subscription.into()),
            events,
        }
    }

    /// Broker queue name: the address, plus `@subscription` for subscribers.
    #[must_use]
    pub fn queue_name(&self) -> String {
        match &self.subscription {
            Some(subscription) => format!("{}@{subscription}", self.queue.queue_name()),
            None => self.queue.queue_name(),
        }
    }

    /// Commands must be addressed to a command queue; events must be bound.
    #[must_use]
    pub fn accepts(&self, header: &EnvelopeHeader) -> bool {
        match header.kind {
            MessageKind::Command => {
                self.subscription.is_none() && header.destination.as_ref() == Some(&self.queue)
            }
            MessageKind::Event => self.events.contains(&header.message_type),
        }
    }
}


/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// The message was processed and can be forgotten.
    async fn ack(self: Box<Self>) -> Result<(), BusError>;

    /// The message was not processed. With `requeue` the broker redelivers
    /// it, otherwise it is dead-lettered.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BusError>;
}

/// An inbound envelope together with its acknowledger.
pub struct Delivery {
    envelope: Envelope,
    acknowledger: Box<dyn Acknowledge>,
}

impl Delivery {
    /// Creates a delivery.
    pub fn new(envelope: Envelope, acknowledger: Box<dyn Acknowledge>) -> Self {
        Self {
            envelope,
            acknowledger,
        }
    }

    /// The delivered envelope.
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Splits the delivery so the envelope can be consumed before settling.
    #[must_use]
    pub fn into_parts(self) -> (Envelope, Box<dyn Acknowledge>) {
        (self.envelope, self.acknowledger)
    }

    /// Acknowledges the delivery.
    pub async fn ack(self) -> Result<(), BusError> {
        self.acknowledger.ack().await
    }

    /// Negatively acknowledges the delivery.
    pub async fn nack(self, requeue: bool) -> Result<(), BusError> {
        self.acknowledger.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

/// A message transport backend.
#[async_trait]
pub trait BusTransport: Send + Sync + 'static {
    /// URL scheme served by this transport.
    fn scheme(&self) -> &str;

    /// Checks an endpoint at build time.
    fn validate(&self, endpoint: &Url) -> Result<(), BusError> {
        if endpoint.scheme() == self.scheme() {
            Ok(())
        } else {
            Err(BusError::Configuration(format!(
                "transport '{}' cannot serve endpoint '{endpoint}'",
                self.scheme()
            )))
        }
    }

    /// Opens a connection, retrying according to the binding's reconnect policy.
    async fn connect(
        &self,
        binding: &TransportBinding,
    ) -> Result<Arc<dyn TransportConnection>, BusError>;
}

/// An open transport connection.
#[async_trait]
pub trait TransportConnection: Send + Sync + 'static {
    /// Routes an envelope: commands to their destination queue, events to
    /// every bound queue.
    async fn publish(&self, envelope: Envelope) -> Result<(), BusError>;

    /// Starts consuming the filter's queue.
    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<EnvelopeStream, BusError>;

    /// Closes the connection and ends its streams.
    async fn close(&self);
}
