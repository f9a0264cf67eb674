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

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::broker::{BrokerQueue, InMemoryBroker};
use crate::common::{BusError, ReconnectPolicy, TransportFault, CONFIG};
use crate::message::Envelope;
use crate::traits::{
    Acknowledge, BusTransport, Delivery, EnvelopeStream, SubscriptionFilter, TransportBinding,
    TransportConnection,
};

const SCHEME: &str = "memory";

/// Transport for `memory://host/path` endpoints.
///
/// Every endpoint maps to one process-global [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct BrokerTransport {
    max_redeliveries: u32,
}

impl Default for BrokerTransport {
    fn default() -> Self {
        Self {
            max_redeliveries: CONFIG.transport.max_redeliveries,
        }
    }
}

impl BrokerTransport {
    /// A transport that dead-letters a message after `max_redeliveries` requeues.
    #[must_use]
    pub fn with_max_redeliveries(max_redeliveries: u32) -> Self {
        Self { max_redeliveries }
    }
}

#[async_trait]
impl BusTransport for BrokerTransport {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn validate(&self, endpoint: &Url) -> Result<(), BusError> {
        if endpoint.scheme() != SCHEME {
            return Err(BusError::Configuration(format!(
                "'{endpoint}' is not a {SCHEME}:// endpoint"
            )));
        }
        if endpoint.host_str().map_or(true, str::is_empty) {
            return Err(BusError::Configuration(format!(
                "'{endpoint}' names no broker host"
            )));
        }
        Ok(())
    }

    #[instrument(
        skip(self, binding),
        fields(endpoint = %binding.endpoint, address = %binding.address)
    )]
    async fn connect(
        &self,
        binding: &TransportBinding,
    ) -> Result<Arc<dyn TransportConnection>, BusError> {
        let broker = InMemoryBroker::for_endpoint(&binding.endpoint);
        let mut backoff = binding.reconnect.backoff();
        while !broker.is_online() {
            let Some(delay) = backoff.next_delay() else {
                return Err(TransportFault::ConnectFailed {
                    endpoint: binding.endpoint.to_string(),
                    attempts: backoff.attempts() + 1,
                }
                .into());
            };
            warn!(attempt = backoff.attempts(), ?delay, "Broker unreachable; retrying connect");
            tokio::time::sleep(delay).await;
        }
        info!("Connected to in-memory broker");
        Ok(Arc::new(BrokerConnection {
            broker,
            endpoint: binding.endpoint.to_string(),
            reconnect: binding.reconnect.clone(),
            max_redeliveries: self.max_redeliveries,
            closed: CancellationToken::new(),
        }))
    }
}

struct BrokerConnection {
    broker: Arc<InMemoryBroker>,
    endpoint: String,
    reconnect: ReconnectPolicy,
    max_redeliveries: u32,
    closed: CancellationToken,
}

impl BrokerConnection {
    /// Waits for the broker to come back, following the reconnect policy.
    async fn ensure_online(&self) -> Result<(), BusError> {
        let mut backoff = self.reconnect.backoff();
        while !self.broker.is_online() {
            let Some(delay) = backoff.next_delay() else {
                return Err(TransportFault::ConnectionLost {
                    endpoint: self.endpoint.clone(),
                    attempts: backoff.attempts(),
                }
                .into());
            };
            debug!(attempt = backoff.attempts(), ?delay, "Broker offline; publish waiting");
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl TransportConnection for BrokerConnection {
    async fn publish(&self, envelope: Envelope) -> Result<(), BusError> {
        if self.closed.is_cancelled() {
            return Err(TransportFault::Closed.into());
        }
        self.ensure_online().await?;
        self.broker.route(envelope).map(|_| ())
    }

    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<EnvelopeStream, BusError> {
        if self.closed.is_cancelled() {
            return Err(TransportFault::Closed.into());
        }
        let queue_name = filter.queue_name();
        let queue = self.broker.queue(&queue_name);
        for event in &filter.events {
            self.broker.bind(event, &queue_name);
        }
        debug!(queue = %queue_name, events = filter.events.len(), "Subscribed");

        let subscription = Subscription {
            queue,
            filter,
            online: self.broker.watch_online(),
            closed: self.closed.clone(),
            reconnect: self.reconnect.clone(),
            endpoint: self.endpoint.clone(),
            max_redeliveries: self.max_redeliveries,
            finished: false,
        };
        Ok(futures::stream::unfold(subscription, |mut subscription| async move {
            subscription
                .next_delivery()
                .await
                .map(|item| (item, subscription))
        })
        .boxed())
    }

    async fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(endpoint = %self.endpoint, "Closing connection");
            self.closed.cancel();
        }
    }
}

/// Consumer side of one queue.
struct Subscription {
    queue: Arc<BrokerQueue>,
    filter: SubscriptionFilter,
    online: watch::Receiver<bool>,
    closed: CancellationToken,
    reconnect: ReconnectPolicy,
    endpoint: String,
    max_redeliveries: u32,
    finished: bool,
}

impl Subscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BusError>> {
        loop {
            if self.finished || self.closed.is_cancelled() {
                return None;
            }
            if !*self.online.borrow_and_update() {
                if let Err(fault) = self.await_broker().await {
                    self.finished = true;
                    return Some(Err(fault));
                }
                continue;
            }

            tokio::select! {
                () = self.closed.cancelled() => return None,
                changed = self.online.changed() => {
                    if changed.is_err() {
                        self.finished = true;
                        return None;
                    }
                }
                envelope = self.queue.pop() => {
                    if !self.filter.accepts(&envelope.header) {
                        warn!(
                            message_type = %envelope.header.message_type,
                            message_id = %envelope.header.message_id,
                            "Message does not match the subscription; dead-lettering"
                        );
                        self.queue.dead_letter(envelope);
                        continue;
                    }
                    let acknowledger = BrokerAck {
                        queue: Arc::clone(&self.queue),
                        envelope: envelope.clone(),
                        max_redeliveries: self.max_redeliveries,
                    };
                    return Some(Ok(Delivery::new(envelope, Box::new(acknowledger))));
                }
            }
        }
    }

    /// Retries with backoff until the broker is online again or the policy gives up.
    async fn await_broker(&mut self) -> Result<(), BusError> {
        let mut backoff = self.reconnect.backoff();
        warn!(endpoint = %self.endpoint, "Lost connection to broker");
        loop {
            if *self.online.borrow_and_update() {
                info!(
                    endpoint = %self.endpoint,
                    attempts = backoff.attempts(),
                    "Reconnected to broker"
                );
                return Ok(());
            }
            let Some(delay) = backoff.next_delay() else {
                return Err(TransportFault::ConnectionLost {
                    endpoint: self.endpoint.clone(),
                    attempts: backoff.attempts(),
                }
                .into());
            };
            debug!(attempt = backoff.attempts(), ?delay, "Reconnecting");
            tokio::select! {
                () = self.closed.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

struct BrokerAck {
    queue: Arc<BrokerQueue>,
    envelope: Envelope,
    max_redeliveries: u32,
}

#[async_trait]
impl Acknowledge for BrokerAck {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.queue.ack();
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BusError> {
        if requeue {
            self.queue.requeue(self.envelope, self.max_redeliveries);
        } else {
            self.queue.dead_letter(self.envelope);
        }
        Ok(())
    }
}
