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

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{info, trace, warn};
use url::Url;

use crate::common::{BusError, TransportFault};
use crate::message::{Envelope, MessageKind, MessageType};

lazy_static! {
    /// Brokers by endpoint key, shared by every runtime of the process.
    static ref BROKERS: DashMap<String, Arc<InMemoryBroker>> = DashMap::new();
}

/// One queue of the broker: ready messages, dead letters and counters.
pub(crate) struct BrokerQueue {
    name: String,
    ready: Mutex<VecDeque<Envelope>>,
    dead: Mutex<Vec<Envelope>>,
    acked: AtomicU64,
    notify: Notify,
}

impl BrokerQueue {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ready: Mutex::new(VecDeque::new()),
            dead: Mutex::new(Vec::new()),
            acked: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    pub(crate) fn push(&self, envelope: Envelope) {
        self.ready.lock().push_back(envelope);
        self.notify.notify_one();
    }

    /// Waits for the next ready message. Concurrent callers compete; each
    /// message is handed to exactly one of them.
    pub(crate) async fn pop(&self) -> Envelope {
        loop {
            let notified = self.notify.notified();
            let next = self.ready.lock().pop_front();
            if let Some(envelope) = next {
                return envelope;
            }
            notified.await;
        }
    }

    pub(crate) fn ack(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a message for another attempt, or dead-letters it once
    /// `max_redeliveries` is used up.
    pub(crate) fn requeue(&self, mut envelope: Envelope, max_redeliveries: u32) {
        envelope.header.delivery_count += 1;
        if envelope.header.delivery_count > max_redeliveries {
            warn!(
                queue = %self.name,
                message_id = %envelope.header.message_id,
                deliveries = envelope.header.delivery_count,
                "Redelivery limit reached; dead-lettering"
            );
            self.dead.lock().push(envelope);
        } else {
            trace!(queue = %self.name, message_id = %envelope.header.message_id, "Requeued");
            self.push(envelope);
        }
    }

    pub(crate) fn dead_letter(&self, envelope: Envelope) {
        self.dead.lock().push(envelope);
    }
}

/// A process-local message broker.
///
/// Runtimes connected to the same endpoint share one broker. Each client
/// address (`name` or `name/shard`) owns a queue that is declared the first
/// time anything is published to it or consumed from it:
///
/// - commands are routed to the queue of their destination;
/// - events are copied to every queue bound to their type;
/// - consumers of one queue compete for its messages.
///
/// [`disconnect`](Self::disconnect) and [`reconnect`](Self::reconnect)
/// simulate losing and regaining the broker.
pub struct InMemoryBroker {
    name: String,
    queues: DashMap<String, Arc<BrokerQueue>>,
    bindings: DashMap<MessageType, HashSet<String>>,
    online: watch::Sender<bool>,
}

impl InMemoryBroker {
    /// Creates a standalone broker that is not registered for any endpoint.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (online, _) = watch::channel(true);
        Arc::new(Self {
            name: name.into(),
            queues: DashMap::new(),
            bindings: DashMap::new(),
            online,
        })
    }

    /// The broker serving `endpoint`, created on first use.
    #[must_use]
    pub fn for_endpoint(endpoint: &Url) -> Arc<Self> {
        let key = Self::endpoint_key(endpoint);
        Arc::clone(
            BROKERS
                .entry(key.clone())
                .or_insert_with(|| {
                    info!(broker = %key, "Creating in-memory broker");
                    Self::new(key)
                })
                .value(),
        )
    }

    /// Authority and path of `endpoint`; endpoints with the same key share a broker.
    #[must_use]
    pub fn endpoint_key(endpoint: &Url) -> String {
        let host = endpoint.host_str().unwrap_or_default();
        match endpoint.port() {
            Some(port) => format!("{host}:{port}{}", endpoint.path()),
            None => format!("{host}{}", endpoint.path()),
        }
    }

    /// The broker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `false` between [`disconnect`](Self::disconnect) and [`reconnect`](Self::reconnect).
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Makes the broker unreachable. Connections start retrying.
    pub fn disconnect(&self) {
        warn!(broker = %self.name, "Broker going offline");
        self.online.send_replace(false);
    }

    /// Makes the broker reachable again.
    pub fn reconnect(&self) {
        info!(broker = %self.name, "Broker back online");
        self.online.send_replace(true);
    }

    pub(crate) fn watch_online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    pub(crate) fn queue(&self, name: &str) -> Arc<BrokerQueue> {
        Arc::clone(
            self.queues
                .entry(name.to_string())
                .or_insert_with(|| {
                    trace!(broker = %self.name, queue = name, "Declaring queue");
                    Arc::new(BrokerQueue::new(name))
                })
                .value(),
        )
    }

    pub(crate) fn bind(&self, event: &MessageType, queue: &str) {
        self.bindings
            .entry(event.clone())
            .or_default()
            .insert(queue.to_string());
    }

    /// Routes an envelope and returns the number of queues it reached.
    ///
    /// # Errors
    ///
    /// [`TransportFault::Unroutable`] for a command without destination.
    pub fn route(&self, envelope: Envelope) -> Result<usize, BusError> {
        match envelope.header.kind {
            MessageKind::Command => {
                let destination = envelope.header.destination.as_ref().ok_or_else(|| {
                    TransportFault::Unroutable(format!(
                        "command '{}' has no destination",
                        envelope.header.message_type
                    ))
                })?;
                self.queue(&destination.queue_name()).push(envelope);
                Ok(1)
            }
            MessageKind::Event => {
                let targets: Vec<String> = self
                    .bindings
                    .get(&envelope.header.message_type)
                    .map(|bound| bound.iter().cloned().collect())
                    .unwrap_or_default();
                if targets.is_empty() {
                    trace!(
                        broker = %self.name,
                        message_type = %envelope.header.message_type,
                        "Event has no subscribers"
                    );
                }
                for target in &targets {
                    self.queue(target).push(envelope.clone());
                }
                Ok(targets.len())
            }
        }
    }

    /// Messages waiting in `queue`.
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.queues
            .get(queue)
            .map_or(0, |q| q.ready.lock().len())
    }

    /// Messages dead-lettered from `queue`.
    #[must_use]
    pub fn dead_letters(&self, queue: &str) -> Vec<Envelope> {
        self.queues
            .get(queue)
            .map(|q| q.dead.lock().clone())
            .unwrap_or_default()
    }

    /// Messages acknowledged from `queue`.
    #[must_use]
    pub fn acked_count(&self, queue: &str) -> u64 {
        self.queues
            .get(queue)
            .map_or(0, |q| q.acked.load(Ordering::Relaxed))
    }

    /// Names of the declared queues.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.queues.iter().map(|q| q.key().clone()).collect();
        names.sort();
        names
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("name", &self.name)
            .field("queues", &self.queues.len())
            .field("online", &self.is_online())
            .finish()
    }
}
