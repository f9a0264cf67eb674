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

//! The bus runtime and its lifecycle state machine.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use super::dispatch::{DispatchCounters, Dispatcher, Route};
use super::{BusConfiguration, BusError, DispatchStats, TransportFault};
use crate::message::{BusOutbox, Initiator};
use crate::traits::{Delivery, SubscriptionFilter, TransportBinding, TransportConnection};

/// Deliveries of every queue a runtime consumes, tagged with their route.
type RoutedStream = BoxStream<'static, Result<(Route, Delivery), BusError>>;

/// Lifecycle state of a [`BusRuntime`].
///
/// `Created → Starting → Running → Stopping → Stopped`; `Faulted` is reached
/// from `Starting` or `Running` when the bus cannot continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeState {
    /// Built, not started.
    Created,
    /// Connecting and running `on_start` hooks.
    Starting,
    /// Consuming messages.
    Running,
    /// Draining in-flight messages.
    Stopping,
    /// Stopped gracefully.
    Stopped,
    /// Stopped by a fatal error.
    Faulted,
}

impl RuntimeState {
    /// `true` for `Stopped` and `Faulted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted)
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct RunningBus {
    connection: Arc<dyn TransportConnection>,
    outbox: Arc<BusOutbox>,
    cancellation: CancellationToken,
    tracker: TaskTracker,
    consume_loop: JoinHandle<()>,
}

struct RuntimeInner {
    configuration: BusConfiguration,
    state: watch::Sender<RuntimeState>,
    fault: Mutex<Option<BusError>>,
    outbox: RwLock<Option<Arc<BusOutbox>>>,
    running: tokio::sync::Mutex<Option<RunningBus>>,
    counters: Arc<DispatchCounters>,
}

impl RuntimeInner {
    fn set_state(&self, state: RuntimeState) {
        trace!(bus = %self.configuration.name, %state, "State change");
        self.state.send_replace(state);
    }

    /// Moves a starting or running bus to `Faulted`, keeping the first fault.
    /// A faulted bus hands out no more initiators.
    fn fault(&self, err: BusError) {
        let mut slot = self.fault.lock();
        let faulted = self.state.send_if_modified(|state| {
            if matches!(state, RuntimeState::Starting | RuntimeState::Running) {
                *state = RuntimeState::Faulted;
                true
            } else {
                false
            }
        });
        if faulted {
            error!(bus = %self.configuration.name, error = %err, "Bus faulted");
            *slot = Some(err);
            *self.outbox.write() = None;
        }
    }

    fn current_fault(&self) -> BusError {
        self.fault
            .lock()
            .clone()
            .unwrap_or_else(|| BusError::Configuration("bus faulted".to_string()))
    }
}

/// A configured bus.
///
/// Created by [`BusBuilder::build`](super::BusBuilder::build). Cloning yields
/// another handle to the same runtime.
#[derive(Clone)]
pub struct BusRuntime {
    inner: Arc<RuntimeInner>,
}

impl BusRuntime {
    pub(crate) fn new(configuration: BusConfiguration) -> Self {
        let (state, _) = watch::channel(RuntimeState::Created);
        Self {
            inner: Arc::new(RuntimeInner {
                configuration,
                state,
                fault: Mutex::new(None),
                outbox: RwLock::new(None),
                running: tokio::sync::Mutex::new(None),
                counters: Arc::new(DispatchCounters::default()),
            }),
        }
    }

    /// The configuration this runtime runs with.
    #[must_use]
    pub fn configuration(&self) -> &BusConfiguration {
        &self.inner.configuration
    }

    /// The bus name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.configuration.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        *self.inner.state.borrow()
    }

    /// Processing counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.inner.counters.snapshot()
    }

    /// Outbound capability of a running bus.
    pub fn initiator(&self) -> Result<Initiator, BusError> {
        self.inner
            .outbox
            .read()
            .as_ref()
            .map(|outbox| Initiator::new(Arc::clone(outbox)))
            .ok_or_else(|| {
                BusError::Configuration(format!(
                    "bus '{}' is {} and cannot send",
                    self.name(),
                    self.state()
                ))
            })
    }

    /// Starts the bus.
    ///
    /// Connects the transport, runs the `on_start` hooks, subscribes to the
    /// bus queue and to one queue per event subscriber, then starts
    /// consuming. Any failure leaves the runtime `Faulted` and is returned.
    ///
    /// # Errors
    ///
    /// [`BusError::Configuration`] when the runtime was already started, or
    /// the error that made the start fail.
    #[instrument(skip(self), fields(bus = %self.name()))]
    pub async fn start(&self) -> Result<Initiator, BusError> {
        let mut running = self.inner.running.lock().await;
        let current = self.state();
        if current != RuntimeState::Created {
            return Err(BusError::Configuration(format!(
                "bus '{}' is already started (state {current})",
                self.name()
            )));
        }
        self.inner.set_state(RuntimeState::Starting);

        match self.launch().await {
            Ok(bus) => {
                let outbox = Arc::clone(&bus.outbox);
                *running = Some(bus);
                *self.inner.outbox.write() = Some(Arc::clone(&outbox));
                let started = self.inner.state.send_if_modified(|state| {
                    let starting = *state == RuntimeState::Starting;
                    if starting {
                        *state = RuntimeState::Running;
                    }
                    starting
                });
                if !started {
                    *self.inner.outbox.write() = None;
                    return Err(self.inner.current_fault());
                }
                info!(
                    endpoint = %self.inner.configuration.transport.endpoint,
                    "Bus running"
                );
                Ok(Initiator::new(outbox))
            }
            Err(err) => {
                self.inner.fault(err.clone());
                Err(err)
            }
        }
    }

    async fn launch(&self) -> Result<RunningBus, BusError> {
        let configuration = &self.inner.configuration;
        let binding = TransportBinding {
            endpoint: configuration.transport.endpoint.clone(),
            address: configuration.address(),
            reconnect: configuration.reconnect.clone(),
        };

        let connection = tokio::time::timeout(
            configuration.connect_timeout,
            configuration.transport.transport.connect(&binding),
        )
        .await
        .map_err(|_| TransportFault::Timeout(configuration.connect_timeout))??;
        debug!("Transport connected");

        let outbox = Arc::new(BusOutbox::new(
            configuration.address(),
            Arc::clone(&configuration.codec),
            Arc::clone(&connection),
        ));

        let initiator = Initiator::new(Arc::clone(&outbox));
        if let Err(err) = configuration.hooks.start(&initiator).await {
            connection.close().await;
            return Err(err);
        }

        let stream = match Self::subscribe_all(configuration, connection.as_ref()).await {
            Ok(stream) => stream,
            Err(err) => {
                configuration.hooks.stop(&initiator).await;
                connection.close().await;
                return Err(err);
            }
        };

        let cancellation = CancellationToken::new();
        let tracker = TaskTracker::new();
        let dispatcher = Arc::new(Dispatcher::new(
            configuration.clone(),
            Arc::clone(&outbox),
            Arc::clone(&self.inner.counters),
        ));
        let consume_loop = tokio::spawn(consume(
            stream,
            dispatcher,
            Arc::new(Semaphore::new(configuration.concurrency)),
            cancellation.clone(),
            tracker.clone(),
            Arc::downgrade(&self.inner),
        ));

        Ok(RunningBus {
            connection,
            outbox,
            cancellation,
            tracker,
            consume_loop,
        })
    }

    /// Opens the command queue and one queue per event subscriber.
    async fn subscribe_all(
        configuration: &BusConfiguration,
        connection: &dyn TransportConnection,
    ) -> Result<RoutedStream, BusError> {
        let address = configuration.address();
        let mut filters = vec![(Route::Bus, SubscriptionFilter::commands(address.clone()))];
        for (message_type, index) in configuration.registry.event_subscribers() {
            let subscription = format!("{message_type}#{index}");
            filters.push((
                Route::Subscriber(index),
                SubscriptionFilter::events(address.clone(), subscription, vec![message_type]),
            ));
        }

        let mut streams = Vec::with_capacity(filters.len());
        for (route, filter) in filters {
            debug!(queue = %filter.queue_name(), "Subscribing");
            let deliveries = connection.subscribe(filter).await?;
            streams.push(
                deliveries
                    .map(move |item| item.map(|delivery| (route, delivery)))
                    .boxed(),
            );
        }
        Ok(stream::select_all(streams).boxed())
    }

    /// Stops the bus gracefully.
    ///
    /// Stops pulling messages, waits up to the shutdown timeout for in-flight
    /// messages, runs the `on_stop` hooks in reverse order and closes the
    /// connection. Stopping a bus that is not running is a no-op.
    ///
    /// # Errors
    ///
    /// The fault of a `Faulted` runtime.
    #[instrument(skip(self), fields(bus = %self.name()))]
    pub async fn stop(&self) -> Result<(), BusError> {
        let mut running = self.inner.running.lock().await;
        match self.state() {
            RuntimeState::Running => {}
            RuntimeState::Faulted => {
                if let Some(bus) = running.take() {
                    *self.inner.outbox.write() = None;
                    bus.cancellation.cancel();
                    bus.tracker.close();
                    bus.connection.close().await;
                }
                return Err(self.inner.current_fault());
            }
            state => {
                debug!(%state, "Stop requested while not running");
                return Ok(());
            }
        }
        let Some(bus) = running.take() else {
            return Ok(());
        };

        self.inner.set_state(RuntimeState::Stopping);
        bus.cancellation.cancel();
        if let Err(err) = bus.consume_loop.await {
            warn!(error = %err, "Consume loop ended abnormally");
        }

        bus.tracker.close();
        let drain = self.inner.configuration.shutdown_timeout;
        if tokio::time::timeout(drain, bus.tracker.wait()).await.is_err() {
            warn!(
                in_flight = bus.tracker.len(),
                timeout = ?drain,
                "Shutdown timeout elapsed; abandoning in-flight messages"
            );
        }

        self.inner
            .configuration
            .hooks
            .stop(&Initiator::new(Arc::clone(&bus.outbox)))
            .await;
        *self.inner.outbox.write() = None;
        bus.connection.close().await;
        self.inner.set_state(RuntimeState::Stopped);
        info!("Bus stopped");
        Ok(())
    }

    /// Waits until the runtime is `Stopped` or `Faulted`.
    ///
    /// # Errors
    ///
    /// The fault that stopped the runtime.
    pub async fn wait_for_termination(&self) -> Result<(), BusError> {
        let mut states = self.inner.state.subscribe();
        let terminal = match states.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => RuntimeState::Stopped,
        };
        if terminal == RuntimeState::Faulted {
            Err(self.inner.current_fault())
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for BusRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusRuntime")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Pulls deliveries while permits are available and hands each to its own task.
async fn consume(
    mut stream: RoutedStream,
    dispatcher: Arc<Dispatcher>,
    limiter: Arc<Semaphore>,
    cancellation: CancellationToken,
    tracker: TaskTracker,
    runtime: Weak<RuntimeInner>,
) {
    loop {
        let permit = tokio::select! {
            () = cancellation.cancelled() => break,
            permit = Arc::clone(&limiter).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let next = tokio::select! {
            () = cancellation.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok((route, delivery))) => {
                let dispatcher = Arc::clone(&dispatcher);
                tracker.spawn(async move {
                    dispatcher.process(delivery, route).await;
                    drop(permit);
                });
            }
            Some(Err(err)) => {
                if let Some(inner) = runtime.upgrade() {
                    inner.fault(err);
                }
                break;
            }
            None => {
                if !cancellation.is_cancelled() {
                    if let Some(inner) = runtime.upgrade() {
                        inner.fault(BusError::Transport(TransportFault::Closed));
                    }
                }
                break;
            }
        }
    }
    trace!("Consume loop finished");
}
