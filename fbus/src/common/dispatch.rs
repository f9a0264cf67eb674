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

//! Per-message processing: decode, resolve, hooks, handler, settlement.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, instrument, trace, warn};

use super::hook_chain::panic_message;
use super::registry::{BindingTarget, Payload};
use super::{BusConfiguration, BusError, HandlerBinding, HandlerError};
use crate::message::{BusOutbox, Conversation, Envelope, MessageKind};
use crate::traits::{Acknowledge, BusScope, Delivery, ScopeContext};

/// Counters shared between the dispatcher and the runtime.
#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    handled: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    requeued: AtomicU64,
}

impl DispatchCounters {
    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of what a runtime has processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages processed successfully and acknowledged.
    pub handled: u64,
    /// Messages whose processing failed.
    pub failed: u64,
    /// Failed messages acknowledged under the recovery policy.
    pub dropped: u64,
    /// Failed messages returned to the broker for redelivery.
    pub requeued: u64,
}

/// Which bindings a delivery is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// The command queue of the bus: every binding of the message type.
    Bus,
    /// A subscriber queue: the event binding at this position.
    Subscriber(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Handled,
    Failed,
}

fn as_resolution(err: BusError) -> BusError {
    match err {
        BusError::Resolution(_) => err,
        other => BusError::Resolution(other.to_string()),
    }
}

pub(crate) struct Dispatcher {
    configuration: BusConfiguration,
    outbox: Arc<BusOutbox>,
    counters: Arc<DispatchCounters>,
}

impl Dispatcher {
    pub(crate) fn new(
        configuration: BusConfiguration,
        outbox: Arc<BusOutbox>,
        counters: Arc<DispatchCounters>,
    ) -> Self {
        Self {
            configuration,
            outbox,
            counters,
        }
    }

    /// Processes one delivery and settles it with the broker.
    #[instrument(
        skip_all,
        fields(
            bus = %self.configuration.name,
            message_type = %delivery.envelope().header.message_type,
            message_id = %delivery.envelope().header.message_id,
        )
    )]
    pub(crate) async fn process(&self, delivery: Delivery, route: Route) {
        let (envelope, acknowledger) = delivery.into_parts();
        let envelope = Arc::new(envelope);
        let outcome = self.dispatch(&envelope, route).await;
        self.settle(outcome, acknowledger).await;
    }

    async fn dispatch(&self, envelope: &Arc<Envelope>, route: Route) -> Outcome {
        let header = &envelope.header;
        let codec = &self.configuration.codec;

        let payload = match codec.decode(&header.message_type, &envelope.body) {
            Ok(value) => Payload::new(value, codec.payload_shape()),
            Err(err) => {
                warn!(error = %err, "Could not decode message body");
                self.report(envelope, &err).await;
                return Outcome::Failed;
            }
        };

        let bindings = self.configuration.registry.resolve(&header.message_type);
        let bindings = match route {
            Route::Bus => bindings,
            Route::Subscriber(index) => bindings.get(index..=index).unwrap_or_default(),
        };
        if bindings.is_empty() {
            if header.kind == MessageKind::Event {
                trace!("No subscriber for event; acknowledging");
                return Outcome::Handled;
            }
            let err = BusError::Resolution(format!(
                "no consumer is bound to command '{}'",
                header.message_type
            ));
            warn!(error = %err, "Unroutable command");
            self.report(envelope, &err).await;
            return Outcome::Failed;
        }

        let mut outcome = Outcome::Handled;
        for binding in bindings {
            if let Err(err) = self.invoke(binding, envelope, payload.clone()).await {
                debug!(target_type = binding.target_name(), error = %err, "Handler failed");
                outcome = Outcome::Failed;
            }
        }
        outcome
    }

    /// Runs one binding inside its own scope and hook guards.
    async fn invoke(
        &self,
        binding: &HandlerBinding,
        envelope: &Arc<Envelope>,
        payload: Payload,
    ) -> Result<(), BusError> {
        let conversation = Conversation::new(Arc::clone(envelope), Arc::clone(&self.outbox));
        let hooks = &self.configuration.hooks;

        let context = ScopeContext {
            bus_name: self.configuration.name.clone(),
            message_type: envelope.header.message_type.clone(),
            message_id: envelope.header.message_id.clone(),
        };
        let mut scope = match self.configuration.container.new_scope(&context) {
            Ok(scope) => scope,
            Err(err) => {
                let err = as_resolution(err);
                hooks.error(&conversation, envelope, &err).await;
                return Err(err);
            }
        };

        let guards = match hooks.before_processing(&conversation).await {
            Ok(guards) => guards,
            Err((guards, err)) => {
                hooks.error(&conversation, envelope, &err).await;
                guards.release();
                scope.dispose();
                return Err(err);
            }
        };

        let result =
            Self::run_handler(binding, scope.as_mut(), conversation.clone(), payload).await;
        if let Err(err) = &result {
            hooks.error(&conversation, envelope, err).await;
        }
        guards.release();
        scope.dispose();
        result
    }

    async fn run_handler(
        binding: &HandlerBinding,
        scope: &mut dyn BusScope,
        conversation: Conversation,
        payload: Payload,
    ) -> Result<(), BusError> {
        let handler = match &binding.target {
            BindingTarget::Consumer { descriptor, invoke } => {
                let instance = scope.resolve(descriptor).map_err(as_resolution)?;
                invoke(instance, conversation, payload)
            }
            BindingTarget::Function(invoke) => invoke(conversation, payload),
        };
        AssertUnwindSafe(handler)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(BusError::Handler(HandlerError::new(format!(
                    "handler panicked: {}",
                    panic_message(&*panic)
                ))))
            })
    }

    /// Reports a failure that happened before any binding ran.
    async fn report(&self, envelope: &Arc<Envelope>, err: &BusError) {
        let conversation = Conversation::new(Arc::clone(envelope), Arc::clone(&self.outbox));
        self.configuration
            .hooks
            .error(&conversation, envelope, err)
            .await;
    }

    async fn settle(&self, outcome: Outcome, acknowledger: Box<dyn Acknowledge>) {
        let settled = match outcome {
            Outcome::Handled => {
                self.counters.handled.fetch_add(1, Ordering::Relaxed);
                acknowledger.ack().await
            }
            Outcome::Failed if self.configuration.recovery => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping failed message under recovery");
                acknowledger.ack().await
            }
            Outcome::Failed => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.counters.requeued.fetch_add(1, Ordering::Relaxed);
                debug!("Returning failed message to the broker");
                acknowledger.nack(true).await
            }
        };
        if let Err(err) = settled {
            warn!(error = %err, "Could not settle message");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use url::Url;

    use crate::prelude::*;

    #[bus_message(command)]
    struct Detonate {
        armed: bool,
    }

    #[derive(Clone, Default)]
    struct Witness {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl BusHook for Witness {
        async fn on_before_processing(&self, _: &Conversation) -> Result<HookGuard, BusError> {
            let log = Arc::clone(&self.log);
            Ok(HookGuard::new(move || log.lock().push("release".to_string())))
        }

        async fn on_error(&self, _: &Conversation, _: &Envelope, error: &BusError) {
            self.log.lock().push(error.to_string());
        }
    }

    #[tokio::test]
    async fn handler_panic_is_a_per_message_failure() -> anyhow::Result<()> {
        let witness = Witness::default();
        let runtime = BusBuilder::configure()
            .with_name("detonator")
            .with_handler(|_ctx: Conversation, msg: Detonate| async move {
                if msg.armed {
                    panic!("wire cut");
                }
                Ok::<(), HandlerError>(())
            })
            .with_hook(witness.clone())
            .with_recovery()
            .use_transport(Url::parse("memory://dispatch-panics/")?)
            .build()?;
        let initiator = runtime.start().await?;

        initiator.send("detonator", &Detonate { armed: true }).await?;
        initiator.send("detonator", &Detonate { armed: false }).await?;

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stats = runtime.stats();
                if stats.handled == 1 && stats.dropped == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;

        let log = witness.log.lock().clone();
        let failures: Vec<_> = log.iter().filter(|entry| *entry != "release").collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("handler panicked: wire cut"), "{log:?}");
        assert_eq!(log.iter().filter(|entry| *entry == "release").count(), 2);
        assert_eq!(runtime.state(), RuntimeState::Running);

        runtime.stop().await?;
        Ok(())
    }
}
