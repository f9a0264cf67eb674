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

//! Ordered execution of [`BusHook`]s and the guards they hand out.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, trace, warn};

use super::BusError;
use crate::message::{Conversation, Envelope, Initiator};
use crate::traits::BusHook;

/// Releases a resource acquired in `on_before_processing`.
///
/// The runtime releases guards explicitly, in reverse acquisition order, once
/// the handler has finished. A guard dropped without [`release`](Self::release)
/// runs its closure on drop.
#[must_use = "a guard releases as soon as it is dropped"]
pub struct HookGuard {
    release: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl HookGuard {
    /// A guard that runs `release` when released.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Runs the release closure now.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for HookGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookGuard")
            .field("pending", &self.release.is_some())
            .finish()
    }
}

/// Guards acquired for one message, released last-in first-out.
#[derive(Default)]
pub(crate) struct GuardStack {
    guards: Vec<HookGuard>,
}

impl GuardStack {
    pub(crate) fn release(mut self) {
        while let Some(guard) = self.guards.pop() {
            guard.release();
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// The hooks of a bus in registration order.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn BusHook>>,
}

impl HookChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook.
    pub fn push(&mut self, hook: Arc<dyn BusHook>) {
        self.hooks.push(hook);
    }

    /// Number of hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// `true` without hooks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs `on_start` in registration order, stopping at the first failure.
    pub(crate) async fn start(&self, initiator: &Initiator) -> Result<(), BusError> {
        for (index, hook) in self.hooks.iter().enumerate() {
            let outcome = AssertUnwindSafe(hook.on_start(initiator))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(BusError::Hook(format!("panicked: {}", panic_message(&*panic))))
                });
            if let Err(err) = outcome {
                error!(hook = index, error = %err, "on_start hook failed");
                return Err(match err {
                    BusError::Hook(_) => err,
                    other => BusError::Hook(format!("on_start hook #{index}: {other}")),
                });
            }
        }
        Ok(())
    }

    /// Runs `on_stop` in reverse order. Failures are logged and skipped.
    pub(crate) async fn stop(&self, initiator: &Initiator) {
        for (index, hook) in self.hooks.iter().enumerate().rev() {
            match AssertUnwindSafe(hook.on_stop(initiator)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(hook = index, error = %err, "on_stop hook failed"),
                Err(panic) => {
                    warn!(hook = index, panic = %panic_message(&*panic), "on_stop hook panicked");
                }
            }
        }
    }

    /// Runs `on_before_processing` in registration order.
    ///
    /// On failure the guards acquired so far are returned with the error so
    /// the caller can report it before releasing them.
    pub(crate) async fn before_processing(
        &self,
        conversation: &Conversation,
    ) -> Result<GuardStack, (GuardStack, BusError)> {
        let mut stack = GuardStack::default();
        for (index, hook) in self.hooks.iter().enumerate() {
            let outcome = AssertUnwindSafe(hook.on_before_processing(conversation))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(BusError::Hook(format!("panicked: {}", panic_message(&*panic))))
                });
            match outcome {
                Ok(guard) => stack.guards.push(guard),
                Err(err) => {
                    let err = match err {
                        BusError::Hook(_) => err,
                        other => {
                            BusError::Hook(format!("on_before_processing hook #{index}: {other}"))
                        }
                    };
                    return Err((stack, err));
                }
            }
        }
        trace!(guards = stack.guards.len(), "Acquired hook guards");
        Ok(stack)
    }

    /// Reports a failed message to every hook once, in registration order.
    pub(crate) async fn error(
        &self,
        conversation: &Conversation,
        envelope: &Envelope,
        failure: &BusError,
    ) {
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(panic) = AssertUnwindSafe(hook.on_error(conversation, envelope, failure))
                .catch_unwind()
                .await
            {
                error!(hook = index, panic = %panic_message(&*panic), "on_error hook panicked");
            }
        }
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use url::Url;

    use super::*;
    use crate::codec::JsonCodec;
    use crate::common::ReconnectPolicy;
    use crate::message::{Address, BusOutbox, EnvelopeHeader, MessageKind, MessageType};
    use crate::traits::{BusTransport, TransportBinding};
    use crate::transport::BrokerTransport;

    /// Panics at every stage.
    struct Exploding;

    #[async_trait]
    impl BusHook for Exploding {
        async fn on_start(&self, _initiator: &Initiator) -> Result<(), BusError> {
            panic!("start exploded");
        }

        async fn on_stop(&self, _initiator: &Initiator) -> Result<(), BusError> {
            panic!("stop exploded");
        }

        async fn on_before_processing(&self, _: &Conversation) -> Result<HookGuard, BusError> {
            panic!("before exploded");
        }

        async fn on_error(&self, _: &Conversation, _: &Envelope, _: &BusError) {
            panic!("error exploded");
        }
    }

    /// Writes every stage it reaches to a shared log.
    #[derive(Clone, Default)]
    struct Recorder {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl BusHook for Recorder {
        async fn on_stop(&self, _initiator: &Initiator) -> Result<(), BusError> {
            self.log.lock().push("stop");
            Ok(())
        }

        async fn on_before_processing(&self, _: &Conversation) -> Result<HookGuard, BusError> {
            self.log.lock().push("before");
            let log = Arc::clone(&self.log);
            Ok(HookGuard::new(move || log.lock().push("release")))
        }

        async fn on_error(&self, _: &Conversation, _: &Envelope, _: &BusError) {
            self.log.lock().push("error");
        }
    }

    fn chain(hooks: Vec<Arc<dyn BusHook>>) -> HookChain {
        let mut chain = HookChain::new();
        for hook in hooks {
            chain.push(hook);
        }
        chain
    }

    async fn outbox(host: &str) -> anyhow::Result<Arc<BusOutbox>> {
        let binding = TransportBinding {
            endpoint: Url::parse(&format!("memory://{host}/"))?,
            address: Address::new("hooks"),
            reconnect: ReconnectPolicy::default(),
        };
        let connection = BrokerTransport::with_max_redeliveries(0)
            .connect(&binding)
            .await?;
        Ok(Arc::new(BusOutbox::new(
            Address::new("hooks"),
            Arc::new(JsonCodec::default()),
            connection,
        )))
    }

    fn inbound(outbox: &Arc<BusOutbox>) -> (Conversation, Arc<Envelope>) {
        let header = EnvelopeHeader::new(
            MessageType::from_static("Ping"),
            MessageKind::Command,
            Address::new("caller"),
            Some(Address::new("hooks")),
            None,
            "application/json",
        );
        let envelope = Arc::new(Envelope::new(header, b"{}".to_vec()));
        (
            Conversation::new(Arc::clone(&envelope), Arc::clone(outbox)),
            envelope,
        )
    }

    #[tokio::test]
    async fn start_panic_fails_the_start() -> anyhow::Result<()> {
        let outbox = outbox("hook-chain-start").await?;
        let chain = chain(vec![Arc::new(Exploding)]);

        let started = chain.start(&Initiator::new(outbox)).await;
        match started {
            Err(BusError::Hook(message)) => assert!(message.contains("start exploded")),
            other => anyhow::bail!("expected a hook error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn before_processing_panic_keeps_earlier_guards() -> anyhow::Result<()> {
        let outbox = outbox("hook-chain-before").await?;
        let (conversation, _) = inbound(&outbox);
        let recorder = Recorder::default();
        let chain = chain(vec![Arc::new(recorder.clone()), Arc::new(Exploding)]);

        let Err((guards, err)) = chain.before_processing(&conversation).await else {
            anyhow::bail!("a panicking hook must fail the chain");
        };
        assert!(matches!(&err, BusError::Hook(message) if message.contains("before exploded")));
        assert_eq!(*recorder.log.lock(), ["before"]);

        guards.release();
        assert_eq!(*recorder.log.lock(), ["before", "release"]);
        Ok(())
    }

    #[tokio::test]
    async fn error_and_stop_panics_do_not_skip_other_hooks() -> anyhow::Result<()> {
        let outbox = outbox("hook-chain-error").await?;
        let (conversation, envelope) = inbound(&outbox);
        let recorder = Recorder::default();
        let chain = chain(vec![
            Arc::new(Exploding),
            Arc::new(recorder.clone()),
            Arc::new(Exploding),
        ]);

        let failure = BusError::Handler(crate::HandlerError::new("nope"));
        chain.error(&conversation, &envelope, &failure).await;
        chain.stop(&Initiator::new(Arc::clone(&outbox))).await;

        assert_eq!(*recorder.log.lock(), ["error", "stop"]);
        Ok(())
    }

    #[test]
    fn guard_stack_releases_in_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = GuardStack::default();
        for name in ["h1", "h2", "h3"] {
            let order = Arc::clone(&order);
            stack
                .guards
                .push(HookGuard::new(move || order.lock().push(name)));
        }
        stack.release();
        assert_eq!(*order.lock(), ["h3", "h2", "h1"]);
    }

    #[test]
    fn dropped_guard_releases_once() {
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let guard = HookGuard::new(move || *counter.lock() += 1);
        drop(guard);
        assert_eq!(*count.lock(), 1);

        HookGuard::noop().release();
    }
}
