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

//! Handler bindings and the registry the dispatcher resolves them from.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use super::{BusError, HandlerError};
use crate::codec::PayloadShape;
use crate::message::{Conversation, MessageKind, MessageType};
use crate::traits::{BusConsumer, BusMessage, Consumer, ConsumerDescriptor, ConsumerInstance};

/// Future returned by a type-erased handler invocation.
pub(crate) type HandlerFuture = BoxFuture<'static, Result<(), BusError>>;

/// Invokes `BusConsumer<M>::handle` on a resolved instance.
type ConsumerInvoker =
    Arc<dyn Fn(ConsumerInstance, Conversation, Payload) -> HandlerFuture + Send + Sync>;

/// Invokes an inline handler function.
type FunctionInvoker = Arc<dyn Fn(Conversation, Payload) -> HandlerFuture + Send + Sync>;

/// A decoded body together with the shape the codec wrote it in.
#[derive(Debug, Clone)]
pub(crate) struct Payload {
    value: Value,
    shape: PayloadShape,
}

impl Payload {
    pub(crate) fn new(value: Value, shape: PayloadShape) -> Self {
        Self { value, shape }
    }

    fn decode<M: BusMessage>(self) -> Result<M, BusError> {
        self.shape
            .from_value(self.value)
            .map_err(|e| BusError::Deserialization(format!("'{}': {e}", M::message_type())))
    }
}

/// What a binding invokes.
#[derive(Clone)]
pub(crate) enum BindingTarget {
    /// A consumer type resolved through the container.
    Consumer {
        descriptor: ConsumerDescriptor,
        invoke: ConsumerInvoker,
    },
    /// An inline async function.
    Function(FunctionInvoker),
}

/// Associates one message type with one invocation target.
#[derive(Clone)]
pub struct HandlerBinding {
    message_type: MessageType,
    kind: MessageKind,
    payload_type: TypeId,
    payload_type_name: &'static str,
    pub(crate) target: BindingTarget,
}

impl HandlerBinding {
    pub(crate) fn for_consumer<C, M>(descriptor: ConsumerDescriptor) -> Self
    where
        C: Consumer + BusConsumer<M>,
        M: BusMessage,
    {
        let invoke: ConsumerInvoker = Arc::new(
            |instance: ConsumerInstance,
             conversation: Conversation,
             payload: Payload|
             -> HandlerFuture {
                Box::pin(async move {
                    let consumer = instance.downcast::<C>().map_err(|_| {
                        BusError::Resolution(format!(
                            "container returned the wrong instance for {}",
                            std::any::type_name::<C>()
                        ))
                    })?;
                    let message = payload.decode::<M>()?;
                    <C as BusConsumer<M>>::handle(&consumer, &conversation, message)
                        .await
                        .map_err(BusError::Handler)
                })
            },
        );
        Self::new::<M>(BindingTarget::Consumer { descriptor, invoke })
    }

    pub(crate) fn function<M, F, Fut>(handler: F) -> Self
    where
        M: BusMessage,
        F: Fn(Conversation, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoke: FunctionInvoker = Arc::new(
            move |conversation: Conversation, payload: Payload| -> HandlerFuture {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let message = payload.decode::<M>()?;
                    handler(conversation, message).await.map_err(BusError::Handler)
                })
            },
        );
        Self::new::<M>(BindingTarget::Function(invoke))
    }

    fn new<M: BusMessage>(target: BindingTarget) -> Self {
        Self {
            message_type: M::message_type(),
            kind: M::KIND,
            payload_type: TypeId::of::<M>(),
            payload_type_name: std::any::type_name::<M>(),
            target,
        }
    }

    /// The bound message type.
    #[must_use]
    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    /// Command or event.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The consumer type this binding resolves, if it is not an inline function.
    #[must_use]
    pub fn consumer(&self) -> Option<&ConsumerDescriptor> {
        match &self.target {
            BindingTarget::Consumer { descriptor, .. } => Some(descriptor),
            BindingTarget::Function(_) => None,
        }
    }

    /// Human-readable target, for logs.
    #[must_use]
    pub fn target_name(&self) -> &'static str {
        match &self.target {
            BindingTarget::Consumer { descriptor, .. } => descriptor.type_name(),
            BindingTarget::Function(_) => "<handler fn>",
        }
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("message_type", &self.message_type)
            .field("kind", &self.kind)
            .field("payload", &self.payload_type_name)
            .field("target", &self.target_name())
            .finish()
    }
}

/// Message-type-keyed table of handler bindings.
///
/// Filled while the bus is configured and shared read-only afterwards.
/// Registration enforces the binding policy:
///
/// - a command type accepts exactly one binding;
/// - an event type accepts any number of distinct targets, but the same
///   consumer type only once;
/// - one name cannot be both a command and an event, nor belong to two
///   different Rust types.
#[derive(Default)]
pub struct HandlerRegistry {
    bindings: HashMap<MessageType, Vec<HandlerBinding>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding, rejecting it with [`BusError::Configuration`] when it
    /// violates the binding policy.
    pub fn register(&mut self, binding: HandlerBinding) -> Result<(), BusError> {
        let existing = self.bindings.entry(binding.message_type.clone()).or_default();

        if let Some(first) = existing.first() {
            if first.payload_type != binding.payload_type {
                return Err(BusError::Configuration(format!(
                    "message type '{}' is already bound to {} and cannot also name {}",
                    binding.message_type, first.payload_type_name, binding.payload_type_name
                )));
            }
            if first.kind != binding.kind {
                return Err(BusError::Configuration(format!(
                    "message type '{}' is registered as a {} and cannot also be a {}",
                    binding.message_type, first.kind, binding.kind
                )));
            }
            if binding.kind == MessageKind::Command {
                return Err(BusError::Configuration(format!(
                    "command '{}' already has a handler ({}); commands take exactly one",
                    binding.message_type,
                    first.target_name()
                )));
            }
            if let Some(consumer) = binding.consumer() {
                let duplicate = existing.iter().any(|bound| {
                    bound
                        .consumer()
                        .is_some_and(|other| other.type_id() == consumer.type_id())
                });
                if duplicate {
                    return Err(BusError::Configuration(format!(
                        "{} is already subscribed to '{}'",
                        consumer.type_name(),
                        binding.message_type
                    )));
                }
            }
        }

        existing.push(binding);
        Ok(())
    }

    /// The bindings for `message_type`; empty when nothing is bound.
    #[must_use]
    pub fn resolve(&self, message_type: &MessageType) -> &[HandlerBinding] {
        self.bindings
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The kind `message_type` was registered with.
    #[must_use]
    pub fn kind_of(&self, message_type: &MessageType) -> Option<MessageKind> {
        self.resolve(message_type).first().map(HandlerBinding::kind)
    }

    /// `true` when `message_type` has at least one binding.
    #[must_use]
    pub fn contains(&self, message_type: &MessageType) -> bool {
        !self.resolve(message_type).is_empty()
    }

    /// Every bound message type.
    #[must_use]
    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<_> = self.bindings.keys().cloned().collect();
        types.sort();
        types
    }

    /// Every bound event type.
    #[must_use]
    pub fn event_types(&self) -> Vec<MessageType> {
        let mut types: Vec<_> = self
            .bindings
            .iter()
            .filter(|(_, bound)| {
                bound
                    .first()
                    .is_some_and(|binding| binding.kind == MessageKind::Event)
            })
            .map(|(message_type, _)| message_type.clone())
            .collect();
        types.sort();
        types
    }

    /// Every event binding as its type and position among that type's
    /// bindings, in registration order.
    pub(crate) fn event_subscribers(&self) -> Vec<(MessageType, usize)> {
        self.event_types()
            .into_iter()
            .flat_map(|message_type| {
                let count = self.resolve(&message_type).len();
                (0..count).map(move |index| (message_type.clone(), index))
            })
            .collect()
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.values().map(Vec::len).sum()
    }

    /// `true` when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_types", &self.bindings.len())
            .field("bindings", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{bus_consumer, bus_message};

    #[bus_message(command)]
    struct Ping {
        from: String,
    }

    #[bus_message(event)]
    struct Pinged {
        count: u32,
    }

    #[bus_message(event, name = "Ping")]
    struct ImpostorPing {
        count: u32,
    }

    #[bus_consumer(Ping, Pinged)]
    struct PingConsumer;

    #[bus_consumer(Pinged)]
    struct AuditConsumer;

    #[async_trait]
    impl BusConsumer<Ping> for PingConsumer {
        async fn handle(&self, _: &Conversation, _: Ping) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[async_trait]
    impl BusConsumer<Pinged> for PingConsumer {
        async fn handle(&self, _: &Conversation, _: Pinged) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[async_trait]
    impl BusConsumer<Pinged> for AuditConsumer {
        async fn handle(&self, _: &Conversation, _: Pinged) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn bindings_of<C: Consumer>() -> Vec<HandlerBinding> {
        crate::traits::ConsumerBindings::<C>::collect(ConsumerDescriptor::of::<C>())
    }

    fn registry_with<C: Consumer>() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for binding in bindings_of::<C>() {
            assert!(registry.register(binding).is_ok());
        }
        registry
    }

    #[test]
    fn consumer_declares_one_binding_per_type() {
        let registry = registry_with::<PingConsumer>();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.kind_of(&MessageType::of::<Ping>()),
            Some(MessageKind::Command)
        );
        assert_eq!(registry.event_types(), vec![MessageType::of::<Pinged>()]);
        assert!(registry.resolve(&MessageType::from_static("Unknown")).is_empty());
    }

    #[test]
    fn second_command_binding_is_rejected() {
        let mut registry = registry_with::<PingConsumer>();
        let duplicate =
            HandlerBinding::function::<Ping, _, _>(|_, _| async { Ok::<(), HandlerError>(()) });
        let err = registry.register(duplicate).unwrap_err();
        assert!(matches!(err, BusError::Configuration(_)));
        assert_eq!(registry.resolve(&MessageType::of::<Ping>()).len(), 1);
    }

    #[test]
    fn events_fan_out_to_distinct_consumers_only() {
        let mut registry = registry_with::<PingConsumer>();
        for binding in bindings_of::<AuditConsumer>() {
            assert!(registry.register(binding).is_ok());
        }
        assert_eq!(registry.resolve(&MessageType::of::<Pinged>()).len(), 2);

        let again = bindings_of::<AuditConsumer>().remove(0);
        assert!(registry.register(again).is_err());
    }

    #[test]
    fn event_subscribers_are_listed_per_binding() {
        let mut registry = registry_with::<PingConsumer>();
        for binding in bindings_of::<AuditConsumer>() {
            assert!(registry.register(binding).is_ok());
        }
        let pinged = MessageType::of::<Pinged>();
        assert_eq!(
            registry.event_subscribers(),
            vec![(pinged.clone(), 0), (pinged, 1)]
        );
    }

    #[test]
    fn name_clashes_are_rejected() {
        let mut registry = registry_with::<PingConsumer>();
        let impostor = HandlerBinding::function::<ImpostorPing, _, _>(|_, _| async {
            Ok::<(), HandlerError>(())
        });
        let err = registry.register(impostor).unwrap_err();
        assert!(err.to_string().contains("already bound"));
    }
}
