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

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # FBus
//!
//! A process-local message bus built on Tokio. Applications declare typed
//! commands and events, bind consumers to them, and let the runtime route
//! every inbound envelope to the right handler inside a scoped lifecycle.
//!
//! ## Key Concepts
//!
//! - **Messages (`BusMessage`)**: serde payloads with a stable `MessageType`
//!   and a `MessageKind` (command or event), usually declared with
//!   `#[bus_message]`.
//! - **Consumers (`BusConsumer<M>`)**: one async `handle` per message type;
//!   `#[bus_consumer(A, B)]` enumerates the bindings of a consumer type.
//! - **Builder (`BusBuilder`)**: value-semantics fluent configuration that
//!   validates everything in `build()`.
//! - **Runtime (`BusRuntime`)**: connects the transport, runs lifecycle hooks,
//!   and dispatches envelopes concurrently with backpressure.
//! - **Plugins**: `BusContainer`, `BusHook`, `BusCodec` and `BusTransport` are
//!   the seams for dependency injection, observability, payload encoding and
//!   message delivery.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fbus::prelude::*;
//!
//! #[bus_message(command)]
//! struct Ping { from: String }
//!
//! #[bus_message(command)]
//! struct Pong { to: String }
//!
//! #[bus_consumer(Ping)]
//! struct PingConsumer;
//!
//! #[async_trait]
//! impl BusConsumer<Ping> for PingConsumer {
//!     async fn handle(&self, ctx: &Conversation, msg: Ping) -> Result<(), HandlerError> {
//!         ctx.reply(&Pong { to: msg.from }).await?;
//!         Ok(())
//!     }
//! }
//!
//! let (runtime, initiator) = BusBuilder::configure()
//!     .with_name("svc")
//!     .with_consumer::<PingConsumer>()
//!     .use_default_transport()
//!     .start()
//!     .await?;
//!
//! initiator.send("svc", &Ping { from: "me".into() }).await?;
//! runtime.stop().await?;
//! ```

// Lets the attribute macros refer to `::fbus::...` from inside this crate.
extern crate self as fbus;

/// Runtime internals: configuration, errors, registry, builder and dispatch.
pub(crate) mod common;

/// Message identity, envelopes and conversations.
pub(crate) mod message;

/// Extension traits for consumers, hooks, containers, codecs and transports.
pub(crate) mod traits;

/// Payload codecs.
pub mod codec;

/// Message transports.
pub mod transport;

pub use fbus_macro::{bus_consumer, bus_message};
#[doc(hidden)]
pub use serde;

pub use common::{
    Backoff, BusBuilder, BusConfig, BusConfiguration, BusError, BusRuntime, DefaultContainer,
    DispatchStats, HandlerBinding, HandlerError, HandlerRegistry, HookChain, HookGuard,
    LimitsConfig, ReconnectPolicy, RuntimeState, TimeoutConfig, TransportConfig,
    TransportDescriptor, TransportFault, CONFIG,
};
pub use message::{
    Address, Conversation, Envelope, EnvelopeHeader, Initiator, MessageKind, MessageType,
};
pub use traits::{
    Acknowledge, BusCodec, BusConsumer, BusContainer, BusHook, BusMessage, BusScope,
    BusTransport, Consumer, ConsumerBindings, ConsumerDescriptor, ConsumerFactory,
    ConsumerInstance, Delivery, EnvelopeStream, ScopeContext, SubscriptionFilter,
    TransportBinding, TransportConnection,
};

/// Everything needed to declare messages, consumers and hooks and run a bus.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::codec::{FieldNaming, JsonCodec, JsonOptions, PayloadShape};
    pub use crate::transport::{BrokerTransport, InMemoryBroker};
    pub use crate::{
        bus_consumer, bus_message, Address, BusBuilder, BusCodec, BusConfig, BusConfiguration,
        BusConsumer, BusContainer, BusError, BusHook, BusMessage, BusRuntime, BusScope,
        BusTransport, Consumer, ConsumerBindings, ConsumerDescriptor, Conversation,
        DefaultContainer, Envelope, HandlerError, HookGuard, Initiator, MessageKind, MessageType,
        ReconnectPolicy, RuntimeState, TransportFault, CONFIG,
    };
}
