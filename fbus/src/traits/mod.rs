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

//! Extension points of the bus.
//!
//! *   [`BusMessage`]: implemented by every command and event payload.
//! *   [`BusConsumer`] / [`Consumer`]: message handlers and the bindings a consumer type declares.
//! *   [`BusHook`]: lifecycle and per-message observation.
//! *   [`BusContainer`] / [`BusScope`]: consumer instantiation with per-message scoping.
//! *   [`BusCodec`]: payload encoding.
//! *   [`BusTransport`] / [`TransportConnection`]: message delivery.

// --- Public Re-exports ---
pub use bus_message::BusMessage;
pub use codec::BusCodec;
pub use consumer::{BusConsumer, Consumer, ConsumerBindings};
pub use container::{
    BusContainer, BusScope, ConsumerDescriptor, ConsumerFactory, ConsumerInstance, ScopeContext,
};
pub use hook::BusHook;
pub use transport::{
    Acknowledge, BusTransport, Delivery, EnvelopeStream, SubscriptionFilter, TransportBinding,
    TransportConnection,
};

// --- Submodules ---

/// Defines the [`BusMessage`] trait.
mod bus_message;
/// Defines the [`BusCodec`] plugin trait.
mod codec;
/// Defines [`BusConsumer`], [`Consumer`] and [`ConsumerBindings`].
mod consumer;
/// Defines the container and scope plugin traits.
mod container;
/// Defines the [`BusHook`] trait.
mod hook;
/// Defines the transport plugin traits and [`Delivery`].
mod transport;
