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

//! Message transports.
//!
//! *   [`InMemoryBroker`]: a process-global broker with AMQP-like routing
//!     (per-client queues, event fan-out, competing consumers, redelivery
//!     and dead letters).
//! *   [`BrokerTransport`]: the [`BusTransport`](crate::BusTransport) for
//!     `memory://` endpoints, backed by the broker.

pub use broker::InMemoryBroker;
pub use memory::BrokerTransport;

/// Defines [`InMemoryBroker`].
mod broker;
/// Defines [`BrokerTransport`] and its connection.
mod memory;
