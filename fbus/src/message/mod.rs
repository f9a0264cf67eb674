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

//! Message identity, the wire envelope and the per-message conversation.
//!
//! *   [`MessageType`] / [`MessageKind`]: the stable identity and routing class of a payload.
//! *   [`Envelope`]: header plus opaque body bytes as carried by a transport.
//! *   [`Conversation`]: the context handed to a consumer for one inbound message.
//! *   [`Initiator`]: outbound capability without an inbound message.

// --- Public Re-exports ---
pub use conversation::{Conversation, Initiator};
pub use envelope::{Address, Envelope, EnvelopeHeader};
pub use message_type::{MessageKind, MessageType};

// --- Crate-Internal Re-exports ---
pub(crate) use conversation::BusOutbox;
pub(crate) use envelope::new_message_id;

// --- Submodules ---

/// Defines [`Conversation`], [`Initiator`] and the shared outbound path.
mod conversation;
/// Defines [`Envelope`], [`EnvelopeHeader`] and [`Address`].
mod envelope;
/// Defines [`MessageType`] and [`MessageKind`].
mod message_type;
