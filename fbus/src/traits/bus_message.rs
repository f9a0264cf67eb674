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

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::message::{MessageKind, MessageType};

/// A command or event payload that can travel on the bus.
///
/// Messages are plain serde types. Their [`MessageType`] must depend only on
/// the declared type, never on instance state, because it is the key the
/// registry dispatches on.
///
/// Usually implemented with the `#[bus_message]` attribute:
///
/// ```rust,ignore
/// #[bus_message(event, name = "orders.created")]
/// struct OrderCreated { id: u64 }
/// ```
pub trait BusMessage: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    /// Whether this type is a command or an event.
    const KIND: MessageKind;

    /// The stable identity of this type.
    fn message_type() -> MessageType;
}
