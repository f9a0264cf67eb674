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

use serde_json::Value;

use super::BusMessage;
use crate::codec::PayloadShape;
use crate::common::BusError;
use crate::message::MessageType;

/// Turns payload values into envelope bodies and back.
///
/// Codecs turn [`serde_json::Value`] trees into bytes. How typed payloads
/// become those trees is described by [`BusCodec::payload_shape`], applied at
/// the serde level by the typed `encode_message` and `decode_message`
/// helpers on `dyn BusCodec`.
pub trait BusCodec: Send + Sync + 'static {
    /// MIME type written into the envelope header.
    fn content_type(&self) -> &str;

    /// Field naming and null handling for payload values.
    fn payload_shape(&self) -> PayloadShape {
        PayloadShape::default()
    }

    /// Encodes a payload value. Fails with [`BusError::Serialization`].
    fn encode(&self, message_type: &MessageType, value: &Value) -> Result<Vec<u8>, BusError>;

    /// Decodes a body. Fails with [`BusError::Deserialization`].
    fn decode(&self, message_type: &MessageType, body: &[u8]) -> Result<Value, BusError>;
}

impl dyn BusCodec {
    /// Encodes a typed message.
    pub fn encode_message<M: BusMessage>(&self, message: &M) -> Result<Vec<u8>, BusError> {
        let value = self.payload_shape().to_value(message).map_err(|err| {
            BusError::Serialization(format!("'{}': {err}", M::message_type()))
        })?;
        self.encode(&M::message_type(), &value)
    }

    /// Decodes a typed message.
    pub fn decode_message<M: BusMessage>(&self, body: &[u8]) -> Result<M, BusError> {
        let value = self.decode(&M::message_type(), body)?;
        self.payload_shape().from_value(value).map_err(|err| {
            BusError::Deserialization(format!("'{}': {err}", M::message_type()))
        })
    }
}
