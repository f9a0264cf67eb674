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

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PayloadShape;
use crate::common::BusError;
use crate::message::MessageType;
use crate::traits::BusCodec;

const CONTENT_TYPE: &str = "application/json";

/// How struct field names are written on the wire.
///
/// Map keys and enum variant names are written as serde produces them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldNaming {
    /// Field names as serde produces them.
    #[default]
    AsDeclared,
    /// `orderId`
    CamelCase,
    /// `order_id`
    SnakeCase,
    /// `OrderId`
    PascalCase,
}

/// Options of the JSON codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonOptions {
    /// Struct field naming. Decoding maps wire names back to the declared
    /// fields, so every payload round-trips.
    pub field_naming: FieldNaming,
    /// Omit struct fields that are `None` when encoding.
    pub ignore_null_fields: bool,
    /// Indent the output.
    pub pretty: bool,
    /// Largest body accepted by decode. Must be greater than zero.
    pub max_payload_bytes: usize,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            field_naming: FieldNaming::AsDeclared,
            ignore_null_fields: false,
            pretty: false,
            max_payload_bytes: 4 * 1024 * 1024,
        }
    }
}

/// JSON payload codec built on `serde_json`.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    options: JsonOptions,
}

impl JsonCodec {
    /// Creates a codec, validating `options`.
    ///
    /// # Errors
    ///
    /// [`BusError::Configuration`] when `max_payload_bytes` is zero.
    pub fn new(options: JsonOptions) -> Result<Self, BusError> {
        if options.max_payload_bytes == 0 {
            return Err(BusError::Configuration(
                "max_payload_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(Self { options })
    }

    /// The options in use.
    #[must_use]
    pub fn options(&self) -> &JsonOptions {
        &self.options
    }
}

impl BusCodec for JsonCodec {
    fn content_type(&self) -> &str {
        CONTENT_TYPE
    }

    fn payload_shape(&self) -> PayloadShape {
        PayloadShape {
            field_naming: self.options.field_naming,
            ignore_null_fields: self.options.ignore_null_fields,
        }
    }

    fn encode(&self, message_type: &MessageType, value: &Value) -> Result<Vec<u8>, BusError> {
        let encoded = if self.options.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        encoded.map_err(|e| BusError::Serialization(format!("'{message_type}': {e}")))
    }

    fn decode(&self, message_type: &MessageType, body: &[u8]) -> Result<Value, BusError> {
        if body.len() > self.options.max_payload_bytes {
            return Err(BusError::Deserialization(format!(
                "'{message_type}': body of {} bytes exceeds the {} byte limit",
                body.len(),
                self.options.max_payload_bytes
            )));
        }
        serde_json::from_slice(body)
            .map_err(|e| BusError::Deserialization(format!("'{message_type}': {e}")))
    }
}
