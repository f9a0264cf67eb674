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

//! Typed conversion between payloads and [`Value`] that applies a
//! [`PayloadShape`].
//!
//! Only struct field names are renamed. Map keys, enum variant tags and
//! string values reach the wire exactly as serde produces them, so every
//! shaped payload decodes back into the value it was encoded from.

use std::vec;

use heck::{ToLowerCamelCase, ToSnakeCase, ToUpperCamelCase};
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, EnumAccess, IntoDeserializer,
    MapAccess, SeqAccess, VariantAccess, Visitor,
};
use serde::forward_to_deserialize_any;
use serde::ser::{
    self, Impossible, Serialize, SerializeMap, SerializeSeq, SerializeStruct,
    SerializeStructVariant, SerializeTuple, SerializeTupleStruct, SerializeTupleVariant,
    Serializer,
};
use serde_json::{Error, Map, Value};

use super::FieldNaming;

/// How a codec lays out payload values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadShape {
    /// Naming of struct fields on the wire.
    pub field_naming: FieldNaming,
    /// Leave out struct fields that are `None`.
    pub ignore_null_fields: bool,
}

impl PayloadShape {
    /// `true` when values are laid out exactly as serde produces them.
    #[must_use]
    pub fn is_plain(self) -> bool {
        self.field_naming == FieldNaming::AsDeclared && !self.ignore_null_fields
    }

    /// The wire name of a declared struct field.
    #[must_use]
    pub fn wire_name(self, field: &str) -> String {
        match self.field_naming {
            FieldNaming::AsDeclared => field.to_string(),
            FieldNaming::CamelCase => field.to_lower_camel_case(),
            FieldNaming::SnakeCase => field.to_snake_case(),
            FieldNaming::PascalCase => field.to_upper_camel_case(),
        }
    }

    /// Serializes `value` into a shaped [`Value`].
    ///
    /// # Errors
    ///
    /// Whatever the value's `Serialize` impl reports, and map keys that
    /// cannot be written as JSON strings.
    pub fn to_value<T: Serialize + ?Sized>(self, value: &T) -> Result<Value, Error> {
        if self.is_plain() {
            return serde_json::to_value(value);
        }
        value.serialize(Shaper { shape: self })
    }

    /// Deserializes a shaped [`Value`].
    ///
    /// # Errors
    ///
    /// Whatever the target type's `Deserialize` impl reports.
    pub fn from_value<T: DeserializeOwned>(self, value: Value) -> Result<T, Error> {
        if self.field_naming == FieldNaming::AsDeclared {
            return serde_json::from_value(value);
        }
        T::deserialize(Reshaped { value, shape: self })
    }

    /// Maps a wire key back to the declared field it was written for.
    fn declared_name(self, key: String, fields: &[&str]) -> String {
        if fields.contains(&key.as_str()) {
            return key;
        }
        fields
            .iter()
            .find(|field| self.wire_name(field) == key)
            .map_or(key, |field| (*field).to_string())
    }
}

fn ser_error(msg: &str) -> Error {
    <Error as ser::Error>::custom(msg)
}

fn de_error(msg: &str) -> Error {
    <Error as de::Error>::custom(msg)
}

/// `true` when `value` serializes as `None`.
fn is_none<T: Serialize + ?Sized>(value: &T) -> bool {
    value.serialize(NoneCheck).unwrap_or(false)
}

#[derive(Clone, Copy)]
struct Shaper {
    shape: PayloadShape,
}

impl Serializer for Shaper {
    type Ok = Value;
    type Error = Error;
    type SerializeSeq = SeqShaper;
    type SerializeTuple = SeqShaper;
    type SerializeTupleStruct = SeqShaper;
    type SerializeTupleVariant = VariantShaper<SeqShaper>;
    type SerializeMap = MapShaper;
    type SerializeStruct = StructShaper;
    type SerializeStructVariant = VariantShaper<StructShaper>;

    fn serialize_bool(self, v: bool) -> Result<Value, Error> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Value, Error> {
        serde_json::value::Serializer.serialize_i128(v)
    }

    fn serialize_u8(self, v: u8) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_u128(self, v: u128) -> Result<Value, Error> {
        serde_json::value::Serializer.serialize_u128(v)
    }

    fn serialize_f32(self, v: f32) -> Result<Value, Error> {
        serde_json::value::Serializer.serialize_f32(v)
    }

    fn serialize_f64(self, v: f64) -> Result<Value, Error> {
        serde_json::value::Serializer.serialize_f64(v)
    }

    fn serialize_char(self, v: char) -> Result<Value, Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, Error> {
        Ok(Value::String(v.to_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value, Error> {
        Ok(Value::Array(v.iter().map(|byte| Value::from(*byte)).collect()))
    }

    fn serialize_none(self) -> Result<Value, Error> {
        Ok(Value::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value, Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value, Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value, Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Value, Error> {
        Ok(Value::String(variant.to_owned()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Value, Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, Error> {
        let mut tagged = Map::new();
        tagged.insert(variant.to_owned(), value.serialize(self)?);
        Ok(Value::Object(tagged))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqShaper, Error> {
        Ok(SeqShaper {
            shape: self.shape,
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqShaper, Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqShaper, Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantShaper<SeqShaper>, Error> {
        Ok(VariantShaper {
            variant,
            inner: self.serialize_seq(Some(len))?,
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapShaper, Error> {
        Ok(MapShaper {
            shape: self.shape,
            members: Map::new(),
            next_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<StructShaper, Error> {
        Ok(StructShaper {
            shape: self.shape,
            members: Map::new(),
        })
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantShaper<StructShaper>, Error> {
        Ok(VariantShaper {
            variant,
            inner: self.serialize_struct(name, len)?,
        })
    }
}

struct SeqShaper {
    shape: PayloadShape,
    items: Vec<Value>,
}

impl SeqShaper {
    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.items.push(value.serialize(Shaper { shape: self.shape })?);
        Ok(())
    }
}

impl SerializeSeq for SeqShaper {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.push(value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(Value::Array(self.items))
    }
}

impl SerializeTuple for SeqShaper {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.push(value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(Value::Array(self.items))
    }
}

impl SerializeTupleStruct for SeqShaper {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.push(value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(Value::Array(self.items))
    }
}

struct MapShaper {
    shape: PayloadShape,
    members: Map<String, Value>,
    next_key: Option<String>,
}

impl SerializeMap for MapShaper {
    type Ok = Value;
    type Error = Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), Error> {
        let key = match key.serialize(Shaper { shape: self.shape })? {
            Value::String(key) => key,
            Value::Number(key) => key.to_string(),
            Value::Bool(key) => key.to_string(),
            _ => return Err(ser_error("map key must be a string")),
        };
        self.next_key = Some(key);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| ser_error("map value serialized before its key"))?;
        let value = value.serialize(Shaper { shape: self.shape })?;
        self.members.insert(key, value);
        Ok(())
    }

    fn end(self) -> Result<Value, Error> {
        Ok(Value::Object(self.members))
    }
}

struct StructShaper {
    shape: PayloadShape,
    members: Map<String, Value>,
}

impl SerializeStruct for StructShaper {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        if self.shape.ignore_null_fields && is_none(value) {
            return Ok(());
        }
        let value = value.serialize(Shaper { shape: self.shape })?;
        self.members.insert(self.shape.wire_name(key), value);
        Ok(())
    }

    fn end(self) -> Result<Value, Error> {
        Ok(Value::Object(self.members))
    }
}

/// Wraps the payload of a tuple or struct variant in `{"Variant": ...}`.
struct VariantShaper<S> {
    variant: &'static str,
    inner: S,
}

impl<S> VariantShaper<S> {
    fn tag(variant: &str, payload: Value) -> Value {
        let mut tagged = Map::new();
        tagged.insert(variant.to_owned(), payload);
        Value::Object(tagged)
    }
}

impl SerializeTupleVariant for VariantShaper<SeqShaper> {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.inner.push(value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(Self::tag(self.variant, Value::Array(self.inner.items)))
    }
}

impl SerializeStructVariant for VariantShaper<StructShaper> {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        SerializeStruct::serialize_field(&mut self.inner, key, value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(Self::tag(self.variant, Value::Object(self.inner.members)))
    }
}

/// Serializer that only answers whether a value is `None`.
struct NoneCheck;

macro_rules! not_none {
    ($($method:ident($ty:ty)),* $(,)?) => {$(
        fn $method(self, _value: $ty) -> Result<bool, Error> {
            Ok(false)
        }
    )*};
}

impl Serializer for NoneCheck {
    type Ok = bool;
    type Error = Error;
    type SerializeSeq = Impossible<bool, Error>;
    type SerializeTuple = Impossible<bool, Error>;
    type SerializeTupleStruct = Impossible<bool, Error>;
    type SerializeTupleVariant = Impossible<bool, Error>;
    type SerializeMap = Impossible<bool, Error>;
    type SerializeStruct = Impossible<bool, Error>;
    type SerializeStructVariant = Impossible<bool, Error>;

    not_none!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    );

    fn serialize_none(self) -> Result<bool, Error> {
        Ok(true)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, _value: &T) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_unit(self) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _value: &T,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Error> {
        Err(ser_error("not an option"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Error> {
        Err(ser_error("not an option"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Error> {
        Err(ser_error("not an option"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        Err(ser_error("not an option"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Error> {
        Err(ser_error("not an option"))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Error> {
        Err(ser_error("not an option"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        Err(ser_error("not an option"))
    }
}

/// A value on its way back into a typed payload.
struct Reshaped {
    value: Value,
    shape: PayloadShape,
}

impl Reshaped {
    fn visit_array<'de, V: Visitor<'de>>(
        items: Vec<Value>,
        shape: PayloadShape,
        visitor: V,
    ) -> Result<V::Value, Error> {
        let len = items.len();
        let mut seq = SeqReshaper {
            items: items.into_iter(),
            shape,
        };
        let value = visitor.visit_seq(&mut seq)?;
        if seq.items.as_slice().is_empty() {
            Ok(value)
        } else {
            Err(de::Error::invalid_length(len, &"fewer elements in array"))
        }
    }
}

impl<'de> Deserializer<'de> for Reshaped {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Value::Array(items) => Self::visit_array(items, self.shape, visitor),
            Value::Object(members) => visitor.visit_map(MapReshaper::new(members, self.shape)),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        let shape = self.shape;
        match self.value {
            Value::Object(members) => {
                let members = members
                    .into_iter()
                    .map(|(key, value)| (shape.declared_name(key, fields), value));
                visitor.visit_map(MapReshaper::new(members, shape))
            }
            value => Reshaped { value, shape }.deserialize_any(visitor),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        match self.value {
            Value::String(variant) => {
                visitor.visit_enum(IntoDeserializer::<'de, Error>::into_deserializer(variant))
            }
            Value::Object(members) if members.len() == 1 => {
                let Some((variant, value)) = members.into_iter().next() else {
                    return Err(de_error("enum object is empty"));
                };
                visitor.visit_enum(EnumReshaper {
                    variant,
                    value,
                    shape: self.shape,
                })
            }
            _ => Err(de_error("expected a variant name or a single-key object")),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map identifier ignored_any
    }
}

struct SeqReshaper {
    items: vec::IntoIter<Value>,
    shape: PayloadShape,
}

impl<'de> SeqAccess<'de> for SeqReshaper {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Error> {
        self.items
            .next()
            .map(|value| {
                seed.deserialize(Reshaped {
                    value,
                    shape: self.shape,
                })
            })
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}

struct MapReshaper {
    members: vec::IntoIter<(String, Value)>,
    pending: Option<Value>,
    shape: PayloadShape,
}

impl MapReshaper {
    fn new(members: impl IntoIterator<Item = (String, Value)>, shape: PayloadShape) -> Self {
        Self {
            members: members.into_iter().collect::<Vec<_>>().into_iter(),
            pending: None,
            shape,
        }
    }
}

impl<'de> MapAccess<'de> for MapReshaper {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Error> {
        match self.members.next() {
            Some((key, value)) => {
                self.pending = Some(value);
                seed.deserialize(MapKey(key)).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Error> {
        let value = self
            .pending
            .take()
            .ok_or_else(|| de_error("map value requested before its key"))?;
        seed.deserialize(Reshaped {
            value,
            shape: self.shape,
        })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.members.len())
    }
}

/// A JSON object key. Numeric and boolean keys parse from their string form.
struct MapKey(String);

macro_rules! parse_key {
    ($($method:ident => $visit:ident),* $(,)?) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
            match self.0.parse() {
                Ok(parsed) => visitor.$visit(parsed),
                Err(_) => Err(de::Error::invalid_value(de::Unexpected::Str(&self.0), &visitor)),
            }
        }
    )*};
}

impl<'de> Deserializer<'de> for MapKey {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_string(self.0)
    }

    parse_key!(
        deserialize_bool => visit_bool,
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_i128 => visit_i128,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
        deserialize_u128 => visit_u128,
        deserialize_f32 => visit_f32,
        deserialize_f64 => visit_f64,
    );

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_enum(IntoDeserializer::<'de, Error>::into_deserializer(self.0))
    }

    forward_to_deserialize_any! {
        char str string bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

struct EnumReshaper {
    variant: String,
    value: Value,
    shape: PayloadShape,
}

impl<'de> EnumAccess<'de> for EnumReshaper {
    type Error = Error;
    type Variant = Reshaped;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, Reshaped), Error> {
        let variant =
            seed.deserialize(IntoDeserializer::<'de, Error>::into_deserializer(self.variant))?;
        Ok((
            variant,
            Reshaped {
                value: self.value,
                shape: self.shape,
            },
        ))
    }
}

impl<'de> VariantAccess<'de> for Reshaped {
    type Error = Error;

    fn unit_variant(self) -> Result<(), Error> {
        match self.value {
            Value::Null => Ok(()),
            _ => Err(de_error("unit variant carries a payload")),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, Error> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_seq(visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_struct("", fields, visitor)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Status {
        Open,
        Held { until_day: u32, held_by: Option<String> },
        Moved(String),
        Split(u8, u8),
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        status: Status,
        history: Vec<Status>,
        counts: HashMap<String, u32>,
        by_shelf: BTreeMap<u16, String>,
        last_note: Option<String>,
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            status: Status::Held {
                until_day: 3,
                held_by: None,
            },
            history: vec![Status::Open, Status::Moved("dock_b".into()), Status::Split(1, 2)],
            counts: HashMap::from([("userId".to_string(), 1), ("ABC".to_string(), 2)]),
            by_shelf: BTreeMap::from([(7, "top_row".to_string())]),
            last_note: None,
        }
    }

    fn every_shape() -> Vec<PayloadShape> {
        let namings = [
            FieldNaming::AsDeclared,
            FieldNaming::CamelCase,
            FieldNaming::SnakeCase,
            FieldNaming::PascalCase,
        ];
        namings
            .into_iter()
            .flat_map(|field_naming| {
                [false, true].map(|ignore_null_fields| PayloadShape {
                    field_naming,
                    ignore_null_fields,
                })
            })
            .collect()
    }

    #[test]
    fn every_shape_round_trips_enums_and_maps() -> anyhow::Result<()> {
        for shape in every_shape() {
            let wire = shape.to_value(&snapshot())?;
            let back: Snapshot = shape.from_value(wire.clone())?;
            assert_eq!(back, snapshot(), "{shape:?} produced {wire}");
        }
        Ok(())
    }

    #[test]
    fn map_keys_and_variant_tags_are_left_alone() -> anyhow::Result<()> {
        let shape = PayloadShape {
            field_naming: FieldNaming::CamelCase,
            ignore_null_fields: true,
        };
        let wire = shape.to_value(&snapshot())?;
        assert_eq!(wire["status"], json!({ "Held": { "untilDay": 3 } }));
        assert_eq!(wire["counts"]["userId"], 1);
        assert_eq!(wire["counts"]["ABC"], 2);
        assert_eq!(wire["byShelf"]["7"], "top_row");
        assert_eq!(wire["history"][0], "Open");
        assert_eq!(wire["history"][1], json!({ "Moved": "dock_b" }));
        assert!(wire.get("lastNote").is_none());
        Ok(())
    }

    #[test]
    fn nulls_are_kept_unless_ignored() -> anyhow::Result<()> {
        let shape = PayloadShape {
            field_naming: FieldNaming::PascalCase,
            ignore_null_fields: false,
        };
        let wire = shape.to_value(&snapshot())?;
        assert_eq!(wire["LastNote"], Value::Null);
        assert_eq!(wire["Status"]["Held"]["HeldBy"], Value::Null);
        Ok(())
    }

    #[test]
    fn declared_names_are_accepted_on_decode() -> anyhow::Result<()> {
        let shape = PayloadShape {
            field_naming: FieldNaming::CamelCase,
            ignore_null_fields: false,
        };
        let plain = serde_json::to_value(snapshot())?;
        let back: Snapshot = shape.from_value(plain)?;
        assert_eq!(back, snapshot());
        Ok(())
    }

    #[test]
    fn wire_names() {
        let camel = PayloadShape {
            field_naming: FieldNaming::CamelCase,
            ignore_null_fields: false,
        };
        let pascal = PayloadShape {
            field_naming: FieldNaming::PascalCase,
            ..camel
        };
        assert_eq!(camel.wire_name("order_id"), "orderId");
        assert_eq!(pascal.wire_name("order_id"), "OrderId");
        assert_eq!(PayloadShape::default().wire_name("order_id"), "order_id");
        assert!(PayloadShape::default().is_plain());
        assert!(!camel.is_plain());
    }
}
