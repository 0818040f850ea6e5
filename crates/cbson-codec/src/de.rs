//! Serde 反序列化模块
//!
//! 实现 Serde Deserializer trait，将 BsonValue 反序列化为 Rust 数据结构。
//!
//! - 整数统一以 i64 交给 visitor，由目标类型自行检查范围
//! - `ObjectId` 字段可以来自 ObjectId 值或 24 位十六进制字符串
//! - 字符串和二进制负载以借用方式交出，不做拷贝

use crate::document::Document;
use crate::value::BsonValue;
use crate::{BsonError, BsonResult};
use cbson_common::ObjectId;
use serde::de::{self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;

const OBJECT_ID_NEWTYPE: &str = "ObjectId";

pub struct Deserializer<'de> {
    input: &'de BsonValue,
}

impl<'de> Deserializer<'de> {
    pub fn new(input: &'de BsonValue) -> Self {
        Deserializer { input }
    }

    fn type_error(&self, expected: &str) -> BsonError {
        BsonError::Deserialization(format!(
            "Expected {}, got {}",
            expected,
            self.input.type_name()
        ))
    }
}

pub fn from_bson<'de, T: Deserialize<'de>>(value: &'de BsonValue) -> BsonResult<T> {
    T::deserialize(Deserializer::new(value))
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> BsonResult<T> {
    let value = BsonValue::Document(doc);
    from_bson(&value)
}

impl de::Error for BsonError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        BsonError::Deserialization(msg.to_string())
    }
}

impl<'de> de::Deserializer<'de> for Deserializer<'de> {
    type Error = BsonError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Null => visitor.visit_unit(),
            BsonValue::Boolean(b) => visitor.visit_bool(*b),
            BsonValue::Integer(n) => visitor.visit_i64(*n),
            BsonValue::Double(n) => visitor.visit_f64(*n),
            BsonValue::String(s) | BsonValue::Symbol(s) | BsonValue::JavaScriptCode(s) => {
                visitor.visit_borrowed_str(s.as_str())
            }
            BsonValue::Binary(b) => visitor.visit_borrowed_bytes(&b.bytes),
            BsonValue::ObjectId(id) => visitor.visit_string(id.to_hex()),
            BsonValue::DateTime(dt) => visitor.visit_i64(dt.timestamp_millis()),
            BsonValue::Array(arr) => visitor.visit_seq(SeqDeserializer::new(arr.iter())),
            BsonValue::Document(doc) => visitor.visit_map(MapDeserializer::new(doc.iter())),
            _ => Err(BsonError::Deserialization(format!(
                "Cannot deserialize {} as any",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Boolean(b) => visitor.visit_bool(*b),
            _ => Err(self.type_error("boolean")),
        }
    }

    fn deserialize_i8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Integer(n) => visitor.visit_i64(*n),
            BsonValue::DateTime(dt) => visitor.visit_i64(dt.timestamp_millis()),
            _ => Err(self.type_error("integer")),
        }
    }

    fn deserialize_i128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_u8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_u16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_u32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_u128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Double(n) => visitor.visit_f64(*n),
            BsonValue::Integer(n) => visitor.visit_f64(*n as f64),
            _ => Err(self.type_error("number")),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if let BsonValue::String(s) = self.input {
            let mut chars = s.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                return visitor.visit_char(c);
            }
        }
        Err(self.type_error("single character string"))
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::String(s) | BsonValue::Symbol(s) | BsonValue::JavaScriptCode(s) => {
                visitor.visit_borrowed_str(s.as_str())
            }
            BsonValue::ObjectId(id) => visitor.visit_string(id.to_hex()),
            _ => Err(self.type_error("string")),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Binary(b) => visitor.visit_borrowed_bytes(&b.bytes),
            BsonValue::ObjectId(id) => visitor.visit_bytes(id.as_bytes()),
            _ => Err(self.type_error("binary")),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Null => visitor.visit_unit(),
            _ => Err(self.type_error("null")),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        if name == OBJECT_ID_NEWTYPE {
            let id = match self.input {
                BsonValue::ObjectId(id) => Some(*id),
                BsonValue::String(s) => Some(ObjectId::from_hex(s)?),
                _ => None,
            };
            if let Some(id) = id {
                let bytes = de::value::SeqDeserializer::<_, BsonError>::new(id.bytes().into_iter());
                return visitor.visit_newtype_struct(bytes);
            }
        }
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Array(arr) => visitor.visit_seq(SeqDeserializer::new(arr.iter())),
            _ => Err(self.type_error("array")),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::Document(doc) => visitor.visit_map(MapDeserializer::new(doc.iter())),
            _ => Err(self.type_error("document")),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.input {
            BsonValue::String(s) => visitor.visit_enum(s.as_str().into_deserializer()),
            BsonValue::Document(doc) if doc.len() == 1 => {
                let (variant, value) = doc
                    .get_index(0)
                    .ok_or_else(|| self.type_error("single-field document for enum"))?;
                visitor.visit_enum(EnumDeserializer { variant, value })
            }
            _ => Err(self.type_error("string or single-field document for enum")),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }
}

struct SeqDeserializer<I> {
    iter: I,
}

impl<I> SeqDeserializer<I> {
    fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<'de, I: Iterator<Item = &'de BsonValue>> SeqAccess<'de> for SeqDeserializer<I> {
    type Error = BsonError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Self::Error> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Deserializer::new(value)).map(Some),
            None => Ok(None),
        }
    }
}

struct MapDeserializer<'de, I> {
    iter: I,
    value: Option<&'de BsonValue>,
}

impl<'de, I: Iterator<Item = (&'de str, &'de BsonValue)>> MapDeserializer<'de, I> {
    fn new(iter: I) -> Self {
        Self { iter, value: None }
    }
}

impl<'de, I: Iterator<Item = (&'de str, &'de BsonValue)>> MapAccess<'de> for MapDeserializer<'de, I> {
    type Error = BsonError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                let key: de::value::BorrowedStrDeserializer<'de, BsonError> =
                    de::value::BorrowedStrDeserializer::new(key);
                seed.deserialize(key).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| BsonError::Deserialization("map value requested before key".to_string()))?;
        seed.deserialize(Deserializer::new(value))
    }
}

struct EnumDeserializer<'de> {
    variant: &'de str,
    value: &'de BsonValue,
}

impl<'de> de::EnumAccess<'de> for EnumDeserializer<'de> {
    type Error = BsonError;
    type Variant = VariantDeserializer<'de>;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant), Self::Error> {
        let deserializer: de::value::BorrowedStrDeserializer<'de, BsonError> =
            de::value::BorrowedStrDeserializer::new(self.variant);
        let variant = seed.deserialize(deserializer)?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer<'de> {
    value: &'de BsonValue,
}

impl<'de> de::VariantAccess<'de> for VariantDeserializer<'de> {
    type Error = BsonError;

    fn unit_variant(self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, Self::Error> {
        seed.deserialize(Deserializer::new(self.value))
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_seq(Deserializer::new(self.value), visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_map(Deserializer::new(self.value), visitor)
    }
}
