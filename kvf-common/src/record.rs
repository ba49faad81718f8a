//! # Record Bridge
//!
//! Purpose: Map any serde type onto `CacheValue` and back without an
//! intermediate document model.
//!
//! ## Design Principles
//!
//! 1. **Lossless Scalars**: Floats stay `Float` bit for bit (NaN and the
//!    infinities included); signed integers become `Int`, unsigned `UInt`.
//! 2. **Ordered Records**: Structs and maps become `Record` in serialization
//!    order. Map keys must be strings, chars, or integers.
//! 3. **Externally Tagged Enums**: Unit variants are `Str(name)`; data
//!    variants are a one-field `Record` keyed by the variant name.
//! 4. **Forgiving Reads**: `Bytes` reads as a byte sequence or a byte buffer,
//!    and `Chars` reads as a string.

use std::fmt::Display;

use serde::de::value::{MapDeserializer, SeqDeserializer, StringDeserializer};
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer as _, EnumAccess, IntoDeserializer,
    VariantAccess, Visitor,
};
use serde::forward_to_deserialize_any;
use serde::ser::{self, Serializer as _};
use serde::Serialize;

use crate::error::{CodecError, CodecResult};
use crate::value::CacheValue;

/// Converts any serializable type into the closed value family.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<CacheValue> {
    value.serialize(ValueSerializer)
}

/// Converts a value back into a deserializable type.
pub fn from_value<T: DeserializeOwned>(value: CacheValue) -> CodecResult<T> {
    T::deserialize(value)
}

impl ser::Error for CodecError {
    fn custom<T: Display>(msg: T) -> Self {
        CodecError::Record(msg.to_string())
    }
}

impl de::Error for CodecError {
    fn custom<T: Display>(msg: T) -> Self {
        CodecError::Record(msg.to_string())
    }
}

// ============================================================================
// SERIALIZATION
// ============================================================================

struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
    type Ok = CacheValue;
    type Error = CodecError;

    type SerializeSeq = SerializeList;
    type SerializeTuple = SerializeList;
    type SerializeTupleStruct = SerializeList;
    type SerializeTupleVariant = SerializeTupleVariant;
    type SerializeMap = SerializeRecord;
    type SerializeStruct = SerializeRecord;
    type SerializeStructVariant = SerializeStructVariant;

    fn serialize_bool(self, v: bool) -> CodecResult<CacheValue> {
        Ok(CacheValue::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> CodecResult<CacheValue> {
        Ok(CacheValue::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> CodecResult<CacheValue> {
        Ok(CacheValue::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> CodecResult<CacheValue> {
        Ok(CacheValue::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> CodecResult<CacheValue> {
        Ok(CacheValue::Int(v))
    }

    fn serialize_u8(self, v: u8) -> CodecResult<CacheValue> {
        Ok(CacheValue::UInt(v.into()))
    }

    fn serialize_u16(self, v: u16) -> CodecResult<CacheValue> {
        Ok(CacheValue::UInt(v.into()))
    }

    fn serialize_u32(self, v: u32) -> CodecResult<CacheValue> {
        Ok(CacheValue::UInt(v.into()))
    }

    fn serialize_u64(self, v: u64) -> CodecResult<CacheValue> {
        Ok(CacheValue::UInt(v))
    }

    fn serialize_f32(self, v: f32) -> CodecResult<CacheValue> {
        Ok(CacheValue::Float(v.into()))
    }

    fn serialize_f64(self, v: f64) -> CodecResult<CacheValue> {
        Ok(CacheValue::Float(v))
    }

    fn serialize_char(self, v: char) -> CodecResult<CacheValue> {
        Ok(CacheValue::Str(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> CodecResult<CacheValue> {
        Ok(CacheValue::Str(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> CodecResult<CacheValue> {
        Ok(CacheValue::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> CodecResult<CacheValue> {
        Ok(CacheValue::Nil)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> CodecResult<CacheValue> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> CodecResult<CacheValue> {
        Ok(CacheValue::Nil)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> CodecResult<CacheValue> {
        Ok(CacheValue::Nil)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> CodecResult<CacheValue> {
        Ok(CacheValue::Str(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> CodecResult<CacheValue> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> CodecResult<CacheValue> {
        let inner = value.serialize(ValueSerializer)?;
        Ok(CacheValue::Record(vec![(variant.to_string(), inner)]))
    }

    fn serialize_seq(self, len: Option<usize>) -> CodecResult<SerializeList> {
        Ok(SerializeList {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> CodecResult<SerializeList> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> CodecResult<SerializeList> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> CodecResult<SerializeTupleVariant> {
        Ok(SerializeTupleVariant {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> CodecResult<SerializeRecord> {
        Ok(SerializeRecord {
            fields: Vec::with_capacity(len.unwrap_or(0)),
            pending_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> CodecResult<SerializeRecord> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> CodecResult<SerializeStructVariant> {
        Ok(SerializeStructVariant {
            variant,
            fields: Vec::with_capacity(len),
        })
    }
}

struct SerializeList {
    items: Vec<CacheValue>,
}

impl ser::SerializeSeq for SerializeList {
    type Ok = CacheValue;
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> CodecResult<CacheValue> {
        Ok(CacheValue::List(self.items))
    }
}

impl ser::SerializeTuple for SerializeList {
    type Ok = CacheValue;
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> CodecResult<CacheValue> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SerializeList {
    type Ok = CacheValue;
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> CodecResult<CacheValue> {
        ser::SerializeSeq::end(self)
    }
}

struct SerializeTupleVariant {
    variant: &'static str,
    items: Vec<CacheValue>,
}

impl ser::SerializeTupleVariant for SerializeTupleVariant {
    type Ok = CacheValue;
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> CodecResult<CacheValue> {
        let inner = CacheValue::List(self.items);
        Ok(CacheValue::Record(vec![(self.variant.to_string(), inner)]))
    }
}

struct SerializeRecord {
    fields: Vec<(String, CacheValue)>,
    pending_key: Option<String>,
}

impl ser::SerializeMap for SerializeRecord {
    type Ok = CacheValue;
    type Error = CodecError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> CodecResult<()> {
        self.pending_key = Some(record_key(key.serialize(ValueSerializer)?)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| CodecError::Record("map value without a key".to_string()))?;
        self.fields.push((key, value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> CodecResult<CacheValue> {
        Ok(CacheValue::Record(self.fields))
    }
}

impl ser::SerializeStruct for SerializeRecord {
    type Ok = CacheValue;
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> CodecResult<()> {
        self.fields.push((key.to_string(), value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> CodecResult<CacheValue> {
        Ok(CacheValue::Record(self.fields))
    }
}

struct SerializeStructVariant {
    variant: &'static str,
    fields: Vec<(String, CacheValue)>,
}

impl ser::SerializeStructVariant for SerializeStructVariant {
    type Ok = CacheValue;
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> CodecResult<()> {
        self.fields.push((key.to_string(), value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> CodecResult<CacheValue> {
        let inner = CacheValue::Record(self.fields);
        Ok(CacheValue::Record(vec![(self.variant.to_string(), inner)]))
    }
}

fn record_key(key: CacheValue) -> CodecResult<String> {
    match key {
        CacheValue::Str(name) => Ok(name),
        CacheValue::Chars(chars) => Ok(chars.into_iter().collect()),
        CacheValue::Int(v) => Ok(v.to_string()),
        CacheValue::UInt(v) => Ok(v.to_string()),
        other => Err(CodecError::Record(format!(
            "record keys must be strings, found {}",
            other.shape()
        ))),
    }
}

// ============================================================================
// DESERIALIZATION
// ============================================================================

impl<'de> IntoDeserializer<'de, CodecError> for CacheValue {
    type Deserializer = CacheValue;

    fn into_deserializer(self) -> CacheValue {
        self
    }
}

impl<'de> de::Deserializer<'de> for CacheValue {
    type Error = CodecError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> CodecResult<V::Value> {
        match self {
            CacheValue::Nil => visitor.visit_unit(),
            CacheValue::Bool(v) => visitor.visit_bool(v),
            CacheValue::Int(v) => visitor.visit_i64(v),
            CacheValue::UInt(v) => visitor.visit_u64(v),
            CacheValue::Float(v) => visitor.visit_f64(v),
            CacheValue::Str(v) => visitor.visit_string(v),
            CacheValue::Chars(chars) => visitor.visit_string(chars.into_iter().collect()),
            CacheValue::Bytes(data) => visit_list(data.into_iter(), visitor),
            CacheValue::List(items) => visit_list(items.into_iter(), visitor),
            CacheValue::Record(fields) => {
                let entries = fields.into_iter().map(|(k, v)| (RecordKey(k), v));
                let mut map: MapDeserializer<'de, _, CodecError> = MapDeserializer::new(entries);
                let value = visitor.visit_map(&mut map)?;
                map.end()?;
                Ok(value)
            }
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> CodecResult<V::Value> {
        match self {
            CacheValue::Nil => visitor.visit_none(),
            other => visitor.visit_some(other),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> CodecResult<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> CodecResult<V::Value> {
        self.deserialize_byte_buf(visitor)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> CodecResult<V::Value> {
        match self {
            CacheValue::Bytes(data) => visitor.visit_byte_buf(data),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> CodecResult<V::Value> {
        match self {
            CacheValue::Str(variant) => {
                let variant: StringDeserializer<CodecError> = variant.into_deserializer();
                visitor.visit_enum(variant)
            }
            CacheValue::Record(mut fields) if fields.len() == 1 => {
                let (variant, value) = fields.remove(0);
                visitor.visit_enum(VariantDeserializer { variant, value })
            }
            other => Err(CodecError::Record(format!(
                "expected enum variant, found {}",
                other.shape()
            ))),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 u8 u16 u32 u64 f32 f64 char str string
        unit unit_struct seq tuple tuple_struct map struct identifier ignored_any
    }
}

fn visit_list<'de, I, T, V>(items: I, visitor: V) -> CodecResult<V::Value>
where
    I: Iterator<Item = T>,
    T: IntoDeserializer<'de, CodecError>,
    V: Visitor<'de>,
{
    let mut seq: SeqDeserializer<I, CodecError> = SeqDeserializer::new(items);
    let value = visitor.visit_seq(&mut seq)?;
    seq.end()?;
    Ok(value)
}

/// Record field name; integer map keys parse back from their decimal form.
struct RecordKey(String);

impl RecordKey {
    fn parse<T: std::str::FromStr>(&self) -> CodecResult<T> {
        self.0
            .parse()
            .map_err(|_| CodecError::Record(format!("invalid record key {:?}", self.0)))
    }
}

impl<'de> IntoDeserializer<'de, CodecError> for RecordKey {
    type Deserializer = RecordKey;

    fn into_deserializer(self) -> RecordKey {
        self
    }
}

macro_rules! deserialize_parsed_key {
    ($($method:ident => $visit:ident),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> CodecResult<V::Value> {
                visitor.$visit(self.parse()?)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for RecordKey {
    type Error = CodecError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> CodecResult<V::Value> {
        visitor.visit_string(self.0)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> CodecResult<V::Value> {
        let variant: StringDeserializer<CodecError> = self.0.into_deserializer();
        visitor.visit_enum(variant)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> CodecResult<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    deserialize_parsed_key! {
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
    }

    forward_to_deserialize_any! {
        bool f32 f64 char str string bytes byte_buf option unit unit_struct
        seq tuple tuple_struct map struct identifier ignored_any
    }
}

struct VariantDeserializer {
    variant: String,
    value: CacheValue,
}

impl<'de> EnumAccess<'de> for VariantDeserializer {
    type Error = CodecError;
    type Variant = CacheValue;

    fn variant_seed<S: DeserializeSeed<'de>>(self, seed: S) -> CodecResult<(S::Value, CacheValue)> {
        let variant: StringDeserializer<CodecError> = self.variant.into_deserializer();
        let tag = seed.deserialize(variant)?;
        Ok((tag, self.value))
    }
}

impl<'de> VariantAccess<'de> for CacheValue {
    type Error = CodecError;

    fn unit_variant(self) -> CodecResult<()> {
        match self {
            CacheValue::Nil => Ok(()),
            other => Err(CodecError::Record(format!(
                "expected unit variant, found {}",
                other.shape()
            ))),
        }
    }

    fn newtype_variant_seed<S: DeserializeSeed<'de>>(self, seed: S) -> CodecResult<S::Value> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> CodecResult<V::Value> {
        de::Deserializer::deserialize_seq(self, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> CodecResult<V::Value> {
        de::Deserializer::deserialize_map(self, visitor)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        visits: u32,
        score: f64,
        flags: Vec<bool>,
        avatar: Vec<u8>,
        nickname: Option<String>,
    }

    fn session() -> Session {
        Session {
            user: "ada".to_string(),
            visits: 7,
            score: 1.5,
            flags: vec![true, false],
            avatar: vec![1, 2, 3],
            nickname: None,
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Event {
        Ping,
        Move(i32),
        Span(u8, u8),
        Rename { from: String, to: String },
    }

    #[test]
    fn struct_becomes_ordered_record() {
        let value = to_value(&session()).unwrap();
        match &value {
            CacheValue::Record(fields) => {
                let names: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(names, ["user", "visits", "score", "flags", "avatar", "nickname"]);
            }
            other => panic!("expected record, got {:?}", other),
        }
        assert_eq!(value.field("nickname"), Some(&CacheValue::Nil));
        assert_eq!(value.field("visits"), Some(&CacheValue::UInt(7)));
        assert_eq!(value.field("score"), Some(&CacheValue::Float(1.5)));
    }

    #[test]
    fn struct_roundtrips_through_value() {
        let value = to_value(&session()).unwrap();
        let back: Session = from_value(value).unwrap();
        assert_eq!(back, session());
    }

    #[test]
    fn non_finite_floats_survive() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0] {
            let value = to_value(&v).unwrap();
            assert_eq!(value, CacheValue::Float(v));
            let back: f64 = from_value(value).unwrap();
            assert_eq!(back.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn enums_are_externally_tagged() {
        let events = vec![
            Event::Ping,
            Event::Move(-4),
            Event::Span(1, 9),
            Event::Rename {
                from: "a".to_string(),
                to: "b".to_string(),
            },
        ];
        let value = to_value(&events).unwrap();
        if let CacheValue::List(items) = &value {
            assert_eq!(items[0], CacheValue::from("Ping"));
            assert_eq!(items[1].field("Move"), Some(&CacheValue::Int(-4)));
        } else {
            panic!("expected list, got {:?}", value);
        }
        let back: Vec<Event> = from_value(value).unwrap();
        assert_eq!(back, events);
    }

    #[test]
    fn integer_map_keys_roundtrip() {
        let mut scores = BTreeMap::new();
        scores.insert(3u32, "bronze".to_string());
        scores.insert(1u32, "gold".to_string());
        let value = to_value(&scores).unwrap();
        assert_eq!(value.field("1"), Some(&CacheValue::from("gold")));
        let back: BTreeMap<u32, String> = from_value(value).unwrap();
        assert_eq!(back, scores);
    }

    #[test]
    fn non_scalar_map_keys_are_rejected() {
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], 1u8);
        assert!(matches!(to_value(&map), Err(CodecError::Record(_))));
    }

    #[test]
    fn bytes_and_chars_map_to_serde_types() {
        let back: Vec<u8> = from_value(CacheValue::Bytes(vec![9, 8])).unwrap();
        assert_eq!(back, vec![9, 8]);
        let text: String = from_value(CacheValue::Chars(vec!['o', 'k'])).unwrap();
        assert_eq!(text, "ok");
    }

    #[test]
    fn mismatched_type_is_a_record_error() {
        let err = from_value::<Session>(CacheValue::Int(3)).unwrap_err();
        assert!(matches!(err, CodecError::Record(_)));
    }

    #[test]
    fn extra_list_items_are_rejected() {
        let value = CacheValue::List(vec![CacheValue::Int(1), CacheValue::Int(2)]);
        assert!(from_value::<(i64,)>(value).is_err());
    }
}
