// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Typed payloads
//!
//! A message payload is an ordered tuple of typed values. Every element
//! carries a stable type name; the sequence of names hashes into a 32-bit
//! [`TypeToken`] that behaviors match against and that travels in wire
//! headers. Serialization of the element values themselves is delegated to
//! a [`CodecRegistry`], so the runtime never needs to know user types: it
//! only needs both nodes to register the same codec under the same name.

use crate::error::Error;

use parking_lot::RwLock;

use serde::{de::DeserializeOwned, Serialize};

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Stable 32-bit hash of an element-type-name sequence.
///
/// FNV-1a over each name with a separator octet, so `("a", "bc")` and
/// `("ab", "c")` produce different tokens.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TypeToken(pub u32);

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

impl TypeToken {
    /// Token of the empty tuple.
    pub const EMPTY: TypeToken = TypeToken(FNV_OFFSET);

    /// Hash a sequence of type names.
    pub fn of_names<'a>(names: impl IntoIterator<Item = &'a str>) -> TypeToken {
        let mut hash = FNV_OFFSET;
        for name in names {
            for byte in name.as_bytes() {
                hash ^= u32::from(*byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
            hash ^= 0x1f;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        TypeToken(hash)
    }
}

/// A type that can travel as a payload element.
///
/// The associated `NAME` is the stable identifier shared by every node of a
/// distributed system; it keys the codec registry and feeds the type token.
pub trait Typed: Send + Sync + 'static {
    /// Stable type name.
    const NAME: &'static str;
}

macro_rules! impl_typed {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(impl Typed for $ty {
            const NAME: &'static str = $name;
        })*
    };
}

impl_typed! {
    () => "unit",
    bool => "bool",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
    String => "string",
}

impl Typed for crate::address::Address {
    const NAME: &'static str = "troupe::address";
}

impl Typed for crate::error::ExitReason {
    const NAME: &'static str = "troupe::exit_reason";
}

/// One typed element of a payload.
#[derive(Clone)]
pub struct Value {
    name: Arc<str>,
    data: Arc<dyn Any + Send + Sync>,
}

impl Value {
    /// Wraps a typed value.
    pub fn new<T: Typed>(value: T) -> Value {
        Value { name: Arc::from(T::NAME), data: Arc::new(value) }
    }

    /// Builds an element from a decoded value and its registered name.
    pub fn from_parts(name: Arc<str>, data: Arc<dyn Any + Send + Sync>) -> Value {
        Value { name, data }
    }

    /// The stable type name of this element.
    pub fn type_name(&self) -> &str {
        &self.name
    }

    /// Downcast to a concrete type.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub(crate) fn data(&self) -> &(dyn Any + Send + Sync) {
        self.data.as_ref()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self.name)
    }
}

/// Ordered tuple of typed values.
///
/// Payloads are cheap to clone: every element is reference counted.
#[derive(Clone, Debug, Default)]
pub struct Payload {
    elements: Vec<Value>,
}

impl Payload {
    /// The empty payload.
    pub fn empty() -> Payload {
        Payload { elements: Vec::new() }
    }

    /// Builds a payload from raw elements.
    pub fn from_values(elements: Vec<Value>) -> Payload {
        Payload { elements }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True when no elements are present.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element at `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.elements.get(index)
    }

    /// Downcast the element at `index`.
    pub fn get<T: 'static>(&self, index: usize) -> Option<&T> {
        self.elements.get(index).and_then(Value::get::<T>)
    }

    /// The element type names, in order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(Value::type_name)
    }

    /// Token of this payload's element-type sequence.
    pub fn token(&self) -> TypeToken {
        TypeToken::of_names(self.type_names())
    }
}

/// A static tuple of payload element types.
///
/// Implemented for tuples of arity 0 through 4 of [`Typed`] types; used by
/// behavior patterns to name the element sequence they accept.
pub trait ElementTypes {
    /// Stable names of the tuple elements, in order.
    fn names() -> Vec<&'static str>;

    /// Token of the element sequence.
    fn token() -> TypeToken {
        TypeToken::of_names(Self::names())
    }
}

/// Conversion of a value tuple into a [`Payload`].
pub trait IntoPayload {
    /// Consume `self` into a payload.
    fn into_payload(self) -> Payload;
}

impl IntoPayload for Payload {
    fn into_payload(self) -> Payload {
        self
    }
}

macro_rules! impl_tuple_payload {
    ($(($($name:ident),*)),* $(,)?) => {
        $(
            impl<$($name: Typed),*> ElementTypes for ($($name,)*) {
                fn names() -> Vec<&'static str> {
                    vec![$($name::NAME),*]
                }
            }

            impl<$($name: Typed),*> IntoPayload for ($($name,)*) {
                #[allow(non_snake_case)]
                fn into_payload(self) -> Payload {
                    let ($($name,)*) = self;
                    Payload { elements: vec![$(Value::new($name)),*] }
                }
            }
        )*
    };
}

impl ElementTypes for () {
    fn names() -> Vec<&'static str> {
        Vec::new()
    }
}

impl IntoPayload for () {
    fn into_payload(self) -> Payload {
        Payload::empty()
    }
}

impl_tuple_payload! {
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
}

/// Encoder/decoder for one registered payload element type.
pub trait Codec: Send + Sync {
    /// Encode a value of the registered type.
    fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, Error>;

    /// Decode a value of the registered type.
    fn decode(&self, bytes: &[u8]) -> Result<Arc<dyn Any + Send + Sync>, Error>;
}

/// Stock codec backed by serde_json.
pub struct JsonCodec<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        JsonCodec { _phantom: PhantomData }
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, Error> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| Error::Codec("value does not match registered type".to_owned()))?;
        serde_json::to_vec(value).map_err(|e| Error::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Arc<dyn Any + Send + Sync>, Error> {
        let value: T =
            serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))?;
        Ok(Arc::new(value))
    }
}

/// Registry of element codecs, keyed by stable type name.
///
/// Reads vastly outnumber writes (registration happens at system
/// construction), so the table sits behind a reader/writer lock.
pub struct CodecRegistry {
    codecs: RwLock<HashMap<Arc<str>, Arc<dyn Codec>>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        CodecRegistry { codecs: RwLock::new(HashMap::new()) }
    }
}

impl CodecRegistry {
    /// Registry preloaded with the primitive types the runtime itself uses.
    pub fn with_defaults() -> CodecRegistry {
        let registry = CodecRegistry::default();
        registry.register::<()>();
        registry.register::<bool>();
        registry.register::<i8>();
        registry.register::<i16>();
        registry.register::<i32>();
        registry.register::<i64>();
        registry.register::<u8>();
        registry.register::<u16>();
        registry.register::<u32>();
        registry.register::<u64>();
        registry.register::<f32>();
        registry.register::<f64>();
        registry.register::<String>();
        registry.register::<crate::address::Address>();
        registry.register::<crate::error::ExitReason>();
        registry
    }

    /// Register the stock JSON codec for `T` under its stable name.
    pub fn register<T>(&self)
    where
        T: Typed + Serialize + DeserializeOwned,
    {
        self.register_with(T::NAME, Arc::new(JsonCodec::<T>::default()));
    }

    /// Register a custom codec under an explicit name.
    pub fn register_with(&self, name: &str, codec: Arc<dyn Codec>) {
        self.codecs.write().insert(Arc::from(name), codec);
    }

    fn codec_for(&self, name: &str) -> Result<Arc<dyn Codec>, Error> {
        self.codecs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Codec(format!("no codec registered for type '{}'", name)))
    }

    /// Encode a payload into its wire form.
    ///
    /// Layout, all integers big-endian: `u16` element count, then per
    /// element `u16` name length, name bytes, `u32` data length, data.
    pub fn encode_payload(&self, payload: &Payload) -> Result<Vec<u8>, Error> {
        if payload.len() > usize::from(u16::MAX) {
            return Err(Error::Codec("payload has too many elements".to_owned()));
        }
        let mut out = Vec::with_capacity(16 * payload.len() + 2);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        for value in &payload.elements {
            let name = value.type_name().as_bytes();
            if name.len() > usize::from(u16::MAX) {
                return Err(Error::Codec("type name too long".to_owned()));
            }
            let data = self.codec_for(value.type_name())?.encode(value.data())?;
            if data.len() > u32::MAX as usize {
                return Err(Error::Codec("element too large".to_owned()));
            }
            out.extend_from_slice(&(name.len() as u16).to_be_bytes());
            out.extend_from_slice(name);
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    /// Decode a payload from its wire form.
    pub fn decode_payload(&self, bytes: &[u8]) -> Result<Payload, Error> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let count = cursor.read_u16()?;
        let mut elements = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let name_len = usize::from(cursor.read_u16()?);
            let name = cursor.read_slice(name_len)?;
            let name = std::str::from_utf8(name)
                .map_err(|_| Error::Codec("type name is not utf-8".to_owned()))?
                .to_owned();
            let data_len = cursor.read_u32()? as usize;
            let data = cursor.read_slice(data_len)?;
            let decoded = self.codec_for(&name)?.decode(data)?;
            elements.push(Value::from_parts(Arc::from(name.as_str()), decoded));
        }
        if cursor.pos != bytes.len() {
            return Err(Error::Codec("trailing bytes after payload".to_owned()));
        }
        Ok(Payload { elements })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn read_slice(&mut self, len: usize) -> Result<&[u8], Error> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Error::Codec("truncated payload".to_owned()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, Error> {
        let slice = self.read_slice(2)?;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        let slice = self.read_slice(4)?;
        Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_token_depends_on_element_boundaries() {
        let a = TypeToken::of_names(["ab", "c"]);
        let b = TypeToken::of_names(["a", "bc"]);
        assert_ne!(a, b);
        let no_names: [&str; 0] = [];
        assert_eq!(TypeToken::of_names(no_names), TypeToken::EMPTY);
    }

    #[test]
    fn test_tuple_payload_matches_element_types() {
        let payload = (7i32, "hi".to_owned()).into_payload();
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.token(), <(i32, String)>::token());
        assert_eq!(payload.get::<i32>(0), Some(&7));
        assert_eq!(payload.get::<String>(1).map(String::as_str), Some("hi"));
        assert!(payload.get::<f64>(0).is_none());
    }

    #[test]
    fn test_payload_round_trip() {
        let registry = CodecRegistry::with_defaults();
        let payload = (1i32, 2.5f64, "hello".to_owned()).into_payload();
        let bytes = registry.encode_payload(&payload).unwrap();
        let decoded = registry.decode_payload(&bytes).unwrap();
        assert_eq!(decoded.token(), payload.token());
        assert_eq!(decoded.get::<i32>(0), Some(&1));
        assert_eq!(decoded.get::<f64>(1), Some(&2.5));
        assert_eq!(decoded.get::<String>(2).map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_unregistered_type_is_an_error() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Opaque(u8);
        impl Typed for Opaque {
            const NAME: &'static str = "opaque";
        }
        let registry = CodecRegistry::with_defaults();
        let payload = Payload::from_values(vec![Value::new(Opaque(1))]);
        assert!(matches!(registry.encode_payload(&payload), Err(Error::Codec(_))));
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let registry = CodecRegistry::with_defaults();
        let payload = (42u64,).into_payload();
        let bytes = registry.encode_payload(&payload).unwrap();
        assert!(registry.decode_payload(&bytes[..bytes.len() - 1]).is_err());
        assert!(registry.decode_payload(&[0xff, 0xff]).is_err());
    }
}
