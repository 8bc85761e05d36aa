//! Value encoding for cache payloads.
//!
//! Primitives take a fixed text encoding so that values written by other
//! clients of the same store stay readable: strings and raw bytes are stored
//! verbatim, numbers in canonical decimal, booleans as `t`/`f`. Everything
//! else goes through a pluggable [`Serializer`], JSON by default.

use std::any::{type_name, Any};
use std::fmt::Display;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Encoder used for values without a primitive fast path.
pub trait Serializer: Send + Sync {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

/// serde_json encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|e| decode_error::<T>(e))
    }
}

/// Converts values to and from their stored byte form.
#[derive(Debug, Clone, Default)]
pub struct Marshaller<S = JsonSerializer> {
    serializer: S,
}

impl<S: Serializer> Marshaller<S> {
    pub fn new(serializer: S) -> Self {
        Self { serializer }
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Encode a value.
    ///
    /// Raw bytes are `Vec<u8>` or `&'static [u8]`. Wrappers such as
    /// `Option<T>` always go through the serializer, so `None` encodes as
    /// `null`; only `()` encodes to empty bytes.
    pub fn marshal<T: Serialize + 'static>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let any = value as &dyn Any;
        if any.is::<()>() {
            return Ok(Vec::new());
        }
        if let Some(bytes) = any.downcast_ref::<Vec<u8>>() {
            return Ok(bytes.clone());
        }
        if let Some(bytes) = any.downcast_ref::<&'static [u8]>() {
            return Ok(bytes.to_vec());
        }
        if let Some(s) = any.downcast_ref::<String>() {
            return Ok(s.as_bytes().to_vec());
        }
        if let Some(s) = any.downcast_ref::<&'static str>() {
            return Ok(s.as_bytes().to_vec());
        }
        if let Some(b) = any.downcast_ref::<bool>() {
            return Ok(if *b { b"t".to_vec() } else { b"f".to_vec() });
        }
        if let Some(text) = primitive_text(any) {
            return Ok(text.into_bytes());
        }
        self.serializer.serialize(value)
    }

    /// Decode `data` into `dst`.
    ///
    /// Empty input leaves `dst` as it was.
    pub fn unmarshal<T: DeserializeOwned + 'static>(
        &self,
        data: &[u8],
        dst: &mut T,
    ) -> Result<(), CodecError> {
        if data.is_empty() {
            return Ok(());
        }
        let any = dst as &mut dyn Any;
        if any.is::<()>() {
            return Ok(());
        }
        if let Some(bytes) = any.downcast_mut::<Vec<u8>>() {
            bytes.clear();
            bytes.extend_from_slice(data);
            return Ok(());
        }
        if let Some(s) = any.downcast_mut::<String>() {
            *s = String::from_utf8(data.to_vec()).map_err(|e| decode_error::<String>(e))?;
            return Ok(());
        }
        if let Some(b) = any.downcast_mut::<bool>() {
            *b = data == b"t";
            return Ok(());
        }
        if parse_primitive(data, any)? {
            return Ok(());
        }
        *dst = self.serializer.deserialize(data)?;
        Ok(())
    }
}

fn decode_error<T: ?Sized>(e: impl Display) -> CodecError {
    CodecError::Decode {
        target: type_name::<T>().to_string(),
        reason: e.to_string(),
    }
}

macro_rules! render_as {
    ($any:expr, $($t:ty),* $(,)?) => {
        $(
            if let Some(v) = $any.downcast_ref::<$t>() {
                return Some(v.to_string());
            }
        )*
    };
}

macro_rules! parse_as {
    ($any:expr, $data:expr, $($t:ty),* $(,)?) => {
        $(
            if let Some(slot) = $any.downcast_mut::<$t>() {
                let text = std::str::from_utf8($data).map_err(|e| decode_error::<$t>(e))?;
                *slot = text.parse::<$t>().map_err(|e| decode_error::<$t>(e))?;
                return Ok(true);
            }
        )*
    };
}

fn primitive_text(any: &dyn Any) -> Option<String> {
    render_as!(any, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);
    None
}

fn parse_primitive(data: &[u8], any: &mut dyn Any) -> Result<bool, CodecError> {
    parse_as!(any, data, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);
    Ok(false)
}
