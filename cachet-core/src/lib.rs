//! cachet Core - Keys, Items, Encoding and Errors
//!
//! Pure types shared by the cache layer. No I/O happens here: the composite
//! key codec, the write model, value marshalling, configuration and the error
//! taxonomy (including the per-key aggregate returned by batched reads).

pub mod config;
pub mod error;
pub mod item;
pub mod key_err;
pub mod keys;
pub mod marshaller;

pub use config::{CacheConfig, DEFAULT_TTL, MIN_TTL};
pub use error::{
    BackendError, CacheError, CacheResult, CodecError, ConfigError, KeyFailure, LoadError,
    ShapeError,
};
pub use item::{CacheItem, Ttl};
pub use key_err::KeyErr;
pub use keys::{
    create_key, has_field, key_with_field, split_key_and_field, split_parts, unpack_key,
    unpack_key_with_prefix, CompositeKey, FIELD_SEPARATOR, KEYS_SEPARATOR,
};
pub use marshaller::{JsonSerializer, Marshaller, Serializer};
