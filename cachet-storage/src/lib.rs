//! cachet Storage - Typed Cache-Aside Layer
//!
//! Reads and writes typed values against a pipelined key-value backend.
//! Reads fill a caller-owned destination (single value, list, map or map of
//! maps) from one batched request and report failures per key. Cache-aside
//! reads hand the missing keys to a loader and write the loaded values back.

pub mod backend;
pub mod cache;
pub mod cache_aside;
pub mod container;
pub mod fetch;
pub mod transform;

pub use backend::{
    Backend, BackendStats, Command, CommandError, CommandResult, InMemoryBackend, Reply,
};
pub use cache::{Cache, Request};
pub use cache_aside::{AbsentKeysLoader, CacheAside, DestinationKeyFn};
pub use container::{CacheValue, Container, ContainerKind};
pub use fetch::{ReadPlan, RequestOptions};
pub use transform::{into_items, KeyExtractor, Loaded, LoaderResult};

pub use cachet_core::{
    create_key, key_with_field, split_key_and_field, unpack_key, unpack_key_with_prefix,
    BackendError, CacheConfig, CacheError, CacheItem, CacheResult, CodecError, CompositeKey,
    ConfigError, JsonSerializer, KeyErr, KeyFailure, LoadError, Marshaller, Serializer, ShapeError,
    Ttl,
};
