//! Destination containers.
//!
//! A read fills a caller-owned location element by element. The four
//! supported shapes are closed over in [`Container`], chosen once per call.

use std::collections::HashMap;
use std::fmt;

use cachet_core::key_with_field;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bounds every cached element type satisfies.
///
/// `Default` supplies the scratch value a payload is decoded into. Types
/// without a sensible default can be cached as `Option<T>`.
pub trait CacheValue: Serialize + DeserializeOwned + Default + Send + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Default + Send + 'static {}

/// Shape of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Single,
    List,
    Map,
    NestedMap,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerKind::Single => "single",
            ContainerKind::List => "list",
            ContainerKind::Map => "map",
            ContainerKind::NestedMap => "nested map",
        };
        f.write_str(name)
    }
}

/// Mutable view over a caller's result location.
pub enum Container<'a, T> {
    /// Every write replaces the value; only the last one is kept.
    Single(&'a mut Option<T>),
    /// Appends in processing order, ignoring key and field.
    List(&'a mut Vec<T>),
    /// Keyed by `key`, or `key/field` for hash fields.
    Map(&'a mut HashMap<String, T>),
    /// Keyed by `key`, then by `field`.
    NestedMap(&'a mut HashMap<String, HashMap<String, T>>),
}

impl<'a, T> Container<'a, T> {
    pub fn single(dst: &'a mut Option<T>) -> Self {
        Container::Single(dst)
    }

    pub fn list(dst: &'a mut Vec<T>) -> Self {
        Container::List(dst)
    }

    pub fn map(dst: &'a mut HashMap<String, T>) -> Self {
        Container::Map(dst)
    }

    pub fn nested(dst: &'a mut HashMap<String, HashMap<String, T>>) -> Self {
        Container::NestedMap(dst)
    }

    pub fn kind(&self) -> ContainerKind {
        match self {
            Container::Single(_) => ContainerKind::Single,
            Container::List(_) => ContainerKind::List,
            Container::Map(_) => ContainerKind::Map,
            Container::NestedMap(_) => ContainerKind::NestedMap,
        }
    }

    /// False for [`Container::Single`].
    pub fn is_multi_element(&self) -> bool {
        !matches!(self, Container::Single(_))
    }

    /// Elements currently held; nested maps count inner values.
    pub fn len(&self) -> usize {
        match self {
            Container::Single(dst) => usize::from(dst.is_some()),
            Container::List(dst) => dst.len(),
            Container::Map(dst) => dst.len(),
            Container::NestedMap(dst) => dst.values().map(HashMap::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve room for `size` more elements. Existing contents are kept.
    pub fn init_with_size(&mut self, size: usize) {
        match self {
            Container::Single(_) => {}
            Container::List(dst) => dst.reserve(size),
            Container::Map(dst) => dst.reserve(size),
            Container::NestedMap(dst) => dst.reserve(size),
        }
    }

    /// Store one element.
    pub fn add_element(&mut self, key: &str, field: &str, value: T) {
        match self {
            Container::Single(dst) => **dst = Some(value),
            Container::List(dst) => dst.push(value),
            Container::Map(dst) => {
                let key = if field.is_empty() {
                    key.to_string()
                } else {
                    key_with_field(key, field)
                };
                dst.insert(key, value);
            }
            Container::NestedMap(dst) => {
                dst.entry(key.to_string())
                    .or_default()
                    .insert(field.to_string(), value);
            }
        }
    }
}

impl<T: Default> Container<'_, T> {
    /// Fresh element to decode a payload into.
    pub fn dst_el(&self) -> T {
        T::default()
    }
}

impl<T> fmt::Debug for Container<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}

impl<'a, T> From<&'a mut Option<T>> for Container<'a, T> {
    fn from(dst: &'a mut Option<T>) -> Self {
        Container::Single(dst)
    }
}

impl<'a, T> From<&'a mut Vec<T>> for Container<'a, T> {
    fn from(dst: &'a mut Vec<T>) -> Self {
        Container::List(dst)
    }
}

impl<'a, T> From<&'a mut HashMap<String, T>> for Container<'a, T> {
    fn from(dst: &'a mut HashMap<String, T>) -> Self {
        Container::Map(dst)
    }
}
