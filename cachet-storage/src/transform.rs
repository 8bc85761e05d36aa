//! Loader results to cache items.
//!
//! A loader may answer with one value, a list, or a map keyed by cache key,
//! and any element may be a ready [`CacheItem`]. This module derives the key
//! and field of every plain value and produces the items to write back.

use std::collections::HashMap;

use cachet_core::{split_key_and_field, CacheItem, CacheResult, ConfigError, ShapeError};

/// Derives `(key, field)` for a loaded value. An empty field means a scalar
/// key.
pub type KeyExtractor<'a, V> = dyn Fn(&V) -> (String, String) + Send + Sync + 'a;

/// One element returned by a loader.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<V> {
    /// A plain value; its key is derived.
    Value(V),
    /// A complete item; written as given.
    Item(CacheItem<V>),
}

impl<V> From<CacheItem<V>> for Loaded<V> {
    fn from(item: CacheItem<V>) -> Self {
        Loaded::Item(item)
    }
}

/// What a loader returned for a set of absent keys.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderResult<V> {
    /// One element, valid only when exactly one key was absent.
    Single(Loaded<V>),
    List(Vec<Loaded<V>>),
    /// Keyed by cache key (`key` or `key/field`).
    Map(HashMap<String, Loaded<V>>),
}

impl<V> LoaderResult<V> {
    pub fn single(value: V) -> Self {
        LoaderResult::Single(Loaded::Value(value))
    }

    pub fn item(item: CacheItem<V>) -> Self {
        LoaderResult::Single(Loaded::Item(item))
    }

    pub fn list(values: impl IntoIterator<Item = V>) -> Self {
        LoaderResult::List(values.into_iter().map(Loaded::Value).collect())
    }

    pub fn items(items: impl IntoIterator<Item = CacheItem<V>>) -> Self {
        LoaderResult::List(items.into_iter().map(Loaded::Item).collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        LoaderResult::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), Loaded::Value(value)))
                .collect(),
        )
    }

    /// Number of elements returned.
    pub fn len(&self) -> usize {
        match self {
            LoaderResult::Single(_) => 1,
            LoaderResult::List(values) => values.len(),
            LoaderResult::Map(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the items to write back.
///
/// Map entries take their key from the map key; list elements need
/// `extractor`; a single value uses `extractor` or else the sole absent key.
pub fn into_items<V>(
    loaded: LoaderResult<V>,
    absent_keys: &[String],
    extractor: Option<&KeyExtractor<'_, V>>,
) -> CacheResult<Vec<CacheItem<V>>> {
    match loaded {
        LoaderResult::Map(entries) => {
            let mut entries: Vec<(String, Loaded<V>)> = entries.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries
                .into_iter()
                .map(|(map_key, loaded)| match loaded {
                    Loaded::Item(item) => item,
                    Loaded::Value(value) => {
                        let (key, field) = split_key_and_field(&map_key);
                        CacheItem::hash(key, field, value)
                    }
                })
                .collect())
        }
        LoaderResult::List(values) => {
            let mut items = Vec::with_capacity(values.len());
            for loaded in values {
                match loaded {
                    Loaded::Item(item) => items.push(item),
                    Loaded::Value(value) => {
                        let extractor = extractor.ok_or(ConfigError::ItemToCacheKeyFnRequired)?;
                        let (key, field) = extractor(&value);
                        items.push(CacheItem::hash(key, field, value));
                    }
                }
            }
            Ok(items)
        }
        LoaderResult::Single(loaded) => {
            let [absent_key] = absent_keys else {
                return Err(ShapeError::WrongLoadFnType {
                    absent_keys: absent_keys.len(),
                }
                .into());
            };
            let item = match loaded {
                Loaded::Item(item) => item,
                Loaded::Value(value) => {
                    let (key, field) = match extractor {
                        Some(extractor) => extractor(&value),
                        None => {
                            let (key, field) = split_key_and_field(absent_key);
                            (key.to_string(), field.to_string())
                        }
                    };
                    CacheItem::hash(key, field, value)
                }
            };
            Ok(vec![item])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_core::{CacheError, Ttl};
    use std::time::Duration;

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_map_entries_split_map_key() {
        let loaded = LoaderResult::map([("k1", "v1".to_string()), ("h/f", "v2".to_string())]);
        let items = into_items(loaded, &keys(&["k1", "h/f"]), None).unwrap();
        assert_eq!(
            items,
            vec![
                CacheItem::hash("h", "f", "v2".to_string()),
                CacheItem::new("k1", "v1".to_string()),
            ]
        );
    }

    #[test]
    fn test_map_item_ignores_map_key() {
        let item = CacheItem::new("real", 1).with_ttl(Ttl::Persistent);
        let loaded = LoaderResult::Map(HashMap::from([("ignored".to_string(), Loaded::Item(item.clone()))]));
        let items = into_items(loaded, &keys(&["ignored"]), None).unwrap();
        assert_eq!(items, vec![item]);
    }

    #[test]
    fn test_list_without_extractor_fails() {
        let loaded = LoaderResult::list([1, 2]);
        let err = into_items(loaded, &keys(&["a", "b"]), None).unwrap_err();
        assert_eq!(err, CacheError::Config(ConfigError::ItemToCacheKeyFnRequired));
    }

    #[test]
    fn test_mixed_list_without_extractor_yields_nothing() {
        let loaded = LoaderResult::List(vec![
            Loaded::Item(CacheItem::new("a", 1)),
            Loaded::Value(2),
        ]);
        let err = into_items(loaded, &keys(&["a", "b"]), None).unwrap_err();
        assert_eq!(err, CacheError::Config(ConfigError::ItemToCacheKeyFnRequired));
    }

    #[test]
    fn test_list_of_items_needs_no_extractor() {
        let loaded = LoaderResult::items([CacheItem::new("a", 1), CacheItem::new("b", 2)]);
        let items = into_items(loaded, &keys(&["a", "b"]), None).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_list_with_extractor() {
        let extractor = |v: &u32| (format!("usr-by-id|{}", v), String::new());
        let loaded = LoaderResult::list([7u32, 8]);
        let items = into_items(loaded, &keys(&["usr-by-id|7", "usr-by-id|8"]), Some(&extractor)).unwrap();
        assert_eq!(items[0].key, "usr-by-id|7");
        assert_eq!(items[1].key, "usr-by-id|8");
        assert!(!items[0].has_field());
    }

    #[test]
    fn test_single_uses_absent_key() {
        let loaded = LoaderResult::single("v".to_string());
        let items = into_items(loaded, &keys(&["h/f"]), None).unwrap();
        assert_eq!(items, vec![CacheItem::hash("h", "f", "v".to_string())]);
    }

    #[test]
    fn test_single_prefers_extractor() {
        let extractor = |_: &String| ("from-extractor".to_string(), String::new());
        let loaded = LoaderResult::single("v".to_string());
        let items = into_items(loaded, &keys(&["absent"]), Some(&extractor)).unwrap();
        assert_eq!(items[0].key, "from-extractor");
    }

    #[test]
    fn test_single_with_many_absent_keys() {
        let loaded = LoaderResult::item(CacheItem::new("k", 1).with_ttl(Ttl::Expire(Duration::from_secs(5))));
        let err = into_items(loaded, &keys(&["a", "b"]), None).unwrap_err();
        assert_eq!(err, CacheError::Shape(ShapeError::WrongLoadFnType { absent_keys: 2 }));
    }
}
