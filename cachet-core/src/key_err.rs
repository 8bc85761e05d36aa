//! Per-key error aggregation for batched reads.
//!
//! A pipelined read resolves every key independently, so failures are
//! collected here instead of short-circuiting the batch. The aggregate keeps
//! track of how many of its entries are plain cache misses: a batch whose
//! failures are all misses can be repaired by loading the absent keys, any
//! other failure cannot.

use std::collections::HashMap;
use std::fmt;

use crate::error::KeyFailure;
use crate::keys::key_with_field;

/// Aggregated per-key failures of one batched read.
///
/// Keys are composite cache keys: a plain key for scalar reads, or
/// `key/field` for hash-field reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyErr {
    keys_to_errs: HashMap<String, KeyFailure>,
    cache_miss_errs_count: usize,
}

impl KeyErr {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for a scalar key.
    ///
    /// The first failure recorded for a key wins; later ones are dropped.
    pub fn add_error_for_key(&mut self, key: impl Into<String>, err: KeyFailure) {
        self.insert_first(key.into(), err);
    }

    /// Record a failure for a hash key and field, stored under `key/field`.
    pub fn add_error_for_key_and_field(&mut self, key: &str, field: &str, err: KeyFailure) {
        self.insert_first(key_with_field(key, field), err);
    }

    fn insert_first(&mut self, key: String, err: KeyFailure) {
        if self.keys_to_errs.contains_key(&key) {
            return;
        }
        if err.is_miss() {
            self.cache_miss_errs_count += 1;
        }
        self.keys_to_errs.insert(key, err);
    }

    /// True if at least one recorded failure is not a cache miss.
    pub fn has_non_cache_miss_errs(&self) -> bool {
        self.keys_to_errs.len() > self.cache_miss_errs_count
    }

    /// Number of recorded failures that are cache misses.
    pub fn cache_miss_errs_count(&self) -> usize {
        self.cache_miss_errs_count
    }

    pub fn len(&self) -> usize {
        self.keys_to_errs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys_to_errs.is_empty()
    }

    /// The failure recorded for a composite key.
    pub fn get(&self, key: &str) -> Option<&KeyFailure> {
        self.keys_to_errs.get(key)
    }

    pub fn keys_to_errs(&self) -> &HashMap<String, KeyFailure> {
        &self.keys_to_errs
    }

    /// Composite keys whose failure is a miss, sorted.
    pub fn missed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .keys_to_errs
            .iter()
            .filter(|(_, err)| err.is_miss())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// `Ok(())` when nothing was recorded, the aggregate otherwise.
    pub fn into_result(self) -> Result<(), KeyErr> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for KeyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.keys_to_errs.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        write!(f, "Load keys err:")?;
        for (idx, (key, err)) in entries.into_iter().enumerate() {
            let sep = if idx == 0 { " " } else { "; " };
            write!(f, "{}key {:?}: {}", sep, key, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for KeyErr {}
