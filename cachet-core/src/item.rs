//! Cache writes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::keys::key_with_field;

/// Expiry of a cached value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ttl {
    /// The configured default TTL.
    #[default]
    Default,
    /// No expiry.
    Persistent,
    /// Explicit expiry. Values under one second fall back to the default.
    Expire(Duration),
}

/// One value to write to the cache.
///
/// An empty `field` addresses a scalar key, anything else a field of the
/// hash stored at `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem<V> {
    pub key: String,
    #[serde(default)]
    pub field: String,
    pub value: V,
    #[serde(default)]
    pub ttl: Ttl,
    /// Only write if the key already exists.
    #[serde(default)]
    pub if_exists: bool,
    /// Only write if the key (or hash field) does not exist yet.
    #[serde(default)]
    pub if_not_exists: bool,
}

impl<V> CacheItem<V> {
    /// A scalar item with the default TTL.
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            field: String::new(),
            value,
            ttl: Ttl::Default,
            if_exists: false,
            if_not_exists: false,
        }
    }

    /// A hash-field item with the default TTL.
    pub fn hash(key: impl Into<String>, field: impl Into<String>, value: V) -> Self {
        Self {
            field: field.into(),
            ..Self::new(key, value)
        }
    }

    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    pub fn has_field(&self) -> bool {
        !self.field.is_empty()
    }

    /// `key` or `key/field`.
    pub fn cache_key(&self) -> String {
        if self.has_field() {
            key_with_field(&self.key, &self.field)
        } else {
            self.key.clone()
        }
    }

    /// Reject write conditions the store cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.if_exists && self.if_not_exists {
            return Err(ConfigError::ConflictingConditions {
                key: self.cache_key(),
            });
        }
        if self.if_exists && self.has_field() {
            return Err(ConfigError::UnsupportedHashCondition {
                key: self.key.clone(),
                field: self.field.clone(),
            });
        }
        Ok(())
    }
}
