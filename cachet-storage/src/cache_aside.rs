//! Cache-aside reads.
//!
//! A cache-aside read fetches a batch, and when every failure in it is a
//! miss, asks the loader for exactly the missing keys, merges the loaded
//! values into the destination and writes them back. Any other failure in
//! the batch is returned untouched and the loader is not called.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use cachet_core::{CacheError, CacheResult, LoadError, Serializer};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::cache::Cache;
use crate::container::{CacheValue, Container};
use crate::fetch::{fetch, ReadPlan, RequestOptions};
use crate::transform::{into_items, KeyExtractor, LoaderResult};

/// Loads values for keys that are absent from the cache.
///
/// Keys are composite cache keys as requested (`key` or `key/field`).
/// Closures `Fn(Vec<String>) -> impl Future<Output = Result<LoaderResult<T>,
/// LoadError>>` implement this trait.
#[async_trait]
pub trait AbsentKeysLoader<T>: Send + Sync {
    async fn load(&self, absent_keys: Vec<String>) -> Result<LoaderResult<T>, LoadError>;
}

#[async_trait]
impl<T, F, Fut> AbsentKeysLoader<T> for F
where
    T: Send + 'static,
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<LoaderResult<T>, LoadError>> + Send + 'static,
{
    async fn load(&self, absent_keys: Vec<String>) -> Result<LoaderResult<T>, LoadError> {
        (self)(absent_keys).await
    }
}

/// Rewrites where a loaded item lands in the destination. `None` skips it.
pub type DestinationKeyFn<'a, V> =
    dyn Fn(&str, &str, &V) -> Option<(String, String)> + Send + Sync + 'a;

/// A read that falls back to a loader for missing keys.
///
/// Created by [`crate::Request::with_loader`].
pub struct CacheAside<'c, B, S, T, L> {
    cache: &'c Cache<B, S>,
    options: RequestOptions,
    loader: L,
    extractor: Option<Box<KeyExtractor<'c, T>>>,
    destination_key: Option<Box<DestinationKeyFn<'c, T>>>,
}

impl<'c, B, S, T, L> CacheAside<'c, B, S, T, L>
where
    B: Backend,
    S: Serializer,
    T: CacheValue,
    L: AbsentKeysLoader<T>,
{
    pub(crate) fn new(cache: &'c Cache<B, S>, options: RequestOptions, loader: L) -> Self {
        Self {
            cache,
            options,
            loader,
            extractor: None,
            destination_key: None,
        }
    }

    /// Derive `(key, field)` for plain values returned by the loader.
    ///
    /// Required when the loader returns a list of plain values.
    pub fn extract_key_with<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&T) -> (String, String) + Send + Sync + 'c,
    {
        self.extractor = Some(Box::new(extractor));
        self
    }

    /// Place loaded items in the destination under a different key/field.
    ///
    /// Write-back still uses the item's own key and field.
    pub fn transform_key_for_destination<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str, &str, &T) -> Option<(String, String)> + Send + Sync + 'c,
    {
        self.destination_key = Some(Box::new(transform));
        self
    }

    pub async fn get<'d, K: AsRef<str>>(
        self,
        dst: impl Into<Container<'d, T>>,
        keys: &[K],
    ) -> CacheResult<()> {
        self.run(dst.into(), ReadPlan::keys(keys)).await
    }

    pub async fn hget_all<'d>(self, dst: impl Into<Container<'d, T>>, key: &str) -> CacheResult<()> {
        self.run(dst.into(), ReadPlan::hash_all(key)).await
    }

    pub async fn hget_fields<'d, F: AsRef<str>>(
        self,
        dst: impl Into<Container<'d, T>>,
        key: &str,
        fields: &[F],
    ) -> CacheResult<()> {
        self.run(dst.into(), ReadPlan::hash_fields(key, fields)).await
    }

    pub async fn hget_keys_and_fields<'d>(
        self,
        dst: impl Into<Container<'d, T>>,
        keys_and_fields: &HashMap<String, Vec<String>>,
    ) -> CacheResult<()> {
        self.run(dst.into(), ReadPlan::hashes(keys_and_fields)).await
    }

    async fn run(self, mut dst: Container<'_, T>, plan: ReadPlan) -> CacheResult<()> {
        let cache = self.cache;
        let timeout = cache.effective_timeout(self.options.timeout);

        let backend: &B = cache.backend();
        let key_err = fetch(
            backend,
            cache.marshaller(),
            &mut dst,
            &plan,
            true,
            timeout,
        )
        .await?;
        if key_err.is_empty() {
            debug!(requested = plan.requested(), "cache-aside: all keys found");
            return Ok(());
        }
        if key_err.has_non_cache_miss_errs() {
            warn!(
                errors = key_err.len(),
                misses = key_err.cache_miss_errs_count(),
                "cache-aside: batch has failures other than misses, loader skipped"
            );
            return Err(CacheError::Keys(key_err));
        }

        let absent_keys = key_err.missed_keys();
        debug!(absent = absent_keys.len(), "cache-aside: loading absent keys");
        let loaded = self.loader.load(absent_keys.clone()).await?;
        let items = into_items(loaded, &absent_keys, self.extractor.as_deref())?;
        let commands = cache.write_commands(&items)?;
        debug!(
            loaded = items.len(),
            commands = commands.len(),
            "cache-aside: merging loaded items"
        );

        for item in items {
            let (key, field) = match &self.destination_key {
                Some(transform) => match transform(&item.key, &item.field, &item.value) {
                    Some(key_and_field) => key_and_field,
                    None => continue,
                },
                None => (item.key, item.field),
            };
            dst.add_element(&key, &field, item.value);
        }

        cache.submit(commands, timeout).await.map_err(|e| {
            warn!(error = %e, "cache-aside: write-back failed");
            e
        })
    }
}
