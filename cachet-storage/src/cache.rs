//! Cache handle.
//!
//! [`Cache`] owns the backend handle, the marshaller and the configuration.
//! Writes go through it directly; reads are configured per call through
//! [`Cache::request`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cachet_core::{CacheConfig, CacheItem, CacheResult, JsonSerializer, Marshaller, Serializer};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{run_pipeline, Backend, Command, CommandError};
use crate::cache_aside::{AbsentKeysLoader, CacheAside};
use crate::container::{CacheValue, Container};
use crate::fetch::{fetch, finish, ReadPlan, RequestOptions};

/// Typed cache over a pipelined backend.
///
/// # Example
///
/// ```ignore
/// let cache = Cache::new(Arc::new(InMemoryBackend::new()), CacheConfig::default())?;
/// cache.set(&[CacheItem::new("usr-by-id|1", user)]).await?;
///
/// let mut users: HashMap<String, User> = HashMap::new();
/// cache
///     .request()
///     .with_loader(load_users)
///     .get(&mut users, &["usr-by-id|1", "usr-by-id|2"])
///     .await?;
/// ```
pub struct Cache<B, S = JsonSerializer> {
    backend: Arc<B>,
    marshaller: Arc<Marshaller<S>>,
    config: CacheConfig,
}

impl<B, S> Clone for Cache<B, S> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            marshaller: Arc::clone(&self.marshaller),
            config: self.config.clone(),
        }
    }
}

impl<B: Backend> Cache<B, JsonSerializer> {
    /// Create a cache encoding non-primitive values as JSON.
    pub fn new(backend: Arc<B>, config: CacheConfig) -> CacheResult<Self> {
        Self::with_serializer(backend, config, JsonSerializer)
    }
}

impl<B: Backend, S: Serializer> Cache<B, S> {
    /// Create a cache with a custom serializer.
    pub fn with_serializer(backend: Arc<B>, config: CacheConfig, serializer: S) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            marshaller: Arc::new(Marshaller::new(serializer)),
            config,
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn marshaller(&self) -> &Marshaller<S> {
        &self.marshaller
    }

    /// Start a read with per-call options.
    pub fn request(&self) -> Request<'_, B, S> {
        Request {
            cache: self,
            options: RequestOptions::default(),
        }
    }

    /// Read scalar keys with default options.
    pub async fn get<'d, T, K>(&self, dst: impl Into<Container<'d, T>>, keys: &[K]) -> CacheResult<()>
    where
        T: CacheValue,
        K: AsRef<str>,
    {
        self.request().get(dst, keys).await
    }

    /// Write items in one pipeline.
    ///
    /// All items are validated before anything is sent. Returns the first
    /// failing command's error.
    pub async fn set<V>(&self, items: &[CacheItem<V>]) -> CacheResult<()>
    where
        V: Serialize + Sync + 'static,
    {
        let commands = self.write_commands(items)?;
        self.submit(commands, None).await
    }

    /// Write scalar `(key, value)` pairs with the default TTL.
    pub async fn set_kv<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> CacheResult<()>
    where
        K: Into<String>,
        V: Serialize + Sync + 'static,
    {
        let items: Vec<CacheItem<V>> = pairs
            .into_iter()
            .map(|(key, value)| CacheItem::new(key, value))
            .collect();
        self.set(&items).await
    }

    /// Write `(field, value)` pairs into the hash at `key` and refresh its
    /// expiry to the default TTL.
    pub async fn hset_kv<F, V>(&self, key: &str, pairs: impl IntoIterator<Item = (F, V)>) -> CacheResult<()>
    where
        F: Into<String>,
        V: Serialize + 'static,
    {
        let mut commands = Vec::new();
        for (field, value) in pairs {
            commands.push(Command::HSet {
                key: key.to_string(),
                field: field.into(),
                value: self.marshaller.marshal(&value)?,
            });
        }
        if commands.is_empty() {
            return Ok(());
        }
        commands.push(Command::Expire {
            key: key.to_string(),
            ttl: self.config.effective_default_ttl(),
        });
        self.submit(commands, None).await
    }

    /// Delete keys in one pipeline. No keys, no round trip.
    pub async fn delete<K: AsRef<str>>(&self, keys: &[K]) -> CacheResult<()> {
        let commands: Vec<Command> = keys
            .iter()
            .map(|key| Command::Del {
                key: key.as_ref().to_string(),
            })
            .collect();
        self.submit(commands, None).await
    }

    pub(crate) fn effective_timeout(&self, per_call: Option<Duration>) -> Option<Duration> {
        per_call.or(self.config.call_timeout)
    }

    /// Validate and encode items into write commands.
    pub(crate) fn write_commands<V>(&self, items: &[CacheItem<V>]) -> CacheResult<Vec<Command>>
    where
        V: Serialize + 'static,
    {
        for item in items {
            item.validate()?;
        }

        let mut commands = Vec::with_capacity(items.len());
        for item in items {
            let value = self.marshaller.marshal(&item.value)?;
            let ttl = self.config.resolve_ttl(item.ttl);
            let key = item.key.clone();
            if item.has_field() {
                let field = item.field.clone();
                commands.push(if item.if_not_exists {
                    Command::HSetIfNotExists {
                        key: key.clone(),
                        field,
                        value,
                    }
                } else {
                    Command::HSet {
                        key: key.clone(),
                        field,
                        value,
                    }
                });
                if let Some(ttl) = ttl {
                    commands.push(Command::Expire { key, ttl });
                }
            } else if item.if_exists {
                commands.push(Command::SetIfExists { key, value, ttl });
            } else if item.if_not_exists {
                commands.push(Command::SetIfNotExists { key, value, ttl });
            } else {
                commands.push(Command::Set { key, value, ttl });
            }
        }
        Ok(commands)
    }

    /// Send write commands and surface the first per-command failure.
    pub(crate) async fn submit(&self, commands: Vec<Command>, timeout: Option<Duration>) -> CacheResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let count = commands.len();
        let replies = run_pipeline(&*self.backend, commands, self.effective_timeout(timeout)).await?;
        for reply in replies {
            if let Err(CommandError::Failed(e)) = reply {
                warn!(error = %e, commands = count, "write batch failed");
                return Err(e.into());
            }
        }
        debug!(commands = count, "write batch complete");
        Ok(())
    }
}

/// A read with per-call options.
///
/// Created by [`Cache::request`].
pub struct Request<'c, B, S = JsonSerializer> {
    cache: &'c Cache<B, S>,
    options: RequestOptions,
}

impl<'c, B: Backend, S: Serializer> Request<'c, B, S> {
    /// Record absent keys as misses even for list and map destinations.
    pub fn report_misses(mut self) -> Self {
        self.options.report_misses = true;
        self
    }

    /// Do not fail single-value reads on a miss; the destination stays as is.
    pub fn disable_single_dst_miss_errors(mut self) -> Self {
        self.options.disable_single_dst_miss_errors = true;
        self
    }

    /// Deadline for each backend round trip of this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn options(&self) -> RequestOptions {
        self.options
    }

    /// Turn this read into a cache-aside read.
    pub fn with_loader<T, L>(self, loader: L) -> CacheAside<'c, B, S, T, L>
    where
        T: CacheValue,
        L: AbsentKeysLoader<T>,
    {
        CacheAside::new(self.cache, self.options, loader)
    }

    /// Read scalar keys.
    pub async fn get<'d, T, K>(self, dst: impl Into<Container<'d, T>>, keys: &[K]) -> CacheResult<()>
    where
        T: CacheValue,
        K: AsRef<str>,
    {
        self.read(dst.into(), ReadPlan::keys(keys)).await
    }

    /// Read every field of a hash.
    pub async fn hget_all<'d, T: CacheValue>(
        self,
        dst: impl Into<Container<'d, T>>,
        key: &str,
    ) -> CacheResult<()> {
        self.read(dst.into(), ReadPlan::hash_all(key)).await
    }

    /// Read selected fields of a hash.
    pub async fn hget_fields<'d, T, F>(
        self,
        dst: impl Into<Container<'d, T>>,
        key: &str,
        fields: &[F],
    ) -> CacheResult<()>
    where
        T: CacheValue,
        F: AsRef<str>,
    {
        self.read(dst.into(), ReadPlan::hash_fields(key, fields)).await
    }

    /// Read several hashes; an empty field list reads the whole hash.
    pub async fn hget_keys_and_fields<'d, T: CacheValue>(
        self,
        dst: impl Into<Container<'d, T>>,
        keys_and_fields: &HashMap<String, Vec<String>>,
    ) -> CacheResult<()> {
        self.read(dst.into(), ReadPlan::hashes(keys_and_fields)).await
    }

    async fn read<T: CacheValue>(self, mut dst: Container<'_, T>, plan: ReadPlan) -> CacheResult<()> {
        let multi_element = dst.is_multi_element();
        let backend: &B = self.cache.backend();
        let key_err = fetch(
            backend,
            self.cache.marshaller(),
            &mut dst,
            &plan,
            self.options.reports_misses(multi_element),
            self.cache.effective_timeout(self.options.timeout),
        )
        .await?;
        finish(key_err, multi_element, plan.requested())
    }
}
