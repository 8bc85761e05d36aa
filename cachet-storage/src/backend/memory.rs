//! In-process backend.
//!
//! Stores scalar and hash entries in a map guarded by an `RwLock`. A whole
//! pipeline executes under one write guard, so batches are atomic with
//! respect to each other. Expired entries are dropped lazily on access.
//!
//! Fault injection: [`InMemoryBackend::fail_key`] makes every command
//! addressing a key fail, [`InMemoryBackend::set_offline`] fails whole
//! pipelines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::BackendError;
use chrono::{DateTime, TimeDelta, Utc};

use super::{Backend, Command, CommandError, CommandResult, Reply};

#[derive(Debug, Clone)]
enum Value {
    Scalar(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Usage counters of an [`InMemoryBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Number of pipelines executed.
    pub pipelines: u64,
    /// Number of commands executed.
    pub commands: u64,
    /// Reads that found a value.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
}

impl BackendStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    pipelines: AtomicU64,
    commands: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// In-memory backend for tests and embedding.
///
/// Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    faults: Arc<RwLock<HashMap<String, String>>>,
    offline: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command on `key` fail with `message`.
    pub fn fail_key(&self, key: impl Into<String>, message: impl Into<String>) -> Result<(), BackendError> {
        self.faults
            .write()
            .map_err(|_| BackendError::LockPoisoned)?
            .insert(key.into(), message.into());
        Ok(())
    }

    /// Undo [`InMemoryBackend::fail_key`].
    pub fn heal_key(&self, key: &str) -> Result<(), BackendError> {
        self.faults
            .write()
            .map_err(|_| BackendError::LockPoisoned)?
            .remove(key);
        Ok(())
    }

    /// While offline every pipeline fails as a whole.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of pipelines executed so far.
    pub fn exec_count(&self) -> u64 {
        self.counters.pipelines.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            pipelines: self.counters.pipelines.load(Ordering::SeqCst),
            commands: self.counters.commands.load(Ordering::SeqCst),
            hits: self.counters.hits.load(Ordering::SeqCst),
            misses: self.counters.misses.load(Ordering::SeqCst),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize, BackendError> {
        let now = Utc::now();
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.values().filter(|e| !e.is_expired(now)).count())
    }

    pub fn is_empty(&self) -> Result<bool, BackendError> {
        Ok(self.len()? == 0)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool, BackendError> {
        let now = Utc::now();
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.get(key).is_some_and(|e| !e.is_expired(now)))
    }

    /// Expiry deadline of a live key. `Ok(None)` for absent or persistent keys.
    pub fn expires_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
        let now = Utc::now();
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at))
    }

    /// Drop all entries.
    pub fn clear(&self) -> Result<(), BackendError> {
        self.entries
            .write()
            .map_err(|_| BackendError::LockPoisoned)?
            .clear();
        Ok(())
    }

    fn record_read(&self, hit: bool) {
        let counter = if hit {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn apply(
        &self,
        entries: &mut HashMap<String, Entry>,
        command: Command,
        now: DateTime<Utc>,
    ) -> CommandResult {
        if entries.get(command.key()).is_some_and(|e| e.is_expired(now)) {
            entries.remove(command.key());
        }

        match command {
            Command::Get { key } => match entries.get(&key).map(|e| &e.value) {
                Some(Value::Scalar(data)) => {
                    self.record_read(true);
                    Ok(Reply::Bytes(data.clone()))
                }
                Some(Value::Hash(_)) => Err(wrong_type("GET", &key)),
                None => {
                    self.record_read(false);
                    Err(CommandError::NotFound)
                }
            },
            Command::Set { key, value, ttl } => {
                entries.insert(key, scalar(value, ttl, now));
                Ok(Reply::Ok)
            }
            Command::SetIfExists { key, value, ttl } => {
                if !entries.contains_key(&key) {
                    return Ok(Reply::Bool(false));
                }
                entries.insert(key, scalar(value, ttl, now));
                Ok(Reply::Bool(true))
            }
            Command::SetIfNotExists { key, value, ttl } => {
                if entries.contains_key(&key) {
                    return Ok(Reply::Bool(false));
                }
                entries.insert(key, scalar(value, ttl, now));
                Ok(Reply::Bool(true))
            }
            Command::HGet { key, field } => match entries.get(&key).map(|e| &e.value) {
                Some(Value::Hash(hash)) => match hash.get(&field) {
                    Some(data) => {
                        self.record_read(true);
                        Ok(Reply::Bytes(data.clone()))
                    }
                    None => {
                        self.record_read(false);
                        Err(CommandError::NotFound)
                    }
                },
                Some(Value::Scalar(_)) => Err(wrong_type("HGET", &key)),
                None => {
                    self.record_read(false);
                    Err(CommandError::NotFound)
                }
            },
            Command::HGetAll { key } => match entries.get(&key).map(|e| &e.value) {
                Some(Value::Hash(hash)) => {
                    self.record_read(!hash.is_empty());
                    let mut pairs: Vec<(String, Vec<u8>)> =
                        hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect();
                    pairs.sort_by(|a, b| a.0.cmp(&b.0));
                    Ok(Reply::Hash(pairs))
                }
                Some(Value::Scalar(_)) => Err(wrong_type("HGETALL", &key)),
                None => {
                    self.record_read(false);
                    Ok(Reply::Hash(Vec::new()))
                }
            },
            Command::HMGet { key, fields } => match entries.get(&key).map(|e| &e.value) {
                Some(Value::Hash(hash)) => {
                    let values: Vec<Option<Vec<u8>>> =
                        fields.iter().map(|f| hash.get(f).cloned()).collect();
                    for value in &values {
                        self.record_read(value.is_some());
                    }
                    Ok(Reply::Fields(values))
                }
                Some(Value::Scalar(_)) => Err(wrong_type("HMGET", &key)),
                None => {
                    for _ in &fields {
                        self.record_read(false);
                    }
                    Ok(Reply::Fields(vec![None; fields.len()]))
                }
            },
            Command::HSet { key, field, value } => {
                let hash = hash_entry(entries, &key)?;
                let created = hash.insert(field, value).is_none();
                Ok(Reply::Int(i64::from(created)))
            }
            Command::HSetIfNotExists { key, field, value } => {
                let hash = hash_entry(entries, &key)?;
                if hash.contains_key(&field) {
                    return Ok(Reply::Bool(false));
                }
                hash.insert(field, value);
                Ok(Reply::Bool(true))
            }
            Command::Expire { key, ttl } => match entries.get_mut(&key) {
                Some(entry) => {
                    entry.expires_at = deadline(now, ttl);
                    Ok(Reply::Bool(true))
                }
                None => Ok(Reply::Bool(false)),
            },
            Command::Del { key } => Ok(Reply::Int(i64::from(entries.remove(&key).is_some()))),
        }
    }
}

fn scalar(value: Vec<u8>, ttl: Option<Duration>, now: DateTime<Utc>) -> Entry {
    Entry {
        value: Value::Scalar(value),
        expires_at: ttl.and_then(|ttl| deadline(now, ttl)),
    }
}

/// `now + ttl`, or `None` if the deadline is not representable.
fn deadline(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}

fn hash_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<&'a mut HashMap<String, Vec<u8>>, CommandError> {
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Hash(HashMap::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Hash(hash) => Ok(hash),
        Value::Scalar(_) => Err(wrong_type("HSET", key)),
    }
}

fn wrong_type(command: &str, key: &str) -> CommandError {
    CommandError::Failed(BackendError::CommandFailed {
        command: command.to_string(),
        key: key.to_string(),
        reason: "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    })
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<CommandResult>, BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Connection {
                reason: "backend offline".to_string(),
            });
        }
        self.counters.pipelines.fetch_add(1, Ordering::SeqCst);
        self.counters
            .commands
            .fetch_add(commands.len() as u64, Ordering::SeqCst);

        let faults = self
            .faults
            .read()
            .map_err(|_| BackendError::LockPoisoned)?
            .clone();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| BackendError::LockPoisoned)?;
        let now = Utc::now();

        let results = commands
            .into_iter()
            .map(|command| match faults.get(command.key()) {
                Some(reason) => Err(CommandError::Failed(BackendError::CommandFailed {
                    command: command.name().to_string(),
                    key: command.key().to_string(),
                    reason: reason.clone(),
                })),
                None => self.apply(&mut entries, command, now),
            })
            .collect();
        Ok(results)
    }
}
