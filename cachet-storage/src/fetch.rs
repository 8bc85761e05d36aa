//! Batched reads.
//!
//! Every read is one pipeline: GET per scalar key, HGETALL per hash key
//! without explicit fields, HMGET per hash key with fields. Outcomes are
//! folded into the destination or the per-key error aggregate in response
//! order; nothing short-circuits a batch except a failure of the pipeline as
//! a whole.

use std::collections::HashMap;
use std::time::Duration;

use cachet_core::{CacheError, CacheResult, CodecError, KeyErr, KeyFailure, Marshaller, Serializer};
use tracing::debug;

use crate::backend::{run_pipeline, unexpected, Backend, Command, CommandError, CommandResult, Reply};
use crate::container::{CacheValue, Container};

/// Per-call read options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Record absent keys as misses for every destination shape.
    pub report_misses: bool,
    /// Do not record misses for single-value destinations.
    pub disable_single_dst_miss_errors: bool,
    /// Deadline per round trip; falls back to the configured default.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Whether absent keys are recorded for a destination of this shape.
    pub fn reports_misses(&self, multi_element: bool) -> bool {
        self.report_misses || (!multi_element && !self.disable_single_dst_miss_errors)
    }
}

/// What to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPlan {
    /// Scalar keys.
    Keys(Vec<String>),
    /// Hash keys with the fields to read; no fields means the whole hash.
    Hashes(Vec<(String, Vec<String>)>),
}

impl ReadPlan {
    pub fn keys<K: AsRef<str>>(keys: &[K]) -> Self {
        ReadPlan::Keys(keys.iter().map(|k| k.as_ref().to_string()).collect())
    }

    pub fn hash_all(key: &str) -> Self {
        ReadPlan::Hashes(vec![(key.to_string(), Vec::new())])
    }

    pub fn hash_fields<F: AsRef<str>>(key: &str, fields: &[F]) -> Self {
        ReadPlan::Hashes(vec![(
            key.to_string(),
            fields.iter().map(|f| f.as_ref().to_string()).collect(),
        )])
    }

    /// Hash keys are read in sorted order.
    pub fn hashes(keys_and_fields: &HashMap<String, Vec<String>>) -> Self {
        let mut hashes: Vec<(String, Vec<String>)> = keys_and_fields
            .iter()
            .map(|(key, fields)| (key.clone(), fields.clone()))
            .collect();
        hashes.sort_by(|a, b| a.0.cmp(&b.0));
        ReadPlan::Hashes(hashes)
    }

    /// Number of addressed values; a whole-hash read counts once.
    pub fn requested(&self) -> usize {
        match self {
            ReadPlan::Keys(keys) => keys.len(),
            ReadPlan::Hashes(hashes) => hashes.iter().map(|(_, fields)| fields.len().max(1)).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ReadPlan::Keys(keys) => keys.is_empty(),
            ReadPlan::Hashes(hashes) => hashes.is_empty(),
        }
    }

    fn commands(&self) -> Vec<Command> {
        match self {
            ReadPlan::Keys(keys) => keys
                .iter()
                .map(|key| Command::Get { key: key.clone() })
                .collect(),
            ReadPlan::Hashes(hashes) => hashes
                .iter()
                .map(|(key, fields)| {
                    if fields.is_empty() {
                        Command::HGetAll { key: key.clone() }
                    } else {
                        Command::HMGet {
                            key: key.clone(),
                            fields: fields.clone(),
                        }
                    }
                })
                .collect(),
        }
    }
}

/// Run one batched read into `dst`.
///
/// Call-level failures (transport, timeout, reply count) are returned as
/// `Err`; per-key failures are returned in the aggregate, which is empty when
/// everything was found.
pub async fn fetch<B, S, T>(
    backend: &B,
    marshaller: &Marshaller<S>,
    dst: &mut Container<'_, T>,
    plan: &ReadPlan,
    report_misses: bool,
    timeout: Option<Duration>,
) -> CacheResult<KeyErr>
where
    B: Backend + ?Sized,
    S: Serializer,
    T: CacheValue,
{
    let mut key_err = KeyErr::new();
    if plan.is_empty() {
        return Ok(key_err);
    }

    let commands = plan.commands();
    debug!(
        commands = commands.len(),
        destination = %dst.kind(),
        report_misses,
        "fetching batch"
    );
    let replies = run_pipeline(backend, commands, timeout).await?;
    dst.init_with_size(plan.requested());

    let mut batch = Batch {
        marshaller,
        dst,
        key_err: &mut key_err,
        report_misses,
    };
    match plan {
        ReadPlan::Keys(keys) => {
            for (key, reply) in keys.iter().zip(replies) {
                batch.scalar(key, reply);
            }
        }
        ReadPlan::Hashes(hashes) => {
            for ((key, fields), reply) in hashes.iter().zip(replies) {
                if fields.is_empty() {
                    batch.hash_all(key, reply);
                } else {
                    batch.hash_fields(key, fields, reply);
                }
            }
        }
    }

    debug!(
        errors = key_err.len(),
        misses = key_err.cache_miss_errs_count(),
        "batch complete"
    );
    Ok(key_err)
}

/// Turn a batch aggregate into the result a plain read returns.
///
/// A lone miss for a single-value destination reading exactly one value
/// becomes [`CacheError::CacheMiss`].
pub fn finish(key_err: KeyErr, multi_element: bool, requested: usize) -> CacheResult<()> {
    if !multi_element && requested == 1 && key_err.len() == 1 && key_err.cache_miss_errs_count() == 1 {
        return Err(CacheError::CacheMiss);
    }
    key_err.into_result().map_err(CacheError::Keys)
}

struct Batch<'b, 'd, S, T> {
    marshaller: &'b Marshaller<S>,
    dst: &'b mut Container<'d, T>,
    key_err: &'b mut KeyErr,
    report_misses: bool,
}

impl<S: Serializer, T: CacheValue> Batch<'_, '_, S, T> {
    fn decode(&mut self, key: &str, field: &str, data: &[u8]) -> Result<(), CodecError> {
        let mut el = self.dst.dst_el();
        self.marshaller.unmarshal(data, &mut el)?;
        self.dst.add_element(key, field, el);
        Ok(())
    }

    fn miss(&mut self, key: &str, field: Option<&str>) {
        if !self.report_misses {
            return;
        }
        match field {
            Some(field) => self.key_err.add_error_for_key_and_field(key, field, KeyFailure::Miss),
            None => self.key_err.add_error_for_key(key, KeyFailure::Miss),
        }
    }

    fn scalar(&mut self, key: &str, reply: CommandResult) {
        match reply {
            Ok(Reply::Bytes(data)) => {
                if let Err(e) = self.decode(key, "", &data) {
                    self.key_err.add_error_for_key(key, e.into());
                }
            }
            Err(CommandError::NotFound) => self.miss(key, None),
            Err(CommandError::Failed(e)) => self.key_err.add_error_for_key(key, e.into()),
            Ok(other) => self
                .key_err
                .add_error_for_key(key, unexpected("GET", key, &other).into()),
        }
    }

    fn hash_all(&mut self, key: &str, reply: CommandResult) {
        match reply {
            Ok(Reply::Hash(pairs)) if pairs.is_empty() => self.miss(key, None),
            Ok(Reply::Hash(pairs)) => {
                for (field, data) in pairs {
                    if let Err(e) = self.decode(key, &field, &data) {
                        self.key_err.add_error_for_key_and_field(key, &field, e.into());
                    }
                }
            }
            Err(CommandError::NotFound) => self.miss(key, None),
            Err(CommandError::Failed(e)) => self.key_err.add_error_for_key(key, e.into()),
            Ok(other) => self
                .key_err
                .add_error_for_key(key, unexpected("HGETALL", key, &other).into()),
        }
    }

    fn hash_fields(&mut self, key: &str, fields: &[String], reply: CommandResult) {
        match reply {
            Ok(Reply::Fields(values)) if values.len() == fields.len() => {
                for (field, value) in fields.iter().zip(values) {
                    match value {
                        Some(data) => {
                            if let Err(e) = self.decode(key, field, &data) {
                                self.key_err.add_error_for_key_and_field(key, field, e.into());
                            }
                        }
                        None => self.miss(key, Some(field)),
                    }
                }
            }
            Err(CommandError::NotFound) => {
                for field in fields {
                    self.miss(key, Some(field));
                }
            }
            Err(CommandError::Failed(e)) => {
                for field in fields {
                    self.key_err
                        .add_error_for_key_and_field(key, field, e.clone().into());
                }
            }
            Ok(other) => {
                let err = unexpected("HMGET", key, &other);
                for field in fields {
                    self.key_err
                        .add_error_for_key_and_field(key, field, err.clone().into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use cachet_core::{BackendError, JsonSerializer};

    fn marshaller() -> Marshaller<JsonSerializer> {
        Marshaller::default()
    }

    async fn seeded() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend
            .exec(vec![
                Command::Set {
                    key: "k1".to_string(),
                    value: b"v1".to_vec(),
                    ttl: None,
                },
                Command::Set {
                    key: "k2".to_string(),
                    value: b"v2".to_vec(),
                    ttl: None,
                },
                Command::Set {
                    key: "num".to_string(),
                    value: b"not a number".to_vec(),
                    ttl: None,
                },
                Command::HSet {
                    key: "h".to_string(),
                    field: "a".to_string(),
                    value: b"1".to_vec(),
                },
                Command::HSet {
                    key: "h".to_string(),
                    field: "b".to_string(),
                    value: b"2".to_vec(),
                },
            ])
            .await
            .unwrap();
        backend
    }

    #[test]
    fn test_reports_misses() {
        let defaults = RequestOptions::default();
        assert!(defaults.reports_misses(false));
        assert!(!defaults.reports_misses(true));

        let opted_in = RequestOptions {
            report_misses: true,
            ..Default::default()
        };
        assert!(opted_in.reports_misses(true));

        let disabled = RequestOptions {
            disable_single_dst_miss_errors: true,
            ..Default::default()
        };
        assert!(!disabled.reports_misses(false));
    }

    #[test]
    fn test_plan_requested() {
        assert_eq!(ReadPlan::keys(&["a", "b"]).requested(), 2);
        assert_eq!(ReadPlan::hash_all("h").requested(), 1);
        assert_eq!(ReadPlan::hash_fields("h", &["a", "b", "c"]).requested(), 3);
    }

    #[tokio::test]
    async fn test_partial_batch_reports_one_miss() {
        let backend = seeded().await;
        let mut dst: HashMap<String, String> = HashMap::new();
        let mut container = Container::from(&mut dst);
        let key_err = fetch(
            &backend,
            &marshaller(),
            &mut container,
            &ReadPlan::keys(&["k1", "absent", "k2"]),
            true,
            None,
        )
        .await
        .unwrap();

        assert_eq!(key_err.len(), 1);
        assert_eq!(key_err.cache_miss_errs_count(), 1);
        assert!(!key_err.has_non_cache_miss_errs());
        assert_eq!(dst.len(), 2);
        assert_eq!(dst["k2"], "v2");
    }

    #[tokio::test]
    async fn test_misses_suppressed_without_reporting() {
        let backend = seeded().await;
        let mut dst: Vec<String> = Vec::new();
        let key_err = fetch(
            &backend,
            &marshaller(),
            &mut Container::from(&mut dst),
            &ReadPlan::keys(&["absent", "k1"]),
            false,
            None,
        )
        .await
        .unwrap();
        assert!(key_err.is_empty());
        assert_eq!(dst, vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_failure_is_hard_error() {
        let backend = seeded().await;
        let mut dst: HashMap<String, i64> = HashMap::new();
        let key_err = fetch(
            &backend,
            &marshaller(),
            &mut Container::from(&mut dst),
            &ReadPlan::keys(&["num"]),
            false,
            None,
        )
        .await
        .unwrap();
        assert!(key_err.has_non_cache_miss_errs());
        assert!(matches!(key_err.get("num"), Some(KeyFailure::Decode(_))));
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_recorded_per_key() {
        let backend = seeded().await;
        backend.fail_key("k2", "connection reset").unwrap();
        let mut dst: HashMap<String, String> = HashMap::new();
        let key_err = fetch(
            &backend,
            &marshaller(),
            &mut Container::from(&mut dst),
            &ReadPlan::keys(&["k1", "k2"]),
            false,
            None,
        )
        .await
        .unwrap();
        assert_eq!(key_err.len(), 1);
        assert!(matches!(key_err.get("k2"), Some(KeyFailure::Backend(_))));
        assert_eq!(dst["k1"], "v1");
    }

    #[tokio::test]
    async fn test_hmget_misses_by_field() {
        let backend = seeded().await;
        let mut dst: HashMap<String, u32> = HashMap::new();
        let key_err = fetch(
            &backend,
            &marshaller(),
            &mut Container::from(&mut dst),
            &ReadPlan::hash_fields("h", &["a", "zz"]),
            true,
            None,
        )
        .await
        .unwrap();
        assert_eq!(dst.get("h/a"), Some(&1));
        assert_eq!(key_err.missed_keys(), vec!["h/zz".to_string()]);
    }

    #[tokio::test]
    async fn test_hgetall_into_nested_map() {
        let backend = seeded().await;
        let mut dst: HashMap<String, HashMap<String, u32>> = HashMap::new();
        let key_err = fetch(
            &backend,
            &marshaller(),
            &mut Container::nested(&mut dst),
            &ReadPlan::hashes(&HashMap::from([
                ("h".to_string(), Vec::new()),
                ("absent".to_string(), Vec::new()),
            ])),
            true,
            None,
        )
        .await
        .unwrap();
        assert_eq!(dst["h"]["a"], 1);
        assert_eq!(dst["h"]["b"], 2);
        assert_eq!(key_err.missed_keys(), vec!["absent".to_string()]);
    }

    #[tokio::test]
    async fn test_offline_backend_is_call_level_error() {
        let backend = seeded().await;
        backend.set_offline(true);
        let mut dst: Vec<String> = Vec::new();
        let err = fetch(
            &backend,
            &marshaller(),
            &mut Container::from(&mut dst),
            &ReadPlan::keys(&["k1"]),
            true,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CacheError::Backend(BackendError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_empty_plan_sends_nothing() {
        let backend = InMemoryBackend::new();
        let mut dst: Vec<String> = Vec::new();
        let empty: [&str; 0] = [];
        let key_err = fetch(
            &backend,
            &marshaller(),
            &mut Container::from(&mut dst),
            &ReadPlan::keys(&empty),
            true,
            None,
        )
        .await
        .unwrap();
        assert!(key_err.is_empty());
        assert_eq!(backend.exec_count(), 0);
    }

    #[test]
    fn test_finish_collapses_lone_scalar_miss() {
        let mut key_err = KeyErr::new();
        key_err.add_error_for_key("k", KeyFailure::Miss);
        assert_eq!(finish(key_err.clone(), false, 1), Err(CacheError::CacheMiss));
        assert_eq!(finish(key_err.clone(), true, 1), Err(CacheError::Keys(key_err.clone())));
        assert_eq!(finish(key_err.clone(), false, 2), Err(CacheError::Keys(key_err)));
        assert_eq!(finish(KeyErr::new(), false, 1), Ok(()));
    }
}
