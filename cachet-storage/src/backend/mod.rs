//! Key-value backend abstraction.
//!
//! The cache talks to the store exclusively through [`Backend::exec`], which
//! submits a batch of commands in one round trip and returns one outcome per
//! command. "Not found" is a distinct per-command outcome, never an error of
//! the whole batch.

mod memory;

pub use memory::{BackendStats, InMemoryBackend};

use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{BackendError, CacheError, CacheResult};
use thiserror::Error;

/// One store command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get {
        key: String,
    },
    /// Unconditional write. `ttl == None` stores without expiry.
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    /// Write only if the key exists. Replies `Bool(written)`.
    SetIfExists {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    /// Write only if the key is absent. Replies `Bool(written)`.
    SetIfNotExists {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    HGet {
        key: String,
        field: String,
    },
    /// Replies `Hash`; an absent key is an empty hash.
    HGetAll {
        key: String,
    },
    /// Replies `Fields` in request order; absent fields are `None`.
    HMGet {
        key: String,
        fields: Vec<String>,
    },
    HSet {
        key: String,
        field: String,
        value: Vec<u8>,
    },
    HSetIfNotExists {
        key: String,
        field: String,
        value: Vec<u8>,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    Del {
        key: String,
    },
}

impl Command {
    /// Command name as the store spells it.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::SetIfExists { .. } => "SET XX",
            Command::SetIfNotExists { .. } => "SET NX",
            Command::HGet { .. } => "HGET",
            Command::HGetAll { .. } => "HGETALL",
            Command::HMGet { .. } => "HMGET",
            Command::HSet { .. } => "HSET",
            Command::HSetIfNotExists { .. } => "HSETNX",
            Command::Expire { .. } => "EXPIRE",
            Command::Del { .. } => "DEL",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Get { key }
            | Command::Set { key, .. }
            | Command::SetIfExists { key, .. }
            | Command::SetIfNotExists { key, .. }
            | Command::HGet { key, .. }
            | Command::HGetAll { key }
            | Command::HMGet { key, .. }
            | Command::HSet { key, .. }
            | Command::HSetIfNotExists { key, .. }
            | Command::Expire { key, .. }
            | Command::Del { key } => key,
        }
    }
}

/// Successful outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Bytes(Vec<u8>),
    Hash(Vec<(String, Vec<u8>)>),
    Fields(Vec<Option<Vec<u8>>>),
    Bool(bool),
    Int(i64),
    Ok,
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Bytes(_) => "bytes",
            Reply::Hash(_) => "hash",
            Reply::Fields(_) => "fields",
            Reply::Bool(_) => "bool",
            Reply::Int(_) => "int",
            Reply::Ok => "ok",
        }
    }
}

/// Failed outcome of one command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Failed(#[from] BackendError),
}

pub type CommandResult = Result<Reply, CommandError>;

/// Pipelined key-value store.
///
/// Implementations must return exactly one result per submitted command, in
/// submission order. An `Err` from [`Backend::exec`] means the batch as a
/// whole could not be executed.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a batch of commands in one round trip.
    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<CommandResult>, BackendError>;

    /// Execute a single command.
    async fn exec_one(&self, command: Command) -> Result<CommandResult, BackendError> {
        let mut replies = self.exec(vec![command]).await?;
        match (replies.pop(), replies.len()) {
            (Some(reply), 0) => Ok(reply),
            (reply, rest) => Err(BackendError::PipelineMismatch {
                sent: 1,
                received: rest + usize::from(reply.is_some()),
            }),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let command = Command::Get {
            key: key.to_string(),
        };
        match self.exec_one(command).await? {
            Ok(Reply::Bytes(data)) => Ok(Some(data)),
            Err(CommandError::NotFound) => Ok(None),
            Err(CommandError::Failed(e)) => Err(e),
            Ok(other) => Err(unexpected("GET", key, &other)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), BackendError> {
        let command = Command::Set {
            key: key.to_string(),
            value,
            ttl,
        };
        match self.exec_one(command).await? {
            Ok(_) | Err(CommandError::NotFound) => Ok(()),
            Err(CommandError::Failed(e)) => Err(e),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let command = Command::HGet {
            key: key.to_string(),
            field: field.to_string(),
        };
        match self.exec_one(command).await? {
            Ok(Reply::Bytes(data)) => Ok(Some(data)),
            Err(CommandError::NotFound) => Ok(None),
            Err(CommandError::Failed(e)) => Err(e),
            Ok(other) => Err(unexpected("HGET", key, &other)),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        let command = Command::HGetAll {
            key: key.to_string(),
        };
        match self.exec_one(command).await? {
            Ok(Reply::Hash(pairs)) => Ok(pairs),
            Err(CommandError::NotFound) => Ok(Vec::new()),
            Err(CommandError::Failed(e)) => Err(e),
            Ok(other) => Err(unexpected("HGETALL", key, &other)),
        }
    }

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, BackendError> {
        let command = Command::Del {
            key: key.to_string(),
        };
        match self.exec_one(command).await? {
            Ok(Reply::Int(n)) => Ok(n > 0),
            Ok(Reply::Bool(existed)) => Ok(existed),
            Ok(_) => Ok(true),
            Err(CommandError::NotFound) => Ok(false),
            Err(CommandError::Failed(e)) => Err(e),
        }
    }
}

pub(crate) fn unexpected(command: &str, key: &str, reply: &Reply) -> BackendError {
    BackendError::UnexpectedReply {
        command: command.to_string(),
        key: key.to_string(),
        reply: reply.kind().to_string(),
    }
}

/// Run one pipeline under an optional deadline.
///
/// Checks that the backend answered every command.
pub(crate) async fn run_pipeline<B: Backend + ?Sized>(
    backend: &B,
    commands: Vec<Command>,
    timeout: Option<Duration>,
) -> CacheResult<Vec<CommandResult>> {
    let sent = commands.len();
    let replies = match timeout {
        Some(after) => tokio::time::timeout(after, backend.exec(commands))
            .await
            .map_err(|_| CacheError::Timeout { after })??,
        None => backend.exec(commands).await?,
    };
    if replies.len() != sent {
        return Err(BackendError::PipelineMismatch {
            sent,
            received: replies.len(),
        }
        .into());
    }
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_and_key() {
        let cmd = Command::HMGet {
            key: "h".to_string(),
            fields: vec!["a".to_string()],
        };
        assert_eq!(cmd.name(), "HMGET");
        assert_eq!(cmd.key(), "h");
        assert_eq!(
            Command::Del {
                key: "k".to_string()
            }
            .name(),
            "DEL"
        );
    }

    #[test]
    fn test_command_error_from_backend_error() {
        let err: CommandError = BackendError::LockPoisoned.into();
        assert_eq!(err, CommandError::Failed(BackendError::LockPoisoned));
        assert_eq!(err.to_string(), "Backend lock poisoned");
    }

    #[tokio::test]
    async fn test_provided_helpers_round_trip() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.get("k").await.unwrap(), None);

        backend.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));

        assert!(backend.del("k").await.unwrap());
        assert!(!backend.del("k").await.unwrap());
        assert!(backend.hget_all("missing").await.unwrap().is_empty());
        assert_eq!(backend.hget("missing", "f").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_pipeline_times_out() {
        struct Stalled;

        #[async_trait]
        impl Backend for Stalled {
            async fn exec(&self, _commands: Vec<Command>) -> Result<Vec<CommandResult>, BackendError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }
        }

        let after = Duration::from_millis(10);
        let err = run_pipeline(&Stalled, vec![Command::Get { key: "k".to_string() }], Some(after))
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::Timeout { after });
    }

    #[tokio::test]
    async fn test_run_pipeline_detects_short_reply() {
        struct Short;

        #[async_trait]
        impl Backend for Short {
            async fn exec(&self, _commands: Vec<Command>) -> Result<Vec<CommandResult>, BackendError> {
                Ok(vec![Err(CommandError::NotFound)])
            }
        }

        let commands = vec![
            Command::Get { key: "a".to_string() },
            Command::Get { key: "b".to_string() },
        ];
        let err = run_pipeline(&Short, commands, None).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::Backend(BackendError::PipelineMismatch { sent: 2, received: 1 })
        );
    }
}
