#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cachet_storage::{
    create_key, Backend, BackendError, Cache, CacheConfig, Command, CommandResult,
    InMemoryBackend, Reply,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const USER_ID_PREFIX: &str = "usr-by-id";
pub const DEPARTMENT_PREFIX: &str = "usr-by-dpmt";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub department: String,
}

pub fn random_user() -> User {
    let id = Uuid::now_v7().simple().to_string();
    User {
        name: format!("user-{}", &id[id.len() - 6..]),
        department: format!("dept-{}", &id[id.len() - 3..]),
        id,
    }
}

pub fn random_users(n: usize) -> Vec<User> {
    (0..n).map(|_| random_user()).collect()
}

pub fn user_by_id_key(id: &str) -> String {
    create_key(USER_ID_PREFIX, id, &[])
}

pub fn user_by_department_key(department: &str) -> String {
    create_key(DEPARTMENT_PREFIX, department, &[])
}

pub fn users_by_id(users: &[User]) -> HashMap<String, User> {
    users.iter().map(|u| (u.id.clone(), u.clone())).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memory_cache() -> (Arc<InMemoryBackend>, Cache<InMemoryBackend>) {
    init_tracing();
    let backend = Arc::new(InMemoryBackend::new());
    let cache = Cache::new(Arc::clone(&backend), CacheConfig::default())
        .expect("default config is valid");
    (backend, cache)
}

/// Backend answering each pipeline from a script.
///
/// Pipelines beyond the script are answered with `Reply::Ok` per command.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<Vec<CommandResult>, BackendError>>>,
    received: Mutex<Vec<Vec<Command>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, replies: Vec<CommandResult>) -> Self {
        self.script.lock().unwrap().push_back(Ok(replies));
        self
    }

    pub fn then_fail(self, err: BackendError) -> Self {
        self.script.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn received(&self) -> Vec<Vec<Command>> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<CommandResult>, BackendError> {
        let count = commands.len();
        self.received.lock().unwrap().push(commands);
        match self.script.lock().unwrap().pop_front() {
            Some(next) => next,
            None => Ok((0..count).map(|_| Ok(Reply::Ok)).collect()),
        }
    }
}

pub fn scripted_cache(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, Cache<ScriptedBackend>) {
    init_tracing();
    let backend = Arc::new(backend);
    let cache = Cache::new(Arc::clone(&backend), CacheConfig::default())
        .expect("default config is valid");
    (backend, cache)
}
