//! In-process coordinator backed by a HashMap.
//!
//! Mirrors the semantics the engine relies on from Redis: TTL expiry on
//! string keys, lists, and locks; exact-match single-element list removal;
//! counters that read zero when absent. TTLs are measured against
//! `tokio::time::Instant`, so paused-clock tests can advance time
//! deterministically across the zombie boundary.
//!
//! Suitable for single-process deployments and tests. It provides mutual
//! exclusion between tasks of one process only — a cluster needs the Redis
//! backend.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use uuid::Uuid;

use super::{CoordOp, Coordinator};

struct Expiring<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Expiring<V> {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| at > Instant::now())
    }
}

#[derive(Default)]
struct State {
    strings: HashMap<String, Expiring<String>>,
    lists: HashMap<String, Expiring<VecDeque<String>>>,
    counters: HashMap<String, u64>,
    locks: HashMap<String, Expiring<String>>,
}

impl State {
    fn purge(&mut self, key: &str) {
        if self.strings.get(key).is_some_and(|e| !e.live()) {
            self.strings.remove(key);
        }
        if self.lists.get(key).is_some_and(|e| !e.live()) {
            self.lists.remove(key);
        }
        if self.locks.get(key).is_some_and(|e| !e.live()) {
            self.locks.remove(key);
        }
    }

    fn apply(&mut self, op: CoordOp) {
        match op {
            CoordOp::Push { key, value } => self.push(&key, value),
            CoordOp::Remove { key, value } => {
                self.remove(&key, &value);
            }
            CoordOp::SetEx { key, value, ttl } => self.set_ex(&key, value, ttl),
            CoordOp::Expire { key, ttl } => self.expire(&key, ttl),
            CoordOp::Del { key } => self.del(&key),
        }
    }

    fn push(&mut self, key: &str, value: String) {
        self.purge(key);
        self.lists
            .entry(key.to_string())
            .or_insert_with(|| Expiring {
                value: VecDeque::new(),
                expires_at: None,
            })
            .value
            .push_back(value);
    }

    fn remove(&mut self, key: &str, value: &str) -> usize {
        self.purge(key);
        let Some(list) = self.lists.get_mut(key) else {
            return 0;
        };
        match list.value.iter().position(|v| v == value) {
            Some(index) => {
                list.value.remove(index);
                1
            }
            None => 0,
        }
    }

    fn set_ex(&mut self, key: &str, value: String, ttl: Duration) {
        self.strings.insert(
            key.to_string(),
            Expiring {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    fn expire(&mut self, key: &str, ttl: Duration) {
        self.purge(key);
        let expires_at = Some(Instant::now() + ttl);
        if let Some(entry) = self.strings.get_mut(key) {
            entry.expires_at = expires_at;
        }
        if let Some(entry) = self.lists.get_mut(key) {
            entry.expires_at = expires_at;
        }
    }

    fn del(&mut self, key: &str) {
        self.strings.remove(key);
        self.lists.remove(key);
        self.counters.remove(key);
        self.locks.remove(key);
    }
}

/// In-process [`Coordinator`] implementation.
#[derive(Default)]
pub struct MemoryCoordinator {
    state: Mutex<State>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {}", e))
    }
}

#[async_trait::async_trait]
impl Coordinator for MemoryCoordinator {
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<Option<String>> {
        let mut state = self.lock_state()?;
        state.purge(key);
        if state.locks.contains_key(key) {
            return Ok(None);
        }
        let token = Uuid::new_v4().to_string();
        state.locks.insert(
            key.to_string(),
            Expiring {
                value: token.clone(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(Some(token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<()> {
        let mut state = self.lock_state()?;
        state.purge(key);
        if state.locks.get(key).is_some_and(|e| e.value == token) {
            state.locks.remove(key);
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut state = self.lock_state()?;
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        let state = self.lock_state()?;
        Ok(state.counters.get(key).copied().unwrap_or(0))
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock_state()?;
        state.push(key, value.to_string());
        Ok(())
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.lock_state()?;
        state.purge(key);
        Ok(state
            .lists
            .get_mut(key)
            .and_then(|list| list.value.pop_front()))
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<usize> {
        let mut state = self.lock_state()?;
        Ok(state.remove(key, value))
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        let mut state = self.lock_state()?;
        state.purge(key);
        Ok(state
            .lists
            .get(key)
            .map(|list| list.value.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut state = self.lock_state()?;
        state.purge(key);
        Ok(state.lists.get(key).map(|list| list.value.len()).unwrap_or(0))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut state = self.lock_state()?;
        state.set_ex(key, value.to_string(), ttl);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.lock_state()?;
        state.purge(key);
        Ok(state.strings.contains_key(key)
            || state.lists.contains_key(key)
            || state.counters.contains_key(key))
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut state = self.lock_state()?;
        state.del(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut state = self.lock_state()?;
        state.expire(key, ttl);
        Ok(())
    }

    async fn batch(&self, ops: Vec<CoordOp>) -> Result<()> {
        let mut state = self.lock_state()?;
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }
}
