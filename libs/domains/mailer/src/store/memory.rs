//! In-memory store for tests.

use super::QueueStore;
use crate::clock::{Clock, SystemClock};
use crate::error::MailerError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct ValueEntry {
    data: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, ValueEntry>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-process fake store with lazy TTL expiry.
///
/// Every operation takes one lock, so each trait method is atomic exactly
/// like its Redis counterpart. Pair with [`crate::ManualClock`] to test
/// retention windows without sleeping.
pub struct MemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store on an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("store lock poisoned")
    }

    /// Read a live value, pruning it if expired.
    fn live_value<'a>(state: &'a mut State, key: &str, now: DateTime<Utc>) -> Option<&'a ValueEntry> {
        let expired = state
            .values
            .get(key)
            .is_some_and(|entry| entry.expires_at.is_some_and(|t| t <= now));
        if expired {
            state.values.remove(key);
        }
        state.values.get(key)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MailerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        Ok(Self::live_value(&mut state, key, now).map(|entry| entry.data.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MailerError> {
        let mut state = self.lock();
        state.values.insert(
            key.to_string(),
            ValueEntry {
                data: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), MailerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.values.insert(
            key.to_string(),
            ValueEntry {
                data: value.to_string(),
                expires_at: Some(now + Duration::seconds(ttl_secs as i64)),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, MailerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if Self::live_value(&mut state, key, now).is_some() {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            ValueEntry {
                data: value.to_string(),
                expires_at: Some(now + Duration::seconds(ttl_secs as i64)),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), MailerError> {
        let mut state = self.lock();
        state.values.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, MailerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let current = Self::live_value(&mut state, key, now)
            .and_then(|entry| entry.data.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        let expires_at = state.values.get(key).and_then(|entry| entry.expires_at);
        state.values.insert(
            key.to_string(),
            ValueEntry {
                data: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn list_push_back(&self, key: &str, value: &str) -> Result<(), MailerError> {
        let mut state = self.lock();
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, MailerError> {
        let state = self.lock();
        let Some(list) = state.lists.get(key) else {
            return Ok(vec![]);
        };

        let len = list.len() as isize;
        let resolve = |idx: isize| -> isize {
            if idx < 0 {
                (len + idx).max(0)
            } else {
                idx
            }
        };
        let start = resolve(start);
        let stop = resolve(stop).min(len - 1);
        if len == 0 || start > stop {
            return Ok(vec![]);
        }

        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<usize, MailerError> {
        let mut state = self.lock();
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(0);
        };
        match list.iter().position(|item| item == value) {
            Some(idx) => {
                list.remove(idx);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_len(&self, key: &str) -> Result<usize, MailerError> {
        let state = self.lock();
        Ok(state.lists.get(key).map_or(0, |list| list.len()))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, MailerError> {
        let mut state = self.lock();
        Ok(state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, MailerError> {
        let mut state = self.lock();
        Ok(state
            .sets
            .get_mut(key)
            .is_some_and(|set| set.remove(member)))
    }

    async fn set_len(&self, key: &str) -> Result<usize, MailerError> {
        let state = self.lock();
        Ok(state.sets.get(key).map_or(0, |set| set.len()))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, MailerError> {
        let state = self.lock();
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}
