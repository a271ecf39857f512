//! In-memory remote-store adapter.
//!
//! A single-logical-instance implementation of [`RemoteStore`], used as
//! the default wiring and as the test double. A fault switch lets tests
//! exercise the degradation paths without a real outage.

use crate::key::KeyPattern;
use crate::remote::{RemoteEntry, RemoteStore};
use async_trait::async_trait;
use bytes::Bytes;
use rxserve_core::{system_clock, SharedClock};
use rxserve_resilience::BackendError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
struct Slot {
    payload: Bytes,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct LockSlot {
    owner: u128,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Slot>,
    versions: HashMap<String, u64>,
    locks: HashMap<String, LockSlot>,
}

/// In-process [`RemoteStore`].
pub struct InMemoryRemote {
    state: Mutex<State>,
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    failing: AtomicBool,
    clock: SharedClock,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(State::default()),
            channels: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            clock,
        }
    }

    /// Makes every subsequent operation fail with a connection error
    /// until switched back. Test hook for degradation behavior.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let state = self.state.lock().expect("remote state lock poisoned");
        state
            .entries
            .values()
            .filter(|slot| slot.expires_at.is_none_or(|at| at > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::connection("remote store unreachable"))
        } else {
            Ok(())
        }
    }

    fn bump(state: &mut State, key: &str) {
        *state.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn live_entry(state: &State, key: &str, now: Instant) -> Option<RemoteEntry> {
        let slot = state.entries.get(key)?;
        if slot.expires_at.is_some_and(|at| at <= now) {
            return None;
        }
        Some(RemoteEntry {
            payload: slot.payload.clone(),
            version: state.versions.get(key).copied().unwrap_or(0),
        })
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn ping(&self) -> Result<(), BackendError> {
        self.check_available()
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, BackendError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().expect("remote state lock poisoned");
        let entry = Self::live_entry(&state, key, now);
        if entry.is_none() {
            // Expired slots are reaped lazily on read.
            state.entries.remove(key);
        }
        Ok(entry)
    }

    async fn version(&self, key: &str) -> Result<u64, BackendError> {
        self.check_available()?;
        let state = self.state.lock().expect("remote state lock poisoned");
        Ok(state.versions.get(key).copied().unwrap_or(0))
    }

    async fn set(
        &self,
        key: &str,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        self.check_available()?;
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        let mut state = self.state.lock().expect("remote state lock poisoned");
        state
            .entries
            .insert(key.to_string(), Slot { payload, expires_at });
        Self::bump(&mut state, key);
        Ok(())
    }

    async fn set_if_version(
        &self,
        key: &str,
        payload: Bytes,
        ttl: Option<Duration>,
        expected_version: u64,
    ) -> Result<bool, BackendError> {
        self.check_available()?;
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        let mut state = self.state.lock().expect("remote state lock poisoned");
        let current = state.versions.get(key).copied().unwrap_or(0);
        if current != expected_version {
            return Ok(false);
        }
        state
            .entries
            .insert(key.to_string(), Slot { payload, expires_at });
        Self::bump(&mut state, key);
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), BackendError> {
        self.check_available()?;
        let mut state = self.state.lock().expect("remote state lock poisoned");
        if state.entries.remove(key).is_some() {
            Self::bump(&mut state, key);
        }
        Ok(())
    }

    async fn del_by_prefix(&self, prefix: &str) -> Result<u64, BackendError> {
        self.check_available()?;
        let mut state = self.state.lock().expect("remote state lock poisoned");
        let doomed: Vec<String> = state
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            state.entries.remove(key);
            Self::bump(&mut state, key);
        }
        Ok(doomed.len() as u64)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackendError> {
        self.check_available()?;
        let channels = self.channels.lock().expect("channel lock poisoned");
        if let Some(sender) = channels.get(channel) {
            // No subscribers is not an error for a broadcast.
            let _ = sender.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Bytes>, BackendError> {
        self.check_available()?;
        let mut channels = self.channels.lock().expect("channel lock poisoned");
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0);
        Ok(sender.subscribe())
    }

    async fn lock_acquire(
        &self,
        key: &str,
        owner: u128,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().expect("remote state lock poisoned");
        state.locks.retain(|_, slot| slot.expires_at > now);
        match state.locks.get(key) {
            Some(_) => Ok(false),
            None => {
                state.locks.insert(
                    key.to_string(),
                    LockSlot {
                        owner,
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn lock_release(&self, key: &str, owner: u128) -> Result<bool, BackendError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().expect("remote state lock poisoned");
        match state.locks.get(key) {
            Some(slot) if slot.owner == owner && slot.expires_at > now => {
                state.locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_held(&self, key: &str) -> Result<bool, BackendError> {
        self.check_available()?;
        let now = self.clock.now();
        let state = self.state.lock().expect("remote state lock poisoned");
        let held = state.locks.iter().any(|(lock_key, slot)| {
            slot.expires_at > now
                && KeyPattern::parse(lock_key).is_ok_and(|pattern| pattern.covers(key))
        });
        Ok(held)
    }
}
