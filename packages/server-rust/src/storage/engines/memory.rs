//! In-process [`CounterStore`] backed by [`DashMap`].
//!
//! Keys expire lazily: an expired entry is treated as absent by every
//! operation and removed the next time it is touched. Expiry uses
//! `tokio::time::Instant`, so tests can drive TTLs with a paused clock.
//!
//! This backend only gives a consistent view inside one process. Multi-instance
//! deployments must use the Redis backend.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use fitsync_core::{CounterStore, StoreError};
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Slot {
    Bytes(Bytes),
    Counter(i64),
    List(VecDeque<Bytes>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Concurrent in-memory counter/cache/list store.
///
/// Every mutating operation runs under the owning `DashMap` shard lock, so
/// `incr_with_ttl` and `list_append_bounded` are atomic with respect to each
/// other.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCounterStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before - self.entries.len()
    }

    fn remove_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, e| !e.is_live(now));
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        let found = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.slot {
                Slot::Bytes(b) => Some(b.clone()),
                Slot::Counter(n) => Some(Bytes::from(n.to_string())),
                Slot::List(_) => {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                    })
                }
            },
            Some(_) => None,
            None => return Ok(None),
        };
        if found.is_none() {
            self.remove_if_expired(key, now);
        }
        Ok(found)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Bytes(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = Instant::now();
        let fresh = || Entry {
            slot: Slot::Counter(1),
            expires_at: Some(now + ttl),
        };

        match self.entries.entry(key.to_string()) {
            MapEntry::Vacant(vacant) => {
                vacant.insert(fresh());
                Ok(1)
            }
            MapEntry::Occupied(mut occupied) => {
                if !occupied.get().is_live(now) {
                    occupied.insert(fresh());
                    return Ok(1);
                }
                let entry = occupied.get_mut();
                let next = match &entry.slot {
                    Slot::Counter(n) => n + 1,
                    Slot::Bytes(raw) => std::str::from_utf8(raw)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| StoreError::WrongType {
                            key: key.to_string(),
                        })?
                        + 1,
                    Slot::List(_) => {
                        return Err(StoreError::WrongType {
                            key: key.to_string(),
                        })
                    }
                };
                entry.slot = Slot::Counter(next);
                Ok(next)
            }
        }
    }

    async fn list_append_bounded(
        &self,
        key: &str,
        value: Bytes,
        max_len: usize,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        });
        if !entry.is_live(now) {
            *entry = Entry {
                slot: Slot::List(VecDeque::new()),
                expires_at: None,
            };
        }
        let Slot::List(list) = &mut entry.slot else {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        };
        list.push_back(value);
        while list.len() > max_len {
            list.pop_front();
        }
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Bytes>, StoreError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.slot {
                Slot::List(list) => Ok(list.iter().cloned().collect()),
                _ => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
