use crate::clock::{Clock, SystemClock};
use crate::store::{KeyValueStore, StoreError, WindowSnapshot, glob_match};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
    /// (score, member), kept sorted by score.
    SortedSet(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Embedded single-process backend. Every lock acquisition covers a whole
/// operation, so each call is atomic just like a Redis command or MULTI block.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn expiry(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(ttl).ok().map(|ttl| self.clock.now() + ttl)
    }

    /// Number of live keys. Test helper.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.lock().await.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!("WRONGTYPE operation against key {}", key))
}

/// Drops the entry if it has expired, mirroring passive expiry.
fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            Some(Entry { value: Value::Str(value), .. }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.expiry(ttl);
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_ex_if_exists(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                entry.value = Value::Str(value.to_string());
                entry.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let mut deleted = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key)
                && entry.is_live(now)
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key, now).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            Some(Entry { value: Value::Set(members), .. }) => {
                members.insert(member.to_string());
            }
            Some(_) => return Err(wrong_type(key)),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(BTreeSet::from([member.to_string()])),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let now_empty = match live_entry(&mut entries, key, now) {
            Some(Entry { value: Value::Set(members), .. }) => {
                members.remove(member);
                members.is_empty()
            }
            Some(_) => return Err(wrong_type(key)),
            None => false,
        };
        // Redis deletes a set once its last member is gone.
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            Some(Entry { value: Value::Set(members), .. }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn record_window_hit(&self, key: &str, window_start_ms: i64, now_ms: i64, member: &str, ttl: Duration) -> Result<WindowSnapshot, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().await;

        if live_entry(&mut entries, key, now).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::SortedSet(Vec::new()),
                    expires_at: None,
                },
            );
        }
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::Command(format!("failed to initialise window {}", key)))?;
        let Value::SortedSet(hits) = &mut entry.value else {
            return Err(wrong_type(key));
        };

        hits.retain(|(score, _)| *score > window_start_ms);
        let snapshot = WindowSnapshot {
            count: hits.len() as u64,
            oldest_ms: hits.first().map(|(score, _)| *score),
        };

        let position = hits.partition_point(|(score, _)| *score <= now_ms);
        hits.insert(position, (now_ms, member.to_string()));
        entry.expires_at = expires_at;

        Ok(snapshot)
    }
}
