//! Storage medium trait and the in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised by a storage medium.
#[derive(Debug, Error)]
pub enum MediumError {
    /// The medium cannot be used at all (quota exhausted, permission
    /// denied). The store degrades to in-memory on this variant.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A single operation failed but the medium itself is usable.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// What an [`SessionMedium::update`] closure decided to do with the
/// stored value.
pub enum UpdateDecision {
    /// Replace the stored value.
    Write(String),
    /// Leave the stored value untouched.
    Keep,
}

/// A key-value storage medium holding the persisted session.
///
/// `update` is the transactional seam: media with native transactions
/// must run the closure inside one so that concurrent updates for the
/// same key serialize. The provided default implementation is a plain
/// read-then-write; on such media a narrow read/write race window
/// remains and the stale-write guard is the sole protection. That
/// limitation is accepted, not patched around.
pub trait SessionMedium: Send + Sync {
    /// Read the value stored under `key`.
    fn read(&self, key: &str) -> Result<Option<String>, MediumError>;

    /// Store `value` under `key`.
    fn write(&self, key: &str, value: &str) -> Result<(), MediumError>;

    /// Delete `key`. Deleting an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), MediumError>;

    /// Atomically read, transform and write back the value under
    /// `key`. Returns the value stored after the update.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<String>) -> UpdateDecision,
    ) -> Result<Option<String>, MediumError> {
        // Non-transactional fallback: read then write.
        let current = self.read(key)?;
        match f(current.clone()) {
            UpdateDecision::Write(next) => {
                self.write(key, &next)?;
                Ok(Some(next))
            }
            UpdateDecision::Keep => Ok(current),
        }
    }
}

/// Mutex-backed in-memory medium.
///
/// `update` holds the lock across the closure, so concurrent updates
/// for the same key fully serialize. Used as the test medium and as
/// the degraded fallback scoped to one store instance.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryMedium {
    /// Creates an empty medium.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionMedium for MemoryMedium {
    fn read(&self, key: &str) -> Result<Option<String>, MediumError> {
        let data = self.data.lock().map_err(poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), MediumError> {
        let mut data = self.data.lock().map_err(poisoned)?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MediumError> {
        let mut data = self.data.lock().map_err(poisoned)?;
        data.remove(key);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<String>) -> UpdateDecision,
    ) -> Result<Option<String>, MediumError> {
        let mut data = self.data.lock().map_err(poisoned)?;
        let current = data.get(key).cloned();
        match f(current.clone()) {
            UpdateDecision::Write(next) => {
                data.insert(key.to_string(), next.clone());
                Ok(Some(next))
            }
            UpdateDecision::Keep => Ok(current),
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> MediumError {
    MediumError::Backend("storage lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_remove() {
        let medium = MemoryMedium::new();
        assert_eq!(medium.read("k").unwrap(), None);

        medium.write("k", "v").unwrap();
        assert_eq!(medium.read("k").unwrap(), Some("v".to_string()));

        medium.remove("k").unwrap();
        assert_eq!(medium.read("k").unwrap(), None);
    }

    #[test]
    fn remove_absent_key_is_ok() {
        let medium = MemoryMedium::new();
        medium.remove("missing").unwrap();
    }

    #[test]
    fn update_writes_through_closure() {
        let medium = MemoryMedium::new();
        medium.write("k", "1").unwrap();

        let stored = medium
            .update("k", &mut |current| {
                let n: i64 = current.as_deref().unwrap_or("0").parse().unwrap();
                UpdateDecision::Write((n + 1).to_string())
            })
            .unwrap();

        assert_eq!(stored, Some("2".to_string()));
        assert_eq!(medium.read("k").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn update_keep_leaves_value() {
        let medium = MemoryMedium::new();
        medium.write("k", "v").unwrap();

        let stored = medium.update("k", &mut |_| UpdateDecision::Keep).unwrap();
        assert_eq!(stored, Some("v".to_string()));
        assert_eq!(medium.read("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn concurrent_updates_serialize() {
        use std::sync::Arc;

        let medium = Arc::new(MemoryMedium::new());
        medium.write("counter", "0").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let medium = medium.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    medium
                        .update("counter", &mut |current| {
                            let n: i64 = current.as_deref().unwrap_or("0").parse().unwrap();
                            UpdateDecision::Write((n + 1).to_string())
                        })
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(medium.read("counter").unwrap(), Some("800".to_string()));
    }
}
