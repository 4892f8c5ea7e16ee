//! The session store: atomic partial merge over a storage medium.

use crate::guard::StaleUpdateGuard;
use crate::medium::{MediumError, MemoryMedium, SessionMedium, UpdateDecision};
use crate::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use identity_protocol::{SessionPatch, SessionRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Storage key for the persisted session record.
pub const SESSION_KEY: &str = "auth.session.v1";

/// Persists the session record and serializes concurrent writes.
///
/// Every `save` runs inside a single [`SessionMedium::update`], so on
/// transactional media concurrent saves for the same user serialize
/// and the returned record is the persisted truth, not the caller's
/// input. When the medium reports itself unavailable the store flips
/// to an in-memory record scoped to this instance (one warning, then
/// silent).
pub struct SessionStore {
    medium: Box<dyn SessionMedium>,
    fallback: MemoryMedium,
    degraded: AtomicBool,
}

impl SessionStore {
    /// Creates a store over the given medium.
    pub fn new(medium: Box<dyn SessionMedium>) -> Self {
        Self {
            medium,
            fallback: MemoryMedium::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Creates a store over a fresh in-memory medium.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryMedium::new()))
    }

    /// Whether the store has fallen back to its in-memory medium.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Merges `patch` into the persisted record and returns the full
    /// merged record as stored.
    ///
    /// If no record exists, the patch must carry every mandatory field
    /// or the call fails with [`StoreError::IncompleteRecord`]. Writes
    /// whose expiry is older than the persisted one fail with
    /// [`StoreError::StaleWrite`] and leave the record untouched.
    pub fn save(&self, patch: &SessionPatch) -> StoreResult<SessionRecord> {
        let now = Utc::now();
        let mut outcome: Option<StoreResult<SessionRecord>> = None;

        self.run(|medium| {
            outcome = None;
            medium.update(SESSION_KEY, &mut |current| {
                let current_record = current.as_deref().and_then(parse_record);

                if !StaleUpdateGuard::accept(current_record.as_ref(), patch) {
                    debug!(user_id = %patch.user_id, "Rejected stale session write");
                    outcome = Some(Err(StoreError::StaleWrite));
                    return UpdateDecision::Keep;
                }

                let merged = match current_record {
                    Some(existing) => patch.merge_into(&existing),
                    None => match create_from(patch, now) {
                        Ok(record) => record,
                        Err(err) => {
                            outcome = Some(Err(err));
                            return UpdateDecision::Keep;
                        }
                    },
                };

                match serde_json::to_string(&merged) {
                    Ok(json) => {
                        outcome = Some(Ok(merged));
                        UpdateDecision::Write(json)
                    }
                    Err(err) => {
                        outcome = Some(Err(err.into()));
                        UpdateDecision::Keep
                    }
                }
            })?;
            Ok(())
        })?;

        match outcome {
            Some(result) => result,
            None => Err(StoreError::Medium(MediumError::Backend(
                "update closure did not run".to_string(),
            ))),
        }
    }

    /// Loads the persisted record, if any. An unreadable record is
    /// discarded rather than surfaced.
    pub fn load(&self) -> StoreResult<Option<SessionRecord>> {
        let raw = self.run(|medium| medium.read(SESSION_KEY))?;
        Ok(raw.as_deref().and_then(parse_record))
    }

    /// Removes the persisted record.
    pub fn clear(&self) -> StoreResult<()> {
        let result = self.run(|medium| medium.remove(SESSION_KEY));
        // A degraded store keeps its fallback copy out of later loads.
        let _ = self.fallback.remove(SESSION_KEY);
        result
    }

    /// Runs an operation against the active medium, degrading to the
    /// in-memory fallback when the primary reports itself unavailable.
    fn run<T>(
        &self,
        mut op: impl FnMut(&dyn SessionMedium) -> Result<T, MediumError>,
    ) -> StoreResult<T> {
        if !self.degraded.load(Ordering::Acquire) {
            match op(self.medium.as_ref()) {
                Ok(value) => return Ok(value),
                Err(MediumError::Unavailable(reason)) => {
                    if !self.degraded.swap(true, Ordering::AcqRel) {
                        warn!(
                            %reason,
                            "Session storage unavailable; keeping the session in memory for this tab"
                        );
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        op(&self.fallback).map_err(StoreError::from)
    }
}

fn parse_record(raw: &str) -> Option<SessionRecord> {
    match serde_json::from_str::<SessionRecord>(raw) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(error = %err, "Discarding unreadable session record");
            None
        }
    }
}

fn create_from(patch: &SessionPatch, now: DateTime<Utc>) -> StoreResult<SessionRecord> {
    if let Some(missing) = patch.missing_for_create() {
        return Err(StoreError::IncompleteRecord(missing));
    }
    let (Some(email), Some(access_token), Some(expires_at), Some(auth_method)) = (
        patch.email.clone(),
        patch.access_token.clone(),
        patch.expires_at,
        patch.auth_method,
    ) else {
        return Err(StoreError::IncompleteRecord("session fields"));
    };

    Ok(SessionRecord {
        user_id: patch.user_id.clone(),
        email,
        name: patch.name.clone(),
        email_verified: patch.email_verified,
        access_token,
        refresh_token: patch.refresh_token.clone(),
        expires_at,
        refreshed_at: patch.refreshed_at.unwrap_or(now),
        auth_method,
        supabase_token: patch.supabase_token.clone(),
        supabase_expires_at: patch.supabase_expires_at,
        metadata: patch.metadata.clone(),
    })
}
