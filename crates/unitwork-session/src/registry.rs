//! Cross-session attachment registry.
//!
//! Each database handle owns one registry. It records which live session
//! owns which entity instance (by handle identity, not by key), so the same
//! instance cannot be tracked by two sessions at once while independent
//! sessions remain free to load their own copies of the same row.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use unitwork_core::{AttachError, Error, Result};

#[derive(Debug, Clone, Copy)]
struct Claim {
    session: u64,
}

/// Registry of entity-instance ownership across sessions.
#[derive(Debug, Default)]
pub struct AttachmentRegistry {
    claims: Mutex<HashMap<usize, Claim>>,
    next_session: AtomicU64,
}

impl AttachmentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next session identifier.
    pub fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Claim an entity instance for `session`.
    ///
    /// `table` and `key` only flavor the error; ownership is by instance.
    pub fn claim(
        &self,
        session: u64,
        instance: usize,
        table: &'static str,
        key: Option<i64>,
    ) -> Result<()> {
        let mut claims = lock(&self.claims);
        match claims.get(&instance) {
            Some(existing) if existing.session != session => {
                tracing::debug!(
                    table,
                    ?key,
                    owner = existing.session,
                    claimant = session,
                    "Attachment conflict"
                );
                Err(Error::Attach(AttachError {
                    table: table.to_string(),
                    key,
                    owner: existing.session,
                }))
            }
            _ => {
                claims.insert(instance, Claim { session });
                Ok(())
            }
        }
    }

    /// Release one instance claim held by `session`.
    pub fn release(&self, session: u64, instance: usize) {
        let mut claims = lock(&self.claims);
        if claims.get(&instance).is_some_and(|c| c.session == session) {
            claims.remove(&instance);
        }
    }

    /// Release every claim held by `session`. Called when a session ends.
    pub fn release_session(&self, session: u64) {
        lock(&self.claims).retain(|_, claim| claim.session != session);
    }

    /// The session owning an instance, if any.
    #[must_use]
    pub fn owner_of(&self, instance: usize) -> Option<u64> {
        lock(&self.claims).get(&instance).map(|c| c.session)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_per_instance() {
        let registry = AttachmentRegistry::new();
        let (s1, s2) = (registry.next_session_id(), registry.next_session_id());

        registry.claim(s1, 0x10, "players", Some(1)).unwrap();
        // A different instance of the same row is fine.
        registry.claim(s2, 0x20, "players", Some(1)).unwrap();
        // The same instance is not.
        let err = registry.claim(s2, 0x10, "players", Some(1)).unwrap_err();
        assert!(matches!(err, Error::Attach(_)));
    }

    #[test]
    fn reclaim_by_owner_is_idempotent() {
        let registry = AttachmentRegistry::new();
        let s1 = registry.next_session_id();
        registry.claim(s1, 0x10, "teams", None).unwrap();
        registry.claim(s1, 0x10, "teams", None).unwrap();
        assert_eq!(registry.owner_of(0x10), Some(s1));
    }

    #[test]
    fn release_session_frees_instances() {
        let registry = AttachmentRegistry::new();
        let (s1, s2) = (registry.next_session_id(), registry.next_session_id());
        registry.claim(s1, 0x10, "players", Some(1)).unwrap();
        registry.claim(s1, 0x11, "players", Some(2)).unwrap();

        registry.release_session(s1);
        assert_eq!(registry.owner_of(0x10), None);
        registry.claim(s2, 0x10, "players", Some(1)).unwrap();
    }

    #[test]
    fn release_ignores_other_sessions_claims() {
        let registry = AttachmentRegistry::new();
        let (s1, s2) = (registry.next_session_id(), registry.next_session_id());
        registry.claim(s1, 0x10, "players", Some(1)).unwrap();
        registry.release(s2, 0x10);
        assert_eq!(registry.owner_of(0x10), Some(s1));
    }
}
