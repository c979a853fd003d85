//! Per-identity exclusion for merges and sweeps.

use crate::services::identity::UploadIdentity;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

/// Set of upload identities with a merge (or sweep) in flight.
#[derive(Clone, Default)]
pub struct UploadLocks {
    held: Arc<Mutex<HashSet<UploadIdentity>>>,
}

/// Releases its identity when dropped.
#[derive(Debug)]
pub struct UploadGuard {
    held: Arc<Mutex<HashSet<UploadIdentity>>>,
    identity: UploadIdentity,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity`, or `None` if someone else already holds it.
    pub fn try_acquire(&self, identity: &UploadIdentity) -> Option<UploadGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(identity.clone()) {
            return None;
        }
        Some(UploadGuard {
            held: Arc::clone(&self.held),
            identity: identity.clone(),
        })
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let locks = UploadLocks::new();
        let id = UploadIdentity::resolve("abc").unwrap();

        let guard = locks.try_acquire(&id).expect("first acquire");
        assert!(locks.try_acquire(&id).is_none());

        drop(guard);
        assert!(locks.try_acquire(&id).is_some());
    }

    #[test]
    fn identities_are_independent() {
        let locks = UploadLocks::new();
        let a = UploadIdentity::resolve("a").unwrap();
        let b = UploadIdentity::resolve("b").unwrap();
        let _ga = locks.try_acquire(&a).unwrap();
        assert!(locks.try_acquire(&b).is_some());
    }
}
