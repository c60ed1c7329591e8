//! Identity of the signed-in owner.
//!
//! The sync core never authenticates anyone itself; it asks an
//! [`AuthProvider`] who is signed in right now and refuses owner-scoped work
//! when nobody is.

use std::sync::Mutex;

use tracing::info;

use crate::error::{Error, Result};
use crate::marker::OwnerId;

/// Source of the current owner's identity.
pub trait AuthProvider: Send + Sync + std::fmt::Debug {
    /// The signed-in owner, if any.
    fn current_owner_id(&self) -> Option<OwnerId>;

    /// The signed-in owner, or [`Error::NotAuthenticated`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] when nobody is signed in.
    fn require_owner(&self) -> Result<OwnerId> {
        self.current_owner_id().ok_or(Error::NotAuthenticated)
    }
}

/// An auth provider whose owner is set explicitly.
///
/// Used by the CLI (owner from flags or config) and by tests.
#[derive(Debug, Default)]
pub struct StaticAuth {
    owner: Mutex<Option<OwnerId>>,
}

impl StaticAuth {
    /// A provider with `owner` signed in.
    #[must_use]
    pub fn signed_in(owner: OwnerId) -> Self {
        Self {
            owner: Mutex::new(Some(owner)),
        }
    }

    /// A provider with nobody signed in.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Switch to `owner`.
    pub fn sign_in(&self, owner: OwnerId) {
        info!(%owner, "Signed in");
        *self.lock() = Some(owner);
    }

    /// Sign the current owner out.
    pub fn sign_out(&self) {
        if let Some(owner) = self.lock().take() {
            info!(%owner, "Signed out");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<OwnerId>> {
        // The guarded value is a plain Option; a poisoned lock still holds a
        // usable one.
        self.owner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl AuthProvider for StaticAuth {
    fn current_owner_id(&self) -> Option<OwnerId> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_in() {
        let auth = StaticAuth::signed_in(OwnerId::new("u1"));
        assert_eq!(auth.current_owner_id(), Some(OwnerId::new("u1")));
        assert_eq!(auth.require_owner().unwrap(), OwnerId::new("u1"));
    }

    #[test]
    fn test_anonymous_requires_sign_in() {
        let auth = StaticAuth::anonymous();
        assert!(auth.current_owner_id().is_none());
        assert!(auth.require_owner().unwrap_err().is_not_authenticated());
    }

    #[test]
    fn test_switch_owner() {
        let auth = StaticAuth::signed_in(OwnerId::new("a"));
        auth.sign_in(OwnerId::new("b"));
        assert_eq!(auth.current_owner_id(), Some(OwnerId::new("b")));

        auth.sign_out();
        assert!(auth.current_owner_id().is_none());
    }
}
