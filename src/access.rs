//! Access control for corpus snapshots
//!
//! A pure decision over (visibility, owner, requester). Nothing here performs
//! I/O; callers drop any result whose snapshot fails the check.

use crate::storage::{Snapshot, Visibility};
use serde::{Deserialize, Serialize};

/// Identity of whoever issued a retrieval call. Built per request, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub authenticated: bool,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            authenticated: true,
        }
    }

    /// The requester's identity, or `None` for the anonymous sentinel.
    ///
    /// Unauthenticated callers and blank identities are anonymous, so they can
    /// never compare equal to a real owner.
    pub fn principal(&self) -> Option<&str> {
        if !self.authenticated {
            return None;
        }
        self.identity
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal().is_none()
    }
}

/// Decide whether `requester` may read content governed by `visibility`/`owner`
pub fn allowed(visibility: Visibility, owner: Option<&str>, requester: &Requester) -> bool {
    match visibility {
        Visibility::Public => true,
        Visibility::Private => match (requester.principal(), owner) {
            (Some(id), Some(owner)) => id == owner,
            // Anonymously created private snapshots have no one to match.
            _ => false,
        },
        Visibility::Internal => requester.principal().is_some(),
    }
}

/// Convenience wrapper over [`allowed`] for a loaded snapshot
pub fn snapshot_allows(snapshot: &Snapshot, requester: &Requester) -> bool {
    allowed(snapshot.visibility, snapshot.owner.as_deref(), requester)
}
