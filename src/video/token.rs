//! Capture tokens
//!
//! A [`CaptureToken`] is the opaque, single-use permission the OS consent
//! flow hands to the host. The OS keeps a [`GrantHandle`] to the same grant
//! and uses it to report revocation (e.g. the user dismissed the capture
//! notification). Both sides observe one shared grant state:
//!
//! ```text
//! Granted --consume--> Active --release--> Released
//!    |                   |
//!    +------revoke-------+-----> Revoked
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::CaptureError;

/// Lifecycle of the underlying OS capture grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantState {
    /// Issued, not yet bound to a capturer
    Granted,
    /// Bound to exactly one capture pipeline
    Active,
    /// Capture finished normally
    Released,
    /// Revoked by the OS or the user
    Revoked,
}

impl GrantState {
    pub fn is_usable(&self) -> bool {
        *self == GrantState::Granted
    }
}

struct Grant {
    id: Uuid,
    payload: Bytes,
    state: watch::Sender<GrantState>,
}

/// Opaque permission to capture the screen
///
/// Clones refer to the same grant; only the first `consume()` succeeds.
#[derive(Clone)]
pub struct CaptureToken {
    grant: Arc<Grant>,
}

/// OS-side handle used to revoke a grant and watch its state
#[derive(Clone)]
pub struct GrantHandle {
    grant: Arc<Grant>,
}

impl CaptureToken {
    /// Issue a new grant with an authorization payload
    pub fn issue(payload: impl Into<Bytes>) -> (CaptureToken, GrantHandle) {
        let (state, _) = watch::channel(GrantState::Granted);
        let grant = Arc::new(Grant {
            id: Uuid::new_v4(),
            payload: payload.into(),
            state,
        });

        (
            CaptureToken {
                grant: grant.clone(),
            },
            GrantHandle { grant },
        )
    }

    pub fn id(&self) -> Uuid {
        self.grant.id
    }

    /// Authorization payload handed to the native capturer
    pub fn payload(&self) -> &Bytes {
        &self.grant.payload
    }

    pub fn state(&self) -> GrantState {
        *self.grant.state.borrow()
    }

    pub fn is_valid(&self) -> bool {
        self.state().is_usable()
    }

    /// Bind the grant to a capturer, exactly once
    pub fn consume(&self) -> Result<(), CaptureError> {
        let consumed = self.grant.state.send_if_modified(|state| {
            if state.is_usable() {
                *state = GrantState::Active;
                true
            } else {
                false
            }
        });

        if consumed {
            Ok(())
        } else {
            Err(CaptureError::TokenInvalid)
        }
    }

    /// Give the grant back after capture stopped
    ///
    /// A revoked grant stays revoked.
    pub fn release(&self) {
        self.grant.state.send_if_modified(|state| {
            if *state == GrantState::Active {
                *state = GrantState::Released;
                true
            } else {
                false
            }
        });
    }

    pub fn handle(&self) -> GrantHandle {
        GrantHandle {
            grant: self.grant.clone(),
        }
    }
}

impl fmt::Debug for CaptureToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureToken")
            .field("id", &self.grant.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl GrantHandle {
    pub fn token_id(&self) -> Uuid {
        self.grant.id
    }

    pub fn state(&self) -> GrantState {
        *self.grant.state.borrow()
    }

    /// Revoke the grant; returns false if it had already ended
    pub fn revoke(&self) -> bool {
        self.grant.state.send_if_modified(|state| match state {
            GrantState::Granted | GrantState::Active => {
                *state = GrantState::Revoked;
                true
            }
            GrantState::Released | GrantState::Revoked => false,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<GrantState> {
        self.grant.state.subscribe()
    }
}

impl fmt::Debug for GrantHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantHandle")
            .field("token_id", &self.grant.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_once() {
        let (token, _grant) = CaptureToken::issue("projection-intent");
        let copy = token.clone();

        assert!(token.consume().is_ok());
        assert_eq!(copy.consume(), Err(CaptureError::TokenInvalid));
        assert_eq!(token.state(), GrantState::Active);
    }

    #[test]
    fn test_revoked_token_is_invalid() {
        let (token, grant) = CaptureToken::issue(Bytes::new());
        assert!(grant.revoke());
        assert!(!grant.revoke());
        assert_eq!(token.consume(), Err(CaptureError::TokenInvalid));
    }

    #[test]
    fn test_release_keeps_revocation() {
        let (token, grant) = CaptureToken::issue(Bytes::new());
        token.consume().unwrap();
        grant.revoke();
        token.release();
        assert_eq!(grant.state(), GrantState::Revoked);

        let (token, grant) = CaptureToken::issue(Bytes::new());
        token.consume().unwrap();
        token.release();
        assert_eq!(grant.state(), GrantState::Released);
        assert!(!grant.revoke());
    }

    #[tokio::test]
    async fn test_subscribers_see_revocation() {
        let (token, grant) = CaptureToken::issue(Bytes::new());
        let mut rx = grant.subscribe();
        token.consume().unwrap();

        grant.revoke();
        let state = rx.wait_for(|s| *s == GrantState::Revoked).await.unwrap();
        assert_eq!(*state, GrantState::Revoked);
    }
}
