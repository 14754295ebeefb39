//! Cached login sessions: persistence, validation, and re-authentication.

pub mod heal;
pub mod state;
pub mod store;

pub use heal::{Authenticator, SessionProbe};
pub use state::{AuthMeta, AuthState, AuthStatus, Cookie, Freshness, StorageState};
pub use store::{validate_profile, AuthStateManager};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::CapabilityFailure;

    /// Reports the same login status for every state.
    pub struct FixedProbe(pub bool);

    #[async_trait]
    impl SessionProbe for FixedProbe {
        async fn is_authenticated(&self, _state: &AuthState) -> Result<bool, CapabilityFailure> {
            Ok(self.0)
        }
    }

    /// Returns a fixed snapshot and confirmation result, counting logins.
    pub struct ScriptedAuthenticator {
        snapshot: Vec<u8>,
        confirmed: bool,
        logins: AtomicUsize,
    }

    impl ScriptedAuthenticator {
        pub fn new(snapshot: &[u8], confirmed: bool) -> Self {
            Self {
                snapshot: snapshot.to_vec(),
                confirmed,
                logins: AtomicUsize::new(0),
            }
        }

        pub fn logins(&self) -> usize {
            self.logins.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for ScriptedAuthenticator {
        async fn authenticate(&self, _profile: &str) -> Result<Vec<u8>, CapabilityFailure> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.clone())
        }

        async fn confirm(&self, _profile: &str, _raw: &[u8]) -> Result<bool, CapabilityFailure> {
            Ok(self.confirmed)
        }
    }
}
