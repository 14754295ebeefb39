//! Self-healing sessions.
//!
//! The probe and authenticator are supplied by the browser automation
//! layer. This module only decides when to re-authenticate and what may be
//! persisted afterwards.

use async_trait::async_trait;

use super::state::{AuthState, Freshness};
use super::store::AuthStateManager;
use crate::error::{AuthError, AuthResult, CapabilityFailure};

/// Checks whether a cached session is still logged in.
#[async_trait]
pub trait SessionProbe: Send + Sync {
    async fn is_authenticated(&self, state: &AuthState) -> Result<bool, CapabilityFailure>;
}

/// Drives an interactive login and confirms the result.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Run the login and return the resulting storage snapshot bytes.
    async fn authenticate(&self, profile: &str) -> Result<Vec<u8>, CapabilityFailure>;

    /// Check for an application-specific sign of a logged-in session.
    async fn confirm(&self, profile: &str, raw: &[u8]) -> Result<bool, CapabilityFailure>;
}

impl AuthStateManager {
    /// Return a usable session, re-authenticating when the cached one is
    /// absent, marked stale, or fails the probe.
    ///
    /// The profile lock is held from the first read to the final write, so
    /// concurrent callers for one profile log in at most once.
    pub async fn ensure_session(
        &self,
        profile: &str,
        probe: &dyn SessionProbe,
        authenticator: &dyn Authenticator,
    ) -> AuthResult<AuthState> {
        let guard = self.lock_profile(profile).await?;

        let reason = match self.load(profile).await? {
            None => "no cached state",
            Some(state) if state.meta.stale => "state marked stale",
            Some(_) => match self.validate_locked(&guard, profile, probe).await? {
                Freshness::Fresh => {
                    if let Some(state) = self.load(profile).await? {
                        tracing::debug!("Auth state for '{}' is fresh", profile);
                        return Ok(state);
                    }
                    "state vanished during validation"
                }
                Freshness::Stale => "session logged out",
            },
        };

        tracing::info!("Re-authenticating '{}': {}", profile, reason);
        let raw = authenticator.authenticate(profile).await?;
        if !authenticator.confirm(profile, &raw).await? {
            tracing::error!("Login for '{}' was not confirmed; keeping previous state", profile);
            return Err(AuthError::Unconfirmed(profile.to_string()));
        }

        self.persist_locked(&guard, profile, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{FixedProbe, ScriptedAuthenticator};
    use tempfile::tempdir;

    const OLD: &[u8] = br#"{"cookies":[{"name":"Rz","value":"old","domain":".rakuten.co.jp"}]}"#;
    const NEW: &[u8] = br#"{"cookies":[{"name":"Rz","value":"new","domain":".rakuten.co.jp"}]}"#;

    #[tokio::test]
    async fn test_fresh_state_reused() {
        let temp = tempdir().unwrap();
        let manager = AuthStateManager::new(temp.path());
        manager.persist("main", OLD).await.unwrap();

        let auth = ScriptedAuthenticator::new(NEW, true);
        let state = manager
            .ensure_session("main", &FixedProbe(true), &auth)
            .await
            .unwrap();

        assert_eq!(state.raw, OLD);
        assert_eq!(auth.logins(), 0);
    }

    #[tokio::test]
    async fn test_heals_absent_and_stale() {
        let temp = tempdir().unwrap();
        let manager = AuthStateManager::new(temp.path());
        let auth = ScriptedAuthenticator::new(NEW, true);

        let state = manager
            .ensure_session("main", &FixedProbe(true), &auth)
            .await
            .unwrap();
        assert_eq!(state.raw, NEW);
        assert_eq!(auth.logins(), 1);

        manager.persist("main", OLD).await.unwrap();
        let state = manager
            .ensure_session("main", &FixedProbe(false), &auth)
            .await
            .unwrap();
        assert_eq!(state.raw, NEW);
        assert_eq!(auth.logins(), 2);

        manager.persist("main", OLD).await.unwrap();
        manager.invalidate("main").await.unwrap();
        manager
            .ensure_session("main", &FixedProbe(true), &auth)
            .await
            .unwrap();
        assert_eq!(auth.logins(), 3);
        assert!(!manager.load("main").await.unwrap().unwrap().meta.stale);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_log_in_once() {
        let temp = tempdir().unwrap();
        let manager = AuthStateManager::new(temp.path());
        let auth = std::sync::Arc::new(ScriptedAuthenticator::new(NEW, true));

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                let auth = auth.clone();
                tokio::spawn(async move {
                    manager
                        .ensure_session("main", &FixedProbe(true), auth.as_ref())
                        .await
                })
            })
            .collect();
        for result in futures::future::join_all(callers).await {
            assert_eq!(result.unwrap().unwrap().raw, NEW);
        }

        assert_eq!(auth.logins(), 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_login_persists_nothing() {
        let temp = tempdir().unwrap();
        let manager = AuthStateManager::new(temp.path());
        manager.persist("main", OLD).await.unwrap();

        let auth = ScriptedAuthenticator::new(NEW, false);
        let err = manager
            .ensure_session("main", &FixedProbe(false), &auth)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Unconfirmed(_)));
        assert_eq!(manager.load("main").await.unwrap().unwrap().raw, OLD);
    }

    #[tokio::test]
    async fn test_probe_failure_propagates() {
        struct BrokenProbe;

        #[async_trait]
        impl SessionProbe for BrokenProbe {
            async fn is_authenticated(&self, _: &AuthState) -> Result<bool, CapabilityFailure> {
                Err(CapabilityFailure::failed("browser did not start"))
            }
        }

        let temp = tempdir().unwrap();
        let manager = AuthStateManager::new(temp.path());
        manager.persist("main", OLD).await.unwrap();

        let auth = ScriptedAuthenticator::new(NEW, true);
        let err = manager
            .ensure_session("main", &BrokenProbe, &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Capability(_)));
        assert_eq!(auth.logins(), 0);
    }
}
