//! Concrete task capabilities.
//!
//! - `command`: external automation scripts
//! - `auth_tasks`: cached session maintenance and self-healing login

pub mod auth_tasks;
pub mod command;

use std::sync::Arc;

pub use auth_tasks::{AuthAction, AuthMaintenanceTask, EnsureSessionTask, ScriptedSession, PROFILE_KWARG};
pub use command::{kwargs_to_args, CommandTask};

use crate::auth::AuthStateManager;
use crate::error::ValidationError;
use crate::task::{TaskDefinition, TaskRegistryBuilder};

/// Register the auth-state tasks that every installation has.
pub fn register_builtin_tasks(
    builder: &mut TaskRegistryBuilder,
    manager: &Arc<AuthStateManager>,
    default_profile: &str,
    session: Option<ScriptedSession>,
) -> Result<(), ValidationError> {
    let maintenance = |action| Arc::new(AuthMaintenanceTask::new(manager.clone(), default_profile, action));

    builder
        .register(
            TaskDefinition::new("auth-state-status", "Auth state check", maintenance(AuthAction::Status))
                .description("Continue only if a usable login session is cached")
                .debug(true)
                .order(900),
        )?
        .register(
            TaskDefinition::new("backup-auth-state", "Auth state backup", maintenance(AuthAction::Backup))
                .description("Copy the cached login session into the backup slot")
                .order(910),
        )?
        .register(
            TaskDefinition::new("restore-auth-state", "Auth state restore", maintenance(AuthAction::Restore))
                .description("Replace the cached login session with the backup")
                .debug(true)
                .order(920),
        )?;

    if let Some(session) = session {
        let session = Arc::new(session);
        builder.register(
            TaskDefinition::new(
                "ensure-session",
                "Session check",
                Arc::new(EnsureSessionTask::new(
                    manager.clone(),
                    default_profile,
                    session.clone(),
                    session,
                )),
            )
            .description("Verify the login session and log in again if it expired")
            .order(0),
        )?;
    }

    Ok(())
}
