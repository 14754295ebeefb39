//! Startup wiring: configuration → registry → flows → engine → scheduler.
//!
//! Any validation error here aborts startup.

use std::sync::Arc;

use anyhow::Context;

use crate::auth::{validate_profile, AuthStateManager};
use crate::capabilities::register_builtin_tasks;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::engine::Engine;
use crate::scheduler::{ScheduleStore, Scheduler};
use crate::settings::{SettingsStore, SharedSettingsStore};
use crate::task::TaskRegistry;

pub struct App {
    pub config: Config,
    pub settings: SharedSettingsStore,
    pub auth: Arc<AuthStateManager>,
    pub default_profile: String,
    pub engine: Arc<Engine>,
    pub scheduler: Arc<Scheduler>,
}

impl App {
    pub async fn bootstrap(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

        let settings = Arc::new(SettingsStore::new(&config.data_dir).await);
        let catalog = Catalog::load(&config.catalog_path)?;

        let default_profile = catalog.auth.profile.clone();
        validate_profile(&default_profile)?;
        let auth = Arc::new(AuthStateManager::new(&config.auth_dir));

        let mut builder = TaskRegistry::builder();
        register_builtin_tasks(
            &mut builder,
            &auth,
            &default_profile,
            catalog.auth.session(&config.auth_dir),
        )?;
        catalog.register_tasks(&mut builder)?;
        let registry = Arc::new(builder.build());

        let flows = Arc::new(catalog.flow_store(&registry)?);
        tracing::info!(
            "Registered {} task(s) and {} flow(s)",
            registry.len(),
            flows.len()
        );

        let engine = Arc::new(Engine::new(registry, flows));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&engine),
            Arc::clone(&settings),
            ScheduleStore::new(&config.schedules_path),
            config.tick_interval,
        ));

        Ok(Self {
            config,
            settings,
            auth,
            default_profile,
            engine,
            scheduler,
        })
    }

    pub fn profile<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.default_profile)
    }
}
