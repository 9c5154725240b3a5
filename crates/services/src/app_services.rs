use std::sync::Arc;

use storage::remote::RemoteConfig;
use storage::repository::Storage;

use crate::Clock;
use crate::error::AppServicesError;
use crate::sessions::SessionLauncher;
use crate::settings::EngineSettings;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    settings: EngineSettings,
    launcher: Arc<SessionLauncher>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        settings: EngineSettings,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, settings))
    }

    /// Build services backed by a hosted question bank and scoring service.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the HTTP client cannot be built.
    pub fn new_remote(
        config: RemoteConfig,
        clock: Clock,
        settings: EngineSettings,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::remote(config)?;
        Ok(Self::from_storage(&storage, clock, settings))
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, settings: EngineSettings) -> Self {
        let launcher =
            Arc::new(SessionLauncher::from_storage(clock, storage).with_settings(settings));
        Self { settings, launcher }
    }

    #[must_use]
    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    #[must_use]
    pub fn launcher(&self) -> Arc<SessionLauncher> {
        Arc::clone(&self.launcher)
    }
}
