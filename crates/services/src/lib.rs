#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod sessions;
pub mod settings;

pub use exam_core::Clock;
pub use sessions as session;

pub use app_services::AppServices;
pub use error::{AppServicesError, FinalizeError, SessionError, SetupError};
pub use settings::EngineSettings;

pub use sessions::{
    FinalizationCoordinator, FinalizeOutcome, SessionConfig, SessionController, SessionLauncher,
    SessionRunner, SessionSnapshot, SessionStatus, TickOutcome,
};
