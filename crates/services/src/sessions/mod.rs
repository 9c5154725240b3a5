mod controller;
mod finalize;
mod launcher;
mod runner;
mod view;

// Public API of the session subsystem.
pub use crate::error::{FinalizeError, SessionError, SetupError};
pub use controller::{FinalizeOutcome, SessionController, SessionStatus, TickOutcome};
pub use finalize::{FinalizationCoordinator, FinalizeState, Settlement, Submission};
pub use launcher::{SessionConfig, SessionLauncher};
pub use runner::SessionRunner;
pub use view::{SectionSummaryView, SessionSnapshot};
