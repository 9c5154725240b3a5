use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

use super::controller::SessionController;

/// Background task that ticks a shared controller until it stops ticking.
pub struct SessionRunner {
    handle: JoinHandle<()>,
}

impl SessionRunner {
    /// Spawn the tick loop on the current tokio runtime.
    #[must_use]
    pub fn spawn(controller: Arc<Mutex<SessionController>>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut guard = controller.lock().await;
                if !guard.is_ticking() {
                    break;
                }
                if let Err(err) = guard.tick().await {
                    warn!(error = %err, "tick failed");
                }
                if !guard.is_ticking() {
                    break;
                }
            }
            debug!("session runner stopped");
        });
        Self { handle }
    }

    /// Abort the loop without touching the controller.
    pub fn stop(&self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to end on its own.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            if !err.is_cancelled() {
                warn!(error = %err, "session runner panicked");
            }
        }
    }
}
