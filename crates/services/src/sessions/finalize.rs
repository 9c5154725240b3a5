use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use storage::repository::{CompletionReceipt, CompletionRequest, ScoringService, StorageError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const IDLE: u8 = 0;
const IN_FLIGHT: u8 = 1;
const DONE: u8 = 2;

/// Progress of the completion call for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeState {
    Idle,
    InFlight,
    Done,
}

impl FinalizeState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            IN_FLIGHT => Self::InFlight,
            DONE => Self::Done,
            _ => Self::Idle,
        }
    }
}

/// Result of asking the coordinator to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// This caller won the guard and the service acknowledged the attempt.
    Completed(CompletionReceipt),
    /// Another caller holds or has finished the submission.
    Skipped(FinalizeState),
}

/// How the most recent submission ended, as seen by skipped callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Nothing sent yet, or a call is still running.
    Pending,
    Completed(CompletionReceipt),
    Failed(String),
}

//
// ─── COORDINATOR ───────────────────────────────────────────────────────────────
//

/// Single-flight guard around `ScoringService::complete_session`.
///
/// The first caller moves the guard `Idle -> InFlight`; everyone else is
/// skipped until the call fails and the guard drops back to `Idle`. The
/// payload is built once and every retry sends the same one.
pub struct FinalizationCoordinator {
    state: AtomicU8,
    payload: Mutex<Option<CompletionRequest>>,
    settled: watch::Sender<Settlement>,
    scoring: Arc<dyn ScoringService>,
}

impl FinalizationCoordinator {
    #[must_use]
    pub fn new(scoring: Arc<dyn ScoringService>) -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            payload: Mutex::new(None),
            settled: watch::channel(Settlement::Pending).0,
            scoring,
        }
    }

    #[must_use]
    pub fn state(&self) -> FinalizeState {
        FinalizeState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// The cached submission payload, once built.
    #[must_use]
    pub fn payload(&self) -> Option<CompletionRequest> {
        self.payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The stored receipt once a submission succeeded.
    #[must_use]
    pub fn receipt(&self) -> Option<CompletionReceipt> {
        match &*self.settled.borrow() {
            Settlement::Completed(receipt) => Some(receipt.clone()),
            Settlement::Pending | Settlement::Failed(_) => None,
        }
    }

    /// Wait for the running submission, if any, and report how it ended.
    ///
    /// Returns `Pending` at once when nothing has been sent.
    pub async fn settled(&self) -> Settlement {
        let mut rx = self.settled.subscribe();
        if self.state() == FinalizeState::Idle && matches!(*rx.borrow(), Settlement::Pending) {
            return Settlement::Pending;
        }
        // The guard moves before the settlement is published.
        let ended =
            |s: &Settlement| !matches!(s, Settlement::Pending) && self.state() != FinalizeState::InFlight;
        match rx.wait_for(ended).await {
            Ok(settlement) => settlement.clone(),
            Err(_) => Settlement::Pending,
        }
    }

    /// Submit the attempt if no other submission is running or done.
    ///
    /// `build` runs only when no payload has been cached yet.
    ///
    /// # Errors
    ///
    /// Returns the scoring service's `StorageError`; the guard is reset so a
    /// retry can go through.
    pub async fn submit_with<F>(&self, build: F) -> Result<Submission, StorageError>
    where
        F: FnOnce() -> CompletionRequest,
    {
        if let Err(current) =
            self.state
                .compare_exchange(IDLE, IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
        {
            let state = FinalizeState::from_raw(current);
            debug!(?state, "finalize skipped");
            return Ok(Submission::Skipped(state));
        }
        self.settled.send_replace(Settlement::Pending);

        let request = {
            let mut cached = self.payload.lock().unwrap_or_else(PoisonError::into_inner);
            cached.get_or_insert_with(build).clone()
        };

        match self.scoring.complete_session(&request).await {
            Ok(receipt) => {
                self.state.store(DONE, Ordering::Release);
                self.settled
                    .send_replace(Settlement::Completed(receipt.clone()));
                info!(session_id = %request.session_id, "completion acknowledged");
                Ok(Submission::Completed(receipt))
            }
            Err(err) => {
                self.state.store(IDLE, Ordering::Release);
                self.settled.send_replace(Settlement::Failed(err.to_string()));
                warn!(session_id = %request.session_id, error = %err, "completion failed");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for FinalizationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizationCoordinator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{FinalizeReason, SessionMode, Tally, TargetRef, UserId};
    use std::time::Duration;
    use storage::repository::InMemoryRepository;

    async fn setup() -> (InMemoryRepository, CompletionRequest) {
        let repo = InMemoryRepository::new();
        let session_id = repo
            .create_session(UserId::new(1), TargetRef::Exam(1), None)
            .await
            .unwrap();
        let request = CompletionRequest {
            session_id,
            user_id: UserId::new(1),
            mode: SessionMode::Exam,
            tally: Tally::from_counts(2, 0, 0, 1, 1).unwrap(),
            elapsed_seconds: 12,
            late: false,
            reason: FinalizeReason::Manual,
            answers: Vec::new(),
        };
        (repo, request)
    }

    #[tokio::test]
    async fn concurrent_submissions_call_service_once() {
        let (repo, request) = setup().await;
        repo.set_completion_delay(Duration::from_millis(50));
        let coordinator = Arc::new(FinalizationCoordinator::new(Arc::new(repo.clone())));

        let a = Arc::clone(&coordinator);
        let b = Arc::clone(&coordinator);
        let (ra, rb) = (request.clone(), request.clone());
        let (first, second) = tokio::join!(
            async move { a.submit_with(|| ra).await },
            async move { b.submit_with(|| rb).await },
        );

        let outcomes = [first.unwrap(), second.unwrap()];
        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, Submission::Completed(_)))
            .count();
        assert_eq!(completed, 1);
        assert_eq!(repo.completion_calls().len(), 1);
        assert_eq!(coordinator.state(), FinalizeState::Done);
    }

    #[tokio::test]
    async fn failure_resets_guard_and_retry_reuses_payload() {
        let (repo, request) = setup().await;
        repo.fail_next_completions(1);
        let coordinator = FinalizationCoordinator::new(Arc::new(repo.clone()));

        let original = request.clone();
        assert!(coordinator.submit_with(|| original).await.is_err());
        assert_eq!(coordinator.state(), FinalizeState::Idle);

        let mut altered = request.clone();
        altered.elapsed_seconds = 999;
        let second = coordinator.submit_with(|| altered).await.unwrap();
        assert!(matches!(second, Submission::Completed(_)));

        let calls = repo.completion_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert_eq!(calls[1], request);
    }

    #[tokio::test]
    async fn done_guard_skips_later_callers() {
        let (repo, request) = setup().await;
        let coordinator = FinalizationCoordinator::new(Arc::new(repo.clone()));
        let r1 = request.clone();
        coordinator.submit_with(|| r1).await.unwrap();
        let again = coordinator.submit_with(|| request).await.unwrap();
        assert_eq!(again, Submission::Skipped(FinalizeState::Done));
        assert_eq!(repo.completion_calls().len(), 1);
    }

    #[tokio::test]
    async fn skipped_caller_sees_the_running_submission_settle() {
        let (repo, request) = setup().await;
        repo.set_completion_delay(Duration::from_millis(50));
        let coordinator = Arc::new(FinalizationCoordinator::new(Arc::new(repo.clone())));
        assert_eq!(coordinator.settled().await, Settlement::Pending);

        let running = Arc::clone(&coordinator);
        let task = tokio::spawn(async move { running.submit_with(|| request).await });
        while coordinator.state() != FinalizeState::InFlight {
            tokio::task::yield_now().await;
        }

        let Settlement::Completed(receipt) = coordinator.settled().await else {
            panic!("expected a completed settlement");
        };
        assert!(matches!(task.await.unwrap(), Ok(Submission::Completed(_))));
        assert_eq!(coordinator.receipt(), Some(receipt));
    }

    #[tokio::test]
    async fn failed_submission_settles_as_failed() {
        let (repo, request) = setup().await;
        repo.fail_next_completions(1);
        let coordinator = FinalizationCoordinator::new(Arc::new(repo.clone()));
        assert!(coordinator.submit_with(|| request).await.is_err());
        assert!(matches!(coordinator.settled().await, Settlement::Failed(_)));
        assert!(coordinator.receipt().is_none());
    }
}
