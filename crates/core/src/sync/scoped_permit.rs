//! Scoped acquisition of a [`FairSemaphore`] permit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::fair_semaphore::{Acquire, AcquireError, FairSemaphore};

enum PermitState {
    Pending(Acquire),
    Held,
    Finished,
}

/// Owns at most one permit of a [`FairSemaphore`] and gives it back exactly once.
///
/// Construction enqueues the request immediately; nothing blocks until
/// [`acquired`](ScopedPermit::acquired) is awaited. [`release`](ScopedPermit::release)
/// is idempotent and also runs on drop:
///
/// - a held permit is returned to the semaphore,
/// - a pending request is withdrawn, or its permit returned if it was granted
///   in the meantime,
/// - a cancelled or already released permit is left alone.
pub struct ScopedPermit {
    semaphore: Arc<FairSemaphore>,
    state: PermitState,
}

impl ScopedPermit {
    /// Starts acquiring a permit from `semaphore` under the given cancellation scope.
    pub fn new(semaphore: &Arc<FairSemaphore>, cancel: CancellationToken) -> Self {
        Self {
            semaphore: Arc::clone(semaphore),
            state: PermitState::Pending(semaphore.acquire(cancel)),
        }
    }

    /// Waits for the permit.
    ///
    /// Returns `Ok(())` once held (immediately on later calls),
    /// `Err(Cancelled)` if the scope fired first, and `Err(Released)` after
    /// the permit has been given back.
    pub async fn acquired(&mut self) -> Result<(), AcquireError> {
        match &mut self.state {
            PermitState::Pending(acquire) => {
                let outcome = acquire.wait().await;
                self.state = match outcome {
                    Ok(()) => PermitState::Held,
                    Err(_) => PermitState::Finished,
                };
                outcome
            }
            PermitState::Held => Ok(()),
            PermitState::Finished => Err(AcquireError::Released),
        }
    }

    /// Whether the permit is currently held.
    pub fn is_held(&self) -> bool {
        matches!(self.state, PermitState::Held)
    }

    /// The semaphore this permit belongs to.
    pub fn semaphore(&self) -> &Arc<FairSemaphore> {
        &self.semaphore
    }

    /// Gives the permit back if it is held. Safe to call any number of times.
    pub fn release(&mut self) {
        match std::mem::replace(&mut self.state, PermitState::Finished) {
            PermitState::Held => self.semaphore.release(),
            // Dropping the request settles it under the semaphore lock.
            PermitState::Pending(acquire) => drop(acquire),
            PermitState::Finished => {}
        }
    }
}

impl Drop for ScopedPermit {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ScopedPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            PermitState::Pending(_) => "pending",
            PermitState::Held => "held",
            PermitState::Finished => "finished",
        };
        f.debug_struct("ScopedPermit")
            .field("stage", &self.semaphore.name())
            .field("state", &state)
            .finish()
    }
}
