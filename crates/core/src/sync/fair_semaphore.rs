//! FIFO counting semaphore with cancellable waits.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error returned when a permit could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// The caller's cancellation scope fired before the permit was granted.
    #[error("Permit acquisition cancelled")]
    Cancelled,

    /// The scoped permit was already released.
    #[error("Permit already released")]
    Released,
}

/// A counting semaphore that grants permits strictly in arrival order.
///
/// A waiter's position is fixed when [`FairSemaphore::acquire`] is called,
/// not when the returned [`Acquire`] is first polled. `release` hands the
/// permit directly to the oldest waiter that has not withdrawn, so a late
/// arrival can never overtake an earlier one.
pub struct FairSemaphore {
    name: String,
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    available: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

struct Waiter {
    ticket: u64,
    grant: oneshot::Sender<()>,
}

impl FairSemaphore {
    /// Creates a semaphore with `capacity` permits (at least one).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            inner: Mutex::new(Inner {
                available: capacity,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
        }
    }

    /// Name used in logs and status reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.lock().available
    }

    /// Waiters currently queued.
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Number of acquisitions ever requested.
    pub fn requests(&self) -> u64 {
        self.lock().next_ticket
    }

    /// Enqueues a request for one permit.
    ///
    /// The request is registered before this returns. Await
    /// [`Acquire::wait`] to learn the outcome; once it yields `Ok(())` the
    /// caller owns one permit and must hand it back with [`release`].
    ///
    /// [`release`]: FairSemaphore::release
    pub fn acquire(self: &Arc<Self>, cancel: CancellationToken) -> Acquire {
        let mut inner = self.lock();
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;

        let receiver = if inner.waiters.is_empty() && inner.available > 0 {
            inner.available -= 1;
            None
        } else {
            let (grant, receiver) = oneshot::channel();
            inner.waiters.push_back(Waiter { ticket, grant });
            Some(receiver)
        };
        drop(inner);

        debug!(stage = %self.name, ticket, queued = receiver.is_some(), "Permit requested");

        Acquire {
            semaphore: Arc::clone(self),
            ticket,
            receiver,
            cancel,
            outcome: None,
        }
    }

    /// Returns one permit, waking the next waiter in line if there is one.
    pub fn release(&self) {
        let mut inner = self.lock();
        self.release_locked(&mut inner);
    }

    fn release_locked(&self, inner: &mut Inner) {
        while let Some(waiter) = inner.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                debug!(stage = %self.name, ticket = waiter.ticket, "Permit handed to next waiter");
                return;
            }
        }

        if inner.available < self.capacity {
            inner.available += 1;
        } else {
            warn!(stage = %self.name, "Release without a matching acquisition ignored");
        }
    }

    /// Removes a waiter from the queue. A waiter that is no longer queued
    /// was already granted, so its permit goes back to the pool.
    fn withdraw(&self, ticket: u64) {
        let mut inner = self.lock();
        if let Some(position) = inner.waiters.iter().position(|w| w.ticket == ticket) {
            inner.waiters.remove(position);
            debug!(stage = %self.name, ticket, "Waiter withdrawn");
        } else {
            debug!(stage = %self.name, ticket, "Granted permit returned unused");
            self.release_locked(&mut inner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The critical sections never panic midway, so a poisoned lock still
        // holds consistent state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for FairSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("FairSemaphore")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("available", &inner.available)
            .field("waiting", &inner.waiters.len())
            .finish()
    }
}

/// A pending request for one permit of a [`FairSemaphore`].
///
/// Dropping an `Acquire` whose outcome was never observed withdraws it; if
/// the permit had already been handed over, it is returned to the pool.
pub struct Acquire {
    semaphore: Arc<FairSemaphore>,
    ticket: u64,
    receiver: Option<oneshot::Receiver<()>>,
    cancel: CancellationToken,
    outcome: Option<Result<(), AcquireError>>,
}

impl Acquire {
    /// Position of this request in the semaphore's arrival order.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Waits until the permit is granted or the cancellation scope fires.
    ///
    /// A cancelled wait never consumes a permit. Calling `wait` again after
    /// it completed returns the same outcome.
    pub async fn wait(&mut self) -> Result<(), AcquireError> {
        if let Some(outcome) = self.outcome {
            return outcome;
        }

        let outcome = match self.receiver.as_mut() {
            None if self.cancel.is_cancelled() => {
                self.semaphore.withdraw(self.ticket);
                Err(AcquireError::Cancelled)
            }
            None => Ok(()),
            Some(receiver) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.semaphore.withdraw(self.ticket);
                    Err(AcquireError::Cancelled)
                }
                granted = receiver => match granted {
                    Ok(()) => Ok(()),
                    // The sender lives in the queue of the semaphore we hold
                    // an Arc to; it only disappears through a grant.
                    Err(_) => Err(AcquireError::Cancelled),
                },
            },
        };

        self.outcome = Some(outcome);
        outcome
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.semaphore.withdraw(self.ticket);
        }
    }
}

impl std::fmt::Debug for Acquire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquire")
            .field("stage", &self.semaphore.name())
            .field("ticket", &self.ticket)
            .field("outcome", &self.outcome)
            .finish()
    }
}
