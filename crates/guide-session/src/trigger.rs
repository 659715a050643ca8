use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

struct Pending<S> {
    signal: S,
    deadline: Instant,
}

/// Collapses a burst of signals into one firing, `delay` after the last one.
///
/// At most one signal is armed at a time. Scheduling again replaces the
/// armed signal and restarts the timer; superseded signals never fire.
/// Nothing is spawned: the owner awaits [`DebouncedTrigger::fired`] on its
/// own task, so the firing always runs on the same execution context as
/// the signals.
pub struct DebouncedTrigger<S> {
    delay: Duration,
    pending: Option<Pending<S>>,
}

impl<S> DebouncedTrigger<S> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self, signal: S) {
        if self.pending.is_some() {
            trace!("Debounce timer reset");
        }
        self.pending = Some(Pending {
            signal,
            deadline: Instant::now() + self.delay,
        });
    }

    /// Disarm the timer, returning the signal that would have fired
    pub fn cancel(&mut self) -> Option<S> {
        self.pending.take().map(|p| p.signal)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolves with the armed signal once its timer expires; never resolves
    /// while nothing is armed. Cancel-safe: dropping the future leaves the
    /// signal armed.
    pub async fn fired(&mut self) -> S {
        let Some(deadline) = self.pending.as_ref().map(|p| p.deadline) else {
            return std::future::pending().await;
        };

        tokio::time::sleep_until(deadline).await;

        match self.pending.take() {
            Some(pending) => pending.signal,
            None => std::future::pending().await,
        }
    }
}

impl<S> Drop for DebouncedTrigger<S> {
    fn drop(&mut self) {
        if self.pending.take().is_some() {
            trace!("Dropped debounce trigger with a pending signal");
        }
    }
}
