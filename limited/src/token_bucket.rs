use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio::time::interval_at;
use tracing::debug;
use tracing::trace;

use crate::config::BucketConfig;
use crate::error::ConfigError;
use crate::error::LifecycleError;

/// Lifecycle of a [`TokenBucket`]. Transitions only go forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug)]
enum Lifecycle {
    Created,
    Running {
        cancel: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// A token bucket refilled by a background task.
///
/// The bucket holds at most `capacity` tokens. [`start`](Self::start) fills it
/// and spawns a task that adds `refill_rate` (truncated) tokens every
/// `refill_interval`. [`allow`](Self::allow) claims a single token without
/// locking. [`stop`](Self::stop) cancels the task and waits for it to exit, so
/// the count never changes behind the caller's back afterwards.
///
/// Dropping a running bucket drops the cancellation sender, which ends the
/// refill task the next time it is polled.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: Arc<AtomicUsize>,
    capacity: usize,
    refill_amount: usize,
    refill_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl TokenBucket {
    /// Creates a stopped, empty bucket. Call [`start`](Self::start) before use.
    pub fn new(config: BucketConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tokens: Arc::new(AtomicUsize::new(0)),
            capacity: config.capacity.get(),
            refill_amount: config.refill_amount(),
            refill_interval: config.refill_interval,
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// Fill the bucket and spawn the refill task on the current tokio runtime.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let mut lifecycle = self.lifecycle();
        if !matches!(*lifecycle, Lifecycle::Created) {
            return Err(LifecycleError::AlreadyStarted);
        }
        let handle = Handle::try_current()?;

        self.tokens.store(self.capacity, Ordering::Release);

        let (cancel, cancelled) = oneshot::channel();
        let task = handle.spawn(refill(
            Arc::clone(&self.tokens),
            self.capacity,
            self.refill_amount,
            Instant::now() + self.refill_interval,
            self.refill_interval,
            cancelled,
        ));
        *lifecycle = Lifecycle::Running { cancel, task };

        debug!(
            capacity = self.capacity,
            refill_amount = self.refill_amount,
            refill_interval = ?self.refill_interval,
            "token bucket started"
        );
        Ok(())
    }

    /// Try to claim one token.
    ///
    /// Returns `false` without touching the count when the bucket is empty.
    pub fn allow(&self) -> bool {
        self.tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |val| {
                if val > 0 { Some(val - 1) } else { None }
            })
            .is_ok()
    }

    /// Cancel the refill task and wait for it to finish.
    ///
    /// Tokens left in the bucket stay claimable, but are never replenished.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let (cancel, task) = {
            let mut lifecycle = self.lifecycle();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running { cancel, task } => (cancel, task),
                other => {
                    *lifecycle = other;
                    return Err(LifecycleError::NotRunning);
                }
            }
        };

        // An error here means the task has already gone; the join reports why.
        let _ = cancel.send(());
        task.await?;

        debug!(remaining = self.available(), "token bucket stopped");
        Ok(())
    }

    /// Tokens currently available.
    pub fn available(&self) -> usize {
        self.tokens.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    pub fn state(&self) -> BucketState {
        match *self.lifecycle() {
            Lifecycle::Created => BucketState::Created,
            Lifecycle::Running { .. } => BucketState::Running,
            Lifecycle::Stopped => BucketState::Stopped,
        }
    }

    // No transition can panic half way, so a poisoned lock still holds a valid state.
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn refill(
    tokens: Arc<AtomicUsize>,
    capacity: usize,
    amount: usize,
    first_tick: Instant,
    period: Duration,
    mut cancelled: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            // Either an explicit stop or the bucket being dropped.
            _ = &mut cancelled => break,
            _ = ticker.tick() => {
                // Add then clamp in a single step, so the count is never seen above capacity.
                let _ = tokens.fetch_update(Ordering::AcqRel, Ordering::Acquire, |val| {
                    Some(val.saturating_add(amount).min(capacity))
                });
                trace!(available = tokens.load(Ordering::Relaxed), "token bucket refilled");
            }
        }
    }
}
