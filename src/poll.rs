//! Bounded polling of conditions on eventually consistent state
//!
//! A [`Poller`] waits for a condition with an initial delay, a fixed poll
//! interval, and an overall timeout. Progress is logged on every tick.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

/// Source of time for the poll loop
pub trait Clock {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Blocks for the given duration.
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Wall clock which blocks the current thread
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration)
    }
}

/// Virtual clock which advances only when slept on
///
/// Every sleep is recorded so that tests can inspect how the poller
/// spent its time.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Cell<Duration>,
    oversleep: Duration,
    sleeps: RefCell<Vec<Duration>>,
}

impl ManualClock {
    /// Creates a [`ManualClock`] starting at offset zero.
    pub fn new() -> ManualClock {
        ManualClock::with_oversleep(Duration::ZERO)
    }

    /// Creates a [`ManualClock`] which adds `oversleep` to every sleep,
    /// like a host which is suspended while sleeping.
    pub fn with_oversleep(oversleep: Duration) -> ManualClock {
        ManualClock {
            origin: Instant::now(),
            offset: Cell::new(Duration::ZERO),
            oversleep,
            sleeps: RefCell::new(Vec::new()),
        }
    }

    /// Returns the virtual time passed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    /// Advances the clock without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }

    /// Returns the requested durations of all sleeps so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration + self.oversleep);
    }
}

/// Rejected retry policy settings
#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("poll interval must be greater than zero")]
    ZeroInterval,
}

/// Timing of a poll: initial delay, poll interval, and overall timeout
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    interval: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    /// Creates a [`RetryPolicy`].
    ///
    /// The interval must be positive. A timeout shorter than the initial
    /// delay is allowed; such a poll times out without a single check.
    pub fn new(
        initial_delay: Duration,
        interval: Duration,
        timeout: Duration,
    ) -> Result<RetryPolicy, PolicyError> {
        if interval.is_zero() {
            return Err(PolicyError::ZeroInterval);
        }
        Ok(RetryPolicy {
            initial_delay,
            interval,
            timeout,
        })
    }

    /// First check after 2 seconds, then every 10 seconds for at most 5 minutes.
    pub fn standard() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(2),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5 * 60),
        }
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::standard()
    }
}

/// Failure of a single condition evaluation
#[derive(Debug, Error)]
pub enum ConditionError {
    /// The check could not be performed this tick; the poll goes on.
    #[error("transient failure: {0:#}")]
    Transient(#[source] anyhow::Error),
    /// The check can never succeed; the poll is aborted.
    #[error("fatal failure: {0:#}")]
    Fatal(#[source] anyhow::Error),
}

impl From<anyhow::Error> for ConditionError {
    fn from(error: anyhow::Error) -> Self {
        ConditionError::Transient(error)
    }
}

/// Classifies the error of a fallible check
pub trait ConditionResultExt<T> {
    /// Marks the error as transient.
    fn transient(self) -> Result<T, ConditionError>;

    /// Marks the error as fatal.
    fn fatal(self) -> Result<T, ConditionError>;
}

impl<T, E> ConditionResultExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn transient(self) -> Result<T, ConditionError> {
        self.map_err(|error| ConditionError::Transient(error.into()))
    }

    fn fatal(self) -> Result<T, ConditionError> {
        self.map_err(|error| ConditionError::Fatal(error.into()))
    }
}

/// Result of the most recent evaluation before a timeout
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LastSeen {
    NotEvaluated,
    Unsatisfied,
    Failed(String),
}

impl fmt::Display for LastSeen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastSeen::NotEvaluated => write!(f, "not evaluated"),
            LastSeen::Unsatisfied => write!(f, "not satisfied"),
            LastSeen::Failed(message) => write!(f, "failed with {}", message),
        }
    }
}

/// Outcome of a poll which was not aborted
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    Satisfied {
        elapsed: Duration,
        evaluations: u32,
    },
    TimedOut {
        elapsed: Duration,
        evaluations: u32,
        last_seen: LastSeen,
    },
}

impl PollOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Satisfied { elapsed, .. } | PollOutcome::TimedOut { elapsed, .. } => {
                *elapsed
            }
        }
    }

    pub fn evaluations(&self) -> u32 {
        match self {
            PollOutcome::Satisfied { evaluations, .. }
            | PollOutcome::TimedOut { evaluations, .. } => *evaluations,
        }
    }
}

/// Terminal failure of a poll
#[derive(Debug, Error)]
pub enum PollError {
    #[error(
        "{description} was not satisfied within {timeout:?} \
         (elapsed time {elapsed:?}, last check {last_seen})"
    )]
    TimedOut {
        description: String,
        timeout: Duration,
        elapsed: Duration,
        last_seen: LastSeen,
    },
    #[error("checking {description} failed after {elapsed:?}")]
    Fatal {
        description: String,
        elapsed: Duration,
        #[source]
        source: anyhow::Error,
    },
}

/// Waits for conditions according to a [`RetryPolicy`]
#[derive(Clone, Debug)]
pub struct Poller<C = SystemClock> {
    policy: RetryPolicy,
    clock: C,
}

impl Poller<SystemClock> {
    /// Creates a [`Poller`] on the wall clock.
    pub fn new(policy: RetryPolicy) -> Poller<SystemClock> {
        Poller {
            policy,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> Poller<C> {
    /// Creates a [`Poller`] on the given clock.
    pub fn with_clock(policy: RetryPolicy, clock: C) -> Poller<C> {
        Poller { policy, clock }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Evaluates `condition` until it holds or the timeout elapses.
    ///
    /// `description` completes the sentence "Waiting for ...", e.g.
    /// `pod domain1-admin-server to be ready in namespace ns-1`.
    ///
    /// Transient failures count as "not satisfied". A fatal failure
    /// aborts the poll with [`PollError::Fatal`].
    pub fn await_condition<F>(
        &self,
        description: &str,
        mut condition: F,
    ) -> Result<PollOutcome, PollError>
    where
        F: FnMut() -> Result<bool, ConditionError>,
    {
        let timeout = self.policy.timeout;
        let start = self.clock.now();
        let since_start = || self.clock.now().saturating_duration_since(start);

        self.clock.sleep(self.policy.initial_delay);

        let mut evaluations = 0;
        let mut last_seen = LastSeen::NotEvaluated;

        let elapsed = since_start();
        if elapsed > timeout {
            return Ok(self.timed_out(description, elapsed, evaluations, last_seen));
        }

        loop {
            evaluations += 1;
            match condition() {
                Ok(true) => {
                    let elapsed = since_start();
                    info!(
                        condition = description,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Condition satisfied: {}",
                        description
                    );
                    return Ok(PollOutcome::Satisfied {
                        elapsed,
                        evaluations,
                    });
                }
                Ok(false) => last_seen = LastSeen::Unsatisfied,
                Err(ConditionError::Transient(error)) => {
                    warn!(
                        condition = description,
                        "Check of {} failed, retrying: {:#}",
                        description,
                        error
                    );
                    last_seen = LastSeen::Failed(format!("{:#}", error));
                }
                Err(ConditionError::Fatal(source)) => {
                    let elapsed = since_start();
                    error!(
                        condition = description,
                        elapsed_ms = elapsed.as_millis() as u64,
                        remaining_ms = timeout.saturating_sub(elapsed).as_millis() as u64,
                        "Giving up on {}: {:#}",
                        description,
                        source
                    );
                    return Err(PollError::Fatal {
                        description: description.to_owned(),
                        elapsed,
                        source,
                    });
                }
            }

            let elapsed = since_start();
            if elapsed >= timeout {
                return Ok(self.timed_out(description, elapsed, evaluations, last_seen));
            }

            let remaining = timeout - elapsed;
            info!(
                condition = description,
                elapsed_ms = elapsed.as_millis() as u64,
                remaining_ms = remaining.as_millis() as u64,
                "Waiting for {} (elapsed time {}ms, remaining time {}ms)",
                description,
                elapsed.as_millis(),
                remaining.as_millis()
            );
            self.clock.sleep(self.policy.interval.min(remaining));
        }
    }

    /// Like [`Poller::await_condition`] but a timeout is an error.
    pub fn until<F>(&self, description: &str, condition: F) -> Result<Duration, PollError>
    where
        F: FnMut() -> Result<bool, ConditionError>,
    {
        match self.await_condition(description, condition)? {
            PollOutcome::Satisfied { elapsed, .. } => Ok(elapsed),
            PollOutcome::TimedOut {
                elapsed, last_seen, ..
            } => Err(PollError::TimedOut {
                description: description.to_owned(),
                timeout: self.policy.timeout,
                elapsed,
                last_seen,
            }),
        }
    }

    fn timed_out(
        &self,
        description: &str,
        elapsed: Duration,
        evaluations: u32,
        last_seen: LastSeen,
    ) -> PollOutcome {
        error!(
            condition = description,
            elapsed_ms = elapsed.as_millis() as u64,
            remaining_ms = self.policy.timeout.saturating_sub(elapsed).as_millis() as u64,
            "Timed out waiting for {} (elapsed time {}ms, last check {})",
            description,
            elapsed.as_millis(),
            last_seen
        );
        PollOutcome::TimedOut {
            elapsed,
            evaluations,
            last_seen,
        }
    }
}

/// Waits on the wall clock for `condition` according to `policy`.
pub fn await_condition<F>(
    condition: F,
    policy: &RetryPolicy,
    description: &str,
) -> Result<PollOutcome, PollError>
where
    F: FnMut() -> Result<bool, ConditionError>,
{
    Poller::new(*policy).await_condition(description, condition)
}
