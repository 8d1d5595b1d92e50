//! Bounded retry for idempotent, side-effecting jobs.
//!
//! A job is a closure producing a status value. Each firing is judged by
//! [`JobStatus`]: success cancels the job and yields the value, failure
//! bumps the attempt counter and leaves the job scheduled until
//! `max_retry` further attempts have failed. Errors count as failures and
//! are logged, never propagated. This gives at-least-once execution without
//! the job itself knowing anything about retries.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

/// String results that count as success.
pub const SUCCESS_TOKENS: [&str; 4] = ["OK", "Success", "UP", "good"];

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRY: u32 = 2;

/// Classifies a job result as success or failure.
///
/// Success is `true`, integer `0`, or one of [`SUCCESS_TOKENS`]. Anything
/// else, `false` included, is a failure.
pub trait JobStatus {
    fn is_success(&self) -> bool;
}

impl JobStatus for bool {
    fn is_success(&self) -> bool {
        *self
    }
}

impl JobStatus for str {
    fn is_success(&self) -> bool {
        SUCCESS_TOKENS.contains(&self)
    }
}

impl JobStatus for &str {
    fn is_success(&self) -> bool {
        (**self).is_success()
    }
}

impl JobStatus for String {
    fn is_success(&self) -> bool {
        self.as_str().is_success()
    }
}

macro_rules! zero_is_success {
    ($($ty:ty),*) => {
        $(impl JobStatus for $ty {
            fn is_success(&self) -> bool {
                *self == 0
            }
        })*
    };
}

zero_is_success!(i32, i64, u32, u64, usize);

impl<T: JobStatus> JobStatus for Option<T> {
    fn is_success(&self) -> bool {
        self.as_ref().is_some_and(JobStatus::is_success)
    }
}

/// A status carrying a payload is judged by the status alone.
impl<S: JobStatus, T> JobStatus for (S, T) {
    fn is_success(&self) -> bool {
        self.0.is_success()
    }
}

impl JobStatus for Value {
    fn is_success(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64() == Some(0),
            Value::String(s) => s.is_success(),
            _ => false,
        }
    }
}

/// Per-job execution context: attempt counter plus a cancel flag the job can
/// raise itself.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    attempt: u32,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    /// Fresh context at attempt 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Stop scheduling this job after the current firing.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether the job has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What the scheduler should do after a firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    /// Succeeded; job cancelled.
    Done(T),
    /// Failed; fire again. `attempt` is the new attempt count.
    Retry { attempt: u32 },
    /// Failed with the retry budget spent; job cancelled.
    Exhausted,
    /// Cancelled by the job itself or from outside.
    Cancelled,
}

/// Retry budget for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `max_retry` retries.
    pub fn new(max_retry: u32) -> Self {
        Self { max_retry }
    }

    /// Judge one firing of job `name` and update its context.
    pub fn evaluate<T, E>(
        &self,
        name: &str,
        ctx: &mut JobContext,
        outcome: Result<T, E>,
    ) -> Verdict<T>
    where
        T: JobStatus,
        E: Display,
    {
        match outcome {
            Ok(value) if value.is_success() => {
                ctx.cancel();
                debug!("Job {} succeeded at attempt {}", name, ctx.attempt);
                return Verdict::Done(value);
            }
            Ok(_) => debug!("Job {} reported failure at attempt {}", name, ctx.attempt),
            Err(e) => warn!("Job {} failed at attempt {}: {}", name, ctx.attempt, e),
        }

        if ctx.is_cancelled() {
            return Verdict::Cancelled;
        }
        if ctx.attempt >= self.max_retry {
            ctx.cancel();
            warn!("Job {} cancelled after {} retries", name, ctx.attempt);
            return Verdict::Exhausted;
        }
        ctx.attempt += 1;
        Verdict::Retry {
            attempt: ctx.attempt,
        }
    }
}

/// A closure wrapped with a retry policy, fired on demand or periodically.
pub struct RetryJob<F> {
    name: String,
    policy: RetryPolicy,
    ctx: JobContext,
    work: F,
}

impl<F, Fut, T, E> RetryJob<F>
where
    F: FnMut(JobContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: JobStatus,
    E: Display,
{
    /// Wrap `work`. The closure receives a copy of the job context and may
    /// cancel itself through it.
    pub fn new(name: impl Into<String>, policy: RetryPolicy, work: F) -> Self {
        Self {
            name: name.into(),
            policy,
            ctx: JobContext::new(),
            work,
        }
    }

    /// The job's context (shared cancel flag).
    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    /// Run the job once and judge the result.
    pub async fn fire(&mut self) -> Verdict<T> {
        if self.ctx.is_cancelled() {
            return Verdict::Cancelled;
        }
        let outcome = (self.work)(self.ctx.clone()).await;
        self.policy.evaluate(&self.name, &mut self.ctx, outcome)
    }

    /// Fire every `period` until the job is cancelled. Returns the success
    /// value, or `None` if the job gave up or was cancelled.
    pub async fn run_every(mut self, period: Duration) -> Option<T> {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.fire().await {
                Verdict::Done(value) => return Some(value),
                Verdict::Retry { .. } => continue,
                Verdict::Exhausted | Verdict::Cancelled => return None,
            }
        }
    }
}
