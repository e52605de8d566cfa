//! Retry policy types and configuration.

use std::time::Duration;

use crate::error::OperationError;

/// Retries allowed by [`RetryPolicy::default`].
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay used by [`RetryPolicy::default`].
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// A retry policy describing how the queue retries failed operations.
///
/// Policies are pure data: they decide whether and when to retry, but never
/// sleep or run anything themselves. This makes them easy to test, clone,
/// and inspect.
///
/// Every policy carries a retry bound. Constructors start from
/// [`DEFAULT_MAX_RETRIES`]; use [`with_max_retries`](Self::with_max_retries)
/// to change it.
///
/// # Examples
///
/// ```rust
/// use tidewater::RetryPolicy;
/// use std::time::Duration;
///
/// // The default: linear backoff from 1s, 3 retries, any error kind.
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_retries(), 3);
/// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_secs(1)));
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(3)));
/// assert_eq!(policy.delay_for_attempt(3), None);
///
/// // Exponential backoff with a cap
/// let policy = RetryPolicy::exponential(Duration::from_millis(100))
///     .with_max_retries(5)
///     .with_max_delay(Duration::from_secs(2));
/// assert_eq!(policy.max_delay(), Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    max_retries: u32,
    max_delay: Option<Duration>,
    jitter: JitterStrategy,
    retry_on: RetryOn,
}

/// The backoff strategy for retry delays.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RetryStrategy {
    /// Fixed delay between attempts.
    Constant(Duration),
    /// Delay increases linearly: base * (attempt + 1).
    Linear {
        /// Base delay duration.
        base: Duration,
    },
    /// Delay doubles: base * 2^attempt.
    Exponential {
        /// Base delay duration.
        base: Duration,
    },
    /// Delay follows Fibonacci sequence: fib(attempt) * base.
    Fibonacci {
        /// Base delay duration.
        base: Duration,
    },
}

/// Strategy for adding randomness to delays.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JitterStrategy {
    /// No jitter applied.
    #[default]
    None,
    /// Add ±percentage randomness to delay.
    Proportional(f64),
    /// Random delay between 0 and calculated delay (AWS recommended).
    Full,
    /// Decorrelated jitter (AWS style).
    Decorrelated,
}

/// Which failures a policy is willing to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RetryOn {
    /// Retry regardless of the error kind.
    #[default]
    Any,
    /// Retry only transient kinds (`Network`, `Timeout`).
    TransientOnly,
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
    },
    /// Stop and reject the operation.
    GiveUp,
}

impl RetryDecision {
    /// Returns true if the decision is to retry.
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }

    /// The delay before the next attempt, if retrying.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            RetryDecision::Retry { delay } => Some(*delay),
            RetryDecision::GiveUp => None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::linear(DEFAULT_BASE_DELAY)
    }
}

impl RetryPolicy {
    fn with_strategy(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            max_retries: DEFAULT_MAX_RETRIES,
            max_delay: None,
            jitter: JitterStrategy::None,
            retry_on: RetryOn::Any,
        }
    }

    /// Create a policy with constant delay between retries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tidewater::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::constant(Duration::from_millis(500))
    ///     .with_max_retries(3);
    ///
    /// // Every retry waits 500ms
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(500)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(500)));
    /// assert_eq!(policy.delay_for_attempt(3), None); // max_retries exceeded
    /// ```
    pub fn constant(delay: Duration) -> Self {
        Self::with_strategy(RetryStrategy::Constant(delay))
    }

    /// Create a policy with linearly increasing delay.
    ///
    /// Delay = base * (attempt + 1)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tidewater::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::linear(Duration::from_millis(100))
    ///     .with_max_retries(5);
    ///
    /// // Delay increases: 100ms, 200ms, 300ms, 400ms, 500ms
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(200)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(300)));
    /// ```
    pub fn linear(base: Duration) -> Self {
        Self::with_strategy(RetryStrategy::Linear { base })
    }

    /// Create a policy with exponentially increasing delay.
    ///
    /// Delay = base * 2^attempt
    pub fn exponential(base: Duration) -> Self {
        Self::with_strategy(RetryStrategy::Exponential { base })
    }

    /// Create a policy with Fibonacci-based delay.
    ///
    /// Delay = base * fib(attempt + 1)
    pub fn fibonacci(base: Duration) -> Self {
        Self::with_strategy(RetryStrategy::Fibonacci { base })
    }

    /// Set the maximum number of retry attempts.
    ///
    /// This does not include the initial attempt. For example, `max_retries(3)`
    /// means up to 4 total attempts (1 initial + 3 retries). Zero disables
    /// retrying.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the maximum delay cap.
    ///
    /// Delays will never exceed this value, regardless of the backoff strategy.
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }

    /// Add proportional jitter to delays.
    ///
    /// The factor determines the range of randomness. For example, `0.25` means
    /// the actual delay will be ±25% of the calculated delay.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, this method does nothing.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = JitterStrategy::Proportional(factor.clamp(0.0, 1.0));
        self
    }

    /// Use full jitter (AWS recommended).
    ///
    /// **Note**: Requires the `jitter` feature. Without it, this method does nothing.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = JitterStrategy::Full;
        self
    }

    /// Use decorrelated jitter (AWS style).
    ///
    /// Each delay is random between base and 3x the previous delay.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, this method does nothing.
    pub fn with_decorrelated_jitter(mut self) -> Self {
        self.jitter = JitterStrategy::Decorrelated;
        self
    }

    /// Choose which failures are retried.
    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Retry only transient failures; everything else is rejected on the
    /// first attempt.
    ///
    /// ```rust
    /// use tidewater::{ErrorKind, OperationError, RetryPolicy};
    ///
    /// let policy = RetryPolicy::default().transient_only();
    ///
    /// let network = OperationError::new(ErrorKind::Network, "reset");
    /// let invalid = OperationError::new(ErrorKind::Validation, "bad field");
    /// assert!(policy.decide(0, &network).is_retry());
    /// assert!(!policy.decide(0, &invalid).is_retry());
    /// ```
    pub fn transient_only(self) -> Self {
        self.with_retry_on(RetryOn::TransientOnly)
    }

    /// Get the maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the maximum delay cap.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Get the jitter strategy.
    pub fn jitter(&self) -> &JitterStrategy {
        &self.jitter
    }

    /// Get the retry strategy.
    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// Get the retry filter.
    pub fn retry_on(&self) -> RetryOn {
        self.retry_on
    }

    /// Calculate the delay before retry N (0-indexed).
    ///
    /// Returns None if no more retries should be attempted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }

        let base_delay = match &self.strategy {
            RetryStrategy::Constant(d) => *d,
            RetryStrategy::Linear { base } => base.saturating_mul(attempt + 1),
            RetryStrategy::Exponential { base } => {
                base.saturating_mul(2u32.saturating_pow(attempt))
            }
            RetryStrategy::Fibonacci { base } => base.saturating_mul(fibonacci(attempt + 1)),
        };

        let capped = match self.max_delay {
            Some(max) => base_delay.min(max),
            None => base_delay,
        };

        Some(capped)
    }

    /// Calculate the delay with jitter applied.
    #[doc(hidden)]
    pub fn delay_with_jitter(
        &self,
        attempt: u32,
        prev_delay: Option<Duration>,
    ) -> Option<Duration> {
        let base_delay = self.delay_for_attempt(attempt)?;
        Some(self.jitter.apply(base_delay, prev_delay, self.max_delay))
    }

    /// Decide what to do after attempt `attempt` (0-indexed) failed with `error`.
    ///
    /// `attempt` is the number of retries already spent on the operation.
    /// Jitter, when configured, is applied to the returned delay.
    ///
    /// ```rust
    /// use tidewater::{OperationError, RetryDecision, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default();
    /// let err = OperationError::from("boom");
    ///
    /// assert_eq!(
    ///     policy.decide(1, &err),
    ///     RetryDecision::Retry { delay: Duration::from_secs(2) }
    /// );
    /// assert_eq!(policy.decide(3, &err), RetryDecision::GiveUp);
    /// ```
    pub fn decide(&self, attempt: u32, error: &OperationError) -> RetryDecision {
        self.decide_after(attempt, error, None)
    }

    /// Like [`decide`](Self::decide), passing the previous delay through to
    /// decorrelated jitter. The queue uses this form.
    pub fn decide_after(
        &self,
        attempt: u32,
        error: &OperationError,
        prev_delay: Option<Duration>,
    ) -> RetryDecision {
        if self.retry_on == RetryOn::TransientOnly && !error.is_transient() {
            return RetryDecision::GiveUp;
        }

        match self.delay_with_jitter(attempt, prev_delay) {
            Some(delay) => RetryDecision::Retry { delay },
            None => RetryDecision::GiveUp,
        }
    }
}

impl JitterStrategy {
    /// Apply jitter to a base delay.
    ///
    /// # Arguments
    ///
    /// * `base_delay` - The calculated delay before jitter
    /// * `prev_delay` - The previous delay (for decorrelated jitter)
    /// * `max_delay` - Optional cap on the final delay
    pub fn apply(
        &self,
        base_delay: Duration,
        #[cfg_attr(not(feature = "jitter"), allow(unused_variables))] prev_delay: Option<Duration>,
        max_delay: Option<Duration>,
    ) -> Duration {
        let jittered = match self {
            JitterStrategy::None => base_delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Proportional(factor) => {
                use rand::Rng;
                let mut rng = rand::rng();
                let base_millis = base_delay.as_millis() as f64;
                let jitter_range = base_millis * factor;
                let min = (base_millis - jitter_range).max(0.0);
                let max = base_millis + jitter_range;
                let jittered_millis = rng.random_range(min..=max);
                Duration::from_millis(jittered_millis as u64)
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Proportional(_) => base_delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Full => {
                use rand::Rng;
                let mut rng = rand::rng();
                let max_millis = base_delay.as_millis() as u64;
                if max_millis == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rng.random_range(0..=max_millis))
                }
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Full => base_delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Decorrelated => {
                use rand::Rng;
                let mut rng = rand::rng();
                let prev = prev_delay.unwrap_or(base_delay);
                let base_millis = base_delay.as_millis() as u64;
                let max_millis = prev.as_millis().saturating_mul(3) as u64;
                if max_millis <= base_millis {
                    base_delay
                } else {
                    Duration::from_millis(rng.random_range(base_millis..=max_millis))
                }
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Decorrelated => base_delay,
        };

        match max_delay {
            Some(max) => jittered.min(max),
            None => jittered,
        }
    }
}

/// Calculate the nth Fibonacci number.
fn fibonacci(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let mut a = 0u32;
    let mut b = 1u32;
    for _ in 1..n {
        let temp = a.saturating_add(b);
        a = b;
        b = temp;
    }
    b
}
