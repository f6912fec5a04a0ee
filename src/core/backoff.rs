use std::hint::spin_loop;

/// Jittered spinning for retry loops that lost a race for a shard lock.
///
/// Every call to [`Backoff::backoff`] spins a random number of iterations in
/// `0..=current` and then grows `current` according to the policy, capped at
/// `limit`. The randomness keeps threads that collided once from colliding
/// again in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: usize,
    limit: usize,
}

impl Backoff {
    /// Starts at one spin and grows by one per step.
    #[inline]
    pub fn linear(limit: usize) -> Self {
        Self::start(BackoffPolicy::Linear, limit)
    }

    /// Starts at one spin and doubles per step.
    #[inline]
    pub fn exponential(limit: usize) -> Self {
        Self::start(BackoffPolicy::Exponential, limit)
    }

    #[inline]
    fn start(policy: BackoffPolicy, limit: usize) -> Self {
        Self {
            policy,
            current: 1.min(limit),
            limit,
        }
    }

    /// Upper bound of the next jitter.
    #[inline]
    pub fn current_limit(&self) -> usize {
        self.current
    }

    /// Returns `true` once the spin bound stopped growing.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.current >= self.limit
    }

    fn step(&mut self) {
        let next = match self.policy {
            BackoffPolicy::Linear => self.current.saturating_add(1),
            BackoffPolicy::Exponential => self.current.saturating_mul(2),
        };

        self.current = next.min(self.limit);
    }

    /// Spins for a random count within the current bound, then widens it.
    pub fn backoff(&mut self) {
        let jitter = fastrand::usize(..=self.current);

        for _ in 0..jitter {
            spin_loop();
        }

        self.step();
    }
}

/// Growth curve of the spin bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// 1, 2, 3, 4...
    Linear,
    /// 1, 2, 4, 8...
    Exponential,
}

/// Factory for fresh [`Backoff`] states.
///
/// Stored once in the cache configuration; each eviction pass builds its own
/// thread-local `Backoff` from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub policy: BackoffPolicy,
    /// Largest spin count of a single backoff step.
    pub limit: usize,
}

impl BackoffConfig {
    #[must_use]
    pub fn build(&self) -> Backoff {
        Backoff::start(self.policy, self.limit)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            policy: BackoffPolicy::Exponential,
            limit: 64,
        }
    }
}
