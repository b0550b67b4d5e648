use std::time::Duration;

/// How many times and how patiently a vanished file is reopened.
///
/// Before attempt `n` (zero-based) the caller waits `initial_delay * multiplier^n`, capped at
/// `max_delay` when one is set.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_delay: Some(Duration::from_secs(5)),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before attempt `attempt` (zero-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(ceiling) => delay.min(ceiling),
            None => delay,
        }
    }

    /// Every delay of one full retry sequence, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts).map(|attempt| self.delay_before(attempt))
    }

    /// Longest time one retry sequence can block.
    pub fn total_delay(&self) -> Duration {
        self.delays()
            .fold(Duration::ZERO, |total, delay| total.saturating_add(delay))
    }
}

/// Something that can wait.
///
/// Kept behind a trait so retry loops can be exercised without real time passing.
pub trait Sleeper {
    /// Block for `duration`. Returns `false` when woken early because the process is stopping.
    fn sleep(&self, duration: Duration) -> bool;
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) -> bool {
        (**self).sleep(duration)
    }
}
