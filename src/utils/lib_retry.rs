use std::time::Duration;

/// Bounded retry with exponential backoff.  The wait starts at
/// `initial_wait`, doubles after every failed attempt and never exceeds
/// `max_wait`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_wait: Duration, max_wait: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            initial_wait,
            max_wait: max_wait.max(initial_wait),
        }
    }

    /// Try once, never wait.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// The waits between consecutive attempts, so `max_attempts - 1` of them.
    pub fn delays(&self) -> Vec<Duration> {
        let mut out = Vec::new();
        let mut wait = self.initial_wait;
        for _ in 1..self.max_attempts {
            out.push(wait.min(self.max_wait));
            wait = wait.saturating_mul(2);
        }
        out
    }

    /// Call `op` until it succeeds or the attempts run out, sleeping on the
    /// current thread in between.  `op` gets the attempt number, starting at 1.
    /// The error of the last attempt is returned.
    pub fn run<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_with(op, std::thread::sleep)
    }

    /// Same as [`RetryPolicy::run`] with a custom sleep.
    pub fn run_with<T, E, F, S>(&self, mut op: F, mut sleep: S) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        S: FnMut(Duration),
    {
        let delays = self.delays();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        return Err(e);
                    }
                    sleep(delays[(attempt - 1) as usize]);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Suggested for batch inserts: 3 attempts, waiting 500ms then 1s.
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(10))
    }
}
