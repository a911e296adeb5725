// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Bounded retry with exponential backoff for transient collaborator failures.

use std::future::Future;
use std::time::Duration;

use crate::service::Error;

/// Default number of attempts, the first call included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
/// Default upper bound of the delay between two attempts.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

/// How many times and how fast a transient failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first call included.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled after each failure.
    pub initial_delay: Duration,
    /// Upper bound of the delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the failed attempt number `attempt` (starting at 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the policy is exhausted.
/// The last error is returned as is.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "{} attempt {}/{} failed: {}, retrying in {:?}",
                    label,
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_delays_are_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(700),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(700));
        assert_eq!(policy.delay_for(64), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let res = retry(&RetryPolicy::default(), "resolve", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Network("connection reset".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let res: Result<(), _> = retry(&RetryPolicy::default(), "resolve", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Network("timeout".into()))
        })
        .await;
        assert!(matches!(res, Err(Error::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn never_retries_well_formed_errors() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let res: Result<(), _> = retry(&RetryPolicy::default(), "resolve", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::NotFound("no utxo".into()))
        })
        .await;
        assert!(matches!(res, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let res: Result<(), _> = retry(&RetryPolicy::no_retry(), "submit", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Network("timeout".into()))
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
