/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Reconnection policy with exponential backoff.
//!
//! A transport that loses its broker asks a [`Backoff`] for the delay before
//! the next attempt and gives up once the policy's attempts are used up.
//!
//! ```rust,ignore
//! let mut backoff = policy.backoff();
//! while let Some(delay) = backoff.next_delay() {
//!     tokio::time::sleep(delay).await;
//!     if try_connect().await.is_ok() {
//!         break;
//!     }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for reconnect attempts and exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Whether lost connections are retried at all.
    pub enabled: bool,

    /// Reconnect attempts before the transport reports a terminal fault.
    pub max_attempts: u32,

    /// Delay before the first attempt in milliseconds.
    pub initial_backoff_ms: u64,

    /// Upper bound for any delay in milliseconds.
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive attempts.
    ///
    /// With multiplier 2.0 and initial 100ms:
    /// - First attempt: 100ms
    /// - Second attempt: 200ms
    /// - Third attempt: 400ms
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 0.0,
        }
    }

    /// Get the initial backoff duration.
    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Get the maximum backoff duration.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Delay before attempt number `attempt` (zero-based), capped at the maximum.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let backoff_ms = self.initial_backoff_ms as f64
            * self
                .backoff_multiplier
                .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        #[allow(
            clippy::cast_sign_loss,
            clippy::cast_possible_truncation,
            clippy::cast_precision_loss
        )]
        let capped_backoff_ms = (backoff_ms.min(self.max_backoff_ms as f64).max(0.0)) as u64;
        Duration::from_millis(capped_backoff_ms)
    }

    /// Starts a fresh sequence of attempts.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempts: 0,
        }
    }
}

/// One sequence of reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    /// Records an attempt and returns the delay to wait before making it,
    /// or `None` once the policy is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled || self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Attempts made so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_sensible_values() {
        let policy = ReconnectPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff(), Duration::from_millis(100));
        assert_eq!(policy.max_backoff(), Duration::from_secs(5));
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let policy = ReconnectPolicy {
            enabled: true,
            max_attempts: 6,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
        };
        let delays: Vec<_> = std::iter::from_fn({
            let mut backoff = policy.backoff();
            move || backoff.next_delay()
        })
        .collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1_000, 1_000].map(Duration::from_millis)
        );
    }

    #[test]
    fn exhausted_and_disabled_policies_stop() {
        let mut backoff = ReconnectPolicy {
            max_attempts: 1,
            ..ReconnectPolicy::default()
        }
        .backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 1);

        assert!(ReconnectPolicy::disabled().backoff().next_delay().is_none());
    }
}
