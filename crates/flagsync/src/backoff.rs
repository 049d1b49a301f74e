// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Capped exponential backoff with jitter for reconnect attempts.

use std::time::Duration;

use crate::config::SyncConfig;

const BACKOFF_FACTOR: f64 = 2.0;
const MAX_EXPONENT: u32 = 30;

#[derive(Debug, Clone)]
pub(crate) struct Backoff {
	base_delay: Duration,
	max_delay: Duration,
	jitter: bool,
	attempt: u32,
}

impl Backoff {
	pub(crate) fn new(base_delay: Duration, max_delay: Duration, jitter: bool) -> Self {
		Self {
			base_delay,
			max_delay,
			jitter,
			attempt: 0,
		}
	}

	pub(crate) fn from_config(config: &SyncConfig) -> Self {
		Self::new(
			config.reconnect_base_delay,
			config.reconnect_max_delay,
			config.reconnect_jitter,
		)
	}

	/// Delay before the next attempt. Advances the attempt counter.
	pub(crate) fn next_delay(&mut self) -> Duration {
		let delay = calculate_delay(self.base_delay, self.max_delay, self.attempt, self.jitter);
		self.attempt = self.attempt.saturating_add(1);
		delay
	}

	pub(crate) fn attempt(&self) -> u32 {
		self.attempt
	}
}

fn calculate_delay(base: Duration, max: Duration, attempt: u32, jitter: bool) -> Duration {
	let exponential_delay =
		base.as_secs_f64() * BACKOFF_FACTOR.powi(attempt.min(MAX_EXPONENT) as i32);
	let capped_delay = exponential_delay.min(max.as_secs_f64());

	let final_delay = if jitter {
		let jitter_factor = 0.5 + fastrand::f64();
		capped_delay * jitter_factor
	} else {
		capped_delay
	};

	// Jitter may push above the cap; the cap is a hard bound.
	Duration::from_secs_f64(final_delay.min(max.as_secs_f64()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_doubles_until_capped() {
		let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), false);
		let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();

		assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
		assert_eq!(backoff.attempt(), 7);
	}

	#[test]
	fn test_jitter_stays_in_band() {
		for _ in 0..100 {
			let delay = calculate_delay(Duration::from_secs(1), Duration::from_secs(30), 2, true);
			assert!(delay >= Duration::from_secs(2));
			assert!(delay <= Duration::from_secs(6));
		}
	}

	#[test]
	fn test_from_config() {
		let config = SyncConfig {
			reconnect_base_delay: Duration::from_millis(10),
			reconnect_max_delay: Duration::from_millis(40),
			reconnect_jitter: false,
			..SyncConfig::default()
		};
		let mut backoff = Backoff::from_config(&config);
		assert_eq!(backoff.next_delay(), Duration::from_millis(10));
		assert_eq!(backoff.next_delay(), Duration::from_millis(20));
	}

	proptest! {
		#[test]
		fn delay_never_exceeds_max(
			base_ms in 1u64..5_000,
			extra_ms in 0u64..60_000,
			attempt in 0u32..100,
			jitter in any::<bool>(),
		) {
			let base = Duration::from_millis(base_ms);
			let max = Duration::from_millis(base_ms + extra_ms);
			prop_assert!(calculate_delay(base, max, attempt, jitter) <= max);
		}

		#[test]
		fn delay_without_jitter_is_non_decreasing(base_ms in 1u64..5_000, attempt in 0u32..60) {
			let base = Duration::from_millis(base_ms);
			let max = Duration::from_secs(300);
			prop_assert!(
				calculate_delay(base, max, attempt, false) <= calculate_delay(base, max, attempt + 1, false)
			);
		}
	}
}
