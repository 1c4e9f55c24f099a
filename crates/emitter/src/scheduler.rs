//! Drift-compensated scheduling of the 100 ms sub-second ticks.
//!
//! Host timers fire late (or occasionally early), and the error adds up over a minute of ticks.
//! [`DriftTracker`] measures the real time between consecutive fires, accumulates the deviation from
//! the nominal period, and pays it back in bounded slices by shortening or lengthening the next
//! interval. When the accumulated error grows too large, or a full resync has not happened for ten
//! minutes, it asks for a resynchronization with the second boundary instead of another tick.
//!
//! # Examples
//!
//! ```
//! # use emitter::scheduler::{DriftTracker, Fire};
//! let mut drift = DriftTracker::new(0);
//!
//! // First fire has nothing to compare against
//! assert_eq!(drift.on_fire(0), Fire::Tick { interval_ms: 100, correction_ms: 0 });
//! // 30 ms late: the next interval is shortened by 30 ms
//! assert_eq!(drift.on_fire(130), Fire::Tick { interval_ms: 70, correction_ms: 30 });
//! ```

use log::{debug, info, warn};

/// Nominal time between two ticks.
pub const NOMINAL_INTERVAL_MS: u32 = 100;
/// A single measurement deviating by this much or more is an outlier and is not accumulated.
pub const OUTLIER_LIMIT_MS: i32 = 50;
/// Accumulated drift up to this magnitude is left uncorrected.
pub const DEADBAND_MS: i32 = 5;
/// Largest correction applied to a single interval.
pub const MAX_CORRECTION_MS: i32 = 30;
/// Accumulated drift beyond this magnitude forces a resynchronization.
pub const RESYNC_DRIFT_MS: i32 = 100;
/// Maximum time between two full resynchronizations.
pub const RESYNC_PERIOD_MS: u64 = 600_000;
/// Log a correction summary every this many consecutive corrections.
const SUMMARY_EVERY: u16 = 10;

/// Why the scheduler abandoned the tick cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
	/// [`RESYNC_PERIOD_MS`] elapsed since the last resync.
	Periodic,
	/// Accumulated drift exceeded [`RESYNC_DRIFT_MS`]. The payload is the drift in ms.
	Drift(i32)
}

/// The decision taken for one timer fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fire {
	/// Run the generator for this tick and schedule the next fire after `interval_ms`.
	/// `correction_ms` is the drift repaid by this interval (positive when shortened).
	Tick { interval_ms: u32, correction_ms: i32 },
	/// Stop ticking and resynchronize with the second boundary.
	Resync(ResyncReason)
}

/// Tracks timer drift across consecutive ticks.
///
/// The tracker is created fresh every time the state machine locks, so the first fire after a lock
/// never produces a drift sample.
#[derive(Debug, Clone)]
pub struct DriftTracker {
	/// Monotonic time of the previous fire, if any.
	last_fire_ms: Option<u64>,
	/// Drift not yet paid back, in ms. Positive means ticks have been arriving late.
	accumulated_ms: i32,
	/// Number of consecutive fires that applied a correction.
	consecutive_corrections: u16,
	/// Monotonic time of the last full resynchronization.
	last_resync_ms: u64
}

impl DriftTracker {
	/// Create a tracker whose resync period starts at `now_ms`.
	pub fn new(now_ms: u64) -> DriftTracker {
		DriftTracker {
			last_fire_ms: None,
			accumulated_ms: 0,
			consecutive_corrections: 0,
			last_resync_ms: now_ms
		}
	}

	/// Drift accumulated and not yet corrected, in ms.
	pub fn accumulated_ms(&self) -> i32 {
		self.accumulated_ms
	}

	/// Number of consecutive fires that applied a correction.
	pub fn consecutive_corrections(&self) -> u16 {
		self.consecutive_corrections
	}

	/// Forget accumulated drift, e.g. after a clock discontinuity.
	pub fn clear(&mut self) {
		self.accumulated_ms = 0;
	}

	/// Account for a timer fire at `now_ms` and decide what to do with it.
	///
	/// The elapsed time since the previous fire is compared against [`NOMINAL_INTERVAL_MS`]; samples
	/// within [`OUTLIER_LIMIT_MS`] are accumulated, others are logged and dropped. Once the
	/// accumulated drift exceeds [`DEADBAND_MS`], up to [`MAX_CORRECTION_MS`] of it is repaid by
	/// adjusting the next interval. The returned interval is therefore always within
	/// `100 ± 30` ms.
	///
	/// Returns [`Fire::Resync`] when the resync period elapsed or the remaining drift exceeds
	/// [`RESYNC_DRIFT_MS`]. In that case the drift is cleared and the resync time is recorded.
	pub fn on_fire(&mut self, now_ms: u64) -> Fire {
		if let Some(last) = self.last_fire_ms {
			let elapsed = now_ms.saturating_sub(last).min(i32::MAX as u64) as i32;
			let sample = elapsed - NOMINAL_INTERVAL_MS as i32;
			if sample.abs() < OUTLIER_LIMIT_MS {
				self.accumulated_ms += sample;
			} else {
				warn!("Abnormal timing drift detected: {}ms", sample);
			}
		}
		self.last_fire_ms = Some(now_ms);

		let mut correction = 0;
		if self.accumulated_ms.abs() > DEADBAND_MS {
			correction = self.accumulated_ms.clamp(-MAX_CORRECTION_MS, MAX_CORRECTION_MS);
			self.accumulated_ms -= correction;

			self.consecutive_corrections = self.consecutive_corrections.wrapping_add(1);
			if self.consecutive_corrections % SUMMARY_EVERY == 0 {
				debug!(
					"Drift compensation: {}ms correction, {}ms remaining drift",
					correction, self.accumulated_ms
				);
			}
		} else {
			self.consecutive_corrections = 0;
		}

		let since_resync = now_ms.saturating_sub(self.last_resync_ms);
		let reason = if since_resync >= RESYNC_PERIOD_MS {
			Some(ResyncReason::Periodic)
		} else if self.accumulated_ms.abs() > RESYNC_DRIFT_MS {
			Some(ResyncReason::Drift(self.accumulated_ms))
		} else {
			None
		};

		if let Some(reason) = reason {
			info!("Performing {} resynchronization with second boundary", match reason {
				ResyncReason::Periodic => "periodic",
				ResyncReason::Drift(_) => "drift-triggered"
			});
			self.accumulated_ms = 0;
			self.last_resync_ms = now_ms;
			return Fire::Resync(reason);
		}

		Fire::Tick {
			interval_ms: (NOMINAL_INTERVAL_MS as i32 - correction) as u32,
			correction_ms: correction
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use log::Level;
	use crate::testing::{capture_logs, logged};

	fn interval(fire: Fire) -> u32 {
		match fire {
			Fire::Tick { interval_ms, .. } => interval_ms,
			Fire::Resync(r) => panic!("Unexpected resync: {:?}", r)
		}
	}

	#[test]
	fn steady_test() {
		let mut d = DriftTracker::new(0);
		let mut now = 0;
		for _ in 0..100 {
			assert_eq!(d.on_fire(now), Fire::Tick { interval_ms: 100, correction_ms: 0 });
			now += 100;
		}
		assert_eq!(d.accumulated_ms(), 0);
		assert_eq!(d.consecutive_corrections(), 0);
	}

	#[test]
	fn deadband_test() {
		let mut d = DriftTracker::new(0);
		d.on_fire(0);
		// 5 ms of drift is tolerated
		assert_eq!(d.on_fire(105), Fire::Tick { interval_ms: 100, correction_ms: 0 });
		assert_eq!(d.accumulated_ms(), 5);
		// 6 ms is corrected in full
		assert_eq!(d.on_fire(206), Fire::Tick { interval_ms: 94, correction_ms: 6 });
		assert_eq!(d.accumulated_ms(), 0);
		assert_eq!(d.consecutive_corrections(), 1);
		// Early ticks lengthen the next interval
		assert_eq!(d.on_fire(298), Fire::Tick { interval_ms: 108, correction_ms: -8 });
		assert_eq!(d.consecutive_corrections(), 2);
		assert_eq!(d.on_fire(398), Fire::Tick { interval_ms: 100, correction_ms: 0 });
		assert_eq!(d.consecutive_corrections(), 0);
	}

	#[test]
	fn late_ticks_test() {
		// 40 ticks arriving 30 ms late every time
		let mut d = DriftTracker::new(0);
		let mut now = 0;
		assert_eq!(interval(d.on_fire(now)), 100);
		for _ in 0..40 {
			now += 130;
			let fire = d.on_fire(now);
			assert_eq!(fire, Fire::Tick { interval_ms: 70, correction_ms: 30 });
			assert!(d.accumulated_ms().abs() <= RESYNC_DRIFT_MS);
		}
		assert_eq!(d.consecutive_corrections(), 40);
	}

	/// Fire `n` ticks, each 30 ms late.
	fn fire_late(d: &mut DriftTracker, now: &mut u64, n: usize) {
		for _ in 0..n {
			*now += 130;
			d.on_fire(*now);
		}
	}

	#[test]
	fn correction_summary_test() {
		capture_logs();
		let mut d = DriftTracker::new(0);
		let mut now = 0;
		d.on_fire(now);

		fire_late(&mut d, &mut now, 9);
		assert!(logged(Level::Debug, "Drift compensation").is_empty());
		fire_late(&mut d, &mut now, 1);
		assert_eq!(logged(Level::Debug, "Drift compensation"), [
			"Drift compensation: 30ms correction, 0ms remaining drift"
		]);
		fire_late(&mut d, &mut now, 10);
		assert_eq!(logged(Level::Debug, "Drift compensation").len(), 2);

		// An on-time tick ends the streak, so the next summary needs ten more corrections
		fire_late(&mut d, &mut now, 5);
		now += 100;
		d.on_fire(now);
		assert_eq!(d.consecutive_corrections(), 0);
		fire_late(&mut d, &mut now, 9);
		assert_eq!(logged(Level::Debug, "Drift compensation").len(), 2);
		fire_late(&mut d, &mut now, 1);
		assert_eq!(logged(Level::Debug, "Drift compensation").len(), 3);
	}

	#[test]
	fn clamp_test() {
		let mut d = DriftTracker::new(0);
		let mut now = 0;
		d.on_fire(now);
		// 45 ms late each time: 30 ms repaid, 15 ms carried over
		for i in 1..=6 {
			now += 145;
			let fire = d.on_fire(now);
			assert_eq!(fire, Fire::Tick { interval_ms: 70, correction_ms: 30 });
			assert_eq!(d.accumulated_ms(), 15 * i);
		}
		// Carry-over exceeds 100 ms on the seventh late tick
		now += 145;
		assert_eq!(d.on_fire(now), Fire::Resync(ResyncReason::Drift(105)));
		assert_eq!(d.accumulated_ms(), 0);
	}

	#[test]
	fn outlier_test() {
		let mut d = DriftTracker::new(0);
		d.on_fire(0);
		assert_eq!(d.on_fire(150), Fire::Tick { interval_ms: 100, correction_ms: 0 });
		assert_eq!(d.on_fire(200), Fire::Tick { interval_ms: 100, correction_ms: 0 });
		assert_eq!(d.accumulated_ms(), 0);
		assert_eq!(d.on_fire(249), Fire::Tick { interval_ms: 100, correction_ms: 0 });
		assert_eq!(d.on_fire(349), Fire::Tick { interval_ms: 100, correction_ms: 0 });
		assert_eq!(d.accumulated_ms(), 0);
		// 49 ms is still accumulated
		assert_eq!(d.on_fire(498), Fire::Tick { interval_ms: 70, correction_ms: 30 });
		assert_eq!(d.accumulated_ms(), 19);
	}

	#[test]
	fn periodic_resync_test() {
		let mut d = DriftTracker::new(1000);
		assert_eq!(interval(d.on_fire(1000)), 100);
		assert_eq!(interval(d.on_fire(1000 + RESYNC_PERIOD_MS - 1)), 100);
		assert_eq!(d.on_fire(1000 + RESYNC_PERIOD_MS), Fire::Resync(ResyncReason::Periodic));
		// The period restarts from the resync
		assert_eq!(interval(d.on_fire(1000 + RESYNC_PERIOD_MS + 100)), 100);
	}

	#[test]
	fn resync_iff_test() {
		// Drift of exactly 100 ms after correction does not resync
		let mut d = DriftTracker::new(0);
		d.accumulated_ms = 130;
		d.last_fire_ms = None;
		assert_eq!(d.on_fire(10), Fire::Tick { interval_ms: 70, correction_ms: 30 });
		assert_eq!(d.accumulated_ms(), 100);

		d.accumulated_ms = 131;
		d.last_fire_ms = None;
		assert_eq!(d.on_fire(20), Fire::Resync(ResyncReason::Drift(101)));

		d.accumulated_ms = -131;
		d.last_fire_ms = None;
		assert_eq!(d.on_fire(30), Fire::Resync(ResyncReason::Drift(-101)));
	}

	#[test]
	fn interval_bounds_test() {
		let mut d = DriftTracker::new(0);
		let mut now = 0;
		// Alternate wildly between early and late fires
		for i in 0..500u64 {
			now += 60 + (i * 37) % 81;
			if let Fire::Tick { interval_ms, correction_ms } = d.on_fire(now) {
				assert!(interval_ms >= 70 && interval_ms <= 130, "interval {}", interval_ms);
				assert!(correction_ms.abs() <= MAX_CORRECTION_MS);
			}
		}
	}

	#[test]
	fn clear_test() {
		let mut d = DriftTracker::new(0);
		d.on_fire(0);
		d.on_fire(104);
		assert_eq!(d.accumulated_ms(), 4);
		d.clear();
		assert_eq!(d.accumulated_ms(), 0);
	}
}
