//! The synchronization state machine driving the emitter.
//!
//! [`Emitter`] owns every piece of mutable transmission state and is driven by two cadences:
//!
//! 1. [`Emitter::poll`], the housekeeping poll, called at an arbitrary but fast rate (every 10-20 ms
//!    works well). While unsynchronized it looks for a second boundary in the time source; at all
//!    times it reads the enable switch, watches for a stale time source and logs status.
//! 2. [`Emitter::fire`], the tick cadence, called when the interval returned by the previous call
//!    (or by a lock) has elapsed. It only does work while locked.
//!
//! Both take `&mut self`, so the owner decides how they are serialized: a single-threaded loop
//! needs nothing more, while a timer interrupt plus a polling task must share the emitter behind
//! one mutex.
//!
//! ```text
//!                 boundary seen / 5 s timeout
//!   Unsynchronized ---------------------------> Locked
//!         ^                                       |
//!         +---------------------------------------+
//!            disabled / time stale for 30 s / drift or periodic resync
//! ```
//!
//! Every transition back to [`SyncState::Unsynchronized`] switches the carrier and indicator off.

use log::{debug, error, info, trace, warn};

use crate::TimeSample;
use crate::driver::{Carrier, EnableSwitch, Indicator, MonotonicClock, TimeSource};
use crate::generator::SignalGenerator;
use crate::scheduler::{DriftTracker, Fire};

/// Lock anyway if no second boundary was seen for this long.
pub const SYNC_TIMEOUT_MS: u64 = 5_000;
/// Give up the lock if the time source has not been valid for this long.
pub const STALE_TIME_MS: u64 = 30_000;
/// Interval between status log lines, which are written even while disabled.
pub const STATUS_INTERVAL_MS: u64 = 10_000;
/// Default cap on the number of checks made by [`Emitter::align_startup`].
pub const ALIGN_MAX_CHECKS: u32 = 1_000;
/// Default time limit for [`Emitter::align_startup`]. A boundary always falls within one second.
pub const ALIGN_TIMEOUT_MS: u64 = 1_000;

/// High-level synchronization state.
#[derive(Debug, Clone)]
pub enum SyncState {
	/// Looking for a second boundary to lock onto.
	Unsynchronized {
		/// Monotonic time at which this sync attempt started.
		attempt_started_ms: u64,
		/// Second observed by the previous poll, if the time source was valid.
		last_second: Option<u8>
	},
	/// Transmitting, aligned to a confirmed or assumed second boundary.
	Locked {
		/// Frame, sub-slot counter and current second.
		generator: SignalGenerator,
		/// Tick timing drift since the lock.
		drift: DriftTracker
	}
}

/// Outcome of a housekeeping poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum PollResult {
	/// Nothing for the caller to do.
	Idle,
	/// The emitter just locked. The caller must start the tick cadence, calling [`Emitter::fire`]
	/// immediately.
	StartCadence
}

/// Carrier and indicator, driven together.
struct Outputs<C, I> {
	carrier: C,
	indicator: I,
	/// Level last written successfully to the carrier.
	level: Option<bool>,
	/// Whether the indicator failed on the previous write, to log failures once per streak.
	indicator_fault: bool
}

impl<C: Carrier, I: Indicator> Outputs<C, I> {
	/// Drive carrier and indicator to `on`, skipping the write if the carrier is already there.
	fn key(&mut self, on: bool) {
		if self.level == Some(on) {
			return;
		}

		trace!("Carrier {}", if on { "on" } else { "off" });
		match self.carrier.set_carrier(on) {
			Ok(()) => self.level = Some(on),
			Err(e) => {
				self.level = None;
				warn!("Failed to switch carrier {}: {}", if on { "on" } else { "off" }, e);
			}
		}

		match self.indicator.set_indicator(on) {
			Ok(()) => self.indicator_fault = false,
			Err(e) => {
				if !self.indicator_fault {
					warn!("Indicator unavailable: {}", e);
				}
				self.indicator_fault = true;
			}
		}
	}
}

/// DCF77 emitter: synchronization state machine, per-second generator and drift-compensated
/// scheduler over injected drivers.
///
/// # Examples
///
/// ```
/// # use emitter::{Emitter, PollResult, TimeSample};
/// # use emitter::driver::{Carrier, Indicator, DriverError, MonotonicClock, TimeSource};
/// struct Clock;
/// impl MonotonicClock for Clock {
/// 	fn now_ms(&self) -> u64 { 0 }
/// }
/// struct Time;
/// impl TimeSource for Time {
/// 	fn sample(&self) -> TimeSample { TimeSample::INVALID }
/// }
/// struct Pin;
/// impl Carrier for Pin {
/// 	fn set_carrier(&mut self, _on: bool) -> Result<(), DriverError> { Ok(()) }
/// }
/// impl Indicator for Pin {
/// 	fn set_indicator(&mut self, _on: bool) -> Result<(), DriverError> { Ok(()) }
/// }
///
/// let mut emitter = Emitter::new(Time, Clock, Pin, Pin);
/// // No valid time, nothing to lock onto
/// assert_eq!(emitter.poll(&true), PollResult::Idle);
/// assert_eq!(emitter.fire(), None);
/// ```
pub struct Emitter<T, K, C, I> {
	time: T,
	clock: K,
	outputs: Outputs<C, I>,
	state: SyncState,
	/// Last state of the enable switch seen by [`Emitter::poll`].
	enabled: bool,
	/// Monotonic time of the last valid time sample.
	last_valid_ms: u64,
	/// Monotonic time of the last status line.
	last_status_ms: u64
}

impl<T, K, C, I> Emitter<T, K, C, I>
where T: TimeSource, K: MonotonicClock, C: Carrier, I: Indicator
{
	/// Create an emitter in the unsynchronized state with carrier and indicator off.
	pub fn new(time: T, clock: K, carrier: C, indicator: I) -> Self {
		let now = clock.now_ms();
		let mut emitter = Emitter {
			time,
			clock,
			outputs: Outputs { carrier, indicator, level: None, indicator_fault: false },
			state: SyncState::Unsynchronized { attempt_started_ms: now, last_second: None },
			enabled: true,
			last_valid_ms: now,
			last_status_ms: now
		};
		emitter.enter_unsynchronized(now);
		emitter
	}

	/// The current synchronization state.
	pub fn state(&self) -> &SyncState {
		&self.state
	}

	/// Whether the emitter is locked and transmitting.
	pub fn is_locked(&self) -> bool {
		matches!(self.state, SyncState::Locked { .. })
	}

	/// Whether the enable switch was on at the last poll.
	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	/// The carrier driver.
	pub fn carrier(&self) -> &C {
		&self.outputs.carrier
	}

	/// The indicator driver.
	pub fn indicator(&self) -> &I {
		&self.outputs.indicator
	}

	/// Drop any lock and switch the carrier and indicator off, e.g. before shutting down.
	///
	/// The next [`Emitter::poll`] starts a new sync attempt.
	pub fn stop(&mut self) {
		let now = self.clock.now_ms();
		if self.is_locked() {
			info!("DCF77 signal generation stopped");
		}
		self.enter_unsynchronized(now);
	}

	/// Wait for the next second boundary by sampling the time source in a tight loop.
	///
	/// This is a one-time startup cost, not part of steady-state operation: the time source is
	/// checked up to `max_checks` times, calling `pause` between checks, and the loop gives up once
	/// `timeout_ms` passed on the monotonic clock. Once the second changes the state machine is
	/// armed so that the next [`Emitter::poll`] locks immediately.
	///
	/// Returns the number of checks made, or `None` if no boundary was found, the time source was
	/// invalid at the start, or the emitter was not unsynchronized.
	pub fn align_startup(&mut self, mut pause: impl FnMut(), max_checks: u32, timeout_ms: u64)
		-> Option<u32>
	{
		if self.is_locked() {
			return None;
		}
		let start = self.time.sample();
		if !start.valid {
			return None;
		}
		let start_second = start.second_of_minute();
		let started_ms = self.clock.now_ms();

		for checks in 1..=max_checks {
			let sample = self.time.sample();
			if sample.valid && sample.second_of_minute() != start_second {
				info!("Precise second boundary detected after {} checks", checks);
				if let SyncState::Unsynchronized { last_second, .. } = &mut self.state {
					*last_second = Some(start_second);
				}
				return Some(checks);
			}
			if self.clock.now_ms().saturating_sub(started_ms) >= timeout_ms {
				debug!("No second boundary within {} ms ({} checks)", timeout_ms, checks);
				return None;
			}
			pause();
		}

		debug!("No second boundary within {} checks", max_checks);
		None
	}

	/// Run one housekeeping poll.
	///
	/// Handles the enable switch, boundary detection while unsynchronized, the stale time watchdog
	/// while locked, and periodic status logging. Returns [`PollResult::StartCadence`] when the
	/// emitter locked during this poll.
	pub fn poll(&mut self, switch: &impl EnableSwitch) -> PollResult {
		let now = self.clock.now_ms();

		if !switch.is_enabled() {
			if self.enabled {
				warn!("DCF77 synchronization disabled by switch");
				self.enabled = false;
				self.enter_unsynchronized(now);
			}
			let sample = self.time.sample();
			self.report_status(now, &sample);
			return PollResult::Idle;
		}
		if !self.enabled {
			info!("DCF77 synchronization re-enabled by switch");
			self.enabled = true;
			self.enter_unsynchronized(now);
		}

		let sample = self.time.sample();
		let result = match self.state {
			SyncState::Unsynchronized { attempt_started_ms, last_second } => {
				self.try_lock(now, &sample, attempt_started_ms, last_second)
			},
			SyncState::Locked { .. } => {
				if sample.valid {
					self.last_valid_ms = now;
				} else if now.saturating_sub(self.last_valid_ms) >= STALE_TIME_MS {
					error!(
						"No valid time for {} seconds - forcing resynchronization",
						STALE_TIME_MS / 1000
					);
					self.enter_unsynchronized(now);
				}
				PollResult::Idle
			}
		};

		self.report_status(now, &sample);
		result
	}

	/// Handle one scheduled tick.
	///
	/// Returns the delay in milliseconds until the next call, or `None` when the tick cadence ends
	/// because the emitter is (no longer) locked. A resync requested by the drift tracker moves the
	/// emitter back to [`SyncState::Unsynchronized`] instead of ticking.
	pub fn fire(&mut self) -> Option<u32> {
		let now = self.clock.now_ms();
		let SyncState::Locked { generator, drift } = &mut self.state else {
			return None;
		};

		let interval = match drift.on_fire(now) {
			Fire::Tick { interval_ms, .. } => interval_ms,
			Fire::Resync(_) => {
				self.enter_unsynchronized(now);
				return None;
			}
		};

		let sample = self.time.sample();
		if sample.valid {
			self.last_valid_ms = now;
			let tick = generator.tick(&sample);
			if let Some((previous, observed)) = tick.discontinuity {
				warn!("Second transition irregular: {} -> {}", previous, observed);
				drift.clear();
			}
			if tick.minute_complete {
				debug!(
					"DCF77 minute complete. Time: {:02}:{:02}:{:02}, sent {}",
					sample.hour, sample.minute, sample.second, generator.frame()
				);
			}
			if let Some(on) = tick.key {
				self.outputs.key(on);
			}
		}

		self.is_locked().then_some(interval)
	}

	/// Lock onto `sample` if a boundary was crossed or the attempt timed out.
	fn try_lock(&mut self, now: u64, sample: &TimeSample, started: u64, last_second: Option<u8>)
		-> PollResult
	{
		if !sample.valid {
			return PollResult::Idle;
		}

		let second = sample.second_of_minute();
		let waited = now.saturating_sub(started);
		match last_second {
			Some(previous) if previous != second => {
				info!("Second transition detected after {} ms", waited);
			},
			_ if waited >= SYNC_TIMEOUT_MS => {
				warn!("Second sync timeout - continuing anyway");
			},
			_ => {
				if let SyncState::Unsynchronized { last_second, .. } = &mut self.state {
					*last_second = Some(second);
				}
				return PollResult::Idle;
			}
		}

		self.state = SyncState::Locked {
			generator: SignalGenerator::new(sample),
			drift: DriftTracker::new(now)
		};
		self.last_valid_ms = now;
		info!("DCF77 synchronization enabled. Starting signal generation");
		PollResult::StartCadence
	}

	/// Start a new sync attempt, discarding any lock, and switch the outputs off.
	fn enter_unsynchronized(&mut self, now: u64) {
		let sample = self.time.sample();
		self.state = SyncState::Unsynchronized {
			attempt_started_ms: now,
			last_second: sample.valid.then(|| sample.second_of_minute())
		};
		self.outputs.key(false);
	}

	/// Log a status line if [`STATUS_INTERVAL_MS`] passed since the last one.
	fn report_status(&mut self, now: u64, sample: &TimeSample) {
		if now.saturating_sub(self.last_status_ms) < STATUS_INTERVAL_MS {
			return;
		}
		self.last_status_ms = now;

		if sample.valid {
			info!(
				"DCF77 Status: {}, Time: {:02}:{:02}:{:02}, DST: {}",
				match (self.enabled, self.is_locked()) {
					(false, _) => "Disabled",
					(true, true) => "Transmitting",
					(true, false) => "Initializing"
				},
				sample.hour, sample.minute, sample.second,
				if sample.is_dst { "ON" } else { "OFF" }
			);
		} else {
			error!("DCF77 Status: Waiting for valid time source");
		}
	}
}
