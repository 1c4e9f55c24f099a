//! Host clocks: the monotonic scheduling clock and the wall-clock time source.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use chrono_tz::{OffsetComponents, Tz};
use emitter::TimeSample;
use emitter::driver::{MonotonicClock, TimeSource};
use log::{info, warn};
use sntp::SntpError;

use crate::error::AppError;

/// Milliseconds since the clock was created.
pub struct HostClock(Instant);

impl HostClock {
	pub fn new() -> HostClock {
		HostClock(Instant::now())
	}
}

impl MonotonicClock for HostClock {
	fn now_ms(&self) -> u64 {
		self.0.elapsed().as_millis() as u64
	}
}

/// A successful NTP measurement.
#[derive(Debug, Clone, Copy)]
struct NtpFix {
	/// Offset to add to the host clock.
	offset: TimeDelta,
	/// When the measurement was taken.
	taken: Instant
}

/// Where the wall clock comes from.
enum WallClock {
	/// The host clock as is.
	Host,
	/// A manually set time, advancing from `set_at`.
	Fixed { time: DateTime<Utc>, set_at: Instant },
	/// The host clock corrected by the latest NTP fix, valid while the fix is younger than
	/// `max_age`.
	Ntp { fix: Arc<Mutex<Option<NtpFix>>>, max_age: Duration }
}

/// Civil time in a given timezone, from the host clock, a manually set time, or NTP.
pub struct HostTimeSource {
	tz: Tz,
	clock: WallClock
}

impl HostTimeSource {
	/// Use the host clock as is.
	pub fn host(tz: Tz) -> HostTimeSource {
		HostTimeSource { tz, clock: WallClock::Host }
	}

	/// Start the wall clock at `time`, running from now.
	pub fn fixed(tz: Tz, time: DateTime<Utc>) -> HostTimeSource {
		HostTimeSource { tz, clock: WallClock::Fixed { time, set_at: Instant::now() } }
	}

	/// Correct the host clock by querying `server` every `refresh` in a background thread.
	///
	/// The first query runs before returning. Samples are invalid until a query succeeds, and
	/// again whenever the last successful query is older than `max_age`.
	///
	/// # Errors
	///
	/// Returns [`AppError::Sntp`] if the server address is empty or resolves to nothing. Network
	/// failures are not errors, they only delay the first valid sample.
	pub fn ntp(tz: Tz, server: String, refresh: Duration, max_age: Duration)
		-> Result<HostTimeSource, AppError>
	{
		let fix = Arc::new(Mutex::new(None));
		match refresh_fix(&server, &fix) {
			Err(e @ (SntpError::EmptyAddress | SntpError::NoAddresses(_))) => return Err(e.into()),
			Err(e) => warn!("NTP {}: {}, retrying in {} s", server, e, refresh.as_secs()),
			Ok(()) => {}
		}

		let shared = fix.clone();
		thread::Builder::new()
			.name(String::from("ntp"))
			.spawn(move || {
				// Runs until the time source is dropped
				while Arc::strong_count(&shared) > 1 {
					thread::sleep(refresh);
					if let Err(e) = refresh_fix(&server, &shared) {
						warn!("NTP {}: {}, retrying in {} s", server, e, refresh.as_secs());
					}
				}
			})?;

		Ok(HostTimeSource { tz, clock: WallClock::Ntp { fix, max_age } })
	}

	/// Current UTC time, or `None` if it is not trustworthy.
	fn now_utc(&self) -> Option<DateTime<Utc>> {
		match &self.clock {
			WallClock::Host => Some(Utc::now()),
			WallClock::Fixed { time, set_at } => {
				TimeDelta::from_std(set_at.elapsed()).ok().map(|d| *time + d)
			},
			WallClock::Ntp { fix, max_age } => {
				let fix = *fix.lock().unwrap_or_else(PoisonError::into_inner);
				fix.filter(|f| f.taken.elapsed() < *max_age)
					.map(|f| Utc::now() + f.offset)
			}
		}
	}
}

impl TimeSource for HostTimeSource {
	fn sample(&self) -> TimeSample {
		match self.now_utc() {
			Some(t) => civil_sample(&self.tz, t),
			None => TimeSample::INVALID
		}
	}
}

/// Query `server` once and store the result in `fix` on success. `fix` is left alone on failure.
fn refresh_fix(server: &str, fix: &Mutex<Option<NtpFix>>) -> Result<(), SntpError> {
	let o = sntp::get_clock_offset(server)?;
	info!(
		"NTP {}: clock offset {} ms (+/- {} ms)",
		server, o.offset_nanos / 1_000_000, o.error_nanos / 1_000_000
	);
	let offset = TimeDelta::nanoseconds(o.offset_nanos);
	*fix.lock().unwrap_or_else(PoisonError::into_inner) = Some(NtpFix { offset, taken: Instant::now() });
	Ok(())
}

/// Convert `utc` into a sample of civil time in `tz`.
fn civil_sample(tz: &Tz, utc: DateTime<Utc>) -> TimeSample {
	let local = utc.with_timezone(tz);
	// chrono represents a leap second as second 59 with nanoseconds past one second
	let leap = local.nanosecond() >= 1_000_000_000;
	TimeSample {
		hour: local.hour() as u8,
		minute: local.minute() as u8,
		second: local.second() as u8 + leap as u8,
		day_of_month: local.day() as u8,
		month: local.month() as u8,
		year: local.year().rem_euclid(100) as u8,
		day_of_week: local.weekday().number_from_monday() as u8,
		is_dst: !local.offset().dst_offset().is_zero(),
		valid: true
	}
}
