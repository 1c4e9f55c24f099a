//! Generate a [DCF77] time signal from a host clock.
//!
//! This crate is the hardware-independent core of a DCF77 emitter: it turns snapshots of civil
//! time into the amplitude keying of a 77.5 kHz (or any other) carrier, one 100 ms tick at a time.
//! The pieces are:
//!
//! | Module        | Responsibility                                                          |
//! | ------------- | ----------------------------------------------------------------------- |
//! | [`telegram`]  | Encoding the next minute into 60 pulse symbols                          |
//! | [`generator`] | Keying the carrier within each second                                   |
//! | [`scheduler`] | Drift-compensated 100 ms tick intervals                                 |
//! | [`sync`]      | Locking onto the second boundary and supervising the time source        |
//! | [`driver`]    | Traits for the time source, monotonic clock, carrier, indicator, switch |
//!
//! This crate is `no_std` and does not allocate. Timers, threads, and hardware access are the job
//! of the embedding application, which implements the [`driver`] traits and calls
//! [`Emitter::poll`] and [`Emitter::fire`] on its own cadences.
//!
//! [DCF77]: https://en.wikipedia.org/wiki/DCF77

#![no_std]

pub mod driver;
pub mod generator;
pub mod scheduler;
pub mod sync;
pub mod telegram;

#[cfg(test)]
mod testing;

pub use sync::{Emitter, PollResult, SyncState};
pub use telegram::{MinuteFrame, PulseSymbol};

/// A snapshot of civil time as reported by a [`driver::TimeSource`].
///
/// All fields are plain calendar values in the timezone being transmitted. No range checking is
/// done by the emitter beyond what is documented per field, so sources must only report `valid`
/// samples with sensible values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimeSample {
	/// Hour, ranged [0, 23].
	pub hour: u8,
	/// Minute, ranged [0, 59].
	pub minute: u8,
	/// Second, ranged [0, 60]. A leap second (60) is transmitted as second 0.
	pub second: u8,
	/// Day of month, ranged [1, 31].
	pub day_of_month: u8,
	/// Month, ranged [1, 12].
	pub month: u8,
	/// Year of the century, ranged [0, 99]. Larger values are reduced modulo 100.
	pub year: u8,
	/// Day of week, ranged [1, 7] with 1 meaning Monday. Sources counting from Sunday may report
	/// Sunday as 0, which is transmitted as 7.
	pub day_of_week: u8,
	/// Whether daylight saving time is in effect.
	pub is_dst: bool,
	/// Whether the source currently has trustworthy time. All other fields are meaningless when
	/// this is `false`.
	pub valid: bool
}

impl TimeSample {
	/// A sample for a time source without usable time.
	pub const INVALID: TimeSample = TimeSample {
		hour: 0,
		minute: 0,
		second: 0,
		day_of_month: 0,
		month: 0,
		year: 0,
		day_of_week: 0,
		is_dst: false,
		valid: false
	};

	/// The second used for signal generation, which folds a leap second into second 0.
	#[inline]
	pub fn second_of_minute(&self) -> u8 {
		if self.second >= 60 { 0 } else { self.second }
	}
}
