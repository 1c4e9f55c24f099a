//! Interfaces to the collaborators the emitter consumes.
//!
//! The emitter never touches hardware or the system clock directly. Instead each concern is a
//! small trait, implemented once per target and injected at construction:
//!
//! | Trait               | Responsibility                                             |
//! | ------------------- | ---------------------------------------------------------- |
//! | [`TimeSource`]      | Civil time as a validated [`TimeSample`] snapshot          |
//! | [`MonotonicClock`]  | Millisecond elapsed time used for scheduling and drift math |
//! | [`Carrier`]         | On/off keying of the RF carrier                            |
//! | [`Indicator`]       | Visual mirror of the carrier state                         |
//! | [`EnableSwitch`]    | Manual enable/disable input                                |

use core::sync::atomic::{AtomicBool, Ordering};

use crate::TimeSample;

/// The error type for carrier and indicator drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
	/// Writing the new output level failed. The driver may succeed on a later attempt.
	#[error("failed to write output level")]
	Write,
	/// The underlying device went away and will not come back without reconfiguration.
	#[error("output device unavailable")]
	Unavailable
}

/// A source of civil (wall-clock) time.
///
/// Implementations must be side-effect free: every call returns a fresh snapshot and callers never
/// cache the result across calls. A source that has no trustworthy time returns a sample with
/// [`TimeSample::valid`] set to `false`.
pub trait TimeSource {
	/// Take a snapshot of the current civil time.
	fn sample(&self) -> TimeSample;
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
	#[inline(always)]
	fn sample(&self) -> TimeSample {
		(**self).sample()
	}
}

/// A monotonic, millisecond resolution clock.
///
/// Only differences between two readings are meaningful. The clock must never run backwards.
pub trait MonotonicClock {
	/// Milliseconds elapsed since an arbitrary, fixed origin.
	fn now_ms(&self) -> u64;
}

impl<T: MonotonicClock + ?Sized> MonotonicClock for &T {
	#[inline(always)]
	fn now_ms(&self) -> u64 {
		(**self).now_ms()
	}
}

/// On/off keying of the transmitted carrier.
///
/// Called up to ten times a second while transmitting, so implementations should return quickly.
pub trait Carrier {
	/// Switch the carrier on (`true`) or off (`false`).
	fn set_carrier(&mut self, on: bool) -> Result<(), DriverError>;
}

/// Visual indicator mirroring the carrier. Failures are never fatal.
pub trait Indicator {
	/// Switch the indicator on (`true`) or off (`false`).
	fn set_indicator(&mut self, on: bool) -> Result<(), DriverError>;
}

/// The manual enable input, polled from the housekeeping cadence.
pub trait EnableSwitch {
	/// Whether transmission is currently allowed.
	fn is_enabled(&self) -> bool;
}

impl EnableSwitch for bool {
	fn is_enabled(&self) -> bool {
		*self
	}
}

impl EnableSwitch for AtomicBool {
	fn is_enabled(&self) -> bool {
		self.load(Ordering::Relaxed)
	}
}

impl<T: EnableSwitch + ?Sized> EnableSwitch for &T {
	#[inline(always)]
	fn is_enabled(&self) -> bool {
		(**self).is_enabled()
	}
}
