//! Per-second signal generation.
//!
//! Each second is divided into ten 100 ms sub-slots. The carrier edges of a DCF77 second all fall
//! on sub-slot boundaries:
//!
//! | Sub-slot | Short pulse (`0`) | Long pulse (`1`) | No pulse (marker) |
//! | -------- | ----------------- | ---------------- | ----------------- |
//! | 0        | carrier off       | carrier off      | carrier on        |
//! | 1        | carrier on        | -                | -                 |
//! | 2        | carrier on        | carrier on       | carrier on        |
//! | 3-9      | -                 | -                | -                 |
//!
//! [`SignalGenerator`] consumes one tick at a time and reports which level, if any, the carrier
//! and indicator should be driven to.

use crate::TimeSample;
use crate::telegram::{encode, MinuteFrame, PulseSymbol};

/// Number of ticks per second.
pub const SUB_SLOTS: u8 = 10;

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
	/// New carrier/indicator level, or `None` to leave the outputs unchanged.
	pub key: Option<bool>,
	/// Set when the observed second did not follow the previous one. The payload is
	/// `(previous, observed)`.
	pub discontinuity: Option<(u8, u8)>,
	/// Set on the last sub-slot of second 59, i.e. the full telegram has been sent.
	pub minute_complete: bool
}

/// Generates carrier keying for the current second from the current [`MinuteFrame`].
#[derive(Debug, Clone)]
pub struct SignalGenerator {
	/// Telegram for the upcoming minute, refreshed on every second boundary.
	frame: MinuteFrame,
	/// Sub-slot the next tick falls into, ranged [0, 9].
	sub_slot: u8,
	/// Second of the minute currently being transmitted.
	second: u8
}

impl SignalGenerator {
	/// Create a generator aligned to the start of the second in `sample`.
	pub fn new(sample: &TimeSample) -> SignalGenerator {
		SignalGenerator {
			frame: encode(sample),
			sub_slot: 0,
			second: sample.second_of_minute()
		}
	}

	/// The telegram currently being transmitted.
	pub fn frame(&self) -> &MinuteFrame {
		&self.frame
	}

	/// The sub-slot the next tick falls into.
	pub fn sub_slot(&self) -> u8 {
		self.sub_slot
	}

	/// The second of the minute currently being transmitted.
	pub fn second(&self) -> u8 {
		self.second
	}

	/// Advance by one tick, given a fresh and valid `sample` of the time source.
	///
	/// If the second in `sample` differs from the previous tick, the frame is rebuilt from `sample`
	/// and the sub-slot counter restarts at 0. A second that is not the successor of the previous one
	/// is reported as a discontinuity.
	pub fn tick(&mut self, sample: &TimeSample) -> Tick {
		let mut discontinuity = None;
		let second = sample.second_of_minute();
		if second != self.second {
			if second != (self.second + 1) % 60 {
				discontinuity = Some((self.second, second));
			}
			self.frame = encode(sample);
			self.second = second;
			self.sub_slot = 0;
		}

		let symbol = self.frame.symbol(second);
		let slot = self.sub_slot;
		self.sub_slot += 1;

		let mut minute_complete = false;
		let key = match slot {
			// Open the gap, except for the minute marker which keeps the carrier on
			0 => Some(!symbol.has_gap()),
			1 if symbol == PulseSymbol::ShortPulse => Some(true),
			2 => Some(true),
			9 => {
				self.sub_slot = 0;
				minute_complete = second == 59;
				None
			},
			_ => None
		};

		Tick { key, discontinuity, minute_complete }
	}
}

#[cfg(test)]
mod tests {
	extern crate std;
	use std::vec::Vec;
	use super::*;

	fn sample(minute: u8, second: u8) -> TimeSample {
		TimeSample {
			hour: 12,
			minute,
			second,
			day_of_month: 1,
			month: 6,
			year: 24,
			day_of_week: 6,
			is_dst: false,
			valid: true
		}
	}

	/// Run ten ticks within `second` and collect the keying.
	fn run_second(g: &mut SignalGenerator, minute: u8, second: u8) -> Vec<Option<bool>> {
		(0..SUB_SLOTS).map(|_| g.tick(&sample(minute, second)).key).collect()
	}

	#[test]
	fn short_pulse_test() {
		let s = sample(34, 0);
		let mut g = SignalGenerator::new(&s);
		assert_eq!(g.frame()[0], PulseSymbol::ShortPulse);
		assert_eq!(
			run_second(&mut g, 34, 0),
			[Some(false), Some(true), Some(true), None, None, None, None, None, None, None]
		);
		assert_eq!(g.sub_slot(), 0);
	}

	#[test]
	fn long_pulse_test() {
		// Second 20 is always a long pulse
		let s = sample(34, 20);
		let mut g = SignalGenerator::new(&s);
		assert_eq!(
			run_second(&mut g, 34, 20),
			[Some(false), None, Some(true), None, None, None, None, None, None, None]
		);
	}

	#[test]
	fn minute_marker_test() {
		let s = sample(34, 59);
		let mut g = SignalGenerator::new(&s);
		let ticks: Vec<Tick> = (0..SUB_SLOTS).map(|_| g.tick(&s)).collect();
		assert_eq!(ticks[0].key, Some(true));
		assert_eq!(ticks[1].key, None);
		assert_eq!(ticks[2].key, Some(true));
		assert!(ticks[..9].iter().all(|t| !t.minute_complete));
		assert!(ticks[9].minute_complete);
	}

	#[test]
	fn boundary_test() {
		let mut g = SignalGenerator::new(&sample(34, 10));
		g.tick(&sample(34, 10));
		g.tick(&sample(34, 10));
		g.tick(&sample(34, 10));
		assert_eq!(g.sub_slot(), 3);

		// New second resets the counter and is not a discontinuity
		let t = g.tick(&sample(34, 11));
		assert_eq!(t.key, Some(false));
		assert_eq!(t.discontinuity, None);
		assert_eq!(g.second(), 11);
		assert_eq!(g.sub_slot(), 1);

		// Minute wrap is a regular transition, and refreshes the frame
		let mut g = SignalGenerator::new(&sample(34, 59));
		let before = *g.frame();
		let t = g.tick(&sample(35, 0));
		assert_eq!(t.discontinuity, None);
		assert_ne!(*g.frame(), before);
		assert_eq!(*g.frame(), encode(&sample(35, 0)));
	}

	#[test]
	fn discontinuity_test() {
		let mut g = SignalGenerator::new(&sample(34, 10));
		g.tick(&sample(34, 10));
		let t = g.tick(&sample(34, 13));
		assert_eq!(t.discontinuity, Some((10, 13)));
		assert_eq!(t.key, Some(false));
		assert_eq!(g.sub_slot(), 1);

		let t = g.tick(&sample(34, 12));
		assert_eq!(t.discontinuity, Some((13, 12)));
	}

	#[test]
	fn leap_second_test() {
		// Second 60 is handled as second 0
		let mut g = SignalGenerator::new(&sample(59, 59));
		let t = g.tick(&sample(59, 60));
		assert_eq!(t.discontinuity, None);
		assert_eq!(g.second(), 0);
		assert_eq!(t.key, Some(false));
	}

	#[test]
	fn long_second_test() {
		// A second observed for more than ten ticks keeps cycling through the sub-slots
		let s = sample(34, 5);
		let mut g = SignalGenerator::new(&s);
		for _ in 0..25 {
			g.tick(&s);
			assert!(g.sub_slot() < SUB_SLOTS);
		}
		assert_eq!(g.sub_slot(), 5);
	}
}
