//! The cooperative executor running the emitter's two cadences.
//!
//! A single thread owns the [`Emitter`] and keeps two deadlines: the housekeeping poll, which
//! always runs, and the tick, which only exists while the emitter is locked. The loop sleeps until
//! the earlier deadline, handles it, and repeats. Ticks take precedence when both are due, so the
//! carrier edges stay as close to their schedule as possible.

use std::sync::atomic::{AtomicBool, Ordering};

use emitter::driver::{Carrier, EnableSwitch, Indicator, MonotonicClock, TimeSource};
use emitter::{Emitter, PollResult};
use log::debug;

/// Run `emitter` until `quit` is set.
///
/// `clock` must be the clock the emitter schedules with. `sleep` is called with the number of
/// milliseconds until the next deadline.
pub fn run<T, K, C, I>(
	emitter: &mut Emitter<T, K, C, I>,
	clock: &impl MonotonicClock,
	switch: &impl EnableSwitch,
	quit: &AtomicBool,
	poll_interval_ms: u64,
	mut sleep: impl FnMut(u64)
)
where T: TimeSource, K: MonotonicClock, C: Carrier, I: Indicator
{
	let mut next_poll = clock.now_ms();
	let mut next_tick: Option<u64> = None;

	while !quit.load(Ordering::Relaxed) {
		let now = clock.now_ms();

		if let Some(due) = next_tick.filter(|&due| due <= now) {
			next_tick = emitter.fire().map(|interval| now + interval as u64);
			if next_tick.is_none() {
				debug!("Tick cadence ended {} ms after its deadline", now - due);
			}
			continue;
		}

		if next_poll <= now {
			next_poll = now + poll_interval_ms;
			if emitter.poll(switch) == PollResult::StartCadence {
				next_tick = Some(now);
			}
			continue;
		}

		let wake = next_tick.map_or(next_poll, |due| due.min(next_poll));
		sleep(wake - now);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::{Cell, RefCell};
	use std::rc::Rc;
	use emitter::TimeSample;
	use emitter::driver::DriverError;

	struct FakeClock(Cell<u64>);

	impl MonotonicClock for FakeClock {
		fn now_ms(&self) -> u64 {
			self.0.get()
		}
	}

	/// Civil time ticking with the fake clock, starting at 12:34:10.250.
	struct FakeTime<'a>(&'a FakeClock);

	impl TimeSource for FakeTime<'_> {
		fn sample(&self) -> TimeSample {
			let ms = self.0.now_ms() + 10_250;
			TimeSample {
				hour: 12,
				minute: 34,
				second: ((ms / 1000) % 60) as u8,
				day_of_month: 1,
				month: 6,
				year: 24,
				day_of_week: 6,
				is_dst: false,
				valid: true
			}
		}
	}

	/// Records `(time, level)` for every carrier edge.
	struct Recorder<'a> {
		clock: &'a FakeClock,
		edges: Rc<RefCell<Vec<(u64, bool)>>>
	}

	impl Carrier for Recorder<'_> {
		fn set_carrier(&mut self, on: bool) -> Result<(), DriverError> {
			self.edges.borrow_mut().push((self.clock.now_ms(), on));
			Ok(())
		}
	}

	impl Indicator for Recorder<'_> {
		fn set_indicator(&mut self, _on: bool) -> Result<(), DriverError> {
			Ok(())
		}
	}

	#[test]
	fn run_test() {
		let clock = FakeClock(Cell::new(0));
		let time = FakeTime(&clock);
		let edges = Rc::new(RefCell::new(Vec::new()));
		let carrier = Recorder { clock: &clock, edges: edges.clone() };
		let indicator = Recorder { clock: &clock, edges: Rc::new(RefCell::new(Vec::new())) };
		let mut emitter = Emitter::new(&time, &clock, carrier, indicator);
		let quit = AtomicBool::new(false);

		run(&mut emitter, &clock, &true, &quit, 10, |ms| {
			assert!(ms > 0);
			clock.0.set(clock.0.get() + ms);
			if clock.0.get() >= 3_000 {
				quit.store(true, Ordering::Relaxed);
			}
		});

		assert!(emitter.is_locked());
		// Locked at the boundary to second 11, 750 ms in. Seconds 11 and 12 are short pulses.
		assert_eq!(*edges.borrow(), [
			(0, false),
			(850, true),
			(1750, false),
			(1850, true),
			(2750, false),
			(2850, true)
		]);
	}

	#[test]
	fn disabled_test() {
		let clock = FakeClock(Cell::new(0));
		let time = FakeTime(&clock);
		let edges = Rc::new(RefCell::new(Vec::new()));
		let carrier = Recorder { clock: &clock, edges: edges.clone() };
		let indicator = Recorder { clock: &clock, edges: Rc::new(RefCell::new(Vec::new())) };
		let mut emitter = Emitter::new(&time, &clock, carrier, indicator);
		let quit = AtomicBool::new(false);
		let mut sleeps = 0;

		run(&mut emitter, &clock, &false, &quit, 10, |ms| {
			assert_eq!(ms, 10);
			sleeps += 1;
			clock.0.set(clock.0.get() + ms);
			if clock.0.get() >= 3_000 {
				quit.store(true, Ordering::Relaxed);
			}
		});

		assert!(!emitter.is_locked());
		assert_eq!(sleeps, 300);
		assert_eq!(*edges.borrow(), [(0, false)]);
	}
}
