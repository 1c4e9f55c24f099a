//! A logger that keeps every record in a per-thread buffer, so tests running in parallel can
//! assert on their own log output.

extern crate std;

use std::cell::RefCell;
use std::string::{String, ToString};
use std::sync::Once;
use std::vec::Vec;

use log::{Level, LevelFilter, Log, Metadata, Record};

std::thread_local! {
	static RECORDS: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

struct Capture;

impl Log for Capture {
	fn enabled(&self, _metadata: &Metadata) -> bool {
		true
	}

	fn log(&self, record: &Record) {
		RECORDS.with_borrow_mut(|r| r.push((record.level(), record.args().to_string())));
	}

	fn flush(&self) {}
}

static LOGGER: Capture = Capture;
static INIT: Once = Once::new();

/// Start capturing on the current thread, dropping anything captured so far.
pub fn capture_logs() {
	INIT.call_once(|| {
		if log::set_logger(&LOGGER).is_ok() {
			log::set_max_level(LevelFilter::Trace);
		}
	});
	RECORDS.with_borrow_mut(Vec::clear);
}

/// Messages captured on the current thread at `level` that start with `prefix`.
pub fn logged(level: Level, prefix: &str) -> Vec<String> {
	RECORDS.with_borrow(|r| {
		r.iter()
			.filter(|(l, m)| *l == level && m.starts_with(prefix))
			.map(|(_, m)| m.clone())
			.collect()
	})
}
