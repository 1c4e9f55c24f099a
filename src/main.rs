//! Emit a DCF77 time signal for setting radio-controlled clocks.
//!
//! This application keys a carrier with the [DCF77] telegram for the current civil time, locking
//! onto the host clock's second boundaries and staying aligned with drift-compensated 100 ms ticks.
//! The carrier is either a 15.5 kHz tone on the default audio output, whose 5th harmonic falls on
//! the 77.5 kHz DCF77 frequency and is picked up by nearby receivers as stray RF, or a GPIO
//! switching an external oscillator.
//!
//! [DCF77]: https://en.wikipedia.org/wiki/DCF77
//!
//! # Command Line Arguments
//!
//! General form: `dcf77-emitter [options...]`
//!
//! | Short form | Long form         | Argument              | Default         | Description                              |
//! | ---------- | ----------------- | --------------------- | --------------- | ---------------------------------------- |
//! | `-z`       | `--timezone`      | IANA timezone name    | `Europe/Berlin` | The civil timezone to transmit           |
//! | `-t`       | `--time`          | Date time string      | Current time    | The starting time to transmit            |
//! |            | `--ntp`           | Hostname or IP        | None            | Use [NTP] to correct the host clock      |
//! |            | `--ntp-refresh`   | Seconds               | 600             | Interval between NTP queries             |
//! |            | `--ntp-max-age`   | Seconds               | 3600            | Age at which an NTP fix becomes invalid  |
//! |            | `--carrier`       | `audio`, `gpio`, `none` | `audio`       | The carrier driver                       |
//! |            | `--carrier-pin`   | Path                  | None            | GPIO value file for `--carrier gpio`     |
//! |            | `--off-level`     | 0 to 1                | 0               | Audio amplitude while keyed off          |
//! |            | `--led-pin`       | Path                  | None            | GPIO value file for the indicator        |
//! |            | `--poll-interval` | Milliseconds          | 10              | Housekeeping poll period                 |
//! |            | `--disabled`      |                       |                 | Start with transmission disabled         |
//! | `-v`       | `--verbose`       |                       |                 | More logging, repeat for trace           |
//!
//! The date time string has the form `YYYY-MM-DD HH:MM:SS[.fff] +HH:MM`. `--time` and `--ntp` are
//! mutually exclusive. Logging can also be configured with `RUST_LOG`.
//!
//! While running, lines typed on stdin control transmission: `on`/`enable`, `off`/`disable`, and
//! `quit`/`exit`.
//!
//! [NTP]: sntp
//!
//! # Examples
//!
//! Transmit the host's time in Germany
//! ```sh
//! dcf77-emitter
//! ```
//!
//! Transmit NTP time, keying a GPIO
//! ```sh
//! dcf77-emitter --ntp pool.ntp.org --carrier gpio --carrier-pin /sys/class/gpio/gpio18/value
//! ```
//!
//! Transmit a fixed starting time
//! ```sh
//! dcf77-emitter -t "2024-04-12 10:27:00.519 +02:00"
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use emitter::Emitter;
use emitter::sync::{ALIGN_MAX_CHECKS, ALIGN_TIMEOUT_MS};
use log::{LevelFilter, error, info};

use args::Arguments;
use clock::{HostClock, HostTimeSource};
use drivers::{CarrierOutput, IndicatorOutput, LogPin, SysfsPin};
use error::AppError;

mod args;
mod clock;
mod drivers;
mod error;
mod runtime;

/// Pause between checks while aligning to the first second boundary.
const ALIGN_PAUSE: Duration = Duration::from_micros(500);

/// Set up the drivers and run the emitter until quit.
fn run(args: Arguments) -> Result<(), AppError> {
	let clock = HostClock::new();
	let time = match (args.time, args.ntp) {
		(Some(t), _) => HostTimeSource::fixed(args.timezone, t.to_utc()),
		(None, Some(server)) => HostTimeSource::ntp(
			args.timezone,
			server,
			Duration::from_secs(args.ntp_refresh),
			Duration::from_secs(args.ntp_max_age)
		)?,
		(None, None) => HostTimeSource::host(args.timezone)
	};

	let carrier = CarrierOutput::open(args.carrier, args.carrier_pin.as_deref(), args.off_level)?;
	let indicator = match &args.led_pin {
		Some(path) => IndicatorOutput::Gpio(SysfsPin::open(path)?),
		None => IndicatorOutput::Log(LogPin::new("Indicator"))
	};

	let enabled = Arc::new(AtomicBool::new(!args.disabled));
	let quit = Arc::new(AtomicBool::new(false));
	drivers::spawn_console(enabled.clone(), quit.clone())?;

	info!("DCF77 emitter starting, timezone {}", args.timezone);
	let mut emitter = Emitter::new(&time, &clock, carrier, indicator);
	if enabled.load(Ordering::Relaxed) {
		emitter.align_startup(|| thread::sleep(ALIGN_PAUSE), ALIGN_MAX_CHECKS, ALIGN_TIMEOUT_MS);
	}

	runtime::run(&mut emitter, &clock, &*enabled, &quit, args.poll_interval, |ms| {
		thread::sleep(Duration::from_millis(ms))
	});

	emitter.stop();
	info!("DCF77 emitter stopped");
	Ok(())
}

/// Main program entry point.
///
/// Parses input arguments, sets up logging and runs the emitter. See [`crate`] documentation for
/// details.
fn main() -> ExitCode {
	let args = Arguments::parse();

	let level = match args.verbose {
		0 => LevelFilter::Info,
		1 => LevelFilter::Debug,
		_ => LevelFilter::Trace
	};
	env_logger::Builder::new()
		.filter_level(level)
		.parse_default_env()
		.init();

	match run(args) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{}", e);
			ExitCode::FAILURE
		}
	}
}
