//! Command line argument parsing.
//!
//! See [crate] documentation for details on command line arguments and examples.

use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use clap::{ArgAction, Parser, ValueEnum};

/// Format accepted by `--time`, e.g. `2024-04-12 10:27:00.519 +02:00`.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %:z";

/// Carrier driver variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CarrierKind {
	/// A 15.5 kHz tone on the default audio output, whose 5th harmonic is 77.5 kHz.
	Audio,
	/// A GPIO exposed as a sysfs value file, switching an external 77.5 kHz oscillator.
	Gpio,
	/// No carrier, edges are only logged.
	None
}

/// Emit a DCF77 time signal for setting radio-controlled clocks.
#[derive(Debug, Parser)]
#[command(name = "dcf77-emitter", version, after_help = EXAMPLES)]
pub struct Arguments {
	/// The civil timezone to transmit (IANA name)
	#[arg(short = 'z', long, default_value = "Europe/Berlin", value_parser = parse_timezone)]
	pub timezone: Tz,

	/// Start the wall clock at this time instead of now, e.g. "2024-04-12 10:27:00 +02:00"
	#[arg(short, long, value_name = "DATETIME", value_parser = parse_time, conflicts_with = "ntp")]
	pub time: Option<DateTime<FixedOffset>>,

	/// Discipline the wall clock with this NTP server
	#[arg(long, value_name = "SERVER")]
	pub ntp: Option<String>,

	/// Seconds between NTP refreshes
	#[arg(long, value_name = "SECS", default_value_t = 600,
		value_parser = clap::value_parser!(u64).range(1..))]
	pub ntp_refresh: u64,

	/// Treat the time as invalid once the last successful NTP query is this old (seconds)
	#[arg(long, value_name = "SECS", default_value_t = 3600,
		value_parser = clap::value_parser!(u64).range(1..))]
	pub ntp_max_age: u64,

	/// The carrier driver
	#[arg(long, value_enum, default_value_t = CarrierKind::Audio)]
	pub carrier: CarrierKind,

	/// Sysfs GPIO value file keyed by `--carrier gpio`
	#[arg(long, value_name = "PATH")]
	pub carrier_pin: Option<PathBuf>,

	/// Audio carrier amplitude while keyed off, from 0 to 1
	#[arg(long, value_name = "LEVEL", default_value_t = 0.0, value_parser = parse_level)]
	pub off_level: f32,

	/// Sysfs GPIO value file for the indicator LED
	#[arg(long, value_name = "PATH")]
	pub led_pin: Option<PathBuf>,

	/// Milliseconds between housekeeping polls
	#[arg(long, value_name = "MS", default_value_t = 10,
		value_parser = clap::value_parser!(u64).range(1..=1000))]
	pub poll_interval: u64,

	/// Start with transmission disabled (type "on" to enable)
	#[arg(long)]
	pub disabled: bool,

	/// Increase logging verbosity (-v debug, -vv trace)
	#[arg(short, long, action = ArgAction::Count)]
	pub verbose: u8
}

const EXAMPLES: &str = "\
Console commands (stdin):
  on, enable    enable transmission
  off, disable  disable transmission
  quit, exit    switch the carrier off and exit

Examples:
  dcf77-emitter
  dcf77-emitter --ntp pool.ntp.org
  dcf77-emitter -t \"2024-04-12 10:27:00.519 +02:00\"
  dcf77-emitter --carrier gpio --carrier-pin /sys/class/gpio/gpio18/value";

fn parse_timezone(s: &str) -> Result<Tz, String> {
	s.parse::<Tz>().map_err(|e| format!("unknown timezone {}: {}", s, e))
}

fn parse_time(s: &str) -> Result<DateTime<FixedOffset>, String> {
	DateTime::parse_from_str(s, TIME_FORMAT)
		.map_err(|e| format!("{} (expected \"YYYY-MM-DD HH:MM:SS[.fff] +HH:MM\")", e))
}

fn parse_level(s: &str) -> Result<f32, String> {
	let level: f32 = s.parse().map_err(|e| format!("{}", e))?;
	if (0.0..=1.0).contains(&level) {
		Ok(level)
	} else {
		Err(format!("{} is not within 0 to 1", level))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Datelike, Timelike};
	use clap::error::ErrorKind;

	fn parse(args: &[&str]) -> Result<Arguments, clap::Error> {
		Arguments::try_parse_from(std::iter::once("dcf77-emitter").chain(args.iter().copied()))
	}

	#[test]
	fn defaults_test() {
		let a = parse(&[]).unwrap();
		assert_eq!(a.timezone, chrono_tz::Europe::Berlin);
		assert!(a.time.is_none());
		assert!(a.ntp.is_none());
		assert_eq!(a.ntp_refresh, 600);
		assert_eq!(a.ntp_max_age, 3600);
		assert_eq!(a.carrier, CarrierKind::Audio);
		assert_eq!(a.off_level, 0.0);
		assert!(a.led_pin.is_none());
		assert_eq!(a.poll_interval, 10);
		assert!(!a.disabled);
		assert_eq!(a.verbose, 0);
	}

	#[test]
	fn options_test() {
		let a = parse(&[
			"-z", "Europe/Vienna",
			"--ntp", "pool.ntp.org",
			"--carrier", "gpio",
			"--carrier-pin", "/sys/class/gpio/gpio18/value",
			"--led-pin", "/sys/class/gpio/gpio17/value",
			"--off-level", "0.25",
			"--disabled",
			"-vv"
		]).unwrap();
		assert_eq!(a.timezone, chrono_tz::Europe::Vienna);
		assert_eq!(a.ntp.as_deref(), Some("pool.ntp.org"));
		assert_eq!(a.carrier, CarrierKind::Gpio);
		assert_eq!(a.carrier_pin, Some(PathBuf::from("/sys/class/gpio/gpio18/value")));
		assert_eq!(a.led_pin, Some(PathBuf::from("/sys/class/gpio/gpio17/value")));
		assert_eq!(a.off_level, 0.25);
		assert!(a.disabled);
		assert_eq!(a.verbose, 2);
	}

	#[test]
	fn time_test() {
		let a = parse(&["-t", "2024-04-12 10:27:00.519 +02:00"]).unwrap();
		let t = a.time.unwrap();
		assert_eq!((t.year(), t.month(), t.day()), (2024, 4, 12));
		assert_eq!((t.hour(), t.minute(), t.second()), (10, 27, 0));
		assert_eq!(t.nanosecond(), 519_000_000);
		assert_eq!(t.offset().local_minus_utc(), 7200);

		let a = parse(&["--time", "2024-04-12 10:27:00 -07:00"]).unwrap();
		assert_eq!(a.time.unwrap().nanosecond(), 0);

		assert!(parse(&["-t", "2024-04-12"]).is_err());
	}

	#[test]
	fn invalid_test() {
		assert_eq!(
			parse(&["-t", "2024-04-12 10:27:00 +02:00", "--ntp", "pool.ntp.org"]).unwrap_err().kind(),
			ErrorKind::ArgumentConflict
		);
		assert!(parse(&["-z", "Mars/Olympus_Mons"]).is_err());
		assert!(parse(&["--off-level", "1.5"]).is_err());
		assert!(parse(&["--poll-interval", "0"]).is_err());
		assert!(parse(&["--ntp-refresh", "0"]).is_err());
		assert!(parse(&["--carrier", "laser"]).is_err());
	}
}
