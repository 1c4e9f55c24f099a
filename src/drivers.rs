//! Carrier, indicator and enable switch drivers for the host.

use std::f32::consts::TAU;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use emitter::driver::{Carrier, DriverError, Indicator};
use log::{debug, error, info, trace, warn};

use crate::args::CarrierKind;
use crate::error::AppError;

/// Audio output sample rate.
const SAMPLE_RATE: u32 = 48000;
/// Tone frequency. The 5th harmonic is the DCF77 carrier at 77.5 kHz.
const TONE_HZ: f32 = 15500.0;

/// Writes a keyed sine tone into audio buffers.
///
/// The tone runs continuously so that keying never introduces phase jumps; only the amplitude
/// changes between full scale and `off_level`.
struct ToneWriter {
	/// Phase of the next sample, ranged [0, 1).
	phase: f32,
	keyed: Arc<AtomicBool>,
	off_level: f32
}

impl ToneWriter {
	fn write(&mut self, data: &mut [f32]) {
		let step = TONE_HZ / SAMPLE_RATE as f32;
		let amplitude = if self.keyed.load(Ordering::Relaxed) { 1.0 } else { self.off_level };
		for v in data.iter_mut() {
			*v = amplitude * (TAU * self.phase).sin();
			self.phase = (self.phase + step).fract();
		}
	}
}

/// Carrier emitted by the default audio output device.
///
/// This works by taking advantage of stray RF created by audio hardware as a side effect of its
/// operation: the audio itself is not useful, receivers listen for RF.
pub struct AudioCarrier {
	keyed: Arc<AtomicBool>,
	/// Keeps the stream playing.
	_stream: cpal::Stream
}

impl AudioCarrier {
	/// Open the default output device at 48 kHz and start playing the carrier, initially off.
	pub fn new(off_level: f32) -> Result<AudioCarrier, AppError> {
		let host = cpal::default_host();
		let device = host.default_output_device().ok_or(AppError::NoOutputDevice)?;
		let config = cpal::StreamConfig {
			channels: 1,
			sample_rate: cpal::SampleRate(SAMPLE_RATE),
			buffer_size: cpal::BufferSize::Fixed(1024)
		};

		let keyed = Arc::new(AtomicBool::new(false));
		let mut writer = ToneWriter { phase: 0.0, keyed: keyed.clone(), off_level };
		let stream = device.build_output_stream(
			&config,
			move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| writer.write(data),
			audio_error,
			None
		)?;
		stream.play()?;
		info!("Audio carrier on {}", device.name().unwrap_or_else(|_| String::from("unknown device")));

		Ok(AudioCarrier { keyed, _stream: stream })
	}
}

impl Carrier for AudioCarrier {
	fn set_carrier(&mut self, on: bool) -> Result<(), DriverError> {
		self.keyed.store(on, Ordering::Relaxed);
		Ok(())
	}
}

/// Error handler for audio streaming.
fn audio_error(e: cpal::StreamError) {
	error!("Error occurred on the audio stream: {}", e);
}

/// A GPIO exposed through a sysfs `value` file, e.g. `/sys/class/gpio/gpio18/value`.
///
/// The pin must already be exported and configured as an output.
pub struct SysfsPin {
	path: PathBuf,
	file: File,
	/// Level last written successfully.
	level: Option<bool>
}

impl SysfsPin {
	pub fn open(path: &Path) -> Result<SysfsPin, AppError> {
		let file = OpenOptions::new()
			.write(true)
			.open(path)
			.map_err(|source| AppError::Pin { path: path.to_path_buf(), source })?;
		Ok(SysfsPin { path: path.to_path_buf(), file, level: None })
	}

	fn write(&mut self, on: bool) -> Result<(), DriverError> {
		if self.level == Some(on) {
			return Ok(());
		}
		let result: io::Result<()> = self.file.seek(SeekFrom::Start(0))
			.and_then(|_| self.file.write_all(if on { b"1" } else { b"0" }))
			.and_then(|_| self.file.flush());
		match result {
			Ok(()) => {
				self.level = Some(on);
				Ok(())
			},
			Err(e) => {
				self.level = None;
				debug!("Writing {}: {}", self.path.display(), e);
				Err(match e.kind() {
					io::ErrorKind::NotFound => DriverError::Unavailable,
					_ => DriverError::Write
				})
			}
		}
	}
}

impl Carrier for SysfsPin {
	fn set_carrier(&mut self, on: bool) -> Result<(), DriverError> {
		self.write(on)
	}
}

impl Indicator for SysfsPin {
	fn set_indicator(&mut self, on: bool) -> Result<(), DriverError> {
		self.write(on)
	}
}

/// An output without hardware that only logs its edges.
pub struct LogPin(&'static str);

impl LogPin {
	pub fn new(name: &'static str) -> LogPin {
		LogPin(name)
	}
}

impl Carrier for LogPin {
	fn set_carrier(&mut self, on: bool) -> Result<(), DriverError> {
		trace!("{} {}", self.0, if on { "on" } else { "off" });
		Ok(())
	}
}

impl Indicator for LogPin {
	fn set_indicator(&mut self, on: bool) -> Result<(), DriverError> {
		trace!("{} {}", self.0, if on { "on" } else { "off" });
		Ok(())
	}
}

/// The carrier selected on the command line.
pub enum CarrierOutput {
	Audio(AudioCarrier),
	Gpio(SysfsPin),
	Log(LogPin)
}

impl CarrierOutput {
	/// Open the carrier of kind `kind`. `pin` is the value file keyed by [`CarrierKind::Gpio`].
	pub fn open(kind: CarrierKind, pin: Option<&Path>, off_level: f32) -> Result<CarrierOutput, AppError> {
		match (kind, pin) {
			(CarrierKind::Audio, _) => Ok(CarrierOutput::Audio(AudioCarrier::new(off_level)?)),
			(CarrierKind::Gpio, Some(path)) => Ok(CarrierOutput::Gpio(SysfsPin::open(path)?)),
			(CarrierKind::Gpio, None) => Err(AppError::MissingCarrierPin),
			(CarrierKind::None, _) => Ok(CarrierOutput::Log(LogPin::new("Carrier")))
		}
	}
}

impl Carrier for CarrierOutput {
	fn set_carrier(&mut self, on: bool) -> Result<(), DriverError> {
		match self {
			CarrierOutput::Audio(c) => c.set_carrier(on),
			CarrierOutput::Gpio(c) => c.set_carrier(on),
			CarrierOutput::Log(c) => c.set_carrier(on)
		}
	}
}

/// The indicator selected on the command line.
pub enum IndicatorOutput {
	Gpio(SysfsPin),
	Log(LogPin)
}

impl Indicator for IndicatorOutput {
	fn set_indicator(&mut self, on: bool) -> Result<(), DriverError> {
		match self {
			IndicatorOutput::Gpio(i) => i.set_indicator(on),
			IndicatorOutput::Log(i) => i.set_indicator(on)
		}
	}
}

/// Commands accepted on stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
	Enable,
	Disable,
	Quit
}

impl Command {
	/// Parse one line of console input, ignoring case and surrounding whitespace.
	pub fn parse(line: &str) -> Option<Command> {
		match line.trim().to_ascii_lowercase().as_str() {
			"on" | "enable" => Some(Command::Enable),
			"off" | "disable" => Some(Command::Disable),
			"quit" | "exit" => Some(Command::Quit),
			_ => None
		}
	}
}

/// Apply `command` to the shared enable switch and quit flag.
fn apply(command: Command, enabled: &AtomicBool, quit: &AtomicBool) {
	match command {
		Command::Enable => enabled.store(true, Ordering::Relaxed),
		Command::Disable => enabled.store(false, Ordering::Relaxed),
		Command::Quit => quit.store(true, Ordering::Relaxed)
	}
}

/// Spawn a thread reading console commands from stdin, acting as the enable switch.
///
/// The thread ends at end of input or after a quit command. Closing stdin does not stop the
/// emitter.
pub fn spawn_console(enabled: Arc<AtomicBool>, quit: Arc<AtomicBool>) -> Result<(), AppError> {
	thread::Builder::new()
		.name(String::from("console"))
		.spawn(move || {
			for line in io::stdin().lock().lines() {
				let line = match line {
					Ok(l) => l,
					Err(e) => {
						warn!("Failed to read console: {}", e);
						break;
					}
				};
				match Command::parse(&line) {
					Some(c) => {
						debug!("Console command {:?}", c);
						apply(c, &enabled, &quit);
						if c == Command::Quit {
							break;
						}
					},
					None if line.trim().is_empty() => (),
					None => warn!("Unknown command {:?}, expected on, off or quit", line.trim())
				}
			}
		})?;
	Ok(())
}
