//! Error types used across modules.
//!
//! Only setup can fail: once the emitter is running, driver and time source failures are handled
//! in place by the emitter itself.

use std::{io, path::PathBuf};

/// The error type for setting up the emitter.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
	/// No default audio output device exists.
	#[error("Failed to get default audio output device")]
	NoOutputDevice,
	/// The audio output stream could not be created.
	#[error("Failed to build audio stream: {0}")]
	BuildStream(#[from] cpal::BuildStreamError),
	/// The audio output stream could not be started.
	#[error("Failed to play audio stream: {0}")]
	PlayStream(#[from] cpal::PlayStreamError),
	/// A GPIO value file could not be opened. The path is provided in the payload.
	#[error("Failed to open GPIO {}: {source}", path.display())]
	Pin { path: PathBuf, source: io::Error },
	/// `--carrier gpio` was given without `--carrier-pin`.
	#[error("The GPIO carrier needs a pin, set one with --carrier-pin")]
	MissingCarrierPin,
	/// Any other I/O error, e.g. spawning a thread.
	#[error(transparent)]
	Io(#[from] io::Error),
	/// The NTP server address is unusable.
	#[error(transparent)]
	Sntp(#[from] sntp::SntpError)
}
