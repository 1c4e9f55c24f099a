//! Encoding of the DCF77 minute telegram.
//!
//! See [DCF77 documentation](https://en.wikipedia.org/wiki/DCF77#Time_code_details) for details.
//!
//! Each second of the minute carries one [`PulseSymbol`]. The telegram transmitted during minute
//! `M` describes the civil time at the start of minute `M + 1`, so [`encode`] always works on the
//! minute **after** the sample it is given.
//!
//! # Examples
//!
//! ```
//! # use emitter::{TimeSample, telegram::{encode, PulseSymbol}};
//! let sample = TimeSample {
//! 	hour: 12, minute: 34, second: 56,
//! 	day_of_month: 1, month: 6, year: 24, day_of_week: 6,
//! 	is_dst: false, valid: true
//! };
//! let frame = encode(&sample);
//! assert_eq!(frame[20], PulseSymbol::LongPulse);
//! assert_eq!(frame[59], PulseSymbol::NoPulse);
//! ```

use core::{fmt, ops::Index};

use crate::TimeSample;

/// Number of seconds, and therefore symbols, in a minute frame.
pub const FRAME_LEN: usize = 60;

/// The symbol transmitted during one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseSymbol {
	/// Carrier stays on for the whole second. Only used for the minute marker (second 59).
	NoPulse,
	/// 100 ms carrier gap at the start of the second, logical `0`.
	ShortPulse,
	/// 200 ms carrier gap at the start of the second, logical `1`.
	LongPulse
}

impl PulseSymbol {
	/// The symbol encoding a single telegram bit.
	#[inline(always)]
	fn from_bit(bit: bool) -> PulseSymbol {
		if bit { PulseSymbol::LongPulse } else { PulseSymbol::ShortPulse }
	}

	/// Whether this symbol opens a carrier gap at the start of its second.
	#[inline(always)]
	pub fn has_gap(self) -> bool {
		self != PulseSymbol::NoPulse
	}
}

/// The 60 symbols transmitted during one minute, indexed by second of the minute.
///
/// A frame is built once by [`encode`] and never modified afterwards; a newer sample produces a new
/// frame that replaces the old one wholesale.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MinuteFrame([PulseSymbol; FRAME_LEN]);

impl MinuteFrame {
	/// Unpack a telegram where bit `n` (LSB first) is the value transmitted in second `n`.
	///
	/// Bits 0-58 become short or long pulses, second 59 is always the minute marker. Bits above 58
	/// are ignored.
	fn from_packed(packed: u64) -> MinuteFrame {
		let mut symbols = [PulseSymbol::NoPulse; FRAME_LEN];
		for (n, symbol) in symbols.iter_mut().take(FRAME_LEN - 1).enumerate() {
			*symbol = PulseSymbol::from_bit((packed >> n) & 1 > 0);
		}
		MinuteFrame(symbols)
	}

	/// Get the symbol for `second`.
	///
	/// Seconds outside 0-59 (a leap second) read as [`PulseSymbol::NoPulse`], keeping the carrier on.
	#[inline(always)]
	pub fn symbol(&self, second: u8) -> PulseSymbol {
		self.0.get(second as usize).copied().unwrap_or(PulseSymbol::NoPulse)
	}
}

impl Index<usize> for MinuteFrame {
	type Output = PulseSymbol;

	fn index(&self, second: usize) -> &Self::Output {
		&self.0[second]
	}
}

impl fmt::Display for MinuteFrame {
	/// Render as `0` (short), `1` (long) and `M` (minute marker), second 0 first.
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for symbol in self.0.iter() {
			let c = match symbol {
				PulseSymbol::NoPulse => 'M',
				PulseSymbol::ShortPulse => '0',
				PulseSymbol::LongPulse => '1'
			};
			fmt::Write::write_char(f, c)?;
		}
		Ok(())
	}
}

impl fmt::Debug for MinuteFrame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "MinuteFrame({})", self)
	}
}

/// Pack a decimal value into a BCD byte.
///
/// The tens digit lands in the high nibble and the units digit in the low nibble, so values below
/// 10 are returned unchanged. Inputs are expected in 0-99; larger values are reduced modulo 100.
///
/// # Examples
///
/// ```
/// # use emitter::telegram::pack_bcd;
/// assert_eq!(pack_bcd(7), 7);
/// assert_eq!(pack_bcd(23), 0x23);
/// assert_eq!(pack_bcd(59), 0x59);
/// ```
pub const fn pack_bcd(value: u8) -> u8 {
	let value = value % 100;
	if value < 10 {
		return value;
	}
	((value / 10) << 4) | (value % 10)
}

/// Even parity of `bits`: `1` if the number of set bits is odd.
#[inline(always)]
fn parity(bits: u32) -> u64 {
	(bits.count_ones() & 0x1) as u64
}

/// The civil time described by one telegram, before packing.
///
/// All fields hold plain decimal values; BCD conversion happens in [`NextMinute::pack`].
struct NextMinute {
	/// Minute of the **next** minute, ranged [0, 59].
	minute: u8,
	/// Hour of the next minute, ranged [0, 23].
	hour: u8,
	/// Day of month, ranged [1, 31].
	day: u8,
	/// Day of week, ranged [1, 7] with Monday as 1.
	dow: u8,
	/// Month, ranged [1, 12].
	month: u8,
	/// Two-digit year, ranged [0, 99].
	year: u8,
	/// Whether daylight saving time is in effect.
	dst: bool
}

impl NextMinute {
	/// Advance `sample` by one minute.
	///
	/// Only minute and hour roll over; the date fields are taken from `sample` unchanged, so the
	/// last minute of a day announces midnight of the same date.
	fn new(sample: &TimeSample) -> NextMinute {
		let (minute, hour) = if sample.minute >= 59 {
			(0, if sample.hour >= 23 { 0 } else { sample.hour + 1 })
		} else {
			(sample.minute + 1, sample.hour)
		};

		NextMinute {
			minute,
			hour,
			day: sample.day_of_month,
			dow: if sample.day_of_week > 0 { sample.day_of_week } else { 7 },
			month: sample.month,
			year: sample.year % 100,
			dst: sample.is_dst
		}
	}

	/// Pack the telegram into the bit order used to transmit, LSB first.
	///
	/// Bits 59-63 are unused.
	fn pack(&self) -> u64 {
		let min = pack_bcd(self.minute) as u32 & 0x7f;
		let hour = pack_bcd(self.hour) as u32 & 0x3f;
		let date =  (pack_bcd(self.day)   as u32 & 0x3f)
				 | ((pack_bcd(self.dow)   as u32 & 0x07) << 6)
				 | ((pack_bcd(self.month) as u32 & 0x1f) << 9)
				 | ((pack_bcd(self.year)  as u32 & 0xff) << 14);

		// Bit 20 always set to 1, indicates the start of encoded time
		let mut r: u64 = 1 << 20;
		// Bits 0-19 are zero apart from the DST marker: 18 while DST is off, 17 while it is on
		r |= if self.dst { 1 << 17 } else { 1 << 18 };
		r |= (min as u64) << 21;
		r |= parity(min) << 28;
		r |= (hour as u64) << 29;
		r |= parity(hour) << 35;
		r |= (date as u64) << 36;
		r |= parity(date) << 58;
		r
	}
}

/// Encode the telegram for the minute following `sample`.
///
/// `sample` should be valid; an invalid sample is encoded as-is.
pub fn encode(sample: &TimeSample) -> MinuteFrame {
	MinuteFrame::from_packed(NextMinute::new(sample).pack())
}
