//! Measure the offset of the local clock against an NTP server.
//!
//! This crate provides a single public function ([`get_clock_offset`]) to estimate how far the
//! system clock is from an NTP server or pool of servers. It makes five requests and keeps the
//! response with the smallest error bound, which is typically within a few tens of milliseconds on
//! the public internet. If the address resolves to multiple IPs, up to five different IPs are
//! tried, cycling if there are fewer than five.
//!
//! # Examples
//!
//! ```
//! # use sntp::get_clock_offset;
//! match get_clock_offset("time.google.com") {
//! 	Ok(o) => println!("Local clock is off by {} ns (+/- {} ns)", o.offset_nanos, o.error_nanos),
//! 	Err(e) => eprintln!("Error querying time.google.com: {e}")
//! }
//! assert!(get_clock_offset("").is_err());
//! ```

use std::{
	io,
	net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
	ops::Sub,
	time::{Duration, SystemTime, UNIX_EPOCH}
};

use log::{debug, warn};

/// Offset to adjust a Unix timestamp (epoch Jan 1, 1970) to NTP time stamp (epoch Jan 1, 1900)
const UNIX_TO_NTP_EPOCH_ADJUST: u64 = (70 * 365 + 17) * 86400; // 17 leap years between 1900-1970
/// Size of an NTP packet without extension fields.
const PACKET_LEN: usize = 48;
/// Number of requests made per measurement.
const QUERIES: usize = 5;
/// Default NTP port.
const NTP_PORT: u16 = 123;

/// The error type for SNTP queries.
#[derive(Debug, thiserror::Error)]
pub enum SntpError {
	/// Socket setup or network I/O failed.
	#[error("NTP I/O error: {0}")]
	Io(#[from] io::Error),
	/// The server address was empty.
	#[error("Empty SNTP server address")]
	EmptyAddress,
	/// The server address could not be resolved, or resolved to no IPs.
	#[error("Address {0} did not resolve to any IPs")]
	NoAddresses(String),
	/// The server sent something that is not a usable reply to our request.
	#[error("Invalid response from NTP server: {0}")]
	InvalidResponse(&'static str),
	/// The local clock could not be read.
	#[error("Failed to get current system time")]
	ClockUnavailable
}

/// Offset of the local clock from NTP time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockOffset {
	/// Nanoseconds to add to the local clock to get NTP time.
	pub offset_nanos: i64,
	/// Estimated maximum error of [`ClockOffset::offset_nanos`] (+/-), in nanoseconds.
	pub error_nanos: i64
}

/// An NTP timestamp in seconds since Jan 1, 1900.
///
/// NTP uses a 64-bit fixed point format, with 32 bits before the decimal and 32 bits after. This
/// means the maximum granularity is 233 picoseconds. The timestamp rolls over every 136 years,
/// with the first rollover on February 7, 2036.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NtpTimestamp(u64);

impl NtpTimestamp {
	/// Create a new NTP timestamp from components before and after the decimal place.
	fn new(sec: u32, frac: u32) -> Self {
		Self((sec as u64) << 32 | frac as u64)
	}

	/// Read the local clock.
	fn now() -> Result<Self, SntpError> {
		let since_epoch = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map_err(|_| SntpError::ClockUnavailable)?;
		Ok(since_epoch.into())
	}

	/// Convert a short timestamp (16 bits before and 16 bits after the decimal), as used for root
	/// delay and dispersion, into a regular timestamp.
	fn from_short(v: u32) -> Self {
		Self((v as u64) << 16)
	}
}

impl From<Duration> for NtpTimestamp {
	/// Convert from a [`Duration`] since the Unix epoch.
	fn from(time: Duration) -> Self {
		// Truncation wraps into the next NTP era, as intended
		let sec = (time.as_secs() + UNIX_TO_NTP_EPOCH_ADJUST) as u32;
		let frac = ((time.subsec_nanos() as u64) << 32) / 1_000_000_000;
		NtpTimestamp::new(sec, frac as u32)
	}
}

impl Sub for NtpTimestamp {
	type Output = NtpTimestampDiff;

	fn sub(self, rhs: Self) -> Self::Output {
		// Wrapping sub to enable reinterpretation of overflow as negative numbers
		NtpTimestampDiff(self.0.wrapping_sub(rhs.0) as i64)
	}
}

/// A signed difference between two [`NtpTimestamp`]s, in the same fixed point format.
///
/// The absolute value that can be represented is +-68 years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct NtpTimestampDiff(i64);

impl NtpTimestampDiff {
	/// Convert to nanoseconds, rounding towards negative infinity.
	fn as_nanos(self) -> i64 {
		((self.0 as i128 * 1_000_000_000) >> 32) as i64
	}
}

impl Sub for NtpTimestampDiff {
	type Output = Self;

	fn sub(self, rhs: Self) -> Self::Output {
		// Only meaningless for invalid packets, which must not panic in debug builds
		Self(self.0.wrapping_sub(rhs.0))
	}
}

/// A raw NTP packet in wire format (big endian).
///
/// | Offset | Field                                     |
/// | ------ | ----------------------------------------- |
/// | 0      | Leap indicator, version, mode             |
/// | 1      | Stratum                                   |
/// | 4      | Root delay (short format)                 |
/// | 8      | Root dispersion (short format)            |
/// | 24     | Origin timestamp (client transmit time)   |
/// | 32     | Receive timestamp (server receive time)   |
/// | 40     | Transmit timestamp (server transmit time) |
struct Packet([u8; PACKET_LEN]);

impl Packet {
	/// Create a client request (version 4, mode 3) sent at `tx`.
	fn request(tx: NtpTimestamp) -> Self {
		let mut bytes = [0; PACKET_LEN];
		bytes[0] = 0x23; // 0x4 (version) << 3 | 0x3 (client mode)
		bytes[40..48].copy_from_slice(&tx.0.to_be_bytes());
		Packet(bytes)
	}

	fn mode(&self) -> u8 {
		self.0[0] & 0x7
	}

	fn stratum(&self) -> u8 {
		self.0[1]
	}

	fn read_u32(&self, offset: usize) -> u32 {
		let b = &self.0;
		u32::from_be_bytes([b[offset], b[offset + 1], b[offset + 2], b[offset + 3]])
	}

	fn read_timestamp(&self, offset: usize) -> NtpTimestamp {
		NtpTimestamp::new(self.read_u32(offset), self.read_u32(offset + 4))
	}

	fn root_delay(&self) -> NtpTimestamp {
		NtpTimestamp::from_short(self.read_u32(4))
	}

	fn root_dispersion(&self) -> NtpTimestamp {
		NtpTimestamp::from_short(self.read_u32(8))
	}

	/// Compute the clock offset from a server reply to a request sent at `sent` and received at
	/// `received`.
	///
	/// # Errors
	///
	/// Returns [`SntpError::InvalidResponse`] if the packet is not a server reply, is a kiss-o'-death
	/// packet, or does not answer the request sent at `sent`.
	fn measure(&self, sent: NtpTimestamp, received: NtpTimestamp) -> Result<ClockOffset, SntpError> {
		if self.mode() != 4 {
			return Err(SntpError::InvalidResponse("not a server reply"));
		}
		if self.stratum() == 0 {
			return Err(SntpError::InvalidResponse("kiss-o'-death"));
		}
		let t1 = self.read_timestamp(24);
		if t1 != sent {
			return Err(SntpError::InvalidResponse("reply does not match request"));
		}
		let t2 = self.read_timestamp(32);
		let t3 = self.read_timestamp(40);
		let t4 = received;

		let delay = t4 - t1 - (t3 - t2);
		let offset = NtpTimestampDiff(((t2 - t1).0 >> 1).wrapping_sub((t4 - t3).0 >> 1));
		let error = delay.as_nanos().saturating_abs()
			.saturating_add(NtpTimestampDiff((self.root_delay().0 >> 1) as i64).as_nanos())
			.saturating_add(NtpTimestampDiff(self.root_dispersion().0 as i64).as_nanos());

		Ok(ClockOffset { offset_nanos: offset.as_nanos(), error_nanos: error })
	}
}

/// A client to query NTP servers, reusing one socket per address family.
///
/// Not thread safe: create one per thread.
struct NtpService {
	/// IPv4 socket, initialized on first use.
	sockv4: Option<UdpSocket>,
	/// IPv6 socket, initialized on first use.
	sockv6: Option<UdpSocket>
}

impl NtpService {
	fn new() -> Self {
		Self { sockv4: None, sockv6: None }
	}

	/// Get the socket in `slot`, binding it to `addr` with one second timeouts on first use.
	fn socket<T>(slot: &mut Option<UdpSocket>, addr: T) -> Result<&UdpSocket, io::Error>
	where (T, u16): ToSocketAddrs
	{
		let socket = match slot.take() {
			Some(s) => s,
			None => {
				let s = UdpSocket::bind((addr, 0))?;
				s.set_read_timeout(Some(Duration::from_secs(1)))?;
				s.set_write_timeout(Some(Duration::from_secs(1)))?;
				s
			}
		};
		Ok(slot.insert(socket))
	}

	/// Make a single request to the server at `addr`.
	fn query(&mut self, addr: &SocketAddr) -> Result<ClockOffset, SntpError> {
		let socket = if addr.is_ipv4() {
			Self::socket(&mut self.sockv4, Ipv4Addr::UNSPECIFIED)?
		} else {
			Self::socket(&mut self.sockv6, Ipv6Addr::UNSPECIFIED)?
		};
		socket.connect(addr)?;

		let sent = NtpTimestamp::now()?;
		socket.send(&Packet::request(sent).0)?;
		let mut reply = Packet([0; PACKET_LEN]);
		let len = socket.recv(&mut reply.0)?;
		let received = NtpTimestamp::now()?;
		if len != PACKET_LEN {
			return Err(SntpError::InvalidResponse("unexpected packet length"));
		}

		reply.measure(sent, received)
	}
}

/// Normalize an address for use by [`ToSocketAddrs::to_socket_addrs`].
///
/// Adds the NTP port (123) if none is given, and supports domain names and IP addresses (IPv4 and
/// IPv6, bracketed or not). An unbracketed IPv6 address is never treated as having a port.
fn normalize_address(addr: &str) -> Result<String, SntpError> {
	if addr.is_empty() {
		return Err(SntpError::EmptyAddress);
	}

	let colons = addr.matches(':').count();
	let normalized = match (colons, addr.starts_with('['), addr.rfind(']')) {
		// Host name or IPv4, no port
		(0, ..) => format!("{}:{}", addr, NTP_PORT),
		// Host name or IPv4 with port
		(1, false, _) => String::from(addr),
		// Bracketed IPv6, port only if something follows the closing bracket
		(_, true, Some(k)) if k + 1 < addr.len() => String::from(addr),
		(_, true, _) => format!("{}:{}", addr, NTP_PORT),
		// Bare IPv6
		_ => format!("[{}]:{}", addr, NTP_PORT)
	};
	Ok(normalized)
}

/// Measure the offset of the local clock against the NTP server at `addr`.
///
/// `addr` may be a host name or an IP address, optionally with a port. Five requests are made,
/// cycling through the resolved addresses, and the reply with the smallest error bound is kept.
///
/// # Errors
///
/// Returns an error if the address is empty or does not resolve, or if none of the five requests
/// succeeded. In the latter case the error of the last request is returned.
pub fn get_clock_offset(addr: &str) -> Result<ClockOffset, SntpError> {
	let addrs: Vec<SocketAddr> = normalize_address(addr)?
		.to_socket_addrs()
		.map_err(|e| {
			debug!("NTP lookup of {} failed: {}", addr, e);
			SntpError::NoAddresses(String::from(addr))
		})?
		.collect();
	if addrs.is_empty() {
		return Err(SntpError::NoAddresses(String::from(addr)));
	}

	let mut ntp = NtpService::new();
	let mut best: Option<ClockOffset> = None;
	let mut last_error = None;
	for server in addrs.iter().cycle().take(QUERIES) {
		match ntp.query(server) {
			Ok(o) => {
				debug!("NTP {}: offset {} ns, error {} ns", server, o.offset_nanos, o.error_nanos);
				if best.is_none_or(|b| o.error_nanos < b.error_nanos) {
					best = Some(o);
				}
			},
			Err(e) => {
				warn!("NTP query to {} failed: {}", server, e);
				last_error = Some(e);
			}
		}
	}

	match (best, last_error) {
		(Some(o), _) => Ok(o),
		(None, Some(e)) => Err(e),
		(None, None) => Err(SntpError::NoAddresses(String::from(addr)))
	}
}
