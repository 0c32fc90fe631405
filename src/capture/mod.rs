//! Reading pcap and pcap-ng capture files.
//!
//! [`PcapCapture`] identifies the container flavor from the file magic,
//! walks records (legacy pcap) or blocks (pcap-ng), and surfaces well-formed
//! IP datagrams with their capture timestamp and VLAN stack. Metadata
//! blocks, non-IP frames, truncated captures and malformed records are
//! consumed and skipped.

pub(crate) mod block;
mod interface;

use std::cmp;
use std::io::Read;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::common::Endianness;
use crate::errors::{PcapError, PcapResult};
use crate::ip::IpPacket;
use crate::link;
use crate::source::{CaptureInput, StreamSource};
use crate::vlan::VlanStack;

pub use interface::InterfaceDesc;

// Legacy pcap magics, as read in big-endian order.
const PCAP_MAGIC_BE: u32 = 0xA1B2_C3D4;
const PCAP_MAGIC_LE: u32 = 0xD4C3_B2A1;
const PCAP_NSEC_MAGIC_BE: u32 = 0xA1B2_3C4D;
const PCAP_NSEC_MAGIC_LE: u32 = 0x4DC3_B2A1;

const MICROS_PER_SEC: i64 = 1_000_000;

/* ----- struct CapturedIp ----- */

/// An IP datagram surfaced from a capture file.
#[derive(Clone, Debug)]
pub struct CapturedIp {
    /// The decoded datagram, headers included.
    pub packet: IpPacket,
    /// VLAN tags the datagram was extracted from, outermost first.
    pub vlans: VlanStack,
    /// Capture timestamp in microseconds since the Unix epoch, or `None`
    /// when the interface resolution is unknown.
    pub timestamp: Option<i64>,
}

/* ----- struct CapturedFrame ----- */

/// A captured link-layer frame, before decapsulation.
///
/// Transient: holds one record's bytes and is replaced by the next read.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    body: Vec<u8>,
    payload_start: usize,
    payload_len: usize,
    /// Index of the interface the frame was captured on.
    pub interface: usize,
    /// Length of the packet as transmitted on the network.
    pub original_size: usize,
    /// Capture timestamp in microseconds since the Unix epoch.
    pub timestamp: Option<i64>,
}

impl CapturedFrame {
    /// The captured frame bytes, link-layer headers included.
    pub fn data(&self) -> &[u8] {
        &self.body[self.payload_start..self.payload_start + self.payload_len]
    }
}

/* ----- struct PcapCapture ----- */

/// Reader for pcap and pcap-ng capture files.
///
/// A closed reader is created with [`PcapCapture::new`] and attached to an
/// input with [`open`](PcapCapture::open) (file path, or standard input for
/// an empty path / `"-"`) or [`open_reader`](PcapCapture::open_reader) (any
/// [`Read`] implementation, which is how tests feed in-memory captures).
///
/// Closing keeps all counters and timestamps readable; reopening resets
/// them.
///
/// # Examples
///
/// ```rust,no_run
/// use pcap_sieve::PcapCapture;
///
/// let mut capture = PcapCapture::new();
/// capture.open("dump.pcapng").unwrap();
/// while let Some(ip) = capture.next_ip().unwrap() {
///     println!("{} -> {}", ip.packet.source(), ip.packet.destination());
/// }
/// ```
#[derive(Debug)]
pub struct PcapCapture<R: Read = CaptureInput> {
    src: Option<StreamSource<R>>,
    name: String,
    latched: bool,
    ng: bool,
    endian: Endianness,
    major: u16,
    minor: u16,
    interfaces: Vec<InterfaceDesc>,
    file_size: u64,
    packet_count: u64,
    ip_packet_count: u64,
    packets_size: u64,
    ip_packets_size: u64,
    first_timestamp: Option<i64>,
    last_timestamp: Option<i64>,
}

impl<R: Read> Default for PcapCapture<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl PcapCapture<CaptureInput> {
    /// Opens a capture file, or standard input when the path is empty or
    /// `"-"`.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> PcapResult<()> {
        if self.src.is_some() {
            return Err(PcapError::AlreadyOpen);
        }
        let (input, name) = CaptureInput::open(path.as_ref())?;
        self.open_reader_named(input, name)
    }
}

impl<R: Read> PcapCapture<R> {
    /// Creates a closed reader.
    pub fn new() -> PcapCapture<R> {
        PcapCapture {
            src: None,
            name: String::new(),
            latched: false,
            ng: false,
            endian: Endianness::Little,
            major: 0,
            minor: 0,
            interfaces: Vec::new(),
            file_size: 0,
            packet_count: 0,
            ip_packet_count: 0,
            packets_size: 0,
            ip_packets_size: 0,
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    /// Opens the capture found on an arbitrary reader.
    pub fn open_reader(&mut self, reader: R) -> PcapResult<()> {
        self.open_reader_named(reader, "input stream".to_string())
    }

    fn open_reader_named(&mut self, reader: R, name: String) -> PcapResult<()> {
        if self.src.is_some() {
            return Err(PcapError::AlreadyOpen);
        }

        // Reset all state from any previous capture.
        self.name = name;
        self.latched = false;
        self.ng = false;
        self.major = 0;
        self.minor = 0;
        self.interfaces.clear();
        self.file_size = 0;
        self.packet_count = 0;
        self.ip_packet_count = 0;
        self.packets_size = 0;
        self.ip_packets_size = 0;
        self.first_timestamp = None;
        self.last_timestamp = None;

        let mut src = StreamSource::new(reader);
        let mut magic_field = [0u8; 4];
        src.read_exact(&mut magic_field)?;
        self.src = Some(src);
        if let Err(e) = self.read_header(BigEndian::read_u32(&magic_field)) {
            self.close();
            return Err(e);
        }

        debug!(
            name = %self.name,
            format = if self.ng { "pcap-ng" } else { "pcap" },
            major = self.major,
            minor = self.minor,
            big_endian = self.endian.is_big(),
            "opened capture"
        );
        Ok(())
    }

    /// Closes the input. Counters, timestamps and version fields keep their
    /// last values for post-mortem inspection.
    pub fn close(&mut self) {
        if let Some(src) = self.src.take() {
            self.file_size = src.bytes_read();
        }
    }

    /// True while an input is attached.
    pub fn is_open(&self) -> bool {
        self.src.is_some()
    }

    /// Display name of the input (`"standard input"` for stdin).
    pub fn file_name(&self) -> &str {
        &self.name
    }

    /// True when the capture uses pcap-ng framing.
    pub fn is_pcap_ng(&self) -> bool {
        self.ng
    }

    /// Byte order of the current file or section.
    pub fn endianness(&self) -> Endianness {
        self.endian
    }

    /// Capture format major version.
    pub fn major_version(&self) -> u16 {
        self.major
    }

    /// Capture format minor version.
    pub fn minor_version(&self) -> u16 {
        self.minor
    }

    /// Interface descriptors seen so far in the current section.
    pub fn interfaces(&self) -> &[InterfaceDesc] {
        &self.interfaces
    }

    /// Number of bytes read from the input so far.
    pub fn file_size(&self) -> u64 {
        self.src.as_ref().map_or(self.file_size, StreamSource::bytes_read)
    }

    /// Number of captured packets read so far, IP or not. This matches the
    /// packet number shown in the leftmost Wireshark column.
    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// Number of valid IP datagrams extracted so far.
    pub fn ip_packet_count(&self) -> u64 {
        self.ip_packet_count
    }

    /// Total size of captured packets, link-layer headers included.
    pub fn total_packets_size(&self) -> u64 {
        self.packets_size
    }

    /// Total size of extracted IP datagrams, link-layer headers excluded.
    pub fn total_ip_packets_size(&self) -> u64 {
        self.ip_packets_size
    }

    /// Timestamp of the first captured packet, microseconds since the Unix
    /// epoch.
    pub fn first_timestamp(&self) -> Option<i64> {
        self.first_timestamp
    }

    /// Timestamp of the most recently captured packet.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Offset of `timestamp` from the beginning of the capture, clamped to
    /// zero.
    pub fn time_offset(&self, timestamp: i64) -> i64 {
        match self.first_timestamp {
            Some(first) if timestamp > first => timestamp - first,
            _ => 0,
        }
    }

    /// Reads the next IP datagram, skipping metadata blocks, non-IP frames,
    /// truncated captures and malformed records.
    ///
    /// Returns `Ok(None)` on a clean end of input. The returned datagram
    /// owns its bytes and stays valid across later reads.
    pub fn next_ip(&mut self) -> PcapResult<Option<CapturedIp>> {
        loop {
            let frame = match self.next_frame()? {
                Some(frame) => frame,
                None => return Ok(None),
            };
            let ifd = self
                .interfaces
                .get(frame.interface)
                .copied()
                .unwrap_or_default();

            let (payload, vlans) = match link::decapsulate(frame.data(), &ifd, self.endian) {
                Some(found) => found,
                None => continue,
            };

            match IpPacket::parse(payload) {
                Ok(packet) => {
                    self.ip_packet_count += 1;
                    self.ip_packets_size += payload.len() as u64;
                    return Ok(Some(CapturedIp {
                        packet,
                        vlans,
                        timestamp: frame.timestamp,
                    }));
                }
                Err(e) => {
                    warn!(
                        size = payload.len(),
                        original_size = frame.original_size,
                        link_type = ifd.link_type,
                        "{e}, skipping frame"
                    );
                    continue;
                }
            }
        }
    }

    /// Reads the next captured frame, skipping metadata blocks and
    /// truncated captures.
    ///
    /// Returns `Ok(None)` on a clean end of input at a record boundary. Any
    /// mid-record failure latches the reader.
    pub fn next_frame(&mut self) -> PcapResult<Option<CapturedFrame>> {
        if self.src.is_none() {
            return Err(PcapError::NotOpen);
        }
        if self.latched {
            return Err(PcapError::ErrorState);
        }
        match self.read_frame() {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.latched = true;
                Err(e)
            }
        }
    }

    /// Reads a file or section header, starting from a magic number read in
    /// big-endian order.
    fn read_header(&mut self, magic: u32) -> PcapResult<()> {
        match magic {
            PCAP_MAGIC_BE | PCAP_MAGIC_LE | PCAP_NSEC_MAGIC_BE | PCAP_NSEC_MAGIC_LE => {
                let mut header = [0u8; 20];
                self.source()?.read_exact(&mut header)?;
                self.ng = false;
                self.endian = if magic == PCAP_MAGIC_BE || magic == PCAP_NSEC_MAGIC_BE {
                    Endianness::Big
                } else {
                    Endianness::Little
                };
                self.major = self.endian.read_u16(&header, 0);
                self.minor = self.endian.read_u16(&header, 2);

                // The last header word is the link type in its low 16 bits;
                // bits 24-31 describe the FCS: bit 0x10 gates a 3-bit FCS
                // length in 16-bit words.
                let link_word = self.endian.read_u32(&header, 16);
                let fcs_byte = (link_word >> 24) as u8;
                self.interfaces = vec![InterfaceDesc {
                    link_type: link_word as u16,
                    fcs_size: if fcs_byte & 0x10 == 0 {
                        0
                    } else {
                        2 * ((fcs_byte >> 5) & 0x07) as usize
                    },
                    time_units: if magic == PCAP_MAGIC_BE || magic == PCAP_MAGIC_LE {
                        MICROS_PER_SEC
                    } else {
                        1_000_000_000
                    },
                    time_offset_secs: 0,
                }];
            }
            block::SECTION_HEADER_BLOCK => {
                self.ng = true;
                let mut endian = self.endian;
                let body = block::read_block_body(self.source()?, magic, &mut endian)?;
                self.endian = endian;
                if body.len() < 16 {
                    return Err(PcapError::BadBlockLength(body.len() as u32 + 12));
                }
                self.major = self.endian.read_u16(&body, 4);
                self.minor = self.endian.read_u16(&body, 6);
                // Interface descriptions arrive in dedicated blocks.
                self.interfaces.clear();
            }
            _ => return Err(PcapError::UnknownMagic(magic)),
        }
        Ok(())
    }

    fn source(&mut self) -> PcapResult<&mut StreamSource<R>> {
        self.src.as_mut().ok_or(PcapError::NotOpen)
    }

    /// The record/block driver loop. Loops until a captured frame is
    /// produced or the input ends.
    fn read_frame(&mut self) -> PcapResult<Option<CapturedFrame>> {
        loop {
            // Re-read per iteration: a section header block can change it.
            let endian = self.endian;
            let body: Vec<u8>;
            let payload_start: usize;
            let captured: usize;
            let original: usize;
            let if_index: usize;
            let mut timestamp: Option<i64> = None;

            if !self.ng {
                // Legacy pcap: 16-byte record header, then the frame bytes.
                let mut header = [0u8; 16];
                if !self.source()?.read_exact_or_eof(&mut header)? {
                    return Ok(None);
                }
                let seconds = endian.read_u32(&header, 0) as i64;
                let sub_seconds = endian.read_u32(&header, 4) as i64;
                captured = endian.read_u32(&header, 8) as usize;
                original = endian.read_u32(&header, 12) as usize;
                self.packet_count += 1;

                let units = self.interfaces[0].time_units;
                if units > 0 {
                    timestamp = Some(seconds * MICROS_PER_SEC + sub_seconds * MICROS_PER_SEC / units);
                }

                let mut data = vec![0u8; captured];
                self.source()?.read_exact(&mut data)?;
                body = data;
                payload_start = 0;
                if_index = 0;
            } else {
                let mut type_field = [0u8; 4];
                if !self.source()?.read_exact_or_eof(&mut type_field)? {
                    return Ok(None);
                }
                let block_type = endian.read_u32(&type_field, 0);

                if block_type == block::SECTION_HEADER_BLOCK {
                    // A new section restarts all per-section state.
                    self.read_header(block::SECTION_HEADER_BLOCK)?;
                    continue;
                }

                // Only a section header can switch endianness, and those
                // were dispatched above, so the byte order cannot change
                // under this call.
                let mut block_endian = endian;
                let block_body = block::read_block_body(self.source()?, block_type, &mut block_endian)?;

                match block_type {
                    block::INTERFACE_DESCRIPTION_BLOCK => {
                        let ifd = InterfaceDesc::from_block_body(&block_body, endian)?;
                        self.interfaces.push(ifd);
                        continue;
                    }
                    block::ENHANCED_PACKET_BLOCK | block::OBSOLETE_PACKET_BLOCK
                        if block_body.len() >= 20 =>
                    {
                        self.packet_count += 1;
                        captured = cmp::min(
                            endian.read_u32(&block_body, 12) as usize,
                            block_body.len() - 20,
                        );
                        original = endian.read_u32(&block_body, 16) as usize;
                        if_index = if block_type == block::OBSOLETE_PACKET_BLOCK {
                            endian.read_u16(&block_body, 0) as usize
                        } else {
                            endian.read_u32(&block_body, 0) as usize
                        };

                        if let Some(ifd) = self.interfaces.get(if_index) {
                            if ifd.time_units != 0 {
                                let raw = (((endian.read_u32(&block_body, 4) as u64) << 32)
                                    + endian.read_u32(&block_body, 8) as u64)
                                    as i64;
                                timestamp = Some(scale_to_micros(raw, ifd.time_units));
                            }
                        }
                        body = block_body;
                        payload_start = 20;
                    }
                    block::SIMPLE_PACKET_BLOCK if block_body.len() >= 4 => {
                        self.packet_count += 1;
                        original = endian.read_u32(&block_body, 0) as usize;
                        captured = cmp::min(original, block_body.len() - 4);
                        body = block_body;
                        payload_start = 4;
                        if_index = 0;
                    }
                    // Not a captured packet; ignore the block.
                    _ => continue,
                }
            }

            self.packets_size += captured as u64;
            if original > captured {
                debug!(original, captured, "truncated captured packet ignored");
                continue;
            }

            let ifd = self.interfaces.get(if_index).copied().unwrap_or_default();
            timestamp = timestamp
                .map(|t| t.saturating_add(ifd.time_offset_secs.saturating_mul(MICROS_PER_SEC)));
            if let Some(t) = timestamp {
                if self.first_timestamp.is_none() {
                    self.first_timestamp = Some(t);
                }
                self.last_timestamp = Some(t);
            }

            trace!(
                block_size = body.len(),
                payload_start,
                captured,
                original,
                link_type = ifd.link_type,
                "captured frame"
            );
            return Ok(Some(CapturedFrame {
                body,
                payload_start,
                payload_len: captured,
                interface: if_index,
                original_size: original,
                timestamp,
            }));
        }
    }
}

/// Converts a raw timestamp in `units` ticks per second to microseconds,
/// avoiding 64-bit overflow. Captures sometimes store a full
/// nanosecond-resolution time since 1970, close to the 64-bit maximum.
fn scale_to_micros(raw: i64, units: i64) -> i64 {
    if units == MICROS_PER_SEC {
        raw
    } else if units > MICROS_PER_SEC && units % MICROS_PER_SEC == 0 {
        raw / (units / MICROS_PER_SEC)
    } else if units < MICROS_PER_SEC && MICROS_PER_SEC % units == 0 {
        match raw.checked_mul(MICROS_PER_SEC / units) {
            Some(micros) => micros,
            None => (raw as f64 * (MICROS_PER_SEC / units) as f64) as i64,
        }
    } else {
        match raw.checked_mul(MICROS_PER_SEC) {
            Some(scaled) => scaled / units,
            // Loses precision past 2^53, accepted on this path only.
            None => (raw as f64 * MICROS_PER_SEC as f64 / units as f64) as i64,
        }
    }
}

/// Converts a capture timestamp into an absolute date, or `None` when the
/// timestamp is out of the representable range.
pub fn to_time(timestamp_micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(timestamp_micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_passthrough_micro() {
        assert_eq!(scale_to_micros(10_500_000, 1_000_000), 10_500_000);
    }

    #[test]
    fn scale_down_from_nanoseconds() {
        assert_eq!(
            scale_to_micros(1_234_567_890_123_456_789, 1_000_000_000),
            1_234_567_890_123_456
        );
    }

    #[test]
    fn scale_up_from_milliseconds() {
        assert_eq!(scale_to_micros(1_500, 1_000), 1_500_000);
    }

    #[test]
    fn scale_odd_ratio_exact() {
        // 3 ticks per second, small enough for exact integer arithmetic.
        assert_eq!(scale_to_micros(9, 3), 3_000_000);
    }

    #[test]
    fn scale_odd_ratio_overflow_falls_back_to_float() {
        // raw * 1e6 overflows i64; the float path keeps the magnitude.
        let raw = i64::MAX / 1_000_000 + 7;
        let scaled = scale_to_micros(raw, 3);
        let expected = raw as f64 * 1_000_000.0 / 3.0;
        let error = (scaled as f64 - expected).abs() / expected;
        assert!(error < 1e-9, "error {error} too large");
    }

    #[test]
    fn scale_boundary_stays_exact() {
        // The largest raw value that survives the integer path.
        let raw = i64::MAX / 1_000_000;
        assert_eq!(scale_to_micros(raw, 3), raw * 1_000_000 / 3);
    }

    #[test]
    fn to_time_round_trip() {
        let date = to_time(10_500_000).unwrap();
        assert_eq!(date.timestamp_micros(), 10_500_000);
        assert!(to_time(i64::MAX).is_none());
    }
}
