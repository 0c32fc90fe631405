//! Per-interface capture metadata.

use tracing::debug;

use crate::common::{link_type, Endianness};
use crate::errors::{PcapError, PcapResult};

// Interface Description Block option tags.
const IF_TSRESOL: u16 = 9;
const IF_FCSLEN: u16 = 13;
const IF_TSOFFSET: u16 = 14;

/// Description of one capture interface.
///
/// Legacy pcap files have exactly one; pcap-ng sections declare one per
/// Interface Description Block. Never mutated once created.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InterfaceDesc {
    /// Link-layer type of the frames captured on this interface.
    pub link_type: u16,
    /// Frame Check Sequence bytes trailing each frame.
    pub fcs_size: usize,
    /// Timestamp ticks per second; 0 when the resolution is unknown.
    pub time_units: i64,
    /// Seconds added to each timestamp of this interface.
    pub time_offset_secs: i64,
}

impl Default for InterfaceDesc {
    fn default() -> Self {
        InterfaceDesc {
            link_type: link_type::UNKNOWN,
            fcs_size: 0,
            time_units: 0,
            time_offset_secs: 0,
        }
    }
}

impl InterfaceDesc {
    /// Decodes an Interface Description Block body: the link type at offset
    /// 0, then the option list starting at offset 8.
    ///
    /// Each option is a 16-bit tag, a 16-bit length and a value padded to a
    /// 4-byte boundary. Unknown tags are skipped; an option whose declared
    /// length overruns the body fails with [`PcapError::CorruptOptionList`].
    pub(crate) fn from_block_body(body: &[u8], endian: Endianness) -> PcapResult<InterfaceDesc> {
        if body.len() < 8 {
            return Err(PcapError::CorruptOptionList);
        }

        let mut ifd = InterfaceDesc {
            link_type: endian.read_u16(body, 0),
            time_units: 1_000_000,
            ..Default::default()
        };

        let mut offset = 8;
        while offset + 4 <= body.len() {
            let tag = endian.read_u16(body, offset);
            let len = endian.read_u16(body, offset + 2) as usize;
            offset += 4;
            if offset + len > body.len() {
                return Err(PcapError::CorruptOptionList);
            }

            match (tag, len) {
                (IF_FCSLEN, 1) => ifd.fcs_size = body[offset] as usize,
                (IF_TSOFFSET, 8) => ifd.time_offset_secs = endian.read_u64(body, offset) as i64,
                (IF_TSRESOL, 1) => ifd.time_units = decode_time_units(body[offset]),
                _ => {}
            }

            // Values are padded to 32 bits.
            offset += len + (4 - len % 4) % 4;
        }

        debug!(
            link_type = ifd.link_type,
            time_units = ifd.time_units,
            time_offset_secs = ifd.time_offset_secs,
            fcs_size = ifd.fcs_size,
            "pcap-ng interface description"
        );
        Ok(ifd)
    }
}

/// Decodes an `if_tsresol` option byte into ticks per second: `10^n` when
/// the high bit is clear, `2^n` when set. A code too large for 64-bit
/// arithmetic yields 0, the unknown-resolution sentinel.
fn decode_time_units(code: u8) -> i64 {
    if code & 0x80 == 0 {
        if code <= 18 {
            10i64.pow(code as u32)
        } else {
            0
        }
    } else {
        let shift = code & 0x7F;
        if shift <= 62 {
            1i64 << shift
        } else {
            0
        }
    }
}
