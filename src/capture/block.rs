//! pcap-ng block framing.
//!
//! Every block is framed as a 32-bit type, a 32-bit total length, the body
//! padded to 32 bits, and a trailing copy of the total length:
//!
//! ```text
//!  +---------------------------------+
//!  |          Block Type             |
//!  +---------------------------------+
//!  |       Block Total Length        |
//!  +---------------------------------+
//!  /          Block Body             /
//!  +---------------------------------+
//!  |       Block Total Length        |
//!  +---------------------------------+
//! ```

use std::io::Read;

use byteorder::{BigEndian, ByteOrder};

use crate::common::Endianness;
use crate::errors::{PcapError, PcapResult};
use crate::source::StreamSource;

/// Section Header Block; also the pcap-ng file magic.
pub const SECTION_HEADER_BLOCK: u32 = 0x0A0D_0D0A;
/// Interface Description Block.
pub const INTERFACE_DESCRIPTION_BLOCK: u32 = 0x0000_0001;
/// The obsolete Packet Block, superseded by the Enhanced Packet Block.
pub const OBSOLETE_PACKET_BLOCK: u32 = 0x0000_0002;
/// Simple Packet Block.
pub const SIMPLE_PACKET_BLOCK: u32 = 0x0000_0003;
/// Enhanced Packet Block.
pub const ENHANCED_PACKET_BLOCK: u32 = 0x0000_0006;

/// Byte-order magic of a big-endian section.
pub const BYTE_ORDER_MAGIC_BE: u32 = 0x1A2B_3C4D;
/// Byte-order magic of a little-endian section.
pub const BYTE_ORDER_MAGIC_LE: u32 = 0x4D3C_2B1A;

/// Reads one block body; the 32-bit block type has already been consumed.
///
/// For a Section Header Block the byte-order magic is read first and
/// `endian` is switched to the new section's byte order before the length
/// fields are interpreted; the magic bytes stay at the start of the
/// returned body, so the version fields sit at body offsets 4 and 6.
///
/// Fails with [`PcapError::BadBlockLength`] unless both length copies agree,
/// are at least 12 and divisible by 4.
pub(crate) fn read_block_body<R: Read>(
    src: &mut StreamSource<R>,
    block_type: u32,
    endian: &mut Endianness,
) -> PcapResult<Vec<u8>> {
    let mut len_field = [0u8; 4];
    src.read_exact(&mut len_field)?;

    // The section header's block type is endian-neutral; the byte order of
    // its length fields is only known after the byte-order magic.
    let mut body = Vec::new();
    if block_type == SECTION_HEADER_BLOCK {
        let mut magic_field = [0u8; 4];
        src.read_exact(&mut magic_field)?;
        let order_magic = BigEndian::read_u32(&magic_field);
        *endian = match order_magic {
            BYTE_ORDER_MAGIC_BE => Endianness::Big,
            BYTE_ORDER_MAGIC_LE => Endianness::Little,
            _ => return Err(PcapError::BadByteOrder(order_magic)),
        };
        body.extend_from_slice(&magic_field);
    }

    // Total length covers the type and both length fields (12 bytes).
    let total_len = endian.read_u32(&len_field, 0);
    if total_len % 4 != 0 || (total_len as usize) < 12 + body.len() {
        return Err(PcapError::BadBlockLength(total_len));
    }

    let start = body.len();
    body.resize(total_len as usize - 12, 0);
    src.read_exact(&mut body[start..])?;

    src.read_exact(&mut len_field)?;
    let trailer_len = endian.read_u32(&len_field, 0);
    if trailer_len != total_len {
        return Err(PcapError::BadBlockLength(trailer_len));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::LittleEndian;

    fn framed<B: ByteOrder>(block_type: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut field = [0u8; 4];
        B::write_u32(&mut field, block_type);
        out.extend_from_slice(&field);
        B::write_u32(&mut field, (12 + body.len()) as u32);
        out.extend_from_slice(&field);
        out.extend_from_slice(body);
        B::write_u32(&mut field, (12 + body.len()) as u32);
        out.extend_from_slice(&field);
        out
    }

    #[test]
    fn round_trips_a_framed_block() {
        let data = framed::<LittleEndian>(ENHANCED_PACKET_BLOCK, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut src = StreamSource::new(&data[4..]); // type already consumed
        let mut endian = Endianness::Little;

        let body = read_block_body(&mut src, ENHANCED_PACKET_BLOCK, &mut endian).unwrap();
        assert_eq!(body, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn section_header_switches_endianness() {
        let mut body = Vec::new();
        body.extend_from_slice(&BYTE_ORDER_MAGIC_BE.to_be_bytes());
        body.extend_from_slice(&[0, 1, 0, 0]); // version 1.0, big endian
        body.extend_from_slice(&[0xFF; 8]); // section length: unspecified
        let data = framed::<BigEndian>(SECTION_HEADER_BLOCK, &body);

        let mut src = StreamSource::new(&data[4..]);
        let mut endian = Endianness::Little; // wrong on purpose
        let body = read_block_body(&mut src, SECTION_HEADER_BLOCK, &mut endian).unwrap();

        assert_eq!(endian, Endianness::Big);
        assert_eq!(endian.read_u16(&body, 4), 1); // major version
    }

    #[test]
    fn rejects_unknown_byte_order_magic() {
        let mut data = framed::<LittleEndian>(SECTION_HEADER_BLOCK, &[0u8; 16]);
        data[8..12].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let mut src = StreamSource::new(&data[4..]);
        let mut endian = Endianness::Little;

        match read_block_body(&mut src, SECTION_HEADER_BLOCK, &mut endian) {
            Err(PcapError::BadByteOrder(0xDEADBEEF)) => {}
            other => panic!("expected bad byte order, got {other:?}"),
        }
    }

    #[test]
    fn rejects_misaligned_length() {
        let mut data = framed::<LittleEndian>(SIMPLE_PACKET_BLOCK, &[0u8; 8]);
        data[4..8].copy_from_slice(&21u32.to_le_bytes());
        let mut src = StreamSource::new(&data[4..]);
        let mut endian = Endianness::Little;

        assert!(matches!(
            read_block_body(&mut src, SIMPLE_PACKET_BLOCK, &mut endian),
            Err(PcapError::BadBlockLength(21))
        ));
    }

    #[test]
    fn rejects_too_small_length() {
        let mut data = framed::<LittleEndian>(SIMPLE_PACKET_BLOCK, &[0u8; 8]);
        data[4..8].copy_from_slice(&8u32.to_le_bytes());
        let mut src = StreamSource::new(&data[4..]);
        let mut endian = Endianness::Little;

        assert!(matches!(
            read_block_body(&mut src, SIMPLE_PACKET_BLOCK, &mut endian),
            Err(PcapError::BadBlockLength(8))
        ));
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut data = framed::<LittleEndian>(SIMPLE_PACKET_BLOCK, &[0u8; 8]);
        let trailer_at = data.len() - 4;
        data[trailer_at..].copy_from_slice(&24u32.to_le_bytes());
        let mut src = StreamSource::new(&data[4..]);
        let mut endian = Endianness::Little;

        assert!(matches!(
            read_block_body(&mut src, SIMPLE_PACKET_BLOCK, &mut endian),
            Err(PcapError::BadBlockLength(24))
        ));
    }
}
