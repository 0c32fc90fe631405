//! Endianness handling and link-layer constants shared by the readers.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order of the multi-byte fields of a capture file.
///
/// Legacy pcap endianness is inferred from the file magic; pcap-ng
/// endianness is given by the byte-order magic of each section header and
/// can change between sections.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Endianness {
    Big,
    Little,
}

impl Endianness {
    /// True if the current endianness is big.
    pub fn is_big(self) -> bool {
        self == Endianness::Big
    }

    /// Reads a `u16` at `offset`.
    ///
    /// Callers validate buffer lengths beforehand; an out-of-range offset
    /// panics like any slice access.
    pub fn read_u16(self, buf: &[u8], offset: usize) -> u16 {
        match self {
            Endianness::Big => BigEndian::read_u16(&buf[offset..]),
            Endianness::Little => LittleEndian::read_u16(&buf[offset..]),
        }
    }

    /// Reads a `u32` at `offset`.
    pub fn read_u32(self, buf: &[u8], offset: usize) -> u32 {
        match self {
            Endianness::Big => BigEndian::read_u32(&buf[offset..]),
            Endianness::Little => LittleEndian::read_u32(&buf[offset..]),
        }
    }

    /// Reads a `u64` at `offset`.
    pub fn read_u64(self, buf: &[u8], offset: usize) -> u64 {
        match self {
            Endianness::Big => BigEndian::read_u64(&buf[offset..]),
            Endianness::Little => LittleEndian::read_u64(&buf[offset..]),
        }
    }
}

/// Link-layer types, per the tcpdump.org link-layer header type registry.
pub mod link_type {
    /// BSD loopback encapsulation: 4-byte protocol family in file byte order.
    pub const NULL: u16 = 0;
    /// Ethernet II frames.
    pub const ETHERNET: u16 = 1;
    /// Raw IP, no link-layer header.
    pub const RAW: u16 = 101;
    /// OpenBSD loopback: 4-byte protocol family in network byte order.
    pub const LOOP: u16 = 108;
    /// Sentinel for an interface whose link type was never seen.
    pub const UNKNOWN: u16 = 0xFFFF;
}

/// EtherType values recognized during decapsulation.
pub mod ether_type {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86DD;
    /// IEEE 802.1Q VLAN tag.
    pub const VLAN_802_1Q: u16 = 0x8100;
    /// IEEE 802.1ad provider bridging (QinQ).
    pub const VLAN_802_1AD: u16 = 0x88A8;
    /// IEEE 802.1ah provider backbone bridging (MAC-in-MAC).
    pub const VLAN_802_1AH: u16 = 0x88E7;
}

/// BSD loopback protocol family values that carry an IP payload.
///
/// The IPv6 value differs between BSD flavors, hence the three codes.
pub mod bsd_family {
    pub const IPV4: u32 = 2;
    pub const IPV6_BSD: u32 = 24;
    pub const IPV6_FREEBSD: u32 = 28;
    pub const IPV6_DARWIN: u32 = 30;

    /// True if `family` identifies an IPv4 or IPv6 payload.
    pub fn is_ip(family: u32) -> bool {
        matches!(family, IPV4 | IPV6_BSD | IPV6_FREEBSD | IPV6_DARWIN)
    }
}
