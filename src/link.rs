//! Link-layer decapsulation: locating the IP payload of a captured frame.

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use crate::capture::InterfaceDesc;
use crate::common::{bsd_family, ether_type, link_type, Endianness};
use crate::vlan::{VlanStack, VlanTag};

/// Ethernet II header: destination MAC, source MAC, EtherType.
const ETHER_HEADER_SIZE: usize = 14;
/// Offset of the EtherType field in the Ethernet header.
const ETHER_TYPE_OFFSET: usize = 12;

/// Strips link-layer encapsulation from a captured frame.
///
/// On success returns the presumed IP payload and the stack of VLAN tags it
/// was extracted from, outermost first. Returns `None` when the frame does
/// not carry an identifiable IP datagram; whether the payload really is one
/// is decided by the IP decoder.
///
/// `endian` is the capture's byte order, used for the `LINKTYPE_NULL`
/// protocol family word.
pub(crate) fn decapsulate<'a>(
    data: &'a [u8],
    ifd: &InterfaceDesc,
    endian: Endianness,
) -> Option<(&'a [u8], VlanStack)> {
    let mut start = 0usize;
    let mut len = data.len();
    let mut vlans = VlanStack::new();

    // BSD loopback encapsulation: a 4-byte protocol family word, in the
    // file's byte order for LINKTYPE_NULL and network order for
    // LINKTYPE_LOOP.
    let mut family = None;
    if len >= 4 {
        if ifd.link_type == link_type::NULL {
            family = Some(endian.read_u32(data, 0));
        } else if ifd.link_type == link_type::LOOP {
            family = Some(BigEndian::read_u32(data));
        }
    }

    if matches!(family, Some(f) if bsd_family::is_ip(f)) {
        start += 4;
        len -= 4;
    } else if matches!(
        ifd.link_type,
        link_type::ETHERNET | link_type::NULL | link_type::LOOP
    ) && len > ETHER_HEADER_SIZE + ifd.fcs_size
    {
        // Some real-world captures store raw Ethernet frames under
        // LINKTYPE_NULL/LINKTYPE_LOOP without the 4-byte family word, so
        // those link types fall through to the Ethernet path.
        if ifd.link_type != link_type::ETHERNET {
            debug!(
                link_type = ifd.link_type,
                "accepting Ethernet frame under loopback link type"
            );
        }

        let mut ether = BigEndian::read_u16(&data[start + ETHER_TYPE_OFFSET..]);
        start += ETHER_HEADER_SIZE;
        len -= ETHER_HEADER_SIZE + ifd.fcs_size;

        // Unwrap nested VLAN encapsulation until the inner packet. Each
        // recorded tag carries the EtherType that follows it.
        while ether != ether_type::IPV4 && ether != ether_type::IPV6 && len > 0 {
            match ether {
                // 802.1Q / 802.1ad: 2-byte flags and VLAN id, 2-byte
                // next EtherType.
                ether_type::VLAN_802_1Q | ether_type::VLAN_802_1AD if len >= 4 => {
                    let id = (BigEndian::read_u16(&data[start..]) & 0x0FFF) as u32;
                    ether = BigEndian::read_u16(&data[start + 2..]);
                    vlans.push(VlanTag { ether_type: ether, id });
                    start += 4;
                    len -= 4;
                }
                // 802.1ah: 4-byte flags and service id, two customer MAC
                // addresses, 2-byte next EtherType.
                ether_type::VLAN_802_1AH if len >= 18 => {
                    let id = read_u24_be(&data[start + 1..]) & 0x0FFF;
                    ether = BigEndian::read_u16(&data[start + 16..]);
                    vlans.push(VlanTag { ether_type: ether, id });
                    start += 18;
                    len -= 18;
                }
                // Unknown EtherType or truncated tag.
                _ => len = 0,
            }
        }
    } else if ifd.link_type == link_type::RAW && len >= 1 {
        // Raw IP: the version nibble must announce IPv4 or IPv6.
        let version = data[0] >> 4;
        if version != 4 && version != 6 {
            len = 0;
        }
    } else {
        len = 0;
    }

    if len == 0 {
        None
    } else {
        Some((&data[start..start + len], vlans))
    }
}

fn read_u24_be(buf: &[u8]) -> u32 {
    ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32
}
