//! Decoding of IPv4 and IPv6 datagrams extracted from captured frames.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{BigEndian, ByteOrder};

use crate::errors::{PcapError, PcapResult};

/// TCP protocol number.
pub const IP_PROTO_TCP: u8 = 6;
/// UDP protocol number.
pub const IP_PROTO_UDP: u8 = 17;

// IPv6 extension headers walked to reach the transport protocol.
const EXT_HOP_BY_HOP: u8 = 0;
const EXT_ROUTING: u8 = 43;
const EXT_FRAGMENT: u8 = 44;
const EXT_DEST_OPTIONS: u8 = 60;

/* ----- struct IpPacket ----- */

/// A decoded IP datagram (v4 or v6), headers included.
///
/// The datagram bytes are owned: they are copied out of the reader's
/// transient frame buffer, so the packet stays valid across later reads.
#[derive(Clone, Debug)]
pub struct IpPacket {
    data: Vec<u8>,
    source: IpAddr,
    destination: IpAddr,
    source_port: Option<u16>,
    destination_port: Option<u16>,
    protocol: u8,
    /// IP header bytes, including the IPv6 extension chain.
    header_size: usize,
    /// TCP/UDP header bytes, 0 when no transport header was decoded.
    transport_header_size: usize,
}

impl IpPacket {
    /// Decodes an IP datagram from captured bytes.
    ///
    /// The buffer must contain the complete datagram; trailing bytes (such
    /// as Ethernet padding) are allowed and excluded from the packet.
    pub fn parse(bytes: &[u8]) -> PcapResult<IpPacket> {
        match bytes.first().map(|b| b >> 4) {
            Some(4) => Self::parse_v4(bytes),
            Some(6) => Self::parse_v6(bytes),
            _ => Err(PcapError::InvalidIpDatagram(bytes.len())),
        }
    }

    fn parse_v4(bytes: &[u8]) -> PcapResult<IpPacket> {
        if bytes.len() < 20 {
            return Err(PcapError::InvalidIpDatagram(bytes.len()));
        }
        let header_size = ((bytes[0] & 0x0F) as usize) * 4;
        let total = BigEndian::read_u16(&bytes[2..]) as usize;
        if header_size < 20 || total < header_size || total > bytes.len() {
            return Err(PcapError::InvalidIpDatagram(bytes.len()));
        }

        let protocol = bytes[9];
        let source = IpAddr::V4(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]));
        let destination = IpAddr::V4(Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]));

        // Non-leading fragments carry no transport header.
        let fragment_offset = BigEndian::read_u16(&bytes[6..]) & 0x1FFF;
        let (source_port, destination_port, transport_header_size) = if fragment_offset == 0 {
            transport_ports(protocol, &bytes[header_size..total])
        } else {
            (None, None, 0)
        };

        Ok(IpPacket {
            data: bytes[..total].to_vec(),
            source,
            destination,
            source_port,
            destination_port,
            protocol,
            header_size,
            transport_header_size,
        })
    }

    fn parse_v6(bytes: &[u8]) -> PcapResult<IpPacket> {
        if bytes.len() < 40 {
            return Err(PcapError::InvalidIpDatagram(bytes.len()));
        }
        let payload_length = BigEndian::read_u16(&bytes[4..]) as usize;
        let total = 40 + payload_length;
        if total > bytes.len() {
            return Err(PcapError::InvalidIpDatagram(bytes.len()));
        }

        let mut addr = [0u8; 16];
        addr.copy_from_slice(&bytes[8..24]);
        let source = IpAddr::V6(Ipv6Addr::from(addr));
        addr.copy_from_slice(&bytes[24..40]);
        let destination = IpAddr::V6(Ipv6Addr::from(addr));

        // Walk the extension chain to the transport protocol.
        let mut protocol = bytes[6];
        let mut offset = 40;
        let mut leading_fragment = true;
        loop {
            match protocol {
                EXT_HOP_BY_HOP | EXT_ROUTING | EXT_DEST_OPTIONS => {
                    if offset + 8 > total {
                        return Err(PcapError::InvalidIpDatagram(bytes.len()));
                    }
                    let ext_len = (bytes[offset + 1] as usize + 1) * 8;
                    if offset + ext_len > total {
                        return Err(PcapError::InvalidIpDatagram(bytes.len()));
                    }
                    protocol = bytes[offset];
                    offset += ext_len;
                }
                EXT_FRAGMENT => {
                    if offset + 8 > total {
                        return Err(PcapError::InvalidIpDatagram(bytes.len()));
                    }
                    leading_fragment = BigEndian::read_u16(&bytes[offset + 2..]) & 0xFFF8 == 0;
                    protocol = bytes[offset];
                    offset += 8;
                }
                _ => break,
            }
        }

        let (source_port, destination_port, transport_header_size) = if leading_fragment {
            transport_ports(protocol, &bytes[offset..total])
        } else {
            (None, None, 0)
        };

        Ok(IpPacket {
            data: bytes[..total].to_vec(),
            source,
            destination,
            source_port,
            destination_port,
            protocol,
            header_size: offset,
            transport_header_size,
        })
    }

    /// Source socket address; the port is 0 when the transport has none.
    pub fn source(&self) -> SocketAddr {
        SocketAddr::new(self.source, self.source_port.unwrap_or(0))
    }

    /// Destination socket address; the port is 0 when the transport has none.
    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.destination, self.destination_port.unwrap_or(0))
    }

    pub fn source_ip(&self) -> IpAddr {
        self.source
    }

    pub fn destination_ip(&self) -> IpAddr {
        self.destination
    }

    /// TCP/UDP source port, when one was decoded.
    pub fn source_port(&self) -> Option<u16> {
        self.source_port
    }

    /// TCP/UDP destination port, when one was decoded.
    pub fn destination_port(&self) -> Option<u16> {
        self.destination_port
    }

    /// The 8-bit IP sub-protocol (TCP, UDP, ICMP, ...).
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Total size of the datagram, headers included.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Size of the payload carried by the transport protocol: the datagram
    /// minus IP headers and, for TCP/UDP, minus the transport header.
    pub fn protocol_data_size(&self) -> usize {
        self.data.len() - self.header_size - self.transport_header_size
    }

    /// The complete datagram bytes, headers included.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_ipv4(&self) -> bool {
        self.source.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.source.is_ipv6()
    }
}

/// Extracts TCP/UDP ports and transport header size from the bytes that
/// follow the IP headers. Unknown protocols and truncated transport
/// headers yield no ports.
fn transport_ports(protocol: u8, segment: &[u8]) -> (Option<u16>, Option<u16>, usize) {
    match protocol {
        IP_PROTO_TCP if segment.len() >= 20 => {
            let data_offset = ((segment[12] >> 4) as usize) * 4;
            if data_offset < 20 || data_offset > segment.len() {
                return (None, None, 0);
            }
            (
                Some(BigEndian::read_u16(segment)),
                Some(BigEndian::read_u16(&segment[2..])),
                data_offset,
            )
        }
        IP_PROTO_UDP if segment.len() >= 8 => (
            Some(BigEndian::read_u16(segment)),
            Some(BigEndian::read_u16(&segment[2..])),
            8,
        ),
        _ => (None, None, 0),
    }
}
