//! Extract filtered IP datagrams from pcap and pcap-ng capture files.
//!
//! This crate reads the two packet-capture file formats written by
//! Wireshark and tcpdump, strips link-layer encapsulation (Ethernet, BSD
//! loopback, raw IP, nested 802.1Q/802.1ad/802.1ah VLAN tagging) and
//! surfaces well-formed IPv4/IPv6 datagrams, each annotated with its
//! capture timestamp and VLAN stack. Metadata blocks, non-IP frames,
//! truncated captures and malformed records are skipped.
//!
//! [`PcapCapture`] is the plain reader; [`PcapFilter`] adds packet-number
//! windows, time windows, protocol sets, VLAN id matching and flow
//! predicates with bidirectional and auto-learn modes.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pcap_sieve::{PcapFilter, SocketFilter};
//!
//! let mut filter = PcapFilter::new();
//! filter.set_protocol_filter_udp();
//! filter.set_destination_filter(SocketFilter::from_socket("10.0.0.2:9999".parse().unwrap()));
//!
//! filter.open("capture.pcapng").unwrap();
//! while let Some(ip) = filter.next_ip().unwrap() {
//!     println!(
//!         "{} -> {} ({} bytes)",
//!         ip.packet.source(),
//!         ip.packet.destination(),
//!         ip.packet.size()
//!     );
//! }
//! println!("{} IP packets out of {}", filter.ip_packet_count(), filter.packet_count());
//! ```
//!
//! File formats per the IETF opsawg drafts `draft-gharris-opsawg-pcap`
//! (pcap) and `draft-tuexen-opsawg-pcapng` (pcap-ng).

pub mod capture;
pub mod common;
pub mod errors;
pub mod filter;
pub mod ip;
pub mod source;
pub mod vlan;

mod link;

pub use capture::{to_time, CapturedFrame, CapturedIp, InterfaceDesc, PcapCapture};
pub use common::Endianness;
pub use errors::{PcapError, PcapResult};
pub use filter::{PcapFilter, SocketFilter};
pub use ip::{IpPacket, IP_PROTO_TCP, IP_PROTO_UDP};
pub use source::{CaptureInput, StreamSource};
pub use vlan::{VlanStack, VlanTag};
