//! Reading captures with packet filtering.
//!
//! [`PcapFilter`] wraps a [`PcapCapture`] and applies a packet-number
//! window, relative and absolute time windows, an IP sub-protocol set, a
//! VLAN id match and source/destination flow predicates, with optional
//! bidirectional matching and flow auto-learning.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use tracing::{debug, trace};

use crate::capture::{CapturedIp, PcapCapture};
use crate::errors::PcapResult;
use crate::ip::{IP_PROTO_TCP, IP_PROTO_UDP};
use crate::source::CaptureInput;

/* ----- struct SocketFilter ----- */

/// Matching pattern for one endpoint of a flow.
///
/// An unset address or port acts as a wildcard. Ports only participate in
/// matching when the protocol filter admits TCP or UDP (or is empty).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SocketFilter {
    pub addr: Option<IpAddr>,
    pub port: Option<u16>,
}

impl SocketFilter {
    /// The fully wildcarded pattern.
    pub const ANY: SocketFilter = SocketFilter { addr: None, port: None };

    pub fn new(addr: Option<IpAddr>, port: Option<u16>) -> SocketFilter {
        SocketFilter { addr, port }
    }

    /// Pattern matching exactly one socket address.
    pub fn from_socket(socket: SocketAddr) -> SocketFilter {
        SocketFilter {
            addr: Some(socket.ip()),
            port: Some(socket.port()),
        }
    }

    fn matches(&self, addr: IpAddr, port: Option<u16>, use_port: bool) -> bool {
        if let Some(expected) = self.addr {
            if expected != addr {
                return false;
            }
        }
        if use_port {
            if let Some(expected) = self.port {
                if Some(expected) != port {
                    return false;
                }
            }
        }
        true
    }

    fn is_set(&self, use_port: bool) -> bool {
        self.addr.is_some() && (!use_port || self.port.is_some())
    }
}

impl fmt::Display for SocketFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{addr}")?,
            None => write!(f, "*")?,
        }
        match self.port {
            Some(port) => write!(f, ":{port}"),
            None => write!(f, ":*"),
        }
    }
}

/* ----- struct PcapFilter ----- */

/// Reads a pcap or pcap-ng capture with packet filtering.
///
/// Window and flow options persist across `open()` calls: each `open()`
/// re-arms the effective filter from the configured options and forgets any
/// addresses learned on the previous capture.
///
/// # Examples
///
/// ```rust,no_run
/// use pcap_sieve::PcapFilter;
///
/// let mut filter = PcapFilter::new();
/// filter.set_protocol_filter_udp();
/// filter.set_vlan_filter(vec![100]);
/// filter.open("dump.pcapng").unwrap();
/// while let Some(ip) = filter.next_ip().unwrap() {
///     println!("{} -> {}", ip.packet.source(), ip.packet.destination());
/// }
/// ```
#[derive(Debug)]
pub struct PcapFilter<R: Read = CaptureInput> {
    capture: PcapCapture<R>,

    // Configured options, surviving across open() calls.
    opt_first_packet: Option<u64>,
    opt_last_packet: Option<u64>,
    opt_first_time_offset: Option<i64>,
    opt_last_time_offset: Option<i64>,
    opt_first_time: Option<i64>,
    opt_last_time: Option<i64>,
    vlans: Vec<u32>,
    protocols: BTreeSet<u8>,
    opt_source: SocketFilter,
    opt_destination: SocketFilter,
    bidirectional: bool,
    wildcard: bool,

    // Effective flow endpoints; mutated by auto-learning.
    source: SocketFilter,
    destination: SocketFilter,
}

impl<R: Read> Default for PcapFilter<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl PcapFilter<CaptureInput> {
    /// Opens a capture file, or standard input when the path is empty or
    /// `"-"`, and re-arms the filter from the configured options.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> PcapResult<()> {
        self.capture.open(path)?;
        self.rearm();
        Ok(())
    }
}

impl<R: Read> PcapFilter<R> {
    /// Creates a filter with no bounds: every IP datagram passes.
    pub fn new() -> PcapFilter<R> {
        PcapFilter {
            capture: PcapCapture::new(),
            opt_first_packet: None,
            opt_last_packet: None,
            opt_first_time_offset: None,
            opt_last_time_offset: None,
            opt_first_time: None,
            opt_last_time: None,
            vlans: Vec::new(),
            protocols: BTreeSet::new(),
            opt_source: SocketFilter::ANY,
            opt_destination: SocketFilter::ANY,
            bidirectional: false,
            wildcard: true,
            source: SocketFilter::ANY,
            destination: SocketFilter::ANY,
        }
    }

    /// Opens the capture found on an arbitrary reader and re-arms the
    /// filter from the configured options.
    pub fn open_reader(&mut self, reader: R) -> PcapResult<()> {
        self.capture.open_reader(reader)?;
        self.rearm();
        Ok(())
    }

    /// Closes the input; counters and timestamps stay readable.
    pub fn close(&mut self) {
        self.capture.close();
    }

    fn rearm(&mut self) {
        self.source = self.opt_source;
        self.destination = self.opt_destination;
    }

    /* ----- window options ----- */

    /// Keep packets starting at this 1-based packet number (inclusive).
    pub fn set_first_packet_filter(&mut self, number: u64) {
        self.opt_first_packet = Some(number);
    }

    /// Keep packets up to this 1-based packet number (inclusive); beyond
    /// it, iteration stops.
    pub fn set_last_packet_filter(&mut self, number: u64) {
        self.opt_last_packet = Some(number);
    }

    /// Keep packets starting at this offset from the beginning of the
    /// capture, in microseconds.
    pub fn set_first_time_offset(&mut self, micros: i64) {
        self.opt_first_time_offset = Some(micros);
    }

    /// Keep packets up to this offset from the beginning of the capture, in
    /// microseconds; beyond it, iteration stops.
    pub fn set_last_time_offset(&mut self, micros: i64) {
        self.opt_last_time_offset = Some(micros);
    }

    /// Keep packets starting at this absolute timestamp, in microseconds
    /// since the Unix epoch.
    pub fn set_first_timestamp(&mut self, micros: i64) {
        self.opt_first_time = Some(micros);
    }

    /// Keep packets up to this absolute timestamp, in microseconds since
    /// the Unix epoch; beyond it, iteration stops.
    pub fn set_last_timestamp(&mut self, micros: i64) {
        self.opt_last_time = Some(micros);
    }

    /// Keep packets whose VLAN stack contains these ids in order, outermost
    /// first (subsequence match). An empty list matches every packet.
    pub fn set_vlan_filter(&mut self, ids: Vec<u32>) {
        self.vlans = ids;
    }

    /* ----- protocol options ----- */

    /// Keep TCP packets only.
    pub fn set_protocol_filter_tcp(&mut self) {
        self.protocols.clear();
        self.protocols.insert(IP_PROTO_TCP);
    }

    /// Keep UDP packets only.
    pub fn set_protocol_filter_udp(&mut self) {
        self.protocols.clear();
        self.protocols.insert(IP_PROTO_UDP);
    }

    /// Keep packets with one of these 8-bit IP sub-protocols. An empty set
    /// keeps every protocol.
    pub fn set_protocol_filter<I: IntoIterator<Item = u8>>(&mut self, protocols: I) {
        self.protocols = protocols.into_iter().collect();
    }

    /// Accept all protocols again.
    pub fn clear_protocol_filter(&mut self) {
        self.protocols.clear();
    }

    /* ----- flow options ----- */

    /// Keep packets sent from `addr`. Turns bidirectional matching off.
    pub fn set_source_filter(&mut self, addr: SocketFilter) {
        self.opt_source = addr;
        self.source = addr;
        self.bidirectional = false;
    }

    /// Keep packets sent to `addr`. Turns bidirectional matching off.
    pub fn set_destination_filter(&mut self, addr: SocketFilter) {
        self.opt_destination = addr;
        self.destination = addr;
        self.bidirectional = false;
    }

    /// Keep packets exchanged between `addr1` and `addr2`, in either
    /// direction.
    pub fn set_bidirectional_filter(&mut self, addr1: SocketFilter, addr2: SocketFilter) {
        self.opt_source = addr1;
        self.source = addr1;
        self.opt_destination = addr2;
        self.destination = addr2;
        self.bidirectional = true;
    }

    /// Sets the wildcard mode (the default is on).
    ///
    /// When on, unspecified parts of the flow endpoints match every packet.
    /// When off, the first matching packet locks the filter onto its
    /// addresses: all subsequent packets are filtered for that specific
    /// flow, until the next `open()`.
    pub fn set_wildcard_filter(&mut self, on: bool) {
        self.wildcard = on;
    }

    /// The effective source pattern. After a non-wildcard filter locked
    /// onto a flow, this is the learned source endpoint.
    pub fn source_filter(&self) -> SocketFilter {
        self.source
    }

    /// The effective destination pattern; see
    /// [`source_filter`](Self::source_filter).
    pub fn destination_filter(&self) -> SocketFilter {
        self.destination
    }

    /// True if both flow endpoints are fully specified (no wildcard left,
    /// ports included when the protocol filter admits TCP or UDP).
    pub fn address_filter_is_set(&self) -> bool {
        let use_port = self.use_port();
        self.source.is_set(use_port) && self.destination.is_set(use_port)
    }

    /// Given one endpoint of the filtered flow, returns the opposite one,
    /// or the wildcard pattern when `socket` matches neither endpoint.
    pub fn other_filter(&self, socket: SocketAddr) -> SocketFilter {
        let use_port = self.use_port();
        if self.source.matches(socket.ip(), Some(socket.port()), use_port) {
            self.destination
        } else if self.destination.matches(socket.ip(), Some(socket.port()), use_port) {
            self.source
        } else {
            SocketFilter::ANY
        }
    }

    fn use_port(&self) -> bool {
        self.protocols.is_empty()
            || self.protocols.contains(&IP_PROTO_TCP)
            || self.protocols.contains(&IP_PROTO_UDP)
    }

    /* ----- reading ----- */

    /// Reads the next IP datagram matching every configured predicate.
    ///
    /// Returns `Ok(None)` on end of input, and also as soon as the packet
    /// number or a timestamp exceeds its upper bound, since no later packet
    /// can match.
    pub fn next_ip(&mut self) -> PcapResult<Option<CapturedIp>> {
        loop {
            let captured = match self.capture.next_ip()? {
                Some(captured) => captured,
                None => return Ok(None),
            };
            let number = self.capture.packet_count();
            let timestamp = captured.timestamp;

            // Upper bounds end the iteration, they don't just skip.
            if matches!(self.opt_last_packet, Some(last) if number > last) {
                return Ok(None);
            }
            if let Some(t) = timestamp {
                if matches!(self.opt_last_time, Some(last) if t > last) {
                    return Ok(None);
                }
                if matches!(self.opt_last_time_offset, Some(last) if self.capture.time_offset(t) > last)
                {
                    return Ok(None);
                }
            }

            // Lower bounds and the general predicates skip the packet. A
            // time lower bound excludes packets with no timestamp at all.
            if !self.protocols.is_empty() && !self.protocols.contains(&captured.packet.protocol()) {
                continue;
            }
            if matches!(self.opt_first_packet, Some(first) if number < first) {
                continue;
            }
            if let Some(first) = self.opt_first_time {
                match timestamp {
                    Some(t) if t >= first => {}
                    _ => continue,
                }
            }
            if let Some(first) = self.opt_first_time_offset {
                match timestamp {
                    Some(t) if self.capture.time_offset(t) >= first => {}
                    _ => continue,
                }
            }
            if !captured.vlans.matches(&self.vlans) {
                continue;
            }

            // Flow matching, with auto-learning when the filter is not in
            // wildcard mode and the endpoints are not fully specified yet.
            let use_port = self.use_port();
            let packet = &captured.packet;
            let learning = !self.wildcard && !self.address_filter_is_set();

            let forward = self
                .source
                .matches(packet.source_ip(), packet.source_port(), use_port)
                && self
                    .destination
                    .matches(packet.destination_ip(), packet.destination_port(), use_port);
            let reverse = !forward
                && self.bidirectional
                && self
                    .source
                    .matches(packet.destination_ip(), packet.destination_port(), use_port)
                && self
                    .destination
                    .matches(packet.source_ip(), packet.source_port(), use_port);

            if forward {
                if learning {
                    self.source = SocketFilter::new(Some(packet.source_ip()), packet.source_port());
                    self.destination =
                        SocketFilter::new(Some(packet.destination_ip()), packet.destination_port());
                    self.log_selected_flow();
                }
            } else if reverse {
                if learning {
                    self.source =
                        SocketFilter::new(Some(packet.destination_ip()), packet.destination_port());
                    self.destination =
                        SocketFilter::new(Some(packet.source_ip()), packet.source_port());
                    self.log_selected_flow();
                }
            } else {
                // Not a packet from the filtered flow.
                continue;
            }

            trace!(
                number,
                size = packet.size(),
                data_size = packet.protocol_data_size(),
                timestamp,
                "accepted packet"
            );
            return Ok(Some(captured));
        }
    }

    fn log_selected_flow(&self) {
        debug!(
            source = %self.source,
            destination = %self.destination,
            bidirectional = self.bidirectional,
            "selected flow"
        );
    }

    /* ----- observables, delegated to the capture ----- */

    pub fn is_open(&self) -> bool {
        self.capture.is_open()
    }

    pub fn file_name(&self) -> &str {
        self.capture.file_name()
    }

    pub fn packet_count(&self) -> u64 {
        self.capture.packet_count()
    }

    pub fn ip_packet_count(&self) -> u64 {
        self.capture.ip_packet_count()
    }

    pub fn file_size(&self) -> u64 {
        self.capture.file_size()
    }

    pub fn total_packets_size(&self) -> u64 {
        self.capture.total_packets_size()
    }

    pub fn total_ip_packets_size(&self) -> u64 {
        self.capture.total_ip_packets_size()
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.capture.first_timestamp()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.capture.last_timestamp()
    }

    /// Offset of `timestamp` from the beginning of the capture, clamped to
    /// zero.
    pub fn time_offset(&self, timestamp: i64) -> i64 {
        self.capture.time_offset(timestamp)
    }

    /// The wrapped capture reader.
    pub fn capture(&self) -> &PcapCapture<R> {
        &self.capture
    }
}
