//! End-to-end tests for the legacy pcap format.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use pcap_sieve::{PcapCapture, PcapError, IP_PROTO_UDP};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP: u16 = 0x0806;

/* ----- capture builders ----- */

fn file_header<B: ByteOrder>(magic: u32, link_word: u32) -> Vec<u8> {
    let mut out = vec![0u8; 24];
    let mut field = [0u8; 4];
    B::write_u32(&mut field, magic);
    out[0..4].copy_from_slice(&field);
    B::write_u16(&mut out[4..6], 2);
    B::write_u16(&mut out[6..8], 4);
    B::write_u32(&mut out[16..20], 65535);
    B::write_u32(&mut out[20..24], link_word);
    out
}

fn record<B: ByteOrder>(sec: u32, sub: u32, captured: u32, original: u32, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 16];
    B::write_u32(&mut out[0..4], sec);
    B::write_u32(&mut out[4..8], sub);
    B::write_u32(&mut out[8..12], captured);
    B::write_u32(&mut out[12..16], original);
    out.extend_from_slice(data);
    out
}

fn eth_frame(ether_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14];
    BigEndian::write_u16(&mut frame[12..14], ether_type);
    frame.extend_from_slice(payload);
    frame
}

fn ipv4_udp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, payload: &[u8]) -> Vec<u8> {
    let total = 28 + payload.len();
    let mut p = vec![0u8; 28];
    p[0] = 0x45;
    BigEndian::write_u16(&mut p[2..4], total as u16);
    p[8] = 64;
    p[9] = IP_PROTO_UDP;
    p[12..16].copy_from_slice(&src);
    p[16..20].copy_from_slice(&dst);
    BigEndian::write_u16(&mut p[20..22], sport);
    BigEndian::write_u16(&mut p[22..24], dport);
    BigEndian::write_u16(&mut p[24..26], (8 + payload.len()) as u16);
    p.extend_from_slice(payload);
    p
}

fn udp_frame() -> Vec<u8> {
    eth_frame(ETHERTYPE_IPV4, &ipv4_udp([10, 0, 0, 1], 53, [10, 0, 0, 2], 9999, b""))
}

/* ----- tests ----- */

#[test]
fn microsecond_ethernet_ipv4_udp() {
    let frame = udp_frame();
    assert_eq!(frame.len(), 42);

    let mut data = file_header::<BigEndian>(0xA1B2_C3D4, 1);
    data.extend_from_slice(&record::<BigEndian>(10, 500_000, 42, 42, &frame));

    let mut capture = PcapCapture::new();
    capture.open_reader(&data[..]).unwrap();
    assert!(capture.is_open());
    assert!(!capture.is_pcap_ng());
    assert!(capture.endianness().is_big());
    assert_eq!(capture.major_version(), 2);
    assert_eq!(capture.minor_version(), 4);

    let ip = capture.next_ip().unwrap().expect("one IP packet expected");
    assert_eq!(ip.timestamp, Some(10_500_000));
    assert!(ip.vlans.is_empty());
    assert_eq!(ip.packet.source().to_string(), "10.0.0.1:53");
    assert_eq!(ip.packet.destination().to_string(), "10.0.0.2:9999");
    assert_eq!(ip.packet.protocol(), IP_PROTO_UDP);
    assert_eq!(ip.packet.size(), 28);

    assert!(capture.next_ip().unwrap().is_none());
    assert_eq!(capture.packet_count(), 1);
    assert_eq!(capture.ip_packet_count(), 1);
    assert_eq!(capture.first_timestamp(), Some(10_500_000));
    assert_eq!(capture.last_timestamp(), Some(10_500_000));
    assert_eq!(capture.total_packets_size(), 42);
    assert_eq!(capture.total_ip_packets_size(), 28);
    assert_eq!(capture.file_size() as usize, data.len());
}

#[test]
fn little_endian_file() {
    let frame = udp_frame();
    let mut data = file_header::<LittleEndian>(0xA1B2_C3D4, 1);
    data.extend_from_slice(&record::<LittleEndian>(10, 500_000, 42, 42, &frame));

    let mut capture = PcapCapture::new();
    capture.open_reader(&data[..]).unwrap();
    assert!(!capture.endianness().is_big());

    let ip = capture.next_ip().unwrap().unwrap();
    assert_eq!(ip.timestamp, Some(10_500_000));
    assert_eq!(ip.packet.size(), 28);
}

#[test]
fn nanosecond_resolution() {
    let frame = udp_frame();
    let mut data = file_header::<LittleEndian>(0xA1B2_3C4D, 1);
    data.extend_from_slice(&record::<LittleEndian>(10, 500_000_000, 42, 42, &frame));

    let mut capture = PcapCapture::new();
    capture.open_reader(&data[..]).unwrap();

    let ip = capture.next_ip().unwrap().unwrap();
    assert_eq!(ip.timestamp, Some(10_500_000));
}

#[test]
fn truncated_record_is_skipped_but_counted() {
    let frame = udp_frame();
    let mut data = file_header::<LittleEndian>(0xA1B2_C3D4, 1);
    data.extend_from_slice(&record::<LittleEndian>(1, 0, 500, 1500, &[0u8; 500]));
    data.extend_from_slice(&record::<LittleEndian>(2, 0, 42, 42, &frame));

    let mut capture = PcapCapture::new();
    capture.open_reader(&data[..]).unwrap();

    let ip = capture.next_ip().unwrap().expect("the second record is valid");
    assert_eq!(ip.timestamp, Some(2_000_000));
    assert_eq!(capture.packet_count(), 2);
    assert_eq!(capture.ip_packet_count(), 1);
    assert_eq!(capture.total_packets_size(), 542);
    // The truncated record never updates the timestamps.
    assert_eq!(capture.first_timestamp(), Some(2_000_000));
}

#[test]
fn non_ip_frames_are_skipped() {
    let arp = eth_frame(ETHERTYPE_ARP, &[0u8; 28]);
    let frame = udp_frame();
    let mut data = file_header::<LittleEndian>(0xA1B2_C3D4, 1);
    data.extend_from_slice(&record::<LittleEndian>(1, 0, arp.len() as u32, arp.len() as u32, &arp));
    data.extend_from_slice(&record::<LittleEndian>(2, 0, 42, 42, &frame));

    let mut capture = PcapCapture::new();
    capture.open_reader(&data[..]).unwrap();

    let ip = capture.next_ip().unwrap().unwrap();
    assert_eq!(ip.timestamp, Some(2_000_000));
    assert_eq!(capture.packet_count(), 2);
    assert_eq!(capture.ip_packet_count(), 1);
}

#[test]
fn invalid_ip_datagram_is_skipped_with_warning() {
    // EtherType says IPv4 but the payload declares a length beyond the
    // captured bytes.
    let mut bogus = ipv4_udp([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, b"");
    BigEndian::write_u16(&mut bogus[2..4], 500);
    let bogus = eth_frame(ETHERTYPE_IPV4, &bogus);
    let frame = udp_frame();

    let mut data = file_header::<LittleEndian>(0xA1B2_C3D4, 1);
    data.extend_from_slice(&record::<LittleEndian>(1, 0, bogus.len() as u32, bogus.len() as u32, &bogus));
    data.extend_from_slice(&record::<LittleEndian>(2, 0, 42, 42, &frame));

    let mut capture = PcapCapture::new();
    capture.open_reader(&data[..]).unwrap();

    let ip = capture.next_ip().unwrap().unwrap();
    assert_eq!(ip.timestamp, Some(2_000_000));
    assert_eq!(capture.packet_count(), 2);
    assert_eq!(capture.ip_packet_count(), 1);
}

#[test]
fn fcs_trailer_from_header_is_stripped() {
    // FCS indicator byte 0x30: present bit set, length 1 (doubled to 2 bytes).
    let mut frame = udp_frame();
    frame.extend_from_slice(&[0xAA, 0xBB]);
    let link_word = (0x30u32 << 24) | 1;

    let mut data = file_header::<LittleEndian>(0xA1B2_C3D4, link_word);
    data.extend_from_slice(&record::<LittleEndian>(1, 0, frame.len() as u32, frame.len() as u32, &frame));

    let mut capture = PcapCapture::new();
    capture.open_reader(&data[..]).unwrap();

    let ip = capture.next_ip().unwrap().unwrap();
    assert_eq!(ip.packet.size(), 28);
}

#[test]
fn short_read_mid_record_latches() {
    let frame = udp_frame();
    let mut data = file_header::<LittleEndian>(0xA1B2_C3D4, 1);
    data.extend_from_slice(&record::<LittleEndian>(1, 0, 42, 42, &frame));
    data.truncate(24 + 16 + 10); // cut inside the frame bytes

    let mut capture = PcapCapture::new();
    capture.open_reader(&data[..]).unwrap();

    assert!(matches!(capture.next_ip(), Err(PcapError::ShortRead { .. })));
    // Latched: no further I/O, the same failure classification repeats.
    assert!(matches!(capture.next_ip(), Err(PcapError::ErrorState)));
}

#[test]
fn unknown_magic_fails_open() {
    let data = [0x12u8, 0x34, 0x56, 0x78, 0, 0, 0, 0];
    let mut capture = PcapCapture::new();
    match capture.open_reader(&data[..]) {
        Err(PcapError::UnknownMagic(0x12345678)) => {}
        other => panic!("expected unknown magic, got {other:?}"),
    }
    assert!(!capture.is_open());
}

#[test]
fn empty_input_fails_open() {
    let mut capture = PcapCapture::new();
    assert!(matches!(
        capture.open_reader(&[][..]),
        Err(PcapError::ShortRead { .. })
    ));
}

#[test]
fn open_close_state_machine() {
    let data = file_header::<LittleEndian>(0xA1B2_C3D4, 1);

    let mut capture = PcapCapture::new();
    assert!(matches!(capture.next_ip(), Err(PcapError::NotOpen)));

    capture.open_reader(&data[..]).unwrap();
    assert!(matches!(
        capture.open_reader(&data[..]),
        Err(PcapError::AlreadyOpen)
    ));

    assert!(capture.next_ip().unwrap().is_none());
    capture.close();
    assert!(!capture.is_open());
    // Post-mortem: counters survive close().
    assert_eq!(capture.file_size() as usize, data.len());
    assert!(matches!(capture.next_ip(), Err(PcapError::NotOpen)));

    // Reopening resets the counters.
    capture.open_reader(&data[..]).unwrap();
    assert_eq!(capture.packet_count(), 0);
}

#[test]
fn packet_numbers_and_timestamps_are_monotonic() {
    let frame = udp_frame();
    let mut data = file_header::<LittleEndian>(0xA1B2_C3D4, 1);
    for sec in 1..=5u32 {
        data.extend_from_slice(&record::<LittleEndian>(sec, 0, 42, 42, &frame));
    }

    let mut capture = PcapCapture::new();
    capture.open_reader(&data[..]).unwrap();

    let mut last_number = 0;
    let mut last_ts = None;
    while let Some(ip) = capture.next_ip().unwrap() {
        assert!(capture.packet_count() > last_number);
        last_number = capture.packet_count();
        assert!(ip.timestamp >= last_ts);
        last_ts = ip.timestamp;
        assert!(capture.ip_packet_count() <= capture.packet_count());
    }
    assert_eq!(last_number, 5);
}
