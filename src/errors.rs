//! Errors that can occur while reading a pcap or pcap-ng capture.

use thiserror::Error;

/* ----- enum PcapError ----- */

/// Errors raised while reading a pcap or pcap-ng stream.
///
/// Format errors and I/O errors latch the reader: once one has been
/// returned, every later read fails with [`PcapError::ErrorState`] without
/// touching the input again. [`PcapError::InvalidIpDatagram`] is never
/// latched; the offending frame is skipped with a warning and iteration
/// continues.
#[derive(Debug, Error)]
pub enum PcapError {
    /// The 4-byte file magic matches neither pcap flavor nor pcap-ng.
    #[error("unknown capture file magic number 0x{0:08X}")]
    UnknownMagic(u32),

    /// A pcap-ng section header carries an unknown byte-order magic.
    #[error("unknown pcap-ng byte-order magic 0x{0:08X}")]
    BadByteOrder(u32),

    /// A pcap-ng block length field is invalid (< 12, not a multiple of 4)
    /// or the leading and trailing copies disagree.
    #[error("invalid pcap-ng block length {0}")]
    BadBlockLength(u32),

    /// An option list overruns its enclosing block body.
    #[error("corrupted option list in pcap-ng block")]
    CorruptOptionList,

    /// End of input in the middle of a record or block.
    ///
    /// A clean end of input at a record boundary is not an error and is
    /// reported as `Ok(None)` by the reading operations.
    #[error("short read: needed {needed} bytes, got {got}")]
    ShortRead {
        /// Number of bytes the current record still required.
        needed: usize,
        /// Number of bytes actually available.
        got: usize,
    },

    /// The captured bytes did not form a valid IPv4 or IPv6 datagram.
    #[error("invalid IP datagram ({0} bytes)")]
    InvalidIpDatagram(usize),

    /// `open()` was called while a capture is already open.
    #[error("capture is already open")]
    AlreadyOpen,

    /// A read was attempted while no capture is open.
    #[error("no capture open")]
    NotOpen,

    /// A previous error latched the reader; the input is not read again.
    #[error("capture already in error state")]
    ErrorState,

    /// An I/O error occurred on the underlying input.
    #[error("I/O error while reading capture")]
    Io(#[from] std::io::Error),
}

/// Result of operations that can fail with a [`PcapError`].
pub type PcapResult<T> = Result<T, PcapError>;
