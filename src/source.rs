//! Buffered sequential input with exact-length reads and a byte counter.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

use crate::errors::{PcapError, PcapResult};

/* ----- enum CaptureInput ----- */

/// The input flavors a capture can be read from.
///
/// Standard input is selected by an empty path or `"-"`. Rust performs no
/// newline translation on `Stdin`, so no binary-mode switch is needed on
/// any platform.
#[derive(Debug)]
pub enum CaptureInput {
    /// A regular file, read through a [`BufReader`].
    File(BufReader<File>),
    /// The process standard input.
    Stdin(io::Stdin),
    /// An in-memory capture image.
    Buffer(Cursor<Vec<u8>>),
}

impl CaptureInput {
    /// Opens `path`, mapping the empty path and `"-"` to standard input.
    /// Returns the input and its display name.
    pub fn open(path: &Path) -> io::Result<(CaptureInput, String)> {
        if path.as_os_str().is_empty() || path == Path::new("-") {
            Ok((CaptureInput::Stdin(io::stdin()), "standard input".to_string()))
        } else {
            let file = File::open(path)?;
            Ok((CaptureInput::File(BufReader::new(file)), path.display().to_string()))
        }
    }
}

impl Read for CaptureInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CaptureInput::File(file) => file.read(buf),
            CaptureInput::Stdin(stdin) => stdin.read(buf),
            CaptureInput::Buffer(cursor) => cursor.read(buf),
        }
    }
}

impl From<Vec<u8>> for CaptureInput {
    fn from(data: Vec<u8>) -> Self {
        CaptureInput::Buffer(Cursor::new(data))
    }
}

/* ----- struct StreamSource ----- */

/// Wraps a reader with exact-length reads and a running byte counter.
///
/// A short read before end-of-input is an error; a clean end-of-input at a
/// record boundary is signalled through [`StreamSource::read_exact_or_eof`].
#[derive(Debug)]
pub struct StreamSource<R: Read> {
    reader: R,
    bytes_read: u64,
}

impl<R: Read> StreamSource<R> {
    pub fn new(reader: R) -> StreamSource<R> {
        StreamSource { reader, bytes_read: 0 }
    }

    /// Number of bytes consumed from the underlying reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Reads until `buf` is full or the input is exhausted.
    fn fill(&mut self, buf: &mut [u8]) -> PcapResult<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.reader.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    self.bytes_read += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PcapError::Io(e)),
            }
        }
        Ok(total)
    }

    /// Reads exactly `buf.len()` bytes.
    ///
    /// Any shortfall, including end-of-input, is a [`PcapError::ShortRead`].
    pub fn read_exact(&mut self, buf: &mut [u8]) -> PcapResult<()> {
        let got = self.fill(buf)?;
        if got < buf.len() {
            return Err(PcapError::ShortRead { needed: buf.len(), got });
        }
        Ok(())
    }

    /// Reads exactly `buf.len()` bytes, tolerating a clean end of input.
    ///
    /// Returns `Ok(false)` when the input ends before the first byte (a
    /// record boundary), `Ok(true)` when the buffer was filled, and
    /// [`PcapError::ShortRead`] when the input ends mid-way.
    pub fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> PcapResult<bool> {
        let got = self.fill(buf)?;
        if got == 0 {
            Ok(false)
        } else if got < buf.len() {
            Err(PcapError::ShortRead { needed: buf.len(), got })
        } else {
            Ok(true)
        }
    }
}
