//! # Bitstream Reader
//!
//! Sequential access to the compressed bytes of one source, with an absolute
//! position cursor. Files are read through a buffered handle; memory sources
//! share the caller's `Bytes` without copying.
//!
//! [`BitReader`] extracts LSB-first bit fields from a packet slice, which is
//! how Vorbis packs every field below byte granularity.

use crate::error::Result;
use bridge_traits::playback::AudioSource;
use bytes::Bytes;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use tracing::debug;

/// Anything the reader can pull bytes from.
pub trait ByteSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ByteSource for T {}

/// Result of a bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes copied into the caller's buffer.
    pub consumed: usize,
    /// The cursor sits at the end of the source.
    pub end_of_data: bool,
}

/// Byte cursor over a file or memory buffer.
pub struct BitstreamReader {
    source: Box<dyn ByteSource>,
    position: u64,
    len: u64,
}

impl std::fmt::Debug for BitstreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitstreamReader")
            .field("position", &self.position)
            .field("len", &self.len)
            .finish()
    }
}

impl BitstreamReader {
    /// Open a reader for a host-described source.
    pub fn open(source: &AudioSource) -> Result<Self> {
        match source {
            AudioSource::LocalFile { path } => {
                let file = File::open(path)?;
                let len = file.metadata()?.len();
                debug!(source = %source.describe(), len, "Opened file source");
                Ok(Self::from_source(BufReader::new(file), len))
            }
            AudioSource::MemoryBuffer { data } => Ok(Self::from_bytes(data.clone())),
        }
    }

    /// Reader over shared in-memory bytes.
    pub fn from_bytes(data: Bytes) -> Self {
        let len = data.len() as u64;
        Self::from_source(Cursor::new(data), len)
    }

    /// Reader over an arbitrary seekable source of known length, positioned at 0.
    pub fn from_source<S: ByteSource + 'static>(source: S, len: u64) -> Self {
        Self {
            source: Box::new(source),
            position: 0,
            len,
        }
    }

    /// Current absolute byte offset.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total source length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes between the cursor and the end of the source.
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.len
    }

    /// Read up to `buf.len()` bytes.
    ///
    /// Short reads only happen at the end of the source. A source that stops
    /// producing bytes before its declared length is an I/O failure.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let wanted = buf.len().min(self.remaining() as usize);
        let mut filled = 0;

        while filled < wanted {
            match self.source.read(&mut buf[filled..wanted]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "source exhausted at byte {} of {}",
                            self.position + filled as u64,
                            self.len
                        ),
                    )
                    .into());
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.position += filled as u64;
        Ok(ReadOutcome {
            consumed: filled,
            end_of_data: self.is_at_end(),
        })
    }

    /// Fill `buf` completely or fail with an unexpected-end I/O failure.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if (buf.len() as u64) > self.remaining() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "need {} bytes at offset {}, only {} remain",
                    buf.len(),
                    self.position,
                    self.remaining()
                ),
            )
            .into());
        }

        self.read(buf)?;
        Ok(())
    }

    /// Move the cursor to `offset`. Offsets past the end are rejected.
    pub fn seek_absolute(&mut self, offset: u64) -> Result<()> {
        if offset > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {} out of range (length {})", offset, self.len),
            )
            .into());
        }

        self.source.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Advance the cursor by `count` bytes.
    pub fn skip(&mut self, count: u64) -> Result<()> {
        self.seek_absolute(self.position.saturating_add(count))
    }
}

/// LSB-first bit cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn bits_remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bit_pos)
    }

    pub fn read_bit(&mut self) -> Option<bool> {
        self.read_bits(1).map(|bit| bit == 1)
    }

    /// Read `count` bits (at most 32), least significant first.
    pub fn read_bits(&mut self, count: u32) -> Option<u32> {
        if count > 32 || count as usize > self.bits_remaining() {
            return None;
        }

        let mut value = 0u32;
        for i in 0..count {
            let byte = self.data[self.bit_pos / 8];
            let bit = (byte >> (self.bit_pos % 8)) & 1;
            value |= u32::from(bit) << i;
            self.bit_pos += 1;
        }
        Some(value)
    }
}
