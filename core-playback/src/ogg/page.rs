//! Ogg page framing.
//!
//! ```text
//!  0..4   capture pattern "OggS"
//!  4      stream structure version (0)
//!  5      header type flags
//!  6..14  granule position (i64, -1 = no packet ends here)
//! 14..18  bitstream serial number
//! 18..22  page sequence number
//! 22..26  CRC-32 over the page with this field zeroed
//! 26      segment count, followed by the segment table and the body
//! ```

use super::crc;
use crate::bitstream::BitstreamReader;
use crate::error::Result;
use thiserror::Error;
use tracing::{debug, warn};

pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// Fixed part of a page header.
pub const HEADER_LEN: usize = 27;

/// Largest possible page: full segment table, every segment 255 bytes.
pub const MAX_PAGE_LEN: u64 = HEADER_LEN as u64 + 255 + 255 * 255;

const CHECKSUM_RANGE: std::ops::Range<usize> = 22..26;

/// Page header type flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderType(u8);

impl HeaderType {
    pub const CONTINUED: u8 = 0x01;
    pub const FIRST_PAGE: u8 = 0x02;
    pub const LAST_PAGE: u8 = 0x04;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// First packet on the page continues one from the previous page.
    pub fn is_continued(&self) -> bool {
        self.0 & Self::CONTINUED != 0
    }

    /// Beginning of a logical bitstream.
    pub fn is_first(&self) -> bool {
        self.0 & Self::FIRST_PAGE != 0
    }

    /// End of a logical bitstream.
    pub fn is_last(&self) -> bool {
        self.0 & Self::LAST_PAGE != 0
    }
}

/// Page-level framing damage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("capture pattern not found")]
    BadCapture,

    #[error("unsupported stream structure version {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub version: u8,
    pub header_type: HeaderType,
    pub granule_position: i64,
    pub serial: u32,
    pub sequence: u32,
    pub checksum: u32,
    pub segment_count: u8,
}

impl PageHeader {
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> std::result::Result<Self, PageError> {
        if &bytes[0..4] != CAPTURE_PATTERN {
            return Err(PageError::BadCapture);
        }

        let version = bytes[4];
        if version != 0 {
            return Err(PageError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            header_type: HeaderType::from_bits(bytes[5]),
            granule_position: i64::from_le_bytes(le_array(&bytes[6..14])),
            serial: u32::from_le_bytes(le_array(&bytes[14..18])),
            sequence: u32::from_le_bytes(le_array(&bytes[18..22])),
            checksum: u32::from_le_bytes(le_array(&bytes[22..26])),
            segment_count: bytes[26],
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(CAPTURE_PATTERN);
        out[4] = self.version;
        out[5] = self.header_type.bits();
        out[6..14].copy_from_slice(&self.granule_position.to_le_bytes());
        out[14..18].copy_from_slice(&self.serial.to_le_bytes());
        out[18..22].copy_from_slice(&self.sequence.to_le_bytes());
        out[22..26].copy_from_slice(&self.checksum.to_le_bytes());
        out[26] = self.segment_count;
        out
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// One complete, checksum-verified page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub header: PageHeader,
    pub segments: Vec<u8>,
    pub body: Vec<u8>,
    /// Byte offset of the capture pattern in the source.
    pub offset: u64,
}

impl Page {
    /// Build a page and stamp its checksum.
    pub fn new(
        header_type: HeaderType,
        granule: Option<u64>,
        serial: u32,
        sequence: u32,
        segments: Vec<u8>,
        body: Vec<u8>,
    ) -> Self {
        let mut page = Self {
            header: PageHeader {
                version: 0,
                header_type,
                granule_position: granule.map(|g| g as i64).unwrap_or(-1),
                serial,
                sequence,
                checksum: 0,
                segment_count: segments.len() as u8,
            },
            segments,
            body,
            offset: 0,
        };
        page.header.checksum = page.compute_checksum();
        page
    }

    /// Granule position, or `None` when no packet finishes on this page.
    pub fn granule(&self) -> Option<u64> {
        u64::try_from(self.header.granule_position).ok()
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> u64 {
        (HEADER_LEN + self.segments.len() + self.body.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn compute_checksum(&self) -> u32 {
        let mut fixed = self.header.to_bytes();
        fixed[CHECKSUM_RANGE].fill(0);
        let crc = crc::update(0, &fixed);
        let crc = crc::update(crc, &self.segments);
        crc::update(crc, &self.body)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() as usize);
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.segments);
        out.extend_from_slice(&self.body);
        out
    }
}

/// Outcome of reading at the cursor.
#[derive(Debug)]
pub enum PageRead {
    Page(Page),
    /// Damaged framing at `offset`; the cursor has moved to the next capture
    /// pattern (or the end).
    Corrupt { offset: u64, error: PageError },
    End,
}

/// Read the page at the cursor, verifying its checksum.
///
/// A page cut short by the end of the source counts as the end of the
/// stream. Other I/O failures propagate.
pub fn read_page(reader: &mut BitstreamReader) -> Result<PageRead> {
    let offset = reader.position();
    if reader.is_at_end() {
        return Ok(PageRead::End);
    }
    if reader.remaining() < HEADER_LEN as u64 {
        return truncated(reader, offset);
    }

    let mut fixed = [0u8; HEADER_LEN];
    reader.read_exact(&mut fixed)?;

    let header = match PageHeader::parse(&fixed) {
        Ok(header) => header,
        Err(error) => {
            reader.seek_absolute(offset + 1)?;
            sync_to_capture(reader)?;
            return Ok(PageRead::Corrupt { offset, error });
        }
    };

    let mut segments = vec![0u8; usize::from(header.segment_count)];
    if reader.remaining() < segments.len() as u64 {
        return truncated(reader, offset);
    }
    reader.read_exact(&mut segments)?;

    let body_len: u64 = segments.iter().map(|&s| u64::from(s)).sum();
    if reader.remaining() < body_len {
        return truncated(reader, offset);
    }

    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body)?;

    let page = Page {
        header,
        segments,
        body,
        offset,
    };

    let computed = page.compute_checksum();
    if computed != page.header.checksum {
        reader.seek_absolute(offset + 1)?;
        sync_to_capture(reader)?;
        return Ok(PageRead::Corrupt {
            offset,
            error: PageError::ChecksumMismatch {
                stored: page.header.checksum,
                computed,
            },
        });
    }

    Ok(PageRead::Page(page))
}

fn truncated(reader: &mut BitstreamReader, offset: u64) -> Result<PageRead> {
    warn!(offset, "Final page truncated");
    reader.seek_absolute(reader.len())?;
    Ok(PageRead::End)
}

/// Move the cursor to the next capture pattern at or after it.
///
/// Returns the offset found, or `None` (cursor at end) when there is none.
pub fn sync_to_capture(reader: &mut BitstreamReader) -> Result<Option<u64>> {
    let mut chunk = [0u8; 4096];

    loop {
        let start = reader.position();
        let outcome = reader.read(&mut chunk)?;
        let window = &chunk[..outcome.consumed];

        if let Some(idx) = window
            .windows(CAPTURE_PATTERN.len())
            .position(|w| w == CAPTURE_PATTERN)
        {
            let found = start + idx as u64;
            reader.seek_absolute(found)?;
            if found != start {
                debug!(skipped = found - start, "Resynchronised on capture pattern");
            }
            return Ok(Some(found));
        }

        if outcome.end_of_data || outcome.consumed < CAPTURE_PATTERN.len() {
            return Ok(None);
        }

        // Keep the tail in case the pattern straddles two chunks.
        reader.seek_absolute(start + outcome.consumed as u64 - (CAPTURE_PATTERN.len() as u64 - 1))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sample_page(sequence: u32) -> Page {
        Page::new(
            HeaderType::from_bits(HeaderType::FIRST_PAGE),
            Some(0),
            0x1234_5678,
            sequence,
            vec![3, 0],
            vec![b'a', b'b', b'c'],
        )
    }

    #[test]
    fn test_header_layout() {
        let page = Page::new(
            HeaderType::from_bits(HeaderType::CONTINUED | HeaderType::LAST_PAGE),
            Some(0x0102_0304_0506),
            7,
            9,
            vec![1],
            vec![0xAA],
        );
        let bytes = page.to_bytes();

        assert_eq!(&bytes[0..4], b"OggS");
        assert_eq!(bytes[4], 0);
        assert_eq!(bytes[5], 0x05);
        assert_eq!(&bytes[6..14], &[6, 5, 4, 3, 2, 1, 0, 0]);
        assert_eq!(&bytes[14..18], &[7, 0, 0, 0]);
        assert_eq!(&bytes[18..22], &[9, 0, 0, 0]);
        assert_eq!(bytes[26], 1);
        assert_eq!(bytes.len(), 29);

        let header = PageHeader::parse(&le_array(&bytes[..HEADER_LEN])).unwrap();
        assert!(header.header_type.is_continued());
        assert!(header.header_type.is_last());
        assert!(!header.header_type.is_first());
        assert_eq!(header.granule_position, 0x0102_0304_0506);
    }

    #[test]
    fn test_no_granule_is_minus_one() {
        let page = Page::new(HeaderType::default(), None, 1, 2, vec![255], vec![0; 255]);
        assert_eq!(page.header.granule_position, -1);
        assert_eq!(page.granule(), None);
    }

    #[test]
    fn test_read_valid_page() {
        let page = sample_page(0);
        let mut reader = BitstreamReader::from_bytes(Bytes::from(page.to_bytes()));

        match read_page(&mut reader).unwrap() {
            PageRead::Page(read) => {
                assert_eq!(read.header.serial, 0x1234_5678);
                assert_eq!(read.body, b"abc");
                assert_eq!(read.offset, 0);
            }
            other => panic!("expected page, got {:?}", other),
        }
        assert!(matches!(read_page(&mut reader).unwrap(), PageRead::End));
    }

    #[test]
    fn test_checksum_mismatch_resyncs_to_next_page() {
        let mut first = sample_page(0).to_bytes();
        let body_start = first.len() - 1;
        first[body_start] ^= 0xFF;
        let second = sample_page(1).to_bytes();
        let second_offset = first.len() as u64;

        let mut data = first;
        data.extend_from_slice(&second);
        let mut reader = BitstreamReader::from_bytes(Bytes::from(data));

        match read_page(&mut reader).unwrap() {
            PageRead::Corrupt { offset, error } => {
                assert_eq!(offset, 0);
                assert!(matches!(error, PageError::ChecksumMismatch { .. }));
            }
            other => panic!("expected corruption, got {:?}", other),
        }
        assert_eq!(reader.position(), second_offset);

        match read_page(&mut reader).unwrap() {
            PageRead::Page(page) => assert_eq!(page.header.sequence, 1),
            other => panic!("expected page, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_before_page() {
        let mut data = b"junk-bytes".to_vec();
        data.extend_from_slice(&sample_page(4).to_bytes());
        let mut reader = BitstreamReader::from_bytes(Bytes::from(data));

        assert!(matches!(
            read_page(&mut reader).unwrap(),
            PageRead::Corrupt {
                error: PageError::BadCapture,
                ..
            }
        ));
        assert!(matches!(read_page(&mut reader).unwrap(), PageRead::Page(_)));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample_page(0).to_bytes();
        bytes[4] = 1;
        let mut reader = BitstreamReader::from_bytes(Bytes::from(bytes));
        assert!(matches!(
            read_page(&mut reader).unwrap(),
            PageRead::Corrupt {
                error: PageError::UnsupportedVersion(1),
                ..
            }
        ));
        assert!(matches!(read_page(&mut reader).unwrap(), PageRead::End));
    }

    #[test]
    fn test_truncated_page_is_end() {
        let bytes = sample_page(0).to_bytes();
        let mut reader = BitstreamReader::from_bytes(Bytes::from(bytes[..bytes.len() - 2].to_vec()));
        assert!(matches!(read_page(&mut reader).unwrap(), PageRead::End));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_sync_across_chunk_boundary() {
        let mut data = vec![0u8; 4094];
        data.extend_from_slice(b"OggS");
        let mut reader = BitstreamReader::from_bytes(Bytes::from(data));
        assert_eq!(sync_to_capture(&mut reader).unwrap(), Some(4094));
        assert_eq!(reader.position(), 4094);
    }
}
