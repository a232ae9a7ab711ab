//! Packet reassembly and granule scans over one logical Ogg stream.

use super::page::{read_page, PageRead, MAX_PAGE_LEN};
use crate::bitstream::BitstreamReader;
use crate::error::{PlaybackError, Result};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Below this span the granule search switches from bisection to a linear walk.
const BISECT_WINDOW: u64 = MAX_PAGE_LEN;

/// Largest packet reassembled; longer ones are dropped as corrupt.
pub const MAX_PACKET_LEN: usize = 4 << 20;

/// One reassembled codec packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OggPacket {
    pub data: Vec<u8>,
    /// Granule position of the page this packet finished on, set only on the
    /// last packet finishing there.
    pub granule: Option<u64>,
    /// Last packet of the logical stream.
    pub end_of_stream: bool,
    /// Offset of the page the packet finished on.
    pub page_offset: u64,
}

/// Location of a page that carries a granule position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub offset: u64,
    pub len: u64,
    pub granule: u64,
    pub is_last: bool,
}

/// Reassembles packets of the first logical stream found in the source.
#[derive(Debug)]
pub struct PacketReader {
    reader: BitstreamReader,
    serial: Option<u32>,
    partial: Vec<u8>,
    skip_continuation: bool,
    ready: VecDeque<OggPacket>,
    last_sequence: Option<u32>,
    finished: bool,
}

impl PacketReader {
    pub fn new(reader: BitstreamReader) -> Self {
        Self {
            reader,
            serial: None,
            partial: Vec::new(),
            skip_continuation: false,
            ready: VecDeque::new(),
            last_sequence: None,
            finished: false,
        }
    }

    /// Serial number of the stream being followed, once a page has been seen.
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    pub fn stream_len(&self) -> u64 {
        self.reader.len()
    }

    /// Byte offset of the next page to be read.
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Packets or packet fragments are held that were read ahead of `position()`.
    pub fn has_buffered_data(&self) -> bool {
        !self.ready.is_empty() || !self.partial.is_empty()
    }

    /// Next complete packet, `None` at the end of the logical stream.
    ///
    /// A damaged page is reported once as a recoverable decode error; the
    /// packet in progress is dropped and reading continues after it.
    pub fn next_packet(&mut self) -> Result<Option<OggPacket>> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(Some(packet));
            }
            if self.finished {
                return Ok(None);
            }

            match read_page(&mut self.reader)? {
                PageRead::Page(page) => self.ingest(page)?,
                PageRead::Corrupt { offset, error } => {
                    self.partial.clear();
                    self.skip_continuation = true;
                    warn!(offset, %error, "Dropping damaged page");
                    return Err(PlaybackError::corrupt(format!(
                        "page at byte {}: {}",
                        offset, error
                    )));
                }
                PageRead::End => {
                    if !self.partial.is_empty() {
                        warn!(bytes = self.partial.len(), "Stream ended inside a packet");
                        self.partial.clear();
                    }
                    self.finished = true;
                }
            }
        }
    }

    /// Split a page into packets. Reports a packet over [`MAX_PACKET_LEN`]
    /// as corrupt once the rest of the page has been taken in.
    fn ingest(&mut self, page: super::Page) -> Result<()> {
        let serial = *self.serial.get_or_insert(page.header.serial);
        if page.header.serial != serial {
            trace!(serial = page.header.serial, "Skipping page of another logical stream");
            return Ok(());
        }

        if let Some(last) = self.last_sequence {
            let expected = last.wrapping_add(1);
            if page.header.sequence != expected {
                warn!(expected, found = page.header.sequence, "Page sequence gap");
                self.partial.clear();
                self.skip_continuation = true;
            }
        }
        self.last_sequence = Some(page.header.sequence);

        let header_type = page.header.header_type;
        let continued = header_type.is_continued();
        if !continued && !self.partial.is_empty() {
            warn!(bytes = self.partial.len(), "Unterminated packet discarded");
            self.partial.clear();
        }

        let mut skipping = continued && (self.skip_continuation || self.partial.is_empty());
        self.skip_continuation = false;

        let first_new = self.ready.len();
        let mut oversized = None;
        let mut cursor = 0usize;
        for &lacing in &page.segments {
            let len = usize::from(lacing);
            if !skipping && self.partial.len() + len > MAX_PACKET_LEN {
                oversized = Some(self.partial.len() + len);
                self.partial = Vec::new();
                skipping = true;
            }
            if !skipping {
                self.partial
                    .extend_from_slice(&page.body[cursor..cursor + len]);
            }
            cursor += len;

            if lacing < 255 {
                if skipping {
                    skipping = false;
                } else {
                    self.ready.push_back(OggPacket {
                        data: std::mem::take(&mut self.partial),
                        granule: None,
                        end_of_stream: false,
                        page_offset: page.offset,
                    });
                }
            }
        }
        self.skip_continuation = skipping;

        if self.ready.len() > first_new {
            if let Some(last) = self.ready.back_mut() {
                last.granule = page.granule();
                last.end_of_stream = header_type.is_last();
            }
        }

        if header_type.is_last() {
            if !self.partial.is_empty() {
                warn!(bytes = self.partial.len(), "Packet left open on the final page");
                self.partial.clear();
            }
            self.finished = true;
        }

        match oversized {
            Some(bytes) => {
                warn!(offset = page.offset, bytes, "Dropping oversized packet");
                Err(PlaybackError::corrupt(format!(
                    "packet on page at byte {} exceeds {} bytes",
                    page.offset, MAX_PACKET_LEN
                )))
            }
            None => Ok(()),
        }
    }

    /// Reposition on the page at `offset`, forgetting any read-ahead. The
    /// first fragment on that page is dropped if it continues an earlier packet.
    pub fn seek_to_page(&mut self, offset: u64) -> Result<()> {
        self.reader.seek_absolute(offset)?;
        self.reset_state();
        Ok(())
    }

    fn reset_state(&mut self) {
        self.partial.clear();
        self.ready.clear();
        self.skip_continuation = true;
        self.last_sequence = None;
        self.finished = false;
    }

    /// Walk pages from the cursor and return the first one of this stream
    /// that carries a granule, starting before `limit`.
    fn next_granule_page(&mut self, limit: u64) -> Result<Option<PageInfo>> {
        loop {
            if self.reader.position() >= limit {
                return Ok(None);
            }

            match read_page(&mut self.reader)? {
                PageRead::Page(page) => {
                    if page.offset >= limit {
                        return Ok(None);
                    }
                    if Some(page.header.serial) != self.serial {
                        continue;
                    }
                    if let Some(granule) = page.granule() {
                        return Ok(Some(PageInfo {
                            offset: page.offset,
                            len: page.len(),
                            granule,
                            is_last: page.header.header_type.is_last(),
                        }));
                    }
                }
                PageRead::Corrupt { .. } => continue,
                PageRead::End => return Ok(None),
            }
        }
    }

    /// Find the page with the greatest granule not exceeding `target`,
    /// searching pages that start at or after `lower`.
    ///
    /// Bisects on byte offsets while the window is large, then walks pages
    /// linearly. Read-ahead state is discarded; callers reposition afterwards.
    pub fn locate_granule(&mut self, target: u64, lower: u64) -> Result<Option<PageInfo>> {
        let mut lo = lower;
        let mut hi = self.reader.len();
        let mut best = None;

        while hi.saturating_sub(lo) > BISECT_WINDOW {
            let mid = lo + (hi - lo) / 2;
            self.reader.seek_absolute(mid)?;

            match self.next_granule_page(hi)? {
                Some(info) if info.granule <= target => {
                    best = Some(info);
                    lo = info.offset + info.len;
                }
                _ => hi = mid,
            }
        }

        self.reader.seek_absolute(lo)?;
        while let Some(info) = self.next_granule_page(u64::MAX)? {
            if info.granule > target {
                break;
            }
            best = Some(info);
        }

        self.reset_state();
        Ok(best)
    }

    /// Granule of the last page of this stream, scanning back from the end
    /// of the source no further than `lower`.
    pub fn final_granule(&mut self, lower: u64) -> Result<Option<u64>> {
        let len = self.reader.len();
        let mut span = MAX_PAGE_LEN;
        let mut found = None;

        loop {
            let start = len.saturating_sub(span).max(lower);
            self.reader.seek_absolute(start)?;

            while let Some(info) = self.next_granule_page(u64::MAX)? {
                found = Some(info.granule);
                if info.is_last {
                    break;
                }
            }

            if found.is_some() || start == lower {
                break;
            }
            span = span.saturating_mul(2);
        }

        self.reset_state();
        Ok(found)
    }
}
