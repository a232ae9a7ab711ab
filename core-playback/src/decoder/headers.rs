//! Vorbis identification and comment header parsing.
//!
//! The setup header is only checked for its type and signature here; its
//! codebook and mapping configuration is validated by the DSP backend.

use crate::error::{HeaderParseKind, PlaybackError, Result};
use tracing::debug;

pub const PACKET_IDENTIFICATION: u8 = 1;
pub const PACKET_COMMENT: u8 = 3;
pub const PACKET_SETUP: u8 = 5;

const SIGNATURE: &[u8; 6] = b"vorbis";
const IDENTIFICATION_LEN: usize = 30;

/// Channel mapping 0 defines speaker layouts for at most 8 channels.
pub const MAX_CHANNELS: u8 = 8;
/// Highest sample rate accepted from a stream.
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Check the common 7-byte prefix of a header packet.
///
/// Anything that is not a header of the expected type counts as the header
/// being missing; a header type with a damaged signature is malformed.
pub fn check_preamble(packet: &[u8], expected: u8, name: &str) -> Result<()> {
    match packet.first() {
        Some(&kind) if kind == expected => {}
        Some(&kind) => {
            return Err(PlaybackError::header(
                HeaderParseKind::Missing,
                format!("expected {} header, found packet type {}", name, kind),
            ))
        }
        None => {
            return Err(PlaybackError::header(
                HeaderParseKind::Missing,
                format!("expected {} header, found empty packet", name),
            ))
        }
    }

    if packet.get(1..7) != Some(&SIGNATURE[..]) {
        return Err(PlaybackError::header(
            HeaderParseKind::Malformed,
            format!("{} header lacks the vorbis signature", name),
        ));
    }
    Ok(())
}

/// First header packet: audio shape and block sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentificationHeader {
    pub channels: u8,
    pub sample_rate: u32,
    pub bitrate_max: Option<u32>,
    pub bitrate_nominal: Option<u32>,
    pub bitrate_min: Option<u32>,
    pub blocksize_short: u16,
    pub blocksize_long: u16,
}

impl IdentificationHeader {
    pub fn parse(packet: &[u8]) -> Result<Self> {
        check_preamble(packet, PACKET_IDENTIFICATION, "identification")?;
        if packet.len() < IDENTIFICATION_LEN {
            return Err(malformed(format!(
                "identification header is {} bytes, expected {}",
                packet.len(),
                IDENTIFICATION_LEN
            )));
        }

        let mut fields = Fields::new(&packet[7..], "identification");
        let version = fields.u32()?;
        if version != 0 {
            return Err(PlaybackError::header(
                HeaderParseKind::VersionUnsupported,
                format!("vorbis version {}", version),
            ));
        }

        let channels = fields.u8()?;
        let sample_rate = fields.u32()?;
        let bitrate_max = bitrate(fields.u32()?);
        let bitrate_nominal = bitrate(fields.u32()?);
        let bitrate_min = bitrate(fields.u32()?);
        let blocksizes = fields.u8()?;
        let framing = fields.u8()?;

        if channels == 0 {
            return Err(malformed("zero channels"));
        }
        if channels > MAX_CHANNELS {
            return Err(malformed(format!(
                "{} channels, at most {} supported",
                channels, MAX_CHANNELS
            )));
        }
        if sample_rate == 0 {
            return Err(malformed("zero sample rate"));
        }
        if sample_rate > MAX_SAMPLE_RATE {
            return Err(malformed(format!(
                "sample rate {} Hz above {} Hz",
                sample_rate, MAX_SAMPLE_RATE
            )));
        }

        let short_exp = blocksizes & 0x0F;
        let long_exp = blocksizes >> 4;
        if !(6..=13).contains(&short_exp) || !(6..=13).contains(&long_exp) {
            return Err(malformed(format!(
                "block size exponents {}/{} outside 6..=13",
                short_exp, long_exp
            )));
        }
        if short_exp > long_exp {
            return Err(malformed("short block larger than long block"));
        }
        if framing & 0x01 == 0 {
            return Err(malformed("identification framing bit not set"));
        }

        Ok(Self {
            channels,
            sample_rate,
            bitrate_max,
            bitrate_nominal,
            bitrate_min,
            blocksize_short: 1 << short_exp,
            blocksize_long: 1 << long_exp,
        })
    }
}

/// Second header packet: vendor string and user comments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommentHeader {
    pub vendor: String,
    /// `(key, value)` pairs in stream order, keys lowercased
    pub comments: Vec<(String, String)>,
}

impl CommentHeader {
    pub fn parse(packet: &[u8]) -> Result<Self> {
        check_preamble(packet, PACKET_COMMENT, "comment")?;

        let mut fields = Fields::new(&packet[7..], "comment");
        let vendor_len = fields.u32()? as usize;
        let vendor = String::from_utf8_lossy(fields.bytes(vendor_len)?).into_owned();

        let count = fields.u32()? as usize;
        // Every comment carries at least its 4-byte length
        if count > fields.remaining() / 4 {
            return Err(malformed(format!(
                "{} comments declared in {} bytes",
                count,
                fields.remaining()
            )));
        }
        let mut comments = Vec::with_capacity(count);
        for _ in 0..count {
            let len = fields.u32()? as usize;
            let entry = String::from_utf8_lossy(fields.bytes(len)?);
            match entry.split_once('=') {
                Some((key, value)) => {
                    comments.push((key.to_ascii_lowercase(), value.to_string()))
                }
                None => debug!(entry = %entry, "Ignoring comment without '='"),
            }
        }

        if fields.u8()? & 0x01 == 0 {
            return Err(malformed("comment framing bit not set"));
        }

        Ok(Self { vendor, comments })
    }
}

fn bitrate(raw: u32) -> Option<u32> {
    // Signed on the wire; zero and negative values mean "not set"
    let value = raw as i32;
    (value > 0).then_some(value as u32)
}

fn malformed(reason: impl Into<String>) -> PlaybackError {
    PlaybackError::header(HeaderParseKind::Malformed, reason)
}

/// Little-endian field cursor that reports truncation as a malformed header.
struct Fields<'a> {
    data: &'a [u8],
    pos: usize,
    header: &'static str,
}

impl<'a> Fields<'a> {
    fn new(data: &'a [u8], header: &'static str) -> Self {
        Self {
            data,
            pos: 0,
            header,
        }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| malformed(format!("{} header truncated", self.header)))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
