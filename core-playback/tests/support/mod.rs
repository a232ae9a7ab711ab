//! Stream builders shared by the integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use core_playback::ogg::{HeaderType, Page};
use core_playback::{
    AudioSource, BitstreamReader, DecodeOutcome, HeaderParseKind, PcmChunk, PlaybackError,
    Result, SeekError, StreamCodec, StreamDescriptor,
};

// ============================================================================
// Ogg / Vorbis writers
// ============================================================================

/// Frames produced by each silent audio packet after the first (256-sample blocks).
pub const FRAMES_PER_PACKET: u64 = 128;

/// LSB-first bit packer matching Vorbis header encoding.
#[derive(Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit: u32,
}

impl BitWriter {
    pub fn write(&mut self, value: u32, bits: u32) {
        for i in 0..bits {
            if self.bit == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << self.bit;
            }
            self.bit = (self.bit + 1) % 8;
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write(u32::from(b), 8);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn ident_header(version: u32, channels: u8, sample_rate: u32) -> Vec<u8> {
    let mut packet = vec![1];
    packet.extend_from_slice(b"vorbis");
    packet.extend_from_slice(&version.to_le_bytes());
    packet.push(channels);
    packet.extend_from_slice(&sample_rate.to_le_bytes());
    packet.extend_from_slice(&0i32.to_le_bytes());
    packet.extend_from_slice(&96_000i32.to_le_bytes());
    packet.extend_from_slice(&0i32.to_le_bytes());
    packet.push(0x88);
    packet.push(1);
    packet
}

pub fn comment_header(vendor: &str, tags: &[&str]) -> Vec<u8> {
    let mut packet = vec![3];
    packet.extend_from_slice(b"vorbis");
    packet.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    packet.extend_from_slice(vendor.as_bytes());
    packet.extend_from_slice(&(tags.len() as u32).to_le_bytes());
    for tag in tags {
        packet.extend_from_slice(&(tag.len() as u32).to_le_bytes());
        packet.extend_from_slice(tag.as_bytes());
    }
    packet.push(1);
    packet
}

/// Smallest complete setup: one codebook, one floor1 without partitions,
/// one residue, one mapping and one short-block mode.
pub fn setup_header() -> Vec<u8> {
    let mut w = BitWriter::default();
    w.write(5, 8);
    w.write_bytes(b"vorbis");

    // codebooks
    w.write(0, 8);
    w.write(0x564342, 24);
    w.write(1, 16);
    w.write(2, 24);
    w.write(0, 1);
    w.write(0, 1);
    w.write(0, 5);
    w.write(0, 5);
    w.write(0, 4);

    // time domain transforms
    w.write(0, 6);
    w.write(0, 16);

    // floors
    w.write(0, 6);
    w.write(1, 16);
    w.write(0, 5);
    w.write(0, 2);
    w.write(8, 4);

    // residues
    w.write(0, 6);
    w.write(0, 16);
    w.write(0, 24);
    w.write(0, 24);
    w.write(15, 24);
    w.write(0, 6);
    w.write(0, 8);
    w.write(0, 3);
    w.write(0, 1);

    // mappings
    w.write(0, 6);
    w.write(0, 16);
    w.write(0, 1);
    w.write(0, 1);
    w.write(0, 2);
    w.write(0, 8);
    w.write(0, 8);
    w.write(0, 8);

    // modes
    w.write(0, 6);
    w.write(0, 1);
    w.write(0, 16);
    w.write(0, 16);
    w.write(0, 8);

    w.write(1, 1);
    w.finish()
}

/// Writes pages of one logical stream, each packet laced onto a single page.
pub struct OggWriter {
    serial: u32,
    sequence: u32,
    bytes: Vec<u8>,
    pub page_offsets: Vec<usize>,
}

impl OggWriter {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            bytes: Vec::new(),
            page_offsets: Vec::new(),
        }
    }

    pub fn page(&mut self, flags: u8, granule: Option<u64>, packets: &[Vec<u8>]) {
        let mut segments = Vec::new();
        let mut body = Vec::new();
        for packet in packets {
            let mut len = packet.len();
            while len >= 255 {
                segments.push(255);
                len -= 255;
            }
            segments.push(len as u8);
            body.extend_from_slice(packet);
        }
        assert!(segments.len() <= 255, "too many packets for one page");

        self.page_offsets.push(self.bytes.len());
        let page = Page::new(
            HeaderType::from_bits(flags),
            granule,
            self.serial,
            self.sequence,
            segments,
            body,
        );
        self.bytes.extend_from_slice(&page.to_bytes());
        self.sequence += 1;
    }

    pub fn finish(self) -> (Vec<u8>, Vec<usize>) {
        (self.bytes, self.page_offsets)
    }
}

/// A generated Ogg Vorbis file of silence with exact granule positions.
pub struct VorbisStream {
    pub bytes: Vec<u8>,
    pub total_samples: u64,
    pub page_offsets: Vec<usize>,
}

impl VorbisStream {
    pub fn source(&self) -> AudioSource {
        AudioSource::memory(Bytes::from(self.bytes.clone()))
    }

    pub fn reader(&self) -> BitstreamReader {
        BitstreamReader::from_bytes(Bytes::from(self.bytes.clone()))
    }

    /// Damage one byte of a page body so its checksum fails.
    pub fn corrupt_page(&mut self, page: usize) {
        let end = self
            .page_offsets
            .get(page + 1)
            .copied()
            .unwrap_or(self.bytes.len());
        self.bytes[end - 1] ^= 0x5A;
    }
}

pub struct VorbisStreamBuilder {
    channels: u8,
    sample_rate: u32,
    packets: usize,
    packets_per_page: usize,
    packet_len: usize,
    bad_packet: Option<usize>,
    end_trim: u64,
}

impl VorbisStreamBuilder {
    pub fn new(channels: u8, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            packets: 64,
            packets_per_page: 4,
            packet_len: 1,
            bad_packet: None,
            end_trim: 0,
        }
    }

    pub fn packets(mut self, packets: usize) -> Self {
        self.packets = packets;
        self
    }

    pub fn packets_per_page(mut self, count: usize) -> Self {
        self.packets_per_page = count;
        self
    }

    /// Pad every audio packet to `len` bytes.
    pub fn packet_len(mut self, len: usize) -> Self {
        self.packet_len = len.max(1);
        self
    }

    /// Make audio packet `index` undecodable.
    pub fn bad_packet(mut self, index: usize) -> Self {
        self.bad_packet = Some(index);
        self
    }

    /// Declare `frames` fewer samples on the final page than were encoded.
    pub fn end_trim(mut self, frames: u64) -> Self {
        self.end_trim = frames;
        self
    }

    fn audio_packet(&self, index: usize) -> Vec<u8> {
        let mut packet = vec![0u8; self.packet_len];
        if self.bad_packet == Some(index) {
            packet[0] = 0x01;
        }
        packet
    }

    pub fn build(self) -> VorbisStream {
        let mut writer = OggWriter::new(0x0B5E_5510);
        writer.page(
            HeaderType::FIRST_PAGE,
            Some(0),
            &[ident_header(0, self.channels, self.sample_rate)],
        );
        writer.page(
            0,
            Some(0),
            &[
                comment_header("oggbp-test", &["TITLE=Silence", "LOOPSTART=0"]),
                setup_header(),
            ],
        );

        let mut done = 0;
        while done < self.packets {
            let count = self.packets_per_page.min(self.packets - done);
            let packets: Vec<Vec<u8>> = (done..done + count)
                .map(|i| self.audio_packet(i))
                .collect();
            done += count;

            if done == self.packets {
                let granule = samples_after(done) - self.end_trim;
                writer.page(HeaderType::LAST_PAGE, Some(granule), &packets);
            } else {
                writer.page(0, Some(samples_after(done)), &packets);
            }
        }

        let (bytes, page_offsets) = writer.finish();
        VorbisStream {
            bytes,
            total_samples: samples_after(self.packets) - self.end_trim,
            page_offsets,
        }
    }
}

/// Stream samples produced by the first `packets` audio packets.
pub fn samples_after(packets: usize) -> u64 {
    FRAMES_PER_PACKET * (packets as u64).saturating_sub(1)
}

// ============================================================================
// Ramp codec
// ============================================================================

pub const RAMP_SCALE: f32 = 16_777_216.0;
pub const RAMP_PACKET_FRAMES: u64 = 1024;

/// Parameters of a synthetic stream, encoded as the "file" bytes.
#[derive(Debug, Clone, Copy)]
pub struct RampSpec {
    pub total_samples: u64,
    pub sample_rate: u32,
    pub channels: u16,
    /// First packet index that fails to decode.
    pub bad_packet: u32,
    /// Consecutive failing packets from `bad_packet`.
    pub bad_count: u32,
}

impl RampSpec {
    pub fn new(total_samples: u64, sample_rate: u32) -> Self {
        Self {
            total_samples,
            sample_rate,
            channels: 2,
            bad_packet: u32::MAX,
            bad_count: 0,
        }
    }

    pub fn with_bad_packets(mut self, first: u32, count: u32) -> Self {
        self.bad_packet = first;
        self.bad_count = count;
        self
    }

    pub fn source(&self) -> AudioSource {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.total_samples.to_le_bytes());
        bytes.extend_from_slice(&self.sample_rate.to_le_bytes());
        bytes.extend_from_slice(&self.channels.to_le_bytes());
        bytes.extend_from_slice(&self.bad_packet.to_le_bytes());
        bytes.extend_from_slice(&self.bad_count.to_le_bytes());
        AudioSource::memory(bytes)
    }
}

/// Codec whose every sample holds its own stream index (`index / 2^24`),
/// so output order and splice points can be checked exactly.
pub struct RampCodec {
    spec: RampSpec,
    descriptor: StreamDescriptor,
    next: u64,
}

/// Stream sample index carried by a rendered value.
pub fn ramp_index(sample: f32) -> u64 {
    (sample * RAMP_SCALE) as u64
}

impl StreamCodec for RampCodec {
    fn open(mut reader: BitstreamReader) -> Result<Self> {
        let mut raw = [0u8; 22];
        reader.read_exact(&mut raw).map_err(|_| {
            PlaybackError::header(HeaderParseKind::Missing, "ramp header truncated")
        })?;

        let spec = RampSpec {
            total_samples: u64::from_le_bytes(raw[0..8].try_into().unwrap()),
            sample_rate: u32::from_le_bytes(raw[8..12].try_into().unwrap()),
            channels: u16::from_le_bytes(raw[12..14].try_into().unwrap()),
            bad_packet: u32::from_le_bytes(raw[14..18].try_into().unwrap()),
            bad_count: u32::from_le_bytes(raw[18..22].try_into().unwrap()),
        };
        let descriptor = StreamDescriptor::new(spec.sample_rate, spec.channels)
            .with_total_samples(Some(spec.total_samples));

        Ok(Self {
            spec,
            descriptor,
            next: 0,
        })
    }

    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn decode_next_packet(&mut self) -> Result<DecodeOutcome> {
        if self.next >= self.spec.total_samples {
            return Ok(DecodeOutcome::EndOfStream);
        }

        let start = self.next;
        let end = (start + RAMP_PACKET_FRAMES).min(self.spec.total_samples);
        self.next = end;

        let packet = start / RAMP_PACKET_FRAMES;
        let first_bad = u64::from(self.spec.bad_packet);
        if packet >= first_bad && packet < first_bad + u64::from(self.spec.bad_count) {
            return Err(PlaybackError::corrupt(format!("ramp packet {}", packet)));
        }

        let channels = usize::from(self.spec.channels);
        let mut samples = Vec::with_capacity((end - start) as usize * channels);
        for index in start..end {
            for _ in 0..channels {
                samples.push(index as f32 / RAMP_SCALE);
            }
        }
        Ok(DecodeOutcome::Frames(PcmChunk::new(
            samples,
            self.spec.channels,
            start,
        )))
    }

    fn seek_to_sample(&mut self, target: u64) -> Result<u64> {
        if target > self.spec.total_samples {
            return Err(SeekError::OutOfRange {
                target,
                total: self.spec.total_samples,
            }
            .into());
        }
        self.next = target;
        Ok(target)
    }
}
