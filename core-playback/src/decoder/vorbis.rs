//! # Vorbis Decoder Session
//!
//! One logical Vorbis stream inside an Ogg container. The session validates
//! the three header packets itself, hands the setup to symphonia's Vorbis DSP
//! and then decodes one packet per call.
//!
//! ## Sample accounting
//!
//! Every chunk is tagged with the stream sample index of its first frame.
//! Indices are counted from the first audio packet and corrected from page
//! granule positions whenever a page ends: the final page trims the last
//! packet, and pages after a seek resolve where decoding resumed.

use crate::bitstream::BitstreamReader;
use crate::decoder::headers::{
    check_preamble, CommentHeader, IdentificationHeader, PACKET_SETUP,
};
use crate::decoder::sample_converter::SampleConverter;
use crate::error::{HeaderParseKind, PlaybackError, Result, SeekError};
use crate::ogg::{OggPacket, PacketReader};
use crate::traits::{DecodeOutcome, PcmChunk, StreamCodec, StreamDescriptor};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_VORBIS};
use symphonia::core::formats::Packet;
use symphonia::default::codecs::VorbisDecoder;
use tracing::{debug, info, instrument, trace, warn};

/// Where audio packets begin, for rewinding without re-parsing headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AudioStart {
    /// Page to reposition on
    offset: u64,
    /// Complete packets on that page preceding the first audio packet
    skip_packets: usize,
}

/// Frames of one audio packet before they are placed on the stream timeline.
struct DecodedPacket {
    samples: Vec<f32>,
    frames: usize,
    granule: Option<u64>,
    end_of_stream: bool,
}

/// Decoder session over one Ogg Vorbis stream.
pub struct VorbisSession {
    packets: PacketReader,
    decoder: VorbisDecoder,
    descriptor: StreamDescriptor,
    audio_start: AudioStart,
    /// Stream sample of the next decoded frame
    next_sample: u64,
    /// Frames left over from a seek, returned before decoding further
    carry: Option<PcmChunk>,
    finished: bool,
}

impl std::fmt::Debug for VorbisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VorbisSession")
            .field("descriptor", &self.descriptor)
            .field("next_sample", &self.next_sample)
            .field("finished", &self.finished)
            .finish()
    }
}

impl VorbisSession {
    /// Stream sample index of the next frame `decode_next_packet` will produce.
    pub fn next_sample(&self) -> u64 {
        self.carry
            .as_ref()
            .map_or(self.next_sample, |chunk| chunk.start_sample)
    }

    /// Rewind to the first audio packet.
    fn restart_at_audio(&mut self) -> Result<()> {
        self.packets.seek_to_page(self.audio_start.offset)?;
        for _ in 0..self.audio_start.skip_packets {
            self.packets.next_packet()?;
        }

        self.decoder.reset();
        self.next_sample = 0;
        self.carry = None;
        self.finished = false;
        Ok(())
    }

    /// Read and decode one packet. `None` once the stream is exhausted.
    fn decode_raw(&mut self) -> Result<Option<DecodedPacket>> {
        let Some(packet) = self.packets.next_packet()? else {
            return Ok(None);
        };

        let channels = usize::from(self.descriptor.channels);
        let mut samples = Vec::new();

        // Zero-length packets are legal and carry no audio
        let frames = if packet.data.is_empty() {
            0
        } else {
            match self.decoder.decode(&Packet::new_from_slice(
                0,
                self.next_sample,
                0,
                &packet.data,
            )) {
                Ok(buffer) => {
                    samples.reserve(buffer.frames() * channels);
                    SampleConverter::append_interleaved(&buffer, &mut samples)
                }
                Err(e) => {
                    if let Some(granule) = packet.granule {
                        self.next_sample = granule;
                    }
                    warn!(page = packet.page_offset, error = %e, "Skipping undecodable packet");
                    return Err(PlaybackError::corrupt(format!(
                        "packet on page at byte {}: {}",
                        packet.page_offset, e
                    )));
                }
            }
        };

        Ok(Some(DecodedPacket {
            samples,
            frames,
            granule: packet.granule,
            end_of_stream: packet.end_of_stream,
        }))
    }

    /// Give decoded frames their stream position and advance the cursor.
    fn place(&mut self, decoded: DecodedPacket, start: u64) -> PcmChunk {
        let mut chunk = PcmChunk::new(decoded.samples, self.descriptor.channels, start);

        if let Some(granule) = decoded.granule {
            if decoded.end_of_stream && granule < chunk.end_sample() {
                let keep = granule.saturating_sub(chunk.start_sample) as usize;
                trace!(granule, trimmed = chunk.frames - keep, "Trimming final packet");
                chunk.truncate_frames(keep);
            } else if !decoded.end_of_stream && granule != chunk.end_sample() {
                debug!(
                    expected = chunk.end_sample(),
                    granule, "Resynchronising sample position from granule"
                );
                chunk.start_sample = granule.saturating_sub(chunk.frames as u64);
            }
        }

        if decoded.end_of_stream {
            self.finished = true;
        }
        self.next_sample = chunk.end_sample();
        chunk
    }

    /// Decode forward from an unknown position until a page granule tells
    /// where the buffered frames sit. Returns them as one chunk.
    fn resolve_position(&mut self) -> Result<Option<PcmChunk>> {
        let mut pending: Vec<f32> = Vec::new();
        let mut pending_frames = 0usize;

        loop {
            let decoded = match self.decode_raw() {
                Ok(Some(decoded)) => decoded,
                Ok(None) => {
                    debug!(pending_frames, "Stream ended before a granule was found");
                    self.finished = true;
                    return Ok(None);
                }
                Err(e) if e.is_recoverable() => {
                    // Frames on either side of the hole cannot be joined
                    pending.clear();
                    pending_frames = 0;
                    continue;
                }
                Err(e) => return Err(e),
            };

            pending.extend_from_slice(&decoded.samples);
            pending_frames += decoded.frames;

            if let Some(granule) = decoded.granule {
                let start = granule.saturating_sub(pending_frames as u64);
                let merged = DecodedPacket {
                    samples: pending,
                    frames: pending_frames,
                    granule: Some(granule),
                    end_of_stream: decoded.end_of_stream,
                };
                return Ok(Some(self.place(merged, start)));
            }
        }
    }
}

impl StreamCodec for VorbisSession {
    #[instrument(skip(reader), fields(len = reader.len()))]
    fn open(reader: BitstreamReader) -> Result<Self> {
        let mut packets = PacketReader::new(reader);

        let ident_packet = next_header_packet(&mut packets, "identification")?;
        let ident = IdentificationHeader::parse(&ident_packet.data)?;

        let comment = CommentHeader::parse(&next_header_packet(&mut packets, "comment")?.data)?;

        let setup_packet = next_header_packet(&mut packets, "setup")?;
        check_preamble(&setup_packet.data, PACKET_SETUP, "setup")?;

        let audio_start = if packets.has_buffered_data() {
            // Audio shares a page with the setup header; rewind past all three headers
            AudioStart {
                offset: 0,
                skip_packets: 3,
            }
        } else {
            AudioStart {
                offset: packets.position(),
                skip_packets: 0,
            }
        };

        let mut extra_data = ident_packet.data;
        extra_data.extend_from_slice(&setup_packet.data);
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_VORBIS)
            .with_extra_data(extra_data.into_boxed_slice());

        let decoder = VorbisDecoder::try_new(&params, &DecoderOptions::default()).map_err(|e| {
            PlaybackError::header(
                HeaderParseKind::Malformed,
                format!("setup header rejected: {}", e),
            )
        })?;

        let total_samples = packets.final_granule(audio_start.offset)?;

        let descriptor = StreamDescriptor {
            sample_rate: ident.sample_rate,
            channels: u16::from(ident.channels),
            nominal_bitrate: ident.bitrate_nominal,
            max_bitrate: ident.bitrate_max,
            min_bitrate: ident.bitrate_min,
            blocksize_short: ident.blocksize_short,
            blocksize_long: ident.blocksize_long,
            total_samples,
            vendor: comment.vendor,
            tags: comment.comments,
        };

        let mut session = Self {
            packets,
            decoder,
            descriptor,
            audio_start,
            next_sample: 0,
            carry: None,
            finished: false,
        };
        session.restart_at_audio()?;

        info!(
            sample_rate = session.descriptor.sample_rate,
            channels = session.descriptor.channels,
            total_samples = ?session.descriptor.total_samples,
            vendor = %session.descriptor.vendor,
            "Opened Vorbis stream"
        );
        Ok(session)
    }

    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn decode_next_packet(&mut self) -> Result<DecodeOutcome> {
        if let Some(chunk) = self.carry.take() {
            return Ok(DecodeOutcome::Frames(chunk));
        }
        if self.finished {
            return Ok(DecodeOutcome::EndOfStream);
        }

        match self.decode_raw()? {
            Some(decoded) => {
                let start = self.next_sample;
                Ok(DecodeOutcome::Frames(self.place(decoded, start)))
            }
            None => {
                self.finished = true;
                Ok(DecodeOutcome::EndOfStream)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn seek_to_sample(&mut self, target: u64) -> Result<u64> {
        if let Some(total) = self.descriptor.total_samples {
            if target > total {
                return Err(SeekError::OutOfRange { target, total }.into());
            }
        }

        // Decoding restarts with a priming packet and may skip a packet
        // continued from the anchor page, so land well before the target.
        let preroll = 2 * u64::from(self.descriptor.blocksize_long);
        let anchor = self
            .packets
            .locate_granule(target.saturating_sub(preroll), self.audio_start.offset)?;

        let mut chunk = match anchor {
            Some(page) if page.granule > 0 => {
                self.packets.seek_to_page(page.offset + page.len)?;
                self.decoder.reset();
                self.carry = None;
                self.finished = false;
                trace!(page = page.offset, granule = page.granule, "Seek anchored on page");
                self.resolve_position()?
            }
            _ => {
                self.restart_at_audio()?;
                None
            }
        };

        loop {
            if let Some(mut current) = chunk.take() {
                if current.end_sample() > target {
                    let skip = target.saturating_sub(current.start_sample) as usize;
                    current.discard_front(skip);
                    let actual = current.start_sample;
                    self.carry = Some(current);
                    debug!(target, actual, "Seek complete");
                    return Ok(actual);
                }
            }

            if self.finished {
                debug!(target, actual = self.next_sample, "Seek reached end of stream");
                return Ok(self.next_sample);
            }

            chunk = match self.decode_raw() {
                Ok(Some(decoded)) => {
                    let start = self.next_sample;
                    Some(self.place(decoded, start))
                }
                Ok(None) => {
                    self.finished = true;
                    None
                }
                Err(e) if e.is_recoverable() => None,
                Err(e) => return Err(e),
            };
        }
    }
}

fn next_header_packet(packets: &mut PacketReader, name: &str) -> Result<OggPacket> {
    match packets.next_packet() {
        Ok(Some(packet)) => Ok(packet),
        Ok(None) => Err(PlaybackError::header(
            HeaderParseKind::Missing,
            format!("stream ended before the {} header", name),
        )),
        Err(e) if e.is_recoverable() => Err(PlaybackError::header(
            HeaderParseKind::Malformed,
            format!("{} header damaged: {}", name, e),
        )),
        Err(e) => Err(e),
    }
}
