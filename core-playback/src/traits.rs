//! # Core Playback Traits
//!
//! Types shared between the decoder session, the streaming controller and the
//! playback handle, plus the [`StreamCodec`] capability the controller is
//! generic over.
//!
//! ## Architecture
//!
//! The playback system uses a **producer-consumer model**:
//!
//! - **Producer (`StreamCodec`)**: driven by the streaming controller on its
//!   decode thread. Each call decodes at most one compressed packet into a
//!   [`PcmChunk`] tagged with the stream sample index of its first frame.
//! - **Consumer (`PlaybackOutput`)**: called from the host's real-time audio
//!   callback, pulling frames from the shared ring buffer.

use crate::bitstream::BitstreamReader;
use crate::error::{PlaybackError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Stream Descriptor
// ============================================================================

/// Immutable metadata parsed once from a stream's headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Nominal bitrate in bits per second, when the encoder declared one
    pub nominal_bitrate: Option<u32>,
    pub max_bitrate: Option<u32>,
    pub min_bitrate: Option<u32>,
    /// Short and long block sizes in samples
    pub blocksize_short: u16,
    pub blocksize_long: u16,
    /// Total samples per channel, when the stream end could be located
    pub total_samples: Option<u64>,
    /// Encoder vendor string
    pub vendor: String,
    /// User comments in stream order, keys lowercased
    pub tags: Vec<(String, String)>,
}

impl StreamDescriptor {
    /// Descriptor with only the audio shape filled in.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            nominal_bitrate: None,
            max_bitrate: None,
            min_bitrate: None,
            blocksize_short: 0,
            blocksize_long: 0,
            total_samples: None,
            vendor: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_total_samples(mut self, total: Option<u64>) -> Self {
        self.total_samples = total;
        self
    }

    /// First value of a comment tag, compared case-insensitively.
    pub fn tag(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Stream length, when known.
    pub fn duration(&self) -> Option<Duration> {
        self.total_samples.map(|total| self.samples_to_duration(total))
    }

    pub fn samples_to_duration(&self, samples: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(samples as f64 / f64::from(self.sample_rate))
    }

    /// Sample index for a time offset, rounded down.
    pub fn duration_to_samples(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * f64::from(self.sample_rate)) as u64
    }

    /// Size of the whole stream decoded to interleaved 16-bit PCM.
    pub fn raw_pcm_size(&self) -> Option<u64> {
        self.total_samples
            .map(|total| total * u64::from(self.channels) * 2)
    }
}

// ============================================================================
// Decoded Audio Data
// ============================================================================

/// Interleaved PCM frames starting at a known stream sample.
///
/// Samples are normalized to `[-1.0, 1.0]`, channels in Vorbis order.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    pub samples: Vec<f32>,
    pub frames: usize,
    pub channels: u16,
    /// Stream sample index of the first frame.
    pub start_sample: u64,
}

impl PcmChunk {
    pub fn new(samples: Vec<f32>, channels: u16, start_sample: u64) -> Self {
        let frames = if channels == 0 {
            0
        } else {
            samples.len() / usize::from(channels)
        };
        Self {
            samples,
            frames,
            channels,
            start_sample,
        }
    }

    pub fn empty(channels: u16, start_sample: u64) -> Self {
        Self::new(Vec::new(), channels, start_sample)
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Stream sample one past the last frame.
    pub fn end_sample(&self) -> u64 {
        self.start_sample + self.frames as u64
    }

    /// Keep at most `frames` leading frames.
    pub fn truncate_frames(&mut self, frames: usize) {
        if frames < self.frames {
            self.frames = frames;
            self.samples.truncate(frames * usize::from(self.channels));
        }
    }

    /// Drop up to `frames` leading frames, advancing `start_sample`.
    pub fn discard_front(&mut self, frames: usize) {
        let frames = frames.min(self.frames);
        self.samples.drain(..frames * usize::from(self.channels));
        self.frames -= frames;
        self.start_sample += frames as u64;
    }

    /// Interleaved samples from frame `from` onwards.
    pub fn samples_from(&self, from: usize) -> &[f32] {
        let start = from.min(self.frames) * usize::from(self.channels);
        &self.samples[start..]
    }

    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames as f64 / f64::from(sample_rate))
    }
}

// ============================================================================
// Transport Types
// ============================================================================

/// Sample range replayed instead of finishing. `start` is inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRegion {
    start: u64,
    end: u64,
}

impl LoopRegion {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start >= end {
            return Err(PlaybackError::InvalidLoopRegion { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, sample: u64) -> bool {
        sample >= self.start && sample < self.end
    }

    /// Limit the end to the stream length. Fails if nothing of the region is left.
    pub fn clamp_to(self, total: u64) -> Result<Self> {
        Self::new(self.start, self.end.min(total))
    }
}

/// Externally visible transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    Seeking,
    Finished,
    Error,
}

impl PlaybackState {
    /// Playing or about to resume playing after a seek.
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Seeking)
    }

    /// Nothing more will play without a new command.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlaybackState::Stopped | PlaybackState::Finished | PlaybackState::Error
        )
    }
}

/// Internal state of the streaming controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerPhase {
    Idle,
    Opening,
    Playing,
    Paused,
    Draining,
    Stopped,
    Error,
}

impl ControllerPhase {
    /// A decoder session is open in this phase.
    pub fn has_session(&self) -> bool {
        matches!(
            self,
            ControllerPhase::Playing | ControllerPhase::Paused | ControllerPhase::Draining
        )
    }

    /// The output should be pulling frames from the ring.
    pub fn is_audible(&self) -> bool {
        matches!(self, ControllerPhase::Playing | ControllerPhase::Draining)
    }
}

// ============================================================================
// Core Traits
// ============================================================================

/// Result of one decode step.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// Zero or more frames. Header-priming packets produce empty chunks.
    Frames(PcmChunk),
    EndOfStream,
}

/// A packet-at-a-time decoder over one logical stream.
///
/// The streaming controller is generic over this trait so tests can drive it
/// with synthetic codecs.
pub trait StreamCodec: Send + Sized {
    /// Parse the stream headers. Header problems are fatal.
    fn open(reader: BitstreamReader) -> Result<Self>;

    fn descriptor(&self) -> &StreamDescriptor;

    /// Decode the next compressed packet.
    ///
    /// Damaged packets return a recoverable [`PlaybackError::Decode`]; the
    /// session has already skipped past them and the next call continues.
    fn decode_next_packet(&mut self) -> Result<DecodeOutcome>;

    /// Reposition so the next decoded frame is the first at or after
    /// `target`. Returns that frame's stream sample index.
    fn seek_to_sample(&mut self, target: u64) -> Result<u64>;
}

// ============================================================================
// Tests
// ============================================================================
