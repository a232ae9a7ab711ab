//! # Streaming Ogg Vorbis Playback
//!
//! Decodes Ogg Vorbis streams on a background thread and hands PCM to a
//! host-driven audio callback.
//!
//! ## Overview
//!
//! This crate handles:
//! - Byte access over files and memory buffers ([`bitstream`])
//! - Ogg page framing and packet reassembly ([`ogg`])
//! - Vorbis header parsing, decoding and sample-accurate seeking ([`decoder`])
//! - A lock-free frame ring between decode and audio threads ([`ring_buffer`]),
//!   handed to the audio callback without locks or frees on its thread
//! - The transport state machine with loop splicing ([`streaming`])
//! - Caller handles and the real-time output ([`handle`])
//!
//! ## Usage
//!
//! ```no_run
//! use core_playback::{AudioSource, PlaybackHandle, StreamingConfig};
//!
//! let (handle, output) = PlaybackHandle::spawn(StreamingConfig::default())?;
//! handle.open(AudioSource::file("music/theme.ogg"), false)?;
//! // give `output` to the host audio device, then poll `handle.snapshot()`
//! # drop(output);
//! # Ok::<(), core_playback::PlaybackError>(())
//! ```

pub mod bitstream;
pub mod config;
pub mod decoder;
pub mod error;
pub mod handle;
mod handoff;
pub mod ogg;
pub mod ring_buffer;
pub mod snapshot;
pub mod streaming;
pub mod traits;

pub use bitstream::BitstreamReader;
pub use config::StreamingConfig;
pub use decoder::VorbisSession;
pub use error::{HeaderParseKind, PlaybackError, Result, SeekError};
pub use handle::{ManualDriver, PlaybackHandle, PlaybackOutput};
pub use ring_buffer::{FrameConsumer, FrameProducer, RingBuffer};
pub use snapshot::{PlaybackSnapshot, StreamingStats};
pub use streaming::{ControlCommand, OpenOptions, StepStatus, StreamingController};
pub use traits::{
    ControllerPhase, DecodeOutcome, LoopRegion, PcmChunk, PlaybackState, StreamCodec,
    StreamDescriptor,
};

pub use bridge_traits::playback::{AudioRenderSource, AudioSource, DeviceConfig};
