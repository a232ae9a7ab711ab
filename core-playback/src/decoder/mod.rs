//! # Audio Decoder Module
//!
//! Vorbis decoding for the streaming controller.
//!
//! ## Architecture
//!
//! ```text
//! BitstreamReader → PacketReader (Ogg) → VorbisSession → PcmChunk
//!                                             │
//!                                  symphonia VorbisDecoder (DSP)
//! ```
//!
//! Header validation, granule bookkeeping and seeking live here; symphonia
//! only turns audio packets into PCM. [`SampleConverter`] interleaves the
//! backend's planar buffers back into the stream's channel order.
//!
//! ## Threading Model
//!
//! A session is `Send` and is owned by exactly one decode thread.

mod headers;
mod sample_converter;
mod vorbis;

pub use headers::{CommentHeader, IdentificationHeader};
pub use sample_converter::{plane_for_channel, SampleConverter};
pub use vorbis::VorbisSession;
