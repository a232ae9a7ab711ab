//! # Ring Buffer for PCM Audio Frames
//!
//! Single-producer/single-consumer frame ring passing decoded audio from the
//! decode thread to the audio callback, built on a `ringbuf` heap ring.
//!
//! ## Design
//!
//! - **Storage**: `HeapRb<f32>` split into a [`FrameProducer`] owned by the
//!   controller and a [`FrameConsumer`] owned by the output; neither side
//!   locks or allocates after construction
//! - **Frames**: both halves move whole interleaved frames only
//! - **Cursors**: monotonic frame counters kept beside the ring, so stream
//!   positions can be computed from what the consumer has actually read
//! - **Overwrite Policy**: never; writes are partial when the buffer is full
//! - **Flush**: the producer publishes a discard mark, and the consumer skips
//!   up to it on its next call
//!
//! ## Usage
//!
//! ```rust
//! use core_playback::ring_buffer::RingBuffer;
//!
//! // 1 second of stereo audio at 44.1 kHz
//! let (mut producer, mut consumer) = RingBuffer::new(44100, 2).split();
//!
//! // Producer: write whole frames
//! let written = producer.try_write(&[0.1, -0.1, 0.2, -0.2]);
//! assert_eq!(written, 2);
//!
//! // Consumer: read up to 512 frames
//! let mut output = vec![0.0f32; 1024];
//! let read = consumer.try_read(&mut output);
//! assert_eq!(read, 2);
//! ```

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters both halves observe.
#[derive(Debug)]
struct RingState {
    channels: usize,
    capacity_frames: usize,
    /// Frames ever pushed by the producer
    write_frame: AtomicU64,
    /// Frames ever popped (or skipped) by the consumer
    read_frame: AtomicU64,
    /// Read position the consumer must skip to on its next call
    flush_to: AtomicU64,
    flush_epoch: AtomicU64,
    /// Last flush epoch applied by the consumer
    applied_epoch: AtomicU64,
    /// The producer will write nothing more for the current stream
    end_of_stream: AtomicBool,
}

impl RingState {
    fn effective_read_frame(&self) -> u64 {
        // An applied flush leaves the read cursor at or past its mark
        let read = self.read_frame.load(Ordering::Acquire);
        read.max(self.flush_to.load(Ordering::Acquire))
    }

    fn buffered_frames(&self) -> usize {
        let written = self.write_frame.load(Ordering::Acquire);
        written.saturating_sub(self.effective_read_frame()) as usize
    }

    fn has_pending_flush(&self) -> bool {
        self.flush_epoch.load(Ordering::Acquire) != self.applied_epoch.load(Ordering::Acquire)
    }
}

/// An unsplit frame ring.
pub struct RingBuffer {
    ring: HeapRb<f32>,
    state: Arc<RingState>,
}

impl RingBuffer {
    /// Create a ring holding `capacity_frames` frames of `channels` samples.
    ///
    /// Both values are raised to at least 1.
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        let capacity_frames = capacity_frames.max(1);
        let channels = channels.max(1);
        Self {
            ring: HeapRb::new(capacity_frames * channels),
            state: Arc::new(RingState {
                channels,
                capacity_frames,
                write_frame: AtomicU64::new(0),
                read_frame: AtomicU64::new(0),
                flush_to: AtomicU64::new(0),
                flush_epoch: AtomicU64::new(0),
                applied_epoch: AtomicU64::new(0),
                end_of_stream: AtomicBool::new(false),
            }),
        }
    }

    pub fn channels(&self) -> usize {
        self.state.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.state.capacity_frames
    }

    /// Separate the decode-side and audio-side halves.
    pub fn split(self) -> (FrameProducer, FrameConsumer) {
        let (ring_prod, ring_cons) = self.ring.split();
        (
            FrameProducer {
                ring: ring_prod,
                state: self.state.clone(),
            },
            FrameConsumer {
                ring: ring_cons,
                state: self.state,
            },
        )
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("channels", &self.state.channels)
            .field("capacity_frames", &self.state.capacity_frames)
            .finish()
    }
}

/// Decode-thread half: writes frames, flushes and marks end of stream.
pub struct FrameProducer {
    ring: HeapProd<f32>,
    state: Arc<RingState>,
}

impl FrameProducer {
    /// Write as many whole frames from `samples` as fit.
    ///
    /// Trailing samples that do not form a whole frame are ignored.
    /// Returns frames written.
    pub fn try_write(&mut self, samples: &[f32]) -> usize {
        let channels = self.state.channels;
        let frames = (samples.len() / channels).min(self.free_frames());
        if frames == 0 {
            return 0;
        }

        let pushed = self.ring.push_slice(&samples[..frames * channels]);
        debug_assert_eq!(pushed, frames * channels);
        self.state
            .write_frame
            .fetch_add(frames as u64, Ordering::Release);
        frames
    }

    /// Discard everything written so far. Takes effect on the consumer's next call.
    pub fn flush(&mut self) {
        let written = self.state.write_frame.load(Ordering::Acquire);
        self.state.flush_to.store(written, Ordering::Release);
        self.state.flush_epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_end_of_stream(&mut self, end: bool) {
        self.state.end_of_stream.store(end, Ordering::Release);
    }

    /// Frames that can be written now. Space freed by an unapplied flush is
    /// not counted until the consumer skips it.
    pub fn free_frames(&self) -> usize {
        self.ring.vacant_len() / self.state.channels
    }

    pub fn is_full(&self) -> bool {
        self.free_frames() == 0
    }

    pub fn channels(&self) -> usize {
        self.state.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.state.capacity_frames
    }

    /// Frames ever written.
    pub fn frames_written(&self) -> u64 {
        self.state.write_frame.load(Ordering::Acquire)
    }

    /// Read cursor as the listener will see it, counting a pending flush as applied.
    pub fn effective_read_frame(&self) -> u64 {
        self.state.effective_read_frame()
    }

    /// Frames written but not yet read or flushed.
    pub fn buffered_frames(&self) -> usize {
        self.state.buffered_frames()
    }

    pub fn has_pending_flush(&self) -> bool {
        self.state.has_pending_flush()
    }
}

impl std::fmt::Debug for FrameProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProducer")
            .field("channels", &self.state.channels)
            .field("buffered_frames", &self.buffered_frames())
            .finish()
    }
}

/// Audio-thread half: reads frames and applies flushes.
pub struct FrameConsumer {
    ring: HeapCons<f32>,
    state: Arc<RingState>,
}

impl FrameConsumer {
    /// Read up to `output.len() / channels` whole frames. Returns frames read.
    ///
    /// A pending flush is applied first.
    pub fn try_read(&mut self, output: &mut [f32]) -> usize {
        self.acknowledge_flush();

        let channels = self.state.channels;
        let frames = (output.len() / channels).min(self.ring.occupied_len() / channels);
        if frames == 0 {
            return 0;
        }

        let popped = self.ring.pop_slice(&mut output[..frames * channels]);
        debug_assert_eq!(popped, frames * channels);
        self.state
            .read_frame
            .fetch_add(frames as u64, Ordering::Release);
        frames
    }

    /// Apply a pending flush without reading, for callbacks that render silence.
    pub fn acknowledge_flush(&mut self) {
        let epoch = self.state.flush_epoch.load(Ordering::Acquire);
        if epoch == self.state.applied_epoch.load(Ordering::Relaxed) {
            return;
        }

        let target = self.state.flush_to.load(Ordering::Acquire);
        let read = self.state.read_frame.load(Ordering::Relaxed);
        if target > read {
            let samples = (target - read) as usize * self.state.channels;
            let skipped = self.ring.skip(samples);
            debug_assert_eq!(skipped, samples);
            self.state.read_frame.store(target, Ordering::Release);
        }
        self.state.applied_epoch.store(epoch, Ordering::Release);
    }

    pub fn channels(&self) -> usize {
        self.state.channels
    }

    /// Frames ready to read, ignoring a pending flush.
    pub fn available_frames(&self) -> usize {
        self.ring.occupied_len() / self.state.channels
    }

    pub fn buffered_frames(&self) -> usize {
        self.state.buffered_frames()
    }

    pub fn has_pending_flush(&self) -> bool {
        self.state.has_pending_flush()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.state.end_of_stream.load(Ordering::Acquire)
    }

    /// Frames ever read or skipped.
    pub fn frames_read(&self) -> u64 {
        self.state.read_frame.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for FrameConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameConsumer")
            .field("channels", &self.state.channels)
            .field("available_frames", &self.available_frames())
            .finish()
    }
}
