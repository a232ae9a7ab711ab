//! # Streaming Controller
//!
//! Producer half of the playback pipeline. The controller owns the decoder
//! session and the write side of the ring buffer, applies transport commands
//! and keeps the ring topped up.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │    PlaybackHandle (game thread)         │
//! └────────────┬────────────────────────────┘
//!              │ ControlCommand (bounded queue)
//!              ▼
//! ┌─────────────────────────────────────────┐
//! │   StreamingController (decode thread)   │
//! │                                         │
//! │  1. Apply commands                      │
//! │  2. Decode packets (StreamCodec)        │
//! │  3. Splice loops, write FrameProducer   │
//! │  4. Publish PlaybackSnapshot            │
//! └────────────┬────────────────────────────┘
//!              │ PCM frames (ring handed over by RingSender)
//!              ▼
//! ┌─────────────────────────────────────────┐
//! │   PlaybackOutput (audio callback)       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## State machine
//!
//! `Idle → Opening → Playing ⇄ Paused → Draining → Stopped`, with `Error`
//! reachable from any state. Open is synchronous within one step, so
//! `Opening` is only visible to observers while headers are being parsed.
//!
//! ## Position tracking
//!
//! Each run of contiguous stream samples written to the ring starts a
//! segment `(ring frame, stream sample)`. The published position is found by
//! locating the consumer's read cursor among those segments, so it reflects
//! what is audible rather than what has been decoded.

use crate::bitstream::BitstreamReader;
use crate::config::StreamingConfig;
use crate::error::{PlaybackError, Result};
use crate::handoff::RingSender;
use crate::ring_buffer::{FrameProducer, RingBuffer};
use crate::snapshot::{PlaybackSnapshot, SharedTransport, StreamingStats};
use crate::traits::{
    ControllerPhase, DecodeOutcome, LoopRegion, PcmChunk, PlaybackState, StreamCodec,
    StreamDescriptor,
};
use bridge_traits::playback::AudioSource;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

// ============================================================================
// Commands
// ============================================================================

/// Largest ring, in samples, a stream may ask for (128 MiB of `f32`).
pub const MAX_RING_SAMPLES: usize = 1 << 25;

/// How a newly opened stream starts. Applied in the same step as the open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub start_paused: bool,
    /// Clamped to the stream length once it is known.
    pub loop_region: Option<LoopRegion>,
    /// Stream sample to begin at; 0 starts from the top.
    pub start_sample: u64,
}

impl OpenOptions {
    pub fn paused(start_paused: bool) -> Self {
        Self {
            start_paused,
            ..Default::default()
        }
    }
}

/// Transport request sent from a handle to its controller.
#[derive(Clone)]
pub enum ControlCommand {
    Open {
        source: AudioSource,
        options: OpenOptions,
    },
    Play,
    Pause,
    Stop,
    Seek(u64),
    SetLoopRegion(Option<LoopRegion>),
    SetVolume(f32),
}

impl ControlCommand {
    /// Short name for logs. Sources are never logged whole.
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::Open { .. } => "open",
            ControlCommand::Play => "play",
            ControlCommand::Pause => "pause",
            ControlCommand::Stop => "stop",
            ControlCommand::Seek(_) => "seek",
            ControlCommand::SetLoopRegion(_) => "set_loop_region",
            ControlCommand::SetVolume(_) => "set_volume",
        }
    }
}

impl std::fmt::Debug for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlCommand::Open { source, options } => f
                .debug_struct("Open")
                .field("source", &source.describe())
                .field("options", options)
                .finish(),
            ControlCommand::Seek(sample) => f.debug_tuple("Seek").field(sample).finish(),
            ControlCommand::SetLoopRegion(region) => {
                f.debug_tuple("SetLoopRegion").field(region).finish()
            }
            ControlCommand::SetVolume(volume) => f.debug_tuple("SetVolume").field(volume).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// What one controller step left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Nothing urgent; wait for a command or the poll interval.
    Idle,
    /// The refill pass stopped at its packet limit with room left in the ring.
    Busy,
    /// Every handle is gone.
    Disconnected,
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Start,
    LoopWrap,
    Seek,
    Resync,
}

#[derive(Debug, Clone, Copy)]
struct PositionSegment {
    ring_frame: u64,
    stream_sample: u64,
    kind: SegmentKind,
}

/// Chunk the ring had no room for yet.
struct PendingChunk {
    chunk: PcmChunk,
    written: usize,
}

/// Decode-side state machine for one playback instance.
pub struct StreamingController<C: StreamCodec> {
    config: StreamingConfig,
    shared: Arc<SharedTransport>,
    commands: Receiver<ControlCommand>,
    cancel: CancellationToken,

    phase: ControllerPhase,
    source: Option<AudioSource>,
    session: Option<C>,
    descriptor: Option<StreamDescriptor>,
    rings: RingSender,
    ring: Option<FrameProducer>,
    pending: Option<PendingChunk>,
    refilling: bool,

    segments: VecDeque<PositionSegment>,
    position: u64,
    loops_completed: u64,
    loop_region: Option<LoopRegion>,

    end_of_stream: bool,
    finished: bool,
    seek_in_progress: bool,
    consecutive_errors: u32,
    underrun_base: u64,
    stats: StreamingStats,
    last_error: Option<String>,
}

impl<C: StreamCodec> StreamingController<C> {
    pub(crate) fn new(
        config: StreamingConfig,
        shared: Arc<SharedTransport>,
        commands: Receiver<ControlCommand>,
        rings: RingSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            shared,
            commands,
            cancel,
            rings,
            phase: ControllerPhase::Idle,
            source: None,
            session: None,
            descriptor: None,
            ring: None,
            pending: None,
            refilling: false,
            segments: VecDeque::new(),
            position: 0,
            loops_completed: 0,
            loop_region: None,
            end_of_stream: false,
            finished: false,
            seek_in_progress: false,
            consecutive_errors: 0,
            underrun_base: 0,
            stats: StreamingStats::default(),
            last_error: None,
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Run steps until cancelled or every handle is dropped.
    pub fn run(mut self) {
        info!("Decode loop started");

        while !self.cancel.is_cancelled() {
            match self.step() {
                StepStatus::Disconnected => break,
                StepStatus::Busy => continue,
                StepStatus::Idle => {}
            }

            match self.commands.recv_timeout(self.config.poll_interval()) {
                Ok(command) => self.handle_command(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.release_session();
        self.shared.set_audible(false);
        info!("Decode loop stopped");
    }

    /// Apply queued commands, refill the ring if due and publish a snapshot.
    pub fn step(&mut self) -> StepStatus {
        self.rings.service();

        let mut disconnected = false;
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.handle_command(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        let busy = self.phase == ControllerPhase::Playing && self.refill();

        if self.phase == ControllerPhase::Draining {
            self.check_drained();
        }

        self.publish();

        if disconnected {
            StepStatus::Disconnected
        } else if busy {
            StepStatus::Busy
        } else {
            StepStatus::Idle
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle_command(&mut self, command: ControlCommand) {
        debug!(command = command.name(), phase = ?self.phase, "Applying command");

        match command {
            ControlCommand::Open { source, options } => {
                self.loop_region = options.loop_region;
                self.open(source, options.start_paused);
                if options.start_sample > 0 && self.phase.has_session() {
                    self.seek(options.start_sample);
                }
            }
            ControlCommand::Play => self.play(),
            ControlCommand::Pause => self.pause(),
            ControlCommand::Stop => self.stop(),
            ControlCommand::Seek(target) => self.seek(target),
            ControlCommand::SetLoopRegion(region) => self.set_loop_region(region),
            ControlCommand::SetVolume(volume) => self.shared.set_volume(volume),
        }
    }

    #[instrument(skip(self, source), fields(source = %source.describe()))]
    fn open(&mut self, source: AudioSource, start_paused: bool) {
        self.release_session();
        self.source = Some(source.clone());
        self.set_phase(ControllerPhase::Opening);
        self.publish();

        let session = match BitstreamReader::open(&source).and_then(C::open) {
            Ok(session) => session,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        let descriptor = session.descriptor().clone();
        let capacity = self.config.buffer_frames(descriptor.sample_rate);
        let channels = usize::from(descriptor.channels);
        if capacity.saturating_mul(channels) > MAX_RING_SAMPLES {
            self.fail(PlaybackError::InvalidConfig(format!(
                "{} ms of {} Hz audio in {} channels exceeds the ring limit of {} samples",
                self.config.buffer_duration_ms,
                descriptor.sample_rate,
                channels,
                MAX_RING_SAMPLES
            )));
            return;
        }

        let (producer, consumer) = RingBuffer::new(capacity, channels).split();
        self.shared
            .set_format(descriptor.sample_rate, descriptor.channels);
        self.rings.send(Some(consumer));

        if let (Some(region), Some(total)) = (self.loop_region, descriptor.total_samples) {
            self.loop_region = region.clamp_to(total).ok();
        }

        info!(
            sample_rate = descriptor.sample_rate,
            channels = descriptor.channels,
            total_samples = ?descriptor.total_samples,
            capacity_frames = capacity,
            "Stream opened"
        );

        self.ring = Some(producer);
        self.session = Some(session);
        self.descriptor = Some(descriptor);
        self.segments.clear();
        self.segments.push_back(PositionSegment {
            ring_frame: 0,
            stream_sample: 0,
            kind: SegmentKind::Start,
        });
        self.position = 0;
        self.loops_completed = 0;
        self.end_of_stream = false;
        self.finished = false;
        self.seek_in_progress = false;
        self.refilling = true;
        self.consecutive_errors = 0;
        self.underrun_base = self.shared.underruns();
        self.stats = StreamingStats::default();
        self.last_error = None;

        self.set_phase(if start_paused {
            ControllerPhase::Paused
        } else {
            ControllerPhase::Playing
        });
    }

    fn play(&mut self) {
        match self.phase {
            ControllerPhase::Paused => {
                let resumed = if self.end_of_stream {
                    ControllerPhase::Draining
                } else {
                    ControllerPhase::Playing
                };
                self.set_phase(resumed);
            }
            ControllerPhase::Idle | ControllerPhase::Stopped => match self.source.clone() {
                Some(source) => self.open(source, false),
                None => warn!("Play requested with no source"),
            },
            ControllerPhase::Error => {
                warn!("Play ignored in error state; stop or reopen first")
            }
            ControllerPhase::Opening | ControllerPhase::Playing | ControllerPhase::Draining => {}
        }
    }

    fn pause(&mut self) {
        match self.phase {
            ControllerPhase::Playing | ControllerPhase::Draining => {
                self.set_phase(ControllerPhase::Paused)
            }
            phase => debug!(?phase, "Pause ignored"),
        }
    }

    fn stop(&mut self) {
        if matches!(self.phase, ControllerPhase::Idle | ControllerPhase::Stopped) {
            return;
        }

        self.release_session();
        self.finished = false;
        self.position = 0;
        self.loops_completed = 0;
        self.set_phase(ControllerPhase::Stopped);
        info!("Playback stopped");
    }

    fn seek(&mut self, target: u64) {
        if !self.phase.has_session() {
            warn!(target, phase = ?self.phase, "Seek ignored without an open stream");
            return;
        }
        let (Some(session), Some(ring)) = (self.session.as_mut(), self.ring.as_mut()) else {
            return;
        };

        match session.seek_to_sample(target) {
            Ok(actual) => {
                self.pending = None;
                ring.flush();
                ring.set_end_of_stream(false);

                self.segments.clear();
                self.segments.push_back(PositionSegment {
                    ring_frame: ring.frames_written(),
                    stream_sample: actual,
                    kind: SegmentKind::Seek,
                });
                self.position = actual;
                self.end_of_stream = false;
                self.seek_in_progress = true;
                self.refilling = true;

                if self.phase == ControllerPhase::Draining {
                    self.set_phase(ControllerPhase::Playing);
                }
                debug!(target, actual, "Seek applied");
            }
            Err(PlaybackError::Seek(e)) => {
                warn!(target, error = %e, "Seek rejected");
                self.last_error = Some(e.to_string());
            }
            Err(e) => self.fail(e),
        }
    }

    fn set_loop_region(&mut self, region: Option<LoopRegion>) {
        let Some(region) = region else {
            self.loop_region = None;
            debug!("Loop region cleared");
            return;
        };

        let total = self.descriptor.as_ref().and_then(|d| d.total_samples);
        let region = match total {
            Some(total) => match region.clamp_to(total) {
                Ok(region) => region,
                Err(e) => {
                    warn!(error = %e, total, "Loop region outside the stream");
                    self.last_error = Some(e.to_string());
                    return;
                }
            },
            None => region,
        };

        self.loop_region = Some(region);
        debug!(start = region.start(), end = region.end(), "Loop region set");

        // Already drained to the end: start looping from what is buffered
        if self.end_of_stream && self.phase.has_session() {
            match self.wrap_loop(region, self.frames_written()) {
                Ok(()) => {
                    self.end_of_stream = false;
                    if let Some(ring) = self.ring.as_mut() {
                        ring.set_end_of_stream(false);
                    }
                    if self.phase == ControllerPhase::Draining {
                        self.set_phase(ControllerPhase::Playing);
                    }
                }
                Err(e) => self.fail(e),
            }
        }
    }

    // ------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------

    /// Decode into the ring while it is below the low-water mark, up to full.
    /// Returns `true` when the pass stopped early with work left.
    fn refill(&mut self) -> bool {
        let Some(ring) = self.ring.as_ref() else {
            return false;
        };

        if !self.refilling {
            let capacity = ring.capacity_frames();
            let occupied = capacity - ring.free_frames();
            if occupied >= self.config.low_water_frames(capacity) {
                return false;
            }
            self.refilling = true;
        }

        let mut packets = 0;
        loop {
            if !self.write_pending() || self.ring.as_ref().map_or(true, |r| r.is_full()) {
                self.refilling = false;
                return false;
            }
            if self.end_of_stream || self.phase != ControllerPhase::Playing {
                return false;
            }
            if packets >= self.config.max_packets_per_refill || self.cancel.is_cancelled() {
                trace!(packets, "Refill pass yielded");
                return true;
            }

            let Some(session) = self.session.as_mut() else {
                return false;
            };
            packets += 1;
            self.stats.packets_decoded += 1;

            match session.decode_next_packet() {
                Ok(DecodeOutcome::Frames(chunk)) => {
                    self.consecutive_errors = 0;
                    if let Err(e) = self.stage_chunk(chunk) {
                        self.fail(e);
                    }
                }
                Ok(DecodeOutcome::EndOfStream) => {
                    if let Err(e) = self.on_end_of_stream() {
                        self.fail(e);
                    }
                }
                Err(e) if e.is_recoverable() => self.record_recovered(e),
                Err(e) => self.fail(e),
            }
        }
    }

    /// Push as much of the pending chunk as fits. `true` once nothing is pending.
    fn write_pending(&mut self) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return true;
        };
        let Some(ring) = self.ring.as_mut() else {
            return false;
        };

        let written = ring.try_write(pending.chunk.samples_from(pending.written));
        pending.written += written;
        self.stats.frames_buffered += written as u64;

        if pending.written >= pending.chunk.frames {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Queue a decoded chunk for the ring, splicing at the loop end.
    fn stage_chunk(&mut self, mut chunk: PcmChunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let ring_frame = self.frames_written();

        if let Some(region) = self.loop_region {
            if chunk.start_sample >= region.end() {
                return self.wrap_loop(region, ring_frame);
            }
            if chunk.end_sample() > region.end() {
                chunk.truncate_frames((region.end() - chunk.start_sample) as usize);
                self.note_continuity(&chunk, ring_frame);
                let wrap_frame = ring_frame + chunk.frames as u64;
                self.pending = Some(PendingChunk { chunk, written: 0 });
                return self.wrap_loop(region, wrap_frame);
            }
        }

        self.note_continuity(&chunk, ring_frame);
        self.pending = Some(PendingChunk { chunk, written: 0 });
        Ok(())
    }

    /// Start a new position segment when a chunk does not follow on from the last.
    fn note_continuity(&mut self, chunk: &PcmChunk, ring_frame: u64) {
        let Some(last) = self.segments.back() else {
            return;
        };

        let expected = last.stream_sample + ring_frame.saturating_sub(last.ring_frame);
        if chunk.start_sample != expected {
            debug!(expected, actual = chunk.start_sample, "Stream position discontinuity");
            self.segments.push_back(PositionSegment {
                ring_frame,
                stream_sample: chunk.start_sample,
                kind: SegmentKind::Resync,
            });
        }
    }

    /// Reposition the session at the loop start; frames from `ring_frame` on
    /// belong to the next pass.
    fn wrap_loop(&mut self, region: LoopRegion, ring_frame: u64) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| PlaybackError::Internal("loop wrap without a session".into()))?;

        let actual = session.seek_to_sample(region.start())?;
        self.segments.push_back(PositionSegment {
            ring_frame,
            stream_sample: actual,
            kind: SegmentKind::LoopWrap,
        });
        trace!(ring_frame, start = actual, "Loop wrap scheduled");
        Ok(())
    }

    fn on_end_of_stream(&mut self) -> Result<()> {
        if let Some(region) = self.loop_region {
            return self.wrap_loop(region, self.frames_written());
        }

        self.end_of_stream = true;
        if let Some(ring) = self.ring.as_mut() {
            ring.set_end_of_stream(true);
        }
        self.set_phase(ControllerPhase::Draining);
        info!(
            frames = self.stats.frames_buffered,
            packets = self.stats.packets_decoded,
            "End of stream, draining"
        );
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.ring.as_ref().map_or(0, |r| r.frames_written())
    }

    fn record_recovered(&mut self, e: PlaybackError) {
        self.stats.recovered_errors += 1;
        self.consecutive_errors += 1;
        warn!(
            error = %e,
            consecutive = self.consecutive_errors,
            "Skipped damaged stream data"
        );

        if self.consecutive_errors >= self.config.max_consecutive_errors {
            self.fail(PlaybackError::Decode {
                recoverable: false,
                reason: format!(
                    "{} consecutive damaged packets",
                    self.consecutive_errors
                ),
            });
        }
    }

    fn check_drained(&mut self) {
        let drained = self.ring.as_ref().map_or(true, |r| r.buffered_frames() == 0);
        if !drained {
            return;
        }

        self.update_position();
        self.release_session();
        self.finished = true;
        self.set_phase(ControllerPhase::Stopped);
        info!(position = self.position, "Playback finished");
    }

    fn fail(&mut self, e: PlaybackError) {
        error!(error = %e, "Playback failed");
        self.last_error = Some(e.to_string());
        self.release_session();
        self.set_phase(ControllerPhase::Error);
    }

    fn release_session(&mut self) {
        self.session = None;
        self.pending = None;
        self.segments.clear();
        self.end_of_stream = false;
        self.seek_in_progress = false;
        if self.ring.take().is_some() {
            self.rings.send(None);
        }
    }

    fn set_phase(&mut self, phase: ControllerPhase) {
        if self.phase != phase {
            trace!(from = ?self.phase, to = ?phase, "Phase change");
        }
        self.phase = phase;
        self.shared.set_audible(phase.is_audible());
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    fn update_position(&mut self) -> u64 {
        let Some(ring) = &self.ring else {
            return self.position;
        };

        let read = ring.effective_read_frame();
        while self.segments.len() > 1 && self.segments[1].ring_frame <= read {
            self.segments.pop_front();
            if self.segments[0].kind == SegmentKind::LoopWrap {
                self.loops_completed += 1;
            }
        }

        if let Some(segment) = self.segments.front() {
            self.position = segment.stream_sample + read.saturating_sub(segment.ring_frame);
        }
        self.position
    }

    fn public_state(&self) -> PlaybackState {
        match self.phase {
            ControllerPhase::Idle | ControllerPhase::Opening => PlaybackState::Stopped,
            ControllerPhase::Playing if self.seek_in_progress => PlaybackState::Seeking,
            ControllerPhase::Playing | ControllerPhase::Draining => PlaybackState::Playing,
            ControllerPhase::Paused => PlaybackState::Paused,
            ControllerPhase::Stopped if self.finished => PlaybackState::Finished,
            ControllerPhase::Stopped => PlaybackState::Stopped,
            ControllerPhase::Error => PlaybackState::Error,
        }
    }

    fn publish(&mut self) {
        let position_sample = self.update_position();

        if self.seek_in_progress {
            let settled = self.ring.as_ref().map_or(true, |ring| {
                !ring.has_pending_flush() && (ring.buffered_frames() > 0 || self.end_of_stream)
            });
            if settled {
                self.seek_in_progress = false;
            }
        }

        self.stats.underruns = self.shared.underruns().saturating_sub(self.underrun_base);

        self.shared.publish(PlaybackSnapshot {
            state: self.public_state(),
            phase: self.phase,
            position_sample,
            loops_completed: self.loops_completed,
            descriptor: self.descriptor.clone(),
            loop_region: self.loop_region,
            volume: self.shared.volume(),
            buffered_frames: self.ring.as_ref().map_or(0, |r| r.buffered_frames()),
            stats: self.stats.clone(),
            last_error: self.last_error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::{ring_handoff, RingReceiver};
    use crate::ring_buffer::FrameConsumer;
    use bytes::Bytes;
    use std::sync::mpsc::{sync_channel, SyncSender};

    /// Mono codec producing 100-frame chunks of `sample index / 1000`.
    struct CountingCodec {
        descriptor: StreamDescriptor,
        next: u64,
    }

    const TOTAL: u64 = 1000;

    impl StreamCodec for CountingCodec {
        fn open(reader: BitstreamReader) -> Result<Self> {
            if reader.is_empty() {
                return Err(PlaybackError::header(
                    crate::error::HeaderParseKind::Missing,
                    "empty",
                ));
            }
            Ok(Self {
                descriptor: StreamDescriptor::new(1000, 1).with_total_samples(Some(TOTAL)),
                next: 0,
            })
        }

        fn descriptor(&self) -> &StreamDescriptor {
            &self.descriptor
        }

        fn decode_next_packet(&mut self) -> Result<DecodeOutcome> {
            if self.next >= TOTAL {
                return Ok(DecodeOutcome::EndOfStream);
            }
            let end = (self.next + 100).min(TOTAL);
            let samples = (self.next..end).map(|i| i as f32 / 1000.0).collect();
            let chunk = PcmChunk::new(samples, 1, self.next);
            self.next = end;
            Ok(DecodeOutcome::Frames(chunk))
        }

        fn seek_to_sample(&mut self, target: u64) -> Result<u64> {
            self.next = target;
            Ok(target)
        }
    }

    /// Audio side of a controller under test.
    struct Listener {
        rings: RingReceiver,
        ring: Option<FrameConsumer>,
    }

    impl Listener {
        fn has_ring(&mut self) -> bool {
            self.rings.refresh(&mut self.ring);
            self.ring.is_some()
        }

        fn drain(&mut self, frames: usize) -> Vec<f32> {
            self.rings.refresh(&mut self.ring);
            let Some(ring) = self.ring.as_mut() else {
                return Vec::new();
            };
            let mut out = vec![0.0; frames];
            let read = ring.try_read(&mut out);
            out.truncate(read);
            out
        }
    }

    fn controller_with(
        config: StreamingConfig,
    ) -> (
        StreamingController<CountingCodec>,
        SyncSender<ControlCommand>,
        Arc<SharedTransport>,
        Listener,
    ) {
        let shared = Arc::new(SharedTransport::new(1.0));
        let (tx, rx) = sync_channel(8);
        let (sender, receiver) = ring_handoff();
        let controller =
            StreamingController::new(config, shared.clone(), rx, sender, CancellationToken::new());
        let listener = Listener {
            rings: receiver,
            ring: None,
        };
        (controller, tx, shared, listener)
    }

    fn controller() -> (
        StreamingController<CountingCodec>,
        SyncSender<ControlCommand>,
        Arc<SharedTransport>,
        Listener,
    ) {
        controller_with(StreamingConfig {
            buffer_duration_ms: 250,
            ..Default::default()
        })
    }

    fn open_with(tx: &SyncSender<ControlCommand>, options: OpenOptions) {
        tx.send(ControlCommand::Open {
            source: AudioSource::memory(Bytes::from_static(b"x")),
            options,
        })
        .unwrap();
    }

    fn open(tx: &SyncSender<ControlCommand>) {
        open_with(tx, OpenOptions::default());
    }

    #[test]
    fn test_open_fills_ring() {
        let (mut controller, tx, shared, mut listener) = controller();
        open(&tx);
        controller.step();

        assert_eq!(controller.phase(), ControllerPhase::Playing);
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(snapshot.buffered_frames, 250);
        assert_eq!(listener.drain(3), vec![0.0, 0.001, 0.002]);
    }

    #[test]
    fn test_open_failure_enters_error() {
        let (mut controller, tx, shared, _listener) = controller();
        tx.send(ControlCommand::Open {
            source: AudioSource::memory(Bytes::new()),
            options: OpenOptions::default(),
        })
        .unwrap();
        controller.step();

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Error);
        assert!(snapshot.last_error.as_deref().unwrap().contains("missing"));
    }

    #[test]
    fn test_loop_splice_is_sample_exact() {
        let (mut controller, tx, shared, mut listener) = controller();
        open(&tx);
        tx.send(ControlCommand::SetLoopRegion(Some(LoopRegion::new(50, 180).unwrap())))
            .unwrap();
        controller.step();

        let out = listener.drain(200);
        let indices: Vec<u64> = out.iter().map(|s| (s * 1000.0).round() as u64).collect();
        let expected: Vec<u64> = (0..180).chain(50..70).collect();
        assert_eq!(indices, expected);

        controller.step();
        assert_eq!(shared.snapshot().loops_completed, 1);
        assert_eq!(shared.snapshot().position_sample, 70);
    }

    #[test]
    fn test_end_of_stream_drains_to_finished() {
        let (mut controller, tx, shared, mut listener) = controller();
        open(&tx);

        while controller.phase() != ControllerPhase::Stopped {
            controller.step();
            listener.drain(300);
        }

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Finished);
        assert_eq!(snapshot.position_sample, TOTAL);
        assert_eq!(snapshot.stats.frames_buffered, TOTAL);
        assert!(!listener.has_ring());
    }

    #[test]
    fn test_seek_flushes_and_repositions() {
        let (mut controller, tx, shared, mut listener) = controller();
        open(&tx);
        controller.step();
        listener.drain(10);

        tx.send(ControlCommand::Seek(600)).unwrap();
        controller.step();
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.position_sample, 600);
        assert_eq!(snapshot.state, PlaybackState::Seeking);

        // Consumer applies the flush and hears the new position first
        assert_eq!(listener.drain(1), vec![0.6]);
        controller.step();
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(snapshot.position_sample, 601);
    }

    #[test]
    fn test_open_options_apply_in_one_command() {
        let (mut controller, tx, shared, mut listener) = controller();
        open_with(
            &tx,
            OpenOptions {
                start_paused: false,
                loop_region: Some(LoopRegion::new(100, 400).unwrap()),
                start_sample: 350,
            },
        );
        controller.step();

        let indices: Vec<u64> = listener
            .drain(100)
            .iter()
            .map(|s| (s * 1000.0).round() as u64)
            .collect();
        let expected: Vec<u64> = (350..400).chain(100..150).collect();
        assert_eq!(indices, expected);

        controller.step();
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.loop_region, Some(LoopRegion::new(100, 400).unwrap()));
        assert_eq!(snapshot.loops_completed, 1);
    }

    #[test]
    fn test_oversized_ring_fails_open() {
        let (mut controller, tx, shared, mut listener) = controller_with(StreamingConfig {
            buffer_duration_ms: u32::MAX,
            ..Default::default()
        });
        open(&tx);
        controller.step();

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Error);
        assert!(snapshot.last_error.as_deref().unwrap().contains("ring limit"));
        assert!(!listener.has_ring());
    }

    #[test]
    fn test_released_rings_return_to_decode_thread() {
        let (mut controller, tx, _shared, mut listener) = controller();
        open(&tx);
        controller.step();
        assert!(listener.has_ring());

        tx.send(ControlCommand::Stop).unwrap();
        controller.step();
        assert!(!listener.has_ring());

        // Reopening hands over a fresh ring after the old one was returned
        open(&tx);
        controller.step();
        assert!(listener.has_ring());
        assert_eq!(listener.drain(2), vec![0.0, 0.001]);
    }

    #[test]
    fn test_disconnect_reported() {
        let (mut controller, tx, _shared, _listener) = controller();
        drop(tx);
        assert_eq!(controller.step(), StepStatus::Disconnected);
    }
}
