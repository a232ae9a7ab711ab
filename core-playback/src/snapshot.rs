//! # Playback Snapshots
//!
//! The decode thread is the only writer of playback state. After every step it
//! publishes an immutable [`PlaybackSnapshot`]; handles on other threads clone
//! the latest one under a short read lock and never wait on the controller.
//! The audio callback reads only the atomics in [`SharedTransport`].

use crate::traits::{ControllerPhase, LoopRegion, PlaybackState, StreamDescriptor};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters kept by the streaming controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamingStats {
    /// Packets handed to the decoder since open.
    pub packets_decoded: u64,
    /// Frames written into the ring since open.
    pub frames_buffered: u64,
    /// Damaged packets or pages skipped.
    pub recovered_errors: u64,
    /// Callbacks that had to pad with silence while audio was still expected.
    pub underruns: u64,
}

/// State published by the controller after each step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub phase: ControllerPhase,
    /// Stream sample the listener is hearing now.
    pub position_sample: u64,
    /// Loop wraps the listener has passed through.
    pub loops_completed: u64,
    pub descriptor: Option<StreamDescriptor>,
    pub loop_region: Option<LoopRegion>,
    pub volume: f32,
    /// Frames decoded but not yet played.
    pub buffered_frames: usize,
    pub stats: StreamingStats,
    /// Message of the last error, cleared by the next successful open.
    pub last_error: Option<String>,
}

impl PlaybackSnapshot {
    pub fn idle(volume: f32) -> Self {
        Self {
            state: PlaybackState::Stopped,
            phase: ControllerPhase::Idle,
            position_sample: 0,
            loops_completed: 0,
            descriptor: None,
            loop_region: None,
            volume,
            buffered_frames: 0,
            stats: StreamingStats::default(),
            last_error: None,
        }
    }

    /// Position in seconds, when a stream is open.
    pub fn position_secs(&self) -> Option<f64> {
        self.descriptor
            .as_ref()
            .filter(|d| d.sample_rate > 0)
            .map(|d| self.position_sample as f64 / f64::from(d.sample_rate))
    }
}

/// State shared between the controller, its handle and its output.
///
/// Rings themselves travel through [`crate::handoff`]; the audio thread
/// touches only the atomics here.
pub(crate) struct SharedTransport {
    snapshot: RwLock<Arc<PlaybackSnapshot>>,
    sample_rate: AtomicU32,
    channels: AtomicU32,
    volume: AtomicU32,
    audible: AtomicBool,
    underruns: AtomicU64,
}

impl SharedTransport {
    pub(crate) fn new(volume: f32) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(PlaybackSnapshot::idle(volume))),
            sample_rate: AtomicU32::new(0),
            channels: AtomicU32::new(0),
            volume: AtomicU32::new(volume.to_bits()),
            audible: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.snapshot.read().clone()
    }

    pub(crate) fn publish(&self, snapshot: PlaybackSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Record the format of the open stream. Kept after a release so a
    /// stopped output still reports it.
    pub(crate) fn set_format(&self, sample_rate: u32, channels: u16) {
        self.channels.store(u32::from(channels), Ordering::Relaxed);
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub(crate) fn channels(&self) -> u16 {
        self.channels.load(Ordering::Relaxed) as u16
    }

    pub(crate) fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub(crate) fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn is_audible(&self) -> bool {
        self.audible.load(Ordering::Acquire)
    }

    pub(crate) fn set_audible(&self, audible: bool) {
        self.audible.store(audible, Ordering::Release);
    }

    pub(crate) fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_snapshot() {
        let shared = SharedTransport::new(0.8);
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Stopped);
        assert_eq!(snapshot.phase, ControllerPhase::Idle);
        assert_eq!(snapshot.volume, 0.8);
        assert_eq!(snapshot.position_secs(), None);
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let shared = SharedTransport::new(1.0);
        let before = shared.snapshot();

        let mut next = PlaybackSnapshot::idle(1.0);
        next.position_sample = 22050;
        next.descriptor = Some(StreamDescriptor::new(44100, 2));
        shared.publish(next);

        // Readers holding the old value keep it
        assert_eq!(before.position_sample, 0);
        let after = shared.snapshot();
        assert_eq!(after.position_sample, 22050);
        assert_eq!(after.position_secs(), Some(0.5));
    }

    #[test]
    fn test_transport_atomics() {
        let shared = SharedTransport::new(1.0);
        shared.set_volume(0.25);
        assert_eq!(shared.volume(), 0.25);

        assert!(!shared.is_audible());
        shared.set_audible(true);
        assert!(shared.is_audible());

        shared.record_underrun();
        shared.record_underrun();
        assert_eq!(shared.underruns(), 2);

        assert_eq!((shared.sample_rate(), shared.channels()), (0, 0));
        shared.set_format(44100, 2);
        assert_eq!((shared.sample_rate(), shared.channels()), (44100, 2));
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(PlaybackSnapshot::idle(1.0)).unwrap();
        assert_eq!(json["state"], "stopped");
        assert_eq!(json["phase"], "idle");
    }
}
