//! # Playback Handle
//!
//! Caller-facing side of one playback instance.
//!
//! [`PlaybackHandle`] sends transport commands to the decode thread and reads
//! the latest published snapshot. [`PlaybackOutput`] is the real-time pull
//! callback the host audio device drives. Neither blocks on the controller.

use crate::config::StreamingConfig;
use crate::decoder::VorbisSession;
use crate::error::{PlaybackError, Result};
use crate::handoff::{ring_handoff, RingReceiver};
use crate::ring_buffer::FrameConsumer;
use crate::snapshot::{PlaybackSnapshot, SharedTransport};
use crate::streaming::{ControlCommand, OpenOptions, StepStatus, StreamingController};
use crate::traits::{LoopRegion, PlaybackState, StreamCodec};
use bridge_traits::playback::{AudioRenderSource, AudioSource, PlaybackSessionId};
use core_runtime::worker::{spawn_worker, Worker};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Control surface for one playing sound.
///
/// Dropping the handle stops the decode thread and waits for it to exit.
pub struct PlaybackHandle {
    id: PlaybackSessionId,
    commands: SyncSender<ControlCommand>,
    shared: Arc<SharedTransport>,
    cancel: CancellationToken,
    worker: Option<Worker>,
}

impl PlaybackHandle {
    /// Start a Vorbis playback instance on its own decode thread.
    pub fn spawn(config: StreamingConfig) -> Result<(Self, PlaybackOutput)> {
        Self::spawn_with_codec::<VorbisSession>(config)
    }

    /// Start a playback instance decoding with `C`.
    pub fn spawn_with_codec<C>(config: StreamingConfig) -> Result<(Self, PlaybackOutput)>
    where
        C: StreamCodec + 'static,
    {
        let (mut handle, output, controller) = Self::build::<C>(config)?;

        let id = handle.id.to_string();
        let name = format!("oggbp-decode-{}", &id[..8]);
        let worker = spawn_worker(name, move || controller.run())?;
        info!(session = %handle.id, worker = worker.name(), "Playback instance started");

        handle.worker = Some(worker);
        Ok((handle, output))
    }

    /// Build a playback instance whose controller is stepped by the caller.
    pub fn manual<C: StreamCodec>(
        config: StreamingConfig,
    ) -> Result<(Self, PlaybackOutput, ManualDriver<C>)> {
        let (handle, output, controller) = Self::build::<C>(config)?;
        Ok((handle, output, ManualDriver { controller }))
    }

    fn build<C: StreamCodec>(
        config: StreamingConfig,
    ) -> Result<(Self, PlaybackOutput, StreamingController<C>)> {
        config.validate().map_err(PlaybackError::InvalidConfig)?;

        let shared = Arc::new(SharedTransport::new(config.initial_volume));
        let (tx, rx) = sync_channel(config.command_queue_capacity);
        let (rings, receiver) = ring_handoff();
        let cancel = CancellationToken::new();
        let controller =
            StreamingController::new(config, shared.clone(), rx, rings, cancel.child_token());

        let handle = Self {
            id: PlaybackSessionId::new(),
            commands: tx,
            shared: shared.clone(),
            cancel,
            worker: None,
        };
        Ok((handle, PlaybackOutput::new(shared, receiver), controller))
    }

    pub fn id(&self) -> PlaybackSessionId {
        self.id
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Open `source`, replacing whatever was playing. Clears the loop region.
    pub fn open(&self, source: AudioSource, start_paused: bool) -> Result<()> {
        self.open_with(source, OpenOptions::paused(start_paused))
    }

    /// Open `source` with its loop region and start position in one command.
    pub fn open_with(&self, source: AudioSource, options: OpenOptions) -> Result<()> {
        self.send(ControlCommand::Open { source, options })
    }

    /// Open a different source and start playing it.
    pub fn reopen(&self, source: AudioSource) -> Result<()> {
        self.open(source, false)
    }

    /// Resume from pause, or restart the current source after stop/finish.
    pub fn play(&self) -> Result<()> {
        self.send(ControlCommand::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(ControlCommand::Pause)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(ControlCommand::Stop)
    }

    /// Jump to a stream sample. Out-of-range targets are rejected by the
    /// controller and reported through `last_error`.
    pub fn seek(&self, sample: u64) -> Result<()> {
        self.send(ControlCommand::Seek(sample))
    }

    pub fn set_loop_region(&self, region: Option<LoopRegion>) -> Result<()> {
        self.send(ControlCommand::SetLoopRegion(region))
    }

    /// Set the output gain, clamped to `0.0..=1.0`.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.send(ControlCommand::SetVolume(volume))
    }

    fn send(&self, command: ControlCommand) -> Result<()> {
        let name = command.name();
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => {
                debug!(session = %self.id, command = name, "Command queue full");
                PlaybackError::CommandQueueFull
            }
            TrySendError::Disconnected(_) => PlaybackError::ControllerUnavailable,
        })
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn get_state(&self) -> PlaybackState {
        self.shared.snapshot().state
    }

    /// Stream sample the listener is hearing now.
    pub fn get_position_sample(&self) -> u64 {
        self.shared.snapshot().position_sample
    }

    pub fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.shared.snapshot()
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.join() {
                warn!(session = %self.id, error = %e, "Decode thread did not exit cleanly");
            }
        }
    }
}

impl std::fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("id", &self.id)
            .field("state", &self.get_state())
            .finish()
    }
}

/// Controller driven by explicit calls instead of a thread.
pub struct ManualDriver<C: StreamCodec> {
    controller: StreamingController<C>,
}

impl<C: StreamCodec> ManualDriver<C> {
    /// Run one controller step.
    pub fn pump(&mut self) -> StepStatus {
        self.controller.step()
    }

    /// Step until a pass finishes with nothing left to do right now.
    pub fn pump_until_idle(&mut self) -> StepStatus {
        loop {
            match self.controller.step() {
                StepStatus::Busy => continue,
                status => return status,
            }
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// Pull callback reading from the instance's ring buffer.
///
/// While paused or stopped it renders silence and leaves buffered audio in
/// place. A pending flush is still acknowledged so seeks complete.
pub struct PlaybackOutput {
    shared: Arc<SharedTransport>,
    rings: RingReceiver,
    /// Ring of the open stream, as last handed over by the controller
    ring: Option<FrameConsumer>,
}

impl PlaybackOutput {
    fn new(shared: Arc<SharedTransport>, rings: RingReceiver) -> Self {
        Self {
            shared,
            rings,
            ring: None,
        }
    }
}

impl AudioRenderSource for PlaybackOutput {
    fn channels(&self) -> u16 {
        self.shared.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.shared.sample_rate()
    }

    fn render(&mut self, output: &mut [f32]) -> usize {
        self.rings.refresh(&mut self.ring);
        let Some(ring) = self.ring.as_mut() else {
            output.fill(0.0);
            return 0;
        };

        if !self.shared.is_audible() {
            ring.acknowledge_flush();
            output.fill(0.0);
            return 0;
        }

        let frames = ring.try_read(output);
        let filled = frames * ring.channels();

        let gain = self.shared.volume();
        if gain != 1.0 {
            output[..filled].iter_mut().for_each(|s| *s *= gain);
        }
        output[filled..].fill(0.0);

        let wanted = output.len() / ring.channels();
        if frames < wanted && !ring.is_end_of_stream() && !ring.has_pending_flush() {
            self.shared.record_underrun();
        }
        frames
    }
}
