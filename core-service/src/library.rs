//! # Sound Library
//!
//! Engine-facing entry points: inspect a sound, start playing one, and hand
//! its output to the host audio device.

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use bridge_traits::playback::{AudioDevice, AudioSource};
use bytes::Bytes;
use core_playback::{
    BitstreamReader, LoopRegion, OpenOptions, PlaybackError, PlaybackHandle, PlaybackOutput,
    SeekError, StreamCodec, StreamDescriptor, VorbisSession,
};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Summary of a sound file, read from its headers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundWaveInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub total_samples: Option<u64>,
    pub duration_secs: Option<f64>,
    /// Size of the whole sound decoded to interleaved 16-bit PCM.
    pub raw_pcm_size: Option<u64>,
    pub nominal_bitrate: Option<u32>,
    pub vendor: String,
    pub tags: Vec<(String, String)>,
}

impl From<&StreamDescriptor> for SoundWaveInfo {
    fn from(descriptor: &StreamDescriptor) -> Self {
        Self {
            channels: descriptor.channels,
            sample_rate: descriptor.sample_rate,
            total_samples: descriptor.total_samples,
            duration_secs: descriptor.duration().map(|d| d.as_secs_f64()),
            raw_pcm_size: descriptor.raw_pcm_size(),
            nominal_bitrate: descriptor.nominal_bitrate,
            vendor: descriptor.vendor.clone(),
            tags: descriptor.tags.clone(),
        }
    }
}

/// How a sound repeats.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Looping {
    #[default]
    Off,
    /// Whole sound, back to back.
    WholeStream,
    /// Section between two times in seconds.
    Region { start_secs: f64, end_secs: f64 },
}

/// Options applied when a sound starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayOptions {
    /// Output gain, clamped to `0.0..=1.0`.
    pub volume_multiplier: f32,
    pub start_time_secs: f64,
    pub looping: Looping,
    pub start_paused: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            volume_multiplier: 1.0,
            start_time_secs: 0.0,
            looping: Looping::Off,
            start_paused: false,
        }
    }
}

impl PlayOptions {
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume_multiplier = volume;
        self
    }

    pub fn with_start_time(mut self, secs: f64) -> Self {
        self.start_time_secs = secs;
        self
    }

    pub fn with_looping(mut self, looping: Looping) -> Self {
        self.looping = looping;
        self
    }

    pub fn paused(mut self) -> Self {
        self.start_paused = true;
        self
    }
}

/// A started sound: its transport handle and, until attached, its output.
pub struct ActiveSound {
    handle: PlaybackHandle,
    output: Option<PlaybackOutput>,
    info: SoundWaveInfo,
}

impl std::fmt::Debug for ActiveSound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSound")
            .field("info", &self.info)
            .field("output_attached", &self.output.is_none())
            .finish_non_exhaustive()
    }
}

impl ActiveSound {
    pub fn handle(&self) -> &PlaybackHandle {
        &self.handle
    }

    pub fn info(&self) -> &SoundWaveInfo {
        &self.info
    }

    /// Take the output to drive it directly instead of through a device.
    pub fn take_output(&mut self) -> Option<PlaybackOutput> {
        self.output.take()
    }

    /// Start the host device pulling this sound's output.
    #[instrument(skip(self, device), fields(session = %self.handle.id()))]
    pub fn attach_to_device(&mut self, device: &dyn AudioDevice) -> Result<()> {
        let output = self.output.take().ok_or(ServiceError::OutputAttached)?;

        let device_config = device.config();
        if device_config.sample_rate != self.info.sample_rate {
            warn!(
                device_rate = device_config.sample_rate,
                stream_rate = self.info.sample_rate,
                "Device rate differs from the stream; the host must resample"
            );
        }
        if device_config.channels != self.info.channels {
            warn!(
                device_channels = device_config.channels,
                stream_channels = self.info.channels,
                "Device channel count differs from the stream"
            );
        }

        device.attach(Box::new(output))?;
        debug!("Output attached to device");
        Ok(())
    }
}

/// Factory for playing sounds with one shared configuration.
#[derive(Debug, Clone)]
pub struct SoundLibrary {
    config: ServiceConfig,
}

impl SoundLibrary {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn sound_info_from_file(&self, path: impl AsRef<Path>) -> Result<SoundWaveInfo> {
        self.sound_info(&AudioSource::file(path.as_ref()))
    }

    pub fn sound_info_from_memory(&self, data: impl Into<Bytes>) -> Result<SoundWaveInfo> {
        self.sound_info(&AudioSource::memory(data))
    }

    #[instrument(skip(self, source), fields(source = %source.describe()))]
    fn sound_info(&self, source: &AudioSource) -> Result<SoundWaveInfo> {
        let session = VorbisSession::open(BitstreamReader::open(source)?)?;
        Ok(SoundWaveInfo::from(session.descriptor()))
    }

    pub fn play_sound_from_file(
        &self,
        path: impl AsRef<Path>,
        options: PlayOptions,
    ) -> Result<ActiveSound> {
        self.play(AudioSource::file(path.as_ref()), options)
    }

    pub fn play_sound_from_memory(
        &self,
        data: impl Into<Bytes>,
        options: PlayOptions,
    ) -> Result<ActiveSound> {
        self.play(AudioSource::memory(data), options)
    }

    #[instrument(skip(self, source), fields(source = %source.describe()))]
    fn play(&self, source: AudioSource, options: PlayOptions) -> Result<ActiveSound> {
        // Headers are checked here so a bad file fails the call, not the stream
        let info = self.sound_info(&source)?;
        let descriptor = StreamDescriptor::new(info.sample_rate, info.channels)
            .with_total_samples(info.total_samples);

        let start_sample = seconds_to_samples(&descriptor, options.start_time_secs)?;
        if let Some(total) = info.total_samples.filter(|&total| start_sample > total) {
            return Err(PlaybackError::from(SeekError::OutOfRange {
                target: start_sample,
                total,
            })
            .into());
        }
        let region = loop_region(&descriptor, options.looping)?;

        let mut streaming = self.config.streaming.clone();
        streaming.initial_volume = clamp_volume(options.volume_multiplier);

        // One command, so even a one-slot queue accepts it
        let (handle, output) = PlaybackHandle::spawn(streaming)?;
        handle.open_with(
            source,
            OpenOptions {
                start_paused: options.start_paused,
                loop_region: region,
                start_sample,
            },
        )?;

        info!(
            session = %handle.id(),
            start_sample,
            looping = ?options.looping,
            paused = options.start_paused,
            "Sound started"
        );

        Ok(ActiveSound {
            handle,
            output: Some(output),
            info,
        })
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

fn seconds_to_samples(descriptor: &StreamDescriptor, secs: f64) -> Result<u64> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ServiceError::InvalidOptions(format!(
            "time {} is not a non-negative number of seconds",
            secs
        )));
    }
    Ok(descriptor.duration_to_samples(Duration::from_secs_f64(secs)))
}

fn loop_region(descriptor: &StreamDescriptor, looping: Looping) -> Result<Option<LoopRegion>> {
    let region = match looping {
        Looping::Off => return Ok(None),
        Looping::WholeStream => {
            let total = descriptor.total_samples.ok_or_else(|| {
                ServiceError::InvalidOptions("stream length unknown; cannot loop it whole".into())
            })?;
            LoopRegion::new(0, total)?
        }
        Looping::Region {
            start_secs,
            end_secs,
        } => LoopRegion::new(
            seconds_to_samples(descriptor, start_secs)?,
            seconds_to_samples(descriptor, end_secs)?,
        )?,
    };
    Ok(Some(region))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> StreamDescriptor {
        StreamDescriptor::new(44100, 2).with_total_samples(Some(441_000))
    }

    #[test]
    fn test_seconds_to_samples() {
        assert_eq!(seconds_to_samples(&descriptor(), 0.0).unwrap(), 0);
        assert_eq!(seconds_to_samples(&descriptor(), 1.5).unwrap(), 66150);
        assert!(matches!(
            seconds_to_samples(&descriptor(), -1.0),
            Err(ServiceError::InvalidOptions(_))
        ));
        assert!(seconds_to_samples(&descriptor(), f64::NAN).is_err());
    }

    #[test]
    fn test_loop_region_conversion() {
        assert_eq!(loop_region(&descriptor(), Looping::Off).unwrap(), None);

        let whole = loop_region(&descriptor(), Looping::WholeStream)
            .unwrap()
            .unwrap();
        assert_eq!((whole.start(), whole.end()), (0, 441_000));

        let section = loop_region(
            &descriptor(),
            Looping::Region {
                start_secs: 1.0,
                end_secs: 2.0,
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!((section.start(), section.end()), (44100, 88200));

        let backwards = loop_region(
            &descriptor(),
            Looping::Region {
                start_secs: 2.0,
                end_secs: 1.0,
            },
        );
        assert!(matches!(
            backwards,
            Err(ServiceError::Playback(
                core_playback::PlaybackError::InvalidLoopRegion { .. }
            ))
        ));

        let unknown = StreamDescriptor::new(44100, 2);
        assert!(loop_region(&unknown, Looping::WholeStream).is_err());
    }

    #[test]
    fn test_volume_clamp() {
        assert_eq!(clamp_volume(1.5), 1.0);
        assert_eq!(clamp_volume(-0.5), 0.0);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
        assert_eq!(clamp_volume(0.3), 0.3);
    }
}
