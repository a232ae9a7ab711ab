//! Playback bridge traits and supporting audio types.
//!
//! The host engine owns the audio hardware and the mixer. The core hands it a
//! pull callback ([`AudioRenderSource`]) and the host decides when to call it.

use crate::error::Result;
use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Where compressed audio comes from.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// File on a filesystem the host can read.
    LocalFile { path: PathBuf },
    /// Bytes already resident in memory (e.g. loaded from a package).
    MemoryBuffer { data: Bytes },
}

impl AudioSource {
    /// Source backed by a path on disk.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::LocalFile { path: path.into() }
    }

    /// Source backed by an in-memory buffer.
    pub fn memory(data: impl Into<Bytes>) -> Self {
        Self::MemoryBuffer { data: data.into() }
    }

    /// Short description safe to put in logs (file name only).
    pub fn describe(&self) -> String {
        match self {
            AudioSource::LocalFile { path } => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "<file>".to_string()),
            AudioSource::MemoryBuffer { data } => format!("<memory {} bytes>", data.len()),
        }
    }
}

/// Output format the host audio device runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Device sample rate in hertz.
    pub sample_rate: u32,
    /// Interleaved channel count the device expects.
    pub channels: u16,
    /// Frames requested per callback, when fixed.
    pub buffer_frames: Option<u32>,
}

impl DeviceConfig {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            buffer_frames: None,
        }
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = Some(frames);
        self
    }
}

/// Real-time pull callback.
///
/// `render` runs on the host audio thread. Implementations must not block,
/// allocate or take locks; missing audio is written as silence.
pub trait AudioRenderSource: Send {
    /// Channel count of the interleaved samples written by `render`.
    fn channels(&self) -> u16;

    /// Native sample rate of the rendered samples.
    fn sample_rate(&self) -> u32;

    /// Fill `output` with interleaved samples. Returns the number of frames
    /// that carried real audio; the remainder of `output` is silence.
    fn render(&mut self, output: &mut [f32]) -> usize;
}

/// Host audio subsystem.
pub trait AudioDevice: Send + Sync {
    /// Current device output format.
    fn config(&self) -> DeviceConfig;

    /// Start pulling from `source` on the device's audio thread.
    fn attach(&self, source: Box<dyn AudioRenderSource>) -> Result<()>;
}

/// Unique identifier for one playback instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackSessionId(Uuid);

impl PlaybackSessionId {
    /// Generate a new session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlaybackSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaybackSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Device {}

        impl AudioDevice for Device {
            fn config(&self) -> DeviceConfig;
            fn attach(&self, source: Box<dyn AudioRenderSource>) -> Result<()>;
        }
    }

    struct Silence;

    impl AudioRenderSource for Silence {
        fn channels(&self) -> u16 {
            2
        }

        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn render(&mut self, output: &mut [f32]) -> usize {
            output.fill(0.0);
            0
        }
    }

    #[test]
    fn test_source_description_hides_directories() {
        let source = AudioSource::file("/home/user/game/Content/Audio/theme.ogg");
        assert_eq!(source.describe(), "theme.ogg");

        let source = AudioSource::memory(vec![0u8; 16]);
        assert_eq!(source.describe(), "<memory 16 bytes>");
    }

    #[test]
    fn test_device_config_builder() {
        let config = DeviceConfig::new(48_000, 2).with_buffer_frames(512);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.buffer_frames, Some(512));
    }

    #[test]
    fn test_device_receives_render_source() {
        let mut device = MockDevice::new();
        device
            .expect_attach()
            .withf(|source| source.channels() == 2 && source.sample_rate() == 48_000)
            .times(1)
            .returning(|_| Ok(()));

        assert!(device.attach(Box::new(Silence)).is_ok());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = PlaybackSessionId::new();
        let b = PlaybackSessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }
}
