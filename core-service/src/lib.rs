//! Engine-facing façade over the streaming playback core.
//!
//! A host engine creates one [`SoundLibrary`] from a [`ServiceConfig`], asks
//! it for sound information or to play sounds, and attaches each started
//! sound's output to its audio device through the `bridge-traits` boundary.

pub mod config;
pub mod error;
pub mod library;

pub use config::{LogFormatSetting, LoggingSettings, ServiceConfig};
pub use error::{Result, ServiceError};
pub use library::{ActiveSound, Looping, PlayOptions, SoundLibrary, SoundWaveInfo};

/// Install the global tracing subscriber described by `config`.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &ServiceConfig) -> Result<()> {
    core_runtime::logging::init_logging(config.logging.to_logging_config())?;
    Ok(())
}
