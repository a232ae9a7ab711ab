//! # Host Bridge Traits
//!
//! Contracts between the playback core and the host engine that embeds it.
//!
//! ## Overview
//!
//! The core never talks to audio hardware or the engine's log directly. Each
//! capability it needs from the host is expressed as a trait here and
//! implemented by the engine integration layer.
//!
//! ## Traits
//!
//! ### Audio
//! - [`AudioDevice`](playback::AudioDevice) - Host audio subsystem that pulls PCM
//! - [`AudioRenderSource`](playback::AudioRenderSource) - Real-time pull callback bound to a device
//!
//! ### Utilities
//! - [`LoggerSink`](logger::LoggerSink) - Forward structured logs to the engine log
//!
//! ## Thread Safety
//!
//! `AudioRenderSource` implementations are moved onto the host audio thread and
//! must be `Send`. Everything else is `Send + Sync` so a single instance can be
//! shared between the decode thread and the game thread.

pub mod error;
pub mod logger;
pub mod playback;

pub use error::BridgeError;

pub use logger::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use playback::{AudioDevice, AudioRenderSource, AudioSource, DeviceConfig};
