//! Streaming Ogg Vorbis playback for game engines.
//!
//! Host applications depend on this crate and use the [`SoundLibrary`]
//! façade; lower-level pieces (the ring buffer, the controller, the Vorbis
//! session) are reachable through [`playback`].

pub use core_playback as playback;
pub use core_service::*;
