//! # Playback Error Types
//!
//! Error taxonomy for decoding and playback. Only some of these ever reach
//! the caller: recoverable decode errors are absorbed by the streaming
//! controller and surface as counters in the published snapshot.

use std::fmt;
use thiserror::Error;

/// Which part of the header sequence was wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderParseKind {
    /// A required header packet is absent or out of order.
    Missing,
    /// A header packet is present but its contents are inconsistent.
    Malformed,
    /// The stream declares a Vorbis version this decoder does not implement.
    VersionUnsupported,
}

impl fmt::Display for HeaderParseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HeaderParseKind::Missing => "missing",
            HeaderParseKind::Malformed => "malformed",
            HeaderParseKind::VersionUnsupported => "version unsupported",
        };
        f.write_str(name)
    }
}

/// Reasons a seek request cannot be honoured.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekError {
    /// Target lies beyond the known stream length.
    #[error("target sample {target} is beyond the stream length {total}")]
    OutOfRange { target: u64, total: u64 },

    /// No session is open to seek in.
    #[error("no stream is open")]
    NoStream,
}

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// The byte source could not be read, ended early, or an offset was out of range.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    // ========================================================================
    // Format Errors
    // ========================================================================
    /// Header packets are absent, inconsistent or unsupported. Fatal for the session.
    #[error("Header parse error ({kind}): {reason}")]
    HeaderParse {
        kind: HeaderParseKind,
        reason: String,
    },

    // ========================================================================
    // Decoding Errors
    // ========================================================================
    /// Packet-level corruption.
    #[error("Decode error (recoverable: {recoverable}): {reason}")]
    Decode { recoverable: bool, reason: String },

    // ========================================================================
    // Playback Control Errors
    // ========================================================================
    /// Seek target rejected.
    #[error("Seek error: {0}")]
    Seek(#[from] SeekError),

    /// Loop region with `start >= end`.
    #[error("Invalid loop region: {start}..{end}")]
    InvalidLoopRegion { start: u64, end: u64 },

    /// The consumer ran dry. Reported through counters, never returned to callers.
    #[error("Buffer underrun")]
    BufferUnderrun,

    /// Too many commands are waiting for the controller.
    #[error("Command queue full")]
    CommandQueueFull,

    /// The decode task has exited.
    #[error("Streaming controller unavailable")]
    ControllerUnavailable,

    /// Streaming configuration failed validation.
    #[error("Invalid streaming config: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Worker thread could not be started or joined.
    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    pub fn header(kind: HeaderParseKind, reason: impl Into<String>) -> Self {
        PlaybackError::HeaderParse {
            kind,
            reason: reason.into(),
        }
    }

    /// Packet-level damage the session can skip past.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        PlaybackError::Decode {
            recoverable: true,
            reason: reason.into(),
        }
    }

    /// Returns `true` if playback can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlaybackError::Decode {
                recoverable: true,
                ..
            } | PlaybackError::BufferUnderrun
        )
    }

    /// Returns `true` if this error came from the header sequence.
    pub fn is_header_error(&self) -> bool {
        matches!(self, PlaybackError::HeaderParse { .. })
    }

    /// Header kind, when this is a header error.
    pub fn header_kind(&self) -> Option<HeaderParseKind> {
        match self {
            PlaybackError::HeaderParse { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
