//! # Streaming Configuration
//!
//! Configuration types for the streaming controller.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streaming controller configuration.
///
/// Controls ring buffer sizing, refill pacing and the command queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Ring buffer length in milliseconds of audio.
    ///
    /// Converted to frames with the stream's sample rate at open time.
    ///
    /// Default: 500 ms.
    #[serde(default = "default_buffer_duration_ms")]
    pub buffer_duration_ms: u32,

    /// Ring occupancy (fraction, 0.0-1.0) below which the controller refills.
    ///
    /// Default: 0.5 (50% full).
    #[serde(default = "default_low_water_ratio")]
    pub low_water_ratio: f32,

    /// Maximum packets decoded in one refill pass.
    ///
    /// Bounds how long the decode thread goes without looking at commands.
    ///
    /// Default: 64 packets.
    #[serde(default = "default_max_packets_per_refill")]
    pub max_packets_per_refill: usize,

    /// Commands that may wait for the controller before `CommandQueueFull`.
    ///
    /// Default: 32.
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// How long the decode thread sleeps waiting for commands between refills.
    ///
    /// Default: 5 ms.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Volume applied at open, 0.0-1.0.
    ///
    /// Default: 1.0.
    #[serde(default = "default_initial_volume")]
    pub initial_volume: f32,

    /// Back-to-back recoverable decode errors tolerated before the stream is
    /// treated as unplayable.
    ///
    /// Default: 10.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_duration_ms: default_buffer_duration_ms(),
            low_water_ratio: default_low_water_ratio(),
            max_packets_per_refill: default_max_packets_per_refill(),
            command_queue_capacity: default_command_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            initial_volume: default_initial_volume(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

impl StreamingConfig {
    /// Create a configuration optimized for low latency.
    ///
    /// - Smaller buffer (150 ms)
    /// - Early refills (70% threshold)
    /// - Short refill passes and polling
    pub fn low_latency() -> Self {
        Self {
            buffer_duration_ms: 150,
            low_water_ratio: 0.7,
            max_packets_per_refill: 16,
            poll_interval_ms: 2,
            ..Default::default()
        }
    }

    /// Create a configuration optimized for stability.
    ///
    /// - Larger buffer (2 s)
    /// - Conservative refills (30% threshold)
    /// - Longer refill passes
    pub fn high_quality() -> Self {
        Self {
            buffer_duration_ms: 2000,
            low_water_ratio: 0.3,
            max_packets_per_refill: 256,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_duration_ms == 0 {
            return Err("buffer_duration_ms must be > 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.low_water_ratio) {
            return Err("low_water_ratio must be between 0.0 and 1.0".to_string());
        }

        if self.max_packets_per_refill == 0 {
            return Err("max_packets_per_refill must be > 0".to_string());
        }

        if self.command_queue_capacity == 0 {
            return Err("command_queue_capacity must be > 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err("initial_volume must be between 0.0 and 1.0".to_string());
        }

        if self.max_consecutive_errors == 0 {
            return Err("max_consecutive_errors must be > 0".to_string());
        }

        Ok(())
    }

    /// Ring buffer capacity in frames for a given sample rate.
    pub fn buffer_frames(&self, sample_rate: u32) -> usize {
        let frames = u64::from(self.buffer_duration_ms) * u64::from(sample_rate) / 1000;
        (frames as usize).max(1)
    }

    /// Ring buffer capacity in samples for a given sample rate and channel count.
    pub fn buffer_samples(&self, sample_rate: u32, channels: u16) -> usize {
        self.buffer_frames(sample_rate) * channels as usize
    }

    /// Occupancy in frames below which a refill is due.
    pub fn low_water_frames(&self, capacity_frames: usize) -> usize {
        (capacity_frames as f32 * self.low_water_ratio) as usize
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_buffer_duration_ms() -> u32 {
    500
}

fn default_low_water_ratio() -> f32 {
    0.5 // 50%
}

fn default_max_packets_per_refill() -> usize {
    64
}

fn default_command_queue_capacity() -> usize {
    32
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_initial_volume() -> f32 {
    1.0
}

fn default_max_consecutive_errors() -> u32 {
    10
}
