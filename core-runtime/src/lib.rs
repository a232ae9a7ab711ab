//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the playback crates:
//! - Logging and tracing bootstrap
//! - Named worker threads for decode tasks
//!
//! ## Overview
//!
//! Nothing in here knows about audio. The playback core depends on it for the
//! logging conventions and the way background work is started.

pub mod error;
pub mod logging;
pub mod worker;

pub use error::{Error, Result};
