//! # Ring Handoff
//!
//! Moves ring consumers between the decode thread and the audio callback
//! over two small `ringbuf` queues, so the callback never locks and never
//! frees ring storage.
//!
//! ```text
//!  decode thread                         audio callback
//!  RingSender ── installs: Option<FrameConsumer> ──▶ RingReceiver
//!             ◀── retired: FrameConsumer ──────────
//! ```
//!
//! An install of `None` releases the output's current ring. Every ring the
//! output lets go of travels back on the retired queue and is dropped by the
//! controller on its next step.

use crate::ring_buffer::FrameConsumer;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::trace;

/// Installs that may wait for the output.
const INSTALL_SLOTS: usize = 4;

/// Create the two ends of a handoff.
pub(crate) fn ring_handoff() -> (RingSender, RingReceiver) {
    let (installs_tx, installs_rx) = HeapRb::new(INSTALL_SLOTS).split();
    // The output holds one ring and can retire one per install
    let (retired_tx, retired_rx) = HeapRb::new(INSTALL_SLOTS + 1).split();
    (
        RingSender {
            installs: installs_tx,
            retired: retired_rx,
            backlog: None,
        },
        RingReceiver {
            installs: installs_rx,
            retired: retired_tx,
        },
    )
}

/// Decode-thread end.
pub(crate) struct RingSender {
    installs: HeapProd<Option<FrameConsumer>>,
    retired: HeapCons<FrameConsumer>,
    /// Latest install the queue had no room for
    backlog: Option<Option<FrameConsumer>>,
}

impl RingSender {
    /// Hand `ring` to the output, or release its ring with `None`.
    ///
    /// When the queue is full the install waits in a one-slot backlog; a
    /// newer install replaces it and the superseded ring is dropped here.
    pub(crate) fn send(&mut self, ring: Option<FrameConsumer>) {
        self.collect_retired();
        self.backlog = Some(ring);
        self.deliver_backlog();
    }

    /// Retry a waiting install and free rings the output has returned.
    pub(crate) fn service(&mut self) {
        self.collect_retired();
        self.deliver_backlog();
    }

    fn deliver_backlog(&mut self) {
        if let Some(install) = self.backlog.take() {
            if let Err(install) = self.installs.try_push(install) {
                self.backlog = Some(install);
            }
        }
    }

    fn collect_retired(&mut self) {
        let mut freed = 0;
        while let Some(ring) = self.retired.try_pop() {
            drop(ring);
            freed += 1;
        }
        if freed > 0 {
            trace!(freed, "Freed retired rings");
        }
    }
}

/// Audio-callback end.
pub(crate) struct RingReceiver {
    installs: HeapCons<Option<FrameConsumer>>,
    retired: HeapProd<FrameConsumer>,
}

impl RingReceiver {
    /// Swap in the newest install, returning replaced rings to the decode
    /// thread. Stops early rather than drop a ring here when the return
    /// queue is full.
    pub(crate) fn refresh(&mut self, current: &mut Option<FrameConsumer>) {
        while !self.installs.is_empty() {
            if current.is_some() && self.retired.is_full() {
                return;
            }
            let Some(next) = self.installs.try_pop() else {
                return;
            };
            if let Some(old) = std::mem::replace(current, next) {
                // Checked for room above and this is the only producer
                let _ = self.retired.try_push(old);
            }
        }
    }
}
