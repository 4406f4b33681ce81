//! The cross-core frame-ready notification. A level flag, not a queue:
//! signals raised before the consumer wakes collapse into a single wake-up.

use core::sync::atomic::{AtomicBool, Ordering};

pub struct FrameSignal {
    raised: AtomicBool,
}

impl FrameSignal {
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Sets the level flag. Returns whether the flag was newly raised, so
    /// the caller can skip redundant cross-core wake-ups. Never blocks.
    pub fn raise(&self) -> bool {
        !self.raised.swap(true, Ordering::AcqRel)
    }

    /// Consumes and clears the flag. Called only by the presentation task.
    pub fn consume(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
