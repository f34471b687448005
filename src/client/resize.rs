//! Resize debouncing.

use std::time::Duration;

use tokio::time::Instant;

/// Collapses a burst of geometry changes into one, `delay` after the last.
#[derive(Debug, Clone)]
pub struct ResizeDebouncer {
    delay: Duration,
    pending: Option<(u16, u16)>,
    deadline: Option<Instant>,
    current: Option<(u16, u16)>,
}

impl ResizeDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            deadline: None,
            current: None,
        }
    }

    /// Record a requested size. Zero dimensions are ignored.
    ///
    /// Each request pushes the deadline back.
    pub fn request(&mut self, cols: u16, rows: u16, now: Instant) {
        if cols == 0 || rows == 0 {
            return;
        }
        self.pending = Some((cols, rows));
        self.deadline = Some(now + self.delay);
    }

    /// When the pending size settles, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The settled size, once its deadline has passed.
    ///
    /// Returns `None` if nothing is due or the size did not change.
    pub fn take_ready(&mut self, now: Instant) -> Option<(u16, u16)> {
        match self.deadline {
            Some(deadline) if deadline <= now => {}
            _ => return None,
        }
        self.deadline = None;
        let size = self.pending.take()?;
        if self.current == Some(size) {
            return None;
        }
        self.current = Some(size);
        Some(size)
    }

    /// Last size handed out by [`take_ready`](Self::take_ready).
    pub fn current(&self) -> Option<(u16, u16)> {
        self.current
    }
}
