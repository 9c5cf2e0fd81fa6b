//! Progress reporting hooks.
//!
//! The core never prints; long-running operations report through this trait
//! and the CLI decides how to render it.

/// Receives progress events from the high-level programmer.
pub trait Progress {
    /// A new phase starts, covering `total` bytes.
    fn begin(&mut self, phase: &str, total: u64);

    /// `position` bytes of the current phase are done.
    fn advance(&mut self, position: u64);

    /// The current phase finished.
    fn finish(&mut self);
}

/// Discards all progress events.
pub struct NoProgress;

impl Progress for NoProgress {
    fn begin(&mut self, _phase: &str, _total: u64) {}

    fn advance(&mut self, _position: u64) {}

    fn finish(&mut self) {}
}
