#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors returned by [`crate::FrameQueue`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The frame cannot fit even an empty queue.
    #[error("frame of {0} bytes exceeds queue capacity")]
    TooBig(usize),
    /// Insufficient contiguous space right now (non-blocking reserve only).
    #[error("no space available for frame")]
    NoSpace,
    /// The queue is shut down for input.
    #[error("queue is shut down")]
    Shutdown,
    /// More bytes released than were reserved; the producer is misbehaving.
    #[error("released {released} bytes but reserved {reserved}")]
    Unreserved { released: usize, reserved: usize },
}

/// Errors returned by [`crate::Sequencer`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SequenceError {
    /// Two admissions computed the same failsafe deadline. The clock does not
    /// have enough resolution for the configured timeout.
    #[error("clock resolution insufficient to keep frame deadlines unique")]
    ClockResolution,
    /// The sequencer is shut down and holds no more frames.
    #[error("sequencer is shut down")]
    Shutdown,
}
