#![forbid(unsafe_code)]
//! SBN ingest stream layer.
//!
//! Two components sit between the broadcast receive thread and the decoder:
//!
//! - [`FrameQueue`]: a bounded ring of variable-length frames decoupling the
//!   receive thread from the consumer thread. Space is claimed with a
//!   two-phase reserve/release protocol and drained with peek/remove.
//! - [`Sequencer`]: a reordering buffer that admits frames keyed by a
//!   strictly ordered sequence key and hands them back in non-decreasing key
//!   order, releasing the oldest frame once its failsafe timeout elapses so a
//!   permanently lost frame can never stall the feed.

pub mod errors;
pub mod frame_queue;
pub mod sequencer;

pub use errors::{QueueError, SequenceError};
pub use frame_queue::FrameQueue;
pub use sequencer::Sequencer;
