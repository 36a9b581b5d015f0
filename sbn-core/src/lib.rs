#![forbid(unsafe_code)]
//! SBN ingest core utilities: shared types, configuration, and error handling.

pub mod config;
pub mod error;
pub mod types;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use types::{FrameId, SequenceKey, SBN_FRAME_SIZE};
