use thiserror::Error;

/// Convenience result alias for this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors produced outside the hot frame path: configuration and I/O glue.
#[derive(Debug, Error)]
pub enum Error {
	#[error("io: {0}")]
	Io(#[from] std::io::Error),
	#[error("config: {0}")]
	Config(String),
}

impl Error {
	pub fn config(msg: impl Into<String>) -> Self { Self::Config(msg.into()) }
}
