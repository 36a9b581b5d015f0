use crate::error::{Error, Result};
use crate::types::SBN_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Settings for the frame queue and sequencer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestConfig {
	/// Capacity of the frame queue in payload bytes.
	pub queue_capacity_bytes: usize,
	/// Failsafe timeout, in milliseconds, before the sequencer releases a
	/// buffered frame out of order. Raising it lowers the risk of gaps but
	/// increases latency when they occur.
	pub sequence_timeout_ms: u64,
}

impl Default for IngestConfig {
	fn default() -> Self {
		// Room for 800 maximum-size broadcast frames.
		Self { queue_capacity_bytes: 800 * SBN_FRAME_SIZE, sequence_timeout_ms: 1000 }
	}
}

impl IngestConfig {
	pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
		let data = fs::read_to_string(path)?;
		let cfg: Self = toml::from_str(&data).map_err(|e| Error::config(format!("toml parse error: {e}")))?;
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn from_env() -> Result<Self> {
		let mut cfg = Self::default();
		if let Ok(v) = std::env::var("SBN_QUEUE_CAPACITY") {
			cfg.queue_capacity_bytes = v
				.parse()
				.map_err(|_| Error::config(format!("invalid SBN_QUEUE_CAPACITY: {v}")))?;
		}
		if let Ok(v) = std::env::var("SBN_SEQUENCE_TIMEOUT_MS") {
			cfg.sequence_timeout_ms = v
				.parse()
				.map_err(|_| Error::config(format!("invalid SBN_SEQUENCE_TIMEOUT_MS: {v}")))?;
		}
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn validate(&self) -> Result<()> {
		if self.queue_capacity_bytes == 0 {
			return Err(Error::config("queue_capacity_bytes must be nonzero"));
		}
		if self.sequence_timeout_ms == 0 {
			return Err(Error::config("sequence_timeout_ms must be nonzero"));
		}
		Ok(())
	}

	/// Failsafe timeout as a [`Duration`].
	pub fn sequence_timeout(&self) -> Duration {
		Duration::from_millis(self.sequence_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn defaults_are_valid() {
		let cfg = IngestConfig::default();
		assert!(cfg.validate().is_ok());
		assert_eq!(cfg.sequence_timeout(), Duration::from_millis(1000));
	}

	#[test]
	fn default_capacity_holds_whole_frames() {
		let cfg = IngestConfig::default();
		assert_eq!(cfg.queue_capacity_bytes % SBN_FRAME_SIZE, 0);
		assert!(cfg.queue_capacity_bytes / SBN_FRAME_SIZE >= 100);
	}

	#[test]
	fn rejects_zero_capacity() {
		let cfg = IngestConfig { queue_capacity_bytes: 0, ..Default::default() };
		assert!(cfg.validate().is_err());
	}

	#[test]
	fn rejects_zero_timeout() {
		let cfg = IngestConfig { sequence_timeout_ms: 0, ..Default::default() };
		assert!(cfg.validate().is_err());
	}

	#[test]
	fn loads_from_toml_file() {
		let mut file = tempfile::NamedTempFile::new().expect("temp file");
		writeln!(file, "queue_capacity_bytes = 65536\nsequence_timeout_ms = 250").expect("write");
		let cfg = IngestConfig::load_from_file(file.path()).expect("load");
		assert_eq!(cfg.queue_capacity_bytes, 65536);
		assert_eq!(cfg.sequence_timeout_ms, 250);
	}

	#[test]
	fn rejects_invalid_toml_file() {
		let mut file = tempfile::NamedTempFile::new().expect("temp file");
		writeln!(file, "queue_capacity_bytes = \"lots\"").expect("write");
		assert!(IngestConfig::load_from_file(file.path()).is_err());
	}
}
