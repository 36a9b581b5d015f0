use core::fmt;

/// Largest payload of a single broadcast frame in bytes.
pub const SBN_FRAME_SIZE: usize = 5000;

/// Totally ordered frame identifier with a defined successor.
///
/// The sequencer relies on `next()` to compute the key it expects after a
/// delivered frame. `next()` must produce the immediately following key; for
/// integer keys that is a wrapping increment.
pub trait SequenceKey: Ord + Clone + fmt::Debug {
	/// Returns the key that immediately follows this one.
	fn next(&self) -> Self;
}

macro_rules! impl_sequence_key {
	($($t:ty),*) => {
		$(impl SequenceKey for $t {
			fn next(&self) -> Self { self.wrapping_add(1) }
		})*
	};
}

impl_sequence_key!(u8, u16, u32, u64, u128, usize);

/// Run/sequence pair identifying a frame within a broadcast channel.
///
/// The run number increments whenever the uplink restarts its sequence
/// numbering; ordering is run-major so a new run sorts after every frame of
/// the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameId {
	pub run: u32,
	pub seq: u32,
}

impl FrameId {
	pub fn new(run: u32, seq: u32) -> Self {
		Self { run, seq }
	}
}

impl SequenceKey for FrameId {
	fn next(&self) -> Self {
		Self { run: self.run, seq: self.seq.wrapping_add(1) }
	}
}

impl fmt::Display for FrameId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.run, self.seq)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn integer_keys_advance() {
		assert_eq!(7u32.next(), 8);
		assert_eq!(u64::MAX.next(), 0);
	}

	#[test]
	fn frame_id_orders_run_major() {
		let a = FrameId::new(1, 900);
		let b = FrameId::new(2, 0);
		assert!(a < b);
		assert_eq!(a.next(), FrameId::new(1, 901));
	}
}
