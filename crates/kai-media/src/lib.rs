//! Media handling for a relayed call: audio payload codec and playback tracking.

pub mod codec;
pub mod playback;

pub use codec::{AudioFormat, CodecError};
pub use playback::{PlaybackTracker, Truncation};
