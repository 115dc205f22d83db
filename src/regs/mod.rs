//! Bit-level encodings passed to the hardware interface.

mod adma;

pub use adma::{ChannelMask, AsyncFlags};
