//! Lumen transport: how step updates leave the denoising loop.

pub mod in_process;
pub mod sink;
pub mod wire;

pub use in_process::ChannelSink;
pub use sink::UpdateSink;
pub use wire::{decode_binary, decode_text, encode, Frame, WireFormat, WireUpdate};
