//! Protocol implementations.

pub mod bytes;
pub mod command;
pub mod sentence;

// Re-export common types
pub use sentence::{Frame, LineAssembler, decode_line, encode, xor_checksum_bytes, xor_checksum_str};
