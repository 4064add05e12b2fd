//! Assembling prototypes and the binary chunk format.
//!
//! - [`ProtoBuilder`] builds a [`Proto`](lua_core::Proto) instruction by instruction
//! - [`dump`] / [`undump`] convert prototype trees to and from bytes
//! - [`is_binary`] tells a binary chunk apart from source text

pub mod builder;
pub mod dump;
pub mod undump;

pub use builder::ProtoBuilder;
pub use dump::dump;
pub use undump::undump;

/// Leading bytes of every binary chunk. The escape byte can never start
/// valid source text.
pub const SIGNATURE: &[u8] = b"\x1bLuaR\x01";

/// Whether `bytes` starts like a binary chunk.
///
/// Only the escape byte and the name are checked so that chunks from a newer
/// format version are still routed to `undump`, which reports them properly.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.starts_with(&SIGNATURE[..5])
}
