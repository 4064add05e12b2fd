//! Bytecode model shared by the loader and the execution engine.
//!
//! This crate defines:
//! - Bytecode [`OpCode`] definitions
//! - [`Proto`], the immutable compiled function unit, and its [`Constant`] pool
//! - [`CompileError`] and the [`Compile`] trait, the boundary through which a
//!   host plugs a source compiler into the runtime

pub mod error;
pub mod opcode;
pub mod proto;

pub use error::CompileError;
pub use opcode::{OpCode, MULTI};
pub use proto::{Constant, Proto, UpvalueDesc};

/// Turns chunk bytes into a prototype.
///
/// The runtime never parses source itself; hosts install an implementation.
pub trait Compile: Send + Sync {
    fn compile(&self, source: &[u8], chunk_name: &str) -> Result<Proto, CompileError>;
}

impl<F> Compile for F
where
    F: Fn(&[u8], &str) -> Result<Proto, CompileError> + Send + Sync,
{
    fn compile(&self, source: &[u8], chunk_name: &str) -> Result<Proto, CompileError> {
        self(source, chunk_name)
    }
}
