//! The in-memory backend: compiles [`crate::ir::Sequence`] into closures
//! and executes them against an emulated Redis-command store.
//!
//! - [`state`]: the layered key-value store ([`state::State`]) and the
//!   command surface over it ([`state::Machine`]).
//! - [`registry`]: argument-count-checked dispatch tables for general
//!   functions and Redis commands.
//! - [`compiler`]: the single-pass IR-to-closure translation.
//! - [`runtime`]: [`runtime::LocalRuntime`], the owner of the store and the
//!   lock every script/command execution serializes through.
//! - [`pipeline`]: buffered, atomically-committed command queuing.

pub mod compiler;
pub mod pipeline;
pub mod registry;
pub mod runtime;
pub mod state;

pub use compiler::{compile_script, CompiledScript};
pub use pipeline::Pipeline;
pub use runtime::LocalRuntime;
pub use state::{Machine, SetMode, State};
