//! redipy-rs
//!
//! A symbolic scripting DSL that compiles to either Lua source text (for a
//! real Redis-compatible server, reached over a connection this crate does
//! not implement) or to native Rust closures running against an in-process
//! key-value store.
//!
//! The three layers are:
//!
//! - [`builder`]: the fluent API an embedder uses to construct a script.
//! - [`ir`]: the immutable tree the builder produces.
//! - [`lua`] / [`memory`]: the two backends that translate an [`ir::Sequence`]
//!   into Lua text or an executable closure, respectively.
//!
//! [`value::Value`] is the JSON-like type carried across both backend
//! boundaries, and [`error`] collects the error families raised at each
//! stage (build, translate, run, pipeline misuse, remote server).

pub mod builder;
pub mod error;
pub mod ir;
pub mod lua;
pub mod memory;
pub mod value;

pub use builder::{lit, JsonArg, KeyVar, LocalVar, ScriptBuilder, Seq, Sym, Variable};
pub use error::{Error, Result};
pub use value::Value;
