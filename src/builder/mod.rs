//! The symbolic builder: a fluent, host-language API for constructing IR
//! without hand-assembling [`crate::ir`] nodes directly.
//!
//! Typical usage:
//!
//! ```ignore
//! let mut sb = ScriptBuilder::new();
//! let key = sb.add_key("counter")?;
//! let by = sb.add_arg("by")?;
//! let current = sb.add_local(Sym::call("redis.call", vec![lit("get"), key.sym()]));
//! sb.add_cmd(current.assign(current.sym().add(by.sym())));
//! sb.add(Sym::call("redis.call", vec![lit("set"), key.sym(), current.sym()]));
//! let script = sb.compile()?;
//! ```

pub mod core;
pub mod seq;
pub mod validate;

pub use core::{lit, IndexVar, JsonArg, KeyVar, Lit, LocalVar, None_, Sym, Variable, ValueVar};
pub use seq::{ScriptBuilder, Seq};
