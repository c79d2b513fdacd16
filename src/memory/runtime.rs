//! [`LocalRuntime`]: owns the emulated store and the single lock every
//! script invocation, bare command, or pipeline commit serializes through.
//!
//! Mirrors `redipy.memory.rt.LocalRuntime`/`redipy.backend.runtime.Runtime`:
//! the source wraps its state in a reentrant lock so a script that issues
//! `redis.call` against the very store it's running against never
//! deadlocks against itself. `std::sync::ReentrantLock` is nightly-only, and
//! nothing in this crate's dependency stack supplies one (no `parking_lot`),
//! so the lock is reimplemented here as a same-thread reentrancy-depth
//! counter over the existing `Rc<RefCell<State>>` — every `Machine` method
//! already takes only short-lived `borrow_mut()`s that never span a nested
//! dispatch, so the counter's only job is to make "am I already inside a
//! call" observable, not to provide mutual exclusion std can't give us on a
//! single-threaded, `Rc`-based store. See `DESIGN.md`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, RuntimeError};
use crate::ir::Sequence;
use crate::memory::compiler::{compile_script, CompiledScript};
use crate::memory::pipeline::Pipeline;
use crate::memory::state::{Machine, State};
use crate::value::Value;

/// The in-process store plus the reentrancy guard scripts execute under.
pub struct LocalRuntime {
    state: Rc<RefCell<State>>,
    depth: Cell<usize>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        LocalRuntime { state: Rc::new(RefCell::new(State::new())), depth: Cell::new(0) }
    }

    /// A `Machine` over the root store, for bare (non-scripted) commands.
    pub fn machine(&self) -> Machine {
        Machine::new(Rc::clone(&self.state))
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(Rc::clone(&self.state))
    }

    pub fn compile(&self, script: &Sequence) -> Result<CompiledScript, Error> {
        Ok(compile_script(script)?)
    }

    /// Runs `f` under the reentrancy guard: entering while already inside
    /// another call just bumps the depth rather than blocking, since a
    /// script body and the `redis.call`s it issues run on the same call
    /// stack, on the same thread, over the same `Rc`.
    fn with_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        self.depth.set(self.depth.get() + 1);
        let result = f();
        self.depth.set(self.depth.get() - 1);
        result
    }

    pub fn lock_depth(&self) -> usize {
        self.depth.get()
    }

    /// Invokes a compiled script with caller-supplied key/arg maps, keyed
    /// by the readable names chosen at build time (`add_key`/`add_arg`).
    /// Mirrors `redipy.script.Script.__call__` resolving its `keys`/`args`
    /// dicts against the declared `keyv`/`argv` ordering before dispatch.
    pub fn invoke(
        &self,
        compiled: &CompiledScript,
        keys: &HashMap<String, String>,
        args: &HashMap<String, Value>,
    ) -> Result<Value, Error> {
        let keyv = resolve_ordered(&compiled.keyv_names, keys, |name| {
            RuntimeError::MissingBinding(name.to_string())
        })?;
        let argv = resolve_ordered(&compiled.argv_names, args, |name| {
            RuntimeError::MissingBinding(name.to_string())
        })?;
        let machine = self.machine();
        self.with_lock(|| compiled.invoke(&machine, &keyv, &argv)).map_err(Error::from)
    }
}

fn resolve_ordered<V: Clone>(
    names: &[String],
    provided: &HashMap<String, V>,
    missing: impl Fn(&str) -> RuntimeError,
) -> Result<Vec<V>, RuntimeError> {
    names.iter().map(|name| provided.get(name).cloned().ok_or_else(|| missing(name))).collect()
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ScriptBuilder;

    #[test]
    fn invoke_resolves_args_by_readable_name_not_slot_name() {
        let mut builder = ScriptBuilder::new();
        let by = builder.add_arg("by").unwrap();
        builder.set_return_value(Some(by.sym()));
        let script = builder.compile().unwrap();
        let compiled = compile_script(&script).unwrap();

        let runtime = LocalRuntime::new();
        let mut args = HashMap::new();
        args.insert("by".to_string(), Value::Int(7));
        let result = runtime.invoke(&compiled, &HashMap::new(), &args).unwrap();
        assert_eq!(result, Value::Int(7));
    }

    #[test]
    fn lock_depth_returns_to_zero_after_nested_script_invocation() {
        let runtime = LocalRuntime::new();
        runtime.with_lock(|| {
            assert_eq!(runtime.lock_depth(), 1);
            runtime.with_lock(|| {
                assert_eq!(runtime.lock_depth(), 2);
            });
        });
        assert_eq!(runtime.lock_depth(), 0);
    }

    #[test]
    fn pipeline_commits_into_the_same_store_bare_commands_see() {
        let runtime = LocalRuntime::new();
        let mut pipe = runtime.pipeline();
        pipe.set("k", "v", crate::memory::state::SetMode::Always, false);
        pipe.execute().unwrap();
        pipe.commit().unwrap();
        assert_eq!(runtime.machine().get("k").unwrap(), Some("v".to_string()));
    }
}
