//! Closure wrapping for the Lua backend.
//!
//! The crate does not implement a real Redis connection; what it owns is
//! the narrow boundary a connection plugs into. [`RedisTextSink`] is that
//! boundary: "send this script text with these `KEYS`/`ARGV` and give me
//! back a decoded value." [`LuaClosure`] is this backend's equivalent of a
//! compiled, invocable script — it captures a compiled [`LuaScript`] and a
//! sink, and exposes the same `(keys_map, args_map) -> Value` invocation
//! contract [`crate::memory::runtime::LocalRuntime::invoke`] does for the
//! memory backend, so a caller can hold a `Box<dyn Fn(...)>`-style handle
//! without caring which backend produced it.

use std::collections::HashMap;

use crate::error::{Error, RuntimeError, ServerError};
use crate::lua::emit::LuaScript;
use crate::value::Value;

/// The external collaborator a real deployment plugs in: something that can
/// send Lua text to a Redis-compatible server and decode its reply.
/// Implemented here only by [`NullSink`] (for tests); a real client crate
/// supplies its own.
pub trait RedisTextSink {
    /// Applies this sink's configured key prefix to a caller-supplied key
    /// name, mirroring the source's `with_prefix` on the connection pool.
    fn with_prefix(&self, key: &str) -> String {
        key.to_string()
    }

    /// Sends `script` for evaluation with the given positional `KEYS`
    /// (already prefixed) and `ARGV` (already JSON-encoded), returning the
    /// decoded reply. A reply equal to the two-byte empty-table marker is
    /// the sink's own concern to normalise or not — [`LuaClosure::invoke`]
    /// performs the empty-collection-to-null substitution again on the
    /// typed result regardless, so a sink that already does so is
    /// redundant but not wrong.
    fn eval(&self, script: &LuaScript, keys: &[String], argv: &[String]) -> Result<Value, ServerError>;
}

/// A compiled Lua script bound to a sink, ready to be invoked by named
/// key/arg maps any number of times.
pub struct LuaClosure<'a> {
    script: LuaScript,
    sink: &'a dyn RedisTextSink,
}

impl<'a> LuaClosure<'a> {
    pub fn new(script: LuaScript, sink: &'a dyn RedisTextSink) -> Self {
        LuaClosure { script, sink }
    }

    pub fn script(&self) -> &LuaScript {
        &self.script
    }

    /// Resolves `keys`/`args` against the script's declared `KEYV`/`ARGV`
    /// order, sends the script to the sink, and normalises an
    /// empty-collection reply to `Value::Null` at the boundary, mirroring
    /// the memory backend's identical normalisation in
    /// [`crate::memory::compiler::CompiledScript::invoke`].
    pub fn invoke(&self, keys: &HashMap<String, String>, args: &HashMap<String, Value>) -> Result<Value, Error> {
        let keyv: Vec<String> = self
            .script
            .keyv
            .iter()
            .map(|name| {
                keys.get(name)
                    .map(|k| self.sink.with_prefix(k))
                    .ok_or_else(|| RuntimeError::MissingBinding(name.clone()))
            })
            .collect::<Result<_, RuntimeError>>()?;
        let argv: Vec<String> = self
            .script
            .argv
            .iter()
            .map(|name| {
                args.get(name)
                    .map(Value::to_json_string)
                    .ok_or_else(|| RuntimeError::MissingBinding(name.clone()))
            })
            .collect::<Result<_, RuntimeError>>()?;
        let result = self.sink.eval(&self.script, &keyv, &argv)?;
        Ok(if result.is_empty_collection() { Value::Null } else { result })
    }
}

/// Re-parses the `--[[ KEYV ... ]]`/`--[[ ARGV ... ]]` header bands
/// [`crate::lua::emit::compile_script`] emits back into their ordered name
/// vectors. Returns `None` if either band is missing or malformed — a
/// caller that only ever invokes scripts this crate compiled should never
/// see that, but hand-edited or foreign script text might lack them.
pub fn parse_headers(text: &str) -> Option<(Vec<String>, Vec<String>)> {
    let keyv = parse_band(text, "KEYV")?;
    let argv = parse_band(text, "ARGV")?;
    Some((keyv, argv))
}

fn parse_band(text: &str, tag: &str) -> Option<Vec<String>> {
    let prefix = format!("--[[ {tag} ");
    let line = text.lines().find(|l| l.starts_with(&prefix))?;
    let rest = line.strip_prefix(&prefix)?;
    let inner = rest.strip_suffix(" ]]")?;
    Some(inner.split_whitespace().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::core::{lit, Sym, Variable};
    use crate::builder::ScriptBuilder;
    use crate::lua::emit::compile_script;
    use std::cell::RefCell;

    struct RecordingSink {
        prefix: String,
        last_call: RefCell<Option<(Vec<String>, Vec<String>)>>,
        reply: Value,
    }

    impl RedisTextSink for RecordingSink {
        fn with_prefix(&self, key: &str) -> String {
            format!("{}{key}", self.prefix)
        }

        fn eval(&self, _script: &LuaScript, keys: &[String], argv: &[String]) -> Result<Value, ServerError> {
            *self.last_call.borrow_mut() = Some((keys.to_vec(), argv.to_vec()));
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn parse_headers_round_trips_compiled_script_text() {
        let mut sb = ScriptBuilder::new();
        sb.add_key("target").unwrap();
        sb.add_arg("amount").unwrap();
        let script = sb.compile().unwrap();
        let lua = compile_script(&script).unwrap();
        let (keyv, argv) = parse_headers(&lua.text).unwrap();
        assert_eq!(keyv, vec!["target".to_string()]);
        assert_eq!(argv, vec!["amount".to_string()]);
    }

    #[test]
    fn parse_headers_handles_scripts_with_no_keys_or_args() {
        let sb = ScriptBuilder::new();
        sb.set_return_value(Some(lit(1_i64)));
        let script = sb.compile().unwrap();
        let lua = compile_script(&script).unwrap();
        let (keyv, argv) = parse_headers(&lua.text).unwrap();
        assert!(keyv.is_empty());
        assert!(argv.is_empty());
    }

    #[test]
    fn invoke_prefixes_keys_and_json_encodes_args_in_declared_order() {
        let mut sb = ScriptBuilder::new();
        let key = sb.add_key("target").unwrap();
        let amount = sb.add_arg("amount").unwrap();
        sb.set_return_value(Some(Sym::concat(vec![key.sym(), amount.sym()])));
        let script = sb.compile().unwrap();
        let lua = compile_script(&script).unwrap();

        let sink = RecordingSink {
            prefix: "app:".to_string(),
            last_call: RefCell::new(None),
            reply: Value::Str("ok".to_string()),
        };
        let closure = LuaClosure::new(lua, &sink);
        let mut keys = HashMap::new();
        keys.insert("target".to_string(), "counter".to_string());
        let mut args = HashMap::new();
        args.insert("amount".to_string(), Value::Int(3));

        let result = closure.invoke(&keys, &args).unwrap();
        assert_eq!(result, Value::Str("ok".to_string()));
        let (seen_keys, seen_argv) = sink.last_call.borrow().clone().unwrap();
        assert_eq!(seen_keys, vec!["app:counter".to_string()]);
        assert_eq!(seen_argv, vec!["3".to_string()]);
    }

    #[test]
    fn invoke_normalises_an_empty_list_reply_to_null() {
        let mut sb = ScriptBuilder::new();
        let key = sb.add_key("k").unwrap();
        sb.set_return_value(Some(key.sym()));
        let script = sb.compile().unwrap();
        let lua = compile_script(&script).unwrap();
        let sink = RecordingSink {
            prefix: String::new(),
            last_call: RefCell::new(None),
            reply: Value::List(Vec::new()),
        };
        let closure = LuaClosure::new(lua, &sink);
        let mut keys = HashMap::new();
        keys.insert("k".to_string(), "k".to_string());
        let result = closure.invoke(&keys, &HashMap::new()).unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn invoke_reports_a_missing_binding_for_an_unresolved_key() {
        let mut sb = ScriptBuilder::new();
        let key = sb.add_key("k").unwrap();
        sb.set_return_value(Some(key.sym()));
        let script = sb.compile().unwrap();
        let lua = compile_script(&script).unwrap();
        let sink = RecordingSink {
            prefix: String::new(),
            last_call: RefCell::new(None),
            reply: Value::Null,
        };
        let closure = LuaClosure::new(lua, &sink);
        let err = closure.invoke(&HashMap::new(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::MissingBinding(_))));
    }
}
