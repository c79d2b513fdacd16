//! Adjustment patches: per-command and per-function rewrites consulted
//! while emitting a `Call` node, to compensate for the real scripting
//! bridge's `nil`-vs-`false`-vs-empty-table quirks. Mirrors
//! the shape of [`crate::memory::registry`]'s `lazy_static` dispatch
//! tables, one level up: instead of executing a command, these tables
//! decide how its *emitted Lua text* should be rewritten.
//!
//! Two tables, matching the two places a [`crate::ir::Expr::Call`] can
//! come from:
//! - [`redis_patch_action`] — keyed by the Redis command name inside a
//!   `redis.call`/`redis.pcall` invocation.
//! - general functions (`string.find`, `asintstr`) are patched directly in
//!   [`crate::lua::emit`], since both need only a single wrap/no-op
//!   decision and don't carry the `set`-style "unless GET" exception.
//!
//! Every helper a patch can pull in is listed once in [`HELPERS`]; the
//! emitter only emits a helper's source into the `-- HELPERS START/END --`
//! band when a patch actually referenced it (tracked in a `BTreeSet` for
//! deterministic, alphabetical emission order — Property 2 requires the
//! same IR to always produce the same text).

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::ir::Expr;

/// A synthesized Lua helper function a patch may reference. Plain top-level
/// `local function`s, not table members — `helpers.foo(...)`-style naming
/// would describe where the function lives conceptually (the helpers
/// band), not a Lua table this crate would otherwise have no reason to
/// construct.
pub struct HelperFunction {
    pub name: &'static str,
    pub source: &'static str,
}

lazy_static! {
    pub static ref HELPERS: HashMap<&'static str, HelperFunction> = {
        let mut m = HashMap::new();
        m.insert(
            "pairlist_scores",
            HelperFunction {
                name: "pairlist_scores",
                source: "local function pairlist_scores(flat)\n  \
                          local out = {}\n  \
                          for i = 1, #flat, 2 do\n    \
                          table.insert(out, {flat[i], tonumber(flat[i + 1])})\n  \
                          end\n  \
                          return out\n\
                          end\n",
            },
        );
        m.insert(
            "pairlist_dict",
            HelperFunction {
                name: "pairlist_dict",
                source: "local function pairlist_dict(flat)\n  \
                          local out = {}\n  \
                          for i = 1, #flat, 2 do\n    \
                          out[flat[i]] = flat[i + 1]\n  \
                          end\n  \
                          return out\n\
                          end\n",
            },
        );
        m.insert(
            "nil_or_index",
            HelperFunction {
                name: "nil_or_index",
                source: "local function nil_or_index(idx)\n  \
                          if idx == false or idx == nil then\n    \
                          return nil\n  \
                          end\n  \
                          return idx - 1\n\
                          end\n",
            },
        );
        m.insert(
            "pairlist_hmget",
            HelperFunction {
                name: "pairlist_hmget",
                source: "local function pairlist_hmget(flat, fields)\n  \
                          local out = {}\n  \
                          for i = 1, #fields do\n    \
                          local v = flat[i]\n    \
                          if v == false or v == nil then\n      \
                          out[fields[i]] = cjson.null\n    \
                          else\n      \
                          out[fields[i]] = v\n    \
                          end\n  \
                          end\n  \
                          return out\n\
                          end\n",
            },
        );
        m.insert(
            "asintstr",
            HelperFunction {
                name: "asintstr",
                source: "local function asintstr(value)\n  \
                          return tostring(math.floor(tonumber(value)))\n\
                          end\n",
            },
        );
        m
    };
}

/// The rewrite a `redis.call`/`redis.pcall` invocation of a given command
/// name gets, before statement-context and `GET`-option exceptions are
/// applied by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisPatchAction {
    /// The call is emitted exactly as built.
    NoPatch,
    /// `expr or nil`, skipped when the call is used as a bare statement.
    OrNilUnlessStmt,
    /// `expr ~= false`, skipped when used as a statement or when the call
    /// requests `GET` (whose return is the previous value or null, not a
    /// boolean).
    NeFalseUnlessStmtOrGet,
    /// Wrap the whole call in the named helper.
    WrapHelper(&'static str),
    /// Wrap the call in the named helper, passing the command's own
    /// trailing arguments (everything after the key) along as a second,
    /// literal-table argument. For commands like `hmget` whose reply is a
    /// positional array that can only be paired back up with the field
    /// names the call itself was made with.
    WrapHelperWithArgs(&'static str),
    /// Rewrite the command-name literal (first argument) to the named
    /// float-returning variant; no wrapping.
    RenameTo(&'static str),
}

pub fn redis_patch_action(cmd_name: &str) -> RedisPatchAction {
    match cmd_name {
        "get" | "lpop" | "rpop" | "hget" => RedisPatchAction::OrNilUnlessStmt,
        "set" => RedisPatchAction::NeFalseUnlessStmtOrGet,
        "zpopmax" | "zpopmin" => RedisPatchAction::WrapHelper("pairlist_scores"),
        "hgetall" => RedisPatchAction::WrapHelper("pairlist_dict"),
        "hmget" => RedisPatchAction::WrapHelperWithArgs("pairlist_hmget"),
        "incrby" => RedisPatchAction::RenameTo("incrbyfloat"),
        "hincrby" => RedisPatchAction::RenameTo("hincrbyfloat"),
        _ => RedisPatchAction::NoPatch,
    }
}

/// Whether `set`'s own option arguments (everything after key/value)
/// include a literal `"GET"`, case-insensitively — the one `set` variant
/// the `~= false` normalisation does not apply to.
pub fn set_requests_get(args: &[Expr]) -> bool {
    args.iter().skip(2).any(|a| {
        matches!(
            a.as_literal(),
            Some((v, _)) if v.as_str().map(|s| s.eq_ignore_ascii_case("GET")).unwrap_or(false)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_wrap_helper_action_has_a_registered_helper() {
        for cmd in ["zpopmax", "zpopmin", "hgetall", "hmget"] {
            match redis_patch_action(cmd) {
                RedisPatchAction::WrapHelper(name) | RedisPatchAction::WrapHelperWithArgs(name) => {
                    assert!(HELPERS.contains_key(name), "missing helper source for {name}");
                }
                _ => panic!("expected {cmd} to wrap a helper"),
            }
        }
    }

    #[test]
    fn unknown_command_gets_no_patch() {
        assert_eq!(redis_patch_action("llen"), RedisPatchAction::NoPatch);
    }
}
