//! The Lua (server-script) backend: pretty-prints an [`crate::ir::Sequence`]
//! into Lua source text preserving the real scripting bridge's observable
//! semantics.
//!
//! - [`emit`]: the single-pass pretty-printer ([`emit::compile_script`])
//!   and its output type, [`emit::LuaScript`] — the emitted text plus the
//!   declared key/arg name order a caller resolves positional vectors
//!   against.
//! - [`patches`]: the adjustment-patch table consulted while emitting a
//!   `redis.call`/general-function invocation, and the synthesized helper
//!   function sources a patch may pull in.
//! - [`closure`]: re-parses a script's `KEYV`/`ARGV` header comment bands
//!   and wraps an external [`closure::RedisTextSink`] connection into the
//!   same `(keys, args) -> Value` closure contract the memory backend
//!   exposes, so callers don't need to care which backend produced a given
//!   [`crate::error::Error`]-returning invocation.

pub mod closure;
pub mod emit;
pub mod patches;

pub use closure::{parse_headers, LuaClosure, RedisTextSink};
pub use emit::{compile_script, LuaScript};

/// A small context window (up to 2 lines either side) around `line` in
/// `script`, 1-indexed to match the line numbers a real server reports in
/// its error replies. Used by [`crate::error::ServerError::new`] to
/// annotate a server error with the offending snippet of emitted text; the
/// crate does not implement the connection that would produce the error
/// itself, only this formatting helper.
pub fn annotate_snippet(script: &str, line: usize) -> String {
    let lines: Vec<&str> = script.lines().collect();
    if lines.is_empty() || line == 0 {
        return String::new();
    }
    let start = line.saturating_sub(3);
    let end = (line + 2).min(lines.len());
    let mut out = String::new();
    for (ix, text) in lines.iter().enumerate().take(end).skip(start) {
        let lineno = ix + 1;
        let marker = if lineno == line { ">>" } else { "  " };
        out.push_str(&format!("{marker} {lineno:>4}: {text}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate_snippet_marks_the_offending_line() {
        let script = "local a = 1\nlocal b = 2\nerror(a)\nreturn a\n";
        let snippet = annotate_snippet(script, 3);
        assert!(snippet.contains(">>    3: error(a)"));
        assert!(snippet.contains("local a = 1"));
    }

    #[test]
    fn annotate_snippet_handles_out_of_range_gracefully() {
        assert_eq!(annotate_snippet("local a = 1\n", 0), "");
    }
}
