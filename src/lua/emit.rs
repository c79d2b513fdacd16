//! Single-pass pretty-printer: [`compile_script`] walks an
//! [`ir::Sequence::Script`] once and produces Lua source text, threading an
//! [`Emitter`] that accumulates the set of helper functions any adjustment
//! patch along the way pulled in.
//!
//! Emission rules mirror a single-pass tree-to-text translator (see
//! [`crate::memory::compiler`] for the tree-to-closure sibling): every
//! [`ir::Command`]/[`ir::Expr`] variant has
//! exactly one emission rule, indentation is tracked by an explicit depth
//! rather than a visitor stack, and nothing here executes a script — the
//! text is inert until a [`crate::lua::closure::RedisTextSink`] sends it to
//! a real server.

use std::collections::BTreeSet;

use crate::error::CompileError;
use crate::ir::{BinOp, Command, Expr, RefId, Sequence};
use crate::lua::patches::{self, RedisPatchAction};
use crate::value::Value;

/// The emitted Lua text plus the declared key/arg name order, used by
/// [`crate::lua::closure::LuaClosure`] to build `KEYS`/`ARGV` vectors in
/// the order the text's `--[[ KEYV ... ]]`/`--[[ ARGV ... ]]` bands
/// declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuaScript {
    pub text: String,
    pub keyv: Vec<String>,
    pub argv: Vec<String>,
}

impl LuaScript {
    /// Hex-encoded SHA1 of the emitted text, for `SCRIPT LOAD`/`EVALSHA`
    /// style caching by a connection collaborator this crate does not
    /// implement. Property 2 (emission determinism) guarantees this is
    /// stable across repeated `compile_script` calls on the same IR.
    pub fn sha1_hex(&self) -> String {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Compiles a [`Sequence::Script`] into Lua source text.
pub fn compile_script(script: &Sequence) -> Result<LuaScript, CompileError> {
    let (cmds, argv, keyv) = match script {
        Sequence::Script { cmds, argv, keyv } => (cmds, argv, keyv),
        Sequence::Function { .. } => {
            return Err(CompileError::UnknownStmtKind("function sequences are not implemented".to_string()))
        }
        Sequence::Seq { .. } => {
            return Err(CompileError::UnknownStmtKind("compile_script expects a Script".to_string()))
        }
    };
    let mut emitter = Emitter::new();
    let body = emitter.emit_cmds(cmds, 0);

    let mut text = String::new();
    text.push_str(&format!("--[[ KEYV {} ]]\n", keyv.join(" ")));
    text.push_str(&format!("--[[ ARGV {} ]]\n", argv.join(" ")));
    if !emitter.helpers.is_empty() {
        text.push_str("-- HELPERS START --\n");
        for name in &emitter.helpers {
            let helper = patches::HELPERS.get(name).expect("every tracked helper name is registered");
            text.push_str(helper.source);
        }
        text.push_str("-- HELPERS END --\n");
    }
    text.push('\n');
    text.push_str(&body);

    Ok(LuaScript { text, keyv: keyv.clone(), argv: argv.clone() })
}

struct Emitter {
    helpers: BTreeSet<&'static str>,
}

impl Emitter {
    fn new() -> Self {
        Emitter { helpers: BTreeSet::new() }
    }

    fn emit_cmds(&mut self, cmds: &[Command], indent: usize) -> String {
        cmds.iter().map(|c| self.emit_cmd(c, indent)).collect()
    }

    fn emit_cmd(&mut self, cmd: &Command, indent: usize) -> String {
        let pad = indent_str(indent);
        match cmd {
            Command::Assign { target, value, is_declare } => {
                let rhs = self.emit_expr(value, false);
                let kw = if *is_declare { "local " } else { "" };
                format!("{pad}{kw}{} = {rhs}\n", target.name())
            }
            Command::AssignAt { target, index, value } => {
                let ix = self.emit_expr(index, false);
                let val = self.emit_expr(value, false);
                format!("{pad}{}[({ix}) + 1] = {val}\n", target.name())
            }
            Command::Stmt(expr) => format!("{pad}{}\n", self.emit_expr(expr, true)),
            Command::Branch { cond, then_seq, else_seq } => {
                let cond_s = self.emit_expr(cond, false);
                let mut s = format!("{pad}if {cond_s} then\n");
                s.push_str(&self.emit_cmds(then_seq.cmds(), indent + 1));
                if !else_seq.cmds().is_empty() {
                    s.push_str(&format!("{pad}else\n"));
                    s.push_str(&self.emit_cmds(else_seq.cmds(), indent + 1));
                }
                s.push_str(&format!("{pad}end\n"));
                s
            }
            Command::For { array, index_var, value_var, body } => {
                let arr_s = self.emit_expr(array, false);
                let mut s = format!("{pad}for __i, __v in ipairs({arr_s}) do\n");
                let inner = indent_str(indent + 1);
                s.push_str(&format!("{inner}local {} = __i - 1\n", index_var.name()));
                s.push_str(&format!("{inner}local {} = __v\n", value_var.name()));
                s.push_str(&self.emit_cmds(body.cmds(), indent + 1));
                s.push_str(&format!("{pad}end\n"));
                s
            }
            Command::While { cond, body } => {
                let cond_s = self.emit_expr(cond, false);
                let mut s = format!("{pad}while {cond_s} do\n");
                s.push_str(&self.emit_cmds(body.cmds(), indent + 1));
                s.push_str(&format!("{pad}end\n"));
                s
            }
            Command::Return(None) => format!("{pad}return\n"),
            Command::Return(Some(expr)) => {
                let e = self.emit_expr(expr, false);
                format!("{pad}return cjson.encode({e})\n")
            }
        }
    }

    /// `is_stmt` is true only for the direct expression of a `Stmt`
    /// command — a call used purely for its side effect skips the
    /// `or nil`/`~= false` wraps, since their return value is discarded
    /// anyway.
    fn emit_expr(&mut self, expr: &Expr, is_stmt: bool) -> String {
        match expr {
            Expr::Ref(refid) => refid.name().to_string(),
            Expr::LoadJsonArg { index } => format!("cjson.decode(ARGV[{}])", index + 1),
            Expr::LoadKeyArg { index } => format!("KEYS[{}]", index + 1),
            Expr::Val { value, vtype: _ } => emit_literal(value),
            Expr::Constant { raw } => raw.clone(),
            Expr::Not(inner) => format!("not ({})", self.emit_expr(inner, false)),
            Expr::Binary { op, left, right } => {
                format!("({}) {} ({})", self.emit_expr(left, false), binop_text(*op), self.emit_expr(right, false))
            }
            Expr::ArrayAt { array, index } => {
                format!("{}[({}) + 1]", ref_name(array), self.emit_expr(index, false))
            }
            Expr::ArrayLen { array } => format!("#{}", ref_name(array)),
            Expr::Concat(parts) => {
                if parts.is_empty() {
                    return "\"\"".to_string();
                }
                parts.iter().map(|p| format!("({})", self.emit_expr(p, false))).collect::<Vec<_>>().join(" .. ")
            }
            Expr::Call { name, args, no_adjust } => self.emit_call(name, args, *no_adjust, is_stmt),
        }
    }

    fn emit_call(&mut self, name: &str, args: &[Expr], no_adjust: bool, is_stmt: bool) -> String {
        let arg_strs: Vec<String> = args.iter().map(|a| self.emit_expr(a, false)).collect();
        let base = format!("{name}({})", arg_strs.join(", "));
        if no_adjust {
            return base;
        }
        if name == "redis.call" || name == "redis.pcall" {
            let cmd_literal =
                args.first().and_then(Expr::as_literal).and_then(|(v, _)| v.as_str().map(str::to_string));
            if let Some(cmd_name) = cmd_literal {
                return match patches::redis_patch_action(&cmd_name) {
                    RedisPatchAction::NoPatch => base,
                    RedisPatchAction::RenameTo(new_name) => {
                        let mut parts = arg_strs;
                        parts[0] = quote_lua_string(new_name);
                        format!("{name}({})", parts.join(", "))
                    }
                    RedisPatchAction::OrNilUnlessStmt => {
                        if is_stmt {
                            base
                        } else {
                            format!("({base}) or nil")
                        }
                    }
                    RedisPatchAction::NeFalseUnlessStmtOrGet => {
                        if is_stmt || patches::set_requests_get(args) {
                            base
                        } else {
                            format!("({base}) ~= false")
                        }
                    }
                    RedisPatchAction::WrapHelper(helper) => {
                        self.helpers.insert(helper);
                        format!("{helper}({base})")
                    }
                    RedisPatchAction::WrapHelperWithArgs(helper) => {
                        self.helpers.insert(helper);
                        let fields = arg_strs[2..].join(", ");
                        format!("{helper}(({base}), {{{fields}}})")
                    }
                };
            }
            return base;
        }
        match name {
            "string.find" => {
                self.helpers.insert("nil_or_index");
                format!("nil_or_index({base})")
            }
            "asintstr" => {
                self.helpers.insert("asintstr");
                base
            }
            _ => base,
        }
    }
}

fn ref_name(refid: &RefId) -> &str {
    refid.name()
}

fn indent_str(depth: usize) -> String {
    "  ".repeat(depth)
}

fn binop_text(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Eq => "==",
        BinOp::Ne => "~=",
        BinOp::Lt => "<",
        BinOp::Gt => ">",
        BinOp::Le => "<=",
        BinOp::Ge => ">=",
    }
}

fn emit_literal(value: &Value) -> String {
    match value {
        Value::Null => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Str(s) => quote_lua_string(s),
        Value::List(_) | Value::Map(_) => format!("cjson.decode({})", quote_lua_string(&value.to_json_string())),
    }
}

/// Matches `value.rs`'s own float formatting (integral floats keep a
/// `.0`), reproduced here rather than shared because the two call sites
/// (runtime coercion vs. Lua literal emission) have no common caller that
/// would make a shared helper anything but an extra indirection.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

fn quote_lua_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}
