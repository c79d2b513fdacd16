//! Expression nodes of the intermediate representation.
//!
//! An [`Expr`] produces a value and (with the exception of [`Expr::Call`])
//! has no observable side effect. The tree shape mirrors the symbolic
//! builder's output one-to-one: every node the builder can emit has exactly
//! one variant here.

use crate::value::Value;

/// Tag carried by literal nodes, distinct from [`crate::value::Value`]'s own
/// runtime tag: a literal can never itself be a map (the builder has no
/// syntax for map literals), so this enum has one fewer case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Str,
    Int,
    Float,
    Bool,
    List,
    None,
}

/// A name-bearing reference to an argument, key, local variable, or loop
/// index/value binding. Every occurrence of a `RefId` in a compiled script
/// must trace back to a `declare` introduced earlier in textual order.
#[derive(Debug, Clone, PartialEq)]
pub enum RefId {
    /// A named positional argument, loaded from `ARGV`/`load_json_arg`.
    Arg { name: String, readable: String },
    /// A named positional key, loaded from `KEYS`/`load_key_arg`.
    Key { name: String, readable: String },
    /// A local variable introduced by `add_local` or assigned inside a
    /// loop/branch body.
    Var { name: String },
    /// The 0-based loop counter bound by a `for` statement.
    Index { name: String },
}

impl RefId {
    pub fn name(&self) -> &str {
        match self {
            RefId::Arg { name, .. } => name,
            RefId::Key { name, .. } => name,
            RefId::Var { name } => name,
            RefId::Index { name } => name,
        }
    }
}

/// Binary operators. Equality/ordering follow loose, Lua-style rules:
/// `Int`/`Float` compare numerically, other cross-type comparisons are not
/// meaningful to the source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A name-bearing reference.
    Ref(RefId),
    /// Reads the `index`-th element of the invocation's positional JSON arg
    /// vector (`ARGV` in the Lua backend).
    LoadJsonArg { index: usize },
    /// Reads the `index`-th element of the invocation's positional key
    /// vector (`KEYS` in the Lua backend).
    LoadKeyArg { index: usize },
    /// A literal value with its declared type tag.
    Val { value: Value, vtype: ValueType },
    /// An opaque named constant resolved by the backend (e.g. Redis log
    /// level codes).
    Constant { raw: String },
    /// Logical negation.
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Indexed read of a `var`/`index`/`arg`/`key`-typed array value.
    ArrayAt { array: RefId, index: Box<Expr> },
    /// Length of an array-valued reference.
    ArrayLen { array: RefId },
    /// String concatenation of any number of sub-expressions.
    Concat(Vec<Expr>),
    /// A named function invocation. `no_adjust` is set once a Lua-backend
    /// adjustment patch has already rewritten this call, to prevent the
    /// patch registry from recursing on its own output.
    Call {
        name: String,
        args: Vec<Expr>,
        no_adjust: bool,
    },
}

impl Expr {
    pub fn val(value: Value, vtype: ValueType) -> Self {
        Expr::Val { value, vtype }
    }

    pub fn none() -> Self {
        Expr::Val { value: Value::Null, vtype: ValueType::None }
    }

    /// `Some((value, vtype))` if this expression is a literal, `None`
    /// otherwise. Used by Lua-backend patches to special-case literal
    /// arguments (e.g. detecting a literal `"GET"` among `set`'s options).
    pub fn as_literal(&self) -> Option<(&Value, ValueType)> {
        match self {
            Expr::Val { value, vtype } => Some((value, *vtype)),
            _ => None,
        }
    }
}
