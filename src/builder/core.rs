//! Fluent expression construction and named-variable handles.
//!
//! [`Sym`] is the user-facing expression type: every symbolic builder call
//! (`a.add(b)`, `a.eq_(b)`, ...) returns a new `Sym` wrapping the
//! corresponding [`crate::ir::Expr`] node. Literal Rust values convert into
//! `Sym` through [`Lit`], mirroring the source's `lit_helper`/`MixedType`.

use crate::ir::{BinOp, Command as IrCmd, Expr as IrExpr, RefId, ValueType};
use crate::value::Value;

/// A symbolic expression under construction. Cheap to clone — it just
/// carries an owned `IrExpr` tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Sym(pub(crate) IrExpr);

impl Sym {
    pub fn compile(self) -> IrExpr {
        self.0
    }

    pub fn add<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::Add, self, other.into())
    }

    pub fn sub<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::Sub, self, other.into())
    }

    pub fn and_<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::And, self, other.into())
    }

    pub fn or_<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::Or, self, other.into())
    }

    pub fn eq_<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::Eq, self, other.into())
    }

    pub fn ne_<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::Ne, self, other.into())
    }

    pub fn lt_<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::Lt, self, other.into())
    }

    pub fn gt_<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::Gt, self, other.into())
    }

    pub fn le_<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::Le, self, other.into())
    }

    pub fn ge_<T: Into<Sym>>(self, other: T) -> Sym {
        binary(BinOp::Ge, self, other.into())
    }

    pub fn not_(self) -> Sym {
        Sym(IrExpr::Not(Box::new(self.0)))
    }

    /// A named general/Redis function call. `call("redis.call", [..])` is
    /// the entry point used to invoke a command (see
    /// [`crate::memory::registry`] / [`crate::lua::patches`]).
    pub fn call(name: impl Into<String>, args: Vec<Sym>) -> Sym {
        Sym(IrExpr::Call {
            name: name.into(),
            args: args.into_iter().map(Sym::compile).collect(),
            no_adjust: false,
        })
    }

    /// Concatenates any number of expressions into a single string,
    /// typically used to build a dynamic key name (`Concat`).
    pub fn concat(parts: Vec<Sym>) -> Sym {
        Sym(IrExpr::Concat(parts.into_iter().map(Sym::compile).collect()))
    }

    pub fn constant(raw: impl Into<String>) -> Sym {
        Sym(IrExpr::Constant { raw: raw.into() })
    }
}

fn binary(op: BinOp, lhs: Sym, rhs: Sym) -> Sym {
    Sym(IrExpr::Binary {
        op,
        left: Box::new(lhs.0),
        right: Box::new(rhs.0),
    })
}

/// Converts a literal Rust value into a `Sym`, tagging it with the IR's
/// `ValueType`. Mirrors `LiteralOp.compute_type`.
pub trait Lit {
    fn lit(self) -> Sym;
}

impl Lit for Sym {
    fn lit(self) -> Sym {
        self
    }
}

impl Lit for bool {
    fn lit(self) -> Sym {
        Sym(IrExpr::val(Value::Bool(self), ValueType::Bool))
    }
}

impl Lit for i64 {
    fn lit(self) -> Sym {
        Sym(IrExpr::val(Value::Int(self), ValueType::Int))
    }
}

impl Lit for f64 {
    fn lit(self) -> Sym {
        Sym(IrExpr::val(Value::Float(self), ValueType::Float))
    }
}

impl Lit for &str {
    fn lit(self) -> Sym {
        Sym(IrExpr::val(Value::Str(self.to_string()), ValueType::Str))
    }
}

impl Lit for String {
    fn lit(self) -> Sym {
        Sym(IrExpr::val(Value::Str(self), ValueType::Str))
    }
}

impl Lit for Vec<Value> {
    fn lit(self) -> Sym {
        Sym(IrExpr::val(Value::List(self), ValueType::List))
    }
}

/// The absence of a value (`none` in the IR, `nil` in Lua).
pub struct None_;

impl Lit for None_ {
    fn lit(self) -> Sym {
        Sym(IrExpr::none())
    }
}

impl<T: Lit> From<T> for Sym {
    fn from(value: T) -> Sym {
        value.lit()
    }
}

pub fn lit<T: Lit>(value: T) -> Sym {
    value.lit()
}

/// A handle to a name-bearing, in-scope declaration: an argument, a key, a
/// local variable, or a loop index/value binding.
pub trait Variable {
    fn get_ref(&self) -> RefId;

    fn sym(&self) -> Sym {
        Sym(IrExpr::Ref(self.get_ref()))
    }

    /// Reads this variable as an array at the given index (`ArrayAt`).
    fn at<T: Into<Sym>>(&self, index: T) -> Sym {
        Sym(IrExpr::ArrayAt {
            array: self.get_ref(),
            index: Box::new(index.into().compile()),
        })
    }

    /// The length of this variable's array value (`ArrayLen`).
    fn len_(&self) -> Sym {
        Sym(IrExpr::ArrayLen { array: self.get_ref() })
    }
}

/// A positional JSON argument, declared via [`crate::builder::ScriptBuilder::add_arg`].
#[derive(Debug, Clone)]
pub struct JsonArg {
    name: String,
    readable: String,
}

impl JsonArg {
    pub(crate) fn new(name: String, readable: String) -> Self {
        JsonArg { name, readable }
    }
}

impl Variable for JsonArg {
    fn get_ref(&self) -> RefId {
        RefId::Arg { name: self.name.clone(), readable: self.readable.clone() }
    }
}

/// A positional key, declared via [`crate::builder::ScriptBuilder::add_key`].
#[derive(Debug, Clone)]
pub struct KeyVar {
    name: String,
    readable: String,
}

impl KeyVar {
    pub(crate) fn new(name: String, readable: String) -> Self {
        KeyVar { name, readable }
    }
}

impl Variable for KeyVar {
    fn get_ref(&self) -> RefId {
        RefId::Key { name: self.name.clone(), readable: self.readable.clone() }
    }
}

/// A local variable, declared via [`crate::builder::SequenceBuilder::add_local`].
/// Unlike [`JsonArg`]/[`KeyVar`], locals can be reassigned (`assign`) and
/// written into positionally (`set_at`).
#[derive(Debug, Clone)]
pub struct LocalVar {
    name: String,
}

impl LocalVar {
    pub(crate) fn new(name: String) -> Self {
        LocalVar { name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overwrites this local with a new value (`Command::Assign` with
    /// `is_declare: false`, as opposed to the `declare` done by
    /// `add_local`).
    pub fn assign(&self, value: impl Into<Sym>) -> IrCmd {
        IrCmd::Assign {
            target: self.get_ref(),
            value: value.into().compile(),
            is_declare: false,
        }
    }

    /// Writes `value` at position `index` of this local's array value.
    pub fn set_at(&self, index: impl Into<Sym>, value: impl Into<Sym>) -> IrCmd {
        IrCmd::AssignAt {
            target: self.get_ref(),
            index: index.into().compile(),
            value: value.into().compile(),
        }
    }
}

impl Variable for LocalVar {
    fn get_ref(&self) -> RefId {
        RefId::Var { name: self.name.clone() }
    }
}

/// The 0-based loop counter bound by a `for` statement.
#[derive(Debug, Clone)]
pub struct IndexVar {
    name: String,
}

impl IndexVar {
    pub(crate) fn new(loop_ix: usize) -> Self {
        IndexVar { name: format!("ix_{loop_ix}") }
    }
}

impl Variable for IndexVar {
    fn get_ref(&self) -> RefId {
        RefId::Index { name: self.name.clone() }
    }
}

/// The per-iteration element bound by a `for` statement.
#[derive(Debug, Clone)]
pub struct ValueVar {
    name: String,
}

impl ValueVar {
    pub(crate) fn new(loop_ix: usize) -> Self {
        ValueVar { name: format!("val_{loop_ix}") }
    }
}

impl Variable for ValueVar {
    fn get_ref(&self) -> RefId {
        RefId::Var { name: self.name.clone() }
    }
}
