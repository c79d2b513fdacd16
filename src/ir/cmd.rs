//! Statement nodes of the intermediate representation.

use crate::ir::expr::{Expr, RefId};
use crate::ir::seq::Sequence;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Binds `target` to `value`. `is_declare` distinguishes introducing a
    /// new binding (the builder's `declare`) from overwriting an existing
    /// one (`assign`) — the two share a shape because both the Lua and
    /// memory backends only differ in whether they allocate a new slot.
    Assign {
        target: RefId,
        value: Expr,
        is_declare: bool,
    },
    /// Writes `value` at position `index` of the array bound to `target`.
    /// `target` must be of kind [`RefId::Var`].
    AssignAt {
        target: RefId,
        index: Expr,
        value: Expr,
    },
    /// An expression evaluated for its side effect only; its result is
    /// discarded.
    Stmt(Expr),
    Branch {
        cond: Expr,
        then_seq: Sequence,
        else_seq: Sequence,
    },
    /// `index_var` is 0-based at the IR level regardless of how a backend
    /// encodes the loop counter internally.
    For {
        array: Expr,
        index_var: RefId,
        value_var: RefId,
        body: Sequence,
    },
    While {
        cond: Expr,
        body: Sequence,
    },
    Return(Option<Expr>),
}
