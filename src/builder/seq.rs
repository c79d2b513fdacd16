//! Sequence builders: [`ScriptBuilder`] (the script root) and [`Seq`] (a
//! nested branch/loop body), plus the `if_`/`for_`/`while_` constructs that
//! produce them.
//!
//! A builder accumulates a list of not-yet-finalized items. Branch and loop
//! bodies are returned to the caller as further builders so statements can
//! keep being appended to them after the enclosing `if_`/`for_`/`while_`
//! call returns; [`Seq::compile`]/[`ScriptBuilder::compile`] resolve the
//! whole tree into an immutable [`crate::ir::Sequence`] only once the
//! caller is done.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::builder::core::{IndexVar, JsonArg, KeyVar, LocalVar, Sym, Variable, ValueVar};
use crate::error::BuildError;
use crate::ir::{Command, Expr as IrExpr, RefId, Sequence};

/// An item queued onto a sequence. Leaf commands are stored fully formed;
/// control-flow items keep their body builder live so it can still be
/// mutated, and are only flattened into a [`Command`] at `compile()` time.
enum Item {
    Done(Command),
    Branch { cond: IrExpr, then_seq: Seq, else_seq: Seq },
    For { array: IrExpr, index_var: RefId, value_var: RefId, body: Seq },
    While { cond: IrExpr, body: Seq },
}

impl Item {
    fn finish(self) -> Command {
        match self {
            Item::Done(cmd) => cmd,
            Item::Branch { cond, then_seq, else_seq } => Command::Branch {
                cond,
                then_seq: then_seq.compile(),
                else_seq: else_seq.compile(),
            },
            Item::For { array, index_var, value_var, body } => Command::For {
                array,
                index_var,
                value_var,
                body: body.compile(),
            },
            Item::While { cond, body } => Command::While { cond, body: body.compile() },
        }
    }
}

/// Shared counters so a loop introduced anywhere in a script gets a unique
/// `ix_N`/`val_N` name, matching the source's single `_loops` counter on
/// `FnContext` shared by every nested `Sequence`.
struct Shared {
    loop_count: RefCell<usize>,
}

/// A nested sequence builder: the body of a branch arm or loop, or a
/// freestanding block. Cheaply cloneable (an `Rc` to shared queued state).
#[derive(Clone)]
pub struct Seq {
    items: Rc<RefCell<Vec<Item>>>,
    shared: Rc<Shared>,
}

impl Seq {
    fn new(shared: Rc<Shared>) -> Self {
        Seq { items: Rc::new(RefCell::new(Vec::new())), shared }
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Appends a bare expression as a side-effect-only statement.
    pub fn add(&self, expr: impl Into<Sym>) {
        self.items.borrow_mut().push(Item::Done(Command::Stmt(expr.into().compile())));
    }

    /// Appends an already-built command (`declare`/`assign`/`assign_at`/
    /// `return`), as produced by [`LocalVar::assign`]/[`LocalVar::set_at`]/
    /// [`Seq::set_return_value`].
    pub fn add_cmd(&self, cmd: Command) {
        self.items.borrow_mut().push(Item::Done(cmd));
    }

    pub fn if_(&self, cond: impl Into<Sym>) -> (Seq, Seq) {
        let then_seq = Seq::new(Rc::clone(&self.shared));
        let else_seq = Seq::new(Rc::clone(&self.shared));
        self.items.borrow_mut().push(Item::Branch {
            cond: cond.into().compile(),
            then_seq: then_seq.clone(),
            else_seq: else_seq.clone(),
        });
        (then_seq, else_seq)
    }

    pub fn for_(&self, array: impl Into<Sym>) -> (Seq, IndexVar, ValueVar) {
        let loop_ix = {
            let mut count = self.shared.loop_count.borrow_mut();
            let ix = *count;
            *count += 1;
            ix
        };
        let index_var = IndexVar::new(loop_ix);
        let value_var = ValueVar::new(loop_ix);
        let body = Seq::new(Rc::clone(&self.shared));
        self.items.borrow_mut().push(Item::For {
            array: array.into().compile(),
            index_var: index_var.get_ref(),
            value_var: value_var.get_ref(),
            body: body.clone(),
        });
        (body, index_var, value_var)
    }

    pub fn while_(&self, cond: impl Into<Sym>) -> Seq {
        let body = Seq::new(Rc::clone(&self.shared));
        self.items.borrow_mut().push(Item::While { cond: cond.into().compile(), body: body.clone() });
        body
    }

    pub fn set_return_value(&self, value: Option<impl Into<Sym>>) {
        let value = value.map(|v| v.into().compile());
        self.items.borrow_mut().push(Item::Done(Command::Return(value)));
    }

    pub fn compile(&self) -> Sequence {
        let items = std::mem::take(&mut *self.items.borrow_mut());
        Sequence::Seq { cmds: items.into_iter().map(Item::finish).collect() }
    }
}

/// The root builder for a script: owns the named-arg/named-key/local
/// declarations and produces a [`Sequence::Script`] on [`compile`].
pub struct ScriptBuilder {
    root: Seq,
    argv: Vec<String>,
    keyv: Vec<String>,
    arg_names: HashSet<String>,
    key_names: HashSet<String>,
    local_count: usize,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        ScriptBuilder {
            root: Seq::new(Rc::new(Shared { loop_count: RefCell::new(0) })),
            argv: Vec::new(),
            keyv: Vec::new(),
            arg_names: HashSet::new(),
            key_names: HashSet::new(),
            local_count: 0,
        }
    }

    pub fn add_arg(&mut self, readable: impl Into<String>) -> Result<JsonArg, BuildError> {
        let readable = readable.into();
        let index = self.argv.len();
        let name = format!("arg_{index}");
        if !self.arg_names.insert(readable.clone()) {
            return Err(BuildError::DuplicateName(readable));
        }
        // `argv`/`keyv` record the *readable* name, not the internal slot
        // name: these orders are re-surfaced at the closure invocation
        // boundary, where a caller passes a `name -> value` map keyed by
        // the same readable names it chose in `add_arg`/`add_key`.
        self.argv.push(readable.clone());
        let arg = JsonArg::new(name.clone(), readable);
        self.root.add_cmd(Command::Assign {
            target: RefId::Arg { name, readable: arg_readable(&arg) },
            value: IrExpr::LoadJsonArg { index },
            is_declare: true,
        });
        Ok(arg)
    }

    pub fn add_key(&mut self, readable: impl Into<String>) -> Result<KeyVar, BuildError> {
        let readable = readable.into();
        let index = self.keyv.len();
        let name = format!("key_{index}");
        if !self.key_names.insert(readable.clone()) {
            return Err(BuildError::DuplicateName(readable));
        }
        self.keyv.push(readable.clone());
        let key = KeyVar::new(name.clone(), readable.clone());
        self.root.add_cmd(Command::Assign {
            target: RefId::Key { name, readable },
            value: IrExpr::LoadKeyArg { index },
            is_declare: true,
        });
        Ok(key)
    }

    pub fn add_local(&mut self, init: impl Into<Sym>) -> LocalVar {
        let index = self.local_count;
        self.local_count += 1;
        let name = format!("var_{index}");
        let local = LocalVar::new(name.clone());
        self.root.add_cmd(Command::Assign {
            target: RefId::Var { name },
            value: init.into().compile(),
            is_declare: true,
        });
        local
    }

    pub fn add(&self, expr: impl Into<Sym>) {
        self.root.add(expr);
    }

    pub fn add_cmd(&self, cmd: Command) {
        self.root.add_cmd(cmd);
    }

    pub fn if_(&self, cond: impl Into<Sym>) -> (Seq, Seq) {
        self.root.if_(cond)
    }

    pub fn for_(&self, array: impl Into<Sym>) -> (Seq, IndexVar, ValueVar) {
        self.root.for_(array)
    }

    pub fn while_(&self, cond: impl Into<Sym>) -> Seq {
        self.root.while_(cond)
    }

    pub fn set_return_value(&self, value: Option<impl Into<Sym>>) {
        self.root.set_return_value(value)
    }

    /// Validates scope invariants and returns the finished IR.
    pub fn compile(&self) -> Result<Sequence, BuildError> {
        let script = Sequence::Script {
            cmds: match self.root.compile() {
                Sequence::Seq { cmds } => cmds,
                _ => unreachable!(),
            },
            argv: self.argv.clone(),
            keyv: self.keyv.clone(),
        };
        crate::builder::validate::validate_script(&script)?;
        Ok(script)
    }
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn arg_readable(arg: &JsonArg) -> String {
    match arg.get_ref() {
        RefId::Arg { readable, .. } => readable,
        _ => unreachable!(),
    }
}
