//! Scope validation: walks a compiled [`Sequence::Script`] and checks that
//! every name-bearing reference resolves to a declaration introduced
//! earlier in textual order, and that every `assign_at` target is a `var`.
//!
//! The fluent builder already prevents most of this by construction (you
//! cannot hold a [`crate::builder::core::LocalVar`] handle before calling
//! `add_local`), but hand-assembled or deserialized IR has no such
//! guarantee, so this pass is run unconditionally at the end of
//! [`crate::builder::ScriptBuilder::compile`].

use std::collections::HashSet;

use crate::error::BuildError;
use crate::ir::{Command, Expr, RefId, Sequence};

/// Tracks which names are currently in scope while walking the command
/// tree. `vars` also covers loop value bindings (`RefId::Var`); `indices`
/// covers loop index bindings (`RefId::Index`) separately since they share
/// no namespace with `vars`/`args`/`keys` in the IR.
struct Scope<'a> {
    args: &'a HashSet<String>,
    keys: &'a HashSet<String>,
    vars: HashSet<String>,
    indices: HashSet<String>,
}

impl<'a> Scope<'a> {
    fn resolves(&self, refid: &RefId) -> bool {
        match refid {
            RefId::Arg { name, .. } => self.args.contains(name),
            RefId::Key { name, .. } => self.keys.contains(name),
            RefId::Var { name } => self.vars.contains(name),
            RefId::Index { name } => self.indices.contains(name),
        }
    }
}

pub fn validate_script(script: &Sequence) -> Result<(), BuildError> {
    let (cmds, argv, keyv) = match script {
        Sequence::Script { cmds, argv, keyv } => (cmds, argv, keyv),
        _ => return Err(BuildError::UnsupportedSequenceKind("validate_script expects a Script".to_string())),
    };
    let mut scope = Scope {
        args: &argv.iter().cloned().collect(),
        keys: &keyv.iter().cloned().collect(),
        vars: HashSet::new(),
        indices: HashSet::new(),
    };
    validate_cmds(cmds, &mut scope)
}

fn validate_cmds(cmds: &[Command], scope: &mut Scope) -> Result<(), BuildError> {
    for cmd in cmds {
        validate_cmd(cmd, scope)?;
    }
    Ok(())
}

fn validate_cmd(cmd: &Command, scope: &mut Scope) -> Result<(), BuildError> {
    match cmd {
        Command::Assign { target, value, .. } => {
            validate_expr(value, scope)?;
            bind(target, scope);
        }
        Command::AssignAt { target, index, value } => {
            if !matches!(target, RefId::Var { .. }) {
                return Err(BuildError::AssignAtNonVar(target.name().to_string()));
            }
            if !scope.resolves(target) {
                return Err(BuildError::UnknownRefId(target.name().to_string()));
            }
            validate_expr(index, scope)?;
            validate_expr(value, scope)?;
        }
        Command::Stmt(expr) => validate_expr(expr, scope)?,
        Command::Branch { cond, then_seq, else_seq } => {
            validate_expr(cond, scope)?;
            // Each arm gets its own copy of the enclosing scope: a local
            // declared inside one arm is not visible in the other, nor
            // after the branch.
            let mut then_scope = scope.fork();
            validate_cmds(then_seq.cmds(), &mut then_scope)?;
            let mut else_scope = scope.fork();
            validate_cmds(else_seq.cmds(), &mut else_scope)?;
        }
        Command::For { array, index_var, value_var, body } => {
            validate_array_ref(array, scope)?;
            let mut body_scope = scope.fork();
            bind(index_var, &mut body_scope);
            bind(value_var, &mut body_scope);
            validate_cmds(body.cmds(), &mut body_scope)?;
        }
        Command::While { cond, body } => {
            validate_expr(cond, scope)?;
            let mut body_scope = scope.fork();
            validate_cmds(body.cmds(), &mut body_scope)?;
        }
        Command::Return(value) => {
            if let Some(value) = value {
                validate_expr(value, scope)?;
            }
        }
    }
    Ok(())
}

fn validate_array_ref(expr: &Expr, scope: &Scope) -> Result<(), BuildError> {
    match expr {
        Expr::Ref(refid) => {
            if !scope.resolves(refid) {
                return Err(BuildError::UnknownRefId(refid.name().to_string()));
            }
            Ok(())
        }
        other => validate_expr(other, scope),
    }
}

fn validate_expr(expr: &Expr, scope: &Scope) -> Result<(), BuildError> {
    match expr {
        Expr::Ref(refid) => {
            if !scope.resolves(refid) {
                return Err(BuildError::UnknownRefId(refid.name().to_string()));
            }
        }
        Expr::LoadJsonArg { .. } | Expr::LoadKeyArg { .. } | Expr::Val { .. } | Expr::Constant { .. } => {}
        Expr::Not(inner) => validate_expr(inner, scope)?,
        Expr::Binary { left, right, .. } => {
            validate_expr(left, scope)?;
            validate_expr(right, scope)?;
        }
        Expr::ArrayAt { array, index } => {
            if !scope.resolves(array) {
                return Err(BuildError::UnknownRefId(array.name().to_string()));
            }
            validate_expr(index, scope)?;
        }
        Expr::ArrayLen { array } => {
            if !scope.resolves(array) {
                return Err(BuildError::UnknownRefId(array.name().to_string()));
            }
        }
        Expr::Concat(parts) => {
            for part in parts {
                validate_expr(part, scope)?;
            }
        }
        Expr::Call { args, .. } => {
            for arg in args {
                validate_expr(arg, scope)?;
            }
        }
    }
    Ok(())
}

fn bind(refid: &RefId, scope: &mut Scope) {
    match refid {
        RefId::Var { name } => {
            scope.vars.insert(name.clone());
        }
        RefId::Index { name } => {
            scope.indices.insert(name.clone());
        }
        // Args/keys are bound once at script entry, already seeded into
        // scope in `validate_script`.
        RefId::Arg { .. } | RefId::Key { .. } => {}
    }
}

impl<'a> Scope<'a> {
    fn fork(&self) -> Scope<'a> {
        Scope {
            args: self.args,
            keys: self.keys,
            vars: self.vars.clone(),
            indices: self.indices.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ScriptBuilder;
    use crate::builder::core::{lit, Sym, Variable};

    #[test]
    fn well_scoped_script_validates() {
        let mut sb = ScriptBuilder::new();
        let key = sb.add_key("target").unwrap();
        let local = sb.add_local(lit(0_i64));
        sb.add_cmd(local.assign(local.sym().add(lit(1_i64))));
        sb.add(Sym::call("redis.call", vec![lit("get"), key.sym()]));
        assert!(sb.compile().is_ok());
    }

    #[test]
    fn for_loop_index_is_scoped_to_body() {
        let mut sb = ScriptBuilder::new();
        let arg = sb.add_arg("items").unwrap();
        let (body, index_var, value_var) = sb.for_(arg.sym());
        body.add(index_var.sym().add(value_var.sym()));
        assert!(sb.compile().is_ok());
    }
}
