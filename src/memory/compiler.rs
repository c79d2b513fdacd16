//! Single-pass IR-to-closure compilation for the memory backend.
//!
//! Mirrors `redipy.memory.local.LocalBackend`: a [`Compiler`] walks an
//! [`ir::Sequence`] once, allocating a stack slot for every `var`/`index`
//! binding it encounters (`declare_var` in the source), and produces a tree
//! of boxed closures that read/write an [`ExecState`] when the script is
//! actually invoked. Unlike the source, `return` here ends execution of the
//! enclosing sequence immediately rather than merely pushing onto a return
//! stack that gets popped once at the end — once a script can legally
//! contain a `return` nested inside a conditional, "keep running sibling
//! statements after a return fires" has no sensible reading in a statement
//! language, so early-exit is the resolved behavior (see `DESIGN.md`).

use std::collections::HashMap;

use crate::error::{CompileError, RuntimeError};
use crate::ir::{BinOp, Command, Expr, RefId, Sequence};
use crate::memory::registry::{call_general_function, call_redis_command};
use crate::memory::state::Machine;
use crate::value::Value;

/// Per-invocation execution state: one flat slot table shared by every
/// `var`/`index`/`arg`/`key` binding (there is no nested-function frame
/// stack since [`Sequence::Function`] is unimplemented), plus the
/// positional `ARGV`/`KEYS`-equivalent vectors and a handle on the store.
pub struct ExecState<'a> {
    slots: Vec<Option<Value>>,
    argv: &'a [Value],
    keyv: &'a [String],
    machine: &'a Machine,
}

/// Whether a command sequence ran to completion or hit a `return`.
pub enum Flow {
    Normal,
    Return(Option<Value>),
}

type ExprFn = Box<dyn Fn(&mut ExecState) -> Result<Value, RuntimeError>>;
type CmdFn = Box<dyn Fn(&mut ExecState) -> Result<Flow, RuntimeError>>;

/// A script compiled once and invoked any number of times with different
/// `argv`/`keyv`.
pub struct CompiledScript {
    body: CmdFn,
    slot_count: usize,
    pub argv_names: Vec<String>,
    pub keyv_names: Vec<String>,
}

impl CompiledScript {
    pub fn invoke(&self, machine: &Machine, keyv: &[String], argv: &[Value]) -> Result<Value, RuntimeError> {
        let mut state = ExecState { slots: vec![None; self.slot_count], argv, keyv, machine };
        match (self.body)(&mut state)? {
            Flow::Return(Some(value)) if value.is_empty_collection() => Ok(Value::Null),
            Flow::Return(Some(value)) => Ok(value),
            Flow::Return(None) | Flow::Normal => Ok(Value::Null),
        }
    }
}

/// Compiles a [`Sequence::Script`] into a [`CompiledScript`].
pub fn compile_script(script: &Sequence) -> Result<CompiledScript, CompileError> {
    let (cmds, argv, keyv) = match script {
        Sequence::Script { cmds, argv, keyv } => (cmds, argv, keyv),
        Sequence::Function { .. } => {
            return Err(CompileError::UnknownStmtKind("function sequences are not implemented".to_string()))
        }
        Sequence::Seq { .. } => {
            return Err(CompileError::UnknownStmtKind("compile_script expects a Script".to_string()))
        }
    };
    let mut compiler = Compiler::new();
    let body = compiler.compile_cmds(cmds)?;
    Ok(CompiledScript {
        body,
        slot_count: compiler.slot_count,
        argv_names: argv.clone(),
        keyv_names: keyv.clone(),
    })
}

struct Compiler {
    slots: HashMap<String, usize>,
    slot_count: usize,
}

impl Compiler {
    fn new() -> Self {
        Compiler { slots: HashMap::new(), slot_count: 0 }
    }

    fn declare(&mut self, name: &str) -> usize {
        let ix = self.slot_count;
        self.slot_count += 1;
        self.slots.insert(name.to_string(), ix);
        ix
    }

    fn slot_of(&self, name: &str) -> Result<usize, CompileError> {
        self.slots.get(name).copied().ok_or_else(|| CompileError::UnknownStmtKind(format!("undeclared slot {name}")))
    }

    fn compile_cmds(&mut self, cmds: &[Command]) -> Result<CmdFn, CompileError> {
        let compiled: Vec<CmdFn> = cmds.iter().map(|c| self.compile_cmd(c)).collect::<Result<_, _>>()?;
        Ok(Box::new(move |state| {
            for cmd in &compiled {
                match cmd(state)? {
                    Flow::Normal => continue,
                    returned => return Ok(returned),
                }
            }
            Ok(Flow::Normal)
        }))
    }

    fn compile_cmd(&mut self, cmd: &Command) -> Result<CmdFn, CompileError> {
        match cmd {
            Command::Assign { target, value, is_declare } => {
                let rhs = self.compile_expr(value)?;
                let slot = if *is_declare { self.declare(target.name()) } else { self.slot_of(target.name())? };
                Ok(Box::new(move |state| {
                    let value = rhs(state)?;
                    state.slots[slot] = Some(value);
                    Ok(Flow::Normal)
                }))
            }
            Command::AssignAt { target, index, value } => {
                if !matches!(target, RefId::Var { .. }) {
                    return Err(CompileError::UnknownStmtKind(format!(
                        "cannot assign to position of non-var ref {}",
                        target.name()
                    )));
                }
                let slot = self.slot_of(target.name())?;
                let index_fn = self.compile_expr(index)?;
                let value_fn = self.compile_expr(value)?;
                Ok(Box::new(move |state| {
                    let ix = index_fn(state)?.as_int().ok_or_else(|| RuntimeError::TypeMismatch {
                        expected: "integer index".to_string(),
                        got: "non-integer".to_string(),
                    })? as usize;
                    let elem = value_fn(state)?;
                    let slot_value = state.slots[slot].get_or_insert_with(|| Value::List(Vec::new()));
                    let array = slot_value.as_list_mut().ok_or_else(|| RuntimeError::TypeMismatch {
                        expected: "list".to_string(),
                        got: "non-list".to_string(),
                    })?;
                    if ix == array.len() {
                        array.push(elem);
                    } else {
                        array[ix] = elem;
                    }
                    Ok(Flow::Normal)
                }))
            }
            Command::Stmt(expr) => {
                let expr_fn = self.compile_expr(expr)?;
                Ok(Box::new(move |state| {
                    expr_fn(state)?;
                    Ok(Flow::Normal)
                }))
            }
            Command::Branch { cond, then_seq, else_seq } => {
                let cond_fn = self.compile_expr(cond)?;
                let then_fn = self.compile_cmds(then_seq.cmds())?;
                let else_fn = self.compile_cmds(else_seq.cmds())?;
                Ok(Box::new(move |state| {
                    if cond_fn(state)?.is_truthy() { then_fn(state) } else { else_fn(state) }
                }))
            }
            Command::For { array, index_var, value_var, body } => {
                let array_fn = self.compile_expr(array)?;
                let index_slot = self.declare(index_var.name());
                let value_slot = self.declare(value_var.name());
                let body_fn = self.compile_cmds(body.cmds())?;
                Ok(Box::new(move |state| {
                    let items = array_fn(state)?.as_list().map(|v| v.to_vec()).ok_or_else(|| {
                        RuntimeError::TypeMismatch { expected: "list".to_string(), got: "non-list".to_string() }
                    })?;
                    for (ix, item) in items.into_iter().enumerate() {
                        state.slots[index_slot] = Some(Value::Int(ix as i64));
                        state.slots[value_slot] = Some(item);
                        match body_fn(state)? {
                            Flow::Normal => continue,
                            returned => return Ok(returned),
                        }
                    }
                    Ok(Flow::Normal)
                }))
            }
            Command::While { cond, body } => {
                let cond_fn = self.compile_expr(cond)?;
                let body_fn = self.compile_cmds(body.cmds())?;
                Ok(Box::new(move |state| {
                    while cond_fn(state)?.is_truthy() {
                        match body_fn(state)? {
                            Flow::Normal => continue,
                            returned => return Ok(returned),
                        }
                    }
                    Ok(Flow::Normal)
                }))
            }
            Command::Return(value) => match value {
                None => Ok(Box::new(|_state| Ok(Flow::Return(None)))),
                Some(value) => {
                    let value_fn = self.compile_expr(value)?;
                    Ok(Box::new(move |state| Ok(Flow::Return(Some(value_fn(state)?)))))
                }
            },
        }
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<ExprFn, CompileError> {
        match expr {
            Expr::Ref(refid) => {
                let slot = self.slot_of(refid.name())?;
                let readable = refid.name().to_string();
                Ok(Box::new(move |state| {
                    state.slots[slot].clone().ok_or_else(|| RuntimeError::UninitVariable(readable.clone()))
                }))
            }
            Expr::LoadJsonArg { index } => {
                let index = *index;
                Ok(Box::new(move |state| {
                    state.argv.get(index).cloned().ok_or_else(|| RuntimeError::TypeMismatch {
                        expected: "argument present".to_string(),
                        got: "missing".to_string(),
                    })
                }))
            }
            Expr::LoadKeyArg { index } => {
                let index = *index;
                Ok(Box::new(move |state| {
                    state
                        .keyv
                        .get(index)
                        .cloned()
                        .map(Value::Str)
                        .ok_or_else(|| RuntimeError::TypeMismatch {
                            expected: "key present".to_string(),
                            got: "missing".to_string(),
                        })
                }))
            }
            Expr::Val { value, vtype: _ } => {
                let value = value.clone();
                Ok(Box::new(move |_state| Ok(value.clone())))
            }
            Expr::Constant { raw } => {
                let resolved = resolve_constant(raw)?;
                Ok(Box::new(move |_state| Ok(resolved.clone())))
            }
            Expr::Not(inner) => {
                let inner_fn = self.compile_expr(inner)?;
                Ok(Box::new(move |state| Ok(Value::Bool(!inner_fn(state)?.is_truthy()))))
            }
            Expr::Binary { op, left, right } => {
                let left_fn = self.compile_expr(left)?;
                let right_fn = self.compile_expr(right)?;
                let op = *op;
                Ok(Box::new(move |state| eval_binary(op, left_fn(state)?, right_fn(state)?)))
            }
            Expr::ArrayAt { array, index } => {
                let slot = self.slot_of(array.name())?;
                let readable = array.name().to_string();
                let index_fn = self.compile_expr(index)?;
                Ok(Box::new(move |state| {
                    let ix = index_fn(state)?.as_int().ok_or_else(|| RuntimeError::TypeMismatch {
                        expected: "integer index".to_string(),
                        got: "non-integer".to_string(),
                    })? as usize;
                    let value = state.slots[slot].as_ref().ok_or_else(|| RuntimeError::UninitVariable(readable.clone()))?;
                    value
                        .as_list()
                        .and_then(|list| list.get(ix))
                        .cloned()
                        .ok_or_else(|| RuntimeError::TypeMismatch {
                            expected: "in-bounds list index".to_string(),
                            got: ix.to_string(),
                        })
                }))
            }
            Expr::ArrayLen { array } => {
                let slot = self.slot_of(array.name())?;
                let readable = array.name().to_string();
                Ok(Box::new(move |state| {
                    let value = state.slots[slot].as_ref().ok_or_else(|| RuntimeError::UninitVariable(readable.clone()))?;
                    Ok(Value::Int(value.as_list().map(|l| l.len()).unwrap_or(0) as i64))
                }))
            }
            Expr::Concat(parts) => {
                let part_fns: Vec<ExprFn> = parts.iter().map(|p| self.compile_expr(p)).collect::<Result<_, _>>()?;
                Ok(Box::new(move |state| {
                    let mut out = String::new();
                    for part in &part_fns {
                        out.push_str(&part(state)?.coerce_str());
                    }
                    Ok(Value::Str(out))
                }))
            }
            Expr::Call { name, args, no_adjust: _ } => {
                let arg_fns: Vec<ExprFn> = args.iter().map(|a| self.compile_expr(a)).collect::<Result<_, _>>()?;
                let name = name.clone();
                Ok(Box::new(move |state| {
                    let values: Vec<Value> = arg_fns.iter().map(|f| f(state)).collect::<Result<_, _>>()?;
                    dispatch_call(state, &name, values)
                }))
            }
        }
    }
}

fn dispatch_call(state: &ExecState, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    if name == "redis.call" || name == "redis.pcall" {
        let command = args.first().ok_or(RuntimeError::ArgCountMismatch {
            name: name.to_string(),
            expected: "at least 1".to_string(),
            got: 0,
        })?;
        let command_name = command.coerce_str();
        return call_redis_command(state.machine, &command_name, &args[1..]);
    }
    call_general_function(name, &args)
}

fn resolve_constant(raw: &str) -> Result<Value, CompileError> {
    match raw {
        "redis.LOG_DEBUG" => Ok(Value::Str("DEBUG".to_string())),
        "redis.LOG_VERBOSE" => Ok(Value::Str("VERBOSE".to_string())),
        "redis.LOG_NOTICE" => Ok(Value::Str("NOTICE".to_string())),
        "redis.LOG_WARNING" => Ok(Value::Str("WARNING".to_string())),
        other => Err(CompileError::UnknownValueType(other.to_string())),
    }
}

fn eval_binary(op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    Ok(match op {
        BinOp::And => if left.is_truthy() { right } else { left },
        BinOp::Or => if left.is_truthy() { left } else { right },
        BinOp::Add => numeric_only(&left, &right, |a, b| a + b)?,
        BinOp::Sub => numeric_only(&left, &right, |a, b| a - b)?,
        BinOp::Eq => Value::Bool(left == right),
        BinOp::Ne => Value::Bool(left != right),
        BinOp::Lt => Value::Bool(left.partial_cmp(&right) == Some(std::cmp::Ordering::Less)),
        BinOp::Gt => Value::Bool(left.partial_cmp(&right) == Some(std::cmp::Ordering::Greater)),
        BinOp::Le => Value::Bool(matches!(
            left.partial_cmp(&right),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        )),
        BinOp::Ge => Value::Bool(matches!(
            left.partial_cmp(&right),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        )),
    })
}

fn numeric_only(left: &Value, right: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, RuntimeError> {
    let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
        return Err(RuntimeError::TypeMismatch {
            expected: "number".to_string(),
            got: format!("{left:?} / {right:?}"),
        });
    };
    let result = f(a, b);
    let both_int = matches!(left, Value::Int(_)) && matches!(right, Value::Int(_));
    Ok(if both_int && result.fract() == 0.0 { Value::Int(result as i64) } else { Value::Float(result) })
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::core::{lit, Sym, Variable};
    use crate::builder::ScriptBuilder;
    use crate::memory::state::State;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn run(script: &Sequence, keyv: &[String], argv: &[Value]) -> Value {
        let compiled = compile_script(script).unwrap();
        let machine = Machine::new(Rc::new(RefCell::new(State::new())));
        compiled.invoke(&machine, keyv, argv).unwrap()
    }

    #[test]
    fn arithmetic_and_branch() {
        let mut sb = ScriptBuilder::new();
        let a = sb.add_arg("a").unwrap();
        let b = sb.add_arg("b").unwrap();
        let total = sb.add_local(a.sym().add(b.sym()));
        let (then_seq, _else_seq) = sb.if_(total.sym().gt_(10_i64));
        then_seq.set_return_value(Some(lit("big")));
        sb.set_return_value(Some(total.sym()));
        let script = sb.compile().unwrap();
        let result = run(&script, &[], &[Value::Int(4), Value::Int(3)]);
        assert_eq!(result, Value::Int(7));
        let result = run(&script, &[], &[Value::Int(9), Value::Int(9)]);
        assert_eq!(result, Value::Str("big".to_string()));
    }

    #[test]
    fn while_loop_counts_down_to_zero() {
        let mut sb = ScriptBuilder::new();
        let counter = sb.add_local(lit(3_i64));
        let body = sb.while_(counter.sym().gt_(0_i64));
        body.add_cmd(counter.assign(counter.sym().sub(1_i64)));
        sb.set_return_value(Some(counter.sym()));
        let script = sb.compile().unwrap();
        assert_eq!(run(&script, &[], &[]), Value::Int(0));
    }

    #[test]
    fn for_loop_sums_a_list_argument() {
        let mut sb = ScriptBuilder::new();
        let items = sb.add_arg("items").unwrap();
        let sum = sb.add_local(lit(0_i64));
        let (body, _index_var, value_var) = sb.for_(items.sym());
        body.add_cmd(sum.assign(sum.sym().add(value_var.sym())));
        sb.set_return_value(Some(sum.sym()));
        let script = sb.compile().unwrap();
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = run(&script, &[], &[list]);
        assert_eq!(result, Value::Int(6));
    }

    #[test]
    fn redis_log_resolves_a_named_log_level_constant_and_returns_nil() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut sb = ScriptBuilder::new();
        let msg = sb.add_arg("msg").unwrap();
        sb.add(Sym::call(
            "redis.log",
            vec![Sym::constant("redis.LOG_WARNING"), msg.sym()],
        ));
        sb.set_return_value(Some(lit("done")));
        let script = sb.compile().unwrap();
        let result = run(&script, &[], &[Value::Str("disk almost full".to_string())]);
        assert_eq!(result, Value::Str("done".to_string()));
    }
}
