//! Pipeline: queues redis commands against a child [`State`] layered over
//! a parent, committing them atomically once every queued command has run.
//!
//! `call` enqueues a thunk that dispatches through
//! [`crate::memory::registry::call_redis_command`] the same way a script's
//! `redis.call` does, so both paths share one arg-count-checked command
//! table. Nothing runs until [`Pipeline::execute`] drains the queue;
//! [`Pipeline::commit`] then folds the child state back into the parent,
//! refusing to do so while commands remain queued.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{PipelineError, RuntimeError};
use crate::memory::registry::call_redis_command;
use crate::memory::state::{Machine, SetMode, State};
use crate::value::Value;

type QueuedCmd = Box<dyn FnOnce(&Machine) -> Result<Value, RuntimeError>>;

/// A buffered sequence of commands layered over a parent [`State`].
///
/// Dropping a `Pipeline` that was never [`commit`](Pipeline::commit)ted
/// while commands remain queued is a caller bug the type system can't rule
/// out statically (Rust has no linear types / context managers); in debug
/// builds this is caught by a `debug_assert` in `Drop`, mirroring the
/// source raising `UnexecutedPipeline` at `with`-block exit.
pub struct Pipeline {
    parent: Rc<RefCell<State>>,
    child: Rc<RefCell<State>>,
    queue: Vec<QueuedCmd>,
    attempted_commit: bool,
}

impl Pipeline {
    pub fn new(parent: Rc<RefCell<State>>) -> Self {
        let child = Rc::new(RefCell::new(State::child(Rc::clone(&parent))));
        Pipeline { parent, child, queue: Vec::new(), attempted_commit: false }
    }

    pub fn has_queue(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queues a Redis command (`name`, then its own arguments with the
    /// target key first) for later execution.
    pub fn call(&mut self, name: impl Into<String>, args: Vec<Value>) {
        let name = name.into();
        self.queue.push(Box::new(move |machine| call_redis_command(machine, &name, &args)));
    }

    pub fn set(&mut self, key: &str, value: &str, mode: SetMode, return_previous: bool) {
        let mut args = vec![Value::Str(key.to_string()), Value::Str(value.to_string())];
        match mode {
            SetMode::IfExists => args.push(Value::Str("XX".to_string())),
            SetMode::IfMissing => args.push(Value::Str("NX".to_string())),
            SetMode::Always => {}
        }
        if return_previous {
            args.push(Value::Str("GET".to_string()));
        }
        self.call("set", args);
    }

    pub fn get(&mut self, key: &str) {
        self.call("get", vec![Value::Str(key.to_string())]);
    }

    pub fn exists(&mut self, key: &str) {
        self.call("exists", vec![Value::Str(key.to_string())]);
    }

    pub fn delete(&mut self, key: &str) {
        self.call("del", vec![Value::Str(key.to_string())]);
    }

    pub fn incrby(&mut self, key: &str, by: i64) {
        self.call("incrby", vec![Value::Str(key.to_string()), Value::Int(by)]);
    }

    pub fn lpush(&mut self, key: &str, values: &[String]) {
        let mut args = vec![Value::Str(key.to_string())];
        args.extend(values.iter().cloned().map(Value::Str));
        self.call("lpush", args);
    }

    pub fn rpush(&mut self, key: &str, values: &[String]) {
        let mut args = vec![Value::Str(key.to_string())];
        args.extend(values.iter().cloned().map(Value::Str));
        self.call("rpush", args);
    }

    pub fn lpop(&mut self, key: &str, count: Option<usize>) {
        let mut args = vec![Value::Str(key.to_string())];
        if let Some(n) = count {
            args.push(Value::Int(n as i64));
        }
        self.call("lpop", args);
    }

    pub fn rpop(&mut self, key: &str, count: Option<usize>) {
        let mut args = vec![Value::Str(key.to_string())];
        if let Some(n) = count {
            args.push(Value::Int(n as i64));
        }
        self.call("rpop", args);
    }

    pub fn llen(&mut self, key: &str) {
        self.call("llen", vec![Value::Str(key.to_string())]);
    }

    pub fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.call(
            "zadd",
            vec![Value::Str(key.to_string()), Value::Float(score), Value::Str(member.to_string())],
        );
    }

    pub fn zpop_max(&mut self, key: &str, count: usize) {
        self.call("zpopmax", vec![Value::Str(key.to_string()), Value::Int(count as i64)]);
    }

    pub fn zpop_min(&mut self, key: &str, count: usize) {
        self.call("zpopmin", vec![Value::Str(key.to_string()), Value::Int(count as i64)]);
    }

    pub fn zcard(&mut self, key: &str) {
        self.call("zcard", vec![Value::Str(key.to_string())]);
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &str) {
        self.call(
            "hset",
            vec![Value::Str(key.to_string()), Value::Str(field.to_string()), Value::Str(value.to_string())],
        );
    }

    pub fn hget(&mut self, key: &str, field: &str) {
        self.call("hget", vec![Value::Str(key.to_string()), Value::Str(field.to_string())]);
    }

    pub fn hdel(&mut self, key: &str, fields: &[String]) {
        let mut args = vec![Value::Str(key.to_string())];
        args.extend(fields.iter().cloned().map(Value::Str));
        self.call("hdel", args);
    }

    pub fn hmget(&mut self, key: &str, fields: &[String]) {
        let mut args = vec![Value::Str(key.to_string())];
        args.extend(fields.iter().cloned().map(Value::Str));
        self.call("hmget", args);
    }

    pub fn hincrby(&mut self, key: &str, field: &str, by: i64) {
        self.call("hincrby", vec![Value::Str(key.to_string()), Value::Str(field.to_string()), Value::Int(by)]);
    }

    pub fn hkeys(&mut self, key: &str) {
        self.call("hkeys", vec![Value::Str(key.to_string())]);
    }

    pub fn hvals(&mut self, key: &str) {
        self.call("hvals", vec![Value::Str(key.to_string())]);
    }

    pub fn hgetall(&mut self, key: &str) {
        self.call("hgetall", vec![Value::Str(key.to_string())]);
    }

    /// Drains the queue, running each command in enqueue order against the
    /// layered child state, and returns each result in order. Does not
    /// itself merge into the parent — call [`commit`](Pipeline::commit)
    /// afterward.
    pub fn execute(&mut self) -> Result<Vec<Value>, RuntimeError> {
        let queue = std::mem::take(&mut self.queue);
        let machine = Machine::new(Rc::clone(&self.child));
        queue.into_iter().map(|cmd| cmd(&machine)).collect()
    }

    /// Folds the child state into the parent. Fails without mutating the
    /// parent if commands remain queued — the caller forgot to call
    /// `execute()` (or `execute()` wasn't given the chance to run before
    /// the pipeline is closed out).
    pub fn commit(mut self) -> Result<(), PipelineError> {
        self.attempted_commit = true;
        if self.has_queue() {
            return Err(PipelineError::UnexecutedPipeline(self.queue.len()));
        }
        // `Pipeline` implements `Drop`, so its fields can't be moved out of
        // `self` directly; swap the child out for a throwaway placeholder
        // first, then unwrap the real one on its own.
        let child = std::mem::replace(&mut self.child, Rc::new(RefCell::new(State::new())));
        let child_state = Rc::try_unwrap(child)
            .unwrap_or_else(|_| unreachable!("pipeline child state has no other owners"))
            .into_inner();
        self.parent.borrow_mut().apply(child_state);
        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.attempted_commit && self.has_queue() {
            debug_assert!(
                false,
                "Pipeline dropped with {} unexecuted queued command(s); call commit()",
                self.queue.len()
            );
        }
    }
}
