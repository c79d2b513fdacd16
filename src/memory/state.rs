//! The layered key-value state backing the memory backend.
//!
//! [`State`] holds the per-type maps (strings with expiry, lists, sorted
//! sets, hashes) that back every command. A pipeline executes its queued
//! commands against a child `State` whose reads fall through to the parent
//! on a miss and whose writes stay local until the pipeline commits, at
//! which point [`State::apply`] merges the child's maps back into the
//! parent wholesale — the same copy-on-read/merge-on-commit layering the
//! source's `State`/`Machine` pair uses, generalized here to the full
//! command surface `redipy.api.RedisAPI` declares (hashes, `exists`,
//! `delete`, `incrby`) that the source's memory snapshot left unbuilt.
//!
//! [`Machine`] is the actual command surface: every method borrows a
//! shared, reentrant-safe `Rc<RefCell<State>>` so the single script-wide
//! lock in [`crate::runtime`] is the only synchronization this layer
//! needs.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    Always,
    IfExists,
    IfMissing,
}

#[derive(Debug, Default)]
struct StateData {
    vals: HashMap<String, (String, Option<Instant>)>,
    queues: HashMap<String, VecDeque<String>>,
    zorder: HashMap<String, Vec<String>>,
    zscores: HashMap<String, HashMap<String, f64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    /// Keys explicitly removed in this layer. Shadows the parent for reads
    /// until a write re-creates the key locally. Needed because `apply`
    /// merges maps with `extend`, which has no way to express "this key is
    /// now gone" on its own.
    deleted: HashSet<String>,
}

pub struct State {
    parent: Option<Rc<RefCell<State>>>,
    data: StateData,
}

impl State {
    pub fn new() -> Self {
        State { parent: None, data: StateData::default() }
    }

    pub fn child(parent: Rc<RefCell<State>>) -> Self {
        State { parent: Some(parent), data: StateData::default() }
    }

    /// Merges a committed pipeline's local state into this one. Only the
    /// root (`parent.is_none()`) sweeps expired keys afterward, matching
    /// the source's `_clean_vals`, which is a no-op on non-root states.
    pub fn apply(&mut self, other: State) {
        for key in &other.data.deleted {
            self.data.vals.remove(key);
            self.data.queues.remove(key);
            self.data.zorder.remove(key);
            self.data.zscores.remove(key);
            self.data.hashes.remove(key);
        }
        self.data.vals.extend(other.data.vals);
        self.data.queues.extend(other.data.queues);
        self.data.zorder.extend(other.data.zorder);
        self.data.zscores.extend(other.data.zscores);
        self.data.hashes.extend(other.data.hashes);
        self.data.deleted.extend(other.data.deleted);
        if self.parent.is_none() {
            self.clean_vals();
        }
    }

    fn is_alive(entry: &(String, Option<Instant>)) -> bool {
        match entry.1 {
            None => true,
            Some(expires_at) => expires_at > Instant::now(),
        }
    }

    fn clean_vals(&mut self) {
        self.data.vals.retain(|_, v| Self::is_alive(v));
    }

    fn is_locally_deleted(&self, key: &str) -> bool {
        self.data.deleted.contains(key)
    }

    fn touch(&mut self, key: &str) {
        self.data.deleted.remove(key);
    }

    pub fn get_value(&mut self, key: &str) -> Option<String> {
        if self.is_locally_deleted(key) {
            return None;
        }
        if let Some(entry) = self.data.vals.get(key) {
            if Self::is_alive(entry) {
                return Some(entry.0.clone());
            }
            self.clean_vals();
            return None;
        }
        if let Some(parent) = &self.parent {
            return parent.borrow_mut().get_value(key);
        }
        None
    }

    pub fn set_value(&mut self, key: &str, value: String, expires_at: Option<Instant>) {
        self.touch(key);
        self.data.vals.insert(key.to_string(), (value, expires_at));
    }

    /// Marks `key` deleted across every type's map in this layer.
    pub fn delete_key(&mut self, key: &str) -> bool {
        let existed = self.exists_key(key);
        self.data.vals.remove(key);
        self.data.queues.remove(key);
        self.data.zorder.remove(key);
        self.data.zscores.remove(key);
        self.data.hashes.remove(key);
        self.data.deleted.insert(key.to_string());
        existed
    }

    pub fn exists_key(&mut self, key: &str) -> bool {
        if self.is_locally_deleted(key) {
            return false;
        }
        if self.data.vals.contains_key(key)
            || self.data.queues.contains_key(key)
            || self.data.zorder.contains_key(key)
            || self.data.hashes.contains_key(key)
        {
            return self.get_value(key).is_some()
                || self.queue_len(key) > 0
                || self.zorder_len(key) > 0
                || !self.get_hash(key).is_empty();
        }
        if let Some(parent) = &self.parent {
            return parent.borrow_mut().exists_key(key);
        }
        false
    }

    pub fn get_queue(&mut self, key: &str) -> &mut VecDeque<String> {
        if !self.data.queues.contains_key(key) {
            let copied = if self.is_locally_deleted(key) {
                VecDeque::new()
            } else if let Some(parent) = &self.parent {
                parent.borrow_mut().get_queue(key).clone()
            } else {
                VecDeque::new()
            };
            self.data.queues.insert(key.to_string(), copied);
        }
        self.data.queues.get_mut(key).expect("just inserted")
    }

    pub fn queue_len(&mut self, key: &str) -> usize {
        if self.is_locally_deleted(key) {
            return 0;
        }
        if let Some(queue) = self.data.queues.get(key) {
            return queue.len();
        }
        if let Some(parent) = &self.parent {
            return parent.borrow_mut().queue_len(key);
        }
        0
    }

    pub fn get_zorder(&mut self, key: &str) -> &mut Vec<String> {
        if !self.data.zorder.contains_key(key) {
            let copied = if self.is_locally_deleted(key) {
                Vec::new()
            } else if let Some(parent) = &self.parent {
                parent.borrow_mut().get_zorder(key).clone()
            } else {
                Vec::new()
            };
            self.data.zorder.insert(key.to_string(), copied);
        }
        self.data.zorder.get_mut(key).expect("just inserted")
    }

    pub fn zorder_len(&mut self, key: &str) -> usize {
        if self.is_locally_deleted(key) {
            return 0;
        }
        if let Some(zorder) = self.data.zorder.get(key) {
            return zorder.len();
        }
        if let Some(parent) = &self.parent {
            return parent.borrow_mut().zorder_len(key);
        }
        0
    }

    pub fn get_zscores(&mut self, key: &str) -> &mut HashMap<String, f64> {
        if !self.data.zscores.contains_key(key) {
            let copied = if self.is_locally_deleted(key) {
                HashMap::new()
            } else if let Some(parent) = &self.parent {
                parent.borrow_mut().get_zscores(key).clone()
            } else {
                HashMap::new()
            };
            self.data.zscores.insert(key.to_string(), copied);
        }
        self.data.zscores.get_mut(key).expect("just inserted")
    }

    pub fn get_hash(&mut self, key: &str) -> &mut HashMap<String, String> {
        if !self.data.hashes.contains_key(key) {
            let copied = if self.is_locally_deleted(key) {
                HashMap::new()
            } else if let Some(parent) = &self.parent {
                parent.borrow_mut().get_hash(key).clone()
            } else {
                HashMap::new()
            };
            self.data.hashes.insert(key.to_string(), copied);
        }
        self.data.hashes.get_mut(key).expect("just inserted")
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Every command a script can invoke against the emulated store, in one
/// inherent impl over a shared `Rc<RefCell<State>>`. Mirrors
/// `redipy.memory.state.Machine`, extended with the hash commands and
/// `exists`/`delete`/`incrby` the source's memory snapshot never
/// implemented (`redipy.api.RedisAPI` declares them; `rfun.py` does not).
pub struct Machine {
    state: Rc<RefCell<State>>,
}

impl Machine {
    pub fn new(state: Rc<RefCell<State>>) -> Self {
        Machine { state }
    }

    pub fn state(&self) -> Rc<RefCell<State>> {
        Rc::clone(&self.state)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set(
        &self,
        key: &str,
        value: &str,
        mode: SetMode,
        return_previous: bool,
        expire_in: Option<Duration>,
        keep_ttl: bool,
    ) -> Result<Option<String>, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let prev = state.get_value(key);
        let do_set = match mode {
            SetMode::Always => true,
            SetMode::IfExists => prev.is_some(),
            SetMode::IfMissing => prev.is_none(),
        };
        if do_set {
            let expires_at = if keep_ttl {
                None // keep_ttl without a stored original expiry collapses to no-expiry; acceptable given values are re-set wholesale
            } else {
                expire_in.map(|d| Instant::now() + d)
            };
            state.set_value(key, value.to_string(), expires_at);
        }
        Ok(if return_previous { prev } else if do_set { Some("1".to_string()) } else { None })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, RuntimeError> {
        Ok(self.state.borrow_mut().get_value(key))
    }

    pub fn exists(&self, key: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.borrow_mut().exists_key(key))
    }

    pub fn delete(&self, key: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.borrow_mut().delete_key(key))
    }

    pub fn incrby(&self, key: &str, by: f64, as_float: bool) -> Result<String, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let current: f64 = match state.get_value(key) {
            Some(raw) => raw.parse().map_err(|_| RuntimeError::TypeMismatch {
                expected: "numeric string".to_string(),
                got: raw,
            })?,
            None => 0.0,
        };
        let next = current + by;
        let rendered = if as_float { format_float(next) } else { (next as i64).to_string() };
        state.set_value(key, rendered.clone(), None);
        Ok(rendered)
    }

    pub fn lpush(&self, key: &str, values: &[String]) -> Result<usize, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let queue = state.get_queue(key);
        for value in values {
            queue.push_front(value.clone());
        }
        Ok(queue.len())
    }

    pub fn rpush(&self, key: &str, values: &[String]) -> Result<usize, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let queue = state.get_queue(key);
        for value in values {
            queue.push_back(value.clone());
        }
        Ok(queue.len())
    }

    pub fn lpop(&self, key: &str, count: Option<usize>) -> Result<Option<Vec<String>>, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let queue = state.get_queue(key);
        if queue.is_empty() {
            return Ok(None);
        }
        let n = count.unwrap_or(1);
        let popped: Vec<String> = (0..n).filter_map(|_| queue.pop_front()).collect();
        Ok(if popped.is_empty() { None } else { Some(popped) })
    }

    pub fn rpop(&self, key: &str, count: Option<usize>) -> Result<Option<Vec<String>>, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let queue = state.get_queue(key);
        if queue.is_empty() {
            return Ok(None);
        }
        let n = count.unwrap_or(1);
        let popped: Vec<String> = (0..n).filter_map(|_| queue.pop_back()).collect();
        Ok(if popped.is_empty() { None } else { Some(popped) })
    }

    pub fn llen(&self, key: &str) -> Result<usize, RuntimeError> {
        Ok(self.state.borrow_mut().queue_len(key))
    }

    pub fn zadd(&self, key: &str, mapping: &[(String, f64)]) -> Result<usize, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let mut added = 0;
        {
            let zscores = state.get_zscores(key);
            for (name, _) in mapping {
                if !zscores.contains_key(name) {
                    added += 1;
                }
            }
        }
        for (name, score) in mapping {
            state.get_zscores(key).insert(name.clone(), *score);
            let zorder = state.get_zorder(key);
            if !zorder.contains(name) {
                zorder.push(name.clone());
            }
        }
        let zscores = state.get_zscores(key).clone();
        state.get_zorder(key).sort_by(|a, b| {
            zscores[a].partial_cmp(&zscores[b]).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.cmp(b))
        });
        Ok(added)
    }

    pub fn zpop_max(&self, key: &str, count: usize) -> Result<Vec<(String, f64)>, RuntimeError> {
        self.zpop(key, count, true)
    }

    pub fn zpop_min(&self, key: &str, count: usize) -> Result<Vec<(String, f64)>, RuntimeError> {
        self.zpop(key, count, false)
    }

    fn zpop(&self, key: &str, count: usize, from_max: bool) -> Result<Vec<(String, f64)>, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let mut popped = Vec::new();
        for _ in 0..count {
            let name = {
                let zorder = state.get_zorder(key);
                if zorder.is_empty() {
                    break;
                }
                if from_max { zorder.pop() } else { Some(zorder.remove(0)) }
            };
            let Some(name) = name else { break };
            let score = state.get_zscores(key).remove(&name).unwrap_or(0.0);
            popped.push((name, score));
        }
        Ok(popped)
    }

    pub fn zcard(&self, key: &str) -> Result<usize, RuntimeError> {
        Ok(self.state.borrow_mut().zorder_len(key))
    }

    pub fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, RuntimeError> {
        let mut state = self.state.borrow_mut();
        Ok(state.get_hash(key).insert(field.to_string(), value.to_string()).is_none())
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>, RuntimeError> {
        Ok(self.state.borrow_mut().get_hash(key).get(field).cloned())
    }

    pub fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let hash = state.get_hash(key);
        Ok(fields.iter().filter(|f| hash.remove(f.as_str()).is_some()).count())
    }

    pub fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let hash = state.get_hash(key);
        Ok(fields.iter().map(|f| hash.get(f.as_str()).cloned()).collect())
    }

    pub fn hincrby(&self, key: &str, field: &str, by: f64, as_float: bool) -> Result<String, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let hash = state.get_hash(key);
        let current: f64 = match hash.get(field) {
            Some(raw) => raw.parse().map_err(|_| RuntimeError::TypeMismatch {
                expected: "numeric string".to_string(),
                got: raw.clone(),
            })?,
            None => 0.0,
        };
        let next = current + by;
        let rendered = if as_float { format_float(next) } else { (next as i64).to_string() };
        hash.insert(field.to_string(), rendered.clone());
        Ok(rendered)
    }

    pub fn hkeys(&self, key: &str) -> Result<Vec<String>, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let mut keys: Vec<String> = state.get_hash(key).keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn hvals(&self, key: &str) -> Result<Vec<String>, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let hash = state.get_hash(key);
        let mut fields: Vec<String> = hash.keys().cloned().collect();
        fields.sort();
        Ok(fields.into_iter().map(|f| hash[&f].clone()).collect())
    }

    pub fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, RuntimeError> {
        let mut state = self.state.borrow_mut();
        let hash = state.get_hash(key);
        let mut fields: Vec<String> = hash.keys().cloned().collect();
        fields.sort();
        Ok(fields.into_iter().map(|f| (f.clone(), hash[&f].clone())).collect())
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}
