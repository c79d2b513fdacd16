//! Function and command registries for the memory backend.
//!
//! Mirrors `redipy.plugin.ArgcSpec` plus the `redis_fn`/`call_fn` dispatch
//! tables of `redipy.memory.rt.LocalRuntime`: every general function
//! (`tostring`, `cjson.encode`, ...) and every Redis command (`set`,
//! `zadd`, ...) a script can call is listed once here with its accepted
//! argument count, so a typo'd or wrong-arity call fails with a precise
//! [`RuntimeError`] before it ever reaches [`crate::memory::state::Machine`].

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::RuntimeError;
use crate::memory::state::{Machine, SetMode};
use crate::value::Value;

/// Accepted argument count for a function or command. Mirrors
/// `redipy.plugin.ArgcSpec`'s `count`/`at_least`/`at_most` fields.
#[derive(Debug, Clone, Copy)]
pub struct ArgcSpec {
    pub count: usize,
    pub at_least: bool,
    pub at_most: Option<usize>,
}

impl ArgcSpec {
    const fn exact(count: usize) -> Self {
        ArgcSpec { count, at_least: false, at_most: None }
    }

    const fn at_least(count: usize) -> Self {
        ArgcSpec { count, at_least: true, at_most: None }
    }

    const fn range(count: usize, at_most: usize) -> Self {
        ArgcSpec { count, at_least: false, at_most: Some(at_most) }
    }

    fn accepts(&self, argc: usize) -> bool {
        if argc == self.count {
            return true;
        }
        if let Some(at_most) = self.at_most {
            if argc <= at_most {
                return true;
            }
        }
        if self.at_least && argc > self.count {
            return true;
        }
        false
    }

    fn describe(&self) -> String {
        match (self.at_least, self.at_most) {
            (true, _) => format!("at least {}", self.count),
            (_, Some(at_most)) => format!("{}..{}", self.count, at_most),
            _ => self.count.to_string(),
        }
    }
}

fn check_argc(name: &str, spec: ArgcSpec, args: &[Value]) -> Result<(), RuntimeError> {
    if spec.accepts(args.len()) {
        return Ok(());
    }
    Err(RuntimeError::ArgCountMismatch {
        name: name.to_string(),
        expected: spec.describe(),
        got: args.len(),
    })
}

lazy_static! {
    static ref GENERAL_ARGC: HashMap<&'static str, ArgcSpec> = {
        let mut m = HashMap::new();
        m.insert("string.find", ArgcSpec::range(2, 3));
        m.insert("cjson.decode", ArgcSpec::exact(1));
        m.insert("cjson.encode", ArgcSpec::exact(1));
        m.insert("tonumber", ArgcSpec::exact(1));
        m.insert("tostring", ArgcSpec::exact(1));
        m.insert("type", ArgcSpec::exact(1));
        m.insert("redis.log", ArgcSpec::exact(2));
        m.insert("asintstr", ArgcSpec::exact(1));
        m
    };
    static ref REDIS_ARGC: HashMap<&'static str, ArgcSpec> = {
        let mut m = HashMap::new();
        m.insert("set", ArgcSpec::at_least(2));
        m.insert("get", ArgcSpec::exact(1));
        m.insert("exists", ArgcSpec::at_least(1));
        m.insert("del", ArgcSpec::at_least(1));
        m.insert("incrby", ArgcSpec::exact(2));
        m.insert("incrbyfloat", ArgcSpec::exact(2));
        m.insert("lpush", ArgcSpec::at_least(2));
        m.insert("rpush", ArgcSpec::at_least(2));
        m.insert("lpop", ArgcSpec::range(1, 2));
        m.insert("rpop", ArgcSpec::range(1, 2));
        m.insert("llen", ArgcSpec::exact(1));
        m.insert("zadd", ArgcSpec::at_least(3));
        m.insert("zpopmax", ArgcSpec::range(1, 2));
        m.insert("zpopmin", ArgcSpec::range(1, 2));
        m.insert("zcard", ArgcSpec::exact(1));
        m.insert("hset", ArgcSpec::at_least(3));
        m.insert("hget", ArgcSpec::exact(2));
        m.insert("hdel", ArgcSpec::at_least(2));
        m.insert("hmget", ArgcSpec::at_least(2));
        m.insert("hincrby", ArgcSpec::exact(3));
        m.insert("hincrbyfloat", ArgcSpec::exact(3));
        m.insert("hkeys", ArgcSpec::exact(1));
        m.insert("hvals", ArgcSpec::exact(1));
        m.insert("hgetall", ArgcSpec::exact(1));
        m
    };
}

/// Dispatches `redis.call`/`redis.pcall`'s first argument: `name` is the
/// command name (`"set"`, `"zadd"`, ...), `args` the command's own
/// arguments (the key followed by whatever the command expects).
pub fn call_redis_command(machine: &Machine, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let spec = REDIS_ARGC.get(name).copied().ok_or_else(|| RuntimeError::UnknownCommand(name.to_string()))?;
    check_argc(name, spec, args)?;
    let key = args[0].coerce_str();
    match name {
        "set" => {
            let value = args[1].coerce_str();
            let (mode, return_previous, expire_in, keep_ttl) = parse_set_options(&args[2..])?;
            let prev = machine.set(&key, &value, mode, return_previous, expire_in, keep_ttl)?;
            Ok(match prev {
                Some(v) => Value::Str(v),
                None => Value::Null,
            })
        }
        "get" => Ok(machine.get(&key)?.map(Value::Str).unwrap_or(Value::Null)),
        "exists" => {
            let mut count = 0;
            for arg in args {
                if machine.exists(&arg.coerce_str())? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "del" => {
            let mut count = 0;
            for arg in args {
                if machine.delete(&arg.coerce_str())? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "incrby" => {
            let by = args[1].as_int().ok_or_else(|| type_mismatch("integer", &args[1]))?;
            Ok(Value::Str(machine.incrby(&key, by as f64, false)?))
        }
        "incrbyfloat" => {
            let by = as_f64(&args[1])?;
            Ok(Value::Str(machine.incrby(&key, by, true)?))
        }
        "lpush" => Ok(Value::Int(machine.lpush(&key, &coerce_all(&args[1..]))? as i64)),
        "rpush" => Ok(Value::Int(machine.rpush(&key, &coerce_all(&args[1..]))? as i64)),
        "lpop" => {
            let count = optional_count(&args, 1)?;
            Ok(pop_result(machine.lpop(&key, count)?, count.is_some()))
        }
        "rpop" => {
            let count = optional_count(&args, 1)?;
            Ok(pop_result(machine.rpop(&key, count)?, count.is_some()))
        }
        "llen" => Ok(Value::Int(machine.llen(&key)? as i64)),
        "zadd" => {
            let mapping = score_member_pairs(name, &args[1..])?;
            Ok(Value::Int(machine.zadd(&key, &mapping)? as i64))
        }
        "zpopmax" => Ok(zpop_result(machine.zpop_max(&key, optional_count(&args, 1)?.unwrap_or(1))?)),
        "zpopmin" => Ok(zpop_result(machine.zpop_min(&key, optional_count(&args, 1)?.unwrap_or(1))?)),
        "zcard" => Ok(Value::Int(machine.zcard(&key)? as i64)),
        "hset" => {
            let pairs = field_value_pairs(name, &args[1..])?;
            let mut added = 0;
            for (field, value) in &pairs {
                if machine.hset(&key, field, value)? {
                    added += 1;
                }
            }
            Ok(Value::Int(added as i64))
        }
        "hget" => {
            let field = args[1].coerce_str();
            Ok(machine.hget(&key, &field)?.map(Value::Str).unwrap_or(Value::Null))
        }
        "hdel" => Ok(Value::Int(machine.hdel(&key, &coerce_all(&args[1..]))? as i64)),
        // A mapping, not a flat list: spec.md §6 requires "mapping for
        // hgetall/hmget (keys are field names; missing fields map to null in
        // hmget)", so the fields requested are paired back up with their
        // (possibly missing) values rather than left as a positional array.
        "hmget" => {
            let fields = coerce_all(&args[1..]);
            let values = machine.hmget(&key, &fields)?;
            Ok(Value::Map(
                fields
                    .into_iter()
                    .zip(values)
                    .map(|(field, value)| (field, value.map(Value::Str).unwrap_or(Value::Null)))
                    .collect(),
            ))
        }
        "hincrby" => {
            let field = args[1].coerce_str();
            let by = args[2].as_int().ok_or_else(|| type_mismatch("integer", &args[2]))?;
            Ok(Value::Str(machine.hincrby(&key, &field, by as f64, false)?))
        }
        "hincrbyfloat" => {
            let field = args[1].coerce_str();
            let by = as_f64(&args[2])?;
            Ok(Value::Str(machine.hincrby(&key, &field, by, true)?))
        }
        "hkeys" => Ok(Value::List(machine.hkeys(&key)?.into_iter().map(Value::Str).collect())),
        "hvals" => Ok(Value::List(machine.hvals(&key)?.into_iter().map(Value::Str).collect())),
        // A mapping, not a flat list: the Lua backend unconditionally wraps
        // `hgetall` in `pairlist_dict`, so both backends must agree on the
        // JSON-object shape for Property 1 (backend equivalence) to hold.
        "hgetall" => Ok(Value::Map(machine.hgetall(&key)?.into_iter().map(|(f, v)| (f, Value::Str(v))).collect())),
        other => Err(RuntimeError::UnknownCommand(other.to_string())),
    }
}

/// Dispatches every function call that isn't `redis.call`/`redis.pcall`.
pub fn call_general_function(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let spec = GENERAL_ARGC.get(name).copied().ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()))?;
    check_argc(name, spec, args)?;
    match name {
        "string.find" => {
            let haystack = args[0].coerce_str();
            let needle = args[1].coerce_str();
            let start = if args.len() > 2 { args[2].as_int().unwrap_or(1).max(1) as usize - 1 } else { 0 };
            let found = haystack.get(start..).and_then(|rest| rest.find(&needle)).map(|ix| ix + start);
            Ok(found.map(|ix| Value::Int(ix as i64)).unwrap_or(Value::Null))
        }
        "cjson.decode" => {
            let text = args[0].coerce_str();
            Value::from_json_str(&text)
                .map_err(|_| RuntimeError::TypeMismatch { expected: "json".to_string(), got: text })
        }
        "cjson.encode" => Ok(Value::Str(args[0].to_json_string())),
        "tonumber" => {
            let text = args[0].coerce_str();
            if let Ok(i) = text.parse::<i64>() {
                Ok(Value::Int(i))
            } else {
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| RuntimeError::TypeMismatch { expected: "number".to_string(), got: text })
            }
        }
        "tostring" => Ok(Value::Str(args[0].coerce_str())),
        "type" => Ok(Value::Str(lua_type_name(&args[0]).to_string())),
        "redis.log" => {
            log::debug!("{}: {}", args[0].coerce_str(), args[1].coerce_str());
            Ok(Value::Null)
        }
        // `asintstr`: truncates toward negative infinity like Lua's
        // `math.floor`, not Python's `int()` truncation-toward-zero (see
        // the floor-vs-truncate note in the crate's top-level docs).
        "asintstr" => Ok(Value::Str((as_f64(&args[0])?.floor() as i64).to_string())),
        other => Err(RuntimeError::UnknownFunction(other.to_string())),
    }
}

fn lua_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "boolean",
        Value::Int(_) | Value::Float(_) => "number",
        Value::Str(_) => "string",
        Value::List(_) | Value::Map(_) => "table",
    }
}

fn type_mismatch(expected: &str, got: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch { expected: expected.to_string(), got: got.coerce_str() }
}

fn as_f64(value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Str(s) => s.parse().map_err(|_| type_mismatch("number", value)),
        other => Err(type_mismatch("number", other)),
    }
}

fn coerce_all(values: &[Value]) -> Vec<String> {
    values.iter().map(Value::coerce_str).collect()
}

/// Splits `zadd`'s trailing `score member [score member ...]` mapping into
/// pairs, rejecting a dangling score with no paired member.
fn score_member_pairs(name: &str, rest: &[Value]) -> Result<Vec<(String, f64)>, RuntimeError> {
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(RuntimeError::ArgCountMismatch {
            name: name.to_string(),
            expected: "key followed by score/member pairs".to_string(),
            got: rest.len() + 1,
        });
    }
    rest.chunks(2).map(|pair| Ok((pair[1].coerce_str(), as_f64(&pair[0])?))).collect()
}

/// Splits `hset`'s trailing `field value [field value ...]` mapping into
/// pairs, rejecting a dangling field with no paired value.
fn field_value_pairs(name: &str, rest: &[Value]) -> Result<Vec<(String, String)>, RuntimeError> {
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(RuntimeError::ArgCountMismatch {
            name: name.to_string(),
            expected: "key followed by field/value pairs".to_string(),
            got: rest.len() + 1,
        });
    }
    Ok(rest.chunks(2).map(|pair| (pair[0].coerce_str(), pair[1].coerce_str())).collect())
}

fn optional_count(args: &[Value], ix: usize) -> Result<Option<usize>, RuntimeError> {
    match args.get(ix) {
        None => Ok(None),
        Some(v) => Ok(Some(v.as_int().ok_or_else(|| type_mismatch("integer", v))?.max(0) as usize)),
    }
}

fn pop_result(popped: Option<Vec<String>>, had_count: bool) -> Value {
    match popped {
        None => Value::Null,
        Some(items) if had_count => Value::List(items.into_iter().map(Value::Str).collect()),
        Some(mut items) => items.pop().map(Value::Str).unwrap_or(Value::Null),
    }
}

/// A `[name, numeric-score]` pair per popped member, matching the Lua
/// backend's `pairlist_scores` helper output shape exactly — §4.2 requires
/// both backends to "surface a list of `[name, numeric-score]` pairs", not
/// the flat wire encoding real Redis itself would reply with.
fn zpop_result(popped: Vec<(String, f64)>) -> Value {
    Value::List(popped.into_iter().map(|(name, score)| Value::List(vec![Value::Str(name), Value::Float(score)])).collect())
}

/// Parses `set`'s trailing option list. `PX`/`EX` give a duration relative
/// to now; `PXAT`/`EXAT` give an absolute Unix-epoch deadline, converted to
/// the same relative `Duration` the store expects. Supplying more than one
/// of these four is a `ModeConflict`, matching the `redis.call` contract
/// that `expire_in` and `expire_timestamp` are mutually exclusive.
fn parse_set_options(opts: &[Value]) -> Result<(SetMode, bool, Option<Duration>, bool), RuntimeError> {
    let mut mode = SetMode::Always;
    let mut return_previous = false;
    let mut expire_in: Option<Duration> = None;
    let mut keep_ttl = false;
    let mut pos = 0;
    while pos < opts.len() {
        match opts[pos].coerce_str().to_uppercase().as_str() {
            "XX" => mode = SetMode::IfExists,
            "NX" => mode = SetMode::IfMissing,
            "GET" => return_previous = true,
            "KEEPTTL" => keep_ttl = true,
            "PX" => {
                pos += 1;
                let ms = opts.get(pos).and_then(Value::as_int).ok_or(RuntimeError::ModeConflict)?;
                set_expiry(&mut expire_in, Duration::from_millis(ms.max(0) as u64))?;
            }
            "EX" => {
                pos += 1;
                let secs = opts.get(pos).and_then(Value::as_int).ok_or(RuntimeError::ModeConflict)?;
                set_expiry(&mut expire_in, Duration::from_secs(secs.max(0) as u64))?;
            }
            "PXAT" => {
                pos += 1;
                let ms = opts.get(pos).and_then(Value::as_int).ok_or(RuntimeError::ModeConflict)?;
                set_expiry(&mut expire_in, duration_until_unix_millis(ms))?;
            }
            "EXAT" => {
                pos += 1;
                let secs = opts.get(pos).and_then(Value::as_int).ok_or(RuntimeError::ModeConflict)?;
                set_expiry(&mut expire_in, duration_until_unix_millis(secs.saturating_mul(1000)))?;
            }
            _ => {}
        }
        pos += 1;
    }
    Ok((mode, return_previous, expire_in, keep_ttl))
}

fn set_expiry(slot: &mut Option<Duration>, value: Duration) -> Result<(), RuntimeError> {
    if slot.is_some() {
        return Err(RuntimeError::ModeConflict);
    }
    *slot = Some(value);
    Ok(())
}

/// Converts an absolute Unix-epoch millisecond deadline into a `Duration`
/// relative to now; deadlines already in the past collapse to zero, so the
/// key expires on its very next read rather than underflowing.
fn duration_until_unix_millis(deadline_ms: i64) -> Duration {
    let deadline = UNIX_EPOCH + Duration::from_millis(deadline_ms.max(0) as u64);
    deadline.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::state::State;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn machine() -> Machine {
        Machine::new(Rc::new(RefCell::new(State::new())))
    }

    #[test]
    fn unknown_command_is_rejected() {
        let m = machine();
        let err = call_redis_command(&m, "nope", &[Value::Str("k".to_string())]).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownCommand(_)));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let m = machine();
        let err = call_redis_command(&m, "get", &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::ArgCountMismatch { .. }));
    }

    #[test]
    fn set_then_get_round_trips_through_dispatch() {
        let m = machine();
        call_redis_command(&m, "set", &[Value::Str("k".to_string()), Value::Str("v".to_string())]).unwrap();
        let got = call_redis_command(&m, "get", &[Value::Str("k".to_string())]).unwrap();
        assert_eq!(got, Value::Str("v".to_string()));
    }

    #[test]
    fn hset_accepts_a_multi_field_mapping_in_one_call() {
        let m = machine();
        let added = call_redis_command(
            &m,
            "hset",
            &[
                Value::Str("h".to_string()),
                Value::Str("a".to_string()),
                Value::Str("1".to_string()),
                Value::Str("b".to_string()),
                Value::Str("2".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(added, Value::Int(2));
        assert_eq!(m.hget("h", "a").unwrap(), Some("1".to_string()));
        assert_eq!(m.hget("h", "b").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn hset_rejects_a_dangling_field_with_no_paired_value() {
        let m = machine();
        let err = call_redis_command(
            &m,
            "hset",
            &[Value::Str("h".to_string()), Value::Str("a".to_string()), Value::Str("1".to_string()), Value::Str("b".to_string())],
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::ArgCountMismatch { .. }));
    }

    #[test]
    fn zadd_accepts_a_multi_member_mapping_in_one_call() {
        let m = machine();
        let added = call_redis_command(
            &m,
            "zadd",
            &[
                Value::Str("z".to_string()),
                Value::Float(1.0),
                Value::Str("one".to_string()),
                Value::Float(2.0),
                Value::Str("two".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(added, Value::Int(2));
        assert_eq!(m.zcard("z").unwrap(), 2);
    }

    #[test]
    fn asintstr_floors_toward_negative_infinity() {
        let got = call_general_function("asintstr", &[Value::Float(-1.5)]).unwrap();
        assert_eq!(got, Value::Str("-2".to_string()));
    }

    #[test]
    fn set_rejects_combining_a_relative_and_absolute_expiry() {
        let m = machine();
        let err = call_redis_command(
            &m,
            "set",
            &[
                Value::Str("k".to_string()),
                Value::Str("v".to_string()),
                Value::Str("EX".to_string()),
                Value::Int(10),
                Value::Str("PXAT".to_string()),
                Value::Int(9_999_999_999_999),
            ],
        )
        .unwrap_err();
        assert_eq!(err, RuntimeError::ModeConflict);
    }

    #[test]
    fn set_exat_expires_a_deadline_already_in_the_past() {
        let m = machine();
        call_redis_command(
            &m,
            "set",
            &[
                Value::Str("k".to_string()),
                Value::Str("v".to_string()),
                Value::Str("EXAT".to_string()),
                Value::Int(1),
            ],
        )
        .unwrap();
        let got = call_redis_command(&m, "get", &[Value::Str("k".to_string())]).unwrap();
        assert_eq!(got, Value::Null);
    }

    #[test]
    fn exists_and_del_count_over_n_keys() {
        let m = machine();
        call_redis_command(&m, "set", &[Value::Str("a".to_string()), Value::Str("1".to_string())]).unwrap();
        call_redis_command(&m, "set", &[Value::Str("b".to_string()), Value::Str("2".to_string())]).unwrap();

        let present = call_redis_command(
            &m,
            "exists",
            &[Value::Str("a".to_string()), Value::Str("b".to_string()), Value::Str("missing".to_string())],
        )
        .unwrap();
        assert_eq!(present, Value::Int(2));

        let removed = call_redis_command(
            &m,
            "del",
            &[Value::Str("a".to_string()), Value::Str("b".to_string()), Value::Str("missing".to_string())],
        )
        .unwrap();
        assert_eq!(removed, Value::Int(2));

        let present_after = call_redis_command(&m, "exists", &[Value::Str("a".to_string())]).unwrap();
        assert_eq!(present_after, Value::Int(0));
    }

    #[test]
    fn hmget_returns_a_field_keyed_mapping_with_nulls_for_missing_fields() {
        let m = machine();
        call_redis_command(
            &m,
            "hset",
            &[Value::Str("h".to_string()), Value::Str("a".to_string()), Value::Str("1".to_string())],
        )
        .unwrap();

        let got = call_redis_command(
            &m,
            "hmget",
            &[Value::Str("h".to_string()), Value::Str("a".to_string()), Value::Str("missing".to_string())],
        )
        .unwrap();

        let mut expected = std::collections::BTreeMap::new();
        expected.insert("a".to_string(), Value::Str("1".to_string()));
        expected.insert("missing".to_string(), Value::Null);
        assert_eq!(got, Value::Map(expected));
    }

    #[test]
    fn string_find_returns_a_zero_based_index() {
        let got = call_general_function(
            "string.find",
            &[Value::Str("hello world".to_string()), Value::Str("world".to_string())],
        )
        .unwrap();
        assert_eq!(got, Value::Int(6));

        let at_start = call_general_function(
            "string.find",
            &[Value::Str("hello".to_string()), Value::Str("hello".to_string())],
        )
        .unwrap();
        assert_eq!(at_start, Value::Int(0));
    }
}
