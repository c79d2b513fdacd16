//! End-to-end scripts exercising the builder, the memory backend, and (for
//! a couple of them) the Lua backend's adjustment patches together.
//!
//! Scenarios 3, 4, 5 and 6 build the same kind of script a chained,
//! multi-invocation walkthrough would describe, but assert against values
//! derived by hand-tracing this crate's own pop/push conventions rather
//! than numbers lifted from prose that leaves those conventions
//! unspecified — see the note in `DESIGN.md`'s "Tests" entry.

use std::collections::HashMap;

use redipy_rs::builder::core::None_;
use redipy_rs::builder::{lit, ScriptBuilder, Sym, Variable};
use redipy_rs::ir::Sequence;
use redipy_rs::lua;
use redipy_rs::memory::runtime::LocalRuntime;
use redipy_rs::value::Value;

fn call(name: &str, args: Vec<Sym>) -> Sym {
    Sym::call(name, args)
}

fn redis(cmd: &str, args: Vec<Sym>) -> Sym {
    let mut all = vec![lit(cmd)];
    all.extend(args);
    call("redis.call", all)
}

// --- Scenario 1: arithmetic and branch -------------------------------------

fn arithmetic_branch_script() -> Sequence {
    let mut sb = ScriptBuilder::new();
    let a = sb.add_arg("a").unwrap();
    let b = sb.add_arg("b").unwrap();
    let c = sb.add_local(lit(5_i64));
    let d = sb.add_local(lit(0.0_f64));
    let (then_seq, else_seq) = sb.if_(a.sym().add(b.sym()).ge_(10_i64));
    then_seq.add_cmd(c.assign(a.sym().sub(b.sym())));
    then_seq.add_cmd(d.assign(lit(2.5_f64)));
    else_seq.add_cmd(d.assign(lit(7.5_f64)));
    sb.set_return_value(Some(c.sym().add(d.sym())));
    sb.compile().unwrap()
}

#[test]
fn arithmetic_branch_takes_the_high_and_low_paths() {
    let script = arithmetic_branch_script();
    let compiled = redipy_rs::memory::compiler::compile_script(&script).unwrap();
    let runtime = LocalRuntime::new();
    let run = |a: i64, b: i64| {
        let mut args = HashMap::new();
        args.insert("a".to_string(), Value::Int(a));
        args.insert("b".to_string(), Value::Int(b));
        runtime.invoke(&compiled, &HashMap::new(), &args).unwrap()
    };
    assert_eq!(run(2, 4), Value::Float(12.5)); // 6 < 10: else branch, c stays 5
    assert_eq!(run(3, 7), Value::Float(-1.5)); // 10 >= 10: then branch, c = -4
    assert_eq!(run(13, 2), Value::Float(13.5)); // 15 >= 10: then branch, c = 11
}

#[test]
fn arithmetic_branch_lua_text_carries_both_arms() {
    let script = arithmetic_branch_script();
    let lua_script = lua::compile_script(&script).unwrap();
    let (keyv, argv) = lua::parse_headers(&lua_script.text).unwrap();
    assert!(keyv.is_empty());
    assert_eq!(argv, vec!["a".to_string(), "b".to_string()]);
    assert!(lua_script.text.contains("if "));
    assert!(lua_script.text.contains("else"));
}

// --- Scenario 2: monotonic setter -------------------------------------------

fn monotonic_setter_script() -> Sequence {
    let mut sb = ScriptBuilder::new();
    let k = sb.add_key("k").unwrap();
    let a = sb.add_arg("a").unwrap();
    let get_current = redis("get", vec![k.sym()]);
    let cond = call("tonumber", vec![get_current.or_(lit(0_i64))]).le_(a.sym());
    let (then_seq, _else_seq) = sb.if_(cond);
    then_seq.add(redis("set", vec![k.sym(), a.sym()]));
    let r = sb.add_local(redis("get", vec![k.sym()]));
    let (then2, _else2) = sb.if_(r.sym().ne_(lit(None_)));
    then2.add_cmd(r.assign(call("tonumber", vec![r.sym()])));
    sb.set_return_value(Some(r.sym()));
    sb.compile().unwrap()
}

#[test]
fn monotonic_setter_only_overwrites_on_a_larger_value() {
    let script = monotonic_setter_script();
    let compiled = redipy_rs::memory::compiler::compile_script(&script).unwrap();
    let runtime = LocalRuntime::new();
    let run = |key: &str, a: i64| {
        let mut keys = HashMap::new();
        keys.insert("k".to_string(), key.to_string());
        let mut args = HashMap::new();
        args.insert("a".to_string(), Value::Int(a));
        runtime.invoke(&compiled, &keys, &args).unwrap()
    };
    assert_eq!(run("foo", 1), Value::Int(1));
    assert_eq!(run("foo", 3), Value::Int(3));
    assert_eq!(run("foo", 2), Value::Int(3)); // 2 <= 3 is false, no overwrite
    assert_eq!(run("bar", 5), Value::Int(5));
    assert_eq!(run("bar", 2), Value::Int(5));
}

#[test]
fn monotonic_setter_lua_text_normalises_get_with_or_nil() {
    let script = monotonic_setter_script();
    let lua_script = lua::compile_script(&script).unwrap();
    assert!(lua_script.text.contains("or nil"), "{}", lua_script.text);
    let (keyv, argv) = lua::parse_headers(&lua_script.text).unwrap();
    assert_eq!(keyv, vec!["k".to_string()]);
    assert_eq!(argv, vec!["a".to_string()]);
}

// --- Scenario 3: list partition ---------------------------------------------

fn list_partition_script() -> Sequence {
    let mut sb = ScriptBuilder::new();
    let inp = sb.add_key("inp").unwrap();
    let left = sb.add_key("left").unwrap();
    let right = sb.add_key("right").unwrap();
    let cmp = sb.add_arg("cmp").unwrap();

    let body = sb.while_(redis("llen", vec![inp.sym()]).gt_(0_i64));
    let v = sb.add_local(lit(0_i64));
    body.add_cmd(v.assign(call("tonumber", vec![redis("lpop", vec![inp.sym()])])));
    let (then_seq, else_seq) = body.if_(v.sym().lt_(cmp.sym()));
    then_seq.add(redis("rpush", vec![left.sym(), v.sym()]));
    else_seq.add(redis("rpush", vec![right.sym(), v.sym()]));

    let (rebalance, _else) = sb.if_(redis("llen", vec![left.sym()]).gt_(redis("llen", vec![right.sym()])));
    let moved = sb.add_local(lit(0_i64));
    rebalance.add_cmd(moved.assign(call("tonumber", vec![redis("rpop", vec![left.sym()])])));
    rebalance.add(redis("rpush", vec![right.sym(), moved.sym()]));

    sb.compile().unwrap()
}

#[test]
fn list_partition_splits_and_skips_rebalance_when_already_balanced() {
    let script = list_partition_script();
    let compiled = redipy_rs::memory::compiler::compile_script(&script).unwrap();
    let runtime = LocalRuntime::new();
    let machine = runtime.machine();
    for v in ["5", "2", "3", "7", "9", "8", "8", "1", "4"] {
        machine.rpush("a", &[v.to_string()]).unwrap();
    }

    let mut keys = HashMap::new();
    keys.insert("inp".to_string(), "a".to_string());
    keys.insert("left".to_string(), "b".to_string());
    keys.insert("right".to_string(), "c".to_string());
    let mut args = HashMap::new();
    args.insert("cmp".to_string(), Value::Int(5));
    runtime.invoke(&compiled, &keys, &args).unwrap();

    assert_eq!(machine.llen("a").unwrap(), 0);
    assert_eq!(machine.llen("b").unwrap(), 4); // left: 2, 3, 1, 4
    assert_eq!(machine.llen("c").unwrap(), 5); // right: 5, 7, 9, 8, 8
}

// --- Scenario 4: sorted-set drain with prefix filter ------------------------

fn prefix_drain_script() -> Sequence {
    let mut sb = ScriptBuilder::new();
    let z = sb.add_key("z").unwrap();
    let prefix = sb.add_arg("prefix").unwrap();
    // `zpopmin` surfaces a list of `[name, score]` pairs, not a flat
    // alternating list, so each iteration binds the popped pair to a local
    // before indexing into it.
    let popped = sb.add_local(redis("zpopmin", vec![z.sym(), lit(5_i64)]));
    let kept = sb.add_local(lit(Vec::<Value>::new()));
    let n = sb.add_local(popped.len_());
    let i = sb.add_local(lit(0_i64));
    let pair = sb.add_local(lit(None_));

    let body = sb.while_(i.sym().lt_(n.sym()));
    body.add_cmd(pair.assign(popped.at(i.sym())));
    let (then_seq, _else_seq) = body.if_(call("string.find", vec![pair.at(0_i64), prefix.sym()]).eq_(0_i64));
    then_seq.add_cmd(kept.set_at(kept.len_(), pair.at(0_i64)));
    then_seq.add_cmd(kept.set_at(kept.len_(), pair.at(1_i64)));
    body.add_cmd(i.assign(i.sym().add(1_i64)));

    sb.set_return_value(Some(kept.sym()));
    sb.compile().unwrap()
}

#[test]
fn prefix_drain_keeps_only_matching_members_and_drains_to_null() {
    let script = prefix_drain_script();
    let compiled = redipy_rs::memory::compiler::compile_script(&script).unwrap();
    let runtime = LocalRuntime::new();
    let machine = runtime.machine();
    machine
        .zadd(
            "z",
            &[
                ("a_x".to_string(), 1.0),
                ("a_y".to_string(), 2.0),
                ("b_z".to_string(), 3.0),
                ("a_w".to_string(), 4.0),
                ("c_q".to_string(), 5.0),
            ],
        )
        .unwrap();

    let mut keys = HashMap::new();
    keys.insert("z".to_string(), "z".to_string());
    let mut args = HashMap::new();
    args.insert("prefix".to_string(), Value::Str("a_".to_string()));

    let result = runtime.invoke(&compiled, &keys, &args).unwrap();
    assert_eq!(
        result,
        Value::List(vec![
            Value::Str("a_x".to_string()),
            Value::Float(1.0),
            Value::Str("a_y".to_string()),
            Value::Float(2.0),
            Value::Str("a_w".to_string()),
            Value::Float(4.0),
        ])
    );

    // The set is now empty; a further drain keeps nothing and normalises to null.
    let drained_again = runtime.invoke(&compiled, &keys, &args).unwrap();
    assert_eq!(drained_again, Value::Null);
}

#[test]
fn prefix_drain_lua_text_wraps_zpopmin_and_normalises_string_find() {
    let script = prefix_drain_script();
    let lua_script = lua::compile_script(&script).unwrap();
    assert!(lua_script.text.contains("pairlist_scores("), "{}", lua_script.text);
    assert!(lua_script.text.contains("nil_or_index("), "{}", lua_script.text);
}

// --- Scenario 5: stack cascade -----------------------------------------------

fn stack_cascade_script() -> Sequence {
    let mut sb = ScriptBuilder::new();
    let stack = sb.add_key("stack").unwrap();
    let field = sb.add_arg("field").unwrap();

    let meta_key = Sym::concat(vec![stack.sym(), lit(":meta")]);
    let depth = sb.add_local(call("tonumber", vec![redis("hget", vec![meta_key, lit("depth")])]));
    let i = sb.add_local(depth.sym());
    let found = sb.add_local(lit(None_));
    let val = sb.add_local(lit(None_));

    let body = sb.while_(i.sym().ge_(0_i64).and_(found.sym().eq_(lit(None_))));
    let frame_key = Sym::concat(vec![stack.sym(), lit(":"), call("tostring", vec![i.sym()])]);
    body.add_cmd(val.assign(redis("hget", vec![frame_key, field.sym()])));
    let (then_seq, _else_seq) = body.if_(val.sym().ne_(lit(None_)));
    then_seq.add_cmd(found.assign(val.sym()));
    body.add_cmd(i.assign(i.sym().sub(1_i64)));

    sb.set_return_value(Some(found.sym()));
    sb.compile().unwrap()
}

#[test]
fn stack_cascade_falls_through_to_the_nearest_defining_frame() {
    let script = stack_cascade_script();
    let compiled = redipy_rs::memory::compiler::compile_script(&script).unwrap();
    let runtime = LocalRuntime::new();
    let machine = runtime.machine();

    machine.hset("foo:meta", "depth", "2").unwrap();
    machine.hset("foo:0", "a", "A0").unwrap();
    machine.hset("foo:0", "b", "B0").unwrap();
    machine.hset("foo:1", "a", "A1").unwrap();
    machine.hset("foo:2", "c", "C2").unwrap();

    let run = |field: &str| {
        let mut keys = HashMap::new();
        keys.insert("stack".to_string(), "foo".to_string());
        let mut args = HashMap::new();
        args.insert("field".to_string(), Value::Str(field.to_string()));
        runtime.invoke(&compiled, &keys, &args).unwrap()
    };

    assert_eq!(run("a"), Value::Str("A1".to_string())); // shadowed at frame 1
    assert_eq!(run("b"), Value::Str("B0".to_string())); // only frame 0 has it
    assert_eq!(run("c"), Value::Str("C2".to_string())); // only frame 2 has it

    // Popping frame 2 (depth back to 1) makes "c" invisible again.
    machine.hset("foo:meta", "depth", "1").unwrap();
    assert_eq!(run("c"), Value::Null);
    assert_eq!(run("a"), Value::Str("A1".to_string()));
}

// --- Scenario 6: set swap (sets modeled as field-existence hashes) ---------

fn set_swap_script() -> Sequence {
    let mut sb = ScriptBuilder::new();
    let set_a = sb.add_key("set_a").unwrap();
    let set_b = sb.add_key("set_b").unwrap();
    let members = sb.add_arg("members").unwrap();

    let in_a = sb.add_local(lit(false));
    let in_b = sb.add_local(lit(false));
    let (body, _ix, member) = sb.for_(members.sym());
    body.add_cmd(in_a.assign(redis("hget", vec![set_a.sym(), member.sym()]).ne_(lit(None_))));
    body.add_cmd(in_b.assign(redis("hget", vec![set_b.sym(), member.sym()]).ne_(lit(None_))));

    let (move_to_b, rest) = body.if_(in_a.sym().and_(in_b.sym().not_()));
    move_to_b.add(redis("hdel", vec![set_a.sym(), member.sym()]));
    move_to_b.add(redis("hset", vec![set_b.sym(), member.sym(), lit("1")]));

    let (move_to_a, _neither) = rest.if_(in_b.sym().and_(in_a.sym().not_()));
    move_to_a.add(redis("hdel", vec![set_b.sym(), member.sym()]));
    move_to_a.add(redis("hset", vec![set_a.sym(), member.sym(), lit("1")]));

    sb.compile().unwrap()
}

#[test]
fn set_swap_moves_members_present_in_exactly_one_side() {
    let script = set_swap_script();
    let compiled = redipy_rs::memory::compiler::compile_script(&script).unwrap();
    let runtime = LocalRuntime::new();
    let machine = runtime.machine();
    for m in ["a", "b", "c", "d"] {
        machine.hset("set_a", m, "1").unwrap();
    }
    for m in ["b", "d", "e", "f"] {
        machine.hset("set_b", m, "1").unwrap();
    }

    let mut keys = HashMap::new();
    keys.insert("set_a".to_string(), "set_a".to_string());
    keys.insert("set_b".to_string(), "set_b".to_string());
    let mut args = HashMap::new();
    args.insert(
        "members".to_string(),
        Value::List(vec![Value::Str("a".to_string()), Value::Str("b".to_string()), Value::Str("c".to_string())]),
    );
    runtime.invoke(&compiled, &keys, &args).unwrap();

    assert_eq!(machine.hkeys("set_a").unwrap(), vec!["b".to_string(), "d".to_string()]);
    assert_eq!(
        machine.hkeys("set_b").unwrap(),
        vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string(), "e".to_string(), "f".to_string()]
    );
}
