//! The dynamic JSON value carried through IR literals, script invocations,
//! and the in-memory store's scripting bridge.
//!
//! Every observable value crossing a script boundary — an argument, a
//! return value, a value read back out of the emulated store — is one of
//! these six shapes. Both backends must agree on their semantics: in
//! particular the loose numeric equality described below, and the
//! inability to tell an empty list from an empty map once it has crossed
//! the scripting bridge (see [`crate::error`] and the memory/lua backend
//! closure boundaries for where that collapse is applied).

use std::collections::BTreeMap;
use std::fmt;

/// A JSON-typed value.
///
/// `Map` uses a `BTreeMap` rather than a `HashMap` so iteration order is
/// always sorted by key, matching the source runtime's `cjson.encode(...,
/// sort_keys=True)` contract without a separate sort step.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        // Only nil and false are falsey; zero and the empty string are
        // truthy, matching the server's Lua truthiness regime.
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn is_empty_collection(&self) -> bool {
        matches!(self, Value::List(v) if v.is_empty())
            || matches!(self, Value::Map(m) if m.is_empty())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// The numeric value backing an `Int`/`Float`, for loose cross-numeric
    /// comparisons; `None` for every other variant.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Coerces a value to its display string the way Lua string coercion
    /// would (used by `redis.call` argument marshalling, which always
    /// stringifies its non-key arguments).
    pub fn coerce_str(&self) -> String {
        match self {
            Value::Null => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Map(_) => self.to_json_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(v) => serde_json::Value::Array(v.iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(a) => Value::List(a.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => {
                let mut m = BTreeMap::new();
                for (k, v) in o {
                    m.insert(k.clone(), Value::from_json(v));
                }
                Value::Map(m)
            }
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.to_json()).expect("Value always serializes")
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        Ok(Value::from_json(&json))
    }
}

/// Matches Lua's `tostring`/`tonumber` float formatting: integral floats
/// still print with no fractional part removed by `%g`-style shortening
/// here, since the source simply interpolates Python's `str(float)`.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coerce_str())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_float_compare_equal_by_value() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::Float(3.5));
    }

    #[test]
    fn truthiness_matches_lua_regime() {
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Str(String::new()).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
    }

    #[test]
    fn json_round_trip_sorts_map_keys() {
        let mut m = BTreeMap::new();
        m.insert("b".to_string(), Value::Int(1));
        m.insert("a".to_string(), Value::Int(2));
        let v = Value::Map(m);
        assert_eq!(v.to_json_string(), r#"{"a":2,"b":1}"#);
        let back = Value::from_json_str(&v.to_json_string()).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn empty_collections_are_detected() {
        assert!(Value::List(vec![]).is_empty_collection());
        assert!(Value::Map(BTreeMap::new()).is_empty_collection());
        assert!(!Value::List(vec![Value::Int(1)]).is_empty_collection());
    }
}
