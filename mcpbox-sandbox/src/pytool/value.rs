//! Runtime values for the tool language
//!
//! Containers use `Arc<Mutex<..>>` so values stay `Send` across the await
//! points of the HTTP collaborator. Lock guards are never held across an
//! await.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Number, Value as JsonValue};

use crate::pytool::ast::FunctionDef;

/// A raised exception instance.
#[derive(Debug, Clone)]
pub struct PyExc {
    /// Exception type name (`ValueError`, `SSRFError`, …).
    pub kind: String,
    pub message: String,
}

impl PyExc {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Regex match object surfaced by the `re` module proxy.
#[derive(Debug, Clone)]
pub struct MatchData {
    /// Group 0 is the whole match.
    pub groups: Vec<Option<String>>,
}

/// Ordered dictionary with Python-like keys.
#[derive(Debug, Clone, Default)]
pub struct DictImpl {
    entries: Vec<(DictKey, Value)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Str(String),
    Int(i64),
    Bool(bool),
    None,
}

impl DictKey {
    pub fn as_display(&self) -> String {
        match self {
            DictKey::Str(s) => s.clone(),
            DictKey::Int(i) => i.to_string(),
            DictKey::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            DictKey::None => "None".to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::Str(s) => Value::str(s.clone()),
            DictKey::Int(i) => Value::Int(*i),
            DictKey::Bool(b) => Value::Bool(*b),
            DictKey::None => Value::None,
        }
    }
}

impl DictImpl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &DictKey) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&mut self, key: DictKey, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &DictKey) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains(&self, key: &DictKey) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(DictKey, Value)] {
        &self.entries
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Mutex<Vec<Value>>>),
    Tuple(Arc<Vec<Value>>),
    Dict(Arc<Mutex<DictImpl>>),
    Set(Arc<Mutex<Vec<Value>>>),
    Function(Arc<FunctionDef>),
    /// Allowlisted builtin, dispatched by name.
    Builtin(&'static str),
    /// Constructible/catchable exception type.
    ExcType(&'static str),
    /// A raised exception instance.
    Exception(Arc<PyExc>),
    /// Method bound to its receiver, dispatched by name.
    BoundMethod {
        recv: Box<Value>,
        method: Arc<str>,
    },
    /// Curated module proxy, dispatched by module name.
    Module(Arc<str>),
    /// The injected HTTP collaborator.
    Http,
    DateTime(DateTime<Utc>),
    TimeDelta(ChronoDuration),
    Match(Arc<MatchData>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Arc::from(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn dict(map: DictImpl) -> Value {
        Value::Dict(Arc::new(Mutex::new(map)))
    }

    pub fn set(items: Vec<Value>) -> Value {
        Value::Set(Arc::new(Mutex::new(items)))
    }

    /// Python type name, for error messages and `isinstance`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::ExcType(_) => "type",
            Value::Exception(_) => "Exception",
            Value::BoundMethod { .. } => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::Http => "HttpClient",
            Value::DateTime(_) => "datetime",
            Value::TimeDelta(_) => "timedelta",
            Value::Match(_) => "re.Match",
        }
    }

    /// Python truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.lock().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(map) => !map.lock().is_empty(),
            Value::Set(items) => !items.lock().is_empty(),
            _ => true,
        }
    }

    /// `str()` rendering.
    pub fn to_display(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => s.to_string(),
            Value::Exception(exc) => exc.message.clone(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            Value::TimeDelta(d) => format!("{}s", d.num_seconds()),
            other => other.to_repr(),
        }
    }

    /// `repr()` rendering.
    pub fn to_repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => {
                let items = items.lock().clone();
                let parts: Vec<String> = items.iter().map(Value::to_repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_repr).collect();
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Value::Dict(map) => {
                let map = map.lock().clone();
                let parts: Vec<String> = map
                    .entries()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value().to_repr(), v.to_repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Set(items) => {
                let items = items.lock().clone();
                if items.is_empty() {
                    return "set()".to_string();
                }
                let parts: Vec<String> = items.iter().map(Value::to_repr).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Function(def) => format!("<function {}>", def.name),
            Value::Builtin(name) => format!("<built-in function {name}>"),
            Value::ExcType(name) => format!("<class '{name}'>"),
            Value::Exception(exc) => format!("{}('{}')", exc.kind, exc.message),
            Value::BoundMethod { method, .. } => format!("<bound method {method}>"),
            Value::Module(name) => format!("<module '{name}'>"),
            Value::Http => "<http client>".to_string(),
            Value::Match(_) => "<re.Match object>".to_string(),
            other => other.to_display(),
        }
    }

    /// Key form for dict storage; unhashable values are rejected by the
    /// caller.
    pub fn as_dict_key(&self) -> Option<DictKey> {
        match self {
            Value::Str(s) => Some(DictKey::Str(s.to_string())),
            Value::Int(i) => Some(DictKey::Int(*i)),
            Value::Bool(b) => Some(DictKey::Bool(*b)),
            Value::None => Some(DictKey::None),
            _ => None,
        }
    }

    /// Structural equality with int/float cross-comparison.
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => {
                (*a as i64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.lock().clone();
                let b = b.lock().clone();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.lock().clone();
                let b = b.lock().clone();
                a.len() == b.len()
                    && a.entries().iter().all(|(k, v)| {
                        b.get(k).map(|other| v.py_eq(&other)).unwrap_or(false)
                    })
            }
            (Value::Set(a), Value::Set(b)) => {
                let a = a.lock().clone();
                let b = b.lock().clone();
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.py_eq(y)))
            }
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::TimeDelta(a), Value::TimeDelta(b)) => a == b,
            _ => false,
        }
    }

    /// Convert to JSON for results and `json.dumps`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::None => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Str(s) => JsonValue::String(s.to_string()),
            Value::List(items) => {
                JsonValue::Array(items.lock().iter().map(Value::to_json).collect())
            }
            Value::Tuple(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Set(items) => {
                JsonValue::Array(items.lock().iter().map(Value::to_json).collect())
            }
            Value::Dict(map) => {
                let map = map.lock();
                let mut out = Map::new();
                for (key, value) in map.entries() {
                    out.insert(key.as_display(), value.to_json());
                }
                JsonValue::Object(out)
            }
            Value::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            other => JsonValue::String(other.to_display()),
        }
    }

    /// Convert JSON (tool arguments, HTTP bodies) into a runtime value.
    pub fn from_json(value: &JsonValue) -> Value {
        match value {
            JsonValue::Null => Value::None,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::str(s.clone()),
            JsonValue::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => {
                let mut dict = DictImpl::new();
                for (key, value) in map {
                    dict.insert(DictKey::Str(key.clone()), Value::from_json(value));
                }
                Value::dict(dict)
            }
        }
    }

    /// Convert a secrets map into the read-only `os.environ` dict.
    pub fn from_string_map(map: &HashMap<String, String>) -> Value {
        let mut dict = DictImpl::new();
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            dict.insert(DictKey::Str(key.clone()), Value::str(map[key].clone()));
        }
        Value::dict(dict)
    }
}

/// Python ordering for sortable values; `None` when the pair is unordered.
pub fn py_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Bool(x), Value::Int(y)) => Some((*x as i64).cmp(y)),
        (Value::Int(x), Value::Bool(y)) => Some(x.cmp(&(*y as i64))),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        (Value::TimeDelta(x), Value::TimeDelta(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let x = x.lock().clone();
            let y = y.lock().clone();
            for (a, b) in x.iter().zip(y.iter()) {
                match py_cmp(a, b)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            for (a, b) in x.iter().zip(y.iter()) {
                match py_cmp(a, b)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => None,
    }
}

fn format_float(f: f64) -> String {
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f.is_nan() {
        return "nan".to_string();
    }
    if f == f.trunc() && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
        assert!(Value::Int(3).is_truthy());
        assert!(Value::str("x").is_truthy());
    }

    #[test]
    fn display_matches_python() {
        assert_eq!(Value::Bool(true).to_display(), "True");
        assert_eq!(Value::None.to_display(), "None");
        assert_eq!(Value::Float(6.0).to_display(), "6.0");
        assert_eq!(Value::Float(2.5).to_display(), "2.5");
        assert_eq!(Value::Int(6).to_display(), "6");
    }

    #[test]
    fn repr_of_containers() {
        let list = Value::list(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(list.to_repr(), "[1, 'a']");
        let tup = Value::Tuple(Arc::new(vec![Value::Int(1)]));
        assert_eq!(tup.to_repr(), "(1,)");
    }

    #[test]
    fn json_round_trip() {
        let original = json!({"city": "Berlin", "days": 3, "nested": {"a": [1, 2.5, null, true]}});
        let value = Value::from_json(&original);
        assert_eq!(value.to_json(), original);
    }

    #[test]
    fn cross_numeric_equality() {
        assert!(Value::Int(3).py_eq(&Value::Float(3.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Int(3).py_eq(&Value::str("3")));
    }

    #[test]
    fn dict_preserves_insertion_order() {
        let mut dict = DictImpl::new();
        dict.insert(DictKey::Str("z".into()), Value::Int(1));
        dict.insert(DictKey::Str("a".into()), Value::Int(2));
        dict.insert(DictKey::Str("z".into()), Value::Int(3));
        let keys: Vec<String> = dict.entries().iter().map(|(k, _)| k.as_display()).collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert!(dict.get(&DictKey::Str("z".into())).unwrap().py_eq(&Value::Int(3)));
    }
}
