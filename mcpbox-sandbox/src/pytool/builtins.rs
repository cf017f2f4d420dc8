//! Allowlisted builtins and method dispatch
//!
//! The builtin set is an allowlist: anything not here does not exist in
//! tool code. `eval`, `exec`, `compile`, `open`, `type`, `getattr`,
//! `setattr`, `delattr`, `vars`, `dir` and the raw `__import__` are
//! deliberately absent.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::pytool::value::{py_cmp, DictImpl, DictKey, PyExc, Value};

/// Names resolvable as builtins.
pub const BUILTIN_NAMES: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "filter", "float", "int", "isinstance",
    "len", "list", "map", "max", "min", "print", "range", "repr", "reversed", "round", "set",
    "sorted", "str", "sum", "tuple", "zip",
];

/// Constructible and catchable exception types.
pub const EXCEPTION_TYPES: &[&str] = &[
    "Exception",
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "RuntimeError",
    "ZeroDivisionError",
    "AttributeError",
    "ImportError",
    "SSRFError",
    "TimeoutError",
];

/// Largest materialised sequence (`range`, `*` repetition).
pub const MAX_SEQUENCE_LEN: i64 = 10_000_000;

pub fn lookup_builtin(name: &str) -> Option<Value> {
    if let Some(found) = BUILTIN_NAMES.iter().find(|n| **n == name) {
        return Some(Value::Builtin(*found));
    }
    if let Some(found) = EXCEPTION_TYPES.iter().find(|n| **n == name) {
        return Some(Value::ExcType(*found));
    }
    None
}

fn type_error(message: impl Into<String>) -> PyExc {
    PyExc::new("TypeError", message)
}

fn value_error(message: impl Into<String>) -> PyExc {
    PyExc::new("ValueError", message)
}

fn resource_error(message: impl Into<String>) -> PyExc {
    PyExc::new("ResourceError", message)
}

/// Materialise any iterable as a vector.
pub fn iterate(value: &Value, context: &str) -> Result<Vec<Value>, PyExc> {
    match value {
        Value::List(items) => Ok(items.lock().clone()),
        Value::Tuple(items) => Ok(items.as_ref().clone()),
        Value::Set(items) => Ok(items.lock().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(map) => Ok(map
            .lock()
            .entries()
            .iter()
            .map(|(k, _)| k.to_value())
            .collect()),
        other => Err(type_error(format!(
            "{context}: '{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn as_int(value: &Value, func: &str) -> Result<i64, PyExc> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(type_error(format!(
            "{func}() expected int, got {}",
            other.type_name()
        ))),
    }
}

fn kwarg<'a>(kwargs: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

/// Call a builtin by name. `print` is handled by the interpreter, which
/// owns the capture buffer.
pub fn call_builtin(
    name: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<Value, PyExc> {
    match name {
        "abs" => match args {
            [Value::Int(i)] => Ok(Value::Int(i.wrapping_abs())),
            [Value::Float(f)] => Ok(Value::Float(f.abs())),
            _ => Err(type_error("abs() expects a number")),
        },
        "all" => {
            let items = iterate(args.first().ok_or_else(|| type_error("all() takes one argument"))?, "all")?;
            Ok(Value::Bool(items.iter().all(Value::is_truthy)))
        }
        "any" => {
            let items = iterate(args.first().ok_or_else(|| type_error("any() takes one argument"))?, "any")?;
            Ok(Value::Bool(items.iter().any(Value::is_truthy)))
        }
        "bool" => Ok(Value::Bool(
            args.first().map(Value::is_truthy).unwrap_or(false),
        )),
        "dict" => match args {
            [] => Ok(Value::dict(DictImpl::new())),
            [Value::Dict(map)] => Ok(Value::dict(map.lock().clone())),
            _ => Err(type_error("dict() accepts no positional arguments or a dict")),
        },
        "enumerate" => {
            let items = iterate(
                args.first()
                    .ok_or_else(|| type_error("enumerate() takes an iterable"))?,
                "enumerate",
            )?;
            let start = args.get(1).map(|v| as_int(v, "enumerate")).transpose()?.unwrap_or(0);
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::Tuple(Arc::new(vec![Value::Int(start + i as i64), v])))
                    .collect(),
            ))
        }
        "float" => match args {
            [] => Ok(Value::Float(0.0)),
            [Value::Int(i)] => Ok(Value::Float(*i as f64)),
            [Value::Float(f)] => Ok(Value::Float(*f)),
            [Value::Bool(b)] => Ok(Value::Float(*b as i64 as f64)),
            [Value::Str(s)] => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| value_error(format!("could not convert string to float: '{s}'"))),
            _ => Err(type_error("float() expects a number or string")),
        },
        "int" => match args {
            [] => Ok(Value::Int(0)),
            [Value::Int(i)] => Ok(Value::Int(*i)),
            [Value::Bool(b)] => Ok(Value::Int(*b as i64)),
            [Value::Float(f)] => Ok(Value::Int(*f as i64)),
            [Value::Str(s)] => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| value_error(format!("invalid literal for int(): '{s}'"))),
            [Value::Str(s), base] => {
                let base = as_int(base, "int")? as u32;
                i64::from_str_radix(s.trim(), base)
                    .map(Value::Int)
                    .map_err(|_| value_error(format!("invalid literal for int() with base {base}: '{s}'")))
            }
            _ => Err(type_error("int() expects a number or string")),
        },
        "isinstance" => {
            let [value, class] = args else {
                return Err(type_error("isinstance() takes two arguments"));
            };
            Ok(Value::Bool(isinstance(value, class)?))
        }
        "len" => {
            let out = match args {
                [Value::Str(s)] => s.chars().count() as i64,
                [Value::List(items)] => items.lock().len() as i64,
                [Value::Tuple(items)] => items.len() as i64,
                [Value::Dict(map)] => map.lock().len() as i64,
                [Value::Set(items)] => items.lock().len() as i64,
                [other] => {
                    return Err(type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
                _ => return Err(type_error("len() takes exactly one argument")),
            };
            Ok(Value::Int(out))
        }
        "list" => match args {
            [] => Ok(Value::list(Vec::new())),
            [value] => Ok(Value::list(iterate(value, "list")?)),
            _ => Err(type_error("list() takes at most one argument")),
        },
        "max" | "min" => {
            let items = if args.len() == 1 {
                iterate(&args[0], name)?
            } else {
                args.to_vec()
            };
            if items.is_empty() {
                return Err(value_error(format!("{name}() arg is an empty sequence")));
            }
            let mut best = items[0].clone();
            for item in &items[1..] {
                let ordering = py_cmp(item, &best).ok_or_else(|| {
                    type_error(format!("{name}() got unorderable types"))
                })?;
                let take = if name == "max" {
                    ordering == Ordering::Greater
                } else {
                    ordering == Ordering::Less
                };
                if take {
                    best = item.clone();
                }
            }
            Ok(best)
        }
        "range" => {
            let (start, stop, step) = match args {
                [stop] => (0, as_int(stop, "range")?, 1),
                [start, stop] => (as_int(start, "range")?, as_int(stop, "range")?, 1),
                [start, stop, step] => (
                    as_int(start, "range")?,
                    as_int(stop, "range")?,
                    as_int(step, "range")?,
                ),
                _ => return Err(type_error("range() takes 1 to 3 arguments")),
            };
            if step == 0 {
                return Err(value_error("range() arg 3 must not be zero"));
            }
            let span = if step > 0 {
                (stop - start).max(0) / step + i64::from((stop - start).max(0) % step != 0)
            } else {
                (start - stop).max(0) / (-step) + i64::from((start - stop).max(0) % (-step) != 0)
            };
            if span > MAX_SEQUENCE_LEN {
                return Err(resource_error(format!(
                    "range of {span} elements exceeds the sandbox limit"
                )));
            }
            let mut items = Vec::with_capacity(span as usize);
            let mut current = start;
            while (step > 0 && current < stop) || (step < 0 && current > stop) {
                items.push(Value::Int(current));
                current += step;
            }
            Ok(Value::list(items))
        }
        "repr" => Ok(Value::str(
            args.first()
                .ok_or_else(|| type_error("repr() takes one argument"))?
                .to_repr(),
        )),
        "reversed" => {
            let mut items = iterate(
                args.first()
                    .ok_or_else(|| type_error("reversed() takes one argument"))?,
                "reversed",
            )?;
            items.reverse();
            Ok(Value::list(items))
        }
        "round" => {
            let digits = args.get(1).map(|v| as_int(v, "round")).transpose()?.unwrap_or(0);
            match args.first() {
                Some(Value::Int(i)) => Ok(Value::Int(*i)),
                Some(Value::Float(f)) => {
                    let factor = 10f64.powi(digits as i32);
                    let rounded = (f * factor).round() / factor;
                    if digits <= 0 {
                        Ok(Value::Int(rounded as i64))
                    } else {
                        Ok(Value::Float(rounded))
                    }
                }
                _ => Err(type_error("round() expects a number")),
            }
        }
        "set" => match args {
            [] => Ok(Value::set(Vec::new())),
            [value] => {
                let mut out: Vec<Value> = Vec::new();
                for item in iterate(value, "set")? {
                    if !out.iter().any(|existing| existing.py_eq(&item)) {
                        out.push(item);
                    }
                }
                Ok(Value::set(out))
            }
            _ => Err(type_error("set() takes at most one argument")),
        },
        "sorted" => {
            let mut items = iterate(
                args.first()
                    .ok_or_else(|| type_error("sorted() takes an iterable"))?,
                "sorted",
            )?;
            let reverse = kwarg(kwargs, "reverse").map(Value::is_truthy).unwrap_or(false);
            if kwarg(kwargs, "key").is_some() {
                return Err(type_error("sorted() does not support the key argument"));
            }
            let mut failed = false;
            items.sort_by(|a, b| {
                py_cmp(a, b).unwrap_or_else(|| {
                    failed = true;
                    Ordering::Equal
                })
            });
            if failed {
                return Err(type_error("sorted() got unorderable types"));
            }
            if reverse {
                items.reverse();
            }
            Ok(Value::list(items))
        }
        "str" => Ok(Value::str(
            args.first().map(Value::to_display).unwrap_or_default(),
        )),
        "sum" => {
            let items = iterate(
                args.first()
                    .ok_or_else(|| type_error("sum() takes an iterable"))?,
                "sum",
            )?;
            let mut total_int: i64 = match args.get(1) {
                Some(v) => as_int(v, "sum")?,
                None => 0,
            };
            let mut total_float = 0.0f64;
            let mut is_float = false;
            for item in items {
                match item {
                    Value::Int(i) => {
                        if is_float {
                            total_float += i as f64;
                        } else {
                            total_int = total_int.wrapping_add(i);
                        }
                    }
                    Value::Bool(b) => {
                        if is_float {
                            total_float += b as i64 as f64;
                        } else {
                            total_int = total_int.wrapping_add(b as i64);
                        }
                    }
                    Value::Float(f) => {
                        if !is_float {
                            total_float = total_int as f64;
                            is_float = true;
                        }
                        total_float += f;
                    }
                    other => {
                        return Err(type_error(format!(
                            "unsupported operand type for sum(): '{}'",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(if is_float {
                Value::Float(total_float)
            } else {
                Value::Int(total_int)
            })
        }
        "tuple" => match args {
            [] => Ok(Value::Tuple(Arc::new(Vec::new()))),
            [value] => Ok(Value::Tuple(Arc::new(iterate(value, "tuple")?))),
            _ => Err(type_error("tuple() takes at most one argument")),
        },
        "zip" => {
            let mut columns = Vec::new();
            for arg in args {
                columns.push(iterate(arg, "zip")?);
            }
            let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(shortest);
            for i in 0..shortest {
                out.push(Value::Tuple(Arc::new(
                    columns.iter().map(|col| col[i].clone()).collect(),
                )));
            }
            Ok(Value::list(out))
        }
        // `map`/`filter` need to call back into the interpreter; handled
        // there. `print` too (capture buffer).
        _ => Err(type_error(format!("'{name}' is not callable here"))),
    }
}

fn isinstance(value: &Value, class: &Value) -> Result<bool, PyExc> {
    match class {
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if isinstance(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(name) => Ok(match *name {
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "float" => matches!(value, Value::Float(_)),
            "str" => matches!(value, Value::Str(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "list" => matches!(value, Value::List(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "set" => matches!(value, Value::Set(_)),
            "tuple" => matches!(value, Value::Tuple(_)),
            _ => false,
        }),
        Value::ExcType(name) => Ok(match value {
            Value::Exception(exc) => *name == "Exception" || exc.kind == *name,
            _ => false,
        }),
        other => Err(type_error(format!(
            "isinstance() arg 2 must be a type, got {}",
            other.type_name()
        ))),
    }
}

/// Construct an exception instance from its type.
pub fn construct_exception(kind: &'static str, args: &[Value]) -> Value {
    let message = match args {
        [] => String::new(),
        [single] => single.to_display(),
        many => {
            let parts: Vec<String> = many.iter().map(Value::to_repr).collect();
            format!("({})", parts.join(", "))
        }
    };
    Value::Exception(Arc::new(PyExc::new(kind, message)))
}

/// Dispatch a method call on a receiver value. Synchronous methods only.
pub fn call_method(
    recv: &Value,
    method: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<Value, PyExc> {
    if method.starts_with("__") {
        return Err(PyExc::new(
            "AttributeError",
            format!("access to attribute '{method}' is not allowed"),
        ));
    }
    match recv {
        Value::Str(s) => str_method(s, method, args),
        Value::List(items) => list_method(items, method, args, kwargs),
        Value::Dict(map) => dict_method(map, method, args),
        Value::Set(items) => set_method(items, method, args),
        Value::Match(data) => match_method(data, method, args),
        Value::DateTime(dt) => datetime_method(dt, method, args),
        Value::TimeDelta(delta) => match method {
            "total_seconds" => Ok(Value::Float(
                delta.num_milliseconds() as f64 / 1000.0,
            )),
            _ => Err(no_method(recv, method)),
        },
        _ => Err(no_method(recv, method)),
    }
}

fn no_method(recv: &Value, method: &str) -> PyExc {
    PyExc::new(
        "AttributeError",
        format!("'{}' object has no attribute '{method}'", recv.type_name()),
    )
}

fn str_method(s: &Arc<str>, method: &str, args: &[Value]) -> Result<Value, PyExc> {
    let expect_str = |i: usize| -> Result<&str, PyExc> {
        match args.get(i) {
            Some(Value::Str(v)) => Ok(v),
            Some(other) => Err(type_error(format!(
                "expected str argument, got {}",
                other.type_name()
            ))),
            None => Err(type_error("missing string argument")),
        }
    };
    match method {
        "upper" => Ok(Value::str(s.to_uppercase())),
        "lower" => Ok(Value::str(s.to_lowercase())),
        "strip" => Ok(Value::str(s.trim().to_string())),
        "lstrip" => Ok(Value::str(s.trim_start().to_string())),
        "rstrip" => Ok(Value::str(s.trim_end().to_string())),
        "title" => Ok(Value::str(
            s.split(' ')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => {
                            first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                        }
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        )),
        "capitalize" => {
            let mut chars = s.chars();
            Ok(Value::str(match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }))
        }
        "split" => {
            let parts: Vec<Value> = if args.is_empty() {
                s.split_whitespace().map(Value::str).collect()
            } else {
                let sep = expect_str(0)?;
                if sep.is_empty() {
                    return Err(value_error("empty separator"));
                }
                s.split(sep).map(Value::str).collect()
            };
            Ok(Value::list(parts))
        }
        "splitlines" => Ok(Value::list(s.lines().map(Value::str).collect())),
        "join" => {
            let items = iterate(args.first().ok_or_else(|| type_error("join() takes an iterable"))?, "join")?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => {
                        return Err(type_error(format!(
                            "sequence item: expected str, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::str(parts.join(s)))
        }
        "replace" => {
            let from = expect_str(0)?;
            let to = expect_str(1)?;
            Ok(Value::str(s.replace(from, to)))
        }
        "startswith" => Ok(Value::Bool(s.starts_with(expect_str(0)?))),
        "endswith" => Ok(Value::Bool(s.ends_with(expect_str(0)?))),
        "find" => Ok(Value::Int(
            s.find(expect_str(0)?)
                .map(|byte_pos| s[..byte_pos].chars().count() as i64)
                .unwrap_or(-1),
        )),
        "count" => Ok(Value::Int(s.matches(expect_str(0)?).count() as i64)),
        "isdigit" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
        )),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))),
        "zfill" => {
            let width = as_int(args.first().ok_or_else(|| type_error("zfill() takes a width"))?, "zfill")? as usize;
            let mut out = s.to_string();
            while out.len() < width {
                out.insert(0, '0');
            }
            Ok(Value::str(out))
        }
        _ => Err(no_method(&Value::Str(s.clone()), method)),
    }
}

fn list_method(
    items: &Arc<parking_lot::Mutex<Vec<Value>>>,
    method: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<Value, PyExc> {
    match method {
        "append" => {
            let value = args.first().ok_or_else(|| type_error("append() takes one argument"))?;
            items.lock().push(value.clone());
            Ok(Value::None)
        }
        "extend" => {
            let extra = iterate(
                args.first().ok_or_else(|| type_error("extend() takes an iterable"))?,
                "extend",
            )?;
            items.lock().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let index = as_int(args.first().ok_or_else(|| type_error("insert() takes an index"))?, "insert")?;
            let value = args.get(1).ok_or_else(|| type_error("insert() takes a value"))?;
            let mut guard = items.lock();
            let len = guard.len() as i64;
            let pos = index.clamp(0, len) as usize;
            guard.insert(pos, value.clone());
            Ok(Value::None)
        }
        "pop" => {
            let mut guard = items.lock();
            if guard.is_empty() {
                return Err(PyExc::new("IndexError", "pop from empty list"));
            }
            let index = match args.first() {
                Some(v) => {
                    let i = as_int(v, "pop")?;
                    let len = guard.len() as i64;
                    let normalised = if i < 0 { i + len } else { i };
                    if normalised < 0 || normalised >= len {
                        return Err(PyExc::new("IndexError", "pop index out of range"));
                    }
                    normalised as usize
                }
                None => guard.len() - 1,
            };
            Ok(guard.remove(index))
        }
        "remove" => {
            let target = args.first().ok_or_else(|| type_error("remove() takes one argument"))?;
            let mut guard = items.lock();
            match guard.iter().position(|item| item.py_eq(target)) {
                Some(pos) => {
                    guard.remove(pos);
                    Ok(Value::None)
                }
                None => Err(value_error("list.remove(x): x not in list")),
            }
        }
        "clear" => {
            items.lock().clear();
            Ok(Value::None)
        }
        "index" => {
            let target = args.first().ok_or_else(|| type_error("index() takes one argument"))?;
            let guard = items.lock();
            guard
                .iter()
                .position(|item| item.py_eq(target))
                .map(|pos| Value::Int(pos as i64))
                .ok_or_else(|| value_error("value not in list"))
        }
        "count" => {
            let target = args.first().ok_or_else(|| type_error("count() takes one argument"))?;
            Ok(Value::Int(
                items.lock().iter().filter(|item| item.py_eq(target)).count() as i64,
            ))
        }
        "sort" => {
            let reverse = kwarg(kwargs, "reverse").map(Value::is_truthy).unwrap_or(false);
            let mut guard = items.lock();
            let mut failed = false;
            guard.sort_by(|a, b| {
                py_cmp(a, b).unwrap_or_else(|| {
                    failed = true;
                    Ordering::Equal
                })
            });
            if failed {
                return Err(type_error("sort() got unorderable types"));
            }
            if reverse {
                guard.reverse();
            }
            Ok(Value::None)
        }
        "reverse" => {
            items.lock().reverse();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(items.lock().clone())),
        _ => Err(no_method(&Value::List(items.clone()), method)),
    }
}

fn dict_method(
    map: &Arc<parking_lot::Mutex<DictImpl>>,
    method: &str,
    args: &[Value],
) -> Result<Value, PyExc> {
    let key_of = |value: &Value| -> Result<DictKey, PyExc> {
        value
            .as_dict_key()
            .ok_or_else(|| type_error(format!("unhashable type: '{}'", value.type_name())))
    };
    match method {
        "get" => {
            let key = key_of(args.first().ok_or_else(|| type_error("get() takes a key"))?)?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            Ok(map.lock().get(&key).unwrap_or(default))
        }
        "keys" => Ok(Value::list(
            map.lock().entries().iter().map(|(k, _)| k.to_value()).collect(),
        )),
        "values" => Ok(Value::list(
            map.lock().entries().iter().map(|(_, v)| v.clone()).collect(),
        )),
        "items" => Ok(Value::list(
            map.lock()
                .entries()
                .iter()
                .map(|(k, v)| Value::Tuple(Arc::new(vec![k.to_value(), v.clone()])))
                .collect(),
        )),
        "pop" => {
            let key = key_of(args.first().ok_or_else(|| type_error("pop() takes a key"))?)?;
            match map.lock().remove(&key) {
                Some(value) => Ok(value),
                None => match args.get(1) {
                    Some(default) => Ok(default.clone()),
                    None => Err(PyExc::new("KeyError", key.as_display())),
                },
            }
        }
        "update" => {
            let other = match args.first() {
                Some(Value::Dict(other)) => other.lock().clone(),
                _ => return Err(type_error("update() expects a dict")),
            };
            let mut guard = map.lock();
            for (key, value) in other.entries() {
                guard.insert(key.clone(), value.clone());
            }
            Ok(Value::None)
        }
        "setdefault" => {
            let key = key_of(args.first().ok_or_else(|| type_error("setdefault() takes a key"))?)?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            let mut guard = map.lock();
            match guard.get(&key) {
                Some(existing) => Ok(existing),
                None => {
                    guard.insert(key, default.clone());
                    Ok(default)
                }
            }
        }
        "clear" => {
            *map.lock() = DictImpl::new();
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(map.lock().clone())),
        _ => Err(no_method(&Value::Dict(map.clone()), method)),
    }
}

fn set_method(
    items: &Arc<parking_lot::Mutex<Vec<Value>>>,
    method: &str,
    args: &[Value],
) -> Result<Value, PyExc> {
    match method {
        "add" => {
            let value = args.first().ok_or_else(|| type_error("add() takes one argument"))?;
            let mut guard = items.lock();
            if !guard.iter().any(|item| item.py_eq(value)) {
                guard.push(value.clone());
            }
            Ok(Value::None)
        }
        "remove" => {
            let value = args.first().ok_or_else(|| type_error("remove() takes one argument"))?;
            let mut guard = items.lock();
            match guard.iter().position(|item| item.py_eq(value)) {
                Some(pos) => {
                    guard.remove(pos);
                    Ok(Value::None)
                }
                None => Err(PyExc::new("KeyError", value.to_repr())),
            }
        }
        "discard" => {
            let value = args.first().ok_or_else(|| type_error("discard() takes one argument"))?;
            let mut guard = items.lock();
            if let Some(pos) = guard.iter().position(|item| item.py_eq(value)) {
                guard.remove(pos);
            }
            Ok(Value::None)
        }
        "clear" => {
            items.lock().clear();
            Ok(Value::None)
        }
        _ => Err(no_method(&Value::Set(items.clone()), method)),
    }
}

fn match_method(
    data: &Arc<crate::pytool::value::MatchData>,
    method: &str,
    args: &[Value],
) -> Result<Value, PyExc> {
    match method {
        "group" => {
            let index = match args.first() {
                Some(v) => as_int(v, "group")? as usize,
                None => 0,
            };
            match data.groups.get(index) {
                Some(Some(text)) => Ok(Value::str(text.clone())),
                Some(None) => Ok(Value::None),
                None => Err(PyExc::new("IndexError", "no such group")),
            }
        }
        "groups" => Ok(Value::Tuple(Arc::new(
            data.groups[1..]
                .iter()
                .map(|g| g.clone().map(Value::str).unwrap_or(Value::None))
                .collect(),
        ))),
        _ => Err(PyExc::new(
            "AttributeError",
            format!("'re.Match' object has no attribute '{method}'"),
        )),
    }
}

fn datetime_method(
    dt: &chrono::DateTime<chrono::Utc>,
    method: &str,
    args: &[Value],
) -> Result<Value, PyExc> {
    match method {
        "isoformat" => Ok(Value::str(dt.to_rfc3339())),
        "timestamp" => Ok(Value::Float(dt.timestamp_millis() as f64 / 1000.0)),
        "strftime" => match args.first() {
            Some(Value::Str(fmt)) => Ok(Value::str(dt.format(fmt).to_string())),
            _ => Err(type_error("strftime() takes a format string")),
        },
        _ => Err(PyExc::new(
            "AttributeError",
            format!("'datetime' object has no attribute '{method}'"),
        )),
    }
}
