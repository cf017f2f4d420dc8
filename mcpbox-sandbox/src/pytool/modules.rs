//! Curated module proxies
//!
//! `import m` succeeds only when `m` is on the allowlist, and the imported
//! module exposes exactly the attributes listed here and nothing else.
//! Submodules that are themselves modules (`urllib.parse`) are wrapped the
//! same way. `os` is special-cased in the interpreter: it is always
//! importable but exposes only the secrets-backed `environ`/`getenv`.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use crate::pytool::value::{MatchData, PyExc, Value};

/// Modules importable when a server has no custom allowlist.
pub const DEFAULT_ALLOWED_MODULES: &[&str] =
    &["json", "math", "datetime", "re", "base64", "random", "urllib"];

/// Whether an import may proceed. `os` is always available (as the
/// isolated variant).
pub fn is_module_allowed(name: &str, allowed: Option<&HashSet<String>>) -> bool {
    if name == "os" {
        return true;
    }
    match allowed {
        Some(set) => set.contains(name),
        None => DEFAULT_ALLOWED_MODULES.contains(&name),
    }
}

fn attr_error(module: &str, attr: &str) -> PyExc {
    PyExc::new(
        "AttributeError",
        format!("module '{module}' has no accessible attribute '{attr}'"),
    )
}

fn type_error(message: impl Into<String>) -> PyExc {
    PyExc::new("TypeError", message)
}

fn value_error(message: impl Into<String>) -> PyExc {
    PyExc::new("ValueError", message)
}

fn bound(module: &str, method: &str) -> Value {
    Value::BoundMethod {
        recv: Box::new(Value::Module(module.into())),
        method: method.into(),
    }
}

/// Resolve an attribute on a module proxy.
pub fn module_attr(module: &str, attr: &str) -> Result<Value, PyExc> {
    match module {
        "json" => match attr {
            "dumps" | "loads" => Ok(bound(module, attr)),
            _ => Err(attr_error(module, attr)),
        },
        "math" => match attr {
            "pi" => Ok(Value::Float(std::f64::consts::PI)),
            "e" => Ok(Value::Float(std::f64::consts::E)),
            "tau" => Ok(Value::Float(std::f64::consts::TAU)),
            "inf" => Ok(Value::Float(f64::INFINITY)),
            "nan" => Ok(Value::Float(f64::NAN)),
            "sqrt" | "floor" | "ceil" | "fabs" | "exp" | "log" | "log2" | "log10" | "sin"
            | "cos" | "tan" | "pow" | "isnan" | "isinf" => Ok(bound(module, attr)),
            _ => Err(attr_error(module, attr)),
        },
        "datetime" => match attr {
            "datetime" | "date" | "timezone" => Ok(Value::Module(format!("datetime.{attr}").into())),
            "timedelta" => Ok(bound(module, "timedelta")),
            _ => Err(attr_error(module, attr)),
        },
        "datetime.datetime" => match attr {
            "now" | "utcnow" | "fromisoformat" | "fromtimestamp" => Ok(bound(module, attr)),
            _ => Err(attr_error(module, attr)),
        },
        "datetime.date" => match attr {
            "today" => Ok(bound(module, attr)),
            _ => Err(attr_error(module, attr)),
        },
        "datetime.timezone" => match attr {
            "utc" => Ok(Value::str("UTC")),
            _ => Err(attr_error(module, attr)),
        },
        "re" => match attr {
            "search" | "match" | "findall" | "sub" | "split" => Ok(bound(module, attr)),
            _ => Err(attr_error(module, attr)),
        },
        "base64" => match attr {
            "b64encode" | "b64decode" => Ok(bound(module, attr)),
            _ => Err(attr_error(module, attr)),
        },
        "random" => match attr {
            "random" | "randint" | "choice" | "shuffle" | "uniform" => Ok(bound(module, attr)),
            _ => Err(attr_error(module, attr)),
        },
        "urllib" => match attr {
            "parse" => Ok(Value::Module("urllib.parse".into())),
            _ => Err(attr_error(module, attr)),
        },
        "urllib.parse" => match attr {
            "quote" | "unquote" | "urlencode" => Ok(bound(module, attr)),
            _ => Err(attr_error(module, attr)),
        },
        _ => Err(attr_error(module, attr)),
    }
}

fn one_str(args: &[Value], func: &str) -> Result<String, PyExc> {
    match args {
        [Value::Str(s)] => Ok(s.to_string()),
        [other] => Err(type_error(format!(
            "{func}() expected str, got {}",
            other.type_name()
        ))),
        _ => Err(type_error(format!("{func}() takes exactly one argument"))),
    }
}

fn as_float(value: &Value, func: &str) -> Result<f64, PyExc> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Bool(b) => Ok(*b as i64 as f64),
        other => Err(type_error(format!(
            "{func}() expected a number, got {}",
            other.type_name()
        ))),
    }
}

/// Call a function exposed by a module proxy. Pure functions only; the
/// interpreter handles anything needing its own state.
pub fn call_module_function(
    module: &str,
    method: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<Value, PyExc> {
    match (module, method) {
        ("json", "dumps") => {
            let value = args
                .first()
                .ok_or_else(|| type_error("dumps() takes exactly one argument"))?;
            let indent = kwargs
                .iter()
                .find(|(k, _)| k == "indent")
                .map(|(_, v)| v.is_truthy())
                .unwrap_or(false);
            let json = value.to_json();
            let text = if indent {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            }
            .map_err(|e| value_error(format!("not JSON serialisable: {e}")))?;
            Ok(Value::str(text))
        }
        ("json", "loads") => {
            let text = one_str(args, "loads")?;
            let parsed: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| value_error(format!("invalid JSON: {e}")))?;
            Ok(Value::from_json(&parsed))
        }

        ("math", _) => {
            let func = method;
            match func {
                "isnan" => Ok(Value::Bool(as_float(&args[0], func)?.is_nan())),
                "isinf" => Ok(Value::Bool(as_float(&args[0], func)?.is_infinite())),
                "pow" => {
                    if args.len() != 2 {
                        return Err(type_error("pow() takes exactly two arguments"));
                    }
                    Ok(Value::Float(
                        as_float(&args[0], func)?.powf(as_float(&args[1], func)?),
                    ))
                }
                "log" => {
                    let x = as_float(&args[0], func)?;
                    if x <= 0.0 {
                        return Err(value_error("math domain error"));
                    }
                    if let Some(base) = args.get(1) {
                        Ok(Value::Float(x.log(as_float(base, func)?)))
                    } else {
                        Ok(Value::Float(x.ln()))
                    }
                }
                _ => {
                    let x = as_float(
                        args.first()
                            .ok_or_else(|| type_error(format!("{func}() takes one argument")))?,
                        func,
                    )?;
                    let out = match func {
                        "sqrt" => {
                            if x < 0.0 {
                                return Err(value_error("math domain error"));
                            }
                            x.sqrt()
                        }
                        "floor" => return Ok(Value::Int(x.floor() as i64)),
                        "ceil" => return Ok(Value::Int(x.ceil() as i64)),
                        "fabs" => x.abs(),
                        "exp" => x.exp(),
                        "log2" => x.log2(),
                        "log10" => x.log10(),
                        "sin" => x.sin(),
                        "cos" => x.cos(),
                        "tan" => x.tan(),
                        _ => return Err(attr_error("math", func)),
                    };
                    Ok(Value::Float(out))
                }
            }
        }

        ("datetime.datetime", "now") | ("datetime.datetime", "utcnow") => {
            Ok(Value::DateTime(Utc::now()))
        }
        ("datetime.datetime", "fromisoformat") => {
            let text = one_str(args, "fromisoformat")?;
            let parsed = DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S")
                        .or_else(|_| {
                            chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
                        })
                        .map(|naive| Utc.from_utc_datetime(&naive))
                })
                .or_else(|_| {
                    chrono::NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                        .map(|d| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).expect("midnight")))
                })
                .map_err(|_| value_error(format!("invalid isoformat string: '{text}'")))?;
            Ok(Value::DateTime(parsed))
        }
        ("datetime.datetime", "fromtimestamp") => {
            let ts = as_float(
                args.first()
                    .ok_or_else(|| type_error("fromtimestamp() takes one argument"))?,
                "fromtimestamp",
            )?;
            Utc.timestamp_opt(ts as i64, ((ts.fract()) * 1e9) as u32)
                .single()
                .map(Value::DateTime)
                .ok_or_else(|| value_error("timestamp out of range"))
        }
        ("datetime.date", "today") => Ok(Value::DateTime(Utc::now())),
        ("datetime", "timedelta") => {
            let mut delta = ChronoDuration::zero();
            for (key, value) in kwargs {
                let amount = as_float(value, "timedelta")?;
                let part = match key.as_str() {
                    "days" => ChronoDuration::seconds((amount * 86_400.0) as i64),
                    "hours" => ChronoDuration::seconds((amount * 3_600.0) as i64),
                    "minutes" => ChronoDuration::seconds((amount * 60.0) as i64),
                    "seconds" => ChronoDuration::milliseconds((amount * 1_000.0) as i64),
                    "milliseconds" => ChronoDuration::milliseconds(amount as i64),
                    other => {
                        return Err(type_error(format!(
                            "timedelta() got an unexpected keyword argument '{other}'"
                        )))
                    }
                };
                delta += part;
            }
            if !args.is_empty() {
                // Positional form: timedelta(days)
                delta += ChronoDuration::seconds((as_float(&args[0], "timedelta")? * 86_400.0) as i64);
            }
            Ok(Value::TimeDelta(delta))
        }

        ("re", "search") | ("re", "match") => {
            let (pattern, haystack) = two_strs(args, method)?;
            let effective = if method == "match" {
                format!("^(?:{pattern})")
            } else {
                pattern
            };
            let re = compile_regex(&effective)?;
            match re.captures(&haystack) {
                Some(caps) => {
                    let groups = caps
                        .iter()
                        .map(|m| m.map(|m| m.as_str().to_string()))
                        .collect();
                    Ok(Value::Match(std::sync::Arc::new(MatchData { groups })))
                }
                None => Ok(Value::None),
            }
        }
        ("re", "findall") => {
            let (pattern, haystack) = two_strs(args, method)?;
            let re = compile_regex(&pattern)?;
            let matches: Vec<Value> = re
                .captures_iter(&haystack)
                .map(|caps| {
                    if caps.len() > 1 {
                        // First group, like Python with one group
                        Value::str(caps.get(1).map(|m| m.as_str()).unwrap_or(""))
                    } else {
                        Value::str(caps.get(0).map(|m| m.as_str()).unwrap_or(""))
                    }
                })
                .collect();
            Ok(Value::list(matches))
        }
        ("re", "sub") => match args {
            [Value::Str(pattern), Value::Str(repl), Value::Str(haystack)] => {
                let re = compile_regex(pattern)?;
                // Python group references use \1; regex crate uses $1
                let replacement = repl.replace("\\", "$");
                Ok(Value::str(re.replace_all(haystack, replacement.as_str()).to_string()))
            }
            _ => Err(type_error("sub() takes (pattern, repl, string)")),
        },
        ("re", "split") => {
            let (pattern, haystack) = two_strs(args, method)?;
            let re = compile_regex(&pattern)?;
            Ok(Value::list(
                re.split(&haystack).map(Value::str).collect::<Vec<_>>(),
            ))
        }

        ("base64", "b64encode") => {
            let text = one_str(args, "b64encode")?;
            Ok(Value::str(BASE64.encode(text.as_bytes())))
        }
        ("base64", "b64decode") => {
            let text = one_str(args, "b64decode")?;
            let bytes = BASE64
                .decode(text.trim())
                .map_err(|e| value_error(format!("invalid base64: {e}")))?;
            String::from_utf8(bytes)
                .map(Value::str)
                .map_err(|_| value_error("decoded bytes are not valid UTF-8"))
        }

        ("random", "random") => Ok(Value::Float(fastrand::f64())),
        ("random", "uniform") => {
            let a = as_float(&args[0], "uniform")?;
            let b = as_float(&args[1], "uniform")?;
            Ok(Value::Float(a + (b - a) * fastrand::f64()))
        }
        ("random", "randint") => match args {
            [Value::Int(a), Value::Int(b)] if a <= b => Ok(Value::Int(fastrand::i64(*a..=*b))),
            _ => Err(value_error("randint() requires integers a <= b")),
        },
        ("random", "choice") => match args {
            [Value::List(items)] => {
                let items = items.lock();
                if items.is_empty() {
                    return Err(PyExc::new("IndexError", "cannot choose from an empty sequence"));
                }
                Ok(items[fastrand::usize(..items.len())].clone())
            }
            _ => Err(type_error("choice() expects a list")),
        },
        ("random", "shuffle") => match args {
            [Value::List(items)] => {
                let mut items = items.lock();
                fastrand::shuffle(&mut items);
                Ok(Value::None)
            }
            _ => Err(type_error("shuffle() expects a list")),
        },

        ("urllib.parse", "quote") => {
            let text = one_str(args, "quote")?;
            Ok(Value::str(percent_encode(&text)))
        }
        ("urllib.parse", "unquote") => {
            let text = one_str(args, "unquote")?;
            Ok(Value::str(percent_decode(&text)))
        }
        ("urllib.parse", "urlencode") => match args {
            [Value::Dict(map)] => {
                let map = map.lock();
                let parts: Vec<String> = map
                    .entries()
                    .iter()
                    .map(|(k, v)| {
                        format!(
                            "{}={}",
                            percent_encode(&k.as_display()),
                            percent_encode(&v.to_display())
                        )
                    })
                    .collect();
                Ok(Value::str(parts.join("&")))
            }
            _ => Err(type_error("urlencode() expects a dict")),
        },

        _ => Err(attr_error(module, method)),
    }
}

fn two_strs(args: &[Value], func: &str) -> Result<(String, String), PyExc> {
    match args {
        [Value::Str(a), Value::Str(b)] => Ok((a.to_string(), b.to_string())),
        _ => Err(type_error(format!("{func}() takes (pattern, string)"))),
    }
}

fn compile_regex(pattern: &str) -> Result<regex::Regex, PyExc> {
    regex::Regex::new(pattern).map_err(|e| value_error(format!("invalid regex: {e}")))
}

fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(
                std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                16,
            ) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        if bytes[i] == b'+' {
            out.push(b' ');
        } else {
            out.push(bytes[i]);
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}
