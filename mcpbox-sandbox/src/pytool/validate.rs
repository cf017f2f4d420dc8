//! Static source validation and input-schema derivation
//!
//! Validation runs over the raw source text *before* parsing, so escape
//! attempts are rejected even when they hide in dead code or string
//! concatenation games that the interpreter would never reach.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::error::SandboxError;
use crate::pytool::ast::{annotation_to_string, FunctionDef, Stmt, StmtKind};
use crate::pytool::parser::parse_module;

/// Textual patterns that always reject a submission.
static FORBIDDEN_PATTERNS: &[&str] = &[
    "__class__",
    "__mro__",
    "__bases__",
    "__subclasses__",
    "__globals__",
    "__code__",
    "__loader__",
    "__spec__",
    "__builtins__",
    "[\"os\"]",
    "['os']",
    "[\"sys\"]",
    "['sys']",
    "[\"subprocess\"]",
    "['subprocess']",
    "[\"builtins\"]",
    "['builtins']",
    ".modules[",
];

static SYS_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.sys\b").expect("static regex compiles"));

static GETATTR_DUNDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"getattr\s*\([^)]*['"]__"#).expect("static regex compiles"));

/// Scan raw source for forbidden patterns. Returns the matched pattern on
/// rejection.
pub fn scan_forbidden_patterns(source: &str) -> Result<(), SandboxError> {
    for pattern in FORBIDDEN_PATTERNS {
        if source.contains(pattern) {
            return Err(SandboxError::StaticRejection {
                pattern: (*pattern).to_string(),
            });
        }
    }
    if SYS_ATTRIBUTE.is_match(source) {
        return Err(SandboxError::StaticRejection {
            pattern: ".sys".to_string(),
        });
    }
    if GETATTR_DUNDER.is_match(source) {
        return Err(SandboxError::StaticRejection {
            pattern: "getattr(..., \"__\")".to_string(),
        });
    }
    Ok(())
}

/// Full static validation: pattern scan, parse, and the `async def main`
/// requirement. Returns the parsed module.
pub fn validate_source(source: &str) -> Result<Vec<Stmt>, SandboxError> {
    if source.trim().is_empty() {
        return Err(SandboxError::SyntaxError {
            line: 1,
            message: "code cannot be empty".to_string(),
        });
    }
    scan_forbidden_patterns(source)?;
    let module = parse_module(source)?;
    find_main(&module).ok_or(SandboxError::MissingMain)?;
    Ok(module)
}

/// Locate the `async def main` entry point in a parsed module.
pub fn find_main(module: &[Stmt]) -> Option<Arc<FunctionDef>> {
    for stmt in module {
        if let StmtKind::FunctionDef(def) = &stmt.kind {
            if def.name == "main" && def.is_async {
                return Some(def.clone());
            }
        }
    }
    None
}

/// Parameters never surfaced in the input schema: receiver conventions and
/// the injected HTTP collaborator.
const HIDDEN_PARAMS: &[&str] = &["self", "cls", "http"];

/// Derive the JSON Schema for a tool's input from its `main()` signature.
///
/// `Optional[T]` and `T | None` parameters become non-required; unannotated
/// parameters are required strings; unknown types default to string. Code
/// that fails validation yields an empty object schema, matching the
/// behaviour of tool imports that predate validation.
pub fn extract_input_schema(source: &str) -> Value {
    let Ok(module) = parse_module(source) else {
        return json!({"type": "object", "properties": {}});
    };
    let Some(main) = find_main(&module) else {
        return json!({"type": "object", "properties": {}});
    };

    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in &main.params {
        if HIDDEN_PARAMS.contains(&param.name.as_str()) {
            continue;
        }

        let mut prop = Map::new();
        prop.insert(
            "description".to_string(),
            json!(format!("Parameter: {}", param.name)),
        );

        match &param.annotation {
            Some(annotation) => {
                let text = annotation_to_string(annotation);
                let (base, optional) = strip_optional(&text);
                prop.insert("type".to_string(), json!(json_type_for(base)));
                if !optional {
                    required.push(param.name.clone());
                }
            }
            None => {
                prop.insert("type".to_string(), json!("string"));
                required.push(param.name.clone());
            }
        }

        properties.insert(param.name.clone(), Value::Object(prop));
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    Value::Object(schema)
}

/// Unwrap `Optional[T]` / `T | None`, reporting whether it was optional.
fn strip_optional(annotation: &str) -> (&str, bool) {
    let trimmed = annotation.trim();
    if let Some(inner) = trimmed
        .strip_prefix("Optional[")
        .and_then(|s| s.strip_suffix(']'))
    {
        return (inner.trim(), true);
    }
    if let Some(base) = trimmed.strip_suffix("| None") {
        return (base.trim(), true);
    }
    if let Some(base) = trimmed.strip_prefix("None |") {
        return (base.trim(), true);
    }
    (trimmed, false)
}

fn json_type_for(base: &str) -> &'static str {
    // Generic parameters (List[str] etc.) map on the outer constructor
    let head = base.split('[').next().unwrap_or(base).trim();
    match head {
        "str" => "string",
        "int" => "integer",
        "float" => "number",
        "bool" => "boolean",
        "list" | "List" => "array",
        "dict" | "Dict" => "object",
        _ => "string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dunder_patterns_are_rejected() {
        for source in [
            "async def main():\n    return [].__class__.__mro__",
            "async def main():\n    return ().__class__.__bases__[0].__subclasses__()",
            "x = f.__globals__",
            "c = main.__code__",
            "b = __builtins__",
        ] {
            let err = validate_source(source).unwrap_err();
            assert!(
                matches!(err, SandboxError::StaticRejection { .. }),
                "{source} should be statically rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn rejection_names_the_pattern() {
        let err = validate_source("async def main():\n    return [].__class__").unwrap_err();
        assert!(err.to_string().contains("__class__"));
    }

    #[test]
    fn module_dict_escapes_are_rejected() {
        for source in [
            "d[\"os\"]",
            "d['sys']",
            "d[\"subprocess\"]",
            "m.modules[\"x\"]",
        ] {
            assert!(scan_forbidden_patterns(source).is_err(), "{source}");
        }
    }

    #[test]
    fn sys_attribute_is_rejected_but_not_substrings() {
        assert!(scan_forbidden_patterns("x.sys").is_err());
        assert!(scan_forbidden_patterns("x.sys.path").is_err());
        assert!(scan_forbidden_patterns("ecosystem = 1").is_ok());
        assert!(scan_forbidden_patterns("x.system_name").is_ok());
    }

    #[test]
    fn getattr_dunder_string_is_rejected() {
        assert!(scan_forbidden_patterns("getattr([], \"__len__\")").is_err());
        assert!(scan_forbidden_patterns("getattr([], '__len__')").is_err());
        assert!(scan_forbidden_patterns("getattr (obj, '__dict__')").is_err());
    }

    #[test]
    fn missing_main_is_rejected() {
        assert!(matches!(
            validate_source("def main():\n    return 1"),
            Err(SandboxError::MissingMain)
        ));
        assert!(matches!(
            validate_source("x = 1"),
            Err(SandboxError::MissingMain)
        ));
    }

    #[test]
    fn empty_code_is_rejected() {
        assert!(validate_source("   \n").is_err());
    }

    #[test]
    fn valid_tool_passes() {
        assert!(validate_source("async def main(x: int) -> int:\n    return x * 2").is_ok());
    }

    #[test]
    fn schema_from_annotations() {
        let schema = extract_input_schema(
            "async def main(city: str, days: int, verbose: bool = False, ratio: float = 1.0):\n    return city",
        );
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["properties"]["days"]["type"], "integer");
        assert_eq!(schema["properties"]["verbose"]["type"], "boolean");
        assert_eq!(schema["properties"]["ratio"]["type"], "number");
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["city", "days", "verbose", "ratio"]);
    }

    #[test]
    fn optional_parameters_are_not_required() {
        let schema = extract_input_schema(
            "async def main(a: Optional[int], b: str | None, c: str):\n    return c",
        );
        assert_eq!(schema["properties"]["a"]["type"], "integer");
        assert_eq!(schema["properties"]["b"]["type"], "string");
        assert_eq!(schema["required"], json!(["c"]));
    }

    #[test]
    fn injected_params_are_hidden() {
        let schema = extract_input_schema("async def main(http, city: str):\n    return city");
        assert!(schema["properties"].get("http").is_none());
        assert_eq!(schema["required"], json!(["city"]));
    }

    #[test]
    fn container_types_map() {
        let schema =
            extract_input_schema("async def main(items: list, tags: List[str], meta: dict):\n    return items");
        assert_eq!(schema["properties"]["items"]["type"], "array");
        assert_eq!(schema["properties"]["tags"]["type"], "array");
        assert_eq!(schema["properties"]["meta"]["type"], "object");
    }

    #[test]
    fn unknown_types_default_to_string() {
        let schema = extract_input_schema("async def main(x: Widget):\n    return x");
        assert_eq!(schema["properties"]["x"]["type"], "string");
    }

    #[test]
    fn unannotated_params_are_required_strings() {
        let schema = extract_input_schema("async def main(x):\n    return x");
        assert_eq!(schema["properties"]["x"]["type"], "string");
        assert_eq!(schema["required"], json!(["x"]));
    }

    #[test]
    fn schema_is_idempotent() {
        let source = "async def main(city: str, days: Optional[int]):\n    return city";
        assert_eq!(extract_input_schema(source), extract_input_schema(source));
    }

    #[test]
    fn invalid_code_yields_empty_schema() {
        let schema = extract_input_schema("not valid python ((((");
        assert_eq!(schema, json!({"type": "object", "properties": {}}));
    }
}
