//! Tree-walking interpreter for the tool language
//!
//! The interpreter owns the only paths from tool code to the outside
//! world: the allowlisted builtins, the module proxies, the isolated
//! `os`, and the SSRF-validated `http` collaborator. A step budget checks
//! the wall-clock deadline from inside the evaluation loop, so CPU-bound
//! code is preempted without relying on cooperative awaits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use mcpbox_http::{HttpError, SsrfHttpClient};

use crate::error::SandboxError;
use crate::pytool::ast::*;
use crate::pytool::builtins::{
    call_builtin, call_method, construct_exception, iterate, lookup_builtin, MAX_SEQUENCE_LEN,
};
use crate::pytool::modules::{call_module_function, is_module_allowed, module_attr};
use crate::pytool::value::{py_cmp, DictImpl, DictKey, PyExc, Value};

/// Deadline granularity: the wall clock is consulted every this many
/// interpreter steps.
const STEPS_PER_CLOCK_CHECK: u64 = 2048;

/// Maximum user-function call depth.
const MAX_CALL_DEPTH: usize = 64;

/// Captured stdout with a hard byte cap.
#[derive(Clone)]
pub struct StdoutBuffer {
    inner: Arc<Mutex<StdoutInner>>,
}

struct StdoutInner {
    text: String,
    cap: usize,
    truncated: bool,
}

impl StdoutBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdoutInner {
                text: String::new(),
                cap,
                truncated: false,
            })),
        }
    }

    fn write(&self, text: &str) {
        let mut inner = self.inner.lock();
        let remaining = inner.cap.saturating_sub(inner.text.len());
        if text.len() <= remaining {
            inner.text.push_str(text);
        } else {
            let mut end = remaining;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            let part = text[..end].to_string();
            inner.text.push_str(&part);
            inner.truncated = true;
        }
    }

    pub fn contents(&self) -> String {
        self.inner.lock().text.clone()
    }

    pub fn truncated(&self) -> bool {
        self.inner.lock().truncated
    }
}

/// Execution policy for one tool call.
#[derive(Clone)]
pub struct ExecConfig {
    pub timeout: Duration,
    pub max_output: usize,
    pub allowed_modules: Option<HashSet<String>>,
    pub secrets: HashMap<String, String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output: 1024 * 1024,
            allowed_modules: None,
            secrets: HashMap::new(),
        }
    }
}

/// Non-local exits from evaluation.
pub enum Interrupt {
    /// A catchable exception (`try`/`except` sees these).
    Exception(PyExc),
    /// Budget or sandbox violation; never catchable by tool code.
    Fatal(SandboxError),
}

impl Interrupt {
    fn raise(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Interrupt::Exception(PyExc::new(kind, message))
    }
}

type IResult<T> = Result<T, Interrupt>;

/// Statement-level control flow.
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interp {
    /// scopes[0] is the module scope; function frames stack on top.
    scopes: Vec<HashMap<String, Value>>,
    stdout: StdoutBuffer,
    http: Option<Arc<SsrfHttpClient>>,
    allowed_modules: Option<HashSet<String>>,
    secrets: HashMap<String, String>,
    deadline: Instant,
    timeout_ms: u64,
    steps: u64,
    call_depth: usize,
}

impl Interp {
    pub fn new(config: ExecConfig, stdout: StdoutBuffer, http: Option<Arc<SsrfHttpClient>>) -> Self {
        Self {
            scopes: vec![HashMap::new()],
            stdout,
            http,
            allowed_modules: config.allowed_modules,
            secrets: config.secrets,
            deadline: Instant::now() + config.timeout,
            timeout_ms: config.timeout.as_millis() as u64,
            steps: 0,
            call_depth: 0,
        }
    }

    fn step(&mut self) -> IResult<()> {
        self.steps += 1;
        if self.steps % STEPS_PER_CLOCK_CHECK == 0 && Instant::now() >= self.deadline {
            return Err(Interrupt::Fatal(SandboxError::Timeout {
                timeout_ms: self.timeout_ms,
            }));
        }
        Ok(())
    }

    /// Execute top-level statements (helper code, then the tool module).
    pub async fn run_module(&mut self, module: &[Stmt]) -> IResult<()> {
        for stmt in module {
            match self.exec_stmt(stmt).await? {
                Flow::Normal => {}
                Flow::Return(_) => break,
                Flow::Break | Flow::Continue => {
                    return Err(Interrupt::raise(
                        "SyntaxError",
                        "'break'/'continue' outside loop",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Call `main` with JSON arguments, matching parameters by name.
    pub async fn call_main(
        &mut self,
        main: Arc<FunctionDef>,
        arguments: &JsonValue,
    ) -> IResult<Value> {
        let empty = serde_json::Map::new();
        let args_map = arguments.as_object().unwrap_or(&empty);

        let mut bound = Vec::with_capacity(main.params.len());
        for param in &main.params {
            if param.name == "http" {
                bound.push(Value::Http);
                continue;
            }
            if let Some(value) = args_map.get(&param.name) {
                bound.push(Value::from_json(value));
            } else if let Some(default) = &param.default {
                let value = self.eval(default).await?;
                bound.push(value);
            } else {
                return Err(Interrupt::raise(
                    "TypeError",
                    format!("main() missing required argument: '{}'", param.name),
                ));
            }
        }

        self.invoke_function(main, bound).await
    }

    async fn invoke_function(
        &mut self,
        def: Arc<FunctionDef>,
        bound_args: Vec<Value>,
    ) -> IResult<Value> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(Interrupt::raise(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }

        let mut frame = HashMap::with_capacity(def.params.len());
        for (param, value) in def.params.iter().zip(bound_args) {
            frame.insert(param.name.clone(), value);
        }

        self.scopes.push(frame);
        self.call_depth += 1;
        let result = self.exec_body(&def.body).await;
        self.call_depth -= 1;
        self.scopes.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    async fn exec_body(&mut self, body: &[Stmt]) -> IResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt).await? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt<'a>(&'a mut self, stmt: &'a Stmt) -> BoxFuture<'a, IResult<Flow>> {
        Box::pin(async move {
            self.step()?;
            match &stmt.kind {
                StmtKind::Expr(expr) => {
                    self.eval(expr).await?;
                    Ok(Flow::Normal)
                }
                StmtKind::Assign { targets, value } => {
                    let value = self.eval(value).await?;
                    for target in targets {
                        self.assign(target, value.clone()).await?;
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::AugAssign { target, op, value } => {
                    let current = self.eval(target).await?;
                    let rhs = self.eval(value).await?;
                    let updated = self.binop(*op, current, rhs)?;
                    self.assign(target, updated).await?;
                    Ok(Flow::Normal)
                }
                StmtKind::If { branches, orelse } => {
                    for (test, body) in branches {
                        if self.eval(test).await?.is_truthy() {
                            return self.exec_body(body).await;
                        }
                    }
                    self.exec_body(orelse).await
                }
                StmtKind::While { test, body } => {
                    loop {
                        self.step()?;
                        if !self.eval(test).await?.is_truthy() {
                            break;
                        }
                        match self.exec_body(body).await? {
                            Flow::Normal | Flow::Continue => {}
                            Flow::Break => break,
                            flow @ Flow::Return(_) => return Ok(flow),
                        }
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::For { target, iter, body } => {
                    let iterable = self.eval(iter).await?;
                    let items =
                        iterate(&iterable, "for").map_err(Interrupt::Exception)?;
                    for item in items {
                        self.step()?;
                        self.assign(target, item).await?;
                        match self.exec_body(body).await? {
                            Flow::Normal | Flow::Continue => {}
                            Flow::Break => break,
                            flow @ Flow::Return(_) => return Ok(flow),
                        }
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::FunctionDef(def) => {
                    self.set_name(&def.name, Value::Function(def.clone()));
                    Ok(Flow::Normal)
                }
                StmtKind::Return(expr) => {
                    let value = match expr {
                        Some(expr) => self.eval(expr).await?,
                        None => Value::None,
                    };
                    Ok(Flow::Return(value))
                }
                StmtKind::Break => Ok(Flow::Break),
                StmtKind::Continue => Ok(Flow::Continue),
                StmtKind::Pass => Ok(Flow::Normal),
                StmtKind::Import { module, alias } => {
                    let root = module.split('.').next().unwrap_or(module);
                    if !is_module_allowed(root, self.allowed_modules.as_ref()) {
                        return Err(Interrupt::raise(
                            "ImportError",
                            format!("import of module '{root}' is not allowed"),
                        ));
                    }
                    match alias {
                        Some(alias) => {
                            self.set_name(alias, Value::Module(module.as_str().into()))
                        }
                        None => self.set_name(root, Value::Module(root.into())),
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::Raise(expr) => {
                    let exc = match expr {
                        Some(expr) => match self.eval(expr).await? {
                            Value::Exception(exc) => (*exc).clone(),
                            Value::ExcType(kind) => PyExc::new(kind, ""),
                            other => PyExc::new("TypeError", format!(
                                "exceptions must derive from Exception, got {}",
                                other.type_name()
                            )),
                        },
                        None => PyExc::new("RuntimeError", "No active exception to re-raise"),
                    };
                    Err(Interrupt::Exception(exc))
                }
                StmtKind::Try {
                    body,
                    handlers,
                    finally,
                } => {
                    let outcome = self.exec_body(body).await;
                    let outcome = match outcome {
                        Err(Interrupt::Exception(exc)) => {
                            let mut handled = None;
                            for handler in handlers {
                                let matches = match &handler.exc_type {
                                    None => true,
                                    Some(name) => name == "Exception" || *name == exc.kind,
                                };
                                if matches {
                                    if let Some(bind) = &handler.name {
                                        self.set_name(
                                            bind,
                                            Value::Exception(Arc::new(exc.clone())),
                                        );
                                    }
                                    handled = Some(self.exec_body(&handler.body).await);
                                    break;
                                }
                            }
                            handled.unwrap_or(Err(Interrupt::Exception(exc)))
                        }
                        other => other,
                    };
                    // finally always runs; its own interrupts win
                    let finally_flow = self.exec_body(finally).await?;
                    if let Flow::Return(_) | Flow::Break | Flow::Continue = finally_flow {
                        return Ok(finally_flow);
                    }
                    outcome
                }
            }
        })
    }

    async fn assign(&mut self, target: &Expr, value: Value) -> IResult<()> {
        match target {
            Expr::Name(name) => {
                self.set_name(name, value);
                Ok(())
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let items = iterate(&value, "unpack").map_err(Interrupt::Exception)?;
                if items.len() != targets.len() {
                    return Err(Interrupt::raise(
                        "ValueError",
                        format!(
                            "cannot unpack {} values into {} targets",
                            items.len(),
                            targets.len()
                        ),
                    ));
                }
                for (target, item) in targets.iter().zip(items) {
                    Box::pin(self.assign(target, item)).await?;
                }
                Ok(())
            }
            Expr::Subscript { value: obj, index } => {
                let container = self.eval(obj).await?;
                let key = self.eval(index).await?;
                match &container {
                    Value::List(items) => {
                        let index = match key {
                            Value::Int(i) => i,
                            other => {
                                return Err(Interrupt::raise(
                                    "TypeError",
                                    format!(
                                        "list indices must be integers, not {}",
                                        other.type_name()
                                    ),
                                ))
                            }
                        };
                        let mut guard = items.lock();
                        let len = guard.len() as i64;
                        let normalised = if index < 0 { index + len } else { index };
                        if normalised < 0 || normalised >= len {
                            return Err(Interrupt::raise(
                                "IndexError",
                                "list assignment index out of range",
                            ));
                        }
                        guard[normalised as usize] = value;
                        Ok(())
                    }
                    Value::Dict(map) => {
                        let key = key.as_dict_key().ok_or_else(|| {
                            Interrupt::raise(
                                "TypeError",
                                format!("unhashable type: '{}'", key.type_name()),
                            )
                        })?;
                        map.lock().insert(key, value);
                        Ok(())
                    }
                    other => Err(Interrupt::raise(
                        "TypeError",
                        format!(
                            "'{}' object does not support item assignment",
                            other.type_name()
                        ),
                    )),
                }
            }
            Expr::Attribute { .. } => Err(Interrupt::raise(
                "TypeError",
                "attribute assignment is not supported in tool code",
            )),
            _ => Err(Interrupt::raise("SyntaxError", "invalid assignment target")),
        }
    }

    fn set_name(&mut self, name: &str, value: Value) {
        self.scopes
            .last_mut()
            .expect("at least the module scope exists")
            .insert(name.to_string(), value);
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(frame) = self.scopes.last() {
            if let Some(value) = frame.get(name) {
                return Some(value.clone());
            }
        }
        if self.scopes.len() > 1 {
            if let Some(value) = self.scopes[0].get(name) {
                return Some(value.clone());
            }
        }
        lookup_builtin(name)
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, IResult<Value>> {
        Box::pin(async move {
            self.step()?;
            match expr {
                Expr::None_ => Ok(Value::None),
                Expr::True_ => Ok(Value::Bool(true)),
                Expr::False_ => Ok(Value::Bool(false)),
                Expr::Int(value) => Ok(Value::Int(*value)),
                Expr::Float(value) => Ok(Value::Float(*value)),
                Expr::Str(value) => Ok(Value::str(value.clone())),
                Expr::FString(parts) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            FStringPart::Literal(text) => out.push_str(text),
                            FStringPart::Expr(expr) => {
                                let value = self.eval(expr).await?;
                                out.push_str(&value.to_display());
                            }
                        }
                    }
                    Ok(Value::str(out))
                }
                Expr::Name(name) => self.lookup(name).ok_or_else(|| {
                    Interrupt::raise("NameError", format!("name '{name}' is not defined"))
                }),
                Expr::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::list(out))
                }
                Expr::Tuple(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::Tuple(Arc::new(out)))
                }
                Expr::Set(items) => {
                    let mut out: Vec<Value> = Vec::with_capacity(items.len());
                    for item in items {
                        let value = self.eval(item).await?;
                        if !out.iter().any(|existing| existing.py_eq(&value)) {
                            out.push(value);
                        }
                    }
                    Ok(Value::set(out))
                }
                Expr::Dict(entries) => {
                    let mut dict = DictImpl::new();
                    for (key_expr, value_expr) in entries {
                        let key = self.eval(key_expr).await?;
                        let value = self.eval(value_expr).await?;
                        let key = key.as_dict_key().ok_or_else(|| {
                            Interrupt::raise(
                                "TypeError",
                                format!("unhashable type: '{}'", key.type_name()),
                            )
                        })?;
                        dict.insert(key, value);
                    }
                    Ok(Value::dict(dict))
                }
                Expr::ListComp {
                    elt,
                    target,
                    iter,
                    cond,
                } => {
                    let iterable = self.eval(iter).await?;
                    let items = iterate(&iterable, "comprehension")
                        .map_err(Interrupt::Exception)?;
                    let mut out = Vec::new();
                    for item in items {
                        self.step()?;
                        self.assign(target, item).await?;
                        if let Some(cond) = cond {
                            if !self.eval(cond).await?.is_truthy() {
                                continue;
                            }
                        }
                        out.push(self.eval(elt).await?);
                    }
                    Ok(Value::list(out))
                }
                Expr::DictComp {
                    key,
                    value,
                    target,
                    iter,
                    cond,
                } => {
                    let iterable = self.eval(iter).await?;
                    let items = iterate(&iterable, "comprehension")
                        .map_err(Interrupt::Exception)?;
                    let mut dict = DictImpl::new();
                    for item in items {
                        self.step()?;
                        self.assign(target, item).await?;
                        if let Some(cond) = cond {
                            if !self.eval(cond).await?.is_truthy() {
                                continue;
                            }
                        }
                        let k = self.eval(key).await?;
                        let v = self.eval(value).await?;
                        let k = k.as_dict_key().ok_or_else(|| {
                            Interrupt::raise(
                                "TypeError",
                                format!("unhashable type: '{}'", k.type_name()),
                            )
                        })?;
                        dict.insert(k, v);
                    }
                    Ok(Value::dict(dict))
                }
                Expr::BinOp { left, op, right } => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    self.binop(*op, left, right)
                }
                Expr::UnaryOp { op, operand } => {
                    let value = self.eval(operand).await?;
                    match op {
                        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                        UnaryOp::Neg => match value {
                            Value::Int(i) => Ok(Value::Int(-i)),
                            Value::Float(f) => Ok(Value::Float(-f)),
                            Value::Bool(b) => Ok(Value::Int(-(b as i64))),
                            other => Err(Interrupt::raise(
                                "TypeError",
                                format!("bad operand type for unary -: '{}'", other.type_name()),
                            )),
                        },
                        UnaryOp::Pos => match value {
                            Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(value),
                            other => Err(Interrupt::raise(
                                "TypeError",
                                format!("bad operand type for unary +: '{}'", other.type_name()),
                            )),
                        },
                    }
                }
                Expr::BoolOp { op, values } => {
                    let mut last = Value::None;
                    for value_expr in values {
                        last = self.eval(value_expr).await?;
                        match op {
                            BoolOpKind::And if !last.is_truthy() => return Ok(last),
                            BoolOpKind::Or if last.is_truthy() => return Ok(last),
                            _ => {}
                        }
                    }
                    Ok(last)
                }
                Expr::Compare {
                    left,
                    ops,
                    comparators,
                } => {
                    let mut current = self.eval(left).await?;
                    for (op, comparator) in ops.iter().zip(comparators) {
                        let next = self.eval(comparator).await?;
                        if !self.compare(*op, &current, &next)? {
                            return Ok(Value::Bool(false));
                        }
                        current = next;
                    }
                    Ok(Value::Bool(true))
                }
                Expr::IfExp { test, body, orelse } => {
                    if self.eval(test).await?.is_truthy() {
                        self.eval(body).await
                    } else {
                        self.eval(orelse).await
                    }
                }
                Expr::Await(inner) => self.eval(inner).await,
                Expr::Attribute { value, attr } => {
                    let recv = self.eval(value).await?;
                    self.get_attribute(recv, attr)
                }
                Expr::Subscript { value, index } => {
                    let container = self.eval(value).await?;
                    match index.as_ref() {
                        Expr::Slice { lower, upper, step } => {
                            let lower = match lower {
                                Some(e) => Some(self.eval(e).await?),
                                None => None,
                            };
                            let upper = match upper {
                                Some(e) => Some(self.eval(e).await?),
                                None => None,
                            };
                            let step = match step {
                                Some(e) => Some(self.eval(e).await?),
                                None => None,
                            };
                            self.slice(&container, lower, upper, step)
                        }
                        _ => {
                            let key = self.eval(index).await?;
                            self.subscript(&container, &key)
                        }
                    }
                }
                Expr::Slice { .. } => Err(Interrupt::raise(
                    "SyntaxError",
                    "slice outside subscript",
                )),
                Expr::Call { func, args, kwargs } => {
                    let callee = self.eval(func).await?;
                    let mut arg_values = Vec::with_capacity(args.len());
                    for arg in args {
                        arg_values.push(self.eval(arg).await?);
                    }
                    let mut kwarg_values = Vec::with_capacity(kwargs.len());
                    for (name, expr) in kwargs {
                        kwarg_values.push((name.clone(), self.eval(expr).await?));
                    }
                    self.call_value(callee, arg_values, kwarg_values).await
                }
            }
        })
    }

    fn call_value<'a>(
        &'a mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> BoxFuture<'a, IResult<Value>> {
        Box::pin(async move {
            match callee {
                Value::Function(def) => {
                    let bound = self.bind_params(&def, args, kwargs).await?;
                    self.invoke_function(def, bound).await
                }
                Value::Builtin("print") => {
                    let sep = kwargs
                        .iter()
                        .find(|(k, _)| k == "sep")
                        .map(|(_, v)| v.to_display())
                        .unwrap_or_else(|| " ".to_string());
                    let end = kwargs
                        .iter()
                        .find(|(k, _)| k == "end")
                        .map(|(_, v)| v.to_display())
                        .unwrap_or_else(|| "\n".to_string());
                    let line = args
                        .iter()
                        .map(Value::to_display)
                        .collect::<Vec<_>>()
                        .join(&sep);
                    self.stdout.write(&line);
                    self.stdout.write(&end);
                    Ok(Value::None)
                }
                Value::Builtin("map") => {
                    let [func, iterable] = <[Value; 2]>::try_from(args).map_err(|_| {
                        Interrupt::raise("TypeError", "map() takes a function and an iterable")
                    })?;
                    let items = iterate(&iterable, "map").map_err(Interrupt::Exception)?;
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.call_value(func.clone(), vec![item], Vec::new()).await?);
                    }
                    Ok(Value::list(out))
                }
                Value::Builtin("filter") => {
                    let [func, iterable] = <[Value; 2]>::try_from(args).map_err(|_| {
                        Interrupt::raise("TypeError", "filter() takes a function and an iterable")
                    })?;
                    let items = iterate(&iterable, "filter").map_err(Interrupt::Exception)?;
                    let mut out = Vec::new();
                    for item in items {
                        let keep = match &func {
                            Value::None => item.is_truthy(),
                            _ => self
                                .call_value(func.clone(), vec![item.clone()], Vec::new())
                                .await?
                                .is_truthy(),
                        };
                        if keep {
                            out.push(item);
                        }
                    }
                    Ok(Value::list(out))
                }
                Value::Builtin(name) => {
                    call_builtin(name, &args, &kwargs).map_err(Interrupt::Exception)
                }
                Value::ExcType(kind) => Ok(construct_exception(kind, &args)),
                Value::BoundMethod { recv, method } => match recv.as_ref() {
                    Value::Module(module) if module.as_ref() == "os" => {
                        self.os_call(&method, &args)
                    }
                    Value::Module(module) => {
                        call_module_function(module, &method, &args, &kwargs)
                            .map_err(Interrupt::Exception)
                    }
                    Value::Http => self.http_call(&method, &args, &kwargs).await,
                    other => {
                        call_method(other, &method, &args, &kwargs).map_err(Interrupt::Exception)
                    }
                },
                Value::Module(module) if module.as_ref() == "datetime.datetime" => {
                    self.construct_datetime(&args)
                }
                other => Err(Interrupt::raise(
                    "TypeError",
                    format!("'{}' object is not callable", other.type_name()),
                )),
            }
        })
    }

    async fn bind_params(
        &mut self,
        def: &FunctionDef,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> IResult<Vec<Value>> {
        let mut bound: Vec<Option<Value>> = vec![None; def.params.len()];

        if args.len() > def.params.len() {
            return Err(Interrupt::raise(
                "TypeError",
                format!(
                    "{}() takes {} arguments but {} were given",
                    def.name,
                    def.params.len(),
                    args.len()
                ),
            ));
        }
        for (slot, value) in bound.iter_mut().zip(args) {
            *slot = Some(value);
        }
        for (name, value) in kwargs {
            match def.params.iter().position(|p| p.name == name) {
                Some(index) => {
                    if bound[index].is_some() {
                        return Err(Interrupt::raise(
                            "TypeError",
                            format!("{}() got multiple values for argument '{name}'", def.name),
                        ));
                    }
                    bound[index] = Some(value);
                }
                None => {
                    return Err(Interrupt::raise(
                        "TypeError",
                        format!("{}() got an unexpected keyword argument '{name}'", def.name),
                    ))
                }
            }
        }

        let mut out = Vec::with_capacity(def.params.len());
        for (param, slot) in def.params.iter().zip(bound) {
            match slot {
                Some(value) => out.push(value),
                None => match &param.default {
                    Some(default) => out.push(self.eval(default).await?),
                    None => {
                        return Err(Interrupt::raise(
                            "TypeError",
                            format!(
                                "{}() missing required argument: '{}'",
                                def.name, param.name
                            ),
                        ))
                    }
                },
            }
        }
        Ok(out)
    }

    fn get_attribute(&mut self, recv: Value, attr: &str) -> IResult<Value> {
        if attr.starts_with("__") {
            return Err(Interrupt::raise(
                "AttributeError",
                format!("access to attribute '{attr}' is not allowed"),
            ));
        }
        match &recv {
            Value::Module(module) if module.as_ref() == "os" => match attr {
                "environ" => Ok(Value::from_string_map(&self.secrets)),
                "getenv" => Ok(Value::BoundMethod {
                    recv: Box::new(recv.clone()),
                    method: "getenv".into(),
                }),
                other => Err(Interrupt::raise(
                    "AttributeError",
                    format!("module 'os' has no accessible attribute '{other}'"),
                )),
            },
            Value::Module(module) => {
                module_attr(module, attr).map_err(Interrupt::Exception)
            }
            Value::Http => match attr {
                "get" | "post" | "put" | "delete" | "patch" | "request" => {
                    Ok(Value::BoundMethod {
                        recv: Box::new(Value::Http),
                        method: attr.into(),
                    })
                }
                other => Err(Interrupt::raise(
                    "AttributeError",
                    format!("http client has no method '{other}'"),
                )),
            },
            Value::DateTime(dt) => {
                use chrono::{Datelike, Timelike};
                match attr {
                    "year" => Ok(Value::Int(dt.year() as i64)),
                    "month" => Ok(Value::Int(dt.month() as i64)),
                    "day" => Ok(Value::Int(dt.day() as i64)),
                    "hour" => Ok(Value::Int(dt.hour() as i64)),
                    "minute" => Ok(Value::Int(dt.minute() as i64)),
                    "second" => Ok(Value::Int(dt.second() as i64)),
                    _ => Ok(Value::BoundMethod {
                        recv: Box::new(recv.clone()),
                        method: attr.into(),
                    }),
                }
            }
            _ => Ok(Value::BoundMethod {
                recv: Box::new(recv),
                method: attr.into(),
            }),
        }
    }

    fn os_call(&self, method: &str, args: &[Value]) -> IResult<Value> {
        match method {
            "getenv" => {
                let name = match args.first() {
                    Some(Value::Str(name)) => name.to_string(),
                    _ => {
                        return Err(Interrupt::raise("TypeError", "getenv() takes a string name"))
                    }
                };
                match self.secrets.get(&name) {
                    Some(value) => Ok(Value::str(value.clone())),
                    None => Ok(args.get(1).cloned().unwrap_or(Value::None)),
                }
            }
            other => Err(Interrupt::raise(
                "AttributeError",
                format!("module 'os' has no accessible attribute '{other}'"),
            )),
        }
    }

    fn construct_datetime(&self, args: &[Value]) -> IResult<Value> {
        let mut parts = [0i64; 6];
        if args.len() < 3 || args.len() > 6 {
            return Err(Interrupt::raise(
                "TypeError",
                "datetime() takes year, month, day[, hour[, minute[, second]]]",
            ));
        }
        for (i, arg) in args.iter().enumerate() {
            parts[i] = match arg {
                Value::Int(v) => *v,
                other => {
                    return Err(Interrupt::raise(
                        "TypeError",
                        format!("datetime() expects integers, got {}", other.type_name()),
                    ))
                }
            };
        }
        Utc.with_ymd_and_hms(
            parts[0] as i32,
            parts[1] as u32,
            parts[2] as u32,
            parts[3] as u32,
            parts[4] as u32,
            parts[5] as u32,
        )
        .single()
        .map(Value::DateTime)
        .ok_or_else(|| Interrupt::raise("ValueError", "invalid datetime components"))
    }

    async fn http_call(
        &mut self,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> IResult<Value> {
        let Some(client) = self.http.clone() else {
            return Err(Interrupt::raise(
                "SSRFError",
                "outbound network access is disabled for this server",
            ));
        };

        let (http_method, url_index) = match method {
            "request" => {
                let verb = match args.first() {
                    Some(Value::Str(verb)) => verb.to_string(),
                    _ => {
                        return Err(Interrupt::raise(
                            "TypeError",
                            "request() takes a method and a URL",
                        ))
                    }
                };
                (verb, 1)
            }
            other => (other.to_uppercase(), 0),
        };
        let mut url = match args.get(url_index) {
            Some(Value::Str(url)) => url.to_string(),
            _ => return Err(Interrupt::raise("TypeError", format!("{method}() takes a URL"))),
        };

        let kwarg = |name: &str| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());

        // Query parameters appended before validation, so the validator
        // sees the final URL.
        if let Some(Value::Dict(params)) = kwarg("params") {
            let params = params.lock().clone();
            if !params.is_empty() {
                let query: Vec<String> = params
                    .entries()
                    .iter()
                    .map(|(k, v)| format!("{}={}", k.as_display(), v.to_display()))
                    .collect();
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&query.join("&"));
            }
        }

        let headers: Option<HashMap<String, String>> = match kwarg("headers") {
            Some(Value::Dict(map)) => {
                let map = map.lock().clone();
                Some(
                    map.entries()
                        .iter()
                        .map(|(k, v)| (k.as_display(), v.to_display()))
                        .collect(),
                )
            }
            _ => None,
        };

        let body: Option<JsonValue> = match (kwarg("json"), kwarg("data")) {
            (Some(json), _) => Some(json.to_json()),
            (None, Some(data)) => Some(JsonValue::String(data.to_display())),
            (None, None) => None,
        };

        let response = client
            .request(&http_method, &url, headers.as_ref(), body.as_ref())
            .await
            .map_err(http_error_to_interrupt)?;

        let mut dict = DictImpl::new();
        dict.insert(DictKey::Str("ok".into()), Value::Bool(response.ok));
        dict.insert(
            DictKey::Str("status".into()),
            Value::Int(response.status as i64),
        );
        dict.insert(
            DictKey::Str("headers".into()),
            Value::from_json(&serde_json::to_value(&response.headers).unwrap_or_default()),
        );
        dict.insert(
            DictKey::Str("body".into()),
            match &response.body_json {
                Some(json) => Value::from_json(json),
                None => Value::str(response.body_text.clone()),
            },
        );
        dict.insert(
            DictKey::Str("text".into()),
            Value::str(response.body_text.clone()),
        );
        Ok(Value::dict(dict))
    }

    fn binop(&self, op: BinOp, left: Value, right: Value) -> IResult<Value> {
        use Value::*;
        let type_err = |left: &Value, right: &Value| {
            Interrupt::raise(
                "TypeError",
                format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ),
            )
        };

        match op {
            BinOp::Add => match (&left, &right) {
                (Int(a), Int(b)) => Ok(Int(a.wrapping_add(*b))),
                (Str(a), Str(b)) => Ok(Value::str(format!("{a}{b}"))),
                (List(a), List(b)) => {
                    let mut out = a.lock().clone();
                    out.extend(b.lock().clone());
                    Ok(Value::list(out))
                }
                (Tuple(a), Tuple(b)) => {
                    let mut out = a.as_ref().clone();
                    out.extend(b.as_ref().clone());
                    Ok(Tuple(Arc::new(out)))
                }
                (DateTime(dt), TimeDelta(delta)) | (TimeDelta(delta), DateTime(dt)) => {
                    Ok(DateTime(*dt + *delta))
                }
                (TimeDelta(a), TimeDelta(b)) => Ok(TimeDelta(*a + *b)),
                _ => self
                    .numeric_binop(op, &left, &right)
                    .ok_or_else(|| type_err(&left, &right)),
            },
            BinOp::Sub => match (&left, &right) {
                (Int(a), Int(b)) => Ok(Int(a.wrapping_sub(*b))),
                (DateTime(a), DateTime(b)) => Ok(TimeDelta(*a - *b)),
                (DateTime(dt), TimeDelta(delta)) => Ok(DateTime(*dt - *delta)),
                (TimeDelta(a), TimeDelta(b)) => Ok(TimeDelta(*a - *b)),
                (Set(a), Set(b)) => {
                    let b = b.lock().clone();
                    let out: Vec<Value> = a
                        .lock()
                        .iter()
                        .filter(|item| !b.iter().any(|other| item.py_eq(other)))
                        .cloned()
                        .collect();
                    Ok(Value::set(out))
                }
                _ => self
                    .numeric_binop(op, &left, &right)
                    .ok_or_else(|| type_err(&left, &right)),
            },
            BinOp::Mul => match (&left, &right) {
                (Int(a), Int(b)) => Ok(Int(a.wrapping_mul(*b))),
                (Str(s), Int(n)) | (Int(n), Str(s)) => {
                    let n = (*n).max(0);
                    if n.saturating_mul(s.len() as i64) > MAX_SEQUENCE_LEN {
                        return Err(Interrupt::Exception(PyExc::new(
                            "ResourceError",
                            "repeated string exceeds the sandbox limit",
                        )));
                    }
                    Ok(Value::str(s.repeat(n as usize)))
                }
                (List(items), Int(n)) | (Int(n), List(items)) => {
                    let items = items.lock().clone();
                    let n = (*n).max(0);
                    if n.saturating_mul(items.len() as i64) > MAX_SEQUENCE_LEN {
                        return Err(Interrupt::Exception(PyExc::new(
                            "ResourceError",
                            "repeated list exceeds the sandbox limit",
                        )));
                    }
                    let mut out = Vec::with_capacity((n as usize) * items.len());
                    for _ in 0..n {
                        out.extend(items.iter().cloned());
                    }
                    Ok(Value::list(out))
                }
                _ => self
                    .numeric_binop(op, &left, &right)
                    .ok_or_else(|| type_err(&left, &right)),
            },
            BinOp::Div => {
                let (a, b) = match (as_f64(&left), as_f64(&right)) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Err(type_err(&left, &right)),
                };
                if b == 0.0 {
                    return Err(Interrupt::raise("ZeroDivisionError", "division by zero"));
                }
                Ok(Float(a / b))
            }
            BinOp::FloorDiv => match (&left, &right) {
                (Int(_), Int(0)) => {
                    Err(Interrupt::raise("ZeroDivisionError", "integer division by zero"))
                }
                (Int(a), Int(b)) => {
                    let quotient = a / b;
                    let remainder = a % b;
                    let adjusted = if remainder != 0 && (remainder < 0) != (*b < 0) {
                        quotient - 1
                    } else {
                        quotient
                    };
                    Ok(Int(adjusted))
                }
                _ => {
                    let (a, b) = match (as_f64(&left), as_f64(&right)) {
                        (Some(a), Some(b)) => (a, b),
                        _ => return Err(type_err(&left, &right)),
                    };
                    if b == 0.0 {
                        return Err(Interrupt::raise(
                            "ZeroDivisionError",
                            "float floor division by zero",
                        ));
                    }
                    Ok(Float((a / b).floor()))
                }
            },
            BinOp::Mod => match (&left, &right) {
                (Int(_), Int(0)) => {
                    Err(Interrupt::raise("ZeroDivisionError", "integer modulo by zero"))
                }
                (Int(a), Int(b)) => {
                    let remainder = a % b;
                    let adjusted = if remainder != 0 && (remainder < 0) != (*b < 0) {
                        remainder + b
                    } else {
                        remainder
                    };
                    Ok(Int(adjusted))
                }
                _ => {
                    let (a, b) = match (as_f64(&left), as_f64(&right)) {
                        (Some(a), Some(b)) => (a, b),
                        _ => return Err(type_err(&left, &right)),
                    };
                    if b == 0.0 {
                        return Err(Interrupt::raise("ZeroDivisionError", "float modulo"));
                    }
                    Ok(Float(a - b * (a / b).floor()))
                }
            },
            BinOp::Pow => match (&left, &right) {
                (Int(a), Int(b)) if *b >= 0 => {
                    if *b > 1024 {
                        return Err(Interrupt::Exception(PyExc::new(
                            "ResourceError",
                            "exponent too large",
                        )));
                    }
                    match a.checked_pow(*b as u32) {
                        Some(value) => Ok(Int(value)),
                        std::option::Option::None => Ok(Float((*a as f64).powf(*b as f64))),
                    }
                }
                _ => {
                    let (a, b) = match (as_f64(&left), as_f64(&right)) {
                        (Some(a), Some(b)) => (a, b),
                        _ => return Err(type_err(&left, &right)),
                    };
                    Ok(Float(a.powf(b)))
                }
            },
            BinOp::BitOr => match (&left, &right) {
                (Int(a), Int(b)) => Ok(Int(a | b)),
                (Set(a), Set(b)) => {
                    let mut out = a.lock().clone();
                    for item in b.lock().iter() {
                        if !out.iter().any(|existing| existing.py_eq(item)) {
                            out.push(item.clone());
                        }
                    }
                    Ok(Value::set(out))
                }
                _ => Err(type_err(&left, &right)),
            },
            BinOp::BitAnd => match (&left, &right) {
                (Int(a), Int(b)) => Ok(Int(a & b)),
                (Set(a), Set(b)) => {
                    let b = b.lock().clone();
                    let out: Vec<Value> = a
                        .lock()
                        .iter()
                        .filter(|item| b.iter().any(|other| item.py_eq(other)))
                        .cloned()
                        .collect();
                    Ok(Value::set(out))
                }
                _ => Err(type_err(&left, &right)),
            },
            BinOp::BitXor => match (&left, &right) {
                (Int(a), Int(b)) => Ok(Int(a ^ b)),
                _ => Err(type_err(&left, &right)),
            },
        }
    }

    fn numeric_binop(&self, op: BinOp, left: &Value, right: &Value) -> Option<Value> {
        let a = as_f64(left)?;
        let b = as_f64(right)?;
        let out = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            _ => return None,
        };
        Some(Value::Float(out))
    }

    fn compare(&self, op: CmpOp, left: &Value, right: &Value) -> IResult<bool> {
        use std::cmp::Ordering;
        match op {
            CmpOp::Eq => Ok(left.py_eq(right)),
            CmpOp::NotEq => Ok(!left.py_eq(right)),
            CmpOp::Is => Ok(is_identical(left, right)),
            CmpOp::IsNot => Ok(!is_identical(left, right)),
            CmpOp::In | CmpOp::NotIn => {
                let contains = self.contains(right, left)?;
                Ok(if op == CmpOp::In { contains } else { !contains })
            }
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
                let ordering = py_cmp(left, right).ok_or_else(|| {
                    Interrupt::raise(
                        "TypeError",
                        format!(
                            "'<' not supported between instances of '{}' and '{}'",
                            left.type_name(),
                            right.type_name()
                        ),
                    )
                })?;
                Ok(match op {
                    CmpOp::Lt => ordering == Ordering::Less,
                    CmpOp::LtE => ordering != Ordering::Greater,
                    CmpOp::Gt => ordering == Ordering::Greater,
                    CmpOp::GtE => ordering != Ordering::Less,
                    _ => unreachable!(),
                })
            }
        }
    }

    fn contains(&self, container: &Value, needle: &Value) -> IResult<bool> {
        match container {
            Value::Str(haystack) => match needle {
                Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
                other => Err(Interrupt::raise(
                    "TypeError",
                    format!("'in <string>' requires string, got {}", other.type_name()),
                )),
            },
            Value::List(items) => Ok(items.lock().iter().any(|item| item.py_eq(needle))),
            Value::Tuple(items) => Ok(items.iter().any(|item| item.py_eq(needle))),
            Value::Set(items) => Ok(items.lock().iter().any(|item| item.py_eq(needle))),
            Value::Dict(map) => match needle.as_dict_key() {
                Some(key) => Ok(map.lock().contains(&key)),
                None => Err(Interrupt::raise(
                    "TypeError",
                    format!("unhashable type: '{}'", needle.type_name()),
                )),
            },
            other => Err(Interrupt::raise(
                "TypeError",
                format!("argument of type '{}' is not iterable", other.type_name()),
            )),
        }
    }

    fn subscript(&self, container: &Value, key: &Value) -> IResult<Value> {
        match container {
            Value::List(items) => {
                let guard = items.lock();
                index_sequence(&guard, key, "list")
            }
            Value::Tuple(items) => index_sequence(items, key, "tuple"),
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                match key {
                    Value::Int(i) => {
                        let len = chars.len() as i64;
                        let normalised = if *i < 0 { i + len } else { *i };
                        if normalised < 0 || normalised >= len {
                            Err(Interrupt::raise("IndexError", "string index out of range"))
                        } else {
                            Ok(Value::str(chars[normalised as usize].to_string()))
                        }
                    }
                    other => Err(Interrupt::raise(
                        "TypeError",
                        format!("string indices must be integers, not {}", other.type_name()),
                    )),
                }
            }
            Value::Dict(map) => {
                let key = key.as_dict_key().ok_or_else(|| {
                    Interrupt::raise(
                        "TypeError",
                        format!("unhashable type: '{}'", key.type_name()),
                    )
                })?;
                map.lock()
                    .get(&key)
                    .ok_or_else(|| Interrupt::Exception(PyExc::new("KeyError", key.as_display())))
            }
            other => Err(Interrupt::raise(
                "TypeError",
                format!("'{}' object is not subscriptable", other.type_name()),
            )),
        }
    }

    fn slice(
        &self,
        container: &Value,
        lower: Option<Value>,
        upper: Option<Value>,
        step: Option<Value>,
    ) -> IResult<Value> {
        let to_index = |value: Option<Value>| -> IResult<Option<i64>> {
            match value {
                None | Some(Value::None) => Ok(None),
                Some(Value::Int(i)) => Ok(Some(i)),
                Some(other) => Err(Interrupt::raise(
                    "TypeError",
                    format!("slice indices must be integers, not {}", other.type_name()),
                )),
            }
        };
        let lower = to_index(lower)?;
        let upper = to_index(upper)?;
        let step = to_index(step)?.unwrap_or(1);
        if step == 0 {
            return Err(Interrupt::raise("ValueError", "slice step cannot be zero"));
        }

        match container {
            Value::List(items) => {
                let items = items.lock().clone();
                Ok(Value::list(slice_vec(&items, lower, upper, step)))
            }
            Value::Tuple(items) => Ok(Value::Tuple(Arc::new(slice_vec(
                items, lower, upper, step,
            )))),
            Value::Str(s) => {
                let chars: Vec<Value> = s.chars().map(|c| Value::str(c.to_string())).collect();
                let sliced = slice_vec(&chars, lower, upper, step);
                let out: String = sliced.iter().map(Value::to_display).collect();
                Ok(Value::str(out))
            }
            other => Err(Interrupt::raise(
                "TypeError",
                format!("'{}' object is not sliceable", other.type_name()),
            )),
        }
    }

    pub fn stdout(&self) -> &StdoutBuffer {
        &self.stdout
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(*b as i64 as f64),
        _ => None,
    }
}

fn is_identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
        (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
        _ => false,
    }
}

fn index_sequence(items: &[Value], key: &Value, what: &str) -> IResult<Value> {
    match key {
        Value::Int(i) => {
            let len = items.len() as i64;
            let normalised = if *i < 0 { i + len } else { *i };
            if normalised < 0 || normalised >= len {
                Err(Interrupt::raise("IndexError", format!("{what} index out of range")))
            } else {
                Ok(items[normalised as usize].clone())
            }
        }
        other => Err(Interrupt::raise(
            "TypeError",
            format!("{what} indices must be integers, not {}", other.type_name()),
        )),
    }
}

fn slice_vec(items: &[Value], lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<Value> {
    let len = items.len() as i64;
    let clamp = |value: i64| -> i64 {
        let adjusted = if value < 0 { value + len } else { value };
        adjusted.clamp(0, len)
    };

    if step > 0 {
        let start = clamp(lower.unwrap_or(0));
        let stop = clamp(upper.unwrap_or(len));
        let mut out = Vec::new();
        let mut i = start;
        while i < stop {
            out.push(items[i as usize].clone());
            i += step;
        }
        out
    } else {
        let start = match lower {
            Some(v) => {
                let adjusted = if v < 0 { v + len } else { v };
                adjusted.min(len - 1)
            }
            None => len - 1,
        };
        let stop = match upper {
            Some(v) => {
                if v < 0 {
                    v + len
                } else {
                    v
                }
            }
            None => -1,
        };
        let mut out = Vec::new();
        let mut i = start;
        while i > stop && i >= 0 {
            out.push(items[i as usize].clone());
            i += step;
        }
        out
    }
}

fn http_error_to_interrupt(error: HttpError) -> Interrupt {
    match error {
        HttpError::Ssrf(_) | HttpError::HostNotAllowed(_) | HttpError::NetworkIsolated => {
            Interrupt::Exception(PyExc::new("SSRFError", error.to_string()))
        }
        HttpError::Timeout => Interrupt::Exception(PyExc::new("TimeoutError", error.to_string())),
        other => Interrupt::Exception(PyExc::new("HTTPError", other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pytool::parser::parse_module;
    use crate::pytool::validate::find_main;
    use serde_json::json;

    async fn run(source: &str, arguments: JsonValue) -> Result<(JsonValue, String), String> {
        let module = parse_module(source).expect("parses");
        let main = find_main(&module).expect("has main");
        let stdout = StdoutBuffer::new(64 * 1024);
        let mut interp = Interp::new(ExecConfig::default(), stdout.clone(), None);
        match interp.run_module(&module).await {
            Ok(()) => {}
            Err(Interrupt::Exception(exc)) => return Err(format!("{}: {}", exc.kind, exc.message)),
            Err(Interrupt::Fatal(err)) => return Err(err.to_string()),
        }
        match interp.call_main(main, &arguments).await {
            Ok(value) => Ok((value.to_json(), stdout.contents())),
            Err(Interrupt::Exception(exc)) => Err(format!("{}: {}", exc.kind, exc.message)),
            Err(Interrupt::Fatal(err)) => Err(err.to_string()),
        }
    }

    #[tokio::test]
    async fn doubles_an_integer() {
        let (result, _) = run(
            "async def main(x: int) -> int:\n    return x * 2",
            json!({"x": 3}),
        )
        .await
        .unwrap();
        assert_eq!(result, json!(6));
    }

    #[tokio::test]
    async fn arithmetic_semantics() {
        let source = r#"
async def main():
    return {
        "floordiv": -7 // 2,
        "mod": -7 % 3,
        "div": 7 / 2,
        "pow": 2 ** 10,
    }
"#;
        let (result, _) = run(source, json!({})).await.unwrap();
        assert_eq!(result["floordiv"], json!(-4));
        assert_eq!(result["mod"], json!(2));
        assert_eq!(result["div"], json!(3.5));
        assert_eq!(result["pow"], json!(1024));
    }

    #[tokio::test]
    async fn control_flow_and_loops() {
        let source = r#"
async def main(n: int):
    total = 0
    for i in range(n):
        if i % 2 == 0:
            continue
        total += i
        if total > 100:
            break
    while total % 10 != 0:
        total += 1
    return total
"#;
        let (result, _) = run(source, json!({"n": 10})).await.unwrap();
        assert_eq!(result, json!(30));
    }

    #[tokio::test]
    async fn string_and_fstring() {
        let source = r#"
async def main(name: str):
    greeting = f"Hello, {name.upper()}!"
    return greeting
"#;
        let (result, _) = run(source, json!({"name": "world"})).await.unwrap();
        assert_eq!(result, json!("Hello, WORLD!"));
    }

    #[tokio::test]
    async fn print_is_captured() {
        let source = r#"
async def main():
    print("first", 1)
    print("second")
    return None
"#;
        let (result, stdout) = run(source, json!({})).await.unwrap();
        assert_eq!(result, json!(null));
        assert_eq!(stdout, "first 1\nsecond\n");
    }

    #[tokio::test]
    async fn helper_functions_are_callable() {
        let source = r#"
def double(x):
    return x * 2

async def main(x: int):
    return double(x) + double(x)
"#;
        let (result, _) = run(source, json!({"x": 5})).await.unwrap();
        assert_eq!(result, json!(20));
    }

    #[tokio::test]
    async fn default_arguments_are_used() {
        let source = "async def main(x: int = 7):\n    return x";
        let (result, _) = run(source, json!({})).await.unwrap();
        assert_eq!(result, json!(7));
    }

    #[tokio::test]
    async fn missing_required_argument_is_a_type_error() {
        let err = run("async def main(x: int):\n    return x", json!({}))
            .await
            .unwrap_err();
        assert!(err.contains("missing required argument"));
    }

    #[tokio::test]
    async fn try_except_catches_and_finally_runs() {
        let source = r#"
async def main():
    log = []
    try:
        raise ValueError("boom")
    except ValueError as e:
        log.append(str(e))
    finally:
        log.append("done")
    try:
        x = 1 / 0
    except ZeroDivisionError:
        log.append("zero")
    return log
"#;
        let (result, _) = run(source, json!({})).await.unwrap();
        assert_eq!(result, json!(["boom", "done", "zero"]));
    }

    #[tokio::test]
    async fn uncaught_exception_propagates() {
        let err = run(
            "async def main():\n    raise RuntimeError(\"kaput\")",
            json!({}),
        )
        .await
        .unwrap_err();
        assert!(err.contains("RuntimeError"));
        assert!(err.contains("kaput"));
    }

    #[tokio::test]
    async fn import_denied_for_unlisted_module() {
        let err = run(
            "import socket\n\nasync def main():\n    return 1",
            json!({}),
        )
        .await
        .unwrap_err();
        assert!(err.contains("ImportError"), "{err}");
        assert!(err.contains("socket"));
    }

    #[tokio::test]
    async fn allowed_module_import_works() {
        let source = r#"
import json

async def main():
    return json.loads(json.dumps({"a": [1, 2]}))
"#;
        let (result, _) = run(source, json!({})).await.unwrap();
        assert_eq!(result, json!({"a": [1, 2]}));
    }

    #[tokio::test]
    async fn module_attribute_allowlist_is_enforced() {
        let err = run(
            "import json\n\nasync def main():\n    return json.JSONDecoder",
            json!({}),
        )
        .await
        .unwrap_err();
        assert!(err.contains("AttributeError"));
    }

    #[tokio::test]
    async fn dunder_attribute_access_is_denied_at_runtime() {
        // `__dir__` is not on the static pattern list, so this reaches the
        // runtime layer, which bans every dunder attribute.
        let err = run("async def main():\n    return [].__dir__", json!({}))
            .await
            .unwrap_err();
        assert!(err.contains("AttributeError"));
        assert!(err.contains("not allowed"));
    }

    #[tokio::test]
    async fn os_environ_is_backed_by_secrets() {
        let module = parse_module(
            "import os\n\nasync def main():\n    return [os.environ[\"API_KEY\"], os.getenv(\"MISSING\", \"fallback\")]",
        )
        .unwrap();
        let main = find_main(&module).unwrap();
        let stdout = StdoutBuffer::new(1024);
        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), "sekret".to_string());
        let config = ExecConfig {
            secrets,
            ..ExecConfig::default()
        };
        let mut interp = Interp::new(config, stdout, None);
        interp.run_module(&module).await.map_err(|_| ()).unwrap();
        let out = interp.call_main(main, &json!({})).await;
        match out {
            Ok(value) => assert_eq!(value.to_json(), json!(["sekret", "fallback"])),
            Err(_) => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn os_other_attributes_raise() {
        let err = run(
            "import os\n\nasync def main():\n    return os.listdir(\"/\")",
            json!({}),
        )
        .await
        .unwrap_err();
        assert!(err.contains("AttributeError"));
    }

    #[tokio::test]
    async fn http_disabled_raises_ssrf_error() {
        let err = run(
            "async def main(http):\n    return await http.get(\"http://example.com\")",
            json!({}),
        )
        .await
        .unwrap_err();
        assert!(err.contains("SSRFError"), "{err}");
    }

    #[tokio::test]
    async fn cpu_bound_loop_hits_the_deadline() {
        let module = parse_module(
            "async def main():\n    i = 0\n    while True:\n        i += 1\n    return i",
        )
        .unwrap();
        let main = find_main(&module).unwrap();
        let config = ExecConfig {
            timeout: Duration::from_millis(50),
            ..ExecConfig::default()
        };
        let stdout = StdoutBuffer::new(1024);
        let mut interp = Interp::new(config, stdout, None);
        interp.run_module(&module).await.map_err(|_| ()).unwrap();
        let started = Instant::now();
        let out = interp.call_main(main, &json!({})).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        match out {
            Err(Interrupt::Fatal(SandboxError::Timeout { .. })) => {}
            _ => panic!("expected a timeout"),
        }
    }

    #[tokio::test]
    async fn recursion_is_bounded() {
        let err = run(
            "def f(n):\n    return f(n + 1)\n\nasync def main():\n    return f(0)",
            json!({}),
        )
        .await
        .unwrap_err();
        assert!(err.contains("RecursionError"));
    }

    #[tokio::test]
    async fn stdout_is_capped_not_fatal() {
        let module =
            parse_module("async def main():\n    for i in range(100):\n        print(\"x\" * 100)\n    return \"ok\"")
                .unwrap();
        let main = find_main(&module).unwrap();
        let stdout = StdoutBuffer::new(500);
        let mut interp = Interp::new(ExecConfig::default(), stdout.clone(), None);
        interp.run_module(&module).await.map_err(|_| ()).unwrap();
        let out = interp.call_main(main, &json!({})).await;
        assert!(matches!(out, Ok(_)));
        assert!(stdout.truncated());
        assert!(stdout.contents().len() <= 500);
    }

    #[tokio::test]
    async fn comprehensions_and_slices() {
        let source = r#"
async def main():
    squares = [x * x for x in range(6) if x % 2 == 0]
    index = {str(x): x for x in squares}
    return {
        "squares": squares,
        "first_two": squares[:2],
        "reversed": squares[::-1],
        "lookup": index["16"],
    }
"#;
        let (result, _) = run(source, json!({})).await.unwrap();
        assert_eq!(result["squares"], json!([0, 4, 16]));
        assert_eq!(result["first_two"], json!([0, 4]));
        assert_eq!(result["reversed"], json!([16, 4, 0]));
        assert_eq!(result["lookup"], json!(16));
    }

    #[tokio::test]
    async fn membership_and_chained_comparison() {
        let source = r#"
async def main(x: int):
    return {
        "in_list": x in [1, 2, 3],
        "in_str": "ell" in "hello",
        "chained": 1 < x <= 3,
        "is_none": x is not None,
    }
"#;
        let (result, _) = run(source, json!({"x": 2})).await.unwrap();
        assert_eq!(result["in_list"], json!(true));
        assert_eq!(result["in_str"], json!(true));
        assert_eq!(result["chained"], json!(true));
        assert_eq!(result["is_none"], json!(true));
    }

    #[tokio::test]
    async fn tuple_unpacking() {
        let source = r#"
async def main():
    a, b = 1, 2
    a, b = b, a
    pairs = [(1, "one"), (2, "two")]
    names = []
    for num, name in pairs:
        names.append(f"{num}={name}")
    return [a, b, names]
"#;
        let (result, _) = run(source, json!({})).await.unwrap();
        assert_eq!(result, json!([2, 1, ["1=one", "2=two"]]));
    }
}
