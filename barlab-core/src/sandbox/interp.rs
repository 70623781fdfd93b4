//! Tree-walking interpreter with a wall-clock deadline.
//!
//! The deadline is polled on every expression evaluation and statement
//! execution, which bounds even `while True` loops — the portable
//! replacement for a POSIX alarm.

use super::ast::{BoolOpKind, Expr, Stmt, Target, UnaryOp};
use super::builtins::{call_builtin, namespace_attr};
use super::value::{binary_op, compare, Value};
use super::SandboxErrorKind;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

/// Loop control flow.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Interp {
    pub env: HashMap<String, Value>,
    deadline: Instant,
    pub stdout: String,
}

const ALLOWED_MODULES: [&str; 4] = ["pandas", "numpy", "pandas_ta", "math"];

impl Interp {
    pub fn new(env: HashMap<String, Value>, deadline: Instant) -> Self {
        Self {
            env,
            deadline,
            stdout: String::new(),
        }
    }

    fn check_deadline(&self) -> Result<(), SandboxErrorKind> {
        if Instant::now() >= self.deadline {
            Err(SandboxErrorKind::Timeout)
        } else {
            Ok(())
        }
    }

    // ── Statements ─────────────────────────────────────────────────────

    pub fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, SandboxErrorKind> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, SandboxErrorKind> {
        self.check_deadline()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)?;
                Ok(Flow::Normal)
            }
            Stmt::AugAssign { name, op, value } => {
                let current = self
                    .env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SandboxErrorKind::Name(name.clone()))?;
                let rhs = self.eval(value)?;
                let updated = binary_op(*op, &current, &rhs)?;
                self.env.insert(name.clone(), updated);
                Ok(Flow::Normal)
            }
            Stmt::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy()? {
                        return self.exec_block(body);
                    }
                }
                self.exec_block(orelse)
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.truthy()? {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { target, iter, body } => {
                let items = self.iterable(iter)?;
                for item in items {
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Import { module } => {
                let top = module.split('.').next().unwrap_or(module);
                if !ALLOWED_MODULES.contains(&top) {
                    return Err(SandboxErrorKind::Import(format!(
                        "沙箱禁止导入 '{module}'。可用模块: pandas, numpy, pandas_ta, math（已预注入为 pd/np/ta/math）"
                    )));
                }
                let ns = match top {
                    "pandas" => super::value::Namespace::Pd,
                    "numpy" => super::value::Namespace::Np,
                    "pandas_ta" => super::value::Namespace::Ta,
                    _ => super::value::Namespace::Math,
                };
                self.env.insert(top.to_string(), Value::Namespace(ns));
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Pass => Ok(Flow::Normal),
        }
    }

    fn iterable(&mut self, iter: &Expr) -> Result<Vec<Value>, SandboxErrorKind> {
        Ok(match self.eval(iter)? {
            Value::Range { start, end } => (start..end).map(Value::Int).collect(),
            Value::List(items) | Value::Tuple(items) => items.as_ref().clone(),
            Value::Series(s) => s.iter().map(|v| Value::Float(*v)).collect(),
            Value::Dict(map) => map.keys().map(Value::str).collect(),
            other => {
                return Err(SandboxErrorKind::Type(format!(
                    "{} 不可迭代",
                    other.type_name()
                )))
            }
        })
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), SandboxErrorKind> {
        match target {
            Target::Name(name) => {
                self.env.insert(name.clone(), value);
                Ok(())
            }
            Target::Tuple(names) => {
                let items = match &value {
                    Value::Tuple(items) | Value::List(items) => items.as_ref().clone(),
                    other => {
                        return Err(SandboxErrorKind::Unpack(format!(
                            "cannot unpack {}",
                            other.type_name()
                        )))
                    }
                };
                if items.len() != names.len() {
                    return Err(SandboxErrorKind::Unpack(format!(
                        "expected {} values to unpack, got {}",
                        names.len(),
                        items.len()
                    )));
                }
                for (name, item) in names.iter().zip(items) {
                    self.env.insert(name.clone(), item);
                }
                Ok(())
            }
            Target::Index { name, index } => {
                let index = self.eval(index)?;
                let container = self
                    .env
                    .get_mut(name)
                    .ok_or_else(|| SandboxErrorKind::Name(name.clone()))?;
                match container {
                    Value::Dict(map) => {
                        let key = dict_key(&index)?;
                        Rc::make_mut(map).insert(key, value);
                        Ok(())
                    }
                    Value::List(items) => {
                        let len = items.len();
                        let idx = resolve_index(&index, len)?;
                        Rc::make_mut(items)[idx] = value;
                        Ok(())
                    }
                    other => Err(SandboxErrorKind::Type(format!(
                        "{} 不支持索引赋值",
                        other.type_name()
                    ))),
                }
            }
        }
    }

    // ── Expressions ────────────────────────────────────────────────────

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, SandboxErrorKind> {
        self.check_deadline()?;
        match expr {
            Expr::None => Ok(Value::None),
            Expr::True => Ok(Value::Bool(true)),
            Expr::False => Ok(Value::Bool(false)),
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Str(s) => Ok(Value::str(s.clone())),
            Expr::Name(name) => self
                .env
                .get(name)
                .cloned()
                .ok_or_else(|| SandboxErrorKind::Name(name.clone())),
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!v.truthy()?)),
                    UnaryOp::Neg => match &v {
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        Value::Bool(b) => Ok(Value::Int(if *b { -1 } else { 0 })),
                        Value::Series(s) => {
                            Ok(Value::series(s.iter().map(|x| -x).collect()))
                        }
                        other => Err(SandboxErrorKind::Type(format!(
                            "无法对 {} 取负",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary_op(*op, &left, &right)
            }
            Expr::BoolOp { op, left, right } => {
                // Python semantics: the deciding operand is the result
                let left = self.eval(left)?;
                let truthy = left.truthy()?;
                match op {
                    BoolOpKind::And => {
                        if truthy {
                            self.eval(right)
                        } else {
                            Ok(left)
                        }
                    }
                    BoolOpKind::Or => {
                        if truthy {
                            Ok(left)
                        } else {
                            self.eval(right)
                        }
                    }
                }
            }
            Expr::Compare { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                compare(*op, &left, &right)
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (name, arg) in kwargs {
                    kwarg_values.push((name.clone(), self.eval(arg)?));
                }
                match func {
                    Value::Builtin(builtin) => {
                        call_builtin(builtin, arg_values, kwarg_values, &mut self.stdout)
                    }
                    other => Err(SandboxErrorKind::Type(format!(
                        "{} 不可调用",
                        other.type_name()
                    ))),
                }
            }
            Expr::Attr { obj, name } => {
                let obj = self.eval(obj)?;
                self.attr(&obj, name)
            }
            Expr::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                self.index(&obj, &index)
            }
            Expr::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::tuple(values))
            }
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::list(values))
            }
            Expr::Dict(items) => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in items {
                    let key = dict_key(&self.eval(key)?)?;
                    map.insert(key, self.eval(value)?);
                }
                Ok(Value::dict(map))
            }
        }
    }

    fn attr(&self, obj: &Value, name: &str) -> Result<Value, SandboxErrorKind> {
        match obj {
            Value::Frame(frame) => match name {
                "open" => Ok(Value::series(frame.open.clone())),
                "high" => Ok(Value::series(frame.high.clone())),
                "low" => Ok(Value::series(frame.low.clone())),
                "close" => Ok(Value::series(frame.close.clone())),
                "volume" => Ok(Value::series(frame.volume.clone())),
                "date" => Ok(Value::list(
                    frame
                        .dates
                        .iter()
                        .map(|d| Value::str(d.format("%Y-%m-%d").to_string()))
                        .collect(),
                )),
                "columns" => Ok(Value::list(
                    crate::data::COLUMNS.iter().map(|c| Value::str(*c)).collect(),
                )),
                "shape" => Ok(Value::tuple(vec![
                    Value::Int(frame.len() as i64),
                    Value::Int(crate::data::COLUMNS.len() as i64),
                ])),
                other => Err(SandboxErrorKind::Key(other.to_string())),
            },
            Value::Namespace(ns) => namespace_attr(*ns, name).ok_or_else(|| {
                SandboxErrorKind::Type(format!("模块 {} 没有属性 '{name}'", ns.name()))
            }),
            other => Err(SandboxErrorKind::Type(format!(
                "{} 没有属性 '{name}'",
                other.type_name()
            ))),
        }
    }

    fn index(&self, obj: &Value, index: &Value) -> Result<Value, SandboxErrorKind> {
        match obj {
            Value::Frame(frame) => {
                let key = dict_key(index)?;
                self.attr(&Value::Frame(frame.clone()), &key)
            }
            Value::Dict(map) => {
                let key = dict_key(index)?;
                map.get(&key)
                    .cloned()
                    .ok_or(SandboxErrorKind::Key(key))
            }
            Value::List(items) | Value::Tuple(items) => {
                let idx = resolve_index(index, items.len())?;
                Ok(items[idx].clone())
            }
            Value::Series(s) => {
                let idx = resolve_index(index, s.len())?;
                Ok(Value::from_opt_f64(s[idx]))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = resolve_index(index, chars.len())?;
                Ok(Value::str(chars[idx].to_string()))
            }
            other => Err(SandboxErrorKind::Type(format!(
                "{} 不支持索引",
                other.type_name()
            ))),
        }
    }
}

fn dict_key(value: &Value) -> Result<String, SandboxErrorKind> {
    match value {
        Value::Str(s) => Ok(s.as_ref().clone()),
        Value::Int(i) => Ok(i.to_string()),
        other => Err(SandboxErrorKind::Type(format!(
            "键必须是字符串，得到 {}",
            other.type_name()
        ))),
    }
}

/// Python-style index: negative counts from the end.
fn resolve_index(index: &Value, len: usize) -> Result<usize, SandboxErrorKind> {
    let raw = match index {
        Value::Int(i) => *i,
        other => {
            return Err(SandboxErrorKind::Type(format!(
                "索引必须是整数，得到 {}",
                other.type_name()
            )))
        }
    };
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved as usize >= len {
        return Err(SandboxErrorKind::Index(format!(
            "索引 {raw} 超出范围（长度 {len}）"
        )));
    }
    Ok(resolved as usize)
}
