//! Runtime value model for the analytic sandbox.
//!
//! Python-shaped: scalars, strings, series (numeric columns), the OHLCV
//! frame, lists/tuples/dicts, builtin functions and library namespaces.
//! Dicts are BTreeMaps so every rendering of a value is deterministic.

use crate::data::OhlcvFrame;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::SandboxErrorKind;

/// Identity of a builtin function. Dispatch lives in `builtins.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    // Trading helpers
    Latest,
    Prev,
    Crossover,
    Crossunder,
    Above,
    Below,
    Bbands,
    Macd,
    Tail,
    Nz,
    // General builtins
    Print,
    Len,
    Abs,
    Min,
    Max,
    Sum,
    Round,
    FloatFn,
    IntFn,
    StrFn,
    BoolFn,
    Range,
    // ta.*
    TaRsi,
    TaSma,
    TaEma,
    TaAtr,
    TaMacd,
    TaBbands,
    // math.*
    MathSqrt,
    MathLog,
    MathExp,
    MathFloor,
    MathCeil,
    MathPow,
    MathFabs,
    MathIsnan,
    // np.*
    NpMean,
    NpStd,
    NpMax,
    NpMin,
    NpSum,
    NpAbs,
    NpLog,
    NpSqrt,
    NpDiff,
    // pd.*
    PdIsna,
}

/// Library namespaces pre-bound into the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Ta,
    Math,
    Np,
    Pd,
}

impl Namespace {
    pub fn name(self) -> &'static str {
        match self {
            Namespace::Ta => "ta",
            Namespace::Math => "math",
            Namespace::Np => "np",
            Namespace::Pd => "pd",
        }
    }
}

/// A sandbox runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<String>),
    Series(Rc<Vec<f64>>),
    Frame(Rc<OhlcvFrame>),
    List(Rc<Vec<Value>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<BTreeMap<String, Value>>),
    Builtin(Builtin),
    Namespace(Namespace),
    Range { start: i64, end: i64 },
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(Rc::new(s.into()))
    }

    pub fn series(values: Vec<f64>) -> Self {
        Value::Series(Rc::new(values))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Value::List(Rc::new(values))
    }

    pub fn tuple(values: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(values))
    }

    pub fn dict(map: BTreeMap<String, Value>) -> Self {
        Value::Dict(Rc::new(map))
    }

    /// NaN-aware scalar wrap: NaN → None, like the Python helpers.
    pub fn from_opt_f64(v: f64) -> Self {
        if v.is_nan() {
            Value::None
        } else {
            Value::Float(v)
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Series(_) => "Series",
            Value::Frame(_) => "DataFrame",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Builtin(_) => "function",
            Value::Namespace(_) => "module",
            Value::Range { .. } => "range",
        }
    }

    /// Numeric view for arithmetic: Int/Float/Bool.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Python truthiness. A Series has no scalar truth value.
    pub fn truthy(&self) -> Result<bool, SandboxErrorKind> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Dict(m) => !m.is_empty(),
            Value::Series(_) => {
                return Err(SandboxErrorKind::Value(
                    "Series 真值不明确，请用 latest()/above()/below() 取标量".into(),
                ))
            }
            Value::Frame(_) => {
                return Err(SandboxErrorKind::Value(
                    "DataFrame 真值不明确，请先取列或聚合".into(),
                ))
            }
            Value::Range { start, end } => end > start,
            Value::Builtin(_) | Value::Namespace(_) => true,
        })
    }
}

impl fmt::Display for Value {
    /// Python-flavored repr used by `print` and string conversion.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Series(v) => write!(f, "Series(len={})", v.len()),
            Value::Frame(frame) => write!(f, "DataFrame(rows={})", frame.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{k}': {v}")?;
                }
                write!(f, "}}")
            }
            Value::Builtin(b) => write!(f, "<function {b:?}>"),
            Value::Namespace(ns) => write!(f, "<module {}>", ns.name()),
            Value::Range { start, end } => write!(f, "range({start}, {end})"),
        }
    }
}

// ── Operators ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn scalar_bin(op: BinOp, a: f64, b: f64) -> Result<f64, SandboxErrorKind> {
    Ok(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(SandboxErrorKind::ZeroDivision);
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(SandboxErrorKind::ZeroDivision);
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(SandboxErrorKind::ZeroDivision);
            }
            a.rem_euclid(b)
        }
        BinOp::Pow => a.powf(b),
    })
}

/// Elementwise series op; division by zero yields inf/NaN like pandas.
fn series_elem(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a.rem_euclid(b),
        BinOp::Pow => a.powf(b),
    }
}

/// Binary arithmetic with Python-style promotions and pandas-style series
/// broadcasting.
pub fn binary_op(op: BinOp, left: &Value, right: &Value) -> Result<Value, SandboxErrorKind> {
    use Value::*;

    // Int op Int stays Int where exact
    if let (Int(a), Int(b)) = (left, right) {
        return Ok(match op {
            BinOp::Add => Int(a + b),
            BinOp::Sub => Int(a - b),
            BinOp::Mul => Int(a * b),
            BinOp::Div => {
                if *b == 0 {
                    return Err(SandboxErrorKind::ZeroDivision);
                }
                Float(*a as f64 / *b as f64)
            }
            BinOp::FloorDiv => {
                if *b == 0 {
                    return Err(SandboxErrorKind::ZeroDivision);
                }
                Int(a.div_euclid(*b))
            }
            BinOp::Mod => {
                if *b == 0 {
                    return Err(SandboxErrorKind::ZeroDivision);
                }
                Int(a.rem_euclid(*b))
            }
            BinOp::Pow => Float((*a as f64).powf(*b as f64)),
        });
    }

    // String concatenation / repetition
    if let (Str(a), Str(b)) = (left, right) {
        if op == BinOp::Add {
            return Ok(Value::str(format!("{a}{b}")));
        }
    }
    if let (Str(s), Int(n)) = (left, right) {
        if op == BinOp::Mul {
            return Ok(Value::str(s.repeat((*n).max(0) as usize)));
        }
    }

    // List concatenation
    if let (List(a), List(b)) = (left, right) {
        if op == BinOp::Add {
            let mut out = a.as_ref().clone();
            out.extend(b.iter().cloned());
            return Ok(Value::list(out));
        }
    }

    // Series broadcasting
    match (left, right) {
        (Series(a), Series(b)) => {
            if a.len() != b.len() {
                return Err(SandboxErrorKind::Value(format!(
                    "Series 长度不一致: {} vs {}",
                    a.len(),
                    b.len()
                )));
            }
            let out: Vec<f64> = a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| series_elem(op, *x, *y))
                .collect();
            return Ok(Value::series(out));
        }
        (Series(a), other) if other.as_number().is_some() => {
            let b = other.as_number().unwrap_or(f64::NAN);
            return Ok(Value::series(
                a.iter().map(|x| series_elem(op, *x, b)).collect(),
            ));
        }
        (other, Series(b)) if other.as_number().is_some() => {
            let a = other.as_number().unwrap_or(f64::NAN);
            return Ok(Value::series(
                b.iter().map(|y| series_elem(op, a, *y)).collect(),
            ));
        }
        _ => {}
    }

    // Scalar numerics
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return scalar_bin(op, a, b).map(Float);
    }

    Err(SandboxErrorKind::Type(format!(
        "不支持的运算: {} 与 {}",
        left.type_name(),
        right.type_name()
    )))
}

fn cmp_f64(op: CmpOp, a: f64, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

/// Comparison with pandas-style series broadcasting (series comparisons
/// yield 0/1 series).
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value, SandboxErrorKind> {
    use Value::*;

    match (left, right) {
        (None, None) => {
            return Ok(Bool(matches!(op, CmpOp::Eq)));
        }
        (None, _) | (_, None) => {
            return match op {
                CmpOp::Eq => Ok(Bool(false)),
                CmpOp::Ne => Ok(Bool(true)),
                _ => Err(SandboxErrorKind::Type(format!(
                    "无法比较 {} 与 {}",
                    left.type_name(),
                    right.type_name()
                ))),
            };
        }
        (Str(a), Str(b)) => {
            let ord = a.cmp(b);
            return Ok(Bool(match op {
                CmpOp::Eq => ord.is_eq(),
                CmpOp::Ne => !ord.is_eq(),
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Ge => ord.is_ge(),
            }));
        }
        (Series(a), Series(b)) => {
            if a.len() != b.len() {
                return Err(SandboxErrorKind::Value(format!(
                    "Series 长度不一致: {} vs {}",
                    a.len(),
                    b.len()
                )));
            }
            let out: Vec<f64> = a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| if cmp_f64(op, *x, *y) { 1.0 } else { 0.0 })
                .collect();
            return Ok(Value::series(out));
        }
        (Series(a), other) if other.as_number().is_some() => {
            let b = other.as_number().unwrap_or(f64::NAN);
            let out: Vec<f64> = a
                .iter()
                .map(|x| if cmp_f64(op, *x, b) { 1.0 } else { 0.0 })
                .collect();
            return Ok(Value::series(out));
        }
        (other, Series(b)) if other.as_number().is_some() => {
            let a = other.as_number().unwrap_or(f64::NAN);
            let out: Vec<f64> = b
                .iter()
                .map(|y| if cmp_f64(op, a, *y) { 1.0 } else { 0.0 })
                .collect();
            return Ok(Value::series(out));
        }
        _ => {}
    }

    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return Ok(Bool(cmp_f64(op, a, b)));
    }

    Err(SandboxErrorKind::Type(format!(
        "无法比较 {} 与 {}",
        left.type_name(),
        right.type_name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_arithmetic_stays_int() {
        let v = binary_op(BinOp::Add, &Value::Int(2), &Value::Int(3)).unwrap();
        assert!(matches!(v, Value::Int(5)));
        let v = binary_op(BinOp::FloorDiv, &Value::Int(7), &Value::Int(2)).unwrap();
        assert!(matches!(v, Value::Int(3)));
    }

    #[test]
    fn true_division_is_float() {
        let v = binary_op(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap();
        assert!(matches!(v, Value::Float(f) if (f - 3.5).abs() < 1e-12));
    }

    #[test]
    fn integer_division_by_zero_errors() {
        let err = binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert!(matches!(err, SandboxErrorKind::ZeroDivision));
    }

    #[test]
    fn series_scalar_broadcast() {
        let s = Value::series(vec![1.0, 2.0, 3.0]);
        let v = binary_op(BinOp::Mul, &s, &Value::Int(2)).unwrap();
        match v {
            Value::Series(out) => assert_eq!(*out, vec![2.0, 4.0, 6.0]),
            other => panic!("expected series, got {other:?}"),
        }
    }

    #[test]
    fn series_division_by_zero_is_inf_not_error() {
        let s = Value::series(vec![1.0]);
        let v = binary_op(BinOp::Div, &s, &Value::Int(0)).unwrap();
        match v {
            Value::Series(out) => assert!(out[0].is_infinite()),
            other => panic!("expected series, got {other:?}"),
        }
    }

    #[test]
    fn series_length_mismatch_errors() {
        let a = Value::series(vec![1.0, 2.0]);
        let b = Value::series(vec![1.0]);
        assert!(binary_op(BinOp::Add, &a, &b).is_err());
    }

    #[test]
    fn comparison_of_scalars() {
        let v = compare(CmpOp::Lt, &Value::Int(1), &Value::Float(2.0)).unwrap();
        assert!(matches!(v, Value::Bool(true)));
    }

    #[test]
    fn none_equality() {
        assert!(matches!(
            compare(CmpOp::Eq, &Value::None, &Value::None).unwrap(),
            Value::Bool(true)
        ));
        assert!(matches!(
            compare(CmpOp::Ne, &Value::None, &Value::Int(1)).unwrap(),
            Value::Bool(true)
        ));
    }

    #[test]
    fn series_comparison_yields_indicator_series() {
        let s = Value::series(vec![1.0, 3.0]);
        let v = compare(CmpOp::Gt, &s, &Value::Int(2)).unwrap();
        match v {
            Value::Series(out) => assert_eq!(*out, vec![0.0, 1.0]),
            other => panic!("expected series, got {other:?}"),
        }
    }

    #[test]
    fn series_truthiness_errors() {
        assert!(Value::series(vec![1.0]).truthy().is_err());
    }

    #[test]
    fn display_is_python_flavored() {
        assert_eq!(Value::None.to_string(), "None");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(
            Value::tuple(vec![Value::Int(1), Value::Int(2)]).to_string(),
            "(1, 2)"
        );
    }
}
