//! Builtin functions and library namespaces bound into every sandbox run.
//!
//! The trading helper vocabulary (`latest`, `prev`, `crossover`, …) plus a
//! small `ta` / `math` / `np` / `pd` surface backed by the indicator library.
//! `ta.macd` / `ta.bbands` deliberately return dicts of series — unpacking
//! them raises the same error the helpers exist to avoid.

use super::value::{Builtin, Namespace, Value};
use super::SandboxErrorKind;
use crate::indicators;
use std::collections::BTreeMap;
use std::rc::Rc;

const MAX_TAIL_ITEMS: usize = 200;

/// Resolve `ns.name` to a value.
pub fn namespace_attr(ns: Namespace, name: &str) -> Option<Value> {
    let v = match (ns, name) {
        (Namespace::Ta, "rsi") => Value::Builtin(Builtin::TaRsi),
        (Namespace::Ta, "sma") => Value::Builtin(Builtin::TaSma),
        (Namespace::Ta, "ema") => Value::Builtin(Builtin::TaEma),
        (Namespace::Ta, "atr") => Value::Builtin(Builtin::TaAtr),
        (Namespace::Ta, "macd") => Value::Builtin(Builtin::TaMacd),
        (Namespace::Ta, "bbands") => Value::Builtin(Builtin::TaBbands),

        (Namespace::Math, "sqrt") => Value::Builtin(Builtin::MathSqrt),
        (Namespace::Math, "log") => Value::Builtin(Builtin::MathLog),
        (Namespace::Math, "exp") => Value::Builtin(Builtin::MathExp),
        (Namespace::Math, "floor") => Value::Builtin(Builtin::MathFloor),
        (Namespace::Math, "ceil") => Value::Builtin(Builtin::MathCeil),
        (Namespace::Math, "pow") => Value::Builtin(Builtin::MathPow),
        (Namespace::Math, "fabs") => Value::Builtin(Builtin::MathFabs),
        (Namespace::Math, "isnan") => Value::Builtin(Builtin::MathIsnan),
        (Namespace::Math, "pi") => Value::Float(std::f64::consts::PI),
        (Namespace::Math, "e") => Value::Float(std::f64::consts::E),
        (Namespace::Math, "tau") => Value::Float(std::f64::consts::TAU),
        (Namespace::Math, "inf") => Value::Float(f64::INFINITY),
        (Namespace::Math, "nan") => Value::Float(f64::NAN),

        (Namespace::Np, "mean") => Value::Builtin(Builtin::NpMean),
        (Namespace::Np, "std") => Value::Builtin(Builtin::NpStd),
        (Namespace::Np, "max") => Value::Builtin(Builtin::NpMax),
        (Namespace::Np, "min") => Value::Builtin(Builtin::NpMin),
        (Namespace::Np, "sum") => Value::Builtin(Builtin::NpSum),
        (Namespace::Np, "abs") => Value::Builtin(Builtin::NpAbs),
        (Namespace::Np, "log") => Value::Builtin(Builtin::NpLog),
        (Namespace::Np, "sqrt") => Value::Builtin(Builtin::NpSqrt),
        (Namespace::Np, "diff") => Value::Builtin(Builtin::NpDiff),
        (Namespace::Np, "nan") => Value::Float(f64::NAN),
        (Namespace::Np, "inf") => Value::Float(f64::INFINITY),

        (Namespace::Pd, "isna") => Value::Builtin(Builtin::PdIsna),

        _ => return None,
    };
    Some(v)
}

/// Names bound at sandbox start, for the NameError remediation text.
pub fn base_bindings() -> Vec<(&'static str, Value)> {
    vec![
        ("latest", Value::Builtin(Builtin::Latest)),
        ("prev", Value::Builtin(Builtin::Prev)),
        ("crossover", Value::Builtin(Builtin::Crossover)),
        ("crossunder", Value::Builtin(Builtin::Crossunder)),
        ("above", Value::Builtin(Builtin::Above)),
        ("below", Value::Builtin(Builtin::Below)),
        ("bbands", Value::Builtin(Builtin::Bbands)),
        ("macd", Value::Builtin(Builtin::Macd)),
        ("tail", Value::Builtin(Builtin::Tail)),
        ("nz", Value::Builtin(Builtin::Nz)),
        ("print", Value::Builtin(Builtin::Print)),
        ("len", Value::Builtin(Builtin::Len)),
        ("abs", Value::Builtin(Builtin::Abs)),
        ("min", Value::Builtin(Builtin::Min)),
        ("max", Value::Builtin(Builtin::Max)),
        ("sum", Value::Builtin(Builtin::Sum)),
        ("round", Value::Builtin(Builtin::Round)),
        ("float", Value::Builtin(Builtin::FloatFn)),
        ("int", Value::Builtin(Builtin::IntFn)),
        ("str", Value::Builtin(Builtin::StrFn)),
        ("bool", Value::Builtin(Builtin::BoolFn)),
        ("range", Value::Builtin(Builtin::Range)),
        ("ta", Value::Namespace(Namespace::Ta)),
        ("math", Value::Namespace(Namespace::Math)),
        ("np", Value::Namespace(Namespace::Np)),
        ("pd", Value::Namespace(Namespace::Pd)),
    ]
}

// ── Argument plumbing ────────────────────────────────────────────────

struct Args {
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    fn_name: &'static str,
}

impl Args {
    fn new(fn_name: &'static str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Self {
        Self {
            args,
            kwargs,
            fn_name,
        }
    }

    fn get(&self, idx: usize, name: &str) -> Option<&Value> {
        self.args
            .get(idx)
            .or_else(|| self.kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v))
    }

    fn required(&self, idx: usize, name: &str) -> Result<&Value, SandboxErrorKind> {
        self.get(idx, name).ok_or_else(|| {
            SandboxErrorKind::Type(format!("{}() 缺少参数 '{name}'", self.fn_name))
        })
    }

    fn series(&self, idx: usize, name: &str) -> Result<Rc<Vec<f64>>, SandboxErrorKind> {
        match self.required(idx, name)? {
            Value::Series(s) => Ok(s.clone()),
            Value::Frame(_) => Err(SandboxErrorKind::Type(format!(
                "{}() 的 '{name}' 参数需要 Series，请传入具体列（如 df.close）",
                self.fn_name
            ))),
            other => Err(SandboxErrorKind::Type(format!(
                "{}() 的 '{name}' 参数需要 Series，得到 {}",
                self.fn_name,
                other.type_name()
            ))),
        }
    }

    fn usize_or(&self, idx: usize, name: &str, default: usize) -> Result<usize, SandboxErrorKind> {
        match self.get(idx, name) {
            None => Ok(default),
            Some(v) => match v.as_number() {
                Some(n) if n >= 0.0 => Ok(n as usize),
                _ => Err(SandboxErrorKind::Type(format!(
                    "{}() 的 '{name}' 参数需要非负整数",
                    self.fn_name
                ))),
            },
        }
    }

    fn f64_or(&self, idx: usize, name: &str, default: f64) -> Result<f64, SandboxErrorKind> {
        match self.get(idx, name) {
            None => Ok(default),
            Some(v) => v.as_number().ok_or_else(|| {
                SandboxErrorKind::Type(format!("{}() 的 '{name}' 参数需要数值", self.fn_name))
            }),
        }
    }
}

fn series_last(s: &[f64]) -> Value {
    match s.last() {
        Some(v) => Value::from_opt_f64(*v),
        None => Value::None,
    }
}

fn numeric_items(v: &Value, fn_name: &str) -> Result<Vec<f64>, SandboxErrorKind> {
    match v {
        Value::Series(s) => Ok(s.as_ref().clone()),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|item| {
                item.as_number().ok_or_else(|| {
                    SandboxErrorKind::Type(format!("{fn_name}() 需要数值序列"))
                })
            })
            .collect(),
        Value::Range { start, end } => Ok((*start..*end).map(|i| i as f64).collect()),
        _ => Err(SandboxErrorKind::Type(format!(
            "{fn_name}() 需要 Series 或 list，得到 {}",
            v.type_name()
        ))),
    }
}

fn series_dict(pairs: Vec<(&str, Vec<f64>)>) -> Value {
    let mut map = BTreeMap::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), Value::series(v));
    }
    Value::dict(map)
}

// ── Dispatch ─────────────────────────────────────────────────────────

/// Invoke a builtin. `stdout` is the sandbox's captured print buffer.
pub fn call_builtin(
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    stdout: &mut String,
) -> Result<Value, SandboxErrorKind> {
    use Builtin::*;
    match builtin {
        // ── Trading helpers ────────────────────────────────────────────
        Latest => {
            let a = Args::new("latest", args, kwargs);
            Ok(match a.required(0, "x")? {
                Value::None => Value::None,
                Value::Bool(b) => Value::Bool(*b),
                Value::Int(i) => Value::Int(*i),
                Value::Float(f) => Value::from_opt_f64(*f),
                Value::Series(s) => series_last(s),
                other => {
                    return Err(SandboxErrorKind::Type(format!(
                        "latest() 不支持 {}",
                        other.type_name()
                    )))
                }
            })
        }
        Prev => {
            let a = Args::new("prev", args, kwargs);
            let s = a.series(0, "s")?;
            let n = a.usize_or(1, "n", 1)?;
            if s.len() < n + 1 {
                return Err(SandboxErrorKind::Index(format!(
                    "prev(s, {n}) 需要至少 {} 个元素，实际 {}",
                    n + 1,
                    s.len()
                )));
            }
            Ok(Value::from_opt_f64(s[s.len() - 1 - n]))
        }
        Crossover | Crossunder => {
            let name = if builtin == Crossover {
                "crossover"
            } else {
                "crossunder"
            };
            let a = Args::new(name, args, kwargs);
            let fast = a.series(0, "fast")?;
            let slow = a.series(1, "slow")?;
            if fast.len() < 2 || slow.len() < 2 {
                return Err(SandboxErrorKind::Index(format!(
                    "{name}() 需要至少 2 个元素"
                )));
            }
            let (f1, f2) = (fast[fast.len() - 1], fast[fast.len() - 2]);
            let (s1, s2) = (slow[slow.len() - 1], slow[slow.len() - 2]);
            Ok(Value::Bool(if builtin == Crossover {
                f1 > s1 && f2 <= s2
            } else {
                f1 < s1 && f2 >= s2
            }))
        }
        Above | Below => {
            let a = Args::new(if builtin == Above { "above" } else { "below" }, args, kwargs);
            let s = a.series(0, "s")?;
            let threshold = a.f64_or(1, "threshold", f64::NAN)?;
            let last = s.last().copied().unwrap_or(f64::NAN);
            Ok(Value::Bool(if builtin == Above {
                last > threshold
            } else {
                last < threshold
            }))
        }
        Bbands => {
            let a = Args::new("bbands", args, kwargs);
            let close = a.series(0, "close")?;
            let length = a.usize_or(1, "length", 20)?;
            let std = a.f64_or(2, "std", 2.0)?;
            let (upper, mid, lower) = indicators::bollinger(&close, length, std);
            Ok(Value::tuple(vec![
                series_last(&upper),
                series_last(&mid),
                series_last(&lower),
            ]))
        }
        Macd => {
            let a = Args::new("macd", args, kwargs);
            let close = a.series(0, "close")?;
            let fast = a.usize_or(1, "fast", 12)?;
            let slow = a.usize_or(2, "slow", 26)?;
            let signal = a.usize_or(3, "signal", 9)?;
            let (m, s, h) = indicators::macd(&close, fast, slow, signal);
            Ok(Value::tuple(vec![
                series_last(&m),
                series_last(&s),
                series_last(&h),
            ]))
        }
        Tail => {
            let a = Args::new("tail", args, kwargs);
            let n = a.usize_or(1, "n", 20)?.clamp(1, MAX_TAIL_ITEMS);
            Ok(match a.required(0, "x")? {
                Value::None => Value::list(Vec::new()),
                Value::Series(s) => {
                    let start = s.len().saturating_sub(n);
                    Value::list(s[start..].iter().map(|v| Value::from_opt_f64(*v)).collect())
                }
                Value::List(items) | Value::Tuple(items) => {
                    let start = items.len().saturating_sub(n);
                    Value::list(items[start..].to_vec())
                }
                scalar => Value::list(vec![scalar.clone()]),
            })
        }
        Nz => {
            let a = Args::new("nz", args, kwargs);
            let default = a.get(1, "default").cloned().unwrap_or(Value::Float(0.0));
            let x = a.required(0, "x")?;
            let scalar = match x {
                Value::Series(s) => match s.last() {
                    Some(v) => Value::Float(*v),
                    None => return Ok(default),
                },
                other => other.clone(),
            };
            Ok(match scalar {
                Value::None => default,
                Value::Bool(b) => Value::Bool(b),
                Value::Int(i) => Value::Int(i),
                Value::Float(f) if f.is_finite() => Value::Float(f),
                Value::Float(_) => default,
                other => other,
            })
        }

        // ── General builtins ───────────────────────────────────────────
        Print => {
            let text = args
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            stdout.push_str(&text);
            stdout.push('\n');
            Ok(Value::None)
        }
        Len => {
            let a = Args::new("len", args, kwargs);
            let n = match a.required(0, "x")? {
                Value::Str(s) => s.chars().count(),
                Value::Series(s) => s.len(),
                Value::Frame(f) => f.len(),
                Value::List(v) | Value::Tuple(v) => v.len(),
                Value::Dict(m) => m.len(),
                Value::Range { start, end } => (end - start).max(0) as usize,
                other => {
                    return Err(SandboxErrorKind::Type(format!(
                        "len() 不支持 {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(n as i64))
        }
        Abs => {
            let a = Args::new("abs", args, kwargs);
            Ok(match a.required(0, "x")? {
                Value::Int(i) => Value::Int(i.abs()),
                Value::Float(f) => Value::Float(f.abs()),
                Value::Series(s) => Value::series(s.iter().map(|v| v.abs()).collect()),
                other => {
                    return Err(SandboxErrorKind::Type(format!(
                        "abs() 不支持 {}",
                        other.type_name()
                    )))
                }
            })
        }
        Min | Max => {
            let name = if builtin == Min { "min" } else { "max" };
            let values = if args.len() == 1 {
                numeric_items(&args[0], name)?
            } else if args.len() >= 2 {
                args.iter()
                    .map(|v| {
                        v.as_number().ok_or_else(|| {
                            SandboxErrorKind::Type(format!("{name}() 需要数值参数"))
                        })
                    })
                    .collect::<Result<Vec<f64>, _>>()?
            } else {
                return Err(SandboxErrorKind::Type(format!("{name}() 缺少参数")));
            };
            let picked = values
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .fold(None::<f64>, |acc, v| {
                    Some(match acc {
                        None => v,
                        Some(a) => {
                            if builtin == Min {
                                a.min(v)
                            } else {
                                a.max(v)
                            }
                        }
                    })
                });
            match picked {
                Some(v) => Ok(Value::Float(v)),
                None => Err(SandboxErrorKind::Value(format!("{name}() 的参数为空"))),
            }
        }
        Sum => {
            let a = Args::new("sum", args, kwargs);
            let values = numeric_items(a.required(0, "x")?, "sum")?;
            Ok(Value::Float(values.iter().sum()))
        }
        Round => {
            let a = Args::new("round", args, kwargs);
            let x = a.f64_or(0, "x", f64::NAN)?;
            let digits = a.usize_or(1, "ndigits", 0)?;
            let factor = 10f64.powi(digits as i32);
            let rounded = (x * factor).round() / factor;
            Ok(if digits == 0 {
                Value::Int(rounded as i64)
            } else {
                Value::Float(rounded)
            })
        }
        FloatFn => {
            let a = Args::new("float", args, kwargs);
            match a.required(0, "x")? {
                Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    SandboxErrorKind::Value(format!("无法将 '{s}' 转为 float"))
                }),
                other => other.as_number().map(Value::Float).ok_or_else(|| {
                    SandboxErrorKind::Type(format!("float() 不支持 {}", other.type_name()))
                }),
            }
        }
        IntFn => {
            let a = Args::new("int", args, kwargs);
            match a.required(0, "x")? {
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    SandboxErrorKind::Value(format!("无法将 '{s}' 转为 int"))
                }),
                other => other
                    .as_number()
                    .map(|v| Value::Int(v.trunc() as i64))
                    .ok_or_else(|| {
                        SandboxErrorKind::Type(format!("int() 不支持 {}", other.type_name()))
                    }),
            }
        }
        StrFn => {
            let a = Args::new("str", args, kwargs);
            Ok(Value::str(a.required(0, "x")?.to_string()))
        }
        BoolFn => {
            let a = Args::new("bool", args, kwargs);
            Ok(Value::Bool(a.required(0, "x")?.truthy()?))
        }
        Range => {
            let a = Args::new("range", args, kwargs);
            let first = a.f64_or(0, "start", f64::NAN)?;
            if first.is_nan() {
                return Err(SandboxErrorKind::Type("range() 缺少参数".into()));
            }
            Ok(match a.get(1, "stop") {
                None => Value::Range {
                    start: 0,
                    end: first as i64,
                },
                Some(stop) => {
                    let end = stop.as_number().ok_or_else(|| {
                        SandboxErrorKind::Type("range() 需要整数参数".into())
                    })?;
                    Value::Range {
                        start: first as i64,
                        end: end as i64,
                    }
                }
            })
        }

        // ── ta.* ───────────────────────────────────────────────────────
        TaRsi => {
            let a = Args::new("ta.rsi", args, kwargs);
            let close = a.series(0, "close")?;
            let length = a.usize_or(1, "length", 14)?;
            Ok(Value::series(indicators::rsi(&close, length)))
        }
        TaSma => {
            let a = Args::new("ta.sma", args, kwargs);
            let close = a.series(0, "close")?;
            let length = a.usize_or(1, "length", 20)?;
            Ok(Value::series(indicators::sma(&close, length)))
        }
        TaEma => {
            let a = Args::new("ta.ema", args, kwargs);
            let close = a.series(0, "close")?;
            let length = a.usize_or(1, "length", 20)?;
            Ok(Value::series(indicators::ema(&close, length)))
        }
        TaAtr => {
            let a = Args::new("ta.atr", args, kwargs);
            let high = a.series(0, "high")?;
            let low = a.series(1, "low")?;
            let close = a.series(2, "close")?;
            let length = a.usize_or(3, "length", 14)?;
            Ok(Value::series(indicators::atr(&high, &low, &close, length)))
        }
        TaMacd => {
            let a = Args::new("ta.macd", args, kwargs);
            let close = a.series(0, "close")?;
            let fast = a.usize_or(1, "fast", 12)?;
            let slow = a.usize_or(2, "slow", 26)?;
            let signal = a.usize_or(3, "signal", 9)?;
            let (m, s, h) = indicators::macd(&close, fast, slow, signal);
            Ok(series_dict(vec![
                ("macd", m),
                ("signal", s),
                ("histogram", h),
            ]))
        }
        TaBbands => {
            let a = Args::new("ta.bbands", args, kwargs);
            let close = a.series(0, "close")?;
            let length = a.usize_or(1, "length", 20)?;
            let std = a.f64_or(2, "std", 2.0)?;
            let (upper, mid, lower) = indicators::bollinger(&close, length, std);
            Ok(series_dict(vec![
                ("upper", upper),
                ("mid", mid),
                ("lower", lower),
            ]))
        }

        // ── math.* ─────────────────────────────────────────────────────
        MathSqrt | MathLog | MathExp | MathFloor | MathCeil | MathFabs | MathIsnan => {
            let name = match builtin {
                MathSqrt => "math.sqrt",
                MathLog => "math.log",
                MathExp => "math.exp",
                MathFloor => "math.floor",
                MathCeil => "math.ceil",
                MathFabs => "math.fabs",
                _ => "math.isnan",
            };
            let a = Args::new(name, args, kwargs);
            let x = a.f64_or(0, "x", f64::NAN)?;
            Ok(match builtin {
                MathSqrt => {
                    if x < 0.0 {
                        return Err(SandboxErrorKind::Value(format!(
                            "{name}: math domain error"
                        )));
                    }
                    Value::Float(x.sqrt())
                }
                MathLog => {
                    if x <= 0.0 {
                        return Err(SandboxErrorKind::Value(format!(
                            "{name}: math domain error"
                        )));
                    }
                    Value::Float(x.ln())
                }
                MathExp => Value::Float(x.exp()),
                MathFloor => Value::Int(x.floor() as i64),
                MathCeil => Value::Int(x.ceil() as i64),
                MathFabs => Value::Float(x.abs()),
                _ => Value::Bool(x.is_nan()),
            })
        }
        MathPow => {
            let a = Args::new("math.pow", args, kwargs);
            let x = a.f64_or(0, "x", f64::NAN)?;
            let y = a.f64_or(1, "y", f64::NAN)?;
            Ok(Value::Float(x.powf(y)))
        }

        // ── np.* ───────────────────────────────────────────────────────
        NpMean | NpStd | NpMax | NpMin | NpSum => {
            let name = name_static(builtin);
            let a = Args::new(name, args, kwargs);
            let values = numeric_items(a.required(0, "x")?, name)?;
            if values.is_empty() {
                return Err(SandboxErrorKind::Value(format!("{name}() 的参数为空")));
            }
            let n = values.len() as f64;
            let result = match builtin {
                NpMean => values.iter().sum::<f64>() / n,
                NpStd => {
                    let mean = values.iter().sum::<f64>() / n;
                    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt()
                }
                NpMax => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                NpMin => values.iter().copied().fold(f64::INFINITY, f64::min),
                _ => values.iter().sum::<f64>(),
            };
            Ok(Value::Float(result))
        }
        NpAbs | NpLog | NpSqrt => {
            let a = Args::new(name_static(builtin), args, kwargs);
            let x = a.required(0, "x")?;
            let apply = |v: f64| match builtin {
                NpAbs => v.abs(),
                NpLog => v.ln(),
                _ => v.sqrt(),
            };
            Ok(match x {
                Value::Series(s) => Value::series(s.iter().map(|v| apply(*v)).collect()),
                other => match other.as_number() {
                    Some(v) => Value::Float(apply(v)),
                    None => {
                        return Err(SandboxErrorKind::Type(format!(
                            "{}() 不支持 {}",
                            name_static(builtin),
                            other.type_name()
                        )))
                    }
                },
            })
        }
        NpDiff => {
            let a = Args::new("np.diff", args, kwargs);
            let s = a.series(0, "x")?;
            let out: Vec<f64> = s.windows(2).map(|w| w[1] - w[0]).collect();
            Ok(Value::series(out))
        }

        // ── pd.* ───────────────────────────────────────────────────────
        PdIsna => {
            let a = Args::new("pd.isna", args, kwargs);
            Ok(Value::Bool(match a.required(0, "x")? {
                Value::None => true,
                Value::Float(f) => f.is_nan(),
                _ => false,
            }))
        }
    }
}

fn name_static(builtin: Builtin) -> &'static str {
    use Builtin::*;
    match builtin {
        NpMean => "np.mean",
        NpStd => "np.std",
        NpMax => "np.max",
        NpMin => "np.min",
        NpSum => "np.sum",
        NpAbs => "np.abs",
        NpLog => "np.log",
        NpSqrt => "np.sqrt",
        _ => "builtin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(b: Builtin, args: Vec<Value>) -> Result<Value, SandboxErrorKind> {
        let mut stdout = String::new();
        call_builtin(b, args, Vec::new(), &mut stdout)
    }

    #[test]
    fn latest_series_takes_last() {
        let v = call(Builtin::Latest, vec![Value::series(vec![1.0, 2.0, 3.0])]).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 3.0));
    }

    #[test]
    fn latest_nan_is_none() {
        let v = call(Builtin::Latest, vec![Value::series(vec![1.0, f64::NAN])]).unwrap();
        assert!(matches!(v, Value::None));
    }

    #[test]
    fn latest_scalar_passthrough() {
        let v = call(Builtin::Latest, vec![Value::Int(5)]).unwrap();
        assert!(matches!(v, Value::Int(5)));
        let v = call(Builtin::Latest, vec![Value::None]).unwrap();
        assert!(matches!(v, Value::None));
    }

    #[test]
    fn prev_walks_back() {
        let s = Value::series(vec![1.0, 2.0, 3.0]);
        let v = call(Builtin::Prev, vec![s]).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 2.0));
    }

    #[test]
    fn prev_out_of_range_is_index_error() {
        let s = Value::series(vec![1.0]);
        assert!(matches!(
            call(Builtin::Prev, vec![s]),
            Err(SandboxErrorKind::Index(_))
        ));
    }

    #[test]
    fn crossover_detects_cross() {
        let fast = Value::series(vec![1.0, 3.0]);
        let slow = Value::series(vec![2.0, 2.0]);
        let v = call(Builtin::Crossover, vec![fast, slow]).unwrap();
        assert!(matches!(v, Value::Bool(true)));
    }

    #[test]
    fn bbands_underflow_is_none_triple() {
        let close = Value::series(vec![1.0, 2.0]);
        let v = call(Builtin::Bbands, vec![close, Value::Int(20)]).unwrap();
        match v {
            Value::Tuple(items) => {
                assert_eq!(items.len(), 3);
                assert!(items.iter().all(|i| matches!(i, Value::None)));
            }
            other => panic!("expected tuple, got {other:?}"),
        }
    }

    #[test]
    fn nz_replaces_nan_and_none() {
        let v = call(Builtin::Nz, vec![Value::None]).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 0.0));
        let v = call(Builtin::Nz, vec![Value::Float(f64::NAN)]).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 0.0));
        let v = call(Builtin::Nz, vec![Value::Float(1.5)]).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 1.5));
    }

    #[test]
    fn tail_caps_length() {
        let s = Value::series((0..500).map(|i| i as f64).collect());
        let mut stdout = String::new();
        let v = call_builtin(
            Builtin::Tail,
            vec![s],
            vec![("n".into(), Value::Int(1000))],
            &mut stdout,
        )
        .unwrap();
        match v {
            Value::List(items) => assert_eq!(items.len(), 200),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn ta_macd_returns_dict_of_series() {
        let close = Value::series((0..60).map(|i| 100.0 + i as f64).collect());
        let v = call(Builtin::TaMacd, vec![close]).unwrap();
        match v {
            Value::Dict(map) => {
                assert!(map.contains_key("macd"));
                assert!(map.contains_key("signal"));
                assert!(map.contains_key("histogram"));
            }
            other => panic!("expected dict, got {other:?}"),
        }
    }

    #[test]
    fn print_captures_stdout() {
        let mut stdout = String::new();
        call_builtin(
            Builtin::Print,
            vec![Value::str("rsi"), Value::Float(55.5)],
            Vec::new(),
            &mut stdout,
        )
        .unwrap();
        assert_eq!(stdout, "rsi 55.5\n");
    }

    #[test]
    fn math_sqrt_domain_error() {
        assert!(matches!(
            call(Builtin::MathSqrt, vec![Value::Float(-1.0)]),
            Err(SandboxErrorKind::Value(_))
        ));
    }

    #[test]
    fn np_mean_and_std() {
        let s = Value::series(vec![1.0, 2.0, 3.0, 4.0]);
        let v = call(Builtin::NpMean, vec![s.clone()]).unwrap();
        assert!(matches!(v, Value::Float(f) if (f - 2.5).abs() < 1e-12));
        let v = call(Builtin::NpStd, vec![s]).unwrap();
        // population std of 1..4 = sqrt(1.25)
        assert!(matches!(v, Value::Float(f) if (f - 1.25f64.sqrt()).abs() < 1e-12));
    }

    #[test]
    fn np_diff_shortens_by_one() {
        let s = Value::series(vec![1.0, 4.0, 9.0]);
        let v = call(Builtin::NpDiff, vec![s]).unwrap();
        match v {
            Value::Series(out) => assert_eq!(*out, vec![3.0, 5.0]),
            other => panic!("expected series, got {other:?}"),
        }
    }
}
