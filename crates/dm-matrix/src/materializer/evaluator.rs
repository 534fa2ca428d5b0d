//! Evaluation of expression factors
//!
//! The materializer never interprets expression source itself; it hands the
//! text to a [`FactorEvaluator`]. [`BuiltinEvaluator`] is the default and
//! understands arithmetic over columns plus a fixed set of transforms:
//!
//! - `C(x)`, `C(x, levels=[...])`: explicit categorical
//! - `center(x)`, `scale(x)`, `standardize(x)`: stateful, the fitted mean
//!   and standard deviation are reused on replay
//! - `log`, `log10`, `log2`, `exp`, `sqrt`, `abs`
//! - `poly(x, n)`: raw powers `1..=n` as a labeled map
//! - `I(x)`: identity, for protecting arithmetic inside formulas

use indexmap::IndexMap;
use ndarray::{Array1, Zip};
use serde_json::{json, Map, Value as JsonValue};

use dm_core::formula::FactorKind;

use super::context::LayeredContext;
use super::values::{FactorValues, Value};
use crate::error::{MaterializeError, Result};

/// Capability for evaluating the source of expression factors
///
/// `state` is the persisted transform state of the factor: empty (`null`)
/// when fitting, and whatever the evaluator stored on a previous fit when
/// replaying a model spec.
pub trait FactorEvaluator {
    fn evaluate(
        &self,
        source: &str,
        context: &LayeredContext<'_>,
        state: &mut JsonValue,
    ) -> Result<FactorValues>;
}

/// Evaluator for arithmetic and the built-in transforms
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEvaluator;

impl FactorEvaluator for BuiltinEvaluator {
    fn evaluate(
        &self,
        source: &str,
        context: &LayeredContext<'_>,
        state: &mut JsonValue,
    ) -> Result<FactorValues> {
        let expr = ExprParser::parse(source).map_err(|m| MaterializeError::evaluation(source, m))?;

        if !state.is_object() {
            *state = JsonValue::Object(Map::new());
        }
        let JsonValue::Object(state) = state else {
            return Err(MaterializeError::evaluation(source, "Invalid transform state"));
        };

        Evaluation {
            source,
            context,
            state,
        }
        .eval(&expr)
    }
}

// ==================== Expression syntax ====================

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Pow => a.powf(b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Text(String),
    Name(String),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        /// Source text of the call; keys its transform state
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Name(String),
    Op(&'static str),
    Open(char),
    Close(char),
    Comma,
    Assign,
}

#[derive(Debug, Clone)]
struct Lexed {
    tok: Tok,
    start: usize,
    end: usize,
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Num(v) => format!("number {}", v),
        Tok::Str(s) => format!("string '{}'", s),
        Tok::Name(n) => format!("name '{}'", n),
        Tok::Op(op) => format!("'{}'", op),
        Tok::Open(c) | Tok::Close(c) => format!("'{}'", c),
        Tok::Comma => "','".to_string(),
        Tok::Assign => "'='".to_string(),
    }
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'.'
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

fn lex(source: &str) -> std::result::Result<Vec<Lexed>, String> {
    let bytes = source.as_bytes();
    let n = bytes.len();
    let mut out = Vec::new();
    let mut i = 0;

    while i < n {
        let c = bytes[i];
        let start = i;

        let tok = if c.is_ascii_whitespace() {
            i += 1;
            continue;
        } else if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            while i < n && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < n && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < n && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < n && bytes[j].is_ascii_digit() {
                    i = j;
                    while i < n && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text = &source[start..i];
            Tok::Num(
                text.parse()
                    .map_err(|_| format!("Invalid number '{}'", text))?,
            )
        } else if is_name_start(c) {
            while i < n && is_name_char(bytes[i]) {
                i += 1;
            }
            Tok::Name(source[start..i].to_string())
        } else if c == b'`' || c == b'\'' || c == b'"' {
            let close = source[i + 1..]
                .find(c as char)
                .ok_or_else(|| format!("Unterminated {} at position {}", c as char, start))?;
            let text = source[i + 1..i + 1 + close].to_string();
            i += close + 2;
            if c == b'`' {
                Tok::Name(text)
            } else {
                Tok::Str(text)
            }
        } else {
            i += 1;
            match c {
                b'*' if bytes.get(i) == Some(&b'*') => {
                    i += 1;
                    Tok::Op("**")
                }
                b'+' => Tok::Op("+"),
                b'-' => Tok::Op("-"),
                b'*' => Tok::Op("*"),
                b'/' => Tok::Op("/"),
                b'^' => Tok::Op("**"),
                b'(' | b'[' => Tok::Open(c as char),
                b')' | b']' => Tok::Close(c as char),
                b',' => Tok::Comma,
                b'=' if bytes.get(i) != Some(&b'=') => Tok::Assign,
                _ => {
                    let ch = source[start..].chars().next().unwrap_or('?');
                    return Err(format!("Unexpected character '{}' at position {}", ch, start));
                }
            }
        };

        out.push(Lexed {
            tok,
            start,
            end: i,
        });
    }

    Ok(out)
}

/// Recursive descent over `+ -`, `* /`, unary `-`, `**`, calls and lists
struct ExprParser<'s> {
    source: &'s str,
    tokens: Vec<Lexed>,
    pos: usize,
}

impl<'s> ExprParser<'s> {
    fn parse(source: &'s str) -> std::result::Result<Expr, String> {
        let mut parser = Self {
            source,
            tokens: lex(source)?,
            pos: 0,
        };
        let expr = parser.additive()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(expr),
            Some(lexed) => Err(format!(
                "Unexpected {} at position {}",
                describe(&lexed.tok),
                lexed.start
            )),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|l| &l.tok)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> std::result::Result<(), String> {
        if self.eat(tok) {
            return Ok(());
        }
        Err(match self.peek() {
            Some(found) => format!("Expected {}, found {}", describe(tok), describe(found)),
            None => format!("Expected {}, found end of expression", describe(tok)),
        })
    }

    fn binary_op(&self, ops: &[(&str, BinOp)]) -> Option<BinOp> {
        match self.peek() {
            Some(Tok::Op(op)) => ops.iter().find(|(s, _)| s == op).map(|(_, b)| *b),
            _ => None,
        }
    }

    fn additive(&mut self) -> std::result::Result<Expr, String> {
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.binary_op(&[("+", BinOp::Add), ("-", BinOp::Sub)]) {
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> std::result::Result<Expr, String> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.binary_op(&[("*", BinOp::Mul), ("/", BinOp::Div)]) {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> std::result::Result<Expr, String> {
        if self.eat(&Tok::Op("-")) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat(&Tok::Op("+")) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> std::result::Result<Expr, String> {
        let base = self.atom()?;
        if self.eat(&Tok::Op("**")) {
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn atom(&mut self) -> std::result::Result<Expr, String> {
        let Some(lexed) = self.tokens.get(self.pos).cloned() else {
            return Err("Unexpected end of expression".to_string());
        };
        self.pos += 1;

        match lexed.tok {
            Tok::Num(v) => Ok(Expr::Number(v)),
            Tok::Str(s) => Ok(Expr::Text(s)),
            Tok::Name(name) if self.eat(&Tok::Open('(')) => {
                let (args, kwargs) = self.arguments()?;
                let end = self.tokens[self.pos - 1].end;
                Ok(Expr::Call {
                    name,
                    args,
                    kwargs,
                    key: self.source[lexed.start..end].to_string(),
                })
            }
            Tok::Name(name) => Ok(Expr::Name(name)),
            Tok::Open('(') => {
                let expr = self.additive()?;
                self.expect(&Tok::Close(')'))?;
                Ok(expr)
            }
            Tok::Open('[') => {
                let mut items = Vec::new();
                if !self.eat(&Tok::Close(']')) {
                    loop {
                        items.push(self.additive()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(&Tok::Close(']'))?;
                }
                Ok(Expr::List(items))
            }
            other => Err(format!(
                "Unexpected {} at position {}",
                describe(&other),
                lexed.start
            )),
        }
    }

    #[allow(clippy::type_complexity)]
    fn arguments(&mut self) -> std::result::Result<(Vec<Expr>, Vec<(String, Expr)>), String> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat(&Tok::Close(')')) {
            return Ok((args, kwargs));
        }

        loop {
            let keyword = match (self.peek(), self.tokens.get(self.pos + 1).map(|l| &l.tok)) {
                (Some(Tok::Name(name)), Some(Tok::Assign)) => Some(name.clone()),
                _ => None,
            };
            match keyword {
                Some(name) => {
                    self.pos += 2;
                    kwargs.push((name, self.additive()?));
                }
                None if !kwargs.is_empty() => {
                    return Err("Positional argument follows keyword argument".to_string());
                }
                None => args.push(self.additive()?),
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::Close(')'))?;
        Ok((args, kwargs))
    }
}

// ==================== Evaluation ====================

struct Evaluation<'c, 'a> {
    source: &'c str,
    context: &'c LayeredContext<'a>,
    state: &'c mut Map<String, JsonValue>,
}

impl Evaluation<'_, '_> {
    fn error(&self, message: impl Into<String>) -> MaterializeError {
        MaterializeError::evaluation(self.source, message)
    }

    fn eval(&mut self, expr: &Expr) -> Result<FactorValues> {
        match expr {
            Expr::Number(v) => Ok(FactorValues::new(*v)),
            Expr::Name(name) => self
                .context
                .get(name)
                .map(FactorValues::new)
                .ok_or_else(|| self.error(format!("Name '{}' is not defined in the data context", name))),
            Expr::Text(text) => Err(self.error(format!(
                "String literal '{}' cannot be used as a value",
                text
            ))),
            Expr::List(_) => Err(self.error("Lists are only supported as keyword arguments")),
            Expr::Neg(operand) => {
                let value = self.numeric_operand(operand)?;
                self.arithmetic(BinOp::Mul, Value::Scalar(-1.0), value)
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.numeric_operand(lhs)?;
                let rhs = self.numeric_operand(rhs)?;
                self.arithmetic(*op, lhs, rhs)
            }
            Expr::Call {
                name,
                args,
                kwargs,
                key,
            } => self.call(name, key, args, kwargs),
        }
    }

    fn numeric_operand(&mut self, expr: &Expr) -> Result<Value> {
        match self.eval(expr)?.value {
            value @ (Value::Scalar(_) | Value::Numeric(_)) => Ok(value),
            _ => Err(self.error("Arithmetic requires numeric operands")),
        }
    }

    fn arithmetic(&self, op: BinOp, lhs: Value, rhs: Value) -> Result<FactorValues> {
        let value = match (lhs, rhs) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(op.apply(a, b)),
            (Value::Numeric(a), Value::Scalar(b)) => Value::Numeric(a.mapv(|x| op.apply(x, b))),
            (Value::Scalar(a), Value::Numeric(b)) => Value::Numeric(b.mapv(|x| op.apply(a, x))),
            (Value::Numeric(a), Value::Numeric(b)) => {
                if a.len() != b.len() {
                    return Err(self.error(format!(
                        "Operands have different lengths ({} and {})",
                        a.len(),
                        b.len()
                    )));
                }
                Value::Numeric(Zip::from(&a).and(&b).map_collect(|&x, &y| op.apply(x, y)))
            }
            _ => return Err(self.error("Arithmetic requires numeric operands")),
        };
        Ok(FactorValues::new(value))
    }

    fn call(
        &mut self,
        name: &str,
        key: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<FactorValues> {
        if name != "C" {
            if let Some((kw, _)) = kwargs.first() {
                return Err(self.error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, kw
                )));
            }
        }

        match name {
            "C" => self.categorical(args, kwargs),
            "I" => {
                self.expect_args(name, args, 1)?;
                self.eval(&args[0])
            }
            "center" => {
                let x = self.column_argument(name, args)?;
                let mean = match self.stored(key, "mean") {
                    Some(mean) => mean,
                    None => {
                        let mean = nan_mean(&x);
                        self.store(key, "mean", mean);
                        mean
                    }
                };
                Ok(FactorValues::new(x.mapv(|v| v - mean)))
            }
            "scale" | "standardize" => {
                let x = self.column_argument(name, args)?;
                let (mean, std) = match (self.stored(key, "mean"), self.stored(key, "std")) {
                    (Some(mean), Some(std)) => (mean, std),
                    _ => {
                        let mean = nan_mean(&x);
                        let std = nan_std(&x, mean);
                        if std == 0.0 || std.is_nan() {
                            return Err(self.error(format!(
                                "Cannot {} constant variable (std = 0)",
                                name
                            )));
                        }
                        self.store(key, "mean", mean);
                        self.store(key, "std", std);
                        (mean, std)
                    }
                };
                Ok(FactorValues::new(x.mapv(|v| (v - mean) / std)))
            }
            "log" | "log10" | "log2" | "exp" | "sqrt" | "abs" => {
                self.expect_args(name, args, 1)?;
                let value = self.numeric_operand(&args[0])?;
                self.elementwise(name, value)
            }
            "poly" => self.polynomial(args),
            _ => Err(self.error(format!("Function '{}' not supported", name))),
        }
    }

    fn expect_args(&self, name: &str, args: &[Expr], expected: usize) -> Result<()> {
        if args.len() != expected {
            return Err(self.error(format!(
                "{}() expected {} argument{}, got {}",
                name,
                expected,
                if expected == 1 { "" } else { "s" },
                args.len()
            )));
        }
        Ok(())
    }

    fn column_argument(&mut self, name: &str, args: &[Expr]) -> Result<Array1<f64>> {
        self.expect_args(name, args, 1)?;
        match self.numeric_operand(&args[0])? {
            Value::Numeric(x) => Ok(x),
            _ => Err(self.error(format!("{}() expects single column input", name))),
        }
    }

    fn elementwise(&self, name: &str, value: Value) -> Result<FactorValues> {
        let f: fn(f64) -> f64 = match name {
            "log" => f64::ln,
            "log10" => f64::log10,
            "log2" => f64::log2,
            "sqrt" => f64::sqrt,
            "exp" => f64::exp,
            _ => f64::abs,
        };
        let requirement = match name {
            "log" | "log10" | "log2" => Some("positive"),
            "sqrt" => Some("non-negative"),
            _ => None,
        };
        let valid = |x: f64| match requirement {
            Some("positive") => x > 0.0,
            Some(_) => x >= 0.0,
            None => true,
        };

        let invalid = match &value {
            Value::Scalar(x) => !x.is_nan() && !valid(*x),
            Value::Numeric(xs) => xs.iter().any(|x| !x.is_nan() && !valid(*x)),
            _ => false,
        };
        if let (true, Some(requirement)) = (invalid, requirement) {
            return Err(self.error(format!("{}() requires {} values", name, requirement)));
        }

        Ok(FactorValues::new(match value {
            Value::Scalar(x) => Value::Scalar(f(x)),
            Value::Numeric(xs) => Value::Numeric(xs.mapv(f)),
            other => other,
        }))
    }

    fn polynomial(&mut self, args: &[Expr]) -> Result<FactorValues> {
        self.expect_args("poly", args, 2)?;
        let x = self.column_argument("poly", &args[..1])?;
        let max_degree = x.len().min(i32::MAX as usize) as f64;
        let degree = match &args[1] {
            Expr::Number(d) if *d >= 1.0 && d.fract() == 0.0 && *d <= max_degree => *d as i32,
            other => {
                return Err(self.error(format!(
                    "Invalid degree {:?}; poly() degree must be a positive integer no larger than the number of rows ({})",
                    other,
                    x.len()
                )))
            }
        };

        let fields: IndexMap<String, Value> = (1..=degree)
            .map(|power| (power.to_string(), Value::Numeric(x.mapv(|v| v.powi(power)))))
            .collect();
        Ok(FactorValues::new(Value::Map(fields)).with_kind(FactorKind::Numerical))
    }

    fn categorical(&mut self, args: &[Expr], kwargs: &[(String, Expr)]) -> Result<FactorValues> {
        self.expect_args("C", args, 1)?;

        let mut levels: Option<Vec<String>> = None;
        for (kw, expr) in kwargs {
            match (kw.as_str(), expr) {
                ("levels", Expr::List(items)) => {
                    let labels = items
                        .iter()
                        .map(|item| match item {
                            Expr::Text(s) => Ok(s.clone()),
                            Expr::Number(v) => Ok(v.to_string()),
                            _ => Err(self.error("C() levels must be strings or numbers")),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    levels = Some(labels);
                }
                ("levels", _) => return Err(self.error("C() levels must be a list")),
                (other, _) => {
                    return Err(self.error(format!(
                        "C() got an unexpected keyword argument '{}'",
                        other
                    )))
                }
            }
        }

        let (values, observed_levels) = match self.eval(&args[0])?.value.into_categorical() {
            Value::Categorical { values, levels } => (values, levels),
            _ => return Err(self.error("C() expects a single column")),
        };

        let levels = levels.or(observed_levels);
        if let Some(levels) = &levels {
            if let Some(unknown) = values.iter().flatten().find(|v| !levels.contains(*v)) {
                return Err(self.error(format!(
                    "Value '{}' is not one of the declared levels {:?}",
                    unknown, levels
                )));
            }
        }

        Ok(FactorValues::new(Value::Categorical { values, levels })
            .with_kind(FactorKind::Categorical)
            .with_spans_intercept(true)
            .pre_encoded())
    }

    fn stored(&self, key: &str, field: &str) -> Option<f64> {
        self.state.get(key)?.get(field)?.as_f64()
    }

    fn store(&mut self, key: &str, field: &str, value: f64) {
        let entry = self
            .state
            .entry(key.to_string())
            .or_insert_with(|| json!({}));
        if let JsonValue::Object(fields) = entry {
            fields.insert(field.to_string(), json!(value));
        }
    }
}

fn nan_mean(x: &Array1<f64>) -> f64 {
    let (sum, count) = x
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Sample standard deviation ignoring missing values
fn nan_std(x: &Array1<f64>, mean: f64) -> f64 {
    let (ss, count) = x
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + (v - mean).powi(2), c + 1));
    if count < 2 {
        return 0.0;
    }
    (ss / (count - 1) as f64).sqrt()
}
