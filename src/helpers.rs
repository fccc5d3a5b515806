//! Named helper functions callable from templates as `{{name arg ...}}`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;

use crate::error::HelperError;
use crate::value::{format_number, is_truthy, number_value, stringify, to_number};

/// A helper receives its resolved arguments positionally and returns a
/// primitive value that is stringified into the output.
pub type HelperFn = Arc<dyn Fn(&[Value]) -> Result<Value, HelperError> + Send + Sync>;

/// Name to helper lookup, seeded with the built-ins.
#[derive(Clone)]
pub struct HelperRegistry {
    helpers: HashMap<String, HelperFn>,
}

impl HelperRegistry {
    /// Registry containing every built-in helper.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for &(name, f) in BUILTINS {
            registry.insert(name, Arc::new(move |args: &[Value]| Ok::<_, HelperError>(f(args))));
        }
        registry
    }

    /// Registry with no helpers at all.
    pub fn empty() -> Self {
        Self {
            helpers: HashMap::new(),
        }
    }

    /// Register or replace a helper.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, HelperError> + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(f));
    }

    pub fn insert(&mut self, name: impl Into<String>, f: HelperFn) {
        let name = name.into();
        tracing::debug!(helper = %name, "registering helper");
        self.helpers.insert(name, f);
    }

    pub fn get(&self, name: &str) -> Option<&HelperFn> {
        self.helpers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.helpers.keys().map(String::as_str)
    }

    /// View of this registry with `overrides` layered on top. Nothing is
    /// copied and the registry itself is left untouched.
    pub fn scoped<'a>(&'a self, overrides: &'a HashMap<String, HelperFn>) -> HelperScope<'a> {
        HelperScope {
            base: self,
            overrides,
        }
    }
}

impl Default for HelperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("HelperRegistry").field("helpers", &names).finish()
    }
}

/// Per-call helper lookup: call-scoped helpers first, then the registry.
#[derive(Clone, Copy)]
pub struct HelperScope<'a> {
    base: &'a HelperRegistry,
    overrides: &'a HashMap<String, HelperFn>,
}

impl<'a> HelperScope<'a> {
    pub fn get(&self, name: &str) -> Option<&'a HelperFn> {
        self.overrides.get(name).or_else(|| self.base.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.overrides.contains_key(name) || self.base.contains(name)
    }
}

type Builtin = fn(&[Value]) -> Value;

const BUILTINS: &[(&str, Builtin)] = &[
    ("formatDate", format_date),
    ("formatCurrency", format_currency),
    ("upper", upper),
    ("lower", lower),
    ("capitalize", capitalize),
    ("truncate", truncate),
    ("default", default),
    ("join", join),
    ("length", length),
    ("add", |args| arithmetic(args, |a, b| a + b)),
    ("subtract", |args| arithmetic(args, |a, b| a - b)),
    ("multiply", |args| arithmetic(args, |a, b| a * b)),
    ("divide", |args| arithmetic(args, |a, b| a / b)),
    ("eq", |args| Value::Bool(loosely_equal(args.first(), args.get(1)))),
    ("ne", |args| Value::Bool(!loosely_equal(args.first(), args.get(1)))),
    ("gt", |args| compare(args, std::cmp::Ordering::Greater)),
    ("lt", |args| compare(args, std::cmp::Ordering::Less)),
    ("and", |args| Value::Bool(args.iter().all(|a| is_truthy(Some(a))))),
    ("or", |args| Value::Bool(args.iter().any(|a| is_truthy(Some(a))))),
    ("not", |args| Value::Bool(!is_truthy(args.first()))),
];

fn text_arg(args: &[Value], i: usize) -> String {
    args.get(i).map(stringify).unwrap_or_default()
}

fn upper(args: &[Value]) -> Value {
    Value::String(text_arg(args, 0).to_uppercase())
}

fn lower(args: &[Value]) -> Value {
    Value::String(text_arg(args, 0).to_lowercase())
}

fn capitalize(args: &[Value]) -> Value {
    let text = text_arg(args, 0);
    let mut chars = text.chars();
    let out: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    Value::String(out)
}

fn truncate(args: &[Value]) -> Value {
    let text = text_arg(args, 0);
    let limit = to_number(args.get(1));
    if limit.is_nan() {
        return Value::String(text);
    }
    let limit = limit.max(0.0) as usize;
    if text.chars().count() <= limit {
        return Value::String(text);
    }
    let suffix = args.get(2).map(stringify).unwrap_or_else(|| "...".to_string());
    let mut out: String = text.chars().take(limit).collect();
    out.push_str(&suffix);
    Value::String(out)
}

fn default(args: &[Value]) -> Value {
    match args.first() {
        None | Some(Value::Null) => args.get(1).cloned().unwrap_or(Value::Null),
        Some(Value::String(s)) if s.is_empty() => args.get(1).cloned().unwrap_or(Value::Null),
        Some(v) => v.clone(),
    }
}

fn join(args: &[Value]) -> Value {
    let separator = args.get(1).map(stringify).unwrap_or_else(|| ", ".to_string());
    match args.first() {
        Some(Value::Array(items)) => Value::String(
            items
                .iter()
                .map(stringify)
                .collect::<Vec<_>>()
                .join(&separator),
        ),
        Some(other) => Value::String(stringify(other)),
        None => Value::String(String::new()),
    }
}

fn length(args: &[Value]) -> Value {
    let len = match args.first() {
        Some(Value::Array(items)) => items.len(),
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Object(map)) => map.len(),
        _ => 0,
    };
    Value::from(len)
}

fn arithmetic(args: &[Value], op: fn(f64, f64) -> f64) -> Value {
    number_value(op(to_number(args.first()), to_number(args.get(1))))
}

fn loosely_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(args: &[Value], wanted: std::cmp::Ordering) -> Value {
    let (a, b) = (args.first(), args.get(1));
    let (x, y) = (to_number(a), to_number(b));
    let ordering = if !x.is_nan() && !y.is_nan() {
        x.partial_cmp(&y)
    } else if matches!((a, b), (Some(Value::String(_)), Some(Value::String(_)))) {
        Some(text_arg(args, 0).cmp(&text_arg(args, 1)))
    } else {
        None
    };
    Value::Bool(ordering == Some(wanted))
}

fn format_currency(args: &[Value]) -> Value {
    let amount = to_number(args.first());
    if !amount.is_finite() {
        return Value::String(format_number(amount));
    }
    let code = args
        .get(1)
        .map(stringify)
        .unwrap_or_else(|| "USD".to_string())
        .to_uppercase();
    let (prefix, decimals) = match code.as_str() {
        "USD" => ("$".to_string(), 2),
        "EUR" => ("€".to_string(), 2),
        "GBP" => ("£".to_string(), 2),
        "JPY" => ("¥".to_string(), 0),
        other => (format!("{other} "), 2),
    };

    let fixed = format!("{:.*}", decimals, amount.abs());
    let (whole, fraction) = match fixed.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (fixed.as_str(), None),
    };
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if amount < 0.0 && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        "-"
    } else {
        ""
    };
    let mut out = format!("{sign}{prefix}{grouped}");
    if let Some(fraction) = fraction {
        out.push('.');
        out.push_str(fraction);
    }
    Value::String(out)
}

fn parse_date(value: Option<&Value>) -> Option<NaiveDateTime> {
    match value? {
        Value::Number(n) => {
            DateTime::from_timestamp_millis(n.as_f64()? as i64).map(|dt| dt.naive_utc())
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_local());
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

fn format_date(args: &[Value]) -> Value {
    let Some(dt) = parse_date(args.first()) else {
        return Value::String("Invalid Date".to_string());
    };
    let pattern = args
        .get(1)
        .map(stringify)
        .unwrap_or_else(|| "YYYY-MM-DD".to_string());

    let mut out = String::with_capacity(pattern.len() + 8);
    let mut rest = pattern.as_str();
    while let Some(c) = rest.chars().next() {
        let (piece, used) = if rest.starts_with("YYYY") {
            (format!("{:04}", dt.year()), 4)
        } else if rest.starts_with("YY") {
            (format!("{:02}", dt.year().rem_euclid(100)), 2)
        } else if rest.starts_with("MM") {
            (format!("{:02}", dt.month()), 2)
        } else if rest.starts_with('M') {
            (dt.month().to_string(), 1)
        } else if rest.starts_with("DD") {
            (format!("{:02}", dt.day()), 2)
        } else if rest.starts_with('D') {
            (dt.day().to_string(), 1)
        } else if rest.starts_with("HH") {
            (format!("{:02}", dt.hour()), 2)
        } else if rest.starts_with('H') {
            (dt.hour().to_string(), 1)
        } else if rest.starts_with("mm") {
            (format!("{:02}", dt.minute()), 2)
        } else if rest.starts_with("ss") {
            (format!("{:02}", dt.second()), 2)
        } else {
            (c.to_string(), c.len_utf8())
        };
        out.push_str(&piece);
        rest = &rest[used..];
    }
    Value::String(out)
}
