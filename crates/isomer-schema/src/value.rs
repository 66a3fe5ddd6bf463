//! Literal values produced by the flavor parser.
//!
//! A [`Literal`] covers the literal grammar of flavor files:
//! strings, byte strings, integers, floats, booleans, `None`, and the four
//! container forms. Rendering follows the same grammar, so `repr()` output can
//! be pasted back into a flavor file.

use std::fmt::{self, Write as _};

/// A literal value from a flavor file.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
    /// Key/value pairs with unique keys, in insertion order.
    Dict(Vec<(Literal, Literal)>),
    /// Unique members, kept sorted by their `repr()` so output is stable.
    Set(Vec<Literal>),
}

impl Literal {
    /// Build a dict, letting a repeated key replace the earlier value in place.
    pub fn dict(pairs: impl IntoIterator<Item = (Literal, Literal)>) -> Self {
        let mut out: Vec<(Literal, Literal)> = Vec::new();
        for (key, value) in pairs {
            if let Some(slot) = out.iter_mut().find(|(k, _)| k.same_key(&key)) {
                slot.1 = value;
            } else {
                out.push((key, value));
            }
        }
        Literal::Dict(out)
    }

    /// Build a set, dropping duplicates.
    pub fn set(members: impl IntoIterator<Item = Literal>) -> Self {
        let mut out: Vec<Literal> = Vec::new();
        for member in members {
            if !out.iter().any(|m| m.same_key(&member)) {
                out.push(member);
            }
        }
        out.sort_by_cached_key(Literal::repr);
        Literal::Set(out)
    }

    /// Name of the value's type as the flavor language spells it.
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Str(_) => "str",
            Literal::Bytes(_) => "bytes",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::Bool(_) => "bool",
            Literal::None => "NoneType",
            Literal::List(_) => "list",
            Literal::Tuple(_) => "tuple",
            Literal::Dict(_) => "dict",
            Literal::Set(_) => "set",
        }
    }

    /// Whether the value may be used as a dict key or set member.
    pub fn is_hashable(&self) -> bool {
        match self {
            Literal::List(_) | Literal::Dict(_) | Literal::Set(_) => false,
            Literal::Tuple(items) => items.iter().all(Literal::is_hashable),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Key equality: numbers compare by value across int, float, and bool.
    pub fn same_key(&self, other: &Literal) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Literal::Tuple(a), Literal::Tuple(b)) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_key(y))
                }
                _ => self == other,
            },
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Int(i) => Some(*i as f64),
            Literal::Float(f) => Some(*f),
            Literal::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Literal source form, e.g. `'text'`, `[1, 2]`, `{'a': True}`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, false);
        out
    }

    /// Like [`repr`](Self::repr) but with every non-ASCII character escaped.
    pub fn ascii(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, true);
        out
    }

    fn write_repr(&self, out: &mut String, ascii: bool) {
        match self {
            Literal::Str(s) => write_str_repr(out, s, ascii),
            Literal::Bytes(b) => write_bytes_repr(out, b),
            Literal::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Literal::Float(f) => out.push_str(&float_repr(*f)),
            Literal::Bool(true) => out.push_str("True"),
            Literal::Bool(false) => out.push_str("False"),
            Literal::None => out.push_str("None"),
            Literal::List(items) => {
                out.push('[');
                write_items(out, items, ascii);
                out.push(']');
            }
            Literal::Tuple(items) => {
                out.push('(');
                write_items(out, items, ascii);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Literal::Dict(pairs) => {
                out.push('{');
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out, ascii);
                    out.push_str(": ");
                    value.write_repr(out, ascii);
                }
                out.push('}');
            }
            Literal::Set(items) if items.is_empty() => out.push_str("set()"),
            Literal::Set(items) => {
                out.push('{');
                write_items(out, items, ascii);
                out.push('}');
            }
        }
    }
}

/// The natural string form: text as-is, everything else as its `repr()`.
impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Str(s.to_owned())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Str(s)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Int(i)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

fn write_items(out: &mut String, items: &[Literal], ascii: bool) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, ascii);
    }
}

fn write_str_repr(out: &mut String, s: &str, ascii: bool) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() || (ascii && !c.is_ascii()) => {
                let code = u32::from(c);
                let _ = if code < 0x100 {
                    write!(out, "\\x{code:02x}")
                } else if code < 0x1_0000 {
                    write!(out, "\\u{code:04x}")
                } else {
                    write!(out, "\\U{code:08x}")
                };
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

fn write_bytes_repr(out: &mut String, bytes: &[u8]) {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    out.push('b');
    out.push(char::from(quote));
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(char::from(b));
            }
            0x20..=0x7e => out.push(char::from(b)),
            b => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push(char::from(quote));
}

/// Shortest round-trip float text, switching to exponent form outside
/// `1e-4 <= |x| < 1e16`.
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let sign = if value.is_sign_negative() { "-" } else { "" };
    let (digits, exp) = split_exponent(&format!("{:e}", value.abs()));

    let body = if (-4..16).contains(&exp) {
        positional(&digits, exp)
    } else {
        let mut s = digits[..1].to_owned();
        if digits.len() > 1 {
            s.push('.');
            s.push_str(&digits[1..]);
        }
        let exp_sign = if exp < 0 { '-' } else { '+' };
        format!("{s}e{exp_sign}{:02}", exp.abs())
    };
    format!("{sign}{body}")
}

/// Split Rust's `{:e}` output (`d.ddde±x`) into bare digits and exponent.
pub fn split_exponent(sci: &str) -> (String, i32) {
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci, "0"));
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    (digits, exp.parse().unwrap_or(0))
}

fn positional(digits: &str, exp: i32) -> String {
    if exp < 0 {
        let zeros = "0".repeat((-exp - 1) as usize);
        return format!("0.{zeros}{digits}");
    }
    let int_len = exp as usize + 1;
    if digits.len() <= int_len {
        format!("{digits}{}.0", "0".repeat(int_len - digits.len()))
    } else {
        format!("{}.{}", &digits[..int_len], &digits[int_len..])
    }
}
