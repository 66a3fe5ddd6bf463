//! Boot menu template rendering.
//!
//! Templates use replacement fields: `{name}`, `{name[0]}`, `{name[key]}`,
//! an optional `!s`, `!r` or `!a` conversion and an optional format spec
//! (`[[fill]align][sign][z][#][0][width][,|_][.precision][type]`).
//! `{{` and `}}` produce literal braces. Rendering never touches the
//! filesystem.

use indexmap::IndexMap;
use isomer_schema::value::{float_repr, split_exponent};
use isomer_schema::{FlavorConfig, Literal};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown field '{name}' in template")]
    UnknownVariable { name: String },
    #[error("malformed template: {reason}")]
    Syntax { reason: String },
    #[error("cannot resolve '{field}' in template: {reason}")]
    Lookup { field: String, reason: String },
}

fn syntax(reason: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        reason: reason.into(),
    }
}

/// Variables visible to a flavor's template.
///
/// `volume_id` is always bound, `ks_path` when the flavor has a kickstart,
/// then every extra field (which may shadow either).
pub fn bindings(flavor: &FlavorConfig) -> IndexMap<String, Literal> {
    let mut vars = IndexMap::new();
    vars.insert(
        "volume_id".to_owned(),
        Literal::from(flavor.volume_id.as_str()),
    );
    if flavor.kickstart.is_some() {
        vars.insert("ks_path".to_owned(), Literal::from(flavor.ks_path.as_str()));
    }
    for (name, value) in &flavor.extra_fields {
        vars.insert(name.clone(), value.clone());
    }
    vars
}

/// Render the flavor's `grub_template`, if it has one.
pub fn render(flavor: &FlavorConfig) -> Result<Option<String>, TemplateError> {
    flavor
        .grub_template
        .as_deref()
        .map(|template| render_template(template, &bindings(flavor)))
        .transpose()
}

/// Substitute every replacement field in `template`.
pub fn render_template(
    template: &str,
    vars: &IndexMap<String, Literal>,
) -> Result<String, TemplateError> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '}' => return Err(syntax("single '}' encountered in format string")),
            '{' => {
                let end = field_end(&chars, i + 1)
                    .ok_or_else(|| syntax("expected '}' before end of string"))?;
                let field: String = chars[i + 1..end].iter().collect();
                out.push_str(&render_field(&field, vars)?);
                i = end + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Index of the `}` closing a field that starts at `start`.
fn field_end(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut in_brackets = false;
    for (offset, &c) in chars[start..].iter().enumerate() {
        match c {
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            '{' if !in_brackets => depth += 1,
            '}' if !in_brackets => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn render_field(field: &str, vars: &IndexMap<String, Literal>) -> Result<String, TemplateError> {
    let (name_part, conversion, spec) = split_field(field)?;
    if spec.contains('{') {
        return Err(syntax("nested replacement fields are not supported"));
    }

    let value = resolve(name_part, vars)?;
    let value = match conversion {
        None => value,
        Some('s') => Literal::Str(value.to_string()),
        Some('r') => Literal::Str(value.repr()),
        Some('a') => Literal::Str(value.ascii()),
        Some(other) => {
            return Err(syntax(format!(
                "unknown conversion specifier '{other}'"
            )))
        }
    };

    format_value(&value, spec).map_err(syntax)
}

/// Split `name[idx]!c:spec` into its three parts.
fn split_field(field: &str) -> Result<(&str, Option<char>, &str), TemplateError> {
    let mut in_brackets = false;
    let mut name_end = field.len();
    for (idx, c) in field.char_indices() {
        match c {
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            '!' | ':' if !in_brackets => {
                name_end = idx;
                break;
            }
            _ => {}
        }
    }

    let name = &field[..name_end];
    let rest = &field[name_end..];
    if let Some(conv) = rest.strip_prefix('!') {
        let mut chars = conv.chars();
        let Some(c) = chars.next() else {
            return Err(syntax("end of string while looking for conversion specifier"));
        };
        let after = chars.as_str();
        return match after.strip_prefix(':') {
            Some(spec) => Ok((name, Some(c), spec)),
            None if after.is_empty() => Ok((name, Some(c), "")),
            None => Err(syntax("expected ':' after conversion specifier")),
        };
    }
    Ok((name, None, rest.strip_prefix(':').unwrap_or(rest)))
}

fn resolve(field_name: &str, vars: &IndexMap<String, Literal>) -> Result<Literal, TemplateError> {
    let split = field_name.find(['.', '[']).unwrap_or(field_name.len());
    let (name, mut rest) = field_name.split_at(split);

    if name.is_empty() || name.chars().all(|c| c.is_ascii_digit()) {
        return Err(syntax(format!(
            "positional field '{{{field_name}}}' is not supported; name a field"
        )));
    }
    let mut value = vars
        .get(name)
        .cloned()
        .ok_or_else(|| TemplateError::UnknownVariable {
            name: name.to_owned(),
        })?;

    while !rest.is_empty() {
        if rest.starts_with('.') {
            return Err(syntax(format!(
                "attribute access in '{field_name}' is not supported"
            )));
        }
        let inner = &rest[1..];
        let close = inner
            .find(']')
            .ok_or_else(|| syntax("missing ']' in format string"))?;
        let key = &inner[..close];
        if key.is_empty() {
            return Err(syntax("empty index in format string"));
        }
        rest = &inner[close + 1..];
        if !rest.is_empty() && !rest.starts_with(['.', '[']) {
            return Err(syntax(
                "only '.' or '[' may follow ']' in format field specifier",
            ));
        }
        value = index(&value, key).map_err(|reason| TemplateError::Lookup {
            field: field_name.to_owned(),
            reason,
        })?;
    }
    Ok(value)
}

fn index(value: &Literal, key: &str) -> Result<Literal, String> {
    let position: Option<usize> = if key.chars().all(|c| c.is_ascii_digit()) {
        key.parse().ok()
    } else {
        None
    };

    match (value, position) {
        (Literal::List(items) | Literal::Tuple(items), Some(i)) => items
            .get(i)
            .cloned()
            .ok_or_else(|| format!("{} index {i} out of range", value.type_name())),
        (Literal::Str(s), Some(i)) => s
            .chars()
            .nth(i)
            .map(|c| Literal::Str(c.to_string()))
            .ok_or_else(|| format!("string index {i} out of range")),
        (Literal::List(_) | Literal::Tuple(_) | Literal::Str(_), None) => Err(format!(
            "{} indices must be integers, not '{key}'",
            value.type_name()
        )),
        (Literal::Dict(pairs), _) => {
            let wanted = match position.and_then(|i| i64::try_from(i).ok()) {
                Some(i) => Literal::Int(i),
                None => Literal::from(key),
            };
            pairs
                .iter()
                .find(|(k, _)| k.same_key(&wanted))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| format!("key {} not found", wanted.repr()))
        }
        _ => Err(format!("'{}' object is not subscriptable", value.type_name())),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    no_neg_zero: bool,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    ty: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');
        let mut i = 0;
        let mut out = FormatSpec {
            fill: None,
            align: None,
            sign: None,
            no_neg_zero: false,
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        };

        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = Some(chars[0]);
            out.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            out.align = Some(chars[0]);
            i = 1;
        }

        if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
            out.sign = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'z') {
            out.no_neg_zero = true;
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            out.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            out.zero = true;
            i += 1;
        }

        let digits_from = |i: &mut usize| -> Option<usize> {
            let start = *i;
            while chars.get(*i).is_some_and(char::is_ascii_digit) {
                *i += 1;
            }
            (*i > start).then(|| chars[start..*i].iter().collect::<String>())?.parse().ok()
        };

        if let Some(width) = digits_from(&mut i) {
            out.width = width;
        }
        if let Some(&c @ (',' | '_')) = chars.get(i) {
            out.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            out.precision =
                Some(digits_from(&mut i).ok_or_else(|| "format specifier missing precision".to_owned())?);
        }
        match &chars[i.min(chars.len())..] {
            [] => {}
            [ty] => out.ty = Some(*ty),
            _ => return Err(format!("invalid format specifier '{spec}'")),
        }
        Ok(out)
    }

    fn fill(&self) -> char {
        self.fill.unwrap_or(if self.zero { '0' } else { ' ' })
    }

    fn align(&self, default: char) -> char {
        match self.align {
            Some(a) => a,
            None if self.zero && default == '>' => '=',
            None => default,
        }
    }

    /// Pad `sign` + `body` to the requested width.
    fn pad(&self, sign: &str, body: &str, default_align: char) -> String {
        let len = sign.chars().count() + body.chars().count();
        if self.width <= len {
            return format!("{sign}{body}");
        }
        let n = self.width - len;
        let fill = |count: usize| self.fill().to_string().repeat(count);
        match self.align(default_align) {
            '<' => format!("{sign}{body}{}", fill(n)),
            '^' => format!("{}{sign}{body}{}", fill(n / 2), fill(n - n / 2)),
            '=' => format!("{sign}{}{body}", fill(n)),
            _ => format!("{}{sign}{body}", fill(n)),
        }
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }
}

fn format_value(value: &Literal, spec: &str) -> Result<String, String> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    let parsed = FormatSpec::parse(spec)?;
    match value {
        Literal::Str(s) => format_str(s, &parsed),
        Literal::Int(i) => format_int(*i, &parsed),
        Literal::Bool(b) => format_int(i64::from(*b), &parsed),
        Literal::Float(f) => format_float(*f, &parsed),
        other => Err(format!(
            "format spec '{spec}' is not supported for {} values",
            other.type_name()
        )),
    }
}

fn format_str(s: &str, spec: &FormatSpec) -> Result<String, String> {
    match spec.ty {
        None | Some('s') => {}
        Some(other) => {
            return Err(format!(
                "unknown format code '{other}' for object of type 'str'"
            ))
        }
    }
    if spec.sign.is_some() {
        return Err("sign not allowed in string format specifier".to_owned());
    }
    if spec.alternate {
        return Err("alternate form (#) not allowed in string format specifier".to_owned());
    }
    if spec.align == Some('=') {
        return Err("'=' alignment not allowed in string format specifier".to_owned());
    }
    if let Some(g) = spec.grouping {
        return Err(format!("cannot specify '{g}' with 's'"));
    }

    let body: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_owned(),
    };
    Ok(spec.pad("", &body, '<'))
}

fn group_digits(digits: &str, sep: char, every: usize) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / every);
    let lead = digits.len() % every;
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (i + every - lead) % every == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn format_int(value: i64, spec: &FormatSpec) -> Result<String, String> {
    let ty = spec.ty.unwrap_or('d');
    if matches!(ty, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float(value as f64, spec);
    }
    if spec.precision.is_some() {
        return Err("precision not allowed in integer format specifier".to_owned());
    }

    let magnitude = value.unsigned_abs();
    let (digits, prefix, group_every) = match ty {
        'd' | 'n' => (magnitude.to_string(), "", 3),
        'b' => (format!("{magnitude:b}"), "0b", 4),
        'o' => (format!("{magnitude:o}"), "0o", 4),
        'x' => (format!("{magnitude:x}"), "0x", 4),
        'X' => (format!("{magnitude:X}"), "0X", 4),
        'c' => {
            if spec.sign.is_some() {
                return Err("sign not allowed with integer format specifier 'c'".to_owned());
            }
            let c = u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| "%c arg not in range(0x110000)".to_owned())?;
            return Ok(spec.pad("", &c.to_string(), '>'));
        }
        other => {
            return Err(format!(
                "unknown format code '{other}' for object of type 'int'"
            ))
        }
    };

    let digits = match spec.grouping {
        Some(',') if ty != 'd' && ty != 'n' => {
            return Err(format!("cannot specify ',' with '{ty}'"));
        }
        Some(sep) => group_digits(&digits, sep, group_every),
        None => digits,
    };
    let prefix = if spec.alternate { prefix } else { "" };
    let sign = format!("{}{prefix}", spec.sign_for(value < 0));
    Ok(spec.pad(&sign, &digits, '>'))
}

/// Drop trailing zeros (and a bare trailing point) from the mantissa.
fn strip_zeros(s: &str) -> String {
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{mantissa}{exponent}")
}

/// `d.ddde+XX` with at least two exponent digits.
fn exp_form(x: f64, precision: usize, upper: bool) -> String {
    let sci = format!("{x:.precision$e}");
    let mantissa = sci.split_once('e').map_or(sci.as_str(), |(m, _)| m);
    let (_, exp) = split_exponent(&sci);
    let e = if upper { 'E' } else { 'e' };
    let exp_sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{e}{exp_sign}{:02}", exp.abs())
}

/// General format: fixed or exponent form depending on magnitude.
/// `keep_point` forces at least one fractional digit in fixed form.
fn general_form(x: f64, precision: usize, alternate: bool, upper: bool, keep_point: bool) -> String {
    let p = precision.max(1);
    let exp = if x == 0.0 {
        0
    } else {
        split_exponent(&format!("{x:.prec$e}", prec = p - 1)).1
    };

    if (-4..p as i32).contains(&exp) {
        let decimals = (p as i32 - 1 - exp) as usize;
        let fixed = format!("{x:.decimals$}");
        let mut s = if alternate { fixed } else { strip_zeros(&fixed) };
        if keep_point && !s.contains('.') {
            s.push_str(".0");
        }
        s
    } else {
        let sci = exp_form(x, p - 1, upper);
        if alternate {
            sci
        } else {
            strip_zeros(&sci)
        }
    }
}

fn format_float(value: f64, spec: &FormatSpec) -> Result<String, String> {
    let ty = spec.ty;
    let upper = matches!(ty, Some('E' | 'F' | 'G'));
    let x = value.abs();

    let body = if value.is_nan() || value.is_infinite() {
        let text = if value.is_nan() { "nan" } else { "inf" };
        let text = if upper {
            text.to_uppercase()
        } else {
            text.to_owned()
        };
        if ty == Some('%') {
            format!("{text}%")
        } else {
            text
        }
    } else {
        match ty {
            None => match spec.precision {
                None => float_repr(x),
                Some(p) => general_form(x, p, spec.alternate, false, true),
            },
            Some('f' | 'F') => format!("{x:.prec$}", prec = spec.precision.unwrap_or(6)),
            Some('e' | 'E') => exp_form(x, spec.precision.unwrap_or(6), upper),
            Some('g' | 'G' | 'n') => general_form(x, spec.precision.unwrap_or(6), spec.alternate, upper, false),
            Some('%') => format!("{:.prec$}%", x * 100.0, prec = spec.precision.unwrap_or(6)),
            Some(other) => {
                return Err(format!(
                    "unknown format code '{other}' for object of type 'float'"
                ))
            }
        }
    };

    let body = match spec.grouping {
        Some(sep) => {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            let (int_part, rest) = body.split_at(split);
            format!("{}{rest}", group_digits(int_part, sep, 3))
        }
        None => body,
    };

    let is_zero = !body.chars().any(|c| c.is_ascii_digit() && c != '0');
    let negative = value.is_sign_negative() && !value.is_nan() && !(spec.no_neg_zero && is_zero);
    Ok(spec.pad(spec.sign_for(negative), &body, '>'))
}
