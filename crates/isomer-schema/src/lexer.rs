//! Tokenizer for flavor files.
//!
//! Token rules are declared on [`Tok`] with logos. String literals are
//! scanned and unescaped in a callback. A short pass over the logos output
//! then tracks bracket depth (newlines only end a statement outside
//! brackets) and records the line of every token for error reporting.

use crate::parser::SyntaxError;
use logos::{Lexer, Logos};

/// Deepest bracket nesting accepted before the file is rejected.
pub(crate) const MAX_NESTING: usize = 50;

/// Operators with no role in the literal grammar. They are still lexed so
/// the parser can name them when it rejects an expression.
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "->",
    ":=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "+", "-", "*", "/", "%", "@",
    "&", "|", "^", "~", "<", ">",
];

/// Failure inside a token callback. The default covers input no rule matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum LexError {
    #[default]
    Unrecognized,
    Invalid(String),
}

impl LexError {
    fn invalid(reason: impl Into<String>) -> Self {
        LexError::Invalid(reason.into())
    }
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
pub(crate) enum Tok {
    #[regex(r"[_\p{L}][_\p{L}\p{N}]*", |lex| lex.slice().to_owned())]
    Name(String),

    #[regex(r#"([rRuUbB]|[bB][rR]|[rR][bB])?['"]"#, string_literal)]
    Str(StrValue),

    #[regex(r#"([fF]|[fF][rR]|[rR][fF])['"]"#, |_| { Err::<(), _>(LexError::invalid("unsupported syntax: f-strings are not allowed")) })]
    FString,

    /// Magnitude of an integer literal; signs are unary operators.
    #[regex(r"[0-9](_?[0-9])*", decimal_int)]
    #[regex(r"0[xX](_?[0-9a-fA-F])+", |lex| radix_int(lex, 16))]
    #[regex(r"0[oO](_?[0-7])+", |lex| radix_int(lex, 8))]
    #[regex(r"0[bB](_?[01])+", |lex| radix_int(lex, 2))]
    Int(u128),

    #[regex(r"[0-9](_?[0-9])*\.([0-9](_?[0-9])*)?([eE][+-]?[0-9](_?[0-9])*)?", float)]
    #[regex(r"\.[0-9](_?[0-9])*([eE][+-]?[0-9](_?[0-9])*)?", float)]
    #[regex(r"[0-9](_?[0-9])*[eE][+-]?[0-9](_?[0-9])*", float)]
    Float(f64),

    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("None")]
    None,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token("=")]
    Assign,
    #[token(".")]
    Dot,

    #[regex(r"\*\*=|//=|>>=|<<=|\.\.\.|\*\*|//|<<|>>|<=|>=|==|!=|->|:=|[-+*/%&|^@]=|[-+*/%@&|^~<>]", operator)]
    Op(&'static str),

    #[token("\n")]
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StrValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl Tok {
    pub(crate) fn describe(&self) -> String {
        let text = match self {
            Tok::Name(n) => return format!("name '{n}'"),
            Tok::Str(StrValue::Text(_)) => return "string literal".to_owned(),
            Tok::Str(StrValue::Bytes(_)) => return "bytes literal".to_owned(),
            Tok::Int(_) | Tok::Float(_) => return "number".to_owned(),
            Tok::Newline => return "end of line".to_owned(),
            Tok::FString => "f-string",
            Tok::True => "True",
            Tok::False => "False",
            Tok::None => "None",
            Tok::LParen => "(",
            Tok::RParen => ")",
            Tok::LBracket => "[",
            Tok::RBracket => "]",
            Tok::LBrace => "{",
            Tok::RBrace => "}",
            Tok::Comma => ",",
            Tok::Colon => ":",
            Tok::Semi => ";",
            Tok::Assign => "=",
            Tok::Dot => ".",
            Tok::Op(op) => op,
        };
        format!("'{text}'")
    }

    fn opening(&self) -> Option<char> {
        match self {
            Tok::LParen => Some('('),
            Tok::LBracket => Some('['),
            Tok::LBrace => Some('{'),
            _ => None,
        }
    }

    fn closing(&self) -> Option<char> {
        match self {
            Tok::RParen => Some(')'),
            Tok::RBracket => Some(']'),
            Tok::RBrace => Some('}'),
            _ => None,
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, Tok::Int(_) | Tok::Float(_))
    }
}

/// Token stream of one file. `lines[i]` is the 1-based line of `toks[i]`.
#[derive(Debug)]
pub(crate) struct Lexed {
    pub toks: Vec<Tok>,
    pub lines: Vec<usize>,
}

impl Lexed {
    /// Line of the token at `index`, or of the last token past the end.
    pub(crate) fn line_at(&self, index: usize) -> usize {
        self.lines
            .get(index)
            .or_else(|| self.lines.last())
            .copied()
            .unwrap_or(1)
    }

    fn push(&mut self, tok: Tok, line: usize) {
        self.toks.push(tok);
        self.lines.push(line);
    }

    fn push_newline(&mut self, line: usize) {
        if matches!(self.toks.last(), Some(t) if *t != Tok::Newline) {
            self.push(Tok::Newline, line);
        }
    }
}

pub(crate) fn tokenize(src: &str) -> Result<Lexed, SyntaxError> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(src.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let line_of = |offset: usize| line_starts.partition_point(|&start| start <= offset);

    let mut out = Lexed {
        toks: Vec::new(),
        lines: Vec::new(),
    };
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut number_end = None;
    let mut lexer = Tok::lexer(src);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let line = line_of(span.start);
        let tok = result.map_err(|e| lex_failure(e, &lexer, line))?;

        if number_end == Some(span.start) {
            match &tok {
                Tok::Name(name) if name.eq_ignore_ascii_case("j") => {
                    return Err(SyntaxError::new(
                        line,
                        "unsupported syntax: complex literals are not allowed",
                    ));
                }
                Tok::Name(_) | Tok::Int(_) | Tok::Float(_) | Tok::Str(_) => {
                    return Err(SyntaxError::new(line, "invalid number literal"));
                }
                _ => {}
            }
        }
        number_end = tok.is_number().then_some(span.end);

        if tok == Tok::Newline {
            if brackets.is_empty() {
                out.push_newline(line);
            }
            continue;
        }

        if let Some(open) = tok.opening() {
            if brackets.len() >= MAX_NESTING {
                return Err(SyntaxError::new(line, "too many nested parentheses"));
            }
            brackets.push((open, line));
        } else if let Some(close) = tok.closing() {
            match brackets.pop() {
                None => {
                    return Err(SyntaxError::new(line, format!("unmatched '{close}'")));
                }
                Some((open, open_line)) if !brackets_match(open, close) => {
                    let reason = if open_line == line {
                        format!("closing parenthesis '{close}' does not match opening parenthesis '{open}'")
                    } else {
                        format!("closing parenthesis '{close}' does not match opening parenthesis '{open}' on line {open_line}")
                    };
                    return Err(SyntaxError::new(line, reason));
                }
                Some(_) => {}
            }
        }

        out.push(tok, line);
    }

    if let Some(&(open, line)) = brackets.last() {
        return Err(SyntaxError::new(line, format!("'{open}' was never closed")));
    }
    out.push_newline(line_of(src.len()));
    Ok(out)
}

fn lex_failure(error: LexError, lexer: &Lexer<'_, Tok>, line: usize) -> SyntaxError {
    match error {
        LexError::Invalid(reason) => SyntaxError::new(line, reason),
        LexError::Unrecognized => {
            let c = lexer.slice().chars().next().unwrap_or_default();
            let reason = if c != '\\' {
                format!("invalid character '{c}' (U+{:04X})", u32::from(c))
            } else if lexer.remainder().is_empty() {
                "unexpected end of file after line continuation".to_owned()
            } else {
                "unexpected character after line continuation character".to_owned()
            };
            SyntaxError::new(line, reason)
        }
    }
}

fn brackets_match(open: char, close: char) -> bool {
    matches!((open, close), ('(', ')') | ('[', ']') | ('{', '}'))
}

fn operator(lex: &mut Lexer<'_, Tok>) -> Option<&'static str> {
    OPERATORS.iter().copied().find(|op| *op == lex.slice())
}

fn decimal_int(lex: &mut Lexer<'_, Tok>) -> Result<u128, LexError> {
    let digits = lex.slice().replace('_', "");
    if digits.len() > 1 && digits.starts_with('0') && digits.bytes().any(|b| b != b'0') {
        return Err(LexError::invalid(
            "leading zeros in decimal integer literals are not permitted; use an 0o prefix for octal integers",
        ));
    }
    digits
        .parse()
        .map_err(|_| LexError::invalid("integer literal is too large"))
}

fn radix_int(lex: &mut Lexer<'_, Tok>, radix: u32) -> Result<u128, LexError> {
    let digits = lex.slice()[2..].replace('_', "");
    u128::from_str_radix(&digits, radix)
        .map_err(|_| LexError::invalid("integer literal is too large"))
}

fn float(lex: &mut Lexer<'_, Tok>) -> Result<f64, LexError> {
    let text = lex.slice().replace('_', "");
    text.parse()
        .map_err(|_| LexError::invalid(format!("invalid float literal '{text}'")))
}

/// Scan a string literal whose prefix and opening quote logos has matched,
/// consume the rest of it, and decode its contents.
fn string_literal(lex: &mut Lexer<'_, Tok>) -> Result<StrValue, LexError> {
    let opening = lex.slice();
    let quote = opening.chars().last().unwrap_or('\'');
    let prefix = opening[..opening.len() - 1].to_ascii_lowercase();
    let raw = prefix.contains('r');
    let bytes = prefix.contains('b');

    let rest = lex.remainder();
    let pair: String = [quote, quote].iter().collect();
    let triple = rest.starts_with(pair.as_str());
    let closing = if triple { format!("{quote}{pair}") } else { quote.to_string() };
    let body_start = if triple { 2 } else { 0 };
    let unterminated = || {
        LexError::invalid(if triple {
            "unterminated triple-quoted string literal"
        } else {
            "unterminated string literal"
        })
    };

    let body = &rest[body_start..];
    let mut chars = body.char_indices();
    let end = loop {
        match chars.next() {
            None => return Err(unterminated()),
            Some((_, '\\')) => {
                chars.next();
            }
            Some((_, '\n')) if !triple => return Err(unterminated()),
            Some((i, c)) if c == quote && body[i..].starts_with(closing.as_str()) => break i,
            Some(_) => {}
        }
    };

    lex.bump(body_start + end + closing.len());
    decode(&body[..end], raw, bytes)
}

fn decode(body: &str, raw: bool, bytes: bool) -> Result<StrValue, LexError> {
    let mut acc = StrAcc::new(bytes);
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            acc.push(c)?;
            continue;
        }
        let Some(next) = chars.next() else {
            acc.push('\\')?;
            break;
        };
        if raw {
            acc.push('\\')?;
            acc.push(next)?;
            continue;
        }

        match next {
            '\n' => {}
            '\\' | '\'' | '"' => acc.push(next)?,
            'a' => acc.push('\x07')?,
            'b' => acc.push('\x08')?,
            'f' => acc.push('\x0c')?,
            'n' => acc.push('\n')?,
            'r' => acc.push('\r')?,
            't' => acc.push('\t')?,
            'v' => acc.push('\x0b')?,
            '0'..='7' => {
                let mut value = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                if bytes {
                    let byte = u8::try_from(value).map_err(|_| {
                        LexError::invalid("octal escape value exceeds 0o377 in bytes literal")
                    })?;
                    acc.push_byte(byte);
                } else {
                    acc.push(char::from_u32(value).unwrap_or('\u{fffd}'))?;
                }
            }
            'x' => {
                let value = hex_escape(&mut chars, 2, "\\xXX")?;
                if bytes {
                    acc.push_byte(value as u8);
                } else {
                    acc.push(char::from_u32(value).unwrap_or('\u{fffd}'))?;
                }
            }
            'u' | 'U' if !bytes => {
                let (width, escape) = if next == 'u' {
                    (4, "\\uXXXX")
                } else {
                    (8, "\\UXXXXXXXX")
                };
                let value = hex_escape(&mut chars, width, escape)?;
                let c = char::from_u32(value).ok_or_else(|| {
                    LexError::invalid(format!("illegal Unicode character in {escape} escape"))
                })?;
                acc.push(c)?;
            }
            'N' if !bytes => {
                return Err(LexError::invalid(
                    "unsupported syntax: \\N{...} escapes are not allowed",
                ));
            }
            other => {
                acc.push('\\')?;
                acc.push(other)?;
            }
        }
    }

    Ok(acc.finish())
}

fn hex_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    width: usize,
    escape: &str,
) -> Result<u32, LexError> {
    let mut value = 0u32;
    for _ in 0..width {
        let digit = chars
            .peek()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| LexError::invalid(format!("truncated {escape} escape")))?;
        value = value.wrapping_mul(16).wrapping_add(digit);
        chars.next();
    }
    Ok(value)
}

/// Collects the decoded contents of a text or bytes literal.
enum StrAcc {
    Text(String),
    Bytes(Vec<u8>),
}

impl StrAcc {
    fn new(bytes: bool) -> Self {
        if bytes {
            StrAcc::Bytes(Vec::new())
        } else {
            StrAcc::Text(String::new())
        }
    }

    fn push(&mut self, c: char) -> Result<(), LexError> {
        match self {
            StrAcc::Text(text) => text.push(c),
            StrAcc::Bytes(_) if !c.is_ascii() => {
                return Err(LexError::invalid(
                    "bytes can only contain ASCII literal characters",
                ));
            }
            StrAcc::Bytes(buf) => buf.push(c as u8),
        }
        Ok(())
    }

    fn push_byte(&mut self, byte: u8) {
        match self {
            StrAcc::Text(text) => text.push(char::from(byte)),
            StrAcc::Bytes(buf) => buf.push(byte),
        }
    }

    fn finish(self) -> StrValue {
        match self {
            StrAcc::Text(text) => StrValue::Text(text),
            StrAcc::Bytes(buf) => StrValue::Bytes(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().toks
    }

    fn text(s: &str) -> Tok {
        Tok::Str(StrValue::Text(s.to_owned()))
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let tokens = toks("x = [\n  1,\n  2,\n]\n\n\ny = 3");
        let newlines = tokens.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(
            toks("# header\nx = '#not a comment' # trailing"),
            vec![
                Tok::Name("x".into()),
                Tok::Assign,
                text("#not a comment"),
                Tok::Newline,
            ]
        );
    }

    #[test]
    fn line_continuation_joins_lines() {
        let lexed = tokenize("x = \\\n  1\ny = 2").unwrap();
        assert_eq!(lexed.toks[2], Tok::Int(1));
        assert_eq!(lexed.lines[2], 2);
        assert_eq!(lexed.toks[3], Tok::Newline);
        assert!(tokenize("x = \\ 1")
            .unwrap_err()
            .reason
            .contains("line continuation"));
    }

    #[test]
    fn keywords_and_operators() {
        assert_eq!(
            toks("None Nonesuch **= :"),
            vec![
                Tok::None,
                Tok::Name("Nonesuch".into()),
                Tok::Op("**="),
                Tok::Colon,
                Tok::Newline,
            ]
        );
        assert!(tokenize("x = $").unwrap_err().reason.contains("U+0024"));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(toks(r"'a\tb\x41\101é\q'")[0], text("a\tbAA\u{e9}\\q"));
        assert_eq!(toks(r"r'a\tb'")[0], text("a\\tb"));
        assert_eq!(toks(r"r'\''")[0], text("\\'"));
        assert_eq!(
            toks(r"b'\x00\xff'")[0],
            Tok::Str(StrValue::Bytes(vec![0, 0xff]))
        );
        assert_eq!(toks("'''line\none'''")[0], text("line\none"));
        assert_eq!(toks("'''it's \"quoted\" '''")[0], text("it's \"quoted\" "));
        assert_eq!(toks("'a\\\nb'")[0], text("ab"));
        assert_eq!(toks("''")[0], text(""));
    }

    #[test]
    fn triple_quoted_string_tracks_lines() {
        let lexed = tokenize("x = '''a\nb\nc'''\ny = 1").unwrap();
        let y = lexed
            .toks
            .iter()
            .position(|t| *t == Tok::Name("y".into()))
            .unwrap();
        assert_eq!(lexed.lines[y], 4);
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("0x_ff")[0], Tok::Int(255));
        assert_eq!(toks("0o17")[0], Tok::Int(15));
        assert_eq!(toks("0b1010")[0], Tok::Int(10));
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("1.5e3")[0], Tok::Float(1500.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
        assert_eq!(toks("1.")[0], Tok::Float(1.0));
        assert_eq!(toks("2e-1")[0], Tok::Float(0.2));
        assert_eq!(toks("000")[0], Tok::Int(0));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(tokenize("012").unwrap_err().reason.contains("leading zeros"));
        assert!(tokenize("1__0").is_err());
        assert!(tokenize("1_").is_err());
        assert!(tokenize("0x").is_err());
        assert!(tokenize("3j").unwrap_err().reason.contains("complex"));
        assert!(tokenize("12abc").is_err());
    }

    #[test]
    fn rejects_unterminated_strings() {
        let err = tokenize("x = 'abc\ny = 1").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.reason.contains("unterminated"));
        assert!(tokenize("x = '''abc")
            .unwrap_err()
            .reason
            .contains("triple-quoted"));
    }

    #[test]
    fn rejects_fstrings_and_unbalanced_brackets() {
        assert!(tokenize("x = f'{y}'").unwrap_err().reason.contains("f-strings"));
        assert!(tokenize("x = rf'{y}'").unwrap_err().reason.contains("f-strings"));
        assert!(tokenize("foo)").unwrap_err().reason.contains("unmatched"));
        assert!(tokenize("x = [1, 2")
            .unwrap_err()
            .reason
            .contains("never closed"));
        assert!(tokenize("x = [1, 2)")
            .unwrap_err()
            .reason
            .contains("does not match"));
    }

    #[test]
    fn rejects_non_ascii_bytes() {
        assert!(tokenize("b'caf\u{e9}'").is_err());
    }

    #[test]
    fn rejects_excessive_nesting() {
        let src = format!(
            "x = {}{}",
            "[".repeat(MAX_NESTING + 1),
            "]".repeat(MAX_NESTING + 1)
        );
        assert!(tokenize(&src).unwrap_err().reason.contains("nested"));
    }
}
