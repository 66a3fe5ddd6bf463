//! Statement parser for flavor files.
//!
//! The token stream is parsed with chumsky into a small expression tree
//! that is wider than the flavor language (names, calls, operators), so a
//! rejected construct can be reported by what it is. Lowering that tree is
//! where the language is enforced: only two statement forms survive,
//! literal assignment (`name = value`, with chaining) and
//! `include("path", ...)`.

use crate::lexer::{tokenize, Lexed, StrValue, Tok};
use crate::value::Literal;
use chumsky::prelude::*;

/// Reserved words of the literal grammar. None of them may be assigned or
/// used as a value.
const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// Operators that join two operands.
const BINARY_OPS: &[&str] = &[
    "+", "-", "*", "/", "%", "**", "//", "@", "&", "|", "^", "<<", ">>", "<", ">", "==", "!=",
    "<=", ">=",
];

const INCLUDE: &str = "include";

/// A malformed or unsupported construct, with the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct SyntaxError {
    pub line: usize,
    pub reason: String,
}

impl SyntaxError {
    pub(crate) fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// One top-level statement of a flavor file.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `a = b = value`; every target receives the same value, left to right.
    Assignment {
        targets: Vec<String>,
        value: Literal,
        line: usize,
    },
    /// `include("a.cfg", "b.cfg")`; paths are merged left to right.
    IncludeCall { paths: Vec<String>, line: usize },
}

impl Statement {
    pub fn line(&self) -> usize {
        match self {
            Statement::Assignment { line, .. } | Statement::IncludeCall { line, .. } => *line,
        }
    }
}

/// Parse flavor file text into its statements, in source order.
pub fn parse_statements(src: &str) -> Result<Vec<Statement>, SyntaxError> {
    let lexed = tokenize(src)?;
    let raw = statements_parser()
        .parse(lexed.toks.as_slice())
        .into_result()
        .map_err(|errors| match errors.first() {
            Some(error) => syntax_error(&lexed, error),
            None => SyntaxError::new(1, "invalid syntax"),
        })?;

    let lower = Lower { lexed: &lexed };
    raw.into_iter()
        .map(|(statement, at)| lower.statement(statement, at))
        .collect()
}

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

fn is_augmented(op: &str) -> bool {
    op.len() > 1 && op.ends_with('=') && !matches!(op, "==" | "!=" | "<=" | ">=" | ":=")
}

/// Parsed expression; `at` indexes its first token.
#[derive(Debug, Clone)]
struct Expr {
    kind: ExprKind,
    at: usize,
}

#[derive(Debug, Clone)]
enum ExprKind {
    /// Adjacent string literals, concatenated when lowered.
    Strings(Vec<StrValue>),
    Int(u128),
    Float(f64),
    Bool(bool),
    None,
    Name(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Arg>),
    Attribute(Box<Expr>, String),
    Subscript(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
}

#[derive(Debug, Clone)]
enum Trailer {
    Call(Vec<Arg>),
    Attribute(String),
    Subscript(Expr),
}

#[derive(Debug, Clone)]
enum BraceTail {
    Dict(Expr, Option<Vec<(Expr, Expr)>>),
    Set(Option<Vec<Expr>>),
}

#[derive(Debug, Clone)]
enum StatementTail {
    Augmented(&'static str),
    Assign(Vec<Expr>),
}

#[derive(Debug, Clone)]
enum RawStatement {
    Assign { targets: Vec<Expr>, value: Expr },
    Augmented,
    Bare(Expr),
}

type Extra<'t> = extra::Err<Rich<'t, Tok>>;

fn statements_parser<'t>(
) -> impl Parser<'t, &'t [Tok], Vec<(RawStatement, usize)>, Extra<'t>> + Clone {
    let list = exprlist(expr_parser());
    let augmented = select! { Tok::Op(op) if is_augmented(op) => op };

    let simple = list
        .clone()
        .then(choice((
            augmented
                .then_ignore(list.clone())
                .map(StatementTail::Augmented),
            just(Tok::Assign)
                .ignore_then(list)
                .repeated()
                .collect::<Vec<_>>()
                .map(StatementTail::Assign),
        )))
        .map_with(|(first, tail), e| {
            let statement = match tail {
                StatementTail::Augmented(_) => RawStatement::Augmented,
                StatementTail::Assign(rest) if rest.is_empty() => RawStatement::Bare(first),
                StatementTail::Assign(mut rest) => {
                    let value = rest.pop().unwrap_or_else(|| first.clone());
                    let mut targets = vec![first];
                    targets.extend(rest);
                    RawStatement::Assign { targets, value }
                }
            };
            (statement, e.span().start)
        });

    let line = simple
        .separated_by(just(Tok::Semi))
        .at_least(1)
        .allow_trailing()
        .collect::<Vec<_>>()
        .then_ignore(just(Tok::Newline));

    line.repeated()
        .collect::<Vec<Vec<_>>>()
        .map(|lines| lines.into_iter().flatten().collect())
        .then_ignore(end())
}

/// `a` or `a, b, ...`; a comma makes a tuple.
fn exprlist<'t, P>(expr: P) -> impl Parser<'t, &'t [Tok], Expr, Extra<'t>> + Clone
where
    P: Parser<'t, &'t [Tok], Expr, Extra<'t>> + Clone,
{
    expr.clone()
        .then(
            just(Tok::Comma)
                .ignore_then(
                    expr.separated_by(just(Tok::Comma))
                        .allow_trailing()
                        .collect::<Vec<_>>(),
                )
                .or_not(),
        )
        .map(|(first, rest)| match rest {
            None => first,
            Some(rest) => {
                let at = first.at;
                let mut items = vec![first];
                items.extend(rest);
                Expr {
                    kind: ExprKind::Tuple(items),
                    at,
                }
            }
        })
}

/// Expression grammar, lowest precedence first:
///
/// ```text
/// expr    := unary (BINOP unary)*
/// unary   := ('-' | '+' | '~')* postfix
/// postfix := atom ('(' args ')' | '.' NAME | '[' exprlist ']')*
/// atom    := STRING+ | NUMBER | True | False | None | NAME
///          | '(' exprlist? ')' | '[' items ']' | '{' dict-or-set '}'
/// ```
fn expr_parser<'t>() -> impl Parser<'t, &'t [Tok], Expr, Extra<'t>> + Clone {
    recursive(|expr| {
        let items = expr
            .clone()
            .separated_by(just(Tok::Comma))
            .allow_trailing()
            .collect::<Vec<_>>();

        let strings = select! { Tok::Str(s) => s }
            .repeated()
            .at_least(1)
            .collect::<Vec<_>>()
            .map(ExprKind::Strings);

        let scalar = select! {
            Tok::Int(n) => ExprKind::Int(n),
            Tok::Float(f) => ExprKind::Float(f),
            Tok::True => ExprKind::Bool(true),
            Tok::False => ExprKind::Bool(false),
            Tok::None => ExprKind::None,
            Tok::Name(name) if !is_keyword(&name) => ExprKind::Name(name),
        };

        let list = items
            .clone()
            .delimited_by(just(Tok::LBracket), just(Tok::RBracket))
            .map(ExprKind::List);

        // The first member decides between dict and set, so it is parsed once.
        let pair = expr.clone().then_ignore(just(Tok::Colon)).then(expr.clone());
        let more_pairs = just(Tok::Comma)
            .ignore_then(
                pair.separated_by(just(Tok::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>(),
            )
            .or_not();
        let braces = expr
            .clone()
            .then(choice((
                just(Tok::Colon)
                    .ignore_then(expr.clone())
                    .then(more_pairs)
                    .map(|(value, rest)| BraceTail::Dict(value, rest)),
                just(Tok::Comma)
                    .ignore_then(items)
                    .or_not()
                    .map(BraceTail::Set),
            )))
            .or_not()
            .delimited_by(just(Tok::LBrace), just(Tok::RBrace))
            .map(|body| match body {
                None => ExprKind::Dict(Vec::new()),
                Some((key, BraceTail::Dict(value, rest))) => {
                    let mut pairs = vec![(key, value)];
                    pairs.extend(rest.unwrap_or_default());
                    ExprKind::Dict(pairs)
                }
                Some((first, BraceTail::Set(rest))) => {
                    let mut members = vec![first];
                    members.extend(rest.unwrap_or_default());
                    ExprKind::Set(members)
                }
            });

        let parens = exprlist(expr.clone())
            .or_not()
            .delimited_by(just(Tok::LParen), just(Tok::RParen))
            .map_with(|inner, e| {
                inner.unwrap_or_else(|| Expr {
                    kind: ExprKind::Tuple(Vec::new()),
                    at: e.span().start,
                })
            });

        let atom = choice((strings, scalar, list, braces))
            .map_with(|kind, e| Expr {
                kind,
                at: e.span().start,
            })
            .or(parens);

        let args = choice((
            select! { Tok::Name(name) => name }
                .then_ignore(just(Tok::Assign))
                .then(expr.clone())
                .map(|(name, value)| Arg::Keyword(name, value)),
            expr.clone().map(Arg::Positional),
        ))
        .separated_by(just(Tok::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Tok::LParen), just(Tok::RParen));

        let trailer = choice((
            args.map(Trailer::Call),
            just(Tok::Dot)
                .ignore_then(select! { Tok::Name(name) => name })
                .map(Trailer::Attribute),
            exprlist(expr.clone())
                .delimited_by(just(Tok::LBracket), just(Tok::RBracket))
                .map(Trailer::Subscript),
        ));

        let postfix = atom.foldl(trailer.repeated(), |target, trailer| {
            let at = target.at;
            let target = Box::new(target);
            let kind = match trailer {
                Trailer::Call(args) => ExprKind::Call(target, args),
                Trailer::Attribute(name) => ExprKind::Attribute(target, name),
                Trailer::Subscript(index) => ExprKind::Subscript(target, Box::new(index)),
            };
            Expr { kind, at }
        });

        let unary = select! { Tok::Op(op @ ("-" | "+" | "~")) => op }
            .map_with(|op, e| {
                let span: SimpleSpan = e.span();
                (op, span.start)
            })
            .repeated()
            .foldr(postfix, |(op, at), operand| Expr {
                kind: ExprKind::Unary(op, Box::new(operand)),
                at,
            });

        let binary_op = select! { Tok::Op(op) if BINARY_OPS.contains(&op) => op };
        unary
            .clone()
            .foldl(binary_op.then(unary).repeated(), |left, (op, right)| {
                let at = left.at;
                Expr {
                    kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
                    at,
                }
            })
    })
}

/// Describe the token the grammar stopped at.
fn syntax_error(lexed: &Lexed, error: &Rich<'_, Tok>) -> SyntaxError {
    let at = error.span().start;
    let line = lexed.line_at(at);
    let statement_start = at == 0 || matches!(lexed.toks.get(at - 1), Some(Tok::Newline | Tok::Semi));

    let reason = match error.found() {
        None => "invalid syntax: unexpected end of file".to_owned(),
        Some(Tok::Name(name)) if is_keyword(name) => {
            if !statement_start {
                non_literal_reason(format!("'{name}'"))
            } else if lexed.toks.get(at + 1) == Some(&Tok::Assign) {
                format!("cannot assign to keyword '{name}'")
            } else {
                format!("unsupported syntax: '{name}' statements are not allowed")
            }
        }
        Some(
            Tok::Str(_) | Tok::Int(_) | Tok::Float(_) | Tok::Name(_) | Tok::True | Tok::False
            | Tok::None,
        ) => "invalid syntax. Perhaps you forgot a comma?".to_owned(),
        Some(tok) => format!("invalid syntax: unexpected {}", tok.describe()),
    };
    SyntaxError::new(line, reason)
}

fn non_literal_reason(detail: impl std::fmt::Display) -> String {
    format!("unsupported syntax (non-literal): {detail}")
}

/// Turns parsed statements into [`Statement`]s, rejecting everything the
/// flavor language does not allow.
struct Lower<'a> {
    lexed: &'a Lexed,
}

impl Lower<'_> {
    fn error(&self, at: usize, reason: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.lexed.line_at(at), reason)
    }

    fn non_literal(&self, at: usize, detail: impl std::fmt::Display) -> SyntaxError {
        self.error(at, non_literal_reason(detail))
    }

    fn statement(&self, raw: RawStatement, at: usize) -> Result<Statement, SyntaxError> {
        let line = self.lexed.line_at(at);
        match raw {
            RawStatement::Assign { targets, value } => {
                let targets = targets
                    .iter()
                    .map(|target| self.target(target))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = self.literal(&value)?;
                Ok(Statement::Assignment {
                    targets,
                    value,
                    line,
                })
            }
            RawStatement::Augmented => Err(self.error(
                at,
                "unsupported syntax: augmented assignment is not allowed",
            )),
            RawStatement::Bare(expr) => match &expr.kind {
                ExprKind::Call(func, args)
                    if matches!(&func.kind, ExprKind::Name(name) if name == INCLUDE) =>
                {
                    let paths = self.include_paths(args, at)?;
                    Ok(Statement::IncludeCall { paths, line })
                }
                _ => Err(self.error(at, bare_statement_reason(&expr))),
            },
        }
    }

    fn target(&self, target: &Expr) -> Result<String, SyntaxError> {
        let reason = match &target.kind {
            ExprKind::Name(name) => return Ok(name.clone()),
            ExprKind::Bool(true) => "cannot assign to True",
            ExprKind::Bool(false) => "cannot assign to False",
            ExprKind::None => "cannot assign to None",
            ExprKind::Strings(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::List(_)
            | ExprKind::Set(_)
            | ExprKind::Dict(_) => "cannot assign to literal",
            ExprKind::Call(..) => "cannot assign to function call",
            _ => "unsupported syntax: only simple names can be assigned",
        };
        Err(self.error(target.at, reason))
    }

    fn include_paths(&self, args: &[Arg], at: usize) -> Result<Vec<String>, SyntaxError> {
        let mut paths = Vec::with_capacity(args.len());
        for arg in args {
            let value = match arg {
                Arg::Keyword(_, value) => {
                    return Err(self.error(
                        value.at,
                        "unsupported syntax: include() does not accept keyword arguments",
                    ));
                }
                Arg::Positional(value) => value,
            };
            match &value.kind {
                ExprKind::Strings(_) => match self.strings(value)? {
                    Literal::Str(path) => paths.push(path),
                    _ => {
                        return Err(self.error(
                            value.at,
                            "unsupported syntax: include() paths must be text strings",
                        ));
                    }
                },
                _ => return Err(self.error(value.at, "unsupported syntax (missing quotes?)")),
            }
        }
        if paths.is_empty() {
            return Err(self.error(at, "include() requires at least one path"));
        }
        Ok(paths)
    }

    fn literal(&self, expr: &Expr) -> Result<Literal, SyntaxError> {
        let at = expr.at;
        match &expr.kind {
            ExprKind::Strings(_) => self.strings(expr),
            ExprKind::Int(n) => self.int(*n, false, at),
            ExprKind::Float(f) => Ok(Literal::Float(*f)),
            ExprKind::Bool(b) => Ok(Literal::Bool(*b)),
            ExprKind::None => Ok(Literal::None),
            ExprKind::Tuple(items) => Ok(Literal::Tuple(self.literals(items)?)),
            ExprKind::List(items) => Ok(Literal::List(self.literals(items)?)),
            ExprKind::Set(members) => {
                let members = self.literals(members)?;
                for member in &members {
                    self.check_hashable(member, at)?;
                }
                Ok(Literal::set(members))
            }
            ExprKind::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.literal(key)?;
                    self.check_hashable(&key, at)?;
                    out.push((key, self.literal(value)?));
                }
                Ok(Literal::dict(out))
            }
            ExprKind::Unary(op, operand) => match (*op, &operand.kind) {
                ("-" | "+", ExprKind::Int(n)) => self.int(*n, *op == "-", at),
                ("-", ExprKind::Float(f)) => Ok(Literal::Float(-f)),
                ("+", ExprKind::Float(f)) => Ok(Literal::Float(*f)),
                _ => Err(self.non_literal(at, format!("unary '{op}' on a non-number"))),
            },
            ExprKind::Binary(op, ..) => Err(self.non_literal(at, format!("operator '{op}'"))),
            ExprKind::Name(name) => {
                Err(self.non_literal(at, format!("name '{name}' is not a literal")))
            }
            ExprKind::Call(..) => Err(self.non_literal(at, "function call")),
            ExprKind::Attribute(..) => Err(self.non_literal(at, "attribute access")),
            ExprKind::Subscript(..) => Err(self.non_literal(at, "subscript")),
        }
    }

    fn literals(&self, items: &[Expr]) -> Result<Vec<Literal>, SyntaxError> {
        items.iter().map(|item| self.literal(item)).collect()
    }

    /// Adjacent string tokens concatenate into one literal.
    fn strings(&self, expr: &Expr) -> Result<Literal, SyntaxError> {
        let ExprKind::Strings(parts) = &expr.kind else {
            return Err(self.error(expr.at, "expected a string literal"));
        };
        let mut text: Option<String> = None;
        let mut bytes: Option<Vec<u8>> = None;
        for part in parts {
            match part {
                StrValue::Text(s) if bytes.is_none() => {
                    text.get_or_insert_with(String::new).push_str(s);
                }
                StrValue::Bytes(b) if text.is_none() => {
                    bytes.get_or_insert_with(Vec::new).extend(b);
                }
                _ => return Err(self.error(expr.at, "cannot mix bytes and nonbytes literals")),
            }
        }
        Ok(match bytes {
            Some(b) => Literal::Bytes(b),
            None => Literal::Str(text.unwrap_or_default()),
        })
    }

    fn check_hashable(&self, value: &Literal, at: usize) -> Result<(), SyntaxError> {
        if value.is_hashable() {
            Ok(())
        } else {
            Err(self.non_literal(at, format!("unhashable type: '{}'", value.type_name())))
        }
    }

    fn int(&self, magnitude: u128, negative: bool, at: usize) -> Result<Literal, SyntaxError> {
        let too_large = || self.error(at, "integer literal does not fit in 64 bits");
        let magnitude = i128::try_from(magnitude).map_err(|_| too_large())?;
        let signed = if negative { -magnitude } else { magnitude };
        i64::try_from(signed)
            .map(Literal::Int)
            .map_err(|_| too_large())
    }
}

fn bare_statement_reason(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Call(func, _) => match &func.kind {
            ExprKind::Name(name) => format!("unsupported syntax: call to '{name}' is not allowed"),
            _ => bare_statement_reason(func),
        },
        ExprKind::Attribute(..) => match root_name(expr) {
            Some(name) => {
                format!("unsupported syntax: attribute access on '{name}' is not allowed")
            }
            None => "unsupported syntax: attribute access is not allowed".to_owned(),
        },
        ExprKind::Subscript(..) => match root_name(expr) {
            Some(name) => format!("unsupported syntax: subscript of '{name}' is not allowed"),
            None => "unsupported syntax: subscripts are not allowed".to_owned(),
        },
        _ => "unsupported syntax: bare expressions are not allowed".to_owned(),
    }
}

/// Leftmost name of an attribute, call, or subscript chain.
fn root_name(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Name(name) => Some(name),
        ExprKind::Call(inner, _)
        | ExprKind::Attribute(inner, _)
        | ExprKind::Subscript(inner, _) => root_name(inner),
        _ => None,
    }
}
