//! Lexer and parser for the calc language.
//!
//! One statement per line:
//!
//! ```text
//! import text.format
//! @file:Experimental
//! @Serializable class Point
//! val x = 1 + 2
//! lazy val big = x * 1000
//! var counter = 0
//! counter = counter + 1
//! "x is " + str(x)
//! ```

use std::fmt;

use chumsky::error::RichReason;
use chumsky::input::ValueInput;
use chumsky::pratt::*;
use chumsky::prelude::*;

use crate::evaluator::Diagnostic;

/// 1-based position in the snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn error(self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(message, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    Name(String, Pos),
    Call {
        name: String,
        args: Vec<Expr>,
        pos: Pos,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
    Neg(Box<Expr>, Pos),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Val { name: String, expr: Expr, lazy: bool },
    Var { name: String, expr: Expr },
    Assign { name: String, expr: Expr, pos: Pos },
    Import(String),
    Class { name: String, annotations: Vec<String> },
    FileAnnotation(String),
    Expr(Expr),
}

/// Byte range of a token in its line.
type Span = SimpleSpan;

type ParseError<'code, T> = Rich<'code, T, Span>;

#[derive(Debug, Clone, PartialEq)]
enum Token<'code> {
    Int(i64),
    Str(String),
    Ident(&'code str),
    Val,
    Var,
    Lazy,
    Import,
    Class,
    True,
    False,
    Comment,
    EqEq,
    Punct(char),
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(value) => write!(f, "{}", value),
            Token::Str(text) => write!(f, "{:?}", text),
            Token::Ident(name) => f.write_str(name),
            Token::Val => f.write_str("val"),
            Token::Var => f.write_str("var"),
            Token::Lazy => f.write_str("lazy"),
            Token::Import => f.write_str("import"),
            Token::Class => f.write_str("class"),
            Token::True => f.write_str("true"),
            Token::False => f.write_str("false"),
            Token::Comment => f.write_str("//"),
            Token::EqEq => f.write_str("=="),
            Token::Punct(c) => write!(f, "{}", c),
        }
    }
}

/// Maps spans of one line back to positions.
#[derive(Debug, Clone, Copy)]
struct LineMap<'code> {
    line: usize,
    text: &'code str,
}

impl LineMap<'_> {
    fn pos(&self, span: Span) -> Pos {
        let start = span.start.min(self.text.len());
        Pos {
            line: self.line,
            column: self.text[..start].chars().count() + 1,
        }
    }

    /// Turn the first parse error of a line into a diagnostic.
    fn diagnostic<T: fmt::Display>(&self, errors: Vec<ParseError<'_, T>>) -> Diagnostic {
        let Some(error) = errors.into_iter().next() else {
            return self.pos(Span::from(0..0)).error("invalid syntax");
        };

        let mut message = match error.reason() {
            RichReason::Custom(message) => message.clone(),
            _ => match error.found() {
                Some(found) => format!("unexpected '{}'", found),
                None => "unexpected end of line".to_string(),
            },
        };
        let expected: Vec<String> = error.expected().map(ToString::to_string).collect();
        if !expected.is_empty() {
            message.push_str(&format!(", expected {}", expected.join(" or ")));
        }
        self.pos(*error.span()).error(message)
    }
}

/// Parse a whole snippet, reporting every malformed line.
pub fn parse(code: &str) -> Result<Vec<Stmt>, Vec<Diagnostic>> {
    let mut statements = Vec::new();
    let mut diagnostics = Vec::new();

    for (index, text) in code.lines().enumerate() {
        match parse_line(text, index + 1) {
            Ok(Some(stmt)) => statements.push(stmt),
            Ok(None) => {}
            Err(diagnostic) => diagnostics.push(diagnostic),
        }
    }

    if diagnostics.is_empty() {
        Ok(statements)
    } else {
        Err(diagnostics)
    }
}

fn parse_line(text: &str, line: usize) -> Result<Option<Stmt>, Diagnostic> {
    let lines = LineMap { line, text };

    let mut tokens = lexer()
        .parse(text)
        .into_result()
        .map_err(|errors| lines.diagnostic(errors))?;
    tokens.retain(|(token, _)| *token != Token::Comment);
    if tokens.is_empty() {
        return Ok(None);
    }

    let end = text.trim_end().len();
    statement(lines)
        .parse(
            tokens
                .as_slice()
                .map(Span::from(end..end), |(token, span)| (token, span)),
        )
        .into_result()
        .map(Some)
        .map_err(|errors| lines.diagnostic(errors))
}

fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<(Token<'code>, Span)>, extra::Err<ParseError<'code, char>>> {
    let int = text::digits(10)
        .to_slice()
        .try_map(|digits: &str, span| {
            digits.parse().map(Token::Int).map_err(|_| {
                ParseError::custom(span, format!("integer literal {} is too large", digits))
            })
        });

    let escape = just('\\').ignore_then(choice((
        just('n').to('\n'),
        just('t').to('\t'),
        any(),
    )));
    let string = none_of("\\\"")
        .or(escape)
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"'))
        .map(Token::Str);

    let word = text::ident().map(|word: &'code str| match word {
        "val" => Token::Val,
        "var" => Token::Var,
        "lazy" => Token::Lazy,
        "import" => Token::Import,
        "class" => Token::Class,
        "true" => Token::True,
        "false" => Token::False,
        _ => Token::Ident(word),
    });

    let comment = just("//").then(any().repeated()).to(Token::Comment);

    let token = choice((
        comment,
        just("==").to(Token::EqEq),
        int,
        string,
        word,
        one_of("+-*/(),=@:.").map(Token::Punct),
    ));

    token
        .map_with(|token, extra| (token, extra.span()))
        .padded()
        .repeated()
        .collect::<Vec<_>>()
        .padded()
}

/// Parser of a single-token operator, yielding its position.
fn operator<'tokens, 'code: 'tokens, I>(
    token: Token<'code>,
    lines: LineMap<'code>,
) -> impl Parser<'tokens, I, Pos, extra::Err<ParseError<'tokens, Token<'code>>>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'code>, Span = Span>,
{
    just(token).map_with(move |_, extra| lines.pos(extra.span()))
}

fn statement<'tokens, 'code: 'tokens, I>(
    lines: LineMap<'code>,
) -> impl Parser<'tokens, I, Stmt, extra::Err<ParseError<'tokens, Token<'code>>>>
where
    I: ValueInput<'tokens, Token = Token<'code>, Span = Span>,
{
    let ident = select! { Token::Ident(name) => name.to_string() };

    let expression = recursive(|expression| {
        let literal = select! {
            Token::Int(value) => Expr::Int(value),
            Token::Str(text) => Expr::Str(text),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
        };

        let arguments = expression
            .clone()
            .separated_by(just(Token::Punct(',')))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::Punct('(')), just(Token::Punct(')')));

        let name_or_call = ident
            .clone()
            .then(arguments.or_not())
            .map_with(move |(name, args), extra| {
                let pos = lines.pos(extra.span());
                match args {
                    Some(args) => Expr::Call { name, args, pos },
                    None => Expr::Name(name, pos),
                }
            });

        let parenthesized = expression
            .delimited_by(just(Token::Punct('(')), just(Token::Punct(')')));

        choice((literal, name_or_call, parenthesized))
            .labelled("an expression")
            .pratt((
                prefix(4, operator(Token::Punct('-'), lines), |pos, rhs, _| {
                    Expr::Neg(Box::new(rhs), pos)
                }),
                infix(left(3), operator(Token::Punct('*'), lines), |lhs, pos, rhs, _| {
                    binary(BinaryOp::Mul, lhs, rhs, pos)
                }),
                infix(left(3), operator(Token::Punct('/'), lines), |lhs, pos, rhs, _| {
                    binary(BinaryOp::Div, lhs, rhs, pos)
                }),
                infix(left(2), operator(Token::Punct('+'), lines), |lhs, pos, rhs, _| {
                    binary(BinaryOp::Add, lhs, rhs, pos)
                }),
                infix(left(2), operator(Token::Punct('-'), lines), |lhs, pos, rhs, _| {
                    binary(BinaryOp::Sub, lhs, rhs, pos)
                }),
                infix(left(1), operator(Token::EqEq, lines), |lhs, pos, rhs, _| {
                    binary(BinaryOp::Eq, lhs, rhs, pos)
                }),
            ))
    });

    let declaration = ident
        .clone()
        .labelled("a binding name")
        .then_ignore(just(Token::Punct('=')))
        .then(expression.clone());

    let val = just(Token::Lazy)
        .or_not()
        .then_ignore(just(Token::Val))
        .then(declaration.clone())
        .map(|(lazy, (name, expr))| Stmt::Val {
            name,
            expr,
            lazy: lazy.is_some(),
        });

    let var = just(Token::Var)
        .ignore_then(declaration)
        .map(|(name, expr)| Stmt::Var { name, expr });

    let assign = ident
        .clone()
        .map_with(move |name, extra| (name, lines.pos(extra.span())))
        .then_ignore(just(Token::Punct('=')))
        .then(expression.clone())
        .map(|((name, pos), expr)| Stmt::Assign { name, expr, pos });

    let import = just(Token::Import)
        .ignore_then(
            ident
                .clone()
                .separated_by(just(Token::Punct('.')))
                .at_least(1)
                .collect::<Vec<_>>()
                .labelled("an import path"),
        )
        .map(|parts| Stmt::Import(parts.join(".")));

    let annotation_name = ident.clone().labelled("an annotation name");

    // `@file:Name`
    let file_annotation = just(Token::Punct('@'))
        .then(just(Token::Ident("file")))
        .then(just(Token::Punct(':')))
        .ignore_then(annotation_name.clone())
        .map(Stmt::FileAnnotation);

    // `@A @B class Name`
    let class = just(Token::Punct('@'))
        .ignore_then(annotation_name)
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(just(Token::Class))
        .then(ident.labelled("a class name"))
        .map(|(annotations, name)| Stmt::Class { name, annotations });

    choice((
        file_annotation,
        class,
        import,
        val,
        var,
        assign,
        expression.map(Stmt::Expr),
    ))
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, pos: Pos) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        pos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(code: &str) -> Stmt {
        let mut statements = parse(code).unwrap();
        assert_eq!(statements.len(), 1);
        statements.remove(0)
    }

    #[test]
    fn test_precedence() {
        let Stmt::Expr(Expr::Binary { op, rhs, .. }) = single("1 + 2 * 3") else {
            panic!("expected a binary expression");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_declarations() {
        assert!(matches!(single("val x = 1"), Stmt::Val { lazy: false, .. }));
        assert!(matches!(single("lazy val x = 1"), Stmt::Val { lazy: true, .. }));
        assert!(matches!(single("var x = 1"), Stmt::Var { .. }));
        assert!(matches!(single("x = 2"), Stmt::Assign { .. }));
        assert_eq!(single("import a.b_c"), Stmt::Import("a.b_c".to_string()));
    }

    #[test]
    fn test_annotations() {
        assert_eq!(
            single("@Table @Serializable class Row"),
            Stmt::Class {
                name: "Row".to_string(),
                annotations: vec!["Table".to_string(), "Serializable".to_string()],
            }
        );
        assert_eq!(
            single("@file:Experimental"),
            Stmt::FileAnnotation("Experimental".to_string())
        );
    }

    #[test]
    fn test_comments_and_strings() {
        assert_eq!(
            single(r#""a // b" // trailing"#),
            Stmt::Expr(Expr::Str("a // b".to_string()))
        );
        assert!(parse("// only a comment\n   \n").unwrap().is_empty());
    }

    #[test]
    fn test_errors_carry_positions() {
        let diagnostics = parse("val x = 1\nval = 2\n1 +").unwrap_err();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!((diagnostics[0].line, diagnostics[0].column), (2, 5));
        assert_eq!(diagnostics[1].line, 3);
        assert!(diagnostics[1].message.contains("end of line"));
        assert!(diagnostics[1].message.contains("an expression"));
    }

    #[test]
    fn test_unexpected_character() {
        let diagnostics = parse("1 # 2").unwrap_err();
        assert_eq!(diagnostics[0].column, 3);
    }
}
