//! Tokenizer for the expression language.

use crate::error::{ExpressionError, ExpressionResult};

/// A lexical token with its source offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Byte offset of the token start in the source.
    pub offset: usize,
    /// The token payload.
    pub kind: TokenKind,
}

/// The kinds of token the lexer produces.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// An identifier or keyword-adjacent name.
    Ident(String),
    /// An integer literal.
    Int(i64),
    /// A floating-point literal.
    Float(f64),
    /// A string literal (single or double quoted).
    Str(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Bang,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `.`
    Dot,
}

/// Tokenize an expression source string.
pub fn tokenize(source: &str) -> ExpressionResult<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let offset = i;

        match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
            }
            '(' => {
                tokens.push(Token { offset, kind: TokenKind::LParen });
                i += 1;
            }
            ')' => {
                tokens.push(Token { offset, kind: TokenKind::RParen });
                i += 1;
            }
            '[' => {
                tokens.push(Token { offset, kind: TokenKind::LBracket });
                i += 1;
            }
            ']' => {
                tokens.push(Token { offset, kind: TokenKind::RBracket });
                i += 1;
            }
            '.' => {
                tokens.push(Token { offset, kind: TokenKind::Dot });
                i += 1;
            }
            '+' => {
                tokens.push(Token { offset, kind: TokenKind::Plus });
                i += 1;
            }
            '-' => {
                tokens.push(Token { offset, kind: TokenKind::Minus });
                i += 1;
            }
            '*' => {
                tokens.push(Token { offset, kind: TokenKind::Star });
                i += 1;
            }
            '/' => {
                tokens.push(Token { offset, kind: TokenKind::Slash });
                i += 1;
            }
            '%' => {
                tokens.push(Token { offset, kind: TokenKind::Percent });
                i += 1;
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { offset, kind: TokenKind::EqEq });
                    i += 2;
                } else {
                    return Err(ExpressionError::syntax(offset, "expected '==' (assignment is not an expression)"));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { offset, kind: TokenKind::NotEq });
                    i += 2;
                } else {
                    tokens.push(Token { offset, kind: TokenKind::Bang });
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { offset, kind: TokenKind::Le });
                    i += 2;
                } else {
                    tokens.push(Token { offset, kind: TokenKind::Lt });
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { offset, kind: TokenKind::Ge });
                    i += 2;
                } else {
                    tokens.push(Token { offset, kind: TokenKind::Gt });
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token { offset, kind: TokenKind::AndAnd });
                    i += 2;
                } else {
                    return Err(ExpressionError::syntax(offset, "expected '&&'"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token { offset, kind: TokenKind::OrOr });
                    i += 2;
                } else {
                    return Err(ExpressionError::syntax(offset, "expected '||'"));
                }
            }
            '"' | '\'' => {
                let (s, next) = lex_string(source, i)?;
                tokens.push(Token { offset, kind: TokenKind::Str(s) });
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (kind, next) = lex_number(source, i)?;
                tokens.push(Token { offset, kind });
                i = next;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let (kind, next) = lex_ident(source, i);
                tokens.push(Token { offset, kind });
                i = next;
            }
            other => {
                return Err(ExpressionError::syntax(
                    offset,
                    format!("unexpected character {other:?}"),
                ));
            }
        }
    }

    Ok(tokens)
}

fn lex_string(source: &str, start: usize) -> ExpressionResult<(String, usize)> {
    let bytes = source.as_bytes();
    let quote = bytes[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < bytes.len() {
        let c = bytes[i];
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == b'\\' {
            let escaped = bytes
                .get(i + 1)
                .ok_or_else(|| ExpressionError::syntax(i, "unterminated escape"))?;
            match escaped {
                b'n' => out.push('\n'),
                b't' => out.push('\t'),
                b'\\' => out.push('\\'),
                b'"' => out.push('"'),
                b'\'' => out.push('\''),
                other => {
                    return Err(ExpressionError::syntax(
                        i,
                        format!("unknown escape '\\{}'", *other as char),
                    ));
                }
            }
            i += 2;
        } else {
            // Consume a full UTF-8 scalar, not just one byte.
            let ch = source[i..]
                .chars()
                .next()
                .ok_or_else(|| ExpressionError::syntax(i, "invalid utf-8"))?;
            out.push(ch);
            i += ch.len_utf8();
        }
    }

    Err(ExpressionError::syntax(start, "unterminated string literal"))
}

fn lex_number(source: &str, start: usize) -> ExpressionResult<(TokenKind, usize)> {
    let bytes = source.as_bytes();
    let mut i = start;
    let mut saw_dot = false;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.' && !saw_dot && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            saw_dot = true;
            i += 1;
        } else {
            break;
        }
    }

    let text = &source[start..i];
    let kind = if saw_dot {
        TokenKind::Float(
            text.parse()
                .map_err(|_| ExpressionError::syntax(start, "invalid float literal"))?,
        )
    } else {
        TokenKind::Int(
            text.parse()
                .map_err(|_| ExpressionError::syntax(start, "integer literal out of range"))?,
        )
    };
    Ok((kind, i))
}

fn lex_ident(source: &str, start: usize) -> (TokenKind, usize) {
    let bytes = source.as_bytes();
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_alphanumeric() || c == '_' {
            i += 1;
        } else {
            break;
        }
    }

    let kind = match &source[start..i] {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        ident => TokenKind::Ident(ident.to_string()),
    };
    (kind, i)
}
