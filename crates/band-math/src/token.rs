//! Tokenizer for band-math expressions.

use std::fmt;

use crate::error::{BandMathError, BandMathResult};

/// Token kinds. The display names double as the keys used by per-layer
/// token ACL documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Numeric,
    Boolean,
    String,
    Variable,
    Function,
    Separator,
    Comparator,
    LogicalOp,
    Modifier,
    Prefix,
    Ternary,
    Clause,
    ClauseClose,
}

impl TokenKind {
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Numeric => "NUMERIC",
            TokenKind::Boolean => "BOOLEAN",
            TokenKind::String => "STRING",
            TokenKind::Variable => "VARIABLE",
            TokenKind::Function => "FUNCTION",
            TokenKind::Separator => "SEPARATOR",
            TokenKind::Comparator => "COMPARATOR",
            TokenKind::LogicalOp => "LOGICALOP",
            TokenKind::Modifier => "MODIFIER",
            TokenKind::Prefix => "PREFIX",
            TokenKind::Ternary => "TERNARY",
            TokenKind::Clause => "CLAUSE",
            TokenKind::ClauseClose => "CLAUSE_CLOSE",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lexed token with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }
}

/// True when a `-` or `!` following this token reads as a prefix operator.
fn prefix_position(prev: Option<TokenKind>) -> bool {
    match prev {
        None => true,
        Some(
            TokenKind::Modifier
            | TokenKind::Prefix
            | TokenKind::Comparator
            | TokenKind::LogicalOp
            | TokenKind::Ternary
            | TokenKind::Separator
            | TokenKind::Clause,
        ) => true,
        _ => false,
    }
}

/// Lex an expression into tokens.
pub fn tokenize(input: &str) -> BandMathResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit())
        {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            text.parse::<f64>().map_err(|_| BandMathError::Parse {
                message: format!("invalid number '{text}'"),
                position: start,
            })?;
            tokens.push(Token::new(TokenKind::Numeric, text, start));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();

            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let kind = if text == "true" || text == "false" {
                TokenKind::Boolean
            } else if j < chars.len() && chars[j] == '(' {
                TokenKind::Function
            } else {
                TokenKind::Variable
            };
            tokens.push(Token::new(kind, text, start));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let start = i;
            i += 1;
            let lit_start = i;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            if i >= chars.len() {
                return Err(BandMathError::Parse {
                    message: "unterminated string literal".to_string(),
                    position: start,
                });
            }
            let text: String = chars[lit_start..i].iter().collect();
            i += 1;
            tokens.push(Token::new(TokenKind::String, text, start));
            continue;
        }

        let prev = tokens.last().map(|t| t.kind);
        let two: Option<String> = if i + 1 < chars.len() {
            Some(chars[i..i + 2].iter().collect())
        } else {
            None
        };

        if let Some(op) = two.as_deref() {
            let kind = match op {
                "==" | "!=" | "<=" | ">=" => Some(TokenKind::Comparator),
                "&&" | "||" => Some(TokenKind::LogicalOp),
                _ => None,
            };
            if let Some(kind) = kind {
                tokens.push(Token::new(kind, op, i));
                i += 2;
                continue;
            }
        }

        let kind = match c {
            '(' => TokenKind::Clause,
            ')' => TokenKind::ClauseClose,
            ',' => TokenKind::Separator,
            '<' | '>' => TokenKind::Comparator,
            '?' | ':' => TokenKind::Ternary,
            '!' => TokenKind::Prefix,
            '-' if prefix_position(prev) => TokenKind::Prefix,
            '+' | '-' | '*' | '/' | '%' => TokenKind::Modifier,
            other => {
                return Err(BandMathError::Parse {
                    message: format!("unexpected character '{other}'"),
                    position: i,
                })
            }
        };
        tokens.push(Token::new(kind, c.to_string(), i));
        i += 1;
    }

    Ok(tokens)
}
