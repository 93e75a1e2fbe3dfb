//! # Token Types
//!
//! Defines all token types for AEL (spec §4.3).
//!
//! Each token contains:
//! - `kind`: the token type (keyword, operator, literal, identifier, …)
//! - `lexeme`: the original text from source code
//! - `pos`: 0-based `(line, col)` of the token's first byte, captured
//!   *before* the first character is consumed

use crate::error::Pos;

/// A single lexical token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub pos: Pos,
}

/// Token kinds for AEL (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // === Keywords ===
    Decl,
    Defun,
    If,
    Else,
    While,
    For,
    Do,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    True,
    False,
    Null,

    // === Literals ===
    Int(i64),
    Real(f64),
    Imag(f64),
    Str(Vec<u8>),
    Ident(String),

    // === Punctuation ===
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Question,
    Colon,
    Dot,

    // === Operators ===
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
    Not,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    PlusPlus,
    MinusMinus,

    Eof,
}

impl TokenKind {
    /// Case-sensitive keyword table (spec §4.3). `null`/`NULL` both map to
    /// `Null`; `TRUE`/`FALSE` are the only-cased boolean keywords.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        Some(match word {
            "decl" => TokenKind::Decl,
            "defun" => TokenKind::Defun,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "do" => TokenKind::Do,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "TRUE" => TokenKind::True,
            "FALSE" => TokenKind::False,
            "null" | "NULL" => TokenKind::Null,
            _ => return None,
        })
    }
}
