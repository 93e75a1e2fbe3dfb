//! # AEL Lexer
//!
//! Single-pass, one-byte-of-lookahead tokenizer for AEL source (spec §4.3).
//!
//! ## Features
//!
//! - Tab expansion to 4-column boundaries (`cursor::Cursor::advance`)
//! - `//` and `/* … */` comments, skipped entirely (never tokenized)
//! - String literals with escapes preserved verbatim, capped at 510 bytes
//! - Integer literals that overflow `i32` are reclassified as real
//! - A numeric literal immediately followed by `i` becomes imaginary
//! - One-token lookahead (`peek_token`/`next_token`) with a position cache

pub mod cursor;
pub mod token;


use crate::error::Pos;
use cursor::Cursor;
use token::{Token, TokenKind};

/// Reference string-literal length cap (spec §4.3).
pub const STRING_LITERAL_CAP: usize = 510;

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub pos: Pos,
}

pub struct LexResult {
    pub tokens: Vec<Token>,
    pub errors: Vec<LexError>,
}

fn pos0(cursor: &Cursor) -> Pos {
    let (line, col) = cursor.current_pos();
    Pos::new(line as i32 - 1, col as i32 - 1)
}

/// Tokenize an entire source string in one pass. Deterministic and
/// idempotent: the same bytes always produce the same token stream
/// (spec §8 property 2).
#[must_use]
pub fn tokenize(source: &str) -> LexResult {
    let mut cursor = Cursor::new(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    loop {
        match lex_token(&mut cursor) {
            Ok(Some(tok)) => {
                let is_eof = matches!(tok.kind, TokenKind::Eof);
                tokens.push(tok);
                if is_eof {
                    break;
                }
            }
            Ok(None) => continue,
            Err(err) => errors.push(err),
        }
    }

    LexResult { tokens, errors }
}

/// Skip whitespace and comments, then produce the next token (or `None`
/// if only whitespace/comments remained and the caller should loop).
fn lex_token(cursor: &mut Cursor) -> Result<Option<Token>, LexError> {
    if skip_trivia(cursor)? {
        return Ok(None);
    }

    if cursor.is_at_end() {
        return Ok(Some(Token {
            kind: TokenKind::Eof,
            lexeme: String::new(),
            pos: pos0(cursor),
        }));
    }

    let start = pos0(cursor);
    let c = cursor.peek().unwrap();

    if c == b'"' {
        return lex_string(cursor, start).map(Some);
    }
    if c.is_ascii_digit() {
        return lex_number(cursor, start).map(Some);
    }
    if c.is_ascii_alphabetic() || c == b'_' {
        return Ok(Some(lex_word(cursor, start)));
    }

    lex_operator(cursor, start).map(Some)
}

/// Returns `Ok(true)` if whitespace/comments were consumed and the caller
/// should loop to re-check for end-of-input or another trivia run.
fn skip_trivia(cursor: &mut Cursor) -> Result<bool, LexError> {
    let mut any = false;
    loop {
        match cursor.peek() {
            Some(b' ' | b'\t' | b'\n' | b'\r') => {
                cursor.advance();
                any = true;
            }
            Some(b'/') if cursor.peek_at(1) == Some(b'/') => {
                while !matches!(cursor.peek(), None | Some(b'\n')) {
                    cursor.advance();
                }
                any = true;
            }
            Some(b'/') if cursor.peek_at(1) == Some(b'*') => {
                let start = pos0(cursor);
                cursor.advance();
                cursor.advance();
                loop {
                    match cursor.peek() {
                        None => {
                            return Err(LexError {
                                message: "unterminated block comment".into(),
                                pos: start,
                            })
                        }
                        Some(b'*') if cursor.peek_at(1) == Some(b'/') => {
                            cursor.advance();
                            cursor.advance();
                            break;
                        }
                        Some(_) => {
                            cursor.advance();
                        }
                    }
                }
                any = true;
            }
            _ => break,
        }
    }
    Ok(any)
}

fn lex_string(cursor: &mut Cursor, start: Pos) -> Result<Token, LexError> {
    cursor.advance(); // opening quote
    let mut bytes = Vec::new();
    let mut lexeme = String::from("\"");

    loop {
        match cursor.peek() {
            None => {
                return Err(LexError {
                    message: "unterminated string literal".into(),
                    pos: start,
                })
            }
            Some(b'"') => {
                cursor.advance();
                lexeme.push('"');
                break;
            }
            Some(b'\\') => {
                cursor.advance();
                lexeme.push('\\');
                match cursor.peek() {
                    None => {
                        return Err(LexError {
                            message: "unterminated string literal".into(),
                            pos: start,
                        })
                    }
                    // A backslash immediately before a newline is a line
                    // continuation: it contributes no bytes (spec §4.3).
                    Some(b'\n') => {
                        cursor.advance();
                    }
                    Some(other) => {
                        cursor.advance();
                        lexeme.push(other as char);
                        if bytes.len() < STRING_LITERAL_CAP {
                            bytes.push(b'\\');
                            bytes.push(other);
                        }
                        continue;
                    }
                }
            }
            Some(b) => {
                cursor.advance();
                lexeme.push(b as char);
                if bytes.len() < STRING_LITERAL_CAP {
                    bytes.push(b);
                }
            }
        }
    }

    Ok(Token {
        kind: TokenKind::Str(bytes),
        lexeme,
        pos: start,
    })
}

fn lex_number(cursor: &mut Cursor, start: Pos) -> Result<Token, LexError> {
    let mut raw = String::new();
    while matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
        raw.push(cursor.advance().unwrap() as char);
    }

    let mut is_real = false;
    if cursor.peek() == Some(b'.') && matches!(cursor.peek_at(1), Some(c) if c.is_ascii_digit()) {
        is_real = true;
        raw.push(cursor.advance().unwrap() as char);
        while matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
            raw.push(cursor.advance().unwrap() as char);
        }
    }
    if matches!(cursor.peek(), Some(b'e' | b'E')) {
        let mut sign_len = 1; // 'e'/'E' itself
        if matches!(cursor.peek_at(1), Some(b'+' | b'-')) {
            sign_len += 1;
        }
        if matches!(cursor.peek_at(sign_len), Some(c) if c.is_ascii_digit()) {
            for _ in 0..sign_len {
                raw.push(cursor.advance().unwrap() as char);
            }
            while matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
                raw.push(cursor.advance().unwrap() as char);
            }
            is_real = true;
        }
    }

    let mut imag = false;
    if cursor.peek() == Some(b'i') {
        let next_is_ident = matches!(cursor.peek_at(1), Some(c) if c.is_ascii_alphanumeric() || c == b'_');
        if !next_is_ident {
            imag = true;
            cursor.advance();
        }
    }

    if imag {
        let coeff: f64 = raw.parse().unwrap_or(0.0);
        return Ok(Token {
            kind: TokenKind::Imag(coeff),
            lexeme: raw,
            pos: start,
        });
    }

    if is_real {
        let v: f64 = raw.parse().unwrap_or(0.0);
        return Ok(Token {
            kind: TokenKind::Real(v),
            lexeme: raw,
            pos: start,
        });
    }

    match raw.parse::<i32>() {
        Ok(v) => Ok(Token {
            kind: TokenKind::Int(v as i64),
            lexeme: raw,
            pos: start,
        }),
        // Overflows a 32-bit signed integer: reclassify as real (spec §4.3).
        Err(_) => {
            let v: f64 = raw.parse().unwrap_or(f64::INFINITY);
            Ok(Token {
                kind: TokenKind::Real(v),
                lexeme: raw,
                pos: start,
            })
        }
    }
}

fn lex_word(cursor: &mut Cursor, start: Pos) -> Token {
    let mut word = String::new();
    while matches!(cursor.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
        word.push(cursor.advance().unwrap() as char);
    }
    let kind = TokenKind::keyword(&word).unwrap_or_else(|| TokenKind::Ident(word.clone()));
    Token {
        kind,
        lexeme: word,
        pos: start,
    }
}

fn lex_operator(cursor: &mut Cursor, start: Pos) -> Result<Token, LexError> {
    macro_rules! two {
        ($a:expr, $b:expr, $kind:expr) => {
            if cursor.peek() == Some($a) && cursor.peek_at(1) == Some($b) {
                cursor.advance();
                cursor.advance();
                return Ok(Token {
                    kind: $kind,
                    lexeme: format!("{}{}", $a as char, $b as char),
                    pos: start,
                });
            }
        };
    }

    two!(b'=', b'=', TokenKind::EqEq);
    two!(b'!', b'=', TokenKind::NotEq);
    two!(b'<', b'=', TokenKind::LtEq);
    two!(b'>', b'=', TokenKind::GtEq);
    two!(b'&', b'&', TokenKind::AndAnd);
    two!(b'|', b'|', TokenKind::OrOr);
    two!(b'<', b'<', TokenKind::Shl);
    two!(b'>', b'>', TokenKind::Shr);
    two!(b'*', b'*', TokenKind::StarStar);
    two!(b'+', b'+', TokenKind::PlusPlus);
    two!(b'-', b'-', TokenKind::MinusMinus);
    two!(b'+', b'=', TokenKind::PlusAssign);
    two!(b'-', b'=', TokenKind::MinusAssign);
    two!(b'*', b'=', TokenKind::StarAssign);
    two!(b'/', b'=', TokenKind::SlashAssign);
    two!(b'%', b'=', TokenKind::PercentAssign);

    let c = cursor.advance().unwrap();
    let kind = match c {
        b'(' => TokenKind::LParen,
        b')' => TokenKind::RParen,
        b'{' => TokenKind::LBrace,
        b'}' => TokenKind::RBrace,
        b'[' => TokenKind::LBracket,
        b']' => TokenKind::RBracket,
        b',' => TokenKind::Comma,
        b';' => TokenKind::Semicolon,
        b'?' => TokenKind::Question,
        b':' => TokenKind::Colon,
        b'.' => TokenKind::Dot,
        b'=' => TokenKind::Assign,
        b'<' => TokenKind::Lt,
        b'>' => TokenKind::Gt,
        b'!' => TokenKind::Not,
        b'&' => TokenKind::Amp,
        b'|' => TokenKind::Pipe,
        b'^' => TokenKind::Caret,
        b'+' => TokenKind::Plus,
        b'-' => TokenKind::Minus,
        b'*' => TokenKind::Star,
        b'/' => TokenKind::Slash,
        b'%' => TokenKind::Percent,
        other => {
            return Err(LexError {
                message: format!("unexpected character: '{}'", other as char),
                pos: start,
            })
        }
    };
    Ok(Token {
        kind,
        lexeme: (c as char).to_string(),
        pos: start,
    })
}

/// One-token lookahead reader over [`tokenize`]'s output.
///
/// The lexer itself only exposes a single current position; the parser
/// keeps its own `LexerPositionCache` (below) of the last-consumed
/// token's position and the lookahead token's position so that quirk
/// rules can still refer to stable positions after a `peek_token`.
pub struct Lexer {
    tokens: Vec<Token>,
    idx: usize,
}

impl Lexer {
    pub fn new(source: &str) -> (Self, Vec<LexError>) {
        let result = tokenize(source);
        (
            Self {
                tokens: result.tokens,
                idx: 0,
            },
            result.errors,
        )
    }

    pub fn peek_token(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    /// Lookahead `n` tokens past the current one. Used only by the few
    /// quirk rules that must recognize a fixed multi-token pattern before
    /// committing to a parse path (spec §4.4.7 empty-list quirk).
    pub fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.idx + n).min(self.tokens.len() - 1)]
    }

    pub fn next_token(&mut self) -> Token {
        let tok = self.tokens[self.idx.min(self.tokens.len() - 1)].clone();
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
        tok
    }
}

/// Parser-owned cache of stable positions around a `peek_token`/
/// `next_token` pair (spec §4.3, §9 — replaces the reference's global
/// `g_last_token_line` mutable statics with an owned, threaded record).
#[derive(Debug, Clone, Copy, Default)]
pub struct LexerPositionCache {
    pub last_consumed: Pos,
    pub lookahead: Pos,
}

impl LexerPositionCache {
    pub fn update(&mut self, lexer: &Lexer) {
        self.lookahead = lexer.peek_token().pos;
    }

    pub fn record_consumed(&mut self, pos: Pos) {
        self.last_consumed = pos;
    }
}
