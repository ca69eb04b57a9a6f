//! SQL tokenizer.
//!
//! Produces tokens with byte spans into the original text so later stages can
//! splice predicates into the statement without re-rendering it. Comments are
//! dropped; string literals and quoted identifiers are single tokens, so
//! keywords inside them are never seen as structure.

use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    QuotedIdent,
    Number,
    Str,
    Operator,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Param,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }
}

const TWO_CHAR_OPERATORS: &[&str] = &["==", "!=", "<>", "<=", ">=", "||", "<<", ">>", "->"];

pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if b == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let start = i;
            i += 2;
            loop {
                if i + 1 >= bytes.len() {
                    return Err(ParseError::Unterminated {
                        what: "block comment",
                        offset: start,
                    });
                }
                if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }

        let start = i;
        let kind = match b {
            b'\'' => {
                i = scan_quoted(bytes, i, b'\'', "string literal")?;
                TokenKind::Str
            }
            b'x' | b'X' if bytes.get(i + 1) == Some(&b'\'') => {
                i = scan_quoted(bytes, i + 1, b'\'', "blob literal")?;
                TokenKind::Str
            }
            b'"' => {
                i = scan_quoted(bytes, i, b'"', "quoted identifier")?;
                TokenKind::QuotedIdent
            }
            b'`' => {
                i = scan_quoted(bytes, i, b'`', "quoted identifier")?;
                TokenKind::QuotedIdent
            }
            b'[' => {
                match bytes[i + 1..].iter().position(|&c| c == b']') {
                    Some(offset) => i += offset + 2,
                    None => {
                        return Err(ParseError::Unterminated {
                            what: "quoted identifier",
                            offset: start,
                        })
                    }
                }
                TokenKind::QuotedIdent
            }
            b'(' => {
                i += 1;
                TokenKind::LParen
            }
            b')' => {
                i += 1;
                TokenKind::RParen
            }
            b',' => {
                i += 1;
                TokenKind::Comma
            }
            b';' => {
                i += 1;
                TokenKind::Semicolon
            }
            b'.' if !bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                i += 1;
                TokenKind::Dot
            }
            b'0'..=b'9' | b'.' => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            b'?' | b':' | b'@' | b'$' => {
                i += 1;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Param
            }
            _ if is_word_start(b) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                let two = src.get(i..i + 2).unwrap_or("");
                if TWO_CHAR_OPERATORS.contains(&two) {
                    i += 2;
                } else {
                    i += utf8_len(b);
                }
                TokenKind::Operator
            }
        };

        tokens.push(Token { kind, start, end: i });
    }

    Ok(tokens)
}

/// Scan a quoted run starting at `open`; a doubled quote is an escape.
/// Returns the byte index after the closing quote.
fn scan_quoted(
    bytes: &[u8],
    open: usize,
    quote: u8,
    what: &'static str,
) -> Result<usize, ParseError> {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(ParseError::Unterminated { what, offset: open })
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    if bytes[i] == b'0' && matches!(bytes.get(i + 1), Some(b'x') | Some(b'X')) {
        i += 2;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            i += 1;
        }
        return i;
    }
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if matches!(bytes.get(i), Some(b'e') | Some(b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
            j += 1;
        }
        if bytes.get(j).is_some_and(u8::is_ascii_digit) {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}
