//! Hand-written lexer over source text.
//!
//! Whitespace and `\t` are skipped silently. `//` introduces a line comment running to
//! the next newline or EOF. Every other lexical class below becomes a token.

use std::ops::Range;

/// Which register file a [`Token::Register`] names.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegFile {
    X,
    S,
    D,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Token<'a> {
    Eof,
    Newline,
    Identifier(&'a str),
    /// An identifier extended past a `.` into a letter, e.g. `B.EQ`.
    DotIdentifier(&'a str),
    Integer(i64),
    Register(RegFile, u8),
    Colon,
    Comma,
    LBracket,
    RBracket,
    /// A byte the lexer does not recognize in any grammar production.
    Invalid(char),
}

/// Fixed-index register keywords: recognized as `X` tokens regardless of the
/// `Xn`/1-2-digit-suffix rule below.
const KEYWORDS: &[(&str, u8)] = &[
    ("IP0", 16),
    ("IP1", 17),
    ("SP", 28),
    ("FP", 29),
    ("LR", 30),
    ("XZR", 31),
];

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, bytes: src.as_bytes(), pos: 0 }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump_byte(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        Some(b)
    }

    /// Scans and returns the next token with its `[start, end)` byte span.
    pub fn next_token(&mut self) -> (Token<'a>, Range<usize>) {
        loop {
            match self.peek_byte() {
                None => return (Token::Eof, self.pos..self.pos),
                Some(b' ') | Some(b'\t') => {
                    self.pos += 1;
                    continue;
                }
                Some(b'\n') | Some(b'\r') => {
                    let start = self.pos;
                    self.pos += 1;
                    return (Token::Newline, start..self.pos);
                }
                Some(b'/') if self.peek_byte_at(1) == Some(b'/') => {
                    while !matches!(self.peek_byte(), None | Some(b'\n') | Some(b'\r')) {
                        self.pos += 1;
                    }
                    continue;
                }
                Some(b':') => {
                    let start = self.pos;
                    self.pos += 1;
                    return (Token::Colon, start..self.pos);
                }
                Some(b',') => {
                    let start = self.pos;
                    self.pos += 1;
                    return (Token::Comma, start..self.pos);
                }
                Some(b'[') => {
                    let start = self.pos;
                    self.pos += 1;
                    return (Token::LBracket, start..self.pos);
                }
                Some(b']') => {
                    let start = self.pos;
                    self.pos += 1;
                    return (Token::RBracket, start..self.pos);
                }
                Some(b'#') | Some(b'-') | Some(b'0'..=b'9') => return self.lex_integer(),
                Some(b) if b.is_ascii_alphabetic() || b == b'_' => return self.lex_word(),
                Some(b) => {
                    let start = self.pos;
                    self.pos += 1;
                    return (Token::Invalid(b as char), start..self.pos);
                }
            }
        }
    }

    fn lex_integer(&mut self) -> (Token<'a>, Range<usize>) {
        let start = self.pos;
        if self.peek_byte() == Some(b'#') {
            self.pos += 1;
        }
        let negative = if self.peek_byte() == Some(b'-') {
            self.pos += 1;
            true
        } else {
            false
        };

        let digits_start = self.pos;
        let (radix, prefix_len) = match (self.peek_byte(), self.peek_byte_at(1)) {
            (Some(b'0'), Some(b'b')) | (Some(b'0'), Some(b'B')) => (2, 2),
            (Some(b'0'), Some(b'x')) | (Some(b'0'), Some(b'X')) => (16, 2),
            _ => (10, 0),
        };
        self.pos += prefix_len;
        let number_start = self.pos;
        while self.peek_byte().is_some_and(|b| (b as char).is_digit(radix)) {
            self.pos += 1;
        }
        if self.pos == number_start {
            // No digits at all: not a well-formed integer literal.
            self.pos = digits_start.max(start + 1);
            return (Token::Invalid(self.src[start..].chars().next().unwrap_or('\0')), start..self.pos);
        }

        let digits = &self.src[number_start..self.pos];
        let magnitude = i64::from_str_radix(digits, radix).unwrap_or(i64::MAX);
        let value = if negative { -magnitude } else { magnitude };
        (Token::Integer(value), start..self.pos)
    }

    /// Consumes `[A-Za-z_][A-Za-z0-9_]*`, with any `.` followed by a letter extending
    /// the word further (so `B.EQ` lexes as one token; a trailing `.` is left alone).
    fn lex_word(&mut self) -> (Token<'a>, Range<usize>) {
        let start = self.pos;
        self.pos += 1; // the leading letter/underscore already matched by the caller
        let mut dotted = false;
        loop {
            while self
                .peek_byte()
                .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
            {
                self.pos += 1;
            }
            if self.peek_byte() == Some(b'.')
                && self.peek_byte_at(1).is_some_and(|b| b.is_ascii_alphabetic())
            {
                dotted = true;
                self.pos += 1;
                continue;
            }
            break;
        }

        let text = &self.src[start..self.pos];
        let token = if dotted {
            Token::DotIdentifier(text)
        } else if let Some(reg) = register_token(text) {
            reg
        } else {
            Token::Identifier(text)
        };
        (token, start..self.pos)
    }
}

/// Classifies a non-dotted word as a register token, per the `Xn`/`Sn`/`Dn` and fixed
/// keyword rules. Returns `None` for anything that's a plain identifier.
fn register_token(text: &str) -> Option<Token<'static>> {
    let mut chars = text.chars();
    let file = match chars.next()? {
        'X' => RegFile::X,
        'S' => RegFile::S,
        'D' => RegFile::D,
        _ => return numbered_keyword(text),
    };
    let digits: &str = chars.as_str();
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return numbered_keyword(text);
    }
    let index: u32 = digits.parse().ok()?;
    if index > 31 {
        return numbered_keyword(text);
    }
    Some(Token::Register(file, index as u8))
}

fn numbered_keyword(text: &str) -> Option<Token<'static>> {
    KEYWORDS
        .iter()
        .find(|(name, _)| *name == text)
        .map(|&(_, idx)| Token::Register(RegFile::X, idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token<'_>> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let (tok, _) = lexer.next_token();
            let done = tok == Token::Eof;
            out.push(tok);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn skips_whitespace_and_comments() {
        let toks = tokens("  // a comment\n  ADD");
        assert_eq!(toks, vec![Token::Newline, Token::Identifier("ADD"), Token::Eof]);
    }

    #[test]
    fn lexes_registers_and_keywords() {
        assert_eq!(tokens("X0")[0], Token::Register(RegFile::X, 0));
        assert_eq!(tokens("X31")[0], Token::Register(RegFile::X, 31));
        assert_eq!(tokens("S7")[0], Token::Register(RegFile::S, 7));
        assert_eq!(tokens("D31")[0], Token::Register(RegFile::D, 31));
        assert_eq!(tokens("XZR")[0], Token::Register(RegFile::X, 31));
        assert_eq!(tokens("SP")[0], Token::Register(RegFile::X, 28));
        assert_eq!(tokens("IP0")[0], Token::Register(RegFile::X, 16));
    }

    #[test]
    fn register_like_prefix_with_trailing_letters_is_an_identifier() {
        assert_eq!(tokens("X1FOO")[0], Token::Identifier("X1FOO"));
    }

    #[test]
    fn out_of_range_register_index_is_an_identifier() {
        assert_eq!(tokens("X32")[0], Token::Identifier("X32"));
    }

    #[test]
    fn integers_with_hash_sign_and_radix_prefixes() {
        assert_eq!(tokens("#5")[0], Token::Integer(5));
        assert_eq!(tokens("#-5")[0], Token::Integer(-5));
        assert_eq!(tokens("-5")[0], Token::Integer(-5));
        assert_eq!(tokens("0x1F")[0], Token::Integer(31));
        assert_eq!(tokens("0b101")[0], Token::Integer(5));
        assert_eq!(tokens("#0x1F")[0], Token::Integer(31));
    }

    #[test]
    fn dotted_identifier_for_conditional_branch() {
        assert_eq!(tokens("B.EQ")[0], Token::DotIdentifier("B.EQ"));
    }

    #[test]
    fn trailing_dot_is_left_for_the_next_token() {
        let mut lexer = Lexer::new("FOO.");
        let (tok, _) = lexer.next_token();
        assert_eq!(tok, Token::Identifier("FOO"));
        let (tok, _) = lexer.next_token();
        assert_eq!(tok, Token::Invalid('.'));
    }

    #[test]
    fn punctuation_and_newline_variants() {
        let toks = tokens("[,]:\r\n");
        assert_eq!(
            toks,
            vec![
                Token::LBracket,
                Token::Comma,
                Token::RBracket,
                Token::Colon,
                Token::Newline,
                Token::Newline,
                Token::Eof,
            ]
        );
    }
}
