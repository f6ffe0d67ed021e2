//! Tokenization of one source line.
//!
//! Every construct in the language fits on a single line, so the tokenizer only ever sees
//! one line at a time and produces a finite token sequence for it. Line selection and
//! grammar dispatch live in [`crate::parser`].

use lazy_static::lazy_static;
use regex::Regex;

/// A list of token patterns, arranged from least to most general.
const TOKEN_PATTERNS: &[&str] = &[
    // number with a fractional part, optionally carrying a float suffix
    r"[0-9]+\.[0-9]+[fF]?",
    // number without a fractional part, optionally carrying a long or float suffix
    r"[0-9]+[lLfF]?",
    // identifier
    r"[A-Za-z][A-Za-z0-9]*",
    // the single-character symbols used by the line grammars
    r"[()=+\-*/:,]",
    // any other non-whitespace character -- this should raise an error
    r"\S",
];

lazy_static! {
    /// A single regex that matches any token, by joining each member of TOKEN_PATTERNS with '|'.
    static ref TOKEN_PATTERN: Regex = Regex::new(&TOKEN_PATTERNS.join("|")).unwrap();
}

/// Error type produced when a line contains a character no token rule accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    UnknownSymbol { symbol: char, column: usize },
}

/// Classification of one [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// An identifier or keyword.
    Ident,
    /// An integer or floating-point literal, including any type suffix.
    Number,
    /// One of the grammar's single-character symbols.
    Symbol,
}

/// One lexical token of a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// The matched substring of the source line.
    pub text: &'a str,
    /// 0-based byte offset of the token within its line.
    pub column: usize,
    pub kind: TokenKind,
}

/// Splits one source line into tokens.
pub fn tokenize(line: &str) -> Result<Vec<Token<'_>>, LexError> {
    let mut tokens = vec![];
    for m in TOKEN_PATTERN.find_iter(line) {
        let text = m.as_str();
        let column = m.start();
        let first = text.chars().next().unwrap();
        let kind = match first {
            '0'..='9' => TokenKind::Number,
            'a'..='z' | 'A'..='Z' => TokenKind::Ident,
            '(' | ')' | '=' | '+' | '-' | '*' | '/' | ':' | ',' => TokenKind::Symbol,
            symbol => return Err(LexError::UnknownSymbol { symbol, column }),
        };
        tokens.push(Token { text, column, kind });
    }
    Ok(tokens)
}

/// A restartable cursor over the tokens of one source line.
///
/// Exhaustion is signaled by [`None`] rather than an error, since reaching the end of a line
/// is the normal outcome of parsing it.
pub struct Tokenizer<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}
impl<'a> Tokenizer<'a> {
    pub fn new(line: &'a str) -> Result<Self, LexError> {
        Ok(Self { tokens: tokenize(line)?, pos: 0 })
    }
    /// Consumes and returns the next token, or [`None`] if the line is exhausted.
    pub fn next_token(&mut self) -> Option<Token<'a>> {
        let res = self.tokens.get(self.pos).copied();
        if res.is_some() { self.pos += 1; }
        res
    }
    /// Returns the next token without consuming it.
    pub fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }
    /// Rewinds the cursor to the start of the line.
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

#[test]
fn test_tokenize() {
    let tests = [
        ("x = 10", vec![("x", TokenKind::Ident), ("=", TokenKind::Symbol), ("10", TokenKind::Number)]),
        ("x=10", vec![("x", TokenKind::Ident), ("=", TokenKind::Symbol), ("10", TokenKind::Number)]),
        ("counter = 2.5f", vec![("counter", TokenKind::Ident), ("=", TokenKind::Symbol), ("2.5f", TokenKind::Number)]),
        ("x = 10L", vec![("x", TokenKind::Ident), ("=", TokenKind::Symbol), ("10L", TokenKind::Number)]),
        ("void main(int a):", vec![
            ("void", TokenKind::Ident), ("main", TokenKind::Ident), ("(", TokenKind::Symbol),
            ("int", TokenKind::Ident), ("a", TokenKind::Ident), (")", TokenKind::Symbol), (":", TokenKind::Symbol),
        ]),
        ("x - 3", vec![("x", TokenKind::Ident), ("-", TokenKind::Symbol), ("3", TokenKind::Number)]),
        ("doIt()", vec![("doIt", TokenKind::Ident), ("(", TokenKind::Symbol), (")", TokenKind::Symbol)]),
        ("", vec![]),
    ];
    for (line, expect) in tests {
        let tokens = tokenize(line).unwrap();
        let got: Vec<_> = tokens.iter().map(|t| (t.text, t.kind)).collect();
        assert_eq!(got, expect, "line: {line:?}");
    }

    assert_eq!(tokenize("x = #").unwrap_err(), LexError::UnknownSymbol { symbol: '#', column: 4 });
    assert_eq!(tokenize("a % b").unwrap_err(), LexError::UnknownSymbol { symbol: '%', column: 2 });
}

#[test]
fn test_tokenizer_cursor() {
    let mut t = Tokenizer::new("x = 10").unwrap();
    assert_eq!(t.peek().unwrap().text, "x");
    assert_eq!(t.next_token().unwrap().text, "x");
    assert_eq!(t.next_token().unwrap().text, "=");
    assert_eq!(t.peek().unwrap().text, "10");
    assert_eq!(t.next_token().unwrap().text, "10");
    assert_eq!(t.next_token(), None);
    assert_eq!(t.next_token(), None);
    t.restart();
    assert_eq!(t.next_token().unwrap().text, "x");
}
