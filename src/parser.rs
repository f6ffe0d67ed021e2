//! Line parsers and the ordered registry that dispatches them.
//!
//! Each parser owns one line-level grammar rule: a pure [`LineParser::should_parse`]
//! predicate over the raw line text, and a [`LineParser::parse`] action that consumes tokens
//! and grows the block tree. The registry tries parsers **in registration order** and the
//! first matching predicate wins -- this is the sole disambiguation rule of the grammar, so
//! the order below is part of the language definition, not an implementation detail.

use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::*;
use crate::lexer::*;

lazy_static! {
    static ref METHOD_RULE: Regex = Regex::new(r"^void [a-zA-Z][a-zA-Z0-9]*[ ]*\(([a-zA-Z][a-zA-Z0-9]*[ ]+[a-zA-Z][a-zA-Z0-9]*)?[ ]*\)[ ]*:$").unwrap();
    static ref INT_RULE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*[ ]*=[ ]*-?[0-9]+$").unwrap();
    static ref LONG_RULE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*[ ]*=[ ]*-?[0-9]+[lL]?$").unwrap();
    static ref FLOAT_RULE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*[ ]*=[ ]*-?[0-9]+(\.[0-9]+)?[fF]?$").unwrap();
    static ref ADD_RULE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*[ ]*\+[ ]*[0-9]+$").unwrap();
    static ref SUBTRACT_RULE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*[ ]*-[ ]*[0-9]+$").unwrap();
    static ref MULTIPLY_RULE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*[ ]*\*[ ]*[0-9]+$").unwrap();
    static ref DIVIDE_RULE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*[ ]*/[ ]*[0-9]+$").unwrap();
    static ref METHOD_CALL_RULE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*[ ]*\([ ]*\)$").unwrap();
}

/// Error type produced while parsing one compilation unit.
/// All line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No registered parser matched the line.
    UnmatchedLine { line: usize },
    /// The line contained a malformed token.
    Lex { line: usize, error: LexError },
    /// The line is indented deeper than one level below its parent, or indented
    /// under a block that cannot own children.
    BadIndent { line: usize },
    /// A method declaration appeared inside another block.
    NestedMethod { line: usize },
    /// A statement appeared outside of any method.
    StatementOutsideMethod { line: usize },
    /// A parser accepted a line whose token shape did not fit its rule.
    /// This indicates a predicate/parser mismatch, not bad input.
    MalformedLine { line: usize },
}
impl ParseError {
    /// The 1-based source line the error occurred on.
    pub fn line(&self) -> usize {
        match *self {
            ParseError::UnmatchedLine { line } | ParseError::Lex { line, .. }
            | ParseError::BadIndent { line } | ParseError::NestedMethod { line }
            | ParseError::StatementOutsideMethod { line } | ParseError::MalformedLine { line } => line,
        }
    }
}

/// One line-level grammar rule.
pub trait LineParser {
    /// Pure, side-effect-free predicate over the raw line text (indentation already stripped).
    fn should_parse(&self, line: &str) -> bool;
    /// Consumes tokens from the shared stream, constructs the concrete block, and attaches
    /// it under `parent`. Only called when [`Self::should_parse`] accepted the line.
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError>;
}

fn expect(tokens: &mut Tokenizer, kind: TokenKind, line: usize) -> Result<String, ParseError> {
    match tokens.next_token() {
        Some(t) if t.kind == kind => Ok(t.text.to_owned()),
        _ => Err(ParseError::MalformedLine { line }),
    }
}
fn expect_symbol(tokens: &mut Tokenizer, symbol: &str, line: usize) -> Result<(), ParseError> {
    match tokens.next_token() {
        Some(t) if t.kind == TokenKind::Symbol && t.text == symbol => Ok(()),
        _ => Err(ParseError::MalformedLine { line }),
    }
}
fn attach(tree: &mut BlockTree, parent: BlockId, block: Block, line: usize) -> Result<BlockId, ParseError> {
    tree.add_child(parent, block).map_err(|TreeError::NotAContainer { .. }| ParseError::BadIndent { line })
}

/// Reads a signed literal off the token stream and returns its text with any type suffix removed.
fn parse_literal(tokens: &mut Tokenizer, line: usize) -> Result<String, ParseError> {
    let negative = match tokens.peek() {
        Some(t) if t.kind == TokenKind::Symbol && t.text == "-" => {
            tokens.next_token();
            true
        }
        _ => false,
    };
    let digits = expect(tokens, TokenKind::Number, line)?;
    let digits = digits.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    Ok(if negative { format!("-{digits}") } else { digits.to_owned() })
}

/// Parses method declarations, e.g. `void main():` or `void inc(int amount):`.
pub struct MethodParser;
impl LineParser for MethodParser {
    fn should_parse(&self, line: &str) -> bool {
        METHOD_RULE.is_match(line)
    }
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
        expect(tokens, TokenKind::Ident, line)?; // return type, always void
        let name = expect(tokens, TokenKind::Ident, line)?;
        expect_symbol(tokens, "(", line)?;
        let mut params = vec![];
        if matches!(tokens.peek(), Some(t) if t.kind == TokenKind::Ident) {
            let ty = Type::from_keyword(&expect(tokens, TokenKind::Ident, line)?);
            let name = expect(tokens, TokenKind::Ident, line)?;
            params.push(Param { name, ty });
        }
        expect_symbol(tokens, ")", line)?;
        expect_symbol(tokens, ":", line)?;
        attach(tree, parent, Block::method(&name, params), line)
    }
}

fn parse_declare(ty: Type, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
    let name = expect(tokens, TokenKind::Ident, line)?;
    expect_symbol(tokens, "=", line)?;
    let value = parse_literal(tokens, line)?;
    attach(tree, parent, Block::declare(&name, ty, &value), line)
}

/// Parses integer declarations, e.g. `x = 10`.
pub struct IntParser;
impl LineParser for IntParser {
    fn should_parse(&self, line: &str) -> bool {
        INT_RULE.is_match(line)
    }
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
        parse_declare(Type::Int, tree, parent, tokens, line)
    }
}

/// Parses long declarations, e.g. `x = 10L`.
/// The suffix is optional, so any line this rule accepts without one has already been
/// claimed by [`IntParser`] under the standard registration order.
pub struct LongParser;
impl LineParser for LongParser {
    fn should_parse(&self, line: &str) -> bool {
        LONG_RULE.is_match(line)
    }
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
        parse_declare(Type::Long, tree, parent, tokens, line)
    }
}

/// Parses float declarations, e.g. `x = 2.5` or `x = 2f`.
/// Like [`LongParser`], this rule also accepts plain integer literals and relies on its
/// registration position for disambiguation.
pub struct FloatParser;
impl LineParser for FloatParser {
    fn should_parse(&self, line: &str) -> bool {
        FLOAT_RULE.is_match(line)
    }
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
        parse_declare(Type::Float, tree, parent, tokens, line)
    }
}

fn parse_arith(op: ArithOp, symbol: &str, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
    let name = expect(tokens, TokenKind::Ident, line)?;
    expect_symbol(tokens, symbol, line)?;
    let value = expect(tokens, TokenKind::Number, line)?;
    attach(tree, parent, Block::arith(&name, op, &value), line)
}

/// Parses add statements, e.g. `x + 3`.
pub struct AddParser;
impl LineParser for AddParser {
    fn should_parse(&self, line: &str) -> bool {
        ADD_RULE.is_match(line)
    }
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
        parse_arith(ArithOp::Add, "+", tree, parent, tokens, line)
    }
}

/// Parses subtract statements, e.g. `x - 3`.
pub struct SubtractParser;
impl LineParser for SubtractParser {
    fn should_parse(&self, line: &str) -> bool {
        SUBTRACT_RULE.is_match(line)
    }
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
        parse_arith(ArithOp::Sub, "-", tree, parent, tokens, line)
    }
}

/// Parses multiply statements, e.g. `x * 3`.
pub struct MultiplyParser;
impl LineParser for MultiplyParser {
    fn should_parse(&self, line: &str) -> bool {
        MULTIPLY_RULE.is_match(line)
    }
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
        parse_arith(ArithOp::Mul, "*", tree, parent, tokens, line)
    }
}

/// Parses divide statements, e.g. `x / 3`.
pub struct DivideParser;
impl LineParser for DivideParser {
    fn should_parse(&self, line: &str) -> bool {
        DIVIDE_RULE.is_match(line)
    }
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
        parse_arith(ArithOp::Div, "/", tree, parent, tokens, line)
    }
}

/// Parses zero-argument method calls, e.g. `reset()`.
pub struct MethodCallParser;
impl LineParser for MethodCallParser {
    fn should_parse(&self, line: &str) -> bool {
        METHOD_CALL_RULE.is_match(line)
    }
    fn parse(&self, tree: &mut BlockTree, parent: BlockId, tokens: &mut Tokenizer, line: usize) -> Result<BlockId, ParseError> {
        let name = expect(tokens, TokenKind::Ident, line)?;
        expect_symbol(tokens, "(", line)?;
        expect_symbol(tokens, ")", line)?;
        attach(tree, parent, Block::call(&name), line)
    }
}

/// Computes a line's indentation depth (one level per tab or per group of 4 spaces) and
/// returns the line body after the indentation.
fn indent_depth(line: &str) -> (usize, &str) {
    let mut depth = 0;
    let mut spaces = 0;
    let mut body_start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '\t' => depth += 1,
            ' ' => {
                spaces += 1;
                if spaces == 4 {
                    depth += 1;
                    spaces = 0;
                }
            }
            _ => {
                body_start = i;
                break;
            }
        }
        body_start = i + c.len_utf8();
    }
    (depth, &line[body_start..])
}

/// The explicit, ordered list of grammar rules making up the language.
///
/// The registry is a plain value constructed once at pipeline start and passed through the
/// parse phase by reference -- there is no ambient rule discovery.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn LineParser>>,
}
impl Default for ParserRegistry {
    /// The standard rule set, in the language's canonical registration order.
    fn default() -> Self {
        Self::with(vec![
            Box::new(MethodParser),
            Box::new(IntParser),
            Box::new(LongParser),
            Box::new(FloatParser),
            Box::new(AddParser),
            Box::new(SubtractParser),
            Box::new(MultiplyParser),
            Box::new(DivideParser),
            Box::new(MethodCallParser),
        ])
    }
}
impl ParserRegistry {
    /// A registry with a custom rule set and registration order.
    pub fn with(parsers: Vec<Box<dyn LineParser>>) -> Self {
        Self { parsers }
    }

    /// Parses one compilation unit into its block tree.
    ///
    /// Blank lines are skipped. For every other line, parsers are tried in registration
    /// order and the first whose predicate accepts the line parses it; a line no parser
    /// accepts aborts the unit with [`ParseError::UnmatchedLine`]. Indentation selects the
    /// parent block: a line at depth `d` attaches under the most recent block at depth
    /// `d - 1`, methods may only appear at depth 0, and statements only inside methods.
    pub fn parse_unit(&self, src: &str) -> Result<BlockTree, ParseError> {
        let mut tree = BlockTree::new();
        let mut chain = vec![tree.root()];

        for (i, raw) in src.lines().enumerate() {
            let line = i + 1;
            let (depth, body) = indent_depth(raw);
            let body = body.trim_end();
            if body.is_empty() { continue }

            if depth >= chain.len() {
                return Err(ParseError::BadIndent { line });
            }
            let parent = chain[depth];

            let mut tokens = Tokenizer::new(body).map_err(|error| ParseError::Lex { line, error })?;
            let parser = match self.parsers.iter().find(|p| p.should_parse(body)) {
                Some(p) => p,
                None => return Err(ParseError::UnmatchedLine { line }),
            };
            let id = parser.parse(&mut tree, parent, &mut tokens, line)?;

            let is_method = matches!(tree.get(id).kind, BlockKind::Method { .. });
            if is_method && parent != tree.root() {
                return Err(ParseError::NestedMethod { line });
            }
            if !is_method && parent == tree.root() {
                return Err(ParseError::StatementOutsideMethod { line });
            }

            chain.truncate(depth + 1);
            chain.push(id);
        }
        Ok(tree)
    }
}
