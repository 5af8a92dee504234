//! Lexer for KnitScript source using logos
//!
//! Supports tokens like:
//! - Needles: f3, b12, fs0, bs4
//! - Carriers and sheets: c1, s0, s1:g2
//! - Numbers and strings: 1, 2.5, "text", 'text', f"row {i}"
//! - Keywords: if, for, def, in, xfer, knit, ...
//! - Comments: `// line` and `/* block */`

use std::fmt;
use std::ops::Range;

use logos::Logos;

use crate::ast::DirectionKeyword;
use crate::machine::needle::Needle;

pub type Span = Range<usize>;

/// Resolve backslash escapes in a string literal body
fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn quoted(lex: &mut logos::Lexer<Token>, prefix: usize) -> String {
    let slice = lex.slice();
    unescape(&slice[prefix + 1..slice.len() - 1])
}

fn sheet_literal(lex: &mut logos::Lexer<Token>) -> Option<(u32, Option<u32>)> {
    let body = &lex.slice()[1..];
    match body.split_once(":g") {
        Some((sheet, gauge)) => Some((sheet.parse().ok()?, Some(gauge.parse().ok()?))),
        None => Some((body.parse().ok()?, None)),
    }
}

/// Token types for KnitScript
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token {
    // Literals
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| quoted(lex, 0))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| quoted(lex, 0))]
    Str(String),

    #[regex(r#"f"([^"\\]|\\.)*""#, |lex| quoted(lex, 1))]
    #[regex(r#"f'([^'\\]|\\.)*'"#, |lex| quoted(lex, 1))]
    FString(String),

    #[regex(r"[fb]s?[0-9]+", priority = 5, callback = |lex| Needle::parse(lex.slice()))]
    Needle(Needle),

    #[regex(r"c[0-9]+", priority = 5, callback = |lex| lex.slice()[1..].parse::<u32>().ok())]
    Carrier(u32),

    #[regex(r"s[0-9]+(:g[0-9]+)?", priority = 5, callback = sheet_literal)]
    Sheet((u32, Option<u32>)),

    #[token("Leftward", |_| DirectionKeyword::Leftward)]
    #[token("Rightward", |_| DirectionKeyword::Rightward)]
    #[token("Current", |_| DirectionKeyword::Current)]
    #[token("Reverse", |_| DirectionKeyword::Reverse)]
    #[token("Decreasing", |_| DirectionKeyword::Decreasing)]
    #[token("Increasing", |_| DirectionKeyword::Increasing)]
    Direction(DirectionKeyword),

    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("None")]
    None,

    // Keywords
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("def")]
    Def,
    #[token("return")]
    Return,
    #[token("global")]
    Global,
    #[token("import")]
    Import,
    #[token("as")]
    As,
    #[token("with")]
    With,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("print")]
    Print,
    #[token("assert")]
    Assert,
    #[token("pause")]
    Pause,
    #[token("cut")]
    Cut,
    #[token("remove")]
    Remove,
    #[token("releasehook")]
    ReleaseHook,
    #[token("push")]
    Push,
    #[token("swap")]
    Swap,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("is")]
    Is,

    // Needle instructions
    #[token("knit")]
    Knit,
    #[token("tuck")]
    Tuck,
    #[token("miss")]
    Miss,
    #[token("split")]
    Split,
    #[token("xfer")]
    Xfer,
    #[token("drop")]
    Drop,

    // Identifiers
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("=")]
    Equals,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token(".")]
    Dot,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
}

impl Token {
    /// Check for an identifier with the given text
    pub fn is_word(&self, word: &str) -> bool {
        matches!(self, Token::Ident(name) if name == word)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Float(n) => write!(f, "{}", n),
            Token::Int(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::FString(s) => write!(f, "f\"{}\"", s),
            Token::Needle(n) => write!(f, "{}", n),
            Token::Carrier(c) => write!(f, "c{}", c),
            Token::Sheet((s, Some(g))) => write!(f, "s{}:g{}", s, g),
            Token::Sheet((s, None)) => write!(f, "s{}", s),
            Token::Direction(d) => write!(f, "{:?}", d),
            Token::Ident(s) => write!(f, "{}", s),
            Token::True => write!(f, "True"),
            Token::False => write!(f, "False"),
            Token::None => write!(f, "None"),
            Token::If => write!(f, "if"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::Def => write!(f, "def"),
            Token::Return => write!(f, "return"),
            Token::Global => write!(f, "global"),
            Token::Import => write!(f, "import"),
            Token::As => write!(f, "as"),
            Token::With => write!(f, "with"),
            Token::Try => write!(f, "try"),
            Token::Catch => write!(f, "catch"),
            Token::Print => write!(f, "print"),
            Token::Assert => write!(f, "assert"),
            Token::Pause => write!(f, "pause"),
            Token::Cut => write!(f, "cut"),
            Token::Remove => write!(f, "remove"),
            Token::ReleaseHook => write!(f, "releasehook"),
            Token::Push => write!(f, "push"),
            Token::Swap => write!(f, "swap"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::Is => write!(f, "is"),
            Token::Knit => write!(f, "knit"),
            Token::Tuck => write!(f, "tuck"),
            Token::Miss => write!(f, "miss"),
            Token::Split => write!(f, "split"),
            Token::Xfer => write!(f, "xfer"),
            Token::Drop => write!(f, "drop"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::LessEq => write!(f, "<="),
            Token::GreaterEq => write!(f, ">="),
            Token::Less => write!(f, "<"),
            Token::Greater => write!(f, ">"),
            Token::Equals => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Caret => write!(f, "^"),
            Token::Dot => write!(f, "."),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Colon => write!(f, ":"),
        }
    }
}

/// Lexer wrapper that provides a stream of spanned tokens and line lookup
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    line_starts: Vec<usize>,
    peeked: Option<Option<Result<(Token, Span), Span>>>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            inner: Token::lexer(source),
            line_starts,
            peeked: None,
        }
    }

    pub fn source(&self) -> &'source str {
        self.inner.source()
    }

    /// 1-based line containing byte `offset`
    pub fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(index) => index + 1,
            Err(index) => index,
        }
    }

    /// Text of a 1-based line without its line break
    pub fn line_text(&self, line: usize) -> &'source str {
        let source = self.source();
        let start = match line.checked_sub(1).and_then(|i| self.line_starts.get(i)) {
            Some(start) => *start,
            None => return "",
        };
        let end = self
            .line_starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or(source.len());
        source[start..end].trim_end_matches('\r')
    }

    /// Peek at the next token without consuming it
    pub fn peek(&mut self) -> Option<&Result<(Token, Span), Span>> {
        if self.peeked.is_none() {
            let next = self.advance_inner();
            self.peeked = Some(next);
        }
        self.peeked.as_ref().and_then(Option::as_ref)
    }

    /// Check if the next token matches expected
    pub fn check(&mut self, expected: &Token) -> bool {
        match self.peek() {
            Some(Ok((token, _))) => token == expected,
            _ => false,
        }
    }

    fn advance_inner(&mut self) -> Option<Result<(Token, Span), Span>> {
        let token = self.inner.next()?;
        let span = self.inner.span();
        Some(token.map(|t| (t, span.clone())).map_err(|_| span))
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<(Token, Span), Span>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.peeked.take() {
            Some(peeked) => peeked,
            None => self.advance_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .filter_map(Result::ok)
            .map(|(token, _)| token)
            .collect()
    }

    #[test]
    fn test_machine_literals() {
        assert_eq!(
            tokens("f0 bs12 c3 s1:g2 s0 fab"),
            vec![
                Token::Needle(Needle::front(0)),
                Token::Needle(Needle::back_slider(12)),
                Token::Carrier(3),
                Token::Sheet((1, Some(2))),
                Token::Sheet((0, None)),
                Token::Ident("fab".to_string()),
            ]
        );
    }

    #[test]
    fn test_assignment() {
        let source = "Carrier = c1; x = 2.5 ^ 2;";
        assert_eq!(
            tokens(source),
            vec![
                Token::Ident("Carrier".to_string()),
                Token::Equals,
                Token::Carrier(1),
                Token::Semicolon,
                Token::Ident("x".to_string()),
                Token::Equals,
                Token::Float(2.5),
                Token::Caret,
                Token::Int(2),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_in_direction_statement() {
        assert_eq!(
            tokens("in Rightward direction: { knit f0; }"),
            vec![
                Token::In,
                Token::Direction(DirectionKeyword::Rightward),
                Token::Ident("direction".to_string()),
                Token::Colon,
                Token::LBrace,
                Token::Knit,
                Token::Needle(Needle::front(0)),
                Token::Semicolon,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_strings_and_comments() {
        let source = "print 'it\\'s'; // trailing\n/* block\n comment */ print f\"row {i}\";";
        assert_eq!(
            tokens(source),
            vec![
                Token::Print,
                Token::Str("it's".to_string()),
                Token::Semicolon,
                Token::Print,
                Token::FString("row {i}".to_string()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            tokens("a <= b != c == d"),
            vec![
                Token::Ident("a".to_string()),
                Token::LessEq,
                Token::Ident("b".to_string()),
                Token::NotEq,
                Token::Ident("c".to_string()),
                Token::EqEq,
                Token::Ident("d".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_lookup() {
        let source = "x = 1;\ny = 2;\r\nz = 3;";
        let lexer = Lexer::new(source);
        assert_eq!(lexer.line_of(0), 1);
        assert_eq!(lexer.line_of(7), 2);
        assert_eq!(lexer.line_of(16), 3);
        assert_eq!(lexer.line_text(2), "y = 2;");
        assert_eq!(lexer.line_text(3), "z = 3;");
        assert_eq!(lexer.line_text(9), "");
    }
}
