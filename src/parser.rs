//! Parser for KnitScript programs
//!
//! Parses statements like:
//! - `Carrier = c1;`
//! - `in Rightward direction: { knit Front_Needles; }`
//! - `xfer f2, f4 2 to Left to sliders;`
//! - `def rib(width, repeat = 2): { ... }`

use std::rc::Rc;
use std::sync::Arc;

use crate::ast::{
    AssignTarget, BinaryOp, Expr, FStringPart, InstructionLine, Location, Param, Program, PushKind,
    Side, Statement, StatementKind, SwapKind, UnaryOp, XferRacking,
};
use crate::error::{KnitScriptError, KnitScriptResult};
use crate::lexer::{Lexer, Span, Token};
use crate::machine::carriage_pass::NeedleInstruction;
use crate::machine::needle::Bed;

/// Parse a complete program
pub fn parse(source: &str, file: Option<Arc<str>>) -> KnitScriptResult<Program> {
    Parser::new(source, file).parse_program()
}

/// Parser for KnitScript source
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    file: Option<Arc<str>>,
    tokens: Vec<(Token, Span)>,
    pos: usize,
    lex_error: Option<Span>,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str, file: Option<Arc<str>>) -> Self {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        let mut lex_error = None;
        for item in lexer.by_ref() {
            match item {
                Ok(token) => tokens.push(token),
                Err(span) => {
                    lex_error = Some(span);
                    break;
                }
            }
        }
        Self {
            lexer,
            file,
            tokens,
            pos: 0,
            lex_error,
        }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(token, _)| token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or_else(|| self.lexer.source().len())
    }

    fn location_at(&self, offset: usize) -> Location {
        let line = self.lexer.line_of(offset);
        Location::new(self.file.clone(), line, self.lexer.line_text(line).trim())
    }

    fn error(&self, msg: impl Into<String>) -> KnitScriptError {
        KnitScriptError::parse_error(msg).located(&self.location_at(self.offset()))
    }

    /// Advance to the next token
    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match self.current() {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    /// Check for a contextual keyword such as `across` or `direction`
    fn check_word(&self, word: &str) -> bool {
        self.current().map_or(false, |token| token.is_word(word))
    }

    fn found(&self) -> String {
        match self.current() {
            Some(token) => format!("`{}`", token),
            None => "end of input".to_string(),
        }
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> KnitScriptResult<Token> {
        if self.check(&expected) {
            self.advance()
                .ok_or_else(|| self.error(format!("expected `{}`", expected)))
        } else {
            Err(self.error(format!("expected `{}`, found {}", expected, self.found())))
        }
    }

    fn expect_word(&mut self, word: &str) -> KnitScriptResult<()> {
        if self.check_word(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`, found {}", word, self.found())))
        }
    }

    fn expect_ident(&mut self) -> KnitScriptResult<String> {
        match self.current() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected a name, found {}", self.found()))),
        }
    }

    fn end_statement(&mut self) -> KnitScriptResult<()> {
        self.expect(Token::Semicolon).map(|_| ())
    }

    /// Parse a complete program (multiple statements)
    pub fn parse_program(&mut self) -> KnitScriptResult<Program> {
        if let Some(span) = self.lex_error.clone() {
            let text = &self.lexer.source()[span.clone()];
            return Err(KnitScriptError::parse_error(format!("unrecognized token `{}`", text))
                .located(&self.location_at(span.start)));
        }
        let mut statements = Vec::new();
        while self.current().is_some() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    /// Parse a lone expression filling the whole input
    pub fn parse_standalone_expr(&mut self) -> KnitScriptResult<Expr> {
        if self.lex_error.is_some() {
            return Err(self.error("unrecognized token in expression"));
        }
        let expr = self.parse_expr()?;
        if self.current().is_some() {
            return Err(self.error(format!("unexpected {} after expression", self.found())));
        }
        Ok(expr)
    }

    /// `{ statements }`
    fn parse_block(&mut self) -> KnitScriptResult<Vec<Statement>> {
        self.expect(Token::LBrace)?;
        let mut statements = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.current().is_none() {
                return Err(self.error("unclosed block, expected `}`"));
            }
            statements.push(self.parse_statement()?);
        }
        self.expect(Token::RBrace)?;
        Ok(statements)
    }

    /// Optional `:` followed by a block or a single statement
    fn parse_body(&mut self) -> KnitScriptResult<Vec<Statement>> {
        if self.check(&Token::Colon) {
            self.advance();
        }
        if self.check(&Token::LBrace) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    /// Parse a single statement
    fn parse_statement(&mut self) -> KnitScriptResult<Statement> {
        let location = self.location_at(self.offset());
        let token = match self.current() {
            Some(token) => token.clone(),
            None => return Err(self.error("expected a statement")),
        };
        let kind = match token {
            Token::LBrace => StatementKind::Block(self.parse_block()?),
            Token::If => self.parse_if()?,
            Token::While => {
                self.advance();
                let condition = self.parse_expr()?;
                let body = self.parse_body()?;
                StatementKind::While { condition, body }
            }
            Token::For => {
                self.advance();
                let variables = self.parse_names()?;
                self.expect(Token::In)?;
                let iterable = self.parse_expr()?;
                let body = self.parse_body()?;
                StatementKind::For {
                    variables,
                    iterable,
                    body,
                }
            }
            Token::Try => self.parse_try()?,
            Token::With => self.parse_with()?,
            Token::Def => self.parse_def()?,
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.end_statement()?;
                StatementKind::Return(value)
            }
            Token::Print => {
                self.advance();
                let value = self.parse_expr()?;
                self.end_statement()?;
                StatementKind::Print(value)
            }
            Token::Assert => {
                self.advance();
                let condition = self.parse_expr()?;
                let message = if self.check(&Token::Comma) {
                    self.advance();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.end_statement()?;
                StatementKind::Assert { condition, message }
            }
            Token::Pause => {
                self.advance();
                self.end_statement()?;
                StatementKind::Pause
            }
            Token::Import => self.parse_import()?,
            Token::Global => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(Token::Equals)?;
                let value = self.parse_expr()?;
                self.end_statement()?;
                StatementKind::Declaration { name, value }
            }
            Token::Cut | Token::Remove => {
                self.advance();
                let carriers = if self.check(&Token::Semicolon) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.end_statement()?;
                if token == Token::Cut {
                    StatementKind::Cut(carriers)
                } else {
                    StatementKind::Remove(carriers)
                }
            }
            Token::ReleaseHook => {
                self.advance();
                self.end_statement()?;
                StatementKind::ReleaseHook
            }
            Token::Push => self.parse_push()?,
            Token::Swap => self.parse_swap()?,
            Token::Drop => {
                self.advance();
                let needles = self.parse_expr_list()?;
                self.end_statement()?;
                StatementKind::DropPass(needles)
            }
            Token::Xfer | Token::Split => self.parse_xfer(token == Token::Split)?,
            Token::In => self.parse_in_direction()?,
            _ => self.parse_assignment_or_expression()?,
        };
        // A stray `;` after a compound statement is harmless
        while self.check(&Token::Semicolon) {
            self.advance();
        }
        Ok(Statement { kind, location })
    }

    fn parse_names(&mut self) -> KnitScriptResult<Vec<String>> {
        let mut names = vec![self.expect_ident()?];
        while self.check(&Token::Comma) {
            self.advance();
            names.push(self.expect_ident()?);
        }
        Ok(names)
    }

    fn parse_expr_list(&mut self) -> KnitScriptResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.check(&Token::Comma) {
            self.advance();
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_if(&mut self) -> KnitScriptResult<StatementKind> {
        self.expect(Token::If)?;
        let mut branches = Vec::new();
        let condition = self.parse_expr()?;
        branches.push((condition, self.parse_body()?));
        while self.check(&Token::Elif) {
            self.advance();
            let condition = self.parse_expr()?;
            branches.push((condition, self.parse_body()?));
        }
        let otherwise = if self.check(&Token::Else) {
            self.advance();
            Some(self.parse_body()?)
        } else {
            None
        };
        Ok(StatementKind::If {
            branches,
            otherwise,
        })
    }

    fn parse_try(&mut self) -> KnitScriptResult<StatementKind> {
        self.expect(Token::Try)?;
        let body = self.parse_body()?;
        self.expect(Token::Catch)?;
        let mut filters = Vec::new();
        while let Some(Token::Ident(name)) = self.current() {
            filters.push(name.clone());
            self.advance();
            if self.check(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        let binding = if self.check(&Token::As) {
            self.advance();
            Some(self.expect_ident()?)
        } else {
            None
        };
        let handler = self.parse_body()?;
        Ok(StatementKind::Try {
            body,
            filters,
            binding,
            handler,
        })
    }

    fn parse_with(&mut self) -> KnitScriptResult<StatementKind> {
        self.expect(Token::With)?;
        let mut assignments = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.expect(Token::As)?;
            assignments.push((name, self.parse_expr()?));
            if self.check(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        let body = self.parse_body()?;
        Ok(StatementKind::With { assignments, body })
    }

    fn parse_def(&mut self) -> KnitScriptResult<StatementKind> {
        self.expect(Token::Def)?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            let param = self.expect_ident()?;
            let default = if self.check(&Token::Equals) {
                self.advance();
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if self.check(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RParen)?;
        let body = self.parse_body()?;
        Ok(StatementKind::FunctionDef {
            name,
            params,
            body: Rc::new(body),
        })
    }

    fn parse_import(&mut self) -> KnitScriptResult<StatementKind> {
        self.expect(Token::Import)?;
        let mut path = vec![self.expect_ident()?];
        while self.check(&Token::Dot) {
            self.advance();
            path.push(self.expect_ident()?);
        }
        let alias = if self.check(&Token::As) {
            self.advance();
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.end_statement()?;
        Ok(StatementKind::Import { path, alias })
    }

    fn parse_push(&mut self) -> KnitScriptResult<StatementKind> {
        self.expect(Token::Push)?;
        let needles = self.parse_expr_list()?;
        let push = if self.check_word("forward") {
            self.advance();
            PushKind::Forward(self.parse_expr()?)
        } else if self.check_word("backward") {
            self.advance();
            PushKind::Backward(self.parse_expr()?)
        } else {
            self.expect_word("to")?;
            if self.check_word("Front") {
                self.advance();
                PushKind::ToFront
            } else if self.check_word("Back") {
                self.advance();
                PushKind::ToBack
            } else {
                self.expect_word("layer")?;
                PushKind::ToLayer(self.parse_expr()?)
            }
        };
        self.end_statement()?;
        Ok(StatementKind::Push { needles, push })
    }

    fn parse_swap(&mut self) -> KnitScriptResult<StatementKind> {
        self.expect(Token::Swap)?;
        let needles = self.parse_expr_list()?;
        self.expect(Token::With)?;
        let swap = if self.check_word("sheet") {
            self.advance();
            SwapKind::Sheet(self.parse_expr()?)
        } else {
            self.expect_word("layer")?;
            SwapKind::Layer(self.parse_expr()?)
        };
        self.end_statement()?;
        Ok(StatementKind::Swap { needles, swap })
    }

    /// `xfer needles racking [to Front|Back bed] [to sliders]`, and `split`
    /// which may add `with carriers`
    fn parse_xfer(&mut self, is_split: bool) -> KnitScriptResult<StatementKind> {
        self.advance();
        let needles = self.parse_expr_list()?;
        let racking = if self.check_word("across") {
            self.advance();
            XferRacking::Across
        } else {
            let expr = self.parse_expr()?;
            let side = match self.peek_at(1) {
                Some(token) if self.check_word("to") && token.is_word("Left") => Some(Side::Left),
                Some(token) if self.check_word("to") && token.is_word("Right") => Some(Side::Right),
                _ => None,
            };
            match side {
                Some(side) => {
                    self.advance();
                    self.advance();
                    XferRacking::Shift {
                        distance: expr,
                        side,
                    }
                }
                None => XferRacking::Target(expr),
            }
        };

        let mut target_bed = None;
        let mut to_sliders = false;
        let mut carriers = None;
        loop {
            if self.check_word("to") {
                self.advance();
                if self.check_word("sliders") {
                    self.advance();
                    to_sliders = true;
                } else if self.check_word("Front") || self.check_word("Back") {
                    target_bed = Some(if self.check_word("Front") {
                        Bed::Front
                    } else {
                        Bed::Back
                    });
                    self.advance();
                    if self.check_word("bed") {
                        self.advance();
                    }
                } else {
                    return Err(self.error(format!(
                        "expected `sliders`, `Front` or `Back`, found {}",
                        self.found()
                    )));
                }
            } else if is_split && self.check(&Token::With) {
                self.advance();
                carriers = Some(self.parse_expr()?);
            } else {
                break;
            }
        }
        self.end_statement()?;
        Ok(StatementKind::XferPass {
            needles,
            racking,
            target_bed,
            to_sliders,
            split: is_split.then_some(carriers),
        })
    }

    fn parse_in_direction(&mut self) -> KnitScriptResult<StatementKind> {
        self.expect(Token::In)?;
        let direction = self.parse_expr()?;
        self.expect_word("direction")?;
        if self.check(&Token::Colon) {
            self.advance();
        }
        let mut lines = Vec::new();
        if self.check(&Token::LBrace) {
            self.advance();
            while !self.check(&Token::RBrace) {
                if self.current().is_none() {
                    return Err(self.error("unclosed block, expected `}`"));
                }
                lines.push(self.parse_instruction_line()?);
            }
            self.expect(Token::RBrace)?;
        } else {
            lines.push(self.parse_instruction_line()?);
        }
        Ok(StatementKind::InDirection { direction, lines })
    }

    /// `knit f1, f2;` or `instruction_variable needles;`
    fn parse_instruction_line(&mut self) -> KnitScriptResult<InstructionLine> {
        let instruction = match self.current() {
            Some(Token::Ident(name)) => {
                let expr = Expr::Variable(name.clone());
                self.advance();
                expr
            }
            Some(token) => match instruction_of(token) {
                Some(instruction) => {
                    self.advance();
                    Expr::Instruction(instruction)
                }
                None => {
                    return Err(self.error(format!(
                        "expected a needle instruction, found {}",
                        self.found()
                    )))
                }
            },
            None => return Err(self.error("expected a needle instruction")),
        };
        let needles = self.parse_expr_list()?;
        self.end_statement()?;
        Ok(InstructionLine {
            instruction,
            needles,
        })
    }

    fn parse_assignment_or_expression(&mut self) -> KnitScriptResult<StatementKind> {
        let exprs = self.parse_expr_list()?;
        if self.check(&Token::Equals) {
            self.advance();
            let mut values = self.parse_expr_list()?;
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Expr::Tuple(values)
            };
            let targets = exprs
                .into_iter()
                .map(|expr| self.assign_target(expr))
                .collect::<KnitScriptResult<Vec<_>>>()?;
            self.end_statement()?;
            return Ok(StatementKind::Assignment { targets, value });
        }
        self.end_statement()?;
        let mut exprs = exprs;
        Ok(StatementKind::Expression(if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::Tuple(exprs)
        }))
    }

    fn assign_target(&self, expr: Expr) -> KnitScriptResult<AssignTarget> {
        match expr {
            Expr::Variable(name) => Ok(AssignTarget::Name(name)),
            Expr::Index { object, index } => match *object {
                Expr::Variable(name) => Ok(AssignTarget::Index {
                    name,
                    index: *index,
                }),
                _ => Err(self.error("can only assign to an index of a named variable")),
            },
            _ => Err(self.error("cannot assign to this expression")),
        }
    }

    /// Parse an expression (handles operator precedence)
    pub fn parse_expr(&mut self) -> KnitScriptResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> KnitScriptResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> KnitScriptResult<Expr> {
        let mut left = self.parse_not()?;
        while self.check(&Token::And) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> KnitScriptResult<Expr> {
        if self.check(&Token::Not) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::unary(UnaryOp::Not, operand));
        }
        self.parse_comparison()
    }

    /// Comparisons, including `is not` and `not in`
    fn parse_comparison(&mut self) -> KnitScriptResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let (op, negate) = match self.current() {
                Some(Token::Less) => (BinaryOp::Lt, false),
                Some(Token::LessEq) => (BinaryOp::Le, false),
                Some(Token::Greater) => (BinaryOp::Gt, false),
                Some(Token::GreaterEq) => (BinaryOp::Ge, false),
                Some(Token::EqEq) => (BinaryOp::Eq, false),
                Some(Token::NotEq) => (BinaryOp::Ne, false),
                Some(Token::In) => (BinaryOp::In, false),
                Some(Token::Is) => match self.peek_at(1) {
                    Some(Token::Not) => (BinaryOp::Is, true),
                    _ => (BinaryOp::Is, false),
                },
                Some(Token::Not) if matches!(self.peek_at(1), Some(Token::In)) => {
                    (BinaryOp::In, true)
                }
                _ => break,
            };
            self.advance();
            if negate {
                self.advance();
            }
            let right = self.parse_additive()?;
            left = Expr::binary(op, left, right);
            if negate {
                left = Expr::unary(UnaryOp::Not, left);
            }
        }
        Ok(left)
    }

    /// Parse additive expressions: a + b, a - b
    fn parse_additive(&mut self) -> KnitScriptResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    /// Parse multiplicative expressions: a * b, a / b, a % b
    fn parse_multiplicative(&mut self) -> KnitScriptResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    /// Parse unary expressions: -a
    fn parse_unary(&mut self) -> KnitScriptResult<Expr> {
        if self.check(&Token::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::unary(UnaryOp::Neg, operand));
        }
        self.parse_power()
    }

    /// Exponentiation binds tighter than unary minus on its left
    fn parse_power(&mut self) -> KnitScriptResult<Expr> {
        let base = self.parse_postfix()?;
        if self.check(&Token::Caret) {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    /// Parse postfix expressions: a.b, f(x), a[i], a[i:j:k]
    fn parse_postfix(&mut self) -> KnitScriptResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&Token::Dot) {
                self.advance();
                let name = self.expect_ident()?;
                expr = Expr::Attribute {
                    object: Box::new(expr),
                    name,
                };
            } else if self.check(&Token::LParen) {
                let (args, kwargs) = self.parse_args()?;
                expr = Expr::Call {
                    function: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.check(&Token::LBracket) {
                expr = self.parse_subscript(expr)?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Parse call arguments: (a, b, key = c)
    fn parse_args(&mut self) -> KnitScriptResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.check(&Token::RParen) {
            let keyword = match (self.current(), self.peek_at(1)) {
                (Some(Token::Ident(name)), Some(Token::Equals)) => Some(name.clone()),
                _ => None,
            };
            match keyword {
                Some(name) => {
                    self.advance();
                    self.advance();
                    kwargs.push((name, self.parse_expr()?));
                }
                None if !kwargs.is_empty() => {
                    return Err(self.error("positional argument follows keyword argument"))
                }
                None => args.push(self.parse_expr()?),
            }
            if self.check(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self, object: Expr) -> KnitScriptResult<Expr> {
        self.expect(Token::LBracket)?;
        let start = if self.check(&Token::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        if !self.check(&Token::Colon) {
            self.expect(Token::RBracket)?;
            return match start {
                Some(index) => Ok(Expr::Index {
                    object: Box::new(object),
                    index,
                }),
                None => Err(self.error("empty index")),
            };
        }
        self.advance();
        let bound = |parser: &mut Self| -> KnitScriptResult<Option<Box<Expr>>> {
            if parser.check(&Token::Colon) || parser.check(&Token::RBracket) {
                Ok(None)
            } else {
                Ok(Some(Box::new(parser.parse_expr()?)))
            }
        };
        let stop = bound(self)?;
        let step = if self.check(&Token::Colon) {
            self.advance();
            bound(self)?
        } else {
            None
        };
        self.expect(Token::RBracket)?;
        Ok(Expr::Slice {
            object: Box::new(object),
            start,
            stop,
            step,
        })
    }

    /// Parse primary expressions: literals, names, and bracketed forms
    fn parse_primary(&mut self) -> KnitScriptResult<Expr> {
        let token = match self.current() {
            Some(token) => token.clone(),
            None => return Err(self.error("expected an expression, found end of input")),
        };
        if let Some(instruction) = instruction_of(&token) {
            self.advance();
            return Ok(Expr::Instruction(instruction));
        }
        let expr = match token {
            Token::Int(n) => Expr::Int(n),
            Token::Float(n) => Expr::Float(n),
            Token::Str(s) => Expr::Str(s),
            Token::FString(raw) => {
                let parts = self.parse_fstring(&raw)?;
                Expr::FString(parts)
            }
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::None => Expr::None,
            Token::Needle(needle) => Expr::Needle(needle),
            Token::Carrier(id) => Expr::Carrier(id),
            Token::Sheet((sheet, gauge)) => Expr::Sheet { sheet, gauge },
            Token::Direction(direction) => Expr::Direction(direction),
            Token::Ident(name) => Expr::Variable(name),
            Token::LParen => return self.parse_parenthesized(),
            Token::LBracket => return self.parse_list(),
            Token::LBrace => return self.parse_dict(),
            _ => {
                return Err(self.error(format!("expected an expression, found {}", self.found())))
            }
        };
        self.advance();
        Ok(expr)
    }

    /// `(e)` or a tuple `(a, b)`
    fn parse_parenthesized(&mut self) -> KnitScriptResult<Expr> {
        self.expect(Token::LParen)?;
        if self.check(&Token::RParen) {
            self.advance();
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.parse_expr()?;
        if !self.check(&Token::Comma) {
            self.expect(Token::RParen)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.advance();
            if self.check(&Token::RParen) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(Token::RParen)?;
        Ok(Expr::Tuple(items))
    }

    /// `for names in iterable [if condition]` tail of a comprehension
    fn parse_comprehension_tail(
        &mut self,
    ) -> KnitScriptResult<(Vec<String>, Box<Expr>, Option<Box<Expr>>)> {
        self.expect(Token::For)?;
        let variables = self.parse_names()?;
        self.expect(Token::In)?;
        let iterable = Box::new(self.parse_or()?);
        let condition = if self.check(&Token::If) {
            self.advance();
            Some(Box::new(self.parse_or()?))
        } else {
            None
        };
        Ok((variables, iterable, condition))
    }

    fn parse_list(&mut self) -> KnitScriptResult<Expr> {
        self.expect(Token::LBracket)?;
        if self.check(&Token::RBracket) {
            self.advance();
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_expr()?;
        if self.check(&Token::For) {
            let (variables, iterable, condition) = self.parse_comprehension_tail()?;
            self.expect(Token::RBracket)?;
            return Ok(Expr::ListComprehension {
                element: Box::new(first),
                variables,
                iterable,
                condition,
            });
        }
        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.advance();
            if self.check(&Token::RBracket) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(Token::RBracket)?;
        Ok(Expr::List(items))
    }

    fn parse_dict(&mut self) -> KnitScriptResult<Expr> {
        self.expect(Token::LBrace)?;
        if self.check(&Token::RBrace) {
            self.advance();
            return Ok(Expr::Dict(Vec::new()));
        }
        let key = self.parse_expr()?;
        self.expect(Token::Colon)?;
        let value = self.parse_expr()?;
        if self.check(&Token::For) {
            let (variables, iterable, condition) = self.parse_comprehension_tail()?;
            self.expect(Token::RBrace)?;
            return Ok(Expr::DictComprehension {
                key: Box::new(key),
                value: Box::new(value),
                variables,
                iterable,
                condition,
            });
        }
        let mut entries = vec![(key, value)];
        while self.check(&Token::Comma) {
            self.advance();
            if self.check(&Token::RBrace) {
                break;
            }
            let key = self.parse_expr()?;
            self.expect(Token::Colon)?;
            entries.push((key, self.parse_expr()?));
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::Dict(entries))
    }

    /// Split an f-string body into literal text and `{expr}` pieces
    fn parse_fstring(&self, raw: &str) -> KnitScriptResult<Vec<FStringPart>> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut depth = 1;
                    let mut inner = String::new();
                    for c in chars.by_ref() {
                        match c {
                            '{' => depth += 1,
                            '}' => depth -= 1,
                            _ => {}
                        }
                        if depth == 0 {
                            break;
                        }
                        inner.push(c);
                    }
                    if depth != 0 {
                        return Err(self.error("unclosed `{` in f-string"));
                    }
                    if !literal.is_empty() {
                        parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                    }
                    let expr = Parser::new(&inner, self.file.clone())
                        .parse_standalone_expr()
                        .map_err(|e| {
                            KnitScriptError::new(e.kind).located(&self.location_at(self.offset()))
                        })?;
                    parts.push(FStringPart::Expr(expr));
                }
                '}' => return Err(self.error("single `}` in f-string")),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }
}

fn instruction_of(token: &Token) -> Option<NeedleInstruction> {
    match token {
        Token::Knit => Some(NeedleInstruction::Knit),
        Token::Tuck => Some(NeedleInstruction::Tuck),
        Token::Miss => Some(NeedleInstruction::Miss),
        Token::Split => Some(NeedleInstruction::Split),
        Token::Xfer => Some(NeedleInstruction::Xfer),
        Token::Drop => Some(NeedleInstruction::Drop),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::DirectionKeyword;
    use crate::machine::needle::Needle;

    fn kinds(source: &str) -> Vec<StatementKind> {
        parse(source, None)
            .unwrap()
            .statements
            .into_iter()
            .map(|s| s.kind)
            .collect()
    }

    #[test]
    fn test_hello_carrier() {
        let program = parse("Carrier = c1;\nin Rightward direction: { knit f0, f1; }", None).unwrap();
        assert_eq!(program.statements.len(), 2);
        assert_eq!(
            program.statements[0].kind,
            StatementKind::Assignment {
                targets: vec![AssignTarget::Name("Carrier".to_string())],
                value: Expr::Carrier(1),
            }
        );
        assert_eq!(program.statements[1].location.line, 2);
        match &program.statements[1].kind {
            StatementKind::InDirection { direction, lines } => {
                assert_eq!(*direction, Expr::Direction(DirectionKeyword::Rightward));
                assert_eq!(lines[0].instruction, Expr::Instruction(NeedleInstruction::Knit));
                assert_eq!(
                    lines[0].needles,
                    vec![Expr::Needle(Needle::front(0)), Expr::Needle(Needle::front(1))]
                );
            }
            other => panic!("Expected in-direction, got {:?}", other),
        }
    }

    #[test]
    fn test_xfer_forms() {
        let statements = kinds(
            "xfer Front_Loops across;\n\
             xfer f2, f4 2 to Left to sliders;\n\
             xfer f0 b1;\n\
             split f3 across to Back bed with c2;",
        );
        assert!(matches!(
            &statements[0],
            StatementKind::XferPass { racking: XferRacking::Across, split: None, .. }
        ));
        match &statements[1] {
            StatementKind::XferPass {
                needles,
                racking,
                to_sliders,
                ..
            } => {
                assert_eq!(needles.len(), 2);
                assert_eq!(
                    *racking,
                    XferRacking::Shift {
                        distance: Expr::Int(2),
                        side: Side::Left
                    }
                );
                assert!(to_sliders);
            }
            other => panic!("Expected xfer, got {:?}", other),
        }
        assert!(matches!(
            &statements[2],
            StatementKind::XferPass { racking: XferRacking::Target(Expr::Needle(_)), .. }
        ));
        assert!(matches!(
            &statements[3],
            StatementKind::XferPass {
                target_bed: Some(Bed::Back),
                split: Some(Some(Expr::Carrier(2))),
                ..
            }
        ));
    }

    #[test]
    fn test_precedence() {
        let statements = kinds("x = -2 ^ 2 + 3 * 4;");
        let expected = Expr::binary(
            BinaryOp::Add,
            Expr::unary(
                UnaryOp::Neg,
                Expr::binary(BinaryOp::Pow, Expr::Int(2), Expr::Int(2)),
            ),
            Expr::binary(BinaryOp::Mul, Expr::Int(3), Expr::Int(4)),
        );
        assert_eq!(
            statements[0],
            StatementKind::Assignment {
                targets: vec![AssignTarget::Name("x".to_string())],
                value: expected,
            }
        );
    }

    #[test]
    fn test_not_in_and_is_not() {
        let statements = kinds("a = x not in ys and y is not None;");
        match &statements[0] {
            StatementKind::Assignment { value, .. } => match value {
                Expr::Binary {
                    op: BinaryOp::And,
                    left,
                    right,
                } => {
                    assert!(matches!(**left, Expr::Unary { op: UnaryOp::Not, .. }));
                    assert!(matches!(**right, Expr::Unary { op: UnaryOp::Not, .. }));
                }
                other => panic!("Expected and, got {:?}", other),
            },
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_function_and_control_flow() {
        let statements = kinds(
            "def rib(width, repeat = 2): {\n\
                 for i in range(width): { if i % repeat == 0: { knit_one(i); } else { pass_one(); } }\n\
                 return width;\n\
             }\n\
             try: { xfer f0 b1; } catch Valid_Rack_Error, NameError as e: { print e; }",
        );
        match &statements[0] {
            StatementKind::FunctionDef { name, params, body } => {
                assert_eq!(name, "rib");
                assert_eq!(params[1].default, Some(Expr::Int(2)));
                assert_eq!(body.len(), 2);
            }
            other => panic!("Expected def, got {:?}", other),
        }
        match &statements[1] {
            StatementKind::Try {
                filters, binding, ..
            } => {
                assert_eq!(filters, &["Valid_Rack_Error", "NameError"]);
                assert_eq!(binding.as_deref(), Some("e"));
            }
            other => panic!("Expected try, got {:?}", other),
        }
    }

    #[test]
    fn test_layer_statements() {
        let statements = kinds(
            "push f1, f2 forward 1;\npush f3 to layer 2;\nswap f1 with sheet s1;\ncut;\nremove c1, c2;",
        );
        assert!(matches!(
            &statements[0],
            StatementKind::Push { push: PushKind::Forward(Expr::Int(1)), .. }
        ));
        assert!(matches!(
            &statements[1],
            StatementKind::Push { push: PushKind::ToLayer(Expr::Int(2)), .. }
        ));
        assert!(matches!(
            &statements[2],
            StatementKind::Swap { swap: SwapKind::Sheet(Expr::Sheet { sheet: 1, gauge: None }), .. }
        ));
        assert_eq!(statements[3], StatementKind::Cut(Vec::new()));
        assert!(matches!(&statements[4], StatementKind::Remove(c) if c.len() == 2));
    }

    #[test]
    fn test_comprehension_slice_and_fstring() {
        let statements = kinds("xs = [n + 1 for n in Front_Loops if n.position > 2][1::2];\nprint f\"count {len(xs)}!\";");
        match &statements[0] {
            StatementKind::Assignment { value, .. } => {
                assert!(matches!(
                    value,
                    Expr::Slice { start: Some(_), stop: None, step: Some(_), .. }
                ));
            }
            other => panic!("Expected assignment, got {:?}", other),
        }
        match &statements[1] {
            StatementKind::Print(Expr::FString(parts)) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], FStringPart::Literal("count ".to_string()));
                assert!(matches!(parts[1], FStringPart::Expr(Expr::Call { .. })));
            }
            other => panic!("Expected print, got {:?}", other),
        }
    }

    #[test]
    fn test_with_and_unpacking() {
        let statements = kinds("with Carrier as c1, Racking as 1: { a, b = 1, 2; }");
        match &statements[0] {
            StatementKind::With { assignments, body } => {
                assert_eq!(assignments.len(), 2);
                assert_eq!(assignments[0].0, "Carrier");
                assert!(matches!(
                    &body[0].kind,
                    StatementKind::Assignment { targets, value: Expr::Tuple(_) } if targets.len() == 2
                ));
            }
            other => panic!("Expected with, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_location() {
        let err = parse("x = 1;\ny = ;", Some("bad.ks".into())).unwrap_err();
        assert_eq!(err.type_name(), "Parse_Error");
        let location = err.location.unwrap();
        assert_eq!(location.line, 2);
        assert_eq!(location.excerpt, "y = ;");
        assert_eq!(location.to_string(), "bad.ks:2");
    }

    #[test]
    fn test_unrecognized_token() {
        let err = parse("x = 1 $ 2;", None).unwrap_err();
        assert!(err.message().contains("unrecognized token `$`"));
    }
}
