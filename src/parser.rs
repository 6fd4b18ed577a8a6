//! Thin recursive-descent parser: tokens in, arena nodes out.
//!
//! Statements are newline-terminated; nested bodies arrive as
//! INDENT/DEDENT-delimited blocks from the lexer. A statement that begins
//! with an identifier followed by an expression-start token is a call with
//! space-separated arguments (`fact 5`, `print "hi" x`).

use std::sync::Arc;

use crate::arena::{NodeArena, NodeId};
use crate::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use crate::error::{ParseError, ParseErrorKind};
use crate::intern::{Interner, Symbol};
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenType};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    arena: &'a NodeArena,
    current: Token,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, interner: &'a mut Interner, arena: &'a NodeArena) -> Self {
        let lexer = Lexer::new(source, interner);
        Parser {
            lexer,
            arena,
            current: Token::new(TokenType::Eof, Symbol::EMPTY, Span::default()),
        }
    }

    pub fn parse_program(&mut self) -> Result<Vec<NodeId>, ParseError> {
        self.advance()?;
        let mut statements = Vec::new();
        loop {
            self.skip_newlines()?;
            if self.current.kind == TokenType::Eof {
                break;
            }
            let self_terminating = self.at_block_statement();
            statements.push(self.parse_statement()?);
            if !self_terminating {
                self.expect_statement_end()?;
            }
        }
        Ok(statements)
    }

    /// Statements whose body is an indented block consume their own
    /// trailing DEDENT; no newline follows them.
    fn at_block_statement(&self) -> bool {
        matches!(
            self.current.kind,
            TokenType::If
                | TokenType::When
                | TokenType::Unless
                | TokenType::While
                | TokenType::Whenever
                | TokenType::Until
                | TokenType::For
                | TokenType::During
                | TokenType::Throughout
                | TokenType::Function
                | TokenType::Class
                | TokenType::Try
        )
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn advance(&mut self) -> Result<(), ParseError> {
        match self.lexer.next_token() {
            Some(token) => {
                self.current = token;
                Ok(())
            }
            None => {
                if self.lexer.in_error_recovery() {
                    let message = self
                        .lexer
                        .error_message()
                        .unwrap_or("lexer error")
                        .to_string();
                    let at = self.lexer.error_position();
                    Err(ParseError::new(
                        ParseErrorKind::LexerError { message },
                        Span::new(at, at + 1),
                    ))
                } else {
                    // Past EOF; stay on the EOF token.
                    self.current =
                        Token::new(TokenType::Eof, Symbol::EMPTY, self.current.span);
                    Ok(())
                }
            }
        }
    }

    fn eat(&mut self, kind: &TokenType) -> Result<bool, ParseError> {
        if &self.current.kind == kind {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenType, what: &'static str) -> Result<Token, ParseError> {
        if self.current.kind == kind {
            let token = self.current.clone();
            self.advance()?;
            Ok(token)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_identifier(&mut self) -> Result<(Symbol, Span), ParseError> {
        match self.current.kind {
            TokenType::Identifier(symbol) => {
                let span = self.current.span;
                self.advance()?;
                Ok((symbol, span))
            }
            _ => Err(ParseError::new(
                ParseErrorKind::ExpectedIdentifier,
                self.current.span,
            )),
        }
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedToken {
                expected,
                found: token_name(&self.current.kind),
            },
            self.current.span,
        )
    }

    fn skip_newlines(&mut self) -> Result<(), ParseError> {
        while self.current.kind == TokenType::Newline {
            self.advance()?;
        }
        Ok(())
    }

    fn expect_statement_end(&mut self) -> Result<(), ParseError> {
        match self.current.kind {
            TokenType::Newline => self.advance(),
            TokenType::Eof | TokenType::Dedent => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    fn alloc(&self, kind: NodeKind, span: Span) -> NodeId {
        self.arena.alloc_node(Node::new(kind, span))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<NodeId, ParseError> {
        match self.current.kind.clone() {
            TokenType::Set => self.parse_set(),
            TokenType::Function => self.parse_function(),
            TokenType::If | TokenType::When => {
                self.advance()?;
                self.parse_if(false)
            }
            TokenType::Unless => {
                self.advance()?;
                self.parse_if(true)
            }
            TokenType::While | TokenType::Whenever => {
                self.advance()?;
                self.parse_while(false)
            }
            TokenType::Until => {
                self.advance()?;
                self.parse_while(true)
            }
            TokenType::For | TokenType::During | TokenType::Throughout => {
                self.advance()?;
                self.parse_for()
            }
            TokenType::Return => self.parse_return(),
            TokenType::Break => {
                let span = self.current.span;
                self.advance()?;
                Ok(self.alloc(NodeKind::Break, span))
            }
            TokenType::Continue => {
                let span = self.current.span;
                self.advance()?;
                Ok(self.alloc(NodeKind::Continue, span))
            }
            TokenType::Class => self.parse_class(),
            TokenType::Try => self.parse_try(),
            TokenType::Throw => {
                let span = self.current.span;
                self.advance()?;
                let value = self.parse_expression()?;
                Ok(self.alloc(NodeKind::Throw(value), span))
            }
            TokenType::Import => self.parse_import(),
            TokenType::Export => {
                let span = self.current.span;
                self.advance()?;
                let (name, _) = self.expect_identifier()?;
                Ok(self.alloc(NodeKind::Export { name }, span))
            }
            TokenType::Get => {
                // A read: evaluate the expression for its value.
                self.advance()?;
                self.parse_expression()
            }
            TokenType::Put => self.parse_put(),
            TokenType::Identifier(symbol) => {
                if self.starts_call_argument() {
                    self.parse_call_statement(symbol)
                } else {
                    self.parse_expression()
                }
            }
            TokenType::Indent => Err(self.unexpected("a statement")),
            TokenType::Elif | TokenType::Else | TokenType::Otherwise | TokenType::Catch => {
                Err(ParseError::new(
                    ParseErrorKind::ExpectedStatement {
                        found: token_name(&self.current.kind),
                    },
                    self.current.span,
                ))
            }
            _ => self.parse_expression(),
        }
    }

    /// True when the token after the current identifier opens a
    /// space-separated call argument (`fact 5`, `print "x"`).
    fn starts_call_argument(&mut self) -> bool {
        matches!(
            self.lexer.peek(0).map(|t| t.kind),
            Some(
                TokenType::Number(_)
                    | TokenType::Str(_)
                    | TokenType::True
                    | TokenType::False
                    | TokenType::Null
                    | TokenType::Undecidable
                    | TokenType::Identifier(_)
                    | TokenType::LBracket
                    | TokenType::LBrace
            )
        )
    }

    fn parse_call_statement(&mut self, callee: Symbol) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let callee_node = self.alloc(NodeKind::VarRef(callee), span);
        let mut args = Vec::new();
        loop {
            match self.current.kind {
                TokenType::Number(_)
                | TokenType::Str(_)
                | TokenType::True
                | TokenType::False
                | TokenType::Null
                | TokenType::Undecidable
                | TokenType::Identifier(_)
                | TokenType::LBracket
                | TokenType::LBrace
                | TokenType::LParen => {
                    args.push(self.parse_unary()?);
                }
                _ => break,
            }
        }
        Ok(self.alloc(
            NodeKind::Call {
                callee: callee_node,
                args: Arc::from(args.into_boxed_slice()),
            },
            span,
        ))
    }

    fn parse_set(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let (name, name_span) = self.expect_identifier()?;

        // A dotted target turns the definition into an assignment through
        // the member path; `set x [1]` stays an array definition, index
        // writes go through `put`.
        if matches!(self.current.kind, TokenType::Dot) {
            let mut target = self.alloc(NodeKind::VarRef(name), name_span);
            target = self.parse_postfix_chain(target, false)?;
            let value = self.parse_expression()?;
            return Ok(self.alloc(NodeKind::Assign { target, value }, span));
        }

        let value = self.parse_expression()?;
        Ok(self.alloc(NodeKind::VarDef { name, value }, span))
    }

    fn parse_put(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let value = self.parse_unary()?;
        let (name, name_span) = self.expect_identifier()?;
        let mut target = self.alloc(NodeKind::VarRef(name), name_span);
        target = self.parse_postfix_chain(target, false)?;
        Ok(self.alloc(NodeKind::Assign { target, value }, span))
    }

    fn parse_function(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let (name, _) = self.expect_identifier()?;
        let mut params = Vec::new();
        while let TokenType::Identifier(param) = self.current.kind {
            params.push(param);
            self.advance()?;
        }
        self.eat(&TokenType::Colon)?;
        let body = self.parse_block()?;
        Ok(self.alloc(
            NodeKind::FuncDef {
                name,
                params: Arc::from(params.into_boxed_slice()),
                body,
            },
            span,
        ))
    }

    fn parse_if(&mut self, negate: bool) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        let mut cond = self.parse_expression()?;
        if negate {
            cond = self.alloc(NodeKind::Unary { op: UnaryOp::Not, operand: cond }, span);
        }

        let then_block = self.parse_block_or_inline()?;

        let else_block = match self.current.kind {
            TokenType::Elif => {
                self.advance()?;
                Some(self.parse_if(false)?)
            }
            TokenType::Else | TokenType::Otherwise => {
                self.advance()?;
                Some(self.parse_block_or_inline()?)
            }
            _ => None,
        };

        Ok(self.alloc(NodeKind::If { cond, then_block, else_block }, span))
    }

    fn parse_while(&mut self, negate: bool) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        let mut cond = self.parse_expression()?;
        if negate {
            cond = self.alloc(NodeKind::Unary { op: UnaryOp::Not, operand: cond }, span);
        }
        let body = self.parse_block_or_inline()?;
        Ok(self.alloc(NodeKind::While { cond, body }, span))
    }

    fn parse_for(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        let (var, _) = self.expect_identifier()?;
        self.expect(TokenType::In, "'in'")?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block_or_inline()?;
        Ok(self.alloc(NodeKind::For { var, iterable, body }, span))
    }

    fn parse_return(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let value = match self.current.kind {
            TokenType::Newline | TokenType::Eof | TokenType::Dedent => None,
            _ => Some(self.parse_expression()?),
        };
        Ok(self.alloc(NodeKind::Return(value), span))
    }

    fn parse_class(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let (name, _) = self.expect_identifier()?;
        let parent = if self.eat(&TokenType::Extends)? {
            let (parent, _) = self.expect_identifier()?;
            Some(parent)
        } else {
            None
        };
        self.eat(&TokenType::Colon)?;
        self.expect(TokenType::Newline, "a newline before the class body")?;
        self.expect(TokenType::Indent, "an indented class body")?;

        let mut methods = Vec::new();
        loop {
            self.skip_newlines()?;
            match self.current.kind {
                TokenType::Dedent => {
                    self.advance()?;
                    break;
                }
                TokenType::Eof => break,
                TokenType::Function => {
                    methods.push(self.parse_function()?);
                }
                _ => return Err(self.unexpected("a method definition")),
            }
        }

        Ok(self.alloc(
            NodeKind::ClassDef {
                name,
                parent,
                methods: Arc::from(methods.into_boxed_slice()),
            },
            span,
        ))
    }

    fn parse_try(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        self.eat(&TokenType::Colon)?;
        let body = self.parse_block()?;
        self.expect(TokenType::Catch, "'catch'")?;
        let (catch_var, _) = self.expect_identifier()?;
        let catch_body = self.parse_block_or_inline()?;
        Ok(self.alloc(NodeKind::Try { body, catch_var, catch_body }, span))
    }

    fn parse_import(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let (module, _) = self.expect_identifier()?;
        let alias = if self.eat(&TokenType::As)? {
            let (alias, _) = self.expect_identifier()?;
            Some(alias)
        } else {
            None
        };
        Ok(self.alloc(NodeKind::Import { module, alias }, span))
    }

    /// Newline + INDENT block, with `then <stmt>` accepted as an inline
    /// single-statement body.
    fn parse_block_or_inline(&mut self) -> Result<NodeId, ParseError> {
        if self.eat(&TokenType::Then)? && self.current.kind != TokenType::Newline {
            let span = self.current.span;
            let statement = self.parse_statement()?;
            let children: Arc<[NodeId]> = Arc::from(vec![statement].into_boxed_slice());
            return Ok(self.alloc(NodeKind::Block(children), span));
        }
        self.parse_block()
    }

    fn parse_block(&mut self) -> Result<NodeId, ParseError> {
        self.eat(&TokenType::Colon)?;
        let span = self.current.span;
        if self.current.kind != TokenType::Newline {
            return Err(ParseError::new(
                ParseErrorKind::ExpectedIndentedBlock,
                self.current.span,
            ));
        }
        self.advance()?;
        self.expect(TokenType::Indent, "an indented block")?;

        let mut statements = Vec::new();
        loop {
            self.skip_newlines()?;
            match self.current.kind {
                TokenType::Dedent => {
                    self.advance()?;
                    break;
                }
                TokenType::Eof => break,
                _ => {
                    let self_terminating = self.at_block_statement();
                    statements.push(self.parse_statement()?);
                    if !self_terminating {
                        self.expect_statement_end()?;
                    }
                }
            }
        }

        Ok(self.alloc(
            NodeKind::Block(Arc::from(statements.into_boxed_slice())),
            span,
        ))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expression(&mut self) -> Result<NodeId, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<NodeId, ParseError> {
        let mut left = self.parse_and()?;
        while matches!(
            self.current.kind,
            TokenType::Or | TokenType::Pipe | TokenType::PipePipe
        ) {
            let span = self.current.span;
            self.advance()?;
            let right = self.parse_and()?;
            left = self.alloc(NodeKind::Binary { op: BinaryOp::Or, left, right }, span);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<NodeId, ParseError> {
        let mut left = self.parse_not()?;
        while matches!(
            self.current.kind,
            TokenType::And | TokenType::Amp | TokenType::AmpAmp
        ) {
            let span = self.current.span;
            self.advance()?;
            let right = self.parse_not()?;
            left = self.alloc(NodeKind::Binary { op: BinaryOp::And, left, right }, span);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<NodeId, ParseError> {
        if matches!(self.current.kind, TokenType::Not | TokenType::Bang) {
            let span = self.current.span;
            self.advance()?;
            let operand = self.parse_not()?;
            return Ok(self.alloc(NodeKind::Unary { op: UnaryOp::Not, operand }, span));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<NodeId, ParseError> {
        let mut left = self.parse_range()?;
        loop {
            let op = match self.current.kind {
                TokenType::Eq => BinaryOp::Eq,
                TokenType::NotEq => BinaryOp::NotEq,
                TokenType::Lt => BinaryOp::Lt,
                TokenType::LtEq => BinaryOp::LtEq,
                TokenType::Gt => BinaryOp::Gt,
                TokenType::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            let span = self.current.span;
            self.advance()?;
            let right = self.parse_range()?;
            left = self.alloc(NodeKind::Binary { op, left, right }, span);
        }
        Ok(left)
    }

    fn parse_range(&mut self) -> Result<NodeId, ParseError> {
        let left = self.parse_term()?;
        if self.current.kind == TokenType::DotDot {
            let span = self.current.span;
            self.advance()?;
            let right = self.parse_term()?;
            return Ok(self.alloc(
                NodeKind::Binary { op: BinaryOp::Range, left, right },
                span,
            ));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<NodeId, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.current.kind {
                TokenType::Plus => BinaryOp::Add,
                TokenType::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.current.span;
            self.advance()?;
            let right = self.parse_factor()?;
            left = self.alloc(NodeKind::Binary { op, left, right }, span);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<NodeId, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current.kind {
                TokenType::Star => BinaryOp::Mul,
                TokenType::Slash => BinaryOp::Div,
                TokenType::Percent => BinaryOp::Mod,
                _ => break,
            };
            let span = self.current.span;
            self.advance()?;
            let right = self.parse_unary()?;
            left = self.alloc(NodeKind::Binary { op, left, right }, span);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<NodeId, ParseError> {
        if self.current.kind == TokenType::Minus {
            let span = self.current.span;
            self.advance()?;
            let operand = self.parse_unary()?;
            return Ok(self.alloc(NodeKind::Unary { op: UnaryOp::Neg, operand }, span));
        }
        let primary = self.parse_primary()?;
        self.parse_postfix_chain(primary, true)
    }

    /// Postfix chain: `.name`, `[index]`, and (optionally) `(args)`.
    fn parse_postfix_chain(
        &mut self,
        mut node: NodeId,
        allow_calls: bool,
    ) -> Result<NodeId, ParseError> {
        loop {
            match self.current.kind {
                TokenType::Dot => {
                    let span = self.current.span;
                    self.advance()?;
                    let (name, _) = self.expect_identifier()?;
                    node = self.alloc(NodeKind::Member { object: node, name }, span);
                }
                TokenType::LBracket => {
                    let span = self.current.span;
                    self.advance()?;
                    let index = self.parse_expression()?;
                    self.expect(TokenType::RBracket, "']'")?;
                    node = self.alloc(NodeKind::Index { object: node, index }, span);
                }
                TokenType::LParen if allow_calls => {
                    let span = self.current.span;
                    self.advance()?;
                    let mut args = Vec::new();
                    if self.current.kind != TokenType::RParen {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.eat(&TokenType::Comma)? {
                                break;
                            }
                        }
                    }
                    self.expect(TokenType::RParen, "')'")?;
                    node = self.alloc(
                        NodeKind::Call {
                            callee: node,
                            args: Arc::from(args.into_boxed_slice()),
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        match self.current.kind.clone() {
            TokenType::Number(value) => {
                self.advance()?;
                Ok(self.alloc(NodeKind::Number(value), span))
            }
            TokenType::Str(symbol) => {
                self.advance()?;
                let text = {
                    let interner = self.lexer_interner();
                    Arc::<str>::from(interner.resolve(symbol))
                };
                Ok(self.alloc(NodeKind::Str(text), span))
            }
            TokenType::True => {
                self.advance()?;
                Ok(self.alloc(NodeKind::Bool(true), span))
            }
            TokenType::False => {
                self.advance()?;
                Ok(self.alloc(NodeKind::Bool(false), span))
            }
            TokenType::Null => {
                self.advance()?;
                Ok(self.alloc(NodeKind::Null, span))
            }
            TokenType::Undecidable => {
                self.advance()?;
                Ok(self.alloc(NodeKind::Undecidable, span))
            }
            TokenType::Identifier(symbol) => {
                self.advance()?;
                Ok(self.alloc(NodeKind::VarRef(symbol), span))
            }
            TokenType::LParen => {
                self.advance()?;
                let inner = self.parse_expression()?;
                self.expect(TokenType::RParen, "')'")?;
                Ok(inner)
            }
            TokenType::LBracket => self.parse_array_literal(),
            TokenType::LBrace => self.parse_object_literal(),
            TokenType::New => self.parse_new(),
            _ => Err(ParseError::new(
                ParseErrorKind::ExpectedExpression,
                self.current.span,
            )),
        }
    }

    fn parse_array_literal(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let mut items = Vec::new();
        if self.current.kind != TokenType::RBracket {
            loop {
                items.push(self.parse_expression()?);
                if !self.eat(&TokenType::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenType::RBracket, "']'")?;
        Ok(self.alloc(
            NodeKind::Array(Arc::from(items.into_boxed_slice())),
            span,
        ))
    }

    fn parse_object_literal(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let mut entries = Vec::new();
        if self.current.kind != TokenType::RBrace {
            loop {
                let key = match self.current.kind {
                    TokenType::Identifier(symbol) | TokenType::Str(symbol) => {
                        self.advance()?;
                        symbol
                    }
                    _ => return Err(self.unexpected("an object key")),
                };
                self.expect(TokenType::Colon, "':'")?;
                let value = self.parse_expression()?;
                entries.push((key, value));
                if !self.eat(&TokenType::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenType::RBrace, "'}'")?;
        Ok(self.alloc(
            NodeKind::ObjectLit(Arc::from(entries.into_boxed_slice())),
            span,
        ))
    }

    fn parse_new(&mut self) -> Result<NodeId, ParseError> {
        let span = self.current.span;
        self.advance()?;
        let (class, _) = self.expect_identifier()?;
        let mut args = Vec::new();
        if self.eat(&TokenType::LParen)? {
            if self.current.kind != TokenType::RParen {
                loop {
                    args.push(self.parse_expression()?);
                    if !self.eat(&TokenType::Comma)? {
                        break;
                    }
                }
            }
            self.expect(TokenType::RParen, "')'")?;
        }
        Ok(self.alloc(
            NodeKind::New {
                class,
                args: Arc::from(args.into_boxed_slice()),
            },
            span,
        ))
    }

    fn lexer_interner(&self) -> &Interner {
        self.lexer.interner()
    }
}

fn token_name(kind: &TokenType) -> String {
    match kind {
        TokenType::Identifier(_) => "identifier".to_string(),
        TokenType::Number(_) => "number".to_string(),
        TokenType::Str(_) => "string".to_string(),
        TokenType::Newline => "newline".to_string(),
        TokenType::Indent => "indent".to_string(),
        TokenType::Dedent => "dedent".to_string(),
        TokenType::Eof => "end of input".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}
