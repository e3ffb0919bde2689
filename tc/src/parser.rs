//! Recursive-descent parser (pipeline component 4).
//!
//! Consumes the token stream produced by [`crate::lexer`] and builds an AST in
//! the caller-owned [`AstPool`] / [`StringPool`]. The parser never allocates its
//! own pools; it only ever indexes into the ones it's handed.
//!
//! Precedence, tightest-binding first: primary → unary → `*` `/` `%` →
//! `+` `-` → shifts → comparisons → `==` `!=` → `&&.` `||.` → `&&` `||` →
//! assignment / temporal connectors.

use crate::ast::{AstPool, BinOp, Node, NodeIdx, StringPool, TemporalOp};
use crate::error::{CompileError, Result};
use crate::lexer::{Keyword, Token, TokenKind, VarType};

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a [u8],
    pool: &'a mut AstPool,
    strings: &'a mut StringPool,
    has_error: bool,
}

/// Parse `tokens` (from `source`) into the AST pool, returning the root node
/// index. Per the design, the only valid root on failure is `0`; partial pool
/// state after a failure must not be read.
pub fn parse(
    tokens: &[Token],
    source: &[u8],
    pool: &mut AstPool,
    strings: &mut StringPool,
) -> Result<NodeIdx> {
    let mut p = Parser { tokens, pos: 0, source, pool, strings, has_error: false };
    let root = p.parse_statement_chain()?;
    if p.has_error {
        return Ok(0);
    }
    Ok(root)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_line(&self) -> u32 {
        self.tokens[self.pos].line
    }

    fn bump(&mut self) -> &Token {
        let t = &self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn expect(&mut self, want: &TokenKind) -> Result<()> {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(want) {
            self.bump();
            Ok(())
        } else {
            let line = Some(self.peek_line());
            self.has_error = true;
            Err(CompileError::ParseUnexpectedToken {
                line,
                what: format!("expected {want:?}, found {:?}", self.peek()),
            })
        }
    }

    fn fail(&mut self, what: impl Into<String>) -> CompileError {
        self.has_error = true;
        CompileError::ParseUnexpectedToken { line: Some(self.peek_line()), what: what.into() }
    }

    fn token_text(&self, tok: &Token) -> &'a [u8] {
        &self.source[tok.start..tok.start + tok.len]
    }

    fn intern_current_identifier(&mut self) -> Result<(u32, u32)> {
        let tok = self.tokens[self.pos].clone();
        let text = self.token_text(&tok).to_vec();
        self.bump();
        self.strings.intern(&text)
    }

    /// Parse a chain of statements until EOF or a block-closing token (`:` `>`)
    /// is encountered. Returns `0` (empty chain) if there are no statements.
    fn parse_statement_chain(&mut self) -> Result<NodeIdx> {
        let mut head = 0u16;
        let mut tail: Option<NodeIdx> = None;
        while !self.at_eof() && !self.at_block_close() {
            let stmt = self.parse_statement()?;
            if self.has_error {
                return Ok(0);
            }
            let chain = self.pool.alloc(Node::Chain { item: stmt, next: 0 })?;
            match tail {
                None => head = chain,
                Some(t) => {
                    if let Node::Chain { item, .. } = *self.pool.get(t) {
                        *self.pool.get_mut(t) = Node::Chain { item, next: chain };
                    }
                }
            }
            tail = Some(chain);
        }
        Ok(head)
    }

    fn at_block_close(&self) -> bool {
        matches!(self.peek(), TokenKind::Colon)
    }

    fn parse_statement(&mut self) -> Result<NodeIdx> {
        match self.peek().clone() {
            TokenKind::VarDecl { ty, name_start, name_len } => {
                self.bump();
                self.expect(&TokenKind::LBracket)?;
                let init = self.parse_expr()?;
                self.expect(&TokenKind::RBracket)?;
                self.skip_terminator();
                let name = self.source[name_start..name_start + name_len].to_vec();
                let (offset, len) = self.strings.intern(&name)?;
                self.pool.alloc(Node::VarDef { ty, name_offset: offset, name_len: len, init })
            }
            TokenKind::Output(verb) => {
                self.bump();
                self.expect(&TokenKind::Slash)?;
                let content = self.parse_expr()?;
                self.skip_terminator();
                self.pool.alloc(Node::Output { verb, content, next_chained: 0 })
            }
            TokenKind::Caret => {
                self.bump();
                let (offset, len) = self.intern_current_identifier()?;
                let callee = self.pool.alloc(Node::Identifier { offset, len })?;
                self.expect(&TokenKind::Slash)?;
                let args_head = self.parse_call_args()?;
                self.skip_terminator();
                self.pool.alloc(Node::Call { callee, args_head })
            }
            TokenKind::Pipe => self.parse_func_def(),
            TokenKind::Keyword(Keyword::Do) => {
                self.bump();
                self.expect(&TokenKind::Slash)?;
                let body = self.parse_statement_chain()?;
                self.skip_terminator();
                self.pool.alloc(Node::DoBlock { body })
            }
            TokenKind::Keyword(Keyword::Array4d) => self.parse_array4d_def(),
            _ => {
                // fall back to a bare expression statement (covers temporal
                // writes like `10 >> a \` and identifier assignment `x = e \`).
                let expr = self.parse_expr()?;
                self.skip_terminator();
                Ok(expr)
            }
        }
    }

    fn skip_terminator(&mut self) {
        if matches!(self.peek(), TokenKind::Backslash) {
            self.bump();
        }
    }

    fn parse_call_args(&mut self) -> Result<NodeIdx> {
        if matches!(self.peek(), TokenKind::Backslash | TokenKind::Eof) {
            return Ok(0);
        }
        let mut head = 0u16;
        let mut tail: Option<NodeIdx> = None;
        loop {
            let arg = self.parse_expr()?;
            let chain = self.pool.alloc(Node::Chain { item: arg, next: 0 })?;
            match tail {
                None => head = chain,
                Some(t) => {
                    if let Node::Chain { item, .. } = *self.pool.get(t) {
                        *self.pool.get_mut(t) = Node::Chain { item, next: chain };
                    }
                }
            }
            tail = Some(chain);
            if matches!(self.peek(), TokenKind::Comma) {
                self.bump();
                continue;
            }
            break;
        }
        Ok(head)
    }

    fn parse_func_def(&mut self) -> Result<NodeIdx> {
        self.expect(&TokenKind::Pipe)?;
        let (name_offset, name_len) = self.intern_current_identifier()?;
        self.expect(&TokenKind::Pipe)?;
        match self.peek() {
            TokenKind::Keyword(Keyword::FuncCan) => {
                self.bump();
            }
            _ => return Err(self.fail("expected func.can after `|name|`")),
        }
        self.expect(&TokenKind::Lt)?;
        let body = self.parse_statement_chain()?;
        self.expect(&TokenKind::Colon)?;
        self.expect(&TokenKind::Gt)?;
        self.pool.alloc(Node::FuncDef { name_offset, name_len, body, param_count: 1 })
    }

    fn parse_array4d_def(&mut self) -> Result<NodeIdx> {
        self.bump(); // Keyword(Array4d)
        let (name_offset, name_len) = self.intern_current_identifier()?;
        self.expect(&TokenKind::LBracket)?;
        let mut dims = [1u16; 4];
        for (i, slot) in dims.iter_mut().enumerate() {
            if let TokenKind::Number(n) = *self.peek() {
                self.bump();
                *slot = n.clamp(1, u16::MAX as i64) as u16;
            }
            if i < 3 {
                self.expect(&TokenKind::Comma)?;
            }
        }
        self.expect(&TokenKind::RBracket)?;
        self.skip_terminator();
        self.pool.alloc(Node::Array4dDef { name_offset, name_len, dims })
    }

    /// `math.<name>/ arg \` — the `math.` prefix is already consumed into its
    /// own token by the lexer, leaving the intrinsic name as a plain
    /// identifier.
    fn parse_intrinsic_call(&mut self) -> Result<NodeIdx> {
        self.bump(); // Keyword(Math)
        let (name_offset, name_len) = self.intern_current_identifier()?;
        self.expect(&TokenKind::Slash)?;
        let arg = self.parse_expr()?;
        self.skip_terminator();
        self.pool.alloc(Node::Intrinsic { name_offset, name_len, arg })
    }

    /// `gap.compute/ expr \`
    fn parse_gap_compute(&mut self) -> Result<NodeIdx> {
        self.bump(); // Keyword(GapCompute)
        self.expect(&TokenKind::Slash)?;
        let expr = self.parse_expr()?;
        self.skip_terminator();
        self.pool.alloc(Node::GapCompute { expr })
    }

    // --- expression grammar ---------------------------------------------

    fn parse_expr(&mut self) -> Result<NodeIdx> {
        self.parse_temporal_or_assign()
    }

    fn parse_temporal_or_assign(&mut self) -> Result<NodeIdx> {
        let left = self.parse_logical_or()?;
        match self.peek().clone() {
            TokenKind::Eq => {
                self.bump();
                let value = self.parse_temporal_or_assign()?;
                self.pool.alloc(Node::Assign { target: left, value })
            }
            TokenKind::Shr | TokenKind::ShrDot => {
                self.bump();
                self.pool.alloc(Node::Timing { op: TemporalOp::WriteFuture, expr: left, temporal_offset: 0 })
            }
            _ => Ok(left),
        }
    }

    fn parse_logical_or(&mut self) -> Result<NodeIdx> {
        let mut left = self.parse_logical_and()?;
        loop {
            let op = match self.peek() {
                TokenKind::OrOr => BinOp::OrOr,
                TokenKind::OrOrDot => BinOp::OrOrDot,
                _ => break,
            };
            self.bump();
            let right = self.parse_logical_and()?;
            left = self.pool.alloc(Node::Binary { op, left, right })?;
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<NodeIdx> {
        let mut left = self.parse_equality()?;
        loop {
            let op = match self.peek() {
                TokenKind::AndAnd => BinOp::AndAnd,
                TokenKind::AndAndDot => BinOp::AndAndDot,
                _ => break,
            };
            self.bump();
            let right = self.parse_equality()?;
            left = self.pool.alloc(Node::Binary { op, left, right })?;
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<NodeIdx> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::NotEq,
                _ => break,
            };
            self.bump();
            let right = self.parse_comparison()?;
            left = self.pool.alloc(Node::Binary { op, left, right })?;
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<NodeIdx> {
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Diamond => BinOp::NotEq,
                _ => break,
            };
            self.bump();
            let right = self.parse_shift()?;
            left = self.pool.alloc(Node::Binary { op, left, right })?;
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<NodeIdx> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Shl | TokenKind::ShlDot => BinOp::Shl,
                _ => break,
            };
            self.bump();
            let right = self.parse_additive()?;
            left = self.pool.alloc(Node::Binary { op, left, right })?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<NodeIdx> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Dash => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            left = self.pool.alloc(Node::Binary { op, left, right })?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeIdx> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash if !self.looks_like_statement_terminator_slash() => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_unary()?;
            left = self.pool.alloc(Node::Binary { op, left, right })?;
        }
        Ok(left)
    }

    /// A `/` inside an expression is ambiguous with the `/` that separates an
    /// output verb / call name from its argument. We only ever reach this
    /// method after already consuming that separator, so any `/` seen here is
    /// always a division operator; this hook exists so the rule is explicit
    /// and future statement forms can refine it if they introduce a new
    /// ambiguity.
    fn looks_like_statement_terminator_slash(&self) -> bool {
        false
    }

    fn parse_unary(&mut self) -> Result<NodeIdx> {
        match self.peek() {
            TokenKind::Dash => {
                self.bump();
                let expr = self.parse_unary()?;
                let zero = self.pool.alloc(Node::Number(0))?;
                self.pool.alloc(Node::Binary { op: BinOp::Sub, left: zero, right: expr })
            }
            TokenKind::Lt => {
                self.bump();
                let expr = self.parse_unary()?;
                self.pool.alloc(Node::Timing { op: TemporalOp::ReadFuture, expr, temporal_offset: 0 })
            }
            TokenKind::Shl => {
                self.bump();
                let expr = self.parse_unary()?;
                self.pool.alloc(Node::Timing { op: TemporalOp::ReadPast, expr, temporal_offset: 0 })
            }
            TokenKind::Keyword(Keyword::Math) => self.parse_intrinsic_call(),
            TokenKind::Keyword(Keyword::GapCompute) => self.parse_gap_compute(),
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<NodeIdx> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.bump();
                self.pool.alloc(Node::Number(n))
            }
            TokenKind::Float(f) => {
                self.bump();
                self.pool.alloc(Node::Float(f))
            }
            TokenKind::String => {
                let tok = self.tokens[self.pos].clone();
                self.bump();
                let raw = &self.source[tok.start + 1..tok.start + tok.len - 1];
                let unescaped = unescape(raw);
                let (offset, len) = self.strings.intern(&unescaped)?;
                self.pool.alloc(Node::Str { offset, len })
            }
            TokenKind::Identifier => {
                let (offset, len) = self.intern_current_identifier()?;
                self.pool.alloc(Node::Identifier { offset, len })
            }
            _ => Err(self.fail(format!("unexpected token in expression: {:?}", self.peek()))),
        }
    }
}

fn unescape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 1 < raw.len() {
            let esc = match raw[i + 1] {
                b'n' => b'\n',
                b't' => b'\t',
                b'"' => b'"',
                b'\\' => b'\\',
                other => other,
            };
            out.push(esc);
            i += 2;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DEFAULT_NODE_CAPACITY, DEFAULT_STRING_CAPACITY};
    use crate::lexer::lex;

    fn parse_src(src: &[u8]) -> (AstPool, StringPool, NodeIdx) {
        let toks = lex(src);
        let mut pool = AstPool::with_capacity(DEFAULT_NODE_CAPACITY);
        let mut strings = StringPool::with_capacity(DEFAULT_STRING_CAPACITY);
        let root = parse(&toks, src, &mut pool, &mut strings).unwrap();
        (pool, strings, root)
    }

    #[test]
    fn parses_hello_world() {
        let (pool, _strings, root) = parse_src(br#"print/ "Hello World!" \"#);
        assert_ne!(root, 0);
        match pool.get(root) {
            Node::Chain { item, .. } => match pool.get(*item) {
                Node::Output { .. } => {}
                other => panic!("expected Output, got {other:?}"),
            },
            other => panic!("expected Chain, got {other:?}"),
        }
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let (pool, _s, root) = parse_src(b"var.v-y-[2 + 3 * 4] \\");
        let Node::Chain { item, .. } = pool.get(root) else { panic!() };
        let Node::VarDef { init, .. } = pool.get(*item) else { panic!("expected VarDef") };
        let Node::Binary { op: BinOp::Add, left, right } = pool.get(*init) else {
            panic!("expected top-level Add")
        };
        assert!(matches!(pool.get(*left), Node::Number(2)));
        assert!(matches!(pool.get(*right), Node::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parse_failure_yields_zero_root() {
        let toks = lex(b"var.v-x-[");
        let mut pool = AstPool::with_capacity(DEFAULT_NODE_CAPACITY);
        let mut strings = StringPool::with_capacity(DEFAULT_STRING_CAPACITY);
        let root = parse(&toks, b"var.v-x-[", &mut pool, &mut strings).unwrap();
        assert_eq!(root, 0);
    }
}
