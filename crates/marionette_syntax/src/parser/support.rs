use super::*;

impl Parser {
    pub(super) fn current(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.cursor.min(last)]
    }

    pub(super) fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    pub(super) fn peek_kind(&self, ahead: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.cursor + ahead).min(last)].kind
    }

    pub(super) fn peek_token(&self, ahead: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.cursor + ahead).min(last)]
    }

    pub(super) fn current_span(&self) -> Span {
        self.current().span
    }

    pub(super) fn previous_span(&self) -> Span {
        if self.cursor == 0 {
            return Span::new(0, 0);
        }
        self.tokens[self.cursor - 1].span
    }

    pub(super) fn bump(&mut self) -> Token {
        let token = self.current().clone();
        if self.cursor + 1 < self.tokens.len() {
            self.cursor += 1;
        }
        token
    }

    pub(super) fn at(&self, kind: &TokenKind) -> bool {
        self.current_kind() == kind
    }

    pub(super) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(super) fn expect(&mut self, kind: &TokenKind) -> CompileResult<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.unexpected())
        }
    }

    pub(super) fn alloc(&mut self, kind: NodeKind, span: Span) -> ExprId {
        let id = ExprId::from_index(self.nodes.len());
        self.nodes.push(Node { kind, span });
        id
    }

    pub(super) fn span_of(&self, id: ExprId) -> Span {
        self.nodes[id.index()].span
    }

    pub(super) fn kind_of(&self, id: ExprId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    /// Span from `start` to the end of the last consumed token
    pub(super) fn since(&self, start: Span) -> Span {
        start.join(self.previous_span())
    }

    pub(super) fn error_at(&self, span: Span, message: impl Into<String>) -> CompileError {
        CompileError::Syntax(self.source.diagnostic(span, message))
    }

    /// Generic error quoting the current token
    pub(super) fn unexpected(&self) -> CompileError {
        let token = self.current();
        if token.kind == TokenKind::Eof {
            return self.error_at(token.span, "Syntax error at end of input");
        }
        let text = self.source.slice(token.span);
        let shown = if text.is_empty() {
            token.kind.to_string()
        } else {
            text.lines().next().unwrap_or(text).to_string()
        };
        self.error_at(token.span, format!("Syntax error at '{}'", shown))
    }

    /// Whether the current token is on the same line as the previous one
    pub(super) fn same_line(&self) -> bool {
        self.cursor > 0 && self.tokens[self.cursor - 1].line == self.current().line
    }

    /// Whether the token at `ahead` can start a value
    pub(super) fn starts_value(&self, ahead: usize) -> bool {
        matches!(
            self.peek_kind(ahead),
            TokenKind::String(_)
                | TokenKind::DqPre(_)
                | TokenKind::Heredoc(_)
                | TokenKind::Variable(_)
                | TokenKind::Number(_)
                | TokenKind::Name(_)
                | TokenKind::ClassRef(_)
                | TokenKind::ListStart
                | TokenKind::Boolean(_)
                | TokenKind::Undef
                | TokenKind::Regex(_)
        )
    }

    /// Attribute or parameter name: plain names, keywords and reserved words
    pub(super) fn attribute_name(&mut self) -> CompileResult<String> {
        let name = match self.current_kind() {
            TokenKind::Name(name) | TokenKind::Reserved(name) => name.clone(),
            kind => match kind.keyword_text() {
                Some(word) => word.to_string(),
                None => return Err(self.unexpected()),
            },
        };
        self.bump();
        Ok(name)
    }

    pub(super) fn doc_for(&self, keyword_index: usize) -> Option<String> {
        self.docs.get(&keyword_index).cloned()
    }
}
