use super::*;

const PREC_NOT: u8 = 7;
const PREC_NEG: u8 = 19;
const PREC_QUERY_VALUE: u8 = 11;

enum Infix {
    Assign(AssignOp),
    Binary(BinaryOp),
    And,
    Or,
}

impl Parser {
    pub(super) fn parse_expression(&mut self) -> CompileResult<ExprId> {
        self.parse_expression_bp(0)
    }

    /// Value on the right of a collector query comparison
    pub(super) fn parse_query_value(&mut self) -> CompileResult<ExprId> {
        self.parse_expression_bp(PREC_QUERY_VALUE)
    }

    fn parse_expression_bp(&mut self, min_bp: u8) -> CompileResult<ExprId> {
        let start = self.current_span();
        let mut lhs = match self.current_kind() {
            TokenKind::Not => {
                self.bump();
                let operand = self.parse_expression_bp(PREC_NOT)?;
                self.alloc(
                    NodeKind::Unary {
                        op: UnaryOp::Not,
                        operand,
                    },
                    self.since(start),
                )
            }
            TokenKind::Minus => {
                self.bump();
                let operand = self.parse_expression_bp(PREC_NEG)?;
                self.alloc(
                    NodeKind::Unary {
                        op: UnaryOp::Neg,
                        operand,
                    },
                    self.since(start),
                )
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)?
            }
        };

        while let Some((left_bp, right_bp, infix)) = self.infix_binding_power() {
            if left_bp < min_bp {
                break;
            }
            let operator = self.bump();
            if let Infix::Assign(_) = infix {
                if !matches!(self.kind_of(lhs), NodeKind::Variable(_)) {
                    return Err(self.error_at(
                        operator.span,
                        format!(
                            "Illegal attempt to assign to '{}'",
                            self.source.slice(self.span_of(lhs))
                        ),
                    ));
                }
            }
            let rhs = self.parse_expression_bp(right_bp)?;
            let span = self.span_of(lhs).join(self.span_of(rhs));
            let kind = match infix {
                Infix::Assign(op) => NodeKind::Assign {
                    op,
                    target: lhs,
                    value: rhs,
                },
                Infix::Binary(op) => NodeKind::Binary {
                    op,
                    left: lhs,
                    right: rhs,
                },
                Infix::And => NodeKind::And(lhs, rhs),
                Infix::Or => NodeKind::Or(lhs, rhs),
            };
            lhs = self.alloc(kind, span);
        }
        Ok(lhs)
    }

    fn infix_binding_power(&self) -> Option<(u8, u8, Infix)> {
        Some(match self.current_kind() {
            TokenKind::Assign => (2, 1, Infix::Assign(AssignOp::Set)),
            TokenKind::AppendAssign => (2, 1, Infix::Assign(AssignOp::Append)),
            TokenKind::DeleteAssign => (2, 1, Infix::Assign(AssignOp::Delete)),
            TokenKind::Or => (3, 4, Infix::Or),
            TokenKind::And => (5, 6, Infix::And),
            TokenKind::IsEqual => (9, 10, Infix::Binary(BinaryOp::Eq)),
            TokenKind::NotEqual => (9, 10, Infix::Binary(BinaryOp::Ne)),
            TokenKind::Match => (9, 10, Infix::Binary(BinaryOp::Match)),
            TokenKind::NoMatch => (9, 10, Infix::Binary(BinaryOp::NoMatch)),
            TokenKind::LessThan => (11, 12, Infix::Binary(BinaryOp::Lt)),
            TokenKind::LessEqual => (11, 12, Infix::Binary(BinaryOp::Le)),
            TokenKind::GreaterThan => (11, 12, Infix::Binary(BinaryOp::Gt)),
            TokenKind::GreaterEqual => (11, 12, Infix::Binary(BinaryOp::Ge)),
            TokenKind::In => (11, 12, Infix::Binary(BinaryOp::In)),
            TokenKind::LShift => (13, 14, Infix::Binary(BinaryOp::Shl)),
            TokenKind::RShift => (13, 14, Infix::Binary(BinaryOp::Shr)),
            TokenKind::Plus => (15, 16, Infix::Binary(BinaryOp::Add)),
            TokenKind::Minus => (15, 16, Infix::Binary(BinaryOp::Sub)),
            TokenKind::Times => (17, 18, Infix::Binary(BinaryOp::Mul)),
            TokenKind::Div => (17, 18, Infix::Binary(BinaryOp::Div)),
            TokenKind::Modulo => (17, 18, Infix::Binary(BinaryOp::Mod)),
            _ => return None,
        })
    }

    /// Access, method calls and selectors
    pub(super) fn parse_postfix(&mut self, mut expr: ExprId) -> CompileResult<ExprId> {
        loop {
            let start = self.span_of(expr);
            match self.current_kind() {
                TokenKind::LBrack => {
                    self.bump();
                    let keys = self.parse_items(&TokenKind::RBrack)?;
                    self.expect(&TokenKind::RBrack)?;
                    expr = self.alloc(NodeKind::Access { target: expr, keys }, self.since(start));
                }
                TokenKind::Dot => {
                    self.bump();
                    let TokenKind::Name(name) = self.current_kind().clone() else {
                        return Err(self.unexpected());
                    };
                    self.bump();
                    let args = if self.eat(&TokenKind::LParen) {
                        let args = self.parse_items(&TokenKind::RParen)?;
                        self.expect(&TokenKind::RParen)?;
                        args
                    } else {
                        Vec::new()
                    };
                    let lambda = self.parse_optional_lambda()?;
                    expr = self.alloc(
                        NodeKind::MethodCall {
                            receiver: expr,
                            name,
                            args,
                            lambda,
                        },
                        self.since(start),
                    );
                }
                TokenKind::Question => {
                    self.bump();
                    self.expect(&TokenKind::SelBrace)?;
                    let mut cases = Vec::new();
                    while !self.at(&TokenKind::RBrace) {
                        let key = self.parse_expression()?;
                        self.expect(&TokenKind::Farrow)?;
                        let value = self.parse_expression()?;
                        cases.push((key, value));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBrace)?;
                    expr = self.alloc(
                        NodeKind::Selector {
                            subject: expr,
                            cases,
                        },
                        self.since(start),
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    pub(super) fn parse_primary(&mut self) -> CompileResult<ExprId> {
        let start = self.current_span();
        let kind = self.current_kind().clone();
        match kind {
            TokenKind::Variable(name) => {
                self.bump();
                Ok(self.alloc(NodeKind::Variable(name), start))
            }
            TokenKind::Number(text) => {
                self.bump();
                let value = self.number(&text, start)?;
                Ok(self.alloc(value, start))
            }
            TokenKind::String(text) => {
                self.bump();
                Ok(self.alloc(NodeKind::Str(text), start))
            }
            TokenKind::DqPre(_) => self.parse_interpolated(),
            TokenKind::Heredoc(syntax) => {
                self.bump();
                let text = match self.current_kind() {
                    TokenKind::String(text) => {
                        let text = text.clone();
                        let span = self.bump().span;
                        self.alloc(NodeKind::Str(text), span)
                    }
                    TokenKind::DqPre(_) => self.parse_interpolated()?,
                    _ => return Err(self.unexpected()),
                };
                Ok(self.alloc(NodeKind::Heredoc { syntax, text }, self.since(start)))
            }
            TokenKind::Regex(pattern) => {
                self.bump();
                Ok(self.alloc(NodeKind::Regex(pattern), start))
            }
            TokenKind::Boolean(value) => {
                self.bump();
                Ok(self.alloc(NodeKind::Boolean(value), start))
            }
            TokenKind::Undef => {
                self.bump();
                Ok(self.alloc(NodeKind::Undef, start))
            }
            TokenKind::Default => {
                self.bump();
                Ok(self.alloc(NodeKind::Default, start))
            }
            TokenKind::ListStart | TokenKind::LBrack => {
                self.bump();
                let items = self.parse_items(&TokenKind::RBrack)?;
                self.expect(&TokenKind::RBrack)?;
                Ok(self.alloc(NodeKind::List(items), self.since(start)))
            }
            TokenKind::LBrace => self.parse_hash(),
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::ClassRef(name) => {
                self.bump();
                Ok(self.alloc(NodeKind::TypeRef(name), start))
            }
            TokenKind::Name(name) => self.parse_name(name),
            TokenKind::If => self.parse_if(),
            TokenKind::Unless => self.parse_unless(),
            TokenKind::Case => self.parse_case(),
            TokenKind::Reserved(word) => Err(self.error_at(
                start,
                format!(
                    "Use of reserved word: {}, reserved words are not allowed here",
                    word
                ),
            )),
            _ => Err(self.unexpected()),
        }
    }

    /// A bare name, a call with parentheses, or an illegal call without them
    fn parse_name(&mut self, name: String) -> CompileResult<ExprId> {
        let start = self.bump().span;
        if self.at(&TokenKind::LParen) {
            self.bump();
            let args = self.parse_items(&TokenKind::RParen)?;
            self.expect(&TokenKind::RParen)?;
            let lambda = self.parse_optional_lambda()?;
            return Ok(self.alloc(
                NodeKind::Call {
                    name,
                    args,
                    lambda,
                    bare: false,
                },
                self.since(start),
            ));
        }
        if self.same_line() && self.starts_value(0) {
            return Err(self.error_at(
                start,
                format!("Function '{}' must be called with parentheses", name),
            ));
        }
        Ok(self.alloc(NodeKind::Name(name), start))
    }

    fn parse_optional_lambda(&mut self) -> CompileResult<Option<ExprId>> {
        if !self.at(&TokenKind::Pipe) {
            return Ok(None);
        }
        let start = self.bump().span;
        let params = self.parse_parameters(&TokenKind::Pipe, ParamOwner::Lambda)?;
        let body = self.parse_block()?;
        Ok(Some(self.alloc(NodeKind::Lambda { params, body }, self.since(start))))
    }

    /// Comma separated values up to `close`; runs of `key => value` entries
    /// become one embedded hash
    pub(super) fn parse_items(&mut self, close: &TokenKind) -> CompileResult<Vec<ExprId>> {
        let mut items = Vec::new();
        let mut pending: Vec<(ExprId, ExprId)> = Vec::new();
        while !self.at(close) {
            let key = self.parse_hash_key()?;
            if self.eat(&TokenKind::Farrow) {
                let value = self.parse_expression()?;
                pending.push((key, value));
            } else {
                self.flush_entries(&mut items, &mut pending);
                items.push(key);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.flush_entries(&mut items, &mut pending);
        Ok(items)
    }

    fn flush_entries(&mut self, items: &mut Vec<ExprId>, pending: &mut Vec<(ExprId, ExprId)>) {
        if pending.is_empty() {
            return;
        }
        let entries = std::mem::take(pending);
        let span = self.span_of(entries[0].0).join(self.span_of(entries[entries.len() - 1].1));
        items.push(self.alloc(NodeKind::Hash(entries), span));
    }

    /// A hash key; reserved words followed by `=>` are plain strings
    fn parse_hash_key(&mut self) -> CompileResult<ExprId> {
        if let TokenKind::Reserved(word) = self.current_kind() {
            if self.peek_kind(1) == &TokenKind::Farrow {
                let word = word.clone();
                let span = self.bump().span;
                return Ok(self.alloc(NodeKind::Str(word), span));
            }
        }
        self.parse_expression()
    }

    fn parse_hash(&mut self) -> CompileResult<ExprId> {
        let start = self.expect(&TokenKind::LBrace)?.span;
        let mut entries = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let key = self.parse_hash_key()?;
            self.expect(&TokenKind::Farrow)?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(self.alloc(NodeKind::Hash(entries), self.since(start)))
    }

    /// `"text ${expr} text"` as a concatenation of literal and value parts
    fn parse_interpolated(&mut self) -> CompileResult<ExprId> {
        let start = self.current_span();
        let mut parts = Vec::new();
        let TokenKind::DqPre(text) = self.current_kind().clone() else {
            return Err(self.unexpected());
        };
        let span = self.bump().span;
        if !text.is_empty() {
            parts.push(self.alloc(NodeKind::Str(text), span));
        }
        loop {
            self.interpolation_variable();
            let expr = self.parse_expression()?;
            parts.push(expr);
            match self.current_kind().clone() {
                TokenKind::DqMid(text) => {
                    let span = self.bump().span;
                    if !text.is_empty() {
                        parts.push(self.alloc(NodeKind::Str(text), span));
                    }
                }
                TokenKind::DqPost(text) => {
                    let span = self.bump().span;
                    if !text.is_empty() {
                        parts.push(self.alloc(NodeKind::Str(text), span));
                    }
                    break;
                }
                _ => return Err(self.unexpected()),
            }
        }
        Ok(self.alloc(NodeKind::Concat(parts), self.since(start)))
    }

    /// Inside `${}` a name or number that stands alone, or is the left side
    /// of an access or method call, refers to a variable
    fn interpolation_variable(&mut self) {
        let index = self.cursor.min(self.tokens.len() - 1);
        let variable_position = matches!(
            self.peek_kind(1),
            TokenKind::DqMid(_) | TokenKind::DqPost(_) | TokenKind::LBrack | TokenKind::Dot
        );
        if !variable_position {
            return;
        }
        let replacement = match &self.tokens[index].kind {
            TokenKind::Name(name) | TokenKind::Number(name) => Some(TokenKind::Variable(name.clone())),
            _ => None,
        };
        if let Some(kind) = replacement {
            self.tokens[index].kind = kind;
        }
    }

    fn number(&self, text: &str, span: Span) -> CompileResult<NodeKind> {
        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok().map(NodeKind::Integer)
        } else if text.contains(['.', 'e', 'E']) {
            text.parse::<f64>().ok().map(NodeKind::Float)
        } else if text.len() > 1 && text.starts_with('0') {
            i64::from_str_radix(&text[1..], 8).ok().map(NodeKind::Integer)
        } else {
            text.parse::<i64>().ok().map(NodeKind::Integer)
        };
        parsed.ok_or_else(|| self.error_at(span, format!("Number out of range: {}", text)))
    }
}
