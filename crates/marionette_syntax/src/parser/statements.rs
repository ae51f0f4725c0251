use super::*;

impl Parser {
    /// Statements up to a closing brace or end of input
    pub(super) fn parse_statements(&mut self) -> CompileResult<Vec<ExprId>> {
        let mut statements = Vec::new();
        loop {
            while matches!(
                self.current_kind(),
                TokenKind::Semic | TokenKind::EppEnd | TokenKind::EppEndTrim
            ) {
                self.bump();
            }
            if matches!(self.current_kind(), TokenKind::RBrace | TokenKind::Eof) {
                return Ok(statements);
            }
            statements.push(self.parse_statement()?);
        }
    }

    /// `{ statements }`
    pub(super) fn parse_block(&mut self) -> CompileResult<ExprId> {
        let start = self.expect(&TokenKind::LBrace)?.span;
        let statements = self.parse_statements()?;
        self.expect(&TokenKind::RBrace)?;
        Ok(self.alloc(NodeKind::Block(statements), self.since(start)))
    }

    fn parse_statement(&mut self) -> CompileResult<ExprId> {
        let start = self.current_span();
        match self.current_kind().clone() {
            TokenKind::RenderString(text) => {
                self.bump();
                Ok(self.alloc(NodeKind::RenderString(text), start))
            }
            TokenKind::RenderExpr => {
                self.bump();
                let expr = self.parse_expression()?;
                if !self.eat(&TokenKind::EppEnd) && !self.eat(&TokenKind::EppEndTrim) {
                    return Err(self.unexpected());
                }
                Ok(self.alloc(NodeKind::RenderExpr(expr), self.since(start)))
            }
            TokenKind::Class if self.peek_kind(1) != &TokenKind::LBrace => self.parse_class(),
            TokenKind::Define => self.parse_define(),
            TokenKind::Function => self.parse_function(),
            TokenKind::Node => self.parse_node(),
            TokenKind::Import => self.parse_import(),
            _ => self.parse_chain(),
        }
    }

    /// Chain operands joined by relationship arrows, left associative
    fn parse_chain(&mut self) -> CompileResult<ExprId> {
        let mut left = self.parse_chain_operand()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::InEdge => RelationshipOp::Before,
                TokenKind::InEdgeSub => RelationshipOp::Notify,
                TokenKind::OutEdge => RelationshipOp::Require,
                TokenKind::OutEdgeSub => RelationshipOp::Subscribe,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_chain_operand()?;
            let span = self.span_of(left).join(self.span_of(right));
            left = self.alloc(NodeKind::Relationship { op, left, right }, span);
        }
    }

    fn parse_chain_operand(&mut self) -> CompileResult<ExprId> {
        let start = self.current_span();
        match self.current_kind().clone() {
            TokenKind::At | TokenKind::AtAt => {
                let form = if self.bump().kind == TokenKind::At {
                    ResourceForm::Virtual
                } else {
                    ResourceForm::Exported
                };
                match (self.current_kind().clone(), self.peek_kind(1).clone()) {
                    (TokenKind::Name(name), TokenKind::LBrace) => {
                        self.bump();
                        self.parse_resource(form, name, start)
                    }
                    (TokenKind::Class, TokenKind::LBrace) => {
                        self.bump();
                        self.parse_resource(form, "class".to_string(), start)
                    }
                    (TokenKind::ClassRef(_), TokenKind::LBrace) => {
                        Err(self.error_at(start, "Resource defaults are not virtualizable"))
                    }
                    (TokenKind::ClassRef(_), TokenKind::LBrack) => {
                        Err(self.error_at(start, "Resource overrides are not virtualizable"))
                    }
                    _ => Err(self.unexpected()),
                }
            }
            TokenKind::Name(name) if self.peek_kind(1) == &TokenKind::LBrace => {
                self.bump();
                self.parse_resource(ResourceForm::Regular, name, start)
            }
            TokenKind::Class if self.peek_kind(1) == &TokenKind::LBrace => {
                self.bump();
                self.parse_resource(ResourceForm::Regular, "class".to_string(), start)
            }
            TokenKind::Name(name)
                if STATEMENT_CALLS.contains(&name.as_str())
                    && self.peek_token(1).line == self.current().line
                    && self.starts_value(1) =>
            {
                self.bump();
                let mut args = vec![self.parse_expression()?];
                while self.eat(&TokenKind::Comma) {
                    args.push(self.parse_expression()?);
                }
                Ok(self.alloc(
                    NodeKind::Call {
                        name,
                        args,
                        lambda: None,
                        bare: true,
                    },
                    self.since(start),
                ))
            }
            TokenKind::ClassRef(type_name) if self.peek_kind(1) == &TokenKind::LBrace => {
                self.bump();
                let ops = self.parse_attribute_block()?;
                Ok(self.alloc(
                    NodeKind::ResourceDefaults { type_name, ops },
                    self.since(start),
                ))
            }
            TokenKind::ClassRef(type_name)
                if matches!(
                    self.peek_kind(1),
                    TokenKind::LCollect | TokenKind::LLCollect
                ) =>
            {
                self.bump();
                self.parse_collector(type_name, start)
            }
            _ => {
                let expr = self.parse_expression()?;
                let is_reference = matches!(
                    self.kind_of(expr),
                    NodeKind::Access { target, .. }
                        if matches!(self.kind_of(*target), NodeKind::TypeRef(_))
                );
                if is_reference && self.at(&TokenKind::LBrace) {
                    let ops = self.parse_attribute_block()?;
                    return Ok(self.alloc(
                        NodeKind::ResourceOverride { target: expr, ops },
                        self.since(start),
                    ));
                }
                Ok(expr)
            }
        }
    }

    /// `{ title: attrs; title: attrs }` after the type name
    fn parse_resource(
        &mut self,
        form: ResourceForm,
        type_name: String,
        start: Span,
    ) -> CompileResult<ExprId> {
        self.expect(&TokenKind::LBrace)?;
        let mut bodies = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let body_start = self.current_span();
            let title = self.parse_expression()?;
            self.expect(&TokenKind::Colon)?;
            let ops = self.parse_attribute_ops()?;
            bodies.push(ResourceBody {
                title,
                ops,
                span: self.since(body_start),
            });
            if !self.eat(&TokenKind::Semic) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(self.alloc(
            NodeKind::Resource {
                form,
                type_name,
                bodies,
            },
            self.since(start),
        ))
    }

    fn parse_attribute_block(&mut self) -> CompileResult<Vec<AttributeOp>> {
        self.expect(&TokenKind::LBrace)?;
        let ops = self.parse_attribute_ops()?;
        self.expect(&TokenKind::RBrace)?;
        Ok(ops)
    }

    /// `name => value, name +> value` up to `;` or `}`
    fn parse_attribute_ops(&mut self) -> CompileResult<Vec<AttributeOp>> {
        let mut ops = Vec::new();
        while !matches!(self.current_kind(), TokenKind::RBrace | TokenKind::Semic) {
            let start = self.current_span();
            let name = self.attribute_name()?;
            let op = match self.current_kind() {
                TokenKind::Farrow => AttributeOpKind::Set,
                TokenKind::PlusArrow => AttributeOpKind::Append,
                _ => return Err(self.unexpected()),
            };
            self.bump();
            let value = self.parse_expression()?;
            ops.push(AttributeOp {
                name,
                op,
                value,
                span: self.since(start),
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(ops)
    }

    fn parse_collector(&mut self, type_name: String, start: Span) -> CompileResult<ExprId> {
        let exported = self.bump().kind == TokenKind::LLCollect;
        let close = if exported {
            TokenKind::RRCollect
        } else {
            TokenKind::RCollect
        };
        let query = if self.at(&close) {
            None
        } else {
            Some(self.parse_query_or()?)
        };
        self.expect(&close)?;
        let ops = if self.at(&TokenKind::LBrace) {
            self.parse_attribute_block()?
        } else {
            Vec::new()
        };
        Ok(self.alloc(
            NodeKind::Collect {
                type_name,
                exported,
                query,
                ops,
            },
            self.since(start),
        ))
    }

    fn parse_query_or(&mut self) -> CompileResult<ExprId> {
        let mut left = self.parse_query_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_query_and()?;
            let span = self.span_of(left).join(self.span_of(right));
            left = self.alloc(
                NodeKind::Query {
                    op: QueryOp::Or,
                    left,
                    right,
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_query_and(&mut self) -> CompileResult<ExprId> {
        let mut left = self.parse_query_term()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_query_term()?;
            let span = self.span_of(left).join(self.span_of(right));
            left = self.alloc(
                NodeKind::Query {
                    op: QueryOp::And,
                    left,
                    right,
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_query_term(&mut self) -> CompileResult<ExprId> {
        if self.eat(&TokenKind::LParen) {
            let inner = self.parse_query_or()?;
            self.expect(&TokenKind::RParen)?;
            return Ok(inner);
        }
        let start = self.current_span();
        let name = self.attribute_name()?;
        let attribute = self.alloc(NodeKind::Name(name), start);
        let op = match self.current_kind() {
            TokenKind::IsEqual => QueryOp::Eq,
            TokenKind::NotEqual => QueryOp::Ne,
            _ => return Err(self.unexpected()),
        };
        self.bump();
        let value = self.parse_query_value()?;
        Ok(self.alloc(
            NodeKind::Query {
                op,
                left: attribute,
                right: value,
            },
            self.since(start),
        ))
    }

    pub(super) fn parse_if(&mut self) -> CompileResult<ExprId> {
        let start = self.bump().span;
        let condition = self.parse_expression()?;
        let then = self.parse_block()?;
        let otherwise = match self.current_kind() {
            TokenKind::Elsif => Some(self.parse_if()?),
            TokenKind::Else => {
                self.bump();
                Some(self.parse_block()?)
            }
            _ => None,
        };
        Ok(self.alloc(
            NodeKind::If {
                condition,
                then,
                otherwise,
            },
            self.since(start),
        ))
    }

    pub(super) fn parse_unless(&mut self) -> CompileResult<ExprId> {
        let start = self.bump().span;
        let condition = self.parse_expression()?;
        let then = self.parse_block()?;
        let otherwise = if self.eat(&TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(self.alloc(
            NodeKind::Unless {
                condition,
                then,
                otherwise,
            },
            self.since(start),
        ))
    }

    pub(super) fn parse_case(&mut self) -> CompileResult<ExprId> {
        let start = self.bump().span;
        let subject = self.parse_expression()?;
        self.expect(&TokenKind::LBrace)?;
        let mut branches = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let mut options = vec![self.parse_expression()?];
            while self.eat(&TokenKind::Comma) {
                options.push(self.parse_expression()?);
            }
            self.expect(&TokenKind::Colon)?;
            let body = self.parse_block()?;
            branches.push(CaseBranch { options, body });
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(self.alloc(NodeKind::Case { subject, branches }, self.since(start)))
    }
}
