use super::*;

impl Parser {
    pub(super) fn parse_class(&mut self) -> CompileResult<ExprId> {
        let keyword = self.cursor;
        let start = self.bump().span;
        let name = self.definition_name()?;
        let params = self.parse_parameter_list(ParamOwner::Class)?;
        let parent = if self.eat(&TokenKind::Inherits) {
            Some(self.definition_name()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        let definition = Definition {
            name,
            params,
            parent,
            body,
            doc: self.doc_for(keyword),
        };
        Ok(self.alloc(NodeKind::Class(definition), self.since(start)))
    }

    pub(super) fn parse_define(&mut self) -> CompileResult<ExprId> {
        let keyword = self.cursor;
        let start = self.bump().span;
        let name = self.definition_name()?;
        let params = self.parse_parameter_list(ParamOwner::Define)?;
        let body = self.parse_block()?;
        let definition = Definition {
            name,
            params,
            parent: None,
            body,
            doc: self.doc_for(keyword),
        };
        Ok(self.alloc(NodeKind::Define(definition), self.since(start)))
    }

    pub(super) fn parse_function(&mut self) -> CompileResult<ExprId> {
        let keyword = self.cursor;
        let start = self.bump().span;
        let name = self.definition_name()?;
        let params = self.parse_parameter_list(ParamOwner::Function)?;
        let body = self.parse_block()?;
        let definition = Definition {
            name,
            params,
            parent: None,
            body,
            doc: self.doc_for(keyword),
        };
        Ok(self.alloc(NodeKind::Function(definition), self.since(start)))
    }

    pub(super) fn parse_node(&mut self) -> CompileResult<ExprId> {
        let keyword = self.cursor;
        let start = self.bump().span;
        let mut matchers = vec![self.host_matcher()?];
        while self.eat(&TokenKind::Comma) {
            if self.at(&TokenKind::LBrace) {
                break;
            }
            matchers.push(self.host_matcher()?);
        }
        let parent = if self.eat(&TokenKind::Inherits) {
            Some(self.host_matcher()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(self.alloc(
            NodeKind::NodeDefinition {
                matchers,
                parent,
                body,
                doc: self.doc_for(keyword),
            },
            self.since(start),
        ))
    }

    pub(super) fn parse_import(&mut self) -> CompileResult<ExprId> {
        let start = self.bump().span;
        let mut files = Vec::new();
        loop {
            let TokenKind::String(file) = self.current_kind().clone() else {
                return Err(self.unexpected());
            };
            self.bump();
            files.push(file);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(self.alloc(NodeKind::Import(files), self.since(start)))
    }

    /// Parameters after an opening `(` or `|`, consuming the closer
    pub(super) fn parse_parameters(
        &mut self,
        close: &TokenKind,
        owner: ParamOwner,
    ) -> CompileResult<Vec<Parameter>> {
        let mut params: Vec<Parameter> = Vec::new();
        while !self.at(close) {
            params.push(self.parse_parameter()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;

        for (index, param) in params.iter().enumerate() {
            if !param.captures_rest {
                continue;
            }
            if !owner.accepts_rest() {
                return Err(self.error_at(
                    param.span,
                    format!(
                        "Parameter ${} has 'captures rest' - not supported in a '{}'",
                        param.name,
                        owner.label()
                    ),
                ));
            }
            if index + 1 != params.len() {
                return Err(self.error_at(
                    param.span,
                    format!(
                        "Parameter ${} is not last, and has 'captures rest'",
                        param.name
                    ),
                ));
            }
        }
        for (index, param) in params.iter().enumerate() {
            if params[..index].iter().any(|p| p.name == param.name) {
                return Err(self.error_at(
                    param.span,
                    format!(
                        "The parameter '{}' is declared more than once in the parameter list",
                        param.name
                    ),
                ));
            }
        }
        Ok(params)
    }

    fn parse_parameter(&mut self) -> CompileResult<Parameter> {
        let start = self.current_span();
        let type_expr = if matches!(self.current_kind(), TokenKind::ClassRef(_)) {
            let primary = self.parse_primary()?;
            Some(self.parse_postfix(primary)?)
        } else {
            None
        };
        let captures_rest = self.eat(&TokenKind::Times);
        let TokenKind::Variable(name) = self.current_kind().clone() else {
            return Err(self.unexpected());
        };
        self.bump();
        let default = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Parameter {
            name,
            type_expr,
            default,
            captures_rest,
            span: self.since(start),
        })
    }

    /// Optional `(params)` after a definition name
    fn parse_parameter_list(&mut self, owner: ParamOwner) -> CompileResult<Vec<Parameter>> {
        if self.eat(&TokenKind::LParen) {
            self.parse_parameters(&TokenKind::RParen, owner)
        } else {
            Ok(Vec::new())
        }
    }

    fn definition_name(&mut self) -> CompileResult<String> {
        match self.current_kind().clone() {
            TokenKind::Name(name) => {
                self.bump();
                Ok(name)
            }
            TokenKind::Reserved(word) => Err(self.error_at(
                self.current_span(),
                format!(
                    "Use of reserved word: {}, reserved words are not allowed here",
                    word
                ),
            )),
            _ => Err(self.unexpected()),
        }
    }

    /// Host name, quoted name, regex or `default`; dotted bare names join
    fn host_matcher(&mut self) -> CompileResult<HostMatcher> {
        match self.current_kind().clone() {
            TokenKind::String(name) => {
                self.bump();
                Ok(HostMatcher::Name(name))
            }
            TokenKind::Regex(pattern) => {
                self.bump();
                Ok(HostMatcher::Regex(pattern))
            }
            TokenKind::Default => {
                self.bump();
                Ok(HostMatcher::Default)
            }
            TokenKind::Name(first) => {
                self.bump();
                let mut name = first;
                while self.at(&TokenKind::Dot) {
                    self.bump();
                    match self.current_kind().clone() {
                        TokenKind::Name(part) | TokenKind::Number(part) => {
                            self.bump();
                            name.push('.');
                            name.push_str(&part);
                        }
                        _ => return Err(self.unexpected()),
                    }
                }
                Ok(HostMatcher::Name(name))
            }
            _ => Err(self.unexpected()),
        }
    }
}
