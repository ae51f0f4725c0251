//! Recursive-descent parser.
//!
//! Expressions are parsed with binding powers; statements add the resource
//! family, relationship chains, definitions and calls without parentheses.
//! The first grammar violation aborts the parse with a positioned
//! [`CompileError::Syntax`].

mod definitions;
mod expressions;
mod statements;
mod support;

use crate::ast::{
    AssignOp, AttributeOp, AttributeOpKind, Ast, BinaryOp, CaseBranch, Definition, ExprId,
    HostMatcher, Node, NodeKind, Parameter, QueryOp, RelationshipOp, ResourceBody, ResourceForm,
    UnaryOp,
};
use crate::lexer::{TokenStream, lex, lex_template};
use crate::token::{Token, TokenKind};
use indexmap::IndexMap;
use marionette_core::{CompileError, CompileResult, Diagnostic, SourceFile, Span};
use std::sync::Arc;

/// Functions that may be called without parentheses in statement position
pub const STATEMENT_CALLS: &[&str] = &[
    "include", "require", "contain", "realize", "tag", "notice", "info", "warning", "err",
    "debug", "alert", "crit", "emerg", "fail",
];

/// Parse a manifest
///
/// # Errors
///
/// Returns the lex error or the first syntax error
pub fn parse(source: Arc<SourceFile>) -> CompileResult<Ast> {
    let stream = lex(&source)?;
    let mut parser = Parser::new(stream, source);
    let root = parser.parse_program()?;
    Ok(parser.finish(root))
}

/// Parse a text template with an optional leading `|$param|` list
///
/// # Errors
///
/// Returns the lex error or the first syntax error
pub fn parse_template(source: Arc<SourceFile>) -> CompileResult<Ast> {
    let stream = lex_template(&source)?;
    let mut parser = Parser::new(stream, source);
    let root = parser.parse_template_program()?;
    Ok(parser.finish(root))
}

/// Which definition a parameter list belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamOwner {
    Class,
    Define,
    Function,
    Lambda,
    Template,
}

impl ParamOwner {
    fn accepts_rest(self) -> bool {
        !matches!(self, Self::Class | Self::Define)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Class => "Class",
            Self::Define => "Define",
            Self::Function => "Function",
            Self::Lambda => "Lambda",
            Self::Template => "Template",
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    docs: IndexMap<usize, String>,
    warnings: Vec<Diagnostic>,
    cursor: usize,
    nodes: Vec<Node>,
    source: Arc<SourceFile>,
}

impl Parser {
    fn new(stream: TokenStream, source: Arc<SourceFile>) -> Self {
        let mut tokens = stream.tokens;
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let end = source.text().len();
            let position = source.position(end);
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: Span::new(end, 0),
                line: position.line,
                column: position.column,
            });
        }
        Self {
            tokens,
            docs: stream.docs,
            warnings: stream.warnings,
            cursor: 0,
            nodes: Vec::new(),
            source,
        }
    }

    fn finish(self, root: ExprId) -> Ast {
        tracing::debug!(
            nodes = self.nodes.len(),
            file = ?self.source.name(),
            "parsed source"
        );
        Ast::new(self.nodes, root, self.source, self.warnings)
    }

    fn parse_program(&mut self) -> CompileResult<ExprId> {
        let start = self.current_span();
        let statements = self.parse_statements()?;
        if !self.at(&TokenKind::Eof) {
            return Err(self.unexpected());
        }
        Ok(self.alloc(NodeKind::Block(statements), start.join(self.previous_span())))
    }

    fn parse_template_program(&mut self) -> CompileResult<ExprId> {
        let start = self.current_span();
        let leading_blank = matches!(self.current_kind(), TokenKind::RenderString(text) if text.trim().is_empty())
            && self.peek_kind(1) == &TokenKind::Pipe;
        if leading_blank {
            self.bump();
        }
        let params = if self.at(&TokenKind::Pipe) {
            self.bump();
            Some(self.parse_parameters(&TokenKind::Pipe, ParamOwner::Template)?)
        } else {
            None
        };
        let body_start = self.current_span();
        let statements = self.parse_statements()?;
        if !self.at(&TokenKind::Eof) {
            return Err(self.unexpected());
        }
        let body = self.alloc(
            NodeKind::Block(statements),
            body_start.join(self.previous_span()),
        );
        Ok(self.alloc(
            NodeKind::Template { params, body },
            start.join(self.previous_span()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ast(text: &str) -> Ast {
        parse(Arc::new(SourceFile::inline(text))).unwrap()
    }

    fn error(text: &str) -> CompileError {
        parse(Arc::new(SourceFile::inline(text))).unwrap_err()
    }

    fn first(ast: &Ast) -> &NodeKind {
        ast.kind(ast.statements()[0])
    }

    #[test]
    fn test_assignment_and_precedence() {
        let ast = ast("$a = 2 + 3 * 4");
        let NodeKind::Assign { op, target, value } = first(&ast) else {
            panic!("expected assignment");
        };
        assert_eq!(*op, AssignOp::Set);
        assert_eq!(ast.kind(*target), &NodeKind::Variable("a".into()));
        let NodeKind::Binary { op, right, .. } = ast.kind(*value) else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(ast.kind(*right), NodeKind::Binary { op: BinaryOp::Mul, .. }));
        assert_eq!(ast.text(*value), "2 + 3 * 4");
    }

    #[test]
    fn test_not_binds_looser_than_comparison() {
        let ast = ast("$x = !$a == $b");
        let NodeKind::Assign { value, .. } = first(&ast) else {
            panic!("expected assignment");
        };
        let NodeKind::Unary { op, operand } = ast.kind(*value) else {
            panic!("expected unary");
        };
        assert_eq!(*op, UnaryOp::Not);
        assert!(matches!(ast.kind(*operand), NodeKind::Binary { op: BinaryOp::Eq, .. }));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let ast = ast("$x = $a or $b and $c");
        let NodeKind::Assign { value, .. } = first(&ast) else {
            panic!("expected assignment");
        };
        let NodeKind::Or(_, right) = ast.kind(*value) else {
            panic!("expected or");
        };
        assert!(matches!(ast.kind(*right), NodeKind::And(_, _)));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let ast = ast("$a = $b = 1");
        let NodeKind::Assign { value, .. } = first(&ast) else {
            panic!("expected assignment");
        };
        assert!(matches!(ast.kind(*value), NodeKind::Assign { .. }));
    }

    #[test]
    fn test_list_with_keyed_entries() {
        let ast = ast("$a = [1, a => 2, b => 3, 4]");
        let NodeKind::Assign { value, .. } = first(&ast) else {
            panic!("expected assignment");
        };
        let NodeKind::List(items) = ast.kind(*value) else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 3);
        let NodeKind::Hash(entries) = ast.kind(items[1]) else {
            panic!("expected embedded hash");
        };
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_access_versus_list() {
        let ast = ast("$a = $b[0]\n$c = [0]");
        let NodeKind::Assign { value, .. } = ast.kind(ast.statements()[0]) else {
            panic!("expected assignment");
        };
        assert!(matches!(ast.kind(*value), NodeKind::Access { .. }));
        let NodeKind::Assign { value, .. } = ast.kind(ast.statements()[1]) else {
            panic!("expected assignment");
        };
        assert!(matches!(ast.kind(*value), NodeKind::List(_)));
    }

    #[test]
    fn test_interpolation_becomes_concat() {
        let ast = ast(r#"$s = "x ${y} ${h['k']} $z""#);
        let NodeKind::Assign { value, .. } = first(&ast) else {
            panic!("expected assignment");
        };
        let NodeKind::Concat(parts) = ast.kind(*value) else {
            panic!("expected concat");
        };
        assert_eq!(ast.kind(parts[1]), &NodeKind::Variable("y".into()));
        assert!(matches!(ast.kind(parts[3]), NodeKind::Access { .. }));
        assert_eq!(ast.kind(parts[5]), &NodeKind::Variable("z".into()));
    }

    #[test]
    fn test_interpolation_expression_is_not_a_variable() {
        let ast = ast(r#"$s = "${1 + 2} ${x.upcase} ${2}""#);
        let NodeKind::Assign { value, .. } = first(&ast) else {
            panic!("expected assignment");
        };
        let NodeKind::Concat(parts) = ast.kind(*value) else {
            panic!("expected concat");
        };
        let NodeKind::Binary { op, left, .. } = ast.kind(parts[0]) else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert_eq!(ast.kind(*left), &NodeKind::Integer(1));
        let NodeKind::MethodCall { receiver, name, .. } = ast.kind(parts[2]) else {
            panic!("expected method call");
        };
        assert_eq!(name, "upcase");
        assert_eq!(ast.kind(*receiver), &NodeKind::Variable("x".into()));
        assert_eq!(ast.kind(parts[4]), &NodeKind::Variable("2".into()));
    }

    #[test]
    fn test_resource_with_multiple_bodies() {
        let ast = ast("file { 'a': mode => '0644', ensure => file; ['b', 'c']: owner +> root }");
        let NodeKind::Resource {
            form,
            type_name,
            bodies,
        } = first(&ast)
        else {
            panic!("expected resource");
        };
        assert_eq!(*form, ResourceForm::Regular);
        assert_eq!(type_name, "file");
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0].ops[1].name, "ensure");
        assert_eq!(bodies[1].ops[0].op, AttributeOpKind::Append);
    }

    #[test]
    fn test_virtual_and_exported_resources() {
        let ast = ast("@user { 'a': }\n@@host { 'b': }");
        assert!(matches!(
            ast.kind(ast.statements()[0]),
            NodeKind::Resource { form: ResourceForm::Virtual, .. }
        ));
        assert!(matches!(
            ast.kind(ast.statements()[1]),
            NodeKind::Resource { form: ResourceForm::Exported, .. }
        ));
    }

    #[test]
    fn test_defaults_override_and_virtual_defaults() {
        let ast = ast("File { mode => '0644' }\nFile['x'] { mode +> 1 }");
        assert!(matches!(ast.kind(ast.statements()[0]), NodeKind::ResourceDefaults { .. }));
        assert!(matches!(ast.kind(ast.statements()[1]), NodeKind::ResourceOverride { .. }));
        assert_eq!(
            error("@File { mode => 1 }").message(),
            "Resource defaults are not virtualizable"
        );
        assert_eq!(
            error("@@File['x'] { mode => 1 }").message(),
            "Resource overrides are not virtualizable"
        );
    }

    #[test]
    fn test_collector_query_precedence() {
        let ast = ast("User <| title == 'a' or tag == 'b' and groups != 'c' |> { shell => 'zsh' }");
        let NodeKind::Collect {
            exported,
            query,
            ops,
            ..
        } = first(&ast)
        else {
            panic!("expected collector");
        };
        assert!(!exported);
        assert_eq!(ops.len(), 1);
        let Some(query) = query else {
            panic!("expected query");
        };
        let NodeKind::Query { op, right, .. } = ast.kind(*query) else {
            panic!("expected query term");
        };
        assert_eq!(*op, QueryOp::Or);
        assert!(matches!(ast.kind(*right), NodeKind::Query { op: QueryOp::And, .. }));
    }

    #[test]
    fn test_exported_collector_without_query() {
        let ast = ast("Host <<| |>>");
        assert!(matches!(
            first(&ast),
            NodeKind::Collect { exported: true, query: None, .. }
        ));
    }

    #[test]
    fn test_relationship_chain_is_left_associative() {
        let ast = ast("Package['a'] -> File['b'] ~> Service <| |>");
        let NodeKind::Relationship { op, left, right } = first(&ast) else {
            panic!("expected relationship");
        };
        assert_eq!(*op, RelationshipOp::Notify);
        assert!(matches!(ast.kind(*left), NodeKind::Relationship { .. }));
        assert!(matches!(ast.kind(*right), NodeKind::Collect { .. }));
    }

    #[test]
    fn test_statement_calls() {
        let ast = ast("include foo, bar\nnotice 'hi'");
        let NodeKind::Call {
            name, args, bare, ..
        } = first(&ast)
        else {
            panic!("expected call");
        };
        assert_eq!(name, "include");
        assert_eq!(args.len(), 2);
        assert!(*bare);
    }

    #[test]
    fn test_bare_call_outside_allow_list() {
        assert_eq!(
            error("$x = foo 'a'").message(),
            "Function 'foo' must be called with parentheses"
        );
        assert_eq!(
            error("myfunc 'a'").message(),
            "Function 'myfunc' must be called with parentheses"
        );
    }

    #[test]
    fn test_reserved_words() {
        assert_eq!(
            error("$x = attr").message(),
            "Use of reserved word: attr, reserved words are not allowed here"
        );
        let ast = ast("foo { 'x': attr => 1 }\n$h = { type => 1 }");
        assert_eq!(ast.statements().len(), 2);
    }

    #[test]
    fn test_syntax_error_quotes_token() {
        let err = error("$a = 1\n$b = )");
        assert_eq!(err.message(), "Syntax error at ')'");
        assert_eq!(err.diagnostic().line, 2);
        assert_eq!(err.diagnostic().column, 6);
        assert_eq!(error("$a = ").message(), "Syntax error at end of input");
    }

    #[test]
    fn test_class_definition_with_doc_and_parent() {
        let ast = ast("# Installs ntp\nclass ntp(String $server = 'pool', $port) inherits ntp::params {\n  $x = 1\n}");
        let NodeKind::Class(def) = first(&ast) else {
            panic!("expected class");
        };
        assert_eq!(def.name, "ntp");
        assert_eq!(def.parent.as_deref(), Some("ntp::params"));
        assert_eq!(def.doc.as_deref(), Some("Installs ntp"));
        assert_eq!(def.params.len(), 2);
        assert!(def.params[0].type_expr.is_some());
        assert!(def.params[0].default.is_some());
        assert!(def.params[1].default.is_none());
    }

    #[test]
    fn test_captures_rest_rules() {
        assert_eq!(
            error("define foo(*$rest) {}").message(),
            "Parameter $rest has 'captures rest' - not supported in a 'Define'"
        );
        assert_eq!(
            error("function foo(*$rest, $a) {}").message(),
            "Parameter $rest is not last, and has 'captures rest'"
        );
        let ast = ast("function foo($a, *$rest) { $a }");
        let NodeKind::Function(def) = first(&ast) else {
            panic!("expected function");
        };
        assert!(def.params[1].captures_rest);
    }

    #[test]
    fn test_node_definitions() {
        let ast = ast("node 'a.example.com', /^web\\d+$/, www.example.com inherits default {}");
        let NodeKind::NodeDefinition {
            matchers, parent, ..
        } = first(&ast)
        else {
            panic!("expected node");
        };
        assert_eq!(
            matchers,
            &vec![
                HostMatcher::Name("a.example.com".into()),
                HostMatcher::Regex("^web\\d+$".into()),
                HostMatcher::Name("www.example.com".into()),
            ]
        );
        assert_eq!(parent, &Some(HostMatcher::Default));
    }

    #[test]
    fn test_conditionals() {
        let ast = ast(
            "if $a { $x = 1 } elsif $b { $x = 2 } else { $x = 3 }\n\
             unless $c { }\n\
             case $os { 'debian', 'ubuntu': { $p = 1 } default: { } }\n\
             $y = $os ? { /^win/ => 'w', default => 'u' }",
        );
        let NodeKind::If { otherwise, .. } = ast.kind(ast.statements()[0]) else {
            panic!("expected if");
        };
        let Some(otherwise) = otherwise else {
            panic!("expected elsif");
        };
        assert!(matches!(ast.kind(*otherwise), NodeKind::If { .. }));
        assert!(matches!(ast.kind(ast.statements()[1]), NodeKind::Unless { .. }));
        let NodeKind::Case { branches, .. } = ast.kind(ast.statements()[2]) else {
            panic!("expected case");
        };
        assert_eq!(branches[0].options.len(), 2);
        assert_eq!(ast.kind(branches[1].options[0]), &NodeKind::Default);
        let NodeKind::Assign { value, .. } = ast.kind(ast.statements()[3]) else {
            panic!("expected assignment");
        };
        assert!(matches!(ast.kind(*value), NodeKind::Selector { .. }));
    }

    #[test]
    fn test_calls_with_lambdas() {
        let ast = ast("$a.each |$k, $v| { notice($v) }\nmap($list) |$x| { $x * 2 }");
        let NodeKind::MethodCall { name, lambda, .. } = ast.kind(ast.statements()[0]) else {
            panic!("expected method call");
        };
        assert_eq!(name, "each");
        let Some(lambda) = lambda else {
            panic!("expected lambda");
        };
        let NodeKind::Lambda { params, .. } = ast.kind(*lambda) else {
            panic!("expected lambda node");
        };
        assert_eq!(params.len(), 2);
        assert!(matches!(
            ast.kind(ast.statements()[1]),
            NodeKind::Call { lambda: Some(_), .. }
        ));
    }

    #[test]
    fn test_resource_like_class() {
        let ast = ast("class { 'apache': port => 80 }");
        assert!(matches!(first(&ast), NodeKind::Resource { type_name, .. } if type_name == "class"));
    }

    #[test]
    fn test_heredoc_expression() {
        let ast = ast("$t = @(END:json)\n  {}\n  | END\n");
        let NodeKind::Assign { value, .. } = first(&ast) else {
            panic!("expected assignment");
        };
        let NodeKind::Heredoc { syntax, text } = ast.kind(*value) else {
            panic!("expected heredoc");
        };
        assert_eq!(syntax, "json");
        assert_eq!(ast.kind(*text), &NodeKind::Str("{}\n".into()));
    }

    #[test]
    fn test_numbers() {
        let ast = ast("$a = [0x10, 010, 1.5, 2e3, 7]");
        let NodeKind::Assign { value, .. } = first(&ast) else {
            panic!("expected assignment");
        };
        let NodeKind::List(items) = ast.kind(*value) else {
            panic!("expected list");
        };
        let kinds: Vec<_> = items.iter().map(|i| ast.kind(*i).clone()).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Integer(16),
                NodeKind::Integer(8),
                NodeKind::Float(1.5),
                NodeKind::Float(2000.0),
                NodeKind::Integer(7),
            ]
        );
    }

    #[test]
    fn test_import() {
        let ast = ast("import 'nodes/*.pp', 'classes.pp'");
        assert_eq!(
            first(&ast),
            &NodeKind::Import(vec!["nodes/*.pp".into(), "classes.pp".into()])
        );
    }

    #[test]
    fn test_template_with_parameters() {
        let source = Arc::new(SourceFile::inline(
            "<%- |$name, $port = 80| -%>\nserver <%= $name %>:<%= $port %>\n<% if $port > 1 { %>high<% } %>",
        ));
        let ast = parse_template(source).unwrap();
        let NodeKind::Template { params, body } = ast.kind(ast.root()) else {
            panic!("expected template");
        };
        let params = params.as_ref().unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[1].name, "port");
        let NodeKind::Block(items) = ast.kind(*body) else {
            panic!("expected block");
        };
        assert_eq!(ast.kind(items[0]), &NodeKind::RenderString("server ".into()));
        assert!(matches!(ast.kind(items[1]), NodeKind::RenderExpr(_)));
        assert!(matches!(ast.kind(*items.last().unwrap()), NodeKind::If { .. }));
    }

    #[test]
    fn test_lex_errors_pass_through() {
        let err = error("$a = 'open");
        assert_eq!(err.kind(), marionette_core::ErrorKind::Lex);
    }

    // Property tests using proptest
    proptest::proptest! {
        #[test]
        fn prop_node_text_is_source_substring(text in "[a-z$=+ '\\[\\]{}()0-9\n,:>-]{0,60}") {
            let source = Arc::new(SourceFile::inline(text.clone()));
            if let Ok(ast) = parse(source) {
                for id in ast.ids() {
                    prop_assert!(text.contains(ast.text(id)));
                }
            }
        }
    }
}
