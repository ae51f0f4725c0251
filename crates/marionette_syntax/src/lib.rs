//! MARIONETTE Syntax
//!
//! Front end for the configuration language: a context-sensitive lexer
//! (string interpolation, heredocs, template tags, regex/division
//! disambiguation), an index-addressed AST and a recursive-descent parser.
//! Every token and node carries the span it was read from.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

// Re-exports
pub use ast::{
    AssignOp, AttributeOp, AttributeOpKind, Ast, BinaryOp, CaseBranch, Definition, ExprId,
    HostMatcher, Node, NodeKind, Parameter, QueryOp, RelationshipOp, ResourceBody, ResourceForm,
    UnaryOp,
};
pub use lexer::{TokenStream, lex, lex_template};
pub use parser::{STATEMENT_CALLS, parse, parse_template};
pub use token::{Token, TokenKind};
