//! Positioned abstract source tree.
//!
//! Nodes live in one arena per parsed file and refer to each other by
//! [`ExprId`]. Every node keeps the span it was parsed from so the original
//! text can be recovered for diagnostics and documentation.

use marionette_core::{Diagnostic, SourceFile, Span, define_id};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

define_id!(
    /// Index of a node in an [`Ast`]
    ExprId
);

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
}

/// Binary operators evaluated on both operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `=~`
    Match,
    /// `!~`
    NoMatch,
    /// `in`
    In,
}

/// Assignment operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignOp {
    /// `=`
    Set,
    /// `+=`
    Append,
    /// `-=`
    Delete,
}

/// Relationship arrows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipOp {
    /// `->`: left before right
    Before,
    /// `~>`: left before right, right is notified
    Notify,
    /// `<-`: right before left
    Require,
    /// `<~`: right before left, left is notified
    Subscribe,
}

/// How a resource expression declares its resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceForm {
    /// Plain declaration
    Regular,
    /// `@type`
    Virtual,
    /// `@@type`
    Exported,
}

/// Attribute operator inside a resource body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeOpKind {
    /// `=>`
    Set,
    /// `+>`
    Append,
}

/// `name => value` inside a resource body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeOp {
    /// Attribute name
    pub name: String,
    /// Operator
    pub op: AttributeOpKind,
    /// Value expression
    pub value: ExprId,
    /// Span of the whole operation
    pub span: Span,
}

/// One `title: attributes` body of a resource expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBody {
    /// Title expression (may produce a list of titles)
    pub title: ExprId,
    /// Attribute operations
    pub ops: Vec<AttributeOp>,
    /// Span of the body
    pub span: Span,
}

/// A declared parameter of a class, define, function or lambda
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name without `$`
    pub name: String,
    /// Optional type constraint expression
    pub type_expr: Option<ExprId>,
    /// Optional default value expression
    pub default: Option<ExprId>,
    /// `*$rest`
    pub captures_rest: bool,
    /// Span of the parameter
    pub span: Span,
}

/// One `options: { body }` branch of a case expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    /// Option values; `default` is a [`NodeKind::Default`] node
    pub options: Vec<ExprId>,
    /// Branch body block
    pub body: ExprId,
}

/// Collector query terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryOp {
    /// `attr == value`
    Eq,
    /// `attr != value`
    Ne,
    /// Both terms
    And,
    /// Either term
    Or,
}

/// How a node definition matches host names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostMatcher {
    /// Literal host name
    Name(String),
    /// Regular expression
    Regex(String),
    /// `default`
    Default,
}

/// A class, define, function or node definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    /// Name as written
    pub name: String,
    /// Parameters
    pub params: Vec<Parameter>,
    /// Parent class for classes
    pub parent: Option<String>,
    /// Body block
    pub body: ExprId,
    /// Accumulated doc comment
    pub doc: Option<String>,
}

/// AST node variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Statement sequence; the value of the last statement
    Block(Vec<ExprId>),
    /// `undef`
    Undef,
    /// `default`
    Default,
    /// `true` / `false`
    Boolean(bool),
    /// Integer literal
    Integer(i64),
    /// Float literal
    Float(f64),
    /// String literal
    Str(String),
    /// Interpolated string parts, evaluated and joined
    Concat(Vec<ExprId>),
    /// Heredoc with its syntax tag and text expression
    Heredoc {
        /// Syntax tag after `:`
        syntax: String,
        /// String or concatenation node
        text: ExprId,
    },
    /// `/regex/`
    Regex(String),
    /// Bare lower-case word
    Name(String),
    /// Capitalized type or class reference
    TypeRef(String),
    /// `$name`
    Variable(String),
    /// `[a, b]`
    List(Vec<ExprId>),
    /// `{ k => v }`
    Hash(Vec<(ExprId, ExprId)>),
    /// `target[keys]`
    Access {
        /// Accessed value
        target: ExprId,
        /// Index expressions
        keys: Vec<ExprId>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: ExprId,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: ExprId,
        /// Right operand
        right: ExprId,
    },
    /// Short-circuit `and`
    And(ExprId, ExprId),
    /// Short-circuit `or`
    Or(ExprId, ExprId),
    /// `$x = v`, `$x += v`, `$x -= v`
    Assign {
        /// Operator
        op: AssignOp,
        /// Variable node
        target: ExprId,
        /// Value
        value: ExprId,
    },
    /// `subject ? { match => value }`
    Selector {
        /// Value being selected on
        subject: ExprId,
        /// Match/value pairs
        cases: Vec<(ExprId, ExprId)>,
    },
    /// `if` / `elsif` chain
    If {
        /// Condition
        condition: ExprId,
        /// Block taken when truthy
        then: ExprId,
        /// `else` block or nested `If` for `elsif`
        otherwise: Option<ExprId>,
    },
    /// `unless`
    Unless {
        /// Condition
        condition: ExprId,
        /// Block taken when falsy
        then: ExprId,
        /// `else` block
        otherwise: Option<ExprId>,
    },
    /// `case subject { ... }`
    Case {
        /// Value being matched
        subject: ExprId,
        /// Branches in order
        branches: Vec<CaseBranch>,
    },
    /// Function call
    Call {
        /// Function name
        name: String,
        /// Arguments
        args: Vec<ExprId>,
        /// Trailing lambda
        lambda: Option<ExprId>,
        /// Called in statement position without parentheses
        bare: bool,
    },
    /// `receiver.name(args)`
    MethodCall {
        /// First argument
        receiver: ExprId,
        /// Function name
        name: String,
        /// Remaining arguments
        args: Vec<ExprId>,
        /// Trailing lambda
        lambda: Option<ExprId>,
    },
    /// `|params| { body }`
    Lambda {
        /// Parameters
        params: Vec<Parameter>,
        /// Body block
        body: ExprId,
    },
    /// Resource declaration
    Resource {
        /// Regular, virtual or exported
        form: ResourceForm,
        /// Type name as written (`file`, `class`, `apache::vhost`)
        type_name: String,
        /// One body per title group
        bodies: Vec<ResourceBody>,
    },
    /// `Type { attributes }`
    ResourceDefaults {
        /// Type name as written
        type_name: String,
        /// Default attributes
        ops: Vec<AttributeOp>,
    },
    /// `Type['title'] { attributes }`
    ResourceOverride {
        /// Reference expression
        target: ExprId,
        /// Overriding attributes
        ops: Vec<AttributeOp>,
    },
    /// `Type <| query |>` or `Type <<| query |>>`
    Collect {
        /// Type name as written
        type_name: String,
        /// Exported (`<<| |>>`) rather than virtual
        exported: bool,
        /// Query tree of [`NodeKind::Query`] nodes
        query: Option<ExprId>,
        /// Attributes to override on every match
        ops: Vec<AttributeOp>,
    },
    /// A collector query term
    Query {
        /// Operator
        op: QueryOp,
        /// Attribute name node or sub-query
        left: ExprId,
        /// Value or sub-query
        right: ExprId,
    },
    /// `left -> right` and friends
    Relationship {
        /// Arrow
        op: RelationshipOp,
        /// Left operand
        left: ExprId,
        /// Right operand
        right: ExprId,
    },
    /// `class name(...) inherits parent { }`
    Class(Definition),
    /// `define name(...) { }`
    Define(Definition),
    /// `function name(...) { }`
    Function(Definition),
    /// `node a, b inherits c { }`
    NodeDefinition {
        /// Host matchers
        matchers: Vec<HostMatcher>,
        /// Parent node
        parent: Option<HostMatcher>,
        /// Body block
        body: ExprId,
        /// Accumulated doc comment
        doc: Option<String>,
    },
    /// `import 'file'`
    Import(Vec<String>),
    /// Literal template text
    RenderString(String),
    /// `<%= expr %>`
    RenderExpr(ExprId),
    /// Parsed template
    Template {
        /// Declared template parameters
        params: Option<Vec<Parameter>>,
        /// Template body block
        body: ExprId,
    },
}

/// A node and the span it was parsed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Variant and children
    pub kind: NodeKind,
    /// Source span
    pub span: Span,
}

/// Arena of nodes for one source file
#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<Node>,
    root: ExprId,
    source: Arc<SourceFile>,
    warnings: Vec<Diagnostic>,
}

impl Ast {
    pub(crate) fn new(
        nodes: Vec<Node>,
        root: ExprId,
        source: Arc<SourceFile>,
        warnings: Vec<Diagnostic>,
    ) -> Self {
        Self {
            nodes,
            root,
            source,
            warnings,
        }
    }

    /// Root block (or template) node
    #[must_use]
    pub fn root(&self) -> ExprId {
        self.root
    }

    /// Node at `id`
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this tree
    #[must_use]
    pub fn node(&self, id: ExprId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Variant at `id`
    #[must_use]
    pub fn kind(&self, id: ExprId) -> &NodeKind {
        &self.node(id).kind
    }

    /// Span of `id`
    #[must_use]
    pub fn span(&self, id: ExprId) -> Span {
        self.node(id).span
    }

    /// Source text `id` was parsed from
    #[must_use]
    pub fn text(&self, id: ExprId) -> &str {
        self.source.slice(self.span(id))
    }

    /// The parsed source
    #[must_use]
    pub fn source(&self) -> &Arc<SourceFile> {
        &self.source
    }

    /// Diagnostic positioned at `id`
    #[must_use]
    pub fn diagnostic(&self, id: ExprId, message: impl Into<String>) -> Diagnostic {
        self.source.diagnostic(self.span(id), message)
    }

    /// Lexer warnings
    #[must_use]
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in allocation order
    pub fn ids(&self) -> impl Iterator<Item = ExprId> + '_ {
        (0..self.nodes.len()).map(ExprId::from_index)
    }

    /// Statements of the root block
    #[must_use]
    pub fn statements(&self) -> &[ExprId] {
        match self.kind(self.root) {
            NodeKind::Block(items) => items,
            NodeKind::Template { body, .. } => match self.kind(*body) {
                NodeKind::Block(items) => items,
                _ => &[],
            },
            _ => &[],
        }
    }
}
