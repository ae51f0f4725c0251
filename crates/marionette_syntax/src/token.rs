//! Token kinds produced by the lexer.

use marionette_core::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a token, carrying its processed value where it has one
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    /// `[` directly after a value (access)
    LBrack,
    /// `[` after whitespace or at the start of input (list literal)
    ListStart,
    /// `]`
    RBrack,
    /// `{`
    LBrace,
    /// `{` following `?` (selector body)
    SelBrace,
    /// `}`
    RBrace,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `;`
    Semic,
    /// `:`
    Colon,
    /// `.`
    Dot,
    /// `?`
    Question,
    /// `|`
    Pipe,
    /// `@`
    At,
    /// `@@`
    AtAt,

    /// `=`
    Assign,
    /// `+=`
    AppendAssign,
    /// `-=`
    DeleteAssign,
    /// `=>`
    Farrow,
    /// `+>`
    PlusArrow,
    /// `==`
    IsEqual,
    /// `!=`
    NotEqual,
    /// `=~`
    Match,
    /// `!~`
    NoMatch,
    /// `<`
    LessThan,
    /// `<=`
    LessEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterEqual,
    /// `<<`
    LShift,
    /// `>>`
    RShift,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Times,
    /// `/`
    Div,
    /// `%`
    Modulo,
    /// `!`
    Not,
    /// `->`
    InEdge,
    /// `~>`
    InEdgeSub,
    /// `<-`
    OutEdge,
    /// `<~`
    OutEdgeSub,
    /// `<|`
    LCollect,
    /// `|>`
    RCollect,
    /// `<<|`
    LLCollect,
    /// `|>>`
    RRCollect,

    /// `and`
    And,
    /// `case`
    Case,
    /// `class`
    Class,
    /// `default`
    Default,
    /// `define`
    Define,
    /// `else`
    Else,
    /// `elsif`
    Elsif,
    /// `function`
    Function,
    /// `if`
    If,
    /// `import`
    Import,
    /// `in`
    In,
    /// `inherits`
    Inherits,
    /// `node`
    Node,
    /// `or`
    Or,
    /// `undef`
    Undef,
    /// `unless`
    Unless,
    /// `true` / `false`
    Boolean(bool),
    /// A word reserved for future constructs
    Reserved(String),

    /// Lower-case identifier, possibly `::`-qualified
    Name(String),
    /// Upper-case type or class reference
    ClassRef(String),
    /// `$name`, without the `$`
    Variable(String),
    /// Numeric literal text, already validated
    Number(String),
    /// String without interpolation
    String(String),
    /// Text before the first interpolation
    DqPre(String),
    /// Text between two interpolations
    DqMid(String),
    /// Text after the last interpolation
    DqPost(String),
    /// Regex body between the slashes
    Regex(String),
    /// `@(TAG:syntax)` opener carrying the syntax name
    Heredoc(String),

    /// Literal template text
    RenderString(String),
    /// `<%=`
    RenderExpr,
    /// `%>`
    EppEnd,
    /// `-%>`
    EppEndTrim,

    /// End of input
    Eof,
}

impl TokenKind {
    /// Whether a `/` after this token is a division rather than a regex
    #[must_use]
    pub fn ends_operand(&self) -> bool {
        matches!(
            self,
            Self::RParen
                | Self::RBrack
                | Self::RRCollect
                | Self::RCollect
                | Self::Name(_)
                | Self::ClassRef(_)
                | Self::Number(_)
                | Self::String(_)
                | Self::Boolean(_)
                | Self::DqPre(_)
                | Self::DqMid(_)
                | Self::DqPost(_)
                | Self::Heredoc(_)
                | Self::Regex(_)
                | Self::Variable(_)
        )
    }

    /// Whether this token starts a declaration that takes a doc comment
    #[must_use]
    pub fn is_definition_keyword(&self) -> bool {
        matches!(self, Self::Class | Self::Define | Self::Node | Self::Function)
    }

    /// Whether this is a keyword usable as a bare word in attribute position
    #[must_use]
    pub fn keyword_text(&self) -> Option<&'static str> {
        Some(match self {
            Self::And => "and",
            Self::Case => "case",
            Self::Class => "class",
            Self::Default => "default",
            Self::Define => "define",
            Self::Else => "else",
            Self::Elsif => "elsif",
            Self::Function => "function",
            Self::If => "if",
            Self::Import => "import",
            Self::In => "in",
            Self::Inherits => "inherits",
            Self::Node => "node",
            Self::Or => "or",
            Self::Undef => "undef",
            Self::Unless => "unless",
            Self::Boolean(true) => "true",
            Self::Boolean(false) => "false",
            _ => return None,
        })
    }
}

/// Keyword for an identifier, if it is one
#[must_use]
pub fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "and" => TokenKind::And,
        "case" => TokenKind::Case,
        "class" => TokenKind::Class,
        "default" => TokenKind::Default,
        "define" => TokenKind::Define,
        "else" => TokenKind::Else,
        "elsif" => TokenKind::Elsif,
        "function" => TokenKind::Function,
        "if" => TokenKind::If,
        "import" => TokenKind::Import,
        "in" => TokenKind::In,
        "inherits" => TokenKind::Inherits,
        "node" => TokenKind::Node,
        "or" => TokenKind::Or,
        "undef" => TokenKind::Undef,
        "unless" => TokenKind::Unless,
        "true" => TokenKind::Boolean(true),
        "false" => TokenKind::Boolean(false),
        "application" | "attr" | "consumes" | "private" | "produces" | "site" | "type" => {
            TokenKind::Reserved(word.to_string())
        }
        _ => return None,
    })
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(word) = self.keyword_text() {
            return write!(f, "{}", word);
        }
        match self {
            Self::LBrack | Self::ListStart => write!(f, "["),
            Self::RBrack => write!(f, "]"),
            Self::LBrace | Self::SelBrace => write!(f, "{{"),
            Self::RBrace => write!(f, "}}"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::Comma => write!(f, ","),
            Self::Semic => write!(f, ";"),
            Self::Colon => write!(f, ":"),
            Self::Dot => write!(f, "."),
            Self::Question => write!(f, "?"),
            Self::Pipe => write!(f, "|"),
            Self::At => write!(f, "@"),
            Self::AtAt => write!(f, "@@"),
            Self::Assign => write!(f, "="),
            Self::AppendAssign => write!(f, "+="),
            Self::DeleteAssign => write!(f, "-="),
            Self::Farrow => write!(f, "=>"),
            Self::PlusArrow => write!(f, "+>"),
            Self::IsEqual => write!(f, "=="),
            Self::NotEqual => write!(f, "!="),
            Self::Match => write!(f, "=~"),
            Self::NoMatch => write!(f, "!~"),
            Self::LessThan => write!(f, "<"),
            Self::LessEqual => write!(f, "<="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterEqual => write!(f, ">="),
            Self::LShift => write!(f, "<<"),
            Self::RShift => write!(f, ">>"),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Times => write!(f, "*"),
            Self::Div => write!(f, "/"),
            Self::Modulo => write!(f, "%"),
            Self::Not => write!(f, "!"),
            Self::InEdge => write!(f, "->"),
            Self::InEdgeSub => write!(f, "~>"),
            Self::OutEdge => write!(f, "<-"),
            Self::OutEdgeSub => write!(f, "<~"),
            Self::LCollect => write!(f, "<|"),
            Self::RCollect => write!(f, "|>"),
            Self::LLCollect => write!(f, "<<|"),
            Self::RRCollect => write!(f, "|>>"),
            Self::Reserved(w) | Self::Name(w) | Self::ClassRef(w) | Self::Number(w) => {
                write!(f, "{}", w)
            }
            Self::Variable(v) => write!(f, "${}", v),
            Self::String(s) | Self::DqPre(s) | Self::DqMid(s) | Self::DqPost(s) => {
                write!(f, "{}", s)
            }
            Self::Regex(r) => write!(f, "/{}/", r),
            Self::Heredoc(_) => write!(f, "@("),
            Self::RenderString(s) => write!(f, "{}", s),
            Self::RenderExpr => write!(f, "<%="),
            Self::EppEnd => write!(f, "%>"),
            Self::EppEndTrim => write!(f, "-%>"),
            Self::Eof => write!(f, "<eof>"),
            _ => Ok(()),
        }
    }
}

/// A token with its source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token kind and value
    pub kind: TokenKind,
    /// Byte range in the source
    pub span: Span,
    /// Line (1-based)
    pub line: usize,
    /// Column (1-based)
    pub column: usize,
}
