//! Context-sensitive lexer.
//!
//! The whole token stream is produced up front. What a character starts
//! depends on what came before it: `/` after an operand is a division and
//! otherwise opens a regex, `[` directly after a value is an access, and `{`
//! after `?` opens a selector body. Double-quoted strings and heredocs are
//! split into literal fragments around embedded expressions. Template
//! sources alternate between literal text and code.

use crate::token::{Token, TokenKind, keyword};
use indexmap::IndexMap;
use marionette_core::{CompileError, CompileResult, Diagnostic, SourceFile, Span};
use once_cell::sync::Lazy;
use regex::Regex;
use std::mem::take;

static HEX_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0[xX][0-9A-Fa-f]+$").expect("hex pattern must compile"));
static OCTAL_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0[0-7]+$").expect("octal pattern must compile"));
static DECIMAL_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:0|[1-9][0-9]*)(?:\.[0-9]+)?(?:[eE][-+]?[0-9]+)?$")
        .expect("decimal pattern must compile")
});
static HEREDOC_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:/\r\n)]+)(?::[ \t]*([a-z][a-zA-Z0-9_+]+)[ \t]*)?(?:/((?:\w|[$])*)[ \t]*)?$")
        .expect("heredoc pattern must compile")
});

const OPERATORS: &[(&str, TokenKind)] = &[
    ("<<|", TokenKind::LLCollect),
    ("|>>", TokenKind::RRCollect),
    ("<|", TokenKind::LCollect),
    ("|>", TokenKind::RCollect),
    ("<<", TokenKind::LShift),
    (">>", TokenKind::RShift),
    ("<=", TokenKind::LessEqual),
    (">=", TokenKind::GreaterEqual),
    ("<-", TokenKind::OutEdge),
    ("<~", TokenKind::OutEdgeSub),
    ("->", TokenKind::InEdge),
    ("~>", TokenKind::InEdgeSub),
    ("==", TokenKind::IsEqual),
    ("!=", TokenKind::NotEqual),
    ("=~", TokenKind::Match),
    ("!~", TokenKind::NoMatch),
    ("=>", TokenKind::Farrow),
    ("+>", TokenKind::PlusArrow),
    ("+=", TokenKind::AppendAssign),
    ("-=", TokenKind::DeleteAssign),
    ("<", TokenKind::LessThan),
    (">", TokenKind::GreaterThan),
    ("=", TokenKind::Assign),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Times),
    ("%", TokenKind::Modulo),
    ("!", TokenKind::Not),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("]", TokenKind::RBrack),
    ("}", TokenKind::RBrace),
    (",", TokenKind::Comma),
    (";", TokenKind::Semic),
    (":", TokenKind::Colon),
    (".", TokenKind::Dot),
    ("?", TokenKind::Question),
    ("|", TokenKind::Pipe),
];

/// Output of the lexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStream {
    /// Tokens in source order, terminated by [`TokenKind::Eof`]
    pub tokens: Vec<Token>,
    /// Doc comments keyed by the index of the definition keyword they precede
    pub docs: IndexMap<usize, String>,
    /// Non-fatal findings such as unknown escapes
    pub warnings: Vec<Diagnostic>,
}

/// Lex a manifest
///
/// # Errors
///
/// Returns a lex error for unterminated constructs, malformed numbers and
/// illegal identifiers
pub fn lex(source: &SourceFile) -> CompileResult<TokenStream> {
    Lexer::new(source, false).run()
}

/// Lex a text template with embedded `<% %>` code
///
/// # Errors
///
/// Returns a lex error for unbalanced tags and anything [`lex`] rejects
pub fn lex_template(source: &SourceFile) -> CompileResult<TokenStream> {
    Lexer::new(source, true).run()
}

/// Escapes honored inside a string body
#[derive(Debug, Clone, Default)]
struct Escapes {
    chars: Vec<char>,
    continuation: bool,
    warn_unknown: bool,
}

impl Escapes {
    fn double_quoted() -> Self {
        Self {
            chars: vec!['\\', '$', '\'', '"', 'r', 'n', 't', 's'],
            continuation: true,
            warn_unknown: true,
        }
    }

    /// Escapes selected by a heredoc `/flags` spec
    fn heredoc(flags: &str) -> Result<Self, String> {
        let flags = if flags.is_empty() { "trnsL$" } else { flags };
        let mut seen = Vec::new();
        let mut escapes = Self {
            chars: vec!['\\'],
            ..Self::default()
        };
        for flag in flags.chars() {
            if seen.contains(&flag) {
                let all: Vec<String> = flags.chars().map(String::from).collect();
                return Err(format!(
                    "An escape char for @() may only appear once. Got '{}'",
                    all.join(", ")
                ));
            }
            seen.push(flag);
            match flag {
                't' | 'r' | 'n' | 's' | '$' => escapes.chars.push(flag),
                'L' => escapes.continuation = true,
                other => {
                    return Err(format!(
                        "Invalid heredoc escape char. Only t, r, n, s, L, $ allowed. Got '{}'",
                        other
                    ));
                }
            }
        }
        Ok(escapes)
    }
}

/// Piecewise translation from offsets in a derived text back to the source
#[derive(Debug, Clone)]
struct OffsetMap {
    segments: Vec<(usize, usize)>,
}

impl OffsetMap {
    fn identity() -> Self {
        Self {
            segments: vec![(0, 0)],
        }
    }

    fn apply(&self, offset: usize) -> usize {
        let (local, origin) = self
            .segments
            .iter()
            .rev()
            .find(|(local, _)| *local <= offset)
            .copied()
            .unwrap_or((0, 0));
        origin + (offset - local)
    }
}

/// Accumulates comments that may document the next definition
#[derive(Debug)]
struct DocCollector {
    enabled: bool,
    frames: Vec<DocFrame>,
}

#[derive(Debug, Default)]
struct DocFrame {
    lines: Vec<String>,
    last_line: usize,
}

impl DocCollector {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            frames: vec![DocFrame::default()],
        }
    }

    fn comment(&mut self, text: &str, first_line: usize, last_line: usize) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        // a blank line separates unrelated comment blocks
        if !frame.lines.is_empty() && first_line > frame.last_line + 1 {
            frame.lines.clear();
        }
        frame.lines.push(text.to_string());
        frame.last_line = last_line;
    }

    fn clear(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.lines.clear();
        }
    }

    /// Observe a token; definition keywords take the pending documentation
    fn token(&mut self, kind: &TokenKind, line: usize) -> Option<String> {
        match kind {
            TokenKind::LBrace | TokenKind::SelBrace | TokenKind::LParen => {
                self.clear();
                self.frames.push(DocFrame::default());
                None
            }
            TokenKind::RBrace | TokenKind::RParen => {
                if self.frames.len() > 1 {
                    self.frames.pop();
                }
                self.clear();
                None
            }
            k if k.is_definition_keyword() => {
                let frame = self.frames.last_mut()?;
                let doc = (!frame.lines.is_empty() && line <= frame.last_line + 1)
                    .then(|| frame.lines.join("\n"));
                frame.lines.clear();
                doc
            }
            _ => {
                self.clear();
                None
            }
        }
    }
}

/// Preview of the text following a construct, for error messages
fn followed_by(rest: &str) -> String {
    if rest.is_empty() {
        return "<eof>".to_string();
    }
    let mut preview: String = rest.chars().take(5).collect();
    if rest.chars().nth(5).is_some() {
        preview.push_str("...");
    }
    preview
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Length of a `(::)?(\w+::)*\w+` variable name at the start of `text`
fn variable_len(text: &str) -> Option<usize> {
    let word = |s: &str| {
        s.bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count()
    };
    let mut len = if text.starts_with("::") { 2 } else { 0 };
    let first = word(&text[len..]);
    if first == 0 {
        return None;
    }
    len += first;
    while text[len..].starts_with("::") {
        let next = word(&text[len + 2..]);
        if next == 0 {
            break;
        }
        len += 2 + next;
    }
    Some(len)
}

fn word_len(text: &str) -> usize {
    text.bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count()
}

fn digit_len(text: &str) -> usize {
    text.bytes().take_while(u8::is_ascii_digit).count()
}

/// Apply an escape set to text that has no interpolation
fn unescape(text: &str, escapes: &Escapes) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('\n') if escapes.continuation => {
                chars.next();
            }
            Some('\r') if escapes.continuation => {
                chars.next();
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            Some(next) if escapes.chars.contains(&next) => {
                chars.next();
                out.push(escaped_char(next));
            }
            _ => out.push('\\'),
        }
    }
    out
}

fn escaped_char(c: char) -> char {
    match c {
        'r' => '\r',
        'n' => '\n',
        't' => '\t',
        's' => ' ',
        other => other,
    }
}

struct Lexer<'a> {
    source: &'a SourceFile,
    text: &'a str,
    pos: usize,
    map: OffsetMap,
    template: bool,
    in_code: Option<usize>,
    tokens: Vec<Token>,
    docs: DocCollector,
    doc_table: IndexMap<usize, String>,
    warnings: Vec<Diagnostic>,
    heredoc_cont: Option<usize>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a SourceFile, template: bool) -> Self {
        Self {
            source,
            text: source.text(),
            pos: 0,
            map: OffsetMap::identity(),
            template,
            in_code: None,
            tokens: Vec::new(),
            docs: DocCollector::new(true),
            doc_table: IndexMap::new(),
            warnings: Vec::new(),
            heredoc_cont: None,
        }
    }

    /// A lexer over derived text (a heredoc body) mapped back to `source`
    fn nested(source: &'a SourceFile, text: &'a str, map: OffsetMap) -> Self {
        Self {
            source,
            text,
            pos: 0,
            map,
            template: false,
            in_code: None,
            tokens: Vec::new(),
            docs: DocCollector::new(false),
            doc_table: IndexMap::new(),
            warnings: Vec::new(),
            heredoc_cont: None,
        }
    }

    fn run(mut self) -> CompileResult<TokenStream> {
        if self.template {
            self.lex_text()?;
        }
        loop {
            self.skip_trivia()?;
            if self.pos >= self.text.len() {
                break;
            }
            if self.template {
                let start = self.pos;
                if self.rest().starts_with("-%>") {
                    self.pos += 3;
                    self.push(TokenKind::EppEndTrim, start, self.pos);
                    self.trim_right();
                    self.lex_text()?;
                    continue;
                }
                if self.rest().starts_with("%>") {
                    self.pos += 2;
                    self.push(TokenKind::EppEnd, start, self.pos);
                    self.lex_text()?;
                    continue;
                }
            }
            self.lex_token()?;
        }
        if let Some(open) = self.in_code {
            return Err(self.error(
                open,
                "Unbalanced epp tag, reached <eof> without closing tag.".to_string(),
            ));
        }
        let end = self.text.len();
        self.push(TokenKind::Eof, end, end);
        tracing::trace!(tokens = self.tokens.len(), "lexed source");
        Ok(TokenStream {
            tokens: self.tokens,
            docs: self.doc_table,
            warnings: self.warnings,
        })
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn error(&self, offset: usize, message: String) -> CompileError {
        let span = Span::new(self.map.apply(offset), 0);
        CompileError::Lex(self.source.diagnostic(span, message))
    }

    fn warn(&mut self, offset: usize, message: String) {
        let span = Span::new(self.map.apply(offset), 0);
        let diagnostic = self.source.diagnostic(span, message);
        tracing::warn!("{}", diagnostic);
        self.warnings.push(diagnostic);
    }

    fn unclosed(&self, open: usize, opener: &str, what: &str) -> CompileError {
        let after = self.text.get(open + opener.len()..).unwrap_or("");
        self.error(
            open,
            format!(
                "Unclosed {} after {} followed by '{}'",
                what,
                if opener == "'" {
                    "\"'\"".to_string()
                } else {
                    format!("'{}'", opener)
                },
                followed_by(after)
            ),
        )
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        let span = Span::between(self.map.apply(start), self.map.apply(end));
        let position = self.source.position(span.offset);
        if self.docs.enabled {
            if let Some(doc) = self.docs.token(&kind, position.line) {
                self.doc_table.insert(self.tokens.len(), doc);
            }
        }
        self.tokens.push(Token {
            kind,
            span,
            line: position.line,
            column: position.column,
        });
    }

    fn record_comment(&mut self, text: &str, start: usize, end: usize) {
        if !self.docs.enabled {
            return;
        }
        let first = self.source.position(self.map.apply(start)).line;
        let last = self.source.position(self.map.apply(end)).line;
        self.docs.comment(text, first, last);
    }

    fn skip_trivia(&mut self) -> CompileResult<()> {
        loop {
            let Some(c) = self.peek() else {
                return Ok(());
            };
            match c {
                '\n' => {
                    self.pos += 1;
                    // bodies of heredocs opened on this line are already consumed
                    if let Some(cont) = self.heredoc_cont.take() {
                        self.pos = cont;
                    }
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => {
                    let start = self.pos;
                    let rest = self.rest();
                    let mut len = rest.find('\n').unwrap_or(rest.len());
                    if self.template {
                        if let Some(close) = rest[..len].find("%>") {
                            len = if rest[..close].ends_with('-') {
                                close - 1
                            } else {
                                close
                            };
                        }
                    }
                    let body = &rest[1..len.max(1)];
                    let body = body.strip_prefix(' ').unwrap_or(body).trim_end();
                    self.pos += len;
                    self.record_comment(body, start, self.pos);
                }
                '/' if self.rest().starts_with("/*") => {
                    let start = self.pos;
                    let Some(close) = self.rest()[2..].find("*/") else {
                        return Err(self.unclosed(start, "/*", "comment"));
                    };
                    let body = &self.rest()[2..2 + close];
                    let body = body
                        .lines()
                        .map(|l| l.trim().trim_start_matches('*').trim())
                        .collect::<Vec<_>>()
                        .join("\n");
                    self.pos += close + 4;
                    self.record_comment(body.trim(), start, self.pos);
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_token(&mut self) -> CompileResult<()> {
        let start = self.pos;
        let rest = self.rest();
        let Some(c) = rest.chars().next() else {
            return Ok(());
        };
        match c {
            '"' => {
                self.pos += 1;
                self.lex_interpolated(start, Some('"'), &Escapes::double_quoted())
            }
            '\'' => self.lex_single_quoted(),
            '$' => self.lex_variable(),
            '0'..='9' => self.lex_number(),
            'a'..='z' | '_' => self.lex_name(),
            'A'..='Z' => self.lex_class_ref(),
            ':' if rest.starts_with("::") => match rest[2..].chars().next() {
                Some('a'..='z' | '_') => self.lex_name(),
                Some('A'..='Z') => self.lex_class_ref(),
                _ => Err(self.error(start, "Illegal fully qualified name".to_string())),
            },
            '@' => {
                if rest.starts_with("@(") {
                    self.lex_heredoc()
                } else if rest.starts_with("@@") {
                    self.pos += 2;
                    self.push(TokenKind::AtAt, start, self.pos);
                    Ok(())
                } else {
                    self.pos += 1;
                    self.push(TokenKind::At, start, self.pos);
                    Ok(())
                }
            }
            '/' => {
                let regex_ok = self
                    .tokens
                    .last()
                    .is_none_or(|t| !t.kind.ends_operand());
                if regex_ok {
                    if let Some(body) = self.scan_regex() {
                        self.push(TokenKind::Regex(body), start, self.pos);
                        return Ok(());
                    }
                }
                self.pos += 1;
                self.push(TokenKind::Div, start, self.pos);
                Ok(())
            }
            '[' => {
                let spaced = self.text[..start]
                    .chars()
                    .next_back()
                    .is_none_or(char::is_whitespace);
                self.pos += 1;
                let kind = if spaced {
                    TokenKind::ListStart
                } else {
                    TokenKind::LBrack
                };
                self.push(kind, start, self.pos);
                Ok(())
            }
            '{' => {
                let after_question = self
                    .tokens
                    .last()
                    .is_some_and(|t| t.kind == TokenKind::Question);
                self.pos += 1;
                let kind = if after_question {
                    TokenKind::SelBrace
                } else {
                    TokenKind::LBrace
                };
                self.push(kind, start, self.pos);
                Ok(())
            }
            _ => {
                let Some((text, kind)) = OPERATORS.iter().find(|(op, _)| rest.starts_with(op))
                else {
                    return Err(self.error(start, format!("Illegal character '{}'", c)));
                };
                self.pos += text.len();
                self.push(kind.clone(), start, self.pos);
                Ok(())
            }
        }
    }

    fn lex_single_quoted(&mut self) -> CompileResult<()> {
        let open = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.unclosed(open, "'", "quote")),
                Some('\'') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => match self.rest()[1..].chars().next() {
                    Some(next @ ('\\' | '\'')) => {
                        value.push(next);
                        self.pos += 2;
                    }
                    _ => {
                        value.push('\\');
                        self.pos += 1;
                    }
                },
                Some(c) => {
                    value.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
        self.push(TokenKind::String(value), open, self.pos);
        Ok(())
    }

    /// Lex string content up to `quote` (or end of text when `None`),
    /// splitting around `$var` and `${expr}` interpolations
    fn lex_interpolated(
        &mut self,
        open: usize,
        quote: Option<char>,
        escapes: &Escapes,
    ) -> CompileResult<()> {
        let mut fragment = String::new();
        let mut fragment_start = open;
        let mut interpolated = false;
        loop {
            let Some(c) = self.peek() else {
                if quote.is_some() {
                    return Err(self.unclosed(open, "\"", "quote"));
                }
                self.push_fragment(fragment, interpolated, true, fragment_start, self.pos);
                return Ok(());
            };
            if Some(c) == quote {
                self.pos += 1;
                self.push_fragment(fragment, interpolated, true, fragment_start, self.pos);
                return Ok(());
            }
            match c {
                '\\' => self.lex_escape(&mut fragment, escapes),
                '$' => {
                    let dollar = self.pos;
                    let after = &self.text[dollar + 1..];
                    if after.starts_with('{') {
                        self.push_fragment(
                            take(&mut fragment),
                            interpolated,
                            false,
                            fragment_start,
                            dollar,
                        );
                        self.pos = dollar + 2;
                        self.lex_embedded(dollar)?;
                        interpolated = true;
                        fragment_start = self.pos;
                    } else if let Some(len) = variable_len(after) {
                        self.push_fragment(
                            take(&mut fragment),
                            interpolated,
                            false,
                            fragment_start,
                            dollar,
                        );
                        self.pos = dollar + 1 + len;
                        let name = after[..len].to_string();
                        self.push(TokenKind::Variable(name), dollar, self.pos);
                        interpolated = true;
                        fragment_start = self.pos;
                    } else {
                        fragment.push('$');
                        self.pos += 1;
                    }
                }
                _ => {
                    fragment.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    fn push_fragment(
        &mut self,
        text: String,
        interpolated: bool,
        last: bool,
        start: usize,
        end: usize,
    ) {
        let kind = match (interpolated, last) {
            (false, true) => TokenKind::String(text),
            (false, false) => TokenKind::DqPre(text),
            (true, false) => TokenKind::DqMid(text),
            (true, true) => TokenKind::DqPost(text),
        };
        self.push(kind, start, end);
    }

    fn lex_escape(&mut self, fragment: &mut String, escapes: &Escapes) {
        let start = self.pos;
        let after = &self.text[start + 1..];
        let Some(next) = after.chars().next() else {
            fragment.push('\\');
            self.pos += 1;
            return;
        };
        if escapes.continuation {
            if after.starts_with("\r\n") {
                self.pos += 3;
                return;
            }
            if next == '\n' {
                self.pos += 2;
                return;
            }
        }
        if escapes.chars.contains(&next) {
            fragment.push(escaped_char(next));
        } else {
            if escapes.warn_unknown && next != '\n' {
                self.warn(start, format!("Unrecognized escape sequence '\\{}'", next));
            }
            fragment.push('\\');
            fragment.push(next);
        }
        self.pos += 1 + next.len_utf8();
    }

    /// Lex the tokens of a `${...}` interpolation up to its closing brace
    fn lex_embedded(&mut self, dollar: usize) -> CompileResult<()> {
        let mut depth = 0usize;
        loop {
            self.skip_trivia()?;
            let Some(c) = self.peek() else {
                return Err(self.unclosed(dollar, "${", "interpolation"));
            };
            if c == '}' && depth == 0 {
                self.pos += 1;
                return Ok(());
            }
            let before = self.tokens.len();
            self.lex_token()?;
            if self.tokens.len() == before + 1 {
                match self.tokens.last().map(|t| &t.kind) {
                    Some(TokenKind::LBrace | TokenKind::SelBrace) => depth += 1,
                    Some(TokenKind::RBrace) => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
        }
    }

    fn lex_variable(&mut self) -> CompileResult<()> {
        let start = self.pos;
        let Some(len) = variable_len(&self.text[start + 1..]) else {
            return Err(self.error(
                start,
                format!(
                    "Illegal variable name, The given name '{}' does not conform to the naming rule",
                    followed_by(&self.text[start + 1..])
                ),
            ));
        };
        self.pos = start + 1 + len;
        let name = self.text[start + 1..self.pos].to_string();
        self.push(TokenKind::Variable(name), start, self.pos);
        Ok(())
    }

    fn lex_number(&mut self) -> CompileResult<()> {
        let start = self.pos;
        let rest = self.rest();
        let len = if rest.starts_with("0x") || rest.starts_with("0X") {
            2 + word_len(&rest[2..])
        } else {
            let mut len = digit_len(rest);
            if rest[len..].starts_with('.') && digit_len(&rest[len + 1..]) > 0 {
                len += 1 + digit_len(&rest[len + 1..]);
            }
            if rest[len..].starts_with(['e', 'E']) {
                let mut exp = len + 1;
                if rest[exp..].starts_with(['-', '+']) {
                    exp += 1;
                }
                let digits = digit_len(&rest[exp..]);
                if digits > 0 {
                    len = exp + digits;
                }
            }
            len + word_len(&rest[len..])
        };
        let value = &rest[..len];
        let valid = if value.starts_with("0x") || value.starts_with("0X") {
            HEX_NUMBER.is_match(value).then_some(()).ok_or("hex")
        } else if value.len() > 1 && value.starts_with('0') && !value[1..].starts_with('.') {
            OCTAL_NUMBER.is_match(value).then_some(()).ok_or("octal")
        } else {
            DECIMAL_NUMBER.is_match(value).then_some(()).ok_or("decimal")
        };
        if let Err(radix) = valid {
            return Err(self.error(start, format!("Not a valid {} number {}", radix, value)));
        }
        self.pos += len;
        self.push(TokenKind::Number(value.to_string()), start, self.pos);
        Ok(())
    }

    /// Length of a qualified identifier whose segments start with `first`
    fn qualified_len(&self, first: fn(char) -> bool) -> usize {
        let rest = self.rest();
        let segment = |s: &str| match s.chars().next() {
            Some(c) if first(c) => 1 + word_len(&s[1..]),
            _ => 0,
        };
        let mut len = if rest.starts_with("::") { 2 } else { 0 };
        len += segment(&rest[len..]);
        while rest[len..].starts_with("::") {
            let next = segment(&rest[len + 2..]);
            if next == 0 {
                break;
            }
            len += 2 + next;
        }
        len
    }

    fn lex_name(&mut self) -> CompileResult<()> {
        let start = self.pos;
        let len = self.qualified_len(|c| c.is_ascii_lowercase() || c == '_');
        self.pos += len;
        let word = &self.text[start..self.pos];
        let kind = keyword(word).unwrap_or_else(|| TokenKind::Name(word.to_string()));
        self.push(kind, start, self.pos);
        Ok(())
    }

    fn lex_class_ref(&mut self) -> CompileResult<()> {
        let start = self.pos;
        let len = self.qualified_len(|c| c.is_ascii_alphabetic());
        self.pos += len;
        let word = self.text[start..self.pos].to_string();
        self.push(TokenKind::ClassRef(word), start, self.pos);
        Ok(())
    }

    /// Scan `/body/` at the current position; `None` when no regex closes on
    /// this line
    fn scan_regex(&mut self) -> Option<String> {
        let start = self.pos;
        let mut value = String::new();
        let mut chars = self.text[start + 1..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\n' => return None,
                '\\' => match chars.next() {
                    Some((_, '/')) => value.push('/'),
                    Some((_, '\n')) | None => return None,
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                },
                '/' => {
                    self.pos = start + 1 + i + 1;
                    return Some(value);
                }
                other => value.push(other),
            }
        }
        None
    }

    fn lex_heredoc(&mut self) -> CompileResult<()> {
        let open = self.pos;
        let Some(close) = self.text[open + 2..].find(')') else {
            return Err(self.unclosed(open, "@(", "parenthesis"));
        };
        let spec = &self.text[open + 2..open + 2 + close];
        let after_tag = open + 2 + close + 1;
        let Some(caps) = HEREDOC_SPEC.captures(spec) else {
            return Err(self.error(
                open,
                "Invalid syntax in heredoc expected @(endtag[:syntax][/escapes])".to_string(),
            ));
        };
        let mut endtag = caps.get(1).map_or("", |m| m.as_str()).trim();
        let syntax = caps.get(2).map_or("", |m| m.as_str()).to_string();
        let escapes = match caps.get(3) {
            Some(flags) => {
                Some(Escapes::heredoc(flags.as_str()).map_err(|msg| self.error(open, msg))?)
            }
            None => None,
        };
        let interpolate = endtag.len() >= 2 && endtag.starts_with('"') && endtag.ends_with('"');
        if interpolate {
            endtag = endtag[1..endtag.len() - 1].trim();
        }
        if endtag.is_empty() {
            return Err(self.error(open, "Missing endtag in heredoc".to_string()));
        }

        self.push(TokenKind::Heredoc(syntax), open, after_tag);

        let body_start = match self.heredoc_cont {
            Some(cont) => cont,
            None => match self.text[after_tag..].find('\n') {
                Some(i) => after_tag + i + 1,
                None => {
                    return Err(self.error(
                        open,
                        "Heredoc without any following lines of text".to_string(),
                    ));
                }
            },
        };

        let end_line = Regex::new(&format!(
            r"^([ \t]*)(?:(\|)[ \t]*)?(?:(-)[ \t]*)?{}[ \t]*\r?\n?$",
            regex::escape(endtag)
        ))
        .map_err(|e| self.error(open, e.to_string()))?;

        let mut lines = Vec::new();
        let mut cursor = body_start;
        let mut terminator = None;
        while cursor < self.text.len() {
            let line_end = self.text[cursor..]
                .find('\n')
                .map_or(self.text.len(), |i| cursor + i + 1);
            let line = &self.text[cursor..line_end];
            if let Some(caps) = end_line.captures(line) {
                let leading = caps.get(1).map_or("", |m| m.as_str()).to_string();
                terminator = Some((leading, caps.get(2).is_some(), caps.get(3).is_some(), line_end));
                break;
            }
            lines.push((cursor, line_end));
            cursor = line_end;
        }
        let Some((leading, margin, trim, resume)) = terminator else {
            return Err(self.error(open, "Heredoc without end-tagged line".to_string()));
        };
        self.heredoc_cont = Some(resume);

        let mut text = String::new();
        let mut segments = Vec::new();
        for &(line_start, line_end) in &lines {
            let mut line = &self.text[line_start..line_end];
            let mut origin = line_start;
            if margin && line.starts_with(leading.as_str()) {
                line = &line[leading.len()..];
                origin += leading.len();
            }
            segments.push((text.len(), self.map.apply(origin)));
            text.push_str(line);
        }
        if trim {
            if text.ends_with("\r\n") {
                text.truncate(text.len() - 2);
            } else if text.ends_with('\n') {
                text.truncate(text.len() - 1);
            }
        }
        if segments.is_empty() {
            segments.push((0, self.map.apply(body_start)));
        }
        let body_end = lines.last().map_or(body_start, |&(_, end)| end);

        if interpolate {
            let map = OffsetMap { segments };
            let mut nested = Lexer::nested(self.source, &text, map);
            nested.lex_interpolated(0, None, &escapes.unwrap_or_default())?;
            self.tokens.extend(nested.tokens);
            self.warnings.extend(nested.warnings);
        } else {
            let value = match &escapes {
                Some(escapes) => unescape(&text, escapes),
                None => text,
            };
            self.push(TokenKind::String(value), body_start, body_end);
        }
        self.pos = after_tag;
        Ok(())
    }

    /// Template text up to the next code tag
    fn lex_text(&mut self) -> CompileResult<()> {
        self.in_code = None;
        let mut text = String::new();
        let start = self.pos;
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                self.push_text(text, start, self.pos);
                return Ok(());
            }
            if rest.starts_with("<%%") {
                text.push_str("<%");
                self.pos += 3;
            } else if rest.starts_with("%%>") {
                text.push_str("%>");
                self.pos += 3;
            } else if rest.starts_with("<%#") {
                let open = self.pos;
                let Some(close) = rest.find("%>") else {
                    return Err(self.error(
                        open,
                        "Unbalanced epp tag, reached <eof> without closing tag.".to_string(),
                    ));
                };
                let trim = rest[..close].ends_with('-');
                self.pos += close + 2;
                if trim {
                    self.trim_right();
                }
            } else if rest.starts_with("<%") {
                let open = self.pos;
                let (len, expr, left_trim) = if rest.starts_with("<%=") {
                    (3, true, false)
                } else if rest.starts_with("<%-") {
                    (3, false, true)
                } else {
                    (2, false, false)
                };
                if left_trim {
                    let kept = text.trim_end_matches([' ', '\t']).len();
                    text.truncate(kept);
                }
                self.push_text(text, start, open);
                self.pos += len;
                if expr {
                    self.push(TokenKind::RenderExpr, open, self.pos);
                }
                self.in_code = Some(open);
                return Ok(());
            } else if let Some(c) = rest.chars().next() {
                text.push(c);
                self.pos += c.len_utf8();
            }
        }
    }

    fn push_text(&mut self, text: String, start: usize, end: usize) {
        if !text.is_empty() {
            self.push(TokenKind::RenderString(text), start, end);
        }
    }

    /// After `-%>`: drop trailing blanks, one line break and the next line's
    /// indentation
    fn trim_right(&mut self) {
        let rest = self.rest();
        let blanks = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        let after = &rest[blanks..];
        let newline = if after.starts_with("\r\n") {
            2
        } else if after.starts_with('\n') {
            1
        } else {
            return;
        };
        let next = &after[newline..];
        let indent = next.len() - next.trim_start_matches([' ', '\t']).len();
        self.pos += blanks + newline + indent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let source = SourceFile::inline(text);
        lex(&source)
            .unwrap()
            .tokens
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| *k != TokenKind::Eof)
            .collect()
    }

    fn lex_error(text: &str) -> String {
        let source = SourceFile::inline(text);
        lex(&source).unwrap_err().message().to_string()
    }

    fn s(text: &str) -> TokenKind {
        TokenKind::String(text.to_string())
    }

    fn var(name: &str) -> TokenKind {
        TokenKind::Variable(name.to_string())
    }

    #[test]
    fn test_assignment_tokens_and_positions() {
        let source = SourceFile::inline("$a = 2 + 2\n  $b");
        let stream = lex(&source).unwrap();
        let kinds: Vec<_> = stream.tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                var("a"),
                TokenKind::Assign,
                TokenKind::Number("2".into()),
                TokenKind::Plus,
                TokenKind::Number("2".into()),
                var("b"),
                TokenKind::Eof,
            ]
        );
        let b = &stream.tokens[5];
        assert_eq!((b.line, b.column), (2, 3));
        assert_eq!(source.slice(b.span), "$b");
    }

    #[test]
    fn test_names_keywords_and_refs() {
        assert_eq!(
            kinds("class apache::mod inherits ::base { } File Foo::Bar"),
            vec![
                TokenKind::Class,
                TokenKind::Name("apache::mod".into()),
                TokenKind::Inherits,
                TokenKind::Name("::base".into()),
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::ClassRef("File".into()),
                TokenKind::ClassRef("Foo::Bar".into()),
            ]
        );
        assert_eq!(kinds("attr"), vec![TokenKind::Reserved("attr".into())]);
        assert_eq!(kinds("true"), vec![TokenKind::Boolean(true)]);
    }

    #[test]
    fn test_regex_versus_division() {
        assert_eq!(
            kinds("$a / 2 / 3"),
            vec![
                var("a"),
                TokenKind::Div,
                TokenKind::Number("2".into()),
                TokenKind::Div,
                TokenKind::Number("3".into()),
            ]
        );
        assert_eq!(
            kinds(r"$a =~ /foo\/bar/"),
            vec![var("a"), TokenKind::Match, TokenKind::Regex("foo/bar".into())]
        );
        assert_eq!(
            kinds("node /^www\\d+$/ {}"),
            vec![
                TokenKind::Node,
                TokenKind::Regex("^www\\d+$".into()),
                TokenKind::LBrace,
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn test_regex_cannot_span_lines() {
        assert_eq!(
            kinds("= /a\n/"),
            vec![
                TokenKind::Assign,
                TokenKind::Div,
                TokenKind::Name("a".into()),
                TokenKind::Div,
            ]
        );
    }

    #[test]
    fn test_list_start_versus_access() {
        assert_eq!(
            kinds("$a[0] [1]"),
            vec![
                var("a"),
                TokenKind::LBrack,
                TokenKind::Number("0".into()),
                TokenKind::RBrack,
                TokenKind::ListStart,
                TokenKind::Number("1".into()),
                TokenKind::RBrack,
            ]
        );
        assert_eq!(kinds("[")[0], TokenKind::ListStart);
    }

    #[test]
    fn test_selector_brace() {
        let k = kinds("$x ? { default => 1 }");
        assert_eq!(k[1], TokenKind::Question);
        assert_eq!(k[2], TokenKind::SelBrace);
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(
            kinds("<<| |>> <| |> -> ~> <- <~ += => +>"),
            vec![
                TokenKind::LLCollect,
                TokenKind::RRCollect,
                TokenKind::LCollect,
                TokenKind::RCollect,
                TokenKind::InEdge,
                TokenKind::InEdgeSub,
                TokenKind::OutEdge,
                TokenKind::OutEdgeSub,
                TokenKind::AppendAssign,
                TokenKind::Farrow,
                TokenKind::PlusArrow,
            ]
        );
    }

    #[test]
    fn test_single_quoted_escapes() {
        assert_eq!(kinds(r"'it\'s \\ \n'"), vec![s(r"it's \ \n")]);
    }

    #[test]
    fn test_double_quoted_escapes() {
        let source = SourceFile::inline(r#""a\tb\$c\qd""#);
        let stream = lex(&source).unwrap();
        assert_eq!(stream.tokens[0].kind, s("a\tb$c\\qd"));
        assert_eq!(stream.warnings.len(), 1);
        assert!(stream.warnings[0].message.contains("Unrecognized escape sequence '\\q'"));
    }

    #[test]
    fn test_interpolation_fragments() {
        assert_eq!(
            kinds(r#""x $a y ${b} z""#),
            vec![
                TokenKind::DqPre("x ".into()),
                var("a"),
                TokenKind::DqMid(" y ".into()),
                TokenKind::Name("b".into()),
                TokenKind::DqPost(" z".into()),
            ]
        );
        assert_eq!(
            kinds(r#""${h['k']}""#),
            vec![
                TokenKind::DqPre(String::new()),
                TokenKind::Name("h".into()),
                TokenKind::LBrack,
                s("k"),
                TokenKind::RBrack,
                TokenKind::DqPost(String::new()),
            ]
        );
    }

    #[test]
    fn test_nested_interpolation() {
        let k = kinds(r#""a ${ "b $c" } d""#);
        assert_eq!(k[0], TokenKind::DqPre("a ".into()));
        assert_eq!(k[1], TokenKind::DqPre("b ".into()));
        assert_eq!(k[2], var("c"));
        assert_eq!(k[3], TokenKind::DqPost(String::new()));
        assert_eq!(k[4], TokenKind::DqPost(" d".into()));
    }

    #[test]
    fn test_dollar_without_name_is_literal() {
        assert_eq!(kinds(r#""cost: $ 5""#), vec![s("cost: $ 5")]);
    }

    #[test]
    fn test_unclosed_quote_preview() {
        assert_eq!(
            lex_error("'abc"),
            "Unclosed quote after \"'\" followed by 'abc'"
        );
        assert_eq!(
            lex_error("\"abc\ndefgh"),
            "Unclosed quote after '\"' followed by 'abc\\nd...'"
        );
        assert_eq!(lex_error("'"), "Unclosed quote after \"'\" followed by '<eof>'");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("0x1F 0777 3.14 1e-5 10"),
            vec![
                TokenKind::Number("0x1F".into()),
                TokenKind::Number("0777".into()),
                TokenKind::Number("3.14".into()),
                TokenKind::Number("1e-5".into()),
                TokenKind::Number("10".into()),
            ]
        );
        assert_eq!(lex_error("0xG1"), "Not a valid hex number 0xG1");
        assert_eq!(lex_error("$a = 09"), "Not a valid octal number 09");
        assert_eq!(lex_error("1a"), "Not a valid decimal number 1a");
    }

    #[test]
    fn test_heredoc_margin_and_trim() {
        let text = "$a = @(END)\n  hello\n    world\n  |- END\n$b = 1\n";
        assert_eq!(
            kinds(text),
            vec![
                var("a"),
                TokenKind::Assign,
                TokenKind::Heredoc(String::new()),
                s("hello\n  world"),
                var("b"),
                TokenKind::Assign,
                TokenKind::Number("1".into()),
            ]
        );
    }

    #[test]
    fn test_heredoc_without_margin_keeps_indentation() {
        let text = "@(END:json)\n  x\n  END\n";
        assert_eq!(
            kinds(text),
            vec![TokenKind::Heredoc("json".into()), s("  x\n")]
        );
    }

    #[test]
    fn test_two_heredocs_on_one_line() {
        let text = "foo(@(A), @(B))\na text\nA\nb text\nB\n$x";
        assert_eq!(
            kinds(text),
            vec![
                TokenKind::Name("foo".into()),
                TokenKind::LParen,
                TokenKind::Heredoc(String::new()),
                s("a text\n"),
                TokenKind::Comma,
                TokenKind::Heredoc(String::new()),
                s("b text\n"),
                TokenKind::RParen,
                var("x"),
            ]
        );
    }

    #[test]
    fn test_heredoc_escapes() {
        let text = "@(END/t)\na\\tb\\n\nEND\n";
        assert_eq!(
            kinds(text),
            vec![TokenKind::Heredoc(String::new()), s("a\tb\\n\n")]
        );
        assert_eq!(
            lex_error("@(END/tt)\nx\nEND\n"),
            "An escape char for @() may only appear once. Got 't, t'"
        );
        assert_eq!(
            lex_error("@(END/q)\nx\nEND\n"),
            "Invalid heredoc escape char. Only t, r, n, s, L, $ allowed. Got 'q'"
        );
    }

    #[test]
    fn test_heredoc_interpolation_only_when_quoted() {
        assert_eq!(
            kinds("@(\"END\")\nhi $name\nEND\n"),
            vec![
                TokenKind::Heredoc(String::new()),
                TokenKind::DqPre("hi ".into()),
                var("name"),
                TokenKind::DqPost("\n".into()),
            ]
        );
        assert_eq!(
            kinds("@(END)\nhi $name\nEND\n"),
            vec![TokenKind::Heredoc(String::new()), s("hi $name\n")]
        );
    }

    #[test]
    fn test_heredoc_interpolation_spans_point_into_source() {
        let text = "@(\"END\")\n  hi $name\n  | END\n";
        let source = SourceFile::inline(text);
        let stream = lex(&source).unwrap();
        let variable = stream
            .tokens
            .iter()
            .find(|t| t.kind == var("name"))
            .unwrap();
        assert_eq!(source.slice(variable.span), "$name");
        assert_eq!(variable.line, 2);
    }

    #[test]
    fn test_heredoc_errors() {
        assert_eq!(lex_error("@(END)"), "Heredoc without any following lines of text");
        assert_eq!(lex_error("@(END)\nabc\n"), "Heredoc without end-tagged line");
        assert_eq!(lex_error("@(\"\")\nabc\n"), "Missing endtag in heredoc");
    }

    #[test]
    fn test_doc_comments_attach_to_definitions() {
        let text = "# first\n# second\nclass foo(\n  # param doc\n  $a,\n) {\n}\n\n# lost\n\nclass bar {}\n";
        let source = SourceFile::inline(text);
        let stream = lex(&source).unwrap();
        let docs: Vec<_> = stream.docs.values().cloned().collect();
        assert_eq!(docs, vec!["first\nsecond".to_string()]);
        assert_eq!(stream.tokens[*stream.docs.keys().next().unwrap()].kind, TokenKind::Class);
    }

    #[test]
    fn test_block_comment_doc() {
        let text = "/*\n * Manages ntp\n */\nclass ntp {}";
        let stream = lex(&SourceFile::inline(text)).unwrap();
        assert_eq!(stream.docs.values().next().map(String::as_str), Some("Manages ntp"));
    }

    #[test]
    fn test_unclosed_block_comment() {
        assert_eq!(lex_error("/* abc"), "Unclosed comment after '/*' followed by ' abc'");
    }

    #[test]
    fn test_template_mode() {
        let source = SourceFile::inline("a <%= $x %> b\n  <%- $y -%>\n  c <%# note %><%% %%>");
        let stream = lex_template(&source).unwrap();
        let kinds: Vec<_> = stream.tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::RenderString("a ".into()),
                TokenKind::RenderExpr,
                var("x"),
                TokenKind::EppEnd,
                TokenKind::RenderString(" b\n".into()),
                var("y"),
                TokenKind::EppEndTrim,
                TokenKind::RenderString("c <% %>".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_template_unbalanced_tag() {
        let source = SourceFile::inline("text <% $x ");
        let err = lex_template(&source).unwrap_err();
        assert!(err.message().starts_with("Unbalanced epp tag"));
        assert_eq!(err.diagnostic().column, 6);
    }

    #[test]
    fn test_illegal_character() {
        assert_eq!(lex_error("$a = ^"), "Illegal character '^'");
    }

    // Property tests using proptest
    proptest::proptest! {
        #[test]
        fn prop_single_quoted_roundtrip(body in "[ -&(-\\[\\]-~]{0,40}") {
            let text = format!("'{}'", body);
            let source = SourceFile::inline(text);
            let stream = lex(&source).unwrap();
            prop_assert_eq!(&stream.tokens[0].kind, &TokenKind::String(body));
        }

        #[test]
        fn prop_heredoc_margin_strip_is_idempotent(
            margin in 0usize..6,
            lines in proptest::collection::vec((0usize..4, "[a-z][a-z ]{0,12}"), 1..6),
        ) {
            let pad = " ".repeat(margin);
            let body: String = lines
                .iter()
                .map(|(extra, content)| format!("{}{}{}\n", pad, " ".repeat(*extra), content))
                .collect();
            let stripped = match &kinds(&format!("@(END)\n{}{}| END\n", body, pad))[..] {
                [TokenKind::Heredoc(_), TokenKind::String(text)] => text.clone(),
                other => panic!("unexpected tokens {:?}", other),
            };

            let quoted = kinds(&format!("'{}'", stripped));
            prop_assert_eq!(&quoted[0], &TokenKind::String(stripped.clone()));

            let reindented: String = stripped
                .split_inclusive('\n')
                .map(|line| format!("{}{}", pad, line))
                .collect();
            let again = kinds(&format!("@(END)\n{}{}| END\n", reindented, pad));
            prop_assert_eq!(&again[1], &TokenKind::String(stripped));
        }

        #[test]
        fn prop_spans_stay_in_source(text in "[a-z$=+ '\"\\[\\]{}()0-9\n#,]{0,60}") {
            let source = SourceFile::inline(text.clone());
            if let Ok(stream) = lex(&source) {
                for token in &stream.tokens {
                    prop_assert!(token.span.end() <= text.len());
                }
            }
        }
    }
}
