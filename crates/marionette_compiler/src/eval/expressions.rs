//! Expression evaluation.

use super::{Closure, Endpoint, Evaluator, Relationship, evaluation, references};
use crate::catalog::EdgeKind;
use crate::registry::{DeclarationKind, FunctionDeclaration};
use crate::scope::{ScopeId, ScopeKind};
use crate::types::{DataType, ResourceRef};
use crate::value::Value;
use crate::functions::Call;
use indexmap::IndexMap;
use marionette_core::{CompileResult, name};
use marionette_syntax::{
    AssignOp, Ast, BinaryOp, CaseBranch, ExprId, NodeKind, Parameter, RelationshipOp, UnaryOp,
};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;

impl Evaluator<'_> {
    /// Evaluate `id` in `scope`
    pub(crate) fn evaluate(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
    ) -> CompileResult<Value> {
        match ast.kind(id) {
            NodeKind::Block(items) => {
                let mut last = Value::Undef;
                for &item in items {
                    last = self.evaluate(ast, item, scope)?;
                }
                Ok(last)
            }
            NodeKind::Undef => Ok(Value::Undef),
            NodeKind::Default => Ok(Value::Default),
            NodeKind::Boolean(b) => Ok(Value::Boolean(*b)),
            NodeKind::Integer(i) => Ok(Value::Integer(*i)),
            NodeKind::Float(x) => Ok(Value::Float(*x)),
            NodeKind::Str(s) => Ok(Value::String(s.clone())),
            NodeKind::Concat(parts) => {
                let mut text = String::new();
                for &part in parts {
                    text.push_str(&self.evaluate(ast, part, scope)?.to_string());
                }
                Ok(Value::String(text))
            }
            NodeKind::Heredoc { text, .. } => self.evaluate(ast, *text, scope),
            NodeKind::Regex(source) => Ok(Value::Regex(source.clone())),
            NodeKind::Name(word) => Ok(Value::String(word.clone())),
            NodeKind::TypeRef(type_name) => Ok(Value::Type(type_reference(type_name))),
            NodeKind::Variable(variable) => self.variable(ast, id, scope, variable),
            NodeKind::List(items) => Ok(Value::Array(self.arguments(ast, items, scope)?)),
            NodeKind::Hash(pairs) => {
                let mut map = IndexMap::new();
                for &(key, value) in pairs {
                    let key = self.evaluate(ast, key, scope)?.to_key();
                    let value = self.evaluate(ast, value, scope)?;
                    map.insert(key, value);
                }
                Ok(Value::Hash(map))
            }
            NodeKind::Access { target, keys } => {
                let target = self.evaluate(ast, *target, scope)?;
                let keys = self.arguments(ast, keys, scope)?;
                access(ast, id, target, keys)
            }
            NodeKind::Unary { op, operand } => {
                let value = self.evaluate(ast, *operand, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Neg => match number(ast, id, &value)? {
                        Value::Integer(i) => i
                            .checked_neg()
                            .map(Value::Integer)
                            .ok_or_else(|| evaluation(ast, id, "Integer overflow")),
                        Value::Float(x) => Ok(Value::Float(-x)),
                        _ => Err(not_numeric(ast, id, &value)),
                    },
                }
            }
            NodeKind::Binary { op, left, right } => self.binary(ast, id, scope, *op, *left, *right),
            NodeKind::And(left, right) => {
                let result = self.evaluate(ast, *left, scope)?.is_truthy()
                    && self.evaluate(ast, *right, scope)?.is_truthy();
                Ok(Value::Boolean(result))
            }
            NodeKind::Or(left, right) => {
                let result = self.evaluate(ast, *left, scope)?.is_truthy()
                    || self.evaluate(ast, *right, scope)?.is_truthy();
                Ok(Value::Boolean(result))
            }
            NodeKind::Assign { op, target, value } => {
                self.assign(ast, id, scope, *op, *target, *value)
            }
            NodeKind::Selector { subject, cases } => self.selector(ast, id, scope, *subject, cases),
            NodeKind::If {
                condition,
                then,
                otherwise,
            } => self.conditional(ast, scope, *condition, true, *then, *otherwise),
            NodeKind::Unless {
                condition,
                then,
                otherwise,
            } => self.conditional(ast, scope, *condition, false, *then, *otherwise),
            NodeKind::Case { subject, branches } => self.case(ast, scope, *subject, branches),
            NodeKind::Call {
                name, args, lambda, ..
            } => {
                let args = self.arguments(ast, args, scope)?;
                self.call(ast, id, scope, name, args, *lambda)
            }
            NodeKind::MethodCall {
                receiver,
                name,
                args,
                lambda,
            } => {
                let mut values = vec![self.evaluate(ast, *receiver, scope)?];
                values.extend(self.arguments(ast, args, scope)?);
                self.call(ast, id, scope, name, values, *lambda)
            }
            NodeKind::Lambda { .. } | NodeKind::Query { .. } => Ok(Value::Undef),
            NodeKind::Resource {
                form,
                type_name,
                bodies,
            } => self.resource_expression(ast, id, scope, *form, type_name, bodies),
            NodeKind::ResourceDefaults { type_name, ops } => {
                self.resource_defaults(ast, scope, type_name, ops)?;
                Ok(Value::Undef)
            }
            NodeKind::ResourceOverride { target, ops } => {
                self.resource_override(ast, id, scope, *target, ops)?;
                Ok(Value::Undef)
            }
            NodeKind::Collect {
                type_name,
                exported,
                query,
                ops,
            } => {
                self.collect(ast, id, scope, type_name, *exported, *query, ops)?;
                Ok(Value::Undef)
            }
            NodeKind::Relationship { .. } => match self.relationship(ast, id, scope)? {
                Endpoint::Resources(refs) => {
                    Ok(Value::Array(refs.into_iter().map(Value::Reference).collect()))
                }
                Endpoint::Collector(_) => Ok(Value::Undef),
            },
            NodeKind::Class(_)
            | NodeKind::Define(_)
            | NodeKind::Function(_)
            | NodeKind::NodeDefinition { .. }
            | NodeKind::Import(_) => Ok(Value::Undef),
            NodeKind::RenderString(text) => {
                self.emit(text);
                Ok(Value::Undef)
            }
            NodeKind::RenderExpr(expr) => {
                let value = self.evaluate(ast, *expr, scope)?;
                self.emit(&value.to_string());
                Ok(Value::Undef)
            }
            NodeKind::Template { body, .. } => self.evaluate(ast, *body, scope),
        }
    }

    /// Evaluate each expression in order
    pub(crate) fn arguments(
        &mut self,
        ast: &Arc<Ast>,
        items: &[ExprId],
        scope: ScopeId,
    ) -> CompileResult<Vec<Value>> {
        items
            .iter()
            .map(|&item| self.evaluate(ast, item, scope))
            .collect()
    }

    fn variable(
        &mut self,
        ast: &Ast,
        id: ExprId,
        scope: ScopeId,
        variable: &str,
    ) -> CompileResult<Value> {
        if name::is_qualified(variable) {
            return Ok(self.qualified_variable(ast, id, scope, variable));
        }
        if let Some(bare) = variable.strip_prefix(name::SEPARATOR) {
            let top = self.scopes.top();
            return Ok(self.scopes.get(top).local(bare).cloned().unwrap_or_default());
        }
        match self.scopes.lookup(scope, variable) {
            Some(value) => Ok(value.clone()),
            None if self.config.strict_variables
                && !variable.chars().all(|c| c.is_ascii_digit()) =>
            {
                Err(evaluation(ast, id, format!("Unknown variable: '${}'", variable)))
            }
            None => Ok(Value::Undef),
        }
    }

    /// `$class::name`: read a variable from an evaluated class, warning once
    /// and yielding `undef` when the class is unknown or not evaluated yet
    fn qualified_variable(&mut self, ast: &Ast, id: ExprId, scope: ScopeId, variable: &str) -> Value {
        let class_name = name::namespace(variable);
        let leaf = name::basename(variable);
        let wanted = if name::is_rooted(variable) {
            format!("{}{}", name::SEPARATOR, class_name)
        } else {
            class_name.to_string()
        };
        let namespace = self.namespace(scope);
        let found = self
            .registry
            .find(&namespace, &wanted, DeclarationKind::Hostclass)
            .map(|d| d.name.clone());
        let problem = match found {
            Some(class) => match self.scopes.class_scope(&class) {
                Some(class_scope) => {
                    return self
                        .scopes
                        .lookup(class_scope, leaf)
                        .cloned()
                        .unwrap_or_default();
                }
                None => "has not been evaluated",
            },
            None => "could not be found",
        };
        let shown = variable.strip_prefix(name::SEPARATOR).unwrap_or(variable);
        self.warn(ast.diagnostic(
            id,
            format!(
                "Could not look up qualified variable '{}'; class {} {}",
                shown,
                name::canonical(class_name),
                problem
            ),
        ));
        Value::Undef
    }

    fn assign(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
        op: AssignOp,
        target: ExprId,
        value: ExprId,
    ) -> CompileResult<Value> {
        let NodeKind::Variable(variable) = ast.kind(target) else {
            return Err(evaluation(ast, target, "Illegal attempt to assign to a non-variable"));
        };
        let value = self.evaluate(ast, value, scope)?;
        let result = match op {
            AssignOp::Set => self
                .scopes
                .set(scope, variable, value.clone())
                .map(|()| value),
            AssignOp::Append => self.scopes.append(scope, variable, value),
            AssignOp::Delete => self.scopes.remove(scope, variable, value),
        };
        result.map_err(|e| evaluation(ast, id, e.to_string()))
    }

    fn binary(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
    ) -> CompileResult<Value> {
        let lhs = self.evaluate(ast, left, scope)?;
        let rhs = self.evaluate(ast, right, scope)?;
        match op {
            BinaryOp::Match => Ok(Value::Boolean(
                self.matches_pattern(ast, id, scope, &lhs, &rhs, true)?,
            )),
            BinaryOp::NoMatch => Ok(Value::Boolean(
                !self.matches_pattern(ast, id, scope, &lhs, &rhs, false)?,
            )),
            BinaryOp::Eq => Ok(Value::Boolean(lhs.equals(&rhs))),
            BinaryOp::Ne => Ok(Value::Boolean(!lhs.equals(&rhs))),
            BinaryOp::Lt => Ok(Value::Boolean(compare(ast, id, &lhs, &rhs, "<")?.is_lt())),
            BinaryOp::Le => Ok(Value::Boolean(compare(ast, id, &lhs, &rhs, "<=")?.is_le())),
            BinaryOp::Gt => Ok(Value::Boolean(compare(ast, id, &lhs, &rhs, ">")?.is_gt())),
            BinaryOp::Ge => Ok(Value::Boolean(compare(ast, id, &lhs, &rhs, ">=")?.is_ge())),
            BinaryOp::In => Ok(Value::Boolean(contains(&rhs, &lhs))),
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::Shl
            | BinaryOp::Shr => arithmetic(ast, id, op, lhs, rhs),
        }
    }

    /// Regex, string-as-regex or type match; a successful regex match with
    /// `capture` set pushes `$0`..`$n` onto `scope`
    fn matches_pattern(
        &mut self,
        ast: &Ast,
        id: ExprId,
        scope: ScopeId,
        subject: &Value,
        pattern: &Value,
        capture: bool,
    ) -> CompileResult<bool> {
        let source = match pattern {
            Value::Type(data_type) => return Ok(data_type.matches(subject)),
            Value::Regex(source) | Value::String(source) => source,
            other => {
                return Err(evaluation(
                    ast,
                    id,
                    format!("Cannot match against a {} value", other.type_name()),
                ));
            }
        };
        let regex = compile_regex(ast, id, source)?;
        let text = subject.to_string();
        let Some(captures) = regex.captures(&text) else {
            return Ok(false);
        };
        if capture {
            let bindings = captures
                .iter()
                .enumerate()
                .map(|(i, group)| {
                    let value = group.map_or(Value::Undef, |m| Value::from(m.as_str()));
                    (i.to_string(), value)
                })
                .collect();
            self.scopes.push_ephemeral(scope, bindings);
        }
        Ok(true)
    }

    /// Option matching shared by `case` and selectors
    fn option_matches(
        &mut self,
        ast: &Ast,
        id: ExprId,
        scope: ScopeId,
        subject: &Value,
        option: &Value,
    ) -> CompileResult<bool> {
        match option {
            Value::Regex(_) | Value::Type(_) => {
                self.matches_pattern(ast, id, scope, subject, option, true)
            }
            other => Ok(subject.equals(other)),
        }
    }

    fn selector(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
        subject: ExprId,
        cases: &[(ExprId, ExprId)],
    ) -> CompileResult<Value> {
        let value = self.evaluate(ast, subject, scope)?;
        let level = self.scopes.ephemeral_level(scope);
        let mut fallback = None;
        for &(option, result) in cases {
            if matches!(ast.kind(option), NodeKind::Default) {
                fallback = Some(result);
                continue;
            }
            let candidate = self.evaluate(ast, option, scope)?;
            if self.option_matches(ast, option, scope, &value, &candidate)? {
                let selected = self.evaluate(ast, result, scope);
                self.scopes.pop_ephemeral(scope, level);
                return selected;
            }
        }
        match fallback {
            Some(result) => self.evaluate(ast, result, scope),
            None => Err(evaluation(
                ast,
                id,
                format!("No matching value for selector param '{}'", value),
            )),
        }
    }

    fn conditional(
        &mut self,
        ast: &Arc<Ast>,
        scope: ScopeId,
        condition: ExprId,
        expect: bool,
        then: ExprId,
        otherwise: Option<ExprId>,
    ) -> CompileResult<Value> {
        let level = self.scopes.ephemeral_level(scope);
        let truthy = self.evaluate(ast, condition, scope)?.is_truthy();
        let result = if truthy == expect {
            self.evaluate(ast, then, scope)
        } else {
            match otherwise {
                Some(branch) => self.evaluate(ast, branch, scope),
                None => Ok(Value::Undef),
            }
        };
        self.scopes.pop_ephemeral(scope, level);
        result
    }

    fn case(
        &mut self,
        ast: &Arc<Ast>,
        scope: ScopeId,
        subject: ExprId,
        branches: &[CaseBranch],
    ) -> CompileResult<Value> {
        let value = self.evaluate(ast, subject, scope)?;
        let level = self.scopes.ephemeral_level(scope);
        let mut fallback = None;
        for branch in branches {
            for &option in &branch.options {
                if matches!(ast.kind(option), NodeKind::Default) {
                    fallback = Some(branch.body);
                    continue;
                }
                let candidate = self.evaluate(ast, option, scope)?;
                if self.option_matches(ast, option, scope, &value, &candidate)? {
                    let result = self.evaluate(ast, branch.body, scope);
                    self.scopes.pop_ephemeral(scope, level);
                    return result;
                }
            }
        }
        match fallback {
            Some(body) => self.evaluate(ast, body, scope),
            None => Ok(Value::Undef),
        }
    }

    /// Call a function: functions written in the language first, then
    /// builtins
    pub(crate) fn call(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
        function: &str,
        args: Vec<Value>,
        lambda: Option<ExprId>,
    ) -> CompileResult<Value> {
        let namespace = self.namespace(scope);
        if let Some(declared) = self.registry.find_function(&namespace, function).cloned() {
            return self.call_user_function(ast, id, &declared, args);
        }
        let Some(builtin) = self.functions.get(function) else {
            return Err(evaluation(ast, id, format!("Unknown function: '{}'", function)));
        };
        let lambda = lambda.map(|lambda| Closure {
            ast: Arc::clone(ast),
            lambda,
            scope,
        });
        builtin(
            self,
            Call {
                name: function,
                args,
                lambda,
                ast,
                id,
                scope,
            },
        )
    }

    fn call_user_function(
        &mut self,
        ast: &Ast,
        id: ExprId,
        function: &FunctionDeclaration,
        args: Vec<Value>,
    ) -> CompileResult<Value> {
        let top = self.scopes.top();
        let origin = self.scopes.get(top).origin.clone();
        let scope = self.scopes.create(
            top,
            ScopeKind::Local,
            name::namespace(&function.name),
            origin,
            None,
        );
        let owner = format!("Function {}", function.name);
        self.bind_positional(&function.ast, scope, &function.params, args, &owner, (ast, id))?;
        self.evaluate(&function.ast, function.body, scope)
    }

    /// Invoke a lambda with positional arguments
    pub(crate) fn call_lambda(
        &mut self,
        closure: &Closure,
        args: Vec<Value>,
        call_site: (&Ast, ExprId),
    ) -> CompileResult<Value> {
        let NodeKind::Lambda { params, body } = closure.ast.kind(closure.lambda) else {
            return Err(evaluation(call_site.0, call_site.1, "Expected a lambda"));
        };
        let parent = self.scopes.get(closure.scope);
        let (namespace, origin) = (parent.namespace.clone(), parent.origin.clone());
        let scope = self
            .scopes
            .create(closure.scope, ScopeKind::Local, namespace, origin, None);
        self.bind_positional(&closure.ast, scope, params, args, "Lambda", call_site)?;
        self.evaluate(&closure.ast, *body, scope)
    }

    /// Number of parameters a lambda declares
    pub(crate) fn lambda_arity(closure: &Closure) -> usize {
        match closure.ast.kind(closure.lambda) {
            NodeKind::Lambda { params, .. } => params.len(),
            _ => 0,
        }
    }

    fn bind_positional(
        &mut self,
        ast: &Arc<Ast>,
        scope: ScopeId,
        params: &[Parameter],
        args: Vec<Value>,
        owner: &str,
        call_site: (&Ast, ExprId),
    ) -> CompileResult<()> {
        let given = args.len();
        let accepts_rest = params.last().is_some_and(|p| p.captures_rest);
        if given > params.len() && !accepts_rest {
            return Err(evaluation(
                call_site.0,
                call_site.1,
                format!("{} expects {} arguments, got {}", owner, params.len(), given),
            ));
        }
        let mut args = args.into_iter();
        for param in params {
            let value = if param.captures_rest {
                Value::Array(args.by_ref().collect())
            } else if let Some(value) = args.next() {
                value
            } else if let Some(default) = param.default {
                self.evaluate(ast, default, scope)?
            } else {
                return Err(evaluation(
                    call_site.0,
                    call_site.1,
                    format!("{} expects a value for parameter '{}'", owner, param.name),
                ));
            };
            self.check_type(ast, scope, param, &value, owner)?;
            self.scopes
                .set(scope, &param.name, value)
                .map_err(|e| evaluation(call_site.0, call_site.1, e.to_string()))?;
        }
        Ok(())
    }

    /// Check `value` against the parameter's declared type
    pub(crate) fn check_type(
        &mut self,
        ast: &Arc<Ast>,
        scope: ScopeId,
        param: &Parameter,
        value: &Value,
        owner: &str,
    ) -> CompileResult<()> {
        let Some(type_expr) = param.type_expr else {
            return Ok(());
        };
        let expected = match self.evaluate(ast, type_expr, scope)? {
            Value::Type(data_type) => data_type,
            other => {
                return Err(evaluation(
                    ast,
                    type_expr,
                    format!("{} is not a type", other.type_name()),
                ));
            }
        };
        let ok = match (param.captures_rest, value) {
            (true, Value::Array(items)) => items.iter().all(|item| expected.matches(item)),
            _ => expected.matches(value),
        };
        if ok {
            Ok(())
        } else {
            Err(evaluation(
                ast,
                type_expr,
                format!(
                    "{}: parameter '{}' expects a {} value, got {}",
                    owner,
                    param.name,
                    expected,
                    value.type_name()
                ),
            ))
        }
    }

    /// Record the relationship at `id`; returns its right operand so chains
    /// continue from it
    pub(crate) fn relationship(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
    ) -> CompileResult<Endpoint> {
        let NodeKind::Relationship { op, left, right } = ast.kind(id) else {
            return Err(evaluation(ast, id, "Expected a relationship"));
        };
        let left = self.endpoint(ast, *left, scope)?;
        let right = self.endpoint(ast, *right, scope)?;
        let (source, target, kind) = match op {
            RelationshipOp::Before => (left, right.clone(), EdgeKind::Before),
            RelationshipOp::Notify => (left, right.clone(), EdgeKind::Notify),
            RelationshipOp::Require => (right.clone(), left, EdgeKind::Before),
            RelationshipOp::Subscribe => (right.clone(), left, EdgeKind::Notify),
        };
        self.relationships.push(Relationship {
            source,
            target,
            kind,
            location: ast.diagnostic(id, ""),
        });
        Ok(right)
    }

    fn endpoint(&mut self, ast: &Arc<Ast>, id: ExprId, scope: ScopeId) -> CompileResult<Endpoint> {
        match ast.kind(id) {
            NodeKind::Relationship { .. } => self.relationship(ast, id, scope),
            NodeKind::Collect {
                type_name,
                exported,
                query,
                ops,
            } => Ok(Endpoint::Collector(
                self.collect(ast, id, scope, type_name, *exported, *query, ops)?,
            )),
            _ => {
                let value = self.evaluate(ast, id, scope)?;
                let refs = references(&value);
                if refs.is_empty() && !value.is_undef() {
                    return Err(evaluation(
                        ast,
                        id,
                        format!("Relationship operand must be a resource reference, got {}", value.type_name()),
                    ));
                }
                Ok(Endpoint::Resources(refs))
            }
        }
    }

    fn emit(&mut self, text: &str) {
        if let Some(buffer) = self.render.last_mut() {
            buffer.push_str(text);
        }
    }

    /// Evaluate a parsed template, collecting its output
    pub(crate) fn render_template(&mut self, ast: &Arc<Ast>, scope: ScopeId) -> CompileResult<String> {
        self.render.push(String::new());
        let result = self.evaluate(ast, ast.root(), scope);
        let text = self.render.pop().unwrap_or_default();
        result.map(|_| text)
    }
}

fn type_reference(type_name: &str) -> DataType {
    DataType::named(type_name).unwrap_or_else(|| DataType::Resource(name::canonical(type_name)))
}

pub(crate) fn compile_regex(ast: &Ast, id: ExprId, source: &str) -> CompileResult<Regex> {
    Regex::new(source)
        .map_err(|e| evaluation(ast, id, format!("Invalid regular expression /{}/: {}", source, e)))
}

fn access(ast: &Ast, id: ExprId, target: Value, keys: Vec<Value>) -> CompileResult<Value> {
    match target {
        Value::Type(DataType::Resource(type_name)) => reference_access(ast, id, type_name, keys),
        Value::Type(data_type) => data_type
            .parameterize(&keys)
            .map(Value::Type)
            .map_err(|e| evaluation(ast, id, e.to_string())),
        Value::Array(items) => {
            let (start, count) = index_keys(ast, id, &keys)?;
            match count {
                None => Ok(slice_bounds(items.len(), start, None)
                    .and_then(|(from, _)| items.get(from).cloned())
                    .unwrap_or_default()),
                Some(_) => Ok(Value::Array(
                    slice_bounds(items.len(), start, count)
                        .map(|(from, to)| items[from..to].to_vec())
                        .unwrap_or_default(),
                )),
            }
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (start, count) = index_keys(ast, id, &keys)?;
            let count = count.or(Some(1));
            Ok(slice_bounds(chars.len(), start, count)
                .map(|(from, to)| Value::String(chars[from..to].iter().collect()))
                .unwrap_or_default())
        }
        Value::Hash(map) => match keys.as_slice() {
            [key] => Ok(map.get(&key.to_key()).cloned().unwrap_or_default()),
            keys => Ok(Value::Array(
                keys.iter()
                    .filter_map(|key| map.get(&key.to_key()).cloned())
                    .collect(),
            )),
        },
        other => Err(evaluation(
            ast,
            id,
            format!("Operator '[]' is not applicable to a value of type {}", other.type_name()),
        )),
    }
}

/// `File['a']`, `File['a', 'b']`, `Resource['file', 'a']`
fn reference_access(
    ast: &Ast,
    id: ExprId,
    type_name: String,
    keys: Vec<Value>,
) -> CompileResult<Value> {
    let (type_name, titles) = if type_name.is_empty() {
        let Some((first, rest)) = keys.split_first() else {
            return Err(evaluation(ast, id, "Resource[] expects a type name"));
        };
        (name::canonical(&first.to_string()), rest.to_vec())
    } else {
        (type_name, keys)
    };
    let single = matches!(titles.as_slice(), [title] if !matches!(title, Value::Array(_)));
    let mut refs: Vec<Value> = titles
        .into_iter()
        .flat_map(Value::into_array)
        .map(|title| Value::Reference(ResourceRef::new(&type_name, title.to_string())))
        .collect();
    match refs.len() {
        0 => Ok(Value::Type(DataType::Resource(type_name))),
        1 if single => Ok(refs.remove(0)),
        _ => Ok(Value::Array(refs)),
    }
}

fn index_keys(ast: &Ast, id: ExprId, keys: &[Value]) -> CompileResult<(i64, Option<i64>)> {
    match keys {
        [Value::Integer(start)] => Ok((*start, None)),
        [Value::Integer(start), Value::Integer(count)] => Ok((*start, Some(*count))),
        _ => Err(evaluation(ast, id, "Index must be one or two integers")),
    }
}

/// Start and end of `[start, count]` over `len` elements; negative starts
/// count from the end, a negative count stops that far from the end
fn slice_bounds(len: usize, start: i64, count: Option<i64>) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 { len + start } else { start };
    if start < 0 || start >= len {
        return None;
    }
    let end = match count {
        None => start + 1,
        Some(count) if count < 0 => len + count + 1,
        Some(count) => start.saturating_add(count).min(len),
    };
    let end = end.max(start);
    Some((usize::try_from(start).ok()?, usize::try_from(end).ok()?))
}

fn not_numeric(ast: &Ast, id: ExprId, value: &Value) -> marionette_core::CompileError {
    evaluation(
        ast,
        id,
        format!("The value '{}' cannot be converted to Numeric", value),
    )
}

fn number(ast: &Ast, id: ExprId, value: &Value) -> CompileResult<Value> {
    value.to_number().ok_or_else(|| not_numeric(ast, id, value))
}

fn as_float(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Float(x) => *x,
        _ => 0.0,
    }
}

fn arithmetic(ast: &Ast, id: ExprId, op: BinaryOp, lhs: Value, rhs: Value) -> CompileResult<Value> {
    match (op, lhs, rhs) {
        (BinaryOp::Add, Value::Array(mut items), Value::Array(more)) => {
            items.extend(more);
            Ok(Value::Array(items))
        }
        (BinaryOp::Add | BinaryOp::Shl, Value::Array(mut items), other) => {
            items.push(other);
            Ok(Value::Array(items))
        }
        (BinaryOp::Add, Value::Hash(mut map), Value::Hash(more)) => {
            map.extend(more);
            Ok(Value::Hash(map))
        }
        (BinaryOp::Sub, Value::Array(items), other) => {
            let removed = other.into_array();
            Ok(Value::Array(
                items
                    .into_iter()
                    .filter(|item| !removed.iter().any(|r| r.equals(item)))
                    .collect(),
            ))
        }
        (BinaryOp::Sub, Value::Hash(mut map), other) => {
            let keys: Vec<String> = match other {
                Value::Hash(other) => other.keys().cloned().collect(),
                other => other.into_array().iter().map(Value::to_key).collect(),
            };
            for key in keys {
                map.shift_remove(&key);
            }
            Ok(Value::Hash(map))
        }
        (op, lhs, rhs) => numeric(ast, id, op, &number(ast, id, &lhs)?, &number(ast, id, &rhs)?),
    }
}

fn numeric(ast: &Ast, id: ExprId, op: BinaryOp, lhs: &Value, rhs: &Value) -> CompileResult<Value> {
    let overflow = || evaluation(ast, id, "Integer overflow");
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                return Err(evaluation(ast, id, "Division by 0"));
            }
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Mod => a.checked_rem(b),
            BinaryOp::Shl | BinaryOp::Shr => {
                let left = (op == BinaryOp::Shl) == (b >= 0);
                let wide = b.unsigned_abs() >= u64::from(i64::BITS);
                let amount = u32::try_from(b.unsigned_abs()).unwrap_or(u32::MAX).min(i64::BITS - 1);
                if !left {
                    // past the width only the sign remains
                    Some(a >> amount)
                } else if a == 0 {
                    Some(0)
                } else {
                    let shifted = a << amount;
                    (!wide && shifted >> amount == a).then_some(shifted)
                }
            }
            _ => None,
        };
        return result.map(Value::Integer).ok_or_else(overflow);
    }
    let (a, b) = (as_float(lhs), as_float(rhs));
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div if b == 0.0 => Err(evaluation(ast, id, "Division by 0")),
        BinaryOp::Div => Ok(Value::Float(a / b)),
        _ => Err(evaluation(
            ast,
            id,
            "Operators %, << and >> are not applicable to Float values",
        )),
    }
}

fn compare(ast: &Ast, id: ExprId, lhs: &Value, rhs: &Value, op: &str) -> CompileResult<Ordering> {
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        return Ok(a.cmp(b));
    }
    if let (Some(a), Some(b)) = (lhs.to_number(), rhs.to_number()) {
        if let (Value::Integer(a), Value::Integer(b)) = (&a, &b) {
            return Ok(a.cmp(b));
        }
        if let Some(ordering) = as_float(&a).partial_cmp(&as_float(&b)) {
            return Ok(ordering);
        }
    }
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok(a.to_lowercase().cmp(&b.to_lowercase())),
        _ => Err(evaluation(
            ast,
            id,
            format!("Comparison of: {} {} {}, is not possible", lhs, op, rhs),
        )),
    }
}

/// `needle in haystack`
fn contains(haystack: &Value, needle: &Value) -> bool {
    let pattern = match needle {
        Value::Regex(source) => Regex::new(source).ok(),
        _ => None,
    };
    let hit = |candidate: &Value| match &pattern {
        Some(regex) => candidate.as_str().is_some_and(|s| regex.is_match(s)),
        None => candidate.equals(needle),
    };
    match haystack {
        Value::Array(items) => items.iter().any(hit),
        Value::Hash(map) => map.keys().any(|key| hit(&Value::from(key.as_str()))),
        Value::String(text) => match (&pattern, needle) {
            (Some(regex), _) => regex.is_match(text),
            (None, Value::String(s)) => text.to_lowercase().contains(&s.to_lowercase()),
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_bounds() {
        assert_eq!(slice_bounds(5, 1, None), Some((1, 2)));
        assert_eq!(slice_bounds(5, -1, None), Some((4, 5)));
        assert_eq!(slice_bounds(5, 1, Some(2)), Some((1, 3)));
        assert_eq!(slice_bounds(5, 1, Some(-1)), Some((1, 5)));
        assert_eq!(slice_bounds(5, 1, Some(10)), Some((1, 5)));
        assert_eq!(slice_bounds(5, 5, None), None);
        assert_eq!(slice_bounds(0, 0, None), None);
    }

    #[test]
    fn test_contains() {
        let list = Value::from(vec![Value::from("Apache"), Value::Integer(2)]);
        assert!(contains(&list, &Value::from("apache")));
        assert!(contains(&list, &Value::Integer(2)));
        assert!(contains(&list, &Value::Regex("^Ap".into())));
        assert!(contains(&Value::from("foobar"), &Value::from("OBA")));
        let mut map = IndexMap::new();
        map.insert("key".to_string(), Value::Undef);
        assert!(contains(&Value::Hash(map), &Value::from("key")));
        assert!(!contains(&Value::Integer(1), &Value::Integer(1)));
    }

    #[test]
    fn test_type_reference() {
        assert_eq!(type_reference("String"), DataType::String);
        assert_eq!(type_reference("Apache::Vhost"), DataType::Resource("apache::vhost".into()));
    }
}
