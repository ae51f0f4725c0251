//! Builtin functions.
//!
//! A [`FunctionRegistry`] is built for every compilation; functions
//! declared in the language shadow these.

use crate::builtin::builtin_type;
use crate::eval::{Closure, Endpoint, Evaluator, Relationship, evaluation, references};
use crate::loader::{ResolveContext, ResolveKind};
use crate::registry::DeclarationKind;
use crate::catalog::EdgeKind;
use crate::resource::Param;
use crate::scope::{ScopeId, ScopeKind};
use crate::types::{DataType, ResourceRef};
use crate::value::Value;
use indexmap::IndexMap;
use marionette_core::{CompileError, CompileResult, Diagnostic, SourceFile, name};
use marionette_syntax::{Ast, ExprId, NodeKind, ResourceForm, parse_template};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;

/// Signature of a builtin
pub(crate) type BuiltinFn = fn(&mut Evaluator<'_>, Call<'_>) -> CompileResult<Value>;

/// Arguments and context of one call
pub(crate) struct Call<'c> {
    pub(crate) name: &'c str,
    pub(crate) args: Vec<Value>,
    pub(crate) lambda: Option<Closure>,
    pub(crate) ast: &'c Arc<Ast>,
    pub(crate) id: ExprId,
    pub(crate) scope: ScopeId,
}

impl Call<'_> {
    fn error(&self, message: impl Into<String>) -> CompileError {
        evaluation(self.ast, self.id, format!("{}(): {}", self.name, message.into()))
    }

    fn location(&self) -> Diagnostic {
        self.ast.diagnostic(self.id, "")
    }

    fn arity(&self, min: usize, max: usize) -> CompileResult<()> {
        let given = self.args.len();
        if given < min || given > max {
            let expected = if min == max {
                min.to_string()
            } else if max == usize::MAX {
                format!("at least {}", min)
            } else {
                format!("between {} and {}", min, max)
            };
            return Err(self.error(format!("expects {} arguments, got {}", expected, given)));
        }
        Ok(())
    }

    fn lambda(&self) -> CompileResult<&Closure> {
        self.lambda.as_ref().ok_or_else(|| self.error("expects a block"))
    }
}

/// Builtins available to one compilation
pub(crate) struct FunctionRegistry {
    functions: IndexMap<&'static str, BuiltinFn>,
}

impl FunctionRegistry {
    pub(crate) fn new() -> Self {
        let mut registry = Self {
            functions: IndexMap::new(),
        };
        registry.register("include", include);
        registry.register("require", require);
        registry.register("contain", contain);
        registry.register("realize", realize);
        registry.register("tag", tag);
        registry.register("tagged", tagged);
        registry.register("defined", defined);
        registry.register("fail", fail);
        for level in ["debug", "info", "notice", "warning", "err", "alert", "crit", "emerg"] {
            registry.register(level, log);
        }
        registry.register("template", template);
        registry.register("inline_template", template);
        registry.register("epp", epp);
        registry.register("inline_epp", epp);
        registry.register("split", split);
        registry.register("join", join);
        registry.register("each", iterate);
        registry.register("map", iterate);
        registry.register("filter", iterate);
        registry.register("versioncmp", versioncmp_function);
        registry.register("create_resources", create_resources);
        registry
    }

    pub(crate) fn register(&mut self, name: &'static str, function: BuiltinFn) {
        self.functions.insert(name, function);
    }

    pub(crate) fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.functions.get(name).copied()
    }
}

/// Class names from `include`-style arguments
fn class_names(args: &[Value]) -> Vec<String> {
    args.iter()
        .cloned()
        .flat_map(Value::into_array)
        .map(|value| match value {
            Value::Reference(reference) if reference.is_class() => reference.title,
            Value::Type(DataType::Resource(type_name)) => type_name,
            other => other.to_string(),
        })
        .collect()
}

fn declare_all(evaluator: &mut Evaluator<'_>, call: &Call<'_>) -> CompileResult<Vec<ResourceRef>> {
    let names = class_names(&call.args);
    if names.is_empty() {
        return Err(call.error("expects at least one class name"));
    }
    let namespace = evaluator.namespace(call.scope);
    let location = call.location();
    let mut declared = Vec::with_capacity(names.len());
    for class in names {
        let id = evaluator.declare_class(&class, &namespace, None, call.scope, &location)?;
        declared.push(evaluator.resource(id).reference.clone());
    }
    Ok(declared)
}

fn include(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    declare_all(evaluator, &call)?;
    Ok(Value::Undef)
}

/// Declare classes and order them before the calling resource
fn require(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    let classes = declare_all(evaluator, &call)?;
    if let Some(caller) = evaluator.scopes.resource(call.scope) {
        let caller = evaluator.resource(caller).reference.clone();
        evaluator.relationships.push(Relationship {
            source: Endpoint::Resources(classes),
            target: Endpoint::Resources(vec![caller]),
            kind: EdgeKind::Before,
            location: call.location(),
        });
    }
    Ok(Value::Undef)
}

/// Declare classes and contain them in the calling class
fn contain(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    let classes = declare_all(evaluator, &call)?;
    if let Some(container) = evaluator.scopes.resource(call.scope) {
        for class in classes {
            if let Some(id) = evaluator.find_resource(&class) {
                evaluator.containments.push((container, id));
            }
        }
    }
    Ok(Value::Undef)
}

fn realize(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    let refs: Vec<ResourceRef> = call.args.iter().flat_map(references).collect();
    if refs.is_empty() {
        return Err(call.error("expects at least one resource reference"));
    }
    evaluator.realize(refs, call.scope, call.location());
    Ok(Value::Undef)
}

fn tag(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    let Some(target) = evaluator.scopes.resource(call.scope) else {
        return Ok(Value::Undef);
    };
    for value in call.args.iter().cloned().flat_map(Value::into_array) {
        evaluator
            .resource_mut(target)
            .tag(&value.to_string())
            .map_err(|e| call.error(e.to_string()))?;
    }
    Ok(Value::Undef)
}

fn tagged(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    call.arity(1, usize::MAX)?;
    let Some(target) = evaluator.scopes.resource(call.scope) else {
        return Ok(Value::Boolean(false));
    };
    let resource = evaluator.resource(target);
    let all = call
        .args
        .iter()
        .cloned()
        .flat_map(Value::into_array)
        .all(|value| resource.tagged(&value.to_string()));
    Ok(Value::Boolean(all))
}

/// True if any argument names something known: a `$variable`, a class,
/// define or builtin type, a function, or a declared resource
fn defined(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    call.arity(1, usize::MAX)?;
    let namespace = evaluator.namespace(call.scope);
    for value in &call.args {
        let known = match value {
            Value::String(text) => match text.strip_prefix('$') {
                Some(variable) if name::is_qualified(variable) => {
                    let class = name::namespace(variable);
                    let class = name::canonical(class);
                    evaluator
                        .scopes
                        .class_scope(&class)
                        .and_then(|scope| evaluator.scopes.lookup(scope, name::basename(variable)))
                        .is_some()
                }
                Some(variable) => evaluator.scopes.lookup(call.scope, variable).is_some(),
                None => defined_name(evaluator, &namespace, text)?,
            },
            Value::Type(DataType::Resource(type_name)) => defined_name(evaluator, &namespace, type_name)?,
            Value::Reference(reference) => {
                evaluator.find_resource(reference).is_some()
                    || (reference.is_class() && evaluator.classes.contains(&reference.title))
            }
            _ => false,
        };
        if known {
            return Ok(Value::Boolean(true));
        }
    }
    Ok(Value::Boolean(false))
}

fn defined_name(evaluator: &mut Evaluator<'_>, namespace: &str, wanted: &str) -> CompileResult<bool> {
    let canonical = name::canonical(wanted);
    if builtin_type(&canonical).is_some()
        || evaluator.has_function(namespace, &canonical)
    {
        return Ok(true);
    }
    for kind in [DeclarationKind::Hostclass, DeclarationKind::Define] {
        if evaluator.resolve_declaration(namespace, wanted, kind)?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn fail(_evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    let message = join_display(&call.args, " ");
    Err(evaluation(call.ast, call.id, message))
}

fn join_display(values: &[Value], separator: &str) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

/// `notice`, `warning` and the other log levels
fn log(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    let text = join_display(&call.args, " ");
    let source = call.location();
    match call.name {
        "debug" => tracing::debug!(target: "marionette", %source, "{}", text),
        "info" | "notice" => tracing::info!(target: "marionette", function = call.name, %source, "{}", text),
        "warning" => tracing::warn!(target: "marionette", %source, "{}", text),
        _ => tracing::error!(target: "marionette", function = call.name, %source, "{}", text),
    }
    evaluator.message(call.name, text);
    Ok(Value::Undef)
}

fn read_template(evaluator: &Evaluator<'_>, call: &Call<'_>, file: &str) -> CompileResult<(String, String)> {
    let candidates = evaluator
        .loader
        .resolve(file, &ResolveContext::new(ResolveKind::Template));
    let Some(path) = candidates.first() else {
        return Err(call.error(format!("Could not find template '{}'", file)));
    };
    let text = evaluator
        .loader
        .read(path)
        .map_err(|e| call.error(format!("Could not read template '{}': {}", file, e)))?;
    Ok((path.display().to_string(), text))
}

/// `template` and `inline_template`, through the configured renderer
fn template(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    call.arity(1, usize::MAX)?;
    let bindings = evaluator.scopes.visible_variables(call.scope);
    let mut output = String::new();
    for argument in &call.args {
        let text = if call.name == "template" {
            read_template(evaluator, &call, &argument.to_string())?.1
        } else {
            argument.to_string()
        };
        let rendered = evaluator
            .renderer
            .render(&text, &bindings)
            .map_err(|e| call.error(format!("Failed to render template: {}", e)))?;
        output.push_str(&rendered);
    }
    Ok(Value::String(output))
}

/// `epp` and `inline_epp`, evaluated by the compiler itself in a scope
/// holding only the supplied parameters
fn epp(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    call.arity(1, 2)?;
    let argument = call.args[0].to_string();
    let source = if call.name == "epp" {
        let (path, text) = read_template(evaluator, &call, &argument)?;
        SourceFile::new(path, text)
    } else {
        SourceFile::inline(argument)
    };
    let supplied = match call.args.get(1) {
        None | Some(Value::Undef) => IndexMap::new(),
        Some(Value::Hash(parameters)) => parameters.clone(),
        Some(other) => {
            return Err(call.error(format!("expects a Hash of parameters, got {}", other.type_name())));
        }
    };
    let ast = Arc::new(parse_template(Arc::new(source))?);

    let top = evaluator.scopes.top();
    let origin = evaluator.scopes.get(top).origin.clone();
    let scope = evaluator
        .scopes
        .create(top, ScopeKind::Local, "", origin, None);
    let declared = match ast.kind(ast.root()) {
        NodeKind::Template {
            params: Some(params),
            ..
        } => Some(params.clone()),
        _ => None,
    };
    match declared {
        Some(params) => {
            for param in &params {
                let value = match supplied.get(&param.name) {
                    Some(value) => value.clone(),
                    None => match param.default {
                        Some(default) => evaluator.evaluate(&ast, default, scope)?,
                        None => {
                            return Err(call.error(format!(
                                "expects a value for parameter '{}'",
                                param.name
                            )));
                        }
                    },
                };
                evaluator.check_type(&ast, scope, param, &value, "Template")?;
                bind_variable(evaluator, &call, scope, &param.name, value)?;
            }
        }
        None => {
            for (name, value) in supplied {
                bind_variable(evaluator, &call, scope, &name, value)?;
            }
        }
    }
    Ok(Value::String(evaluator.render_template(&ast, scope)?))
}

fn bind_variable(
    evaluator: &mut Evaluator<'_>,
    call: &Call<'_>,
    scope: ScopeId,
    variable: &str,
    value: Value,
) -> CompileResult<()> {
    evaluator
        .scopes
        .set(scope, variable, value)
        .map_err(|e| call.error(e.to_string()))
}

fn split(_evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    call.arity(2, 2)?;
    let text = call.args[0].to_string();
    let pattern = match &call.args[1] {
        Value::Regex(source) | Value::String(source) => source.clone(),
        other => return Err(call.error(format!("expects a String or Regexp pattern, got {}", other.type_name()))),
    };
    let regex = Regex::new(&pattern).map_err(|e| call.error(e.to_string()))?;
    if text.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    Ok(Value::Array(regex.split(&text).map(Value::from).collect()))
}

fn join(_evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    call.arity(1, 2)?;
    let separator = call.args.get(1).map(ToString::to_string).unwrap_or_default();
    match &call.args[0] {
        Value::Array(items) => Ok(Value::String(join_display(items, &separator))),
        other => Err(call.error(format!("expects an Array, got {}", other.type_name()))),
    }
}

/// `each`, `map` and `filter`
///
/// Arrays pass `|value|` or `|index, value|`; hashes pass `|[key, value]|`
/// or `|key, value|`.
fn iterate(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    call.arity(1, 1)?;
    let closure = call.lambda()?.clone();
    let pairs = Evaluator::lambda_arity(&closure) >= 2;
    let entries: Vec<(Value, Value)> = match &call.args[0] {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| (Value::Integer(index as i64), item.clone()))
            .collect(),
        Value::Hash(map) => map
            .iter()
            .map(|(key, value)| (Value::from(key.as_str()), value.clone()))
            .collect(),
        Value::Integer(count) => (0..*count)
            .map(|index| (Value::Integer(index), Value::Integer(index)))
            .collect(),
        other => return Err(call.error(format!("expects an Array or Hash, got {}", other.type_name()))),
    };
    let is_hash = matches!(call.args[0], Value::Hash(_));
    let call_site = (&**call.ast, call.id);

    let mut mapped = Vec::new();
    let mut kept = Vec::new();
    for (key, value) in entries {
        let args = match (pairs, is_hash) {
            (true, _) => vec![key.clone(), value.clone()],
            (false, true) => vec![Value::Array(vec![key.clone(), value.clone()])],
            (false, false) => vec![value.clone()],
        };
        let result = evaluator.call_lambda(&closure, args, call_site)?;
        match call.name {
            "map" => mapped.push(result),
            "filter" if result.is_truthy() => kept.push((key, value)),
            _ => {}
        }
    }

    Ok(match call.name {
        "map" => Value::Array(mapped),
        "filter" if is_hash => Value::Hash(
            kept.into_iter()
                .map(|(key, value)| (key.to_key(), value))
                .collect(),
        ),
        "filter" => Value::Array(kept.into_iter().map(|(_, value)| value).collect()),
        _ => call.args[0].clone(),
    })
}

static VERSION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-.]|\d+|[^-.\d]+").expect("version token pattern must compile"));

/// Compare two version strings the way package versions sort: numeric runs
/// by value, separators below everything else, other text
/// case-insensitively
#[must_use]
pub fn versioncmp(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = VERSION_TOKEN.find_iter(a).map(|m| m.as_str()).collect();
    let right: Vec<&str> = VERSION_TOKEN.find_iter(b).map(|m| m.as_str()).collect();
    for (x, y) in left.iter().zip(right.iter()) {
        if x == y {
            continue;
        }
        for separator in ["-", "."] {
            if *x == separator {
                return Ordering::Less;
            }
            if *y == separator {
                return Ordering::Greater;
            }
        }
        let numeric = |s: &str| s.bytes().all(|c| c.is_ascii_digit());
        if numeric(x) && numeric(y) && !x.starts_with('0') && !y.starts_with('0') {
            return x.len().cmp(&y.len()).then_with(|| x.cmp(y));
        }
        return x.to_uppercase().cmp(&y.to_uppercase());
    }
    a.cmp(b)
}

fn versioncmp_function(_evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    call.arity(2, 2)?;
    let ordering = versioncmp(&call.args[0].to_string(), &call.args[1].to_string());
    Ok(Value::Integer(match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

/// `create_resources(type, { title => { attr => value } }, defaults)`
fn create_resources(evaluator: &mut Evaluator<'_>, call: Call<'_>) -> CompileResult<Value> {
    call.arity(2, 3)?;
    let type_name = call.args[0].to_string();
    let (form, type_name) = match type_name.strip_prefix("@@") {
        Some(rest) => (ResourceForm::Exported, rest.to_string()),
        None => match type_name.strip_prefix('@') {
            Some(rest) => (ResourceForm::Virtual, rest.to_string()),
            None => (ResourceForm::Regular, type_name),
        },
    };
    let Value::Hash(instances) = &call.args[1] else {
        return Err(call.error("second argument must be a Hash"));
    };
    let defaults = match call.args.get(2) {
        None | Some(Value::Undef) => IndexMap::new(),
        Some(Value::Hash(defaults)) => defaults.clone(),
        Some(_) => return Err(call.error("third argument must be a Hash")),
    };
    let origin = evaluator.scopes.get(call.scope).origin.clone();

    let mut declared = Vec::with_capacity(instances.len());
    for (title, attributes) in instances {
        let Value::Hash(attributes) = attributes else {
            return Err(call.error(format!("attributes of '{}' must be a Hash", title)));
        };
        let mut merged = defaults.clone();
        merged.extend(attributes.clone());
        let params: Vec<Param> = merged
            .into_iter()
            .map(|(attribute, value)| Param::new(attribute, value, origin.clone()))
            .collect();
        declared.push((title.clone(), params));
    }
    evaluator.instantiate(call.ast, call.id, call.scope, form, &type_name, declared)?;
    Ok(Value::Undef)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioncmp() {
        assert_eq!(versioncmp("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(versioncmp("1.2.10", "1.2.9"), Ordering::Greater);
        assert_eq!(versioncmp("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(versioncmp("1.0-rc1", "1.0.1"), Ordering::Less);
        assert_eq!(versioncmp("2.0a", "2.0B"), Ordering::Less);
        assert_eq!(versioncmp("1.01", "1.1"), Ordering::Less);
    }

    #[test]
    fn test_registry_has_builtins() {
        let registry = FunctionRegistry::new();
        for function in ["include", "notice", "each", "create_resources", "inline_epp"] {
            assert!(registry.get(function).is_some(), "{} missing", function);
        }
        assert!(registry.get("no_such_function").is_none());
    }

    #[test]
    fn test_class_names() {
        let names = class_names(&[
            Value::from("apache"),
            Value::Reference(ResourceRef::class("Ntp")),
            Value::from(vec![Value::from("a"), Value::from("b")]),
        ]);
        assert_eq!(names, vec!["apache", "ntp", "a", "b"]);
    }

    proptest::proptest! {
        #[test]
        fn prop_versioncmp_antisymmetric(a in "[0-9a-c.-]{0,12}", b in "[0-9a-c.-]{0,12}") {
            proptest::prop_assert_eq!(versioncmp(&a, &a), Ordering::Equal);
            proptest::prop_assert_eq!(versioncmp(&a, &b), versioncmp(&b, &a).reverse());
        }
    }
}
