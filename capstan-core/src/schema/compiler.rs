//! Compiles parameter descriptors into coercing validators

use super::{properties_schema, ParamDecl, ParamType, ParameterSpec};
use crate::error::{DeclarationError, ValidationError, ValidationIssue};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// How a raw JSON input is converted before constraint checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Numeric strings parse to numbers
    StringToNumber,
    /// Integral strings parse to integers
    StringToInteger,
    /// `"true"`/`"false"` (any case) parse to booleans
    StringToBoolean,
    /// Value is checked as-is
    Passthrough,
}

impl Coercion {
    fn for_type(ty: ParamType) -> Self {
        match ty {
            ParamType::Number => Coercion::StringToNumber,
            ParamType::Integer => Coercion::StringToInteger,
            ParamType::Boolean => Coercion::StringToBoolean,
            _ => Coercion::Passthrough,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    ty: ParamType,
    coercion: Coercion,
    min_length: Option<usize>,
    max_length: Option<usize>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    pattern: Option<Regex>,
    enum_values: Option<Vec<Value>>,
    items: Option<Box<Node>>,
    properties: Vec<CompiledParam>,
}

/// One compiled parameter (or nested property)
#[derive(Debug, Clone)]
pub struct CompiledParam {
    pub name: String,
    pub required: bool,
    /// Default, already coerced
    pub default: Option<Value>,
    node: Node,
}

impl CompiledParam {
    /// Declared type
    pub fn param_type(&self) -> ParamType {
        self.node.ty
    }

    /// Coercion applied to raw input
    pub fn coercion(&self) -> Coercion {
        self.node.coercion
    }
}

/// Validator for one capability's arguments
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    owner: String,
    params: Vec<CompiledParam>,
    json_schema: Value,
}

impl CompiledSchema {
    /// Capability the schema belongs to
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Compiled parameters in declaration order
    pub fn params(&self) -> &[CompiledParam] {
        &self.params
    }

    /// Whether the capability takes no parameters
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Coercion applied to each top-level parameter
    pub fn coercion_table(&self) -> Vec<(&str, Coercion)> {
        self.params
            .iter()
            .map(|p| (p.name.as_str(), p.node.coercion))
            .collect()
    }

    /// JSON Schema for listings
    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    /// Validate and coerce call arguments
    ///
    /// `null` counts as an empty argument object. Keys without a declared
    /// parameter pass through untouched; missing optional parameters receive
    /// their default.
    pub fn validate(&self, args: &Value) -> Result<Value, ValidationError> {
        let empty = Map::new();
        let map = match args {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(ValidationError::new(
                    &self.owner,
                    vec![ValidationIssue::new(
                        "$",
                        "type",
                        format!("arguments must be an object, got {}", json_type(other)),
                    )],
                ));
            }
        };

        let mut issues = Vec::new();
        let coerced = check_fields(&self.params, map, "", &mut issues);
        if issues.is_empty() {
            Ok(Value::Object(coerced))
        } else {
            Err(ValidationError::new(&self.owner, issues))
        }
    }
}

/// Compile an ordered parameter list
///
/// Fails on the first parameter that is composite ([`ParamDecl::Merged`]) or
/// malformed.
pub fn compile(owner: &str, params: &[(String, ParamDecl)]) -> Result<CompiledSchema, DeclarationError> {
    let mut seen = HashSet::new();
    let mut compiled = Vec::with_capacity(params.len());
    let mut specs = Vec::with_capacity(params.len());

    for (name, decl) in params {
        if !seen.insert(name.as_str()) {
            return Err(malformed(owner, name, "parameter is declared more than once"));
        }
        let spec = match decl {
            ParamDecl::Spec(spec) => spec,
            ParamDecl::Merged(parts) => return Err(unsupported(owner, name, parts)),
        };
        compiled.push(compile_param(owner, name, name, spec)?);
        specs.push((name.clone(), spec.clone()));
    }

    let (properties, required) = properties_schema(&specs);
    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::from("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }

    Ok(CompiledSchema {
        owner: owner.to_string(),
        params: compiled,
        json_schema: Value::Object(schema),
    })
}

fn unsupported(owner: &str, param: &str, parts: &[ParameterSpec]) -> DeclarationError {
    let shapes = parts
        .iter()
        .map(|p| p.ty.as_str())
        .collect::<Vec<_>>()
        .join(" + ");
    DeclarationError::UnsupportedParamSpec {
        owner: owner.to_string(),
        param: param.to_string(),
        message: format!(
            "parameter '{param}' is assembled from {} descriptor shapes ({shapes}); \
             composite descriptors are not compiled. Fix: declare one standalone \
             descriptor holding every field, e.g. \
             `.param(\"{param}\", ParameterSpec::object().property(..).property(..))`",
            parts.len()
        ),
    }
}

fn malformed(owner: &str, param: &str, message: impl Into<String>) -> DeclarationError {
    DeclarationError::MalformedParamSpec {
        owner: owner.to_string(),
        param: param.to_string(),
        message: message.into(),
    }
}

fn compile_param(
    owner: &str,
    name: &str,
    path: &str,
    spec: &ParameterSpec,
) -> Result<CompiledParam, DeclarationError> {
    let node = compile_node(owner, path, spec)?;
    let default = match &spec.default {
        Some(value) => {
            let mut issues = Vec::new();
            match node.check(value, path, &mut issues) {
                Some(coerced) => Some(coerced),
                None => {
                    return Err(malformed(
                        owner,
                        path,
                        format!("default {} is invalid: {}", value, join_issues(&issues)),
                    ));
                }
            }
        }
        None => None,
    };
    Ok(CompiledParam {
        name: name.to_string(),
        required: spec.required && default.is_none(),
        default,
        node,
    })
}

fn compile_node(owner: &str, path: &str, spec: &ParameterSpec) -> Result<Node, DeclarationError> {
    let ty = spec.ty;
    let has_length = spec.min_length.is_some() || spec.max_length.is_some();
    if has_length && !matches!(ty, ParamType::String | ParamType::Array) {
        return Err(malformed(owner, path, format!("length constraints do not apply to {ty}")));
    }
    let has_range = spec.minimum.is_some() || spec.maximum.is_some();
    if has_range && !matches!(ty, ParamType::Number | ParamType::Integer) {
        return Err(malformed(owner, path, format!("range constraints do not apply to {ty}")));
    }
    if spec.pattern.is_some() && ty != ParamType::String {
        return Err(malformed(owner, path, format!("pattern does not apply to {ty}")));
    }
    if spec.items.is_some() && ty != ParamType::Array {
        return Err(malformed(owner, path, format!("items do not apply to {ty}")));
    }
    if !spec.properties.is_empty() && ty != ParamType::Object {
        return Err(malformed(owner, path, format!("properties do not apply to {ty}")));
    }
    if let (Some(min), Some(max)) = (spec.min_length, spec.max_length) {
        if min > max {
            return Err(malformed(owner, path, format!("min length {min} exceeds max length {max}")));
        }
    }
    if let (Some(min), Some(max)) = (spec.minimum, spec.maximum) {
        if min > max {
            return Err(malformed(owner, path, format!("minimum {min} exceeds maximum {max}")));
        }
    }

    let pattern = match &spec.pattern {
        Some(p) => Some(
            Regex::new(p)
                .map_err(|e| malformed(owner, path, format!("invalid pattern '{p}': {e}")))?,
        ),
        None => None,
    };

    let items = match &spec.items {
        Some(items) => Some(Box::new(compile_node(owner, &format!("{path}[]"), items)?)),
        None => None,
    };

    let mut seen = HashSet::new();
    let mut properties = Vec::with_capacity(spec.properties.len());
    for (name, prop) in &spec.properties {
        let prop_path = format!("{path}.{name}");
        if !seen.insert(name.as_str()) {
            return Err(malformed(owner, &prop_path, "property is declared more than once"));
        }
        properties.push(compile_param(owner, name, &prop_path, prop)?);
    }

    let mut node = Node {
        ty,
        coercion: Coercion::for_type(ty),
        min_length: spec.min_length,
        max_length: spec.max_length,
        minimum: spec.minimum,
        maximum: spec.maximum,
        pattern,
        enum_values: None,
        items,
        properties,
    };

    if let Some(values) = &spec.enum_values {
        if values.is_empty() {
            return Err(malformed(owner, path, "enum must list at least one value"));
        }
        for value in values {
            let mut issues = Vec::new();
            if node.check(value, path, &mut issues).as_ref() != Some(value) {
                return Err(malformed(
                    owner,
                    path,
                    format!("enum value {value} does not match type {ty}"),
                ));
            }
        }
        node.enum_values = Some(values.clone());
    }

    Ok(node)
}

impl Node {
    /// Coerce and check `value`; `None` when any issue was recorded
    fn check(&self, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) -> Option<Value> {
        let before = issues.len();
        let coerced = match self.coerce(value, path) {
            Ok(v) => v,
            Err(issue) => {
                issues.push(issue);
                return None;
            }
        };

        let coerced = match coerced {
            Value::String(s) => {
                self.check_length(s.chars().count(), "characters", path, issues);
                if let Some(re) = &self.pattern {
                    if !re.is_match(&s) {
                        issues.push(ValidationIssue::new(
                            path,
                            "pattern",
                            format!("value does not match pattern '{}'", re.as_str()),
                        ));
                    }
                }
                Value::String(s)
            }
            Value::Number(n) => {
                if let Some(x) = n.as_f64() {
                    if let Some(min) = self.minimum.filter(|min| x < *min) {
                        issues.push(ValidationIssue::new(path, "minimum", format!("{x} is below the minimum of {min}")));
                    }
                    if let Some(max) = self.maximum.filter(|max| x > *max) {
                        issues.push(ValidationIssue::new(path, "maximum", format!("{x} is above the maximum of {max}")));
                    }
                }
                Value::Number(n)
            }
            Value::Array(items) => {
                self.check_length(items.len(), "items", path, issues);
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match &self.items {
                        Some(node) => {
                            if let Some(v) = node.check(item, &format!("{path}[{i}]"), issues) {
                                out.push(v);
                            }
                        }
                        None => out.push(item.clone()),
                    }
                }
                Value::Array(out)
            }
            Value::Object(map) => Value::Object(check_fields(&self.properties, &map, path, issues)),
            other => other,
        };

        if let Some(values) = &self.enum_values {
            if !values.iter().any(|v| same_value(v, &coerced)) {
                issues.push(ValidationIssue::new(
                    path,
                    "enum",
                    format!(
                        "{} is not one of {}",
                        coerced,
                        Value::Array(values.clone())
                    ),
                ));
            }
        }

        if issues.len() > before { None } else { Some(coerced) }
    }

    fn coerce(&self, value: &Value, path: &str) -> Result<Value, ValidationIssue> {
        let mismatch = || {
            ValidationIssue::new(
                path,
                "type",
                format!("expected {}, got {}", self.ty, json_type(value)),
            )
        };
        match (self.ty, value) {
            (ParamType::String, Value::String(_))
            | (ParamType::Boolean, Value::Bool(_))
            | (ParamType::Number, Value::Number(_))
            | (ParamType::Array, Value::Array(_))
            | (ParamType::Object, Value::Object(_))
            | (ParamType::Null, Value::Null) => Ok(value.clone()),
            (ParamType::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Ok(value.clone())
                } else {
                    n.as_f64()
                        .and_then(integral)
                        .ok_or_else(|| ValidationIssue::new(path, "type", format!("expected integer, got {n}")))
                }
            }
            (ParamType::Number, Value::String(s)) => parse_number(s).ok_or_else(|| {
                ValidationIssue::new(path, "coercion", format!("expected a number, got \"{s}\""))
            }),
            (ParamType::Integer, Value::String(s)) => parse_integer(s).ok_or_else(|| {
                ValidationIssue::new(path, "coercion", format!("expected an integer, got \"{s}\""))
            }),
            (ParamType::Boolean, Value::String(s)) => {
                if s.eq_ignore_ascii_case("true") {
                    Ok(Value::Bool(true))
                } else if s.eq_ignore_ascii_case("false") {
                    Ok(Value::Bool(false))
                } else {
                    Err(ValidationIssue::new(
                        path,
                        "coercion",
                        format!("expected \"true\" or \"false\", got \"{s}\""),
                    ))
                }
            }
            _ => Err(mismatch()),
        }
    }

    fn check_length(&self, len: usize, unit: &str, path: &str, issues: &mut Vec<ValidationIssue>) {
        if let Some(min) = self.min_length.filter(|min| len < *min) {
            issues.push(ValidationIssue::new(path, "min_length", format!("expected at least {min} {unit}, got {len}")));
        }
        if let Some(max) = self.max_length.filter(|max| len > *max) {
            issues.push(ValidationIssue::new(path, "max_length", format!("expected at most {max} {unit}, got {len}")));
        }
    }
}

fn check_fields(
    fields: &[CompiledParam],
    map: &Map<String, Value>,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Map<String, Value> {
    let mut out = map.clone();
    for field in fields {
        let field_path = if path.is_empty() {
            field.name.clone()
        } else {
            format!("{path}.{}", field.name)
        };
        match map.get(&field.name) {
            Some(Value::Null) if !field.required && field.node.ty != ParamType::Null => {
                out.remove(&field.name);
                if let Some(default) = &field.default {
                    out.insert(field.name.clone(), default.clone());
                }
            }
            Some(value) => {
                if let Some(coerced) = field.node.check(value, &field_path, issues) {
                    out.insert(field.name.clone(), coerced);
                }
            }
            None => {
                if let Some(default) = &field.default {
                    out.insert(field.name.clone(), default.clone());
                } else if field.required {
                    issues.push(ValidationIssue::new(&field_path, "required", "missing required parameter"));
                }
            }
        }
    }
    out
}

/// JSON equality where numbers compare by value, so `2` matches `2.0`
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| same_value(v, w)))
        }
        _ => a == b,
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let t = s.trim();
    if let Ok(i) = t.parse::<i64>() {
        return Some(Value::from(i));
    }
    t.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn parse_integer(s: &str) -> Option<Value> {
    let t = s.trim();
    if let Ok(i) = t.parse::<i64>() {
        return Some(Value::from(i));
    }
    t.parse::<f64>().ok().and_then(integral)
}

fn integral(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
