//! Parameter descriptors and the schema compiler
//!
//! Capabilities describe their inputs with [`ParameterSpec`] descriptors.
//! The compiler turns an ordered parameter list into a [`CompiledSchema`]
//! that validates and coerces JSON arguments, and emits the JSON Schema
//! shown in listings.
//!
//! # Example
//!
//! ```rust
//! use capstan_core::schema::{compile, ParamDecl, ParameterSpec};
//!
//! let params: Vec<(String, ParamDecl)> = vec![
//!     ("city".to_string(), ParameterSpec::string().min_length(1).into()),
//!     ("days".to_string(), ParameterSpec::integer().range(1.0, 14.0).with_default(3.into()).into()),
//! ];
//! let schema = compile("get_forecast", &params).unwrap();
//! let args = schema.validate(&serde_json::json!({"city": "Oslo", "days": "5"})).unwrap();
//! assert_eq!(args["days"], 5);
//! ```

mod compiler;
mod data;

pub use compiler::{compile, CompiledParam, CompiledSchema, Coercion};
pub use data::{classify, DataClass, DataNode, DataSpec};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl ParamType {
    /// JSON Schema name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Null => "null",
        }
    }

    /// Parse a JSON Schema type name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ParamType::String),
            "number" => Some(ParamType::Number),
            "integer" => Some(ParamType::Integer),
            "boolean" => Some(ParamType::Boolean),
            "array" => Some(ParamType::Array),
            "object" => Some(ParamType::Object),
            "null" => Some(ParamType::Null),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single, self-contained parameter descriptor
///
/// Built with the type constructors (`ParameterSpec::string()`, ...) and the
/// chained constraint setters. Parameters are required unless marked
/// `optional()` or given a default.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub ty: ParamType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
    /// Characters for strings, items for arrays
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub pattern: Option<String>,
    pub enum_values: Option<Vec<Value>>,
    pub items: Option<Box<ParameterSpec>>,
    pub properties: Vec<(String, ParameterSpec)>,
}

impl ParameterSpec {
    /// Descriptor of the given type with no constraints
    pub fn of(ty: ParamType) -> Self {
        Self {
            ty,
            description: None,
            required: true,
            default: None,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
            pattern: None,
            enum_values: None,
            items: None,
            properties: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::of(ParamType::String)
    }

    pub fn number() -> Self {
        Self::of(ParamType::Number)
    }

    pub fn integer() -> Self {
        Self::of(ParamType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(ParamType::Boolean)
    }

    pub fn null() -> Self {
        Self::of(ParamType::Null)
    }

    pub fn object() -> Self {
        Self::of(ParamType::Object)
    }

    /// Array whose items follow `items`
    pub fn array(items: ParameterSpec) -> Self {
        Self::of(ParamType::Array).with_items(items)
    }

    /// Set the description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Set a default value (implies optional)
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn minimum(mut self, min: f64) -> Self {
        self.minimum = Some(min);
        self
    }

    pub fn maximum(mut self, max: f64) -> Self {
        self.maximum = Some(max);
        self
    }

    /// Inclusive numeric range
    pub fn range(self, min: f64, max: f64) -> Self {
        self.minimum(min).maximum(max)
    }

    /// Regular expression the whole value must match somewhere
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Restrict to a fixed set of values
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Set the item descriptor
    pub fn with_items(mut self, items: ParameterSpec) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    /// Add a nested property
    pub fn property(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.properties.push((name.into(), spec));
        self
    }

    /// JSON Schema rendering of this descriptor
    pub fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".to_string(), Value::from(self.ty.as_str()));
        if let Some(description) = &self.description {
            schema.insert("description".to_string(), Value::from(description.clone()));
        }
        if let Some(default) = &self.default {
            schema.insert("default".to_string(), default.clone());
        }
        let (min_key, max_key) = match self.ty {
            ParamType::Array => ("minItems", "maxItems"),
            _ => ("minLength", "maxLength"),
        };
        if let Some(min) = self.min_length {
            schema.insert(min_key.to_string(), Value::from(min));
        }
        if let Some(max) = self.max_length {
            schema.insert(max_key.to_string(), Value::from(max));
        }
        if let Some(min) = self.minimum {
            schema.insert("minimum".to_string(), number_value(min));
        }
        if let Some(max) = self.maximum {
            schema.insert("maximum".to_string(), number_value(max));
        }
        if let Some(pattern) = &self.pattern {
            schema.insert("pattern".to_string(), Value::from(pattern.clone()));
        }
        if let Some(values) = &self.enum_values {
            schema.insert("enum".to_string(), Value::Array(values.clone()));
        }
        if let Some(items) = &self.items {
            schema.insert("items".to_string(), items.to_json_schema());
        }
        if self.ty == ParamType::Object || !self.properties.is_empty() {
            let (properties, required) = properties_schema(&self.properties);
            schema.insert("properties".to_string(), Value::Object(properties));
            if !required.is_empty() {
                schema.insert("required".to_string(), Value::Array(required));
            }
        }
        Value::Object(schema)
    }

    /// Parse a descriptor from JSON Schema-style JSON
    ///
    /// `required` may be a boolean (the parameter's own requiredness) or, on
    /// objects, an array naming the required properties. Unknown keys are
    /// rejected so typos surface at build time.
    pub fn from_json(value: &Value) -> std::result::Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("descriptor must be an object, got {}", value))?;

        let ty = match obj.get("type") {
            Some(Value::String(name)) => {
                ParamType::parse(name).ok_or_else(|| format!("unknown type '{}'", name))?
            }
            Some(other) => return Err(format!("'type' must be a string, got {}", other)),
            None => return Err("descriptor is missing 'type'".to_string()),
        };

        let mut spec = ParameterSpec::of(ty);
        let mut required_props: Option<Vec<String>> = None;

        for (key, val) in obj {
            match key.as_str() {
                "type" => {}
                "description" => spec.description = Some(as_string(key, val)?),
                "required" => match val {
                    Value::Bool(b) => spec.required = *b,
                    Value::Array(names) => {
                        required_props = Some(
                            names
                                .iter()
                                .map(|n| as_string(key, n))
                                .collect::<std::result::Result<_, _>>()?,
                        );
                    }
                    other => return Err(format!("'required' must be a boolean or array, got {}", other)),
                },
                "default" => spec.default = Some(val.clone()),
                "minLength" | "minItems" => spec.min_length = Some(as_usize(key, val)?),
                "maxLength" | "maxItems" => spec.max_length = Some(as_usize(key, val)?),
                "minimum" => spec.minimum = Some(as_f64(key, val)?),
                "maximum" => spec.maximum = Some(as_f64(key, val)?),
                "pattern" => spec.pattern = Some(as_string(key, val)?),
                "enum" => match val {
                    Value::Array(values) => spec.enum_values = Some(values.clone()),
                    other => return Err(format!("'enum' must be an array, got {}", other)),
                },
                "items" => spec.items = Some(Box::new(ParameterSpec::from_json(val)?)),
                "properties" => {
                    let props = val
                        .as_object()
                        .ok_or_else(|| format!("'properties' must be an object, got {}", val))?;
                    for (name, prop) in props {
                        let parsed = ParameterSpec::from_json(prop)
                            .map_err(|e| format!("property '{}': {}", name, e))?;
                        spec.properties.push((name.clone(), parsed));
                    }
                }
                other => return Err(format!("unsupported descriptor key '{}'", other)),
            }
        }

        if spec.default.is_some() {
            spec.required = false;
        }
        if let Some(required) = required_props {
            for (name, prop) in spec.properties.iter_mut() {
                prop.required = required.contains(name);
            }
        }

        Ok(spec)
    }
}

fn properties_schema(properties: &[(String, ParameterSpec)]) -> (Map<String, Value>, Vec<Value>) {
    let mut map = Map::new();
    let mut required = Vec::new();
    for (name, spec) in properties {
        map.insert(name.clone(), spec.to_json_schema());
        if spec.required {
            required.push(Value::from(name.clone()));
        }
    }
    (map, required)
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn as_string(key: &str, val: &Value) -> std::result::Result<String, String> {
    val.as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("'{}' must be a string, got {}", key, val))
}

fn as_usize(key: &str, val: &Value) -> std::result::Result<usize, String> {
    val.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| format!("'{}' must be a non-negative integer, got {}", key, val))
}

fn as_f64(key: &str, val: &Value) -> std::result::Result<f64, String> {
    val.as_f64()
        .ok_or_else(|| format!("'{}' must be a number, got {}", key, val))
}

/// Parameter declaration as authored
///
/// Only [`ParamDecl::Spec`] compiles. `Merged` captures descriptors built by
/// combining several shapes (`allOf`/`anyOf`/`oneOf`, union `type` arrays,
/// [`ParamDecl::merge`]) so the compiler can reject them with a diagnostic
/// that points at the parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDecl {
    /// One whole descriptor
    Spec(ParameterSpec),
    /// Several descriptor shapes combined into one parameter
    Merged(Vec<ParameterSpec>),
}

impl ParamDecl {
    /// Combine two descriptors into one parameter
    pub fn merge(a: impl Into<ParamDecl>, b: impl Into<ParamDecl>) -> Self {
        let mut parts = Vec::new();
        for decl in [a.into(), b.into()] {
            match decl {
                ParamDecl::Spec(spec) => parts.push(spec),
                ParamDecl::Merged(specs) => parts.extend(specs),
            }
        }
        ParamDecl::Merged(parts)
    }

    /// Parse an authored JSON descriptor
    pub fn from_json(value: &Value) -> std::result::Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("descriptor must be an object, got {}", value))?;

        for key in ["allOf", "anyOf", "oneOf"] {
            if let Some(parts) = obj.get(key) {
                let parts = parts
                    .as_array()
                    .ok_or_else(|| format!("'{}' must be an array", key))?;
                let specs = parts
                    .iter()
                    .map(ParameterSpec::from_json)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                return Ok(ParamDecl::Merged(specs));
            }
        }

        if let Some(Value::Array(types)) = obj.get("type") {
            let mut specs = Vec::with_capacity(types.len());
            for ty in types {
                let mut single = obj.clone();
                single.insert("type".to_string(), ty.clone());
                specs.push(ParameterSpec::from_json(&Value::Object(single))?);
            }
            return Ok(ParamDecl::Merged(specs));
        }

        ParameterSpec::from_json(value).map(ParamDecl::Spec)
    }
}

impl From<ParameterSpec> for ParamDecl {
    fn from(spec: ParameterSpec) -> Self {
        ParamDecl::Spec(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let spec = ParameterSpec::string();
        assert!(spec.required);
        assert!(spec.default.is_none());

        let spec = ParameterSpec::integer().with_default(json!(3));
        assert!(!spec.required);
    }

    #[test]
    fn test_json_schema_rendering() {
        let spec = ParameterSpec::object()
            .describe("Filter")
            .property("tag", ParameterSpec::string().pattern("^[a-z]+$"))
            .property("limit", ParameterSpec::integer().range(1.0, 50.0).optional());

        let schema = spec.to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["tag"]["pattern"], "^[a-z]+$");
        assert_eq!(schema["properties"]["limit"]["maximum"], 50);
        assert_eq!(schema["required"], json!(["tag"]));

        let array = ParameterSpec::array(ParameterSpec::number()).max_length(3);
        assert_eq!(array.to_json_schema()["maxItems"], 3);
    }

    #[test]
    fn test_from_json_descriptor() {
        let spec = ParameterSpec::from_json(&json!({
            "type": "object",
            "properties": {
                "a": {"type": "string"},
                "b": {"type": "number"}
            },
            "required": ["a"]
        }))
        .unwrap();

        assert_eq!(spec.ty, ParamType::Object);
        assert_eq!(spec.properties.len(), 2);
        assert_eq!(spec.properties[0].0, "a");
        assert!(spec.properties[0].1.required);
        assert!(!spec.properties[1].1.required);
    }

    #[test]
    fn test_from_json_rejects_unknown_keys_and_types() {
        assert!(ParameterSpec::from_json(&json!({"type": "strng"})).is_err());
        assert!(ParameterSpec::from_json(&json!({"type": "string", "minLen": 1})).is_err());
        assert!(ParameterSpec::from_json(&json!({"description": "no type"})).is_err());
    }

    #[test]
    fn test_param_decl_detects_composites() {
        let merged = ParamDecl::from_json(&json!({
            "allOf": [{"type": "object"}, {"type": "object"}]
        }))
        .unwrap();
        assert!(matches!(merged, ParamDecl::Merged(ref parts) if parts.len() == 2));

        let union = ParamDecl::from_json(&json!({"type": ["string", "number"]})).unwrap();
        assert!(matches!(union, ParamDecl::Merged(ref parts) if parts.len() == 2));

        let single = ParamDecl::from_json(&json!({"type": "boolean"})).unwrap();
        assert!(matches!(single, ParamDecl::Spec(_)));

        let combined = ParamDecl::merge(ParameterSpec::object(), ParameterSpec::object());
        assert!(matches!(combined, ParamDecl::Merged(ref parts) if parts.len() == 2));
    }
}
