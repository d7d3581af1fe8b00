//! Resource data trees and static/dynamic classification

use super::ParamType;
use crate::error::DeclarationError;
use serde_json::{Map, Value};

/// One node of a resource data tree
#[derive(Debug, Clone, PartialEq)]
pub enum DataNode {
    /// Concrete value served as-is
    Literal(Value),
    /// Placeholder whose value only a handler can produce
    Type(ParamType),
    Array(Vec<DataNode>),
    Object(Vec<(String, DataNode)>),
}

impl DataNode {
    /// Parse a JSON data tree
    ///
    /// An object of exactly `{"$type": "<name>"}` is a type descriptor leaf;
    /// every other scalar is a literal.
    pub fn from_json(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Object(map) => {
                if let Some(ty) = map.get("$type") {
                    if map.len() != 1 {
                        return Err("'$type' leaves cannot carry other keys".to_string());
                    }
                    let name = ty
                        .as_str()
                        .ok_or_else(|| format!("'$type' must be a string, got {}", ty))?;
                    return ParamType::parse(name)
                        .map(DataNode::Type)
                        .ok_or_else(|| format!("unknown type '{}'", name));
                }
                map.iter()
                    .map(|(k, v)| DataNode::from_json(v).map(|node| (k.clone(), node)))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map(DataNode::Object)
            }
            Value::Array(items) => items
                .iter()
                .map(DataNode::from_json)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(DataNode::Array),
            scalar => Ok(DataNode::Literal(scalar.clone())),
        }
    }

    fn collect_leaves(&self, path: &str, literals: &mut Vec<String>, types: &mut Vec<String>) {
        let here = || if path.is_empty() { "$".to_string() } else { path.to_string() };
        match self {
            DataNode::Literal(_) => literals.push(here()),
            DataNode::Type(_) => types.push(here()),
            DataNode::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_leaves(&format!("{path}[{i}]"), literals, types);
                }
            }
            DataNode::Object(fields) => {
                for (key, node) in fields {
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    node.collect_leaves(&child, literals, types);
                }
            }
        }
    }

    /// Literal value of a tree without type leaves
    fn to_literal(&self) -> Option<Value> {
        match self {
            DataNode::Literal(v) => Some(v.clone()),
            DataNode::Type(_) => None,
            DataNode::Array(items) => items
                .iter()
                .map(DataNode::to_literal)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            DataNode::Object(fields) => {
                let mut map = Map::new();
                for (key, node) in fields {
                    map.insert(key.clone(), node.to_literal()?);
                }
                Some(Value::Object(map))
            }
        }
    }
}

/// Data declaration of a resource
#[derive(Debug, Clone, PartialEq)]
pub struct DataSpec {
    pub root: DataNode,
    /// Explicit dynamic flag; forces a handler even for literal trees
    pub dynamic: bool,
}

impl DataSpec {
    /// Static data served verbatim
    pub fn literal(value: Value) -> Self {
        Self {
            root: DataNode::Literal(value),
            dynamic: false,
        }
    }

    /// Data shape described by a tree
    pub fn typed(root: DataNode) -> Self {
        Self {
            root,
            dynamic: false,
        }
    }

    /// Mark as dynamic
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Parse a JSON data tree (see [`DataNode::from_json`])
    pub fn from_json(value: &Value) -> std::result::Result<Self, String> {
        DataNode::from_json(value).map(Self::typed)
    }
}

/// Outcome of classifying a [`DataSpec`]
#[derive(Debug, Clone, PartialEq)]
pub enum DataClass {
    /// Served from the declaration, no handler involved
    Static(Value),
    /// Requires a handler
    Dynamic,
}

/// Classify resource data as static or dynamic
///
/// All-literal trees are static unless flagged dynamic. Trees of only type
/// descriptors are dynamic. Mixing both without the flag is rejected, since
/// partially static resources are not served.
pub fn classify(resource: &str, spec: &DataSpec) -> Result<DataClass, DeclarationError> {
    if spec.dynamic {
        return Ok(DataClass::Dynamic);
    }

    let mut literals = Vec::new();
    let mut types = Vec::new();
    spec.root.collect_leaves("", &mut literals, &mut types);

    if types.is_empty() {
        // Empty containers count as literal
        return Ok(DataClass::Static(spec.root.to_literal().unwrap_or(Value::Null)));
    }
    if literals.is_empty() {
        return Ok(DataClass::Dynamic);
    }
    Err(DeclarationError::MixedLiteralType {
        resource: resource.to_string(),
        literal_paths: literals,
        type_paths: types,
    })
}
