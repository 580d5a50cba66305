//! Node definitions: kind tags, schemas, and input-binding configuration.

use indexmap::IndexMap;
use mbflow_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;

/// A registry tag identifying which executor runs a node.
///
/// Kinds are small validated strings (lowercase alphanumeric plus `-`/`_`),
/// so `"transform"` and `"http-request"` are valid while `"HTTP Request"`
/// is not. The engine's executor registry is keyed by kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKind(String);

impl NodeKind {
    /// Create a validated node kind.
    pub fn new(kind: impl Into<String>) -> Result<Self, WorkflowError> {
        let kind = kind.into();
        let valid = !kind.is_empty()
            && kind
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if valid {
            Ok(Self(kind))
        } else {
            Err(WorkflowError::InvalidNodeKind(kind))
        }
    }

    /// The built-in pass-through start marker.
    #[must_use]
    pub fn start() -> Self {
        Self("start".into())
    }

    /// The built-in expression transform.
    #[must_use]
    pub fn transform() -> Self {
        Self("transform".into())
    }

    /// The built-in conditional router.
    #[must_use]
    pub fn router() -> Self {
        Self("router".into())
    }

    /// The kind as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is the start marker kind.
    #[must_use]
    pub fn is_start(&self) -> bool {
        self.0 == "start"
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Expected JSON type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool,
    /// JSON number (integer or float).
    Number,
    /// JSON string.
    String,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl ValueType {
    /// Returns `true` if `value` matches this type.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// A schema violation found while validating a value map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Required fields that were absent.
    pub missing: Vec<String>,
    /// Fields present with the wrong type: `(field, expected)`.
    pub mismatched: Vec<(String, ValueType)>,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "missing: [{}], mismatched: [{}]",
            self.missing.join(", "),
            self.mismatched
                .iter()
                .map(|(k, t)| format!("{k} (expected {t:?})"))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// A minimal structural schema for node inputs and outputs.
///
/// Declares required field names and, optionally, expected JSON types per
/// field. This is deliberately not a full JSON Schema; it covers what the
/// binder needs for auto-bind validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueSchema {
    /// Fields that must be present.
    #[serde(default)]
    pub required: Vec<String>,
    /// Expected types for fields that are present.
    #[serde(default)]
    pub types: IndexMap<String, ValueType>,
}

impl ValueSchema {
    /// A schema that only requires the given fields.
    #[must_use]
    pub fn required(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required: fields.into_iter().map(Into::into).collect(),
            types: IndexMap::new(),
        }
    }

    /// Add a type expectation for a field.
    #[must_use]
    pub fn with_type(mut self, field: impl Into<String>, ty: ValueType) -> Self {
        self.types.insert(field.into(), ty);
        self
    }

    /// Validate a value map against this schema.
    pub fn validate(&self, values: &serde_json::Map<String, Value>) -> Result<(), SchemaViolation> {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|k| !values.contains_key(*k))
            .cloned()
            .collect();
        let mismatched: Vec<(String, ValueType)> = self
            .types
            .iter()
            .filter_map(|(k, ty)| {
                values
                    .get(k)
                    .filter(|v| !ty.matches(v))
                    .map(|_| (k.clone(), *ty))
            })
            .collect();

        if missing.is_empty() && mismatched.is_empty() {
            Ok(())
        } else {
            Err(SchemaViolation { missing, mismatched })
        }
    }
}

/// Policy applied when two direct parents supply the same output key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionStrategy {
    /// Keep both values under `"<parent-name>_<key>"`; the raw key is omitted.
    #[default]
    NamespaceByParent,
    /// Merge colliding values into an ordered array under the raw key.
    Collect,
    /// Fail the binding.
    Error,
}

/// Per-node input-binding configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputBinding {
    /// Collision policy for direct-parent output merging.
    #[serde(default)]
    pub collision: CollisionStrategy,
    /// Explicit mappings: input name → `"parent.field"` path expression.
    #[serde(default)]
    pub mappings: IndexMap<String, String>,
    /// Validate the bound inputs against the node's input schema.
    #[serde(default)]
    pub auto_bind: bool,
}

impl InputBinding {
    /// A binding configuration with the given collision strategy.
    #[must_use]
    pub fn with_collision(collision: CollisionStrategy) -> Self {
        Self {
            collision,
            ..Self::default()
        }
    }

    /// Add an explicit mapping.
    #[must_use]
    pub fn map(mut self, input: impl Into<String>, path: impl Into<String>) -> Self {
        self.mappings.insert(input.into(), path.into());
        self
    }

    /// Enable schema validation of the bound inputs.
    #[must_use]
    pub fn auto_bind(mut self) -> Self {
        self.auto_bind = true;
        self
    }
}

/// A node in a workflow definition.
///
/// Created at graph build time, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier.
    pub id: NodeId,
    /// Registry tag selecting the executor.
    pub kind: NodeKind,
    /// Human-readable name, unique within the workflow.
    pub name: String,
    /// Free-form executor configuration.
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    /// Expected shape of the bound inputs.
    #[serde(default)]
    pub input_schema: Option<ValueSchema>,
    /// Expected shape of the produced outputs.
    #[serde(default)]
    pub output_schema: Option<ValueSchema>,
    /// Input-binding configuration.
    #[serde(default)]
    pub binding: Option<InputBinding>,
}

impl NodeDefinition {
    /// Create a node definition with an empty configuration.
    #[must_use]
    pub fn new(id: NodeId, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            config: serde_json::Map::new(),
            input_schema: None,
            output_schema: None,
            binding: None,
        }
    }

    /// Replace the configuration map.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Set a single configuration entry.
    #[must_use]
    pub fn with_config_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Attach an input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: ValueSchema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Attach an output schema.
    #[must_use]
    pub fn with_output_schema(mut self, schema: ValueSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Attach an input-binding configuration.
    #[must_use]
    pub fn with_binding(mut self, binding: InputBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    /// The collision strategy for this node (default when unconfigured).
    #[must_use]
    pub fn collision_strategy(&self) -> CollisionStrategy {
        self.binding.as_ref().map_or_else(CollisionStrategy::default, |b| b.collision)
    }
}
