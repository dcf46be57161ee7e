//! # Action Schemas
//!
//! An action declares its inputs and (optionally) outputs as an ordered
//! list of fields. Validation is **open**: declared fields are checked for
//! presence and type and have defaults applied; undeclared keys pass
//! through untouched. The same machinery validates params on the way in
//! and results on the way out.

use serde_json::Value;

use crate::error::{Details, ExecError};
use crate::params::{self, Params};

// ============================================================================
// FIELD KIND
// ============================================================================

/// Accepted value shape for a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any JSON value
    Any,
    Boolean,
    Integer,
    Float,
    String,
    List,
    Map,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::Any => true,
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::String => value.is_string(),
            FieldKind::List => value.is_array(),
            FieldKind::Map => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldKind::Any => "any",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::String => "string",
            FieldKind::List => "list",
            FieldKind::Map => "map",
        }
    }
}

// ============================================================================
// FIELD
// ============================================================================

/// One declared field: `(name, kind, required, default, doc)`.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
    pub doc: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            doc: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Ordered list of declared fields. Immutable once the action is defined.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a declared field (builder style).
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A default value must match its own field kind, otherwise the schema
    /// itself is invalid.
    pub fn check_well_formed(&self) -> Result<(), ExecError> {
        for field in &self.fields {
            if let Some(default) = &field.default {
                if !field.kind.matches(default) {
                    return Err(ExecError::config(format!(
                        "default for field {} does not match declared kind {}",
                        field.name,
                        field.kind.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Open validation: check declared fields, apply defaults, pass
    /// undeclared keys through unmodified.
    pub fn validate(&self, input: &Params) -> Result<Params, ExecError> {
        let mut output = input.clone();
        let mut missing: Vec<String> = Vec::new();
        let mut mismatched: Vec<Value> = Vec::new();

        for field in &self.fields {
            match output.get(&field.name) {
                Some(value) => {
                    if !field.kind.matches(value) {
                        mismatched.push(serde_json::json!({
                            "field": field.name,
                            "expected": field.kind.name(),
                            "got": params::type_name(value),
                        }));
                    }
                }
                None => {
                    if let Some(default) = &field.default {
                        output.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        missing.push(field.name.clone());
                    }
                }
            }
        }

        if missing.is_empty() && mismatched.is_empty() {
            return Ok(output);
        }

        let mut details = Details::new();
        if !missing.is_empty() {
            details.insert("missing".into(), missing.into());
        }
        if !mismatched.is_empty() {
            details.insert("mismatched".into(), mismatched.into());
        }
        Err(ExecError::validation("schema validation failed").with_details(details))
    }
}
