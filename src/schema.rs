//! Record schemas shared by lowering (which builds them) and the store
//! backends (which enforce them on save).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::{Decimal, Record, Value};

/// Canonical field types. Built-in aliases collapse onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseType {
    Text,
    Number,
    Int,
    Boolean,
    Json,
}

impl BaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseType::Text => "text",
            BaseType::Number => "number",
            BaseType::Int => "int",
            BaseType::Boolean => "boolean",
            BaseType::Json => "json",
        }
    }

    /// Base type names and their built-in spellings.
    pub fn from_builtin(name: &str) -> Option<BaseType> {
        match name {
            "text" | "string" | "str" => Some(BaseType::Text),
            "number" => Some(BaseType::Number),
            "int" | "integer" => Some(BaseType::Int),
            "boolean" | "bool" => Some(BaseType::Boolean),
            "json" => Some(BaseType::Json),
            _ => None,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (BaseType::Json, _) => true,
            (BaseType::Text, Value::Text(_)) => true,
            (BaseType::Number, Value::Number(_)) => true,
            (BaseType::Int, Value::Number(n)) => n.is_integer(),
            (BaseType::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum FieldConstraint {
    Present,
    Unique,
    GreaterThan(Decimal),
    LessThan(Decimal),
    AtLeast(Decimal),
    AtMost(Decimal),
    Pattern(String),
    MinLength(u32),
    MaxLength(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: BaseType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<FieldConstraint>,
}

impl FieldSchema {
    pub fn is_unique(&self) -> bool {
        self.constraints.contains(&FieldConstraint::Unique)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    /// Field that orders `list`/`find` results instead of insertion order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
}

/// A value that breaks a field's type or constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    pub field: String,
    pub message: String,
}

/// Field that receives the store-assigned id.
pub const ID_FIELD: &str = "id";

impl RecordSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
            order_by: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| f.is_unique())
    }

    /// Check types and every constraint except uniqueness, which needs the
    /// backend. Returns the record laid out in schema field order; `id` is
    /// left for the store to assign.
    pub fn validate(&self, record: &Record) -> Result<Record, SchemaViolation> {
        for key in record.keys() {
            if key != ID_FIELD && self.field(key).is_none() {
                return Err(SchemaViolation {
                    field: key.to_string(),
                    message: format!("Record '{}' has no field '{}'", self.name, key),
                });
            }
        }

        let mut normalized = Record::new();
        for field in &self.fields {
            if field.name == ID_FIELD {
                continue;
            }
            let value = record.get(&field.name).cloned().unwrap_or(Value::Null);
            if !field.field_type.accepts(&value) {
                return Err(SchemaViolation {
                    field: field.name.clone(),
                    message: format!(
                        "Field '{}' expects {} but got {}",
                        field.name,
                        field.field_type,
                        value.type_name()
                    ),
                });
            }
            for constraint in &field.constraints {
                check_constraint(field, constraint, &value)?;
            }
            normalized.insert(field.name.clone(), value);
        }
        Ok(normalized)
    }
}

fn check_constraint(
    field: &FieldSchema,
    constraint: &FieldConstraint,
    value: &Value,
) -> Result<(), SchemaViolation> {
    let fail = |message: String| {
        Err(SchemaViolation {
            field: field.name.clone(),
            message,
        })
    };
    let name = &field.name;

    match constraint {
        FieldConstraint::Present => {
            let missing = match value {
                Value::Null => true,
                Value::Text(s) => s.trim().is_empty(),
                _ => false,
            };
            if missing {
                return fail(format!("Field '{}' must be present", name));
            }
        }
        FieldConstraint::Unique => {}
        FieldConstraint::GreaterThan(bound)
        | FieldConstraint::LessThan(bound)
        | FieldConstraint::AtLeast(bound)
        | FieldConstraint::AtMost(bound) => {
            let Value::Number(n) = value else {
                return Ok(());
            };
            let (ok, words) = match constraint {
                FieldConstraint::GreaterThan(_) => (n > bound, "greater than"),
                FieldConstraint::LessThan(_) => (n < bound, "less than"),
                FieldConstraint::AtLeast(_) => (n >= bound, "at least"),
                _ => (n <= bound, "at most"),
            };
            if !ok {
                return fail(format!("Field '{}' must be {} {}", name, words, bound));
            }
        }
        FieldConstraint::Pattern(pattern) => {
            let Value::Text(s) = value else {
                return Ok(());
            };
            let re = Regex::new(pattern).map_err(|e| SchemaViolation {
                field: name.clone(),
                message: format!("Invalid pattern for field '{}': {}", name, e),
            })?;
            if !re.is_match(s) {
                return fail(format!("Field '{}' must match pattern \"{}\"", name, pattern));
            }
        }
        FieldConstraint::MinLength(min) | FieldConstraint::MaxLength(min) => {
            let len = match value {
                Value::Text(s) => s.chars().count(),
                Value::List(items) => items.len(),
                _ => return Ok(()),
            };
            let bound = *min as usize;
            let (ok, words) = match constraint {
                FieldConstraint::MinLength(_) => (len >= bound, "at least"),
                _ => (len <= bound, "at most"),
            };
            if !ok {
                return fail(format!(
                    "Field '{}' must have length {} {}",
                    name, words, bound
                ));
            }
        }
    }
    Ok(())
}
