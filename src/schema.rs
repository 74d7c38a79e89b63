use std::path::Path;

use serde_json::Value;

use crate::error::ForgeError;

/// Checks one normalized record against the row schema.
pub trait SchemaValidator {
    /// `Err` carries a human-readable reason listing every violation.
    fn validate(&self, instance: &Value) -> Result<(), String>;
}

/// JSON Schema backed validator for product rows.
pub struct JsonSchemaValidator {
    validator: jsonschema::Validator,
}

impl JsonSchemaValidator {
    pub fn from_value(schema: &Value) -> Result<Self, ForgeError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| ForgeError::Config(format!("invalid row schema: {e}")))?;
        Ok(Self { validator })
    }

    pub fn from_path(path: &Path) -> Result<Self, ForgeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ForgeError::Config(format!("cannot read row schema {}: {e}", path.display()))
        })?;
        let schema: Value = serde_json::from_str(&contents)?;
        Self::from_value(&schema)
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, instance: &Value) -> Result<(), String> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}
