// Copyright 2025 Toolgate Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Contract validation
//!
//! Thin wrapper over the `jsonschema` crate. Schemas are compiled once at
//! tool registration; per-call validation only walks the instance.

use jsonschema::JSONSchema;
use serde_json::Value;
use std::fmt;

/// A single contract violation, located by JSON pointer.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Compiled JSON Schema validator.
pub struct SchemaValidator {
    schema: JSONSchema,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

impl SchemaValidator {
    /// Compile a schema. Invalid schemas are a registration-time error.
    pub fn compile(schema: &Value) -> Result<Self, String> {
        JSONSchema::compile(schema)
            .map(|schema| Self { schema })
            .map_err(|e| format!("invalid JSON Schema: {}", e))
    }

    /// Validate an instance, collecting every violation rather than
    /// stopping at the first.
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<ValidationIssue>> {
        match self.schema.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|e| ValidationIssue {
                    path: e.instance_path.to_string(),
                    message: e.to_string(),
                })
                .collect()),
        }
    }
}

/// Render violations into a single caller-facing message.
pub fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
