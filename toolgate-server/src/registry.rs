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

//! Tool registry
//!
//! DashMap-backed registry of tool definitions with their compiled schema
//! validators. Append-only during the startup phase; frozen once the server
//! starts serving, after which reads need no coordination.

use crate::validation::SchemaValidator;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use toolgate_core::{ToolDefinition, ToolVisibility};
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    Duplicate(String),

    #[error("registry is frozen; tools must be registered before start")]
    Frozen,

    #[error("tool '{name}' has an invalid {contract} schema: {message}")]
    Schema {
        name: String,
        contract: &'static str,
        message: String,
    },
}

/// A definition plus everything compiled from it at registration time.
#[derive(Debug)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub input_validator: SchemaValidator,
    pub output_validator: Option<SchemaValidator>,
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<RegisteredTool>>,
    frozen: AtomicBool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its contracts. Fails on duplicate names,
    /// invalid schemas, or registration after freeze.
    pub fn register(&self, definition: ToolDefinition) -> Result<(), RegistryError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(RegistryError::Frozen);
        }

        let name = definition.name.clone();
        let input_validator =
            SchemaValidator::compile(&definition.input_schema).map_err(|message| {
                RegistryError::Schema {
                    name: name.clone(),
                    contract: "input",
                    message,
                }
            })?;
        let output_validator = match &definition.output_schema {
            Some(schema) => {
                Some(SchemaValidator::compile(schema).map_err(|message| {
                    RegistryError::Schema {
                        name: name.clone(),
                        contract: "output",
                        message,
                    }
                })?)
            }
            None => None,
        };

        let entry = Arc::new(RegisteredTool {
            definition,
            input_validator,
            output_validator,
        });

        // DashMap entry API keeps the duplicate check and insert atomic.
        match self.tools.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegistryError::Duplicate(name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
                debug!(tool = %name, "Tool registered");
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Visible tool definitions, for listings.
    pub fn list_visible(&self) -> Vec<Arc<RegisteredTool>> {
        let mut tools: Vec<_> = self
            .tools
            .iter()
            .filter(|entry| entry.value().definition.visibility == ToolVisibility::Visible)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        tools.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Seal the registry. Reads after this point require no locking
    /// discipline beyond the map's own sharding.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolgate_core::{handler_fn, ToolOutput};

    fn noop_tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "test tool",
            json!({"type": "object"}),
            handler_fn(|_, _| async { Ok(ToolOutput::default()) }),
        )
    }

    #[test]
    fn test_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(noop_tool("a")).unwrap();
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = ToolRegistry::new();
        registry.register(noop_tool("a")).unwrap();
        let err = registry.register(noop_tool("a")).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "a"));
    }

    #[test]
    fn test_frozen_registry_rejects_registration() {
        let registry = ToolRegistry::new();
        registry.register(noop_tool("a")).unwrap();
        registry.freeze();
        assert!(matches!(
            registry.register(noop_tool("b")),
            Err(RegistryError::Frozen)
        ));
        // Reads still work after freeze.
        assert!(registry.get("a").is_some());
    }

    #[test]
    fn test_listing_hides_hidden_tools() {
        let registry = ToolRegistry::new();
        registry.register(noop_tool("visible")).unwrap();
        registry
            .register(noop_tool("internal").with_visibility(ToolVisibility::Hidden))
            .unwrap();
        let listed = registry.list_visible();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].definition.name, "visible");
    }

    #[test]
    fn test_invalid_schema_rejected_at_registration() {
        let registry = ToolRegistry::new();
        let tool = ToolDefinition::new(
            "bad",
            "broken contract",
            json!({"type": "no-such-type"}),
            handler_fn(|_, _| async { Ok(ToolOutput::default()) }),
        );
        assert!(matches!(
            registry.register(tool),
            Err(RegistryError::Schema { contract: "input", .. })
        ));
    }
}
