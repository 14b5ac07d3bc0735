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

//! Tool definitions
//!
//! A [`ToolDefinition`] couples a name and declared JSON Schema contracts with
//! the user-supplied handler. Definitions are immutable after registration and
//! owned by the server's registry.

use crate::context::ToolContext;
use crate::error::ToolCallError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by tool handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolCallError>> + Send>>;

/// User-supplied handler: `(arguments, context) -> result`.
pub type ToolHandler = Arc<dyn Fn(Value, ToolContext) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure into a [`ToolHandler`].
pub fn handler_fn<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput, ToolCallError>> + Send + 'static,
{
    Arc::new(move |input, ctx| Box::pin(f(input, ctx)))
}

/// Whether a tool is advertised in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolVisibility {
    #[default]
    Visible,
    Hidden,
}

/// Protocol-agnostic behavior hints, surfaced to clients via the protocol
/// adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

/// A named, schema-described operation exposed by the service.
#[derive(Clone)]
pub struct ToolDefinition {
    /// Unique registration key.
    pub name: String,
    pub description: String,
    /// JSON Schema the arguments must satisfy before the handler runs.
    pub input_schema: Value,
    /// JSON Schema the structured output must satisfy, if declared.
    pub output_schema: Option<Value>,
    pub annotations: ToolAnnotations,
    pub visibility: ToolVisibility,
    /// Reference to a UI resource rendered by the host, if any.
    pub ui_resource: Option<String>,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
            annotations: ToolAnnotations::default(),
            visibility: ToolVisibility::Visible,
            ui_resource: None,
            handler,
        }
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_visibility(mut self, visibility: ToolVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_ui_resource(mut self, uri: impl Into<String>) -> Self {
        self.ui_resource = Some(uri.into());
        self
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("visibility", &self.visibility)
            .field("ui_resource", &self.ui_resource)
            .finish_non_exhaustive()
    }
}

/// Handler result: declared structured output plus out-of-band directives
/// that ride alongside it on the response envelope.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Validated against the tool's declared output contract.
    pub structured: Value,
    /// Free-form narration text; when absent, the serialized structured
    /// output is used as the narration fallback.
    pub narration: Option<String>,
    /// Signal the host to close the widget that initiated this call.
    pub close_widget: bool,
    /// Additional response metadata, merged into the response `_meta` block.
    pub meta: Map<String, Value>,
}

impl ToolOutput {
    pub fn new(structured: Value) -> Self {
        Self {
            structured,
            ..Default::default()
        }
    }

    pub fn with_narration(mut self, text: impl Into<String>) -> Self {
        self.narration = Some(text.into());
        self
    }

    pub fn with_close_widget(mut self) -> Self {
        self.close_widget = true;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}
