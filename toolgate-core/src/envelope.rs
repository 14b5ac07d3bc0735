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

//! Tool invocation envelopes
//!
//! Wire shapes exchanged with the transport layer. A request carries a tool
//! name, an arguments object, and an optional `_meta` block; a response
//! carries narration text, the validated structured output, and response
//! metadata (which may include a close-widget directive).

use crate::error::ToolCallError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response metadata key carrying the close-widget directive.
pub const META_CLOSE_WIDGET: &str = "closeWidget";

/// Response metadata key carrying elapsed wall-clock duration.
pub const META_DURATION_MS: &str = "durationMs";

/// State-bag key middleware writes a response under when terminating the
/// chain without invoking the handler.
pub const RESPONSE_STATE_KEY: &str = "pipeline.response";

/// Raw tool call handed to the pipeline by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl CallToolRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Assembled tool call response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResponse {
    /// Narration text shown to the model/user.
    #[serde(default)]
    pub content: String,
    /// Structured output, validated against the tool's declared contract.
    #[serde(rename = "structuredContent", default)]
    pub structured_content: Value,
    #[serde(rename = "_meta", default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(rename = "isError", default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl CallToolResponse {
    pub fn new(content: impl Into<String>, structured_content: Value) -> Self {
        Self {
            content: content.into(),
            structured_content,
            meta: Map::new(),
            is_error: false,
        }
    }

    /// In-band error envelope. Carries only the wire-safe message and code.
    pub fn from_error(error: &ToolCallError) -> Self {
        let mut meta = Map::new();
        meta.insert("errorCode".into(), Value::String(error.code().into()));
        Self {
            content: error.wire_message(),
            structured_content: Value::Null,
            meta,
            is_error: true,
        }
    }

    pub fn close_widget(&self) -> bool {
        self.meta
            .get(META_CLOSE_WIDGET)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
