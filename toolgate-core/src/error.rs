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

//! Tool invocation error taxonomy
//!
//! Every failure a call can hit on its way through the pipeline maps to one
//! variant here. Input and output contract violations are distinct variants
//! with distinct codes; handler failures and output violations share the same
//! generic wire message, but the distinction is preserved for logs and events.

use thiserror::Error;

/// Error produced by the execution pipeline for a single tool call.
#[derive(Debug, Clone, Error)]
pub enum ToolCallError {
    /// No tool registered under the requested name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments failed validation against the tool's input contract.
    /// Never reaches the handler.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Handler result failed validation against the tool's output contract.
    /// A programming error in the handler.
    #[error("invalid output: {0}")]
    InvalidOutput(String),

    /// The handler itself failed.
    #[error("tool execution failed: {0}")]
    Handler(String),

    /// The pipeline was mis-assembled, e.g. middleware consumed the call
    /// without producing a response.
    #[error("pipeline configuration error: {0}")]
    PipelineConfig(String),

    /// Anything else that should never leak internal detail to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolCallError {
    /// Stable machine-readable code for events, logs, and error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ToolCallError::UnknownTool(_) => "UNKNOWN_TOOL",
            ToolCallError::InvalidInput(_) => "INVALID_INPUT",
            ToolCallError::InvalidOutput(_) => "INVALID_OUTPUT",
            ToolCallError::Handler(_) => "EXECUTION_FAILED",
            ToolCallError::PipelineConfig(_) => "PIPELINE_CONFIG",
            ToolCallError::Internal(_) => "INTERNAL",
        }
    }

    /// Message suitable for the caller.
    ///
    /// Handler failures carry the handler's own message (no stack detail);
    /// output violations surface the same generic wrapped form so callers
    /// cannot rely on the difference, while events keep the real code.
    pub fn wire_message(&self) -> String {
        match self {
            ToolCallError::Handler(msg) => format!("Tool execution failed: {}", msg),
            ToolCallError::InvalidOutput(_) => {
                "Tool execution failed: tool produced invalid output".to_string()
            }
            ToolCallError::PipelineConfig(_) | ToolCallError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Pre-handler rejections never represent partial handler work.
    pub fn is_pre_handler(&self) -> bool {
        matches!(
            self,
            ToolCallError::UnknownTool(_) | ToolCallError::InvalidInput(_)
        )
    }
}
