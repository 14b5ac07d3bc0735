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

//! Toolgate core data model
//!
//! Protocol-agnostic types shared between the server and any transport
//! binding: tool definitions, invocation envelopes, per-call contexts, and
//! the error taxonomy. No I/O lives in this crate.

pub mod context;
pub mod envelope;
pub mod error;
pub mod tool;

pub use context::{AuthContext, MiddlewareContext, RequestMeta, StateBag, ToolContext};
pub use envelope::{
    CallToolRequest, CallToolResponse, META_CLOSE_WIDGET, META_DURATION_MS, RESPONSE_STATE_KEY,
};
pub use error::ToolCallError;
pub use tool::{
    handler_fn, ToolAnnotations, ToolDefinition, ToolHandler, ToolOutput, ToolVisibility,
};
