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

//! Toolgate server
//!
//! Transport-agnostic request-handling core for a tool-serving process:
//! bearer-token authentication at the boundary, then a validated execution
//! pipeline (schema contracts, middleware chain, plugin hooks, typed
//! lifecycle events) around each tool handler.
//!
//! Wire transports live outside this crate; they drive a started
//! [`ToolServer`] with header values and call envelopes.

pub mod auth;
pub mod config;
pub mod events;
pub mod middleware;
pub mod pipeline;
pub mod plugins;
pub mod registry;
pub mod server;
pub mod validation;

pub use auth::{AuthError, Authenticator, TokenVerifier, ValidatedToken};
pub use config::{AuthConfig, ServerConfig};
pub use events::{EventEmitter, ServerEvent};
pub use middleware::{Next, ToolMiddleware};
pub use pipeline::ToolPipeline;
pub use plugins::{PluginError, PluginManager, ToolPlugin};
pub use registry::{RegistryError, ToolRegistry};
pub use server::{HealthInfo, McpAdapter, ProtocolAdapter, ToolServer, ToolServerBuilder};

pub use toolgate_core::{
    handler_fn, AuthContext, CallToolRequest, CallToolResponse, RequestMeta, StateBag,
    ToolCallError, ToolContext, ToolDefinition, ToolOutput, ToolVisibility,
};
