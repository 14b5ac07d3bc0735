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

//! Server assembly
//!
//! [`ToolServerBuilder`] collects tools, middleware, plugins, and an optional
//! custom token verifier during the registration phase; [`ToolServer`] is the
//! started, frozen form any transport can drive: authenticate the header,
//! then hand the call envelope to [`ToolServer::handle`].

use crate::auth::{Authenticator, ProtectedResourceMetadata, TokenVerifier};
use crate::config::ServerConfig;
use crate::events::{EventEmitter, ServerEvent};
use crate::middleware::ToolMiddleware;
use crate::pipeline::ToolPipeline;
use crate::plugins::{PluginManager, ToolPlugin};
use crate::registry::{RegistryError, ToolRegistry};
use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use toolgate_core::{
    AuthContext, CallToolRequest, CallToolResponse, ToolDefinition, META_DURATION_MS,
};
use tracing::info;

/// Maps a tool definition to the wire shape a given protocol dialect expects
/// in listings.
pub trait ProtocolAdapter: Send + Sync {
    fn describe_tool(&self, definition: &ToolDefinition) -> Value;
}

/// Default adapter: MCP-style tool descriptors.
#[derive(Debug, Default)]
pub struct McpAdapter;

impl ProtocolAdapter for McpAdapter {
    fn describe_tool(&self, definition: &ToolDefinition) -> Value {
        let mut descriptor = serde_json::Map::new();
        descriptor.insert("name".into(), json!(definition.name));
        descriptor.insert("description".into(), json!(definition.description));
        descriptor.insert("inputSchema".into(), definition.input_schema.clone());
        if let Some(output) = &definition.output_schema {
            descriptor.insert("outputSchema".into(), output.clone());
        }
        if let Ok(Value::Object(annotations)) = serde_json::to_value(&definition.annotations) {
            if !annotations.is_empty() {
                descriptor.insert("annotations".into(), Value::Object(annotations));
            }
        }
        if let Some(resource) = &definition.ui_resource {
            descriptor.insert("_meta".into(), json!({ "uiResource": resource }));
        }
        Value::Object(descriptor)
    }
}

/// Reported on the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub name: String,
    pub version: String,
    pub status: &'static str,
}

pub struct ToolServerBuilder {
    config: ServerConfig,
    registry: ToolRegistry,
    middleware: Vec<Arc<dyn ToolMiddleware>>,
    plugins: Vec<Arc<dyn ToolPlugin>>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    adapter: Arc<dyn ProtocolAdapter>,
    pending_error: Option<RegistryError>,
}

impl ToolServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: ToolRegistry::new(),
            middleware: Vec::new(),
            plugins: Vec::new(),
            verifier: None,
            adapter: Arc::new(McpAdapter),
            pending_error: None,
        }
    }

    /// Register a tool. Registration errors (duplicates, bad schemas) are
    /// deferred and surfaced by [`start`](Self::start).
    pub fn tool(mut self, definition: ToolDefinition) -> Self {
        if self.pending_error.is_none() {
            if let Err(e) = self.registry.register(definition) {
                self.pending_error = Some(e);
            }
        }
        self
    }

    /// Append a middleware; the chain runs in append order, outermost first.
    pub fn middleware(mut self, middleware: Arc<dyn ToolMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn ToolPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Replace the JWKS-backed verifier with a custom one. Scope enforcement
    /// and expiry checks still apply on top of it.
    pub fn verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Run the startup sequence: plugin init, registry freeze, plugin start.
    /// Fails on any deferred registration error, invalid configuration, or
    /// failing init/start hook.
    pub async fn start(self) -> anyhow::Result<ToolServer> {
        if let Some(error) = self.pending_error {
            return Err(anyhow::Error::new(error).context("tool registration failed"));
        }
        self.config.validate()?;

        let authenticator = match (&self.verifier, self.config.auth.enabled) {
            (Some(verifier), _) => Some(Authenticator::new(
                Arc::clone(verifier),
                self.config.auth.required_scopes.clone(),
            )),
            (None, true) => Some(
                Authenticator::from_config(&self.config.auth)
                    .context("failed to build authenticator")?,
            ),
            (None, false) => None,
        };

        let events = EventEmitter::new(self.config.limits.event_capacity);
        let plugins = Arc::new(PluginManager::new(self.plugins));

        plugins.run_init().await.map_err(anyhow::Error::new)?;
        events.emit(ServerEvent::AppInitialized);

        self.registry.freeze();
        let registry = Arc::new(self.registry);
        let pipeline = ToolPipeline::new(
            Arc::clone(&registry),
            self.middleware,
            Arc::clone(&plugins),
            events.clone(),
        );

        plugins.run_start().await.map_err(anyhow::Error::new)?;
        events.emit(ServerEvent::AppStarted);

        info!(
            name = %self.config.identity.name,
            version = %self.config.identity.version,
            tools = registry.len(),
            auth = authenticator.is_some(),
            "Server started"
        );

        Ok(ToolServer {
            config: self.config,
            registry,
            pipeline,
            plugins,
            authenticator,
            adapter: self.adapter,
            events,
        })
    }
}

/// Started server. Transport-agnostic: callers feed it header values and
/// call envelopes and get envelopes back.
pub struct ToolServer {
    config: ServerConfig,
    registry: Arc<ToolRegistry>,
    pipeline: ToolPipeline,
    plugins: Arc<PluginManager>,
    authenticator: Option<Authenticator>,
    adapter: Arc<dyn ProtocolAdapter>,
    events: EventEmitter,
}

impl ToolServer {
    pub fn builder(config: ServerConfig) -> ToolServerBuilder {
        ToolServerBuilder::new(config)
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Authenticate a request's `Authorization` header value. Returns `None`
    /// when authentication is not configured.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<Option<AuthContext>, crate::auth::AuthError> {
        match &self.authenticator {
            Some(authenticator) => authenticator.authenticate(authorization).await.map(Some),
            None => Ok(None),
        }
    }

    /// Full request path: authenticate, then execute. Auth failures surface
    /// as `Err` so the transport can attach the challenge header; pipeline
    /// failures come back as in-band error envelopes.
    pub async fn handle(
        &self,
        request: CallToolRequest,
        authorization: Option<&str>,
    ) -> Result<CallToolResponse, crate::auth::AuthError> {
        let auth = self.authenticate(authorization).await?;
        Ok(self.call_tool(request, auth).await)
    }

    /// Execute one already-authenticated call. Never errors outward: every
    /// pipeline failure is folded into an error envelope.
    pub async fn call_tool(
        &self,
        request: CallToolRequest,
        auth: Option<AuthContext>,
    ) -> CallToolResponse {
        self.plugins.on_request(&request).await;
        let started = Instant::now();
        let response = match self.pipeline.execute(&request, auth).await {
            Ok(response) => response,
            Err(error) => {
                // Error envelopes report elapsed duration like successes do.
                let mut response = CallToolResponse::from_error(&error);
                response.meta.insert(
                    META_DURATION_MS.to_string(),
                    json!(started.elapsed().as_millis() as u64),
                );
                response
            }
        };
        self.plugins.on_response(&response).await;
        response
    }

    /// Visible tool descriptors in the adapter's wire shape, sorted by name.
    pub fn list_tools(&self) -> Vec<Value> {
        self.registry
            .list_visible()
            .iter()
            .map(|tool| self.adapter.describe_tool(&tool.definition))
            .collect()
    }

    pub fn health(&self) -> HealthInfo {
        HealthInfo {
            name: self.config.identity.name.clone(),
            version: self.config.identity.version.clone(),
            status: "ok",
        }
    }

    /// Protected-resource metadata document, when a resource is configured.
    pub fn resource_metadata(&self) -> Option<ProtectedResourceMetadata> {
        ProtectedResourceMetadata::from_config(&self.config.auth)
    }

    /// Notify plugins that the host loaded a UI resource.
    pub async fn notify_ui_load(&self, resource: &str) {
        self.plugins.on_ui_load(resource).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolgate_core::{handler_fn, ToolAnnotations, ToolOutput, ToolVisibility};

    fn greet() -> ToolDefinition {
        named_greet("greet")
    }

    fn named_greet(name: &str) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "Greets a person by name",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
            handler_fn(|input: serde_json::Value, _ctx| async move {
                let name = input["name"].as_str().unwrap_or("stranger");
                Ok(ToolOutput::new(json!({"message": format!("Hello, {}!", name)})))
            }),
        )
    }

    #[tokio::test]
    async fn test_startup_freezes_registry_and_emits_lifecycle_events() {
        let builder = ToolServer::builder(ServerConfig::default()).tool(greet());
        let server = builder.start().await.unwrap();
        assert!(server.registry.is_frozen());
        assert_eq!(server.health().status, "ok");
        assert_eq!(server.health().name, "toolgate");
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails_at_start() {
        let err = ToolServer::builder(ServerConfig::default())
            .tool(greet())
            .tool(greet())
            .start()
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("registration"));
    }

    #[tokio::test]
    async fn test_listing_uses_mcp_descriptor_shape() {
        let tool = greet()
            .with_output_schema(json!({"type": "object"}))
            .with_annotations(ToolAnnotations {
                read_only_hint: Some(true),
                ..Default::default()
            })
            .with_ui_resource("ui://widget/greeting");
        let server = ToolServer::builder(ServerConfig::default())
            .tool(tool)
            .tool(named_greet("internal").with_visibility(ToolVisibility::Hidden))
            .start()
            .await
            .unwrap();

        let listed = server.list_tools();
        assert_eq!(listed.len(), 1);
        let descriptor = &listed[0];
        assert_eq!(descriptor["name"], "greet");
        assert!(descriptor["inputSchema"].is_object());
        assert!(descriptor["outputSchema"].is_object());
        assert_eq!(descriptor["annotations"]["readOnlyHint"], json!(true));
        assert_eq!(descriptor["_meta"]["uiResource"], "ui://widget/greeting");
    }

    #[tokio::test]
    async fn test_call_without_auth_configured_passes_through() {
        let server = ToolServer::builder(ServerConfig::default())
            .tool(greet())
            .start()
            .await
            .unwrap();
        let response = server
            .handle(CallToolRequest::new("greet", json!({"name": "Bo"})), None)
            .await
            .unwrap();
        assert_eq!(response.structured_content["message"], "Hello, Bo!");
    }

    #[tokio::test]
    async fn test_pipeline_failure_becomes_error_envelope() {
        let server = ToolServer::builder(ServerConfig::default())
            .tool(greet())
            .start()
            .await
            .unwrap();
        let response = server
            .call_tool(CallToolRequest::new("missing", json!({})), None)
            .await;
        assert!(response.is_error);
        assert_eq!(response.meta["errorCode"], "UNKNOWN_TOOL");
        // Failures report elapsed duration just like successes.
        assert!(response.meta[META_DURATION_MS].is_u64());
    }
}
