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

//! Execution pipeline
//!
//! Drives one tool call through its stages: input validation, context
//! build, plugin before-hook, middleware chain with the handler as the
//! innermost continuation, after/error hooks, output validation, response
//! assembly, and event emission.
//!
//! Unknown-tool and input-validation failures are fast pre-context
//! rejections: they return before any hook runs or event fires. Once the
//! context is built, every call ends in exactly one succeeded/failed event.

use crate::events::{EventEmitter, ServerEvent};
use crate::middleware::{Next, ToolMiddleware};
use crate::plugins::PluginManager;
use crate::registry::{RegisteredTool, ToolRegistry};
use crate::validation::format_issues;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use toolgate_core::{
    AuthContext, CallToolRequest, CallToolResponse, MiddlewareContext, RequestMeta, StateBag,
    ToolCallError, ToolContext, ToolOutput, META_CLOSE_WIDGET, META_DURATION_MS,
    RESPONSE_STATE_KEY,
};
use tracing::{debug, warn};

pub struct ToolPipeline {
    registry: Arc<ToolRegistry>,
    middleware: Vec<Arc<dyn ToolMiddleware>>,
    plugins: Arc<PluginManager>,
    events: EventEmitter,
}

impl ToolPipeline {
    pub fn new(
        registry: Arc<ToolRegistry>,
        middleware: Vec<Arc<dyn ToolMiddleware>>,
        plugins: Arc<PluginManager>,
        events: EventEmitter,
    ) -> Self {
        Self {
            registry,
            middleware,
            plugins,
            events,
        }
    }

    /// Execute one call. `auth` is whatever the authenticator stamped at
    /// the transport boundary, if authentication is configured.
    pub async fn execute(
        &self,
        request: &CallToolRequest,
        auth: Option<AuthContext>,
    ) -> Result<CallToolResponse, ToolCallError> {
        let started = Instant::now();

        let tool = self.registry.get(&request.name).ok_or_else(|| {
            debug!(tool = %request.name, "Call to unknown tool");
            ToolCallError::UnknownTool(request.name.clone())
        })?;

        // Input violations never reach the handler.
        tool.input_validator
            .validate(&request.arguments)
            .map_err(|issues| ToolCallError::InvalidInput(format_issues(&issues)))?;

        // Context build: parsed client metadata, auth data, fresh state bag.
        let mut meta = RequestMeta::from_value(request.meta.as_ref());
        if let Some(auth_ctx) = &auth {
            crate::auth::inject_auth(&mut meta, auth_ctx);
        }
        let ctx = ToolContext {
            meta,
            auth,
            state: StateBag::new(),
        };

        self.events.emit(ServerEvent::ToolCalled {
            tool: request.name.clone(),
        });

        match self.run_stages(&tool, request, &ctx).await {
            Ok(mut response) => {
                let duration = started.elapsed();
                response.meta.insert(
                    META_DURATION_MS.to_string(),
                    json!(duration.as_millis() as u64),
                );
                self.events.emit(ServerEvent::ToolSucceeded {
                    tool: request.name.clone(),
                    duration,
                });
                Ok(response)
            }
            Err(error) => {
                let duration = started.elapsed();
                warn!(tool = %request.name, code = error.code(), error = %error, "Tool call failed");
                self.plugins.on_tool_error(&ctx, &request.name, &error).await;
                self.events.emit(ServerEvent::ToolFailed {
                    tool: request.name.clone(),
                    code: error.code(),
                    duration,
                });
                Err(error)
            }
        }
    }

    async fn run_stages(
        &self,
        tool: &RegisteredTool,
        request: &CallToolRequest,
        ctx: &ToolContext,
    ) -> Result<CallToolResponse, ToolCallError> {
        let name = &tool.definition.name;

        self.plugins
            .before_tool_call(ctx, name, &request.arguments)
            .await
            .map_err(|e| ToolCallError::Internal(e.to_string()))?;

        let mw_ctx = MiddlewareContext {
            tool_name: name.clone(),
            input: request.arguments.clone(),
            meta: ctx.meta.clone(),
            state: ctx.state.clone(),
        };

        // The handler result is captured in a slot outside the chain's own
        // return value so terminating middleware cannot fake a handler run.
        let slot: Arc<Mutex<Option<ToolOutput>>> = Arc::new(Mutex::new(None));
        let terminal = {
            let handler = Arc::clone(&tool.definition.handler);
            let input = request.arguments.clone();
            let handler_ctx = ctx.clone();
            let slot = Arc::clone(&slot);
            move || -> BoxFuture<'static, Result<(), ToolCallError>> {
                let handler = Arc::clone(&handler);
                let input = input.clone();
                let handler_ctx = handler_ctx.clone();
                let slot = Arc::clone(&slot);
                Box::pin(async move {
                    let output = handler(input, handler_ctx).await?;
                    *slot.lock() = Some(output);
                    Ok(())
                })
            }
        };

        Next::new(&self.middleware, &terminal).run(&mw_ctx).await?;

        let output = slot.lock().take();
        match output {
            Some(output) => {
                // Isolated: a failing after-hook never flips a success.
                self.plugins.after_tool_call(ctx, name, &output).await;

                // Directives were stripped into ToolOutput fields already;
                // only the structured payload faces the output contract.
                if let Some(validator) = &tool.output_validator {
                    validator
                        .validate(&output.structured)
                        .map_err(|issues| ToolCallError::InvalidOutput(format_issues(&issues)))?;
                }

                Ok(assemble_response(output))
            }
            None => match ctx.state.remove(RESPONSE_STATE_KEY) {
                Some(value) => {
                    debug!(tool = %name, "Middleware provided the response; handler skipped");
                    serde_json::from_value::<CallToolResponse>(value).map_err(|e| {
                        ToolCallError::PipelineConfig(format!(
                            "middleware response in state bag is not a valid call response: {}",
                            e
                        ))
                    })
                }
                None => Err(ToolCallError::PipelineConfig(format!(
                    "middleware consumed the call to '{}' without invoking the handler \
                     or providing a response",
                    name
                ))),
            },
        }
    }
}

/// Re-attach out-of-band directives around the validated structured output.
fn assemble_response(output: ToolOutput) -> CallToolResponse {
    let narration = match output.narration {
        Some(text) => text,
        // Narration fallback: the structured output, serialized.
        None => output.structured.to_string(),
    };
    let mut meta = output.meta;
    if output.close_widget {
        meta.insert(META_CLOSE_WIDGET.to_string(), Value::Bool(true));
    }
    CallToolResponse {
        content: narration,
        structured_content: output.structured,
        meta,
        is_error: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::ToolMiddleware;
    use crate::plugins::{PluginError, ToolPlugin};
    use async_trait::async_trait;
    use serde_json::json;
    use toolgate_core::{handler_fn, ToolDefinition};

    fn greet_tool() -> ToolDefinition {
        ToolDefinition::new(
            "greet",
            "Greets a person by name",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"],
                "additionalProperties": false
            }),
            handler_fn(|input: Value, _ctx| async move {
                let name = input["name"].as_str().unwrap_or("stranger");
                Ok(ToolOutput::new(json!({"message": format!("Hello, {}!", name)})))
            }),
        )
        .with_output_schema(json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        }))
    }

    fn pipeline_with(
        tools: Vec<ToolDefinition>,
        middleware: Vec<Arc<dyn ToolMiddleware>>,
        plugins: Vec<Arc<dyn ToolPlugin>>,
    ) -> ToolPipeline {
        let registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        registry.freeze();
        ToolPipeline::new(
            Arc::new(registry),
            middleware,
            Arc::new(PluginManager::new(plugins)),
            EventEmitter::new(64),
        )
    }

    #[tokio::test]
    async fn test_greet_scenario_with_narration_fallback() {
        let pipeline = pipeline_with(vec![greet_tool()], vec![], vec![]);
        let request = CallToolRequest::new("greet", json!({"name": "Alice"}));
        let response = pipeline.execute(&request, None).await.unwrap();

        assert_eq!(response.structured_content, json!({"message": "Hello, Alice!"}));
        assert!(response.content.contains("Hello, Alice!"));
        assert!(!response.is_error);
        assert!(response.meta.contains_key(META_DURATION_MS));
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_handler() {
        let pipeline = pipeline_with(vec![greet_tool()], vec![], vec![]);
        let request = CallToolRequest::new("greet", json!({"name": 42}));
        let err = pipeline.execute(&request, None).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let pipeline = pipeline_with(vec![greet_tool()], vec![], vec![]);
        let request = CallToolRequest::new("nope", json!({}));
        let err = pipeline.execute(&request, None).await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_TOOL");
    }

    #[tokio::test]
    async fn test_output_contract_violation_is_distinct_from_input() {
        let bad_tool = ToolDefinition::new(
            "bad",
            "Returns the wrong shape",
            json!({"type": "object"}),
            handler_fn(|_, _| async { Ok(ToolOutput::new(json!({"wrong": true}))) }),
        )
        .with_output_schema(json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        }));

        let pipeline = pipeline_with(vec![bad_tool], vec![], vec![]);
        let mut events = pipeline.events.subscribe();
        let request = CallToolRequest::new("bad", json!({}));
        let err = pipeline.execute(&request, None).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_OUTPUT");
        // Internally distinct code on the failure event, generic on the wire.
        assert!(err.wire_message().starts_with("Tool execution failed"));

        events.recv().await.unwrap(); // called
        match events.recv().await.unwrap() {
            ServerEvent::ToolFailed { code, .. } => assert_eq!(code, "INVALID_OUTPUT"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_black_hole_middleware_is_a_pipeline_config_error() {
        struct BlackHole;

        #[async_trait]
        impl ToolMiddleware for BlackHole {
            async fn call(
                &self,
                _ctx: &MiddlewareContext,
                _next: Next<'_>,
            ) -> Result<(), ToolCallError> {
                Ok(())
            }
        }

        let pipeline = pipeline_with(vec![greet_tool()], vec![Arc::new(BlackHole)], vec![]);
        let request = CallToolRequest::new("greet", json!({"name": "Alice"}));
        let err = pipeline.execute(&request, None).await.unwrap_err();
        assert_eq!(err.code(), "PIPELINE_CONFIG");
    }

    #[tokio::test]
    async fn test_middleware_state_bag_response_short_circuits() {
        struct Cached;

        #[async_trait]
        impl ToolMiddleware for Cached {
            async fn call(
                &self,
                ctx: &MiddlewareContext,
                _next: Next<'_>,
            ) -> Result<(), ToolCallError> {
                ctx.state.insert(
                    RESPONSE_STATE_KEY,
                    json!({
                        "content": "cached greeting",
                        "structuredContent": {"message": "cached"}
                    }),
                );
                Ok(())
            }
        }

        let pipeline = pipeline_with(vec![greet_tool()], vec![Arc::new(Cached)], vec![]);
        let request = CallToolRequest::new("greet", json!({"name": "Alice"}));
        let response = pipeline.execute(&request, None).await.unwrap();
        assert_eq!(response.content, "cached greeting");
        assert_eq!(response.structured_content, json!({"message": "cached"}));
    }

    #[tokio::test]
    async fn test_failing_before_hook_aborts_and_failing_after_hook_does_not() {
        struct Strict {
            reject: bool,
        }

        #[async_trait]
        impl ToolPlugin for Strict {
            fn name(&self) -> &str {
                "strict"
            }

            async fn before_tool_call(
                &self,
                _ctx: &ToolContext,
                _tool: &str,
                _input: &Value,
            ) -> Result<(), PluginError> {
                if self.reject {
                    Err(PluginError::msg("denied"))
                } else {
                    Ok(())
                }
            }

            async fn after_tool_call(
                &self,
                _ctx: &ToolContext,
                _tool: &str,
                _output: &ToolOutput,
            ) -> Result<(), PluginError> {
                Err(PluginError::msg("analytics backend down"))
            }
        }

        let request = CallToolRequest::new("greet", json!({"name": "Alice"}));

        let rejecting =
            pipeline_with(vec![greet_tool()], vec![], vec![Arc::new(Strict { reject: true })]);
        let err = rejecting.execute(&request, None).await.unwrap_err();
        assert_eq!(err.code(), "INTERNAL");

        let lenient =
            pipeline_with(vec![greet_tool()], vec![], vec![Arc::new(Strict { reject: false })]);
        // The after-hook fails, but the call still succeeds.
        let response = lenient.execute(&request, None).await.unwrap();
        assert!(!response.is_error);
    }

    #[tokio::test]
    async fn test_explicit_narration_and_close_widget_survive_assembly() {
        let tool = ToolDefinition::new(
            "farewell",
            "Says goodbye and closes the widget",
            json!({"type": "object"}),
            handler_fn(|_, _| async {
                Ok(ToolOutput::new(json!({"done": true}))
                    .with_narration("Goodbye!")
                    .with_close_widget()
                    .with_meta("traceId", json!("t-7")))
            }),
        );

        let pipeline = pipeline_with(vec![tool], vec![], vec![]);
        let request = CallToolRequest::new("farewell", json!({}));
        let response = pipeline.execute(&request, None).await.unwrap();
        assert_eq!(response.content, "Goodbye!");
        assert!(response.close_widget());
        assert_eq!(response.meta["traceId"], json!("t-7"));
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event_per_call() {
        let pipeline = pipeline_with(vec![greet_tool()], vec![], vec![]);
        let mut events = pipeline.events.subscribe();
        let request = CallToolRequest::new("greet", json!({"name": "Bo"}));
        pipeline.execute(&request, None).await.unwrap();

        assert_eq!(events.recv().await.unwrap().name(), "tool_called");
        assert_eq!(events.recv().await.unwrap().name(), "tool_succeeded");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_calls_do_not_share_state_bags() {
        let counter_tool = ToolDefinition::new(
            "stateful",
            "Echoes per-call state",
            json!({
                "type": "object",
                "properties": {"id": {"type": "integer"}},
                "required": ["id"]
            }),
            handler_fn(|input: Value, ctx: ToolContext| async move {
                let id = input["id"].as_i64().unwrap_or(-1);
                ctx.state.insert("call_id", json!(id));
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                // Any cross-call sharing would clobber this read-back.
                let seen = ctx.state.get("call_id").and_then(|v| v.as_i64());
                Ok(ToolOutput::new(json!({"id": id, "seen": seen, "keys": ctx.state.len()})))
            }),
        );

        let pipeline = Arc::new(pipeline_with(vec![counter_tool], vec![], vec![]));
        let mut handles = Vec::new();
        for id in 0..16i64 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                let request = CallToolRequest::new("stateful", json!({"id": id}));
                (id, pipeline.execute(&request, None).await.unwrap())
            }));
        }
        for handle in handles {
            let (id, response) = handle.await.unwrap();
            assert_eq!(response.structured_content["id"], json!(id));
            assert_eq!(response.structured_content["seen"], json!(id));
            assert_eq!(response.structured_content["keys"], json!(1));
        }
    }
}
