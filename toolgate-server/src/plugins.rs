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

//! Plugin hooks
//!
//! Plugins observe the server lifecycle through a fixed set of optional
//! hooks. Hooks run sequentially in registration order so before/after
//! ordering stays deterministic for logging and analytics plugins.
//!
//! Failure propagation differs per hook: `on_init`/`on_start` abort startup,
//! and a failing `before_tool_call` aborts the call. A failing plugin never
//! stops other plugins' hooks of the same name from running in the same pass;
//! the remaining hooks are isolated entirely: logged and swallowed, never
//! escalating into call failure.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use toolgate_core::{CallToolRequest, CallToolResponse, ToolCallError, ToolContext, ToolOutput};
use tracing::{debug, warn};

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PluginError(pub String);

impl PluginError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A named extension registered once at startup and invoked many times.
///
/// All hooks default to no-ops; implement only what the plugin needs.
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn on_init(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn before_tool_call(
        &self,
        _ctx: &ToolContext,
        _tool: &str,
        _input: &Value,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    async fn after_tool_call(
        &self,
        _ctx: &ToolContext,
        _tool: &str,
        _output: &ToolOutput,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_tool_error(
        &self,
        _ctx: &ToolContext,
        _tool: &str,
        _error: &ToolCallError,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_request(&self, _request: &CallToolRequest) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_response(&self, _response: &CallToolResponse) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_ui_load(&self, _resource: &str) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Runs a named hook across every registered plugin, in registration order,
/// awaiting each before the next.
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn ToolPlugin>>,
}

impl PluginManager {
    pub fn new(plugins: Vec<Arc<dyn ToolPlugin>>) -> Self {
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Startup hook; a failing plugin aborts startup.
    pub async fn run_init(&self) -> Result<(), PluginError> {
        for plugin in &self.plugins {
            debug!(plugin = plugin.name(), "Plugin init");
            plugin.on_init().await.map_err(|e| {
                PluginError(format!("plugin '{}' failed to initialize: {}", plugin.name(), e))
            })?;
        }
        Ok(())
    }

    /// Serving hook; a failing plugin aborts startup.
    pub async fn run_start(&self) -> Result<(), PluginError> {
        for plugin in &self.plugins {
            plugin.on_start().await.map_err(|e| {
                PluginError(format!("plugin '{}' failed to start: {}", plugin.name(), e))
            })?;
        }
        Ok(())
    }

    /// Pre-handler hook. The whole pass runs regardless of failures so every
    /// plugin observes the call; the first failure is then returned and
    /// aborts the call before the handler runs.
    pub async fn before_tool_call(
        &self,
        ctx: &ToolContext,
        tool: &str,
        input: &Value,
    ) -> Result<(), PluginError> {
        let mut first_error = None;
        for plugin in &self.plugins {
            if let Err(e) = plugin.before_tool_call(ctx, tool, input).await {
                warn!(plugin = plugin.name(), tool, error = %e, "before_tool_call hook rejected the call");
                if first_error.is_none() {
                    first_error = Some(PluginError(format!(
                        "plugin '{}' rejected the call: {}",
                        plugin.name(),
                        e
                    )));
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Post-handler hook, isolated: one plugin's failure is logged and never
    /// converts a successful call into a failure, nor stops other plugins.
    pub async fn after_tool_call(&self, ctx: &ToolContext, tool: &str, output: &ToolOutput) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.after_tool_call(ctx, tool, output).await {
                warn!(plugin = plugin.name(), tool, error = %e, "after_tool_call hook failed");
            }
        }
    }

    /// Error hook, isolated.
    pub async fn on_tool_error(&self, ctx: &ToolContext, tool: &str, error: &ToolCallError) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_tool_error(ctx, tool, error).await {
                warn!(plugin = plugin.name(), tool, error = %e, "on_tool_error hook failed");
            }
        }
    }

    /// Transport-ingress hook, isolated.
    pub async fn on_request(&self, request: &CallToolRequest) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_request(request).await {
                warn!(plugin = plugin.name(), error = %e, "on_request hook failed");
            }
        }
    }

    /// Transport-egress hook, isolated.
    pub async fn on_response(&self, response: &CallToolResponse) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_response(response).await {
                warn!(plugin = plugin.name(), error = %e, "on_response hook failed");
            }
        }
    }

    /// UI resource hook, isolated.
    pub async fn on_ui_load(&self, resource: &str) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_ui_load(resource).await {
                warn!(plugin = plugin.name(), resource, error = %e, "on_ui_load hook failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use toolgate_core::RequestMeta;

    struct Probe {
        name: String,
        fail_before: bool,
        fail_after: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ToolPlugin for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn before_tool_call(
            &self,
            _ctx: &ToolContext,
            _tool: &str,
            _input: &Value,
        ) -> Result<(), PluginError> {
            self.log.lock().push(format!("{}:before", self.name));
            if self.fail_before {
                return Err(PluginError::msg("nope"));
            }
            Ok(())
        }

        async fn after_tool_call(
            &self,
            _ctx: &ToolContext,
            _tool: &str,
            _output: &ToolOutput,
        ) -> Result<(), PluginError> {
            self.log.lock().push(format!("{}:after", self.name));
            if self.fail_after {
                return Err(PluginError::msg("broken analytics"));
            }
            Ok(())
        }
    }

    fn probe(
        name: &str,
        fail_before: bool,
        fail_after: bool,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn ToolPlugin> {
        Arc::new(Probe {
            name: name.into(),
            fail_before,
            fail_after,
            log: log.clone(),
        })
    }

    fn ctx() -> ToolContext {
        ToolContext::new(RequestMeta::default(), None)
    }

    #[tokio::test]
    async fn test_before_pass_runs_every_plugin_and_returns_first_failure() {
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let manager = PluginManager::new(vec![
            probe("a", false, false, &log),
            probe("b", true, false, &log),
            probe("c", false, false, &log),
        ]);

        let err = manager
            .before_tool_call(&ctx(), "t", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'b'"));
        // "b" failing does not stop "c" from observing the call.
        assert_eq!(*log.lock(), vec!["a:before", "b:before", "c:before"]);
    }

    #[tokio::test]
    async fn test_before_pass_reports_the_first_of_several_failures() {
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let manager = PluginManager::new(vec![
            probe("a", true, false, &log),
            probe("b", true, false, &log),
        ]);

        let err = manager
            .before_tool_call(&ctx(), "t", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'a'"));
        assert_eq!(*log.lock(), vec!["a:before", "b:before"]);
    }

    #[tokio::test]
    async fn test_after_hook_failures_are_isolated() {
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let manager = PluginManager::new(vec![
            probe("a", false, true, &log),
            probe("b", false, false, &log),
        ]);

        manager
            .after_tool_call(&ctx(), "t", &ToolOutput::default())
            .await;
        // Both ran despite "a" failing.
        assert_eq!(*log.lock(), vec!["a:after", "b:after"]);
    }
}
