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

//! Lifecycle events
//!
//! Typed publish/subscribe over a tokio broadcast channel. Emission never
//! blocks a call: absent or lagging subscribers just miss events.

use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Observability events emitted by the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Plugins initialized, registry populated.
    AppInitialized,
    /// Registries frozen, server accepting calls.
    AppStarted,
    /// Context built for a call; fired before any hook or middleware.
    ToolCalled { tool: String },
    /// Exactly one of Succeeded/Failed fires per call.
    ToolSucceeded { tool: String, duration: Duration },
    ToolFailed {
        tool: String,
        code: &'static str,
        duration: Duration,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AppInitialized => "app_initialized",
            ServerEvent::AppStarted => "app_started",
            ServerEvent::ToolCalled { .. } => "tool_called",
            ServerEvent::ToolSucceeded { .. } => "tool_succeeded",
            ServerEvent::ToolFailed { .. } => "tool_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ServerEvent) {
        debug!(event = event.name(), "Server event");
        // Send only fails when nobody is subscribed.
        let _ = self.tx.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
