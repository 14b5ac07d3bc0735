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

//! Middleware chain
//!
//! Ordered, continuation-based interceptors. Each middleware receives the
//! call context and a [`Next`]; it either drives the continuation (doing work
//! before/after) or terminates the chain by writing a response into the
//! shared state bag under [`toolgate_core::RESPONSE_STATE_KEY`] without
//! calling it. The innermost continuation is the tool handler itself.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use toolgate_core::{MiddlewareContext, ToolCallError};

/// Innermost continuation; the pipeline supplies a closure that runs the
/// handler and captures its output outside the chain's return value.
pub type TerminalFn = dyn Fn() -> BoxFuture<'static, Result<(), ToolCallError>> + Send + Sync;

/// A request interceptor in the chain.
#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    async fn call(&self, ctx: &MiddlewareContext, next: Next<'_>) -> Result<(), ToolCallError>;
}

/// Handle on the remainder of the chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn ToolMiddleware>],
    terminal: &'a TerminalFn,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn ToolMiddleware>], terminal: &'a TerminalFn) -> Self {
        Self { chain, terminal }
    }

    /// Run the rest of the chain. With no middleware registered this is the
    /// handler running directly, no wrapping overhead.
    pub async fn run(self, ctx: &MiddlewareContext) -> Result<(), ToolCallError> {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                let next = Next {
                    chain: rest,
                    terminal: self.terminal,
                };
                middleware.call(ctx, next).await
            }
            None => (self.terminal)().await,
        }
    }
}
