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

//! Per-call context types
//!
//! A [`ToolContext`] is created fresh for every invocation and discarded after
//! response assembly. The [`StateBag`] inside it is the only mutable state
//! shared between middleware, plugin hooks, and the handler, and it is never
//! shared across concurrent calls.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Client-supplied side-channel metadata, parsed from the request's
/// `_meta` block. Unknown keys are preserved in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestMeta {
    pub locale: Option<String>,
    pub user_agent: Option<String>,
    /// Caller-claimed subject. Overwritten by the verified token's subject
    /// whenever authentication is configured; never trusted on its own.
    pub subject: Option<String>,
    pub widget_session_id: Option<String>,
    pub user_location: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestMeta {
    /// Parse the optional `_meta` block. A missing or non-object block
    /// yields an empty meta rather than an error.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(v) if v.is_object() => {
                serde_json::from_value(v.clone()).unwrap_or_default()
            }
            _ => Self::default(),
        }
    }
}

/// Request-scoped view of a verified bearer token.
///
/// Read-only to handlers. The raw token is carried for handlers that need to
/// forward it downstream, but it is never written into serialized metadata.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: String,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: Option<u64>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub token: String,
    pub extra: Map<String, Value>,
}

impl AuthContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Serializable view for metadata injection. Excludes the raw token.
    pub fn to_meta_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("subject".into(), Value::String(self.subject.clone()));
        if let Some(client_id) = &self.client_id {
            map.insert("clientId".into(), Value::String(client_id.clone()));
        }
        map.insert(
            "scopes".into(),
            Value::Array(self.scopes.iter().cloned().map(Value::String).collect()),
        );
        if let Some(exp) = self.expires_at {
            map.insert("expiresAt".into(), Value::Number(exp.into()));
        }
        if let Some(issuer) = &self.issuer {
            map.insert("issuer".into(), Value::String(issuer.clone()));
        }
        if let Some(audience) = &self.audience {
            map.insert("audience".into(), Value::String(audience.clone()));
        }
        Value::Object(map)
    }
}

/// Per-call mutable key-value store.
///
/// Cloning the bag clones the handle, not the contents: middleware, plugin
/// hooks, and the handler all see the same map for the duration of one call.
#[derive(Debug, Clone, Default)]
pub struct StateBag {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Per-call aggregate handed to plugin hooks and the handler.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub meta: RequestMeta,
    pub auth: Option<AuthContext>,
    pub state: StateBag,
}

impl ToolContext {
    pub fn new(meta: RequestMeta, auth: Option<AuthContext>) -> Self {
        Self {
            meta,
            auth,
            state: StateBag::new(),
        }
    }

    /// Subject as seen by handlers: the verified token's subject when
    /// authentication ran, otherwise whatever the caller claimed.
    pub fn subject(&self) -> Option<&str> {
        self.meta.subject.as_deref()
    }
}

/// View passed by reference through the middleware chain.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    pub tool_name: String,
    pub input: Value,
    pub meta: RequestMeta,
    pub state: StateBag,
}
