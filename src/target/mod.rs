//! Magento 2 side of the migration: the REST seam and reply handling.
pub mod client;
pub mod search;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MigrateResult;

pub use client::RestClient;
pub use search::SearchCriteria;

/// Which REST endpoint a call goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreScope {
    /// The configured `rest_endpoint` (usually `/rest/all/V1`).
    Default,
    /// A target store view with its own endpoint.
    Store(i64),
}

impl std::fmt::Display for StoreScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreScope::Default => f.write_str("default"),
            StoreScope::Store(id) => write!(f, "store {id}"),
        }
    }
}

/// A reply that made it back over the wire, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    /// Parsed JSON; non-JSON bodies are kept as a string.
    pub body: Value,
}

impl ApiReply {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error text with Magento's `%1`/`%name` placeholders filled in.
    pub fn message(&self) -> Option<String> {
        match &self.body {
            Value::Object(obj) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(|m| render_message(m, obj.get("parameters"))),
            Value::String(s) if !self.is_success() => Some(s.clone()),
            _ => None,
        }
    }

    /// Text searched for conflict markers: the rendered message, else the raw body.
    pub fn error_text(&self) -> String {
        self.message().unwrap_or_else(|| match &self.body {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Integer id under `key`, accepting numeric strings.
    pub fn id_field(&self, key: &str) -> Option<i64> {
        self.body.get(key).and_then(crate::record::value_as_i64)
    }
}

/// Substitute `%1..%n` (array parameters) or `%name` (object parameters).
pub fn render_message(template: &str, parameters: Option<&Value>) -> String {
    let mut out = template.to_string();
    match parameters {
        Some(Value::Array(items)) => {
            // Highest index first so %10 is not eaten by %1.
            for (i, v) in items.iter().enumerate().rev() {
                out = out.replace(&format!("%{}", i + 1), &param_text(v));
            }
        }
        Some(Value::Object(map)) => {
            for (k, v) in map {
                out = out.replace(&format!("%{k}"), &param_text(v));
            }
        }
        _ => {}
    }
    out
}

fn param_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// How a create reply steers the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyClass {
    Success,
    /// A unique slug (URL key) is taken; the payload may be mutated and resent.
    ValueTaken(String),
    /// Duplicate or reserved natural key; look the entity up instead.
    Conflict(String),
    Rejected(String),
}

pub const URL_KEY_TAKEN: &str = "URL key for specified store already exists";

/// Classify a reply against a resource's conflict markers.
pub fn classify(reply: &ApiReply, conflict_markers: &[&str], value_taken: bool) -> ReplyClass {
    if reply.is_success() {
        return ReplyClass::Success;
    }
    let text = reply.error_text();
    if value_taken && text.contains(URL_KEY_TAKEN) {
        return ReplyClass::ValueTaken(text);
    }
    if conflict_markers.iter().any(|m| text.contains(m)) {
        return ReplyClass::Conflict(text);
    }
    ReplyClass::Rejected(format!("{} {}", reply.status, text))
}

/// REST calls against the target. Transport failures are fatal
/// `Connection` errors; HTTP error statuses come back as an [`ApiReply`].
#[async_trait]
pub trait TargetApi: Send + Sync {
    async fn get(
        &self,
        scope: StoreScope,
        path: &str,
        query: &[(String, String)],
    ) -> MigrateResult<ApiReply>;
    async fn post(&self, scope: StoreScope, path: &str, body: &Value) -> MigrateResult<ApiReply>;
    async fn put(&self, scope: StoreScope, path: &str, body: &Value) -> MigrateResult<ApiReply>;
    /// Whether a store-scoped endpoint is configured.
    fn has_scope(&self, scope: StoreScope) -> bool;
}
