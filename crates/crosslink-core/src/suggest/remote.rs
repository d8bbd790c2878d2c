//! Narrow contract to the ticket/document remote service.
//!
//! Concrete API clients (auth, URLs, wire formats) live outside this crate;
//! the engine and gate depend only on this trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Kind of remote record being read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Ticket,
    Document,
}

impl ResourceKind {
    /// Cache namespace for this resource type.
    pub fn namespace(&self) -> &'static str {
        match self {
            ResourceKind::Ticket => "ticket",
            ResourceKind::Document => "document",
        }
    }
}

/// Remote ticket/document client collaborator.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Host this client talks to; keys the rate-limit budget.
    fn host(&self) -> &str;

    /// Fetch the current state of a record.
    async fn fetch(&self, resource: ResourceKind, id: &str) -> Result<Value>;

    /// Apply a state-changing payload to a record.
    async fn write(&self, resource: ResourceKind, id: &str, payload: &Value) -> Result<()>;
}

/// Extract the host portion of a service URL, for budget keying.
pub fn host_for(service_url: &str) -> Option<String> {
    url::Url::parse(service_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}
