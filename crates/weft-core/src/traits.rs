use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{ToolCallContext, ToolDescriptor};

/// Language-model collaborator used by transform and conditional nodes.
///
/// Implementations must surface transient rate limits as
/// `WeftError::RateLimited` so the executor can apply backoff.
pub trait LanguageModel: Send + Sync + 'static {
    /// Generate a completion. An empty `system_prompt` means none.
    fn generate(&self, system_prompt: &str, prompt: &str) -> BoxFuture<'_, Result<String>>;
}

/// An in-process tool handler, dispatched by the gateway without any
/// provider connection.
pub trait ToolHandler: Send + Sync + 'static {
    /// Descriptor advertised in tool listings. The descriptor's `name`
    /// is the dispatch key.
    fn descriptor(&self) -> ToolDescriptor;

    /// Invoke the tool with resolved parameters.
    fn invoke(
        &self,
        params: serde_json::Value,
        ctx: ToolCallContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Resolves per-tenant credentials. Provided by the persistence layer.
pub trait CredentialResolver: Send + Sync + 'static {
    /// Returns the stored credential for `(tenant, provider)`, if any.
    fn resolve_credential(&self, tenant_id: &str, provider: &str) -> Option<String>;
}

/// Persists refreshed per-tenant credentials. Provided by the persistence layer.
pub trait CredentialUpdater: Send + Sync + 'static {
    /// Returns true if the credential was stored.
    fn update_credential(&self, tenant_id: &str, provider: &str, value: &str) -> bool;
}
