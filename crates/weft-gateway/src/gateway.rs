use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use weft_core::error::WeftError;
use weft_core::traits::{CredentialResolver, CredentialUpdater, ToolHandler};
use weft_core::types::{CallOutcome, ProviderStatus, ToolCallContext, ToolDescriptor};

use crate::connection::ConnectionManager;

/// Unifies internal-handler dispatch and provider-connection dispatch
/// behind one call contract.
///
/// Internal tools run in-process and never touch a connection. Everything
/// else is routed by splitting `provider.operation` and resolving a
/// connection for the requesting tenant (or the global fallback).
pub struct ToolGateway {
    manager: Arc<ConnectionManager>,
    internal_handlers: HashMap<String, Arc<dyn ToolHandler>>,
    internal_tools: Vec<ToolDescriptor>,
    credentials: Option<Arc<dyn CredentialResolver>>,
    credential_updater: Option<Arc<dyn CredentialUpdater>>,
}

impl ToolGateway {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            internal_handlers: HashMap::new(),
            internal_tools: Vec::new(),
            credentials: None,
            credential_updater: None,
        }
    }

    /// Wire in the credential collaborators from the persistence layer.
    pub fn with_credentials(
        mut self,
        resolver: Arc<dyn CredentialResolver>,
        updater: Option<Arc<dyn CredentialUpdater>>,
    ) -> Self {
        self.credentials = Some(resolver);
        self.credential_updater = updater;
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Register an internal tool handler. Registration happens at startup,
    /// before the gateway is shared.
    pub fn register_internal(&mut self, handler: Arc<dyn ToolHandler>) {
        let descriptor = handler.descriptor();
        debug!(tool = %descriptor.name, "Registered internal tool");
        self.internal_tools.push(descriptor.clone());
        self.internal_handlers.insert(descriptor.name, handler);
    }

    /// Connect every enabled configured provider globally (non-multi-tenant
    /// startup path). Returns per-provider success.
    pub async fn connect_all_enabled(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for (provider, config) in self.manager.configs() {
            if !config.enabled {
                continue;
            }
            match self.manager.connect_global(provider, None).await {
                Ok(()) => {
                    results.insert(provider.clone(), true);
                }
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Provider connect failed");
                    results.insert(provider.clone(), false);
                }
            }
        }
        results
    }

    /// Call a tool by its full namespaced name.
    ///
    /// `context` is a snapshot of the run context, forwarded to internal
    /// handlers; `tenant_id` selects the tenant whose credentials and
    /// connections are used.
    pub async fn call(
        &self,
        tool_name: &str,
        params: serde_json::Map<String, serde_json::Value>,
        context: &HashMap<String, serde_json::Value>,
        tenant_id: Option<&str>,
    ) -> CallOutcome {
        // Internal tools bypass connections entirely.
        if let Some(handler) = self.internal_handlers.get(tool_name) {
            let ctx = ToolCallContext {
                tenant_id: tenant_id.map(|t| t.to_string()),
                inputs: context.clone(),
                credentials: self.credentials.clone(),
                credential_updater: self.credential_updater.clone(),
            };
            return match handler
                .invoke(serde_json::Value::Object(params), ctx)
                .await
            {
                Ok(result) => CallOutcome::ok(result),
                Err(e) => CallOutcome::failure(e.to_string()),
            };
        }

        let Some((provider, operation)) = tool_name.split_once('.') else {
            return CallOutcome::failure(format!("Invalid tool name: {}", tool_name));
        };

        // Tenant-scoped dispatch: resolve the credential and get or lazily
        // create that tenant's connection.
        if let (Some(tenant), Some(resolver)) = (tenant_id, self.credentials.as_ref()) {
            return match resolver.resolve_credential(tenant, provider) {
                Some(credential) => {
                    let conn = match self
                        .manager
                        .ensure_tenant_connection(provider, tenant, &credential)
                        .await
                    {
                        Ok(conn) => conn,
                        Err(e) => return CallOutcome::failure(e.to_string()),
                    };
                    match conn.call_tool(operation, Some(params)).await {
                        Ok(content) => CallOutcome::ok(serde_json::Value::String(content)),
                        Err(e) => CallOutcome::failure(e.to_string()),
                    }
                }
                None => {
                    let display = self
                        .manager
                        .config(provider)
                        .map(|c| c.display_name_or(provider))
                        .unwrap_or_else(|| weft_core::types::title_case(provider));
                    CallOutcome::failure(
                        WeftError::MissingCredential { provider: display }.to_string(),
                    )
                }
            };
        }

        // Global connection fallback for non-multi-tenant callers.
        if let Some(conn) = self.manager.global_connection(provider).await {
            return match conn.call_tool(operation, Some(params)).await {
                Ok(content) => CallOutcome::ok(serde_json::Value::String(content)),
                Err(e) => CallOutcome::failure(e.to_string()),
            };
        }

        CallOutcome::failure(WeftError::ProviderNotConnected(provider.to_string()).to_string())
    }

    /// All tools visible to `tenant_id`: internal tools, globally connected
    /// provider tools, and (only for the requesting tenant) that tenant's
    /// own connected-provider tools, deduplicated by provider.
    ///
    /// With no tenant, per-tenant connections are never included, so one
    /// tenant's catalogue can never leak into another's listing.
    pub async fn list_tools(&self, tenant_id: Option<&str>) -> Vec<ToolDescriptor> {
        let mut tools = self.internal_tools.clone();

        let global = self.manager.global_tools().await;
        let global_providers: HashSet<String> =
            global.iter().map(|t| t.provider.clone()).collect();
        tools.extend(global);

        if let Some(tenant) = tenant_id {
            for tool in self.manager.tenant_tools(tenant).await {
                if !global_providers.contains(&tool.provider) {
                    tools.push(tool);
                }
            }
        }

        tools
    }

    /// Input schema for one tool, as visible to the given tenant.
    pub async fn tool_schema(
        &self,
        tool_name: &str,
        tenant_id: Option<&str>,
    ) -> Option<serde_json::Value> {
        self.list_tools(tenant_id)
            .await
            .into_iter()
            .find(|t| t.name == tool_name)
            .map(|t| t.input_schema)
    }

    /// Status of every provider as seen by one tenant. Internal tools are
    /// always reported connected under their own provider names.
    pub async fn provider_statuses(&self, tenant_id: Option<&str>) -> Vec<ProviderStatus> {
        let mut statuses = Vec::new();

        let mut internal_providers: Vec<&str> = self
            .internal_tools
            .iter()
            .map(|t| t.provider.as_str())
            .collect();
        internal_providers.dedup();
        for provider in internal_providers {
            let count = self
                .internal_tools
                .iter()
                .filter(|t| t.provider == provider)
                .count();
            statuses.push(ProviderStatus {
                provider: provider.to_string(),
                display_name: weft_core::types::title_case(provider),
                connected: true,
                tool_count: count,
                error: None,
            });
        }

        let mut providers: Vec<&String> = self.manager.configs().keys().collect();
        providers.sort();
        for provider in providers {
            let config = &self.manager.configs()[provider];
            let display_name = config.display_name_or(provider);

            let conn = match self.manager.global_connection(provider).await {
                Some(conn) => Some(conn),
                None => match tenant_id {
                    Some(tenant) => self.manager.tenant_connection(provider, tenant).await,
                    None => None,
                },
            };

            statuses.push(match conn {
                Some(conn) => ProviderStatus {
                    provider: provider.clone(),
                    display_name,
                    connected: conn.is_connected(),
                    tool_count: conn.tools().len(),
                    error: None,
                },
                None => ProviderStatus {
                    provider: provider.clone(),
                    display_name,
                    connected: false,
                    tool_count: 0,
                    error: None,
                },
            });
        }

        statuses
    }

    /// Disconnect everything the manager owns.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
