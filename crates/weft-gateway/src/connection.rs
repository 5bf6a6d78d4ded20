use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use rmcp::model::CallToolRequestParams;
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};

use weft_core::config::{env_ref_name, ProviderConfig, ProviderTransport};
use weft_core::error::{Result, WeftError};
use weft_core::types::ToolDescriptor;

use crate::handler::{GatewayClientHandler, ProviderEvent};

type ProviderService = RunningService<RoleClient, GatewayClientHandler>;

/// Lifecycle state of one provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Identifies a connection: one provider, scoped to one tenant or global.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct ConnectionKey {
    pub provider: String,
    pub tenant: Option<String>,
}

impl ConnectionKey {
    pub fn global(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            tenant: None,
        }
    }

    pub fn tenant(provider: &str, tenant: &str) -> Self {
        Self {
            provider: provider.to_string(),
            tenant: Some(tenant.to_string()),
        }
    }
}

/// A live channel to one tool provider, bound to exactly one
/// `(provider, tenant)` pair. The tool catalogue is loaded during the
/// handshake and discarded when the connection closes.
pub struct ProviderConnection {
    provider: String,
    tenant: Option<String>,
    tools: Vec<ToolDescriptor>,
    state: std::sync::Mutex<ConnectionState>,
    service: Mutex<Option<ProviderService>>,
}

impl ProviderConnection {
    /// Open the provider's transport, perform the handshake, and load its
    /// tool catalogue. Nothing is cached on failure.
    pub async fn open(
        provider: &str,
        tenant: Option<&str>,
        config: &ProviderConfig,
        credential: Option<&str>,
        event_tx: broadcast::Sender<ProviderEvent>,
    ) -> Result<Self> {
        let state = std::sync::Mutex::new(ConnectionState::Connecting);
        let handler = GatewayClientHandler::new(provider, event_tx);

        let service = match &config.transport {
            ProviderTransport::Stdio { command, args, env } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args);
                for (key, value) in env {
                    cmd.env(key, resolve_env_value(value, credential));
                }

                let transport = rmcp::transport::TokioChildProcess::new(cmd).map_err(|e| {
                    WeftError::Gateway(format!("Failed to spawn {}: {}", command, e))
                })?;

                handler.serve(transport).await.map_err(|e| {
                    WeftError::Gateway(format!(
                        "Failed to initialize connection to '{}': {}",
                        provider, e
                    ))
                })?
            }
            ProviderTransport::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());

                <GatewayClientHandler as ServiceExt<RoleClient>>::serve(handler, transport)
                    .await
                    .map_err(|e| {
                        WeftError::Gateway(format!(
                            "Connection handshake for '{}' failed: {}",
                            provider, e
                        ))
                    })?
            }
        };

        let tools = load_tools(provider, &service).await?;
        info!(
            provider = %provider,
            tenant = tenant.unwrap_or("-"),
            tool_count = tools.len(),
            "Provider connected"
        );

        *state.lock().unwrap() = ConnectionState::Connected;
        Ok(Self {
            provider: provider.to_string(),
            tenant: tenant.map(|t| t.to_string()),
            tools,
            state,
            service: Mutex::new(Some(service)),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Tool catalogue loaded at connect time, namespaced `provider.operation`.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Call a tool by its provider-local name. Returns the textual result
    /// content joined with newlines.
    pub async fn call_tool(
        &self,
        original_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<String> {
        let guard = self.service.lock().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| WeftError::ProviderNotConnected(self.provider.clone()))?;

        let params = CallToolRequestParams {
            name: original_name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        };

        let result = match service.call_tool(params).await {
            Ok(r) => r,
            Err(e) => {
                // A failed transport call marks the connection suspect, so
                // the next lazy lookup replaces it instead of reusing it.
                *self.state.lock().unwrap() = ConnectionState::Error;
                return Err(WeftError::Gateway(format!(
                    "Tool call '{}.{}' failed: {}",
                    self.provider, original_name, e
                )));
            }
        };

        let content: Vec<String> = result
            .content
            .iter()
            .map(|c| match c.raw {
                rmcp::model::RawContent::Text(ref t) => t.text.to_string(),
                _ => format!("{:?}", c.raw),
            })
            .collect();

        Ok(content.join("\n"))
    }

    /// Close the transport. The catalogue dies with the connection object.
    pub async fn close(&self) {
        if let Some(mut service) = self.service.lock().await.take() {
            let _ = service.close().await;
        }
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
        info!(
            provider = %self.provider,
            tenant = self.tenant.as_deref().unwrap_or("-"),
            "Provider disconnected"
        );
    }

    /// Build a connection with a preloaded catalogue and no transport.
    #[cfg(test)]
    pub(crate) fn stub(
        provider: &str,
        tenant: Option<&str>,
        tools: Vec<ToolDescriptor>,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            tenant: tenant.map(|t| t.to_string()),
            tools,
            state: std::sync::Mutex::new(ConnectionState::Connected),
            service: Mutex::new(None),
        }
    }
}

/// `${VAR}` env entries take the tenant credential when one is available,
/// else the process environment; plain values pass through.
fn resolve_env_value(value: &str, credential: Option<&str>) -> String {
    match env_ref_name(value) {
        Some(var) => match credential {
            Some(cred) => cred.to_string(),
            None => std::env::var(var).unwrap_or_default(),
        },
        None => value.to_string(),
    }
}

async fn load_tools(provider: &str, service: &ProviderService) -> Result<Vec<ToolDescriptor>> {
    let listed = service.list_all_tools().await.map_err(|e| {
        WeftError::Gateway(format!("Failed to list tools from '{}': {}", provider, e))
    })?;

    let tools: Vec<ToolDescriptor> = listed
        .iter()
        .map(|t| {
            let description = t
                .description
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default();
            let schema = serde_json::to_value(&*t.input_schema)
                .unwrap_or(serde_json::json!({"type": "object"}));
            ToolDescriptor::new(provider, t.name.to_string(), description, schema)
        })
        .collect();

    debug!(provider = %provider, count = tools.len(), "Loaded provider tools");
    Ok(tools)
}

/// Owns every provider connection, keyed by `(provider, tenant)`.
///
/// Connections outlive a single run and are shared across runs; creation
/// is serialized per key so two concurrent runs never open duplicate
/// transports for the same tenant.
pub struct ConnectionManager {
    configs: HashMap<String, ProviderConfig>,
    connections: Mutex<HashMap<ConnectionKey, Arc<ProviderConnection>>>,
    connect_guards: Mutex<HashMap<ConnectionKey, Arc<Mutex<()>>>>,
    event_tx: broadcast::Sender<ProviderEvent>,
}

impl ConnectionManager {
    pub fn new(configs: HashMap<String, ProviderConfig>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            configs,
            connections: Mutex::new(HashMap::new()),
            connect_guards: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    /// Subscribe to provider notifications (tools changed, log messages).
    pub fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self, provider: &str) -> Option<&ProviderConfig> {
        self.configs.get(provider)
    }

    pub fn configs(&self) -> &HashMap<String, ProviderConfig> {
        &self.configs
    }

    /// Open (or replace) the shared global connection for a provider.
    pub async fn connect_global(&self, provider: &str, credential: Option<&str>) -> Result<()> {
        self.connect(ConnectionKey::global(provider), credential)
            .await
    }

    /// Open (or replace) a tenant-scoped connection with the given
    /// credential. An existing connection for the key is torn down first:
    /// a refreshed credential replaces, never merges with, the old one.
    pub async fn connect_tenant(
        &self,
        provider: &str,
        tenant: &str,
        credential: &str,
    ) -> Result<()> {
        self.connect(ConnectionKey::tenant(provider, tenant), Some(credential))
            .await
    }

    async fn connect(&self, key: ConnectionKey, credential: Option<&str>) -> Result<()> {
        let config = self.configs.get(&key.provider).ok_or_else(|| {
            WeftError::Gateway(format!("Provider '{}' not configured", key.provider))
        })?;

        // Tear down any prior connection for this key before replacing it.
        if let Some(old) = self.connections.lock().await.remove(&key) {
            old.close().await;
        }

        let conn = ProviderConnection::open(
            &key.provider,
            key.tenant.as_deref(),
            config,
            credential,
            self.event_tx.clone(),
        )
        .await?;

        self.store(key, Arc::new(conn)).await;
        Ok(())
    }

    /// Get the tenant-scoped connection for `(provider, tenant)`, creating
    /// it lazily with the supplied credential. Creation is guarded per key;
    /// a failed connect caches nothing.
    pub async fn ensure_tenant_connection(
        &self,
        provider: &str,
        tenant: &str,
        credential: &str,
    ) -> Result<Arc<ProviderConnection>> {
        let key = ConnectionKey::tenant(provider, tenant);

        if let Some(conn) = self.connections.lock().await.get(&key) {
            if conn.is_connected() {
                return Ok(conn.clone());
            }
        }

        // Serialize creation for this key only.
        let guard = {
            let mut guards = self.connect_guards.lock().await;
            guards
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _held = guard.lock().await;

        // Another caller may have finished connecting while we waited.
        if let Some(conn) = self.connections.lock().await.get(&key) {
            if conn.is_connected() {
                return Ok(conn.clone());
            }
        }

        let config = self
            .configs
            .get(provider)
            .ok_or_else(|| WeftError::Gateway(format!("Provider '{}' not configured", provider)))?;

        let conn = Arc::new(
            ProviderConnection::open(
                provider,
                Some(tenant),
                config,
                Some(credential),
                self.event_tx.clone(),
            )
            .await?,
        );

        self.store(key, conn.clone()).await;
        Ok(conn)
    }

    /// Register a connection under its key, closing any entry it evicts
    /// so a replaced transport never outlives the map.
    async fn store(&self, key: ConnectionKey, conn: Arc<ProviderConnection>) {
        let evicted = self.connections.lock().await.insert(key, conn);
        if let Some(old) = evicted {
            old.close().await;
        }
    }

    pub async fn global_connection(&self, provider: &str) -> Option<Arc<ProviderConnection>> {
        self.connections
            .lock()
            .await
            .get(&ConnectionKey::global(provider))
            .cloned()
    }

    pub async fn tenant_connection(
        &self,
        provider: &str,
        tenant: &str,
    ) -> Option<Arc<ProviderConnection>> {
        self.connections
            .lock()
            .await
            .get(&ConnectionKey::tenant(provider, tenant))
            .cloned()
    }

    pub async fn disconnect_global(&self, provider: &str) {
        self.disconnect(&ConnectionKey::global(provider)).await;
    }

    pub async fn disconnect_tenant(&self, provider: &str, tenant: &str) {
        self.disconnect(&ConnectionKey::tenant(provider, tenant))
            .await;
    }

    async fn disconnect(&self, key: &ConnectionKey) {
        if let Some(conn) = self.connections.lock().await.remove(key) {
            conn.close().await;
        }
    }

    /// Disconnect every global and tenant-scoped connection.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<ProviderConnection>> =
            self.connections.lock().await.drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.close().await;
        }
        self.connect_guards.lock().await.clear();
    }

    /// Tools from connected global (tenant-less) connections.
    pub async fn global_tools(&self) -> Vec<ToolDescriptor> {
        let conns = self.connections.lock().await;
        let mut tools = Vec::new();
        for (key, conn) in conns.iter() {
            if key.tenant.is_none() && conn.is_connected() {
                tools.extend_from_slice(conn.tools());
            }
        }
        tools
    }

    /// Tools from the given tenant's own connections only.
    pub async fn tenant_tools(&self, tenant: &str) -> Vec<ToolDescriptor> {
        let conns = self.connections.lock().await;
        let mut tools = Vec::new();
        for (key, conn) in conns.iter() {
            if key.tenant.as_deref() == Some(tenant) && conn.is_connected() {
                tools.extend_from_slice(conn.tools());
            }
        }
        tools
    }

    #[cfg(test)]
    pub(crate) async fn insert_stub(&self, conn: ProviderConnection) {
        let key = ConnectionKey {
            provider: conn.provider().to_string(),
            tenant: conn.tenant().map(|t| t.to_string()),
        };
        self.connections.lock().await.insert(key, Arc::new(conn));
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("providers", &self.configs.keys().collect::<Vec<_>>())
            .finish()
    }
}
