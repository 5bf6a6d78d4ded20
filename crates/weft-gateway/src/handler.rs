use std::future::Future;

use tokio::sync::broadcast;
use tracing::debug;

use rmcp::handler::client::ClientHandler;
use rmcp::model::*;
use rmcp::service::NotificationContext;
use rmcp::RoleClient;

/// Events emitted by provider connections.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// The provider changed its tool catalogue.
    ToolsChanged { provider: String },
    /// The provider sent a log message.
    LogMessage {
        provider: String,
        level: String,
        message: String,
    },
}

/// MCP client handler that forwards provider notifications onto the
/// connection manager's event channel.
pub struct GatewayClientHandler {
    provider: String,
    event_tx: broadcast::Sender<ProviderEvent>,
}

impl GatewayClientHandler {
    pub fn new(provider: &str, event_tx: broadcast::Sender<ProviderEvent>) -> Self {
        Self {
            provider: provider.to_string(),
            event_tx,
        }
    }
}

#[allow(clippy::manual_async_fn)]
impl ClientHandler for GatewayClientHandler {
    fn on_tool_list_changed(
        &self,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async {
            debug!(provider = %self.provider, "tools/list_changed notification");
            let _ = self.event_tx.send(ProviderEvent::ToolsChanged {
                provider: self.provider.clone(),
            });
        }
    }

    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async move {
            let level = format!("{:?}", params.level);
            let message = params.data.to_string();
            debug!(provider = %self.provider, level = %level, "provider log: {}", message);
            let _ = self.event_tx.send(ProviderEvent::LogMessage {
                provider: self.provider.clone(),
                level,
                message,
            });
        }
    }

    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "weft".into(),
                title: None,
                version: env!("CARGO_PKG_VERSION").into(),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }
}
