//! Tool gateway: MCP provider connections and unified tool dispatch.
//!
//! The [`ConnectionManager`] owns one connection per (provider, tenant)
//! pair plus global connections, and the [`ToolGateway`] routes namespaced
//! `provider.operation` calls to either an internal handler or the right
//! connection.

mod connection;
mod gateway;
mod handler;

pub use connection::{ConnectionKey, ConnectionManager, ConnectionState, ProviderConnection};
pub use gateway::ToolGateway;
pub use handler::{GatewayClientHandler, ProviderEvent};
