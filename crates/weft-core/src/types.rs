use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one workflow run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step in a workflow graph.
///
/// The node kind is a tagged union so dispatch is matched exhaustively;
/// a graph with an unrecognized `type` tag is rejected at parse time,
/// before any node executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within the graph.
    pub id: String,
    /// Display label (not used for addressing).
    #[serde(default)]
    pub label: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// The type-specific payload of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    /// Invoke a named capability (`provider.operation`) through the gateway.
    Tool {
        tool_name: String,
        #[serde(default)]
        params: serde_json::Map<String, serde_json::Value>,
    },
    /// Transform predecessor outputs with a language-model instruction.
    Transform {
        instruction: String,
        #[serde(default)]
        params: serde_json::Map<String, serde_json::Value>,
    },
    /// Ask the language model for a boolean decision.
    Conditional { instruction: String },
}

impl NodeKind {
    /// Stable name used in step results and logs.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Tool { .. } => "tool",
            NodeKind::Transform { .. } => "transform",
            NodeKind::Conditional { .. } => "conditional",
        }
    }
}

/// A directed dependency: the source's output feeds the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
}

/// A workflow graph as submitted by the caller. Read-only during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Node ids with an edge into `id`, in edge order.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source.as_str())
            .collect()
    }
}

/// Per-node execution state. `Success`, `Failed`, and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Executing,
    Success,
    Failed,
    Error,
}

impl NodeStatus {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, NodeStatus::Failed | NodeStatus::Error)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Executing => "executing",
            NodeStatus::Success => "success",
            NodeStatus::Failed => "failed",
            NodeStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Result of executing a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution time in milliseconds.
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    PartialFailure,
    Error,
}

/// Result of executing an entire workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub execution_order: Vec<String>,
    pub results: Vec<StepResult>,
    pub final_context: HashMap<String, serde_json::Value>,
    pub failed_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An invocable capability, identified by its namespaced `provider.operation` name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Full namespaced name (e.g. "github.create_issue").
    pub name: String,
    pub provider: String,
    /// Name as exposed by the provider itself.
    pub original_name: String,
    pub display_name: String,
    pub description: String,
    /// JSON-Schema-like object describing accepted parameters.
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(
        provider: impl Into<String>,
        original_name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        let provider = provider.into();
        let original_name = original_name.into();
        Self {
            name: format!("{}.{}", provider, original_name),
            display_name: title_case(&original_name),
            provider,
            original_name,
            description: description.into(),
            input_schema,
        }
    }
}

/// "create_issue" -> "Create Issue".
pub fn title_case(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Status of one configured provider, as seen by one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub display_name: String,
    pub connected: bool,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a gateway tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallOutcome {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Context passed to internal tool handlers during execution.
///
/// Carries the requesting tenant plus the credential collaborators so a
/// handler can fetch (and refresh) per-tenant secrets itself.
#[derive(Clone, Default)]
pub struct ToolCallContext {
    pub tenant_id: Option<String>,
    /// Snapshot of the run context at call time.
    pub inputs: HashMap<String, serde_json::Value>,
    pub credentials: Option<Arc<dyn crate::traits::CredentialResolver>>,
    pub credential_updater: Option<Arc<dyn crate::traits::CredentialUpdater>>,
}

impl std::fmt::Debug for ToolCallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallContext")
            .field("tenant_id", &self.tenant_id)
            .field("inputs", &self.inputs.len())
            .field("credentials", &self.credentials.is_some())
            .field("credential_updater", &self.credential_updater.is_some())
            .finish()
    }
}

/// Progress event broadcast to all subscribers during a run.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A node changed status (executing / terminal).
    NodeStatus { node_id: String, status: NodeStatus },
    /// A node began dispatch; `tool` is set for tool-invocation nodes.
    StepStarted {
        node_id: String,
        tool: Option<String>,
    },
    /// A node reached a terminal state.
    StepCompleted {
        node_id: String,
        status: NodeStatus,
        error: Option<String>,
    },
    /// A transient rate limit scheduled a retry.
    RetryScheduled {
        node_id: String,
        attempt: u32,
        backoff_ms: u64,
    },
    /// The run finished.
    RunCompleted {
        status: RunStatus,
        failed_count: usize,
    },
}
