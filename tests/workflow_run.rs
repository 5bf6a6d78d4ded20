use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use weft_core::config::RetryConfig;
use weft_core::error::Result;
use weft_core::event::EventBus;
use weft_core::traits::{LanguageModel, ToolHandler};
use weft_core::types::{
    NodeStatus, RunStatus, ToolCallContext, ToolDescriptor, WorkflowGraph,
};
use weft_engine::WorkflowExecutor;
use weft_gateway::{ConnectionManager, ToolGateway};

/// Echoes its resolved params back, tagged with the calling tenant.
struct EchoTool;

impl ToolHandler for EchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "util",
            "echo",
            "Echo the params back",
            serde_json::json!({"type": "object"}),
        )
    }

    fn invoke(
        &self,
        params: serde_json::Value,
        ctx: ToolCallContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            Ok(serde_json::json!({
                "params": params,
                "tenant": ctx.tenant_id,
            }))
        })
    }
}

struct FixedModel(&'static str);

impl LanguageModel for FixedModel {
    fn generate(&self, _system: &str, _prompt: &str) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Ok(self.0.to_string()) })
    }
}

fn executor() -> WorkflowExecutor {
    let manager = Arc::new(ConnectionManager::new(HashMap::new()));
    let mut gateway = ToolGateway::new(manager);
    gateway.register_internal(Arc::new(EchoTool));
    WorkflowExecutor::new(
        Arc::new(gateway),
        Arc::new(FixedModel("transformed")),
        RetryConfig::default(),
        Arc::new(EventBus::default()),
    )
}

fn graph(json: serde_json::Value) -> WorkflowGraph {
    serde_json::from_value(json).expect("parse graph")
}

#[tokio::test]
async fn test_linear_chain_completes_with_dual_aliases() {
    let graph = graph(serde_json::json!({
        "nodes": [
            {"id": "a", "type": "tool", "tool_name": "util.echo", "params": {"seed": 1}},
            {"id": "b", "type": "tool", "tool_name": "util.echo", "params": {"prev": "${a}"}},
            {"id": "c", "type": "tool", "tool_name": "util.echo", "params": {"prev": "${step_1}"}}
        ],
        "edges": [
            {"id": "e1", "source": "a", "target": "b"},
            {"id": "e2", "source": "b", "target": "c"}
        ]
    }));

    let result = executor().execute(&graph, None).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.execution_order, vec!["a", "b", "c"]);
    assert_eq!(result.failed_count, 0);
    for key in ["a", "b", "c", "step_0", "step_1", "step_2"] {
        assert!(result.final_context.contains_key(key), "missing {}", key);
    }
    assert_eq!(result.final_context["a"], result.final_context["step_0"]);
}

#[tokio::test]
async fn test_placeholder_substitutes_native_value_between_steps() {
    let graph = graph(serde_json::json!({
        "nodes": [
            {"id": "first", "type": "tool", "tool_name": "util.echo", "params": {"count": 42}},
            {"id": "second", "type": "tool", "tool_name": "util.echo", "params": {"upstream": "${step_0.params.count}"}}
        ],
        "edges": [
            {"id": "e1", "source": "first", "target": "second"}
        ]
    }));

    let result = executor().execute(&graph, None).await;

    assert_eq!(result.status, RunStatus::Completed);
    // The numeric value survives resolution without being stringified.
    let second = result.results[1].output.as_ref().unwrap();
    assert_eq!(second["params"]["upstream"], serde_json::json!(42));
}

#[tokio::test]
async fn test_unconnected_provider_fails_node_but_run_continues() {
    let graph = graph(serde_json::json!({
        "nodes": [
            {"id": "a", "type": "tool", "tool_name": "util.echo", "params": {}},
            {"id": "b", "type": "tool", "tool_name": "github.create_issue", "params": {}}
        ],
        "edges": [
            {"id": "e1", "source": "a", "target": "b"}
        ]
    }));

    let result = executor().execute(&graph, None).await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.results[0].status, NodeStatus::Success);
    assert_eq!(result.results[1].status, NodeStatus::Failed);
    assert!(result.results[1]
        .error
        .as_ref()
        .unwrap()
        .contains("github"));
    // The earlier output is still in the final context.
    assert!(result.final_context.contains_key("a"));
}

#[tokio::test]
async fn test_mixed_node_kinds_end_to_end() {
    let graph = graph(serde_json::json!({
        "nodes": [
            {"id": "fetch", "type": "tool", "tool_name": "util.echo", "params": {"q": "news"}},
            {"id": "summary", "type": "transform", "instruction": "summarize ${fetch}"},
            {"id": "check", "type": "conditional", "instruction": "is ${summary} useful?"}
        ],
        "edges": [
            {"id": "e1", "source": "fetch", "target": "summary"},
            {"id": "e2", "source": "summary", "target": "check"}
        ]
    }));

    let manager = Arc::new(ConnectionManager::new(HashMap::new()));
    let mut gateway = ToolGateway::new(manager);
    gateway.register_internal(Arc::new(EchoTool));
    let executor = WorkflowExecutor::new(
        Arc::new(gateway),
        Arc::new(FixedModel("TRUE, it is useful")),
        RetryConfig::default(),
        Arc::new(EventBus::default()),
    );

    let result = executor.execute(&graph, None).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.results[1].kind, "transform");
    assert_eq!(
        result.results[2].output,
        Some(serde_json::json!({"decision": true}))
    );
}

#[tokio::test]
async fn test_tenant_id_reaches_internal_tools() {
    let graph = graph(serde_json::json!({
        "nodes": [
            {"id": "a", "type": "tool", "tool_name": "util.echo", "params": {}}
        ],
        "edges": []
    }));

    let result = executor().execute(&graph, Some("alice")).await;

    assert_eq!(result.status, RunStatus::Completed);
    let output = result.results[0].output.as_ref().unwrap();
    assert_eq!(output["tenant"], serde_json::json!("alice"));
}

#[tokio::test]
async fn test_cycle_yields_error_and_no_results() {
    let graph = graph(serde_json::json!({
        "nodes": [
            {"id": "a", "type": "tool", "tool_name": "util.echo", "params": {}},
            {"id": "b", "type": "tool", "tool_name": "util.echo", "params": {}}
        ],
        "edges": [
            {"id": "e1", "source": "a", "target": "b"},
            {"id": "e2", "source": "b", "target": "a"}
        ]
    }));

    let result = executor().execute(&graph, None).await;

    assert_eq!(result.status, RunStatus::Error);
    assert!(result.results.is_empty());
    assert!(result.final_context.is_empty());
}

#[tokio::test]
async fn test_unknown_node_type_rejected_before_execution() {
    let parsed: std::result::Result<WorkflowGraph, _> =
        serde_json::from_value(serde_json::json!({
            "nodes": [
                {"id": "a", "type": "teleport", "params": {}}
            ],
            "edges": []
        }));
    assert!(parsed.is_err());
}
