use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use weft_core::config::RetryConfig;
use weft_core::error::Result;
use weft_core::event::EventBus;
use weft_core::traits::LanguageModel;
use weft_core::types::{
    ExecutionResult, Node, NodeKind, NodeStatus, RunId, RunStatus, StepResult, WorkflowEvent,
    WorkflowGraph,
};
use weft_gateway::ToolGateway;

use crate::context::RunContext;
use crate::resolver::{resolve_params, resolve_value};
use crate::scheduler::execution_order;

/// Executes a workflow graph node by node in topological order.
///
/// A node failure never aborts the run; the executor records the step and
/// advances. Only the pre-execution cycle check can fail the whole run.
pub struct WorkflowExecutor {
    gateway: Arc<ToolGateway>,
    model: Arc<dyn LanguageModel>,
    retry: RetryConfig,
    events: Arc<EventBus>,
}

impl WorkflowExecutor {
    pub fn new(
        gateway: Arc<ToolGateway>,
        model: Arc<dyn LanguageModel>,
        retry: RetryConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            gateway,
            model,
            retry,
            events,
        }
    }

    pub async fn execute(&self, graph: &WorkflowGraph, tenant: Option<&str>) -> ExecutionResult {
        let run_id = RunId::new();
        info!(
            %run_id,
            nodes = graph.nodes.len(),
            tenant = tenant.unwrap_or("-"),
            "Starting workflow run"
        );

        let order = match execution_order(graph) {
            Ok(order) => order,
            Err(e) => {
                let result = ExecutionResult {
                    status: RunStatus::Error,
                    execution_order: Vec::new(),
                    results: Vec::new(),
                    final_context: HashMap::new(),
                    failed_count: 0,
                    error: Some(e.to_string()),
                };
                self.events.publish(WorkflowEvent::RunCompleted {
                    status: RunStatus::Error,
                    failed_count: 0,
                });
                return result;
            }
        };

        let mut ctx = RunContext::new();
        let mut results = Vec::with_capacity(order.len());

        for (index, node_id) in order.iter().enumerate() {
            let Some(node) = graph.node(node_id) else {
                continue;
            };
            let step = self.execute_node(node, index, graph, &mut ctx, tenant).await;
            results.push(step);
        }

        let failed_count = results
            .iter()
            .filter(|r: &&StepResult| r.status.is_terminal_failure())
            .count();
        let status = if failed_count == 0 {
            RunStatus::Completed
        } else {
            RunStatus::PartialFailure
        };
        info!(?status, failed_count, steps = results.len(), "Run finished");
        self.events.publish(WorkflowEvent::RunCompleted {
            status,
            failed_count,
        });

        ExecutionResult {
            status,
            execution_order: order,
            results,
            final_context: ctx.into_values(),
            failed_count,
            error: None,
        }
    }

    async fn execute_node(
        &self,
        node: &Node,
        index: usize,
        graph: &WorkflowGraph,
        ctx: &mut RunContext,
        tenant: Option<&str>,
    ) -> StepResult {
        let started = Instant::now();
        self.events.publish(WorkflowEvent::NodeStatus {
            node_id: node.id.clone(),
            status: NodeStatus::Executing,
        });
        self.events.publish(WorkflowEvent::StepStarted {
            node_id: node.id.clone(),
            tool: match &node.kind {
                NodeKind::Tool { tool_name, .. } => Some(tool_name.clone()),
                _ => None,
            },
        });

        // Inputs are the outputs of predecessor nodes only, not the whole
        // context.
        let inputs: HashMap<String, Value> = graph
            .predecessors(&node.id)
            .into_iter()
            .filter_map(|pred| ctx.get(pred).map(|v| (pred.to_string(), v.clone())))
            .collect();

        let (status, output, error) = match &node.kind {
            NodeKind::Tool { tool_name, params } => {
                let resolved = resolve_params(params, ctx);
                let outcome = self.gateway.call(tool_name, resolved, &inputs, tenant).await;
                if outcome.success {
                    (NodeStatus::Success, outcome.result, None)
                } else {
                    (NodeStatus::Failed, None, outcome.error)
                }
            }
            NodeKind::Transform {
                instruction,
                params,
            } => {
                let instruction = resolve_instruction(instruction, ctx);
                let resolved = resolve_params(params, ctx);
                let mut context_lines = format_inputs(&inputs);
                for (key, value) in &resolved {
                    context_lines.push(format!("{}: {}", key, format_value(value)));
                }
                let prompt = format!(
                    "Context:\n{}\n\nTransform/Process according to: {}",
                    context_lines.join("\n"),
                    instruction
                );
                match self.generate_with_retry(&node.id, &prompt).await {
                    Ok(text) => (NodeStatus::Success, Some(Value::String(text)), None),
                    Err(e) if e.is_rate_limit() => {
                        (NodeStatus::Failed, None, Some(e.to_string()))
                    }
                    Err(e) => (NodeStatus::Error, None, Some(e.to_string())),
                }
            }
            NodeKind::Conditional { instruction } => {
                let instruction = resolve_instruction(instruction, ctx);
                let prompt = format!(
                    "Context:\n{}\n\nDecision: {}\n\nRespond with ONLY 'true' or 'false'.",
                    format_inputs(&inputs).join("\n"),
                    instruction
                );
                match self.generate_with_retry(&node.id, &prompt).await {
                    Ok(text) => {
                        let decision = text.to_lowercase().contains("true");
                        (
                            NodeStatus::Success,
                            Some(serde_json::json!({ "decision": decision })),
                            None,
                        )
                    }
                    Err(e) if e.is_rate_limit() => {
                        (NodeStatus::Failed, None, Some(e.to_string()))
                    }
                    Err(e) => (NodeStatus::Error, None, Some(e.to_string())),
                }
            }
        };

        ctx.record(&node.id, index, output.clone().unwrap_or(Value::Null));
        self.events.publish(WorkflowEvent::NodeStatus {
            node_id: node.id.clone(),
            status,
        });
        self.events.publish(WorkflowEvent::StepCompleted {
            node_id: node.id.clone(),
            status,
            error: error.clone(),
        });

        StepResult {
            node_id: node.id.clone(),
            kind: node.kind.name().to_string(),
            status,
            label: node.label.clone(),
            output,
            error,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Call the model, retrying transient rate limits with exponential
    /// backoff up to the configured cap. Other errors are not retried.
    async fn generate_with_retry(&self, node_id: &str, prompt: &str) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.model.generate("", prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_rate_limit() && attempt < self.retry.max_retries => {
                    let backoff = backoff_delay(attempt, &self.retry);
                    warn!(
                        node_id,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, retrying"
                    );
                    self.events.publish(WorkflowEvent::RetryScheduled {
                        node_id: node_id.to_string(),
                        attempt: attempt + 1,
                        backoff_ms: backoff.as_millis() as u64,
                    });
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn resolve_instruction(instruction: &str, ctx: &RunContext) -> String {
    match resolve_value(&Value::String(instruction.to_string()), ctx) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn format_inputs(inputs: &HashMap<String, Value>) -> Vec<String> {
    let mut keys: Vec<&String> = inputs.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{}: {}", k, format_value(&inputs[k])))
        .collect()
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = (config.initial_backoff_ms * 2u64.pow(attempt)).min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use futures::future::BoxFuture;
    use weft_core::error::WeftError;
    use weft_core::types::Edge;
    use weft_gateway::ConnectionManager;

    /// Scripted model: pops the next canned reply per call.
    struct ScriptedModel {
        replies: Mutex<Vec<Result<String>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl LanguageModel for ScriptedModel {
        fn generate(&self, _system: &str, _prompt: &str) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move {
                *self.calls.lock().unwrap() += 1;
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    Ok("done".to_string())
                } else {
                    replies.remove(0)
                }
            })
        }
    }

    fn executor_with(model: ScriptedModel) -> (WorkflowExecutor, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let manager = Arc::new(ConnectionManager::new(HashMap::new()));
        let gateway = Arc::new(ToolGateway::new(manager));
        let retry = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
        };
        (
            WorkflowExecutor::new(gateway, model.clone(), retry, Arc::new(EventBus::default())),
            model,
        )
    }

    fn transform_node(id: &str, instruction: &str) -> Node {
        Node {
            id: id.to_string(),
            label: None,
            kind: NodeKind::Transform {
                instruction: instruction.to_string(),
                params: serde_json::Map::new(),
            },
        }
    }

    fn graph_of(nodes: Vec<Node>, edges: Vec<(&str, &str)>) -> WorkflowGraph {
        let edges = edges
            .into_iter()
            .enumerate()
            .map(|(i, (s, t))| Edge {
                id: format!("e{}", i),
                source: s.to_string(),
                target: t.to_string(),
            })
            .collect();
        WorkflowGraph { nodes, edges }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_ends_failed() {
        let rate_limited = || Err(WeftError::RateLimited("429".into()));
        let (executor, model) = executor_with(ScriptedModel::new(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
            rate_limited(),
        ]));
        let graph = graph_of(vec![transform_node("t", "summarize")], vec![]);

        let result = executor.execute(&graph, None).await;
        assert_eq!(result.status, RunStatus::PartialFailure);
        assert_eq!(result.results[0].status, NodeStatus::Failed);
        // Initial attempt plus three retries.
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success_recovers() {
        let (executor, model) = executor_with(ScriptedModel::new(vec![
            Err(WeftError::RateLimited("429".into())),
            Ok("recovered".to_string()),
        ]));
        let graph = graph_of(vec![transform_node("t", "summarize")], vec![]);

        let result = executor.execute(&graph, None).await;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.results[0].output, Some(serde_json::json!("recovered")));
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_is_not_retried() {
        let (executor, model) = executor_with(ScriptedModel::new(vec![Err(
            WeftError::LlmRequest("boom".into()),
        )]));
        let graph = graph_of(vec![transform_node("t", "summarize")], vec![]);

        let result = executor.execute(&graph, None).await;
        assert_eq!(result.results[0].status, NodeStatus::Error);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_conditional_decision_parsing() {
        let (executor, _) = executor_with(ScriptedModel::new(vec![
            Ok("True, definitely.".to_string()),
            Ok("false".to_string()),
        ]));
        let yes = Node {
            id: "yes".to_string(),
            label: None,
            kind: NodeKind::Conditional {
                instruction: "is it sunny?".to_string(),
            },
        };
        let no = Node {
            id: "no".to_string(),
            label: None,
            kind: NodeKind::Conditional {
                instruction: "is it raining?".to_string(),
            },
        };
        let graph = graph_of(vec![yes, no], vec![]);

        let result = executor.execute(&graph, None).await;
        assert_eq!(
            result.results[0].output,
            Some(serde_json::json!({"decision": true}))
        );
        assert_eq!(
            result.results[1].output,
            Some(serde_json::json!({"decision": false}))
        );
    }

    #[tokio::test]
    async fn test_tool_node_without_connection_fails_but_run_advances() {
        let (executor, _) = executor_with(ScriptedModel::new(vec![Ok("after".to_string())]));
        let tool = Node {
            id: "fetch".to_string(),
            label: Some("Fetch".to_string()),
            kind: NodeKind::Tool {
                tool_name: "github.create_issue".to_string(),
                params: serde_json::Map::new(),
            },
        };
        let graph = graph_of(
            vec![tool, transform_node("after", "report")],
            vec![("fetch", "after")],
        );

        let result = executor.execute(&graph, None).await;
        assert_eq!(result.status, RunStatus::PartialFailure);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.results[0].status, NodeStatus::Failed);
        assert!(result.results[0].error.as_ref().unwrap().contains("github"));
        // The failure never aborts the run.
        assert_eq!(result.results[1].status, NodeStatus::Success);
    }

    #[tokio::test]
    async fn test_cycle_produces_error_and_no_steps() {
        let (executor, model) = executor_with(ScriptedModel::new(vec![]));
        let graph = graph_of(
            vec![transform_node("a", "x"), transform_node("b", "y")],
            vec![("a", "b"), ("b", "a")],
        );

        let result = executor.execute(&graph, None).await;
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.results.is_empty());
        assert!(result.error.unwrap().contains("cycle"));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_outputs_recorded_under_both_aliases() {
        let (executor, _) = executor_with(ScriptedModel::new(vec![
            Ok("first".to_string()),
            Ok("second".to_string()),
        ]));
        let graph = graph_of(
            vec![transform_node("a", "x"), transform_node("b", "y")],
            vec![("a", "b")],
        );

        let result = executor.execute(&graph, None).await;
        assert_eq!(result.final_context["a"], result.final_context["step_0"]);
        assert_eq!(result.final_context["b"], result.final_context["step_1"]);
        assert_eq!(result.final_context["step_0"], serde_json::json!("first"));
    }

    #[tokio::test]
    async fn test_retry_event_emitted() {
        let (executor, _) = executor_with(ScriptedModel::new(vec![
            Err(WeftError::RateLimited("429".into())),
            Ok("ok".to_string()),
        ]));
        let events = Arc::new(EventBus::default());
        let executor = WorkflowExecutor {
            events: events.clone(),
            ..executor
        };
        let mut rx = events.subscribe();
        let graph = graph_of(vec![transform_node("t", "x")], vec![]);

        tokio::time::pause();
        let result = executor.execute(&graph, None).await;
        assert_eq!(result.status, RunStatus::Completed);

        let mut saw_retry = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, WorkflowEvent::RetryScheduled { attempt: 1, .. }) {
                saw_retry = true;
            }
        }
        assert!(saw_retry);
    }
}
