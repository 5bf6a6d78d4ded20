use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::AppConfig;
use weft_core::event::EventBus;
use weft_core::types::{WorkflowEvent, WorkflowGraph};

use weft_engine::{execution_order, WorkflowExecutor};
use weft_gateway::{ConnectionManager, ToolGateway};
use weft_llm::{register_ai_tools, HttpChatModel};

#[derive(Parser)]
#[command(name = "weft", version, about = "Workflow execution engine and tool gateway")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow graph from a JSON file
    Run {
        /// Path to the workflow JSON ({"nodes": [...], "edges": [...]})
        workflow: PathBuf,
        /// Tenant whose credentials and connections are used
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Validate a workflow graph without executing it
    Validate {
        /// Path to the workflow JSON
        workflow: PathBuf,
    },
    /// List tools visible to a tenant
    Tools {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run { workflow, tenant } => run_workflow(config, &workflow, tenant).await,
        Commands::Validate { workflow } => validate_workflow(&workflow),
        Commands::Tools { tenant } => list_tools(config, tenant.as_deref()).await,
        Commands::Config => show_config(&config),
    }
}

fn load_graph(path: &PathBuf) -> anyhow::Result<WorkflowGraph> {
    let raw = std::fs::read_to_string(path)?;
    let graph: WorkflowGraph = serde_json::from_str(&raw)?;
    Ok(graph)
}

async fn build_gateway(config: &AppConfig) -> (Arc<ToolGateway>, Arc<dyn weft_core::traits::LanguageModel>) {
    let manager = Arc::new(ConnectionManager::new(config.providers.clone()));
    let model: Arc<dyn weft_core::traits::LanguageModel> =
        Arc::new(HttpChatModel::new(config.model.clone()));
    let mut gateway = ToolGateway::new(manager);
    register_ai_tools(&mut gateway, model.clone());
    let gateway = Arc::new(gateway);

    let connected = gateway.connect_all_enabled().await;
    for (provider, ok) in &connected {
        if *ok {
            info!(provider = %provider, "Provider connected");
        } else {
            warn!(provider = %provider, "Provider unavailable, its tools will fail");
        }
    }

    (gateway, model)
}

async fn run_workflow(
    config: AppConfig,
    workflow: &PathBuf,
    tenant: Option<String>,
) -> anyhow::Result<()> {
    let graph = load_graph(workflow)?;
    let (gateway, model) = build_gateway(&config).await;

    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                WorkflowEvent::StepStarted { node_id, tool } => match tool {
                    Some(tool) => println!("▸ {} ({})", node_id, tool),
                    None => println!("▸ {}", node_id),
                },
                WorkflowEvent::StepCompleted {
                    node_id,
                    status,
                    error,
                } => match error {
                    Some(error) => println!("  {} {}: {}", node_id, status, error),
                    None => println!("  {} {}", node_id, status),
                },
                WorkflowEvent::RetryScheduled {
                    node_id,
                    attempt,
                    backoff_ms,
                } => println!("  {} rate limited, retry {} in {}ms", node_id, attempt, backoff_ms),
                WorkflowEvent::RunCompleted { .. } => break,
                WorkflowEvent::NodeStatus { .. } => {}
            }
        }
    });

    let executor = WorkflowExecutor::new(gateway.clone(), model, config.retry.clone(), events);
    let result = executor.execute(&graph, tenant.as_deref()).await;
    let _ = progress.await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    gateway.shutdown().await;

    if result.failed_count > 0 || result.error.is_some() {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_workflow(workflow: &PathBuf) -> anyhow::Result<()> {
    let graph = load_graph(workflow)?;
    let order = execution_order(&graph)?;
    println!("Valid: {} nodes, order: {}", order.len(), order.join(" -> "));
    Ok(())
}

async fn list_tools(config: AppConfig, tenant: Option<&str>) -> anyhow::Result<()> {
    let (gateway, _) = build_gateway(&config).await;

    for status in gateway.provider_statuses(tenant).await {
        let state = if status.connected {
            "connected"
        } else {
            "disconnected"
        };
        println!("{} ({}): {} tools", status.display_name, state, status.tool_count);
    }
    for tool in gateway.list_tools(tenant).await {
        println!("  {:<32} {}", tool.name, tool.description);
    }

    gateway.shutdown().await;
    Ok(())
}

fn show_config(config: &AppConfig) -> anyhow::Result<()> {
    println!("model: {} @ {}", config.model.model_id, config.model.base_url);
    println!(
        "retry: {} retries, {}ms initial backoff",
        config.retry.max_retries, config.retry.initial_backoff_ms
    );
    let mut providers: Vec<_> = config.providers.iter().collect();
    providers.sort_by_key(|(name, _)| name.as_str());
    for (name, provider) in providers {
        println!(
            "provider {}: {} ({})",
            name,
            provider.display_name_or(name),
            if provider.enabled { "enabled" } else { "disabled" }
        );
    }
    Ok(())
}
