// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use freja_config::Config;
use freja_core::{Agent, AgentEvent, SessionStore};
use freja_model::{ModelProvider, OpenAiCompatProvider, StreamError};
use freja_node::{
    AgentCancelTool, AgentJobExecutor, AgentListTool, AgentResultTool, AgentStatusTool,
    AgentSubmitTool, JobService, PeerRoster,
};
use freja_plan::{
    decompose, reset_all, retry_unfinished, AgentWorkerRunner, Orchestrator, OrchestratorOptions,
    PlanStore, TaggedEvent,
};
use freja_tools::{
    Dispatcher, PermissionArbiter, PermissionPrompt, PromptOutcome, ReadFileTool, RunProcessTool,
    ToolRegistry, WriteFileTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::ShowConfig) = &cli.command {
        let config = freja_config::load(cli.config.as_deref())?;
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let mut config = freja_config::load(cli.config.as_deref())?;
    if let Some(model) = &cli.model {
        config.model.model_id = model.clone();
    }
    if let Some(host) = &cli.host {
        config.model.host_url = host.clone();
    }
    if cli.auto_approve {
        config.agent.auto_approve = true;
    }
    let config = Arc::new(config);

    match cli.command {
        Some(Commands::Orchestrate {
            task,
            max_agents,
            reset,
            retry,
            skip,
            plan_file,
        }) => run_orchestrate(config, task, max_agents, reset, retry, skip, plan_file).await,
        Some(Commands::Serve) => run_serve(config).await,
        Some(Commands::ShowConfig) => unreachable!("handled above"),
        None => {
            let Some(prompt) = cli.prompt else {
                anyhow::bail!("nothing to do: pass a prompt or a subcommand (see --help)");
            };
            run_chat(config, prompt).await
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "freja=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

// ── Shared wiring ─────────────────────────────────────────────────────────────

/// Build the model provider and resolve the real context window.
async fn build_model(config: &Config) -> anyhow::Result<(Arc<dyn ModelProvider>, usize)> {
    let provider = Arc::new(OpenAiCompatProvider::from_config(&config.model)?);
    let max_context = match provider.probe_context_window().await {
        Some(n) if n > 0 => {
            debug!(context_window = n, "model-info probe succeeded");
            n as usize
        }
        _ => config.model.max_context_length,
    };
    Ok((provider, max_context))
}

fn build_registry(config: &Config) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(RunProcessTool);
    registry.register(ReadFileTool);
    registry.register(WriteFileTool);
    if !config.node.peers.is_empty() {
        let roster = PeerRoster::new(config.node.peers.clone());
        registry.register(AgentListTool {
            roster: roster.clone(),
        });
        registry.register(AgentSubmitTool {
            roster: roster.clone(),
        });
        registry.register(AgentStatusTool {
            roster: roster.clone(),
        });
        registry.register(AgentResultTool {
            roster: roster.clone(),
        });
        registry.register(AgentCancelTool { roster });
    }
    registry
}

fn grants_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("freja/grants.yaml"))
}

fn repo_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Interactive permission prompt on stderr/stdin.
struct StdinPrompt;

#[async_trait]
impl PermissionPrompt for StdinPrompt {
    async fn ask(
        &self,
        _repo: &Path,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> PromptOutcome {
        let question = format!(
            "\nfreja wants to run `{tool_name}` with {args}\n  [A]lways  [S]ession  [O]nce  [N]o: "
        );
        let answer = tokio::task::spawn_blocking(move || {
            eprint!("{question}");
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            line
        })
        .await
        .unwrap_or_default();
        match answer.trim().to_ascii_lowercase().as_str() {
            "a" => PromptOutcome::Always,
            "s" => PromptOutcome::Session,
            "o" | "y" | "yes" => PromptOutcome::Once,
            _ => PromptOutcome::Deny,
        }
    }
}

fn build_dispatcher(config: &Config, interactive: bool) -> Arc<Dispatcher> {
    let prompt: Option<Box<dyn PermissionPrompt>> = if interactive && !config.agent.auto_approve {
        Some(Box::new(StdinPrompt))
    } else {
        None
    };
    let arbiter = Arc::new(PermissionArbiter::new(
        repo_path(),
        grants_file(),
        config.agent.auto_approve,
        config.agent.require_mcp_approval,
        prompt,
    ));
    Arc::new(Dispatcher::from_config(
        Arc::new(build_registry(config)),
        arbiter,
        &config.tools,
    ))
}

/// Cancellation token wired to Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            c.cancel();
        }
    });
    cancel
}

// ── One-shot chat ─────────────────────────────────────────────────────────────

async fn run_chat(config: Arc<Config>, prompt: String) -> anyhow::Result<()> {
    let (model, max_context) = build_model(&config).await?;
    let dispatcher = build_dispatcher(&config, true);
    let mut agent = Agent::new(
        model,
        dispatcher,
        Arc::new(config.agent.clone()),
        max_context,
    );
    if let Some(dir) = &config.session.store_dir {
        let store = SessionStore::open(
            dir,
            &agent.session().id,
            config.session.tool_result_store_cap_bytes,
        )?;
        agent = agent.with_store(store);
    }

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::ContentDelta(t) => {
                    print!("{t}");
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ToolCallStarted(tc) => {
                    eprintln!("→ {}({})", tc.name, tc.args);
                }
                AgentEvent::ToolCallFinished {
                    tool_name,
                    elapsed,
                    is_error,
                    ..
                } => {
                    let note = if is_error { " (error)" } else { "" };
                    eprintln!("← {tool_name} in {:.1}s{note}", elapsed.as_secs_f32());
                }
                AgentEvent::Summarised {
                    tokens_before,
                    tokens_after,
                } => {
                    eprintln!("· context summarised: {tokens_before} → {tokens_after} tokens");
                }
                _ => {}
            }
        }
    });

    let cancel = ctrl_c_token();
    let result = agent.submit(&prompt, tx, cancel).await;
    let _ = printer.await;

    match result {
        Ok(outcome) => {
            agent.append_assistant(&outcome.content);
            println!();
            if outcome.max_iterations_reached {
                eprintln!("(stopped at the iteration cap; the answer may be incomplete)");
            }
            Ok(())
        }
        Err(e) if is_cancelled(&e) => {
            eprintln!("\ncancelled");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<StreamError>(), Some(StreamError::Cancelled))
}

// ── Orchestration ─────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn run_orchestrate(
    config: Arc<Config>,
    task: Option<String>,
    max_agents: Option<usize>,
    reset: bool,
    retry: bool,
    skip: bool,
    plan_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (model, max_context) = build_model(&config).await?;
    let plan_path = plan_file.unwrap_or_else(|| config.orchestrator.plan_file.clone());
    let store = PlanStore::new(&plan_path);

    let mut plan = match &task {
        Some(task) => {
            let thinking_model: Arc<dyn ModelProvider> =
                match &config.orchestrator.thinking_model_id {
                    Some(id) => {
                        let mut model_cfg = config.model.clone();
                        model_cfg.model_id = id.clone();
                        Arc::new(OpenAiCompatProvider::from_config(&model_cfg)?)
                    }
                    None => model.clone(),
                };
            info!(model = thinking_model.model_name(), "decomposing task");
            let plan = decompose(thinking_model.as_ref(), task, None).await?;
            store.save(&plan).await?;
            plan
        }
        None => PlanStore::load(&plan_path)
            .with_context(|| format!("no task given and no plan at {}", plan_path.display()))?,
    };

    if reset {
        reset_all(&mut plan);
        store.save(&plan).await?;
    } else if retry {
        retry_unfinished(&mut plan);
        store.save(&plan).await?;
    }

    eprintln!(
        "plan {}: {} subtasks, recommended {} agents",
        plan.task_id,
        plan.subtasks.len(),
        plan.recommended_agent_count
    );

    // Workers run headless: the arbiter auto-approves, permission decisions
    // belong to whoever launched the orchestration.
    let arbiter = Arc::new(PermissionArbiter::auto(repo_path()));
    let dispatcher = Arc::new(Dispatcher::from_config(
        Arc::new(build_registry(&config)),
        arbiter,
        &config.tools,
    ));
    let runner = Arc::new(AgentWorkerRunner {
        model,
        dispatcher,
        agent_config: Arc::new(config.agent.clone()),
        max_context_tokens: max_context,
    });
    // An explicit --max-agents wins; otherwise cap the configured pool at
    // what the decomposer recommended for this plan.
    let options = OrchestratorOptions {
        max_agents: max_agents.unwrap_or_else(|| {
            config
                .orchestrator
                .max_agents
                .min(plan.recommended_agent_count.max(1))
        }),
        skip_failed_deps: skip,
    };

    let (tx, mut rx) = mpsc::channel::<TaggedEvent>(1024);
    let printer = tokio::spawn(async move {
        while let Some(tagged) = rx.recv().await {
            match tagged.event {
                AgentEvent::ToolCallStarted(tc) => {
                    eprintln!("[{} {}] → {}", tagged.agent_id, tagged.subtask_id, tc.name);
                }
                AgentEvent::TurnComplete => {
                    eprintln!("[{} {}] done", tagged.agent_id, tagged.subtask_id);
                }
                _ => {}
            }
        }
    });

    let orchestrator = Orchestrator::new(runner, options);
    let cancel = ctrl_c_token();
    let report = orchestrator.run(&mut plan, &store, tx, cancel).await?;
    let _ = printer.await;

    for subtask in &plan.subtasks {
        eprintln!(
            "  {:<12} {:?} {}",
            subtask.id,
            subtask.status,
            subtask.title
        );
    }
    if report.interrupted {
        eprintln!("interrupted; resume with: freja orchestrate --retry");
    } else if report.success {
        println!("plan completed: {} subtasks", report.completed);
    } else {
        println!(
            "plan finished with failures: {} completed, {} failed, {} blocked \
             (re-run with --retry, or --skip to ignore failed dependencies)",
            report.completed, report.failed, report.blocked
        );
    }
    Ok(())
}

// ── Job service ───────────────────────────────────────────────────────────────

async fn run_serve(config: Arc<Config>) -> anyhow::Result<()> {
    let (model, max_context) = build_model(&config).await?;
    // Jobs arrive over the network; there is no user to prompt.
    let arbiter = Arc::new(PermissionArbiter::auto(repo_path()));
    let dispatcher = Arc::new(Dispatcher::from_config(
        Arc::new(build_registry(&config)),
        arbiter,
        &config.tools,
    ));
    let executor = Arc::new(AgentJobExecutor {
        model,
        dispatcher,
        agent_config: Arc::new(config.agent.clone()),
        max_context_tokens: max_context,
    });
    let service = JobService::new(
        executor,
        config.node.agent_name.clone(),
        config.node.capabilities.clone(),
    );
    freja_node::serve(&config.node, service).await
}
