// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Args, ExitCode, OutputFormatArg};
use loom_bootstrap::{AgentBuilder, ToolSetProfile};
use loom_core::{Agent, AgentEvent};
use loom_mcp_client::McpServerConfig;
use loom_session::{Event, EventPayload, Role, SessionStore};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging();

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::RuntimeError
        }
    };
    std::process::exit(code as i32);
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = Arc::new(
        loom_config::load(None).context("loading configuration")?,
    );

    let mut runtime_ctx = loom_bootstrap::RuntimeContext::auto_detect();
    if let Some(dir) = &args.working_directory {
        let canon = std::fs::canonicalize(dir)
            .with_context(|| format!("resolving --working-directory {}", dir.display()))?;
        runtime_ctx.project_root = Some(canon);
    }

    let model_cfg = match &args.model {
        Some(m) => loom_model::resolve_model_from_config(&config, m),
        None => config.model.clone(),
    };
    let model: Arc<dyn loom_model::ModelProvider> =
        Arc::from(loom_model::from_config(&model_cfg).context("constructing model provider")?);

    let mcp_servers = load_mcp_servers(args.mcp_config.as_deref())?;

    let todos = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let task_depth = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let profile = ToolSetProfile::Full {
        question_tx: None,
        todos,
        task_depth,
    };

    let mode = config.agent.default_mode;
    let mut agent = AgentBuilder::new(config.clone())
        .with_runtime_context(runtime_ctx)
        .with_mcp_servers(mcp_servers)
        .build(mode, model, profile)
        .await;

    let session_store = if args.no_persist {
        None
    } else {
        Some(SessionStore::new().context("opening session store")?)
    };
    let session_id = resolve_session(session_store.as_ref(), args.session.as_deref())?;

    if let Some(prompt) = &args.prompt {
        return run_one_shot(
            &mut agent,
            prompt,
            args.output_format,
            session_store.as_ref(),
            &session_id,
        )
        .await;
    }

    run_repl(
        &mut agent,
        args.output_format,
        session_store.as_ref(),
        &session_id,
    )
    .await
}

/// Create the named session if it doesn't exist yet, or mint an ephemeral
/// id when no store is active and no `--session` name was given.
fn resolve_session(
    store: Option<&SessionStore>,
    requested: Option<&str>,
) -> anyhow::Result<String> {
    let id = requested
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Some(store) = store {
        if store.get("loom", "local", &id).is_err() {
            store.create("loom", "local", &id)?;
        }
    }
    Ok(id)
}

fn load_mcp_servers(path: Option<&std::path::Path>) -> anyhow::Result<Vec<McpServerConfig>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading MCP config {}", path.display()))?;
    let file: loom_mcp_client::McpConfigFile = serde_json::from_str(&text)
        .with_context(|| format!("parsing MCP config {}", path.display()))?;
    Ok(file.servers)
}

// ── One-shot mode ──────────────────────────────────────────────────────────

async fn run_one_shot(
    agent: &mut Agent,
    prompt: &str,
    format: OutputFormatArg,
    store: Option<&SessionStore>,
    session_id: &str,
) -> anyhow::Result<ExitCode> {
    record_user_turn(store, session_id, prompt);

    let (tx, mut rx) = tokio::sync::mpsc::channel::<AgentEvent>(256);
    let submit = agent.submit(prompt, tx);
    tokio::pin!(submit);

    let mut renderer = Renderer::new(format);
    let mut final_text = String::new();
    loop {
        tokio::select! {
            res = &mut submit => {
                res?;
                while let Ok(ev) = rx.try_recv() {
                    record_agent_event(store, session_id, &ev);
                    renderer.render(&ev, &mut final_text);
                }
                break;
            }
            Some(ev) = rx.recv() => {
                record_agent_event(store, session_id, &ev);
                renderer.render(&ev, &mut final_text);
            }
        }
    }
    renderer.finish();
    record_assistant_turn(store, session_id, &final_text);

    Ok(ExitCode::Success)
}

// ── REPL mode ───────────────────────────────────────────────────────────────

async fn run_repl(
    agent: &mut Agent,
    format: OutputFormatArg,
    store: Option<&SessionStore>,
    session_id: &str,
) -> anyhow::Result<ExitCode> {
    println!("loom — interactive coding agent. Type /help for commands, Ctrl-C to interrupt.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut last_interrupt: Option<Instant> = None;

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = stdin.next_line() => match line? {
                Some(l) => l,
                None => break, // EOF (piped stdin, or terminal closed)
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(ExitCode::UserInterrupt);
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(cmd) = line.strip_prefix('/') {
            match handle_slash_command(cmd, agent) {
                SlashOutcome::Continue => continue,
                SlashOutcome::Exit => return Ok(ExitCode::Success),
            }
        }

        record_user_turn(store, session_id, line);
        let outcome = run_turn_interactive(agent, line, format, store, session_id, &mut last_interrupt).await?;
        if let TurnOutcome::Completed(text) = &outcome {
            record_assistant_turn(store, session_id, text);
        }
        if matches!(outcome, TurnOutcome::DoubleInterrupt) {
            return Ok(ExitCode::UserInterrupt);
        }
    }

    Ok(ExitCode::Success)
}

enum SlashOutcome {
    Continue,
    Exit,
}

fn handle_slash_command(cmd: &str, agent: &Agent) -> SlashOutcome {
    match cmd {
        "exit" | "quit" => SlashOutcome::Exit,
        "help" => {
            println!(
                "Commands:\n  \
                 /help            show this message\n  \
                 /tools           list available tools for the current mode\n  \
                 /models          list known models from the static catalog\n  \
                 /providers       list registered model providers\n  \
                 /current-model   show the active model\n  \
                 /exit            quit"
            );
            SlashOutcome::Continue
        }
        "tools" => {
            for name in agent.tools().names_for_mode(agent.mode()) {
                println!("  {name}");
            }
            SlashOutcome::Continue
        }
        "models" => {
            for entry in loom_model::catalog::static_catalog() {
                println!("  {:<12} {:<28} {}", entry.provider, entry.id, entry.description);
            }
            SlashOutcome::Continue
        }
        "providers" => {
            for d in loom_model::list_drivers() {
                println!("  {:<12} {}", d.id, d.name);
            }
            SlashOutcome::Continue
        }
        "current-model" => {
            println!("mode: {}", agent.mode());
            SlashOutcome::Continue
        }
        other => {
            println!("Unknown command: /{other} (try /help)");
            SlashOutcome::Continue
        }
    }
}

enum TurnOutcome {
    Completed(String),
    Interrupted,
    DoubleInterrupt,
}

/// Window in which a second Ctrl-C after an interrupted turn exits the
/// process instead of just cancelling the next turn.
const DOUBLE_INTERRUPT_WINDOW: Duration = Duration::from_secs(2);

async fn run_turn_interactive(
    agent: &mut Agent,
    input: &str,
    format: OutputFormatArg,
    store: Option<&SessionStore>,
    session_id: &str,
    last_interrupt: &mut Option<Instant>,
) -> anyhow::Result<TurnOutcome> {
    if let Some(at) = last_interrupt {
        if at.elapsed() < DOUBLE_INTERRUPT_WINDOW {
            // A fresh turn is starting within the window; the window no
            // longer applies to it.
            *last_interrupt = None;
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<AgentEvent>(256);
    let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
    let mut cancel_tx = Some(cancel_tx);

    let submit = agent.submit_with_cancel(input, tx, cancel_rx);
    tokio::pin!(submit);

    let mut renderer = Renderer::new(format);
    let mut final_text = String::new();
    let mut aborted = false;

    loop {
        tokio::select! {
            res = &mut submit => {
                res?;
                while let Ok(ev) = rx.try_recv() {
                    if matches!(ev, AgentEvent::Aborted { .. }) {
                        aborted = true;
                    }
                    record_agent_event(store, session_id, &ev);
                    renderer.render(&ev, &mut final_text);
                }
                break;
            }
            Some(ev) = rx.recv() => {
                if matches!(ev, AgentEvent::Aborted { .. }) {
                    aborted = true;
                }
                record_agent_event(store, session_id, &ev);
                renderer.render(&ev, &mut final_text);
            }
            _ = tokio::signal::ctrl_c() => {
                if let Some(tx) = cancel_tx.take() {
                    let _ = tx.send(());
                    println!("\n(interrupted — press Ctrl-C again within 2s to exit)");
                } else {
                    // Already cancelling; a second press means exit now.
                    return Ok(TurnOutcome::DoubleInterrupt);
                }
            }
        }
    }
    renderer.finish();

    if aborted {
        *last_interrupt = Some(Instant::now());
        Ok(TurnOutcome::Interrupted)
    } else {
        Ok(TurnOutcome::Completed(final_text))
    }
}

// ── Rendering ────────────────────────────────────────────────────────────────

struct Renderer {
    format: OutputFormatArg,
}

impl Renderer {
    fn new(format: OutputFormatArg) -> Self {
        Self { format }
    }

    fn render(&mut self, event: &AgentEvent, final_text: &mut String) {
        match self.format {
            OutputFormatArg::Json => self.render_json(event),
            OutputFormatArg::Plain => self.render_plain(event, final_text, false),
            OutputFormatArg::Rich => self.render_plain(event, final_text, true),
        }
    }

    fn render_plain(&self, event: &AgentEvent, final_text: &mut String, rich: bool) {
        match event {
            AgentEvent::TextDelta(delta) => {
                print!("{delta}");
                final_text.push_str(delta);
                std::io::stdout().flush().ok();
            }
            AgentEvent::ToolCallStarted(call) => {
                if rich {
                    println!("\n\x1b[2m→ {}({})\x1b[0m", call.name, call.args);
                } else {
                    println!("\n[tool call] {}({})", call.name, call.args);
                }
            }
            AgentEvent::ToolCallFinished { tool_name, is_error, .. } => {
                let label = if *is_error { "failed" } else { "ok" };
                if rich {
                    println!("\x1b[2m← {tool_name} [{label}]\x1b[0m");
                } else {
                    println!("[tool result] {tool_name} [{label}]");
                }
            }
            AgentEvent::ContextCompacted { tokens_before, tokens_after } => {
                println!("\n[context compacted: {tokens_before} → {tokens_after} tokens]");
            }
            AgentEvent::Error(msg) => {
                eprintln!("\n[error] {msg}");
            }
            AgentEvent::Aborted { partial_text } => {
                if !partial_text.is_empty() {
                    final_text.push_str(partial_text);
                }
            }
            AgentEvent::TurnComplete
            | AgentEvent::TextComplete(_)
            | AgentEvent::ThinkingDelta(_)
            | AgentEvent::ThinkingComplete(_)
            | AgentEvent::TokenUsage { .. }
            | AgentEvent::TodoUpdate(_)
            | AgentEvent::ModeChanged(_)
            | AgentEvent::Question { .. }
            | AgentEvent::QuestionAnswer { .. } => {}
        }
    }

    fn render_json(&self, event: &AgentEvent) {
        let value = match event {
            AgentEvent::TextDelta(d) => serde_json::json!({"type": "text_delta", "text": d}),
            AgentEvent::TextComplete(t) => serde_json::json!({"type": "text_complete", "text": t}),
            AgentEvent::ToolCallStarted(call) => {
                serde_json::json!({"type": "tool_call", "name": call.name, "args": call.args})
            }
            AgentEvent::ToolCallFinished { tool_name, output, is_error, .. } => {
                serde_json::json!({"type": "tool_result", "name": tool_name, "output": output, "is_error": is_error})
            }
            AgentEvent::ContextCompacted { tokens_before, tokens_after } => {
                serde_json::json!({"type": "compacted", "before": tokens_before, "after": tokens_after})
            }
            AgentEvent::Error(msg) => serde_json::json!({"type": "error", "message": msg}),
            AgentEvent::Aborted { partial_text } => {
                serde_json::json!({"type": "aborted", "partial_text": partial_text})
            }
            AgentEvent::TurnComplete => serde_json::json!({"type": "turn_complete"}),
            _ => return,
        };
        println!("{value}");
    }

    fn finish(&mut self) {
        if matches!(self.format, OutputFormatArg::Plain | OutputFormatArg::Rich) {
            println!();
        }
    }
}

// ── Persistence ──────────────────────────────────────────────────────────────

fn record_user_turn(store: Option<&SessionStore>, session_id: &str, text: &str) {
    let Some(store) = store else { return };
    let event = Event::new(session_id, Role::User, EventPayload::Text { text: text.to_string() });
    if let Err(e) = store.append_event("loom", "local", session_id, &event) {
        tracing::warn!(error = %e, "failed to persist user turn");
    }
}

fn record_assistant_turn(store: Option<&SessionStore>, session_id: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    let Some(store) = store else { return };
    let event = Event::new(session_id, Role::Model, EventPayload::Text { text: text.to_string() });
    if let Err(e) = store.append_event("loom", "local", session_id, &event) {
        tracing::warn!(error = %e, "failed to persist assistant turn");
    }
}

/// Persists the events the Event model (spec.md §3) requires a durable log
/// to carry beyond plain user/assistant text: tool calls, tool results,
/// thinking blocks, and compaction summaries. Called for every event a
/// turn emits, in addition to `record_user_turn`/`record_assistant_turn`.
fn record_agent_event(store: Option<&SessionStore>, session_id: &str, event: &AgentEvent) {
    let Some(store) = store else { return };
    let payload = match event {
        AgentEvent::ToolCallStarted(call) => EventPayload::ToolCall {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call
                .args
                .as_object()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect(),
        },
        AgentEvent::ToolCallFinished { call_id, is_error, output, .. } => EventPayload::ToolResult {
            call_id: call_id.clone(),
            success: !is_error,
            output: serde_json::Value::String(output.clone()),
        },
        AgentEvent::ThinkingComplete(text) => EventPayload::Thinking { text: text.clone() },
        AgentEvent::ContextCompacted { tokens_before, tokens_after } => EventPayload::CompactionSummary {
            summary: format!("compacted {tokens_before} → {tokens_after} tokens"),
            replaced_count: 0,
        },
        _ => return,
    };
    let record = Event::new(session_id, Role::Model, payload);
    if let Err(e) = store.append_event("loom", "local", session_id, &record) {
        tracing::warn!(error = %e, "failed to persist agent event");
    }
}

// ── Logging ──────────────────────────────────────────────────────────────────

/// Initialise tracing. Always writes to stderr so stdout stays clean for the
/// REPL transcript and `--output-format json` consumers; `LOOM_LOG_FILE`
/// redirects to a file instead for interactive debugging sessions.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if let Ok(log_path) = std::env::var("LOOM_LOG_FILE") {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_ansi(false).with_writer(std::sync::Mutex::new(file)))
                .with(filter)
                .try_init();
            return;
        }
    }

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
