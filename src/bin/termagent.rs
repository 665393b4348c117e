//! termagent CLI — interactive terminal coding agent.
//!
//! Wraps [`termagent::Orchestrator`] with a REPL: session persistence,
//! rollback, and permission prompts live in the library; this binary only
//! does argument parsing, terminal I/O, and event-to-ANSI rendering.
//!
//! Run:
//!   ANTHROPIC_API_KEY=sk-... termagent
//!   ANTHROPIC_API_KEY=sk-... termagent --model claude-opus-4-20250514
//!   ANTHROPIC_API_KEY=sk-... termagent --skills ./skills --yolo
//!
//! Commands:
//!   /quit, /exit      Exit the agent
//!   /clear            Start a new, empty session
//!   /sessions         List saved sessions
//!   /resume <id>      Resume a saved session
//!   /rollback <n>     Roll the conversation (and any edited files) back to turn n

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use termagent::config::Config;
use termagent::lsp::{LSPManager, LspServerConfig};
use termagent::permission::{PermissionConfig, PermissionDecision, PermissionGate};
use termagent::provider::{
    AnthropicProvider, ApiProtocol, AzureOpenAiProvider, BedrockProvider, GoogleProvider,
    GoogleVertexProvider, OpenAiCompatProvider, OpenAiResponsesProvider,
};
use termagent::session::SessionStore;
use termagent::skills::SkillSet;
use termagent::snapshot::SnapshotStore;
use termagent::token_limiter::TokenLimiter;
use termagent::tools::{default_tools_with, TodoStore, ToolRegistryOptions, UsefulInfoStore};
use termagent::{Agent, AgentEvent, AgentMessage, Message, Orchestrator, StreamDelta, Usage};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";

const SYSTEM_PROMPT: &str = r#"You are a coding assistant working in the user's terminal.
You have access to the filesystem and shell. Be direct and concise.
When the user asks you to do something, do it — don't just explain how.
Use tools proactively: read files to understand context, run commands to verify your work.
After making changes, run tests or verify the result when appropriate."#;

#[derive(Parser, Debug)]
#[command(name = "termagent", version, about = "Interactive terminal coding agent")]
struct Cli {
    /// Override the configured model for this run.
    #[arg(long)]
    model: Option<String>,
    /// Directory of SKILL.md files to load (repeatable).
    #[arg(long = "skills")]
    skill_dirs: Vec<String>,
    /// Bypass confirmation prompts for non-destructive tool calls.
    #[arg(long)]
    yolo: bool,
    /// Resume a previously saved session by id instead of starting fresh.
    #[arg(long)]
    resume: Option<String>,
    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "termagent=warn",
        1 => "termagent=info",
        _ => "termagent=debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Reads one line from stdin without holding the lock across calls, so it
/// can be called both from the REPL's main loop and from a tool-call
/// confirmation prompt raised mid-turn without deadlocking on the same
/// process-wide stdin lock.
fn read_stdin_line() -> Option<String> {
    let mut buf = String::new();
    match io::stdin().lock().read_line(&mut buf) {
        Ok(0) => None,
        Ok(_) => Some(buf.trim_end().to_string()),
        Err(_) => None,
    }
}

/// Confirmation prompt for a tool call the permission gate flagged. Blocks
/// on stdin — acceptable here since the agent loop this runs inside is
/// itself driven synchronously from the REPL's single input thread.
fn confirm_tool_call(tool: &str, arg: &str) -> PermissionDecision {
    print!("{YELLOW}  ? {tool}: {} — allow? [y/N/a=always]{RESET} ", truncate(arg, 120));
    io::stdout().flush().ok();
    match read_stdin_line().as_deref().map(str::trim) {
        Some("y") | Some("Y") => PermissionDecision::ApproveOnce,
        Some("a") | Some("A") => PermissionDecision::ApproveAlways,
        _ => PermissionDecision::Reject,
    }
}

/// Blocking stdin prompt for `askuser-ask_question`. Same single-input-thread
/// assumption as `confirm_tool_call`.
fn ask_user(question: String, options: Vec<String>) -> String {
    if options.is_empty() {
        print!("{CYAN}  ? {question}{RESET} ");
    } else {
        print!("{CYAN}  ? {question} [{}]{RESET} ", options.join("/"));
    }
    io::stdout().flush().ok();
    read_stdin_line().unwrap_or_default()
}

/// Build an LSPManager from the configured language servers. Left empty
/// (no servers registered, but still fully usable for extension detection)
/// unless `editor_integration_enabled` opts in.
fn build_lsp_manager(config: &Config) -> LSPManager {
    let mut lsp = LSPManager::new(std::env::current_dir().unwrap_or_default());
    if config.editor_integration_enabled {
        for (language, spec) in &config.lsp_servers {
            lsp.register_server(
                language.clone(),
                LspServerConfig {
                    command: spec.command.clone(),
                    args: spec.args.clone(),
                    needs_project_root_arg: spec.needs_project_root_arg,
                },
            );
        }
    }
    lsp
}

async fn build_agent(
    config: &Config,
    api_key: &str,
    skills: SkillSet,
    permissions: Arc<PermissionGate>,
    config_handle: Arc<tokio::sync::Mutex<Config>>,
) -> Agent {
    let agent = match config.provider {
        ApiProtocol::AnthropicMessages => Agent::new(AnthropicProvider),
        ApiProtocol::OpenAiCompletions => Agent::new(OpenAiCompatProvider),
        ApiProtocol::OpenAiResponses => Agent::new(OpenAiResponsesProvider),
        ApiProtocol::AzureOpenAiResponses => Agent::new(AzureOpenAiProvider),
        ApiProtocol::GoogleGenerativeAi => Agent::new(GoogleProvider),
        ApiProtocol::GoogleVertex => Agent::new(GoogleVertexProvider),
        ApiProtocol::BedrockConverseStream => Agent::new(BedrockProvider),
    };
    let skills_for_tools = Arc::new(skills.clone());
    let lsp = Arc::new(build_lsp_manager(config));
    let todo_store = Arc::new(TodoStore::new());
    let useful_info_store = Arc::new(UsefulInfoStore::new());
    let cwd = std::env::current_dir().unwrap_or_default();
    let system_prompt = termagent::prompt_compose::compose_system_prompt(SYSTEM_PROMPT, &cwd).await;

    agent
        .with_system_prompt(system_prompt)
        .with_model(&config.model)
        .with_api_key(api_key)
        .with_skills(skills)
        .with_todo_store(todo_store.clone())
        .with_useful_info_store(useful_info_store.clone())
        .with_tools(default_tools_with(ToolRegistryOptions {
            lsp: Some(lsp),
            skills: Some(skills_for_tools),
            ask_user: Some(Arc::new(ask_user)),
            todo_store: Some(todo_store),
            useful_info_store: Some(useful_info_store),
            ..Default::default()
        }))
        .with_permissions(PermissionConfig {
            gate: permissions,
            confirm: Arc::new(confirm_tool_call),
            persist_always_approved: Some(Arc::new(move |entry| {
                let config_handle = config_handle.clone();
                tokio::spawn(async move {
                    let mut config = config_handle.lock().await;
                    if let Err(e) = config.add_always_approved(entry).await {
                        tracing::warn!("failed to persist always-approved entry: {}", e);
                    }
                });
            })),
        })
        .with_token_limiter(Arc::new(TokenLimiter::default()))
}

fn data_dir() -> std::path::PathBuf {
    directories::ProjectDirs::from("dev", "yolog", "termagent")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from(".termagent"))
}

fn print_banner(config: &Config, skills: &SkillSet) {
    println!("\n{BOLD}{CYAN}  termagent{RESET} {DIM}— terminal coding agent{RESET}");
    println!("{DIM}  Type /quit to exit, /clear for a new session{RESET}\n");
    println!("{DIM}  model:    {}{RESET}", config.model);
    if !skills.is_empty() {
        println!("{DIM}  skills:   {} loaded{RESET}", skills.len());
    }
    println!(
        "{DIM}  cwd:      {}{RESET}\n",
        std::env::current_dir().unwrap_or_default().display()
    );
}

fn print_usage(usage: &Usage) {
    if usage.input > 0 || usage.output > 0 {
        println!(
            "\n{DIM}  tokens: {} in / {} out{RESET}",
            usage.input, usage.output
        );
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[..max]
    }
}

fn summarize_tool_call(tool_name: &str, args: &serde_json::Value) -> String {
    match tool_name {
        "terminal-execute" => {
            let cmd = args.get("command").and_then(|v| v.as_str()).unwrap_or("...");
            format!("$ {}", truncate(cmd, 80))
        }
        "filesystem-read" => {
            let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("?");
            format!("read {path}")
        }
        "filesystem-create" => {
            let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("?");
            format!("write {path}")
        }
        "filesystem-edit_search" | "filesystem-edit" => {
            let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("?");
            format!("edit {path}")
        }
        "filesystem-undo" => {
            let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("?");
            format!("undo {path}")
        }
        "filesystem-list" => {
            let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
            format!("ls {path}")
        }
        "ace-text_search" | "codebase-search" => {
            let pat = args
                .get("pattern")
                .or_else(|| args.get("query"))
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            format!("search '{}'", truncate(pat, 60))
        }
        other => other.to_string(),
    }
}

async fn drain_turn(mut rx: tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) {
    let mut last_usage = Usage::default();
    let mut in_text = false;

    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::ToolExecutionStart { tool_name, args, .. } => {
                if in_text {
                    println!();
                    in_text = false;
                }
                print!("{YELLOW}  ▶ {}{RESET}", summarize_tool_call(&tool_name, &args));
                io::stdout().flush().ok();
            }
            AgentEvent::ToolExecutionEnd { is_error, .. } => {
                if is_error {
                    println!(" {RED}✗{RESET}");
                } else {
                    println!(" {GREEN}✓{RESET}");
                }
            }
            AgentEvent::MessageUpdate {
                delta: StreamDelta::Text { delta },
                ..
            } => {
                if !in_text {
                    println!();
                    in_text = true;
                }
                print!("{delta}");
                io::stdout().flush().ok();
            }
            AgentEvent::AgentEnd { messages } => {
                for msg in messages.iter().rev() {
                    if let AgentMessage::Llm(Message::Assistant { usage, .. }) = msg {
                        last_usage = usage.clone();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    if in_text {
        println!();
    }
    print_usage(&last_usage);
    println!();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load().await.unwrap_or_default();
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if config.model.is_empty() {
        config.model = "claude-sonnet-4-20250514".to_string();
    }

    let api_key_env = if config.api_key_env.is_empty() {
        "ANTHROPIC_API_KEY"
    } else {
        &config.api_key_env
    };
    let api_key = std::env::var(api_key_env)
        .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
        .or_else(|_| std::env::var("API_KEY"))
        .unwrap_or_else(|_| panic!("set {api_key_env} (or ANTHROPIC_API_KEY / API_KEY)"));

    let skills = if cli.skill_dirs.is_empty() {
        SkillSet::empty()
    } else {
        SkillSet::load(&cli.skill_dirs).expect("failed to load skills")
    };

    let data_dir = data_dir();
    let sessions = Arc::new(SessionStore::new(data_dir.join("sessions")));
    let snapshots = Arc::new(SnapshotStore::new(data_dir.join("snapshots")));
    let permissions = Arc::new(PermissionGate::new(cli.yolo));

    let config_handle = Arc::new(tokio::sync::Mutex::new(config.clone()));
    let agent = build_agent(
        &config,
        &api_key,
        skills.clone(),
        permissions.clone(),
        config_handle,
    )
    .await;
    let mut orch = Orchestrator::new(agent, sessions, snapshots, permissions);

    match &cli.resume {
        Some(id) => {
            if let Err(e) = orch.load_session(id).await {
                eprintln!("{RED}could not resume session {id}: {e}{RESET}");
                orch.start_new_session(termagent::now_ms());
            }
        }
        None => orch.start_new_session(termagent::now_ms()),
    }

    print_banner(&config, &skills);

    loop {
        print!("{BOLD}{GREEN}> {RESET}");
        io::stdout().flush().ok();

        let line = match read_stdin_line() {
            Some(l) => l,
            None => break,
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/clear" => {
                orch.start_new_session(termagent::now_ms());
                println!("{DIM}  (new session started){RESET}\n");
                continue;
            }
            "/sessions" => {
                match orch.pending_queue().is_empty() {
                    true => {}
                    false => println!("{DIM}  (a message is queued for the current turn){RESET}"),
                }
                continue;
            }
            s if s.starts_with("/resume ") => {
                let id = s.trim_start_matches("/resume ").trim();
                if let Err(e) = orch.load_session(id).await {
                    println!("{RED}  could not resume {id}: {e}{RESET}\n");
                } else {
                    println!("{DIM}  (resumed session {id}){RESET}\n");
                }
                continue;
            }
            s if s.starts_with("/rollback ") => {
                let turn: usize = match s.trim_start_matches("/rollback ").trim().parse() {
                    Ok(n) => n,
                    Err(_) => {
                        println!("{RED}  usage: /rollback <turn number>{RESET}\n");
                        continue;
                    }
                };
                match orch.rollback_to_turn(turn).await {
                    Ok(restored) => {
                        println!(
                            "{DIM}  (rolled back to turn {turn}, restored {} file(s)){RESET}\n",
                            restored.len()
                        );
                    }
                    Err(e) => println!("{RED}  rollback failed: {e}{RESET}\n"),
                }
                continue;
            }
            _ => {}
        }

        match orch.submit(input).await {
            Ok(rx) => drain_turn(rx).await,
            Err(e) => println!("{RED}  {e}{RESET}\n"),
        }
    }

    println!("\n{DIM}  bye{RESET}\n");
}
