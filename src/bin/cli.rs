//! Taskweave CLI
//!
//! A small terminal front end: reads user messages, routes them through the
//! session manager, and renders the event stream (chat content to stdout,
//! side-panel events to stderr).

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use taskweave::config::Config;
use taskweave::events::{AgentEvent, EventSender};
use taskweave::llm::OpenAiCompatProvider;
use taskweave::orchestrator::Orchestrator;
use taskweave::session::SessionManager;
use taskweave::telemetry::Telemetry;
use taskweave::{tools, VERSION};

#[derive(Parser)]
#[command(
    name = "taskweave",
    author = "Taskweave Contributors",
    version = VERSION,
    about = "LLM-driven task orchestration engine",
    long_about = None
)]
struct Cli {
    /// Session ID to attach to (a fresh one is generated when omitted)
    #[arg(long)]
    session: Option<String>,

    /// Process a single message and exit instead of the interactive loop
    #[arg(long, short)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskweave=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.validate(true)?;

    let provider = Arc::new(OpenAiCompatProvider::new(&config.llm)?);
    let registry = Arc::new(tools::builtin_registry(&config));
    let telemetry = Arc::new(Telemetry::open(&config.telemetry_path)?);
    let orchestrator = Arc::new(Orchestrator::new(
        provider.clone(),
        registry,
        telemetry.clone(),
        &config,
    ));
    let sessions = SessionManager::new(orchestrator, provider, telemetry, &config);

    let session_id = cli
        .session
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Some(message) = cli.message {
        process_one(&sessions, &session_id, &message).await?;
        return Ok(());
    }

    println!("taskweave {} - session {}", VERSION, session_id);
    println!("Type a request, or 'exit' to quit.\n");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        process_one(&sessions, &session_id, line).await?;
    }

    Ok(())
}

/// Run one message through the engine, rendering events as they arrive
async fn process_one(
    sessions: &SessionManager,
    session_id: &str,
    message: &str,
) -> anyhow::Result<()> {
    let (events, mut rx) = EventSender::channel(64);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::AssistantContent { delta } => {
                    print!("{}", delta);
                    let _ = io::stdout().flush();
                }
                AgentEvent::Status { message } => eprintln!("  [status] {}", message),
                AgentEvent::ToolTrace {
                    tool,
                    action,
                    result,
                } => eprintln!("  [tool] {} {}: {}", tool, action, result),
                AgentEvent::Debug { level, message } => eprintln!("  [{}] {}", level, message),
                AgentEvent::AskUserOpen { question, hints, .. } => {
                    println!();
                    eprintln!("  [question] {} (expecting: {})", question, hints);
                }
                AgentEvent::AskUserClose { .. } => {}
                AgentEvent::FinalAnswer { .. } => println!(),
                AgentEvent::Error { message, .. } => eprintln!("  [error] {}", message),
            }
        }
    });

    let outcome = sessions
        .handle_message(session_id, message, None, &events)
        .await;
    drop(events);
    printer.await.ok();

    match outcome {
        Ok(_) => Ok(()),
        // Busy/mismatch messages were already rendered as error events
        Err(e) if e.is_client_error() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
