//! # Taskweave
//!
//! An LLM-driven task orchestration engine built with Rust.
//!
//! ## Architecture
//!
//! Taskweave decomposes a user request into a bounded plan, executes the
//! plan's steps against a tool registry, judges whether the artifacts meet
//! the plan's success criteria, and either completes, replans, or suspends
//! to ask the user a clarifying question - all within strict budgets and
//! with resumable semantics across asynchronous replies.
//!
//! - **LLM layer** (`llm`): provider trait + OpenAI-compatible client
//! - **Tools** (`tools`): uniform tool contract, registry, dispatcher
//! - **Orchestrator** (`orchestrator`): Planner / Executor / Judge stages
//!   driven by the PLAN->ACT->JUDGE state machine with ASK_USER suspension
//! - **Sessions** (`session`): message classification and session-bound
//!   resume
//! - **Events** (`events`): the eight-variant stream consumed by the UI
//! - **Telemetry** (`telemetry`): JSONL sink with replay-dedup hashes
//!
//! ## Design Principles
//!
//! 1. **Explicit dependencies**: the registry, session map, and telemetry
//!    sink are constructed once and passed in, never looked up globally
//! 2. **Tagged step types**: the Executor switches on a sum type, not on
//!    runtime attribute checks
//! 3. **Fail into data**: tool and stage failures become values the Judge
//!    can see, not exceptions that unwind the machine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskweave::config::Config;
//! use taskweave::events::EventSender;
//! use taskweave::llm::OpenAiCompatProvider;
//! use taskweave::orchestrator::Orchestrator;
//! use taskweave::session::SessionManager;
//! use taskweave::telemetry::Telemetry;
//! use taskweave::tools;
//!
//! #[tokio::main]
//! async fn main() -> taskweave::Result<()> {
//!     let config = Config::from_env()?;
//!     let provider = Arc::new(OpenAiCompatProvider::new(&config.llm)?);
//!     let registry = Arc::new(tools::builtin_registry(&config));
//!     let telemetry = Arc::new(Telemetry::open(&config.telemetry_path)?);
//!
//!     let orchestrator = Arc::new(Orchestrator::new(
//!         provider.clone(),
//!         registry,
//!         telemetry.clone(),
//!         &config,
//!     ));
//!     let sessions = SessionManager::new(orchestrator, provider, telemetry, &config);
//!
//!     let (events, mut rx) = EventSender::channel(64);
//!     sessions
//!         .handle_message("demo", "What time is it?", None, &events)
//!         .await?;
//!     while let Ok(event) = rx.try_recv() {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```

// Configuration from environment variables
pub mod config;

// Error types
pub mod error;

// UI event protocol
pub mod events;

// LLM provider abstraction and client
pub mod llm;

// Planner / Executor / Judge and the state machine
pub mod orchestrator;

// Smart-vs-simple pre-router
pub mod router;

// Session manager and message routing
pub mod session;

// JSONL telemetry sink
pub mod telemetry;

// Tool contract, registry, and built-in tools
pub mod tools;

// Re-export commonly used items
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
