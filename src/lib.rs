//! Parley: a streaming, tool-using conversation orchestrator for LLM backends.
//!
//! Parley sits between a caller and a model that streams its replies as
//! events. It assembles those events into messages, keeps the request inside a
//! token budget with a stable prompt-cache point, runs requested tools in
//! parallel, and loops until the model finishes its turn. Turns can be
//! canceled at any point without leaving a tool use unanswered in history.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley::prelude::*;
//!
//! # async fn example(client: Arc<dyn ModelStreamClient>) -> parley::error::Result<()> {
//! let config = OrchestratorConfig::builder()
//!     .model_id("anthropic/claude-sonnet-4")
//!     .build();
//! let collaborators = Collaborators::builder().client(client).build();
//! let orchestrator = ConversationOrchestrator::new(config, collaborators)?;
//!
//! if let TurnOutcome::Completed { message } = orchestrator.submit("Hello!").await? {
//!     println!("{}", message.text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod assembly;
pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod persistence;
pub mod prelude;
pub mod pricing;
pub mod provider;
pub mod tools;
pub mod types;
