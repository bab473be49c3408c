//! # Inquiry Core
//!
//! The engine of the Inquiry research assistant: a fixed pipeline of
//! language-model agents with a bounded self-restart loop, human revisions
//! and per-stage iteration history.
//!
//! ## Architecture
//!
//! - `llm/` - Streaming completion backends (local OpenAI-compatible, Gemini)
//! - `models` - Backend provider configuration
//! - `skills/` - One stage handler per agent, prompt templates and renderer
//! - `state/` - Pipeline state, history, snapshot codec and SQLite store
//! - `swarm/` - Stage graph, restart controller and the coordinator
//! - `tools/` - External web/local search gateway
//!
//! ## Usage
//!
//! ```rust,ignore
//! use inquiry_core::swarm::{Coordinator, CoordinatorConfig};
//!
//! let coordinator = Coordinator::new(CoordinatorConfig::default())?;
//! let state = coordinator.start("Ocean acidification").await?;
//! println!("{}", inquiry_core::state::render_report(&state));
//! ```

pub mod llm;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;
pub mod tools;
