//! # Research Tools
//!
//! Adapters for the external search-tool service used by the Search and
//! Novelty Checker stages.
//!
//! ## Modules
//!
//! - `gateway` - health probe, concurrent web/local search, prompt formatting

pub mod gateway;

pub use gateway::{
    HttpToolBackend, ToolBackend, ToolConfig, ToolError, ToolGateway, ToolOptions, ToolOutcome,
    ToolRequest, ToolResponse, ToolTask, DEFAULT_TOOL_URL,
};
