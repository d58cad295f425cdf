//! Library crate for an autonomous incident-investigation agent: an LLM
//! drives a bounded loop that reads telemetry, proposes remediations, and
//! composes pull requests, suspending for human approval before anything
//! destructive runs.

pub mod approval;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod guardrails;
pub mod integrations;
pub mod llm;
pub mod pr_engine;
pub mod timeout;
pub mod tools;
pub mod types;

pub use engine::AgentLoop;
pub use error::{AgentError, TimeoutError};
pub use events::{AgentEvent, EventBus};
pub use tools::{RiskTier, Tool, ToolBuilder, ToolExecutor, ToolRegistry};
pub use types::{AgentConfig, AgentState, Message, Role, RunStatus, ToolCall, ToolContext, ToolDefinition, ToolResult};
