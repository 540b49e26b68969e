//! These models represent the objects passed between a caller and the providers
//!
//! Every vendor has its own idea of what a message, a tool call and a tool result
//! look like:
//! - openai chat completions carry tool calls beside a flat string and answer tools in a `tool` turn
//! - anthropic messages are lists of typed content blocks (`text`, `tool_use`, `tool_result`)
//! - gemini replays a whole session of `parts` and never assigns tool call ids
//! - ollama mirrors openai but passes arguments as native maps and has no ids either
//!
//! Decoded responses stay in their vendor shape and are read through the
//! [`message::ChatMessage`] trait; stored conversations use the block based
//! [`crate::history::HistoryMessage`].
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
