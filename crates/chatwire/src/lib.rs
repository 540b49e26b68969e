//! A common message and tool-call model over several LLM chat APIs.
//!
//! Each [`providers::base::Provider`] translates the shared [`models::message::Message`]
//! shape to and from one vendor's wire format: OpenAI-compatible chat
//! completions, Anthropic Messages, Google Gemini and Ollama.
pub mod configuration;
pub mod errors;
pub mod history;
pub mod models;
pub mod providers;
