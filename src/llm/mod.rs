//! LLM provider clients and structured reasoning
//!
//! - [`LLMClient`] - the provider seam every model call goes through
//! - [`Reasoner`] - schema-validated `invoke(prompt, schema)` plus token accounting
//! - [`prompts`] - every prompt the crate sends, and the matching output schemas
//!
//! # Supported Providers
//!
//! Enable providers via Cargo features:
//! - `openai` - OpenAI API and compatible endpoints
//! - `ollama` - Local Ollama server

/// Core LLM client trait and provider selection.
pub mod client;
pub mod prompts;
pub mod reasoning;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{LLMClient, LLMResponse, Provider, TokenUsage, ToolCall, ToolDefinition};
pub use prompts::Prompt;
pub use reasoning::{FieldKind, OutputSchema, Reasoner};
