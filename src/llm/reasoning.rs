//! Structured reasoning over an [`LLMClient`].
//!
//! [`Reasoner::invoke`] is the one entry point every component uses to get a
//! schema-conformant JSON object back from the model. Transport failures map to
//! [`AppError::Reasoning`], malformed or incomplete results to
//! [`AppError::Schema`]; either one is an agent failure for the caller.

use crate::llm::client::{LLMClient, LLMResponse, TokenUsage, ToolDefinition};
use crate::llm::prompts::Prompt;
use crate::types::{AppError, Result, UsageTotals};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============= Output Schemas =============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Array,
    Object,
    Any,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }

    fn label(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        }
    }
}

/// Expected shape of a structured result: a JSON object with typed keys.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    required: Vec<(&'static str, FieldKind)>,
    optional: Vec<(&'static str, FieldKind)>,
}

impl OutputSchema {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            required: Vec::new(),
            optional: Vec::new(),
        }
    }

    pub fn required(mut self, key: &'static str, kind: FieldKind) -> Self {
        self.required.push((key, kind));
        self
    }

    pub fn optional(mut self, key: &'static str, kind: FieldKind) -> Self {
        self.optional.push((key, kind));
        self
    }

    /// Checks that `value` is an object carrying every required key with the
    /// right JSON type. Optional keys are only type-checked when present and
    /// non-null.
    pub fn validate(&self, value: &Value) -> Result<()> {
        let object = value.as_object().ok_or_else(|| self.violation("expected a JSON object"))?;

        for (key, kind) in &self.required {
            match object.get(*key) {
                None | Some(Value::Null) => {
                    return Err(self.violation(&format!("missing required key '{}'", key)))
                }
                Some(v) if !kind.matches(v) => {
                    return Err(self.violation(&format!(
                        "key '{}' should be {}",
                        key,
                        kind.label()
                    )))
                }
                Some(_) => {}
            }
        }

        for (key, kind) in &self.optional {
            if let Some(v) = object.get(*key) {
                if !v.is_null() && !kind.matches(v) {
                    return Err(self.violation(&format!(
                        "key '{}' should be {}",
                        key,
                        kind.label()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Key list appended to prompts so the model knows the expected shape.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self
            .required
            .iter()
            .map(|(k, kind)| format!("\"{}\": {}", k, kind.label()))
            .collect();
        parts.extend(
            self.optional
                .iter()
                .map(|(k, kind)| format!("\"{}\": {} (optional)", k, kind.label())),
        );
        format!("{{ {} }}", parts.join(", "))
    }

    fn violation(&self, message: &str) -> AppError {
        AppError::Schema {
            schema: self.name.to_string(),
            message: message.to_string(),
        }
    }
}

// ============= JSON extraction =============

/// Pulls a JSON object out of model text: the whole body, a fenced block, or
/// the outermost `{ ... }` span, in that order.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(body[..end].trim()) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

// ============= Reasoner =============

#[derive(Debug, Default)]
struct UsageCounters {
    analyze_input: AtomicU64,
    analyze_output: AtomicU64,
    coordinate_input: AtomicU64,
    coordinate_output: AtomicU64,
}

/// Schema-validated reasoning calls plus run-wide token accounting.
pub struct Reasoner {
    client: Arc<dyn LLMClient>,
    usage: UsageCounters,
}

impl Reasoner {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            usage: UsageCounters::default(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// `invoke(prompt, schema) -> structured result | failure`
    pub async fn invoke(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value> {
        let user = format!(
            "{}\n\nRespond with a single JSON object of the form {}.",
            prompt.user,
            schema.describe()
        );
        let response = self.client.generate_with_system(&prompt.system, &user).await?;
        self.record(response.usage, false);

        let value = extract_json(&response.content).ok_or_else(|| AppError::Schema {
            schema: schema.name.to_string(),
            message: "no JSON object in response".to_string(),
        })?;
        schema.validate(&value)?;
        tracing::debug!(schema = schema.name, "structured result accepted");
        Ok(value)
    }

    /// Coordinating exchange: tool calls come back unvalidated.
    pub async fn coordinate(
        &self,
        prompt: &Prompt,
        tools: &[ToolDefinition],
    ) -> Result<LLMResponse> {
        let response = self
            .client
            .generate_with_tools(&prompt.system, &prompt.user, tools)
            .await?;
        self.record(response.usage, true);
        Ok(response)
    }

    fn record(&self, usage: Option<TokenUsage>, coordinate: bool) {
        let Some(usage) = usage else { return };
        let (input, output) = if coordinate {
            (&self.usage.coordinate_input, &self.usage.coordinate_output)
        } else {
            (&self.usage.analyze_input, &self.usage.analyze_output)
        };
        input.fetch_add(usage.input, Ordering::Relaxed);
        output.fetch_add(usage.output, Ordering::Relaxed);
    }

    pub fn usage(&self) -> UsageTotals {
        let analyze_input = self.usage.analyze_input.load(Ordering::Relaxed);
        let analyze_output = self.usage.analyze_output.load(Ordering::Relaxed);
        let coordinate_input = self.usage.coordinate_input.load(Ordering::Relaxed);
        let coordinate_output = self.usage.coordinate_output.load(Ordering::Relaxed);
        UsageTotals {
            analyze_input,
            analyze_output,
            coordinate_input,
            coordinate_output,
            total_input: analyze_input + coordinate_input,
            total_output: analyze_output + coordinate_output,
        }
    }
}
