//! Per-family parameter allowlists, numeric ranges and payload checks.
//!
//! Unsupported or out-of-range parameters are removed from the request rather
//! than rejected or clamped; unknown fields are logged and dropped.

use serde_json::Value;
use std::ops::RangeInclusive;

use crate::adapter::BackendFamily;
use crate::error::{BridgeError, Result};
use crate::translate::canonical_types::ChatCompletionRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    MaxTokens,
    Temperature,
    TopP,
    TopK,
    Stop,
    PresencePenalty,
    FrequencyPenalty,
    Tools,
    ToolChoice,
    CacheSystem,
}

impl Param {
    pub fn name(self) -> &'static str {
        match self {
            Param::MaxTokens => "max_tokens",
            Param::Temperature => "temperature",
            Param::TopP => "top_p",
            Param::TopK => "top_k",
            Param::Stop => "stop",
            Param::PresencePenalty => "presence_penalty",
            Param::FrequencyPenalty => "frequency_penalty",
            Param::Tools => "tools",
            Param::ToolChoice => "tool_choice",
            Param::CacheSystem => "cache_system",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamRule {
    pub param: Param,
    pub range: Option<RangeInclusive<f64>>,
}

const fn rule(param: Param, range: Option<RangeInclusive<f64>>) -> ParamRule {
    ParamRule { param, range }
}

const CLAUDE_PARAMS: &[ParamRule] = &[
    rule(Param::MaxTokens, Some(1.0..=64000.0)),
    rule(Param::Temperature, Some(0.0..=1.0)),
    rule(Param::TopP, Some(0.0..=1.0)),
    rule(Param::TopK, Some(0.0..=500.0)),
    rule(Param::Stop, None),
    rule(Param::Tools, None),
    rule(Param::ToolChoice, None),
    rule(Param::CacheSystem, None),
];

const LLAMA_PARAMS: &[ParamRule] = &[
    rule(Param::MaxTokens, Some(1.0..=2048.0)),
    rule(Param::Temperature, Some(0.0..=1.0)),
    rule(Param::TopP, Some(0.0..=1.0)),
];

const MISTRAL_PARAMS: &[ParamRule] = &[
    rule(Param::MaxTokens, Some(1.0..=8192.0)),
    rule(Param::Temperature, Some(0.0..=1.0)),
    rule(Param::TopP, Some(0.0..=1.0)),
    rule(Param::TopK, Some(1.0..=200.0)),
    rule(Param::Stop, None),
];

const TITAN_PARAMS: &[ParamRule] = &[
    rule(Param::MaxTokens, Some(1.0..=8192.0)),
    rule(Param::Temperature, Some(0.0..=1.0)),
    rule(Param::TopP, Some(0.0..=1.0)),
    rule(Param::Stop, None),
];

const AI21_PARAMS: &[ParamRule] = &[
    rule(Param::MaxTokens, Some(1.0..=8191.0)),
    rule(Param::Temperature, Some(0.0..=1.0)),
    rule(Param::TopP, Some(0.0..=1.0)),
    rule(Param::Stop, None),
    rule(Param::PresencePenalty, Some(0.0..=5.0)),
    rule(Param::FrequencyPenalty, Some(0.0..=500.0)),
];

const CLAUDE_REQUIRED: &[&str] = &["anthropic_version", "max_tokens", "messages"];
const PROMPT_REQUIRED: &[&str] = &["prompt"];
const TITAN_REQUIRED: &[&str] = &["inputText"];

const CLAUDE_KNOWN: &[&str] = &[
    "anthropic_version",
    "anthropic_beta",
    "max_tokens",
    "messages",
    "system",
    "temperature",
    "top_p",
    "top_k",
    "stop_sequences",
    "tools",
    "tool_choice",
];
const LLAMA_KNOWN: &[&str] = &["prompt", "max_gen_len", "temperature", "top_p"];
const MISTRAL_KNOWN: &[&str] = &["prompt", "max_tokens", "temperature", "top_p", "top_k", "stop"];
const TITAN_KNOWN: &[&str] = &["inputText", "textGenerationConfig"];
const AI21_KNOWN: &[&str] = &[
    "prompt",
    "maxTokens",
    "temperature",
    "topP",
    "stopSequences",
    "presencePenalty",
    "frequencyPenalty",
];

pub fn supported_params(family: BackendFamily) -> &'static [ParamRule] {
    match family {
        BackendFamily::Claude => CLAUDE_PARAMS,
        BackendFamily::Llama => LLAMA_PARAMS,
        BackendFamily::Mistral => MISTRAL_PARAMS,
        BackendFamily::Titan => TITAN_PARAMS,
        BackendFamily::Ai21 => AI21_PARAMS,
    }
}

fn required_fields(family: BackendFamily) -> &'static [&'static str] {
    match family {
        BackendFamily::Claude => CLAUDE_REQUIRED,
        BackendFamily::Titan => TITAN_REQUIRED,
        BackendFamily::Llama | BackendFamily::Mistral | BackendFamily::Ai21 => PROMPT_REQUIRED,
    }
}

fn known_fields(family: BackendFamily) -> &'static [&'static str] {
    match family {
        BackendFamily::Claude => CLAUDE_KNOWN,
        BackendFamily::Llama => LLAMA_KNOWN,
        BackendFamily::Mistral => MISTRAL_KNOWN,
        BackendFamily::Titan => TITAN_KNOWN,
        BackendFamily::Ai21 => AI21_KNOWN,
    }
}

pub fn is_supported(family: BackendFamily, param: Param) -> bool {
    supported_params(family).iter().any(|r| r.param == param)
}

/// True when `param` is supported by `family` and `value` lies in its range.
pub fn accepts(family: BackendFamily, param: Param, value: f64) -> bool {
    supported_params(family)
        .iter()
        .find(|r| r.param == param)
        .is_some_and(|r| r.range.as_ref().map_or(true, |range| range.contains(&value)))
}

/// Copy of `req` holding only what `family` accepts.
pub fn sanitize_request(family: BackendFamily, req: &ChatCompletionRequest) -> ChatCompletionRequest {
    let mut out = req.clone();

    for key in out.extra.keys() {
        tracing::info!(family = %family, field = %key, "Ignoring unknown request field");
    }
    out.extra.clear();

    out.max_tokens = keep_numeric(family, Param::MaxTokens, out.max_tokens, |v| v as f64);
    out.temperature = keep_numeric(family, Param::Temperature, out.temperature, |v| v);
    out.top_p = keep_numeric(family, Param::TopP, out.top_p, |v| v);
    out.top_k = keep_numeric(family, Param::TopK, out.top_k, |v| v as f64);
    out.presence_penalty = keep_numeric(family, Param::PresencePenalty, out.presence_penalty, |v| v);
    out.frequency_penalty =
        keep_numeric(family, Param::FrequencyPenalty, out.frequency_penalty, |v| v);

    out.stop = keep_flag(family, Param::Stop, out.stop);
    out.tools = keep_flag(family, Param::Tools, out.tools);
    out.tool_choice = keep_flag(family, Param::ToolChoice, out.tool_choice);
    out.cache_system = keep_flag(family, Param::CacheSystem, out.cache_system);

    out
}

fn keep_numeric<T: Copy>(
    family: BackendFamily,
    param: Param,
    value: Option<T>,
    as_f64: impl Fn(T) -> f64,
) -> Option<T> {
    let v = value?;
    if !is_supported(family, param) {
        tracing::debug!(family = %family, param = param.name(), "Dropping unsupported parameter");
        return None;
    }
    if !accepts(family, param, as_f64(v)) {
        tracing::warn!(
            family = %family,
            param = param.name(),
            value = as_f64(v),
            "Dropping out-of-range parameter"
        );
        return None;
    }
    Some(v)
}

fn keep_flag<T>(family: BackendFamily, param: Param, value: Option<T>) -> Option<T> {
    let v = value?;
    if is_supported(family, param) {
        Some(v)
    } else {
        tracing::debug!(family = %family, param = param.name(), "Dropping unsupported parameter");
        None
    }
}

/// Check a converted payload before it is sent.
///
/// # Errors
/// Returns `BridgeError::Validation` if the payload is not an object or a
/// mandatory top-level field is missing or null. Unknown fields are logged.
pub fn validate_payload(family: BackendFamily, payload: &Value) -> Result<()> {
    let obj = payload.as_object().ok_or_else(|| {
        BridgeError::validation(format!("{family} payload must be a JSON object"))
    })?;

    let missing: Vec<&str> = required_fields(family)
        .iter()
        .copied()
        .filter(|f| obj.get(*f).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(BridgeError::validation(format!(
            "{family} payload is missing required field(s): {}",
            missing.join(", ")
        )));
    }

    let known = known_fields(family);
    for key in obj.keys().filter(|k| !known.contains(&k.as_str())) {
        tracing::warn!(family = %family, field = %key, "Unknown field in backend payload");
    }

    Ok(())
}
