//! Routing from model identifiers to backend adapters.
//!
//! Each family preset lists the substrings that identify its models. Presets
//! are tried in order and the first match wins, so a cross-region id such as
//! `us.anthropic.claude-3-5-sonnet` routes to the Claude adapter.

use std::sync::Arc;

use crate::adapter::{BackendFamily, ModelAdapter};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::images::{ImageComplianceProcessor, ImageCompressor, JpegBudgetCompressor};
use crate::translate::ai21::Ai21Adapter;
use crate::translate::claude::ClaudeAdapter;
use crate::translate::llama::LlamaAdapter;
use crate::translate::mistral::MistralAdapter;
use crate::translate::titan::TitanAdapter;

/// A backend family and the model-id markers that select it.
#[derive(Debug, Clone)]
pub struct FamilyPreset {
    pub family: BackendFamily,
    pub markers: &'static [&'static str],
}

const FAMILIES: &[FamilyPreset] = &[
    FamilyPreset {
        family: BackendFamily::Claude,
        markers: &["anthropic.", "claude"],
    },
    FamilyPreset {
        family: BackendFamily::Llama,
        markers: &["meta.llama", "llama"],
    },
    FamilyPreset {
        family: BackendFamily::Mistral,
        markers: &["mistral.", "mistral", "mixtral"],
    },
    FamilyPreset {
        family: BackendFamily::Titan,
        markers: &["amazon.titan", "titan"],
    },
    FamilyPreset {
        family: BackendFamily::Ai21,
        markers: &["ai21.", "jurassic", "j2-"],
    },
];

impl FamilyPreset {
    /// First preset whose markers occur in `model` (case-insensitive).
    #[must_use]
    pub fn for_model(model: &str) -> Option<&'static FamilyPreset> {
        let model = model.trim().to_lowercase();
        if model.is_empty() {
            return None;
        }
        FAMILIES
            .iter()
            .find(|p| p.markers.iter().any(|m| model.contains(m)))
    }

    #[must_use]
    pub fn all() -> &'static [FamilyPreset] {
        FAMILIES
    }
}

/// Builds fully configured adapters for model identifiers.
#[derive(Clone)]
pub struct AdapterFactory {
    config: BridgeConfig,
    compressor: Arc<dyn ImageCompressor>,
}

impl AdapterFactory {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            compressor: Arc::new(JpegBudgetCompressor::default()),
        }
    }

    #[must_use]
    pub fn with_compressor(mut self, compressor: Arc<dyn ImageCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Resolve `model` to its adapter.
    ///
    /// # Errors
    /// Returns `BridgeError::Configuration` if `model` is empty or matches no
    /// known family.
    pub fn resolve(&self, model: &str) -> Result<Box<dyn ModelAdapter>> {
        if model.trim().is_empty() {
            return Err(BridgeError::configuration("Model identifier is empty"));
        }

        let preset = FamilyPreset::for_model(model).ok_or_else(|| {
            BridgeError::configuration(format!(
                "No backend family matches model '{}'. Known families: {}",
                model,
                FAMILIES
                    .iter()
                    .map(|p| p.family.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        tracing::debug!(model = %model, family = %preset.family, "Resolved adapter");

        Ok(self.build(preset.family))
    }

    fn build(&self, family: BackendFamily) -> Box<dyn ModelAdapter> {
        match family {
            BackendFamily::Claude => Box::new(ClaudeAdapter::new(
                self.config.claude.clone(),
                ImageComplianceProcessor::new(self.config.images.max_dimension),
                Arc::clone(&self.compressor),
            )),
            BackendFamily::Llama => Box::new(LlamaAdapter),
            BackendFamily::Mistral => Box::new(MistralAdapter),
            BackendFamily::Titan => Box::new(TitanAdapter),
            BackendFamily::Ai21 => Box::new(Ai21Adapter),
        }
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}
