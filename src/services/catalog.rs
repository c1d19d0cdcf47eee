//! Static registry of the models exposed to end users, their providers and
//! their per-1k-token rates.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::SubscriptionTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub provider: String,
    pub is_free: bool,
    pub input_cost_per_1k: Decimal,
    pub output_cost_per_1k: Decimal,
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for model in &models {
            if !seen.insert(model.id.as_str()) {
                bail!("duplicate model id in catalog: {}", model.id);
            }
        }
        Ok(Self { models })
    }

    pub fn builtin() -> Self {
        let entry = |id: &str, name: &str, provider: &str, is_free, input, output| ModelDescriptor {
            id: id.into(),
            display_name: name.into(),
            provider: provider.into(),
            is_free,
            input_cost_per_1k: input,
            output_cost_per_1k: output,
        };

        Self {
            models: vec![
                entry("gemini-2.0-flash-exp", "Gemini 2.0 Flash", "gemini", true, dec!(0.0001), dec!(0.0001)),
                entry("gemini-1.5-pro", "Gemini 1.5 Pro", "gemini", false, dec!(0.0035), dec!(0.0105)),
                entry("gemini-1.5-flash", "Gemini 1.5 Flash", "gemini", true, dec!(0.000075), dec!(0.0003)),
                entry("gpt-4o", "GPT-4o", "openai", false, dec!(0.005), dec!(0.015)),
                entry("gpt-4o-mini", "GPT-4o Mini", "openai", true, dec!(0.00015), dec!(0.0006)),
                entry("o1-preview", "o1 Preview", "openai", false, dec!(0.015), dec!(0.06)),
                entry("claude-3-5-sonnet-20241022", "Claude 3.5 Sonnet", "anthropic", false, dec!(0.003), dec!(0.015)),
                entry("claude-3-opus-20240229", "Claude 3 Opus", "anthropic", false, dec!(0.015), dec!(0.075)),
                entry("claude-3-haiku-20240307", "Claude 3 Haiku", "anthropic", true, dec!(0.00025), dec!(0.00125)),
            ],
        }
    }

    pub fn from_json_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model catalog at {}", path))?;
        let models: Vec<ModelDescriptor> =
            serde_json::from_str(&raw).context("malformed model catalog JSON")?;
        Self::new(models)
    }

    /// Unknown ids are a hard miss; there is deliberately no fallback to a
    /// default model.
    pub fn find(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == model_id)
    }

    pub fn is_accessible(model: &ModelDescriptor, tier: SubscriptionTier) -> bool {
        model.is_free || tier.can_use_paid_models()
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }
}
