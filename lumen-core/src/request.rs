//! The initial message a client sends to open a generation session.

use serde::{Deserialize, Serialize};

/// A text prompt with a signed weight. Positive weights steer toward the
/// text, negative weights away from it, zero weights are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPrompt {
    pub text: String,
    pub weight: f64,
}

/// Generation request as received on the wire.
///
/// Numeric fields are signed so that out-of-range values reach validation
/// instead of failing deserialization with an opaque error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// MessagePack binary updates when true, JSON text updates otherwise.
    pub use_binary: bool,
    /// Informational engine identifier.
    #[serde(default)]
    pub engine: String,
    pub steps: i64,
    /// 0 selects the model's default resolution.
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    /// 0 (or negative) selects a non-deterministic seed.
    #[serde(default)]
    pub seed: i64,
    pub cfg_scale: f64,
    pub samples: i64,
    pub text_prompts: Vec<TextPrompt>,
    pub callback_steps: i64,
    /// Inclusive 1-based step from which preview images are sent.
    #[serde(default)]
    pub callback_start: i64,
}

impl GenerationRequest {
    pub fn positive_prompts(&self) -> Vec<String> {
        self.text_prompts
            .iter()
            .filter(|p| p.weight > 0.0)
            .map(|p| p.text.clone())
            .collect()
    }

    pub fn negative_prompts(&self) -> Vec<String> {
        self.text_prompts
            .iter()
            .filter(|p| p.weight < 0.0)
            .map(|p| p.text.clone())
            .collect()
    }
}
