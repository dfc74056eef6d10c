//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::context::ContextParams;
use crate::model::ModelParams;
use crate::sampler::SamplingParams;

/// Complete configuration for a [`crate::Session`].
///
/// Every field is defaulted, so `{}` (or an absent config) is a valid
/// document and yields the fixed reference configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub model: ModelParams,
    #[serde(default)]
    pub context: ContextParams,
    #[serde(default)]
    pub sampling: SamplingParams,
    /// Token budget used when a generate call does not carry its own.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    100
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: ModelParams::default(),
            context: ContextParams::default(),
            sampling: SamplingParams::default(),
            max_tokens: default_max_tokens(),
        }
    }
}
