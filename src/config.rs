//! Process-wide pipeline configuration.
//!
//! Mirrors the weight of `dashflow`'s own `RunnableConfig` / config-loader
//! surface: a plain struct with sane defaults and a handful of env-var
//! overrides, not a general-purpose config framework.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Classification of an image-generation backend, used by Prompt Assembly
/// and Image Generation to choose prefix tone and aspect-ratio handling.
/// Passed in from configuration so stages never discover it themselves and
/// never need a back-channel to the provider layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProviderFamily {
    /// e.g. OpenAI-style image models: literal instructions, explicit size parameter.
    LiteralDirective,
    /// e.g. Gemini-style image models: narrative prompts, aspect ratio described in prose.
    NarrativeFirst,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory under which `<run_id>/` trees are created.
    pub runs_root: PathBuf,
    /// Bounds concurrent blocking provider/file-IO work across the process.
    pub worker_pool_size: usize,
    /// Per-stage wall-clock timeout, keyed by stage name; falls back to
    /// `default_stage_timeout` when a stage has no explicit entry.
    pub default_stage_timeout: Duration,
    /// The image-generation provider's family and model id, fed to Prompt
    /// Assembly and Image Generation.
    pub image_provider_family: ProviderFamily,
    pub image_model_id: String,
    /// Max retry attempts for a `ProviderErrorKind::Transient` failure.
    pub provider_max_retries: usize,
    /// Base delay for the provider retry's exponential backoff.
    pub provider_retry_base_delay: Duration,
    /// The chat model's context window, used by Style Adaptation's
    /// token-budget safeguard.
    pub context_window_tokens: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            runs_root: env::var("CAMPAIGNFLOW_RUNS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./runs")),
            worker_pool_size: env::var("CAMPAIGNFLOW_WORKER_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            default_stage_timeout: Duration::from_secs(
                env::var("CAMPAIGNFLOW_STAGE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            ),
            image_provider_family: ProviderFamily::NarrativeFirst,
            image_model_id: env::var("CAMPAIGNFLOW_IMAGE_MODEL_ID")
                .unwrap_or_else(|_| "default-image-model".to_string()),
            provider_max_retries: 3,
            provider_retry_base_delay: Duration::from_millis(250),
            context_window_tokens: env::var("CAMPAIGNFLOW_CONTEXT_WINDOW_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(128_000),
        }
    }
}
