//! [`PipelineContext`] — the typed blackboard a run's stages read and write.
//!
//! Single-writer discipline: exactly one stage writes to the context at
//! any instant. Per-variant fan-out tasks write only to their own
//! pre-sized slot, never touching the context directly — see
//! [`crate::stages::run_per_variant`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::preset::PresetType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    InstagramSquare,
    InstagramStory,
    FacebookFeed,
    PinterestPin,
    TikTokVideo,
    LinkedinFeed,
    XPost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    ProductPhoto,
    Announcement,
    Promotion,
    BrandStory,
    Seasonal,
}

/// A reference image supplied with the request, optionally paired with an
/// editing instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageReference {
    pub saved_path: String,
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogoAnalysis {
    pub logo_style: String,
    pub has_text: bool,
    pub text_content: Option<String>,
    pub dominant_colors: Vec<String>,
}

/// Structured brand information. `brand_kit` is the single source of truth;
/// legacy flat branding fields are rejected at the request boundary and
/// never modeled here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrandKit {
    pub colors: Vec<String>,
    pub brand_voice_description: Option<String>,
    pub logo_analysis: Option<LogoAnalysis>,
    pub saved_logo_path_in_run_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailedImageAnalysis {
    pub secondary_elements: Vec<String>,
    pub composition_cues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAnalysisResult {
    pub main_subject: String,
    pub detailed: Option<DetailedImageAnalysis>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketingStrategy {
    pub target_audience: String,
    pub target_objective: String,
    pub target_voice: Option<String>,
    pub target_niche: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleGuidance {
    pub style_description: String,
    pub style_rationale: Option<String>,
    pub style_keywords: Vec<String>,
}

/// The structured creative brief produced by Creative Expert or Style
/// Adaptation — the last step before prompt assembly (GLOSSARY).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualConcept {
    pub main_subject: Option<String>,
    pub composition_and_framing: String,
    pub background_environment: String,
    pub foreground_elements: Option<String>,
    pub lighting_and_mood: String,
    pub color_palette: String,
    pub visual_style: String,
    pub texture_and_details: Option<String>,
    pub promotional_text_visuals: Option<String>,
    pub branding_visuals: Option<String>,
    pub negative_elements: Option<String>,
    pub creative_reasoning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImagePrompt {
    pub source_strategy_index: usize,
    pub visual_concept: VisualConcept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationMode {
    UserEdit,
    LogoScene,
    TextToImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageResultStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyMetrics {
    pub clip_similarity: f64,
    pub color_histogram_similarity: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImageResult {
    pub image_path: Option<String>,
    pub status: ImageResultStatus,
    pub generation_mode: GenerationMode,
    pub token_usage: Option<u64>,
    pub consistency_metrics: Option<ConsistencyMetrics>,
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageAssessment {
    pub alignment_score: f64,
    pub defects: Vec<String>,
    pub text_rendering_accuracy: Option<f64>,
    pub consistency_metrics: Option<ConsistencyMetrics>,
}

/// Token counters for one LLM/VLM call site, keyed by `"{stage}:{provider}:{model}"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u64,
}

/// A single non-fatal diagnostic recorded during a run (`degraded_strategy`,
/// `optional_failure`, `model_version_mismatch`, prompt-pruning decisions, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: String,
    pub kind: String,
    pub message: String,
}

/// The mutable typed record representing one run.
///
/// Created when a run is accepted; destroyed when its artifacts are
/// finalized. Only the [`crate::executor::Executor`] and the stage currently
/// executing may write to it (single-writer discipline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    // --- Identity & request ---
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub language: String,
    pub platform_name: Platform,
    pub num_variants: usize,
    pub creativity_level: u8,
    pub task_type: Option<TaskType>,
    pub task_description: Option<String>,
    pub render_text: bool,
    pub apply_branding: bool,
    pub prompt: Option<String>,

    // --- Inputs ---
    pub image_reference: Option<ImageReference>,
    pub brand_kit: Option<BrandKit>,

    // --- Preset control ---
    pub preset_id: Option<String>,
    pub preset_type: Option<PresetType>,
    pub preset_data: Option<crate::preset::PresetSnapshot>,
    pub overrides: Option<serde_json::Value>,
    pub skip_stages: HashSet<String>,

    // --- Intermediate artifacts ---
    pub image_analysis_result: Option<ImageAnalysisResult>,
    pub suggested_marketing_strategies: Option<Vec<MarketingStrategy>>,
    pub style_guidance_sets: Option<Vec<StyleGuidance>>,
    pub generated_image_prompts: Option<Vec<GeneratedImagePrompt>>,
    pub final_assembled_prompts: Option<Vec<String>>,
    pub generated_image_results: Option<Vec<GeneratedImageResult>>,
    pub image_assessments: Option<Vec<ImageAssessment>>,

    // --- Accounting ---
    #[serde(skip)]
    pub llm_usage: DashMap<String, UsageCounters>,
    pub stage_timings: HashMap<String, Duration>,
    pub diagnostics: Vec<Diagnostic>,

    /// Set by [`crate::stages::image_eval`] to record whether it actually ran
    /// this run, used by `needs_style_adaptation`.
    pub image_eval_ran_this_run: bool,
}

impl PipelineContext {
    pub fn new(
        language: String,
        platform_name: Platform,
        num_variants: usize,
        creativity_level: u8,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            language,
            platform_name,
            num_variants,
            creativity_level,
            task_type: None,
            task_description: None,
            render_text: false,
            apply_branding: false,
            prompt: None,
            image_reference: None,
            brand_kit: None,
            preset_id: None,
            preset_type: None,
            preset_data: None,
            overrides: None,
            skip_stages: HashSet::new(),
            image_analysis_result: None,
            suggested_marketing_strategies: None,
            style_guidance_sets: None,
            generated_image_prompts: None,
            final_assembled_prompts: None,
            generated_image_results: None,
            image_assessments: None,
            llm_usage: DashMap::new(),
            stage_timings: HashMap::new(),
            diagnostics: Vec::new(),
            image_eval_ran_this_run: false,
        }
    }

    pub fn record_diagnostic(
        &mut self,
        stage: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) {
        let stage = stage.into();
        let kind = kind.into();
        let message = message.into();
        tracing::warn!(stage = %stage, kind = %kind, "{}", message);
        self.diagnostics.push(Diagnostic {
            stage,
            kind,
            message,
        });
    }

    pub fn record_usage(&self, key: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) {
        let mut entry = self.llm_usage.entry(key.into()).or_default();
        entry.prompt_tokens += prompt_tokens;
        entry.completion_tokens += completion_tokens;
        entry.calls += 1;
    }

    /// Checks the index-alignment invariant: all "ordered list" intermediates
    /// that have been produced must share the same length, and (outside of a
    /// bridged Style Recipe run) that length must equal `num_variants`.
    pub fn check_index_alignment(&self) -> Result<(), String> {
        let lens: Vec<(&str, usize)> = [
            (
                "suggested_marketing_strategies",
                self.suggested_marketing_strategies.as_ref().map(Vec::len),
            ),
            (
                "style_guidance_sets",
                self.style_guidance_sets.as_ref().map(Vec::len),
            ),
            (
                "generated_image_prompts",
                self.generated_image_prompts.as_ref().map(Vec::len),
            ),
            (
                "final_assembled_prompts",
                self.final_assembled_prompts.as_ref().map(Vec::len),
            ),
            (
                "generated_image_results",
                self.generated_image_results.as_ref().map(Vec::len),
            ),
            (
                "image_assessments",
                self.image_assessments.as_ref().map(Vec::len),
            ),
        ]
        .into_iter()
        .filter_map(|(name, len)| len.map(|l| (name, l)))
        .collect();

        if let Some((_, first_len)) = lens.first() {
            for (name, len) in &lens {
                if len != first_len {
                    return Err(format!(
                        "index-alignment violated: '{name}' has length {len}, expected {first_len}"
                    ));
                }
            }
        }
        Ok(())
    }
}
