//! The Pipeline Executor: drives stages in order, applies skips, injects
//! Style Adaptation, checks stage contracts, streams progress, and persists
//! artifacts.

pub mod retry;

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::context::{ImageResultStatus, PipelineContext, Platform};
use crate::error::{Error, Result};
use crate::persistence;
use crate::preset;
use crate::progress::{ProgressEvent, ProgressSender, RunStatus};
use crate::providers::{ChatProvider, ImageEmbedder, ImageGenProvider, VlmProvider};
use crate::registry::{self, StageEntry};
use crate::stages::caption::{self, CaptionBrief, CaptionRequest, CaptionResult};
use crate::stages::creative_expert::CreativeExpertStage;
use crate::stages::image_assessment::ImageAssessmentStage;
use crate::stages::image_eval::ImageEvalStage;
use crate::stages::image_generation::ImageGenerationStage;
use crate::stages::prompt_assembly::PromptAssemblyStage;
use crate::stages::strategy::StrategyStage;
use crate::stages::style_adaptation::{self, StyleAdaptationStage};
use crate::stages::style_guide::StyleGuideStage;
use crate::stages::Stage;

/// Drives one run's stage graph against a fixed set of provider backends.
/// Stateless across runs — all per-run state lives in the [`PipelineContext`]
/// passed to [`Executor::run_async`].
pub struct Executor {
    config: PipelineConfig,
    llm: Arc<dyn ChatProvider>,
    vlm: Arc<dyn VlmProvider>,
    image_gen: Arc<dyn ImageGenProvider>,
    embedder: Option<Arc<dyn ImageEmbedder>>,
    preset_store: Arc<dyn preset::PresetStore>,
    progress: ProgressSender,
    /// Bounds the number of concurrently in-flight provider calls across all
    /// per-variant stages in a run to `config.worker_pool_size`.
    worker_pool: Semaphore,
}

impl Executor {
    pub fn new(
        config: PipelineConfig,
        llm: Arc<dyn ChatProvider>,
        vlm: Arc<dyn VlmProvider>,
        image_gen: Arc<dyn ImageGenProvider>,
        embedder: Option<Arc<dyn ImageEmbedder>>,
        preset_store: Arc<dyn preset::PresetStore>,
        progress: ProgressSender,
    ) -> Self {
        let worker_pool = Semaphore::new(config.worker_pool_size.max(1));
        Self {
            config,
            llm,
            vlm,
            image_gen,
            embedder,
            preset_store,
            progress,
            worker_pool,
        }
    }

    fn build_stage(&self, name: &str) -> Box<dyn Stage + '_> {
        let max_retries = self.config.provider_max_retries;
        let retry_base_delay = self.config.provider_retry_base_delay;
        match name {
            "image_eval" => Box::new(ImageEvalStage {
                vlm: self.vlm.as_ref(),
                max_retries,
                retry_base_delay,
            }),
            "strategy" => Box::new(StrategyStage {
                llm: self.llm.as_ref(),
                max_retries,
                retry_base_delay,
            }),
            "style_guide" => Box::new(StyleGuideStage {
                llm: self.llm.as_ref(),
                max_retries,
                retry_base_delay,
            }),
            "creative_expert" => Box::new(CreativeExpertStage {
                llm: self.llm.as_ref(),
                max_retries,
                retry_base_delay,
                worker_pool: &self.worker_pool,
            }),
            "style_adaptation" => Box::new(StyleAdaptationStage {
                llm: self.llm.as_ref(),
                context_window_tokens: self.config.context_window_tokens,
                max_retries,
                retry_base_delay,
            }),
            "prompt_assembly" => Box::new(PromptAssemblyStage {
                provider_family: self.config.image_provider_family,
            }),
            "image_generation" => Box::new(ImageGenerationStage {
                provider: self.image_gen.as_ref(),
                provider_family: self.config.image_provider_family,
                runs_root: self.config.runs_root.clone(),
                progress: self.progress.clone(),
                max_retries,
                retry_base_delay,
                worker_pool: &self.worker_pool,
            }),
            "image_assessment" => Box::new(ImageAssessmentStage {
                vlm: self.vlm.as_ref(),
                embedder: self.embedder.as_deref(),
                max_retries,
                retry_base_delay,
                worker_pool: &self.worker_pool,
            }),
            other => unreachable!("no stage builder registered for '{other}'"),
        }
    }

    /// Runs the default stage graph against `ctx`. Loads and applies a
    /// preset first when `ctx.preset_id` is set.
    pub async fn run_async(
        &self,
        ctx: &mut PipelineContext,
        user_id: Option<&str>,
    ) -> Result<RunStatus> {
        if let Some(preset_id) = ctx.preset_id.clone() {
            let user_id = user_id.ok_or_else(|| {
                Error::Validation("preset_id set without an owning user_id".to_string())
            })?;
            preset::load_and_apply_preset(ctx, &preset_id, user_id, self.preset_store.as_ref())
                .await?;
        }

        self.progress.emit(ProgressEvent::RunStarted {
            run_id: ctx.run_id,
        });

        for entry in registry::DEFAULT_STAGE_ORDER {
            if ctx.skip_stages.contains(entry.name) {
                self.progress.emit(ProgressEvent::StageSkipped {
                    run_id: ctx.run_id,
                    stage: entry.name.to_string(),
                    reason: "preset stage-skip policy".to_string(),
                });
                continue;
            }

            if entry.name == "prompt_assembly" && style_adaptation::needs_style_adaptation(ctx) {
                let stage = self.build_stage(registry::STYLE_ADAPTATION.name);
                self.run_one_stage(&registry::STYLE_ADAPTATION, stage.as_ref(), ctx)
                    .await?;
            }

            let stage = self.build_stage(entry.name);
            self.run_one_stage(entry, stage.as_ref(), ctx).await?;
        }

        if let Err(detail) = ctx.check_index_alignment() {
            let err = Error::contract_violation("executor", detail);
            let _ = persistence::persist_metadata(&self.config.runs_root, ctx).await;
            self.progress.emit(ProgressEvent::RunFailed {
                run_id: ctx.run_id,
                error_kind: err.kind_name().to_string(),
            });
            return Err(err);
        }

        persistence::persist_metadata(&self.config.runs_root, ctx).await?;

        let status = if has_partial_failures(ctx) {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        };
        self.progress.emit(ProgressEvent::RunCompleted {
            run_id: ctx.run_id,
            status,
        });
        Ok(status)
    }

    /// Runs one stage's full contract lifecycle: precondition check, timed
    /// execution, postcondition check, progress emission. On any failure,
    /// emits `stage_failed`, persists partial context, and emits
    /// `run_failed` before propagating the error.
    async fn run_one_stage(
        &self,
        entry: &StageEntry,
        stage: &dyn Stage,
        ctx: &mut PipelineContext,
    ) -> Result<()> {
        self.progress.emit(ProgressEvent::StageStarted {
            run_id: ctx.run_id,
            stage: entry.name.to_string(),
        });

        for (input_name, predicate) in entry.required_inputs {
            if !predicate(ctx) {
                let err = Error::precondition(
                    entry.name,
                    format!("required input '{input_name}' not satisfied"),
                );
                self.fail_run(ctx, entry.name, &err).await;
                return Err(err);
            }
        }

        let limit = self.config.default_stage_timeout;
        let started = Instant::now();
        let outcome = tokio::time::timeout(limit, stage.execute(ctx)).await;
        let duration = started.elapsed();
        ctx.stage_timings.insert(entry.name.to_string(), duration);

        let result = match outcome {
            Ok(inner) => inner,
            Err(_) => Err(Error::StageTimeout {
                stage: entry.name.to_string(),
                limit,
            }),
        };

        if let Err(e) = result {
            self.fail_run(ctx, entry.name, &e).await;
            return Err(e);
        }

        for (output_name, predicate) in entry.produced_outputs {
            if !predicate(ctx) {
                let err = Error::contract_violation(
                    entry.name,
                    format!("produced output '{output_name}' missing or empty"),
                );
                self.fail_run(ctx, entry.name, &err).await;
                return Err(err);
            }
        }

        self.progress.emit(ProgressEvent::StageCompleted {
            run_id: ctx.run_id,
            stage: entry.name.to_string(),
            duration_ms: duration.as_millis() as u64,
            usage: usage_snapshot(ctx, entry.name),
        });
        Ok(())
    }

    async fn fail_run(&self, ctx: &PipelineContext, stage: &str, err: &Error) {
        self.progress.emit(ProgressEvent::StageFailed {
            run_id: ctx.run_id,
            stage: stage.to_string(),
            error_kind: err.kind_name().to_string(),
            message: err.to_string(),
        });
        let _ = persistence::persist_metadata(&self.config.runs_root, ctx).await;
        self.progress.emit(ProgressEvent::RunFailed {
            run_id: ctx.run_id,
            error_kind: err.kind_name().to_string(),
        });
    }

    /// Single-stage entry point for caption generation. Does not re-run the
    /// default graph; `ctx` is the caller-loaded context of a completed run.
    /// `next_version` is supplied by the caller (the transport layer owns
    /// caption-version bookkeeping).
    pub async fn run_single_stage(
        &self,
        ctx: &PipelineContext,
        request: &CaptionRequest,
        cached_brief: Option<CaptionBrief>,
        next_version: u32,
    ) -> Result<CaptionResult> {
        let strategy = ctx
            .suggested_marketing_strategies
            .as_ref()
            .and_then(|v| v.get(request.image_index))
            .ok_or_else(|| Error::precondition("caption", "strategy index out of range"))?;
        let visual_concept = ctx
            .generated_image_prompts
            .as_ref()
            .and_then(|v| v.get(request.image_index))
            .map(|p| &p.visual_concept)
            .ok_or_else(|| Error::precondition("caption", "visual concept index out of range"))?;
        let alt_text = visual_concept
            .main_subject
            .as_deref()
            .unwrap_or("product image");
        let brand_voice = ctx
            .brand_kit
            .as_ref()
            .and_then(|k| k.brand_voice_description.as_deref());

        let resolved = caption::resolve_final_instructions(&request.settings, strategy, brand_voice);

        let brief = if request.regenerate_writer_only {
            cached_brief.ok_or_else(|| {
                Error::precondition("caption", "regenerate_writer_only requires a cached brief")
            })?
        } else {
            let (brief, prompt_tokens, completion_tokens) = caption::run_analyst(
                self.llm.as_ref(),
                strategy,
                visual_concept,
                alt_text,
                ctx.brand_kit.as_ref(),
                platform_label(ctx.platform_name),
                &resolved,
                self.config.provider_max_retries,
                self.config.provider_retry_base_delay,
            )
            .await?;
            ctx.record_usage(
                format!("caption:analyst:{}", self.llm.model_id()),
                prompt_tokens,
                completion_tokens,
            );
            brief
        };

        let (text, prompt_tokens, completion_tokens) = caption::run_writer(
            self.llm.as_ref(),
            &brief,
            self.config.provider_max_retries,
            self.config.provider_retry_base_delay,
        )
        .await?;
        ctx.record_usage(
            format!("caption:writer:{}", self.llm.model_id()),
            prompt_tokens,
            completion_tokens,
        );

        let image_id = request.image_index.to_string();
        let brief_json = serde_json::to_value(&brief)?;
        let result_json = serde_json::json!({
            "image_index": request.image_index,
            "version": next_version,
            "text": text,
        });
        persistence::persist_caption_version(
            &self.config.runs_root,
            ctx.run_id,
            &image_id,
            next_version,
            &text,
            &brief_json,
            &result_json,
        )
        .await?;

        self.progress.emit(ProgressEvent::CaptionAdded {
            run_id: ctx.run_id,
            image_index: request.image_index,
            version: next_version,
        });

        Ok(CaptionResult {
            version: next_version,
            text,
            brief,
        })
    }
}

fn platform_label(platform: Platform) -> &'static str {
    use Platform::*;
    match platform {
        InstagramSquare => "instagram_square",
        InstagramStory => "instagram_story",
        FacebookFeed => "facebook_feed",
        PinterestPin => "pinterest_pin",
        TikTokVideo => "tiktok_video",
        LinkedinFeed => "linkedin_feed",
        XPost => "x_post",
    }
}

/// Collects the usage counters recorded under this stage's key prefix into a
/// JSON object for the `stage_completed` event's optional `usage` field.
fn usage_snapshot(ctx: &PipelineContext, stage_name: &str) -> Option<Value> {
    let prefix = format!("{stage_name}:");
    let mut map = Map::new();
    for entry in ctx.llm_usage.iter() {
        if entry.key().starts_with(&prefix) {
            map.insert(
                entry.key().clone(),
                serde_json::to_value(entry.value()).unwrap_or(Value::Null),
            );
        }
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

/// A run is `partial_success` when some sub-unit degraded without failing the
/// run outright: a failed image variant, or a `degraded_strategy` fallback.
fn has_partial_failures(ctx: &PipelineContext) -> bool {
    let any_failed_image = ctx.generated_image_results.as_ref().is_some_and(|results| {
        results
            .iter()
            .any(|r| r.status == ImageResultStatus::Failed)
    });
    let any_degraded = ctx
        .diagnostics
        .iter()
        .any(|d| d.kind == "degraded_strategy");
    any_failed_image || any_degraded
}
