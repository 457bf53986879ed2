//! Image Generation stage.
//!
//! Per-variant-parallel. Each sub-task is independent: a failure records
//! `status=failed` but does not abort siblings. File reads and provider
//! calls are delegated off the cooperative scheduler via
//! `tokio::task::spawn_blocking` / the provider's own async I/O.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::ProviderFamily;
use crate::context::{GenerationMode, GeneratedImageResult, ImageResultStatus, PipelineContext};
use crate::error::{Error, Result};
use crate::executor::retry::with_retry;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::providers::ImageGenProvider;

use super::{run_per_variant_bounded, Stage};

pub struct ImageGenerationStage<'a> {
    pub provider: &'a (dyn ImageGenProvider + Sync),
    pub provider_family: ProviderFamily,
    pub runs_root: PathBuf,
    pub progress: ProgressSender,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub worker_pool: &'a Semaphore,
}

fn choose_generation_mode(ctx: &PipelineContext) -> (GenerationMode, Option<String>) {
    if let Some(reference) = &ctx.image_reference {
        return (GenerationMode::UserEdit, Some(reference.saved_path.clone()));
    }
    if let Some(logo_path) = ctx
        .brand_kit
        .as_ref()
        .and_then(|k| k.saved_logo_path_in_run_dir.clone())
    {
        return (GenerationMode::LogoScene, Some(logo_path));
    }
    (GenerationMode::TextToImage, None)
}

fn aspect_ratio_suffix(platform: crate::context::Platform) -> &'static str {
    use crate::context::Platform::*;
    match platform {
        InstagramSquare => "square (1:1)",
        InstagramStory | TikTokVideo => "vertical (9:16)",
        FacebookFeed | XPost | LinkedinFeed => "portrait (4:5)",
        PinterestPin => "tall (2:3)",
    }
}

#[async_trait]
impl<'a> Stage for ImageGenerationStage<'a> {
    fn name(&self) -> &'static str {
        "image_generation"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let prompts = ctx
            .final_assembled_prompts
            .clone()
            .ok_or_else(|| Error::precondition(self.name(), "final_assembled_prompts required"))?;
        let (mode, edit_source) = choose_generation_mode(ctx);
        let run_id = ctx.run_id;
        let runs_root = self.runs_root.clone();
        let progress = self.progress.clone();
        let platform = ctx.platform_name;
        let family = self.provider_family;
        let edit_source = Arc::new(edit_source);

        let results = run_per_variant_bounded(self.worker_pool, prompts.len(), |i| {
            let mut prompt = prompts[i].clone();
            if family == ProviderFamily::NarrativeFirst {
                // Narrative-first providers receive aspect ratio via this
                // stage instead of Prompt Assembly.
                prompt.push_str(&format!(" Aspect ratio: {}.", aspect_ratio_suffix(platform)));
            }
            let edit_source = Arc::clone(&edit_source);
            let runs_root = runs_root.clone();
            let progress = progress.clone();
            async move {
                let outcome = with_retry(self.max_retries, self.retry_base_delay, || {
                    self.provider.generate(&prompt, edit_source.as_deref())
                })
                .await;

                let result = match outcome {
                    Ok(output) => {
                        let edited = mode != GenerationMode::TextToImage;
                        match crate::persistence::persist_generated_image(
                            &runs_root,
                            run_id,
                            i,
                            edited,
                            &output.image_bytes,
                        )
                        .await
                        {
                            Ok(path) => {
                                progress.emit(ProgressEvent::ImageGenerated {
                                    run_id,
                                    index: i,
                                    path: path.display().to_string(),
                                });
                                GeneratedImageResult {
                                    image_path: Some(path.display().to_string()),
                                    status: ImageResultStatus::Success,
                                    generation_mode: mode,
                                    token_usage: Some(
                                        output.usage.prompt_tokens + output.usage.completion_tokens,
                                    ),
                                    consistency_metrics: None,
                                    error_kind: None,
                                }
                            }
                            Err(e) => GeneratedImageResult {
                                image_path: None,
                                status: ImageResultStatus::Failed,
                                generation_mode: mode,
                                token_usage: None,
                                consistency_metrics: None,
                                error_kind: Some(e.kind_name().to_string()),
                            },
                        }
                    }
                    Err((_, message)) => GeneratedImageResult {
                        image_path: None,
                        status: ImageResultStatus::Failed,
                        generation_mode: mode,
                        token_usage: None,
                        consistency_metrics: None,
                        error_kind: Some(format!("provider_error: {message}")),
                    },
                };
                Ok(result)
            }
        })
        .await;

        let mut image_results = Vec::with_capacity(results.len());
        let mut successes = 0usize;
        for result in results {
            let r: GeneratedImageResult = result?;
            if r.status == ImageResultStatus::Success {
                successes += 1;
            }
            image_results.push(r);
        }

        if successes == 0 && !image_results.is_empty() {
            return Err(Error::contract_violation(
                self.name(),
                "all variants failed image generation",
            ));
        }

        ctx.generated_image_results = Some(image_results);
        Ok(())
    }
}
