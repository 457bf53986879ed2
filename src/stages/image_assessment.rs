//! Image Assessment stage. Per-variant-parallel; computes consistency
//! metrics against the recipe's reference image for Style Recipe runs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::context::{ImageAssessment, ImageResultStatus, PipelineContext};
use crate::error::{Error, Result};
use crate::executor::retry::with_retry;
use crate::metrics::compute_consistency_metrics;
use crate::providers::{ImageEmbedder, VlmProvider};

use super::{run_per_variant_bounded, Stage};

pub struct ImageAssessmentStage<'a> {
    pub vlm: &'a dyn VlmProvider,
    pub embedder: Option<&'a dyn ImageEmbedder>,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub worker_pool: &'a Semaphore,
}

fn parse_assessment(json: &Value) -> ImageAssessment {
    ImageAssessment {
        alignment_score: json.get("alignment_score").and_then(Value::as_f64).unwrap_or(0.0),
        defects: json
            .get("defects")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        text_rendering_accuracy: json.get("text_rendering_accuracy").and_then(Value::as_f64),
        consistency_metrics: None,
    }
}

#[async_trait]
impl<'a> Stage for ImageAssessmentStage<'a> {
    fn name(&self) -> &'static str {
        "image_assessment"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let results = ctx
            .generated_image_results
            .clone()
            .ok_or_else(|| Error::precondition(self.name(), "generated_image_results required"))?;
        let prompts = ctx
            .final_assembled_prompts
            .clone()
            .unwrap_or_default();
        let is_style_recipe = matches!(ctx.preset_type, Some(crate::preset::PresetType::StyleRecipe));
        // The recipe itself doesn't carry its source image path; the
        // original reference image supplied with this run (the subject-swap
        // path) is the comparison target.
        let recipe_reference_path = if is_style_recipe {
            ctx.image_reference.as_ref().map(|r| r.saved_path.clone())
        } else {
            None
        };
        let embedder = self.embedder;

        let assessments = run_per_variant_bounded(self.worker_pool, results.len(), |i| {
            let image_result = results[i].clone();
            let prompt = prompts.get(i).cloned().unwrap_or_default();
            let reference_path = recipe_reference_path.clone();
            async move {
                if image_result.status != ImageResultStatus::Success {
                    let assessment = ImageAssessment {
                        alignment_score: 0.0,
                        defects: vec!["generation_failed".to_string()],
                        text_rendering_accuracy: None,
                        consistency_metrics: None,
                    };
                    return Ok((assessment, 0u64, 0u64));
                }
                let image_path = image_result.image_path.clone().unwrap_or_default();
                let instruction = format!(
                    "Assess how well this image matches the prompt: '{prompt}'. Return \
                     alignment_score (0-1), defects (array of strings), and \
                     text_rendering_accuracy (0-1, if applicable)."
                );
                let completion = with_retry(self.max_retries, self.retry_base_delay, || {
                    self.vlm.analyze_image(&image_path, &instruction)
                })
                .await
                .map_err(|(kind, message)| Error::Provider {
                    stage: "image_assessment".to_string(),
                    kind,
                    message,
                })?;

                let mut assessment = parse_assessment(&completion.json);

                if let Some(reference_path) = reference_path {
                    match compute_consistency_metrics(embedder, &image_path, &reference_path).await
                    {
                        Ok(metrics) => assessment.consistency_metrics = metrics,
                        Err(_) => assessment.consistency_metrics = None,
                    }
                }

                Ok((assessment, completion.usage.prompt_tokens, completion.usage.completion_tokens))
            }
        })
        .await;

        let mut out = Vec::with_capacity(assessments.len());
        for result in assessments {
            let value: (ImageAssessment, u64, u64) = match result {
                Ok(v) => v,
                Err(e) => return Err(e),
            };
            ctx.record_usage(format!("{}:vlm:{}", self.name(), self.vlm.model_id()), value.1, value.2);
            out.push(value.0);
        }

        ctx.image_assessments = Some(out);
        Ok(())
    }
}
