//! Image Evaluation stage.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{DetailedImageAnalysis, ImageAnalysisResult, LogoAnalysis, PipelineContext};
use crate::error::{Error, Result};
use crate::executor::retry::with_retry;
use crate::providers::VlmProvider;

use super::Stage;

pub struct ImageEvalStage<'a> {
    pub vlm: &'a dyn VlmProvider,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnalysisMode {
    /// Reference image present, no instruction and no text prompt — e.g. the
    /// subject-swap path of a Style Recipe.
    MinimalSubjectExtraction,
    /// An instruction or a text prompt is present.
    Detailed,
}

fn choose_mode(ctx: &PipelineContext) -> AnalysisMode {
    let has_instruction = ctx
        .image_reference
        .as_ref()
        .and_then(|r| r.instruction.as_ref())
        .is_some();
    let has_prompt = ctx.prompt.is_some();
    if ctx.image_reference.is_some() && !has_instruction && !has_prompt {
        AnalysisMode::MinimalSubjectExtraction
    } else {
        AnalysisMode::Detailed
    }
}

#[async_trait]
impl<'a> Stage for ImageEvalStage<'a> {
    fn name(&self) -> &'static str {
        "image_eval"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        // Logo analysis runs first, and is non-fatal on failure.
        if let Some(kit) = ctx.brand_kit.as_ref() {
            let needs_logo_analysis =
                kit.saved_logo_path_in_run_dir.is_some() && kit.logo_analysis.is_none();
            if needs_logo_analysis {
                let logo_path = kit
                    .saved_logo_path_in_run_dir
                    .clone()
                    .unwrap_or_default();
                match with_retry(self.max_retries, self.retry_base_delay, || {
                    self.vlm.analyze_image(
                        &logo_path,
                        "Describe this logo: style, whether it contains text, the text content \
                         if any, and its dominant colors.",
                    )
                })
                .await
                {
                    Ok(completion) => {
                        ctx.record_usage(
                            format!("{}:vlm:{}", self.name(), self.vlm.model_id()),
                            completion.usage.prompt_tokens,
                            completion.usage.completion_tokens,
                        );
                        let logo_analysis = parse_logo_analysis(&completion.json)?;
                        if let Some(kit) = ctx.brand_kit.as_mut() {
                            kit.logo_analysis = Some(logo_analysis);
                        }
                    }
                    Err((_, message)) => {
                        ctx.record_diagnostic(self.name(), "optional_failure", message);
                    }
                }
            }
        }

        let mode = choose_mode(ctx);
        let Some(image_reference) = ctx.image_reference.as_ref() else {
            // No reference image at all: nothing further for this stage to
            // do (e.g. a pure text-to-image request with no preset).
            return Ok(());
        };

        let instruction = match mode {
            AnalysisMode::MinimalSubjectExtraction => {
                "Identify only the main subject of this image in a short phrase.".to_string()
            }
            AnalysisMode::Detailed => {
                let mut parts = vec![
                    "Analyze this image: identify the main subject, secondary elements, and \
                     composition cues."
                        .to_string(),
                ];
                if let Some(instr) = &image_reference.instruction {
                    parts.push(format!("Editing instruction: {instr}"));
                }
                if let Some(prompt) = &ctx.prompt {
                    parts.push(format!("User brief: {prompt}"));
                }
                parts.join(" ")
            }
        };

        let completion = with_retry(self.max_retries, self.retry_base_delay, || {
            self.vlm.analyze_image(&image_reference.saved_path, &instruction)
        })
        .await
        .map_err(|(kind, message)| crate::error::Error::Provider {
            stage: self.name().to_string(),
            kind,
            message,
        })?;
        ctx.record_usage(
            format!("{}:vlm:{}", self.name(), self.vlm.model_id()),
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
        );

        ctx.image_analysis_result = Some(parse_image_analysis(&completion.json, mode)?);
        ctx.image_eval_ran_this_run = true;
        Ok(())
    }
}

fn parse_image_analysis(json: &Value, mode: AnalysisMode) -> Result<ImageAnalysisResult> {
    let main_subject = json
        .get("main_subject")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::contract_violation("image_eval", "VLM response missing 'main_subject'")
        })?
        .to_string();

    let detailed = if mode == AnalysisMode::Detailed {
        Some(DetailedImageAnalysis {
            secondary_elements: json
                .get("secondary_elements")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            composition_cues: json
                .get("composition_cues")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        })
    } else {
        None
    };

    Ok(ImageAnalysisResult {
        main_subject,
        detailed,
    })
}

fn parse_logo_analysis(json: &Value) -> Result<LogoAnalysis> {
    Ok(LogoAnalysis {
        logo_style: json
            .get("logo_style")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        has_text: json
            .get("has_text")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        text_content: json
            .get("text_content")
            .and_then(Value::as_str)
            .map(str::to_string),
        dominant_colors: json
            .get("dominant_colors")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    })
}
