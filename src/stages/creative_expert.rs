//! Creative Expert stage.
//!
//! Per-variant-parallel: one LLM call per `(strategy_i, style_guidance_i)`
//! pair, producing a structured `visual_concept`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::context::{MarketingStrategy, PipelineContext, StyleGuidance, VisualConcept};
use crate::error::{Error, Result};
use crate::executor::retry::with_retry;
use crate::providers::ChatProvider;
use crate::text_util::split_literal_and_directive;

use super::{run_per_variant_bounded, Stage};

pub struct CreativeExpertStage<'a> {
    pub llm: &'a dyn ChatProvider,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub worker_pool: &'a Semaphore,
}

fn build_prompt(
    ctx: &PipelineContext,
    strategy: &MarketingStrategy,
    style: &StyleGuidance,
) -> String {
    let mut prompt = format!(
        "Create a visual concept for audience '{}', objective '{}', style '{}'. Fields: \
         main_subject (omit if editing an existing image and preserving its subject), \
         composition_and_framing, background_environment, foreground_elements, \
         lighting_and_mood, color_palette, visual_style, texture_and_details, \
         promotional_text_visuals, branding_visuals, negative_elements, creative_reasoning.",
        strategy.target_audience, strategy.target_objective, style.style_description
    );

    let preserving_subject = ctx
        .image_reference
        .as_ref()
        .map(|r| r.instruction.is_some())
        .unwrap_or(false);
    if preserving_subject {
        prompt.push_str(" This is an edit of an existing image; preserve its main subject.");
    }

    if ctx.render_text {
        let description = ctx.task_description.as_deref().unwrap_or("");
        let (literals, directive) = split_literal_and_directive(description);
        if literals.is_empty() {
            prompt.push_str(
                " render_text is enabled with no literal quoted text supplied: generate \
                 promotional on-image text content and describe it in promotional_text_visuals.",
            );
        } else {
            prompt.push_str(&format!(
                " render_text is enabled. These exact strings must appear as literal on-image \
                 text: {}. Use this as stylistic/content guidance for the surrounding \
                 promotional_text_visuals: '{}'.",
                literals
                    .iter()
                    .map(|l| format!("\"{l}\""))
                    .collect::<Vec<_>>()
                    .join(", "),
                directive
            ));
        }
    }

    if ctx.apply_branding {
        if let Some(kit) = ctx.brand_kit.as_ref() {
            prompt.push_str(&format!(
                " apply_branding is enabled. Describe concrete placement/scale/contrast \
                 instructions in branding_visuals integrating brand colors ({}), brand voice \
                 ({}){}.",
                kit.colors.join(", "),
                kit.brand_voice_description.as_deref().unwrap_or("unspecified"),
                kit.logo_analysis
                    .as_ref()
                    .map(|l| format!(", and the logo ({} style)", l.logo_style))
                    .unwrap_or_default()
            ));
        }
    }

    prompt
}

fn parse_visual_concept(json: &Value) -> VisualConcept {
    let get_string = |key: &str| json.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let get_optional = |key: &str| json.get(key).and_then(Value::as_str).map(str::to_string);

    VisualConcept {
        main_subject: get_optional("main_subject"),
        composition_and_framing: get_string("composition_and_framing"),
        background_environment: get_string("background_environment"),
        foreground_elements: get_optional("foreground_elements"),
        lighting_and_mood: get_string("lighting_and_mood"),
        color_palette: get_string("color_palette"),
        visual_style: get_string("visual_style"),
        texture_and_details: get_optional("texture_and_details"),
        promotional_text_visuals: get_optional("promotional_text_visuals"),
        branding_visuals: get_optional("branding_visuals"),
        negative_elements: get_optional("negative_elements"),
        creative_reasoning: get_optional("creative_reasoning"),
    }
}

#[async_trait]
impl<'a> Stage for CreativeExpertStage<'a> {
    fn name(&self) -> &'static str {
        "creative_expert"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let strategies = ctx
            .suggested_marketing_strategies
            .clone()
            .ok_or_else(|| Error::precondition(self.name(), "strategies not yet produced"))?;
        let styles = ctx
            .style_guidance_sets
            .clone()
            .ok_or_else(|| Error::precondition(self.name(), "style guidance not yet produced"))?;
        if strategies.len() != styles.len() {
            return Err(Error::precondition(
                self.name(),
                "strategies and style guidance are not index-aligned",
            ));
        }
        let n = strategies.len();
        let ctx_ref = &*ctx;

        let results = run_per_variant_bounded(self.worker_pool, n, |i| {
            let strategy = strategies[i].clone();
            let style = styles[i].clone();
            async move {
                let prompt = build_prompt(ctx_ref, &strategy, &style);
                with_retry(self.max_retries, self.retry_base_delay, || {
                    self.llm.complete_json(
                        "Return a structured visual concept as strict JSON.",
                        &prompt,
                    )
                })
                .await
                .map(|completion| {
                    (
                        parse_visual_concept(&completion.json),
                        completion.usage.prompt_tokens,
                        completion.usage.completion_tokens,
                    )
                })
                .map_err(|(kind, message)| Error::Provider {
                    stage: "creative_expert".to_string(),
                    kind,
                    message,
                })
            }
        })
        .await;

        let mut prompts = Vec::with_capacity(n);
        for (i, result) in results.into_iter().enumerate() {
            let (visual_concept, prompt_tokens, completion_tokens) = result?;
            ctx.record_usage(
                format!("{}:llm:{}", self.name(), self.llm.model_id()),
                prompt_tokens,
                completion_tokens,
            );
            prompts.push(crate::context::GeneratedImagePrompt {
                source_strategy_index: i,
                visual_concept,
            });
        }

        ctx.generated_image_prompts = Some(prompts);
        Ok(())
    }
}
