//! Style Adaptation stage.
//!
//! Runs only when `needs_style_adaptation(ctx)` holds. Produces an
//! adapted visual concept and bridges the skipped creative block so the
//! index-alignment invariant holds for downstream stages.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{GeneratedImagePrompt, PipelineContext, VisualConcept};
use crate::error::{Error, Result};
use crate::executor::retry::with_retry;
use crate::preset::merge_recipe_with_overrides;
use crate::providers::ChatProvider;

use super::Stage;

pub struct StyleAdaptationStage<'a> {
    pub llm: &'a dyn ChatProvider,
    /// The model's context-window size in tokens, used for the token-budget
    /// safeguard.
    pub context_window_tokens: usize,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
}

/// True iff `ctx.preset_type == STYLE_RECIPE` AND (`ctx.overrides` contains a
/// non-empty prompt override OR `ctx.image_analysis_result` was produced by
/// `image_eval` in this run).
pub fn needs_style_adaptation(ctx: &PipelineContext) -> bool {
    let is_style_recipe = matches!(ctx.preset_type, Some(crate::preset::PresetType::StyleRecipe));
    if !is_style_recipe {
        return false;
    }
    crate::preset::overrides_has_prompt(&ctx.overrides) || ctx.image_eval_ran_this_run
}

/// Rough token estimate: ~4 characters per token, matching the
/// character-based heuristic `dashflow`'s context-window management uses
/// before falling back to exact tokenization.
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

#[async_trait]
impl<'a> Stage for StyleAdaptationStage<'a> {
    fn name(&self) -> &'static str {
        "style_adaptation"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let mut recipe = ctx
            .preset_data
            .as_ref()
            .and_then(|d| d.style_recipe.clone())
            .ok_or_else(|| {
                Error::precondition(self.name(), "preset_data.style_recipe is required")
            })?;

        let new_subject = ctx
            .image_analysis_result
            .as_ref()
            .map(|r| r.main_subject.clone());
        let new_prompt = ctx
            .overrides
            .as_ref()
            .and_then(|v| v.get("prompt"))
            .and_then(Value::as_str)
            .map(str::to_string);

        // Token-budget safeguard: prune verbose fields in priority order
        // until the estimate fits under 85% of the context window.
        let budget = (self.context_window_tokens as f64 * 0.85) as usize;
        let mut pruned_fields = Vec::new();
        loop {
            let estimate = estimate_tokens(&recipe_and_request_text(
                &recipe,
                new_subject.as_deref(),
                new_prompt.as_deref(),
            ));
            if estimate <= budget {
                break;
            }
            if recipe.visual_concept.creative_reasoning.take().is_some() {
                pruned_fields.push("creative_reasoning");
                continue;
            }
            if recipe.visual_concept.texture_and_details.take().is_some() {
                pruned_fields.push("texture_and_details");
                continue;
            }
            if recipe.style_guidance.style_rationale.take().is_some() {
                pruned_fields.push("style_rationale");
                continue;
            }
            break; // nothing left to prune
        }
        if !pruned_fields.is_empty() {
            ctx.record_diagnostic(
                self.name(),
                "recipe_pruned",
                format!("pruned fields to fit context window: {pruned_fields:?}"),
            );
        }

        let prompt = adaptation_prompt(&recipe, new_subject.as_deref(), new_prompt.as_deref());
        let completion = with_retry(self.max_retries, self.retry_base_delay, || {
            self.llm.complete_json(
                "Adapt this style recipe's visual concept to the new inputs as strict JSON. \
                 Preserve lighting_and_mood, color_palette, and visual_style unless the new \
                 request contradicts them. This is a stylistic transfer, not a corrective edit.",
                &prompt,
            )
        })
        .await
        .map_err(|(kind, message)| Error::Provider {
            stage: self.name().to_string(),
            kind,
            message,
        })?;
        ctx.record_usage(
            format!("{}:llm:{}", self.name(), self.llm.model_id()),
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
        );

        let adapted = parse_adapted_concept(&completion.json, &recipe.visual_concept);

        // Part 2: bridge the skipped creative block at index 0.
        ctx.generated_image_prompts = Some(vec![GeneratedImagePrompt {
            source_strategy_index: 0,
            visual_concept: adapted.clone(),
        }]);
        ctx.suggested_marketing_strategies = Some(vec![recipe.strategy.clone()]);
        ctx.style_guidance_sets = Some(vec![recipe.style_guidance.clone()]);

        if let Some(data) = ctx.preset_data.as_mut() {
            data.visual_concept = Some(adapted);
        }

        // Any remaining overrides are applied to preset_data after adaptation.
        if let Some(overrides) = ctx.overrides.clone() {
            let merged = merge_recipe_with_overrides(&recipe, &overrides);
            if let Some(data) = ctx.preset_data.as_mut() {
                data.style_recipe = Some(merged);
            }
        }

        Ok(())
    }
}

fn recipe_and_request_text(
    recipe: &crate::preset::StyleRecipe,
    new_subject: Option<&str>,
    new_prompt: Option<&str>,
) -> String {
    format!(
        "{} {} {} {} {} {}",
        recipe.visual_concept.creative_reasoning.as_deref().unwrap_or(""),
        recipe.visual_concept.texture_and_details.as_deref().unwrap_or(""),
        recipe.style_guidance.style_rationale.as_deref().unwrap_or(""),
        recipe.final_prompt,
        new_subject.unwrap_or(""),
        new_prompt.unwrap_or(""),
    )
}

fn adaptation_prompt(
    recipe: &crate::preset::StyleRecipe,
    new_subject: Option<&str>,
    new_prompt: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Saved recipe visual concept: lighting_and_mood='{}', color_palette='{}', \
         visual_style='{}', composition_and_framing='{}', background_environment='{}'.",
        recipe.visual_concept.lighting_and_mood,
        recipe.visual_concept.color_palette,
        recipe.visual_concept.visual_style,
        recipe.visual_concept.composition_and_framing,
        recipe.visual_concept.background_environment,
    );
    match (new_prompt, new_subject) {
        (Some(p), _) => {
            // New user prompt wins over a contradicting recipe field.
            prompt.push_str(&format!(" New user concept (takes precedence): '{p}'."));
        }
        (None, Some(subject)) => {
            // Only a new image analysis present: its subject becomes the new main_subject.
            prompt.push_str(&format!(
                " A new reference image was analyzed; its main subject is '{subject}'. Use it \
                 as the new main_subject."
            ));
        }
        (None, None) => {}
    }
    prompt
}

fn parse_adapted_concept(json: &Value, base: &VisualConcept) -> VisualConcept {
    let get_string = |key: &str, fallback: &str| {
        json.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    };
    let get_optional = |key: &str, fallback: &Option<String>| {
        json.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| fallback.clone())
    };

    VisualConcept {
        main_subject: get_optional("main_subject", &base.main_subject),
        composition_and_framing: get_string(
            "composition_and_framing",
            &base.composition_and_framing,
        ),
        background_environment: get_string(
            "background_environment",
            &base.background_environment,
        ),
        foreground_elements: get_optional("foreground_elements", &base.foreground_elements),
        // Preserved unless the adaptation explicitly overrides them.
        lighting_and_mood: get_string("lighting_and_mood", &base.lighting_and_mood),
        color_palette: get_string("color_palette", &base.color_palette),
        visual_style: get_string("visual_style", &base.visual_style),
        texture_and_details: get_optional("texture_and_details", &base.texture_and_details),
        promotional_text_visuals: get_optional(
            "promotional_text_visuals",
            &base.promotional_text_visuals,
        ),
        branding_visuals: get_optional("branding_visuals", &base.branding_visuals),
        negative_elements: get_optional("negative_elements", &base.negative_elements),
        creative_reasoning: get_optional("creative_reasoning", &base.creative_reasoning),
    }
}
