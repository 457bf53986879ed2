//! Style Guide stage.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{PipelineContext, StyleGuidance};
use crate::error::{Error, Result};
use crate::executor::retry::with_retry;
use crate::providers::ChatProvider;

use super::Stage;

pub struct StyleGuideStage<'a> {
    pub llm: &'a dyn ChatProvider,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
}

fn build_prompt(ctx: &PipelineContext, strategy_index: usize) -> Result<String> {
    let strategies = ctx
        .suggested_marketing_strategies
        .as_ref()
        .ok_or_else(|| Error::precondition("style_guide", "strategies not yet produced"))?;
    let strategy = strategies
        .get(strategy_index)
        .ok_or_else(|| Error::precondition("style_guide", "strategy index out of range"))?;

    let mut prompt = format!(
        "Produce style guidance (style_description, style_rationale, style_keywords) for a \
         strategy targeting '{}' with objective '{}'.",
        strategy.target_audience, strategy.target_objective
    );

    if let Some(kit) = ctx.brand_kit.as_ref() {
        if !kit.colors.is_empty() {
            prompt.push_str(&format!(
                " Brand colors are a STRICT constraint, not a suggestion: {}.",
                kit.colors.join(", ")
            ));
        }
        if let Some(voice) = &kit.brand_voice_description {
            prompt.push_str(&format!(" Brand voice: {voice}."));
        }
        if let Some(logo) = &kit.logo_analysis {
            if !logo.dominant_colors.is_empty() {
                prompt.push_str(&format!(
                    " Additionally harmonize the palette with the logo's dominant colors: {}.",
                    logo.dominant_colors.join(", ")
                ));
            }
        }
    }

    Ok(prompt)
}

fn parse_style_guidance(json: &Value) -> StyleGuidance {
    StyleGuidance {
        style_description: json
            .get("style_description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        style_rationale: json
            .get("style_rationale")
            .and_then(Value::as_str)
            .map(str::to_string),
        style_keywords: json
            .get("style_keywords")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

#[async_trait]
impl<'a> Stage for StyleGuideStage<'a> {
    fn name(&self) -> &'static str {
        "style_guide"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let n = ctx
            .suggested_marketing_strategies
            .as_ref()
            .map(Vec::len)
            .unwrap_or(0);

        let mut sets = Vec::with_capacity(n);
        for i in 0..n {
            let prompt = build_prompt(ctx, i)?;
            let completion = with_retry(self.max_retries, self.retry_base_delay, || {
                self.llm.complete_json("Return style guidance as strict JSON.", &prompt)
            })
            .await
            .map_err(|(kind, message)| crate::error::Error::Provider {
                stage: self.name().to_string(),
                kind,
                message,
            })?;
            ctx.record_usage(
                format!("{}:llm:{}", self.name(), self.llm.model_id()),
                completion.usage.prompt_tokens,
                completion.usage.completion_tokens,
            );
            sets.push(parse_style_guidance(&completion.json));
        }

        ctx.style_guidance_sets = Some(sets);
        Ok(())
    }
}
