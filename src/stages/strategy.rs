//! Strategy stage.
//!
//! Produces `ctx.suggested_marketing_strategies`: a two-step LLM call (niche
//! identification, then strategy composition) per requested variant, with a
//! deterministic keyword-derived fallback when the LLM call fails.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{MarketingStrategy, PipelineContext};
use crate::error::Result;
use crate::executor::retry::with_retry;
use crate::providers::ChatProvider;

use super::Stage;

pub struct StrategyStage<'a> {
    pub llm: &'a dyn ChatProvider,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
}

const FALLBACK_AUDIENCES: &[&str] = &[
    "value-conscious everyday shoppers",
    "design-forward early adopters",
    "busy professionals seeking convenience",
];
const FALLBACK_OBJECTIVES: &[&str] = &["drive trial", "build brand affinity", "boost conversions"];
const FALLBACK_VOICES: &[&str] = &["warm and approachable", "bold and confident", "calm and premium"];

fn fallback_strategy(keywords: &[&str], index: usize) -> MarketingStrategy {
    let niche = keywords.first().copied().unwrap_or("general market");
    MarketingStrategy {
        target_audience: FALLBACK_AUDIENCES[index % FALLBACK_AUDIENCES.len()].to_string(),
        target_objective: FALLBACK_OBJECTIVES[index % FALLBACK_OBJECTIVES.len()].to_string(),
        target_voice: Some(FALLBACK_VOICES[index % FALLBACK_VOICES.len()].to_string()),
        target_niche: Some(niche.to_string()),
    }
}

fn derive_keywords(ctx: &PipelineContext) -> Vec<&str> {
    ctx.prompt
        .as_deref()
        .into_iter()
        .chain(ctx.task_description.as_deref())
        .flat_map(|s| s.split_whitespace())
        .filter(|w| w.len() > 3)
        .collect()
}

/// Parses one strategy record from the LLM's JSON response.
///
/// There is no context field today carrying a user-supplied partial
/// strategy to merge in ahead of the LLM's fields; if one is added later,
/// it belongs here as an `Option<&MarketingStrategy>` parameter overriding
/// each field in turn.
fn parse_strategy(json: &Value) -> MarketingStrategy {
    MarketingStrategy {
        target_audience: json
            .get("target_audience")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        target_objective: json
            .get("target_objective")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        target_voice: json.get("target_voice").and_then(Value::as_str).map(str::to_string),
        target_niche: json.get("target_niche").and_then(Value::as_str).map(str::to_string),
    }
}

#[async_trait]
impl<'a> Stage for StrategyStage<'a> {
    fn name(&self) -> &'static str {
        "strategy"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let keywords = derive_keywords(ctx);
        let subject = ctx
            .image_analysis_result
            .as_ref()
            .map(|r| r.main_subject.clone())
            .unwrap_or_default();
        let brief = ctx.prompt.clone().unwrap_or_default();

        let mut strategies = Vec::with_capacity(ctx.num_variants);

        for i in 0..ctx.num_variants {
            // Step 1: niche identification.
            let niche_prompt = format!(
                "Identify a distinct marketing niche #{i} for subject '{subject}' given brief: \
                 '{brief}'."
            );
            let niche_result = with_retry(self.max_retries, self.retry_base_delay, || {
                self.llm
                    .complete_json("Identify a marketing niche as JSON {\"niche\": string}.", &niche_prompt)
            })
            .await;

            // Step 2: strategy composition, informed by the niche.
            let strategy_result = match niche_result {
                Ok(niche_completion) => {
                    ctx.record_usage(
                        format!("{}:llm:{}", self.name(), self.llm.model_id()),
                        niche_completion.usage.prompt_tokens,
                        niche_completion.usage.completion_tokens,
                    );
                    let niche = niche_completion
                        .json
                        .get("niche")
                        .and_then(Value::as_str)
                        .unwrap_or("general")
                        .to_string();
                    let compose_prompt = format!(
                        "Compose a marketing strategy for niche '{niche}', subject '{subject}', \
                         brief '{brief}' as JSON {{target_audience, target_objective, \
                         target_voice, target_niche}}."
                    );
                    with_retry(self.max_retries, self.retry_base_delay, || {
                        self.llm.complete_json(
                            "Return a marketing strategy as strict JSON.",
                            &compose_prompt,
                        )
                    })
                    .await
                }
                Err(e) => Err(e),
            };

            match strategy_result {
                Ok(completion) => {
                    ctx.record_usage(
                        format!("{}:llm:{}", self.name(), self.llm.model_id()),
                        completion.usage.prompt_tokens,
                        completion.usage.completion_tokens,
                    );
                    strategies.push(parse_strategy(&completion.json));
                }
                Err((_, message)) => {
                    ctx.record_diagnostic(
                        self.name(),
                        "degraded_strategy",
                        format!("falling back to keyword-derived strategy: {message}"),
                    );
                    strategies.push(fallback_strategy(&keywords, i));
                }
            }
        }

        ctx.suggested_marketing_strategies = Some(strategies);
        Ok(())
    }
}
