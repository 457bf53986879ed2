//! Caption stage: an on-demand, per-image, post-run mini-pipeline
//! (Analyst → Writer) invoked through `Executor::run_single_stage`, not part
//! of the default stage order.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{BrandKit, MarketingStrategy, VisualConcept};
use crate::error::{Error, Result};
use crate::executor::retry::with_retry;
use crate::providers::ChatProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationMode {
    Auto,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashtagStrategy {
    None,
    Minimal,
    Aggressive,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptionSettings {
    pub tone: Option<String>,
    pub call_to_action: Option<String>,
    pub include_emojis: Option<bool>,
    pub hashtag_strategy: Option<HashtagStrategy>,
    pub generation_mode: Option<GenerationMode>,
}

/// Directive strings resolved in code, never embedded as `if/else` narrative
/// inside the Analyst prompt.
#[derive(Debug, Clone)]
pub struct ResolvedInstructions {
    pub tone: String,
    pub cta: String,
    pub emojis: bool,
    pub hashtags: HashtagStrategy,
}

/// Resolves Auto vs. Custom settings into directive strings. Tactical
/// per-run marketing voice beats the brand kit's `brand_voice_description`.
/// Custom settings never fall back to strategy/brand voice.
pub fn resolve_final_instructions(
    settings: &CaptionSettings,
    strategy: &MarketingStrategy,
    brand_voice: Option<&str>,
) -> ResolvedInstructions {
    let is_custom = settings.generation_mode == Some(GenerationMode::Custom);

    let tone = if is_custom {
        settings.tone.clone().unwrap_or_else(|| "neutral".to_string())
    } else {
        settings
            .tone
            .clone()
            .or_else(|| strategy.target_voice.clone())
            .or_else(|| brand_voice.map(str::to_string))
            .unwrap_or_else(|| "friendly".to_string())
    };

    let cta = if is_custom {
        settings
            .call_to_action
            .clone()
            .unwrap_or_else(|| "Learn more".to_string())
    } else {
        settings
            .call_to_action
            .clone()
            .unwrap_or_else(|| format!("Support: {}", strategy.target_objective))
    };

    let emojis = settings.include_emojis.unwrap_or(!is_custom);
    let hashtags = settings.hashtag_strategy.unwrap_or(HashtagStrategy::Minimal);

    ResolvedInstructions {
        tone,
        cta,
        emojis,
        hashtags,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionBrief {
    pub core_message: String,
    pub key_themes: Vec<String>,
    pub seo_keywords: Vec<String>,
    pub target_emotion: String,
    pub tone_of_voice: String,
    pub platform_optimizations: std::collections::HashMap<String, String>,
    pub primary_call_to_action: String,
    pub hashtags: Vec<String>,
    pub emoji_suggestions: Vec<String>,
    pub task_type_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionRequest {
    pub image_index: usize,
    pub settings: CaptionSettings,
    pub regenerate_writer_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionResult {
    pub version: u32,
    pub text: String,
    pub brief: CaptionBrief,
}

fn parse_brief(json: &Value) -> CaptionBrief {
    let string_array = |key: &str| -> Vec<String> {
        json.get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    CaptionBrief {
        core_message: json.get("core_message").and_then(Value::as_str).unwrap_or_default().to_string(),
        key_themes: string_array("key_themes"),
        seo_keywords: string_array("seo_keywords"),
        target_emotion: json.get("target_emotion").and_then(Value::as_str).unwrap_or_default().to_string(),
        tone_of_voice: json.get("tone_of_voice").and_then(Value::as_str).unwrap_or_default().to_string(),
        platform_optimizations: json
            .get("platform_optimizations")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default(),
        primary_call_to_action: json
            .get("primary_call_to_action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        hashtags: string_array("hashtags"),
        emoji_suggestions: string_array("emoji_suggestions"),
        task_type_notes: json.get("task_type_notes").and_then(Value::as_str).map(str::to_string),
    }
}

/// Runs the Analyst step: strategy + visual concept + alt text + brand voice
/// + resolved instructions → `CaptionBrief`.
pub async fn run_analyst(
    llm: &dyn ChatProvider,
    strategy: &MarketingStrategy,
    visual_concept: &VisualConcept,
    alt_text: &str,
    brand_kit: Option<&BrandKit>,
    platform_name: &str,
    resolved: &ResolvedInstructions,
    max_retries: usize,
    retry_base_delay: Duration,
) -> Result<(CaptionBrief, u64, u64)> {
    let brand_voice = brand_kit.and_then(|k| k.brand_voice_description.as_deref());
    let prompt = format!(
        "Audience: {}. Objective: {}. Visual concept: {} in {}. Alt text: {alt_text}. Brand \
         voice context: {}. Directives — tone: {}, call_to_action: {}, include_emojis: {}, \
         hashtag_strategy: {:?}. Platform: {platform_name}. Produce a CaptionBrief as strict \
         JSON with fields core_message, key_themes, seo_keywords, target_emotion, \
         tone_of_voice, platform_optimizations, primary_call_to_action, hashtags, \
         emoji_suggestions, task_type_notes.",
        strategy.target_audience,
        strategy.target_objective,
        visual_concept.main_subject.as_deref().unwrap_or("the subject"),
        visual_concept.background_environment,
        brand_voice.unwrap_or("none"),
        resolved.tone,
        resolved.cta,
        resolved.emojis,
        resolved.hashtags,
    );
    let completion = with_retry(max_retries, retry_base_delay, || {
        llm.complete_json("Return a CaptionBrief as strict JSON.", &prompt)
    })
    .await
    .map_err(|(kind, message)| Error::Provider {
        stage: "caption".to_string(),
        kind,
        message,
    })?;
    Ok((
        parse_brief(&completion.json),
        completion.usage.prompt_tokens,
        completion.usage.completion_tokens,
    ))
}

/// Runs the Writer step: `CaptionBrief` only → caption text.
pub async fn run_writer(
    llm: &dyn ChatProvider,
    brief: &CaptionBrief,
    max_retries: usize,
    retry_base_delay: Duration,
) -> Result<(String, u64, u64)> {
    let prompt = format!(
        "Write a social caption from this brief: core message '{}', themes {:?}, emotion '{}', \
         tone '{}', CTA '{}', hashtags {:?}.",
        brief.core_message,
        brief.key_themes,
        brief.target_emotion,
        brief.tone_of_voice,
        brief.primary_call_to_action,
        brief.hashtags,
    );
    let completion = with_retry(max_retries, retry_base_delay, || {
        llm.complete_json("Return {\"caption\": string} as strict JSON.", &prompt)
    })
    .await
    .map_err(|(kind, message)| Error::Provider {
        stage: "caption".to_string(),
        kind,
        message,
    })?;
    let text = completion
        .json
        .get("caption")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::contract_violation("caption", "writer response missing 'caption'"))?
        .to_string();
    Ok((text, completion.usage.prompt_tokens, completion.usage.completion_tokens))
}
