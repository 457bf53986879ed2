//! Preset subsystem tests: resolution, merge-with-overrides, and the
//! optimistic-concurrency law.

use campaignflow::context::{BrandKit, MarketingStrategy, Platform, PipelineContext, StyleGuidance, VisualConcept};
use campaignflow::preset::memory::InMemoryPresetStore;
use campaignflow::preset::{
    merge_recipe_with_overrides, validate_overrides, InputSnapshot, Preset, PresetStore, PresetType,
    StyleRecipe,
};

fn sample_strategy() -> MarketingStrategy {
    MarketingStrategy {
        target_audience: "outdoor enthusiasts".to_string(),
        target_objective: "drive trial".to_string(),
        target_voice: Some("bold and confident".to_string()),
        target_niche: Some("hiking gear".to_string()),
    }
}

fn sample_style_guidance() -> StyleGuidance {
    StyleGuidance {
        style_description: "rugged, earth-toned realism".to_string(),
        style_rationale: Some("echoes the trail".to_string()),
        style_keywords: vec!["rugged".to_string(), "earthy".to_string()],
    }
}

fn sample_visual_concept() -> VisualConcept {
    VisualConcept {
        main_subject: Some("a pair of hiking boots".to_string()),
        composition_and_framing: "three-quarter product shot".to_string(),
        background_environment: "a mossy forest trail".to_string(),
        lighting_and_mood: "soft morning light".to_string(),
        color_palette: "moss green, charcoal, burnt orange".to_string(),
        visual_style: "editorial product photography".to_string(),
        ..Default::default()
    }
}

fn sample_recipe() -> StyleRecipe {
    StyleRecipe {
        visual_concept: sample_visual_concept(),
        strategy: sample_strategy(),
        style_guidance: sample_style_guidance(),
        final_prompt: "a pair of hiking boots on a mossy forest trail".to_string(),
    }
}

fn base_preset(preset_type: PresetType) -> Preset {
    let now = chrono::Utc::now();
    Preset {
        id: "preset-1".to_string(),
        name: "Trailhead".to_string(),
        user_id: "user-1".to_string(),
        version: 1,
        model_id: "default-image-model".to_string(),
        pipeline_version: "1.0.0".to_string(),
        preset_type,
        input_snapshot: None,
        style_recipe: None,
        brand_kit: None,
        usage_count: 0,
        last_used_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn input_template_request_fields_win_over_template() {
    let mut preset = base_preset(PresetType::InputTemplate);
    preset.input_snapshot = Some(InputSnapshot {
        prompt: Some("template prompt".to_string()),
        task_description: Some("template description".to_string()),
        ..Default::default()
    });
    let store = InMemoryPresetStore::new();
    store.insert(preset).await;

    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 2, 2);
    ctx.prompt = Some("request-supplied prompt".to_string());
    ctx.preset_id = Some("preset-1".to_string());

    campaignflow::preset::load_and_apply_preset(&mut ctx, "preset-1", "user-1", &store)
        .await
        .unwrap();

    assert_eq!(ctx.prompt.as_deref(), Some("request-supplied prompt"));
    assert_eq!(ctx.task_description.as_deref(), Some("template description"));
    assert!(ctx.skip_stages.is_empty());
}

#[tokio::test]
async fn style_recipe_sets_skip_stages_and_preset_data() {
    let mut preset = base_preset(PresetType::StyleRecipe);
    preset.style_recipe = Some(sample_recipe());
    let store = InMemoryPresetStore::new();
    store.insert(preset).await;

    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
    ctx.preset_id = Some("preset-1".to_string());

    campaignflow::preset::load_and_apply_preset(&mut ctx, "preset-1", "user-1", &store)
        .await
        .unwrap();

    assert_eq!(
        ctx.skip_stages,
        std::collections::HashSet::from([
            "strategy".to_string(),
            "style_guide".to_string(),
            "creative_expert".to_string(),
        ])
    );
    let data = ctx.preset_data.expect("preset_data must be populated");
    assert!(data.style_recipe.is_some());
    assert_eq!(
        data.visual_concept.unwrap().main_subject.as_deref(),
        Some("a pair of hiking boots")
    );
}

#[tokio::test]
async fn preset_forbidden_when_user_does_not_own_it() {
    let preset = base_preset(PresetType::InputTemplate);
    let store = InMemoryPresetStore::new();
    store.insert(preset).await;

    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
    let err = campaignflow::preset::load_and_apply_preset(&mut ctx, "preset-1", "someone-else", &store)
        .await
        .unwrap_err();
    assert!(matches!(err, campaignflow::Error::PresetForbidden { .. }));
}

/// Two clients read version 7; the first update at version 7 is accepted
/// and stored version becomes 8; a second update still carrying version 7
/// is rejected and the stored state is unchanged.
#[tokio::test]
async fn concurrent_updates_enforce_optimistic_concurrency() {
    let mut preset = base_preset(PresetType::InputTemplate);
    preset.version = 7;
    let store = InMemoryPresetStore::new();
    store.insert(preset.clone()).await;

    let mut client_a_edit = preset.clone();
    client_a_edit.name = "Trailhead (A's edit)".to_string();
    let accepted = store.update("preset-1", 7, client_a_edit).await.unwrap();
    assert_eq!(accepted.version, 8);

    let mut client_b_edit = preset.clone();
    client_b_edit.name = "Trailhead (B's edit)".to_string();
    let rejected = store.update("preset-1", 7, client_b_edit).await.unwrap_err();
    assert!(matches!(
        rejected,
        campaignflow::Error::PresetVersionConflict {
            expected: 7,
            actual: 8,
            ..
        }
    ));

    let stored = store.get("preset-1").await.unwrap();
    assert_eq!(stored.version, 8);
    assert_eq!(stored.name, "Trailhead (A's edit)");
}

#[test]
fn empty_overrides_is_identity() {
    let recipe = sample_recipe();
    let merged = merge_recipe_with_overrides(&recipe, &serde_json::json!({}));
    assert_eq!(merged.final_prompt, recipe.final_prompt);
    assert_eq!(
        merged.visual_concept.background_environment,
        recipe.visual_concept.background_environment
    );
}

#[test]
fn overrides_merge_prompt_and_visual_concept_fields() {
    let recipe = sample_recipe();
    let overrides = serde_json::json!({
        "prompt": "a pair of hiking boots beside a campfire",
        "visual_concept": { "background_environment": "a campsite at dusk" }
    });
    let merged = merge_recipe_with_overrides(&recipe, &overrides);
    assert_eq!(merged.final_prompt, "a pair of hiking boots beside a campfire");
    assert_eq!(merged.visual_concept.background_environment, "a campsite at dusk");
    // Untouched fields pass through unchanged.
    assert_eq!(merged.visual_concept.lighting_and_mood, recipe.visual_concept.lighting_and_mood);
}

#[test]
fn unrecognized_override_key_is_rejected() {
    let overrides = serde_json::json!({ "final_prompt_but_wrong_key": "x" });
    let err = validate_overrides(&overrides).unwrap_err();
    assert!(matches!(err, campaignflow::Error::Validation(_)));
}

#[test]
fn recognized_override_keys_pass_validation() {
    let overrides = serde_json::json!({ "prompt": "x", "visual_concept": {} });
    assert!(validate_overrides(&overrides).is_ok());
}

#[allow(dead_code)]
fn unused_brand_kit_for_completeness() -> BrandKit {
    BrandKit::default()
}
