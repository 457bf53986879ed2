//! End-to-end Executor scenarios: default generation, instructed edit
//! with branding, Style Recipe subject swap, Style Recipe with override
//! prompt, and caption regeneration.

use std::sync::Arc;

use campaignflow::config::PipelineConfig;
use campaignflow::context::{BrandKit, ImageReference, Platform, PipelineContext};
use campaignflow::executor::Executor;
use campaignflow::preset::memory::InMemoryPresetStore;
use campaignflow::preset::{Preset, PresetStore, PresetType, StyleRecipe};
use campaignflow::progress::{self, ProgressEvent, RunStatus};
use campaignflow::providers::stub::{StubChatProvider, StubImageGenProvider, StubVlmProvider};

/// One JSON object shaped to satisfy every stage's parser at once: niche and
/// strategy fields for Strategy, style fields for Style Guide, visual-concept
/// fields for Creative Expert/Style Adaptation, image/logo analysis fields
/// for Image Eval, assessment fields for Image Assessment, and brief/caption
/// fields for the caption mini-pipeline.
fn omnibus_response() -> serde_json::Value {
    serde_json::json!({
        "niche": "specialty coffee",
        "target_audience": "young urban coffee enthusiasts",
        "target_objective": "drive seasonal trial",
        "target_voice": "warm and inviting",
        "target_niche": "specialty coffee",

        "style_description": "cozy editorial warmth",
        "style_rationale": "echoes the festive season",
        "style_keywords": ["cozy", "warm", "festive"],

        "main_subject": "a festive seasonal latte",
        "composition_and_framing": "close-up three-quarter shot",
        "background_environment": "a sunlit cafe window",
        "foreground_elements": "a cinnamon stick garnish",
        "lighting_and_mood": "warm golden hour light",
        "color_palette": "cream, cinnamon, deep red",
        "visual_style": "editorial food photography",
        "texture_and_details": "visible milk foam texture",
        "promotional_text_visuals": "Limited time only",
        "branding_visuals": "logo stitched subtly onto the cup sleeve",
        "negative_elements": "no other beverages in frame",
        "creative_reasoning": "ties the festive season to comfort",

        "secondary_elements": ["a wooden table", "a knit scarf"],
        "composition_cues": ["rule of thirds", "shallow depth of field"],

        "logo_style": "minimalist wordmark",
        "has_text": true,
        "text_content": "Brew & Co.",
        "dominant_colors": ["#1A2B3C", "#FFD700"],

        "alignment_score": 0.92,
        "defects": [],
        "text_rendering_accuracy": 0.95,

        "core_message": "Cozy up with our festive latte this season",
        "key_themes": ["cozy", "festive", "seasonal"],
        "seo_keywords": ["festive latte", "holiday coffee"],
        "target_emotion": "warmth",
        "tone_of_voice": "warm and inviting",
        "platform_optimizations": {"instagram_square": "square crop, bold first line"},
        "primary_call_to_action": "Order yours today",
        "hashtags": ["#FestiveLatte", "#CozySeason"],
        "emoji_suggestions": ["☕", "🍂"],
        "task_type_notes": serde_json::Value::Null,

        "caption": "Cozy up with our festive latte ☕ this season. #FestiveLatte"
    })
}

fn build_executor(runs_root: std::path::PathBuf, preset_store: Arc<dyn PresetStore>) -> Executor {
    let (progress, _rx) = progress::channel();
    let mut config = PipelineConfig::default();
    config.runs_root = runs_root;
    Executor::new(
        config,
        Arc::new(StubChatProvider {
            model_id: "stub-chat".to_string(),
            response: omnibus_response(),
        }),
        Arc::new(StubVlmProvider {
            model_id: "stub-vlm".to_string(),
            response: omnibus_response(),
        }),
        Arc::new(StubImageGenProvider {
            model_id: "stub-image".to_string(),
        }),
        None,
        preset_store,
        progress,
    )
}

fn empty_preset_store() -> Arc<dyn PresetStore> {
    Arc::new(InMemoryPresetStore::new())
}

/// Default generation. All stages run; lists are index-aligned
/// at `num_variants`.
#[tokio::test]
async fn default_generation_runs_all_stages_index_aligned() {
    let runs_dir = tempfile::tempdir().unwrap();
    let executor = build_executor(runs_dir.path().to_path_buf(), empty_preset_store());

    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 2, 2);
    ctx.prompt = Some("festive latte promo in cozy warm tones".to_string());

    let status = executor.run_async(&mut ctx, None).await.unwrap();
    assert_eq!(status, RunStatus::Success);

    assert_eq!(ctx.suggested_marketing_strategies.as_ref().unwrap().len(), 2);
    assert_eq!(ctx.style_guidance_sets.as_ref().unwrap().len(), 2);
    assert_eq!(ctx.generated_image_prompts.as_ref().unwrap().len(), 2);
    assert_eq!(ctx.final_assembled_prompts.as_ref().unwrap().len(), 2);
    assert_eq!(ctx.generated_image_results.as_ref().unwrap().len(), 2);
    assert_eq!(ctx.image_assessments.as_ref().unwrap().len(), 2);
    assert!(ctx.image_analysis_result.is_none(), "no reference image was supplied");

    let metadata_path = runs_dir.path().join(ctx.run_id.to_string()).join("pipeline_metadata.json");
    assert!(metadata_path.exists());
}

/// Instructed edit with branding. Image Eval runs in detailed
/// mode and performs logo analysis; branding_visuals is populated.
#[tokio::test]
async fn instructed_edit_with_branding_runs_detailed_and_logo_analysis() {
    let runs_dir = tempfile::tempdir().unwrap();
    let executor = build_executor(runs_dir.path().to_path_buf(), empty_preset_store());

    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
    ctx.image_reference = Some(ImageReference {
        saved_path: "reference.png".to_string(),
        instruction: Some("Add the logo on the t-shirt chest".to_string()),
    });
    ctx.brand_kit = Some(BrandKit {
        colors: vec!["#1A2B3C".to_string(), "#FFD700".to_string()],
        brand_voice_description: Some("bold and confident".to_string()),
        logo_analysis: None,
        saved_logo_path_in_run_dir: Some("logo.png".to_string()),
    });
    ctx.apply_branding = true;

    let status = executor.run_async(&mut ctx, None).await.unwrap();
    assert_eq!(status, RunStatus::Success);

    let analysis = ctx.image_analysis_result.expect("detailed analysis must run");
    assert_eq!(analysis.main_subject, "a festive seasonal latte");
    assert!(analysis.detailed.is_some());

    let kit = ctx.brand_kit.expect("brand_kit survives the run");
    let logo = kit.logo_analysis.expect("logo analysis must have populated logo_analysis");
    assert_eq!(logo.logo_style, "minimalist wordmark");

    let concept = &ctx.generated_image_prompts.unwrap()[0].visual_concept;
    assert!(concept.branding_visuals.is_some());
}

fn sample_recipe() -> StyleRecipe {
    use campaignflow::context::{MarketingStrategy, StyleGuidance, VisualConcept};
    StyleRecipe {
        visual_concept: VisualConcept {
            main_subject: Some("a ceramic espresso cup".to_string()),
            composition_and_framing: "overhead flat-lay".to_string(),
            background_environment: "a marble countertop".to_string(),
            lighting_and_mood: "soft diffused daylight".to_string(),
            color_palette: "white, sage green, matte black".to_string(),
            visual_style: "minimalist studio photography".to_string(),
            ..Default::default()
        },
        strategy: MarketingStrategy {
            target_audience: "home baristas".to_string(),
            target_objective: "showcase craftsmanship".to_string(),
            target_voice: Some("calm and premium".to_string()),
            target_niche: Some("specialty coffee gear".to_string()),
        },
        style_guidance: StyleGuidance {
            style_description: "minimalist studio calm".to_string(),
            style_rationale: Some("keeps focus on craft".to_string()),
            style_keywords: vec!["minimalist".to_string(), "calm".to_string()],
        },
        final_prompt: "a ceramic espresso cup on a marble countertop".to_string(),
    }
}

async fn insert_style_recipe_preset(store: &InMemoryPresetStore) {
    let now = chrono::Utc::now();
    store
        .insert(Preset {
            id: "recipe-1".to_string(),
            name: "Studio Calm".to_string(),
            user_id: "user-1".to_string(),
            version: 1,
            model_id: "default-image-model".to_string(),
            pipeline_version: "1.0.0".to_string(),
            preset_type: PresetType::StyleRecipe,
            input_snapshot: None,
            style_recipe: Some(sample_recipe()),
            brand_kit: None,
            usage_count: 0,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        })
        .await;
}

/// Style Recipe subject swap. The creative block is skipped,
/// Image Eval runs in minimal mode on the new reference image, and Style
/// Adaptation bridges the skipped lists.
#[tokio::test]
async fn style_recipe_subject_swap_skips_creative_block_and_bridges() {
    let runs_dir = tempfile::tempdir().unwrap();
    let store = InMemoryPresetStore::new();
    insert_style_recipe_preset(&store).await;
    let executor = build_executor(runs_dir.path().to_path_buf(), Arc::new(store));

    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
    ctx.preset_id = Some("recipe-1".to_string());
    ctx.image_reference = Some(ImageReference {
        saved_path: "muffin.png".to_string(),
        instruction: None,
    });

    let status = executor.run_async(&mut ctx, Some("user-1")).await.unwrap();
    assert_eq!(status, RunStatus::Success);

    assert_eq!(
        ctx.skip_stages,
        std::collections::HashSet::from([
            "strategy".to_string(),
            "style_guide".to_string(),
            "creative_expert".to_string(),
        ])
    );

    let analysis = ctx.image_analysis_result.expect("minimal subject extraction must run");
    assert!(analysis.detailed.is_none(), "minimal mode carries no detailed breakdown");

    let concepts = ctx.generated_image_prompts.expect("style adaptation bridges this list");
    assert_eq!(concepts.len(), 1);
    assert_eq!(concepts[0].visual_concept.lighting_and_mood, "soft diffused daylight");
    assert_eq!(ctx.suggested_marketing_strategies.unwrap().len(), 1);
    assert_eq!(ctx.style_guidance_sets.unwrap().len(), 1);
}

/// Style Recipe with an override prompt and no new image. Image
/// Eval is skipped entirely (no image to analyze); Style Adaptation still
/// runs because the prompt override alone satisfies the trigger.
#[tokio::test]
async fn style_recipe_with_override_prompt_skips_image_eval_but_adapts() {
    let runs_dir = tempfile::tempdir().unwrap();
    let store = InMemoryPresetStore::new();
    insert_style_recipe_preset(&store).await;
    let executor = build_executor(runs_dir.path().to_path_buf(), Arc::new(store));

    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
    ctx.preset_id = Some("recipe-1".to_string());
    ctx.overrides = Some(serde_json::json!({ "prompt": "a blueberry muffin on a ceramic plate" }));

    let status = executor.run_async(&mut ctx, Some("user-1")).await.unwrap();
    assert_eq!(status, RunStatus::Success);

    assert!(ctx.image_analysis_result.is_none(), "no reference image was supplied");
    assert!(!ctx.image_eval_ran_this_run);

    let concepts = ctx.generated_image_prompts.expect("style adaptation must still bridge this list");
    assert_eq!(concepts.len(), 1);
    // Style fields are retained from the recipe even though the subject/prompt changed.
    assert_eq!(concepts[0].visual_concept.visual_style, "minimalist studio photography");
}

/// Caption regeneration, writer-only. Two versions are persisted
/// with identical briefs, and a `caption_added` event fires for each.
#[tokio::test]
async fn caption_regeneration_writer_only_persists_two_versions_same_brief() {
    use campaignflow::stages::caption::{CaptionRequest, CaptionSettings};

    let runs_dir = tempfile::tempdir().unwrap();
    let (progress, mut rx) = progress::channel();
    let mut config = PipelineConfig::default();
    config.runs_root = runs_dir.path().to_path_buf();
    let executor = Executor::new(
        config,
        Arc::new(StubChatProvider {
            model_id: "stub-chat".to_string(),
            response: omnibus_response(),
        }),
        Arc::new(StubVlmProvider {
            model_id: "stub-vlm".to_string(),
            response: omnibus_response(),
        }),
        Arc::new(StubImageGenProvider {
            model_id: "stub-image".to_string(),
        }),
        None,
        empty_preset_store(),
        progress,
    );

    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
    ctx.prompt = Some("festive latte promo in cozy warm tones".to_string());
    executor.run_async(&mut ctx, None).await.unwrap();

    let request = CaptionRequest {
        image_index: 0,
        settings: CaptionSettings::default(),
        regenerate_writer_only: false,
    };
    let v0 = executor.run_single_stage(&ctx, &request, None, 0).await.unwrap();

    let regen_request = CaptionRequest {
        image_index: 0,
        settings: CaptionSettings::default(),
        regenerate_writer_only: true,
    };
    let v1 = executor
        .run_single_stage(&ctx, &regen_request, Some(v0.brief.clone()), 1)
        .await
        .unwrap();

    assert_eq!(v0.version, 0);
    assert_eq!(v1.version, 1);
    assert_eq!(v0.brief.core_message, v1.brief.core_message);
    assert_eq!(v0.brief.hashtags, v1.brief.hashtags);

    let captions_dir = runs_dir.path().join(ctx.run_id.to_string()).join("captions").join("0");
    assert!(captions_dir.join("v0.txt").exists());
    assert!(captions_dir.join("v0_brief.json").exists());
    assert!(captions_dir.join("v1.txt").exists());
    assert!(captions_dir.join("v1_brief.json").exists());

    let mut caption_added_count = 0;
    while let Ok(Some(event)) = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await {
        if matches!(event, ProgressEvent::CaptionAdded { .. }) {
            caption_added_count += 1;
        }
    }
    assert_eq!(caption_added_count, 2);
}
