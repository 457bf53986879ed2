//! Prompt Assembly scenario/provider-family matrix, and the two
//! prompt-content quantified invariants: substring fidelity for literal
//! on-image text, and brand-color fidelity for branding visuals.

use campaignflow::config::ProviderFamily;
use campaignflow::context::{
    BrandKit, GeneratedImagePrompt, ImageReference, Platform, PipelineContext, VisualConcept,
};
use campaignflow::preset::PresetType;
use campaignflow::stages::prompt_assembly::PromptAssemblyStage;
use campaignflow::stages::Stage;

fn base_concept() -> VisualConcept {
    VisualConcept {
        main_subject: Some("a pair of trail running shoes".to_string()),
        composition_and_framing: "three-quarter hero shot".to_string(),
        background_environment: "a rocky mountain trail".to_string(),
        lighting_and_mood: "crisp overcast light".to_string(),
        color_palette: "slate gray, burnt orange".to_string(),
        visual_style: "editorial product photography".to_string(),
        ..Default::default()
    }
}

fn ctx_with_concept() -> PipelineContext {
    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
    ctx.generated_image_prompts = Some(vec![GeneratedImagePrompt {
        source_strategy_index: 0,
        visual_concept: base_concept(),
    }]);
    ctx
}

async fn assemble(ctx: &mut PipelineContext, family: ProviderFamily) -> String {
    let stage = PromptAssemblyStage {
        provider_family: family,
    };
    stage.execute(ctx).await.unwrap();
    ctx.final_assembled_prompts.as_ref().unwrap()[0].clone()
}

#[tokio::test]
async fn full_generation_prefix_matches_provider_family() {
    let mut ctx = ctx_with_concept();
    let literal = assemble(&mut ctx.clone(), ProviderFamily::LiteralDirective).await;
    assert!(literal.starts_with("Generate an image depicting:"));
    let narrative = assemble(&mut ctx, ProviderFamily::NarrativeFirst).await;
    assert!(narrative.starts_with("Picture a scene:"));
}

#[tokio::test]
async fn default_edit_prefix_matches_provider_family() {
    let mut ctx = ctx_with_concept();
    ctx.image_reference = Some(ImageReference {
        saved_path: "shoe.png".to_string(),
        instruction: None,
    });
    let literal = assemble(&mut ctx.clone(), ProviderFamily::LiteralDirective).await;
    assert!(literal.starts_with("Edit this image, preserving the subject's identity."));
    let narrative = assemble(&mut ctx, ProviderFamily::NarrativeFirst).await;
    assert!(narrative.starts_with("Take this photo and reimagine its setting"));
}

#[tokio::test]
async fn instructed_edit_prefix_matches_provider_family() {
    let mut ctx = ctx_with_concept();
    ctx.image_reference = Some(ImageReference {
        saved_path: "shoe.png".to_string(),
        instruction: Some("swap the background for a city street".to_string()),
    });
    let literal = assemble(&mut ctx.clone(), ProviderFamily::LiteralDirective).await;
    assert!(literal.starts_with("Edit this image per the instruction"));
    let narrative = assemble(&mut ctx, ProviderFamily::NarrativeFirst).await;
    assert!(narrative.starts_with("Following the instruction"));
}

#[tokio::test]
async fn complex_edit_prefix_matches_provider_family() {
    let mut ctx = ctx_with_concept();
    ctx.image_reference = Some(ImageReference {
        saved_path: "shoe.png".to_string(),
        instruction: Some("add the logo".to_string()),
    });
    ctx.brand_kit = Some(BrandKit {
        colors: vec!["#334455".to_string()],
        brand_voice_description: None,
        logo_analysis: None,
        saved_logo_path_in_run_dir: Some("logo.png".to_string()),
    });
    let literal = assemble(&mut ctx.clone(), ProviderFamily::LiteralDirective).await;
    assert!(literal.starts_with("Edit this image, preserving subject identity and logo fidelity."));
    let narrative = assemble(&mut ctx, ProviderFamily::NarrativeFirst).await;
    assert!(narrative.starts_with("Rework this photo around its subject and logo"));
}

#[tokio::test]
async fn logo_only_prefix_matches_provider_family() {
    let mut ctx = ctx_with_concept();
    ctx.brand_kit = Some(BrandKit {
        colors: vec!["#334455".to_string()],
        brand_voice_description: None,
        logo_analysis: None,
        saved_logo_path_in_run_dir: Some("logo.png".to_string()),
    });
    let literal = assemble(&mut ctx.clone(), ProviderFamily::LiteralDirective).await;
    assert!(literal.starts_with("Generate a scene built around this logo."));
    let narrative = assemble(&mut ctx, ProviderFamily::NarrativeFirst).await;
    assert!(narrative.starts_with("Imagine a scene that naturally showcases this logo:"));
}

#[tokio::test]
async fn style_adaptation_scenario_prefix_matches_provider_family() {
    let mut ctx = ctx_with_concept();
    ctx.preset_type = Some(PresetType::StyleRecipe);
    let literal = assemble(&mut ctx.clone(), ProviderFamily::LiteralDirective).await;
    assert!(literal.starts_with("Recreate this style on the new subject."));
    let narrative = assemble(&mut ctx, ProviderFamily::NarrativeFirst).await;
    assert!(narrative.starts_with("Carry this exact style over to a new subject"));
}

/// A quoted literal substring in `task_description` appears verbatim in
/// `final_assembled_prompts[i]`'s text-rendering directive.
#[tokio::test]
async fn literal_quoted_text_survives_verbatim_into_assembled_prompt() {
    let mut ctx = ctx_with_concept();
    ctx.render_text = true;
    ctx.task_description = Some(r#"announce our "Summer Clearance" sale"#.to_string());

    let assembled = assemble(&mut ctx, ProviderFamily::LiteralDirective).await;
    assert!(assembled.contains("Summer Clearance"));
}

/// The same literal-substring fidelity holds regardless of which provider
/// family renders the aspect-ratio suffix.
#[tokio::test]
async fn literal_quoted_text_survives_for_narrative_family_too() {
    let mut ctx = ctx_with_concept();
    ctx.render_text = true;
    ctx.task_description = Some(r#"the sign reads "OPEN 24 HOURS""#.to_string());

    let assembled = assemble(&mut ctx, ProviderFamily::NarrativeFirst).await;
    assert!(assembled.contains("OPEN 24 HOURS"));
}

/// An empty `task_description` with `render_text` true produces no
/// literal-string directive at all.
#[tokio::test]
async fn empty_task_description_with_render_text_yields_no_literal_directive() {
    let mut ctx = ctx_with_concept();
    ctx.render_text = true;
    ctx.task_description = Some(String::new());

    let assembled = assemble(&mut ctx, ProviderFamily::LiteralDirective).await;
    assert!(!assembled.contains("Reproduce the following text exactly"));
}

/// When `apply_branding` is true, a concept carrying a `branding_visuals`
/// description naming one of `brand_kit.colors` propagates that hex code
/// verbatim into the assembled prompt — the contract Prompt Assembly must
/// uphold regardless of which upstream stage populated `branding_visuals`.
#[tokio::test]
async fn branding_visuals_hex_code_survives_into_assembled_prompt() {
    let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
    ctx.apply_branding = true;
    ctx.brand_kit = Some(BrandKit {
        colors: vec!["#1A2B3C".to_string(), "#FFD700".to_string()],
        brand_voice_description: None,
        logo_analysis: None,
        saved_logo_path_in_run_dir: None,
    });
    let mut concept = base_concept();
    concept.branding_visuals = Some(
        "logo placed bottom-right, scaled to 10% width, high-contrast against #1A2B3C".to_string(),
    );
    ctx.generated_image_prompts = Some(vec![GeneratedImagePrompt {
        source_strategy_index: 0,
        visual_concept: concept,
    }]);

    let assembled = assemble(&mut ctx, ProviderFamily::LiteralDirective).await;
    assert!(assembled.contains("#1A2B3C"));
}
