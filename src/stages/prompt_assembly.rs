//! Prompt Assembly stage. Pure — no I/O — and trivially parallel per
//! concept.

use async_trait::async_trait;

use crate::config::ProviderFamily;
use crate::context::{BrandKit, ImageReference, PipelineContext, VisualConcept};
use crate::error::{Error, Result};
use crate::text_util::split_literal_and_directive;

use super::{run_per_variant, Stage};

pub struct PromptAssemblyStage {
    pub provider_family: ProviderFamily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    FullGeneration,
    DefaultEdit,
    InstructedEdit,
    ComplexEdit,
    LogoOnly,
    StyleAdaptation,
}

fn choose_scenario(
    is_style_recipe_run: bool,
    image_reference: Option<&ImageReference>,
    has_logo: bool,
) -> Scenario {
    if is_style_recipe_run {
        return Scenario::StyleAdaptation;
    }
    match (image_reference, has_logo) {
        (Some(_), true) => Scenario::ComplexEdit,
        (Some(r), false) if r.instruction.is_some() => Scenario::InstructedEdit,
        (Some(_), false) => Scenario::DefaultEdit,
        (None, true) => Scenario::LogoOnly,
        (None, false) => Scenario::FullGeneration,
    }
}

fn prefix_for(scenario: Scenario, family: ProviderFamily) -> &'static str {
    use ProviderFamily::{LiteralDirective, NarrativeFirst};
    use Scenario::*;
    match (scenario, family) {
        (FullGeneration, LiteralDirective) => "Generate an image depicting:",
        (FullGeneration, NarrativeFirst) => "Picture a scene:",
        (DefaultEdit, LiteralDirective) => "Edit this image, preserving the subject's identity. Apply:",
        (DefaultEdit, NarrativeFirst) => {
            "Take this photo and reimagine its setting while keeping the subject unmistakably the same:"
        }
        (InstructedEdit, LiteralDirective) => "Edit this image per the instruction, preserving identity. Apply:",
        (InstructedEdit, NarrativeFirst) => {
            "Following the instruction, adapt this photo while keeping its subject recognizable:"
        }
        (ComplexEdit, LiteralDirective) => {
            "Edit this image, preserving subject identity and logo fidelity. Apply:"
        }
        (ComplexEdit, NarrativeFirst) => {
            "Rework this photo around its subject and logo, keeping both faithfully recognizable:"
        }
        (LogoOnly, LiteralDirective) => "Generate a scene built around this logo. Apply:",
        (LogoOnly, NarrativeFirst) => "Imagine a scene that naturally showcases this logo:",
        (StyleAdaptation, LiteralDirective) => "Recreate this style on the new subject. Apply:",
        (StyleAdaptation, NarrativeFirst) => {
            "Carry this exact style over to a new subject, as if the same artist painted it:"
        }
    }
}

/// Renders a `visual_concept` as a single fluent paragraph, in a fixed
/// field order.
fn render_concept_paragraph(vc: &VisualConcept) -> String {
    let mut clauses = Vec::new();
    if let Some(subject) = &vc.main_subject {
        clauses.push(format!("featuring {subject}"));
    }
    clauses.push(vc.composition_and_framing.clone());
    clauses.push(format!("set against {}", vc.background_environment));
    if let Some(fg) = &vc.foreground_elements {
        clauses.push(format!("with {fg} in the foreground"));
    }
    clauses.push(vc.lighting_and_mood.clone());
    clauses.push(format!("a color palette of {}", vc.color_palette));
    clauses.push(format!("rendered in a {} visual style", vc.visual_style));
    if let Some(texture) = &vc.texture_and_details {
        clauses.push(texture.clone());
    }
    if let Some(promo) = &vc.promotional_text_visuals {
        clauses.push(promo.clone());
    }
    if let Some(branding) = &vc.branding_visuals {
        clauses.push(branding.clone());
    }
    let mut paragraph = clauses
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    paragraph.push('.');
    if let Some(negative) = &vc.negative_elements {
        paragraph.push_str(&format!(" Avoid: {negative}."));
    }
    paragraph
}

fn text_rendering_directive(task_description: &str) -> Option<String> {
    let (literals, _) = split_literal_and_directive(task_description);
    if literals.is_empty() {
        return None;
    }
    let quoted = literals
        .iter()
        .map(|l| format!("\"{l}\""))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "Reproduce the following text exactly as written, with no alterations: {quoted}."
    ))
}

fn branding_directive(kit: &BrandKit) -> String {
    let mut directive = "Apply branding faithfully".to_string();
    if kit.logo_analysis.is_some() {
        directive.push_str("; do not distort, recolor, or crop the logo");
    }
    directive.push('.');
    directive
}

fn aspect_ratio_directive(platform: crate::context::Platform) -> String {
    use crate::context::Platform::*;
    let ratio = match platform {
        InstagramSquare => "1:1",
        InstagramStory | TikTokVideo => "9:16",
        FacebookFeed | XPost | LinkedinFeed => "4:5",
        PinterestPin => "2:3",
    };
    format!("Aspect ratio: {ratio}.")
}

fn assemble_one(
    ctx: &PipelineContext,
    family: ProviderFamily,
    scenario: Scenario,
    visual_concept: &VisualConcept,
) -> String {
    let mut parts = vec![
        prefix_for(scenario, family).to_string(),
        render_concept_paragraph(visual_concept),
    ];

    if ctx.render_text {
        if let Some(directive) = ctx
            .task_description
            .as_deref()
            .and_then(text_rendering_directive)
        {
            parts.push(directive);
        }
    }

    if ctx.apply_branding {
        if let Some(kit) = ctx.brand_kit.as_ref() {
            parts.push(branding_directive(kit));
        }
    }

    // Aspect ratio only for literal-directive; narrative-first receives it
    // via Image Generation instead, to avoid duplication.
    if family == ProviderFamily::LiteralDirective {
        parts.push(aspect_ratio_directive(ctx.platform_name));
    }

    parts.join(" ")
}

#[async_trait]
impl Stage for PromptAssemblyStage {
    fn name(&self) -> &'static str {
        "prompt_assembly"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let concepts = ctx
            .generated_image_prompts
            .clone()
            .ok_or_else(|| Error::precondition(self.name(), "generated_image_prompts required"))?;
        let is_style_recipe_run =
            matches!(ctx.preset_type, Some(crate::preset::PresetType::StyleRecipe));
        let has_logo = ctx
            .brand_kit
            .as_ref()
            .map(|k| k.saved_logo_path_in_run_dir.is_some())
            .unwrap_or(false);
        let scenario = choose_scenario(is_style_recipe_run, ctx.image_reference.as_ref(), has_logo);
        let family = self.provider_family;
        let ctx_ref = &*ctx;

        let results = run_per_variant(concepts.len(), |i| {
            let visual_concept = concepts[i].visual_concept.clone();
            async move { Ok(assemble_one(ctx_ref, family, scenario, &visual_concept)) }
        })
        .await;

        let mut assembled = Vec::with_capacity(results.len());
        for result in results {
            assembled.push(result?);
        }
        ctx.final_assembled_prompts = Some(assembled);
        Ok(())
    }
}
