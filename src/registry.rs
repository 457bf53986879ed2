//! Stage Registry: the compile-time ordered list of stages.

use crate::context::PipelineContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Sequential,
    PerVariantParallel,
}

/// A required-input or produced-output predicate, evaluated against the
/// context before/after a stage runs.
pub type ContextPredicate = fn(&PipelineContext) -> bool;

#[derive(Clone, Copy)]
pub struct StageEntry {
    pub name: &'static str,
    pub kind: StageKind,
    pub required_inputs: &'static [(&'static str, ContextPredicate)],
    pub produced_outputs: &'static [(&'static str, ContextPredicate)],
}

/// Vacuously satisfied when no reference image was supplied at all: Image
/// Evaluation has nothing to analyze in that case and legitimately produces
/// no `image_analysis_result` (e.g. a pure text-to-image request).
fn has_image_analysis(ctx: &PipelineContext) -> bool {
    ctx.image_analysis_result.is_some() || ctx.image_reference.is_none()
}

fn has_strategies(ctx: &PipelineContext) -> bool {
    ctx.suggested_marketing_strategies
        .as_ref()
        .is_some_and(|v| !v.is_empty())
}

fn has_style_guidance(ctx: &PipelineContext) -> bool {
    ctx.style_guidance_sets.as_ref().is_some_and(|v| !v.is_empty())
}

fn has_generated_prompts(ctx: &PipelineContext) -> bool {
    ctx.generated_image_prompts
        .as_ref()
        .is_some_and(|v| !v.is_empty())
}

fn has_assembled_prompts(ctx: &PipelineContext) -> bool {
    ctx.final_assembled_prompts
        .as_ref()
        .is_some_and(|v| !v.is_empty())
}

fn has_generated_images(ctx: &PipelineContext) -> bool {
    ctx.generated_image_results
        .as_ref()
        .is_some_and(|v| !v.is_empty())
}

fn has_assessments(ctx: &PipelineContext) -> bool {
    ctx.image_assessments.as_ref().is_some_and(|v| !v.is_empty())
}

/// The default stage order. Caption generation is deliberately not in
/// this list; it is invoked through `Executor::run_single_stage`.
pub const DEFAULT_STAGE_ORDER: &[StageEntry] = &[
    StageEntry {
        name: "image_eval",
        kind: StageKind::Sequential,
        // All of this stage's inputs are optional; a pure text-to-image
        // request with no reference image is a legitimate run, not a
        // precondition failure.
        required_inputs: &[],
        produced_outputs: &[("image_analysis_result", has_image_analysis)],
    },
    StageEntry {
        name: "strategy",
        kind: StageKind::Sequential,
        required_inputs: &[],
        produced_outputs: &[("suggested_marketing_strategies", has_strategies)],
    },
    StageEntry {
        name: "style_guide",
        kind: StageKind::Sequential,
        required_inputs: &[("suggested_marketing_strategies", has_strategies)],
        produced_outputs: &[("style_guidance_sets", has_style_guidance)],
    },
    StageEntry {
        name: "creative_expert",
        kind: StageKind::PerVariantParallel,
        required_inputs: &[
            ("suggested_marketing_strategies", has_strategies),
            ("style_guidance_sets", has_style_guidance),
        ],
        produced_outputs: &[("generated_image_prompts", has_generated_prompts)],
    },
    StageEntry {
        name: "prompt_assembly",
        kind: StageKind::PerVariantParallel,
        required_inputs: &[("generated_image_prompts", has_generated_prompts)],
        produced_outputs: &[("final_assembled_prompts", has_assembled_prompts)],
    },
    StageEntry {
        name: "image_generation",
        kind: StageKind::PerVariantParallel,
        required_inputs: &[("final_assembled_prompts", has_assembled_prompts)],
        produced_outputs: &[("generated_image_results", has_generated_images)],
    },
    StageEntry {
        name: "image_assessment",
        kind: StageKind::PerVariantParallel,
        required_inputs: &[("generated_image_results", has_generated_images)],
        produced_outputs: &[("image_assessments", has_assessments)],
    },
];

/// Style Adaptation is not part of the default order; the Executor injects
/// it immediately before `prompt_assembly` when `needs_style_adaptation`
/// holds.
pub const STYLE_ADAPTATION: StageEntry = StageEntry {
    name: "style_adaptation",
    kind: StageKind::Sequential,
    required_inputs: &[],
    produced_outputs: &[
        ("generated_image_prompts", has_generated_prompts),
        ("suggested_marketing_strategies", has_strategies),
        ("style_guidance_sets", has_style_guidance),
    ],
};

pub const CAPTION_STAGE_NAME: &str = "caption";
