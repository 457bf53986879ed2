//! Property test for the index-alignment invariant: every populated
//! "ordered list" intermediate on a context must share the same length.

use campaignflow::context::{
    GeneratedImagePrompt, GeneratedImageResult, GenerationMode, ImageAssessment, ImageResultStatus,
    MarketingStrategy, Platform, PipelineContext, StyleGuidance, VisualConcept,
};
use proptest::prelude::*;

fn strategies_of_len(n: usize) -> Vec<MarketingStrategy> {
    (0..n)
        .map(|i| MarketingStrategy {
            target_audience: format!("audience-{i}"),
            target_objective: "drive trial".to_string(),
            target_voice: None,
            target_niche: None,
        })
        .collect()
}

fn style_guidance_of_len(n: usize) -> Vec<StyleGuidance> {
    (0..n)
        .map(|_| StyleGuidance {
            style_description: "rugged realism".to_string(),
            style_rationale: None,
            style_keywords: Vec::new(),
        })
        .collect()
}

fn prompts_of_len(n: usize) -> Vec<GeneratedImagePrompt> {
    (0..n)
        .map(|i| GeneratedImagePrompt {
            source_strategy_index: i,
            visual_concept: VisualConcept::default(),
        })
        .collect()
}

fn assembled_of_len(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("prompt-{i}")).collect()
}

fn results_of_len(n: usize) -> Vec<GeneratedImageResult> {
    (0..n)
        .map(|_| GeneratedImageResult {
            image_path: None,
            status: ImageResultStatus::Success,
            generation_mode: GenerationMode::TextToImage,
            token_usage: None,
            consistency_metrics: None,
            error_kind: None,
        })
        .collect()
}

fn assessments_of_len(n: usize) -> Vec<ImageAssessment> {
    (0..n).map(|_| ImageAssessment::default()).collect()
}

proptest! {
    /// `check_index_alignment` is Ok iff every populated field in `lens`
    /// (a per-field `Some(length)` or `None` for "not yet produced") has the
    /// same length as the others.
    #[test]
    fn index_alignment_holds_iff_populated_lengths_match(
        lens in proptest::collection::vec(proptest::option::of(0usize..5), 6)
    ) {
        let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
        ctx.suggested_marketing_strategies = lens[0].map(strategies_of_len);
        ctx.style_guidance_sets = lens[1].map(style_guidance_of_len);
        ctx.generated_image_prompts = lens[2].map(prompts_of_len);
        ctx.final_assembled_prompts = lens[3].map(assembled_of_len);
        ctx.generated_image_results = lens[4].map(results_of_len);
        ctx.image_assessments = lens[5].map(assessments_of_len);

        let populated: Vec<usize> = lens.iter().copied().flatten().collect();
        let expect_ok = match populated.first() {
            Some(first) => populated.iter().all(|l| l == first),
            None => true,
        };

        prop_assert_eq!(ctx.check_index_alignment().is_ok(), expect_ok);
    }
}
