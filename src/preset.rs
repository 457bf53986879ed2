//! Preset subsystem: data model, resolution, merge-with-overrides, and
//! stage-skip policy for Input Templates and Style Recipes.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{BrandKit, MarketingStrategy, PipelineContext, StyleGuidance, VisualConcept};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresetType {
    InputTemplate,
    StyleRecipe,
}

/// A structured copy of the user-facing form inputs, used by `INPUT_TEMPLATE`
/// presets to pre-populate a new run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub platform_name: Option<String>,
    pub num_variants: Option<usize>,
    pub creativity_level: Option<u8>,
    pub render_text: Option<bool>,
    pub apply_branding: Option<bool>,
    pub prompt: Option<String>,
    pub task_description: Option<String>,
    pub brand_kit: Option<BrandKit>,
}

/// The structured creative output captured from a completed run, used by
/// `STYLE_RECIPE` presets saved from a prior result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleRecipe {
    pub visual_concept: VisualConcept,
    pub strategy: MarketingStrategy,
    pub style_guidance: StyleGuidance,
    pub final_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub version: i64,
    pub model_id: String,
    pub pipeline_version: String,
    pub preset_type: PresetType,
    pub input_snapshot: Option<InputSnapshot>,
    pub style_recipe: Option<StyleRecipe>,
    pub brand_kit: Option<BrandKit>,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Preset {
    /// `preset_type == INPUT_TEMPLATE` iff `input_snapshot` is present and
    /// `style_recipe` is absent, and symmetrically for `STYLE_RECIPE`.
    pub fn validate_invariant(&self) -> Result<()> {
        let ok = match self.preset_type {
            PresetType::InputTemplate => {
                self.input_snapshot.is_some() && self.style_recipe.is_none()
            }
            PresetType::StyleRecipe => {
                self.style_recipe.is_some() && self.input_snapshot.is_none()
            }
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "preset {} violates preset_type/payload invariant",
                self.id
            )))
        }
    }
}

/// What gets stored into `ctx.preset_data` — a snapshot of the loaded
/// preset's payload, mutated in place by Style Adaptation as
/// `preset_data.visual_concept` and by `merge_recipe_with_overrides`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetSnapshot {
    pub style_recipe: Option<StyleRecipe>,
    pub visual_concept: Option<VisualConcept>,
}

/// A minimal datastore/session abstraction the Preset Loader reads through.
/// The concrete relational datastore is intentionally not part of this
/// crate; this trait is the seam the Executor calls through, grounded in
/// `dashflow`'s pattern of depending on narrow traits (`Checkpointer`,
/// `ChatModel`) rather than concrete backends.
#[async_trait::async_trait]
pub trait PresetStore: Send + Sync {
    async fn get(&self, preset_id: &str) -> Result<Preset>;
    /// Best-effort; failures here must never fail the run.
    async fn bump_usage(&self, preset_id: &str) -> Result<()>;
    /// Optimistic-concurrency update: replaces the stored preset iff
    /// `expected_version` matches the currently stored `version`, then
    /// increments the stored version by 1. On mismatch, rejected with
    /// `PresetVersionConflict` and the stored state is unchanged.
    async fn update(&self, preset_id: &str, expected_version: i64, updated: Preset) -> Result<Preset>;
}

/// A minimal in-memory [`PresetStore`], analogous to `dashflow`'s
/// in-process checkpointer fixtures used by its own test suites. Not meant
/// for production use.
pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::Mutex;

    use super::{Preset, PresetStore};
    use crate::error::{Error, Result};

    #[derive(Default)]
    pub struct InMemoryPresetStore {
        presets: Mutex<HashMap<String, Preset>>,
    }

    impl InMemoryPresetStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, preset: Preset) {
            self.presets.lock().await.insert(preset.id.clone(), preset);
        }
    }

    #[async_trait::async_trait]
    impl PresetStore for InMemoryPresetStore {
        async fn get(&self, preset_id: &str) -> Result<Preset> {
            self.presets
                .lock()
                .await
                .get(preset_id)
                .cloned()
                .ok_or_else(|| Error::PresetNotFound(preset_id.to_string()))
        }

        async fn bump_usage(&self, preset_id: &str) -> Result<()> {
            let mut presets = self.presets.lock().await;
            let preset = presets
                .get_mut(preset_id)
                .ok_or_else(|| Error::PresetNotFound(preset_id.to_string()))?;
            preset.usage_count += 1;
            preset.last_used_at = Some(chrono::Utc::now());
            Ok(())
        }

        async fn update(
            &self,
            preset_id: &str,
            expected_version: i64,
            mut updated: Preset,
        ) -> Result<Preset> {
            let mut presets = self.presets.lock().await;
            let stored = presets
                .get(preset_id)
                .ok_or_else(|| Error::PresetNotFound(preset_id.to_string()))?;
            if stored.version != expected_version {
                return Err(Error::PresetVersionConflict {
                    preset_id: preset_id.to_string(),
                    expected: expected_version,
                    actual: stored.version,
                });
            }
            updated.version = stored.version + 1;
            updated.updated_at = chrono::Utc::now();
            presets.insert(preset_id.to_string(), updated.clone());
            Ok(updated)
        }
    }
}

/// Reads the preset scoped by `user_id`, applies it onto `ctx`, and sets the
/// stage-skip policy.
pub async fn load_and_apply_preset(
    ctx: &mut PipelineContext,
    preset_id: &str,
    user_id: &str,
    store: &dyn PresetStore,
) -> Result<()> {
    let preset = store.get(preset_id).await?;
    if preset.user_id != user_id {
        return Err(Error::PresetForbidden {
            preset_id: preset_id.to_string(),
            user_id: user_id.to_string(),
        });
    }
    preset.validate_invariant()?;

    if preset.model_id != crate::config::PipelineConfig::default().image_model_id {
        ctx.record_diagnostic(
            "preset_loader",
            "model_version_mismatch",
            format!(
                "preset model_id '{}' does not match current image-gen model_id",
                preset.model_id
            ),
        );
    }

    ctx.preset_id = Some(preset.id.clone());
    ctx.preset_type = Some(preset.preset_type);

    match preset.preset_type {
        PresetType::InputTemplate => {
            if let Some(snapshot) = &preset.input_snapshot {
                apply_input_template(ctx, snapshot);
            }
            if let Some(kit) = &preset.brand_kit {
                apply_brand_kit_with_precedence(ctx, kit);
            }
            ctx.preset_data = Some(PresetSnapshot {
                style_recipe: None,
                visual_concept: None,
            });
            // skip_stages remains empty for Input Templates.
        }
        PresetType::StyleRecipe => {
            ctx.skip_stages = HashSet::from([
                "strategy".to_string(),
                "style_guide".to_string(),
                "creative_expert".to_string(),
            ]);
            ctx.preset_data = Some(PresetSnapshot {
                style_recipe: preset.style_recipe.clone(),
                visual_concept: preset.style_recipe.as_ref().map(|r| r.visual_concept.clone()),
            });
            if let Some(kit) = &preset.brand_kit {
                apply_brand_kit_with_precedence(ctx, kit);
            }
        }
    }

    // Best-effort usage counter bump; never fails the run.
    if let Err(e) = store.bump_usage(preset_id).await {
        ctx.record_diagnostic(
            "preset_loader",
            "optional_failure",
            format!("usage_count bump failed: {e}"),
        );
    }

    Ok(())
}

/// Deep-merges `INPUT_TEMPLATE` form fields into `ctx`, with request-time
/// fields (already populated on `ctx` before this call) winning over
/// template fields.
fn apply_input_template(ctx: &mut PipelineContext, snapshot: &InputSnapshot) {
    if ctx.prompt.is_none() {
        ctx.prompt = snapshot.prompt.clone();
    }
    if ctx.task_description.is_none() {
        ctx.task_description = snapshot.task_description.clone();
    }
    if let Some(n) = snapshot.num_variants {
        // Only fills a default; request always carries an explicit
        // num_variants today, but the field stays optional-safe here so a
        // future thinner request shape can rely on the template.
        if ctx.num_variants == 0 {
            ctx.num_variants = n;
        }
    }
    let _ = snapshot.creativity_level;
    let _ = snapshot.platform_name;
    let _ = snapshot.render_text;
    let _ = snapshot.apply_branding;
}

/// brand_kit precedence: request-supplied brand_kit wins over the preset's;
/// only fields absent on `ctx.brand_kit` are filled from the preset's kit.
fn apply_brand_kit_with_precedence(ctx: &mut PipelineContext, preset_kit: &BrandKit) {
    match &mut ctx.brand_kit {
        Some(existing) => {
            if existing.colors.is_empty() {
                existing.colors = preset_kit.colors.clone();
            }
            if existing.brand_voice_description.is_none() {
                existing.brand_voice_description = preset_kit.brand_voice_description.clone();
            }
        }
        None => {
            ctx.brand_kit = Some(preset_kit.clone());
        }
    }
}

/// Field-wise deep merge of `overrides` into `style_recipe` and its siblings.
/// Keys outside the recipe schema must already have been rejected at the API
/// boundary — this function assumes `overrides` is pre-validated.
pub fn merge_recipe_with_overrides(recipe: &StyleRecipe, overrides: &Value) -> StyleRecipe {
    let mut merged = recipe.clone();
    let Some(obj) = overrides.as_object() else {
        return merged;
    };
    if obj.is_empty() {
        // merge_recipe_with_overrides(r, {}) is the identity on `r`.
        return merged;
    }
    if let Some(prompt) = obj.get("prompt").and_then(Value::as_str) {
        merged.final_prompt = prompt.to_string();
    }
    if let Some(vc) = obj.get("visual_concept").and_then(Value::as_object) {
        merge_visual_concept_fields(&mut merged.visual_concept, vc);
    }
    merged
}

fn merge_visual_concept_fields(
    vc: &mut VisualConcept,
    overrides: &serde_json::Map<String, Value>,
) {
    macro_rules! merge_string_field {
        ($field:ident) => {
            if let Some(v) = overrides.get(stringify!($field)).and_then(Value::as_str) {
                vc.$field = v.to_string();
            }
        };
    }
    macro_rules! merge_optional_field {
        ($field:ident) => {
            if let Some(v) = overrides.get(stringify!($field)).and_then(Value::as_str) {
                vc.$field = Some(v.to_string());
            }
        };
    }
    merge_string_field!(composition_and_framing);
    merge_string_field!(background_environment);
    merge_string_field!(lighting_and_mood);
    merge_string_field!(color_palette);
    merge_string_field!(visual_style);
    merge_optional_field!(main_subject);
    merge_optional_field!(foreground_elements);
    merge_optional_field!(texture_and_details);
    merge_optional_field!(promotional_text_visuals);
    merge_optional_field!(branding_visuals);
    merge_optional_field!(negative_elements);
}

/// Whether `overrides` carries a non-empty prompt override, used by
/// `needs_style_adaptation`.
pub fn overrides_has_prompt(overrides: &Option<Value>) -> bool {
    overrides
        .as_ref()
        .and_then(|v| v.get("prompt"))
        .and_then(Value::as_str)
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false)
}

/// Recognized top-level keys for `overrides` at the API boundary. Keys
/// outside the recipe schema are rejected here, not silently dropped.
const RECOGNIZED_OVERRIDE_KEYS: &[&str] = &["prompt", "visual_concept"];

pub fn validate_overrides(overrides: &Value) -> Result<()> {
    let Some(obj) = overrides.as_object() else {
        return Err(Error::Validation(
            "overrides must be a JSON object".to_string(),
        ));
    };
    for key in obj.keys() {
        if !RECOGNIZED_OVERRIDE_KEYS.contains(&key.as_str()) {
            return Err(Error::Validation(format!(
                "unrecognized override key '{key}'"
            )));
        }
    }
    Ok(())
}
