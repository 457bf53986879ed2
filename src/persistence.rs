//! Run directory layout: the on-disk artifacts and metadata file that make
//! runs reproducible and resumable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{Diagnostic, PipelineContext, UsageCounters};
use crate::error::{Error, Result};

/// Rejects anything that isn't filename-safe before it's joined into a path,
/// grounded in the defensive path-joining helpers `dashflow`'s document
/// loaders use before touching the filesystem.
fn path_safe_segment(segment: &str) -> Result<&str> {
    let ok = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if ok {
        Ok(segment)
    } else {
        Err(Error::Validation(format!(
            "'{segment}' is not a filename-safe path segment"
        )))
    }
}

pub fn run_dir(runs_root: &Path, run_id: Uuid) -> PathBuf {
    runs_root.join(run_id.to_string())
}

pub fn captions_dir(run_root: &Path, image_id: &str) -> Result<PathBuf> {
    path_safe_segment(image_id)?;
    Ok(run_root.join("captions").join(image_id))
}

pub fn generated_image_filename(index: usize, edited: bool, suffix: &str) -> String {
    let kind = if edited { "edited" } else { "generated" };
    format!("{kind}_image_strategy_{index}_{suffix}.png")
}

/// `processing_context` sub-object persisted inside `pipeline_metadata.json`:
/// `llm_call_usage`, `stage_timings`, `diagnostics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingContext {
    pub llm_call_usage: std::collections::HashMap<String, UsageCounters>,
    pub stage_timings: std::collections::HashMap<String, std::time::Duration>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetadata {
    #[serde(flatten)]
    pub context: PipelineContext,
    pub processing_context: ProcessingContext,
}

/// Serializes the final (or partial, on failure) context to
/// `<runs_root>/<run_id>/pipeline_metadata.json`.
pub async fn persist_metadata(runs_root: &Path, ctx: &PipelineContext) -> Result<PathBuf> {
    let dir = run_dir(runs_root, ctx.run_id);
    tokio::fs::create_dir_all(&dir).await?;

    let llm_call_usage = ctx
        .llm_usage
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();

    let metadata = PipelineMetadata {
        context: ctx.clone(),
        processing_context: ProcessingContext {
            llm_call_usage,
            stage_timings: ctx.stage_timings.clone(),
            diagnostics: ctx.diagnostics.clone(),
        },
    };

    let path = dir.join("pipeline_metadata.json");
    let json = serde_json::to_vec_pretty(&metadata)?;
    tokio::fs::write(&path, json).await?;
    Ok(path)
}

/// Persists the optimized logo preview at `<run_dir>/logo.png`, returning the
/// path stored into `ctx.brand_kit.saved_logo_path_in_run_dir`.
pub async fn persist_logo(runs_root: &Path, run_id: Uuid, logo_bytes: &[u8]) -> Result<PathBuf> {
    let dir = run_dir(runs_root, run_id);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join("logo.png");
    tokio::fs::write(&path, logo_bytes).await?;
    Ok(path)
}

/// Persists one generated image directly to the run directory — written by
/// the per-variant sub-task itself, not by the Executor, since image bytes
/// never need to pass through the shared context.
pub async fn persist_generated_image(
    runs_root: &Path,
    run_id: Uuid,
    index: usize,
    edited: bool,
    image_bytes: &[u8],
) -> Result<PathBuf> {
    let dir = run_dir(runs_root, run_id);
    tokio::fs::create_dir_all(&dir).await?;
    let suffix = Uuid::new_v4().simple().to_string();
    let filename = generated_image_filename(index, edited, &suffix[..8]);
    let path = dir.join(filename);
    tokio::fs::write(&path, image_bytes).await?;
    Ok(path)
}

/// Caption artifacts: `v<v>.txt`, `v<v>_brief.json`, `v<v>_result.json`.
pub async fn persist_caption_version(
    runs_root: &Path,
    run_id: Uuid,
    image_id: &str,
    version: u32,
    caption_text: &str,
    brief_json: &serde_json::Value,
    result_json: &serde_json::Value,
) -> Result<()> {
    let dir = captions_dir(&run_dir(runs_root, run_id), image_id)?;
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join(format!("v{version}.txt")), caption_text).await?;
    tokio::fs::write(
        dir.join(format!("v{version}_brief.json")),
        serde_json::to_vec_pretty(brief_json)?,
    )
    .await?;
    tokio::fs::write(
        dir.join(format!("v{version}_result.json")),
        serde_json::to_vec_pretty(result_json)?,
    )
    .await?;
    Ok(())
}
