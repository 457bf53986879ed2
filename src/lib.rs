//! campaignflow
//!
//! Pipeline orchestration core for a multi-stage creative pipeline that
//! turns a user brief (text prompt, optional reference image, platform,
//! brand kit, presets) into a set of platform-optimized marketing images
//! with accompanying captions.
//!
//! This crate covers the orchestration core only: stage ordering,
//! conditional skipping and style-adaptation injection, the typed
//! blackboard context, the preset subsystem, per-variant concurrency, the
//! progress event stream, and run persistence. The underlying LLM/VLM/
//! image-generation providers are black-box RPCs reached through the
//! traits in [`providers`]; concrete vendor integrations live outside this
//! crate.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use campaignflow::config::PipelineConfig;
//! use campaignflow::context::{Platform, PipelineContext};
//! use campaignflow::executor::Executor;
//! use campaignflow::progress;
//! use campaignflow::providers::stub::{StubChatProvider, StubImageGenProvider, StubVlmProvider};
//!
//! # struct NoPresets;
//! # #[async_trait::async_trait]
//! # impl campaignflow::preset::PresetStore for NoPresets {
//! #     async fn get(&self, id: &str) -> campaignflow::error::Result<campaignflow::preset::Preset> {
//! #         Err(campaignflow::error::Error::PresetNotFound(id.to_string()))
//! #     }
//! #     async fn bump_usage(&self, _id: &str) -> campaignflow::error::Result<()> { Ok(()) }
//! #     async fn update(
//! #         &self,
//! #         id: &str,
//! #         _expected_version: i64,
//! #         _updated: campaignflow::preset::Preset,
//! #     ) -> campaignflow::error::Result<campaignflow::preset::Preset> {
//! #         Err(campaignflow::error::Error::PresetNotFound(id.to_string()))
//! #     }
//! # }
//! #
//! # #[tokio::main]
//! # async fn main() -> campaignflow::error::Result<()> {
//! let (progress, _rx) = progress::channel();
//! let executor = Executor::new(
//!     PipelineConfig::default(),
//!     Arc::new(StubChatProvider { model_id: "stub-chat".into(), response: serde_json::json!({}) }),
//!     Arc::new(StubVlmProvider { model_id: "stub-vlm".into(), response: serde_json::json!({}) }),
//!     Arc::new(StubImageGenProvider { model_id: "stub-image".into() }),
//!     None,
//!     Arc::new(NoPresets),
//!     progress,
//! );
//! let mut ctx = PipelineContext::new("en".to_string(), Platform::InstagramSquare, 1, 2);
//! ctx.prompt = Some("a pair of running shoes on a wet city street".to_string());
//! executor.run_async(&mut ctx, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod persistence;
pub mod preset;
pub mod progress;
pub mod providers;
pub mod registry;
pub mod stages;
mod text_util;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::{Error, Result};
pub use executor::Executor;
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSender, RunStatus};
