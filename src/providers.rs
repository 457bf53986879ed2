//! The black-box RPC boundary for LLM/VLM/image-generation providers. These
//! traits are the seam the stage contracts call through; concrete vendor
//! integrations live outside this crate.
//!
//! Grounded in `dashflow::core::language_models::ChatModel` — an
//! object-safe `async_trait` returning a structured result, rather than a
//! single monolithic "call the model" function per stage.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ProviderErrorKind, Result};

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    /// Structured JSON payload matching whatever schema the caller requested.
    pub json: Value,
    pub usage: TokenUsage,
}

/// A text-in/structured-JSON-out LLM call (strategy composition, style
/// guide, creative expert, style adaptation, caption analyst/writer).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<ChatCompletion, (ProviderErrorKind, String)>;

    fn model_id(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct VlmCompletion {
    pub json: Value,
    pub usage: TokenUsage,
}

/// A vision-capable LLM call (image evaluation, logo analysis).
#[async_trait]
pub trait VlmProvider: Send + Sync {
    async fn analyze_image(
        &self,
        image_path: &str,
        instruction: &str,
    ) -> std::result::Result<VlmCompletion, (ProviderErrorKind, String)>;

    fn model_id(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct ImageGenOutput {
    pub image_bytes: Vec<u8>,
    pub usage: TokenUsage,
}

/// A prompt (+ optional edit-source image) to rendered-image call.
#[async_trait]
pub trait ImageGenProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        edit_source_path: Option<&str>,
    ) -> std::result::Result<ImageGenOutput, (ProviderErrorKind, String)>;

    fn model_id(&self) -> &str;
}

/// A shared vision-language embedder used for CLIP-style cosine similarity
/// in consistency metrics. Returns `None` when the embedder backend is
/// unavailable; callers record `consistency_metrics = null` with a
/// diagnostic rather than failing the stage.
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    async fn embed_image(&self, image_path: &str) -> Result<Option<Vec<f32>>>;
}

pub mod stub {
    //! Deterministic in-process stand-ins used by tests, analogous to
    //! `dashflow-chains`' mock `ChatModel` fixtures.

    use super::*;

    pub struct StubChatProvider {
        pub model_id: String,
        pub response: Value,
    }

    #[async_trait]
    impl ChatProvider for StubChatProvider {
        async fn complete_json(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> std::result::Result<ChatCompletion, (ProviderErrorKind, String)> {
            Ok(ChatCompletion {
                json: self.response.clone(),
                usage: TokenUsage {
                    prompt_tokens: 64,
                    completion_tokens: 128,
                },
            })
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }
    }

    pub struct StubVlmProvider {
        pub model_id: String,
        pub response: Value,
    }

    #[async_trait]
    impl VlmProvider for StubVlmProvider {
        async fn analyze_image(
            &self,
            _image_path: &str,
            _instruction: &str,
        ) -> std::result::Result<VlmCompletion, (ProviderErrorKind, String)> {
            Ok(VlmCompletion {
                json: self.response.clone(),
                usage: TokenUsage {
                    prompt_tokens: 32,
                    completion_tokens: 64,
                },
            })
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }
    }

    pub struct StubImageGenProvider {
        pub model_id: String,
    }

    #[async_trait]
    impl ImageGenProvider for StubImageGenProvider {
        async fn generate(
            &self,
            _prompt: &str,
            _edit_source_path: Option<&str>,
        ) -> std::result::Result<ImageGenOutput, (ProviderErrorKind, String)> {
            // A tiny valid 1x1 PNG, good enough for tests that only assert
            // the byte stream got persisted.
            const ONE_PX_PNG: &[u8] = &[
                0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
                0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00,
                0x00, 0x90, 0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, 0x08,
                0xD7, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, 0x00, 0x03, 0x00, 0x01, 0x5C, 0xB9, 0x22,
                0x6F, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
            ];
            Ok(ImageGenOutput {
                image_bytes: ONE_PX_PNG.to_vec(),
                usage: TokenUsage {
                    prompt_tokens: 0,
                    completion_tokens: 0,
                },
            })
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }
    }
}
