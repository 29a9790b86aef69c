//! services/api/src/adapters/offline.rs
//!
//! Stand-ins used when no OpenAI key is configured. Explanations always fail,
//! so every answer is the canned fallback, and photos never contain text.

use async_trait::async_trait;
use exam_pilot_core::domain::{Language, Subject};
use exam_pilot_core::ports::{ExplanationService, PortError, PortResult, TextExtractionService};

#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineExplainer;

#[async_trait]
impl ExplanationService for OfflineExplainer {
    async fn explain(&self, _: Subject, _: &str, _: Language) -> PortResult<String> {
        Err(PortError::Unexpected(
            "No explanation model is configured".to_string(),
        ))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineTextExtractor;

#[async_trait]
impl TextExtractionService for OfflineTextExtractor {
    async fn extract_text(&self, _: &[u8]) -> PortResult<String> {
        Ok(String::new())
    }
}
