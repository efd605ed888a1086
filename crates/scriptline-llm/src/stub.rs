//! Deterministic offline gateway.
//!
//! Judge calls always pass. Every other task gets numbered, unique sentences
//! sized to the requested `target_chars`, split into marker-delimited
//! paragraphs. Used for dry runs and end-to-end tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use scriptline_utils::error::LlmError;

use crate::types::{Generation, GenerationGateway, GenerationRequest, MARKER_METADATA, tasks};

const DEFAULT_TARGET: usize = 600;
const PARAGRAPH_CHARS: usize = 400;
const DEFAULT_MARKER: &str = "---";

#[derive(Debug, Default)]
pub struct StubGateway {
    sentence_counter: AtomicU64,
}

impl StubGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compose(&self, task: &str, target: usize, marker: &str) -> String {
        let mut paragraphs: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;
        let mut total = 0usize;

        while total < target.max(1) {
            let n = self.sentence_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let sentence = format!("Point {n} of the {task} adds one more distinct detail.");
            let counted = sentence.chars().filter(|c| !c.is_whitespace()).count();
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&sentence);
            current_chars += counted;
            total += counted;

            if current_chars >= PARAGRAPH_CHARS && total < target {
                paragraphs.push(std::mem::take(&mut current));
                current_chars = 0;
            }
        }
        if !current.is_empty() {
            paragraphs.push(current);
        }

        let mut out = paragraphs.join(&format!("\n\n{marker}\n\n"));
        out.push('\n');
        out
    }
}

#[async_trait]
impl GenerationGateway for StubGateway {
    async fn call(&self, request: GenerationRequest) -> Result<Generation, LlmError> {
        let content = if request.task == tasks::JUDGE {
            r#"{"verdict":"pass","must_fix":[],"notes":"stub judge"}"#.to_string()
        } else {
            let target = request.options.target_chars.unwrap_or(DEFAULT_TARGET);
            let marker = request
                .metadata_str(MARKER_METADATA)
                .unwrap_or(DEFAULT_MARKER);
            self.compose(&request.task, target, marker)
        };

        let input_tokens = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        let output_tokens = content.split_whitespace().count() as u64;

        Ok(Generation::new(content, "stub", "stub").with_usage(input_tokens, output_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn counted(text: &str) -> usize {
        text.lines()
            .filter(|l| l.trim() != DEFAULT_MARKER)
            .flat_map(str::chars)
            .filter(|c| !c.is_whitespace())
            .count()
    }

    #[tokio::test]
    async fn test_judge_always_passes() {
        let stub = StubGateway::new();
        let out = stub
            .call(GenerationRequest::new(tasks::JUDGE, vec![Message::user("x")]))
            .await
            .unwrap();
        let verdict: serde_json::Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(verdict["verdict"], "pass");
        assert_eq!(out.provider, "stub");
    }

    #[tokio::test]
    async fn test_generation_hits_target_with_markers() {
        let stub = StubGateway::new();
        let out = stub
            .call(GenerationRequest::new("draft", Vec::new()).with_target_chars(1300))
            .await
            .unwrap();
        let chars = counted(&out.content);
        assert!((1300..1400).contains(&chars), "got {chars}");
        assert!(out.content.lines().any(|l| l == "---"));
        assert!(out.content.trim_end().ends_with('.'));
    }

    #[tokio::test]
    async fn test_sentences_never_repeat_across_calls() {
        let stub = StubGateway::new();
        let a = stub
            .call(GenerationRequest::new("fix", Vec::new()).with_target_chars(200))
            .await
            .unwrap();
        let b = stub
            .call(GenerationRequest::new("fix", Vec::new()).with_target_chars(200))
            .await
            .unwrap();
        assert_ne!(a.content, b.content);
    }

    #[tokio::test]
    async fn test_custom_marker() {
        let stub = StubGateway::new();
        let out = stub
            .call(
                GenerationRequest::new("draft", Vec::new())
                    .with_target_chars(900)
                    .with_metadata(MARKER_METADATA, serde_json::json!("***")),
            )
            .await
            .unwrap();
        assert!(out.content.lines().any(|l| l == "***"));
    }
}
