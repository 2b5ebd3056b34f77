//! Answer composition with retrieval fallback.
//!
//! # States
//!
//! | State | When | Sources | Outcome |
//! |-------|------|---------|---------|
//! | NoIndex | index absent or empty | none | [`ComposeOutcome::Ungrounded`] |
//! | Retrieval | index has chunks | retrieved chunks | [`ComposeOutcome::Grounded`] |
//! | Fallback | retrieval or grounded generation failed | none | [`ComposeOutcome::Degraded`] |
//!
//! Only a failure of the ungrounded generation call itself is fatal
//! ([`ComposeOutcome::Fatal`]); everything before it degrades.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingServiceError, GenerationServiceError};
use crate::evaluator::{Evaluation, Evaluator};
use crate::generation::{GenerationProvider, GenerationRequest};
use crate::index::{EmbeddingIndex, ScoredChunk};
use crate::memory::transcript;
use crate::models::ChatTurn;
use crate::retriever::{RetrievedContext, Retriever, DEFAULT_TOP_K};
use crate::service::{bounded, Timeouts};

const ASSISTANT_SYSTEM: &str = "You are a helpful assistant.";

/// Tuning knobs for [`AnswerComposer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposerSettings {
    /// Chunks retrieved per question.
    pub top_k: usize,
    pub timeouts: Timeouts,
    /// Rewrite follow-up questions into standalone ones before retrieval.
    pub condense_question: bool,
    /// Score grounded answers against their sources.
    pub evaluate: bool,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            timeouts: Timeouts::default(),
            condense_question: true,
            evaluate: false,
        }
    }
}

/// How an answer relates to the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    /// Conditioned on retrieved chunks.
    Grounded,
    /// No index to retrieve from.
    Ungrounded,
    /// Retrieval was attempted and failed; answered without context.
    Degraded,
}

/// Generated answer plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ScoredChunk>,
    pub evaluation: Option<Evaluation>,
}

impl Answer {
    fn ungrounded(text: String) -> Self {
        Self {
            text,
            sources: Vec::new(),
            evaluation: None,
        }
    }

    /// Source chunk texts, most relevant first.
    pub fn source_texts(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.text.clone()).collect()
    }
}

/// Result of composing an answer.
#[derive(Debug)]
pub enum ComposeOutcome {
    Grounded(Answer),
    Ungrounded(Answer),
    Degraded { answer: Answer, cause: String },
    Fatal(GenerationServiceError),
}

impl ComposeOutcome {
    /// Split into the answer and how it was produced, or the fatal error.
    pub fn into_result(self) -> Result<(Answer, Grounding), GenerationServiceError> {
        match self {
            ComposeOutcome::Grounded(a) => Ok((a, Grounding::Grounded)),
            ComposeOutcome::Ungrounded(a) => Ok((a, Grounding::Ungrounded)),
            ComposeOutcome::Degraded { answer, .. } => Ok((answer, Grounding::Degraded)),
            ComposeOutcome::Fatal(e) => Err(e),
        }
    }
}

#[derive(Debug, Error)]
enum GroundingFailure {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] EmbeddingServiceError),
    #[error("grounded generation failed: {0}")]
    Generation(#[from] GenerationServiceError),
}

/// Produces assistant answers, grounded when the index allows it.
pub struct AnswerComposer {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    retriever: Retriever,
    evaluator: Option<Evaluator>,
    condense_question: bool,
    generation_timeout: Duration,
}

impl AnswerComposer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        settings: ComposerSettings,
    ) -> Self {
        Self {
            embedder,
            generator,
            retriever: Retriever::new(settings.top_k, settings.timeouts.embedding),
            evaluator: settings
                .evaluate
                .then(|| Evaluator::new(settings.timeouts.generation)),
            condense_question: settings.condense_question,
            generation_timeout: settings.timeouts.generation,
        }
    }

    /// Answer `query` given prior `history` and, if available, an index.
    pub async fn compose(
        &self,
        query: &str,
        history: &[ChatTurn],
        index: Option<&EmbeddingIndex>,
    ) -> ComposeOutcome {
        let index = match index {
            Some(index) if !index.is_empty() => index,
            _ => {
                return match self.ungrounded(query, history).await {
                    Ok(answer) => ComposeOutcome::Ungrounded(answer),
                    Err(e) => ComposeOutcome::Fatal(e),
                }
            }
        };

        match self.grounded(query, history, index).await {
            Ok(Some(answer)) => ComposeOutcome::Grounded(answer),
            Ok(None) => match self.ungrounded(query, history).await {
                Ok(answer) => ComposeOutcome::Ungrounded(answer),
                Err(e) => ComposeOutcome::Fatal(e),
            },
            Err(failure) => {
                warn!(error = %failure, "falling back to ungrounded answer");
                match self.ungrounded(query, history).await {
                    Ok(answer) => ComposeOutcome::Degraded {
                        answer,
                        cause: failure.to_string(),
                    },
                    Err(e) => ComposeOutcome::Fatal(e),
                }
            }
        }
    }

    /// Retrieve and answer from context. `Ok(None)` when nothing was
    /// retrieved.
    async fn grounded(
        &self,
        query: &str,
        history: &[ChatTurn],
        index: &EmbeddingIndex,
    ) -> Result<Option<Answer>, GroundingFailure> {
        let search_query = self.standalone_question(query, history).await;
        let context = self
            .retriever
            .retrieve(index, self.embedder.as_ref(), &search_query)
            .await?;
        if context.is_empty() {
            return Ok(None);
        }

        let request = GenerationRequest::new(grounded_prompt(query, &context))
            .with_system(ASSISTANT_SYSTEM)
            .with_history(history.to_vec());
        let text = bounded(self.generation_timeout, self.generator.generate(&request)).await?;

        let sources = context.sources();
        let evaluation = match &self.evaluator {
            Some(evaluator) => {
                evaluator
                    .evaluate(self.generator.as_ref(), query, &text, &sources)
                    .await
            }
            None => None,
        };

        Ok(Some(Answer {
            text,
            sources: context.chunks,
            evaluation,
        }))
    }

    async fn ungrounded(
        &self,
        query: &str,
        history: &[ChatTurn],
    ) -> Result<Answer, GenerationServiceError> {
        let request = GenerationRequest::new(query)
            .with_system(ASSISTANT_SYSTEM)
            .with_history(history.to_vec());
        let text = bounded(self.generation_timeout, self.generator.generate(&request)).await?;
        Ok(Answer::ungrounded(text))
    }

    /// Rewrite a follow-up into a standalone question for retrieval.
    /// Falls back to the raw query when disabled, without history, or on
    /// any failure.
    async fn standalone_question(&self, query: &str, history: &[ChatTurn]) -> String {
        if !self.condense_question || history.is_empty() {
            return query.to_string();
        }

        let request = GenerationRequest::new(condense_prompt(query, history));
        match bounded(self.generation_timeout, self.generator.generate(&request)).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                let rewritten = rewritten.trim().to_string();
                debug!(original = query, standalone = %rewritten, "condensed follow-up question");
                rewritten
            }
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!(error = %e, "question condensing failed, retrieving with raw message");
                query.to_string()
            }
        }
    }
}

fn grounded_prompt(query: &str, context: &RetrievedContext) -> String {
    format!(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, say that you don't know; do not make one up.\n\n\
         Context:\n{}\n\n\
         Question: {}",
        context.context_block(),
        query
    )
}

fn condense_prompt(query: &str, history: &[ChatTurn]) -> String {
    format!(
        "Given the following conversation and a follow up question, rephrase the \
         follow up question to be a standalone question.\n\n\
         Chat History:\n{}\n\
         Follow Up Input: {}\n\
         Standalone question:",
        transcript(history),
        query
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkingParams;
    use crate::error::ServiceFailure;
    use crate::index::EmbedOptions;
    use crate::models::{Document, Role};
    use crate::testing::{HashingEmbedder, ScriptedGenerator};

    const CONDENSE_MARKER: &str = "Standalone question:";

    async fn sky_index(embedder: &HashingEmbedder) -> EmbeddingIndex {
        EmbeddingIndex::build(
            embedder,
            &[Document::new("sky", "The sky is blue.")],
            &ChunkingParams::default(),
            &EmbedOptions::default(),
        )
        .await
        .unwrap()
    }

    fn composer(
        embedder: Arc<HashingEmbedder>,
        generator: Arc<ScriptedGenerator>,
        settings: ComposerSettings,
    ) -> AnswerComposer {
        AnswerComposer::new(embedder, generator, settings)
    }

    #[tokio::test]
    async fn test_no_index_is_ungrounded() {
        let embedder = Arc::new(HashingEmbedder::new());
        let generator = Arc::new(ScriptedGenerator::echo());
        let c = composer(embedder.clone(), generator.clone(), ComposerSettings::default());

        let outcome = c.compose("Hello", &[], None).await;
        let (answer, grounding) = outcome.into_result().unwrap();
        assert_eq!(grounding, Grounding::Ungrounded);
        assert_eq!(answer.text, "echo: Hello");
        assert!(answer.sources.is_empty());
        assert_eq!(embedder.calls(), 0);

        let empty = EmbeddingIndex::new();
        let (_, grounding) = c.compose("Hello", &[], Some(&empty)).await.into_result().unwrap();
        assert_eq!(grounding, Grounding::Ungrounded);
    }

    #[tokio::test]
    async fn test_grounded_answer_carries_sources() {
        let embedder = Arc::new(HashingEmbedder::new());
        let generator = Arc::new(ScriptedGenerator::echo());
        let index = sky_index(&embedder).await;
        let c = composer(embedder, generator.clone(), ComposerSettings::default());

        let outcome = c.compose("What color is the sky?", &[], Some(&index)).await;
        let (answer, grounding) = outcome.into_result().unwrap();
        assert_eq!(grounding, Grounding::Grounded);
        assert_eq!(answer.source_texts(), vec!["The sky is blue.".to_string()]);
        assert!(answer.text.contains("blue"));
        assert!(answer.evaluation.is_none());

        let req = &generator.requests()[0];
        assert!(req.prompt.contains("Context:\nThe sky is blue."));
        assert!(req.prompt.ends_with("Question: What color is the sky?"));
    }

    #[tokio::test]
    async fn test_grounded_prompt_includes_history() {
        let embedder = Arc::new(HashingEmbedder::new());
        let generator = Arc::new(ScriptedGenerator::echo());
        let index = sky_index(&embedder).await;
        let settings = ComposerSettings {
            condense_question: false,
            ..ComposerSettings::default()
        };
        let c = composer(embedder, generator.clone(), settings);
        let history = vec![
            ChatTurn::new(Role::User, "hi"),
            ChatTurn::new(Role::Assistant, "hello"),
        ];

        c.compose("sky?", &history, Some(&index)).await;
        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].history, history);
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades() {
        let embedder = Arc::new(HashingEmbedder::new());
        let index = sky_index(&embedder).await;
        embedder.set_failing(true);
        let generator = Arc::new(ScriptedGenerator::echo());
        let c = composer(embedder, generator, ComposerSettings::default());

        match c.compose("What color is the sky?", &[], Some(&index)).await {
            ComposeOutcome::Degraded { answer, cause } => {
                assert!(answer.sources.is_empty());
                assert_eq!(answer.text, "echo: What color is the sky?");
                assert!(cause.contains("retrieval failed"));
            }
            other => panic!("expected degraded outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_grounded_generation_failure_degrades() {
        let embedder = Arc::new(HashingEmbedder::new());
        let index = sky_index(&embedder).await;
        let generator = Arc::new(ScriptedGenerator::new(|req| {
            if req.prompt.contains("Context:") {
                Err(ServiceFailure::Transport("reset".into()).into())
            } else {
                Ok("plain answer".into())
            }
        }));
        let c = composer(embedder, generator, ComposerSettings::default());

        let (answer, grounding) = c
            .compose("What color is the sky?", &[], Some(&index))
            .await
            .into_result()
            .unwrap();
        assert_eq!(grounding, Grounding::Degraded);
        assert_eq!(answer.text, "plain answer");
    }

    #[tokio::test]
    async fn test_total_generation_failure_is_fatal() {
        let embedder = Arc::new(HashingEmbedder::new());
        let index = sky_index(&embedder).await;
        let c = composer(
            embedder,
            Arc::new(ScriptedGenerator::failing()),
            ComposerSettings::default(),
        );

        assert!(matches!(
            c.compose("Hello", &[], None).await,
            ComposeOutcome::Fatal(_)
        ));
        assert!(matches!(
            c.compose("sky", &[], Some(&index)).await,
            ComposeOutcome::Fatal(_)
        ));
    }

    #[tokio::test]
    async fn test_generation_timeout_is_fatal() {
        let embedder = Arc::new(HashingEmbedder::new());
        let settings = ComposerSettings {
            timeouts: Timeouts {
                embedding: Duration::from_secs(1),
                generation: Duration::from_millis(10),
            },
            ..ComposerSettings::default()
        };
        // A generator that never answers in time.
        struct Stalled;
        #[async_trait::async_trait]
        impl GenerationProvider for Stalled {
            fn model_name(&self) -> &str {
                "stalled"
            }
            async fn generate(
                &self,
                _request: &GenerationRequest,
            ) -> Result<String, GenerationServiceError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(String::new())
            }
        }
        let c = AnswerComposer::new(embedder, Arc::new(Stalled), settings);

        match c.compose("Hello", &[], None).await {
            ComposeOutcome::Fatal(e) => {
                assert_eq!(e.0, ServiceFailure::Timeout(Duration::from_millis(10)))
            }
            other => panic!("expected fatal timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_follow_up_is_condensed_for_retrieval() {
        let embedder = Arc::new(HashingEmbedder::new());
        let index = sky_index(&embedder).await;
        let generator = Arc::new(ScriptedGenerator::new(|req| {
            if req.prompt.ends_with(CONDENSE_MARKER) {
                Ok("What color is the sky?".into())
            } else {
                Ok(format!("echo: {}", req.prompt))
            }
        }));
        let c = composer(embedder, generator.clone(), ComposerSettings::default());
        let history = vec![
            ChatTurn::new(Role::User, "Tell me about the sky"),
            ChatTurn::new(Role::Assistant, "It is above us."),
        ];

        let (answer, grounding) = c
            .compose("and its color?", &history, Some(&index))
            .await
            .into_result()
            .unwrap();
        assert_eq!(grounding, Grounding::Grounded);
        assert!(answer.text.contains("Question: and its color?"));

        let requests = generator.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].prompt.contains("user: Tell me about the sky"));
        assert!(requests[0].history.is_empty());
    }

    #[tokio::test]
    async fn test_condense_failure_uses_raw_message() {
        let embedder = Arc::new(HashingEmbedder::new());
        let index = sky_index(&embedder).await;
        let generator = Arc::new(ScriptedGenerator::new(|req| {
            if req.prompt.ends_with(CONDENSE_MARKER) {
                Err(ServiceFailure::Disabled.into())
            } else {
                Ok("answer".into())
            }
        }));
        let c = composer(embedder, generator, ComposerSettings::default());
        let history = vec![ChatTurn::new(Role::User, "earlier")];

        let (_, grounding) = c
            .compose("sky blue?", &history, Some(&index))
            .await
            .into_result()
            .unwrap();
        assert_eq!(grounding, Grounding::Grounded);
    }

    #[tokio::test]
    async fn test_evaluation_attached_to_grounded_answers() {
        let embedder = Arc::new(HashingEmbedder::new());
        let index = sky_index(&embedder).await;
        let generator = Arc::new(ScriptedGenerator::new(|req| {
            if req.prompt.contains("confidence score") {
                Ok("9 - fully supported".into())
            } else {
                Ok("The sky is blue.".into())
            }
        }));
        let settings = ComposerSettings {
            evaluate: true,
            ..ComposerSettings::default()
        };
        let c = composer(embedder, generator, settings);

        let (answer, _) = c
            .compose("What color is the sky?", &[], Some(&index))
            .await
            .into_result()
            .unwrap();
        assert_eq!(answer.evaluation.map(|e| e.score), Some(9));

        let (answer, _) = c.compose("Hello", &[], None).await.into_result().unwrap();
        assert!(answer.evaluation.is_none());
    }

    #[tokio::test]
    async fn test_evaluation_failure_keeps_answer() {
        let embedder = Arc::new(HashingEmbedder::new());
        let index = sky_index(&embedder).await;
        let generator = Arc::new(ScriptedGenerator::new(|req| {
            if req.prompt.contains("confidence score") {
                Err(ServiceFailure::Transport("eof".into()).into())
            } else {
                Ok("The sky is blue.".into())
            }
        }));
        let settings = ComposerSettings {
            evaluate: true,
            ..ComposerSettings::default()
        };
        let c = composer(embedder, generator, settings);

        let (answer, grounding) = c
            .compose("What color is the sky?", &[], Some(&index))
            .await
            .into_result()
            .unwrap();
        assert_eq!(grounding, Grounding::Grounded);
        assert_eq!(answer.text, "The sky is blue.");
        assert!(answer.evaluation.is_none());
    }
}
