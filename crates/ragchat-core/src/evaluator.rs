//! Optional self-evaluation of grounded answers.
//!
//! A second model call rates how well an answer is supported by its
//! sources on a 0–10 scale. The result is a transparency signal only:
//! an evaluation that fails or cannot be parsed is dropped, never turned
//! into a request failure.

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::generation::{GenerationProvider, GenerationRequest};
use crate::service::bounded;

const EVALUATION_SYSTEM: &str =
    "You are a strict reviewer checking answers against their sources.";

/// A 0–10 support score plus the reviewer's explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub score: u8,
    pub explanation: String,
}

/// Scores answers against the retrieved sources.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    timeout: Duration,
}

impl Evaluator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn evaluate(
        &self,
        generator: &dyn GenerationProvider,
        query: &str,
        answer: &str,
        sources: &[String],
    ) -> Option<Evaluation> {
        let request = GenerationRequest::new(evaluation_prompt(query, answer, sources))
            .with_system(EVALUATION_SYSTEM);

        let reply = match bounded(self.timeout, generator.generate(&request)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "answer evaluation failed");
                return None;
            }
        };

        match parse_score(&reply) {
            Some(score) => Some(Evaluation {
                score,
                explanation: reply.trim().to_string(),
            }),
            None => {
                warn!("answer evaluation returned no 0-10 score");
                None
            }
        }
    }
}

fn evaluation_prompt(query: &str, answer: &str, sources: &[String]) -> String {
    format!(
        "Evaluate the following response to the query.\n\n\
         QUERY: {query}\n\
         RESPONSE: {answer}\n\
         SOURCES:\n{sources}\n\n\
         Assess factual accuracy against the sources, completeness, relevance, \
         and whether it contains claims the sources do not support.\n\
         Reply with a confidence score from 0 to 10 first, then a short explanation.",
        sources = sources.join("\n---\n"),
    )
}

/// First whole number between 0 and 10 in `reply`.
fn parse_score(reply: &str) -> Option<u8> {
    reply
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .filter_map(|run| run.parse::<u32>().ok())
        .find(|n| *n <= 10)
        .map(|n| n as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("8/10 - well supported"), Some(8));
        assert_eq!(parse_score("Confidence score: 10. Fully grounded."), Some(10));
        assert_eq!(parse_score("Score 0"), Some(0));
        assert_eq!(parse_score("In 2024 the score is 7"), Some(7));
        assert_eq!(parse_score("no number here"), None);
        assert_eq!(parse_score("42 and 99"), None);
    }

    #[tokio::test]
    async fn test_evaluate_parses_reply() {
        let generator = ScriptedGenerator::new(|_| Ok("7/10: mostly supported".into()));
        let eval = Evaluator::new(Duration::from_secs(1))
            .evaluate(&generator, "q", "a", &["src".into()])
            .await
            .unwrap();
        assert_eq!(eval.score, 7);
        assert_eq!(eval.explanation, "7/10: mostly supported");

        let prompt = &generator.requests()[0].prompt;
        assert!(prompt.contains("QUERY: q"));
        assert!(prompt.contains("SOURCES:\nsrc"));
    }

    #[tokio::test]
    async fn test_evaluation_failure_is_isolated() {
        let eval = Evaluator::new(Duration::from_secs(1))
            .evaluate(&ScriptedGenerator::failing(), "q", "a", &[])
            .await;
        assert!(eval.is_none());

        let unparseable = ScriptedGenerator::new(|_| Ok("looks fine".into()));
        let eval = Evaluator::new(Duration::from_secs(1))
            .evaluate(&unparseable, "q", "a", &[])
            .await;
        assert!(eval.is_none());
    }
}
