//! The `PronunciationAssessor` collaborator (spec.md §1, §4.6): given
//! buffered learner audio plus the expected transcript, returns per-word
//! pronunciation scores and an overall summary. Explicitly out of scope to
//! implement for real — this crate only defines the trait boundary and a
//! deterministic `NullAssessor` default, the same way the teacher treats
//! `SerialMemoryProvider` as a trait with an in-process fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-word pronunciation score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordScore {
    pub word: String,
    /// 0.0 (unintelligible) – 1.0 (native-like).
    pub score: f32,
}

/// The result of assessing one learner turn's audio against its transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub overall_pronunciation: f32,
    pub overall_fluency: f32,
    pub overall_grammar: f32,
    pub words: Vec<WordScore>,
    /// Up to a handful of named issues (e.g. "final consonant deletion").
    pub issues: Vec<String>,
}

#[async_trait]
pub trait PronunciationAssessor: Send + Sync {
    /// Assess `audio` (raw PCM bytes in the session's negotiated format)
    /// against `transcript`. Errors are logged by the caller and never
    /// abort the session (spec.md §4.10).
    async fn assess(&self, audio: &[u8], transcript: &str) -> Result<AssessmentResult>;
}

/// Deterministic assessor that never fails and never flags any word,
/// suitable for running the relay end-to-end without a real scoring
/// backend.
pub struct NullAssessor;

#[async_trait]
impl PronunciationAssessor for NullAssessor {
    async fn assess(&self, _audio: &[u8], transcript: &str) -> Result<AssessmentResult> {
        let words = transcript
            .split_whitespace()
            .map(|w| WordScore {
                word: w.to_string(),
                score: 1.0,
            })
            .collect();
        Ok(AssessmentResult {
            overall_pronunciation: 1.0,
            overall_fluency: 1.0,
            overall_grammar: 1.0,
            words,
            issues: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_assessor_scores_every_word_perfectly() {
        let assessor = NullAssessor;
        let result = assessor.assess(b"", "hello there friend").await.unwrap();
        assert_eq!(result.words.len(), 3);
        assert!(result.words.iter().all(|w| w.score >= 0.99));
        assert!(result.issues.is_empty());
    }
}
