//! CONCLAVE Judges - specialty evaluators and the weighted panel.
//!
//! A judge scores a batch from one specialty viewpoint, either by
//! delegating to a generative backend or through the deterministic rubric.
//! The panel runs all judges concurrently and folds their weighted votes
//! into one Decision.

use conclave_core::{BatchSummary, Evaluation, Specialty};
use conclave_llm::{JudgeBackend, ProposalDigest, VerdictRequest, VerdictResponse};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

pub mod panel;
pub mod rubric;

pub use panel::{Panel, PanelVerdict};

// ============================================================================
// JUDGE
// ============================================================================

/// How a judge reaches its verdict.
enum Strategy {
    /// Rubric argmax with jittered tie-breaking.
    Deterministic,
    /// Ask a generative backend; fall back to the rubric when the reply
    /// cannot be recovered.
    Delegated(Arc<dyn JudgeBackend>),
}

/// A weighted, specialty-scoped scorer of proposal batches.
pub struct Judge {
    id: String,
    specialty: Specialty,
    weight: f64,
    strategy: Strategy,
    // Seeded so scoring is reproducible in tests; locked only briefly,
    // never across an await.
    rng: Mutex<StdRng>,
}

impl Judge {
    /// A judge using only the deterministic rubric.
    pub fn deterministic(
        id: impl Into<String>,
        specialty: Specialty,
        weight: f64,
        seed: u64,
    ) -> Self {
        Self {
            id: id.into(),
            specialty,
            weight,
            strategy: Strategy::Deterministic,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// A judge delegating to a generative backend.
    pub fn delegated(
        id: impl Into<String>,
        specialty: Specialty,
        weight: f64,
        backend: Arc<dyn JudgeBackend>,
        seed: u64,
    ) -> Self {
        Self {
            id: id.into(),
            specialty,
            weight,
            strategy: Strategy::Delegated(backend),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn specialty(&self) -> Specialty {
        self.specialty
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Evaluate a batch from this judge's viewpoint.
    ///
    /// Never returns an error: unrecoverable delegated replies fall back
    /// to the rubric, and a failed backend call becomes a weight-0
    /// abstention that the panel will discard.
    pub async fn evaluate(&self, summary: &BatchSummary) -> Evaluation {
        if summary.proposals.is_empty() {
            return Evaluation::abstention(&self.id, self.specialty, "no proposals to evaluate");
        }
        match &self.strategy {
            Strategy::Deterministic => self.rubric_verdict(summary),
            Strategy::Delegated(backend) => self.delegated_verdict(backend, summary).await,
        }
    }

    fn rubric_verdict(&self, summary: &BatchSummary) -> Evaluation {
        let mut rng = self.rng.lock().expect("judge rng poisoned");
        rubric::evaluate(&self.id, self.specialty, self.weight, summary, &mut *rng)
    }

    async fn delegated_verdict(
        &self,
        backend: &Arc<dyn JudgeBackend>,
        summary: &BatchSummary,
    ) -> Evaluation {
        let request = VerdictRequest {
            specialty: self.specialty,
            criteria: rubric::criteria(self.specialty),
            proposals: summary
                .proposals
                .iter()
                .map(|proposal| {
                    ProposalDigest::new(
                        proposal.agent_id.clone(),
                        proposal.rationale.clone(),
                        &proposal.payload,
                    )
                })
                .collect(),
        };

        let raw = match backend.render_verdict(&request).await {
            Ok(raw) => raw,
            Err(error) => {
                // A dead backend is an abstention, not a vote
                tracing::warn!(
                    judge = %self.id,
                    provider = backend.provider_id(),
                    error = %error,
                    "delegated call failed, abstaining"
                );
                return Evaluation::abstention(
                    &self.id,
                    self.specialty,
                    format!("delegated call failed: {}", error),
                );
            }
        };

        let verdict = match VerdictResponse::from_raw(&raw) {
            Some(verdict) => verdict,
            None => {
                tracing::debug!(judge = %self.id, "unparsable verdict, using rubric fallback");
                return self.rubric_verdict(summary);
            }
        };

        let confidence = verdict.confidence_level();
        let winner = verdict.winner.unwrap_or_default();
        let winner_submitted = summary
            .proposals
            .iter()
            .any(|proposal| proposal.agent_id == winner);
        if !winner_submitted {
            tracing::debug!(
                judge = %self.id,
                winner = %winner,
                "verdict names an agent outside the batch, using rubric fallback"
            );
            return self.rubric_verdict(summary);
        }

        Evaluation {
            judge_id: self.id.clone(),
            specialty: self.specialty,
            weight: self.weight,
            winner: Some(winner),
            confidence,
            rationale: verdict.reasoning.unwrap_or_default(),
            concerns: verdict.concerns.unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for Judge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Judge")
            .field("id", &self.id)
            .field("specialty", &self.specialty)
            .field("weight", &self.weight)
            .field(
                "strategy",
                &match self.strategy {
                    Strategy::Deterministic => "deterministic",
                    Strategy::Delegated(_) => "delegated",
                },
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conclave_core::{BackendError, Batch, Confidence, Proposal, ProposalKind, Quorum};
    use serde_json::json;

    struct CannedBackend {
        reply: Result<String, BackendError>,
    }

    #[async_trait]
    impl JudgeBackend for CannedBackend {
        async fn render_verdict(&self, _request: &VerdictRequest) -> Result<String, BackendError> {
            self.reply.clone()
        }

        fn provider_id(&self) -> &str {
            "canned"
        }
    }

    fn summary() -> BatchSummary {
        let mut batch = Batch::new(
            "req",
            ProposalKind::StoryBeat,
            json!({}),
            Quorum::MinCount(1),
        );
        batch.insert_proposal(Proposal::new(
            "alpha",
            "story",
            ProposalKind::StoryBeat,
            json!({"beat": "reveal"}),
            "a story turn",
        ));
        batch.insert_proposal(Proposal::new(
            "beta",
            "story",
            ProposalKind::StoryBeat,
            json!({}),
            "",
        ));
        batch.summary()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_delegated_verdict_used_when_parseable() {
        let backend = Arc::new(CannedBackend {
            reply: Ok("{\"winner\": \"beta\", \"reasoning\": \"bold\", \
                       \"confidence\": \"high\", \"concerns\": \"\"}"
                .to_string()),
        });
        let judge = Judge::delegated("j1", Specialty::Story, 1.5, backend, 0);
        let evaluation = judge.evaluate(&summary()).await;
        assert_eq!(evaluation.winner.as_deref(), Some("beta"));
        assert_eq!(evaluation.weight, 1.5);
        assert_eq!(evaluation.confidence, Confidence::High);
        assert_eq!(evaluation.rationale, "bold");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_backend_error_becomes_abstention() {
        let backend = Arc::new(CannedBackend {
            reply: Err(BackendError::Unreachable {
                provider: "canned".to_string(),
                reason: "connection refused".to_string(),
            }),
        });
        let judge = Judge::delegated("j1", Specialty::Story, 1.0, backend, 0);
        let evaluation = judge.evaluate(&summary()).await;
        assert!(!evaluation.is_usable());
        assert_eq!(evaluation.weight, 0.0);
        assert!(evaluation.rationale.contains("delegated call failed"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_unparsable_reply_falls_back_to_rubric() {
        let backend = Arc::new(CannedBackend {
            reply: Ok("I cannot decide, sorry!".to_string()),
        });
        let judge = Judge::delegated("j1", Specialty::Story, 1.0, backend, 42);
        let evaluation = judge.evaluate(&summary()).await;
        // Rubric picks alpha: beat field + story rationale vs nothing
        assert_eq!(evaluation.winner.as_deref(), Some("alpha"));
        assert_eq!(evaluation.weight, 1.0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_unknown_winner_falls_back_to_rubric() {
        let backend = Arc::new(CannedBackend {
            reply: Ok("{\"winner\": \"nobody\", \"reasoning\": \"?\"}".to_string()),
        });
        let judge = Judge::delegated("j1", Specialty::Story, 1.0, backend, 42);
        let evaluation = judge.evaluate(&summary()).await;
        assert_eq!(evaluation.winner.as_deref(), Some("alpha"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_empty_summary_abstains_before_delegation() {
        let backend = Arc::new(CannedBackend {
            reply: Ok("{\"winner\": \"alpha\", \"reasoning\": \"r\"}".to_string()),
        });
        let judge = Judge::delegated("j1", Specialty::Story, 1.0, backend, 0);
        let empty = BatchSummary {
            batch_id: conclave_core::new_entity_id(),
            kind: ProposalKind::StoryBeat,
            context: json!({}),
            proposals: vec![],
        };
        let evaluation = judge.evaluate(&empty).await;
        assert!(!evaluation.is_usable());
    }
}
