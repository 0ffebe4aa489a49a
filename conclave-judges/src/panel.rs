//! Evaluator panel: concurrent judging and weighted vote aggregation.

use crate::Judge;
use conclave_core::{
    BatchSummary, Confidence, Decision, Evaluation, PanelConfig, TieBreak,
};
use conclave_llm::extract::floor_char_boundary;
use std::sync::Arc;

/// The panel's output: the decision plus every judge's evaluation, in
/// roster order, for audit and event publication.
#[derive(Debug, Clone)]
pub struct PanelVerdict {
    pub decision: Decision,
    pub evaluations: Vec<Evaluation>,
}

/// A weighted multi-judge panel.
pub struct Panel {
    judges: Vec<Arc<Judge>>,
    config: PanelConfig,
}

struct Tally<'a> {
    agent_id: String,
    weight: f64,
    supporters: Vec<&'a Evaluation>,
}

impl Panel {
    pub fn new(judges: Vec<Arc<Judge>>, config: PanelConfig) -> Self {
        Self { judges, config }
    }

    /// Number of configured judges, the denominator of the consensus check.
    pub fn judge_count(&self) -> usize {
        self.judges.len()
    }

    /// Judge a batch: dispatch every judge concurrently, await them all,
    /// and aggregate the weighted votes into one Decision.
    ///
    /// Judging never fails outright. A panel where no judge produced a
    /// usable evaluation degrades to naming the first submitted proposal's
    /// agent with low confidence and an explicit concern.
    pub async fn evaluate_batch(&self, summary: &BatchSummary) -> PanelVerdict {
        let shared = Arc::new(summary.clone());
        let handles: Vec<_> = self
            .judges
            .iter()
            .map(|judge| {
                let judge = Arc::clone(judge);
                let summary = Arc::clone(&shared);
                tokio::spawn(async move { judge.evaluate(&summary).await })
            })
            .collect();

        let mut evaluations = Vec::with_capacity(handles.len());
        for (handle, judge) in handles.into_iter().zip(&self.judges) {
            match handle.await {
                Ok(evaluation) => evaluations.push(evaluation),
                Err(join_error) => {
                    tracing::warn!(
                        judge = judge.id(),
                        error = %join_error,
                        "judge task aborted, recording abstention"
                    );
                    evaluations.push(Evaluation::abstention(
                        judge.id(),
                        judge.specialty(),
                        format!("judge task aborted: {}", join_error),
                    ));
                }
            }
        }

        let decision = self.aggregate(summary, &evaluations);
        PanelVerdict {
            decision,
            evaluations,
        }
    }

    /// Weighted aggregation over evaluations, in submission order.
    pub fn aggregate(&self, summary: &BatchSummary, evaluations: &[Evaluation]) -> Decision {
        let usable: Vec<&Evaluation> = evaluations
            .iter()
            .filter(|evaluation| evaluation.is_usable())
            .collect();

        if usable.is_empty() {
            return self.degraded_decision(summary);
        }

        // Accumulate weight per candidate, first-seen order preserved
        let mut tallies: Vec<Tally> = Vec::new();
        for evaluation in &usable {
            // is_usable guarantees a winner is present
            let Some(candidate) = evaluation.winner.clone() else {
                continue;
            };
            match tallies.iter_mut().find(|tally| tally.agent_id == candidate) {
                Some(tally) => {
                    tally.weight += evaluation.weight;
                    tally.supporters.push(evaluation);
                }
                None => tallies.push(Tally {
                    agent_id: candidate,
                    weight: evaluation.weight,
                    supporters: vec![evaluation],
                }),
            }
        }

        let winner_index = match self.config.tie_break {
            // Strictly-greater keeps the first-seen candidate on ties
            TieBreak::FirstSeen => tallies
                .iter()
                .enumerate()
                .fold(0, |best, (index, tally)| {
                    if tally.weight > tallies[best].weight {
                        index
                    } else {
                        best
                    }
                }),
        };
        let winner = &tallies[winner_index];

        let runner_up_weight = tallies
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != winner_index)
            .map(|(_, tally)| tally.weight)
            .fold(f64::NEG_INFINITY, f64::max);

        let confidence_sum: f64 = winner
            .supporters
            .iter()
            .map(|evaluation| evaluation.confidence.score())
            .sum();
        let confidence =
            Confidence::from_average(confidence_sum / winner.supporters.len() as f64);

        let mut concerns: Vec<String> = Vec::new();
        if tallies.len() > 1 && winner.weight - runner_up_weight <= self.config.close_margin {
            concerns.push(format!(
                "close decision (margin {:.2})",
                winner.weight - runner_up_weight
            ));
        }
        let support_ratio = winner.supporters.len() as f64 / self.judges.len().max(1) as f64;
        if support_ratio < self.config.consensus_threshold {
            concerns.push(format!(
                "low consensus ({}/{} judges)",
                winner.supporters.len(),
                self.judges.len()
            ));
        }

        let mut rationale = winner
            .supporters
            .iter()
            .map(|evaluation| format!("[{}] {}", evaluation.specialty, evaluation.rationale))
            .collect::<Vec<_>>()
            .join("; ");
        if rationale.len() > self.config.rationale_cap {
            let cut = floor_char_boundary(&rationale, self.config.rationale_cap);
            rationale.truncate(cut);
            rationale.push_str("...");
        }

        tracing::info!(
            batch_id = %summary.batch_id,
            winner = %winner.agent_id,
            weight = winner.weight,
            supporters = winner.supporters.len(),
            "panel decision"
        );

        Decision::new(
            summary.batch_id,
            winner.agent_id.clone(),
            rationale,
            confidence,
            concerns.join("; "),
        )
    }

    fn degraded_decision(&self, summary: &BatchSummary) -> Decision {
        let fallback_agent = summary
            .proposals
            .first()
            .map(|proposal| proposal.agent_id.clone())
            .unwrap_or_default();
        tracing::warn!(
            batch_id = %summary.batch_id,
            fallback = %fallback_agent,
            "no usable evaluations, degraded decision"
        );
        Decision::new(
            summary.batch_id,
            fallback_agent,
            "panel produced no usable evaluations; defaulting to first submitted proposal",
            Confidence::Low,
            "panel failure: all judges abstained or failed",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{Batch, Proposal, ProposalKind, Quorum, Specialty};
    use serde_json::json;

    pub(super) fn summary() -> BatchSummary {
        let mut batch = Batch::new(
            "req",
            ProposalKind::StoryBeat,
            json!({}),
            Quorum::MinCount(1),
        );
        for agent in ["x", "y"] {
            batch.insert_proposal(Proposal::new(
                agent,
                "story",
                ProposalKind::StoryBeat,
                json!({"beat": "turn"}),
                "advance",
            ));
        }
        batch.summary()
    }

    pub(super) fn vote(judge: &str, specialty: Specialty, weight: f64, winner: &str) -> Evaluation {
        Evaluation {
            judge_id: judge.to_string(),
            specialty,
            weight,
            winner: Some(winner.to_string()),
            rationale: format!("{} liked {}", judge, winner),
            confidence: Confidence::High,
            concerns: String::new(),
        }
    }

    pub(super) fn panel_of(count: usize) -> Panel {
        let judges = (0..count)
            .map(|index| {
                Arc::new(Judge::deterministic(
                    format!("judge-{index}"),
                    Specialty::Story,
                    1.0,
                    index as u64,
                ))
            })
            .collect();
        Panel::new(judges, PanelConfig::default())
    }

    #[test]
    fn test_weighted_majority_with_low_consensus_concern() {
        let panel = panel_of(3);
        let evaluations = vec![
            vote("j1", Specialty::Technical, 1.0, "x"),
            vote("j2", Specialty::Story, 1.0, "x"),
            vote("j3", Specialty::Audience, 0.5, "y"),
        ];
        let decision = panel.aggregate(&summary(), &evaluations);
        assert_eq!(decision.winning_agent_id, "x");
        // 2 of 3 judges backed the winner: 66% < 75%
        assert!(decision.concerns.contains("low consensus (2/3 judges)"));
        // Margin 2.0 - 0.5 = 1.5 is not close
        assert!(!decision.concerns.contains("close decision"));
    }

    #[test]
    fn test_three_quarters_support_is_not_low_consensus() {
        let panel = panel_of(4);
        let evaluations = vec![
            vote("j1", Specialty::Technical, 1.0, "x"),
            vote("j2", Specialty::Story, 1.0, "x"),
            vote("j3", Specialty::Audience, 1.0, "x"),
            vote("j4", Specialty::Visual, 0.5, "y"),
        ];
        let decision = panel.aggregate(&summary(), &evaluations);
        assert_eq!(decision.winning_agent_id, "x");
        // 3 of 4 = exactly the 75% threshold: no concern
        assert!(!decision.concerns.contains("low consensus"));
    }

    #[test]
    fn test_close_margin_raises_concern() {
        let panel = panel_of(2);
        let evaluations = vec![
            vote("j1", Specialty::Technical, 1.0, "x"),
            vote("j2", Specialty::Story, 0.8, "y"),
        ];
        let decision = panel.aggregate(&summary(), &evaluations);
        assert_eq!(decision.winning_agent_id, "x");
        assert!(decision.concerns.contains("close decision"));
    }

    #[test]
    fn test_exact_tie_first_seen_wins() {
        let panel = panel_of(2);
        let evaluations = vec![
            vote("j1", Specialty::Story, 1.0, "y"),
            vote("j2", Specialty::Visual, 1.0, "x"),
        ];
        let decision = panel.aggregate(&summary(), &evaluations);
        assert_eq!(decision.winning_agent_id, "y");
    }

    #[test]
    fn test_abstentions_are_discarded() {
        let panel = panel_of(3);
        let evaluations = vec![
            Evaluation::abstention("j1", Specialty::Technical, "backend down"),
            vote("j2", Specialty::Story, 0.5, "y"),
            Evaluation::abstention("j3", Specialty::Visual, "backend down"),
        ];
        let decision = panel.aggregate(&summary(), &evaluations);
        assert_eq!(decision.winning_agent_id, "y");
    }

    #[test]
    fn test_all_abstentions_degrade_to_first_proposal() {
        let panel = panel_of(2);
        let evaluations = vec![
            Evaluation::abstention("j1", Specialty::Technical, "down"),
            Evaluation::abstention("j2", Specialty::Story, "down"),
        ];
        let decision = panel.aggregate(&summary(), &evaluations);
        assert_eq!(decision.winning_agent_id, "x");
        assert_eq!(decision.confidence, Confidence::Low);
        assert!(decision.concerns.contains("panel failure"));
    }

    #[test]
    fn test_aggregate_confidence_averages_supporters() {
        let panel = panel_of(2);
        let mut medium_vote = vote("j1", Specialty::Story, 1.0, "x");
        medium_vote.confidence = Confidence::Medium;
        let evaluations = vec![vote("j0", Specialty::Technical, 1.0, "x"), medium_vote];
        let decision = panel.aggregate(&summary(), &evaluations);
        // (3 + 2) / 2 = 2.5 maps to high
        assert_eq!(decision.confidence, Confidence::High);
    }

    #[test]
    fn test_rationale_is_specialty_tagged_and_bounded() {
        let judges = vec![Arc::new(Judge::deterministic(
            "j",
            Specialty::Story,
            1.0,
            0,
        ))];
        let config = PanelConfig {
            rationale_cap: 30,
            ..PanelConfig::default()
        };
        let panel = Panel::new(judges, config);
        let mut long_vote = vote("j", Specialty::Story, 1.0, "x");
        long_vote.rationale = "a very long justification that overflows the cap".to_string();
        let decision = panel.aggregate(&summary(), &[long_vote]);
        assert!(decision.rationale.starts_with("[story]"));
        assert!(decision.rationale.ends_with("..."));
        assert!(decision.rationale.len() <= 33);
    }

    #[test]
    fn test_judge_count_reflects_roster() {
        assert_eq!(panel_of(4).judge_count(), 4);
        assert_eq!(panel_of(0).judge_count(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_evaluate_batch_runs_all_judges() {
        let panel = panel_of(3);
        let verdict = panel.evaluate_batch(&summary()).await;
        assert_eq!(verdict.evaluations.len(), 3);
        assert!(verdict.decision.authoritative);
        assert!(!verdict.decision.winning_agent_id.is_empty());
    }
}

#[cfg(test)]
mod property_tests {
    use super::tests::{panel_of, summary, vote};
    use conclave_core::Specialty;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn arb_votes() -> impl Strategy<Value = Vec<(f64, bool)>> {
        // (weight, votes-for-x) pairs; weight 0 never occurs here
        prop::collection::vec((0.1f64..2.0, any::<bool>()), 1..6)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The aggregated winner always carries at least as much total
        /// weight as every other candidate.
        #[test]
        fn prop_winner_has_maximal_weight(votes in arb_votes()) {
            let panel = panel_of(votes.len());
            let evaluations: Vec<_> = votes
                .iter()
                .enumerate()
                .map(|(index, (weight, for_x))| {
                    let candidate = if *for_x { "x" } else { "y" };
                    vote(&format!("j{index}"), Specialty::Story, *weight, candidate)
                })
                .collect();

            let decision = panel.aggregate(&summary(), &evaluations);

            let mut totals: HashMap<&str, f64> = HashMap::new();
            for (weight, for_x) in &votes {
                *totals.entry(if *for_x { "x" } else { "y" }).or_default() += weight;
            }
            let winning = totals[decision.winning_agent_id.as_str()];
            prop_assert!(totals.values().all(|total| winning >= *total));
        }
    }
}
