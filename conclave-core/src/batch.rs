//! Proposal batch: the lifecycle state machine for all proposals
//! targeting one decision point.

use crate::decision::Decision;
use crate::error::BatchError;
use crate::identity::{new_entity_id, AgentId, BatchId, Timestamp};
use crate::proposal::{Proposal, ProposalKind};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// BATCH STATUS
// ============================================================================

/// Lifecycle status of a batch.
///
/// Transitions:
/// - `Collecting -> ReadyForJudging` on quorum (or forced at deadline)
/// - `ReadyForJudging -> Judging` when dispatched to the panel
/// - `Judging -> Decided` when a decision is attached
/// - `Collecting -> Cancelled` at deadline with zero proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    Collecting,
    ReadyForJudging,
    Judging,
    Decided,
    Cancelled,
}

impl BatchStatus {
    /// Whether the batch has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Decided | BatchStatus::Cancelled)
    }
}

/// Why a batch was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Deadline elapsed with zero proposals.
    #[serde(rename = "no-proposals")]
    NoProposals,
}

// ============================================================================
// QUORUM
// ============================================================================

/// Condition for a batch to leave `Collecting`.
///
/// A degenerate quorum (`MinCount(0)` or an empty agent set) is satisfied
/// by any submission set, but the rule is only re-evaluated when a
/// proposal arrives: the first submission advances such a batch, and a
/// batch that receives nothing still cancels at its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quorum {
    /// Complete when every named agent has submitted.
    ExpectedAgents(BTreeSet<AgentId>),
    /// Complete once this many distinct agents have submitted.
    MinCount(usize),
}

impl Default for Quorum {
    fn default() -> Self {
        Quorum::MinCount(2)
    }
}

impl Quorum {
    /// Whether the given set of submitting agents satisfies this quorum.
    pub fn satisfied_by<'a, I>(&self, agents: I) -> bool
    where
        I: IntoIterator<Item = &'a AgentId>,
    {
        match self {
            Quorum::ExpectedAgents(expected) => {
                let submitted: BTreeSet<&AgentId> = agents.into_iter().collect();
                expected.iter().all(|agent| submitted.contains(agent))
            }
            Quorum::MinCount(min) => agents.into_iter().count() >= *min,
        }
    }
}

// ============================================================================
// BATCH
// ============================================================================

/// The set of proposals competing for one decision point, plus its
/// lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Unique identifier for this batch
    pub id: BatchId,
    /// Correlates the batch with the external request that opened it
    pub request_id: String,
    /// Kind of decision being competed for
    pub kind: ProposalKind,
    /// Opaque decision-point context handed to judges
    pub context: serde_json::Value,
    /// Live proposals, at most one per agent (later submissions overwrite)
    pub proposals: HashMap<AgentId, Proposal>,
    /// Submission order of agents; an overwrite keeps the original slot
    submission_order: Vec<AgentId>,
    /// The decision, once one is attached
    pub decision: Option<Decision>,
    /// Lifecycle status
    pub status: BatchStatus,
    /// When this batch was created
    pub created_at: Timestamp,
    /// When this batch was decided
    pub decided_at: Option<Timestamp>,
    /// Quorum rule for leaving `Collecting`
    pub quorum: Quorum,
    /// Set when the batch was force-advanced at deadline with quorum unmet
    pub forced: bool,
    /// Set when the batch was cancelled
    pub cancel_reason: Option<CancelReason>,
}

impl Batch {
    /// Create a new collecting batch.
    pub fn new(
        request_id: impl Into<String>,
        kind: ProposalKind,
        context: serde_json::Value,
        quorum: Quorum,
    ) -> Self {
        Self {
            id: new_entity_id(),
            request_id: request_id.into(),
            kind,
            context,
            proposals: HashMap::new(),
            submission_order: Vec::new(),
            decision: None,
            status: BatchStatus::Collecting,
            created_at: Utc::now(),
            decided_at: None,
            quorum,
            forced: false,
            cancel_reason: None,
        }
    }

    /// Store a proposal keyed by agent id, overwriting any earlier
    /// submission from the same agent. Returns the replaced proposal.
    ///
    /// The agent keeps its original submission-order slot on overwrite.
    pub fn insert_proposal(&mut self, proposal: Proposal) -> Option<Proposal> {
        let agent_id = proposal.agent_id.clone();
        if !self.submission_order.contains(&agent_id) {
            self.submission_order.push(agent_id.clone());
        }
        self.proposals.insert(agent_id, proposal)
    }

    /// Proposals in submission order.
    pub fn proposals_in_order(&self) -> Vec<&Proposal> {
        self.submission_order
            .iter()
            .filter_map(|agent| self.proposals.get(agent))
            .collect()
    }

    /// Whether the quorum rule is satisfied.
    pub fn quorum_met(&self) -> bool {
        self.quorum.satisfied_by(self.proposals.keys())
    }

    /// Transition `Collecting -> ReadyForJudging`.
    pub fn mark_ready(&mut self, forced: bool) -> Result<(), BatchError> {
        if self.status != BatchStatus::Collecting {
            return Err(BatchError::InvalidTransition {
                from: self.status,
                to: BatchStatus::ReadyForJudging,
            });
        }
        self.status = BatchStatus::ReadyForJudging;
        self.forced = forced;
        Ok(())
    }

    /// Transition `ReadyForJudging -> Judging`.
    pub fn mark_judging(&mut self) -> Result<(), BatchError> {
        if self.status != BatchStatus::ReadyForJudging {
            return Err(BatchError::InvalidTransition {
                from: self.status,
                to: BatchStatus::Judging,
            });
        }
        self.status = BatchStatus::Judging;
        Ok(())
    }

    /// Transition `Collecting -> Cancelled`.
    pub fn cancel(&mut self, reason: CancelReason) -> Result<(), BatchError> {
        if self.status != BatchStatus::Collecting {
            return Err(BatchError::InvalidTransition {
                from: self.status,
                to: BatchStatus::Cancelled,
            });
        }
        self.status = BatchStatus::Cancelled;
        self.cancel_reason = Some(reason);
        Ok(())
    }

    /// Attach the decision: marks the winning proposal `Selected`, all
    /// others `Rejected`, and moves the batch to `Decided`.
    ///
    /// Only allowed from `Judging` or `ReadyForJudging`, and only when the
    /// named winner actually submitted a proposal.
    pub fn attach_decision(&mut self, decision: Decision) -> Result<(), BatchError> {
        if !matches!(
            self.status,
            BatchStatus::Judging | BatchStatus::ReadyForJudging
        ) {
            return Err(BatchError::DecisionOutOfPhase {
                batch_id: self.id,
                status: self.status,
            });
        }
        if !self.proposals.contains_key(&decision.winning_agent_id) {
            return Err(BatchError::UnknownWinner {
                batch_id: self.id,
                agent_id: decision.winning_agent_id.clone(),
            });
        }
        let winner = decision.winning_agent_id.clone();
        for (agent_id, proposal) in self.proposals.iter_mut() {
            if *agent_id == winner {
                proposal.mark_selected();
            } else {
                proposal.mark_rejected();
            }
        }
        self.decision = Some(decision);
        self.status = BatchStatus::Decided;
        self.decided_at = Some(Utc::now());
        Ok(())
    }

    /// Immutable summary handed to judges.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.id,
            kind: self.kind,
            context: self.context.clone(),
            proposals: self
                .proposals_in_order()
                .into_iter()
                .cloned()
                .collect(),
        }
    }
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

/// Snapshot of a batch handed to the judging panel. Proposals appear in
/// submission order so first-seen tie-breaking is well-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub kind: ProposalKind,
    pub context: serde_json::Value,
    pub proposals: Vec<Proposal>,
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::decision::Confidence;
    use crate::proposal::ProposalStatus;
    use proptest::prelude::*;
    use serde_json::json;

    fn arb_agents() -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set("[a-z]{1,8}", 1..8)
            .prop_map(|set| set.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// For any decided batch, exactly the winning proposal is Selected
        /// and every other proposal is Rejected.
        #[test]
        fn prop_decision_partitions_proposals(
            agents in arb_agents(),
            winner_index in 0usize..8,
        ) {
            let mut batch = Batch::new(
                "req",
                ProposalKind::StoryBeat,
                json!({}),
                Quorum::MinCount(1),
            );
            for agent in &agents {
                batch.insert_proposal(Proposal::new(
                    agent.clone(),
                    "story",
                    ProposalKind::StoryBeat,
                    json!({"beat": "turn"}),
                    "",
                ));
            }
            batch.mark_ready(false).unwrap();
            batch.mark_judging().unwrap();

            let winner = agents[winner_index % agents.len()].clone();
            let decision =
                Decision::new(batch.id, winner.clone(), "", Confidence::Medium, "");
            batch.attach_decision(decision).unwrap();

            let selected: Vec<&String> = batch
                .proposals
                .iter()
                .filter(|(_, p)| p.status == ProposalStatus::Selected)
                .map(|(agent, _)| agent)
                .collect();
            prop_assert_eq!(selected, vec![&winner]);
            prop_assert!(batch
                .proposals
                .iter()
                .filter(|(agent, _)| **agent != winner)
                .all(|(_, p)| p.status == ProposalStatus::Rejected));
        }

        /// Resubmissions never change the summary's agent order or length.
        #[test]
        fn prop_summary_order_stable_under_resubmission(
            agents in arb_agents(),
            resubmit_index in 0usize..8,
        ) {
            let mut batch = Batch::new(
                "req",
                ProposalKind::StoryBeat,
                json!({}),
                Quorum::MinCount(1),
            );
            for agent in &agents {
                batch.insert_proposal(Proposal::new(
                    agent.clone(),
                    "story",
                    ProposalKind::StoryBeat,
                    json!({"beat": "turn"}),
                    "",
                ));
            }
            let before: Vec<String> = batch
                .summary()
                .proposals
                .iter()
                .map(|p| p.agent_id.clone())
                .collect();

            let resubmitter = agents[resubmit_index % agents.len()].clone();
            batch.insert_proposal(Proposal::new(
                resubmitter,
                "story",
                ProposalKind::StoryBeat,
                json!({"beat": "revised"}),
                "",
            ));
            let after: Vec<String> = batch
                .summary()
                .proposals
                .iter()
                .map(|p| p.agent_id.clone())
                .collect();
            prop_assert_eq!(before, after);
        }
    }
}
