//! Event topics and payload variants crossing the engine's boundary.
//!
//! The bus transports payloads opaquely; the shapes here are validated by
//! their consumers (the batch manager for proposals, observers for the
//! rest), not by the transport.

use crate::batch::BatchSummary;
use crate::decision::{Decision, Evaluation};
use crate::identity::{AgentId, BatchId, EntityId, Timestamp};
use crate::proposal::{Proposal, ProposalKind};
use serde::{Deserialize, Serialize};

/// Unique identifier for a dispatched event.
pub type EventId = EntityId;

// ============================================================================
// TOPICS
// ============================================================================

/// Event topics at the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// A competition opened; agents should respond with proposals.
    CompetitionStart,
    /// An agent submitted a proposal for an open batch.
    AgentProposal,
    /// A completed batch is being handed to the panel.
    EvaluateBatch,
    /// A decision was made for a batch.
    DecisionMade,
    /// Terminal event for a competition.
    CompetitionCompleted,
}

impl Topic {
    /// Wire name of this topic.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Topic::CompetitionStart => "competition:start",
            Topic::AgentProposal => "agent:proposal",
            Topic::EvaluateBatch => "judge:evaluate_batch",
            Topic::DecisionMade => "proposal:decision_made",
            Topic::CompetitionCompleted => "competition:completed",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Outcome summary carried by the terminal `competition:completed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionResult {
    /// The winning agent, absent when the competition was cancelled
    pub winning_agent_id: Option<AgentId>,
    /// Whether the competition was cancelled without a decision
    pub cancelled: bool,
    /// Whether the decision came from the judging panel (vs. the
    /// simplified non-authoritative path)
    pub authoritative: bool,
}

/// Tagged payload variants, one per topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    CompetitionStart {
        batch_id: BatchId,
        kind: ProposalKind,
        timestamp: Timestamp,
    },
    AgentProposal {
        batch_id: BatchId,
        proposal: Proposal,
    },
    EvaluateBatch {
        batch_id: BatchId,
        /// Snapshot of the batch being judged, so subscribers need no
        /// separate lookup
        summary: BatchSummary,
    },
    DecisionMade {
        batch_id: BatchId,
        decision: Decision,
        evaluations: Vec<Evaluation>,
        evaluation_time_ms: u64,
    },
    CompetitionCompleted {
        batch_id: BatchId,
        result: CompetitionResult,
        timestamp: Timestamp,
    },
}

impl EventPayload {
    /// The topic this payload belongs on.
    pub const fn topic(&self) -> Topic {
        match self {
            EventPayload::CompetitionStart { .. } => Topic::CompetitionStart,
            EventPayload::AgentProposal { .. } => Topic::AgentProposal,
            EventPayload::EvaluateBatch { .. } => Topic::EvaluateBatch,
            EventPayload::DecisionMade { .. } => Topic::DecisionMade,
            EventPayload::CompetitionCompleted { .. } => Topic::CompetitionCompleted,
        }
    }

    /// The batch this payload refers to.
    pub const fn batch_id(&self) -> BatchId {
        match self {
            EventPayload::CompetitionStart { batch_id, .. }
            | EventPayload::AgentProposal { batch_id, .. }
            | EventPayload::EvaluateBatch { batch_id, .. }
            | EventPayload::DecisionMade { batch_id, .. }
            | EventPayload::CompetitionCompleted { batch_id, .. } => *batch_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_topic_wire_names() {
        assert_eq!(Topic::CompetitionStart.as_str(), "competition:start");
        assert_eq!(Topic::AgentProposal.as_str(), "agent:proposal");
        assert_eq!(Topic::EvaluateBatch.as_str(), "judge:evaluate_batch");
        assert_eq!(Topic::DecisionMade.as_str(), "proposal:decision_made");
        assert_eq!(
            Topic::CompetitionCompleted.as_str(),
            "competition:completed"
        );
    }

    #[test]
    fn test_payload_topic_mapping() {
        let payload = EventPayload::CompetitionStart {
            batch_id: crate::new_entity_id(),
            kind: crate::ProposalKind::StoryBeat,
            timestamp: Utc::now(),
        };
        assert_eq!(payload.topic(), Topic::CompetitionStart);
    }

    #[test]
    fn test_evaluate_payload_carries_summary() {
        let batch_id = crate::new_entity_id();
        let payload = EventPayload::EvaluateBatch {
            batch_id,
            summary: BatchSummary {
                batch_id,
                kind: crate::ProposalKind::StoryBeat,
                context: serde_json::json!({}),
                proposals: vec![],
            },
        };
        assert_eq!(payload.topic(), Topic::EvaluateBatch);
        assert_eq!(payload.batch_id(), batch_id);
    }
}
