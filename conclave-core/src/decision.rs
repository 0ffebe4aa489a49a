//! Evaluation and Decision entities.

use crate::identity::{new_entity_id, AgentId, BatchId, DecisionId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIDENCE
// ============================================================================

/// Confidence level attached to evaluations and decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Numeric score used for averaging: low=1, medium=2, high=3.
    pub const fn score(&self) -> f64 {
        match self {
            Confidence::Low => 1.0,
            Confidence::Medium => 2.0,
            Confidence::High => 3.0,
        }
    }

    /// Map an averaged score back to a level: >= 2.5 high, >= 1.5 medium,
    /// else low.
    pub fn from_average(average: f64) -> Self {
        if average >= 2.5 {
            Confidence::High
        } else if average >= 1.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    /// Parse a wire string ("low"/"medium"/"high"), case-insensitive.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "low" => Some(Confidence::Low),
            "medium" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            _ => None,
        }
    }
}

// ============================================================================
// SPECIALTY
// ============================================================================

/// Judging specialty: the viewpoint a judge scores a batch from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specialty {
    /// Spatial soundness and scene mechanics.
    Technical,
    /// Narrative quality and pacing.
    Story,
    /// Audience engagement and interactivity.
    Audience,
    /// Visual composition and drama.
    Visual,
}

impl Specialty {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Specialty::Technical => "technical",
            Specialty::Story => "story",
            Specialty::Audience => "audience",
            Specialty::Visual => "visual",
        }
    }
}

impl std::fmt::Display for Specialty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

/// One judge's verdict on a batch.
///
/// A judge that cannot evaluate at all abstains: weight 0, no winner.
/// Abstentions never contribute to the panel's vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Identifier of the judge that produced this evaluation
    pub judge_id: String,
    /// The judge's specialty
    pub specialty: Specialty,
    /// Vote weight; 0 marks an abstention
    pub weight: f64,
    /// The agent this judge votes for, if any
    pub winner: Option<AgentId>,
    /// The judge's reasoning
    pub rationale: String,
    /// How confident the judge is in its pick
    pub confidence: Confidence,
    /// Free-text concerns raised during evaluation
    pub concerns: String,
}

impl Evaluation {
    /// An abstention: weight 0, no winner, with an explanatory rationale.
    pub fn abstention(
        judge_id: impl Into<String>,
        specialty: Specialty,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            judge_id: judge_id.into(),
            specialty,
            weight: 0.0,
            winner: None,
            rationale: reason.into(),
            confidence: Confidence::Low,
            concerns: String::new(),
        }
    }

    /// Whether this evaluation counts toward the panel vote.
    pub fn is_usable(&self) -> bool {
        self.weight > 0.0 && self.winner.is_some()
    }
}

// ============================================================================
// DECISION
// ============================================================================

/// The panel's final, binding winner selection for one batch.
/// Immutable once created; exactly one per decided batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Unique identifier for this decision
    pub id: DecisionId,
    /// Batch this decision resolves
    pub batch_id: BatchId,
    /// The winning agent
    pub winning_agent_id: AgentId,
    /// Combined reasoning behind the selection
    pub rationale: String,
    /// Aggregate confidence
    pub confidence: Confidence,
    /// Aggregate concerns ("close decision", "low consensus", ...)
    pub concerns: String,
    /// False when produced by the non-authoritative simplified selection
    /// path rather than the judging panel.
    pub authoritative: bool,
    /// When this decision was created
    pub created_at: Timestamp,
}

impl Decision {
    /// Create an authoritative panel decision.
    pub fn new(
        batch_id: BatchId,
        winning_agent_id: AgentId,
        rationale: impl Into<String>,
        confidence: Confidence,
        concerns: impl Into<String>,
    ) -> Self {
        Self {
            id: new_entity_id(),
            batch_id,
            winning_agent_id,
            rationale: rationale.into(),
            confidence,
            concerns: concerns.into(),
            authoritative: true,
            created_at: Utc::now(),
        }
    }

    /// Flag this decision as non-authoritative (simplified selection).
    pub fn non_authoritative(mut self) -> Self {
        self.authoritative = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_average_boundaries() {
        assert_eq!(Confidence::from_average(2.5), Confidence::High);
        assert_eq!(Confidence::from_average(2.49), Confidence::Medium);
        assert_eq!(Confidence::from_average(1.5), Confidence::Medium);
        assert_eq!(Confidence::from_average(1.49), Confidence::Low);
    }

    #[test]
    fn test_confidence_parse() {
        assert_eq!(Confidence::parse("HIGH"), Some(Confidence::High));
        assert_eq!(Confidence::parse(" medium "), Some(Confidence::Medium));
        assert_eq!(Confidence::parse("none"), None);
    }

    #[test]
    fn test_abstention_is_not_usable() {
        let abstention =
            Evaluation::abstention("judge-1", Specialty::Technical, "backend unreachable");
        assert_eq!(abstention.weight, 0.0);
        assert_eq!(abstention.winner, None);
        assert!(!abstention.is_usable());
    }

    #[test]
    fn test_decision_defaults_to_authoritative() {
        let decision = Decision::new(
            crate::new_entity_id(),
            "agent-a".to_string(),
            "clear winner",
            Confidence::High,
            "",
        );
        assert!(decision.authoritative);
        assert!(!decision.non_authoritative().authoritative);
    }
}
