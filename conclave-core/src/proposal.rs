//! Proposal entity: one agent's candidate action for one decision point.

use crate::identity::{new_entity_id, AgentId, ProposalId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// PROPOSAL KIND
// ============================================================================

/// The kind of decision a proposal competes for.
///
/// Each kind carries a fixed priority class (lower number = more urgent)
/// used when competing dispatches contend for attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    /// Place or move an asset in the scene.
    AssetPlacement,
    /// Reframe or move the camera.
    CameraMove,
    /// Advance the narrative with a story beat.
    StoryBeat,
    /// Speak a line of dialogue.
    Dialogue,
}

impl ProposalKind {
    /// Fixed priority class for this kind. Lower = more urgent.
    pub const fn priority_class(&self) -> u8 {
        match self {
            ProposalKind::AssetPlacement => 1,
            ProposalKind::StoryBeat => 1,
            ProposalKind::CameraMove => 2,
            ProposalKind::Dialogue => 3,
        }
    }

    /// Wire name of this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProposalKind::AssetPlacement => "asset_placement",
            ProposalKind::CameraMove => "camera_move",
            ProposalKind::StoryBeat => "story_beat",
            ProposalKind::Dialogue => "dialogue",
        }
    }
}

impl std::fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PROPOSAL STATUS
// ============================================================================

/// Lifecycle status of a proposal.
///
/// A proposal is mutable only while `Pending`; once it is `Selected` or
/// `Rejected` it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// Awaiting judging.
    Pending,
    /// Chosen by the panel as the winning proposal.
    Selected,
    /// Lost the competition.
    Rejected,
}

// ============================================================================
// PROPOSAL METADATA
// ============================================================================

/// Derived metadata attached to a proposal at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalMetadata {
    /// Rough size of the proposal's textual content, in bytes.
    pub estimated_text_size: usize,
    /// Priority class derived from the proposal kind (lower = more urgent).
    pub priority_class: u8,
    /// Structured fields extracted from the payload for judging comparisons.
    pub comparable_fields: BTreeMap<String, serde_json::Value>,
}

/// Payload fields worth surfacing for cross-proposal comparison.
const COMPARABLE_KEYS: &[&str] = &[
    "position", "asset_type", "type", "category", "beat", "choices", "color", "scale",
];

fn extract_comparable_fields(
    payload: &serde_json::Value,
) -> BTreeMap<String, serde_json::Value> {
    let mut fields = BTreeMap::new();
    if let Some(object) = payload.as_object() {
        for key in COMPARABLE_KEYS {
            if let Some(value) = object.get(*key) {
                fields.insert((*key).to_string(), value.clone());
            }
        }
    }
    fields
}

// ============================================================================
// PROPOSAL
// ============================================================================

/// One agent's candidate action for a decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique identifier for this proposal
    pub id: ProposalId,
    /// Agent that submitted this proposal
    pub agent_id: AgentId,
    /// Category of the submitting agent (e.g., "story", "technical")
    pub agent_category: String,
    /// Kind of decision this proposal competes for
    pub kind: ProposalKind,
    /// Kind-specific structured payload
    pub payload: serde_json::Value,
    /// The agent's stated reasoning for this proposal
    pub rationale: String,
    /// When this proposal was submitted
    pub submitted_at: Timestamp,
    /// Lifecycle status
    pub status: ProposalStatus,
    /// Derived metadata
    pub metadata: ProposalMetadata,
}

impl Proposal {
    /// Create a new pending proposal.
    ///
    /// `priority_class` and `comparable_fields` are derived here, once,
    /// from the kind and payload.
    pub fn new(
        agent_id: impl Into<AgentId>,
        agent_category: impl Into<String>,
        kind: ProposalKind,
        payload: serde_json::Value,
        rationale: impl Into<String>,
    ) -> Self {
        let rationale = rationale.into();
        let payload_size = serde_json::to_string(&payload)
            .map(|s| s.len())
            .unwrap_or(0);
        let metadata = ProposalMetadata {
            estimated_text_size: rationale.len() + payload_size,
            priority_class: kind.priority_class(),
            comparable_fields: extract_comparable_fields(&payload),
        };
        Self {
            id: new_entity_id(),
            agent_id: agent_id.into(),
            agent_category: agent_category.into(),
            kind,
            payload,
            rationale,
            submitted_at: Utc::now(),
            status: ProposalStatus::Pending,
            metadata,
        }
    }

    /// Whether this proposal can still change.
    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    /// Mark this proposal as the winner. No-op unless pending.
    pub(crate) fn mark_selected(&mut self) {
        if self.is_pending() {
            self.status = ProposalStatus::Selected;
        }
    }

    /// Mark this proposal as a loser. No-op unless pending.
    pub(crate) fn mark_rejected(&mut self) {
        if self.is_pending() {
            self.status = ProposalStatus::Rejected;
        }
    }

    /// The proposal's 3D position, when the payload carries a valid
    /// 3-element numeric `position` array.
    pub fn position(&self) -> Option<[f64; 3]> {
        let array = self.payload.get("position")?.as_array()?;
        if array.len() != 3 {
            return None;
        }
        let mut position = [0.0; 3];
        for (slot, value) in position.iter_mut().zip(array) {
            *slot = value.as_f64()?;
        }
        Some(position)
    }

    /// Whether the payload carries a field under any of the given keys.
    pub fn has_any_field(&self, keys: &[&str]) -> bool {
        self.payload
            .as_object()
            .map(|object| keys.iter().any(|key| object.contains_key(*key)))
            .unwrap_or(false)
    }

    /// Number of choice options offered by this proposal.
    pub fn choice_count(&self) -> usize {
        self.payload
            .get("choices")
            .and_then(|choices| choices.as_array())
            .map(|choices| choices.len())
            .unwrap_or(0)
    }

    /// Case-insensitive rationale keyword check.
    pub fn rationale_mentions(&self, keywords: &[&str]) -> bool {
        let rationale = self.rationale.to_lowercase();
        keywords.iter().any(|keyword| rationale.contains(keyword))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_class_lookup_is_fixed() {
        assert_eq!(ProposalKind::AssetPlacement.priority_class(), 1);
        assert_eq!(ProposalKind::StoryBeat.priority_class(), 1);
        assert_eq!(ProposalKind::CameraMove.priority_class(), 2);
        assert_eq!(ProposalKind::Dialogue.priority_class(), 3);
    }

    #[test]
    fn test_new_proposal_is_pending_with_derived_metadata() {
        let proposal = Proposal::new(
            "builder-agent",
            "technical",
            ProposalKind::AssetPlacement,
            json!({"position": [1.0, 0.5, -2.0], "asset_type": "rock"}),
            "place a rock",
        );
        assert_eq!(proposal.status, ProposalStatus::Pending);
        assert_eq!(proposal.metadata.priority_class, 1);
        assert!(proposal.metadata.estimated_text_size > "place a rock".len());
        assert!(proposal.metadata.comparable_fields.contains_key("position"));
        assert!(proposal
            .metadata
            .comparable_fields
            .contains_key("asset_type"));
    }

    #[test]
    fn test_position_requires_three_numeric_elements() {
        let good = Proposal::new(
            "a",
            "technical",
            ProposalKind::AssetPlacement,
            json!({"position": [1, 2, 3]}),
            "",
        );
        assert_eq!(good.position(), Some([1.0, 2.0, 3.0]));

        let short = Proposal::new(
            "a",
            "technical",
            ProposalKind::AssetPlacement,
            json!({"position": [1, 2]}),
            "",
        );
        assert_eq!(short.position(), None);

        let not_numeric = Proposal::new(
            "a",
            "technical",
            ProposalKind::AssetPlacement,
            json!({"position": [1, "two", 3]}),
            "",
        );
        assert_eq!(not_numeric.position(), None);
    }

    #[test]
    fn test_resolved_proposal_does_not_change_again() {
        let mut proposal = Proposal::new(
            "a",
            "story",
            ProposalKind::StoryBeat,
            json!({"beat": "reveal"}),
            "",
        );
        proposal.mark_selected();
        assert_eq!(proposal.status, ProposalStatus::Selected);
        proposal.mark_rejected();
        assert_eq!(proposal.status, ProposalStatus::Selected);
    }

    #[test]
    fn test_rationale_mentions_is_case_insensitive() {
        let proposal = Proposal::new(
            "a",
            "story",
            ProposalKind::StoryBeat,
            json!({}),
            "A dramatic Story moment",
        );
        assert!(proposal.rationale_mentions(&["story"]));
        assert!(proposal.rationale_mentions(&["dramatic"]));
        assert!(!proposal.rationale_mentions(&["audience"]));
    }
}
