//! Identity types for CONCLAVE entities

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of a proposal batch (one per decision point).
pub type BatchId = EntityId;

/// Identifier of a single proposal.
pub type ProposalId = EntityId;

/// Identifier of a published decision.
pub type DecisionId = EntityId;

/// Identifier of an external proposing agent.
///
/// Agents register under stable, human-assigned names ("story-agent",
/// "camera-agent"), so this is a string rather than a UUID.
pub type AgentId = String;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ids_are_sortable_by_creation() {
        let a = new_entity_id();
        let b = new_entity_id();
        // UUIDv7 is monotonic within a process
        assert!(a <= b);
    }
}
