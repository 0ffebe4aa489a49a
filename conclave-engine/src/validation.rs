//! Kind-specific proposal validation, applied at the batch manager
//! boundary. The bus transports payloads opaquely; malformed proposals
//! are rejected here, synchronously, with a full error list.

use conclave_core::{Proposal, ProposalKind, ValidationError};

/// Validate a proposal against its kind's required fields.
pub fn validate_proposal(kind: ProposalKind, proposal: &Proposal) -> Result<(), ValidationError> {
    if proposal.kind != kind {
        return Err(ValidationError::KindMismatch {
            proposal_kind: proposal.kind.to_string(),
            batch_kind: kind.to_string(),
        });
    }

    let mut errors: Vec<String> = Vec::new();
    match kind {
        ProposalKind::AssetPlacement => match proposal.position() {
            None => {
                errors.push("asset_placement requires a 3-element numeric position array".into());
            }
            Some(position) if position[1] < 0.0 => {
                errors.push("position vertical coordinate must be non-negative".into());
            }
            Some(_) => {}
        },
        ProposalKind::CameraMove => {
            if proposal.position().is_none() {
                errors.push("camera_move requires a 3-element numeric position array".into());
            }
        }
        ProposalKind::StoryBeat => {
            if !has_nonempty_string(proposal, &["beat", "narrative_beat", "story_beat"]) {
                errors.push("story_beat requires a non-empty beat field".into());
            }
        }
        ProposalKind::Dialogue => {
            if !has_nonempty_string(proposal, &["line", "text"]) {
                errors.push("dialogue requires a non-empty line or text field".into());
            }
        }
    }

    if proposal.agent_id.trim().is_empty() {
        errors.push("agent id must not be empty".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Failed { errors })
    }
}

fn has_nonempty_string(proposal: &Proposal, keys: &[&str]) -> bool {
    keys.iter().any(|key| {
        proposal
            .payload
            .get(*key)
            .and_then(|value| value.as_str())
            .map(|text| !text.trim().is_empty())
            .unwrap_or(false)
    })
}
