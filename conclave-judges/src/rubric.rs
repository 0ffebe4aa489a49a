//! Deterministic scoring rubric.
//!
//! Each specialty scores a proposal from additive checks on its structured
//! payload fields and rationale text. The rubric backs the deterministic
//! judging strategy and the fallback path when a delegated verdict cannot
//! be recovered.

use conclave_core::{BatchSummary, Confidence, Evaluation, Proposal, Specialty};
use rand::Rng;

/// Payload keys treated as a type/category marker.
const TYPE_KEYS: &[&str] = &["asset_type", "type", "category"];
/// Payload keys treated as a narrative beat marker.
const BEAT_KEYS: &[&str] = &["beat", "narrative_beat", "story_beat"];

/// Judging criteria shown to delegated backends, per specialty.
pub fn criteria(specialty: Specialty) -> Vec<String> {
    let lines: &[&str] = match specialty {
        Specialty::Technical => &[
            "proposal specifies a spatial position",
            "proposal declares an asset type or category",
            "placement sits at or above ground level",
        ],
        Specialty::Story => &[
            "proposal advances a clear narrative beat",
            "proposal offers the audience choices",
            "reasoning engages with the story",
        ],
        Specialty::Audience => &[
            "reasoning addresses audience engagement",
            "proposal offers interactive choices",
            "reasoning is substantive, not a one-liner",
        ],
        Specialty::Visual => &[
            "proposal places something in the frame",
            "proposal controls color or scale",
            "reasoning argues visual or dramatic impact",
        ],
    };
    lines.iter().map(|line| line.to_string()).collect()
}

/// Score one proposal from one specialty's viewpoint.
pub fn score(specialty: Specialty, proposal: &Proposal) -> f64 {
    match specialty {
        Specialty::Technical => {
            let mut points = 0.0;
            // A grounded position earns both the presence and clearance
            // points; a missing or sunken position is penalized instead.
            match proposal.position() {
                Some(position) if position[1] >= 0.0 => points += 3.0 + 2.0,
                _ => points -= 1.0,
            }
            if proposal.has_any_field(TYPE_KEYS) {
                points += 2.0;
            }
            points
        }
        Specialty::Story => {
            let mut points = 0.0;
            if proposal.has_any_field(BEAT_KEYS) {
                points += 3.0;
            }
            if proposal.choice_count() >= 1 {
                points += 2.0;
            }
            if proposal.rationale_mentions(&["narrative", "story"]) {
                points += 1.0;
            }
            points
        }
        Specialty::Audience => {
            let mut points = 0.0;
            if proposal.rationale_mentions(&["engagement", "audience"]) {
                points += 3.0;
            }
            if proposal.choice_count() >= 1 {
                points += 2.0;
            }
            if proposal.rationale.len() > 50 {
                points += 1.0;
            }
            points
        }
        Specialty::Visual => {
            let mut points = 0.0;
            if proposal.has_any_field(&["position"]) {
                points += 2.0;
            }
            if proposal.has_any_field(&["color", "scale"]) {
                points += 2.0;
            }
            if proposal.rationale_mentions(&["visual", "dramatic"]) {
                points += 2.0;
            }
            points
        }
    }
}

/// Run the full deterministic evaluation for one judge.
///
/// The winner is the argmax over rubric scores, with a bounded random
/// jitter of up to ±1 point breaking exact ties. Confidence derives from
/// the raw (unjittered) score spread so it stays deterministic:
/// spread > 3 high, spread < 1 low, otherwise medium.
pub fn evaluate<R: Rng>(
    judge_id: &str,
    specialty: Specialty,
    weight: f64,
    summary: &BatchSummary,
    rng: &mut R,
) -> Evaluation {
    if summary.proposals.is_empty() {
        return Evaluation::abstention(judge_id, specialty, "no proposals to evaluate");
    }

    let raw: Vec<f64> = summary
        .proposals
        .iter()
        .map(|proposal| score(specialty, proposal))
        .collect();

    let mut winner_index = 0;
    let mut best_jittered = f64::NEG_INFINITY;
    for (index, &points) in raw.iter().enumerate() {
        let jittered = points + rng.random_range(-1.0..=1.0);
        if jittered > best_jittered {
            best_jittered = jittered;
            winner_index = index;
        }
    }

    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = raw.iter().cloned().fold(f64::INFINITY, f64::min);
    let spread = max - min;
    let confidence = if spread > 3.0 {
        Confidence::High
    } else if spread < 1.0 {
        Confidence::Low
    } else {
        Confidence::Medium
    };

    let weak = raw.iter().filter(|&&points| points < 2.0).count();
    let concerns = if weak > 0 {
        format!(
            "{} weak proposal{}",
            weak,
            if weak == 1 { "" } else { "s" }
        )
    } else {
        String::new()
    };

    let winner = &summary.proposals[winner_index];
    Evaluation {
        judge_id: judge_id.to_string(),
        specialty,
        weight,
        winner: Some(winner.agent_id.clone()),
        rationale: format!(
            "Rubric favored {} on {} criteria with {:.1} points",
            winner.agent_id, specialty, raw[winner_index]
        ),
        confidence,
        concerns,
    }
}
