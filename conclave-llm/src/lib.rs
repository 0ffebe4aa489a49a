//! CONCLAVE LLM - delegated backend boundary.
//!
//! Judges may delegate their verdict to an external generative backend.
//! This crate defines the request/response shapes crossing that boundary,
//! the `JudgeBackend` trait implementations must satisfy, and the recovery
//! parsing applied to whatever text the backend returns.

use async_trait::async_trait;
use conclave_core::{AgentId, BackendError, Confidence, Specialty};
use serde::{Deserialize, Serialize};

pub mod client;
pub mod extract;

pub use client::HttpJudgeBackend;
pub use extract::extract_json_object;

// ============================================================================
// REQUEST / RESPONSE SHAPES
// ============================================================================

/// A proposal as presented to the backend: id, reasoning, and a bounded
/// payload excerpt. Full payloads are never shipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDigest {
    pub agent_id: AgentId,
    pub rationale: String,
    pub payload_excerpt: String,
}

impl ProposalDigest {
    /// Cap applied to serialized payloads before shipping.
    pub const EXCERPT_CAP: usize = 400;

    pub fn new(agent_id: AgentId, rationale: String, payload: &serde_json::Value) -> Self {
        let mut payload_excerpt = payload.to_string();
        if payload_excerpt.len() > Self::EXCERPT_CAP {
            let cut = extract::floor_char_boundary(&payload_excerpt, Self::EXCERPT_CAP);
            payload_excerpt.truncate(cut);
            payload_excerpt.push_str("...");
        }
        Self {
            agent_id,
            rationale,
            payload_excerpt,
        }
    }
}

/// Structured request for one delegated verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRequest {
    /// The judge's specialty viewpoint
    pub specialty: Specialty,
    /// Specialty-specific judging criteria, one line each
    pub criteria: Vec<String>,
    /// The competing proposals
    pub proposals: Vec<ProposalDigest>,
}

impl VerdictRequest {
    /// Render the request as the prompt sent to the backend. The backend
    /// is asked for a bare JSON object so `extract_json_object` can
    /// recover it even when wrapped in prose or code fences.
    pub fn render_prompt(&self) -> String {
        let mut prompt = format!(
            "You are a {} judge for a proposal competition. \
             Score the proposals below against these criteria:\n",
            self.specialty
        );
        for criterion in &self.criteria {
            prompt.push_str("- ");
            prompt.push_str(criterion);
            prompt.push('\n');
        }
        prompt.push_str("\nProposals:\n");
        for digest in &self.proposals {
            prompt.push_str(&format!(
                "* {}: {} (payload: {})\n",
                digest.agent_id, digest.rationale, digest.payload_excerpt
            ));
        }
        prompt.push_str(
            "\nRespond with a JSON object: \
             {\"winner\": \"<agent id>\", \"reasoning\": \"...\", \
             \"confidence\": \"low|medium|high\", \"concerns\": \"...\"}",
        );
        prompt
    }
}

/// The JSON object expected back from the backend. Missing `winner` or
/// `reasoning` makes the verdict unusable and triggers the caller's
/// deterministic fallback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VerdictResponse {
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default)]
    pub concerns: Option<String>,
}

impl VerdictResponse {
    /// Parse a raw backend reply: strip fences, pull the first balanced
    /// object, deserialize. Returns None when no usable verdict is there.
    pub fn from_raw(text: &str) -> Option<Self> {
        let object = extract_json_object(text)?;
        let verdict: VerdictResponse = serde_json::from_value(object).ok()?;
        if verdict.winner.is_none() || verdict.reasoning.is_none() {
            return None;
        }
        Some(verdict)
    }

    /// Parsed confidence, defaulting to medium when absent or unknown.
    pub fn confidence_level(&self) -> Confidence {
        self.confidence
            .as_deref()
            .and_then(Confidence::parse)
            .unwrap_or(Confidence::Medium)
    }
}

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// A generative backend capable of rendering verdicts.
///
/// Implementations return the model's raw text; recovery parsing is the
/// caller's job. Transport failures surface as `BackendError`.
#[async_trait]
pub trait JudgeBackend: Send + Sync {
    /// Ask the backend for a verdict on the given request.
    async fn render_verdict(&self, request: &VerdictRequest) -> Result<String, BackendError>;

    /// Identifier used in logs and error messages.
    fn provider_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> VerdictRequest {
        VerdictRequest {
            specialty: Specialty::Story,
            criteria: vec!["narrative momentum".to_string()],
            proposals: vec![ProposalDigest::new(
                "story-agent".to_string(),
                "raise the stakes".to_string(),
                &json!({"beat": "betrayal"}),
            )],
        }
    }

    #[test]
    fn test_prompt_names_specialty_and_agents() {
        let prompt = request().render_prompt();
        assert!(prompt.contains("story judge"));
        assert!(prompt.contains("story-agent"));
        assert!(prompt.contains("narrative momentum"));
        assert!(prompt.contains("\"winner\""));
    }

    #[test]
    fn test_digest_truncates_large_payloads() {
        let big = json!({"blob": "x".repeat(2000)});
        let digest = ProposalDigest::new("a".to_string(), String::new(), &big);
        assert!(digest.payload_excerpt.len() <= ProposalDigest::EXCERPT_CAP + 3);
        assert!(digest.payload_excerpt.ends_with("..."));
    }

    #[test]
    fn test_verdict_from_fenced_reply() {
        let raw = "Here is my verdict:\n```json\n{\"winner\": \"story-agent\", \
                   \"reasoning\": \"strongest beat\", \"confidence\": \"high\"}\n```";
        let verdict = VerdictResponse::from_raw(raw).unwrap();
        assert_eq!(verdict.winner.as_deref(), Some("story-agent"));
        assert_eq!(verdict.confidence_level(), Confidence::High);
    }

    #[test]
    fn test_verdict_missing_reasoning_is_rejected() {
        let raw = "{\"winner\": \"story-agent\"}";
        assert!(VerdictResponse::from_raw(raw).is_none());
    }

    #[test]
    fn test_verdict_unknown_confidence_defaults_to_medium() {
        let raw = "{\"winner\": \"a\", \"reasoning\": \"r\", \"confidence\": \"certain\"}";
        let verdict = VerdictResponse::from_raw(raw).unwrap();
        assert_eq!(verdict.confidence_level(), Confidence::Medium);
    }
}
