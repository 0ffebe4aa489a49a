//! CONCLAVE Core - Entity Types
//!
//! Pure data structures for the proposal competition engine. All other
//! crates depend on this. This crate contains ONLY data types and their
//! local invariants - no scheduling, no I/O, no business logic.

pub mod batch;
pub mod config;
pub mod decision;
pub mod error;
pub mod event;
pub mod identity;
pub mod proposal;

pub use batch::{Batch, BatchStatus, BatchSummary, CancelReason, Quorum};
pub use config::{
    BatchConfig, BusConfig, ConclaveConfig, EngineConfig, PanelConfig, TieBreak,
};
pub use decision::{Confidence, Decision, Evaluation, Specialty};
pub use error::{
    BackendError, BatchError, BusError, ConclaveError, ConclaveResult, ConfigError,
    ValidationError,
};
pub use event::{CompetitionResult, EventId, EventPayload, Topic};
pub use identity::{new_entity_id, AgentId, BatchId, DecisionId, EntityId, ProposalId, Timestamp};
pub use proposal::{Proposal, ProposalKind, ProposalMetadata, ProposalStatus};
