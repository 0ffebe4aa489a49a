//! CONCLAVE Engine - batch lifecycle and competition orchestration.
//!
//! The batch manager owns the batch table: it creates batches, enforces
//! collection deadlines, validates and stores incoming proposals, and
//! retires decided or cancelled batches into bounded history. The
//! orchestrator is the top-level façade that wires the event bus, the
//! manager, and the judging panel into a complete competition.

pub mod manager;
pub mod orchestrator;
pub mod validation;

pub use manager::{AddOutcome, BatchManager, BatchSignal};
pub use orchestrator::{CompetitionPhase, CompetitionStatus, Orchestrator};
pub use validation::validate_proposal;
