//! Batch manager: owns the batch table, enforces collection deadlines,
//! and retires finished batches into bounded history.

use crate::validation::validate_proposal;
use conclave_core::{
    Batch, BatchConfig, BatchError, BatchId, BatchStatus, BatchSummary, CancelReason,
    ConclaveResult, Decision, Proposal, ProposalKind, Quorum,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// Signal emitted when a batch leaves `Collecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSignal {
    /// Quorum met, or deadline forced the advance: ready for judging.
    Ready(BatchId),
    /// Deadline elapsed with zero proposals.
    Cancelled(BatchId),
}

/// Outcome of accepting one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// True when this submission replaced an earlier one from the same agent
    pub replaced_previous: bool,
    /// True when this submission completed the quorum
    pub quorum_met: bool,
    /// Live proposals after this submission
    pub proposal_count: usize,
}

/// Creates batches, collects proposals, enforces deadlines, attaches
/// decisions, and keeps bounded retained history. Cheap to clone; clones
/// share state.
pub struct BatchManager {
    inner: Arc<ManagerInner>,
}

impl Clone for BatchManager {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ManagerInner {
    // Mutated only synchronously; never held across an await
    batches: Mutex<HashMap<BatchId, Batch>>,
    history: Mutex<VecDeque<Batch>>,
    config: BatchConfig,
    signal_tx: mpsc::UnboundedSender<BatchSignal>,
    shutdown_tx: watch::Sender<bool>,
}

impl BatchManager {
    /// Create a manager plus the receiver its lifecycle signals arrive on.
    pub fn new(config: BatchConfig) -> (Self, mpsc::UnboundedReceiver<BatchSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let manager = Self {
            inner: Arc::new(ManagerInner {
                batches: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                config,
                signal_tx,
                shutdown_tx,
            }),
        };
        (manager, signal_rx)
    }

    /// Create a batch and start its collection-deadline timer.
    ///
    /// Must be called from within a tokio runtime: the deadline timer is a
    /// spawned task.
    pub fn create_batch(
        &self,
        request_id: impl Into<String>,
        kind: ProposalKind,
        context: serde_json::Value,
        quorum: Option<Quorum>,
    ) -> BatchId {
        let quorum =
            quorum.unwrap_or(Quorum::MinCount(self.inner.config.default_quorum_min));
        let batch = Batch::new(request_id, kind, context, quorum);
        let batch_id = batch.id;
        self.inner
            .batches
            .lock()
            .expect("batch table poisoned")
            .insert(batch_id, batch);

        tracing::info!(
            batch_id = %batch_id,
            kind = %kind,
            deadline_ms = self.inner.config.collection_deadline.as_millis() as u64,
            "batch created, collecting"
        );

        let manager = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let deadline = self.inner.config.collection_deadline;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    manager.deadline_elapsed(batch_id);
                }
                _ = shutdown.changed() => {
                    tracing::debug!(batch_id = %batch_id, "deadline timer stopped by shutdown");
                }
            }
        });

        batch_id
    }

    /// Validate and store a proposal, overwriting any earlier submission
    /// from the same agent, then re-evaluate quorum.
    pub fn add_proposal(
        &self,
        batch_id: BatchId,
        proposal: Proposal,
    ) -> ConclaveResult<AddOutcome> {
        let mut batches = self.inner.batches.lock().expect("batch table poisoned");
        let batch = batches
            .get_mut(&batch_id)
            .ok_or(BatchError::UnknownBatch { batch_id })?;

        if batch.status != BatchStatus::Collecting {
            return Err(BatchError::NotCollecting {
                batch_id,
                status: batch.status,
            }
            .into());
        }

        validate_proposal(batch.kind, &proposal)?;

        let agent_id = proposal.agent_id.clone();
        let replaced = batch.insert_proposal(proposal).is_some();
        let quorum_met = batch.quorum_met();
        let proposal_count = batch.proposals.len();

        tracing::debug!(
            batch_id = %batch_id,
            agent_id = %agent_id,
            replaced,
            proposal_count,
            "proposal accepted"
        );

        if quorum_met {
            // Transition is valid: we hold the lock and status is Collecting
            let _ = batch.mark_ready(false);
            drop(batches);
            tracing::info!(batch_id = %batch_id, "quorum met, ready for judging");
            let _ = self.inner.signal_tx.send(BatchSignal::Ready(batch_id));
        }

        Ok(AddOutcome {
            replaced_previous: replaced,
            quorum_met,
            proposal_count,
        })
    }

    /// Transition a ready batch to `Judging` and hand back its summary.
    pub fn begin_judging(&self, batch_id: BatchId) -> ConclaveResult<BatchSummary> {
        let mut batches = self.inner.batches.lock().expect("batch table poisoned");
        let batch = batches
            .get_mut(&batch_id)
            .ok_or(BatchError::UnknownBatch { batch_id })?;
        batch.mark_judging()?;
        Ok(batch.summary())
    }

    /// Attach a decision and retire the batch into history.
    ///
    /// Rejected unless the batch is `Judging` or `ReadyForJudging`. On
    /// success the winning proposal is `Selected`, all others `Rejected`,
    /// and the decided batch (returned as a snapshot) moves to history.
    pub fn set_decision(&self, batch_id: BatchId, decision: Decision) -> ConclaveResult<Batch> {
        let mut batches = self.inner.batches.lock().expect("batch table poisoned");
        let batch = batches
            .get_mut(&batch_id)
            .ok_or(BatchError::UnknownBatch { batch_id })?;
        batch.attach_decision(decision)?;
        let decided = batches
            .remove(&batch_id)
            .ok_or(BatchError::UnknownBatch { batch_id })?;
        drop(batches);

        tracing::info!(
            batch_id = %batch_id,
            winner = %decided
                .decision
                .as_ref()
                .map(|decision| decision.winning_agent_id.as_str())
                .unwrap_or(""),
            "batch decided"
        );

        self.retire(decided.clone());
        Ok(decided)
    }

    /// Deadline handling: cancel empty batches, force-advance partial ones.
    fn deadline_elapsed(&self, batch_id: BatchId) {
        let mut batches = self.inner.batches.lock().expect("batch table poisoned");
        let Some(batch) = batches.get_mut(&batch_id) else {
            return;
        };
        if batch.status != BatchStatus::Collecting {
            // Quorum already advanced it, or it was decided early
            return;
        }

        if batch.proposals.is_empty() {
            let _ = batch.cancel(CancelReason::NoProposals);
            let cancelled = batches.remove(&batch_id);
            drop(batches);
            tracing::info!(batch_id = %batch_id, reason = "no-proposals", "batch cancelled at deadline");
            if let Some(cancelled) = cancelled {
                self.retire(cancelled);
            }
            let _ = self.inner.signal_tx.send(BatchSignal::Cancelled(batch_id));
        } else {
            let count = batch.proposals.len();
            let _ = batch.mark_ready(true);
            drop(batches);
            tracing::warn!(
                batch_id = %batch_id,
                proposal_count = count,
                "deadline elapsed before quorum, forcing advance to judging"
            );
            let _ = self.inner.signal_tx.send(BatchSignal::Ready(batch_id));
        }
    }

    fn retire(&self, batch: Batch) {
        let mut history = self.inner.history.lock().expect("history poisoned");
        history.push_back(batch);
        while history.len() > self.inner.config.history_cap {
            history.pop_front();
        }
    }

    /// Snapshot of a batch, live or retained.
    pub fn batch_snapshot(&self, batch_id: BatchId) -> Option<Batch> {
        if let Some(batch) = self
            .inner
            .batches
            .lock()
            .expect("batch table poisoned")
            .get(&batch_id)
        {
            return Some(batch.clone());
        }
        self.inner
            .history
            .lock()
            .expect("history poisoned")
            .iter()
            .find(|batch| batch.id == batch_id)
            .cloned()
    }

    /// Number of live (not yet retired) batches.
    pub fn active_count(&self) -> usize {
        self.inner.batches.lock().expect("batch table poisoned").len()
    }

    /// Number of retained decided/cancelled batches.
    pub fn history_len(&self) -> usize {
        self.inner.history.lock().expect("history poisoned").len()
    }

    /// Watch channel observers can use to stop alongside the manager.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Stop all deadline timers.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }
}
