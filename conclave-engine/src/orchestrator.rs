//! Competition orchestrator: the top-level façade.
//!
//! Wires the event bus, the batch manager, and the judging panel into a
//! complete competition: `start` opens a batch and announces it, proposals
//! arrive over the bus, and batch lifecycle signals drive judging and the
//! terminal events. Exactly one `proposal:decision_made` precedes exactly
//! one `competition:completed` per decided batch.

use crate::manager::{BatchManager, BatchSignal};
use conclave_core::{
    BatchId, BatchStatus, BatchSummary, CompetitionResult, ConclaveConfig, Confidence, Decision,
    EngineConfig, EventPayload, Proposal, ProposalKind, Quorum, Topic,
};
use conclave_events::{EventBus, HandlerError, Propagation, SubscribeOptions};
use conclave_judges::{Judge, Panel, PanelVerdict};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ============================================================================
// COMPETITION STATUS
// ============================================================================

/// Coarse phase of a competition, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompetitionPhase {
    Collecting,
    Judging,
    Decided,
    Cancelled,
}

/// Caller-facing snapshot of one competition.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitionStatus {
    pub phase: CompetitionPhase,
    pub proposal_count: usize,
    pub decision: Option<Decision>,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Runs competitions end to end. Cheap to clone; clones share state.
pub struct Orchestrator {
    shared: Arc<EngineShared>,
}

impl Clone for Orchestrator {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct EngineShared {
    bus: EventBus<EventPayload>,
    manager: BatchManager,
    panel: Arc<Panel>,
    config: EngineConfig,
    statuses: Arc<Mutex<HashMap<BatchId, CompetitionStatus>>>,
    rng: Mutex<StdRng>,
}

impl Orchestrator {
    /// Build an orchestrator, wire its proposal intake to the bus, and
    /// spawn the lifecycle-signal loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ConclaveConfig, judges: Vec<Arc<Judge>>) -> Self {
        let bus = EventBus::new(config.bus.clone());
        let (manager, signal_rx) = BatchManager::new(config.batch.clone());
        let panel = Arc::new(Panel::new(judges, config.panel.clone()));

        let shared = Arc::new(EngineShared {
            bus,
            manager,
            panel,
            config: config.engine,
            statuses: Arc::new(Mutex::new(HashMap::new())),
            rng: Mutex::new(StdRng::from_os_rng()),
        });

        let orchestrator = Self { shared };
        orchestrator.wire_proposal_intake();
        orchestrator.spawn_signal_loop(signal_rx);
        orchestrator
    }

    /// Open a competition: create a collecting batch and announce it on
    /// `competition:start`. Returns once all start-handlers have run.
    pub async fn start(
        &self,
        kind: ProposalKind,
        context: serde_json::Value,
        quorum: Option<Quorum>,
    ) -> BatchId {
        let request_id = format!("competition-{}", conclave_core::new_entity_id());
        let batch_id = self
            .shared
            .manager
            .create_batch(request_id, kind, context, quorum);
        self.shared
            .statuses
            .lock()
            .expect("status table poisoned")
            .insert(
                batch_id,
                CompetitionStatus {
                    phase: CompetitionPhase::Collecting,
                    proposal_count: 0,
                    decision: None,
                },
            );

        tracing::info!(batch_id = %batch_id, kind = %kind, "competition started");
        self.shared
            .bus
            .publish_awaitable(
                Topic::CompetitionStart,
                EventPayload::CompetitionStart {
                    batch_id,
                    kind,
                    timestamp: Utc::now(),
                },
            )
            .await;
        batch_id
    }

    /// Submit a proposal directly, bypassing the bus. Agents normally
    /// publish on `agent:proposal` instead; this is the same path minus
    /// the dispatch.
    pub fn submit_proposal(
        &self,
        batch_id: BatchId,
        proposal: Proposal,
    ) -> conclave_core::ConclaveResult<crate::manager::AddOutcome> {
        let outcome = self.shared.manager.add_proposal(batch_id, proposal)?;
        record_proposal_count(&self.shared.statuses, batch_id, outcome.proposal_count);
        Ok(outcome)
    }

    /// Status of a competition, live or retained.
    pub fn status(&self, batch_id: BatchId) -> Option<CompetitionStatus> {
        if let Some(status) = self
            .shared
            .statuses
            .lock()
            .expect("status table poisoned")
            .get(&batch_id)
        {
            return Some(status.clone());
        }
        // Finished competitions are reconstructed from retained batches
        let batch = self.shared.manager.batch_snapshot(batch_id)?;
        let phase = match batch.status {
            BatchStatus::Collecting => CompetitionPhase::Collecting,
            BatchStatus::ReadyForJudging | BatchStatus::Judging => CompetitionPhase::Judging,
            BatchStatus::Decided => CompetitionPhase::Decided,
            BatchStatus::Cancelled => CompetitionPhase::Cancelled,
        };
        Some(CompetitionStatus {
            phase,
            proposal_count: batch.proposals.len(),
            decision: batch.decision,
        })
    }

    /// Full snapshot of a batch, live or retained.
    pub fn batch_snapshot(&self, batch_id: BatchId) -> Option<conclave_core::Batch> {
        self.shared.manager.batch_snapshot(batch_id)
    }

    /// Batch ids of competitions that have not yet finished.
    pub fn active_competitions(&self) -> Vec<BatchId> {
        self.shared
            .statuses
            .lock()
            .expect("status table poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// The bus competitions run over. Agents subscribe to
    /// `competition:start` and publish on `agent:proposal`; observers
    /// subscribe to `proposal:decision_made` and `competition:completed`.
    pub fn bus(&self) -> EventBus<EventPayload> {
        self.shared.bus.clone()
    }

    /// Stop deadline timers and the signal loop. In-flight judging runs
    /// to completion.
    pub fn shutdown(&self) {
        self.shared.manager.shutdown();
    }

    fn wire_proposal_intake(&self) {
        let manager = self.shared.manager.clone();
        let statuses = Arc::clone(&self.shared.statuses);
        self.shared.bus.subscribe(
            Topic::AgentProposal,
            SubscribeOptions {
                // Intake runs before same-topic observers
                priority: 10,
                // Validation failures are deterministic; retrying is useless
                retries: Some(0),
                ..SubscribeOptions::default()
            },
            move |event| {
                let manager = manager.clone();
                let statuses = Arc::clone(&statuses);
                Box::pin(async move {
                    let EventPayload::AgentProposal { batch_id, proposal } = event.payload
                    else {
                        return Err(HandlerError::new("unexpected payload on agent:proposal"));
                    };
                    match manager.add_proposal(batch_id, proposal) {
                        Ok(outcome) => {
                            record_proposal_count(&statuses, batch_id, outcome.proposal_count);
                            Ok(Propagation::Continue)
                        }
                        Err(error) => Err(HandlerError::new(error.to_string())),
                    }
                })
            },
        );
    }

    fn spawn_signal_loop(&self, mut signal_rx: mpsc::UnboundedReceiver<BatchSignal>) {
        let orchestrator = self.clone();
        let mut shutdown = self.shared.manager.shutdown_signal();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    signal = signal_rx.recv() => match signal {
                        Some(BatchSignal::Ready(batch_id)) => {
                            orchestrator.run_judging(batch_id).await;
                        }
                        Some(BatchSignal::Cancelled(batch_id)) => {
                            orchestrator.finalize_cancelled(batch_id).await;
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        tracing::debug!("signal loop stopped by shutdown");
                        break;
                    }
                }
            }
        });
    }

    /// Drive one ready batch through judging to its terminal events.
    async fn run_judging(&self, batch_id: BatchId) {
        let summary = match self.shared.manager.begin_judging(batch_id) {
            Ok(summary) => summary,
            Err(error) => {
                tracing::error!(batch_id = %batch_id, error = %error, "cannot begin judging");
                return;
            }
        };
        {
            let mut statuses = self.shared.statuses.lock().expect("status table poisoned");
            if let Some(status) = statuses.get_mut(&batch_id) {
                status.phase = CompetitionPhase::Judging;
                status.proposal_count = summary.proposals.len();
            }
        }

        tracing::debug!(
            batch_id = %batch_id,
            judges = self.shared.panel.judge_count(),
            proposals = summary.proposals.len(),
            "dispatching batch to judging"
        );
        // Observer notification only; judging does not wait on it
        self.shared.bus.publish(
            Topic::EvaluateBatch,
            EventPayload::EvaluateBatch {
                batch_id,
                summary: summary.clone(),
            },
        );

        let started = tokio::time::Instant::now();
        let verdict = if self.shared.config.simplified_mode {
            PanelVerdict {
                decision: self.simplified_verdict(&summary),
                evaluations: Vec::new(),
            }
        } else {
            self.shared.panel.evaluate_batch(&summary).await
        };
        let evaluation_time_ms = started.elapsed().as_millis() as u64;

        let decision = verdict.decision.clone();
        if let Err(error) = self.shared.manager.set_decision(batch_id, decision.clone()) {
            tracing::error!(batch_id = %batch_id, error = %error, "failed to attach decision");
            return;
        }
        self.shared
            .statuses
            .lock()
            .expect("status table poisoned")
            .remove(&batch_id);

        let winner = decision.winning_agent_id.clone();
        let authoritative = decision.authoritative;
        self.shared
            .bus
            .publish_awaitable(
                Topic::DecisionMade,
                EventPayload::DecisionMade {
                    batch_id,
                    decision,
                    evaluations: verdict.evaluations,
                    evaluation_time_ms,
                },
            )
            .await;
        self.shared
            .bus
            .publish_awaitable(
                Topic::CompetitionCompleted,
                EventPayload::CompetitionCompleted {
                    batch_id,
                    result: CompetitionResult {
                        winning_agent_id: Some(winner),
                        cancelled: false,
                        authoritative,
                    },
                    timestamp: Utc::now(),
                },
            )
            .await;
    }

    /// Terminal event for a batch cancelled with zero proposals.
    async fn finalize_cancelled(&self, batch_id: BatchId) {
        self.shared
            .statuses
            .lock()
            .expect("status table poisoned")
            .remove(&batch_id);
        self.shared
            .bus
            .publish_awaitable(
                Topic::CompetitionCompleted,
                EventPayload::CompetitionCompleted {
                    batch_id,
                    result: CompetitionResult {
                        winning_agent_id: None,
                        cancelled: true,
                        authoritative: false,
                    },
                    timestamp: Utc::now(),
                },
            )
            .await;
    }

    /// Simplified selection: skip the panel, draw a random share per
    /// proposal, and name the largest. Flagged non-authoritative.
    fn simplified_verdict(&self, summary: &BatchSummary) -> Decision {
        let mut rng = self.shared.rng.lock().expect("rng poisoned");
        let draws: Vec<f64> = summary
            .proposals
            .iter()
            .map(|_| rng.random_range(0.0..1.0))
            .collect();
        drop(rng);

        let winner_index = draws
            .iter()
            .enumerate()
            .fold(0, |best, (index, draw)| {
                if *draw > draws[best] {
                    index
                } else {
                    best
                }
            });
        let shares = summary
            .proposals
            .iter()
            .zip(normalized_shares(&draws))
            .map(|(proposal, share)| format!("{}={:.2}", proposal.agent_id, share))
            .collect::<Vec<_>>()
            .join(", ");

        tracing::warn!(
            batch_id = %summary.batch_id,
            winner = %summary.proposals[winner_index].agent_id,
            "simplified selection, decision is non-authoritative"
        );
        Decision::new(
            summary.batch_id,
            summary.proposals[winner_index].agent_id.clone(),
            format!("simplified random selection; synthesized vote shares: {shares}"),
            Confidence::Low,
            "simplified selection (non-authoritative)",
        )
        .non_authoritative()
    }
}

/// Normalize raw draws into vote shares summing to 1. An all-zero draw
/// vector degrades to uniform shares instead of dividing by zero.
fn normalized_shares(draws: &[f64]) -> Vec<f64> {
    let total: f64 = draws.iter().sum();
    if total == 0.0 {
        return vec![1.0 / draws.len() as f64; draws.len()];
    }
    draws.iter().map(|draw| draw / total).collect()
}

fn record_proposal_count(
    statuses: &Arc<Mutex<HashMap<BatchId, CompetitionStatus>>>,
    batch_id: BatchId,
    proposal_count: usize,
) {
    let mut statuses = statuses.lock().expect("status table poisoned");
    if let Some(status) = statuses.get_mut(&batch_id) {
        status.proposal_count = proposal_count;
    }
}
