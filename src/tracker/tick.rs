//! The tracking loop.
//!
//! # Responsibilities
//! - Advance every open transaction by asking the gateway what happened
//! - Collect resubmission candidates and hand them to the Resubmitter
//! - Count network errors per tick for partition detection
//! - Periodically rebuild the cache from the store
//!
//! # Per-state checks
//! ```text
//! created     in flight → skip; age ≥ ceiling → failed; retry due → resume
//! submitted   in mempool → pending
//!             receipt → pending, then as below
//!             neither: age ≥ ceiling → expired; backoff elapsed → rebroadcast
//! pending     receipt fault → failed; confirmations ≥ required → confirmed;
//! confirming  confirmations > 0 → confirming; nothing and pending too long → expired
//! ```

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::TrackerConfig;
use crate::gateway::{ChainGateway, GatewayResult, Receipt};
use crate::nodes::PartitionDetector;
use crate::observability::metrics;
use crate::pipeline::SubmissionPipeline;
use crate::resilience::with_timeout;
use crate::resubmit::{CandidateKind, ResubmitCandidate, ResubmitReport, Resubmitter};
use crate::store::TransactionStore;
use crate::txn::{ManagerError, ManagerResult, StateRecorder, Transaction, TxStatus};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Open records examined.
    pub examined: usize,
    pub transitions: usize,
    /// Records whose gateway queries failed this tick.
    pub network_errors: usize,
    pub candidates: usize,
    pub resubmit: ResubmitReport,
    /// Whether this tick triggered a connection reset.
    pub reset: bool,
}

#[derive(Default)]
struct Step {
    transitions: usize,
    network_error: bool,
    candidate: Option<ResubmitCandidate>,
}

pub struct Tracker {
    store: Arc<dyn TransactionStore>,
    recorder: Arc<StateRecorder>,
    gateway: Arc<dyn ChainGateway>,
    pipeline: Arc<SubmissionPipeline>,
    resubmitter: Resubmitter,
    detector: Arc<PartitionDetector>,
    config: TrackerConfig,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        recorder: Arc<StateRecorder>,
        gateway: Arc<dyn ChainGateway>,
        pipeline: Arc<SubmissionPipeline>,
        resubmitter: Resubmitter,
        detector: Arc<PartitionDetector>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            recorder,
            gateway,
            pipeline,
            resubmitter,
            detector,
            config,
        }
    }

    pub fn resubmitter(&self) -> &Resubmitter {
        &self.resubmitter
    }

    /// Run until shutdown: one tick per interval, a full reload per reload
    /// interval. The first reload happens immediately, which is what picks
    /// up in-flight work after a restart.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.config.interval_secs,
            reload_interval_secs = self.config.reload_interval_secs,
            required_confirmations = self.config.required_confirmations,
            "Tracker starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut reloader = time::interval(self.config.reload_interval());
        reloader.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Tracker received shutdown signal, exiting loop");
                    break;
                }
                _ = reloader.tick() => {
                    if let Err(e) = self.reload().await {
                        tracing::error!(error = %e, "Cache reload failed, keeping current cache");
                    }
                }
                _ = ticker.tick() => {
                    let report = self.tick_at(Utc::now()).await;
                    if report.transitions > 0 || report.network_errors > 0 || report.candidates > 0 {
                        tracing::info!(
                            examined = report.examined,
                            transitions = report.transitions,
                            network_errors = report.network_errors,
                            rebroadcast = report.resubmit.rebroadcast,
                            resumed = report.resubmit.resumed,
                            resubmit_errors = report.resubmit.errors,
                            reset = report.reset,
                            "Tracker tick"
                        );
                    }
                }
            }
        }
    }

    /// Rebuild the cache from every non-terminal record in the store.
    pub async fn reload(&self) -> ManagerResult<usize> {
        let open = self.store.list_open().await?;
        let count = open.len();
        self.recorder.cache().replace_all(open);
        metrics::set_open_transactions(self.recorder.cache().len());
        tracing::debug!(open = count, "Tracker cache reloaded from store");
        Ok(count)
    }

    /// One pass over every cached open record at time `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let open = self.recorder.cache().open_snapshot();
        let examined = open.len();

        let steps: Vec<Step> = stream::iter(open)
            .map(|tx| self.advance(tx, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = TickReport {
            examined,
            ..Default::default()
        };
        let mut candidates = Vec::new();
        for step in steps {
            report.transitions += step.transitions;
            if step.network_error {
                report.network_errors += 1;
            }
            if let Some(candidate) = step.candidate {
                candidates.push(candidate);
            }
        }
        report.candidates = candidates.len();

        report.reset = self
            .detector
            .observe(report.network_errors, examined, now)
            .await;

        if !candidates.is_empty() {
            report.resubmit = self.resubmitter.process_at(candidates, now).await;
        }

        metrics::set_open_transactions(self.recorder.cache().len());
        report
    }

    async fn advance(&self, tx: Transaction, now: DateTime<Utc>) -> Step {
        let id = tx.id.clone();
        let result = match tx.status {
            TxStatus::Created => self.advance_created(tx, now).await,
            TxStatus::Submitted => self.advance_submitted(tx, now).await,
            TxStatus::Pending | TxStatus::Confirming => self.advance_included(tx, now).await,
            _ => Ok(Step::default()),
        };

        match result {
            Ok(step) => step,
            Err(ManagerError::Conflict { current, .. }) => {
                tracing::debug!(tx_id = %id, store_status = %current, "Record moved during tick");
                Step::default()
            }
            Err(e) => {
                tracing::error!(tx_id = %id, error = %e, "Failed to advance transaction");
                Step::default()
            }
        }
    }

    async fn advance_created(&self, tx: Transaction, now: DateTime<Utc>) -> ManagerResult<Step> {
        if self.pipeline.is_in_flight(&tx.id) {
            return Ok(Step::default());
        }

        if tx.age(now) >= self.config.max_pending_age() {
            let message = "not broadcast before age ceiling".to_string();
            let detail = serde_json::json!({ "error": message, "age_secs": tx.age(now).as_secs() });
            self.recorder
                .transition(&tx, TxStatus::Failed, detail, now, |next| {
                    next.error = Some(message);
                })
                .await?;
            self.pipeline.forget(&tx.id);
            return Ok(Step {
                transitions: 1,
                ..Default::default()
            });
        }

        if self.resubmitter.is_due(&tx, now) {
            return Ok(Step {
                candidate: Some(ResubmitCandidate {
                    tx,
                    kind: CandidateKind::Resume,
                }),
                ..Default::default()
            });
        }
        Ok(Step::default())
    }

    async fn advance_submitted(&self, tx: Transaction, now: DateTime<Utc>) -> ManagerResult<Step> {
        let Some(hash) = tx.hash.clone() else {
            return self.expire_if_aged(tx, now, false).await;
        };

        match self.query(self.gateway.is_in_mempool(&hash)).await {
            Ok(true) => {
                let detail = serde_json::json!({ "source": "mempool" });
                self.recorder
                    .transition(&tx, TxStatus::Pending, detail, now, |_| {})
                    .await?;
                return Ok(Step {
                    transitions: 1,
                    ..Default::default()
                });
            }
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(tx_id = %tx.id, error = %e, "Mempool query failed");
                return self.expire_if_aged(tx, now, true).await;
            }
        }

        // Not in the mempool: already included, dropped, or never arrived.
        match self.query(self.gateway.get_receipt(&hash)).await {
            Ok(Some(receipt)) => {
                let detail = serde_json::json!({
                    "source": "receipt",
                    "block_height": receipt.block_height,
                });
                let pending = self
                    .recorder
                    .transition(&tx, TxStatus::Pending, detail, now, |_| {})
                    .await?;
                let mut step = self.apply_receipt(pending, receipt, now).await?;
                step.transitions += 1;
                Ok(step)
            }
            Ok(None) => {
                if tx.age(now) >= self.config.max_pending_age() {
                    return self.expire(tx, now, false).await;
                }
                if self.resubmitter.is_due(&tx, now) {
                    return Ok(Step {
                        candidate: Some(ResubmitCandidate {
                            tx,
                            kind: CandidateKind::Rebroadcast,
                        }),
                        ..Default::default()
                    });
                }
                Ok(Step::default())
            }
            Err(e) => {
                tracing::debug!(tx_id = %tx.id, error = %e, "Receipt query failed");
                self.expire_if_aged(tx, now, true).await
            }
        }
    }

    async fn advance_included(&self, tx: Transaction, now: DateTime<Utc>) -> ManagerResult<Step> {
        let Some(hash) = tx.hash.clone() else {
            return self.expire_if_aged(tx, now, false).await;
        };

        match self.query(self.gateway.get_receipt(&hash)).await {
            Ok(Some(receipt)) => self.apply_receipt(tx, receipt, now).await,
            Ok(None) => self.expire_if_aged(tx, now, false).await,
            Err(e) => {
                tracing::debug!(tx_id = %tx.id, error = %e, "Receipt query failed");
                self.expire_if_aged(tx, now, true).await
            }
        }
    }

    /// Move a `pending`/`confirming` record according to its receipt.
    async fn apply_receipt(&self, tx: Transaction, receipt: Receipt, now: DateTime<Utc>) -> ManagerResult<Step> {
        let required = self.config.required_confirmations;

        let (to, event) = if let Some(fault) = &receipt.fault {
            (TxStatus::Failed, serde_json::json!({ "fault": fault }))
        } else if receipt.confirmations >= required {
            (TxStatus::Confirmed, serde_json::json!({ "confirmations": receipt.confirmations }))
        } else if receipt.confirmations > 0 && tx.status == TxStatus::Pending {
            (TxStatus::Confirming, serde_json::json!({ "confirmations": receipt.confirmations }))
        } else {
            return Ok(Step::default());
        };

        let mut detail = event;
        detail["block_height"] = receipt.block_height.into();
        detail["gas_consumed"] = receipt.gas_consumed.into();

        let updated = self
            .recorder
            .transition(&tx, to, detail, now, |next| {
                next.block_height = Some(receipt.block_height);
                next.block_time = receipt.block_time;
                next.gas_consumed = Some(receipt.gas_consumed);
                next.result = Some(receipt.result.clone());
                if let Some(fault) = &receipt.fault {
                    next.error = Some(fault.clone());
                }
            })
            .await?;

        match to {
            TxStatus::Confirmed => tracing::info!(
                tx_id = %updated.id,
                block_height = receipt.block_height,
                gas_consumed = receipt.gas_consumed,
                "Transaction confirmed"
            ),
            TxStatus::Failed => tracing::warn!(
                tx_id = %updated.id,
                fault = ?receipt.fault,
                "Transaction faulted on chain"
            ),
            _ => tracing::debug!(
                tx_id = %updated.id,
                confirmations = receipt.confirmations,
                required,
                "Transaction confirming"
            ),
        }

        Ok(Step {
            transitions: 1,
            ..Default::default()
        })
    }

    /// Expire `submitted`/`pending` records at or past the age ceiling.
    async fn expire_if_aged(&self, tx: Transaction, now: DateTime<Utc>, network_error: bool) -> ManagerResult<Step> {
        let expirable = matches!(tx.status, TxStatus::Submitted | TxStatus::Pending);
        if expirable && tx.age(now) >= self.config.max_pending_age() {
            return self.expire(tx, now, network_error).await;
        }
        Ok(Step {
            network_error,
            ..Default::default()
        })
    }

    async fn expire(&self, tx: Transaction, now: DateTime<Utc>, network_error: bool) -> ManagerResult<Step> {
        let age = tx.age(now);
        let detail = serde_json::json!({
            "age_secs": age.as_secs(),
            "max_pending_age_secs": self.config.max_pending_age_secs,
            "resubmit_count": tx.resubmit_count,
        });
        let expired = self
            .recorder
            .transition(&tx, TxStatus::Expired, detail, now, |next| {
                next.error = Some(format!("unresolved after {}s", age.as_secs()));
            })
            .await?;
        tracing::warn!(
            tx_id = %expired.id,
            age_secs = age.as_secs(),
            resubmit_count = expired.resubmit_count,
            "Transaction expired"
        );
        Ok(Step {
            transitions: 1,
            network_error,
            candidate: None,
        })
    }

    async fn query<T, F>(&self, fut: F) -> GatewayResult<T>
    where
        F: std::future::Future<Output = GatewayResult<T>>,
    {
        with_timeout(self.config.query_timeout(), fut).await
    }
}
