//! Anchor Scheduler
//!
//! Periodically sweeps the most recent epoch-aligned window, building and
//! anchoring one batch per active actor. Actors are processed one at a
//! time; a failure for one actor is recorded in the sweep report and the
//! sweep moves on.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::anchor::batch::BatchManager;
use crate::anchor::state::{sanitize_error, AnchorStateMachine};
use crate::anchor::ChainAnchorer;
use crate::config::SchedulerConfig;
use crate::database::AuditStore;
use crate::error::{AnchorError, Result};

/// Work that runs on a fixed interval.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run_once(&self);
}

/// Run `task` immediately, then on every tick of `interval`, until
/// `cancel` fires. Cancellation also abandons an in-flight run.
pub async fn run_periodic<T: PeriodicTask + ?Sized>(
    task: &T,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(task = task.name(), interval_secs = interval.as_secs(), "Periodic task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(task = task.name(), "Cancelled during run");
                break;
            }
            _ = task.run_once() => {}
        }
    }

    info!(task = task.name(), "Periodic task stopped");
}

/// What happened to one actor during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActorOutcome {
    Anchored {
        batch_id: String,
        tx_hash: Option<String>,
    },
    AlreadyAnchored {
        batch_id: String,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ActorResult {
    pub actor: String,
    #[serde(flatten)]
    pub outcome: ActorOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub results: Vec<ActorResult>,
}

impl SweepReport {
    pub fn anchored(&self) -> usize {
        self.count(|o| matches!(o, ActorOutcome::Anchored { .. }))
    }

    pub fn already_anchored(&self) -> usize {
        self.count(|o| matches!(o, ActorOutcome::AlreadyAnchored { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ActorOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ActorOutcome::Failed { .. }))
    }

    pub fn outcome_for(&self, actor: &str) -> Option<&ActorOutcome> {
        self.results
            .iter()
            .find(|r| r.actor == actor)
            .map(|r| &r.outcome)
    }

    fn count(&self, predicate: impl Fn(&ActorOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

/// `[end - window, end]` where `end` is `now` floored to a multiple of
/// `window_secs` since the Unix epoch.
pub fn window_bounds(now: DateTime<Utc>, window_secs: u64) -> (DateTime<Utc>, DateTime<Utc>) {
    let window = i64::try_from(window_secs).unwrap_or(i64::MAX).max(1);
    let end_secs = now.timestamp().div_euclid(window) * window;
    let end = Utc.timestamp_opt(end_secs, 0).single().unwrap_or(now);
    let start = end
        .checked_sub_signed(ChronoDuration::seconds(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    (start, end)
}

pub struct AnchorScheduler {
    store: Arc<dyn AuditStore>,
    batches: BatchManager,
    anchors: AnchorStateMachine,
    config: SchedulerConfig,
}

impl AnchorScheduler {
    pub fn new(
        store: Arc<dyn AuditStore>,
        chain: Option<Arc<dyn ChainAnchorer>>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            batches: BatchManager::new(store.clone()),
            anchors: AnchorStateMachine::new(store.clone(), chain),
            store,
            config,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sweep the window that ends at the latest boundary before now.
    pub async fn run_once(&self) -> Result<SweepReport> {
        self.run_once_at(Utc::now()).await
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let (window_start, window_end) = window_bounds(now, self.config.window_secs);

        let actors = self
            .store
            .get_distinct_actors_with_entries(
                window_start,
                window_end,
                i64::from(self.config.max_actors),
            )
            .await?;

        info!(
            window_start = %window_start,
            window_end = %window_end,
            actors = actors.len(),
            "Starting anchor sweep"
        );

        let mut results = Vec::with_capacity(actors.len());
        for actor in actors {
            let outcome = self.process_actor(&actor, window_start, window_end).await;
            match &outcome {
                ActorOutcome::Failed { error } => {
                    warn!(actor = %actor, error = %error, "Actor anchoring failed")
                }
                other => debug!(actor = %actor, outcome = ?other, "Actor processed"),
            }
            results.push(ActorResult { actor, outcome });
        }

        let report = SweepReport {
            window_start,
            window_end,
            results,
        };
        info!(
            anchored = report.anchored(),
            already_anchored = report.already_anchored(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Anchor sweep completed"
        );
        Ok(report)
    }

    async fn process_actor(
        &self,
        actor: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> ActorOutcome {
        let batch = match self
            .batches
            .build(actor, Some(window_start), Some(window_end))
            .await
        {
            Ok((batch, _)) => batch,
            Err(AnchorError::EmptyWindow(_)) => {
                return ActorOutcome::Skipped {
                    reason: "no entries in window".to_string(),
                }
            }
            Err(e) => {
                return ActorOutcome::Failed {
                    error: sanitize_error(&e.to_string()),
                }
            }
        };

        if batch.is_anchored() {
            return ActorOutcome::AlreadyAnchored { batch_id: batch.id };
        }

        match self.anchors.anchor(actor, &batch.id).await {
            Ok(Some(anchored)) => ActorOutcome::Anchored {
                batch_id: anchored.id,
                tx_hash: anchored.anchor_tx_hash,
            },
            Ok(None) => ActorOutcome::Failed {
                error: format!("batch {} not found after build", batch.id),
            },
            Err(e) => ActorOutcome::Failed {
                error: sanitize_error(&e.to_string()),
            },
        }
    }
}

#[async_trait]
impl PeriodicTask for AnchorScheduler {
    fn name(&self) -> &str {
        "anchor-scheduler"
    }

    async fn run_once(&self) {
        if let Err(e) = AnchorScheduler::run_once(self).await {
            error!("Anchor sweep failed: {}", e);
        }
    }
}
