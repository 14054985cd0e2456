//! Polling loop that keeps the cache on the newest available cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sky_common::CycleId;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::pipeline::{CycleOutcome, Pipeline};

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    /// Failed runs per cycle.
    attempts: HashMap<CycleId, u32>,
    last_clean: Option<Instant>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            attempts: HashMap::new(),
            last_clean: None,
        }
    }

    /// Run the newest cycle available at `now`, unless it has already
    /// failed too often. Returns `None` when the cycle was given up on.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Option<Result<CycleOutcome>> {
        let id = self.pipeline.latest_cycle(now);
        let max_attempts = self.pipeline.config().schedule.max_attempts;
        let failures = self.attempts.get(&id).copied().unwrap_or(0);
        if failures >= max_attempts {
            warn!(cycle = %id, failures, "Giving up on cycle until the next one is due");
            return None;
        }

        let result = self.pipeline.run_cycle(id, now.date_naive()).await;
        match &result {
            Ok(CycleOutcome::Published { missing_fields, .. }) => {
                info!(cycle = %id, missing_fields, "Scheduled cycle published");
                self.attempts.clear();
            }
            Ok(CycleOutcome::AlreadyPublished(_)) | Ok(CycleOutcome::Busy(_)) => {}
            Err(_) => {
                *self.attempts.entry(id).or_insert(0) += 1;
            }
        }
        // Older cycles can never become current again.
        self.attempts.retain(|cycle, _| *cycle >= id);
        Some(result)
    }

    async fn maybe_clean(&mut self, now: DateTime<Utc>) {
        let interval = self.pipeline.config().schedule.clean_interval();
        let due = self.last_clean.map_or(true, |t| t.elapsed() >= interval);
        if !due {
            return;
        }
        if let Err(e) = self.pipeline.clean(now).await {
            warn!(error = %e, "Maintenance pass failed");
        }
        self.last_clean = Some(Instant::now());
    }

    pub async fn run_forever(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let poll = self.pipeline.config().schedule.poll_interval();
        info!(poll_secs = poll.as_secs(), "Starting scheduler");

        loop {
            let now = Utc::now();
            if let Some(Err(e)) = self.tick(now).await {
                error!(error = %e, "Scheduled run failed");
            }
            self.maybe_clean(now).await;

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler");
                    break;
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }

        Ok(())
    }
}
