//! Live aggregator: the single consumer of result events. Folds every
//! record into the running statistics, republishes it on the event
//! stream, publishes a progress snapshot on a fixed cadence, and
//! returns the terminal summary once every sender is gone.

use crate::engine::stats::RunningStats;
use crate::events::EngineEvent;
use crate::types::{ProgressSnapshot, ResultRecord, Summary};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

pub const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(500);

pub struct Aggregator {
    stats: RunningStats,
    result_rx: mpsc::Receiver<ResultRecord>,
    snapshot_tx: watch::Sender<ProgressSnapshot>,
    events: broadcast::Sender<EngineEvent>,
    active_vus: Arc<AtomicU32>,
    plan_id: String,
    plan_name: String,
    started_at: DateTime<Utc>,
}

impl Aggregator {
    pub fn new(
        result_rx: mpsc::Receiver<ResultRecord>,
        snapshot_tx: watch::Sender<ProgressSnapshot>,
        events: broadcast::Sender<EngineEvent>,
        active_vus: Arc<AtomicU32>,
        plan_id: String,
        plan_name: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stats: RunningStats::new(),
            result_rx,
            snapshot_tx,
            events,
            active_vus,
            plan_id,
            plan_name,
            started_at,
        }
    }

    pub async fn run(mut self) -> Summary {
        let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                result = self.result_rx.recv() => {
                    match result {
                        Some(record) => {
                            self.stats.record(&record);
                            let _ = self.events.send(EngineEvent::Result(Box::new(record)));
                        }
                        // All pipelines done; the run is over.
                        None => break,
                    }
                }

                _ = ticker.tick() => self.publish_snapshot(),
            }
        }

        self.publish_snapshot();
        self.stats
            .summary(&self.plan_id, &self.plan_name, self.started_at, Utc::now())
    }

    fn publish_snapshot(&self) {
        let snapshot = self
            .stats
            .snapshot(self.active_vus.load(Ordering::Relaxed));
        let _ = self.events.send(EngineEvent::Progress(snapshot.clone()));
        let _ = self.snapshot_tx.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(elapsed_ms: u64, ok: bool) -> ResultRecord {
        ResultRecord {
            request_id: "r".into(),
            request_name: "r".into(),
            group_name: "g".into(),
            timestamp: Utc::now(),
            method: "GET".into(),
            url: "http://x/".into(),
            status: if ok { 200 } else { 0 },
            elapsed_ms,
            response_size: 4,
            headers: HashMap::new(),
            body: String::new(),
            assertions: Vec::new(),
            assertions_passed: ok,
            extractions: Vec::new(),
            error: if ok { None } else { Some("timeout".into()) },
        }
    }

    #[tokio::test]
    async fn folds_all_events_and_returns_summary() {
        let (result_tx, result_rx) = mpsc::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(ProgressSnapshot::default());
        let (event_tx, mut event_rx) = broadcast::channel(1024);
        let active = Arc::new(AtomicU32::new(0));

        let aggregator = Aggregator::new(
            result_rx,
            snapshot_tx,
            event_tx,
            active,
            "p1".into(),
            "plan".into(),
            Utc::now(),
        );
        let handle = tokio::spawn(aggregator.run());

        for i in 0..10 {
            result_tx.send(record(5 + i, i % 2 == 0)).await.unwrap();
        }
        drop(result_tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary.total_requests, 10);
        assert_eq!(summary.successful_requests, 5);
        assert_eq!(summary.failed_requests, 5);
        assert_eq!(summary.total_bytes, 40);
        assert_eq!(summary.plan_id, "p1");

        // Every record was republished as a test-result event.
        let mut result_events = 0;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, EngineEvent::Result(_)) {
                result_events += 1;
            }
        }
        assert_eq!(result_events, 10);

        // The final snapshot reflects the full run.
        assert_eq!(snapshot_rx.borrow().completed_requests, 10);
    }
}
