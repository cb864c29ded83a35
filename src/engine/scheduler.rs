//! Thread-group scheduler: spawns the group's VUs with ramp-up
//! staggering and supervises their shutdown.
//!
//! On `stop` the VUs wind down cooperatively and get a bounded grace
//! window for the in-flight request; past it the kill token drops
//! whatever is still running. Ramp-up is additive to loop duration:
//! the duration clock starts when the first VU does.

use crate::engine::vu::{GroupContext, VirtualUser};
use crate::error::EngineError;
use crate::plan::LoopPolicy;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// In-flight requests get this long to finish after a cooperative stop.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct GroupScheduler {
    ctx: Arc<GroupContext>,
}

impl GroupScheduler {
    pub fn new(ctx: Arc<GroupContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(self) -> Result<(), EngineError> {
        let group = &self.ctx.group;
        let num_threads = group.num_threads;
        let start = Instant::now();
        let deadline = match group.loop_count {
            LoopPolicy::Duration { seconds } => Some(start + Duration::from_secs(seconds)),
            _ => None,
        };

        // VU i starts at i * (ramp_up / num_threads).
        let stagger = if group.ramp_up_seconds == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(group.ramp_up_seconds as f64 / num_threads as f64)
        };

        tracing::info!(
            group = %group.name,
            vus = num_threads,
            ramp_up_secs = group.ramp_up_seconds,
            "thread-group starting"
        );

        let handles: Vec<_> = (0..num_threads)
            .map(|i| {
                let vu = VirtualUser {
                    index: i,
                    start_delay: stagger * i,
                    deadline,
                    ctx: self.ctx.clone(),
                };
                tokio::spawn(vu.run())
            })
            .collect();

        let all = join_all(handles);
        tokio::pin!(all);

        let results = tokio::select! {
            results = &mut all => results,
            _ = self.ctx.stop.cancelled() => {
                match timeout(STOP_GRACE, &mut all).await {
                    Ok(results) => results,
                    Err(_) => {
                        tracing::warn!(group = %group.name, "stop grace elapsed, dropping in-flight requests");
                        self.ctx.kill.cancel();
                        all.await
                    }
                }
            }
        };

        tracing::info!(group = %group.name, "thread-group finished");

        if results.iter().any(|r| r.as_ref().is_err_and(|e| e.is_panic())) {
            return Err(EngineError::fatal(format!(
                "virtual user task panicked in thread-group '{}'",
                group.name
            )));
        }
        Ok(())
    }
}
