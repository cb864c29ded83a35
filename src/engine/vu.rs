//! Virtual-user runtime: one task per VU, iterating the group's
//! request list under the loop policy. The iteration scope (CSV row
//! bindings plus in-iteration extractions) is rebuilt every loop and
//! never carried across iterations.

use crate::csv::CsvBank;
use crate::engine::pipeline::{self, PipelineContext, PipelineOutcome};
use crate::plan::{LoopPolicy, ThreadGroup};
use crate::vars::IterationScope;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Everything the VUs of one thread-group share.
pub struct GroupContext {
    pub group: Arc<ThreadGroup>,
    pub pipeline: PipelineContext,
    pub csv: Arc<CsvBank>,
    pub referenced_sources: Vec<usize>,
    pub stop: CancellationToken,
    pub kill: CancellationToken,
    pub active_vus: Arc<AtomicU32>,
}

pub struct VirtualUser {
    pub index: u32,
    pub start_delay: Duration,
    /// Set for duration-mode loops: group start + duration. Checked at
    /// iteration boundaries only; an in-flight iteration finishes.
    pub deadline: Option<Instant>,
    pub ctx: Arc<GroupContext>,
}

struct ActiveGuard(Arc<AtomicU32>);

impl ActiveGuard {
    fn new(counter: &Arc<AtomicU32>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl VirtualUser {
    pub async fn run(self) {
        let ctx = &self.ctx;

        if !self.start_delay.is_zero() {
            tokio::select! {
                _ = sleep(self.start_delay) => {}
                _ = ctx.stop.cancelled() => return,
                _ = ctx.kill.cancelled() => return,
            }
        }
        if ctx.stop.is_cancelled() || ctx.kill.is_cancelled() {
            return;
        }

        tracing::debug!(group = %ctx.group.name, vu = self.index, "virtual user started");
        let _active = ActiveGuard::new(&ctx.active_vus);

        let mut cursors = ctx.csv.vu_cursors();
        let mut iterations: u64 = 0;

        'run: loop {
            if ctx.stop.is_cancelled() || ctx.kill.is_cancelled() {
                break;
            }
            match ctx.group.loop_count {
                LoopPolicy::Finite { count } if iterations >= count => break,
                LoopPolicy::Duration { .. } => {
                    if let Some(deadline) = self.deadline
                        && Instant::now() >= deadline
                    {
                        break;
                    }
                }
                _ => {}
            }

            let row_bindings = ctx.csv.draw_bindings(&self.ctx.referenced_sources, &mut cursors);
            let mut iteration = IterationScope::new(row_bindings);

            for request in ctx.group.requests.iter().filter(|r| r.enabled) {
                if ctx.stop.is_cancelled() || ctx.kill.is_cancelled() {
                    break 'run;
                }
                match pipeline::execute(&ctx.pipeline, request, &iteration).await {
                    PipelineOutcome::Completed { bindings } => iteration.merge(bindings),
                    PipelineOutcome::Aborted => break 'run,
                }
            }

            iterations += 1;
        }

        tracing::debug!(group = %ctx.group.name, vu = self.index, iterations, "virtual user stopped");
    }
}
