mod aggregator;
mod controller;
mod pipeline;
mod scheduler;
mod stats;
mod vu;

pub use aggregator::SNAPSHOT_INTERVAL;
pub use controller::EngineController;
pub use scheduler::STOP_GRACE;
pub use stats::{EwmaRate, P2Quantile, Reservoir, RunningStats};
