//! Background maintenance.
//!
//! Four threads, one per task, each sleeping on the shared
//! [`ShutdownSignal`](crate::sync::signal::ShutdownSignal) between passes.
//! A pass that is running when shutdown is requested finishes first.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::core::state::AllocatorState;
use crate::diagnostics;

/// One kind of maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceTask {
    /// Rebuild pool free lists, measure fragmentation, reclaim stale
    /// allocations in low-memory mode.
    Compaction,
    /// Advance link lifetimes and run the interference pass.
    LinkDecay,
    /// Fold queued accesses into hotspots and hints.
    Prefetch,
    /// Rebalance NUMA accounting and migrate hot allocations.
    NumaBalance,
}

impl MaintenanceTask {
    pub const ALL: [MaintenanceTask; 4] = [
        MaintenanceTask::Compaction,
        MaintenanceTask::LinkDecay,
        MaintenanceTask::Prefetch,
        MaintenanceTask::NumaBalance,
    ];

    fn thread_name(self) -> &'static str {
        match self {
            MaintenanceTask::Compaction => "tieralloc-compact",
            MaintenanceTask::LinkDecay => "tieralloc-links",
            MaintenanceTask::Prefetch => "tieralloc-prefetch",
            MaintenanceTask::NumaBalance => "tieralloc-numa",
        }
    }

    fn period(self, state: &AllocatorState) -> Duration {
        let config = state.config();
        match self {
            MaintenanceTask::Compaction => config.compaction_interval,
            MaintenanceTask::LinkDecay => config.link_decay_interval,
            MaintenanceTask::Prefetch => config.prefetch_interval,
            MaintenanceTask::NumaBalance => config.balance_interval,
        }
    }
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MaintenanceTask::Compaction => "compaction",
            MaintenanceTask::LinkDecay => "link decay",
            MaintenanceTask::Prefetch => "prefetch",
            MaintenanceTask::NumaBalance => "numa balance",
        };
        f.write_str(name)
    }
}

/// Run one pass of `task` on the calling thread.
///
/// Link decay advances lifetimes by `elapsed`.
pub(crate) fn run_pass(state: &AllocatorState, task: MaintenanceTask, elapsed: Duration) {
    match task {
        MaintenanceTask::Compaction => {
            state.compact();
        }
        MaintenanceTask::LinkDecay => {
            state.tick_links(elapsed.as_secs_f64() * 1000.0);
        }
        MaintenanceTask::Prefetch => {
            state.prefetch_pass();
        }
        MaintenanceTask::NumaBalance => {
            state.balance_numa();
        }
    }
}

/// Handles of the running maintenance threads.
pub struct MaintenanceScheduler {
    workers: Vec<(MaintenanceTask, JoinHandle<()>)>,
}

impl MaintenanceScheduler {
    /// Spawn one thread per task. NUMA balancing only runs with more than
    /// one node. A thread that cannot be spawned is reported and skipped.
    pub fn start(state: &Arc<AllocatorState>) -> Self {
        let multi_node = state.numa_node_count() > 1;
        let mut workers = Vec::with_capacity(MaintenanceTask::ALL.len());

        for task in MaintenanceTask::ALL {
            if task == MaintenanceTask::NumaBalance && !multi_node {
                continue;
            }
            let worker_state = Arc::clone(state);
            let spawned = thread::Builder::new()
                .name(task.thread_name().to_string())
                .spawn(move || maintenance_loop(&worker_state, task));
            match spawned {
                Ok(handle) => workers.push((task, handle)),
                Err(err) => diagnostics::emit_with_context(
                    &diagnostics::TA303,
                    &format!("{}: {}", task, err),
                ),
            }
        }
        debug!("started {} maintenance thread(s)", workers.len());
        Self { workers }
    }

    pub fn running(&self) -> Vec<MaintenanceTask> {
        self.workers.iter().map(|(task, _)| *task).collect()
    }

    /// Join every thread. The caller triggers the shutdown signal first.
    pub fn join(self) {
        for (task, handle) in self.workers {
            if handle.join().is_err() {
                error!("{} thread exited with a panic", task);
            }
        }
    }
}

fn maintenance_loop(state: &AllocatorState, task: MaintenanceTask) {
    let period = task.period(state);
    let mut last = Instant::now();
    while state.signal().wait(period) {
        let now = Instant::now();
        let elapsed = now - last;
        last = now;
        // A failed pass is skipped; the next period tries again.
        if panic::catch_unwind(AssertUnwindSafe(|| run_pass(state, task, elapsed))).is_err() {
            error!("{} pass failed; skipping this cycle", task);
        }
    }
    debug!("{} thread stopped", task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config::AllocConfig;
    use crate::api::flags::AllocFlags;
    use crate::allocators::pool::PoolStrategy;
    use crate::core::state::Route;

    fn fast_state() -> Arc<AllocatorState> {
        diagnostics::suppress_diagnostics(true);
        let period = Duration::from_millis(5);
        Arc::new(
            AllocatorState::new(
                AllocConfig::minimal()
                    .with_numa(false)
                    .with_intervals(period, period, period, period),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_single_node_skips_balance_thread() {
        let state = fast_state();
        let scheduler = MaintenanceScheduler::start(&state);
        let running = scheduler.running();
        assert_eq!(running.len(), 3);
        assert!(!running.contains(&MaintenanceTask::NumaBalance));

        state.signal().trigger();
        scheduler.join();
    }

    #[test]
    fn test_loops_make_progress_and_stop() {
        let state = fast_state();
        let a = state
            .allocate(64, 16, AllocFlags::NONE, Route::Pool(PoolStrategy::NextAvailable))
            .unwrap()
            .as_ptr() as usize;
        let b = state
            .allocate(64, 16, AllocFlags::NONE, Route::Pool(PoolStrategy::NextAvailable))
            .unwrap()
            .as_ptr() as usize;
        state.link(a, b).unwrap();

        let scheduler = MaintenanceScheduler::start(&state);
        let deadline = Instant::now() + Duration::from_secs(10);
        while state.statistics().compaction_runs < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        state.signal().trigger();
        let stopped = Instant::now();
        scheduler.join();

        assert!(stopped.elapsed() < Duration::from_secs(5));
        assert!(state.statistics().compaction_runs >= 2);
        assert!(state.link_strength(a) > 0.0 || state.statistics().links.expired == 2);
    }

    #[test]
    fn test_run_pass_link_decay_uses_elapsed() {
        let state = fast_state();
        let a = state
            .allocate(64, 16, AllocFlags::NONE, Route::Pool(PoolStrategy::NextAvailable))
            .unwrap()
            .as_ptr() as usize;
        let b = state
            .allocate(64, 16, AllocFlags::NONE, Route::Pool(PoolStrategy::NextAvailable))
            .unwrap()
            .as_ptr() as usize;
        state.link(a, b).unwrap();

        // One window at weight 0.5 expires the pair.
        run_pass(&state, MaintenanceTask::LinkDecay, Duration::from_millis(1000));
        assert_eq!(state.statistics().links.expired, 2);
    }
}
