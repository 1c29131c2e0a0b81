//! Background analysis scheduling.
//!
//! One lazily spawned worker thread per address space runs the analysis
//! pass whenever a run has been requested and hold is off. Requests that
//! arrive mid-run are coalesced into one follow-up run. Completion events
//! fire on the worker thread after the last coalesced run, before waiters
//! are released. `abort` unblocks waiters at once, fires pending
//! completion events on the aborting thread and asks the running pass to
//! stop at its next checkpoint.

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{Result, VspaceError};
use crate::space::AddressSpace;
use crate::timeout::{with_timeout, TimeoutConfig};

use super::completion::CompletionEvent;
use super::state::{ActiveAnalysisInfo, AnalysisInfo, AnalysisProgress, AnalysisState};

/// Work performed by one analysis run.
pub trait AnalysisPass: Send + Sync {
    fn run(&self, ctx: &PassContext);
}

impl<F> AnalysisPass for F
where
    F: Fn(&PassContext) + Send + Sync,
{
    fn run(&self, ctx: &PassContext) {
        self(ctx)
    }
}

struct SchedulerState {
    state: AnalysisState,
    hold: bool,
    requested: bool,
    running: bool,
    shutdown: bool,
    abort_epoch: u64,
    count: usize,
    total: usize,
    active: BTreeMap<u64, Instant>,
    update_counts: HashMap<u64, usize>,
    submit_counts: HashMap<u64, usize>,
    total_time: Duration,
    run_started: Option<Instant>,
    initial_done: bool,
    pending: Vec<Arc<CompletionEvent>>,
    worker: Option<JoinHandle<()>>,
    worker_thread: Option<ThreadId>,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            state: AnalysisState::Initial,
            hold: false,
            requested: false,
            running: false,
            shutdown: false,
            abort_epoch: 0,
            count: 0,
            total: 0,
            active: BTreeMap::new(),
            update_counts: HashMap::new(),
            submit_counts: HashMap::new(),
            total_time: Duration::ZERO,
            run_started: None,
            initial_done: false,
            pending: Vec::new(),
            worker: None,
            worker_thread: None,
        }
    }

    fn reported(&self) -> AnalysisState {
        if self.hold {
            AnalysisState::Hold
        } else {
            self.state
        }
    }

    fn busy(&self) -> bool {
        self.running || (self.requested && !self.hold)
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    cond: Condvar,
    abort: AtomicBool,
    pass: Arc<dyn AnalysisPass>,
    pool: Option<rayon::ThreadPool>,
}

/// Progress and cancellation handle given to a running pass.
pub struct PassContext {
    shared: Arc<Shared>,
}

impl PassContext {
    /// True once the run has been aborted or the scheduler is shutting down.
    pub fn is_aborted(&self) -> bool {
        self.shared.abort.load(Ordering::Acquire)
    }

    pub fn set_phase(&self, state: AnalysisState, total: usize) {
        if self.is_aborted() {
            return;
        }
        let mut st = self.shared.state.lock();
        st.state = state;
        st.count = 0;
        st.total = total;
    }

    /// Add `n` to the completed count of the current phase.
    pub fn advance(&self, n: usize) {
        self.shared.state.lock().count += n;
    }

    pub fn begin_function(&self, start: u64) {
        let mut st = self.shared.state.lock();
        st.active.insert(start, Instant::now());
        *st.update_counts.entry(start).or_default() += 1;
    }

    pub fn end_function(&self, start: u64) {
        self.shared.state.lock().active.remove(&start);
    }
}

pub struct AnalysisScheduler {
    shared: Arc<Shared>,
}

impl AnalysisScheduler {
    /// `worker_threads == 0` runs the pass on rayon's global pool.
    pub fn new(pass: Arc<dyn AnalysisPass>, worker_threads: usize) -> Self {
        let pool = if worker_threads > 0 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(worker_threads)
                .thread_name(|i| format!("vspace-analysis-{}", i))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!(error = %e, "could not build analysis pool; using the global pool");
                    None
                }
            }
        } else {
            None
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::new()),
                cond: Condvar::new(),
                abort: AtomicBool::new(false),
                pass,
                pool,
            }),
        }
    }

    /// Request a run. Held requests start once hold is released.
    pub fn schedule(&self) {
        let mut st = self.shared.state.lock();
        if st.shutdown {
            return;
        }
        st.requested = true;
        if st.hold {
            debug!("analysis requested while on hold");
            return;
        }
        self.ensure_worker(&mut st);
        self.shared.cond.notify_all();
    }

    fn ensure_worker(&self, st: &mut SchedulerState) {
        if st.worker.is_some() {
            return;
        }
        let shared = self.shared.clone();
        match thread::Builder::new()
            .name("vspace-analysis".into())
            .spawn(move || worker_loop(shared))
        {
            Ok(handle) => {
                st.worker_thread = Some(handle.thread().id());
                st.worker = Some(handle);
            }
            Err(e) => error!(error = %e, "failed to spawn analysis worker"),
        }
    }

    /// Block until no run is in flight or queued, or until an abort.
    pub fn wait_idle(&self) {
        let mut st = self.shared.state.lock();
        if st.worker_thread == Some(thread::current().id()) {
            warn!("wait for analysis from the analysis thread ignored");
            return;
        }
        let epoch = st.abort_epoch;
        while !st.shutdown && st.abort_epoch == epoch && st.busy() {
            self.shared.cond.wait(&mut st);
        }
    }

    /// Stop the current run and fire every pending completion event on this thread.
    pub fn abort(&self) {
        let ready = {
            let mut st = self.shared.state.lock();
            st.requested = false;
            st.abort_epoch += 1;
            self.shared.abort.store(true, Ordering::Release);
            if st.running || st.state.is_mid_flight() || st.state == AnalysisState::Extended {
                st.state = AnalysisState::Idle;
            }
            st.count = 0;
            st.total = 0;
            self.shared.cond.notify_all();
            std::mem::take(&mut st.pending)
        };
        warn!(pending_events = ready.len(), "analysis aborted");
        for event in ready {
            event.fire();
        }
    }

    pub fn set_hold(&self, hold: bool) {
        let mut st = self.shared.state.lock();
        st.hold = hold;
        info!(hold, "analysis hold changed");
        if !hold && st.requested && !st.shutdown {
            self.ensure_worker(&mut st);
        }
        self.shared.cond.notify_all();
    }

    pub fn is_held(&self) -> bool {
        self.shared.state.lock().hold
    }

    pub fn state(&self) -> AnalysisState {
        self.shared.state.lock().reported()
    }

    pub fn progress(&self) -> AnalysisProgress {
        let st = self.shared.state.lock();
        AnalysisProgress {
            state: st.reported(),
            count: st.count,
            total: st.total,
        }
    }

    pub fn info(&self) -> AnalysisInfo {
        let st = self.shared.state.lock();
        let current = st.run_started.map(|t| t.elapsed()).unwrap_or_default();
        AnalysisInfo {
            state: st.reported(),
            analysis_time_ms: (st.total_time + current).as_millis() as u64,
            active_info: st
                .active
                .iter()
                .map(|(&function, started)| ActiveAnalysisInfo {
                    function,
                    analysis_time_ms: started.elapsed().as_millis() as u64,
                    update_count: st.update_counts.get(&function).copied().unwrap_or(0),
                    submit_count: st.submit_counts.get(&function).copied().unwrap_or(0),
                })
                .collect(),
        }
    }

    pub fn has_initial_analysis(&self) -> bool {
        self.shared.state.lock().initial_done
    }

    /// Count one submission of `function` for `ActiveAnalysisInfo`.
    pub fn note_submit(&self, function: u64) {
        *self
            .shared
            .state
            .lock()
            .submit_counts
            .entry(function)
            .or_default() += 1;
    }

    /// Register a callback for the next completed run.
    pub fn add_completion_event(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Arc<CompletionEvent> {
        let event = Arc::new(CompletionEvent::new(callback));
        let mut st = self.shared.state.lock();
        st.pending.retain(|e| e.is_pending());
        st.pending.push(event.clone());
        event
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let epoch = {
            let mut st = shared.state.lock();
            while !st.shutdown && !(st.requested && !st.hold) {
                shared.cond.wait(&mut st);
            }
            if st.shutdown {
                break;
            }
            st.requested = false;
            st.running = true;
            st.state = AnalysisState::Disassembling;
            st.count = 0;
            st.total = 0;
            st.run_started = Some(Instant::now());
            shared.abort.store(false, Ordering::Release);
            st.abort_epoch
        };

        let span = crate::span_trace!("analysis_run", epoch);
        let _entered = span.enter();
        debug!("analysis run started");
        let ctx = PassContext {
            shared: shared.clone(),
        };
        let run = || catch_unwind(AssertUnwindSafe(|| shared.pass.run(&ctx)));
        let outcome = match &shared.pool {
            Some(pool) => pool.install(run),
            None => run(),
        };
        if outcome.is_err() {
            error!("analysis pass panicked; keeping partial results");
        }

        let ready = {
            let mut st = shared.state.lock();
            if let Some(started) = st.run_started.take() {
                st.total_time += started.elapsed();
            }
            st.active.clear();
            st.initial_done = true;
            let aborted = st.abort_epoch != epoch;
            let again = st.requested && !st.hold && !st.shutdown;
            if aborted || again {
                Vec::new()
            } else {
                std::mem::take(&mut st.pending)
            }
        };
        for event in ready {
            event.fire();
        }

        let mut st = shared.state.lock();
        st.running = false;
        if !(st.requested && !st.hold) || st.shutdown {
            st.state = AnalysisState::Idle;
            st.count = 0;
            st.total = 0;
            debug!(total_ms = st.total_time.as_millis() as u64, "analysis idle");
        }
        shared.cond.notify_all();
    }
    debug!("analysis worker exiting");
}

impl Drop for AnalysisScheduler {
    fn drop(&mut self) {
        let (worker, pending) = {
            let mut st = self.shared.state.lock();
            st.shutdown = true;
            self.shared.abort.store(true, Ordering::Release);
            self.shared.cond.notify_all();
            (st.worker.take(), std::mem::take(&mut st.pending))
        };
        for event in pending {
            event.cancel();
        }
        if let Some(handle) = worker {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("analysis worker panicked during shutdown");
            }
        }
    }
}

impl AddressSpace {
    /// Start or continue analysis without blocking; a no-op while on hold.
    pub fn update_analysis(&self) {
        if self.scheduler.is_held() {
            debug!("update_analysis ignored while on hold");
            return;
        }
        self.scheduler.schedule();
    }

    /// Start analysis and block until it is idle or aborted.
    pub fn update_analysis_and_wait(&self) {
        self.update_analysis();
        self.scheduler.wait_idle();
    }

    /// `update_analysis_and_wait` bounded by `timeout`.
    ///
    /// On timeout the analysis keeps running; only the wait gives up.
    pub async fn update_analysis_and_wait_async(self: &Arc<Self>, timeout: Duration) -> Result<()> {
        let space = self.clone();
        let config = TimeoutConfig::from_duration(timeout, "update_analysis_and_wait");
        with_timeout(config, async move {
            tokio::task::spawn_blocking(move || space.update_analysis_and_wait())
                .await
                .map_err(|e| VspaceError::Internal(format!("analysis wait failed: {}", e)))
        })
        .await
    }

    pub fn abort_analysis(&self) {
        self.scheduler.abort();
    }

    pub fn set_analysis_hold(&self, hold: bool) {
        self.scheduler.set_hold(hold);
    }

    /// Callback for the next completed (or aborted) analysis run.
    pub fn add_analysis_completion_event(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Arc<CompletionEvent> {
        self.scheduler.add_completion_event(callback)
    }

    pub fn analysis_info(&self) -> AnalysisInfo {
        self.scheduler.info()
    }

    pub fn analysis_progress(&self) -> AnalysisProgress {
        self.scheduler.progress()
    }

    pub fn has_initial_analysis(&self) -> bool {
        self.scheduler.has_initial_analysis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_pass(runs: Arc<AtomicUsize>) -> Arc<dyn AnalysisPass> {
        Arc::new(move |ctx: &PassContext| {
            ctx.set_phase(AnalysisState::Disassembling, 2);
            ctx.begin_function(0x1000);
            ctx.advance(2);
            ctx.end_function(0x1000);
            runs.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_run_to_idle_fires_completion() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = AnalysisScheduler::new(counting_pass(runs.clone()), 0);
        assert_eq!(scheduler.state(), AnalysisState::Initial);
        let (hits, callback) = counter();
        let event = scheduler.add_completion_event(callback);

        scheduler.schedule();
        scheduler.wait_idle();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!event.cancel());
        assert_eq!(scheduler.state(), AnalysisState::Idle);
        assert!(scheduler.has_initial_analysis());
        assert_eq!(scheduler.progress().to_string(), "Idle");
    }

    #[test]
    fn test_hold_defers_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = AnalysisScheduler::new(counting_pass(runs.clone()), 1);
        scheduler.set_hold(true);
        scheduler.schedule();
        scheduler.wait_idle();
        assert_eq!(scheduler.state(), AnalysisState::Hold);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        scheduler.set_hold(false);
        scheduler.wait_idle();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abort_fires_pending_and_unblocks() {
        let started = Arc::new(AtomicBool::new(false));
        let s = started.clone();
        let pass: Arc<dyn AnalysisPass> = Arc::new(move |ctx: &PassContext| {
            ctx.set_phase(AnalysisState::Analyzing, 100);
            s.store(true, Ordering::SeqCst);
            while !ctx.is_aborted() {
                thread::sleep(Duration::from_millis(1));
            }
        });
        let scheduler = AnalysisScheduler::new(pass, 0);
        let (hits, callback) = counter();
        let event = scheduler.add_completion_event(callback);
        scheduler.schedule();
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(scheduler.progress().to_string(), "Analyzing (0/100)");

        scheduler.abort();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!event.is_pending());
        scheduler.wait_idle();
        assert_eq!(scheduler.state(), AnalysisState::Idle);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_canceled_event_never_fires() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = AnalysisScheduler::new(counting_pass(runs), 0);
        let (hits, callback) = counter();
        let event = scheduler.add_completion_event(callback);
        assert!(event.cancel());
        scheduler.schedule();
        scheduler.wait_idle();
        scheduler.abort();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_neutralizes_pending() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = AnalysisScheduler::new(counting_pass(runs), 0);
        let (hits, callback) = counter();
        let event = scheduler.add_completion_event(callback);
        drop(scheduler);
        assert!(!event.is_pending());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
