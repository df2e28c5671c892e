//! Sort job scheduling and result publication
//!
//! The scheduler owns the whole producer side: it decides each frame
//! whether a re-sort is warranted, launches jobs onto the rayon pool with
//! a hard concurrency bound, and publishes finished permutations through
//! the double-buffer handoff. The consumer never blocks on it.

use crate::config::{BoundsMode, SortConfig, SortStrategy};
use crate::error::{PipelineError, PipelineResult};
use crate::handoff::{ActiveIndices, IndexHandoff};
use crate::pool::{BufferPool, ScratchPool};
use crate::store::ElementStore;
use parking_lot::{Mutex, RwLock};
use splatsort_core::{
    comparison_sort_into, counting_sort_into, BinLayout, BinPartition, CameraSnapshot,
    DepthBounds, DepthMetric, SortScratch,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Instrumentation hooks, all optional
pub trait SortObserver: Send + Sync {
    fn sort_started(&self) {}
    fn sort_completed(&self, _duration: Duration) {}
    fn sort_failed(&self, _error: &PipelineError) {}
}

/// Cheap counters for overlays and diagnostics
#[derive(Clone, Copy, Debug, Default)]
pub struct SortStats {
    pub sorts_completed: u64,
    pub sorts_failed: u64,
    pub requests_dropped: u64,
    pub last_duration: Duration,
    pub last_element_count: usize,
}

#[derive(Default)]
struct StatsCells {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    last_duration_us: AtomicU64,
    last_element_count: AtomicUsize,
}

/// Immutable inputs captured when a job launches
#[derive(Clone, Copy)]
struct JobSnapshot {
    camera: CameraSnapshot,
    revision: u64,
}

/// Weighted partition cache; recomputing every frame for a static camera
/// would be wasted work
struct CachedPartition {
    partition: BinPartition,
    bounds: DepthBounds,
    budget: usize,
}

impl CachedPartition {
    fn still_valid(&self, bounds: &DepthBounds, camera_tier: usize, budget: usize) -> bool {
        if self.budget != budget || self.partition.camera_tier() != camera_tier {
            return false;
        }
        let tolerance = self.bounds.span() * 0.01;
        (bounds.min - self.bounds.min).abs() <= tolerance
            && (bounds.max - self.bounds.max).abs() <= tolerance
    }
}

struct SchedulerState {
    /// Camera snapshot of the last completed sort
    last_camera: Option<CameraSnapshot>,
    last_sorted_at: Option<Instant>,
    /// Data revision the last completed sort was built from
    last_revision: Option<u64>,
    /// Most recent camera seen by `request_resort`, used when a
    /// completion handler needs to chase a stale revision
    latest_camera: Option<CameraSnapshot>,
    interacting: bool,
    /// When set, the post-interaction full-quality sort fires at this
    /// deadline regardless of epsilons
    final_sort_due: Option<Instant>,
    partition: Option<CachedPartition>,
}

/// Asynchronous depth-sort scheduler over an element store.
///
/// One instance per rendered splat collection. Constructed inside an
/// `Arc` because in-flight jobs keep the scheduler alive.
pub struct SortScheduler<S> {
    /// Handle for spawning jobs that outlive the caller's borrow
    self_ref: Weak<Self>,
    store: Arc<S>,
    config: RwLock<SortConfig>,
    handoff: IndexHandoff,
    index_pool: BufferPool<i32>,
    scratch_pool: ScratchPool,
    state: Mutex<SchedulerState>,
    in_flight: AtomicUsize,
    observer: RwLock<Option<Arc<dyn SortObserver>>>,
    stats: StatsCells,
}

impl<S: ElementStore + 'static> SortScheduler<S> {
    pub fn new(store: Arc<S>, config: SortConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            store,
            config: RwLock::new(config),
            handoff: IndexHandoff::new(),
            index_pool: BufferPool::new(),
            scratch_pool: ScratchPool::new(),
            state: Mutex::new(SchedulerState {
                last_camera: None,
                last_sorted_at: None,
                last_revision: None,
                latest_camera: None,
                interacting: false,
                final_sort_due: None,
                partition: None,
            }),
            in_flight: AtomicUsize::new(0),
            observer: RwLock::new(None),
            stats: StatsCells::default(),
        })
    }

    /// The currently published depth-ordered permutation. `None` only
    /// before the first sort completes; substitute an identity ordering
    /// in that window. Never blocks beyond a read lock.
    pub fn active_indices(&self) -> Option<ActiveIndices<'_>> {
        self.handoff.active()
    }

    /// Mark the start of a consumption cycle. Buffers displaced before
    /// this point can no longer be referenced by outstanding work and go
    /// back to the pool here.
    pub fn begin_frame(&self) {
        self.handoff.drain_retired(&self.index_pool);
    }

    /// Ask for a re-sort against the given camera. Returns immediately;
    /// the request is dropped when not warranted or when the concurrency
    /// bound is reached.
    pub fn request_resort(&self, camera: &CameraSnapshot) {
        let config = self.config.read().clone();
        let now = Instant::now();
        let warranted = {
            let mut state = self.state.lock();
            state.latest_camera = Some(*camera);
            let force = match state.final_sort_due {
                Some(due) if now >= due => {
                    state.final_sort_due = None;
                    true
                }
                _ => false,
            };
            force || Self::should_resort(&state, camera, self.store.revision(), &config, now)
        };
        if warranted {
            self.launch(*camera, &config);
        }
    }

    /// Run one sort on the calling thread instead of the worker pool.
    /// Still honors the concurrency bound (returns `Ok` without sorting
    /// when saturated).
    pub fn sort_blocking(&self, camera: &CameraSnapshot) -> PipelineResult<()> {
        self.state.lock().latest_camera = Some(*camera);
        if !self.try_claim_slot(&self.config.read()) {
            return Ok(());
        }
        let snapshot = JobSnapshot {
            camera: *camera,
            revision: self.store.revision(),
        };
        self.run_job(snapshot)
    }

    /// Loosen the re-sort thresholds while the user is dragging the
    /// camera around
    pub fn begin_interaction(&self) {
        let mut state = self.state.lock();
        state.interacting = true;
        state.final_sort_due = None;
    }

    /// Restore normal thresholds and schedule one final full-quality
    /// sort after a short grace delay
    pub fn end_interaction(&self) {
        let grace = self.config.read().interaction_grace;
        let mut state = self.state.lock();
        if state.interacting {
            state.interacting = false;
            state.final_sort_due = Some(Instant::now() + grace);
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn SortObserver>) {
        *self.observer.write() = Some(observer);
    }

    pub fn config(&self) -> SortConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: SortConfig) {
        *self.config.write() = config;
    }

    pub fn stats(&self) -> SortStats {
        SortStats {
            sorts_completed: self.stats.completed.load(Ordering::Relaxed),
            sorts_failed: self.stats.failed.load(Ordering::Relaxed),
            requests_dropped: self.stats.dropped.load(Ordering::Relaxed),
            last_duration: Duration::from_micros(self.stats.last_duration_us.load(Ordering::Relaxed)),
            last_element_count: self.stats.last_element_count.load(Ordering::Relaxed),
        }
    }

    fn should_resort(
        state: &SchedulerState,
        camera: &CameraSnapshot,
        revision: u64,
        config: &SortConfig,
        now: Instant,
    ) -> bool {
        // Data changes always win; everything else is rate-limited
        let Some(last_revision) = state.last_revision else {
            return true;
        };
        if revision != last_revision {
            return true;
        }

        let (position_epsilon, direction_epsilon, interval) = if state.interacting {
            (
                config.interaction.position_epsilon,
                config.interaction.direction_epsilon,
                config.interaction.min_sort_interval,
            )
        } else {
            (
                config.position_epsilon,
                config.direction_epsilon,
                config.min_sort_interval,
            )
        };

        if let Some(at) = state.last_sorted_at {
            if now.duration_since(at) < interval {
                return false;
            }
        }

        let Some(last_camera) = state.last_camera else {
            return true;
        };
        camera.moved_beyond(&last_camera, position_epsilon, direction_epsilon)
    }

    fn try_claim_slot(&self, config: &SortConfig) -> bool {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        loop {
            if current >= config.max_concurrent_jobs {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(in_flight = current, "resort request dropped at concurrency bound");
                return false;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn launch(&self, camera: CameraSnapshot, config: &SortConfig) {
        let Some(scheduler) = self.self_ref.upgrade() else {
            return;
        };
        if !self.try_claim_slot(config) {
            return;
        }
        // Snapshot on the caller thread so a data change that lands after
        // this request is guaranteed to be detected post-job
        let snapshot = JobSnapshot {
            camera,
            revision: self.store.revision(),
        };
        rayon::spawn(move || {
            let _ = scheduler.run_job(snapshot);
        });
    }

    fn run_job(&self, snapshot: JobSnapshot) -> PipelineResult<()> {
        self.notify_started();
        let started = Instant::now();

        match self.execute(&snapshot) {
            Ok(element_count) => {
                let duration = started.elapsed();
                {
                    let mut state = self.state.lock();
                    state.last_camera = Some(snapshot.camera);
                    state.last_sorted_at = Some(Instant::now());
                    state.last_revision = Some(snapshot.revision);
                }
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .last_duration_us
                    .store(duration.as_micros() as u64, Ordering::Relaxed);
                self.stats
                    .last_element_count
                    .store(element_count, Ordering::Relaxed);
                self.notify_completed(duration);
                self.in_flight.fetch_sub(1, Ordering::AcqRel);

                // Data moved underneath the job: the freshly published
                // order is already stale, chase it now
                if self.store.revision() != snapshot.revision {
                    tracing::debug!("data revision changed mid-sort, scheduling follow-up");
                    let camera = self
                        .state
                        .lock()
                        .latest_camera
                        .unwrap_or(snapshot.camera);
                    let config = self.config.read().clone();
                    self.launch(camera, &config);
                }
                Ok(())
            }
            Err(error) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                tracing::warn!(%error, "sort job aborted");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.notify_failed(&error);
                Err(error)
            }
        }
    }

    fn execute(&self, snapshot: &JobSnapshot) -> PipelineResult<usize> {
        let config = self.config.read().clone();
        let element_count = self.store.len();

        // Acquisition failure aborts before any sort work
        let mut out = self.index_pool.acquire(element_count)?;
        let mut scratch = self.scratch_pool.acquire();
        let result = self.sort_into(&config, snapshot, element_count, &mut scratch, &mut out);
        self.scratch_pool.release(scratch);

        match result {
            Ok(()) => {
                self.handoff.publish(out);
                Ok(element_count)
            }
            Err(error) => {
                // Nothing was published; the lease goes straight back
                self.index_pool.release(out);
                Err(error)
            }
        }
    }

    fn sort_into(
        &self,
        config: &SortConfig,
        snapshot: &JobSnapshot,
        element_count: usize,
        scratch: &mut SortScratch,
        out: &mut Vec<i32>,
    ) -> PipelineResult<()> {
        if element_count == 0 {
            out.clear();
            return Ok(());
        }

        let camera = snapshot.camera;
        let metric = config.metric;
        let store = &*self.store;
        let depth = move |index: usize| camera.depth_of(store.position(index), metric);

        let use_comparison = match config.strategy {
            SortStrategy::Comparison => true,
            SortStrategy::Counting => false,
            SortStrategy::Auto => element_count <= config.comparison_threshold,
        };
        if use_comparison {
            comparison_sort_into(&depth, element_count, config.order, scratch, out)?;
            return Ok(());
        }

        let bounds = match config.bounds_mode {
            BoundsMode::CachedAabb => match store.bounds() {
                Some(aabb) => DepthBounds::from_aabb(&aabb, &camera, metric),
                None => Self::exact_bounds(&depth, element_count),
            },
            BoundsMode::Exact => Self::exact_bounds(&depth, element_count),
        };

        let bin_budget = config.budget_policy.bins_for(element_count);
        if config.weighted_bins {
            let partition = self.partition_for(&bounds, &camera, metric, bin_budget);
            counting_sort_into(
                &depth,
                element_count,
                bounds,
                BinLayout::Weighted(&partition),
                bin_budget,
                config.order,
                scratch,
                out,
            )?;
        } else {
            counting_sort_into(
                &depth,
                element_count,
                bounds,
                BinLayout::Uniform,
                bin_budget,
                config.order,
                scratch,
                out,
            )?;
        }
        Ok(())
    }

    fn exact_bounds<D: Fn(usize) -> f32 + Sync>(depth: &D, element_count: usize) -> DepthBounds {
        DepthBounds::from_keys(depth, element_count).unwrap_or(DepthBounds::new(0.0, 1.0))
    }

    fn partition_for(
        &self,
        bounds: &DepthBounds,
        camera: &CameraSnapshot,
        metric: DepthMetric,
        bin_budget: usize,
    ) -> BinPartition {
        // The camera's own depth key is the origin of both metrics
        let camera_depth = camera.depth_of(camera.position, metric);
        let camera_tier = BinPartition::camera_tier_for(bounds, camera_depth);

        let mut state = self.state.lock();
        if let Some(cached) = &state.partition {
            if cached.still_valid(bounds, camera_tier, bin_budget) {
                return cached.partition.clone();
            }
        }
        let partition = BinPartition::compute(bounds, camera_depth, bin_budget);
        state.partition = Some(CachedPartition {
            partition: partition.clone(),
            bounds: *bounds,
            budget: bin_budget,
        });
        partition
    }

    fn notify_started(&self) {
        if let Some(observer) = self.observer.read().clone() {
            observer.sort_started();
        }
    }

    fn notify_completed(&self, duration: Duration) {
        if let Some(observer) = self.observer.read().clone() {
            observer.sort_completed(duration);
        }
    }

    fn notify_failed(&self, error: &PipelineError) {
        if let Some(observer) = self.observer.read().clone() {
            observer.sort_failed(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use parking_lot::Condvar;

    /// Append-only store with a gate that can hold jobs at their first
    /// `len()` call, for deterministic in-flight scenarios
    struct TestStore {
        positions: RwLock<Vec<Vec3>>,
        revision: AtomicU64,
        held: Mutex<bool>,
        released: Condvar,
    }

    impl TestStore {
        fn with_points(n: usize) -> Arc<Self> {
            let positions = (0..n as u64)
                .map(|i| {
                    let h = |k: u64| {
                        let mut x = i.wrapping_mul(k).wrapping_add(0x9e37_79b9_7f4a_7c15);
                        x ^= x >> 30;
                        x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
                        (x & 0xffff) as f32 / 655.35
                    };
                    Vec3::new(h(3), h(7), h(13))
                })
                .collect();
            Arc::new(Self {
                positions: RwLock::new(positions),
                revision: AtomicU64::new(1),
                held: Mutex::new(false),
                released: Condvar::new(),
            })
        }

        fn append(&self, p: Vec3) {
            self.positions.write().push(p);
            self.revision.fetch_add(1, Ordering::SeqCst);
        }

        fn hold_jobs(&self) {
            *self.held.lock() = true;
        }

        fn release_jobs(&self) {
            *self.held.lock() = false;
            self.released.notify_all();
        }
    }

    impl ElementStore for TestStore {
        fn len(&self) -> usize {
            let mut held = self.held.lock();
            while *held {
                self.released.wait(&mut held);
            }
            drop(held);
            self.positions.read().len()
        }

        fn position(&self, index: usize) -> Vec3 {
            self.positions.read()[index]
        }

        fn revision(&self) -> u64 {
            self.revision.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        started: AtomicU64,
        completed: AtomicU64,
        failed: AtomicU64,
    }

    impl SortObserver for CountingObserver {
        fn sort_started(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn sort_completed(&self, _d: Duration) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn sort_failed(&self, _e: &PipelineError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until(timeout: Duration, f: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        f()
    }

    fn camera() -> CameraSnapshot {
        CameraSnapshot::new(Vec3::ZERO, Vec3::Z)
    }

    fn fast_config() -> SortConfig {
        SortConfig {
            min_sort_interval: Duration::ZERO,
            interaction_grace: Duration::ZERO,
            // Force the counting path so these tests exercise the full
            // engine regardless of scene size
            strategy: SortStrategy::Counting,
            ..SortConfig::default()
        }
    }

    fn assert_permutation(indices: &[i32], n: usize) {
        assert_eq!(indices.len(), n);
        let mut seen = vec![false; n];
        for &i in indices {
            assert!(!seen[i as usize]);
            seen[i as usize] = true;
        }
    }

    #[test]
    fn test_first_sort_publishes_permutation() {
        let store = TestStore::with_points(500);
        let scheduler = SortScheduler::new(Arc::clone(&store), fast_config());
        let observer = Arc::new(CountingObserver::default());
        scheduler.set_observer(observer.clone());

        assert!(scheduler.active_indices().is_none());
        scheduler.request_resort(&camera());

        assert!(wait_until(Duration::from_secs(2), || {
            scheduler.stats().sorts_completed == 1
        }));
        let active = scheduler.active_indices().unwrap();
        assert_permutation(&active, 500);
        drop(active);

        assert_eq!(observer.started.load(Ordering::SeqCst), 1);
        assert_eq!(observer.completed.load(Ordering::SeqCst), 1);
        assert_eq!(observer.failed.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().last_element_count, 500);
    }

    #[test]
    fn test_idempotent_without_data_or_camera_change() {
        let store = TestStore::with_points(300);
        let scheduler = SortScheduler::new(Arc::clone(&store), fast_config());

        scheduler.request_resort(&camera());
        assert!(wait_until(Duration::from_secs(2), || {
            scheduler.stats().sorts_completed == 1
        }));

        // Same revision, same camera: not warranted
        scheduler.request_resort(&camera());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(scheduler.stats().sorts_completed, 1);
        assert_eq!(scheduler.stats().requests_dropped, 0);

        // Camera moved beyond the position epsilon: warranted again
        let moved = CameraSnapshot::new(Vec3::new(1.0, 0.0, 0.0), Vec3::Z);
        scheduler.request_resort(&moved);
        assert!(wait_until(Duration::from_secs(2), || {
            scheduler.stats().sorts_completed == 2
        }));
    }

    #[test]
    fn test_revision_bump_mid_job_triggers_follow_up() {
        let store = TestStore::with_points(100);
        let scheduler = SortScheduler::new(Arc::clone(&store), fast_config());

        store.hold_jobs();
        scheduler.request_resort(&camera());
        // The revision snapshot was taken at launch; this append lands
        // mid-job from the scheduler's point of view
        store.append(Vec3::splat(9.0));
        store.release_jobs();

        assert!(wait_until(Duration::from_secs(2), || {
            scheduler.stats().sorts_completed == 2
        }));
        std::thread::sleep(Duration::from_millis(50));
        // Exactly one follow-up, and the final order covers the append
        assert_eq!(scheduler.stats().sorts_completed, 2);
        let active = scheduler.active_indices().unwrap();
        assert_permutation(&active, 101);
    }

    #[test]
    fn test_concurrency_bound_drops_third_request() {
        let store = TestStore::with_points(200);
        let scheduler = SortScheduler::new(Arc::clone(&store), fast_config());

        store.hold_jobs();
        scheduler.request_resort(&camera());
        scheduler.request_resort(&camera());
        scheduler.request_resort(&camera());
        assert_eq!(scheduler.stats().requests_dropped, 1);
        store.release_jobs();

        assert!(wait_until(Duration::from_secs(2), || {
            scheduler.stats().sorts_completed == 2
        }));

        // No buffer leaked: one active, one retired, nothing else
        scheduler.begin_frame();
        assert_eq!(scheduler.handoff.retired_count(), 0);
        assert_eq!(scheduler.index_pool.outstanding(), 1);
        assert_eq!(scheduler.index_pool.idle_count(), 1);
    }

    #[test]
    fn test_interaction_mode_loosens_then_finalizes() {
        let store = TestStore::with_points(300);
        let scheduler = SortScheduler::new(Arc::clone(&store), fast_config());

        scheduler.request_resort(&camera());
        assert!(wait_until(Duration::from_secs(2), || {
            scheduler.stats().sorts_completed == 1
        }));

        scheduler.begin_interaction();
        // Beyond the normal epsilon (0.01) but inside the interaction
        // epsilon (0.05): suppressed while interacting
        let nudged = CameraSnapshot::new(Vec3::new(0.02, 0.0, 0.0), Vec3::Z);
        scheduler.request_resort(&nudged);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(scheduler.stats().sorts_completed, 1);

        // Leaving interaction schedules the final full-quality sort
        scheduler.end_interaction();
        scheduler.request_resort(&nudged);
        assert!(wait_until(Duration::from_secs(2), || {
            scheduler.stats().sorts_completed == 2
        }));
    }

    #[test]
    fn test_empty_store() {
        let store = TestStore::with_points(0);
        let scheduler = SortScheduler::new(Arc::clone(&store), fast_config());
        scheduler.sort_blocking(&camera()).unwrap();
        let active = scheduler.active_indices().unwrap();
        assert!(active.is_empty());
    }

    #[test]
    fn test_sort_blocking_runs_inline() {
        let store = TestStore::with_points(2_000);
        let config = SortConfig {
            weighted_bins: true,
            ..fast_config()
        };
        let scheduler = SortScheduler::new(Arc::clone(&store), config);
        scheduler.sort_blocking(&camera()).unwrap();
        assert_eq!(scheduler.stats().sorts_completed, 1);
        let active = scheduler.active_indices().unwrap();
        assert_permutation(&active, 2_000);
    }

    #[test]
    fn test_reads_overlap_sorting() {
        // Consumer reads while jobs run; lengths must always match a
        // published element count, never a partial buffer
        let store = TestStore::with_points(1_000);
        let scheduler = SortScheduler::new(Arc::clone(&store), fast_config());
        scheduler.sort_blocking(&camera()).unwrap();

        let reader = {
            let scheduler = Arc::clone(&scheduler);
            let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let flag = Arc::clone(&stop);
            let handle = std::thread::spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    if let Some(active) = scheduler.active_indices() {
                        assert_eq!(active.len(), 1_000);
                    }
                }
            });
            (handle, stop)
        };

        for i in 0..20 {
            let cam = CameraSnapshot::new(Vec3::new(i as f32, 0.0, 0.0), Vec3::Z);
            scheduler.sort_blocking(&cam).unwrap();
            scheduler.begin_frame();
        }

        reader.1.store(true, Ordering::Relaxed);
        reader.0.join().unwrap();
    }
}
