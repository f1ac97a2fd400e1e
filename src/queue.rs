//! Prioritised path request queue drained under a per-tick time budget.
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Arc,
    },
    time::{Duration, Instant},
};

use bevy::{log, math::Vec3, prelude::Resource};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use rustc_hash::FxHashSet;

use crate::{
    agent::AgentId,
    grid::NavigationGrid,
    path::{PathError, PathResult},
    pathfind::{find_path, validate_endpoints, PathQuery},
    settings::NavigationSettings,
};

/// Identifies a submitted request. Ids increase in submission order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Service tier of a request. Higher tiers are always served first.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumIter, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-request constraints. Unset values fall back to the navigation settings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathOptions {
    pub agent_radius: Option<f32>,
    /// Steepest node slope in degrees the agent may step on.
    pub max_slope: Option<f32>,
    /// When set, only nodes in these biomes may be entered.
    pub allowed_biomes: Option<FxHashSet<String>>,
    pub priority: Priority,
}

impl PathOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_agent_radius(mut self, radius: f32) -> Self {
        self.agent_radius = Some(radius);
        self
    }

    pub fn with_max_slope(mut self, degrees: f32) -> Self {
        self.max_slope = Some(degrees);
        self
    }

    pub fn with_allowed_biomes<I, S>(mut self, biomes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_biomes = Some(biomes.into_iter().map(Into::into).collect());
        self
    }
}

/// A path request waiting to be served, paired with the [`PathTicket`] its result goes to.
#[derive(Debug)]
pub struct PathRequest {
    query: PathQuery,
    completion: Sender<PathResult>,
    cancelled: Arc<AtomicBool>,
}

impl PathRequest {
    /// Creates a request and the ticket its result will be delivered to.
    pub fn new(agent: AgentId, start: Vec3, goal: Vec3, options: PathOptions) -> (Self, PathTicket) {
        let (completion, receiver) = crossbeam_channel::bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        let request = PathRequest {
            query: PathQuery {
                request: RequestId::default(),
                agent,
                start,
                goal,
                options,
            },
            completion,
            cancelled: cancelled.clone(),
        };

        let ticket = PathTicket {
            receiver,
            cancelled,
            result: None,
        };

        (request, ticket)
    }

    pub fn priority(&self) -> Priority {
        self.query.options.priority
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Relaxed)
    }

    /// Delivers the result. Consumes the request so it can only happen once.
    fn resolve(self, result: PathResult) {
        if self.completion.send(result).is_err() {
            log::debug!("Path request {:?} was abandoned by its caller", self.query.request);
        }
    }

    fn fail(self, error: PathError) {
        let result = PathResult::failure(self.query.request, self.query.agent, error);
        self.resolve(result);
    }
}

/// The caller's half of a path request.
#[derive(Debug)]
pub struct PathTicket {
    receiver: Receiver<PathResult>,
    cancelled: Arc<AtomicBool>,
    result: Option<PathResult>,
}

impl PathTicket {
    /// The result, if the request has been resolved.
    pub fn try_result(&mut self) -> Option<&PathResult> {
        if self.result.is_none() {
            match self.receiver.try_recv() {
                Ok(result) => self.result = Some(result),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }

        self.result.as_ref()
    }

    pub fn is_resolved(&mut self) -> bool {
        self.try_result().is_some()
    }

    /// Blocks until the result arrives. Returns `None` if the request was dropped unresolved.
    ///
    /// The queue is drained on the simulation tick, so only call this from another thread.
    pub fn wait(mut self) -> Option<PathResult> {
        self.result.take().or_else(|| self.receiver.recv().ok())
    }

    /// Like [`PathTicket::wait`] but gives up after `timeout`.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<&PathResult> {
        if self.result.is_none() {
            match self.receiver.recv_timeout(timeout) {
                Ok(result) => self.result = Some(result),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }

        self.result.as_ref()
    }

    /// Asks the queue to drop the request. A request that is already being searched still
    /// completes; any other is resolved with [`PathError::Cancelled`] without searching.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Relaxed)
    }
}

/// Heap entry ordering requests by priority, then by arrival.
struct QueuedRequest(PathRequest);

impl QueuedRequest {
    fn key(&self) -> (Priority, RequestId) {
        (self.0.priority(), self.0.query.request)
    }
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        let (priority, id) = self.key();
        let (other_priority, other_id) = other.key();

        // Max-heap: higher priority first, then the earlier arrival.
        match priority.cmp(&other_priority) {
            Ordering::Equal => other_id.cmp(&id),
            s => s,
        }
    }
}

/// What a single [`PathRequestQueue::drain`] pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Requests resolved this pass, in the order they were served.
    pub resolved: Vec<RequestId>,
    /// Requests still queued for the next pass.
    pub remaining: usize,
    pub elapsed: Duration,
    /// The pass stopped because the tick budget ran out with work left.
    pub budget_exhausted: bool,
    /// Another pass was already in progress so this one did nothing.
    pub busy: bool,
}

/// `PathRequestQueue` buffers path requests and serves them in priority order.
///
/// Requests are validated on submission; ones that can never succeed are resolved
/// immediately and never queued. [`PathRequestQueue::drain`] serves queued requests until
/// the queue is empty or the tick budget is spent; the rest wait for the next tick.
///
/// The queue holds no configuration of its own. Bounds and budgets are read from the
/// [`NavigationSettings`] passed to each call.
#[derive(Resource)]
pub struct PathRequestQueue {
    pending: BinaryHeap<QueuedRequest>,
    next_id: u64,
    draining: bool,
}

impl Default for PathRequestQueue {
    fn default() -> Self {
        PathRequestQueue {
            pending: BinaryHeap::new(),
            next_id: 1,
            draining: false,
        }
    }
}

/// Marks a drain pass in progress and clears the mark when dropped, unwinding included.
struct DrainGuard<'a>(&'a mut bool);

impl<'a> DrainGuard<'a> {
    fn hold(flag: &'a mut bool) -> Option<Self> {
        if *flag {
            return None;
        }
        *flag = true;
        Some(DrainGuard(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}

impl PathRequestQueue {
    pub fn new() -> Self {
        PathRequestQueue::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Validates and enqueues a request, returning the id it was assigned.
    pub fn submit(
        &mut self,
        grid: &NavigationGrid,
        settings: &NavigationSettings,
        mut request: PathRequest,
    ) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        request.query.request = id;

        if request.is_cancelled() {
            request.fail(PathError::Cancelled);
            return id;
        }

        if let Err(error) = validate_endpoints(grid, request.query.start, request.query.goal) {
            log::debug!("Rejected path request {:?} on submission: {}", id, error);
            request.fail(error);
            return id;
        }

        if let Some(max) = settings.queue.max_queued_requests {
            if self.pending.len() >= max {
                log::warn!("Path request queue is full ({} requests), rejecting {:?}", max, id);
                request.fail(PathError::QueueFull);
                return id;
            }
        }

        self.pending.push(QueuedRequest(request));
        id
    }

    /// Creates, submits and returns the ticket for a request in one go.
    pub fn request(
        &mut self,
        grid: &NavigationGrid,
        settings: &NavigationSettings,
        agent: AgentId,
        start: Vec3,
        goal: Vec3,
        options: PathOptions,
    ) -> PathTicket {
        let (request, ticket) = PathRequest::new(agent, start, goal, options);
        self.submit(grid, settings, request);
        ticket
    }

    /// Serves queued requests in order until the queue is empty or `settings.queue.tick_budget`
    /// is spent.
    ///
    /// The exclusive borrow already rules out a nested drain of the same queue. The in-progress
    /// flag is what [`PathRequestQueue::is_draining`] reports, and it is cleared even if a
    /// search panics.
    pub fn drain(&mut self, grid: &NavigationGrid, settings: &NavigationSettings) -> DrainReport {
        let Some(_guard) = DrainGuard::hold(&mut self.draining) else {
            return DrainReport {
                remaining: self.pending.len(),
                busy: true,
                ..Default::default()
            };
        };

        let budget = settings.queue.tick_budget;
        let started = Instant::now();
        let mut report = DrainReport::default();

        while !self.pending.is_empty() {
            if started.elapsed() >= budget {
                report.budget_exhausted = true;
                break;
            }

            let Some(QueuedRequest(request)) = self.pending.pop() else {
                break;
            };
            let id = request.query.request;

            if request.is_cancelled() {
                request.fail(PathError::Cancelled);
            } else {
                let result = find_path(grid, settings, &request.query);
                request.resolve(result);
            }

            report.resolved.push(id);
        }

        report.remaining = self.pending.len();
        report.elapsed = started.elapsed();

        if report.budget_exhausted {
            log::debug!(
                "Path queue budget spent after {} requests, {} left",
                report.resolved.len(),
                report.remaining
            );
        }

        report
    }

    /// Resolves every queued request as cancelled.
    pub fn clear(&mut self) {
        for QueuedRequest(request) in self.pending.drain() {
            request.fail(PathError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::{Bounds, HeightfieldTerrain, Terrain};
    use bevy::math::Vec2;

    fn flat_grid() -> NavigationGrid {
        let mut field = HeightfieldTerrain::flat(Vec2::ZERO, 21, 21, 1.0, 0.0);
        field.set_walkable_region(Bounds::new(Vec2::splat(18.0), Vec2::splat(20.0)), false);
        let terrain = Terrain::new(field);
        let mut grid = NavigationGrid::default();
        grid.generate(&terrain, Bounds::new(Vec2::ZERO, Vec2::splat(20.0)));
        grid
    }

    fn options(priority: Priority) -> PathOptions {
        PathOptions::default().with_priority(priority)
    }

    fn goal() -> Vec3 {
        Vec3::new(10.0, 0.0, 10.0)
    }

    fn enqueue(
        queue: &mut PathRequestQueue,
        grid: &NavigationGrid,
        settings: &NavigationSettings,
        agent: u64,
        priority: Priority,
    ) -> PathTicket {
        queue.request(grid, settings, AgentId(agent), Vec3::ZERO, goal(), options(priority))
    }

    #[test]
    fn test_priority_then_arrival_order() {
        let grid = flat_grid();
        let settings = NavigationSettings::default();
        let mut queue = PathRequestQueue::default();

        let mut submitted = vec![];
        for priority in [
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Normal,
            Priority::High,
            Priority::Low,
        ] {
            let (request, ticket) =
                PathRequest::new(AgentId(1), Vec3::ZERO, goal(), options(priority));
            let id = queue.submit(&grid, &settings, request);
            submitted.push((id, priority, ticket));
        }
        assert_eq!(queue.len(), 6);

        let report = queue.drain(&grid, &settings);

        let mut expected = vec![];
        for tier in [Priority::High, Priority::Normal, Priority::Low] {
            expected.extend(submitted.iter().filter(|s| s.1 == tier).map(|s| s.0));
        }
        assert_eq!(report.resolved, expected);
        assert_eq!(report.remaining, 0);
        assert!(!report.budget_exhausted);

        for (id, _, mut ticket) in submitted {
            let result = ticket.try_result().unwrap();
            assert_eq!(result.request, id);
            assert!(result.is_success());
        }
    }

    #[test]
    fn test_invalid_requests_never_enter_queue() {
        let grid = flat_grid();
        let settings = NavigationSettings::default();
        let mut queue = PathRequestQueue::default();

        let mut off_grid = queue.request(
            &grid,
            &settings,
            AgentId(1),
            Vec3::ZERO,
            Vec3::new(100.0, 0.0, 0.0),
            PathOptions::default(),
        );
        let mut blocked = queue.request(
            &grid,
            &settings,
            AgentId(1),
            Vec3::ZERO,
            Vec3::new(20.0, 0.0, 20.0),
            PathOptions::default(),
        );

        assert!(queue.is_empty());
        assert_eq!(off_grid.try_result().unwrap().error, Some(PathError::NoGridCoverage));
        assert_eq!(blocked.try_result().unwrap().error, Some(PathError::NotWalkable));
    }

    #[test]
    fn test_budget_keeps_requests_queued() {
        let grid = flat_grid();
        let mut settings = NavigationSettings::default();
        settings.queue.tick_budget = Duration::ZERO;
        let mut queue = PathRequestQueue::new();

        let mut ticket = enqueue(&mut queue, &grid, &settings, 1, Priority::Normal);

        let report = queue.drain(&grid, &settings);
        assert!(report.resolved.is_empty());
        assert!(report.budget_exhausted);
        assert_eq!(report.remaining, 1);
        assert!(!ticket.is_resolved());

        settings.queue.tick_budget = Duration::from_secs(1);
        let report = queue.drain(&grid, &settings);
        assert_eq!(report.resolved.len(), 1);
        assert!(ticket.is_resolved());
    }

    #[test]
    fn test_drain_is_not_reentrant() {
        let grid = flat_grid();
        let settings = NavigationSettings::default();
        let mut queue = PathRequestQueue::default();
        let mut ticket = enqueue(&mut queue, &grid, &settings, 1, Priority::Normal);

        queue.draining = true;
        let report = queue.drain(&grid, &settings);
        assert!(report.busy);
        assert_eq!(report.remaining, 1);
        assert!(!ticket.is_resolved());

        queue.draining = false;
        assert!(!queue.drain(&grid, &settings).busy);
        assert!(ticket.is_resolved());
    }

    #[test]
    fn test_draining_flag_clears_after_panic() {
        let mut queue = PathRequestQueue::new();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = DrainGuard::hold(&mut queue.draining);
            panic!("search blew up mid-drain");
        }));

        assert!(outcome.is_err());
        assert!(!queue.is_draining());
        assert!(DrainGuard::hold(&mut queue.draining).is_some());
        assert!(!queue.is_draining());
    }

    #[test]
    fn test_bounded_queue_rejects_newest() {
        let grid = flat_grid();
        let mut settings = NavigationSettings::default();
        settings.queue.max_queued_requests = Some(1);
        let mut queue = PathRequestQueue::new();

        let mut first = enqueue(&mut queue, &grid, &settings, 1, Priority::Normal);
        let mut second = enqueue(&mut queue, &grid, &settings, 2, Priority::High);

        assert_eq!(queue.len(), 1);
        assert!(!first.is_resolved());
        assert_eq!(second.try_result().unwrap().error, Some(PathError::QueueFull));
    }

    #[test]
    fn test_cancelled_requests_skip_search() {
        let grid = flat_grid();
        let settings = NavigationSettings::default();
        let mut queue = PathRequestQueue::default();

        let mut ticket = enqueue(&mut queue, &grid, &settings, 1, Priority::Normal);
        ticket.cancel();
        assert!(ticket.is_cancelled());

        let report = queue.drain(&grid, &settings);
        assert_eq!(report.resolved.len(), 1);

        let result = ticket.try_result().unwrap();
        assert_eq!(result.error, Some(PathError::Cancelled));
        assert_eq!(result.nodes_expanded, 0);
    }

    #[test]
    fn test_same_agent_requests_while_busy() {
        let grid = flat_grid();
        let settings = NavigationSettings::default();
        let mut queue = PathRequestQueue::default();

        // Something is already queued ahead of the agent.
        let mut backlog = enqueue(&mut queue, &grid, &settings, 9, Priority::High);
        let mut first = enqueue(&mut queue, &grid, &settings, 1, Priority::Normal);
        let mut second = queue.request(
            &grid,
            &settings,
            AgentId(1),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 12.0),
            options(Priority::Normal),
        );

        queue.draining = true;
        assert!(queue.drain(&grid, &settings).busy);
        queue.draining = false;

        let report = queue.drain(&grid, &settings);
        assert_eq!(report.resolved, vec![RequestId(1), RequestId(2), RequestId(3)]);
        assert!(backlog.is_resolved());
        assert_eq!(first.try_result().unwrap().request, RequestId(2));
        assert_eq!(second.try_result().unwrap().request, RequestId(3));
    }

    #[test]
    fn test_dropped_ticket_is_harmless() {
        let grid = flat_grid();
        let settings = NavigationSettings::default();
        let mut queue = PathRequestQueue::default();

        drop(enqueue(&mut queue, &grid, &settings, 1, Priority::Normal));

        let report = queue.drain(&grid, &settings);
        assert_eq!(report.resolved.len(), 1);
    }

    #[test]
    fn test_clear_resolves_as_cancelled() {
        let grid = flat_grid();
        let settings = NavigationSettings::default();
        let mut queue = PathRequestQueue::default();
        let ticket = enqueue(&mut queue, &grid, &settings, 1, Priority::Normal);

        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(ticket.wait().unwrap().error, Some(PathError::Cancelled));
    }

    #[test]
    fn test_options_builder() {
        let options = PathOptions::default()
            .with_priority(Priority::Low)
            .with_agent_radius(1.5)
            .with_max_slope(20.0)
            .with_allowed_biomes(["plains", "forest"]);

        assert_eq!(options.priority, Priority::Low);
        assert_eq!(options.agent_radius, Some(1.5));
        assert_eq!(options.max_slope, Some(20.0));
        assert!(options.allowed_biomes.unwrap().contains("forest"));
        assert_eq!(Priority::High.to_string(), "high");
        assert!(Priority::High > Priority::Normal && Priority::Normal > Priority::Low);
    }
}
