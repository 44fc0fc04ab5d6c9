//! Flush scheduling strategies.
//!
//! A world never flushes on its own: after every mutation outside a batch it
//! hands a [`FlushTask`] to its [`Scheduler`], which decides *when* the task
//! runs and returns a [`FlushFuture`] that settles with the outcome.
//!
//! | Scheduler              | When the flush runs                              |
//! |------------------------|--------------------------------------------------|
//! | [`ImmediateScheduler`] | synchronously, inside the mutating call          |
//! | [`MicrotaskScheduler`] | on the next turn of the local task queue         |
//! | [`FrameScheduler`]     | on the next frame (host hook or fixed-delay timer) |
//!
//! The deferred schedulers coalesce: the first `schedule` in an idle period
//! opens one pending flush and every further call before it fires receives
//! the same shared future. Both spawn onto the current tokio [`LocalSet`],
//! so worlds using them must live inside one.
//!
//! [`LocalSet`]: tokio::task::LocalSet

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{self, LocalBoxFuture, Shared};
use tracing::{error, trace};

use crate::error::WorldError;

/// One flush, ready to run.
pub type FlushTask = Box<dyn FnOnce() -> Result<(), WorldError>>;

/// Cloneable handle to the outcome of a (possibly still pending) flush.
pub type FlushFuture = Shared<LocalBoxFuture<'static, Result<(), WorldError>>>;

/// Work handed to a host frame hook.
pub type FrameJob = Box<dyn FnOnce()>;

/// Default frame interval: roughly one frame at 60 Hz.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Decides when flushes run.
pub trait Scheduler {
    /// Arrange for `task` to run. Implementations may drop `task` when an
    /// equivalent flush is already pending.
    fn schedule(&self, task: FlushTask) -> FlushFuture;

    /// A future that settles once no flush is pending.
    fn when_idle(&self) -> FlushFuture;

    /// Short name for logs.
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// An already-settled [`FlushFuture`].
#[must_use]
pub fn settled(result: Result<(), WorldError>) -> FlushFuture {
    future::ready(result).boxed_local().shared()
}

struct ResetOnDrop<'a>(&'a Cell<bool>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Runs every task synchronously. A `schedule` issued while a task is
/// running is a no-op; the running flush picks up the new mutations.
#[derive(Debug, Default)]
pub struct ImmediateScheduler {
    running: Cell<bool>,
}

impl ImmediateScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, task: FlushTask) -> FlushFuture {
        if self.running.get() {
            trace!("nested schedule ignored");
            return settled(Ok(()));
        }
        self.running.set(true);
        let _guard = ResetOnDrop(&self.running);
        settled(task())
    }

    fn when_idle(&self) -> FlushFuture {
        settled(Ok(()))
    }

    fn name(&self) -> &'static str {
        "immediate"
    }
}

/// Shared bookkeeping of the deferred schedulers: at most one pending flush.
#[derive(Default)]
struct PendingFlush {
    slot: Rc<RefCell<Option<FlushFuture>>>,
}

impl PendingFlush {
    fn schedule(&self, task: FlushTask, dispatch: impl FnOnce(FrameJob)) -> FlushFuture {
        if let Some(pending) = self.slot.borrow().as_ref() {
            return pending.clone();
        }

        let (tx, rx) = oneshot::channel();
        let slot = Rc::clone(&self.slot);
        let job: FrameJob = Box::new(move || {
            // Reopen before running so mutations made by the flush's own
            // observers schedule a fresh flush.
            slot.borrow_mut().take();
            let result = task();
            if let Err(err) = &result {
                error!(error = %err, "deferred flush failed");
            }
            let _ = tx.send(result);
        });
        let pending = async move { rx.await.unwrap_or(Ok(())) }
            .boxed_local()
            .shared();
        *self.slot.borrow_mut() = Some(pending.clone());
        dispatch(job);
        pending
    }

    fn when_idle(&self) -> FlushFuture {
        self.slot
            .borrow()
            .clone()
            .unwrap_or_else(|| settled(Ok(())))
    }

    fn is_pending(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

impl fmt::Debug for PendingFlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFlush")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Coalesces flushes onto the next turn of the local task queue.
///
/// # Panics
///
/// `schedule` panics when called outside a tokio [`LocalSet`](tokio::task::LocalSet).
#[derive(Debug, Default)]
pub struct MicrotaskScheduler {
    pending: PendingFlush,
}

impl MicrotaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for MicrotaskScheduler {
    fn schedule(&self, task: FlushTask) -> FlushFuture {
        self.pending.schedule(task, |job| {
            tokio::task::spawn_local(async move { job() });
        })
    }

    fn when_idle(&self) -> FlushFuture {
        self.pending.when_idle()
    }

    fn name(&self) -> &'static str {
        "microtask"
    }
}

/// Coalesces flushes onto the next frame.
///
/// The frame source is, in order of preference: a host-supplied
/// `request_frame` hook, a tokio timer of `interval` when a runtime is
/// current, or nothing at all, in which case the flush runs immediately.
///
/// # Panics
///
/// With no hook installed, `schedule` panics when a tokio runtime is current
/// but the caller is outside a [`LocalSet`](tokio::task::LocalSet).
pub struct FrameScheduler {
    interval: Duration,
    request_frame: Option<Rc<dyn Fn(FrameJob)>>,
    pending: PendingFlush,
}

impl FrameScheduler {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            request_frame: None,
            pending: PendingFlush::default(),
        }
    }

    /// Let the host drive frames. The hook must call the job exactly once.
    #[must_use]
    pub fn with_request_frame(mut self, hook: impl Fn(FrameJob) + 'static) -> Self {
        self.request_frame = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn request(&self, job: FrameJob) {
        if let Some(hook) = &self.request_frame {
            hook(job);
        } else if tokio::runtime::Handle::try_current().is_ok() {
            let interval = self.interval;
            tokio::task::spawn_local(async move {
                tokio::time::sleep(interval).await;
                job();
            });
        } else {
            job();
        }
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}

impl Scheduler for FrameScheduler {
    fn schedule(&self, task: FlushTask) -> FlushFuture {
        self.pending.schedule(task, |job| self.request(job))
    }

    fn when_idle(&self) -> FlushFuture {
        self.pending.when_idle()
    }

    fn name(&self) -> &'static str {
        "frame"
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("interval", &self.interval)
            .field("request_frame", &self.request_frame.is_some())
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use tokio::task::LocalSet;

    use super::*;

    fn counting(runs: &Rc<Cell<usize>>) -> FlushTask {
        let runs = Rc::clone(runs);
        Box::new(move || {
            runs.set(runs.get() + 1);
            Ok(())
        })
    }

    #[test]
    fn test_immediate_runs_synchronously() {
        let scheduler = ImmediateScheduler::new();
        let runs = Rc::new(Cell::new(0));
        let outcome = scheduler.schedule(counting(&runs));
        assert_eq!(runs.get(), 1);
        assert!(matches!(outcome.now_or_never(), Some(Ok(()))));
    }

    #[test]
    fn test_immediate_nested_schedule_is_a_no_op() {
        let scheduler = Rc::new(ImmediateScheduler::new());
        let runs = Rc::new(Cell::new(0));
        let inner_scheduler = Rc::clone(&scheduler);
        let inner_runs = Rc::clone(&runs);
        let _ = scheduler.schedule(Box::new(move || {
            let _ = inner_scheduler.schedule(counting(&inner_runs));
            Ok(())
        }));
        assert_eq!(runs.get(), 0);

        // The guard is released afterwards.
        let _ = scheduler.schedule(counting(&runs));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_immediate_surfaces_errors() {
        let scheduler = ImmediateScheduler::new();
        let outcome = scheduler.schedule(Box::new(|| {
            Err(WorldError::UnboundedFlush {
                waves: 3,
                last_system: "loop".to_string(),
            })
        }));
        assert!(matches!(
            outcome.now_or_never(),
            Some(Err(WorldError::UnboundedFlush { waves: 3, .. }))
        ));
    }

    #[tokio::test]
    async fn test_microtask_coalesces_into_one_flush() {
        LocalSet::new()
            .run_until(async {
                let scheduler = MicrotaskScheduler::new();
                let runs = Rc::new(Cell::new(0));
                let first = scheduler.schedule(counting(&runs));
                let second = scheduler.schedule(counting(&runs));
                assert_eq!(runs.get(), 0);
                assert!(scheduler.pending.is_pending());

                first.await.unwrap();
                second.await.unwrap();
                assert_eq!(runs.get(), 1);
                assert!(!scheduler.pending.is_pending());

                // A new idle period opens a new flush.
                scheduler.schedule(counting(&runs)).await.unwrap();
                assert_eq!(runs.get(), 2);
            })
            .await;
    }

    #[tokio::test]
    async fn test_microtask_when_idle_tracks_pending_flush() {
        LocalSet::new()
            .run_until(async {
                let scheduler = MicrotaskScheduler::new();
                assert!(matches!(scheduler.when_idle().now_or_never(), Some(Ok(()))));

                let runs = Rc::new(Cell::new(0));
                let _ = scheduler.schedule(counting(&runs));
                scheduler.when_idle().await.unwrap();
                assert_eq!(runs.get(), 1);
            })
            .await;
    }

    #[test]
    fn test_frame_uses_host_hook() {
        let frames: Rc<RefCell<Vec<FrameJob>>> = Rc::default();
        let queued = Rc::clone(&frames);
        let scheduler = FrameScheduler::default()
            .with_request_frame(move |job| queued.borrow_mut().push(job));

        let runs = Rc::new(Cell::new(0));
        let first = scheduler.schedule(counting(&runs));
        let _second = scheduler.schedule(counting(&runs));
        assert_eq!(frames.borrow().len(), 1);
        assert_eq!(runs.get(), 0);

        let job = frames.borrow_mut().pop().unwrap();
        job();
        assert_eq!(runs.get(), 1);
        assert!(matches!(first.now_or_never(), Some(Ok(()))));
    }

    #[test]
    fn test_frame_without_runtime_runs_immediately() {
        let scheduler = FrameScheduler::default();
        let runs = Rc::new(Cell::new(0));
        let outcome = scheduler.schedule(counting(&runs));
        assert_eq!(runs.get(), 1);
        assert!(matches!(outcome.now_or_never(), Some(Ok(()))));
        assert!(!scheduler.pending.is_pending());
    }

    #[tokio::test]
    async fn test_frame_timer_defers_flush() {
        LocalSet::new()
            .run_until(async {
                let scheduler = FrameScheduler::new(Duration::from_millis(5));
                let runs = Rc::new(Cell::new(0));
                let outcome = scheduler.schedule(counting(&runs));
                tokio::task::yield_now().await;
                assert_eq!(runs.get(), 0);
                outcome.await.unwrap();
                assert_eq!(runs.get(), 1);
            })
            .await;
    }
}
