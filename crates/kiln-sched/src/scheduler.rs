//! The [`Scheduler`]: queueing, worker selection, dispatch, and result
//! delivery.
//!
//! A request flows: satisfy-filter over registered workers → preference
//! fold → preparing-resource window → optional prepare action (its call
//! must resolve before the work phase) → active-resource admission
//! (requeue if the worker got busy in between) → work action → result
//! delivery. Results arrive through [`WorkerReturn::return_result`] and
//! are stashed if they beat the waiter registration.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use kiln_types::{CallError, CallId, CallResult, SectorRef, TaskType};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::resources::{resource_table, TaskResources};
use crate::selector::WorkerSelector;
use crate::work::{WorkId, WorkState, WorkStatus, WorkTracker};
use crate::worker::{Worker, WorkerHandle, WorkerReturn};

/// Future returned by a worker action.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<CallId, CallError>> + Send>>;

/// An action run against the chosen worker (the prepare or work phase).
/// Actions may run more than once if the request is requeued.
pub type WorkerAction = Arc<dyn Fn(Arc<dyn Worker>) -> ActionFuture + Send + Sync>;

/// Callback receiving a scheduled request's final result, exactly once.
pub type ReturnCallback = Box<dyn FnOnce(CallResult) + Send>;

type WorkerId = u64;

struct TaskRequest {
    sector: SectorRef,
    task_type: TaskType,
    priority: u64,
    selector: Arc<dyn WorkerSelector>,
    prepare: Option<WorkerAction>,
    work: WorkerAction,
    callback: Mutex<Option<ReturnCallback>>,
}

impl TaskRequest {
    fn respond(&self, result: CallResult) {
        if let Some(cb) = self.callback.lock().expect("callback poisoned").take() {
            cb(result);
        }
    }
}

/// Extra callbacks coalesced onto an in-flight piece of work.
struct WorkEntry {
    waiters: Vec<ReturnCallback>,
}

/// Queues tasks, selects workers, dispatches, deduplicates identical
/// concurrent requests, and delivers results.
pub struct Scheduler {
    workers: Mutex<HashMap<WorkerId, Arc<WorkerHandle>>>,
    next_worker_id: AtomicU64,
    active_jobs: AtomicU64,
    queue: AsyncMutex<Vec<Arc<TaskRequest>>>,
    callbacks: Mutex<HashMap<CallId, oneshot::Sender<CallResult>>>,
    results: Mutex<HashMap<CallId, CallResult>>,
    works: Mutex<HashMap<WorkId, WorkEntry>>,
    tracker: WorkTracker,
}

impl Scheduler {
    /// Create a scheduler over the given work-state tracker, purging
    /// work states that never reached a worker.
    pub fn new(tracker: WorkTracker) -> Result<Arc<Self>, SchedulerError> {
        tracker.reset_works()?;
        Ok(Arc::new(Self {
            workers: Mutex::new(HashMap::new()),
            next_worker_id: AtomicU64::new(0),
            active_jobs: AtomicU64::new(0),
            queue: AsyncMutex::new(Vec::new()),
            callbacks: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            works: Mutex::new(HashMap::new()),
            tracker,
        }))
    }

    /// Register a worker and immediately offer it the queued requests.
    pub async fn add_worker(self: &Arc<Self>, worker: Arc<dyn Worker>) -> Result<(), SchedulerError> {
        let info = worker.info().await?;
        let handle = Arc::new(WorkerHandle::new(worker, info.clone()));
        let wid = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        self.workers
            .lock()
            .expect("workers poisoned")
            .insert(wid, handle);
        info!(wid, hostname = %info.hostname, "worker registered");
        self.free_worker(wid).await;
        Ok(())
    }

    /// Enqueue work.
    ///
    /// With a `work_id`, an identical pending/in-flight request is
    /// coalesced: exactly one execution runs and every caller's callback
    /// receives the same result. Without one, the request always runs.
    #[allow(clippy::too_many_arguments)]
    pub async fn schedule(
        self: &Arc<Self>,
        sector: SectorRef,
        task_type: TaskType,
        selector: Arc<dyn WorkerSelector>,
        prepare: Option<WorkerAction>,
        work: WorkerAction,
        callback: ReturnCallback,
        priority: u64,
        work_id: Option<WorkId>,
    ) -> Result<(), SchedulerError> {
        let mut work_action = work;
        let mut callback = callback;

        if let Some(wid) = work_id {
            let mut works = self.works.lock().expect("works poisoned");
            if let Some(entry) = works.get_mut(&wid) {
                debug!(work_id = %wid, "coalescing identical in-flight request");
                entry.waiters.push(callback);
                return Ok(());
            }

            // A persisted in-progress entry survives restarts: re-join
            // the running call instead of executing again.
            if let Some(state) = self.tracker.get(&wid)? {
                if state.status == WorkStatus::InProgress {
                    if let Some(call_id) = state.call_id {
                        drop(works);
                        debug!(work_id = %wid, %call_id, "re-joining in-progress work");
                        let sched = Arc::clone(self);
                        tokio::spawn(async move {
                            let result = sched.wait_result(call_id).await;
                            if let Err(e) = sched.tracker.remove(&wid) {
                                error!(work_id = %wid, error = %e, "dropping work state failed");
                            }
                            callback(result);
                        });
                        return Ok(());
                    }
                }
            }

            self.tracker.put(&WorkState {
                id: wid,
                status: WorkStatus::Start,
                call_id: None,
            })?;
            works.insert(
                wid,
                WorkEntry {
                    waiters: Vec::new(),
                },
            );
            drop(works);

            // Record the call id once the work is actually dispatched.
            let inner = work_action;
            let sched = Arc::clone(self);
            work_action = Arc::new(move |worker| {
                let fut = inner(worker);
                let sched = Arc::clone(&sched);
                Box::pin(async move {
                    let call_id = fut.await?;
                    let state = WorkState {
                        id: wid,
                        status: WorkStatus::InProgress,
                        call_id: Some(call_id),
                    };
                    if let Err(e) = sched.tracker.put(&state) {
                        error!(work_id = %wid, error = %e, "persisting work state failed");
                    }
                    Ok(call_id)
                }) as ActionFuture
            });

            // Fan the single execution's result out to every waiter.
            let primary = callback;
            let sched = Arc::clone(self);
            callback = Box::new(move |result: CallResult| {
                let waiters = {
                    let mut works = sched.works.lock().expect("works poisoned");
                    works.remove(&wid).map(|e| e.waiters).unwrap_or_default()
                };
                if let Err(e) = sched.tracker.remove(&wid) {
                    error!(work_id = %wid, error = %e, "dropping work state failed");
                }
                for waiter in waiters {
                    waiter(result.clone());
                }
                primary(result);
            });
        }

        let request = Arc::new(TaskRequest {
            sector,
            task_type,
            priority,
            selector,
            prepare,
            work: work_action,
            callback: Mutex::new(Some(callback)),
        });

        let mut queue = self.queue.lock().await;
        match self.maybe_schedule_request(&request).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(sector = %sector.id, task = %task_type, "no free worker, request queued");
                queue.push(request);
            }
            Err(e) => {
                if let Some(wid) = work_id {
                    self.abandon_work(&wid);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Deliver the result of a worker call. Called by workers (directly
    /// or via their return transport) exactly once per call.
    fn deliver(&self, call_id: CallId, result: CallResult) {
        let mut results = self.results.lock().expect("results poisoned");
        let mut callbacks = self.callbacks.lock().expect("callbacks poisoned");
        match callbacks.remove(&call_id) {
            Some(tx) => {
                drop(callbacks);
                drop(results);
                if tx.send(result).is_err() {
                    warn!(%call_id, "result receiver dropped");
                }
            }
            None => {
                debug!(%call_id, "stashing result that arrived before its waiter");
                results.insert(call_id, result);
            }
        }
    }

    /// Wait for a call's result, consuming a stashed one if it already
    /// arrived.
    async fn wait_result(&self, call_id: CallId) -> CallResult {
        let rx = {
            let mut results = self.results.lock().expect("results poisoned");
            if let Some(result) = results.remove(&call_id) {
                return result;
            }
            let (tx, rx) = oneshot::channel();
            self.callbacks
                .lock()
                .expect("callbacks poisoned")
                .insert(call_id, tx);
            rx
        };
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(CallError::new("result channel closed")),
        }
    }

    /// Drop a work entry whose request failed before dispatch, failing
    /// any waiters that coalesced onto it meanwhile.
    fn abandon_work(&self, wid: &WorkId) {
        let waiters = {
            let mut works = self.works.lock().expect("works poisoned");
            works.remove(wid).map(|e| e.waiters).unwrap_or_default()
        };
        if let Err(e) = self.tracker.remove(wid) {
            error!(work_id = %wid, error = %e, "dropping work state failed");
        }
        for waiter in waiters {
            waiter(Err(CallError::new("work abandoned before dispatch")));
        }
    }

    /// Try to find a worker for the request right now. `Ok(false)` means
    /// every satisfying worker is busy; the caller queues the request.
    async fn maybe_schedule_request(
        self: &Arc<Self>,
        request: &Arc<TaskRequest>,
    ) -> Result<bool, SchedulerError> {
        let workers: Vec<(WorkerId, Arc<WorkerHandle>)> = {
            let workers = self.workers.lock().expect("workers poisoned");
            workers.iter().map(|(id, h)| (*id, h.clone())).collect()
        };
        let worker_count = workers.len();
        let needs = resource_table(request.task_type, request.sector.proof_type);

        let mut acceptable = Vec::new();
        let mut tried = 0usize;
        for (wid, handle) in workers {
            if !request
                .selector
                .is_satisfying(request.task_type, request.sector.proof_type, &handle)
                .await?
            {
                continue;
            }
            tried += 1;

            // Both windows must admit the task: preparing guards the
            // prepare phase itself, active predicts whether the work
            // phase could start afterwards.
            let can_prepare = handle
                .preparing
                .lock()
                .expect("preparing window poisoned")
                .can_handle(&needs, &handle.info.resources)
                && handle
                    .active
                    .lock()
                    .expect("active window poisoned")
                    .can_handle(&needs, &handle.info.resources);
            if !can_prepare {
                // With a single idle worker there is nothing to wait
                // for; force-assign rather than stall the pipeline.
                let busy = worker_count > 1 || self.active_jobs.load(Ordering::SeqCst) > 0;
                if busy {
                    continue;
                }
            }

            acceptable.push((wid, handle));
        }

        if acceptable.is_empty() {
            if tried == 0 {
                return Err(SchedulerError::NotFoundWorker);
            }
            return Ok(false);
        }

        let mut best = acceptable.remove(0);
        for candidate in acceptable {
            if request
                .selector
                .is_preferred(request.task_type, &candidate.1, &best.1)
                .await
                .map_err(|e| SchedulerError::CannotSelectWorker(e.to_string()))?
            {
                best = candidate;
            }
        }

        self.assign_worker(best.0, best.1, Arc::clone(request), needs);
        Ok(true)
    }

    /// Run the request's prepare and work phases on the chosen worker.
    fn assign_worker(
        self: &Arc<Self>,
        wid: WorkerId,
        handle: Arc<WorkerHandle>,
        request: Arc<TaskRequest>,
        needs: TaskResources,
    ) {
        handle
            .preparing
            .lock()
            .expect("preparing window poisoned")
            .add(&handle.info.resources, &needs);

        let sched = Arc::clone(self);
        tokio::spawn(async move {
            // Prepare phase: lock/path acquisition happens here, outside
            // selector deliberation, so lock scope matches only the
            // actual computation.
            if let Some(prepare) = &request.prepare {
                let prepared = match prepare(handle.worker.clone()).await {
                    Ok(call_id) => sched.wait_result(call_id).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = prepared {
                    warn!(sector = %request.sector.id, task = %request.task_type,
                          error = %e, "prepare phase failed");
                    handle
                        .preparing
                        .lock()
                        .expect("preparing window poisoned")
                        .free(&handle.info.resources, &needs);
                    request.respond(Err(e));
                    sched.free_worker(wid).await;
                    return;
                }
            }

            let force = {
                let workers = sched.workers.lock().expect("workers poisoned");
                workers.len() == 1 && sched.active_jobs.load(Ordering::SeqCst) == 0
            };
            sched.active_jobs.fetch_add(1, Ordering::SeqCst);
            handle
                .preparing
                .lock()
                .expect("preparing window poisoned")
                .free(&handle.info.resources, &needs);

            let can_run = handle
                .active
                .lock()
                .expect("active window poisoned")
                .can_handle(&needs, &handle.info.resources);
            if !force && !can_run {
                debug!(wid, sector = %request.sector.id, task = %request.task_type,
                       "worker became busy after prepare, requeueing");
                sched.queue.lock().await.push(Arc::clone(&request));
                sched.active_jobs.fetch_sub(1, Ordering::SeqCst);
                sched.free_worker(wid).await;
                return;
            }
            handle
                .active
                .lock()
                .expect("active window poisoned")
                .add(&handle.info.resources, &needs);

            match (request.work)(handle.worker.clone()).await {
                Ok(call_id) => {
                    debug!(%call_id, task = %request.task_type, "work dispatched");
                    let result = sched.wait_result(call_id).await;
                    request.respond(result);
                }
                Err(e) => {
                    error!(sector = %request.sector.id, task = %request.task_type,
                           error = %e, "work dispatch failed");
                    request.respond(Err(e));
                }
            }

            handle
                .active
                .lock()
                .expect("active window poisoned")
                .free(&handle.info.resources, &needs);
            sched.active_jobs.fetch_sub(1, Ordering::SeqCst);
            sched.free_worker(wid).await;
        });
    }

    /// Offer a (newly registered or newly idle) worker the queued
    /// requests, highest priority first.
    async fn free_worker(self: &Arc<Self>, wid: WorkerId) {
        let handle = {
            let workers = self.workers.lock().expect("workers poisoned");
            workers.get(&wid).cloned()
        };
        let Some(handle) = handle else {
            warn!(wid, "free worker: unknown worker id");
            return;
        };

        let mut queue = self.queue.lock().await;
        queue.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut index = 0;
        while index < queue.len() {
            let request = Arc::clone(&queue[index]);
            match request
                .selector
                .is_satisfying(request.task_type, request.sector.proof_type, &handle)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    index += 1;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "queued request satisfaction check failed");
                    index += 1;
                    continue;
                }
            }

            match self.maybe_schedule_request(&request).await {
                Ok(true) => {
                    queue.remove(index);
                }
                Ok(false) => {
                    index += 1;
                }
                Err(e) => {
                    request.respond(Err(CallError::new(e.to_string())));
                    queue.remove(index);
                }
            }
        }
    }
}

impl WorkerReturn for Scheduler {
    fn return_result(&self, call_id: CallId, result: CallResult) {
        self.deliver(call_id, result);
    }
}
