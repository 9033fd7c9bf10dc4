// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

mod convert;
mod handles;
mod timers;

pub use convert::{js_to_json, json_to_js};
pub use handles::{HandleTable, NativeTable, ObjectCache, ScriptHandle};
pub use timers::TimerQueue;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use boa_engine::job::{FutureJob, JobQueue, NativeJob};
use boa_engine::{Context, JsResult, JsValue, Source};
use boa_gc::{Finalize, Trace};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use parking_lot::Mutex;

///
/// A single-worker event loop owning a boa `Context`.
///
/// The `Context` is `!Send`, which makes the central invariant of this system structural: the
/// script runtime can only ever be touched from the worker thread. All other threads interact
/// with the runtime by enqueueing macrotasks via `run_on_loop`; each macrotask receives a `Scope`
/// that wraps the context together with the loop-owned lookup tables.
///
/// The handle is cheap to clone and shareable across threads. Macrotasks submitted from a single
/// caller execute in submission order; ordering across callers is unspecified.
///
#[derive(Clone)]
pub struct EventLoop {
    sender: Sender<Job>,
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    stopped: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

enum Job {
    Task(Box<dyn FnOnce(&mut Scope) + Send + 'static>),
    Release(u64),
    Stop,
}

impl EventLoop {
    ///
    /// Spawn the worker thread and block until its runtime has initialized, so that construction
    /// failures surface here rather than as dead-on-arrival dispatches.
    ///
    pub fn spawn(name: &str) -> Result<EventLoop, String> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let (startup_sender, startup_receiver) = crossbeam_channel::bounded(1);
        let worker = thread::Builder::new()
            .name(format!("{name}-evloop"))
            .spawn({
                let sender = sender.clone();
                move || run_worker(receiver, sender, startup_sender)
            })
            .map_err(|e| format!("Failed to spawn event loop thread: {e}"))?;

        let inner = Arc::new(Inner {
            name: name.to_owned(),
            stopped: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        });

        match startup_receiver.recv() {
            Ok(Ok(())) => Ok(EventLoop { sender, inner }),
            Ok(Err(e)) => Err(format!("Failed to initialize the script runtime: {e}")),
            Err(_) => Err("Event loop thread exited during startup".to_owned()),
        }
    }

    ///
    /// Enqueue a macrotask. Acceptance is decided synchronously: false means the loop has stopped
    /// (or is stopping) and the task will never run.
    ///
    pub fn run_on_loop<F: FnOnce(&mut Scope) + Send + 'static>(&self, f: F) -> bool {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return false;
        }
        self.sender.send(Job::Task(Box::new(f))).is_ok()
    }

    ///
    /// Request shutdown. Idempotent and non-blocking: tasks already queued may still run, tasks
    /// submitted afterward are refused, and the worker exits once the queue is drained up to the
    /// stop marker. Use `join` to wait for the worker.
    ///
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            debug!("event loop {} stopping", self.inner.name);
            let _ = self.sender.send(Job::Stop);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    ///
    /// Wait for the worker thread to exit. Must not be called from the worker itself.
    ///
    pub fn join(&self) {
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

///
/// The loop-owned state shared by every macrotask and native callback: the script-value handle
/// table, the host-value table, the per-host-object wrapper cache, the timer queue, and the job
/// sender (for re-entrant enqueues and handle releases).
///
/// Deliberately `!Send`: it can only be cloned into native callbacks installed on the worker.
///
#[derive(Clone)]
pub struct LoopShared {
    handles: HandleTable,
    natives: NativeTable,
    objects: ObjectCache,
    timers: TimerQueue,
    sender: Sender<Job>,
}

impl LoopShared {
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn natives(&self) -> &NativeTable {
        &self.natives
    }

    pub fn objects(&self) -> &ObjectCache {
        &self.objects
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    ///
    /// Enqueue a macrotask from the worker itself, bypassing any upstream lifecycle gating. Used
    /// as the settlement fallback when the submitting facade has stopped but the loop survives.
    ///
    pub fn enqueue<F: FnOnce(&mut Scope) + Send + 'static>(&self, f: F) -> bool {
        self.sender.send(Job::Task(Box::new(f))).is_ok()
    }

    fn release_sender(&self) -> Sender<Job> {
        self.sender.clone()
    }
}

///
/// The sole doorway to the script runtime, handed to macrotasks and reconstructible inside native
/// callbacks via `Scope::new`.
///
pub struct Scope<'a> {
    pub context: &'a mut Context,
    shared: &'a LoopShared,
}

impl<'a> Scope<'a> {
    pub fn new(context: &'a mut Context, shared: &'a LoopShared) -> Scope<'a> {
        Scope { context, shared }
    }

    pub fn shared(&self) -> &LoopShared {
        self.shared
    }

    pub fn handles(&self) -> &HandleTable {
        &self.shared.handles
    }

    pub fn natives(&self) -> &NativeTable {
        &self.shared.natives
    }

    pub fn objects(&self) -> &ObjectCache {
        &self.shared.objects
    }

    ///
    /// Evaluate a script source, attributing errors to the given name.
    ///
    pub fn eval(&mut self, name: &str, source: &str) -> JsResult<JsValue> {
        let source = Source::from_reader(source.as_bytes(), Some(Path::new(name)));
        let result = self.context.eval(source);
        self.context.run_jobs();
        result
    }

    ///
    /// Pin a script value into the loop-owned table and return a Send handle for it. The value
    /// stays alive until the last clone of the handle drops (the release is delivered to the
    /// worker as a queued job, so it is best-effort during shutdown).
    ///
    pub fn register(&self, value: JsValue) -> ScriptHandle {
        let id = self.shared.handles.insert(value);
        ScriptHandle::new(id, self.shared.release_sender())
    }

    pub fn resolve(&self, handle: &ScriptHandle) -> Option<JsValue> {
        self.shared.handles.get(handle.id())
    }
}

///
/// Captures wrapper for boa native-function closures whose contents are host-only types. The GC
/// does not manage anything reachable through it; any script values referenced through it are
/// kept rooted by the host-side tables.
///
pub struct HostCaptures<T>(pub T);

impl<T> Finalize for HostCaptures<T> {}

// SAFETY: `HostCaptures` never contains garbage-collected types; there is nothing to trace.
unsafe impl<T> Trace for HostCaptures<T> {
    boa_gc::empty_trace!();
}

///
/// A FIFO promise-job queue. Jobs are run to completion after each macrotask and after each timer
/// batch; a job that raises does not abort the drain.
///
#[derive(Default)]
struct FifoJobQueue {
    jobs: RefCell<VecDeque<NativeJob>>,
}

impl JobQueue for FifoJobQueue {
    fn enqueue_promise_job(&self, job: NativeJob, _context: &mut Context) {
        self.jobs.borrow_mut().push_back(job);
    }

    fn run_jobs(&self, context: &mut Context) {
        loop {
            let job = self.jobs.borrow_mut().pop_front();
            let Some(job) = job else {
                break;
            };
            if let Err(e) = job.call(context) {
                debug!("unhandled promise job error: {e}");
            }
        }
    }

    fn enqueue_future_job(&self, _future: FutureJob, _context: &mut Context) {
        // Nothing in this embedding produces future jobs.
        warn!("future jobs are not supported by this event loop");
    }
}

fn run_worker(
    receiver: Receiver<Job>,
    sender: Sender<Job>,
    startup_sender: Sender<Result<(), String>>,
) {
    let mut context = match Context::builder()
        .job_queue(Rc::new(FifoJobQueue::default()))
        .build()
    {
        Ok(context) => context,
        Err(e) => {
            let _ = startup_sender.send(Err(e.to_string()));
            return;
        }
    };

    let shared = LoopShared {
        handles: HandleTable::new(),
        natives: NativeTable::new(),
        objects: ObjectCache::new(),
        timers: TimerQueue::new(),
        sender,
    };

    if let Err(e) = timers::install(&mut context, &shared) {
        let _ = startup_sender.send(Err(e.to_string()));
        return;
    }
    let _ = startup_sender.send(Ok(()));

    loop {
        let received = match shared.timers.next_deadline() {
            Some(deadline) => match receiver.recv_deadline(deadline) {
                Ok(job) => Some(job),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(job) => Some(job),
                Err(_) => break,
            },
        };

        match received {
            Some(Job::Task(task)) => {
                {
                    let mut scope = Scope::new(&mut context, &shared);
                    task(&mut scope);
                }
                context.run_jobs();
            }
            Some(Job::Release(id)) => {
                shared.handles.release(id);
            }
            Some(Job::Stop) => break,
            None => {
                fire_due_timers(&mut context, &shared);
            }
        }
    }
    trace!("event loop worker exiting");
    // Dropping the receiver here discards any tasks that were queued behind the stop marker;
    // their result channels disconnect, which callers observe as loop termination.
}

fn fire_due_timers(context: &mut Context, shared: &LoopShared) {
    for timer in shared.timers.pop_due(Instant::now()) {
        if let Err(e) = timer.fire(context) {
            debug!("timer callback raised: {e}");
        }
        context.run_jobs();
        shared.timers.reschedule(timer, Instant::now());
    }
}
