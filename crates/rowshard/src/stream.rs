//! Ordered execution queues.
//!
//! A [`Stream`] runs submitted work strictly in submission order on its own worker thread.
//! Submitting returns immediately with a [`Pending`] handle; completion is observed only through
//! explicit waits ([`Pending::wait`], [`Stream::synchronize`], [`Event::wait`]). Dropping a stream
//! never blocks: queued work keeps draining on the worker after the last handle goes away.
//!
//! A job that panics poisons its stream, and so does a closure run through [`Stream::execute`].
//! Every job submitted after that point is discarded and its handle reports
//! [`StreamError::Aborted`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream {stream} aborted; queued work was discarded")]
    Aborted { stream: u64 },
}

/// Handle to an ordered execution queue. Clones share the same queue.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: u64,
    poisoned: Arc<AtomicBool>,
    backend: Backend,
}

enum Backend {
    Worker(Mutex<Sender<Job>>),
    /// Used when no worker thread could be started: jobs run on the submitting thread, one at a
    /// time, in submission order.
    Inline(Mutex<()>),
}

impl Stream {
    /// A stream backed by a dedicated worker thread.
    ///
    /// If the OS refuses to spawn the thread the stream degrades to [`Stream::inline`] behavior.
    pub fn new() -> Self {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let poisoned = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel::<Job>();

        let worker_poisoned = Arc::clone(&poisoned);
        let spawned = thread::Builder::new()
            .name(format!("rowshard-stream-{id}"))
            .spawn(move || run_worker(id, receiver, worker_poisoned));

        let backend = match spawned {
            Ok(_) => Backend::Worker(Mutex::new(sender)),
            Err(err) => {
                log::warn!("stream {id}: failed to spawn worker thread ({err}); running inline");
                Backend::Inline(Mutex::new(()))
            }
        };

        Self {
            inner: Arc::new(StreamInner {
                id,
                poisoned,
                backend,
            }),
        }
    }

    /// A stream that runs every job synchronously on the submitting thread.
    pub fn inline() -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
                poisoned: Arc::new(AtomicBool::new(false)),
                backend: Backend::Inline(Mutex::new(())),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::Acquire)
    }

    /// Queue `work` behind everything already submitted and return without waiting for it.
    pub fn enqueue<T, F>(&self, work: F) -> Pending<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        // On failure the job, and with it `sender`, is dropped, so the handle reports `Aborted`.
        let _ = self.submit(Box::new(move || {
            let _ = sender.send(work());
        }));
        Pending {
            receiver,
            stream: self.id(),
        }
    }

    /// Run `work` on the calling thread once every previously submitted job has finished.
    ///
    /// Jobs submitted while `work` runs wait until it returns, so `work` observes the stream as
    /// if it were a queued job. Unlike [`Stream::enqueue`], `work` may borrow from the caller.
    ///
    /// If `work` panics the stream is poisoned before the panic continues on the caller's thread.
    ///
    /// Calling this from a job running on the same stream deadlocks.
    pub fn execute<T>(&self, work: impl FnOnce() -> T) -> Result<T, StreamError> {
        match &self.inner.backend {
            Backend::Inline(lock) => {
                let _turn = lock_unpoisoned(lock);
                if self.is_poisoned() {
                    return Err(self.aborted());
                }
                Ok(self.run_caller(work))
            }
            Backend::Worker(_) => {
                let (turn_sender, turn_receiver) = mpsc::sync_channel::<()>(1);
                let (done_sender, done_receiver) = mpsc::sync_channel::<()>(1);
                self.submit(Box::new(move || {
                    if turn_sender.send(()).is_ok() {
                        // Park the worker until the caller is finished. If the caller panics,
                        // `done_sender` is dropped during unwinding and the worker moves on.
                        let _ = done_receiver.recv();
                    }
                }))?;

                turn_receiver.recv().map_err(|_| self.aborted())?;
                let out = self.run_caller(work);
                let _ = done_sender.send(());
                Ok(out)
            }
        }
    }

    /// Block until every job submitted so far has completed.
    pub fn synchronize(&self) -> Result<(), StreamError> {
        self.enqueue(|| ()).wait()
    }

    /// Mark the current tail of the stream. The event completes when all work submitted before
    /// it has run.
    pub fn record(&self) -> Event {
        let state = Arc::new(EventState::new());
        let signal = EventSignal {
            state: Arc::clone(&state),
            fired: false,
        };
        let _ = self.submit(Box::new(move || signal.fire()));
        Event {
            state,
            stream: self.id(),
        }
    }

    /// Make all work submitted to this stream from now on wait for `event`.
    ///
    /// If the event's stream aborts before reaching the event, this stream is poisoned as well.
    pub fn wait_event(&self, event: &Event) -> Result<(), StreamError> {
        let event = event.clone();
        let poisoned = Arc::clone(&self.inner.poisoned);
        let id = self.id();
        self.submit(Box::new(move || {
            if let Err(err) = event.wait() {
                log::error!("stream {id}: cross-stream dependency failed ({err}); aborting");
                poisoned.store(true, Ordering::Release);
            }
        }))
    }

    fn submit(&self, job: Job) -> Result<(), StreamError> {
        if self.is_poisoned() {
            return Err(self.aborted());
        }
        match &self.inner.backend {
            Backend::Worker(sender) => lock_unpoisoned(sender)
                .send(job)
                .map_err(|_| self.aborted()),
            Backend::Inline(lock) => {
                let _turn = lock_unpoisoned(lock);
                run_job(self.inner.id, &self.inner.poisoned, job);
                Ok(())
            }
        }
    }

    fn run_caller<T>(&self, work: impl FnOnce() -> T) -> T {
        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(out) => out,
            Err(payload) => {
                self.inner.poisoned.store(true, Ordering::Release);
                log::error!(
                    "stream {}: caller work panicked ({}); discarding queued work",
                    self.inner.id,
                    panic_message(payload.as_ref())
                );
                panic::resume_unwind(payload)
            }
        }
    }

    fn aborted(&self) -> StreamError {
        StreamError::Aborted {
            stream: self.inner.id,
        }
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.inner.backend {
            Backend::Worker(_) => "worker",
            Backend::Inline(_) => "inline",
        };
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("mode", &mode)
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

fn run_worker(id: u64, receiver: Receiver<Job>, poisoned: Arc<AtomicBool>) {
    for job in receiver {
        run_job(id, &poisoned, job);
    }
    log::trace!("stream {id}: queue closed, worker exiting");
}

fn run_job(id: u64, poisoned: &AtomicBool, job: Job) {
    if poisoned.load(Ordering::Acquire) {
        return;
    }
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        poisoned.store(true, Ordering::Release);
        log::error!(
            "stream {id}: job panicked ({}); discarding queued work",
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Result of a job submitted with [`Stream::enqueue`].
#[must_use = "work is queued regardless; dropping the handle only discards its result"]
pub struct Pending<T> {
    receiver: Receiver<T>,
    stream: u64,
}

impl<T> Pending<T> {
    /// Block until the job has run and return its output.
    pub fn wait(self) -> Result<T, StreamError> {
        self.receiver.recv().map_err(|_| StreamError::Aborted {
            stream: self.stream,
        })
    }

    pub fn stream_id(&self) -> u64 {
        self.stream
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EventStatus {
    Pending,
    Complete,
    Abandoned,
}

struct EventState {
    status: Mutex<EventStatus>,
    changed: Condvar,
}

impl EventState {
    fn new() -> Self {
        Self {
            status: Mutex::new(EventStatus::Pending),
            changed: Condvar::new(),
        }
    }

    fn set(&self, status: EventStatus) {
        *lock_unpoisoned(&self.status) = status;
        self.changed.notify_all();
    }
}

/// Completes its event when fired; abandons it if dropped unfired (discarded job).
struct EventSignal {
    state: Arc<EventState>,
    fired: bool,
}

impl EventSignal {
    fn fire(mut self) {
        self.fired = true;
        self.state.set(EventStatus::Complete);
    }
}

impl Drop for EventSignal {
    fn drop(&mut self) {
        if !self.fired {
            self.state.set(EventStatus::Abandoned);
        }
    }
}

/// A point in a stream's submission order, see [`Stream::record`].
#[derive(Clone)]
pub struct Event {
    state: Arc<EventState>,
    stream: u64,
}

impl Event {
    pub fn is_complete(&self) -> bool {
        *lock_unpoisoned(&self.state.status) == EventStatus::Complete
    }

    /// Block until the recorded point has been reached.
    pub fn wait(&self) -> Result<(), StreamError> {
        let mut status = lock_unpoisoned(&self.state.status);
        loop {
            match *status {
                EventStatus::Complete => return Ok(()),
                EventStatus::Abandoned => {
                    return Err(StreamError::Aborted {
                        stream: self.stream,
                    })
                }
                EventStatus::Pending => {
                    status = match self.state.changed.wait(status) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            }
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("stream", &self.stream)
            .field("complete", &self.is_complete())
            .finish()
    }
}
