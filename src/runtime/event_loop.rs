//! Node.js-style event loop for Boa
//!
//! A Boa context cannot leave the thread that created it, so every
//! [`EventLoop`] owns a dedicated thread that builds the context and runs all
//! callbacks on it. The host talks to that thread through a channel:
//! scheduling, cancelling, running and stopping are all messages.
//!
//! Each dispatch iteration:
//! 1. applies queued host messages
//! 2. runs the immediates that were queued when the iteration started
//! 3. runs at most one due timer
//! 4. otherwise sleeps until the next deadline or the next message
//!
//! Promise jobs are drained after every callback.

use super::scheduler::{
    Callback, Due, HostCallback, IdGen, JobId, JobKind, Scheduler, deadline_after, once,
};
use super::{console, process, register_core_modules, timers};
use crate::resolver::Registry;
use boa_engine::{Context, JsResult, context::ContextBuilder};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Stack of the loop thread; nested `require` calls recurse natively
const LOOP_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Errors reported by the event loop
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Failed to initialize event loop: {0}")]
    Init(String),

    #[error("Failed to spawn event loop thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Uncaught {0}")]
    Script(String),

    #[error("Event loop thread has terminated")]
    Terminated,
}

/// Result type for event loop operations
pub type LoopResult<T> = Result<T, LoopError>;

/// Configuration for an [`EventLoop`]
#[derive(Clone)]
pub struct LoopConfig {
    /// Install the global `console` object
    pub enable_console: bool,
    /// Module tree backing the global `require`
    pub registry: Registry,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            enable_console: true,
            registry: Registry::new(),
        }
    }
}

/// Handle of a host timeout, see [`LoopHandle::set_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timer(JobId);

/// Handle of a host interval, see [`LoopHandle::set_interval`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval(JobId);

type Bootstrap = Box<dyn FnOnce(&mut Context) -> JsResult<()> + Send>;

enum Message {
    Schedule {
        id: JobId,
        kind: JobKind,
        deadline: Instant,
        callback: HostCallback,
    },
    Cancel(JobId),
    Run {
        bootstrap: Bootstrap,
        done: Sender<LoopResult<()>>,
    },
    Start,
    Stop {
        ack: Option<Sender<usize>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Running,
}

struct Shared {
    tx: Sender<Message>,
    ids: Arc<IdGen>,
    state: Mutex<LoopState>,
    thread: OnceLock<ThreadId>,
}

impl Shared {
    fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            tracing::warn!("event loop thread is gone; message dropped");
        }
    }

    /// Mark the loop running, panicking if it already is
    fn begin(&self, operation: &str) {
        let mut state = self.state.lock();
        if *state == LoopState::Running {
            panic!("event loop is already running; cannot {operation}");
        }
        *state = LoopState::Running;
    }

    fn finish(&self) {
        *self.state.lock() = LoopState::Idle;
    }

    fn on_loop_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }
}

/// Cloneable, thread-safe handle for scheduling work on an [`EventLoop`]
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    /// Run `callback` on the loop after `delay`
    pub fn set_timeout<F>(&self, callback: F, delay: Duration) -> Timer
    where
        F: FnOnce(&mut Context) -> JsResult<()> + Send + 'static,
    {
        Timer(self.schedule(JobKind::Timeout, delay, once(callback)))
    }

    /// Run `callback` on the loop every `period`; a zero period becomes 1 ms
    pub fn set_interval<F>(&self, callback: F, period: Duration) -> Interval
    where
        F: FnMut(&mut Context) -> JsResult<()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        Interval(self.schedule(JobKind::Interval(period), period, Box::new(callback)))
    }

    /// Cancel a timeout; clearing twice or after it fired does nothing
    pub fn clear_timeout(&self, timer: Timer) {
        self.shared.send(Message::Cancel(timer.0));
    }

    pub fn clear_interval(&self, interval: Interval) {
        self.shared.send(Message::Cancel(interval.0));
    }

    /// Run `callback` on the loop as soon as possible.
    ///
    /// Equivalent to a zero-delay timeout; this is the only way to touch the
    /// context from other threads.
    pub fn run_on_loop<F>(&self, callback: F)
    where
        F: FnOnce(&mut Context) -> JsResult<()> + Send + 'static,
    {
        self.set_timeout(callback, Duration::ZERO);
    }

    /// Ask the loop to stop after the current callback, without waiting.
    ///
    /// Safe to call from inside a loop callback.
    pub fn stop_no_wait(&self) {
        self.shared.send(Message::Stop { ack: None });
    }

    fn schedule(&self, kind: JobKind, delay: Duration, callback: HostCallback) -> JobId {
        let id = self.shared.ids.job_id();
        self.shared.send(Message::Schedule {
            id,
            kind,
            deadline: deadline_after(delay),
            callback,
        });
        id
    }
}

/// Event loop owning a Boa context on its own thread.
///
/// Dropping the loop shuts the thread down; pending jobs are discarded.
pub struct EventLoop {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Create a loop with the default configuration
    pub fn new() -> LoopResult<Self> {
        Self::with_config(LoopConfig::default())
    }

    /// Create a loop; the context is built and initialized on the loop thread
    pub fn with_config(config: LoopConfig) -> LoopResult<Self> {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            tx,
            ids: Arc::new(IdGen::default()),
            state: Mutex::new(LoopState::Idle),
            thread: OnceLock::new(),
        });

        let (ready_tx, ready_rx) = bounded(1);
        let loop_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("nodeloop".into())
            .stack_size(LOOP_STACK_SIZE)
            .spawn(move || {
                let _ = loop_shared.thread.set(thread::current().id());
                match LoopThread::new(config, loop_shared, rx) {
                    Ok(worker) => {
                        let _ = ready_tx.send(Ok(()));
                        worker.serve();
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(LoopError::Spawn)?;

        ready_rx.recv().map_err(|_| LoopError::Terminated)??;
        tracing::debug!("event loop created");

        Ok(Self {
            handle: LoopHandle { shared },
            thread: Some(thread),
        })
    }

    /// A handle that can be sent to other threads
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Run `bootstrap` on the loop, then dispatch until no jobs remain.
    ///
    /// Returns early if the loop is stopped. If a callback throws, the error
    /// is returned and the remaining jobs stay queued.
    ///
    /// # Panics
    ///
    /// If the loop is already running.
    pub fn run<F>(&self, bootstrap: F) -> LoopResult<()>
    where
        F: FnOnce(&mut Context) -> JsResult<()> + Send + 'static,
    {
        let shared = &self.handle.shared;
        shared.begin("run");
        let (done_tx, done_rx) = bounded(1);
        shared.send(Message::Run {
            bootstrap: Box::new(bootstrap),
            done: done_tx,
        });
        done_rx.recv().unwrap_or_else(|_| {
            shared.finish();
            Err(LoopError::Terminated)
        })
    }

    /// Dispatch in the background until stopped; the loop keeps running
    /// while idle and callback errors are logged.
    ///
    /// # Panics
    ///
    /// If the loop is already running.
    pub fn start(&self) {
        self.handle.shared.begin("start");
        self.handle.shared.send(Message::Start);
        tracing::debug!("event loop started in background");
    }

    /// Stop the loop and wait until it has stopped.
    ///
    /// Returns the number of jobs still scheduled. Works on an idle loop too.
    ///
    /// # Panics
    ///
    /// If called from the loop thread; use [`LoopHandle::stop_no_wait`] there.
    pub fn stop(&self) -> LoopResult<usize> {
        assert!(
            !self.handle.shared.on_loop_thread(),
            "EventLoop::stop() cannot be called from the loop thread; use stop_no_wait()"
        );
        let (ack_tx, ack_rx) = bounded(1);
        self.handle.shared.send(Message::Stop { ack: Some(ack_tx) });
        let remaining = ack_rx.recv().map_err(|_| LoopError::Terminated)?;
        tracing::debug!(remaining, "event loop stopped");
        Ok(remaining)
    }

    pub fn set_timeout<F>(&self, callback: F, delay: Duration) -> Timer
    where
        F: FnOnce(&mut Context) -> JsResult<()> + Send + 'static,
    {
        self.handle.set_timeout(callback, delay)
    }

    pub fn set_interval<F>(&self, callback: F, period: Duration) -> Interval
    where
        F: FnMut(&mut Context) -> JsResult<()> + Send + 'static,
    {
        self.handle.set_interval(callback, period)
    }

    pub fn clear_timeout(&self, timer: Timer) {
        self.handle.clear_timeout(timer);
    }

    pub fn clear_interval(&self, interval: Interval) {
        self.handle.clear_interval(interval);
    }

    pub fn run_on_loop<F>(&self, callback: F)
    where
        F: FnOnce(&mut Context) -> JsResult<()> + Send + 'static,
    {
        self.handle.run_on_loop(callback);
    }

    pub fn stop_no_wait(&self) {
        self.handle.stop_no_wait();
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.handle.shared.send(Message::Shutdown);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() != thread::current().id() && thread.join().is_err() {
            tracing::error!("event loop thread panicked");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// `run`: return when drained, propagate errors
    Foreground,
    /// `start`: wait for work, log errors
    Background,
}

/// Why a dispatch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Drained,
    Stopped,
    Shutdown,
}

/// State owned by the loop thread
struct LoopThread {
    context: Context,
    scheduler: Rc<RefCell<Scheduler>>,
    shared: Arc<Shared>,
    rx: Receiver<Message>,
}

impl LoopThread {
    fn new(config: LoopConfig, shared: Arc<Shared>, rx: Receiver<Message>) -> LoopResult<Self> {
        let mut context = ContextBuilder::default()
            .build()
            .map_err(|e| LoopError::Init(e.to_string()))?;
        let scheduler = Rc::new(RefCell::new(Scheduler::new(shared.ids.clone())));

        Self::install_globals(&config, &scheduler, &mut context)
            .map_err(|e| LoopError::Init(e.to_string()))?;

        Ok(Self {
            context,
            scheduler,
            shared,
            rx,
        })
    }

    fn install_globals(
        config: &LoopConfig,
        scheduler: &Rc<RefCell<Scheduler>>,
        context: &mut Context,
    ) -> JsResult<()> {
        register_core_modules();
        config.registry.enable(context)?;
        timers::register(scheduler.clone(), context)?;
        process::enable(context)?;
        if config.enable_console {
            console::enable(context)?;
        }
        Ok(())
    }

    fn serve(mut self) {
        while let Ok(message) = self.rx.recv() {
            let exit = match message {
                Message::Run { bootstrap, done } => {
                    let result = self.run(bootstrap);
                    // A stop already marked the loop idle, and it may have been restarted since
                    if !matches!(result, Ok(Exit::Stopped)) {
                        self.shared.finish();
                    }
                    let exit = matches!(result, Ok(Exit::Shutdown));
                    let _ = done.send(result.map(|_| ()));
                    exit
                }
                Message::Start => matches!(self.dispatch(Mode::Background), Ok(Exit::Shutdown)),
                other => self.handle(other) == Some(Exit::Shutdown),
            };
            if exit {
                break;
            }
        }
        tracing::debug!("event loop thread exiting");
    }

    fn run(&mut self, bootstrap: Bootstrap) -> LoopResult<Exit> {
        let result = bootstrap(&mut self.context);
        self.settle(result, Mode::Foreground)?;
        self.dispatch(Mode::Foreground)
    }

    fn dispatch(&mut self, mode: Mode) -> LoopResult<Exit> {
        tracing::debug!(?mode, "dispatching");
        loop {
            while let Ok(message) = self.rx.try_recv() {
                if let Some(exit) = self.handle(message) {
                    return Ok(exit);
                }
            }

            let ran_immediates = self.run_immediates(mode)?;
            let ran_timer = self.run_due_timer(mode)?;
            if ran_immediates || ran_timer {
                continue;
            }

            if mode == Mode::Foreground && self.scheduler.borrow().live() == 0 {
                tracing::debug!("event loop drained");
                return Ok(Exit::Drained);
            }

            let next_deadline = self.scheduler.borrow_mut().next_deadline();
            let message = match next_deadline {
                Some(deadline) => match self.rx.recv_deadline(deadline) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return Ok(Exit::Shutdown),
                },
                None => match self.rx.recv() {
                    Ok(message) => message,
                    Err(_) => return Ok(Exit::Shutdown),
                },
            };
            if let Some(exit) = self.handle(message) {
                return Ok(exit);
            }
        }
    }

    /// Apply one host message; `Some` ends the current dispatch
    fn handle(&mut self, message: Message) -> Option<Exit> {
        match message {
            Message::Schedule {
                id,
                kind,
                deadline,
                callback,
            } => {
                self.scheduler
                    .borrow_mut()
                    .insert(id, kind, deadline, Callback::Host(callback));
                None
            }
            Message::Cancel(id) => {
                self.scheduler.borrow_mut().cancel(id);
                None
            }
            Message::Stop { ack } => {
                self.shared.finish();
                if let Some(ack) = ack {
                    let _ = ack.send(self.scheduler.borrow().live());
                }
                Some(Exit::Stopped)
            }
            Message::Shutdown => Some(Exit::Shutdown),
            Message::Run { .. } | Message::Start => {
                tracing::warn!("event loop is already dispatching; request ignored");
                None
            }
        }
    }

    /// Run the immediates queued before this iteration began
    fn run_immediates(&mut self, mode: Mode) -> LoopResult<bool> {
        let budget = self.scheduler.borrow().pending_immediates();
        let mut ran = false;
        for _ in 0..budget {
            let Some(mut callback) = self.scheduler.borrow_mut().take_immediate() else {
                break;
            };
            ran = true;
            self.invoke(&mut callback, mode)?;
        }
        Ok(ran)
    }

    fn run_due_timer(&mut self, mode: Mode) -> LoopResult<bool> {
        let Some(due) = self.scheduler.borrow_mut().take_due(Instant::now()) else {
            return Ok(false);
        };
        match due {
            Due::Once(mut callback) => self.invoke(&mut callback, mode)?,
            Due::Repeat {
                id,
                mut callback,
                period,
            } => {
                let result = self.invoke(&mut callback, mode);
                self.scheduler.borrow_mut().rearm(id, callback, period);
                result?;
            }
        }
        Ok(true)
    }

    fn invoke(&mut self, callback: &mut Callback, mode: Mode) -> LoopResult<()> {
        let result = callback.invoke(&mut self.context);
        self.settle(result, mode)
    }

    /// Drain promise jobs, then report or log a failure depending on the mode
    fn settle(&mut self, result: JsResult<()>, mode: Mode) -> LoopResult<()> {
        let result = result.and_then(|()| self.context.run_jobs());
        let Err(err) = result else {
            return Ok(());
        };
        let message = err.to_string();
        match mode {
            Mode::Foreground => Err(LoopError::Script(message)),
            Mode::Background => {
                tracing::error!(error = %message, "uncaught exception in event loop callback");
                Ok(())
            }
        }
    }
}
