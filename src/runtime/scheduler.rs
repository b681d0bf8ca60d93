//! Job table of the event loop
//!
//! Lives on the loop thread. Timers are kept in a min-heap ordered by deadline
//! and then by scheduling order; immediates in a FIFO queue. Cancelling a job
//! only removes it from the table, stale heap and queue entries are skipped
//! when they surface.

use boa_engine::{Context, JsObject, JsResult, JsValue};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

/// Identifier of a scheduled job, unique per loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

/// Id and sequence allocation shared by the loop thread and its handles
#[derive(Debug, Default)]
pub(crate) struct IdGen {
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

impl IdGen {
    pub(crate) fn job_id(&self) -> JobId {
        JobId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed) + 1)
    }

    fn seq(&self) -> u64 {
        self.next_seq.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    Timeout,
    Interval(Duration),
    Immediate,
}

pub(crate) type HostCallback = Box<dyn FnMut(&mut Context) -> JsResult<()> + Send>;

/// Adapt a one-shot closure to the repeatable callback shape
pub(crate) fn once<F>(callback: F) -> HostCallback
where
    F: FnOnce(&mut Context) -> JsResult<()> + Send + 'static,
{
    let mut callback = Some(callback);
    Box::new(move |context| match callback.take() {
        Some(callback) => callback(context),
        None => Ok(()),
    })
}

pub(crate) enum Callback {
    Host(HostCallback),
    Script {
        function: JsObject,
        args: Vec<JsValue>,
    },
}

impl Callback {
    pub(crate) fn invoke(&mut self, context: &mut Context) -> JsResult<()> {
        match self {
            Callback::Host(callback) => callback(context),
            Callback::Script { function, args } => function
                .call(&JsValue::undefined(), args, context)
                .map(|_| ()),
        }
    }
}

struct Job {
    kind: JobKind,
    /// Taken out while an interval callback runs
    callback: Option<Callback>,
    /// Sequence of the heap entry currently representing this job
    seq: u64,
}

/// A timer entry in the priority queue
#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    id: JobId,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Stand-in deadline for delays past what `Instant` can represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Heap size below which stale entries are left for lazy removal
const COMPACT_THRESHOLD: usize = 64;

/// `now + delay`, saturating to a far-future deadline instead of overflowing
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// A timer whose deadline has passed
pub(crate) enum Due {
    Once(Callback),
    Repeat {
        id: JobId,
        callback: Callback,
        period: Duration,
    },
}

pub(crate) struct Scheduler {
    ids: Arc<IdGen>,
    jobs: HashMap<JobId, Job>,
    timers: BinaryHeap<TimerEntry>,
    immediates: VecDeque<JobId>,
}

impl Scheduler {
    pub(crate) fn new(ids: Arc<IdGen>) -> Self {
        Self {
            ids,
            jobs: HashMap::new(),
            timers: BinaryHeap::with_capacity(32),
            immediates: VecDeque::with_capacity(16),
        }
    }

    pub(crate) fn next_id(&self) -> JobId {
        self.ids.job_id()
    }

    /// Number of jobs that are scheduled and not cancelled
    pub(crate) fn live(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn pending_immediates(&self) -> usize {
        self.immediates.len()
    }

    /// Schedule a job; `deadline` is ignored for immediates
    pub(crate) fn insert(&mut self, id: JobId, kind: JobKind, deadline: Instant, callback: Callback) {
        let seq = self.ids.seq();
        match kind {
            JobKind::Immediate => self.immediates.push_back(id),
            JobKind::Timeout | JobKind::Interval(_) => self.timers.push(TimerEntry {
                deadline,
                seq,
                id,
            }),
        }
        self.jobs.insert(
            id,
            Job {
                kind,
                callback: Some(callback),
                seq,
            },
        );
        tracing::trace!(?id, ?kind, "job scheduled");
    }

    /// Returns whether the job was still scheduled
    pub(crate) fn cancel(&mut self, id: JobId) -> bool {
        let cancelled = self.jobs.remove(&id).is_some();
        if cancelled {
            tracing::trace!(?id, "job cancelled");
            self.compact();
        }
        cancelled
    }

    /// Drop cancelled entries from the timer heap once they outnumber live jobs
    fn compact(&mut self) {
        if self.timers.len() < COMPACT_THRESHOLD || self.timers.len() <= 2 * self.jobs.len() {
            return;
        }
        let before = self.timers.len();
        let jobs = &self.jobs;
        self.timers
            .retain(|entry| jobs.get(&entry.id).is_some_and(|job| job.seq == entry.seq));
        tracing::trace!(before, after = self.timers.len(), "timer heap compacted");
    }

    pub(crate) fn is_immediate(&self, id: JobId) -> bool {
        self.jobs
            .get(&id)
            .is_some_and(|job| job.kind == JobKind::Immediate)
    }

    /// Pop the next live immediate
    pub(crate) fn take_immediate(&mut self) -> Option<Callback> {
        while let Some(id) = self.immediates.pop_front() {
            if let Some(mut job) = self.jobs.remove(&id) {
                return job.callback.take();
            }
        }
        None
    }

    /// Pop the earliest timer if its deadline is at or before `now`
    pub(crate) fn take_due(&mut self, now: Instant) -> Option<Due> {
        while let Some(&TimerEntry { deadline, seq, id }) = self.timers.peek() {
            let live = self.jobs.get(&id).is_some_and(|job| job.seq == seq);
            if !live {
                self.timers.pop();
                continue;
            }
            if deadline > now {
                return None;
            }
            self.timers.pop();

            let job = self.jobs.get_mut(&id)?;
            return match job.kind {
                JobKind::Interval(period) => {
                    let callback = job.callback.take()?;
                    Some(Due::Repeat {
                        id,
                        callback,
                        period,
                    })
                }
                JobKind::Timeout | JobKind::Immediate => {
                    let mut job = self.jobs.remove(&id)?;
                    job.callback.take().map(Due::Once)
                }
            };
        }
        None
    }

    /// Put an interval back after its callback ran, unless it was cleared meanwhile
    pub(crate) fn rearm(&mut self, id: JobId, callback: Callback, period: Duration) {
        let seq = self.ids.seq();
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        job.callback = Some(callback);
        job.seq = seq;
        self.timers.push(TimerEntry {
            deadline: deadline_after(period),
            seq,
            id,
        });
    }

    /// Deadline of the earliest live timer
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(&TimerEntry { deadline, seq, id }) = self.timers.peek() {
            if self.jobs.get(&id).is_some_and(|job| job.seq == seq) {
                return Some(deadline);
            }
            self.timers.pop();
        }
        None
    }
}
