/*!
 * Retry Queue
 * FIFO of descriptor-acquiring calls parked on exhaustion
 *
 * An acquiring call that fails with EMFILE/ENFILE is parked at the tail
 * instead of failing. Every successful descriptor release pops exactly one
 * parked call from the head and runs it again through the same path, so a
 * replay that is exhausted again goes back to the tail.
 */

use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

use crate::core::types::Fd;
use crate::monitoring::{RetryCounters, RetryStats};
use crate::vfs::types::{sort_entries, Entry, OpenFlags, OpenMode, VfsError, VfsResult};
use crate::vfs::FileSystem;

/// Continuation invoked exactly once with the final outcome of a call
pub type Completion<T> = Box<dyn FnOnce(VfsResult<T>) + Send + 'static>;

/// Wrapped operation plus the arguments it was called with
pub(crate) enum Call {
    Open {
        path: PathBuf,
        flags: OpenFlags,
        mode: OpenMode,
        done: Completion<Fd>,
    },
    ReadFile {
        path: PathBuf,
        done: Completion<Vec<u8>>,
    },
    ReadDir {
        path: PathBuf,
        done: Completion<Vec<Entry>>,
    },
}

/// A replayable call bound to the filesystem it targets
pub struct Invocation {
    target: Arc<dyn FileSystem>,
    call: Call,
}

impl Invocation {
    pub(crate) fn new(target: Arc<dyn FileSystem>, call: Call) -> Self {
        Self { target, call }
    }

    /// Operation name, for logs
    pub fn operation(&self) -> &'static str {
        match self.call {
            Call::Open { .. } => "open",
            Call::ReadFile { .. } => "read_file",
            Call::ReadDir { .. } => "read_dir",
        }
    }

    /// Path the call targets
    pub fn path(&self) -> &Path {
        match &self.call {
            Call::Open { path, .. } | Call::ReadFile { path, .. } | Call::ReadDir { path, .. } => {
                path
            }
        }
    }

    /// Attempt the underlying operation once
    ///
    /// Completes the continuation unless the attempt hit descriptor
    /// exhaustion, in which case the invocation is parked on `queue` with its
    /// arguments untouched.
    fn run(self, queue: &RetryQueue) {
        let attempt = queue.begin_attempt();
        let Invocation { target, call } = self;

        match call {
            Call::Open {
                path,
                flags,
                mode,
                done,
            } => match target.open(&path, flags, mode) {
                Err(err) if err.is_exhaustion() => {
                    let call = Call::Open {
                        path,
                        flags,
                        mode,
                        done,
                    };
                    queue.park(Invocation { target, call }, attempt, &err);
                }
                result => {
                    queue.end_attempt(attempt);
                    done(result)
                }
            },
            Call::ReadFile { path, done } => match target.read_file(&path) {
                Err(err) if err.is_exhaustion() => {
                    let call = Call::ReadFile { path, done };
                    queue.park(Invocation { target, call }, attempt, &err);
                }
                result => {
                    queue.end_attempt(attempt);
                    done(result)
                }
            },
            Call::ReadDir { path, done } => match target.read_dir(&path) {
                Err(err) if err.is_exhaustion() => {
                    let call = Call::ReadDir { path, done };
                    queue.park(Invocation { target, call }, attempt, &err);
                }
                result => {
                    queue.end_attempt(attempt);
                    done(result.map(|mut entries| {
                        sort_entries(&mut entries);
                        entries
                    }))
                }
            },
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("operation", &self.operation())
            .field("path", &self.path())
            .field("target", &self.target.name())
            .finish()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Invocation>,
    /// Releases that found `pending` empty
    idle_releases: u64,
    next_attempt: u64,
    /// Attempts between their start and their outcome
    in_flight: BTreeSet<u64>,
    /// Unclaimed idle releases, each as the first attempt id that started after it
    idle_credits: VecDeque<u64>,
}

impl QueueState {
    /// Take one idle release that landed while `attempt` was running
    fn claim_idle_release(&mut self, attempt: u64) -> bool {
        match self.idle_credits.iter().position(|&horizon| horizon > attempt) {
            Some(index) => {
                self.idle_credits.remove(index);
                true
            }
            None => false,
        }
    }

    /// Retire an attempt and every credit no running attempt can claim
    fn settle(&mut self, attempt: u64) {
        self.in_flight.remove(&attempt);
        let oldest = self.in_flight.iter().next().copied();
        while let Some(&horizon) = self.idle_credits.front() {
            match oldest {
                Some(id) if id < horizon => break,
                _ => {
                    self.idle_credits.pop_front();
                }
            }
        }
    }
}

thread_local! {
    /// Releases made from inside a replay on this thread, keyed by queue address
    static DEFERRED_RELEASES: RefCell<Vec<(usize, usize)>> = RefCell::new(Vec::new());
}

/// Marks this thread as draining a queue until dropped
struct DrainGuard {
    key: usize,
}

impl DrainGuard {
    /// `None` when this thread is already draining the queue
    fn enter(key: usize) -> Option<Self> {
        DEFERRED_RELEASES.with(|deferred| {
            let mut deferred = deferred.borrow_mut();
            match deferred.iter_mut().find(|(k, _)| *k == key) {
                Some((_, count)) => {
                    *count += 1;
                    None
                }
                None => {
                    deferred.push((key, 0));
                    Some(Self { key })
                }
            }
        })
    }

    fn take_deferred(&self) -> usize {
        DEFERRED_RELEASES.with(|deferred| {
            deferred
                .borrow_mut()
                .iter_mut()
                .find(|(k, _)| *k == self.key)
                .map_or(0, |(_, count)| std::mem::take(count))
        })
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        // Unwinding continuations must not leave the thread marked
        let _ = DEFERRED_RELEASES.try_with(|deferred| {
            deferred.borrow_mut().retain(|(k, _)| *k != self.key);
        });
    }
}

/// Unbounded FIFO of parked invocations
///
/// One mutex guards both the append on exhaustion and the pop on release,
/// and is never held while an underlying operation or a continuation runs.
///
/// A release can land between an attempt failing and that attempt being
/// appended; it would find the queue empty and admit nothing. Such an idle
/// release is kept as a credit that exactly one of the attempts running at
/// that moment may claim when it parks, so the release still admits one
/// replay and never two.
///
/// Replays run on the releasing thread. A release made from inside a replay
/// (a continuation that closes a descriptor) is counted and served by the
/// outer `retry` loop after the current replay returns, so chains of
/// close-then-replay run iteratively instead of nesting.
#[derive(Debug, Default)]
pub struct RetryQueue {
    state: Mutex<QueueState>,
    counters: RetryCounters,
}

impl RetryQueue {
    /// Create an empty, independent queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide queue shared by every `GracefulFs::new`
    pub fn global() -> Arc<RetryQueue> {
        static GLOBAL: OnceLock<Arc<RetryQueue>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(RetryQueue::new())))
    }

    /// Number of parked invocations
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub fn stats(&self) -> RetryStats {
        let pending = self.len();
        self.counters.snapshot(pending)
    }

    /// First attempt of a wrapped call
    pub(crate) fn submit(&self, invocation: Invocation) {
        invocation.run(self);
    }

    /// Replay the oldest parked invocation
    ///
    /// Call once per released descriptor. Returns whether a parked
    /// invocation was found; an empty queue makes this a no-op. Called from
    /// inside a replay on the same thread, the release is deferred to the
    /// running drain loop.
    pub fn retry(&self) -> bool {
        let guard = match DrainGuard::enter(self as *const Self as usize) {
            Some(guard) => guard,
            None => return !self.is_empty(),
        };

        let replayed = self.replay_next();
        loop {
            let deferred = guard.take_deferred();
            if deferred == 0 {
                break;
            }
            trace!(deferred, "serving releases made during replay");
            for _ in 0..deferred {
                self.replay_next();
            }
        }
        replayed
    }

    fn replay_next(&self) -> bool {
        let next = {
            let mut state = self.state.lock();
            let next = state.pending.pop_front();
            if next.is_none() {
                state.idle_releases += 1;
                if !state.in_flight.is_empty() {
                    let horizon = state.next_attempt;
                    state.idle_credits.push_back(horizon);
                }
                self.counters.record_idle_release();
            }
            next
        };

        match next {
            Some(invocation) => {
                self.counters.record_replayed();
                debug!(
                    operation = invocation.operation(),
                    path = %invocation.path().display(),
                    "replaying parked invocation"
                );
                invocation.run(self);
                true
            }
            None => {
                trace!("release with empty retry queue");
                false
            }
        }
    }

    fn begin_attempt(&self) -> u64 {
        let mut state = self.state.lock();
        let attempt = state.next_attempt;
        state.next_attempt += 1;
        state.in_flight.insert(attempt);
        attempt
    }

    fn end_attempt(&self, attempt: u64) {
        self.state.lock().settle(attempt);
    }

    fn park(&self, invocation: Invocation, attempt: u64, cause: &VfsError) {
        let operation = invocation.operation();
        let path = invocation.path().display().to_string();

        let (depth, missed_release) = {
            let mut state = self.state.lock();
            state.pending.push_back(invocation);
            let missed_release = state.claim_idle_release(attempt);
            state.settle(attempt);
            (state.pending.len(), missed_release)
        };
        self.counters.record_deferred(depth);

        debug!(
            operation,
            path = %path,
            code = cause.code(),
            depth,
            "descriptor exhaustion, parking invocation"
        );

        if missed_release {
            trace!(operation, "claiming release that found the queue empty");
            self.retry();
        }
    }
}
