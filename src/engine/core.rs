// src/engine/core.rs

//! Pure decision core of the refresh queue.
//!
//! This module contains the synchronous, deterministic rules the queue
//! follows:
//! - which execution path a session takes given the caller's access mode
//! - whether a precomputed batch may still be applied at commit time
//! - which lifecycle transitions a session may take
//!
//! The IO shell ([`queue`](super::queue), the workers) probes the world,
//! asks the core, and acts on the answer. Nothing here touches channels,
//! threads, locks or the file system, so it is unit tested directly.

/// What the calling thread holds at the time a session is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessProbe {
    pub holds_write: bool,
    pub holds_read: bool,
    pub is_dispatch_thread: bool,
}

/// How a session is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Hand the session to the scan worker and return immediately.
    Enqueue,
    /// Scan and fire on the calling thread, inside its write action.
    Inline,
    /// Refuse: blocking here could deadlock against the next writer.
    Refuse,
    /// Hand the session to the scan worker and block until it has fired.
    EnqueueAndWait,
}

/// Choose the execution path for a session.
///
/// Evaluated in order:
/// 1. asynchronous sessions are always enqueued;
/// 2. a caller inside a write action scans and fires inline;
/// 3. a caller holding shared read access off the dispatch thread is
///    refused;
/// 4. everyone else enqueues and waits.
pub fn choose_path(asynchronous: bool, probe: AccessProbe) -> ExecutionPath {
    if asynchronous {
        ExecutionPath::Enqueue
    } else if probe.holds_write {
        ExecutionPath::Inline
    } else if probe.holds_read && !probe.is_dispatch_thread {
        ExecutionPath::Refuse
    } else {
        ExecutionPath::EnqueueAndWait
    }
}

/// Outcome of the generation check made right before a precomputed batch
/// is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    /// No write action started since preprocessing; apply as computed.
    Apply,
    /// The world changed; discard the appliers and preprocess again.
    Retry,
}

/// Compare the generation read before preprocessing (`before`) with the one
/// read at commit time (`now`).
pub fn commit_decision(before: u64, now: u64) -> CommitDecision {
    if before == now {
        CommitDecision::Apply
    } else {
        CommitDecision::Retry
    }
}

/// Lifecycle of a refresh session.
///
/// ```text
/// Created -> Scanning -> Scanned -> Committing(0) -> Done
///                           |                          ^
///                           v                          |
///                  Preprocessing(1) -> Committing(1) --+
///                           ^               |
///                           +-- stale ------+  (attempt + 1)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Created,
    Scanning,
    Scanned,
    /// Filtering and computing appliers off the dispatch thread.
    Preprocessing { attempt: u32 },
    /// Waiting for, or inside, the write action that applies the batch.
    /// Attempt zero is a direct fire that was never preprocessed.
    Committing { attempt: u32 },
    Done,
}

impl SessionStage {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(self, next: SessionStage) -> bool {
        use SessionStage::*;
        match (self, next) {
            (Created, Scanning) | (Scanning, Scanned) => true,
            (Scanned, Preprocessing { attempt }) => attempt == 1,
            (Scanned, Committing { attempt }) => attempt == 0,
            (Preprocessing { attempt: a }, Committing { attempt: b }) => a == b,
            (Committing { attempt: a }, Preprocessing { attempt: b }) => a > 0 && b == a + 1,
            (Committing { .. }, Done) => true,
            _ => false,
        }
    }

    /// Events may only be fired once the scan is complete.
    pub fn is_scanned(self) -> bool {
        !matches!(self, SessionStage::Created | SessionStage::Scanning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(holds_write: bool, holds_read: bool, is_dispatch_thread: bool) -> AccessProbe {
        AccessProbe {
            holds_write,
            holds_read,
            is_dispatch_thread,
        }
    }

    #[test]
    fn asynchronous_sessions_always_enqueue() {
        for bits in 0..8u8 {
            let p = probe(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            assert_eq!(choose_path(true, p), ExecutionPath::Enqueue);
        }
    }

    #[test]
    fn synchronous_under_write_runs_inline() {
        assert_eq!(choose_path(false, probe(true, false, false)), ExecutionPath::Inline);
        // Write wins over read.
        assert_eq!(choose_path(false, probe(true, true, false)), ExecutionPath::Inline);
    }

    #[test]
    fn synchronous_under_read_off_dispatch_is_refused() {
        assert_eq!(choose_path(false, probe(false, true, false)), ExecutionPath::Refuse);
        assert_eq!(
            choose_path(false, probe(false, true, true)),
            ExecutionPath::EnqueueAndWait
        );
    }

    #[test]
    fn synchronous_without_locks_waits() {
        assert_eq!(
            choose_path(false, probe(false, false, false)),
            ExecutionPath::EnqueueAndWait
        );
        assert_eq!(
            choose_path(false, probe(false, false, true)),
            ExecutionPath::EnqueueAndWait
        );
    }

    #[test]
    fn commit_requires_unchanged_generation() {
        assert_eq!(commit_decision(4, 4), CommitDecision::Apply);
        assert_eq!(commit_decision(4, 5), CommitDecision::Retry);
    }

    #[test]
    fn stage_transitions() {
        use SessionStage::*;
        assert!(Created.can_advance_to(Scanning));
        assert!(!Created.can_advance_to(Committing { attempt: 0 }));
        assert!(Scanned.can_advance_to(Committing { attempt: 0 }));
        assert!(Scanned.can_advance_to(Preprocessing { attempt: 1 }));
        assert!(Preprocessing { attempt: 1 }.can_advance_to(Committing { attempt: 1 }));
        assert!(Committing { attempt: 1 }.can_advance_to(Preprocessing { attempt: 2 }));
        assert!(!Committing { attempt: 0 }.can_advance_to(Preprocessing { attempt: 1 }));
        assert!(Committing { attempt: 3 }.can_advance_to(Done));
        assert!(!Done.can_advance_to(Scanning));
        assert!(!Scanning.is_scanned());
        assert!(Committing { attempt: 0 }.is_scanned());
    }
}
