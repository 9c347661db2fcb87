//! Single-flight claims on a block key.
//!
//! A claim sits in a band's directory while a block is being filled from the
//! driver or written back to it. Other requesters of the same key find the
//! claim and wait on it instead of starting a second fill or reading data
//! that is still being persisted.
//!
//! ```text
//! Request A ─┐                      fill
//!            │                       │
//! Request B ─┼──► Claim(Fill) ◄──────┘
//!            │        │
//! Request C ─┘        ▼
//!              [A, B, C share the
//!               same block or error]
//! ```

use crate::cache::block::Block;
use crate::cache::types::BlockKey;
use crate::driver::DriverError;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a claim is protecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimKind {
    /// Block is being read from the driver.
    Fill,
    /// Dirty block is detached and being written to the driver.
    WriteBack,
}

#[derive(Debug)]
enum ClaimState {
    Pending,
    Filled(Arc<Block>),
    Failed(Arc<DriverError>),
    Vacated,
}

/// Result handed to every thread that waited on a claim.
#[derive(Debug)]
pub(crate) enum ClaimOutcome {
    /// Fill succeeded; the block was already pinned on the waiter's behalf.
    Filled(Arc<Block>),
    /// Fill failed; every waiter sees the same error.
    Failed(Arc<DriverError>),
    /// Write-back finished and the key is absent again; look it up afresh.
    Vacated,
}

/// A per-key placeholder that concurrent requesters block on.
#[derive(Debug)]
pub(crate) struct Claim {
    kind: ClaimKind,
    key: BlockKey,
    state: Mutex<ClaimState>,
    ready: Condvar,
    waiters: AtomicUsize,
}

impl Claim {
    pub(crate) fn fill(key: BlockKey) -> Arc<Self> {
        Arc::new(Self::new(ClaimKind::Fill, key))
    }

    pub(crate) fn write_back(key: BlockKey) -> Arc<Self> {
        Arc::new(Self::new(ClaimKind::WriteBack, key))
    }

    fn new(kind: ClaimKind, key: BlockKey) -> Self {
        Self {
            kind,
            key,
            state: Mutex::new(ClaimState::Pending),
            ready: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    pub(crate) fn kind(&self) -> ClaimKind {
        self.kind
    }

    pub(crate) fn key(&self) -> BlockKey {
        self.key
    }

    /// Count a thread that will wait for this fill. Caller holds the global lock.
    pub(crate) fn register_waiter(&self) {
        self.waiters.fetch_add(1, Ordering::AcqRel);
    }

    /// Threads registered so far. Read under the global lock when the fill lands.
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    pub(crate) fn complete_fill(&self, block: Arc<Block>) {
        self.settle(ClaimState::Filled(block));
    }

    pub(crate) fn fail(&self, error: Arc<DriverError>) {
        self.settle(ClaimState::Failed(error));
    }

    pub(crate) fn vacate(&self) {
        self.settle(ClaimState::Vacated);
    }

    fn settle(&self, outcome: ClaimState) {
        let mut state = self.state.lock();
        assert!(
            matches!(*state, ClaimState::Pending),
            "claim on block {} settled twice",
            self.key
        );
        *state = outcome;
        self.ready.notify_all();
    }

    /// Block until the claim settles.
    pub(crate) fn wait(&self) -> ClaimOutcome {
        let mut state = self.state.lock();
        loop {
            match &*state {
                ClaimState::Pending => self.ready.wait(&mut state),
                ClaimState::Filled(block) => return ClaimOutcome::Filled(Arc::clone(block)),
                ClaimState::Failed(error) => return ClaimOutcome::Failed(Arc::clone(error)),
                ClaimState::Vacated => return ClaimOutcome::Vacated,
            }
        }
    }
}
