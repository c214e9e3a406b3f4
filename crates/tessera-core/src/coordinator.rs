//! Request serialization.
//!
//! One lock domain guards the index together with the backing store:
//!
//! | Access      | Lock mode            | Excludes                   |
//! |-------------|----------------------|----------------------------|
//! | mutation    | write                | everything                 |
//! | scan        | upgradable read      | mutations, other scans     |
//! | point read  | read                 | mutations                  |
//!
//! A mutation holds the write lock across its backing-store call, so the
//! index and the store change as one step and a scan can never observe a
//! half-applied batch. Scans materialize their bounded result under the
//! upgradable read lock and release it before the caller sends anything.
//!
//! Acquisition waits in short slices, re-checking the caller's deadline and
//! cancel token between slices.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::index::OrderedIndex;
use crate::store::DurableBackingStore;

/// Upper bound on a single lock wait before deadline/cancel are re-checked.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Everything the coordinator protects.
pub struct EngineState {
    pub index: OrderedIndex,
    pub store: Box<dyn DurableBackingStore>,
}

/// Coordinator state, observable for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    MutationInFlight = 1,
    ScanInFlight = 2,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Phase::MutationInFlight,
            2 => Phase::ScanInFlight,
            _ => Phase::Idle,
        }
    }
}

/// Sets the phase on entry and restores `Idle` on drop, before the lock guard
/// declared ahead of it is released.
struct PhaseGuard<'a>(&'a AtomicU8);

impl<'a> PhaseGuard<'a> {
    fn enter(slot: &'a AtomicU8, phase: Phase) -> Self {
        slot.store(phase as u8, Ordering::Release);
        Self(slot)
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(Phase::Idle as u8, Ordering::Release);
    }
}

pub struct RequestCoordinator {
    state: RwLock<EngineState>,
    phase: AtomicU8,
}

impl RequestCoordinator {
    pub fn new(state: EngineState) -> Self {
        Self {
            state: RwLock::new(state),
            phase: AtomicU8::new(Phase::Idle as u8),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Run `apply` with exclusive access. The deadline is re-checked after the
    /// lock is taken, so an expired request returns before any I/O.
    pub fn mutate<T>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        apply: impl FnOnce(&mut EngineState) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut guard = self.acquire(ctx, operation, |slice| self.state.try_write_for(slice))?;
        let _phase = PhaseGuard::enter(&self.phase, Phase::MutationInFlight);
        check_budget(ctx, operation)?;
        apply(&mut *guard)
    }

    /// Run `read` with shared access, concurrently with other reads.
    pub fn read<T>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        read: impl FnOnce(&EngineState) -> T,
    ) -> EngineResult<T> {
        let guard = self.acquire(ctx, operation, |slice| self.state.try_read_for(slice))?;
        Ok(read(&*guard))
    }

    /// Run `scan` against a stable index: no mutation can start until it returns.
    pub fn scan<T>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        scan: impl FnOnce(&OrderedIndex) -> T,
    ) -> EngineResult<T> {
        let guard = self.acquire(ctx, operation, |slice| self.state.try_upgradable_read_for(slice))?;
        let _phase = PhaseGuard::enter(&self.phase, Phase::ScanInFlight);
        Ok(scan(&guard.index))
    }

    fn acquire<G>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        mut attempt: impl FnMut(Duration) -> Option<G>,
    ) -> EngineResult<G> {
        loop {
            check_budget(ctx, operation)?;
            let slice = ctx.remaining().map_or(WAIT_SLICE, |left| left.min(WAIT_SLICE));
            if let Some(guard) = attempt(slice) {
                return Ok(guard);
            }
        }
    }
}

fn check_budget(ctx: &RequestContext, operation: &'static str) -> EngineResult<()> {
    if ctx.is_cancelled() {
        tracing::debug!(request_id = ctx.request_id, operation, "request cancelled");
        return Err(EngineError::Cancelled { operation });
    }
    if ctx.is_expired() {
        let waited = ctx.elapsed();
        tracing::warn!(request_id = ctx.request_id, operation, ?waited, "deadline exceeded");
        return Err(EngineError::DeadlineExceeded { operation, waited });
    }
    Ok(())
}
