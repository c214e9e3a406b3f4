//! Per-request deadline and cancellation.
//!
//! Every public engine operation takes a [`RequestContext`]. The coordinator
//! consults it while waiting for access and once more before touching the
//! backing store, so an expired or cancelled request never applies anything.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Cloneable cancellation flag shared between a caller and its request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique per request, for log correlation
    pub request_id: u64,
    /// When this request was created
    pub started_at: Instant,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl RequestContext {
    /// No deadline, no cancellation.
    pub fn background() -> Self {
        Self {
            request_id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            started_at: Instant::now(),
            deadline: None,
            cancel: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let mut ctx = Self::background();
        ctx.deadline = ctx.started_at.checked_add(timeout);
        ctx
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        let mut ctx = Self::background();
        ctx.deadline = Some(deadline);
        ctx
    }

    /// Attach a cancel token.
    pub fn cancellable(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().map_or(false, |left| left.is_zero())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancelToken::is_cancelled)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self { Self::background() }
}
