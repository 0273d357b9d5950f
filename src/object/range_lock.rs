use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Length that extends a range to the end of the addressable space.
pub const WHOLE_FILE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    Shared,
    Exclusive,
}

/// Half-open byte interval `[start, end)`. `end == u64::MAX` means "to the end
/// of the file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: u64,
    end: u64,
    mode: RangeMode,
}

impl Span {
    fn new(offset: u64, len: u64, mode: RangeMode) -> Self {
        Span {
            start: offset,
            end: offset.saturating_add(len),
            mode,
        }
    }

    fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn conflicts(&self, other: &Span) -> bool {
        self.overlaps(other)
            && (self.mode == RangeMode::Exclusive || other.mode == RangeMode::Exclusive)
    }
}

#[derive(Debug, Default)]
struct RangeState {
    granted: HashMap<u64, Span>,
    /// Requests still waiting, keyed by arrival ticket.
    waiting: BTreeMap<u64, Span>,
    next_ticket: u64,
}

impl RangeState {
    fn take_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    /// A request is grantable when nothing granted conflicts with it and no
    /// earlier waiter conflicts with it. The second rule keeps later arrivals
    /// from overtaking a queued request on the same bytes, so the oldest
    /// waiter only ever waits on granted locks and every request completes.
    fn grantable(&self, ticket: u64, span: &Span) -> bool {
        !self.granted.values().any(|g| g.conflicts(span))
            && !self.waiting.range(..ticket).any(|(_, w)| w.conflicts(span))
    }
}

/// Interval lock over one object's byte offsets.
#[derive(Debug, Default)]
pub struct RangeLockManager {
    state: Mutex<RangeState>,
    released: Condvar,
}

impl RangeLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `[offset, offset + len)` can be held in `mode`.
    pub fn lock(&self, offset: u64, len: u64, mode: RangeMode) -> RangeGuard<'_> {
        self.acquire(|| offset, len, mode)
    }

    /// Exclusive lock on `len` bytes starting at the current end of file.
    ///
    /// `eof` is re-evaluated every time the request is reconsidered, so an
    /// appender that waited behind another appender lands after it.
    pub fn lock_append(&self, len: u64, eof: impl Fn() -> u64) -> RangeGuard<'_> {
        self.acquire(eof, len, RangeMode::Exclusive)
    }

    pub fn try_lock(&self, offset: u64, len: u64, mode: RangeMode) -> Option<RangeGuard<'_>> {
        let mut state = self.state.lock();
        let span = Span::new(offset, len, mode);
        let ticket = state.take_ticket();
        if !state.grantable(ticket, &span) {
            return None;
        }
        state.granted.insert(ticket, span);
        Some(RangeGuard {
            manager: self,
            id: ticket,
            span,
        })
    }

    fn acquire(&self, start: impl Fn() -> u64, len: u64, mode: RangeMode) -> RangeGuard<'_> {
        let mut state = self.state.lock();
        let ticket = state.take_ticket();
        let mut span = Span::new(start(), len, mode);

        if !state.grantable(ticket, &span) {
            tracing::trace!(
                "range lock [{}, {}) {:?} waiting (ticket {})",
                span.start,
                span.end,
                mode,
                ticket
            );
            state.waiting.insert(ticket, span);
            loop {
                self.released.wait(&mut state);
                span = Span::new(start(), len, mode);
                if state.grantable(ticket, &span) {
                    state.waiting.remove(&ticket);
                    break;
                }
                state.waiting.insert(ticket, span);
            }
        }

        state.granted.insert(ticket, span);
        RangeGuard {
            manager: self,
            id: ticket,
            span,
        }
    }

    fn release(&self, id: u64) {
        let removed = self.state.lock().granted.remove(&id);
        assert!(removed.is_some(), "range lock {} released but not held", id);
        self.released.notify_all();
    }

    pub fn granted_count(&self) -> usize {
        self.state.lock().granted.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Currently granted intervals as `(start, end, mode)`.
    pub fn granted(&self) -> Vec<(u64, u64, RangeMode)> {
        self.state
            .lock()
            .granted
            .values()
            .map(|s| (s.start, s.end, s.mode))
            .collect()
    }
}

/// A granted interval. Dropping the guard unlocks it.
#[must_use = "dropping the guard unlocks the range immediately"]
pub struct RangeGuard<'a> {
    manager: &'a RangeLockManager,
    id: u64,
    span: Span,
}

impl RangeGuard<'_> {
    pub fn offset(&self) -> u64 {
        self.span.start
    }

    /// Exclusive end; `u64::MAX` for whole-file locks.
    pub fn end(&self) -> u64 {
        self.span.end
    }

    pub fn len(&self) -> u64 {
        self.span.end - self.span.start
    }

    pub fn is_empty(&self) -> bool {
        self.span.start == self.span.end
    }

    pub fn mode(&self) -> RangeMode {
        self.span.mode
    }

    pub fn is_exclusive(&self) -> bool {
        self.span.mode == RangeMode::Exclusive
    }

    pub fn is_whole_file(&self) -> bool {
        self.span.start == 0 && self.span.end == u64::MAX
    }

    /// Whether `[offset, end)` lies inside this guard's interval.
    pub fn covers(&self, offset: u64, end: u64) -> bool {
        self.span.start <= offset && end <= self.span.end
    }

    pub(crate) fn belongs_to(&self, manager: &RangeLockManager) -> bool {
        std::ptr::eq(self.manager, manager)
    }

    pub fn unlock(self) {}
}

impl fmt::Debug for RangeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeGuard")
            .field("id", &self.id)
            .field("start", &self.span.start)
            .field("end", &self.span.end)
            .field("mode", &self.span.mode)
            .finish()
    }
}

impl Drop for RangeGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.id);
    }
}
