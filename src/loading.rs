use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Identifies one background request. The view keeps a clone; leaving the
/// view cancels it so a late response is dropped instead of applied.
#[derive(Debug, Clone)]
pub struct Ticket {
    request_id: u64,
    cancelled: Arc<AtomicBool>,
}

impl Ticket {
    pub fn new(request_id: u64) -> Self {
        Self {
            request_id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True when `request_id` answers this ticket and it is still live.
    pub fn accepts(&self, request_id: u64) -> bool {
        self.request_id == request_id && !self.is_cancelled()
    }
}

/// Reference-counted busy flag shared by every background load. The spinner
/// is shown while the depth is nonzero.
#[derive(Debug, Clone, Default)]
pub struct LoadingCounter {
    depth: Arc<AtomicUsize>,
}

impl LoadingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one load as started. The returned guard ends it when dropped.
    #[must_use = "dropping the guard ends the load immediately"]
    pub fn begin(&self) -> LoadingGuard {
        self.increment();
        LoadingGuard {
            counter: self.clone(),
        }
    }

    pub fn increment(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    /// Floored at zero so an unbalanced call cannot wrap the counter.
    pub fn decrement(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                Some(depth.saturating_sub(1))
            });
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.depth() > 0
    }
}

#[derive(Debug)]
pub struct LoadingGuard {
    counter: LoadingCounter,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn overlapping_loads_keep_busy_until_last_ends() {
        let counter = LoadingCounter::new();
        let first = counter.begin();
        let second = counter.begin();
        drop(first);
        assert!(counter.is_busy());
        drop(second);
        assert!(!counter.is_busy());
    }

    #[test]
    fn balanced_sequences_return_to_idle() {
        let counter = LoadingCounter::new();
        for depth in 1..=5 {
            let guards: Vec<_> = (0..depth).map(|_| counter.begin()).collect();
            assert_eq!(counter.depth(), depth);
            drop(guards);
            assert!(!counter.is_busy());
        }

        counter.increment();
        counter.increment();
        counter.decrement();
        counter.increment();
        counter.decrement();
        counter.decrement();
        assert!(!counter.is_busy());
    }

    #[test]
    fn decrement_is_floored_at_zero() {
        let counter = LoadingCounter::new();
        counter.decrement();
        assert_eq!(counter.depth(), 0);
        let _guard = counter.begin();
        assert_eq!(counter.depth(), 1);
    }

    #[test]
    fn cancelled_ticket_rejects_responses() {
        let ticket = Ticket::new(7);
        let worker_copy = ticket.clone();
        assert!(ticket.accepts(7));
        assert!(!ticket.accepts(8));
        ticket.cancel();
        assert!(worker_copy.is_cancelled());
        assert!(!ticket.accepts(7));
    }

    #[test]
    fn guard_releases_when_worker_panics() {
        let counter = LoadingCounter::new();
        let worker = counter.clone();
        let result = thread::spawn(move || {
            let _guard = worker.begin();
            panic!("load failed");
        })
        .join();
        assert!(result.is_err());
        assert!(!counter.is_busy());
    }
}
