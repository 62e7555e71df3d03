use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counter of live resources (client connections or tunnels) with an
/// optional ceiling.
#[derive(Debug)]
pub struct ConnectionCounter {
    active: AtomicUsize,
    /// 0 means unlimited.
    limit: usize,
}

impl ConnectionCounter {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            limit,
        })
    }

    /// Reserve a slot, or `None` if the ceiling has been reached.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let mut current = self.active.load(Ordering::Relaxed);

        loop {
            if self.limit > 0 && current >= self.limit {
                return None;
            }

            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(ConnectionGuard {
                        counter: Arc::clone(self),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// RAII slot in a [`ConnectionCounter`]; released on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    counter: Arc<ConnectionCounter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.active.fetch_sub(1, Ordering::Relaxed);
    }
}
