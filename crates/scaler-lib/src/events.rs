//! Observer lists for controller notifications
//!
//! Each category keeps its own callback list. Callbacks run synchronously on
//! the thread that produced the notification and must not block.

use crate::resources::{Allocation, ResourceRequest};
use crate::scaling::ScalingEvent;
use std::sync::{Arc, PoisonError, RwLock};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ObserverList<T: ?Sized> {
    callbacks: RwLock<Vec<Callback<T>>>,
}

impl<T: ?Sized> Default for ObserverList<T> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> ObserverList<T> {
    fn push(&self, callback: Callback<T>) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    fn notify(&self, value: &T) {
        // snapshot so a callback may register further observers
        let callbacks: Vec<Callback<T>> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(value);
        }
    }

    fn len(&self) -> usize {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn clear(&self) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Rejected request together with the recorded reason
#[derive(Debug, Clone)]
pub struct Rejection {
    pub request: ResourceRequest,
    pub reason: String,
}

#[derive(Default)]
pub struct Observers {
    scaling: ObserverList<ScalingEvent>,
    granted: ObserverList<[Allocation]>,
    released: ObserverList<[Allocation]>,
    rejected: ObserverList<Rejection>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_scaling_event(&self, f: impl Fn(&ScalingEvent) + Send + Sync + 'static) {
        self.scaling.push(Arc::new(f));
    }

    pub fn on_allocation_granted(&self, f: impl Fn(&[Allocation]) + Send + Sync + 'static) {
        self.granted.push(Arc::new(f));
    }

    pub fn on_allocation_released(&self, f: impl Fn(&[Allocation]) + Send + Sync + 'static) {
        self.released.push(Arc::new(f));
    }

    pub fn on_request_rejected(&self, f: impl Fn(&Rejection) + Send + Sync + 'static) {
        self.rejected.push(Arc::new(f));
    }

    pub fn notify_scaling_event(&self, event: &ScalingEvent) {
        self.scaling.notify(event);
    }

    pub fn notify_allocation_granted(&self, allocations: &[Allocation]) {
        if !allocations.is_empty() {
            self.granted.notify(allocations);
        }
    }

    pub fn notify_allocation_released(&self, allocations: &[Allocation]) {
        if !allocations.is_empty() {
            self.released.notify(allocations);
        }
    }

    pub fn notify_request_rejected(&self, rejection: &Rejection) {
        self.rejected.notify(rejection);
    }

    pub fn count(&self) -> usize {
        self.scaling.len() + self.granted.len() + self.released.len() + self.rejected.len()
    }

    /// Detach every observer
    pub fn clear(&self) {
        self.scaling.clear();
        self.granted.clear();
        self.released.clear();
        self.rejected.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Priority;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_observers_notified_per_category() {
        let observers = Observers::new();
        let rejected = Arc::new(AtomicUsize::new(0));
        let granted = Arc::new(AtomicUsize::new(0));

        let r = rejected.clone();
        observers.on_request_rejected(move |rej| {
            assert_eq!(rej.reason, "no cpu");
            r.fetch_add(1, Ordering::SeqCst);
        });
        let g = granted.clone();
        observers.on_allocation_granted(move |allocs| {
            g.fetch_add(allocs.len(), Ordering::SeqCst);
        });

        observers.notify_request_rejected(&Rejection {
            request: ResourceRequest::new("req-1", "svc", vec![], Priority::Normal),
            reason: "no cpu".into(),
        });
        // empty grants are not reported
        observers.notify_allocation_granted(&[]);

        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(granted.load(Ordering::SeqCst), 0);
        assert_eq!(observers.count(), 2);

        observers.clear();
        assert_eq!(observers.count(), 0);
    }
}
