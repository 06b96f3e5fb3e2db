//! Explicit disposal.
//!
//! Rust values clean up on drop, but a container hands out shared
//! `Arc`s and cannot know when the last one goes away. Types that own
//! resources the container must release at a well-defined point
//! (scope end, container disposal) implement [`Disposable`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

/// A value the container disposes when its owning scope or container ends.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Ordered list of tracked disposables. Each entry is disposed once.
#[derive(Default)]
pub(crate) struct DisposableBag {
    items: Mutex<Vec<Arc<dyn Disposable>>>,
}

impl DisposableBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, disposable: Arc<dyn Disposable>) {
        self.items.lock().push(disposable);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Disposes everything tracked so far, in tracking order.
    pub fn dispose_all(&self) {
        let items = std::mem::take(&mut *self.items.lock());
        trace!(count = items.len(), "Disposing tracked instances");
        for item in items {
            item.dispose();
        }
    }
}

impl fmt::Debug for DisposableBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableBag").field("tracked", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        id: u32,
        log: Arc<PlMutex<Vec<u32>>>,
    }

    impl Disposable for Recorder {
        fn dispose(&self) {
            self.log.lock().push(self.id);
        }
    }

    #[test]
    fn disposes_in_tracking_order_once() {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let bag = DisposableBag::new();
        for id in 1..=3 {
            bag.track(Arc::new(Recorder { id, log: log.clone() }));
        }

        bag.dispose_all();
        bag.dispose_all();

        assert_eq!(*log.lock(), vec![1, 2, 3]);
        assert_eq!(bag.len(), 0);
    }
}
