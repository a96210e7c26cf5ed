//! Resolve-once delivery of output partitions.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::array::{ArrayPartition, Element, PartitionHandle};

/// Producer side of a [`PartitionHandle`].
///
/// Wrapped for `Clone` so it can live in actor state. Fulfilling twice is a
/// protocol violation and panics.
pub struct Promise<T> {
    tx: Arc<Mutex<Option<oneshot::Sender<Arc<ArrayPartition<T>>>>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Create a connected promise / partition handle pair.
pub fn channel<T: Element>() -> (Promise<T>, PartitionHandle<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Promise {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        PartitionHandle::from_receiver(rx),
    )
}

impl<T> Promise<T> {
    /// Whether the promise was fulfilled or abandoned.
    pub fn is_settled(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Publish the partition. Must be called exactly once.
    pub fn fulfil(&self, partition: ArrayPartition<T>) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match tx {
            // Nobody waiting for the result is fine
            Some(tx) => {
                let _ = tx.send(Arc::new(partition));
            }
            None => panic!("promise fulfilled more than once"),
        }
    }

    /// Give up without publishing. Every waiting handle fails.
    pub fn abandon(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(tx);
    }
}
