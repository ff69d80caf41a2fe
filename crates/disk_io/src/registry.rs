//! One queue per physical device.
//!
//! Files on the same device share a dispatcher so that the device's
//! submission window is shared too. Queues are created lazily on first use
//! with the registry's configuration and current priority.

use std::fmt;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::config::{PriorityOp, QueueConfig};
use crate::error::QueueError;
use crate::file::DeviceId;
use crate::queue::AioQueue;
use crate::request::RequestPtr;

#[derive(Default)]
struct Registry {
    queues: FxHashMap<DeviceId, Arc<AioQueue>>,
    shut_down: bool,
}

/// Maps devices to their [`AioQueue`].
///
/// Dropping the registry shuts every queue down.
pub struct DiskQueues {
    config: Mutex<QueueConfig>,
    registry: Mutex<Registry>,
}

impl DiskQueues {
    /// Creates an empty registry; queues are built from `config`.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config: Mutex::new(config),
            registry: Mutex::new(Registry::default()),
        }
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().expect("disk queue registry mutex poisoned")
    }

    /// Returns the queue for `device`, creating it on first use.
    pub fn queue_for(&self, device: DeviceId) -> Result<Arc<AioQueue>, QueueError> {
        let mut registry = self.lock_registry();
        if registry.shut_down {
            return Err(QueueError::ShutDown);
        }
        if let Some(queue) = registry.queues.get(&device) {
            return Ok(Arc::clone(queue));
        }

        let config = self.config.lock().expect("disk queue config mutex poisoned").clone();
        let queue = AioQueue::new(&config)?;
        registry.queues.insert(device, Arc::clone(&queue));
        Ok(queue)
    }

    /// Sets the priority operation of every current and future queue.
    pub fn set_priority_op(&self, op: PriorityOp) {
        let registry = self.lock_registry();
        self.config.lock().expect("disk queue config mutex poisoned").priority = op;
        for queue in registry.queues.values() {
            queue.set_priority_op(op);
        }
    }

    /// Returns the priority operation applied to new queues.
    #[must_use]
    pub fn priority_op(&self) -> PriorityOp {
        self.config.lock().expect("disk queue config mutex poisoned").priority
    }

    /// Queues `request` on the queue of its file's device.
    pub fn add_request(&self, request: &RequestPtr) -> Result<(), QueueError> {
        self.queue_for(request.file().device())?.add_request(request)
    }

    /// Cancels `request` on the queue of its file's device.
    ///
    /// Returns false if no queue serves that device.
    pub fn cancel_request(&self, request: &RequestPtr) -> bool {
        let queue = self
            .lock_registry()
            .queues
            .get(&request.file().device())
            .cloned();
        queue.is_some_and(|queue| queue.cancel_request(request))
    }

    /// Shuts every queue down and rejects later lookups.
    ///
    /// All queues are drained even if one fails; the first error is
    /// returned.
    pub fn shutdown_all(&self) -> Result<(), QueueError> {
        let queues: Vec<Arc<AioQueue>> = {
            let mut registry = self.lock_registry();
            registry.shut_down = true;
            registry.queues.drain().map(|(_, queue)| queue).collect()
        };

        let mut first_error = None;
        for queue in queues {
            if let Err(err) = queue.shutdown() {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Number of devices with a queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_registry().queues.len()
    }

    /// Returns true if no queue has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for DiskQueues {
    fn drop(&mut self) {
        let _ = self.shutdown_all();
    }
}

impl fmt::Debug for DiskQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock_registry();
        f.debug_struct("DiskQueues")
            .field("devices", &registry.queues.len())
            .field("shut_down", &registry.shut_down)
            .finish_non_exhaustive()
    }
}
