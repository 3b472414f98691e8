use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, ShadingError};
use crate::gpu::GpuBackend;

type Action = Box<dyn FnOnce(&mut dyn GpuBackend) -> Result<()>>;

struct Pending {
    label: &'static str,
    action: Action,
}

/// Outcome of one drain of the [`UpdateQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub executed: usize,
    pub failed: usize,
}

/// FIFO of deferred GPU actions, drained exactly once per frame.
///
/// The queue is a cheap shared handle: the scene owns one and hands clones
/// to the surfaces that need to defer work. Actions run in enqueue order
/// with the backend passed in; an action may not enqueue more work.
#[derive(Clone, Default)]
pub struct UpdateQueue {
    pending: Rc<RefCell<Vec<Pending>>>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &self,
        label: &'static str,
        action: impl FnOnce(&mut dyn GpuBackend) -> Result<()> + 'static,
    ) {
        self.pending.borrow_mut().push(Pending {
            label,
            action: Box::new(action),
        });
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Labels of the pending actions, in execution order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.pending.borrow().iter().map(|p| p.label).collect()
    }

    pub fn clear(&self) {
        self.pending.borrow_mut().clear();
    }

    /// Runs every pending action once and empties the queue.
    ///
    /// A failing action is logged and counted; the drain continues. An action
    /// that enqueues new work aborts the drain with
    /// [`ShadingError::QueueGrewDuringDrain`]. The queue is empty afterwards
    /// in every case.
    pub fn flush(&self, gpu: &mut dyn GpuBackend) -> Result<FlushReport> {
        let drained = std::mem::take(&mut *self.pending.borrow_mut());
        let mut report = FlushReport::default();
        for Pending { label, action } in drained {
            let outcome = action(gpu);
            let added = self.len();
            if added > 0 {
                warn!(label, added, "deferred action enqueued work while the queue was draining");
                self.clear();
                return Err(ShadingError::QueueGrewDuringDrain { label, added });
            }
            report.executed += 1;
            if let Err(err) = outcome {
                warn!(label, error = %err, "deferred action failed");
                report.failed += 1;
            }
        }
        if report.executed > 0 {
            debug!(executed = report.executed, failed = report.failed, "flushed update queue");
        }
        Ok(report)
    }
}

impl fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("pending", &self.labels())
            .finish()
    }
}
