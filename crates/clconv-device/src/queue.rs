// SPDX-License-Identifier: AGPL-3.0-only

//! Command queues and completion events
//!
//! Queues execute in order but asynchronously to the host. Nothing a launch
//! writes is guaranteed visible until the queue is drained ([`CommandQueue::finish`]),
//! a blocking read is issued, or the launch's [`Event`] is waited on.

use crate::backend::{ComputeBackend, DeviceId, EventId, KernelId, NdRange, QueueId, QueueProperties};
use crate::buffer::Buffer;
use crate::error::{DeviceError, Result};
use std::sync::Arc;

/// Completion marker for one enqueued launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    id: EventId,
}

impl Event {
    /// Backend id
    #[must_use]
    pub const fn id(&self) -> EventId {
        self.id
    }
}

fn event_ids(events: &[Event]) -> Vec<EventId> {
    events.iter().map(Event::id).collect()
}

/// In-order command queue
///
/// Released exactly once: explicitly through [`CommandQueue::release`], or
/// by `Drop` on paths that never reached it.
#[derive(Debug)]
pub struct CommandQueue {
    backend: Arc<dyn ComputeBackend>,
    id: QueueId,
    properties: QueueProperties,
    released: bool,
}

impl CommandQueue {
    pub(crate) fn create(
        backend: Arc<dyn ComputeBackend>,
        device: DeviceId,
        properties: QueueProperties,
    ) -> Result<Self> {
        let id = backend.create_queue(device, properties)?;
        tracing::debug!("Created queue {} ({properties:?})", id.raw());

        Ok(Self {
            backend,
            id,
            properties,
            released: false,
        })
    }

    /// Backend id
    #[must_use]
    pub const fn id(&self) -> QueueId {
        self.id
    }

    /// Properties the queue was created with
    #[must_use]
    pub const fn properties(&self) -> QueueProperties {
        self.properties
    }

    /// Blocking write of `data` into the whole buffer
    ///
    /// Takes the buffer mutably: shared buffers handed out as `&Buffer`
    /// cannot be overwritten through a queue.
    ///
    /// # Errors
    ///
    /// Returns error if `data` does not fill the buffer exactly.
    pub fn write(&self, buffer: &mut Buffer, data: &[f32]) -> Result<()> {
        if data.len() != buffer.len() {
            return Err(DeviceError::transfer_failed(format!(
                "Write of {} elements into {}-element buffer",
                data.len(),
                buffer.len()
            )));
        }

        self.backend.write_buffer(self.id, buffer.id(), data)
    }

    /// Blocking read of the whole buffer once `wait` has completed
    ///
    /// # Errors
    ///
    /// Returns error if the transfer or a pending launch fails.
    pub fn read(&self, buffer: &Buffer, wait: &[Event]) -> Result<Vec<f32>> {
        let mut out = vec![0.0f32; buffer.len()];
        self.backend
            .read_buffer(self.id, buffer.id(), &event_ids(wait), &mut out)?;
        Ok(out)
    }

    /// Block until every event has completed
    ///
    /// # Errors
    ///
    /// Returns error if a launch fails while completing.
    pub fn wait(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.backend.wait_for_events(&event_ids(events))
    }

    /// Full drain: block until every queued command has completed
    ///
    /// # Errors
    ///
    /// Returns error if a launch fails while draining.
    pub fn finish(&self) -> Result<()> {
        self.backend.finish(self.id)
    }

    /// Drain, then release the queue
    ///
    /// # Errors
    ///
    /// Returns error if draining or releasing fails. The queue is considered
    /// released either way.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let drained = self.backend.finish(self.id);
        let released = self.backend.release_queue(self.id);
        tracing::debug!("Released queue {}", self.id.raw());
        drained.and(released)
    }

    pub(crate) fn enqueue_kernel(
        &self,
        kernel: KernelId,
        range: NdRange,
        wait: &[Event],
    ) -> Result<Event> {
        let id = self
            .backend
            .enqueue_kernel(self.id, kernel, range, &event_ids(wait))?;
        Ok(Event { id })
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!("Queue {} dropped without release; draining", self.id.raw());
        if let Err(e) = self
            .backend
            .finish(self.id)
            .and_then(|()| self.backend.release_queue(self.id))
        {
            tracing::warn!("Failed to release queue {}: {e}", self.id.raw());
        }
    }
}
