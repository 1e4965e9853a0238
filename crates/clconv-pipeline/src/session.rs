// SPDX-License-Identifier: AGPL-3.0-only

//! Per-request inference session
//!
//! A session owns one command queue and every buffer created for the
//! request. Buffers are handed out as [`SessionBuffer`], which borrows the
//! session, so none of them can outlive it or survive into
//! [`InferenceSession::close`].

use crate::context::AcceleratorContext;
use crate::error::Result;
use clconv_device::{Buffer, CommandQueue, Event, MemAccess, Ownership, QueueProperties};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use tracing::trace;

/// Request-scoped device buffer, released when dropped
#[derive(Debug)]
pub struct SessionBuffer<'s> {
    buffer: Buffer,
    _session: PhantomData<&'s ()>,
}

impl Deref for SessionBuffer<'_> {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl DerefMut for SessionBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }
}

/// One inference request's queue and buffers
///
/// The queue is drained and released exactly once: by [`close`](Self::close)
/// on the normal path, by the queue's own `Drop` on early returns.
#[derive(Debug)]
pub struct InferenceSession<'c> {
    context: &'c AcceleratorContext,
    queue: CommandQueue,
}

impl<'c> InferenceSession<'c> {
    /// Open a session with a fresh profiling queue on the shared device
    ///
    /// # Errors
    ///
    /// Returns a resource error if the queue cannot be created.
    pub fn create(context: &'c AcceleratorContext) -> Result<Self> {
        let queue = context
            .device()
            .create_queue(QueueProperties { profiling: true })?;
        trace!("Opened session on queue {}", queue.id().raw());
        Ok(Self { context, queue })
    }

    /// Context the session runs against
    pub const fn context(&self) -> &'c AcceleratorContext {
        self.context
    }

    /// Session queue
    pub const fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Allocate an uninitialised request buffer
    ///
    /// # Errors
    ///
    /// Returns a resource error if allocation fails.
    pub fn create_buffer(&self, len: usize) -> Result<SessionBuffer<'_>> {
        let buffer = self
            .context
            .device()
            .create_buffer(len, MemAccess::ReadWrite, Ownership::Session)?;
        Ok(SessionBuffer {
            buffer,
            _session: PhantomData,
        })
    }

    /// Create a buffer sized to `data` and write it (blocking)
    ///
    /// # Errors
    ///
    /// Returns a resource error if allocation or transfer fails.
    pub fn upload_input(&self, data: &[f32]) -> Result<SessionBuffer<'_>> {
        let mut buffer = self.create_buffer(data.len())?;
        self.queue.write(&mut buffer, data)?;
        Ok(buffer)
    }

    /// Blocking write into a request buffer
    ///
    /// # Errors
    ///
    /// Returns a resource error if the transfer fails.
    pub fn write(&self, buffer: &mut Buffer, data: &[f32]) -> Result<()> {
        Ok(self.queue.write(buffer, data)?)
    }

    /// Blocking read once `wait` has completed
    ///
    /// # Errors
    ///
    /// Returns a resource error if the transfer or a pending launch fails.
    pub fn read(&self, buffer: &Buffer, wait: &[Event]) -> Result<Vec<f32>> {
        Ok(self.queue.read(buffer, wait)?)
    }

    /// Full drain of the session queue
    ///
    /// # Errors
    ///
    /// Returns a resource error if a queued launch fails.
    pub fn finish(&self) -> Result<()> {
        Ok(self.queue.finish()?)
    }

    /// Drain and release the queue
    ///
    /// # Errors
    ///
    /// Returns a resource error if draining or releasing fails.
    pub fn close(self) -> Result<()> {
        let id = self.queue.id();
        self.queue.release()?;
        trace!("Closed session on queue {}", id.raw());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::software_context;
    use crate::weights::InMemoryWeights;

    #[test]
    fn upload_then_read_round_trips() {
        let (backend, context) = software_context(&InMemoryWeights::zero_filters(vec![0.0; 8], vec![0.0; 8]));
        let session = InferenceSession::create(&context).unwrap();
        {
            let data: Vec<f32> = (0..1024u16).map(f32::from).collect();
            let input = session.upload_input(&data).unwrap();
            assert_eq!(input.len(), 1024);
            assert_eq!(input.ownership(), Ownership::Session);
            assert_eq!(input.access(), MemAccess::ReadWrite);
            assert!(session.queue().properties().profiling);
            assert!(std::ptr::eq(session.context(), &context));
            assert_eq!(session.read(&input, &[]).unwrap(), data);
        }
        session.close().unwrap();

        // Only the four persistent weights remain
        assert_eq!(backend.live_buffers().unwrap(), 4);
        assert_eq!(backend.live_queues().unwrap(), 0);
    }

    #[test]
    fn dropped_session_still_releases_queue() {
        let (backend, context) = software_context(&InMemoryWeights::zero_filters(vec![0.0; 8], vec![0.0; 8]));
        {
            let session = InferenceSession::create(&context).unwrap();
            let _buffer = session.create_buffer(16).unwrap();
            assert_eq!(backend.live_queues().unwrap(), 1);
        }
        assert_eq!(backend.live_queues().unwrap(), 0);
        assert_eq!(backend.live_buffers().unwrap(), 4);
    }
}
