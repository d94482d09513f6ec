//! Device-backed buffer pool and per-buffer ownership tracking.

use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::compositor::WritableFrame;
use crate::device::{BufferLayout, OutputDevice};
use crate::error::{AllocationError, FrameError};
use crate::format::PlaneLayout;

/// Shallowest pipeline that keeps the device fed while one buffer is written.
pub const MIN_BUFFERS: u32 = 3;

/// Who owns a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the process and writable.
    Free,
    /// Handed to the device; must not be written until dequeued.
    Queued,
}

pub struct Buffer<M> {
    layout: BufferLayout,
    memory: M,
    state: BufferState,
}

impl<M> Buffer<M> {
    pub fn index(&self) -> u32 {
        self.layout.index
    }

    pub fn len(&self) -> usize {
        self.layout.length
    }

    pub fn is_empty(&self) -> bool {
        self.layout.length == 0
    }

    pub fn state(&self) -> BufferState {
        self.state
    }
}

/// Mapped buffers indexed by device buffer index.
///
/// At most one buffer is [`BufferState::Free`] at any time once primed; it is
/// the only one the compositor can reach.
pub struct BufferPool<M> {
    buffers: Vec<Buffer<M>>,
    layout: PlaneLayout,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> BufferPool<M> {
    /// Requests `count` buffers, maps every granted one and primes the device
    /// with all but the last, which stays free as the first write target.
    ///
    /// Any failure unmaps what was mapped and returns the device pool.
    pub fn allocate<D, C>(
        device: &mut D,
        count: u32,
        layout: PlaneLayout,
        clock: &C,
    ) -> Result<Self, AllocationError>
    where
        D: OutputDevice<Mapping = M>,
        C: Clock + ?Sized,
    {
        let granted = device
            .request_buffers(count)
            .map_err(|source| AllocationError::Request { count, source })?;
        if granted < MIN_BUFFERS {
            release_device_pool(device);
            return Err(AllocationError::InsufficientBuffers { requested: count, granted });
        }

        let mut pool = Self {
            buffers: Vec::with_capacity(granted as usize),
            layout,
        };
        let setup = pool
            .map_all(device, granted)
            .and_then(|()| pool.prime(device, clock));
        if let Err(err) = setup {
            pool.release(device);
            return Err(err);
        }

        info!(
            count = granted,
            queued = pool.queued_count(),
            frame_len = layout.frame_len(),
            "Buffer pool primed"
        );
        Ok(pool)
    }

    fn map_all<D>(&mut self, device: &mut D, granted: u32) -> Result<(), AllocationError>
    where
        D: OutputDevice<Mapping = M>,
    {
        let required = self.layout.frame_len();
        for index in 0..granted {
            let layout = device
                .query_buffer(index)
                .map_err(|source| AllocationError::Query { index, source })?;
            if layout.length < required {
                return Err(AllocationError::BufferTooSmall {
                    index,
                    length: layout.length,
                    required,
                });
            }
            let memory = device
                .map_buffer(layout)
                .map_err(|source| AllocationError::Map { index, source })?;
            debug!(index, offset = layout.offset, length = layout.length, "Buffer mapped");
            self.buffers.push(Buffer {
                layout,
                memory,
                state: BufferState::Free,
            });
        }
        Ok(())
    }

    fn prime<D, C>(&mut self, device: &mut D, clock: &C) -> Result<(), AllocationError>
    where
        D: OutputDevice<Mapping = M>,
        C: Clock + ?Sized,
    {
        let ahead = self.buffers.len().saturating_sub(1);
        for buffer in &mut self.buffers[..ahead] {
            let index = buffer.layout.index;
            device
                .queue_buffer(index, clock.now())
                .map_err(|source| AllocationError::Prime { index, source })?;
            buffer.state = BufferState::Queued;
        }
        Ok(())
    }

    /// The buffer currently owned by the process, if any.
    pub fn writable_frame(&mut self) -> Option<WritableFrame<'_>> {
        let layout = self.layout;
        self.buffers
            .iter_mut()
            .find(|b| b.state == BufferState::Free)
            .and_then(|b| WritableFrame::new(b.layout.index, b.memory.as_mut(), layout))
    }

    /// Unmaps every buffer and releases the device pool. Best effort.
    pub fn release<D>(self, device: &mut D)
    where
        D: OutputDevice<Mapping = M>,
    {
        let count = self.buffers.len();
        drop(self.buffers);
        release_device_pool(device);
        debug!(count, "Buffer pool released");
    }
}

impl<M> BufferPool<M> {
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn layout(&self) -> &PlaneLayout {
        &self.layout
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Buffer<M>> {
        self.buffers.iter()
    }

    pub fn state(&self, index: u32) -> Option<BufferState> {
        self.buffers.get(index as usize).map(|b| b.state)
    }

    pub fn queued_count(&self) -> usize {
        self.count(BufferState::Queued)
    }

    pub fn free_count(&self) -> usize {
        self.count(BufferState::Free)
    }

    fn count(&self, state: BufferState) -> usize {
        self.buffers.iter().filter(|b| b.state == state).count()
    }

    /// Index of the buffer the process may write.
    pub fn writable_index(&self) -> Option<u32> {
        self.buffers
            .iter()
            .find(|b| b.state == BufferState::Free)
            .map(|b| b.layout.index)
    }

    /// Records that `index` was handed to the device.
    pub fn mark_queued(&mut self, index: u32) -> Result<(), FrameError> {
        self.transition(index, BufferState::Free, BufferState::Queued)
    }

    /// Records that the device returned `index`. Rejects indices that were
    /// not queued, leaving all states untouched.
    pub fn mark_returned(&mut self, index: u32) -> Result<(), FrameError> {
        self.transition(index, BufferState::Queued, BufferState::Free)
    }

    fn transition(&mut self, index: u32, from: BufferState, to: BufferState) -> Result<(), FrameError> {
        match self.buffers.get_mut(index as usize) {
            Some(buffer) if buffer.state == from => {
                buffer.state = to;
                Ok(())
            }
            _ => Err(FrameError::UnexpectedBuffer { index }),
        }
    }
}

fn release_device_pool<D: OutputDevice>(device: &mut D) {
    if let Err(err) = device.request_buffers(0) {
        error!(%err, "Releasing device buffers failed");
    }
}
