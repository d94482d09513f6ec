//! The enqueue/dequeue cycle run once per presented frame.

use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::device::{OutputDevice, is_transient};
use crate::error::{FrameError, SessionError};
use crate::options::RetryPolicy;
use crate::pool::BufferPool;

/// Drives stream on/off and the per-frame buffer handshake.
///
/// Not reentrant: `present` takes `&mut self` and the pool, so two cycles
/// can't overlap.
#[derive(Debug)]
pub struct StreamController {
    retry: RetryPolicy,
    presented: u64,
    dropped: u64,
}

impl StreamController {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            presented: 0,
            dropped: 0,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn start<D: OutputDevice>(&mut self, device: &mut D) -> Result<(), SessionError> {
        device.stream_on().map_err(SessionError::StreamStart)?;
        info!("Set to stream on successfully");
        Ok(())
    }

    pub fn stop<D: OutputDevice>(&mut self, device: &mut D) {
        match device.stream_off() {
            Ok(()) => info!(presented = self.presented, dropped = self.dropped, "Stream off"),
            Err(err) => error!(%err, "Could not stream off"),
        }
    }

    /// Hands the free buffer to the device and takes back whichever buffer
    /// the device is done with. Returns the index of the new free buffer.
    ///
    /// If no buffer is free (an earlier cycle timed out) the submit step is
    /// skipped and only the dequeue is retried. On any error the pool keeps
    /// its states: nothing is marked free that the device didn't return.
    pub fn present<D, C>(
        &mut self,
        device: &mut D,
        pool: &mut BufferPool<D::Mapping>,
        clock: &C,
    ) -> Result<u32, FrameError>
    where
        D: OutputDevice,
        C: Clock + ?Sized,
    {
        let result = self.cycle(device, pool, clock);
        match result {
            Ok(index) => {
                self.presented += 1;
                debug!(index, presented = self.presented, "Buffer dequeued");
                if self.presented % 100 == 0 {
                    info!(presented = self.presented, dropped = self.dropped, "Progress");
                }
            }
            Err(_) => self.dropped += 1,
        }
        result
    }

    /// Takes back one queued buffer without submitting anything. Used when an
    /// earlier cycle timed out and the process holds no free buffer.
    pub fn reclaim<D, C>(
        &mut self,
        device: &mut D,
        pool: &mut BufferPool<D::Mapping>,
        clock: &C,
    ) -> Result<u32, FrameError>
    where
        D: OutputDevice,
        C: Clock + ?Sized,
    {
        let result = self
            .dequeue(device, clock)
            .and_then(|index| pool.mark_returned(index).map(|()| index));
        match &result {
            Ok(index) => debug!(index, "Buffer reclaimed"),
            Err(_) => self.dropped += 1,
        }
        result
    }

    fn cycle<D, C>(
        &self,
        device: &mut D,
        pool: &mut BufferPool<D::Mapping>,
        clock: &C,
    ) -> Result<u32, FrameError>
    where
        D: OutputDevice,
        C: Clock + ?Sized,
    {
        if let Some(index) = pool.writable_index() {
            device
                .queue_buffer(index, clock.now())
                .map_err(|source| FrameError::Submit { index, source })?;
            pool.mark_queued(index)?;
            trace!(index, "Buffer queued");
        }

        let index = self.dequeue(device, clock)?;
        pool.mark_returned(index)?;
        Ok(index)
    }

    fn dequeue<D, C>(&self, device: &mut D, clock: &C) -> Result<u32, FrameError>
    where
        D: OutputDevice,
        C: Clock + ?Sized,
    {
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match device.dequeue_buffer() {
                Ok(index) => return Ok(index),
                Err(err) if is_transient(&err) => {
                    trace!(attempt, "Device not ready");
                    if attempt < attempts {
                        clock.sleep(self.retry.delay);
                    }
                }
                Err(err) => return Err(FrameError::Dequeue(err)),
            }
        }
        warn!(attempts, "Dequeue timed out");
        Err(FrameError::DequeueTimeout { attempts })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::format::{FrameFormat, PlanarFormat, PlaneLayout};
    use crate::pool::BufferState;
    use crate::testing::{FakeDevice, ManualClock, Op};

    fn streaming(count: u32) -> (FakeDevice, BufferPool<Vec<u8>>, StreamController, ManualClock) {
        let layout =
            PlaneLayout::new(FrameFormat { width: 32, height: 16, format: PlanarFormat::I420 }, 32);
        let mut device = FakeDevice::output();
        let clock = ManualClock::default();
        let pool = BufferPool::allocate(&mut device, count, layout, &clock).unwrap();
        let mut controller = StreamController::new(RetryPolicy::default());
        controller.start(&mut device).unwrap();
        (device, pool, controller, clock)
    }

    #[test]
    fn present_cycles_one_buffer() {
        let (mut device, mut pool, mut controller, clock) = streaming(4);
        let index = controller.present(&mut device, &mut pool, &clock).unwrap();

        assert_eq!(index, 0);
        assert_eq!(pool.writable_index(), Some(0));
        assert_eq!(pool.state(3), Some(BufferState::Queued));
        assert_eq!(pool.queued_count(), 3);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(controller.presented(), 1);
        assert!(clock.sleeps.borrow().is_empty());
    }

    #[test]
    fn buffers_return_in_device_order() {
        let (mut device, mut pool, mut controller, clock) = streaming(4);
        device.lifo = true;
        let index = controller.present(&mut device, &mut pool, &clock).unwrap();
        // The buffer just submitted comes straight back.
        assert_eq!(index, 3);
        assert_eq!(pool.queued_count() + pool.free_count(), 4);
    }

    #[test]
    fn transient_failures_are_retried() {
        let (mut device, mut pool, mut controller, clock) = streaming(3);
        device.busy_polls = 5;
        controller.present(&mut device, &mut pool, &clock).unwrap();
        assert_eq!(device.count(Op::Dequeue), 6);
        assert_eq!(clock.sleeps.borrow().len(), 5);
        assert_eq!(clock.slept(), Duration::from_millis(150));
    }

    #[test]
    fn timeout_drops_frame_and_keeps_pool_state() {
        let (mut device, mut pool, mut controller, clock) = streaming(4);
        device.stalled = true;

        let err = controller.present(&mut device, &mut pool, &clock).unwrap_err();
        assert!(matches!(err, FrameError::DequeueTimeout { attempts: 16 }));
        assert_eq!(device.count(Op::Dequeue), 16);
        assert_eq!(clock.slept(), Duration::from_millis(450));
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.queued_count(), 4);
        assert_eq!(controller.dropped(), 1);

        // Next attempt only dequeues; nothing is resubmitted.
        device.stalled = false;
        let queues_before = device.count(Op::Queue);
        let index = controller.present(&mut device, &mut pool, &clock).unwrap();
        assert_eq!(device.count(Op::Queue), queues_before);
        assert_eq!(pool.writable_index(), Some(index));
        assert_eq!(pool.queued_count(), 3);
    }

    #[test]
    fn reclaim_takes_back_a_buffer_without_submitting() {
        let (mut device, mut pool, mut controller, clock) = streaming(4);
        device.stalled = true;
        controller.present(&mut device, &mut pool, &clock).unwrap_err();
        assert_eq!(pool.writable_index(), None);

        assert!(matches!(
            controller.reclaim(&mut device, &mut pool, &clock),
            Err(FrameError::DequeueTimeout { .. })
        ));
        assert_eq!(controller.dropped(), 2);

        device.stalled = false;
        let queues_before = device.count(Op::Queue);
        let index = controller.reclaim(&mut device, &mut pool, &clock).unwrap();
        assert_eq!(index, 0);
        assert_eq!(pool.writable_index(), Some(0));
        assert_eq!(device.count(Op::Queue), queues_before);
    }

    #[test]
    fn hard_dequeue_error_is_not_retried() {
        let (mut device, mut pool, mut controller, clock) = streaming(3);
        device.failing.push(Op::Dequeue);
        let err = controller.present(&mut device, &mut pool, &clock).unwrap_err();
        assert!(matches!(err, FrameError::Dequeue(_)));
        assert_eq!(device.count(Op::Dequeue), 1);
        assert!(clock.sleeps.borrow().is_empty());
    }

    #[test]
    fn submit_failure_keeps_buffer_writable() {
        let (mut device, mut pool, mut controller, clock) = streaming(4);
        device.failing.push(Op::Queue);
        let err = controller.present(&mut device, &mut pool, &clock).unwrap_err();
        assert!(matches!(err, FrameError::Submit { index: 3, .. }));
        assert_eq!(pool.writable_index(), Some(3));
        assert_eq!(device.count(Op::Dequeue), 0);

        device.failing.clear();
        controller.present(&mut device, &mut pool, &clock).unwrap();
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn unknown_buffer_from_device_is_rejected() {
        let (mut device, mut pool, mut controller, clock) = streaming(4);
        device.bogus_index = Some(7);
        let err = controller.present(&mut device, &mut pool, &clock).unwrap_err();
        assert!(matches!(err, FrameError::UnexpectedBuffer { index: 7 }));
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.queued_count(), 4);
    }

    #[test]
    fn stop_failure_is_only_logged() {
        let (mut device, _pool, mut controller, _clock) = streaming(3);
        device.failing.push(Op::StreamOff);
        controller.stop(&mut device);
        assert_eq!(device.count(Op::StreamOff), 1);
    }

    #[test]
    fn start_failure_is_fatal() {
        let mut device = FakeDevice::output();
        device.failing.push(Op::StreamOn);
        let mut controller = StreamController::new(RetryPolicy::default());
        assert!(matches!(controller.start(&mut device), Err(SessionError::StreamStart(_))));
    }
}
