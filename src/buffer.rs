use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use vmap::MapMut;

use crate::{Error, Result};
use crate::sys::{Driver, WaitStatus};

/// Page-aligned block of host memory that the hardware can write into directly.
///
/// The mapping is rounded up to whole pages; only the first `len` bytes are exposed.
#[derive(Debug)]
pub struct DmaBuffer {
    map: MapMut,
    len: usize,
}

// SAFETY: Conceptually the same as `Box<[u8]>`. The destructor can run on any thread.
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    pub fn new(len: usize) -> Result<DmaBuffer> {
        let size = len.max(1).checked_next_multiple_of(vmap::allocation_size())
            .ok_or(Error::Allocation { bytes: len })?;
        let map = MapMut::new(size).map_err(|error| {
            log::warn!("cannot map {} byte DMA buffer: {}", len, error);
            Error::Allocation { bytes: len }
        })?;
        log::trace!("mapped DMA buffer at {:?}+{:#x}", map.as_ptr(), map.len());
        Ok(DmaBuffer { map, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..self.len]
    }

    /// View the buffer as 16-bit sample words.
    pub fn words(&self) -> Result<&[u16]> {
        let len = self.len;
        bytemuck::try_cast_slice(self.as_slice()).map_err(|error| Error::constraint(
            format!("{} byte buffer does not hold whole sample words: {:?}", len, error)))
    }

    pub fn words_mut(&mut self) -> Result<&mut [u16]> {
        let len = self.len;
        bytemuck::try_cast_slice_mut(self.as_mut_slice()).map_err(|error| Error::constraint(
            format!("{} byte buffer does not hold whole sample words: {:?}", len, error)))
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        log::trace!("unmapping DMA buffer at {:?}+{:#x}", self.map.as_ptr(), self.map.len());
    }
}

/// Cancels an in-progress drain from any thread.
///
/// The request is observed between buffer completions, so it takes effect within one
/// per-buffer timeout.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> AbortHandle {
        Default::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free,
    /// Owned by the hardware until its completion is awaited.
    Posted,
    Filled,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Complete { buffers: usize },
    Aborted { buffers: usize },
}

impl DrainOutcome {
    pub fn buffers(self) -> usize {
        match self {
            Self::Complete { buffers } | Self::Aborted { buffers } => buffers,
        }
    }
}

#[derive(Debug)]
struct Slot {
    buffer: DmaBuffer,
    state: BufferState,
}

#[derive(Debug, Default)]
pub struct BufferPool {
    slots: Vec<Slot>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new() -> BufferPool {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn state(&self, index: usize) -> Option<BufferState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    pub fn count(&self, state: BufferState) -> usize {
        self.slots.iter().filter(|slot| slot.state == state).count()
    }

    pub fn allocate<D: Driver + ?Sized>(&mut self, driver: &mut D, count: usize, size: usize)
            -> Result<()> {
        if !self.slots.is_empty() {
            return Err(Error::unsupported("DMA buffers are already allocated"))
        }
        for _ in 0..count {
            match driver.allocate_page_aligned(size) {
                Ok(buffer) => self.slots.push(Slot { buffer, state: BufferState::Free }),
                Err(error) => {
                    log::warn!("buffer pool: allocation of {} x {} bytes failed after {}",
                        count, size, self.slots.len());
                    if let Err(release_error) = self.release_all(driver) {
                        log::warn!("buffer pool: cannot release partial allocation: {}",
                            release_error);
                    }
                    return Err(error)
                }
            }
        }
        self.buffer_size = size;
        log::debug!("buffer pool: allocated {} x {} bytes", count, size);
        Ok(())
    }

    /// Hand every free buffer to the hardware. Returns the number of buffers posted.
    pub fn post_all<D: Driver + ?Sized>(&mut self, driver: &mut D) -> Result<usize> {
        let mut posted = 0;
        for slot in self.slots.iter_mut().filter(|slot| slot.state == BufferState::Free) {
            driver.post_buffer(&mut slot.buffer)?;
            slot.state = BufferState::Posted;
            posted += 1;
        }
        log::trace!("buffer pool: posted {} buffers", posted);
        Ok(posted)
    }

    /// Wait for `expected` buffer completions in round-robin order.
    ///
    /// Every filled buffer is passed to `process` along with its sequence number in the capture,
    /// then reposted if the hardware still has to fill it again, or freed otherwise. `timeout`
    /// bounds each wait individually.
    pub fn drain<D, F>(&mut self, driver: &mut D, expected: usize, timeout: Option<Duration>,
                       abort: &AbortHandle, mut process: F) -> Result<DrainOutcome>
            where D: Driver + ?Sized, F: FnMut(usize, &DmaBuffer) -> Result<()> {
        let count = self.slots.len();
        if count == 0 && expected > 0 {
            return Err(Error::unsupported("no DMA buffers are allocated"))
        }
        for sequence in 0..expected {
            if abort.is_aborted() {
                log::info!("buffer pool: drain aborted after {} of {} buffers",
                    sequence, expected);
                return Ok(DrainOutcome::Aborted { buffers: sequence })
            }
            let index = sequence % count;
            let slot = &mut self.slots[index];
            if slot.state != BufferState::Posted {
                return Err(Error::unsupported(
                    format!("buffer {} is {:?} instead of posted", index, slot.state)))
            }
            match driver.wait_buffer_complete(&mut slot.buffer, timeout)? {
                WaitStatus::Complete => slot.state = BufferState::Filled,
                WaitStatus::TimedOut => {
                    log::debug!("buffer pool: buffer {} timed out ({} of {} complete)",
                        index, sequence, expected);
                    return Err(Error::CaptureTimeout(timeout.unwrap_or(Duration::MAX)))
                }
            }
            log::trace!("buffer pool: buffer {} filled (#{})", index, sequence);
            slot.state = BufferState::Draining;
            process(sequence, &slot.buffer)?;
            if sequence + count < expected {
                driver.post_buffer(&mut slot.buffer)?;
                slot.state = BufferState::Posted;
            } else {
                slot.state = BufferState::Free;
            }
        }
        Ok(DrainOutcome::Complete { buffers: expected })
    }

    /// Return every buffer to the free state after the hardware has been stopped, discarding
    /// any data that was not drained. Returns the number of buffers discarded.
    pub fn reclaim(&mut self) -> usize {
        let mut discarded = 0;
        for slot in self.slots.iter_mut().filter(|slot| slot.state != BufferState::Free) {
            slot.state = BufferState::Free;
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("buffer pool: discarded {} undrained buffers", discarded);
        }
        discarded
    }

    /// Free every buffer through the driver. Calling this on an empty pool does nothing.
    pub fn release_all<D: Driver + ?Sized>(&mut self, driver: &mut D) -> Result<()> {
        if self.slots.is_empty() {
            return Ok(())
        }
        let posted = self.count(BufferState::Posted);
        if posted > 0 {
            log::warn!("buffer pool: releasing {} buffers still posted to hardware", posted);
        }
        let mut result = Ok(());
        for slot in self.slots.drain(..) {
            if let Err(error) = driver.free(slot.buffer) {
                if result.is_ok() { result = Err(error) }
            }
        }
        log::debug!("buffer pool: released all buffers");
        self.buffer_size = 0;
        result
    }
}
