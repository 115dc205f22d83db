//! Interface to the digitizer hardware.
//!
//! The vendor library is reached only through [`Driver`]; [`sim::SimulatedDigitizer`] implements
//! it in software.

use std::time::Duration;

use crate::Result;
use crate::buffer::DmaBuffer;
use crate::config::{Channel, ChannelConfiguration, ClockConfiguration, TriggerConfiguration};
use crate::regs::{AsyncFlags, ChannelMask};

pub mod sim;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Size of on-board acquisition memory, per channel.
    pub max_samples_per_channel: usize,
    /// ADC resolution. Samples are delivered as 16-bit words with the code in the high bits.
    pub bits_per_sample: u32,
    pub input_channels: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncReadParameters {
    pub channel_mask: ChannelMask,
    /// First sample to transfer relative to the trigger; negative to include pre-trigger samples.
    pub transfer_offset: i64,
    pub samples_per_record: usize,
    pub records_per_buffer: usize,
    pub records_per_capture: usize,
    pub flags: AsyncFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Complete,
    TimedOut,
}

pub trait Driver {
    fn get_channel_info(&mut self) -> Result<ChannelInfo>;

    fn set_clock(&mut self, clock: &ClockConfiguration) -> Result<()>;
    fn configure_channel(&mut self, channel: Channel, config: &ChannelConfiguration) -> Result<()>;
    fn configure_trigger(&mut self, trigger: &TriggerConfiguration) -> Result<()>;
    /// `None` disables the timeout; the hardware then waits for a trigger event indefinitely.
    fn set_trigger_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
    fn set_record_geometry(&mut self, pre_trigger_samples: usize, post_trigger_samples: usize)
        -> Result<()>;
    /// Only meaningful for acquisitions into on-board memory.
    fn set_record_count(&mut self, count: usize) -> Result<()>;

    fn allocate_page_aligned(&mut self, bytes: usize) -> Result<DmaBuffer> {
        DmaBuffer::new(bytes)
    }

    fn free(&mut self, buffer: DmaBuffer) -> Result<()> {
        drop(buffer);
        Ok(())
    }

    /// Grant the hardware write access to `buffer` until its completion has been awaited.
    fn post_buffer(&mut self, buffer: &mut DmaBuffer) -> Result<()>;
    /// Wait for the oldest posted buffer, which must be `buffer`, to be filled.
    fn wait_buffer_complete(&mut self, buffer: &mut DmaBuffer, timeout: Option<Duration>)
        -> Result<WaitStatus>;

    fn before_async_read(&mut self, params: &AsyncReadParameters) -> Result<()>;
    fn start_capture(&mut self) -> Result<()>;
    fn abort_capture(&mut self) -> Result<()>;
    fn busy(&mut self) -> Result<bool>;

    /// Copy one record of one channel out of on-board memory.
    fn read_record(&mut self, channel: Channel, record: usize, transfer_offset: i64,
                   data: &mut [u16]) -> Result<()>;
}

/// Lends a driver to a [`Device`](crate::Device) without giving up ownership of it.
impl<D: Driver + ?Sized> Driver for &mut D {
    fn get_channel_info(&mut self) -> Result<ChannelInfo> {
        (**self).get_channel_info()
    }

    fn set_clock(&mut self, clock: &ClockConfiguration) -> Result<()> {
        (**self).set_clock(clock)
    }

    fn configure_channel(&mut self, channel: Channel, config: &ChannelConfiguration) -> Result<()> {
        (**self).configure_channel(channel, config)
    }

    fn configure_trigger(&mut self, trigger: &TriggerConfiguration) -> Result<()> {
        (**self).configure_trigger(trigger)
    }

    fn set_trigger_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_trigger_timeout(timeout)
    }

    fn set_record_geometry(&mut self, pre_trigger_samples: usize, post_trigger_samples: usize)
            -> Result<()> {
        (**self).set_record_geometry(pre_trigger_samples, post_trigger_samples)
    }

    fn set_record_count(&mut self, count: usize) -> Result<()> {
        (**self).set_record_count(count)
    }

    fn allocate_page_aligned(&mut self, bytes: usize) -> Result<DmaBuffer> {
        (**self).allocate_page_aligned(bytes)
    }

    fn free(&mut self, buffer: DmaBuffer) -> Result<()> {
        (**self).free(buffer)
    }

    fn post_buffer(&mut self, buffer: &mut DmaBuffer) -> Result<()> {
        (**self).post_buffer(buffer)
    }

    fn wait_buffer_complete(&mut self, buffer: &mut DmaBuffer, timeout: Option<Duration>)
            -> Result<WaitStatus> {
        (**self).wait_buffer_complete(buffer, timeout)
    }

    fn before_async_read(&mut self, params: &AsyncReadParameters) -> Result<()> {
        (**self).before_async_read(params)
    }

    fn start_capture(&mut self) -> Result<()> {
        (**self).start_capture()
    }

    fn abort_capture(&mut self) -> Result<()> {
        (**self).abort_capture()
    }

    fn busy(&mut self) -> Result<bool> {
        (**self).busy()
    }

    fn read_record(&mut self, channel: Channel, record: usize, transfer_offset: i64,
                   data: &mut [u16]) -> Result<()> {
        (**self).read_record(channel, record, transfer_offset, data)
    }
}
