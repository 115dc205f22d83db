//! Software stand-in for a digitizer card.
//!
//! Each enabled channel sees a sine wave at half of full scale, phase-shifted by 45° per channel.
//! In triggered modes the wave is aligned to the trigger, so every record is identical; in
//! continuous mode the wave runs on across buffers.

use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::PI;
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::{Error, Result};
use crate::buffer::{AbortHandle, DmaBuffer};
use crate::config::{Channel, ChannelConfiguration, ClockConfiguration, TriggerConfiguration};
use crate::regs::AsyncFlags;
use super::{AsyncReadParameters, ChannelInfo, Driver, WaitStatus};

/// Samples per period of the simulated waveform.
const WAVEFORM_PERIOD: i64 = 64;

fn sim_error(message: String) -> Error {
    Error::Driver(message.into())
}

#[derive(Debug)]
pub struct SimulatedDigitizer {
    info: ChannelInfo,
    trigger_period: Duration,
    triggers_arrive: bool,
    memory_limit: Option<usize>,
    abort_after: Option<(usize, AbortHandle)>,
    failing_call: Option<&'static str>,
    calls: Vec<&'static str>,

    clock: Option<ClockConfiguration>,
    channels: BTreeMap<Channel, ChannelConfiguration>,
    trigger: Option<TriggerConfiguration>,
    trigger_timeout: Option<Duration>,
    record_geometry: Option<(usize, usize)>,
    record_count: usize,
    transfer: Option<AsyncReadParameters>,

    allocated: usize,
    posted: VecDeque<usize>,
    completed_buffers: usize,
    started: Option<Instant>,
}

impl SimulatedDigitizer {
    pub fn new(input_channels: usize, bits_per_sample: u32) -> SimulatedDigitizer {
        assert!((1..=16).contains(&bits_per_sample), "unsupported resolution");
        assert!((1..=16).contains(&input_channels), "unsupported channel count");
        SimulatedDigitizer {
            info: ChannelInfo {
                max_samples_per_channel: 256 << 20,
                bits_per_sample,
                input_channels,
            },
            trigger_period: Duration::ZERO,
            triggers_arrive: true,
            memory_limit: None,
            abort_after: None,
            failing_call: None,
            calls: Vec::new(),
            clock: None,
            channels: BTreeMap::new(),
            trigger: None,
            trigger_timeout: None,
            record_geometry: None,
            record_count: 0,
            transfer: None,
            allocated: 0,
            posted: VecDeque::new(),
            completed_buffers: 0,
            started: None,
        }
    }

    pub fn with_onboard_memory(mut self, samples_per_channel: usize) -> Self {
        self.info.max_samples_per_channel = samples_per_channel;
        self
    }

    /// Refuse buffer allocations beyond `bytes` in total.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_trigger_period(mut self, period: Duration) -> Self {
        self.trigger_period = period;
        self
    }

    /// No trigger event ever arrives; records complete only through the trigger timeout.
    pub fn without_triggers(mut self) -> Self {
        self.triggers_arrive = false;
        self
    }

    /// Request an abort through `handle` once `buffers` buffers have been filled.
    pub fn abort_after(&mut self, buffers: usize, handle: AbortHandle) {
        self.abort_after = Some((buffers, handle));
    }

    /// Make every call to the named driver operation fail.
    pub fn fail_on(mut self, call: &'static str) -> Self {
        self.failing_call = Some(call);
        self
    }

    /// Names of the driver operations invoked so far, in order.
    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    pub fn posted_buffers(&self) -> usize {
        self.posted.len()
    }

    pub fn clock(&self) -> Option<&ClockConfiguration> {
        self.clock.as_ref()
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelConfiguration> {
        self.channels.get(&channel)
    }

    pub fn trigger(&self) -> Option<&TriggerConfiguration> {
        self.trigger.as_ref()
    }

    pub fn trigger_timeout(&self) -> Option<Duration> {
        self.trigger_timeout
    }

    pub fn record_geometry(&self) -> Option<(usize, usize)> {
        self.record_geometry
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn transfer(&self) -> Option<&AsyncReadParameters> {
        self.transfer.as_ref()
    }

    fn log(&mut self, call: &'static str) -> Result<()> {
        log::trace!("sim: {}", call);
        self.calls.push(call);
        if self.failing_call == Some(call) {
            return Err(sim_error(format!("simulated failure in {}", call)))
        }
        Ok(())
    }

    /// Time the hardware needs to acquire one record, or `None` if it never will.
    fn record_interval(&self, untriggered: bool) -> Option<Duration> {
        let fires = self.triggers_arrive && self.trigger.map_or(false, |trigger| trigger.can_fire());
        if untriggered || fires {
            Some(self.trigger_period)
        } else {
            self.trigger_timeout
        }
    }

    fn word(&self, channel: Channel, position: i64) -> u16 {
        let bits = self.info.bits_per_sample;
        let midpoint = (1u32 << (bits - 1)) as f64;
        let phase = 2.0 * PI * position.rem_euclid(WAVEFORM_PERIOD) as f64 / WAVEFORM_PERIOD as f64
            + channel.index() as f64 * PI / 4.0;
        let code = (midpoint + 0.5 * midpoint * phase.sin()).round() as u32;
        let code = code.min((1 << bits) - 1);
        (code << (16 - bits)) as u16
    }

    fn fill(&self, params: &AsyncReadParameters, buffer: &mut DmaBuffer) -> Result<()> {
        let channels = Channel::ALL.iter()
            .copied()
            .filter(|channel| params.channel_mask.contains(channel.code()))
            .collect::<Vec<_>>();
        let samples = params.samples_per_record;
        let records = params.records_per_buffer;
        let continuous = params.flags.contains(AsyncFlags::ContinuousMode);
        let channel_major = params.flags.intersects(
            AsyncFlags::ContinuousMode | AsyncFlags::NoPreTrigger);
        let words = buffer.words_mut()?;
        let needed = samples * records * channels.len();
        if words.len() < needed {
            return Err(sim_error(format!("buffer holds {} samples, transfer needs {}",
                words.len(), needed)))
        }
        for record in 0..records {
            for (slot, &channel) in channels.iter().enumerate() {
                let offset = if channel_major {
                    (slot * records + record) * samples
                } else {
                    (record * channels.len() + slot) * samples
                };
                for sample in 0..samples {
                    let position = if continuous {
                        (self.completed_buffers * samples + sample) as i64
                    } else {
                        sample as i64 + params.transfer_offset
                    };
                    words[offset + sample] = self.word(channel, position);
                }
            }
        }
        Ok(())
    }
}

impl Driver for SimulatedDigitizer {
    fn get_channel_info(&mut self) -> Result<ChannelInfo> {
        self.log("get_channel_info")?;
        Ok(self.info)
    }

    fn set_clock(&mut self, clock: &ClockConfiguration) -> Result<()> {
        self.log("set_clock")?;
        self.clock = Some(*clock);
        Ok(())
    }

    fn configure_channel(&mut self, channel: Channel, config: &ChannelConfiguration) -> Result<()> {
        self.log("configure_channel")?;
        if channel.index() >= self.info.input_channels {
            return Err(sim_error(format!("no input channel {}", channel)))
        }
        self.channels.insert(channel, *config);
        Ok(())
    }

    fn configure_trigger(&mut self, trigger: &TriggerConfiguration) -> Result<()> {
        self.log("configure_trigger")?;
        self.trigger = Some(*trigger);
        Ok(())
    }

    fn set_trigger_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.log("set_trigger_timeout")?;
        self.trigger_timeout = timeout;
        Ok(())
    }

    fn set_record_geometry(&mut self, pre_trigger_samples: usize, post_trigger_samples: usize)
            -> Result<()> {
        self.log("set_record_geometry")?;
        self.record_geometry = Some((pre_trigger_samples, post_trigger_samples));
        Ok(())
    }

    fn set_record_count(&mut self, count: usize) -> Result<()> {
        self.log("set_record_count")?;
        self.record_count = count;
        Ok(())
    }

    fn allocate_page_aligned(&mut self, bytes: usize) -> Result<DmaBuffer> {
        self.log("allocate_page_aligned")?;
        if let Some(limit) = self.memory_limit {
            if self.allocated + bytes > limit {
                return Err(Error::Allocation { bytes })
            }
        }
        let buffer = DmaBuffer::new(bytes)?;
        self.allocated += bytes;
        Ok(buffer)
    }

    fn free(&mut self, buffer: DmaBuffer) -> Result<()> {
        self.log("free")?;
        let address = buffer.as_ptr() as usize;
        self.posted.retain(|&posted| posted != address);
        self.allocated -= buffer.len();
        Ok(())
    }

    fn post_buffer(&mut self, buffer: &mut DmaBuffer) -> Result<()> {
        self.log("post_buffer")?;
        self.posted.push_back(buffer.as_ptr() as usize);
        Ok(())
    }

    fn wait_buffer_complete(&mut self, buffer: &mut DmaBuffer, timeout: Option<Duration>)
            -> Result<WaitStatus> {
        self.log("wait_buffer_complete")?;
        let params = match (self.started, self.transfer) {
            (Some(_), Some(params)) => params,
            _ => return Err(sim_error("no asynchronous capture is running".to_owned())),
        };
        if self.posted.front() != Some(&(buffer.as_ptr() as usize)) {
            return Err(sim_error("awaited buffer is not the oldest posted buffer".to_owned()))
        }
        let total_buffers = params.records_per_capture.div_ceil(params.records_per_buffer);
        let needed = if self.completed_buffers < total_buffers {
            let untriggered = params.flags.contains(AsyncFlags::ContinuousMode);
            self.record_interval(untriggered)
                .and_then(|interval| interval.checked_mul(params.records_per_buffer as u32))
        } else {
            None
        };
        match (needed, timeout) {
            (Some(needed), Some(timeout)) if needed > timeout => {
                sleep(timeout);
                return Ok(WaitStatus::TimedOut)
            }
            (None, Some(timeout)) => {
                sleep(timeout);
                return Ok(WaitStatus::TimedOut)
            }
            (None, None) =>
                return Err(sim_error("buffer can never complete and no timeout was given".to_owned())),
            (Some(needed), _) =>
                sleep(needed),
        }
        self.fill(&params, buffer)?;
        self.posted.pop_front();
        self.completed_buffers += 1;
        if let Some((after, ref handle)) = self.abort_after {
            if self.completed_buffers == after {
                log::debug!("sim: requesting abort after {} buffers", after);
                handle.abort();
            }
        }
        Ok(WaitStatus::Complete)
    }

    fn before_async_read(&mut self, params: &AsyncReadParameters) -> Result<()> {
        self.log("before_async_read")?;
        self.transfer = Some(*params);
        self.posted.clear();
        self.completed_buffers = 0;
        Ok(())
    }

    fn start_capture(&mut self) -> Result<()> {
        self.log("start_capture")?;
        self.started = Some(Instant::now());
        self.completed_buffers = 0;
        Ok(())
    }

    fn abort_capture(&mut self) -> Result<()> {
        self.log("abort_capture")?;
        self.started = None;
        self.transfer = None;
        self.posted.clear();
        Ok(())
    }

    fn busy(&mut self) -> Result<bool> {
        self.log("busy")?;
        let Some(started) = self.started else { return Ok(false) };
        match self.transfer {
            Some(params) =>
                Ok(self.completed_buffers * params.records_per_buffer < params.records_per_capture),
            None => {
                let needed = self.record_interval(false)
                    .and_then(|interval| interval.checked_mul(self.record_count as u32));
                Ok(needed.map_or(true, |needed| started.elapsed() < needed))
            }
        }
    }

    fn read_record(&mut self, channel: Channel, record: usize, transfer_offset: i64,
                   data: &mut [u16]) -> Result<()> {
        self.log("read_record")?;
        if self.busy()? {
            return Err(sim_error("cannot read on-board memory while capturing".to_owned()))
        }
        if record >= self.record_count {
            return Err(sim_error(format!("record {} not acquired ({} records)",
                record, self.record_count)))
        }
        if !self.channels.contains_key(&channel) {
            return Err(sim_error(format!("channel {} is not configured", channel)))
        }
        for (sample, word) in data.iter_mut().enumerate() {
            *word = self.word(channel, sample as i64 + transfer_offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_waveform_left_justified() {
        let sim = SimulatedDigitizer::new(4, 12);
        for position in 0..WAVEFORM_PERIOD {
            assert_eq!(sim.word(Channel::A, position) & 0x000f, 0);
        }
        // zero phase on channel A sits at midscale
        assert_eq!(sim.word(Channel::A, 0) >> 4, 2048);
    }

    #[test]
    fn test_failing_call() {
        let mut sim = SimulatedDigitizer::new(4, 14).fail_on("set_clock");
        assert!(matches!(sim.set_clock(&Default::default()), Err(Error::Driver(_))));
        assert_eq!(sim.calls(), ["set_clock"]);
    }

    #[test]
    fn test_unknown_channel() {
        let mut sim = SimulatedDigitizer::new(2, 14);
        assert!(sim.configure_channel(Channel::C, &Default::default()).is_err());
    }
}
