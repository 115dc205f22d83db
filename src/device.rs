use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::{Error, Result};
use crate::buffer::{AbortHandle, BufferPool, DrainOutcome};
use crate::chain::DependencyChain;
use crate::channels::ChannelRegistry;
use crate::config::{
    AcquisitionOptions, Channel, ChannelConfiguration, ClockConfiguration, InputRange,
    RecordLength, TriggerConfiguration, TriggerSource,
};
use crate::convert::convert;
use crate::geometry::{GeometryRequest, RecordGeometry, SizeAdjustment};
use crate::mode::{AcquisitionMode, Processing};
use crate::session::CaptureSession;
use crate::sys::{AsyncReadParameters, ChannelInfo, Driver};

const BUSY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Hardware configuration steps, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigStep {
    Clock,
    Channels,
    Trigger,
    TriggerTimeout,
    RecordGeometry,
    Buffers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unconfigured,
    Configured,
    Capturing,
    /// Buffers are being collected, or collection failed and the capture must be ended.
    Draining,
    /// A capture completed and its data is available.
    Idle,
    Closed,
}

/// Earliest step affected by the difference between two sets of options.
fn earliest_change(old: &AcquisitionOptions, new: &AcquisitionOptions) -> Option<ConfigStep> {
    [
        (ConfigStep::Clock, old.clock != new.clock),
        (ConfigStep::Channels, old.channels != new.channels),
        (ConfigStep::Trigger, old.mode != new.mode || old.trigger != new.trigger),
        (ConfigStep::TriggerTimeout, old.trigger_timeout != new.trigger_timeout),
        (ConfigStep::RecordGeometry,
            old.record_length != new.record_length ||
            old.pre_trigger_samples != new.pre_trigger_samples ||
            old.records_per_capture != new.records_per_capture ||
            old.records_per_buffer != new.records_per_buffer ||
            old.max_buffer_bytes != new.max_buffer_bytes ||
            old.size_adjustment != new.size_adjustment),
        (ConfigStep::Buffers, old.buffer_count != new.buffer_count),
    ].into_iter().find(|&(_, changed)| changed).map(|(step, _)| step)
}

/// Everything the configuration steps read and write.
#[derive(Debug)]
struct Board<D: Driver> {
    driver: D,
    info: ChannelInfo,
    options: AcquisitionOptions,
    registry: ChannelRegistry,
    geometry: Option<RecordGeometry>,
    pool: BufferPool,
}

impl<D: Driver> Board<D> {
    /// Check `options` as a whole without touching the hardware.
    fn validate(&self, options: &AcquisitionOptions) -> Result<(ChannelRegistry, RecordGeometry)> {
        options.check_fields()?;
        let capabilities = options.mode.capabilities();
        if !capabilities.wants_pre_trigger && options.pre_trigger_samples != 0 {
            return Err(Error::invalid(format!("{:?} mode does not capture pre-trigger samples",
                options.mode)))
        }
        for engine in [&options.trigger.j, &options.trigger.k] {
            if let TriggerSource::Channel(channel) = engine.source {
                if channel.index() >= self.info.input_channels {
                    return Err(Error::invalid(format!("trigger source {} is not an input of \
                        this {} channel board", channel, self.info.input_channels)))
                }
            }
        }
        let registry = ChannelRegistry::with_channels(self.info.input_channels,
            options.channels.iter().map(|(&channel, &config)| (channel, config)))?;
        let geometry = GeometryRequest {
            record_length: options.record_length,
            sample_rate: options.clock.effective_sample_rate(),
            pre_trigger_samples: options.pre_trigger_samples,
            records_per_buffer: options.records_per_buffer,
            records_per_capture: options.records_per_capture,
            channel_count: registry.channel_count(),
            bits_per_sample: self.info.bits_per_sample,
            max_buffer_bytes: options.max_buffer_bytes,
            max_samples_per_channel: self.info.max_samples_per_channel,
            size_adjustment: options.size_adjustment,
            policy: capabilities.geometry,
        }.compute()?;
        if let Processing::Dma(_) = capabilities.processing {
            if geometry.bytes_per_sample != std::mem::size_of::<u16>() {
                return Err(Error::constraint(format!("DMA transfers carry 16-bit words, {}-bit \
                    samples cannot be streamed", self.info.bits_per_sample)))
            }
        }
        Ok((registry, geometry))
    }

    fn geometry(&self) -> Result<&RecordGeometry> {
        self.geometry.as_ref().ok_or_else(|| Error::unsupported("record geometry is not configured"))
    }

    fn apply_clock(&mut self) -> Result<()> {
        log::debug!("set_clock({:?})", self.options.clock);
        self.driver.set_clock(&self.options.clock)
    }

    fn apply_channels(&mut self) -> Result<()> {
        for (channel, config) in self.registry.iter() {
            log::debug!("configure_channel({}, {:?})", channel, config);
            self.driver.configure_channel(channel, config)?;
        }
        Ok(())
    }

    fn apply_trigger(&mut self) -> Result<()> {
        let trigger = if self.options.mode.capabilities().is_triggered {
            self.options.trigger
        } else {
            TriggerConfiguration::disabled()
        };
        log::debug!("configure_trigger({:?})", trigger);
        self.driver.configure_trigger(&trigger)
    }

    fn apply_trigger_timeout(&mut self) -> Result<()> {
        let timeout = self.options.trigger_timeout.filter(|timeout| !timeout.is_zero());
        log::debug!("set_trigger_timeout({:?})", timeout);
        self.driver.set_trigger_timeout(timeout)
    }

    fn apply_geometry(&mut self) -> Result<()> {
        let geometry = self.geometry()?;
        let (pre, post, records) =
            (geometry.pre_trigger_samples, geometry.post_trigger_samples, geometry.records_per_capture);
        log::debug!("set_record_geometry({}, {})", pre, post);
        self.driver.set_record_geometry(pre, post)?;
        if self.options.mode.capabilities().processing == Processing::OnboardReadout {
            log::debug!("set_record_count({})", records);
            self.driver.set_record_count(records)?;
        }
        Ok(())
    }

    fn apply_buffers(&mut self) -> Result<()> {
        self.pool.release_all(&mut self.driver)?;
        if let Processing::Dma(_) = self.options.mode.capabilities().processing {
            let geometry = self.geometry()?;
            let count = self.options.buffer_count.min(geometry.buffers_per_capture).max(1);
            let size = geometry.bytes_per_buffer;
            self.pool.allocate(&mut self.driver, count, size)?;
        }
        Ok(())
    }

    fn arm_dma(&mut self, params: &AsyncReadParameters) -> Result<()> {
        log::debug!("before_async_read({:?})", params);
        self.driver.before_async_read(params)?;
        self.pool.post_all(&mut self.driver)?;
        self.driver.start_capture()
    }

    /// Stop the hardware and return every buffer to the pool.
    fn stop(&mut self) -> Result<()> {
        let result = self.driver.abort_capture();
        let discarded = self.pool.reclaim();
        if discarded > 0 {
            log::info!("discarded {} undrained buffers", discarded);
        }
        result
    }
}

/// Acquisition controller for one digitizer.
///
/// Configuration is applied as an ordered chain of steps; changing one setting re-runs the
/// step it belongs to and every step after it. Between [`begin_configure`] and
/// [`finish_configure`], changes are only recorded and are applied together at the end.
///
/// [`begin_configure`]: Device::begin_configure
/// [`finish_configure`]: Device::finish_configure
#[derive(Debug)]
pub struct Device<D: Driver> {
    board: Board<D>,
    chain: DependencyChain<ConfigStep, Board<D>>,
    configuring: bool,
    state: State,
    session: CaptureSession,
    ranges: BTreeMap<Channel, InputRange>,
    abort: AbortHandle,
}

impl<D: Driver> Device<D> {
    pub fn new(mut driver: D) -> Result<Device<D>> {
        let info = driver.get_channel_info()?;
        log::info!("digitizer has {} inputs, {}-bit samples, {} samples of memory per channel",
            info.input_channels, info.bits_per_sample, info.max_samples_per_channel);
        let mut chain = DependencyChain::<ConfigStep, Board<D>>::new();
        chain.register(ConfigStep::Clock, Board::<D>::apply_clock);
        chain.register(ConfigStep::Channels, Board::<D>::apply_channels);
        chain.register(ConfigStep::Trigger, Board::<D>::apply_trigger);
        chain.register(ConfigStep::TriggerTimeout, Board::<D>::apply_trigger_timeout);
        chain.register(ConfigStep::RecordGeometry, Board::<D>::apply_geometry);
        chain.register(ConfigStep::Buffers, Board::<D>::apply_buffers);
        Ok(Device {
            board: Board {
                driver,
                info,
                options: AcquisitionOptions::default(),
                registry: ChannelRegistry::new(info.input_channels),
                geometry: None,
                pool: BufferPool::new(),
            },
            chain,
            configuring: false,
            state: State::Unconfigured,
            session: CaptureSession::new(),
            ranges: BTreeMap::new(),
            abort: AbortHandle::new(),
        })
    }

    /// Run `f` with a device, tearing it down afterwards whether `f` succeeds or not.
    pub fn with<F, R>(driver: D, f: F) -> Result<R>
            where F: FnOnce(&mut Device<D>) -> Result<R> {
        let mut device = Device::new(driver)?;
        let result = f(&mut device);
        let teardown_result = device.teardown();
        let value = result?;
        teardown_result?;
        Ok(value)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn options(&self) -> &AcquisitionOptions {
        &self.board.options
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.board.registry
    }

    pub fn geometry(&self) -> Option<&RecordGeometry> {
        self.board.geometry.as_ref()
    }

    pub fn channel_info(&self) -> ChannelInfo {
        self.board.info
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.board.pool
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn pending_steps(&self) -> Vec<ConfigStep> {
        self.chain.pending()
    }

    pub fn driver(&self) -> &D {
        &self.board.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.board.driver
    }

    /// Handle that cancels [`read_data`](Self::read_data) from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn ensure_settable(&self) -> Result<()> {
        match self.state {
            State::Capturing | State::Draining =>
                Err(Error::unsupported("cannot change configuration during a capture")),
            _ => Ok(())
        }
    }

    fn stage(&mut self, options: AcquisitionOptions) -> Result<()> {
        if self.state == State::Unconfigured {
            self.chain.invalidate_all();
        } else if let Some(step) = earliest_change(&self.board.options, &options) {
            self.chain.invalidate_from(step)?;
        }
        self.board.options = options;
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        if self.board.options.mode.is_discouraged() {
            log::warn!("{:?} mode is discouraged; it corrupts the lowest ADC codes on some boards",
                self.board.options.mode);
        }
        match self.chain.run_pending(&mut self.board) {
            Ok(()) => {
                if self.state != State::Configured {
                    log::info!("configured for {:?} acquisition", self.board.options.mode);
                }
                self.state = State::Configured;
                Ok(())
            }
            Err(error) => {
                log::warn!("configuration failed, the device must be reconfigured: {}", error);
                self.state = State::Unconfigured;
                Err(error)
            }
        }
    }

    /// Validate `options` and apply the steps they change.
    ///
    /// Invalid options are rejected before any hardware call. If a hardware step fails, the
    /// device is left unconfigured.
    pub fn configure(&mut self, options: AcquisitionOptions) -> Result<()> {
        self.ensure_settable()?;
        let (registry, geometry) = self.board.validate(&options)?;
        self.stage(options)?;
        self.board.registry = registry;
        self.board.geometry = Some(geometry);
        if self.configuring { Ok(()) } else { self.execute() }
    }

    pub fn begin_configure(&mut self) -> Result<()> {
        self.ensure_settable()?;
        self.configuring = true;
        Ok(())
    }

    pub fn finish_configure(&mut self) -> Result<()> {
        self.configuring = false;
        self.run_pending()
    }

    /// Validate the recorded configuration and apply every pending step.
    pub fn run_pending(&mut self) -> Result<()> {
        self.ensure_settable()?;
        let (registry, geometry) = self.board.validate(&self.board.options)?;
        self.board.registry = registry;
        self.board.geometry = Some(geometry);
        self.execute()
    }

    fn update<F: FnOnce(&mut AcquisitionOptions)>(&mut self, f: F) -> Result<()> {
        let mut options = self.board.options.clone();
        f(&mut options);
        if self.configuring {
            self.ensure_settable()?;
            options.check_fields()?;
            self.stage(options)
        } else {
            self.configure(options)
        }
    }

    pub fn set_mode(&mut self, mode: AcquisitionMode) -> Result<()> {
        self.update(|options| options.mode = mode)
    }

    pub fn set_clock(&mut self, clock: ClockConfiguration) -> Result<()> {
        self.update(|options| options.clock = clock)
    }

    pub fn set_channels<I>(&mut self, channels: I) -> Result<()>
            where I: IntoIterator<Item = (Channel, ChannelConfiguration)> {
        let channels = channels.into_iter().collect();
        self.update(|options| options.channels = channels)
    }

    pub fn set_trigger(&mut self, trigger: TriggerConfiguration) -> Result<()> {
        self.update(|options| options.trigger = trigger)
    }

    pub fn set_trigger_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.update(|options| options.trigger_timeout = timeout)
    }

    pub fn set_record_length(&mut self, record_length: RecordLength) -> Result<()> {
        self.update(|options| options.record_length = record_length)
    }

    pub fn set_pre_trigger_samples(&mut self, samples: usize) -> Result<()> {
        self.update(|options| options.pre_trigger_samples = samples)
    }

    pub fn set_record_counts(&mut self, records_per_capture: usize, records_per_buffer: usize)
            -> Result<()> {
        self.update(|options| {
            options.records_per_capture = records_per_capture;
            options.records_per_buffer = records_per_buffer;
        })
    }

    pub fn set_buffer_count(&mut self, count: usize) -> Result<()> {
        self.update(|options| options.buffer_count = count)
    }

    pub fn set_max_buffer_bytes(&mut self, bytes: usize) -> Result<()> {
        self.update(|options| options.max_buffer_bytes = bytes)
    }

    pub fn set_size_adjustment(&mut self, policy: SizeAdjustment) -> Result<()> {
        self.update(|options| options.size_adjustment = policy)
    }

    /// Arm the hardware. Also re-arms after a capture has completed or been ended.
    pub fn start_capture(&mut self) -> Result<()> {
        match self.state {
            State::Configured | State::Idle | State::Closed => (),
            State::Unconfigured =>
                return Err(Error::unsupported("device is not configured")),
            State::Capturing | State::Draining =>
                return Err(Error::unsupported("a capture is already in progress")),
        }
        if self.configuring || !self.chain.is_complete() {
            return Err(Error::unsupported("configuration has not been applied"))
        }
        let mode = self.board.options.mode;
        let processing = mode.capabilities().processing;
        if processing == Processing::Unsupported {
            return Err(Error::unsupported(format!("{:?} mode does not capture data", mode)))
        }

        let geometry = self.board.geometry()?;
        let samples_per_record = geometry.samples_per_record;
        let params = AsyncReadParameters {
            channel_mask: self.board.registry.channel_mask(),
            transfer_offset: -(geometry.pre_trigger_samples as i64),
            samples_per_record,
            records_per_buffer: geometry.records_per_buffer,
            records_per_capture: geometry.records_per_capture,
            flags: mode.async_flags(),
        };
        self.board.pool.reclaim();
        self.abort.reset();
        self.ranges = self.board.registry.iter()
            .map(|(channel, config)| (channel, config.range))
            .collect();
        self.session.reset(self.ranges.keys().copied(), samples_per_record,
            params.records_per_capture);

        let result = match processing {
            Processing::Dma(_) => self.board.arm_dma(&params),
            _ => self.board.driver.start_capture(),
        };
        if let Err(error) = result {
            log::warn!("cannot arm {:?} capture: {}", mode, error);
            if let Err(stop_error) = self.board.stop() {
                log::warn!("cannot stop hardware after failed arm: {}", stop_error);
            }
            return Err(error)
        }
        log::info!("armed {:?} capture of {} records", mode, params.records_per_capture);
        self.state = State::Capturing;
        Ok(())
    }

    fn drain(&mut self, timeout: Option<Duration>) -> Result<DrainOutcome> {
        let processing = self.board.options.mode.capabilities().processing;
        let Board { driver, pool, geometry, .. } = &mut self.board;
        let geometry = geometry.as_ref()
            .ok_or_else(|| Error::unsupported("record geometry is not configured"))?;
        let session = &mut self.session;
        let abort = &self.abort;
        match processing {
            Processing::Dma(layout) => {
                let records_per_buffer = geometry.records_per_buffer;
                pool.drain(driver, geometry.buffers_per_capture, timeout, abort,
                    |sequence, buffer| {
                        session.ingest(layout, sequence, records_per_buffer, buffer.words()?)
                    })
            }
            Processing::OnboardReadout => {
                let started = Instant::now();
                while driver.busy()? {
                    if abort.is_aborted() {
                        log::info!("on-board capture aborted");
                        return Ok(DrainOutcome::Aborted { buffers: 0 })
                    }
                    if let Some(timeout) = timeout {
                        if started.elapsed() >= timeout {
                            return Err(Error::CaptureTimeout(timeout))
                        }
                    }
                    sleep(BUSY_POLL_INTERVAL);
                }
                let transfer_offset = -(geometry.pre_trigger_samples as i64);
                for record in 0..geometry.records_per_capture {
                    for &channel in self.ranges.keys() {
                        let mut data = vec![0; geometry.samples_per_record];
                        driver.read_record(channel, record, transfer_offset, &mut data)?;
                        session.push_record(channel, data)?;
                    }
                }
                Ok(DrainOutcome::Complete { buffers: geometry.records_per_capture })
            }
            Processing::Unsupported =>
                Err(Error::unsupported("mode does not capture data")),
        }
    }

    /// Block until the armed capture completes or is aborted through the
    /// [abort handle](Self::abort_handle).
    ///
    /// `timeout` bounds the wait for each buffer. On timeout the capture stays in the
    /// `Draining` state and must be ended with [`end_capture`](Self::end_capture).
    pub fn read_data(&mut self, timeout: Option<Duration>) -> Result<DrainOutcome> {
        match self.state {
            State::Capturing => (),
            State::Draining =>
                return Err(Error::unsupported("previous read failed; end the capture first")),
            _ => return Err(Error::unsupported("no capture is armed")),
        }
        self.state = State::Draining;
        let outcome = match self.drain(timeout) {
            Ok(outcome) => outcome,
            Err(error) => {
                log::warn!("capture failed: {}", error);
                return Err(error)
            }
        };
        if let Err(error) = self.board.stop() {
            log::warn!("cannot stop hardware after capture: {}", error);
        }
        self.session.mark_ready();
        self.state = State::Idle;
        match outcome {
            DrainOutcome::Complete { buffers } =>
                log::info!("capture complete after {} buffers", buffers),
            DrainOutcome::Aborted { buffers } =>
                log::info!("capture aborted after {} buffers", buffers),
        }
        Ok(outcome)
    }

    fn captured(&self, channel: Channel) -> Result<(&[Vec<u16>], f64)> {
        if !self.session.is_ready() {
            return Err(Error::unsupported("no capture data is available"))
        }
        match (self.session.records(channel), self.ranges.get(&channel)) {
            (Some(records), Some(range)) => Ok((records, range.volts())),
            _ => Err(Error::invalid(format!("channel {} was not captured", channel))),
        }
    }

    /// All records of `channel` concatenated, in volts.
    pub fn get_data_as_single_sequence(&self, channel: Channel) -> Result<Vec<f64>> {
        let (records, range) = self.captured(channel)?;
        convert(&records.concat(), range, self.board.info.bits_per_sample)
    }

    pub fn get_data_as_record_list(&self, channel: Channel) -> Result<Vec<Vec<f64>>> {
        let (records, range) = self.captured(channel)?;
        records.iter()
            .map(|record| convert(record, range, self.board.info.bits_per_sample))
            .collect()
    }

    /// Stop the hardware and discard undrained buffers. Does nothing if no capture is armed.
    pub fn end_capture(&mut self) -> Result<()> {
        match self.state {
            State::Capturing | State::Draining => {
                self.abort.abort();
                let result = self.board.stop();
                self.state = State::Closed;
                log::info!("capture ended");
                result
            }
            State::Idle => {
                self.state = State::Closed;
                Ok(())
            }
            State::Unconfigured | State::Configured | State::Closed => Ok(()),
        }
    }

    /// End any capture and free all DMA buffers. The device must be configured again before
    /// the next capture.
    pub fn teardown(&mut self) -> Result<()> {
        let end_result = self.end_capture();
        let release_result = self.board.pool.release_all(&mut self.board.driver);
        self.chain.invalidate_all();
        self.configuring = false;
        self.state = State::Unconfigured;
        end_result.and(release_result)
    }
}

impl<D: Driver> Drop for Device<D> {
    fn drop(&mut self) {
        if matches!(self.state, State::Capturing | State::Draining) {
            if let Err(error) = self.board.driver.abort_capture() {
                log::warn!("cannot abort capture on drop: {}", error);
            }
        }
        if let Err(error) = self.board.pool.release_all(&mut self.board.driver) {
            log::warn!("cannot release DMA buffers on drop: {}", error);
        }
    }
}
