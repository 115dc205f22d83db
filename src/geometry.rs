//! Record and buffer size arithmetic.

use std::fmt;

use crate::{Error, Result};
use crate::config::RecordLength;
use crate::mode::GeometryPolicy;

/// Bound on the number of times records per buffer is incremented while looking for a buffer
/// size the hardware accepts.
pub const MAX_SIZE_ADJUSTMENT_ITERATIONS: usize = 64;

/// Below this count, pre- and post-trigger sample counts should be powers of two.
const ALIGNED_SAMPLE_THRESHOLD: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeAdjustment {
    /// Add one record per buffer at a time until the buffer fits the transfer size limit.
    /// Adding records only makes the buffer larger, so an oversize buffer is eventually
    /// rejected as a hardware constraint violation.
    #[default]
    IncrementRecordsPerBuffer,
    /// Accept buffers above the transfer size limit with a warning.
    Disabled,
}

/// Smallest power of two that is at least `samples`.
pub fn round_up_pow2(samples: usize) -> usize {
    samples.max(1).next_power_of_two()
}

fn bytes_per_buffer(bytes_per_sample: usize, samples_per_record: usize, channel_count: usize,
                    records_per_buffer: usize) -> Option<usize> {
    bytes_per_sample
        .checked_mul(records_per_buffer)?
        .checked_mul(samples_per_record)?
        .checked_mul(channel_count)
}

/// Sequence of `(records_per_buffer, bytes_per_buffer)` pairs visited by
/// [`SizeAdjustment::IncrementRecordsPerBuffer`], starting from `records_per_buffer`.
pub fn size_adjustment_steps(bytes_per_sample: usize, samples_per_record: usize,
                             channel_count: usize, records_per_buffer: usize)
        -> impl Iterator<Item = (usize, usize)> {
    std::iter::successors(Some(records_per_buffer), |records| records.checked_add(1))
        .map_while(move |records| {
            bytes_per_buffer(bytes_per_sample, samples_per_record, channel_count, records)
                .map(|bytes| (records, bytes))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryWarning {
    UnalignedPreTrigger(usize),
    UnalignedPostTrigger(usize),
    OversizeBuffer { bytes: usize, limit: usize },
}

impl fmt::Display for GeometryWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnalignedPreTrigger(samples) =>
                write!(f, "{} pre-trigger samples is not a power of two; \
                    the hardware may misplace the trigger", samples),
            Self::UnalignedPostTrigger(samples) =>
                write!(f, "{} post-trigger samples is not a power of two; \
                    the hardware may misplace the trigger", samples),
            Self::OversizeBuffer { bytes, limit } =>
                write!(f, "{} byte buffer exceeds the {} byte transfer limit", bytes, limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRequest {
    pub record_length: RecordLength,
    /// Effective sample rate, after decimation.
    pub sample_rate: f64,
    pub pre_trigger_samples: usize,
    pub records_per_buffer: usize,
    pub records_per_capture: usize,
    pub channel_count: usize,
    pub bits_per_sample: u32,
    pub max_buffer_bytes: usize,
    pub max_samples_per_channel: usize,
    pub size_adjustment: SizeAdjustment,
    pub policy: GeometryPolicy,
}

impl Default for GeometryRequest {
    fn default() -> Self {
        Self {
            record_length: Default::default(),
            sample_rate: 125e6,
            pre_trigger_samples: 0,
            records_per_buffer: 1,
            records_per_capture: 1,
            channel_count: 1,
            bits_per_sample: 16,
            max_buffer_bytes: 16 << 20,
            max_samples_per_channel: usize::MAX,
            size_adjustment: Default::default(),
            policy: GeometryPolicy::PackedRecords,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordGeometry {
    pub samples_per_record: usize,
    pub pre_trigger_samples: usize,
    pub post_trigger_samples: usize,
    pub records_per_buffer: usize,
    pub records_per_capture: usize,
    /// Zero when the mode does not transfer data through DMA buffers.
    pub buffers_per_capture: usize,
    pub bytes_per_sample: usize,
    pub bytes_per_buffer: usize,
    pub adjustment_iterations: usize,
    pub warnings: Vec<GeometryWarning>,
}

impl GeometryRequest {
    fn samples_per_record(&self) -> Result<usize> {
        match self.record_length {
            RecordLength::Samples(0) =>
                Err(Error::invalid("record length must be at least one sample")),
            RecordLength::Samples(samples) =>
                Ok(samples),
            RecordLength::Duration(duration) => {
                let exact = (duration.as_secs_f64() * self.sample_rate).ceil();
                if exact < 1.0 {
                    return Err(Error::invalid(format!("record duration {:?} is shorter than \
                        one sample at {} S/s", duration, self.sample_rate)))
                }
                if exact > (usize::MAX >> 1) as f64 {
                    return Err(Error::invalid(format!("record duration {:?} is too long at {} S/s",
                        duration, self.sample_rate)))
                }
                // The hardware scrambles records that are not a power of two samples long.
                Ok(round_up_pow2(exact as usize))
            }
        }
    }

    pub fn compute(&self) -> Result<RecordGeometry> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(Error::invalid(format!("sample rate {} is not positive", self.sample_rate)))
        }
        if self.records_per_buffer == 0 || self.records_per_capture == 0 {
            return Err(Error::invalid("record counts must be at least 1"))
        }
        if self.channel_count == 0 {
            return Err(Error::invalid("at least one channel must be enabled"))
        }
        if self.bits_per_sample == 0 || self.bits_per_sample > 16 {
            return Err(Error::constraint(format!("{}-bit samples are not supported",
                self.bits_per_sample)))
        }

        let samples_per_record = self.samples_per_record()?;
        let pre_trigger_samples = self.pre_trigger_samples;
        if pre_trigger_samples >= samples_per_record {
            return Err(Error::invalid(format!("{} pre-trigger samples do not fit in a {} sample \
                record", pre_trigger_samples, samples_per_record)))
        }
        let post_trigger_samples = samples_per_record - pre_trigger_samples;
        let bytes_per_sample = self.bits_per_sample.div_ceil(8) as usize;

        let mut warnings = Vec::new();
        if pre_trigger_samples > 0 && pre_trigger_samples < ALIGNED_SAMPLE_THRESHOLD &&
                !pre_trigger_samples.is_power_of_two() {
            warnings.push(GeometryWarning::UnalignedPreTrigger(pre_trigger_samples));
        }
        if post_trigger_samples < ALIGNED_SAMPLE_THRESHOLD &&
                !post_trigger_samples.is_power_of_two() {
            warnings.push(GeometryWarning::UnalignedPostTrigger(post_trigger_samples));
        }

        let requested_records_per_buffer = match self.policy {
            GeometryPolicy::Streaming | GeometryPolicy::OnboardMemory => 1,
            GeometryPolicy::PackedRecords | GeometryPolicy::None => self.records_per_buffer,
        };
        let mut records_per_buffer = requested_records_per_buffer;
        let mut adjustment_iterations = 0;
        let bytes_per_buffer;
        match self.policy {
            GeometryPolicy::Streaming | GeometryPolicy::PackedRecords => {
                let mut steps = size_adjustment_steps(bytes_per_sample, samples_per_record,
                    self.channel_count, records_per_buffer);
                let (first_records, first_bytes) = steps.next()
                    .ok_or_else(|| Error::invalid("buffer size overflows"))?;
                match self.size_adjustment {
                    SizeAdjustment::Disabled => {
                        if first_bytes > self.max_buffer_bytes {
                            warnings.push(GeometryWarning::OversizeBuffer {
                                bytes: first_bytes,
                                limit: self.max_buffer_bytes,
                            });
                        }
                        bytes_per_buffer = first_bytes;
                    }
                    SizeAdjustment::IncrementRecordsPerBuffer => {
                        let (mut records, mut bytes) = (first_records, first_bytes);
                        while bytes > self.max_buffer_bytes {
                            if adjustment_iterations == MAX_SIZE_ADJUSTMENT_ITERATIONS {
                                return Err(Error::constraint(format!("buffer size adjustment \
                                    did not converge: {} records of {} samples need {} bytes \
                                    after {} iterations, limit is {} bytes",
                                    records, samples_per_record, bytes, adjustment_iterations,
                                    self.max_buffer_bytes)))
                            }
                            (records, bytes) = steps.next()
                                .ok_or_else(|| Error::invalid("buffer size overflows"))?;
                            adjustment_iterations += 1;
                        }
                        records_per_buffer = records;
                        bytes_per_buffer = bytes;
                    }
                }
            }
            GeometryPolicy::OnboardMemory => {
                let samples = samples_per_record.checked_mul(self.records_per_capture);
                if samples.map_or(true, |samples| samples > self.max_samples_per_channel) {
                    return Err(Error::constraint(format!("{} records of {} samples exceed the \
                        on-board memory of {} samples per channel", self.records_per_capture,
                        samples_per_record, self.max_samples_per_channel)))
                }
                bytes_per_buffer = 0;
            }
            GeometryPolicy::None =>
                bytes_per_buffer = 0,
        }

        let buffers_per_capture = match self.policy {
            GeometryPolicy::Streaming | GeometryPolicy::PackedRecords =>
                self.records_per_capture.div_ceil(records_per_buffer),
            GeometryPolicy::OnboardMemory | GeometryPolicy::None => 0,
        };

        for warning in &warnings {
            log::warn!("record geometry: {}", warning);
        }
        let geometry = RecordGeometry {
            samples_per_record,
            pre_trigger_samples,
            post_trigger_samples,
            records_per_buffer,
            records_per_capture: self.records_per_capture,
            buffers_per_capture,
            bytes_per_sample,
            bytes_per_buffer,
            adjustment_iterations,
            warnings,
        };
        log::debug!("record geometry: {:?}", geometry);
        Ok(geometry)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_round_up_pow2() {
        assert_eq!(round_up_pow2(1), 1);
        assert_eq!(round_up_pow2(2), 2);
        assert_eq!(round_up_pow2(3), 4);
        assert_eq!(round_up_pow2(1000), 1024);
        assert_eq!(round_up_pow2(1024), 1024);
        assert_eq!(round_up_pow2(10_000), 16384);
    }

    #[test]
    fn test_one_second_at_10khz() {
        let geometry = GeometryRequest {
            record_length: RecordLength::Duration(Duration::from_secs(1)),
            sample_rate: 10e3,
            bits_per_sample: 16,
            max_buffer_bytes: 1 << 20,
            ..Default::default()
        }.compute().unwrap();
        assert_eq!(geometry.samples_per_record, 16384);
        assert_eq!(geometry.bytes_per_buffer, 32768);
        assert_eq!(geometry.adjustment_iterations, 0);
        assert_eq!(geometry.buffers_per_capture, 1);
        assert!(geometry.warnings.is_empty());
    }

    #[test]
    fn test_bytes_per_buffer_formula() {
        for channel_count in [1, 2, 4] {
            let geometry = GeometryRequest {
                record_length: RecordLength::Samples(4096),
                records_per_buffer: 3,
                records_per_capture: 10,
                channel_count,
                bits_per_sample: 12,
                ..Default::default()
            }.compute().unwrap();
            assert_eq!(geometry.bytes_per_sample, 2);
            assert_eq!(geometry.bytes_per_buffer, 2 * 3 * 4096 * channel_count);
            assert_eq!(geometry.buffers_per_capture, 4);
        }
    }

    #[test]
    fn test_adjustment_steps_non_decreasing() {
        let steps = size_adjustment_steps(2, 1024, 2, 1).take(16).collect::<Vec<_>>();
        assert_eq!(steps[0], (1, 4096));
        assert!(steps.windows(2).all(|pair| pair[1].1 >= pair[0].1 && pair[1].0 == pair[0].0 + 1));
    }

    #[test]
    fn test_oversize_buffer_does_not_converge() {
        let request = GeometryRequest {
            record_length: RecordLength::Samples(1 << 20),
            max_buffer_bytes: 1 << 20,
            ..Default::default()
        };
        assert!(matches!(request.compute(), Err(Error::HardwareConstraintViolation(_))));

        let geometry = GeometryRequest { size_adjustment: SizeAdjustment::Disabled, ..request }
            .compute().unwrap();
        assert_eq!(geometry.bytes_per_buffer, 2 << 20);
        assert_eq!(geometry.warnings,
            [GeometryWarning::OversizeBuffer { bytes: 2 << 20, limit: 1 << 20 }]);
    }

    #[test]
    fn test_pre_trigger() {
        let request = GeometryRequest {
            record_length: RecordLength::Samples(1024),
            pre_trigger_samples: 100,
            ..Default::default()
        };
        let geometry = request.compute().unwrap();
        assert_eq!(geometry.post_trigger_samples, 924);
        assert_eq!(geometry.warnings, [GeometryWarning::UnalignedPreTrigger(100)]);

        let request = GeometryRequest { pre_trigger_samples: 1024, ..request };
        assert!(matches!(request.compute(), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_streaming_forces_one_record_per_buffer() {
        let geometry = GeometryRequest {
            record_length: RecordLength::Samples(512),
            records_per_buffer: 8,
            records_per_capture: 5,
            policy: GeometryPolicy::Streaming,
            ..Default::default()
        }.compute().unwrap();
        assert_eq!(geometry.records_per_buffer, 1);
        assert_eq!(geometry.buffers_per_capture, 5);
    }

    #[test]
    fn test_onboard_memory_limit() {
        let request = GeometryRequest {
            record_length: RecordLength::Samples(1024),
            records_per_capture: 4,
            max_samples_per_channel: 4096,
            policy: GeometryPolicy::OnboardMemory,
            ..Default::default()
        };
        let geometry = request.compute().unwrap();
        assert_eq!(geometry.buffers_per_capture, 0);
        let request = GeometryRequest { records_per_capture: 5, ..request };
        assert!(matches!(request.compute(), Err(Error::HardwareConstraintViolation(_))));
    }

    #[test]
    fn test_invalid_inputs() {
        let request = GeometryRequest { sample_rate: 0.0, ..Default::default() };
        assert!(matches!(request.compute(), Err(Error::InvalidConfiguration(_))));
        let request = GeometryRequest {
            record_length: RecordLength::Duration(Duration::from_nanos(1)),
            sample_rate: 1e3,
            ..Default::default()
        };
        // rounds up to one sample
        assert_eq!(request.compute().unwrap().samples_per_record, 1);
    }
}
