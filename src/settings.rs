//! Acquisition settings loaded from a TOML file and the environment.
//!
//! ```toml
//! mode = "triggered-recording"
//!
//! [clock]
//! sample_rate = 125000000.0
//!
//! [record]
//! samples = 4096
//! pre_trigger_samples = 128
//! records_per_capture = 100
//! records_per_buffer = 10
//!
//! [trigger]
//! j_source = "A"
//! j_level = 150
//! timeout_ms = 100
//!
//! [channels.A]
//! range = 0.4
//! coupling = "dc"
//! impedance = "50ohm"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use confique::Config;

use crate::{Error, Result};
use crate::config::{
    AcquisitionOptions, Channel, ChannelConfiguration, ClockConfiguration, ClockEdge,
    ClockSource, RecordLength, TriggerConfiguration, TriggerEngine, TriggerOperation,
    TriggerSlope, TriggerSource,
};
use crate::geometry::SizeAdjustment;
use crate::mode::AcquisitionMode;

#[derive(Config, Debug, Clone)]
pub struct CaptureSettings {
    #[config(default = "triggered-recording")]
    pub mode: AcquisitionMode,
    #[config(nested)]
    pub clock: ClockSettings,
    #[config(nested)]
    pub record: RecordSettings,
    #[config(nested)]
    pub trigger: TriggerSettings,
    /// Enabled channels; channel A alone if omitted.
    pub channels: Option<BTreeMap<String, ChannelConfiguration>>,
    #[config(default = 4, env = "DIGITIZER_BUFFER_COUNT")]
    pub buffer_count: usize,
    #[config(default = 16777216)]
    pub max_buffer_bytes: usize,
    #[config(default = "increment-records-per-buffer")]
    pub size_adjustment: SizeAdjustment,
}

#[derive(Config, Debug, Clone)]
pub struct ClockSettings {
    #[config(default = "internal")]
    pub source: ClockSource,
    #[config(default = 125000000.0, env = "DIGITIZER_SAMPLE_RATE")]
    pub sample_rate: f64,
    #[config(default = "rising")]
    pub edge: ClockEdge,
    #[config(default = 1)]
    pub decimation: u32,
}

#[derive(Config, Debug, Clone)]
pub struct RecordSettings {
    /// Record length in seconds. Takes precedence over `samples`.
    pub duration: Option<f64>,
    #[config(default = 1024)]
    pub samples: usize,
    #[config(default = 0)]
    pub pre_trigger_samples: usize,
    #[config(default = 1)]
    pub records_per_capture: usize,
    #[config(default = 1)]
    pub records_per_buffer: usize,
}

#[derive(Config, Debug, Clone)]
pub struct TriggerSettings {
    #[config(default = "j")]
    pub operation: TriggerOperation,
    #[config(default = "A")]
    pub j_source: TriggerSource,
    #[config(default = "positive")]
    pub j_slope: TriggerSlope,
    #[config(default = 150)]
    pub j_level: u8,
    #[config(default = "disabled")]
    pub k_source: TriggerSource,
    #[config(default = "positive")]
    pub k_slope: TriggerSlope,
    #[config(default = 128)]
    pub k_level: u8,
    /// Trigger automatically after this many milliseconds without a trigger event.
    /// Zero disables the trigger timeout.
    pub timeout_ms: Option<u64>,
}

impl CaptureSettings {
    /// Load settings from `path`, with `DIGITIZER_*` environment variables taking precedence.
    pub fn load(path: &Path) -> core::result::Result<CaptureSettings, confique::Error> {
        CaptureSettings::builder()
            .env()
            .file(path)
            .load()
    }

    /// Defaults overridden by `DIGITIZER_*` environment variables only.
    pub fn from_env() -> core::result::Result<CaptureSettings, confique::Error> {
        CaptureSettings::builder()
            .env()
            .load()
    }

    pub fn to_options(&self) -> Result<AcquisitionOptions> {
        let record_length = match self.record.duration {
            Some(seconds) if seconds.is_finite() && seconds > 0.0 =>
                RecordLength::Duration(Duration::from_secs_f64(seconds)),
            Some(seconds) =>
                return Err(Error::invalid(format!("record duration {} s is not positive",
                    seconds))),
            None => RecordLength::Samples(self.record.samples),
        };
        let channels = match &self.channels {
            Some(channels) => channels.iter()
                .map(|(name, config)| -> Result<(Channel, ChannelConfiguration)> {
                    Ok((name.parse()?, *config))
                })
                .collect::<Result<BTreeMap<_, _>>>()?,
            None => BTreeMap::from([(Channel::A, ChannelConfiguration::default())]),
        };
        let options = AcquisitionOptions {
            mode: self.mode,
            clock: ClockConfiguration {
                source: self.clock.source,
                sample_rate: self.clock.sample_rate,
                edge: self.clock.edge,
                decimation: self.clock.decimation,
            },
            channels,
            trigger: TriggerConfiguration {
                operation: self.trigger.operation,
                j: TriggerEngine {
                    source: self.trigger.j_source,
                    slope: self.trigger.j_slope,
                    level: self.trigger.j_level,
                },
                k: TriggerEngine {
                    source: self.trigger.k_source,
                    slope: self.trigger.k_slope,
                    level: self.trigger.k_level,
                },
            },
            trigger_timeout: self.trigger.timeout_ms
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis),
            record_length,
            pre_trigger_samples: self.record.pre_trigger_samples,
            records_per_capture: self.record.records_per_capture,
            records_per_buffer: self.record.records_per_buffer,
            buffer_count: self.buffer_count,
            max_buffer_bytes: self.max_buffer_bytes,
            size_adjustment: self.size_adjustment,
        };
        options.check_fields()?;
        Ok(options)
    }
}
