//! High-level configuration of the digitizer in terms of physical qualities.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};
use crate::geometry::SizeAdjustment;
use crate::mode::AcquisitionMode;
use crate::regs::ChannelMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum Channel {
    A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P,
}

impl Channel {
    pub const ALL: [Channel; 16] = [
        Channel::A, Channel::B, Channel::C, Channel::D,
        Channel::E, Channel::F, Channel::G, Channel::H,
        Channel::I, Channel::J, Channel::K, Channel::L,
        Channel::M, Channel::N, Channel::O, Channel::P,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn code(self) -> ChannelMask {
        ChannelMask::channel(self.index())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", (b'A' + self.index() as u8) as char)
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(name: &str) -> Result<Channel> {
        match name.as_bytes() {
            &[letter @ b'A'..=b'P'] | &[letter @ b'a'..=b'p'] =>
                Ok(Channel::ALL[(letter.to_ascii_uppercase() - b'A') as usize]),
            _ => Err(Error::invalid(format!("unknown channel {:?}", name))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coupling {
    #[default]
    DC,
    AC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Impedance {
    #[serde(rename = "50ohm")]
    Ohm50,
    #[default]
    #[serde(rename = "1mohm")]
    Ohm1M,
}

/// Full-scale input range; a range of `V1` spans -1 V..+1 V.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "f64")]
pub enum InputRange {
    mV20,
    mV40,
    mV50,
    mV80,
    mV100,
    mV200,
    #[default]
    mV400,
    mV500,
    mV800,
    V1,
    V2,
    V4,
    V5,
    V8,
    V10,
    V20,
}

impl InputRange {
    pub const ALL: [InputRange; 16] = [
        Self::mV20, Self::mV40, Self::mV50, Self::mV80,
        Self::mV100, Self::mV200, Self::mV400, Self::mV500,
        Self::mV800, Self::V1, Self::V2, Self::V4,
        Self::V5, Self::V8, Self::V10, Self::V20,
    ];

    pub fn volts(self) -> f64 {
        match self {
            Self::mV20  => 0.020,
            Self::mV40  => 0.040,
            Self::mV50  => 0.050,
            Self::mV80  => 0.080,
            Self::mV100 => 0.100,
            Self::mV200 => 0.200,
            Self::mV400 => 0.400,
            Self::mV500 => 0.500,
            Self::mV800 => 0.800,
            Self::V1    => 1.0,
            Self::V2    => 2.0,
            Self::V4    => 4.0,
            Self::V5    => 5.0,
            Self::V8    => 8.0,
            Self::V10   => 10.0,
            Self::V20   => 20.0,
        }
    }

    pub fn from_volts(volts: f64) -> Result<InputRange> {
        Self::ALL.iter()
            .copied()
            .find(|range| (range.volts() - volts).abs() <= range.volts() * 1e-6)
            .ok_or_else(|| Error::invalid(format!("unsupported input range ±{} V", volts)))
    }
}

impl TryFrom<f64> for InputRange {
    type Error = Error;

    fn try_from(volts: f64) -> Result<InputRange> {
        InputRange::from_volts(volts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ChannelConfiguration {
    pub range: InputRange,
    pub coupling: Coupling,
    pub impedance: Impedance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClockSource {
    #[default]
    Internal,
    /// 10 MHz reference on the clock input; the sample clock is synthesized from it.
    ExternalReference,
    /// Sample clock supplied directly on the clock input.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockEdge {
    #[default]
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConfiguration {
    pub source: ClockSource,
    /// Sample rate in samples per second, before decimation.
    pub sample_rate: f64,
    pub edge: ClockEdge,
    /// Keep every Nth sample; `1` disables decimation.
    pub decimation: u32,
}

impl Default for ClockConfiguration {
    fn default() -> Self {
        Self {
            source: Default::default(),
            sample_rate: 125e6,
            edge: Default::default(),
            decimation: 1,
        }
    }
}

impl ClockConfiguration {
    pub fn effective_sample_rate(&self) -> f64 {
        self.sample_rate / self.decimation.max(1) as f64
    }

    pub(crate) fn check(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(Error::invalid(format!("sample rate {} is not positive", self.sample_rate)))
        }
        if self.decimation == 0 {
            return Err(Error::invalid("decimation factor must be at least 1"))
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerOperation {
    #[default]
    J,
    K,
    JOrK,
    JAndK,
    JXorK,
    JAndNotK,
    NotJAndK,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum TriggerSource {
    Channel(Channel),
    External,
    #[default]
    Disabled,
}

impl FromStr for TriggerSource {
    type Err = Error;

    fn from_str(name: &str) -> Result<TriggerSource> {
        match name {
            "external" => Ok(TriggerSource::External),
            "disabled" => Ok(TriggerSource::Disabled),
            _ => name.parse().map(TriggerSource::Channel)
                .map_err(|_| Error::invalid(format!("unknown trigger source {:?}", name))),
        }
    }
}

impl TryFrom<String> for TriggerSource {
    type Error = Error;

    fn try_from(name: String) -> Result<TriggerSource> {
        name.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSlope {
    #[default]
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TriggerEngine {
    pub source: TriggerSource,
    pub slope: TriggerSlope,
    /// Level as a fraction of the source's range: `0` is negative full scale, `128` is zero,
    /// `255` is positive full scale.
    pub level: u8,
}

impl Default for TriggerEngine {
    fn default() -> Self {
        Self {
            source: Default::default(),
            slope: Default::default(),
            level: 128,
        }
    }
}

impl TriggerEngine {
    pub fn is_enabled(&self) -> bool {
        self.source != TriggerSource::Disabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TriggerConfiguration {
    pub operation: TriggerOperation,
    pub j: TriggerEngine,
    pub k: TriggerEngine,
}

impl Default for TriggerConfiguration {
    fn default() -> Self {
        Self {
            operation: TriggerOperation::J,
            j: TriggerEngine {
                source: TriggerSource::Channel(Channel::A),
                slope: TriggerSlope::Positive,
                level: 150,
            },
            k: TriggerEngine::default(),
        }
    }
}

impl TriggerConfiguration {
    /// Both engines disconnected; used for untriggered acquisition.
    pub fn disabled() -> Self {
        Self {
            operation: TriggerOperation::J,
            j: TriggerEngine::default(),
            k: TriggerEngine::default(),
        }
    }

    /// Whether the selected operation can ever fire with the current engine sources.
    pub fn can_fire(&self) -> bool {
        match self.operation {
            TriggerOperation::J => self.j.is_enabled(),
            TriggerOperation::K => self.k.is_enabled(),
            TriggerOperation::JOrK | TriggerOperation::JXorK =>
                self.j.is_enabled() || self.k.is_enabled(),
            TriggerOperation::JAndK => self.j.is_enabled() && self.k.is_enabled(),
            TriggerOperation::JAndNotK => self.j.is_enabled(),
            TriggerOperation::NotJAndK => self.k.is_enabled(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordLength {
    /// Rounded up to a power-of-two sample count at the configured rate.
    Duration(Duration),
    Samples(usize),
}

impl Default for RecordLength {
    fn default() -> Self {
        RecordLength::Samples(1024)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionOptions {
    pub mode: AcquisitionMode,
    pub clock: ClockConfiguration,
    pub channels: BTreeMap<Channel, ChannelConfiguration>,
    pub trigger: TriggerConfiguration,
    /// The hardware triggers itself if no trigger event arrives within this time.
    /// `None` or zero waits for a trigger indefinitely.
    pub trigger_timeout: Option<Duration>,
    pub record_length: RecordLength,
    pub pre_trigger_samples: usize,
    pub records_per_capture: usize,
    pub records_per_buffer: usize,
    /// Number of DMA buffers cycled through during a capture.
    pub buffer_count: usize,
    /// Largest single DMA transfer the hardware accepts.
    pub max_buffer_bytes: usize,
    pub size_adjustment: SizeAdjustment,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::TriggeredRecording,
            clock: Default::default(),
            channels: BTreeMap::from([(Channel::A, ChannelConfiguration::default())]),
            trigger: Default::default(),
            trigger_timeout: None,
            record_length: Default::default(),
            pre_trigger_samples: 0,
            records_per_capture: 1,
            records_per_buffer: 1,
            buffer_count: 4,
            max_buffer_bytes: 16 << 20,
            size_adjustment: Default::default(),
        }
    }
}

impl AcquisitionOptions {
    /// Check each value on its own, without regard to how values combine.
    pub(crate) fn check_fields(&self) -> Result<()> {
        self.clock.check()?;
        match self.record_length {
            RecordLength::Samples(0) =>
                return Err(Error::invalid("record length must be at least one sample")),
            RecordLength::Duration(duration) if duration.is_zero() =>
                return Err(Error::invalid("record duration must be positive")),
            _ => ()
        }
        if self.records_per_capture == 0 {
            return Err(Error::invalid("records per capture must be at least 1"))
        }
        if self.records_per_buffer == 0 {
            return Err(Error::invalid("records per buffer must be at least 1"))
        }
        if self.buffer_count == 0 {
            return Err(Error::invalid("buffer count must be at least 1"))
        }
        if self.max_buffer_bytes == 0 {
            return Err(Error::invalid("maximum buffer size must be positive"))
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!("A".parse::<Channel>().unwrap(), Channel::A);
        assert_eq!("p".parse::<Channel>().unwrap(), Channel::P);
        assert!("Q".parse::<Channel>().is_err());
        assert!("AB".parse::<Channel>().is_err());
        assert_eq!(Channel::D.to_string(), "D");
        assert_eq!(Channel::C.code(), ChannelMask::C);
    }

    #[test]
    fn test_input_range_from_volts() {
        assert_eq!(InputRange::from_volts(0.4).unwrap(), InputRange::mV400);
        assert_eq!(InputRange::from_volts(20.0).unwrap(), InputRange::V20);
        assert!(matches!(InputRange::from_volts(0.3), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(InputRange::from_volts(-1.0), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_trigger_source_names() {
        assert_eq!("B".parse::<TriggerSource>().unwrap(), TriggerSource::Channel(Channel::B));
        assert_eq!("external".parse::<TriggerSource>().unwrap(), TriggerSource::External);
        assert!("aux".parse::<TriggerSource>().is_err());
    }

    #[test]
    fn test_trigger_can_fire() {
        assert!(TriggerConfiguration::default().can_fire());
        assert!(!TriggerConfiguration::disabled().can_fire());
        let config = TriggerConfiguration {
            operation: TriggerOperation::JAndK,
            ..Default::default()
        };
        assert!(!config.can_fire());
    }

    #[test]
    fn test_clock_check() {
        assert!(ClockConfiguration::default().check().is_ok());
        let clock = ClockConfiguration { sample_rate: f64::NAN, ..Default::default() };
        assert!(clock.check().is_err());
        let clock = ClockConfiguration { decimation: 0, ..Default::default() };
        assert!(clock.check().is_err());
        let clock = ClockConfiguration { sample_rate: 100e6, decimation: 4, ..Default::default() };
        assert_eq!(clock.effective_sample_rate(), 25e6);
    }
}
