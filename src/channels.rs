use std::collections::BTreeMap;

use crate::{Error, Result};
use crate::config::{Channel, ChannelConfiguration, Coupling, Impedance, InputRange};
use crate::regs::ChannelMask;

/// Set of enabled input channels and their front-end configuration.
///
/// The hardware samples 1, 2, 4, ... channels at a time, so only power-of-two counts that fit
/// the board are accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRegistry {
    input_channels: usize,
    enabled: BTreeMap<Channel, ChannelConfiguration>,
}

impl ChannelRegistry {
    pub fn new(input_channels: usize) -> ChannelRegistry {
        ChannelRegistry { input_channels, enabled: BTreeMap::new() }
    }

    /// Build a registry with exactly `channels` enabled, checking the final count once.
    pub fn with_channels<I>(input_channels: usize, channels: I) -> Result<ChannelRegistry>
            where I: IntoIterator<Item = (Channel, ChannelConfiguration)> {
        let mut registry = ChannelRegistry::new(input_channels);
        for (channel, config) in channels {
            registry.check_present(channel)?;
            registry.enabled.insert(channel, config);
        }
        registry.check_count(registry.enabled.len())?;
        Ok(registry)
    }

    fn check_present(&self, channel: Channel) -> Result<()> {
        if channel.index() >= self.input_channels {
            return Err(Error::constraint(format!("channel {} is not present on a {}-channel board",
                channel, self.input_channels)))
        }
        Ok(())
    }

    fn check_count(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::invalid("at least one channel must be enabled"))
        }
        if !count.is_power_of_two() || count > self.input_channels {
            return Err(Error::constraint(format!("cannot sample {} channels at once on a \
                {}-channel board", count, self.input_channels)))
        }
        Ok(())
    }

    pub fn enable(&mut self, channel: Channel, range: InputRange, coupling: Coupling,
                  impedance: Impedance) -> Result<()> {
        self.check_present(channel)?;
        let count = self.enabled.len() + !self.enabled.contains_key(&channel) as usize;
        self.check_count(count)?;
        self.enabled.insert(channel, ChannelConfiguration { range, coupling, impedance });
        Ok(())
    }

    pub fn disable(&mut self, channel: Channel) -> Option<ChannelConfiguration> {
        self.enabled.remove(&channel)
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn channel_mask(&self) -> ChannelMask {
        self.enabled.keys().fold(ChannelMask::empty(), |mask, channel| mask | channel.code())
    }

    pub fn channel_count(&self) -> usize {
        self.enabled.len()
    }

    pub fn get(&self, channel: Channel) -> Option<&ChannelConfiguration> {
        self.enabled.get(&channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &ChannelConfiguration)> + '_ {
        self.enabled.iter().map(|(&channel, config)| (channel, config))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn enable(registry: &mut ChannelRegistry, channel: Channel) -> Result<()> {
        registry.enable(channel, InputRange::V1, Coupling::DC, Impedance::Ohm50)
    }

    #[test]
    fn test_power_of_two_counts() {
        let mut registry = ChannelRegistry::new(4);
        enable(&mut registry, Channel::A).unwrap();
        enable(&mut registry, Channel::B).unwrap();
        assert!(matches!(enable(&mut registry, Channel::C),
            Err(Error::HardwareConstraintViolation(_))));
        assert_eq!(registry.channel_count(), 2);
        assert_eq!(registry.channel_mask(), ChannelMask::A | ChannelMask::B);

        let registry = ChannelRegistry::with_channels(4,
            Channel::ALL[..4].iter().map(|&channel| (channel, Default::default()))).unwrap();
        assert_eq!(registry.channel_count(), 4);
        assert_eq!(registry.channel_mask().bits(), 0b1111);
    }

    #[test]
    fn test_three_channels_rejected() {
        let result = ChannelRegistry::with_channels(4,
            Channel::ALL[..3].iter().map(|&channel| (channel, Default::default())));
        assert!(matches!(result, Err(Error::HardwareConstraintViolation(_))));
    }

    #[test]
    fn test_channel_beyond_board() {
        let mut registry = ChannelRegistry::new(2);
        assert!(matches!(enable(&mut registry, Channel::C),
            Err(Error::HardwareConstraintViolation(_))));
        assert!(matches!(ChannelRegistry::with_channels(2, Vec::new()),
            Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_reenable_updates_configuration() {
        let mut registry = ChannelRegistry::new(1);
        enable(&mut registry, Channel::A).unwrap();
        registry.enable(Channel::A, InputRange::V20, Coupling::AC, Impedance::Ohm1M).unwrap();
        assert_eq!(registry.get(Channel::A).unwrap().range, InputRange::V20);
        assert_eq!(registry.disable(Channel::A).unwrap().coupling, Coupling::AC);
        assert_eq!(registry.iter().count(), 0);
    }
}
