use bitflags::bitflags;

bitflags! {
    /// Union of input channel codes, as used by multi-channel hardware calls.
    ///
    /// Channel `A` has code `1<<0`, channel `P` has code `1<<15`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u32 {
        const A = 1<<0;
        const B = 1<<1;
        const C = 1<<2;
        const D = 1<<3;
        const E = 1<<4;
        const F = 1<<5;
        const G = 1<<6;
        const H = 1<<7;
        const I = 1<<8;
        const J = 1<<9;
        const K = 1<<10;
        const L = 1<<11;
        const M = 1<<12;
        const N = 1<<13;
        const O = 1<<14;
        const P = 1<<15;
    }
}

impl ChannelMask {
    pub fn channel(index: usize) -> Self {
        assert!(index < 16, "channel index {} out of range", index);
        ChannelMask::from_bits_retain(1 << index)
    }
}

bitflags! {
    /// Flags selecting the asynchronous (DMA) transfer mode.
    ///
    /// Absence of all mode flags selects the traditional record-major mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AsyncFlags: u32 {
        /// Do not begin acquiring until `start_capture` is called.
        const ExternalStartCapture  = 1<<0;
        /// Untriggered stream; each buffer holds one contiguous span per channel.
        const ContinuousMode        = 1<<8;
        /// One record per trigger, no pre-trigger samples, channel-major buffers.
        const NoPreTrigger          = 1<<9;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_channel_codes() {
        assert_eq!(ChannelMask::channel(0), ChannelMask::A);
        assert_eq!(ChannelMask::channel(3), ChannelMask::D);
        assert_eq!(ChannelMask::channel(15), ChannelMask::P);
        assert_eq!((ChannelMask::A | ChannelMask::C).bits(), 0b101);
    }
}
