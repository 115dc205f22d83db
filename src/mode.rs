use serde::Deserialize;

use crate::regs::AsyncFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionMode {
    /// Configuration only; useful to validate connectivity.
    Basic,
    /// Untriggered stream split into fixed-size buffers.
    Continuous,
    /// One record per trigger without pre-trigger samples, many records per buffer.
    TriggeredContinuous,
    /// One record per trigger with optional pre-trigger samples.
    TriggeredRecording,
    /// Records accumulate in on-board memory and are read out one at a time afterwards.
    ///
    /// Discouraged: on some boards this corrupts the lowest ADC codes.
    TriggeredRecordingSingleMode,
}

/// How records of several channels are arranged within one DMA buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLayout {
    /// Every record of the first channel, then every record of the next one.
    ChannelMajor,
    /// The first record of every channel, then the next record of every channel.
    RecordMajor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryPolicy {
    None,
    /// One record per channel per buffer.
    Streaming,
    PackedRecords,
    OnboardMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processing {
    Unsupported,
    Dma(BufferLayout),
    OnboardReadout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub is_triggered: bool,
    pub wants_pre_trigger: bool,
    pub geometry: GeometryPolicy,
    pub processing: Processing,
}

impl AcquisitionMode {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Basic => Capabilities {
                is_triggered: false,
                wants_pre_trigger: false,
                geometry: GeometryPolicy::None,
                processing: Processing::Unsupported,
            },
            Self::Continuous => Capabilities {
                is_triggered: false,
                wants_pre_trigger: false,
                geometry: GeometryPolicy::Streaming,
                processing: Processing::Dma(BufferLayout::ChannelMajor),
            },
            Self::TriggeredContinuous => Capabilities {
                is_triggered: true,
                wants_pre_trigger: false,
                geometry: GeometryPolicy::PackedRecords,
                processing: Processing::Dma(BufferLayout::ChannelMajor),
            },
            Self::TriggeredRecording => Capabilities {
                is_triggered: true,
                wants_pre_trigger: true,
                geometry: GeometryPolicy::PackedRecords,
                processing: Processing::Dma(BufferLayout::RecordMajor),
            },
            Self::TriggeredRecordingSingleMode => Capabilities {
                is_triggered: true,
                wants_pre_trigger: true,
                geometry: GeometryPolicy::OnboardMemory,
                processing: Processing::OnboardReadout,
            },
        }
    }

    pub(crate) fn async_flags(self) -> AsyncFlags {
        AsyncFlags::ExternalStartCapture | match self {
            Self::Continuous => AsyncFlags::ContinuousMode,
            Self::TriggeredContinuous => AsyncFlags::NoPreTrigger,
            _ => AsyncFlags::empty(),
        }
    }

    pub fn is_discouraged(self) -> bool {
        self == Self::TriggeredRecordingSingleMode
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_layout_per_mode() {
        assert_eq!(AcquisitionMode::Continuous.capabilities().processing,
            Processing::Dma(BufferLayout::ChannelMajor));
        assert_eq!(AcquisitionMode::TriggeredContinuous.capabilities().processing,
            Processing::Dma(BufferLayout::ChannelMajor));
        assert_eq!(AcquisitionMode::TriggeredRecording.capabilities().processing,
            Processing::Dma(BufferLayout::RecordMajor));
        assert_eq!(AcquisitionMode::Basic.capabilities().processing, Processing::Unsupported);
    }

    #[test]
    fn test_async_flags() {
        assert_eq!(AcquisitionMode::TriggeredRecording.async_flags(),
            AsyncFlags::ExternalStartCapture);
        assert!(AcquisitionMode::TriggeredContinuous.async_flags()
            .contains(AsyncFlags::NoPreTrigger));
        assert!(AcquisitionMode::Continuous.async_flags().contains(AsyncFlags::ContinuousMode));
    }
}
