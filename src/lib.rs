pub mod sys;
mod regs;
mod config;
mod chain;
mod channels;
mod geometry;
mod buffer;
mod mode;
mod session;
mod convert;
mod device;
pub mod settings;

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unsupported by hardware: {0}")]
    HardwareConstraintViolation(String),
    #[error("cannot allocate {bytes} bytes of DMA buffer memory")]
    Allocation { bytes: usize },
    #[error("no buffer completed within {0:?}")]
    CaptureTimeout(Duration),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("driver error: {0}")]
    Driver(Box<dyn std::error::Error + Sync + Send + 'static>),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidConfiguration(message.into())
    }

    pub(crate) fn constraint(message: impl Into<String>) -> Self {
        Error::HardwareConstraintViolation(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedOperation(message.into())
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use regs::{
    ChannelMask,
    AsyncFlags,
};

pub use config::{
    Channel,
    Coupling,
    Impedance,
    InputRange,
    ChannelConfiguration,
    ClockSource,
    ClockEdge,
    ClockConfiguration,
    TriggerOperation,
    TriggerSource,
    TriggerSlope,
    TriggerEngine,
    TriggerConfiguration,
    RecordLength,
    AcquisitionOptions,
};

pub use chain::DependencyChain;

pub use channels::ChannelRegistry;

pub use geometry::{
    round_up_pow2,
    size_adjustment_steps,
    GeometryRequest,
    GeometryWarning,
    RecordGeometry,
    SizeAdjustment,
    MAX_SIZE_ADJUSTMENT_ITERATIONS,
};

pub use buffer::{
    AbortHandle,
    BufferPool,
    BufferState,
    DmaBuffer,
    DrainOutcome,
};

pub use mode::{
    AcquisitionMode,
    BufferLayout,
    Capabilities,
    GeometryPolicy,
    Processing,
};

pub use session::CaptureSession;

pub use convert::{
    convert,
    convert_into,
    encode,
};

pub use device::{
    ConfigStep,
    Device,
    State,
};

pub use sys::{
    AsyncReadParameters,
    ChannelInfo,
    Driver,
    WaitStatus,
};
