//! Common error definitions.

macro_rules! impl_from_error {
    ($error:ident) => {
        impl From<$error> for Error {
            fn from(error: $error) -> Self {
                Self::$error(error)
            }
        }
    };
}

/// Alias for Result<T, Error>.
pub type Result<T> = core::result::Result<T, Error>;

/// Invalid capture parameters. Detected at init, before any resource is acquired.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `sample_buffer_size` doesn't hold a whole number of 1ms frames at `sample_rate`.
    BufferNotWholeFrames,
    /// A 1ms frame at this sample rate holds no samples.
    SampleRateTooLow,
    /// The state machine clock divisor falls outside what the hardware supports (1.0 - 65535.996).
    ClockDivisorOutOfRange,
    /// The raw buffer size doesn't fit in `usize`.
    BufferTooLarge,
}

/// Errors about the channel slot an operation targets.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelError {
    /// The channel number is past `MAX_CHANNELS`.
    OutOfRange,
    NotInitialized,
    AlreadyInitialized,
    /// The channel was initialized, but capture isn't running.
    NotRunning,
    /// The reader is still decimating the channel's previous raw buffers.
    Busy,
}

/// Collection of all errors that can occur.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    ConfigError(ConfigError),
    ChannelError(ChannelError),
    /// Raw buffer memory couldn't be allocated.
    AllocationError,
    /// No DMA channel was free to claim, or the PIO block has no room for the capture program.
    ResourceExhausted,
    /// The hardware finished another raw buffer before the consumer was done with the previous one,
    /// so capture data was overwritten. Reported, never recovered from.
    BufferCorruption,
}

impl_from_error!(ConfigError);
impl_from_error!(ChannelError);
