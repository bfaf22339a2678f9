// Traits used across the library. Could be used more generally than in this lib.

use crate::{instant::Instant, registry::ChannelId};

/// This trait allows you to return information about the system clock.
/// It's used for deriving the capture state machine's clock divisor.
pub trait ClockCfg {
    /// System clock speed, in Hz.
    fn sysclk(&self) -> u32;
}

/// Receives a notification each time a channel publishes a freshly captured raw buffer.
///
/// `notify` runs in interrupt context, right after the DMA has been re-armed: it must not
/// block, allocate, or loop unboundedly. At most one observer is registered per channel.
pub trait ReadyObserver: Sync {
    fn notify(&self, channel: ChannelId);
}

/// Blocks the calling context until something (an interrupt, or the other core) may have
/// produced work.
pub trait Park {
    fn park(&self);
}

/// Monotonic time, eg from a free-running timer.
pub trait TimeSource {
    fn now(&self) -> Instant;
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "cortex-m")] {
        /// Parks with `WFE`. Interrupts, and `SEV` from the other core, wake it.
        #[derive(Clone, Copy, Default)]
        pub struct WaitForEvent;

        impl Park for WaitForEvent {
            fn park(&self) {
                cortex_m::asm::wfe();
            }
        }
    }
}
