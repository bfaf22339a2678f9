//! This library captures audio from up to three PDM microphones sampled by a programmable I/O
//! (PIO) state machine. A DMA channel per microphone streams the raw 1-bit PDM data into one of
//! two raw buffers while the other one is decimated into 16-bit PCM on demand.
//!
//! The flow is:
//!
//! - [`MicRegistry::init`] validates a [`MicConfig`], allocates the raw double buffer into a
//!   [`CaptureStore`], claims a DMA channel and loads the capture program.
//! - [`MicRegistry::start`] arms the DMA transfer and enables the shared DMA interrupt line.
//! - Each time a raw buffer fills, the interrupt handler calls [`MicRegistry::on_dma_irq`], which
//!   swaps buffers, re-arms the DMA and notifies the channel's [`ReadyObserver`].
//! - The consumer calls [`MicReader::read`] on the same store, directly or through a
//!   [`DispatchLoop`] running on a second context, to decimate the latest raw buffer into PCM.
//!   The reader doesn't touch the registry, so completions keep being handled while it filters.
//!
//! Hardware access goes through the capability traits in [`dma`], [`pio`], [`interrupt`] and
//! [`traits`], so the same capture logic runs against real peripherals or a test double.
//!
//! Example interrupt glue:
//!
//! ```rust,ignore
//! static STORE: CaptureStore = CaptureStore::new();
//! make_globals!((MICS, MicRegistry<'static, Board>));
//!
//! #[interrupt]
//! fn DMA_IRQ_0() {
//!     critical_section::with(|cs| {
//!         access_global!(MICS, mics, cs);
//!         mics.on_dma_irq();
//!     });
//! }
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// Re-exported so the global helper macros resolve without a direct dependency.
pub use critical_section;

#[macro_use]
mod macros;

pub mod bounce;
pub mod channel;
pub mod dispatch;
pub mod dma;
pub mod error;
pub mod filter;
pub mod instant;
pub mod interrupt;
pub mod pio;
pub mod reader;
pub mod registry;
pub mod traits;

pub use crate::{
    bounce::{Bounce, BounceConfig, BounceDetector},
    channel::{CaptureStore, Channel, MicConfig},
    dispatch::{DispatchLoop, Processor, ReadyFlags, SampleSource},
    error::{ChannelError, ConfigError, Error, Result},
    filter::{FilterParams, FilterTransform, PdmFilter},
    instant::Instant,
    reader::MicReader,
    registry::{ChannelId, Hardware, MicRegistry},
    traits::{ClockCfg, Park, ReadyObserver, TimeSource},
};

/// Number of raw PDM bits consumed per PCM output sample.
pub const DECIMATION: usize = 64;

/// Raw buffers per channel: one the DMA writes, one the reader consumes.
pub const RAW_BUFFER_COUNT: usize = 2;

/// Maximum number of microphones sharing the DMA interrupt line.
pub const MAX_CHANNELS: usize = 3;
