//! The set of capture channels sharing one DMA interrupt line, and the shared completion
//! handler.
//!
//! Channels live in a fixed arena of `MAX_CHANNELS` slots, addressed by [`ChannelId`]. Control
//! code and the interrupt handler typically share the registry through a global made with
//! `make_globals!`. The raw buffers live in a [`CaptureStore`] shared with the `MicReader`, so
//! decimating never needs the registry.

use core::array;

use crate::{
    DECIMATION, MAX_CHANNELS,
    channel::{CaptureStore, Channel, MicConfig, RawBuffers, alloc_raw},
    dma::{DmaClaim, DmaTransfer, TransferCfg},
    error::{ChannelError, Error, Result},
    interrupt::{InterruptController, IrqLine},
    pio::{ClockDivisor, PdmProgram, PioBlock},
    traits::{ClockCfg, ReadyObserver},
};

/// Identifies a capture channel. Completion interrupts are resolved in ascending order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ChannelId {
    C0 = 0,
    C1 = 1,
    C2 = 2,
}

impl ChannelId {
    pub const ALL: [Self; MAX_CHANNELS] = [Self::C0, Self::C1, Self::C2];

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<usize> for ChannelId {
    type Error = Error;

    fn try_from(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(Error::ChannelError(ChannelError::OutOfRange))
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        Self::try_from(usize::from(index))
    }
}

/// Everything the capture code needs from the chip. Implemented automatically for any type
/// implementing the individual capability traits.
pub trait Hardware: DmaClaim + PdmProgram + InterruptController + ClockCfg {}

impl<T> Hardware for T where T: DmaClaim + PdmProgram + InterruptController + ClockCfg {}

type DmaOf<H> = <H as DmaClaim>::Channel;

/// Owns the hardware capabilities and up to `MAX_CHANNELS` capture channels.
pub struct MicRegistry<'a, H: Hardware> {
    hw: H,
    line: IrqLine,
    handler: Option<fn()>,
    store: &'a CaptureStore,
    channels: [Option<Channel<'a, DmaOf<H>>>; MAX_CHANNELS],
}

impl<'a, H: Hardware> MicRegistry<'a, H> {
    /// `line` is the interrupt line all channels' DMA completions are routed to. Raw buffers are
    /// placed in `store`; read them with a `MicReader` on the same store.
    pub fn new(hw: H, line: IrqLine, store: &'a CaptureStore) -> Self {
        Self {
            hw,
            line,
            handler: None,
            store,
            channels: array::from_fn(|_| None),
        }
    }

    /// Have `start` install `handler` on the interrupt line. Only needed on platforms where
    /// `InterruptController::set_handler` does something; `handler` should end up calling
    /// `on_dma_irq`.
    pub fn with_handler(mut self, handler: fn()) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel<'a, DmaOf<H>>> {
        self.channels[id.index()].as_ref()
    }

    fn channel_mut(&mut self, id: ChannelId) -> Result<&mut Channel<'a, DmaOf<H>>> {
        self.channels[id.index()]
            .as_mut()
            .ok_or(Error::ChannelError(ChannelError::NotInitialized))
    }

    /// Validate `config`, allocate the raw double buffer, claim a DMA channel, load the capture
    /// program and point the DMA at it. On failure, everything acquired so far is released and the
    /// slot stays empty.
    ///
    /// Fails with `ChannelError::Busy` if the reader is still decimating a buffer from this
    /// channel's previous initialization.
    pub fn init(&mut self, config: MicConfig, id: ChannelId) -> Result<()> {
        if self.channels[id.index()].is_some() {
            return Err(ChannelError::AlreadyInitialized.into());
        }

        let raw_size = config.raw_buffer_size().inspect_err(|e| {
            error!("Invalid config for channel {}: {:?}", id.index(), e);
        })?;
        let divisor = ClockDivisor::for_capture(self.hw.sysclk(), config.sample_rate, DECIMATION)?;

        // If the second allocation fails, the first buffer is dropped on return.
        let alloc = || {
            alloc_raw(raw_size).inspect_err(|_| {
                error!("Raw buffer allocation failed for channel {}", id.index());
            })
        };
        let raw = RawBuffers {
            bufs: [alloc()?, alloc()?],
            sample_rate: config.sample_rate,
            sample_buffer_size: config.sample_buffer_size,
        };

        let store = self.store;
        let slot = store.slot(id);
        let Ok(addrs) = slot.install(raw) else {
            warn!("Channel {} is still being read", id.index());
            return Err(ChannelError::Busy.into());
        };

        let Some(mut dma) = self.hw.claim() else {
            error!("No free DMA channel for channel {}", id.index());
            slot.remove();
            return Err(Error::ResourceExhausted);
        };

        let sm = config.state_machine;
        if let Err(e) = self.hw.load(sm, config.gpio_data, config.gpio_clk, divisor) {
            dma.abort();
            self.hw.unclaim(dma);
            slot.remove();
            return Err(e);
        }

        let cfg = TransferCfg::fifo_to_buffer(self.hw.rx_dreq(sm));
        let fifo = self.hw.rx_fifo_addr(sm);

        info!(
            "Channel {}: raw buffer size {}, DMA channel {}, clock divisor {}",
            id.index(),
            raw_size,
            dma.number(),
            divisor.as_f32()
        );

        let mut channel = Channel::new(id, config, slot, addrs, raw_size, dma);
        channel.configure_dma(&cfg, fifo);
        self.channels[id.index()] = Some(channel);

        Ok(())
    }

    /// Free a channel's raw buffers and release its DMA channel. Stops it first if it's running.
    /// Does nothing if the channel isn't initialized. A buffer the reader is decimating is freed
    /// when that read finishes.
    pub fn deinit(&mut self, id: ChannelId) {
        if self.channels[id.index()]
            .as_ref()
            .is_some_and(|c| c.is_running())
        {
            // Can't fail: the slot is occupied.
            let _ = self.stop(id);
        }

        if let Some(channel) = self.channels[id.index()].take() {
            let dma = channel.release();
            self.hw.unclaim(dma);
        }
    }

    fn any_running(&self) -> bool {
        self.channels.iter().flatten().any(|c| c.is_running())
    }

    /// Enable the shared interrupt line, installing the handler first, unless a running channel
    /// already has it enabled.
    fn enable_line(&mut self) {
        if self.any_running() {
            return;
        }
        if let Some(handler) = self.handler {
            self.hw.set_handler(self.line, handler);
        }
        self.hw.enable(self.line);
    }

    /// Start capturing on one channel: arm its DMA into buffer 0, make sure the shared interrupt
    /// line is enabled, and enable its state machine.
    pub fn start(&mut self, id: ChannelId) -> Result<()> {
        let channel = self.channel_mut(id)?;
        if channel.is_running() {
            return Ok(());
        }

        self.enable_line();

        let channel = self.channel_mut(id)?;
        channel.arm();
        let sm = channel.config().state_machine;
        self.hw.set_enabled(sm, true);

        info!("Channel {} started", id.index());
        Ok(())
    }

    /// Arm every initialized channel, then enable their state machines with one write per PIO
    /// block so the microphones' clocks start together.
    pub fn start_all(&mut self) -> Result<()> {
        if self.channels.iter().all(Option::is_none) {
            return Err(ChannelError::NotInitialized.into());
        }

        self.enable_line();

        let mut masks = [(PioBlock::Pio0, 0u8), (PioBlock::Pio1, 0u8)];
        for channel in self.channels.iter_mut().flatten() {
            if channel.is_running() {
                continue;
            }
            channel.arm();
            let sm = channel.config().state_machine;
            for (pio, mask) in masks.iter_mut() {
                if *pio == sm.pio {
                    *mask |= sm.mask();
                }
            }
        }

        for (pio, mask) in masks {
            if mask != 0 {
                self.hw.set_enabled_mask(pio, mask, true);
            }
        }

        info!("All channels started");
        Ok(())
    }

    /// Stop capturing on one channel: disable its state machine, abort its DMA and mask its DMA
    /// interrupt. The shared line is disabled once no channel is running.
    pub fn stop(&mut self, id: ChannelId) -> Result<()> {
        let channel = self.channel_mut(id)?;
        if !channel.is_running() {
            return Err(ChannelError::NotRunning.into());
        }

        let sm = channel.config().state_machine;
        self.hw.set_enabled(sm, false);
        let channel = self.channel_mut(id)?;
        channel.disarm();

        if !self.any_running() {
            self.hw.disable(self.line);
        }

        info!("Channel {} stopped", id.index());
        Ok(())
    }

    /// Set (or clear, with `None`) the observer notified each time `id` completes a raw buffer.
    /// Replaces any previous observer.
    pub fn set_ready_observer(
        &mut self,
        id: ChannelId,
        observer: Option<&'a dyn ReadyObserver>,
    ) -> Result<()> {
        self.channel_mut(id)?.set_observer(observer);
        Ok(())
    }

    /// The DMA completion handler. Call this from the shared DMA interrupt.
    ///
    /// Finds the first channel, in ascending id order, whose DMA has its completion flag set;
    /// clears the flag, publishes the finished buffer, re-arms the DMA into the other buffer and
    /// notifies the channel's observer. Returns the channel handled, or `None` for an interrupt no
    /// channel claims. A second channel completing at the same time keeps its flag set, and
    /// re-raises the interrupt.
    pub fn on_dma_irq(&mut self) -> Option<ChannelId> {
        for id in ChannelId::ALL {
            let Some(channel) = self.channels[id.index()].as_mut() else {
                continue;
            };
            if channel.dma.irq_pending() {
                channel.dma.clear_irq();
                channel.on_transfer_complete();
                return Some(id);
            }
        }

        warn!("DMA interrupt with no completed capture channel");
        None
    }
}
