//! Direct Memory Access (DMA) capability interfaces. A capture channel claims one DMA channel
//! at init, configures it to drain its state machine's RX FIFO into a raw buffer, and re-arms it
//! from the completion interrupt each time a buffer fills.
//!
//! Implement [`DmaClaim`] and [`DmaTransfer`] for your MCU's DMA peripheral.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// Channel priority, relative to other channels. Platforms with a single high-priority bit treat
/// `High` and `VeryHigh` as set.
pub enum Priority {
    Low = 0b00,
    Medium = 0b01,
    High = 0b10,
    VeryHigh = 0b11,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// Size of each data word moved.
pub enum DataSize {
    S8 = 0b00,
    S16 = 0b01,
    S32 = 0b10,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// Whether an address is incremented after each data word.
pub enum IncrMode {
    Disabled = 0,
    Enabled = 1,
}

/// A data request (pacing) signal. For capture, the RX FIFO "not empty" request of a state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Dreq(pub u8);

/// This struct is used to pass common data when configuring a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferCfg {
    pub data_size: DataSize,
    /// Whether we increment the read (peripheral) address on data word transfer.
    pub read_incr: IncrMode,
    /// Whether we increment the write (buffer) address on data word transfer.
    pub write_incr: IncrMode,
    /// The request line that paces the transfer.
    pub dreq: Dreq,
    pub priority: Priority,
}

impl TransferCfg {
    /// Byte-wide transfers from a fixed FIFO address into an incrementing buffer, paced by `dreq`.
    pub fn fifo_to_buffer(dreq: Dreq) -> Self {
        Self {
            data_size: DataSize::S8,
            read_incr: IncrMode::Disabled,
            write_incr: IncrMode::Enabled,
            dreq,
            priority: Priority::High,
        }
    }
}

/// A DMA channel this crate owns exclusively until it's handed back with [`DmaClaim::unclaim`].
///
/// Addresses are raw bus addresses. The capture code guarantees the destination buffer outlives
/// the transfer: it aborts the channel before freeing its buffers.
pub trait DmaTransfer {
    /// The hardware channel number. Used for logging.
    fn number(&self) -> u8;

    /// Configure the channel for `len` words from `read_addr` to `write_addr`, without starting it.
    fn configure(&mut self, cfg: &TransferCfg, read_addr: usize, write_addr: usize, len: usize);

    /// Point the channel at a new destination and start it immediately. The read address and
    /// configuration from `configure` are kept.
    fn start_now(&mut self, write_addr: usize, len: usize);

    /// Stop a DMA transfer, if in progress.
    fn abort(&mut self);

    /// Route this channel's transfer-complete interrupt to the shared DMA interrupt line, or not.
    fn set_irq_enabled(&mut self, enabled: bool);

    /// Is this channel's transfer-complete interrupt flag set?
    fn irq_pending(&self) -> bool;

    /// Clear an interrupt flag.
    fn clear_irq(&mut self);
}

/// Hands out unused DMA channels.
pub trait DmaClaim {
    type Channel: DmaTransfer;

    /// Claim an unused channel. `None` if they're all taken.
    fn claim(&mut self) -> Option<Self::Channel>;

    /// Give a channel back. It must not be transferring.
    fn unclaim(&mut self, channel: Self::Channel);
}
