//! A single microphone capture channel, split in two halves that share one [`CaptureStore`] slot:
//!
//! - [`Channel`], owned by the `MicRegistry`: configuration, the DMA channel and the ready
//!   observer. Its `on_transfer_complete` runs in the completion interrupt.
//! - The reader half (see `reader.rs`): filter state, volume and overrun accounting.
//!
//! The slot holds the raw double buffer and the hand-off indices:
//! - `write_index` and `published` are written only by the completion handler.
//! - `read_index` is written by the completion handler when it publishes a buffer, and by the
//!   reader when it takes one. Both happen inside short critical sections, so each side sees the
//!   indices change as a unit.
//! - The raw buffers are installed and removed by the control context only, while the reader isn't
//!   using them. The DMA writes them through the addresses cached in `Channel`; the reader reads
//!   the completed one outside any critical section.
//!
//! Decimation holds no lock against the completion handler. With two buffers, the reader must finish
//! with buffer N before the hardware wraps back around to it; if it falls behind by more than a
//! buffer period, data is overwritten. This is detected (see `MicReader::overruns`), not prevented.

use alloc::{boxed::Box, vec::Vec};
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU8, AtomicU32, Ordering, compiler_fence},
};

use crate::{
    DECIMATION, MAX_CHANNELS, RAW_BUFFER_COUNT,
    dma::{DmaTransfer, TransferCfg},
    error::{ChannelError, ConfigError, Error, Result},
    pio::{PioBlock, StateMachine},
    registry::ChannelId,
    traits::ReadyObserver,
};

/// Capture parameters for one microphone.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MicConfig {
    /// GPIO pin for the PDM data signal.
    pub gpio_data: u8,
    /// GPIO pin for the PDM clock signal.
    pub gpio_clk: u8,
    /// The state machine that runs the capture program.
    pub state_machine: StateMachine,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of PCM samples per raw buffer. Must be a whole number of 1ms frames.
    pub sample_buffer_size: usize,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            gpio_data: 2,
            gpio_clk: 3,
            state_machine: StateMachine::new(PioBlock::Pio0, 0),
            sample_rate: 16_000,
            sample_buffer_size: 256,
        }
    }
}

impl MicConfig {
    pub const fn new(
        gpio_data: u8,
        gpio_clk: u8,
        state_machine: StateMachine,
        sample_rate: u32,
        sample_buffer_size: usize,
    ) -> Self {
        Self {
            gpio_data,
            gpio_clk,
            state_machine,
            sample_rate,
            sample_buffer_size,
        }
    }

    /// Samples in a 1ms frame. The filter runs one frame at a time.
    pub fn frame_len(&self) -> usize {
        (self.sample_rate / 1_000) as usize
    }

    /// Check that the buffer holds a whole number of frames, and return the raw buffer size in
    /// bytes.
    pub fn raw_buffer_size(&self) -> Result<usize> {
        let frame = self.frame_len();
        if frame == 0 {
            return Err(ConfigError::SampleRateTooLow.into());
        }
        if self.sample_buffer_size % frame != 0 {
            return Err(ConfigError::BufferNotWholeFrames.into());
        }

        self.sample_buffer_size
            .checked_mul(DECIMATION / 8)
            .ok_or(Error::ConfigError(ConfigError::BufferTooLarge))
    }
}

/// Allocate a zeroed raw buffer, reporting failure instead of aborting.
pub(crate) fn alloc_raw(len: usize) -> Result<Box<[u8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::AllocationError)?;
    buf.resize(len, 0);
    Ok(buf.into_boxed_slice())
}

/// A channel's raw double buffer, and what the reader needs to know to decimate it.
pub(crate) struct RawBuffers {
    pub(crate) bufs: [Box<[u8]>; RAW_BUFFER_COUNT],
    pub(crate) sample_rate: u32,
    pub(crate) sample_buffer_size: usize,
}

// Slot states.
const FREE: u8 = 0;
const INSTALLED: u8 = 1;
/// The reader is decimating a buffer.
const READING: u8 = 2;
/// Removed while the reader was decimating; the reader frees the buffers when it's done.
const RETIRED: u8 = 3;

/// A completed buffer taken by the reader. Hand it back with [`Slot::end_read`].
pub(crate) struct Pending<'s> {
    pub(crate) raw: &'s RawBuffers,
    pub(crate) index: u8,
    /// Buffers completed since start, as of taking this one.
    pub(crate) published: u32,
    /// Which start this buffer belongs to.
    pub(crate) generation: u32,
}

pub(crate) struct Slot {
    raw: UnsafeCell<Option<RawBuffers>>,
    state: AtomicU8,
    /// The buffer the DMA is filling.
    write_index: AtomicU8,
    /// The most recently completed buffer, until the reader takes it.
    read_index: AtomicU8,
    /// Buffers completed since start.
    published: AtomicU32,
    /// Bumped on each start, so the reader resets its filter.
    generation: AtomicU32,
}

// SAFETY: the raw buffers are only accessed following the state protocol above, with state
// changes made inside critical sections. Everything else is atomic.
unsafe impl Sync for Slot {}

impl Slot {
    const fn new() -> Self {
        Self {
            raw: UnsafeCell::new(None),
            state: AtomicU8::new(FREE),
            write_index: AtomicU8::new(0),
            read_index: AtomicU8::new(0),
            published: AtomicU32::new(0),
            generation: AtomicU32::new(0),
        }
    }

    pub(crate) fn write_index(&self) -> u8 {
        self.write_index.load(Ordering::Acquire)
    }

    pub(crate) fn read_index(&self) -> u8 {
        self.read_index.load(Ordering::Acquire)
    }

    /// Control context. Takes ownership of `raw`, and returns the buffers' bus addresses. Hands
    /// `raw` back if the reader still holds the previous buffers.
    pub(crate) fn install(
        &self,
        mut raw: RawBuffers,
    ) -> core::result::Result<[usize; RAW_BUFFER_COUNT], RawBuffers> {
        let addrs = raw.bufs.each_mut().map(|b| b.as_mut_ptr() as usize);

        critical_section::with(|_| {
            if self.state.load(Ordering::Acquire) != FREE {
                return Err(raw);
            }
            // SAFETY: a `FREE` slot's buffers are touched by nobody else.
            unsafe { *self.raw.get() = Some(raw) };
            // Nothing to read until the first completion.
            self.write_index.store(0, Ordering::Release);
            self.read_index.store(0, Ordering::Release);
            self.published.store(0, Ordering::Release);
            self.state.store(INSTALLED, Ordering::Release);
            Ok(addrs)
        })
    }

    /// Control context. Frees the buffers, or leaves that to the reader if it's using them. The
    /// DMA must already be stopped.
    pub(crate) fn remove(&self) {
        let freed = critical_section::with(|_| match self.state.load(Ordering::Acquire) {
            INSTALLED => {
                self.state.store(FREE, Ordering::Release);
                // SAFETY: `INSTALLED` and not `READING`: the reader holds no reference.
                unsafe { (*self.raw.get()).take() }
            }
            READING => {
                self.state.store(RETIRED, Ordering::Release);
                None
            }
            _ => None,
        });
        drop(freed);
    }

    /// Reset the hand-off for a new start: DMA into buffer 0, nothing published.
    pub(crate) fn reset(&self) {
        critical_section::with(|_| {
            self.write_index.store(0, Ordering::Release);
            self.read_index.store(0, Ordering::Release);
            self.published.store(0, Ordering::Release);
            let generation = self.generation.load(Ordering::Relaxed);
            self.generation
                .store(generation.wrapping_add(1), Ordering::Release);
        });
    }

    /// Completion handler. Publish the buffer the DMA just filled and return the one to fill next.
    pub(crate) fn publish(&self) -> u8 {
        critical_section::with(|_| {
            let finished = self.write_index.load(Ordering::Relaxed);
            let next = (finished + 1) % RAW_BUFFER_COUNT as u8;
            self.read_index.store(finished, Ordering::Release);
            self.write_index.store(next, Ordering::Release);

            let published = self.published.load(Ordering::Relaxed);
            self.published
                .store(published.wrapping_add(1), Ordering::Release);
            next
        })
    }

    /// Reader. Take the most recently completed buffer, if there's one the reader hasn't had yet.
    pub(crate) fn begin_read(&self) -> Result<Option<Pending<'_>>> {
        critical_section::with(|_| {
            if self.state.load(Ordering::Acquire) != INSTALLED {
                return Err(ChannelError::NotInitialized.into());
            }

            let read = self.read_index.load(Ordering::Acquire);
            if read == self.write_index.load(Ordering::Acquire) {
                return Ok(None);
            }

            // Stepping past the buffer makes `read_index == write_index` until the next completion.
            self.read_index
                .store((read + 1) % RAW_BUFFER_COUNT as u8, Ordering::Release);
            self.state.store(READING, Ordering::Release);

            // SAFETY: while `READING`, the buffers are neither replaced nor freed.
            let Some(raw) = (unsafe { (*self.raw.get()).as_ref() }) else {
                self.state.store(INSTALLED, Ordering::Release);
                return Err(ChannelError::NotInitialized.into());
            };

            Ok(Some(Pending {
                raw,
                index: read,
                published: self.published.load(Ordering::Acquire),
                generation: self.generation.load(Ordering::Acquire),
            }))
        })
    }

    /// Reader. Done with the buffer taken by `begin_read`; `pending` must not be used after this.
    pub(crate) fn end_read(&self) {
        compiler_fence(Ordering::SeqCst);
        let freed = critical_section::with(|_| match self.state.load(Ordering::Acquire) {
            READING => {
                self.state.store(INSTALLED, Ordering::Release);
                None
            }
            RETIRED => {
                self.state.store(FREE, Ordering::Release);
                // SAFETY: the reader's reference is gone, and the control context has let go.
                unsafe { (*self.raw.get()).take() }
            }
            _ => None,
        });
        drop(freed);
    }
}

/// Raw buffers and hand-off state for every channel, shared by the `MicRegistry` and the
/// `MicReader`. Usually a `static`:
///
/// ```rust,ignore
/// static STORE: CaptureStore = CaptureStore::new();
/// ```
pub struct CaptureStore {
    slots: [Slot; MAX_CHANNELS],
}

impl CaptureStore {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::new(), Slot::new(), Slot::new()],
        }
    }

    pub(crate) fn slot(&self, id: ChannelId) -> &Slot {
        &self.slots[id.index()]
    }
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The registry's half of one microphone. Created by `MicRegistry::init`.
pub struct Channel<'a, D> {
    id: ChannelId,
    config: MicConfig,
    slot: &'a Slot,
    /// Bus addresses of the raw buffers.
    addrs: [usize; RAW_BUFFER_COUNT],
    len: usize,
    observer: Option<&'a dyn ReadyObserver>,
    pub(crate) dma: D,
    running: bool,
}

impl<'a, D: DmaTransfer> Channel<'a, D> {
    pub(crate) fn new(
        id: ChannelId,
        config: MicConfig,
        slot: &'a Slot,
        addrs: [usize; RAW_BUFFER_COUNT],
        len: usize,
        dma: D,
    ) -> Self {
        Self {
            id,
            config,
            slot,
            addrs,
            len,
            observer: None,
            dma,
            running: false,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn config(&self) -> &MicConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Size of each raw buffer, in bytes.
    pub fn raw_buffer_size(&self) -> usize {
        self.len
    }

    /// Index of the raw buffer the DMA is filling.
    pub fn write_index(&self) -> u8 {
        self.slot.write_index()
    }

    /// Index of the most recently completed raw buffer. Equal to `write_index` when there's
    /// nothing new to read.
    pub fn read_index(&self) -> u8 {
        self.slot.read_index()
    }

    pub(crate) fn set_observer(&mut self, observer: Option<&'a dyn ReadyObserver>) {
        self.observer = observer;
    }

    /// Point the DMA at the state machine's FIFO and the first raw buffer, without starting it.
    pub(crate) fn configure_dma(&mut self, cfg: &TransferCfg, fifo_addr: usize) {
        self.dma.configure(cfg, fifo_addr, self.addrs[0], self.len);
    }

    /// Reset the buffer hand-off, and start the DMA into buffer 0.
    pub(crate) fn arm(&mut self) {
        self.dma.set_irq_enabled(true);
        self.slot.reset();

        // Index writes above must land before the DMA engine takes over.
        compiler_fence(Ordering::SeqCst);
        self.dma.start_now(self.addrs[0], self.len);
        self.running = true;
    }

    /// Abort the DMA and mask its interrupt.
    pub(crate) fn disarm(&mut self) {
        self.dma.abort();
        self.dma.set_irq_enabled(false);
        self.dma.clear_irq();
        compiler_fence(Ordering::SeqCst);
        self.running = false;
    }

    /// The DMA finished filling `write_index`. Publish it to the reader, re-arm into the other
    /// buffer, then notify the observer. Runs in interrupt context.
    pub(crate) fn on_transfer_complete(&mut self) {
        compiler_fence(Ordering::SeqCst);

        let next = self.slot.publish();
        // Re-arm before anything else: the microphone keeps clocking bits out.
        self.dma.start_now(self.addrs[usize::from(next)], self.len);

        if let Some(observer) = self.observer {
            observer.notify(self.id);
        }
    }

    /// Give back the DMA channel, and free the raw buffers (or leave them to the reader, if it's
    /// mid-read). The DMA must be stopped.
    pub(crate) fn release(self) -> D {
        self.slot.remove();
        self.dma
    }
}
