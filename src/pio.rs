//! Programmable I/O (PIO) support for PDM capture. The capture program drives the microphone's
//! clock pin and shifts the data pin into the state machine's RX FIFO, which DMA drains.

use crate::{
    dma::Dreq,
    error::{ConfigError, Result},
};

/// State machine cycles spent per PDM bit by the capture program.
pub const CYCLES_PER_BIT: u64 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PioBlock {
    Pio0,
    Pio1,
}

/// A state machine within a PIO block. Each microphone needs its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateMachine {
    pub pio: PioBlock,
    /// State machine index, 0 - 3.
    pub sm: u8,
}

impl StateMachine {
    pub const fn new(pio: PioBlock, sm: u8) -> Self {
        Self { pio, sm }
    }

    /// This state machine's bit in a PIO block's enable mask.
    pub const fn mask(&self) -> u8 {
        1 << self.sm
    }
}

/// State machine clock divisor, in 16.8 fixed point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivisor {
    pub int: u16,
    pub frac: u8,
}

impl ClockDivisor {
    /// Divisor that makes the capture program clock the microphone at
    /// `sample_rate * decimation` bits per second:
    /// `sysclk / (sample_rate * decimation * CYCLES_PER_BIT)`.
    pub fn for_capture(sysclk: u32, sample_rate: u32, decimation: usize) -> Result<Self> {
        let denom = u64::from(sample_rate) * decimation as u64 * CYCLES_PER_BIT;
        if denom == 0 {
            return Err(ConfigError::SampleRateTooLow.into());
        }

        let fixed = (u64::from(sysclk) << 8) / denom;
        if !(0x100..=0xff_ffff).contains(&fixed) {
            return Err(ConfigError::ClockDivisorOutOfRange.into());
        }

        Ok(Self {
            int: (fixed >> 8) as u16,
            frac: (fixed & 0xff) as u8,
        })
    }

    pub fn as_f32(&self) -> f32 {
        self.int as f32 + self.frac as f32 / 256.
    }
}

/// Loads and controls the PDM capture program.
pub trait PdmProgram {
    /// Load the capture program into `sm`'s PIO block if needed, and configure `sm` to run it:
    /// `gpio_clk` as side-set clock output, `gpio_data` as input, autopush into the RX FIFO.
    /// Leaves the state machine disabled. Fails with `Error::ResourceExhausted` if there's no
    /// instruction memory left.
    fn load(
        &mut self,
        sm: StateMachine,
        gpio_data: u8,
        gpio_clk: u8,
        divisor: ClockDivisor,
    ) -> Result<()>;

    fn set_enabled(&mut self, sm: StateMachine, enabled: bool);

    /// Enable or disable several state machines of one block in a single register write, so
    /// their clocks run in lockstep.
    fn set_enabled_mask(&mut self, pio: PioBlock, mask: u8, enabled: bool);

    /// Bus address of `sm`'s RX FIFO; the DMA read address.
    fn rx_fifo_addr(&self, sm: StateMachine) -> usize;

    /// The DMA request line raised when `sm`'s RX FIFO has data.
    fn rx_dreq(&self, sm: StateMachine) -> Dreq;
}
