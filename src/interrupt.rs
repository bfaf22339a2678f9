//! Interrupt controller interface. All capture channels share one DMA interrupt line; it's
//! enabled when the first channel starts, and disabled when the last one stops.

/// An interrupt line number, as the interrupt controller sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqLine(pub u16);

/// `DMA_IRQ_0` on RP2040.
pub const DMA_IRQ_0: IrqLine = IrqLine(11);

pub trait InterruptController {
    fn enable(&mut self, line: IrqLine);

    fn disable(&mut self, line: IrqLine);

    /// Install `handler` as the exclusive handler for `line`. Only meaningful on platforms with a
    /// RAM vector table; with a fixed table, route the line to `MicRegistry::on_dma_irq` from your
    /// `#[interrupt]` function instead and keep this default.
    fn set_handler(&mut self, _line: IrqLine, _handler: fn()) {}
}

cfg_if::cfg_if! {
    if #[cfg(feature = "cortex-m")] {
        use cortex_m::{interrupt::InterruptNumber, peripheral::NVIC};

        // SAFETY: `IrqLine` holds the device's interrupt number unchanged.
        unsafe impl InterruptNumber for IrqLine {
            fn number(self) -> u16 {
                self.0
            }
        }

        /// Masks and unmasks lines in the Cortex-M NVIC. Handlers come from the vector table.
        #[derive(Default)]
        pub struct Nvic;

        impl InterruptController for Nvic {
            fn enable(&mut self, line: IrqLine) {
                // SAFETY: unmasking is only unsound inside mask-based critical sections. The
                // registry is guarded by `critical_section`, which doesn't use the NVIC mask.
                unsafe { NVIC::unmask(line) }
            }

            fn disable(&mut self, line: IrqLine) {
                NVIC::mask(line);
            }
        }
    }
}
