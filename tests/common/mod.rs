//! Mock hardware for host tests: a DMA channel pool with per-channel completion flags, a PIO block
//! that records what's loaded and enabled, and an interrupt controller that tracks enabled lines.
//!
//! `MockHw` goes into the registry; the test keeps a `Bench` handle onto the same state, to
//! complete transfers and inspect the hardware.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use pdm_capture::{
    CaptureStore, ClockCfg, Error, MicConfig, Result,
    dma::{DmaClaim, DmaTransfer, Dreq, TransferCfg},
    interrupt::{InterruptController, IrqLine},
    pio::{ClockDivisor, PdmProgram, PioBlock, StateMachine},
};

pub const SYSCLK: u32 = 125_000_000;

#[derive(Clone, Debug, Default)]
pub struct DmaState {
    pub claimed: bool,
    pub cfg: Option<TransferCfg>,
    pub read_addr: usize,
    /// Destination and length of the transfer in progress.
    pub armed: Option<(usize, usize)>,
    pub starts: u32,
    pub aborts: u32,
    pub irq_enabled: bool,
    pub pending: bool,
}

#[derive(Debug, Default)]
pub struct BenchState {
    pub dma: Vec<DmaState>,
    pub loaded: Vec<(StateMachine, u8, u8, ClockDivisor)>,
    pub enabled: Vec<StateMachine>,
    pub mask_writes: Vec<(PioBlock, u8, bool)>,
    pub lines: Vec<IrqLine>,
    pub handler: Option<fn()>,
    pub fail_load: bool,
}

#[derive(Clone, Default)]
pub struct Bench(Arc<Mutex<BenchState>>);

impl Bench {
    pub fn state(&self) -> MutexGuard<'_, BenchState> {
        self.0.lock().unwrap()
    }

    pub fn dma(&self, number: u8) -> DmaState {
        self.state().dma[number as usize].clone()
    }

    pub fn sm_enabled(&self, sm: StateMachine) -> bool {
        self.state().enabled.contains(&sm)
    }

    pub fn line_enabled(&self, line: IrqLine) -> bool {
        self.state().lines.contains(&line)
    }

    /// Finish DMA channel `number`'s transfer: copy `data` to its destination and raise its
    /// completion flag, as the hardware would.
    pub fn complete(&self, number: u8, data: &[u8]) {
        let mut state = self.state();
        let dma = &mut state.dma[number as usize];
        let (addr, len) = dma.armed.take().expect("transfer not armed");
        assert!(data.len() <= len);

        // SAFETY: `addr` is the start of a live raw buffer of `len` bytes; the registry doesn't
        // touch it while the transfer is armed.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len()) };

        if dma.irq_enabled {
            dma.pending = true;
        }
    }

    /// Raise a completion flag without a transfer, eg one the capture code never armed.
    pub fn raise(&self, number: u8) {
        self.state().dma[number as usize].pending = true;
    }
}

pub struct MockHw {
    bench: Bench,
}

/// Mock hardware with `dma_channels` DMA channels to hand out.
pub fn hardware(dma_channels: usize) -> (MockHw, Bench) {
    let bench = Bench::default();
    bench.state().dma = vec![DmaState::default(); dma_channels];
    (
        MockHw {
            bench: bench.clone(),
        },
        bench,
    )
}

/// A store for one test's registry and reader. Leaked, since both borrow it for `'static`.
pub fn leaked_store() -> &'static CaptureStore {
    Box::leak(Box::new(CaptureStore::new()))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A config on PIO0, state machine `sm`, with its own pins.
pub fn config(sm: u8, sample_rate: u32, sample_buffer_size: usize) -> MicConfig {
    MicConfig::new(
        2 + 2 * sm,
        3 + 2 * sm,
        StateMachine::new(PioBlock::Pio0, sm),
        sample_rate,
        sample_buffer_size,
    )
}

pub struct MockDma {
    number: u8,
    bench: Bench,
}

impl MockDma {
    fn with<R>(&self, f: impl FnOnce(&mut DmaState) -> R) -> R {
        f(&mut self.bench.state().dma[self.number as usize])
    }
}

impl DmaTransfer for MockDma {
    fn number(&self) -> u8 {
        self.number
    }

    fn configure(&mut self, cfg: &TransferCfg, read_addr: usize, _write_addr: usize, _len: usize) {
        self.with(|d| {
            d.cfg = Some(cfg.clone());
            d.read_addr = read_addr;
        });
    }

    fn start_now(&mut self, write_addr: usize, len: usize) {
        self.with(|d| {
            d.armed = Some((write_addr, len));
            d.starts += 1;
        });
    }

    fn abort(&mut self) {
        self.with(|d| {
            d.armed = None;
            d.aborts += 1;
        });
    }

    fn set_irq_enabled(&mut self, enabled: bool) {
        self.with(|d| d.irq_enabled = enabled);
    }

    fn irq_pending(&self) -> bool {
        self.with(|d| d.pending)
    }

    fn clear_irq(&mut self) {
        self.with(|d| d.pending = false);
    }
}

impl DmaClaim for MockHw {
    type Channel = MockDma;

    fn claim(&mut self) -> Option<MockDma> {
        let mut state = self.bench.state();
        let (number, dma) = state
            .dma
            .iter_mut()
            .enumerate()
            .find(|(_, d)| !d.claimed)?;
        dma.claimed = true;

        Some(MockDma {
            number: number as u8,
            bench: self.bench.clone(),
        })
    }

    fn unclaim(&mut self, channel: MockDma) {
        let mut state = self.bench.state();
        let dma = &mut state.dma[channel.number as usize];
        assert!(dma.claimed);
        assert!(dma.armed.is_none(), "unclaimed while transferring");
        dma.claimed = false;
    }
}

impl PdmProgram for MockHw {
    fn load(
        &mut self,
        sm: StateMachine,
        gpio_data: u8,
        gpio_clk: u8,
        divisor: ClockDivisor,
    ) -> Result<()> {
        let mut state = self.bench.state();
        if state.fail_load {
            return Err(Error::ResourceExhausted);
        }
        state.loaded.push((sm, gpio_data, gpio_clk, divisor));
        Ok(())
    }

    fn set_enabled(&mut self, sm: StateMachine, enabled: bool) {
        let mut state = self.bench.state();
        state.enabled.retain(|s| *s != sm);
        if enabled {
            state.enabled.push(sm);
        }
    }

    fn set_enabled_mask(&mut self, pio: PioBlock, mask: u8, enabled: bool) {
        self.bench.state().mask_writes.push((pio, mask, enabled));
        for i in (0..4).filter(|i| mask & (1 << i) != 0) {
            self.set_enabled(StateMachine::new(pio, i), enabled);
        }
    }

    fn rx_fifo_addr(&self, sm: StateMachine) -> usize {
        let base = match sm.pio {
            PioBlock::Pio0 => 0x5020_0000,
            PioBlock::Pio1 => 0x5030_0000,
        };
        base + 0x20 + 4 * sm.sm as usize
    }

    fn rx_dreq(&self, sm: StateMachine) -> Dreq {
        match sm.pio {
            PioBlock::Pio0 => Dreq(4 + sm.sm),
            PioBlock::Pio1 => Dreq(12 + sm.sm),
        }
    }
}

impl InterruptController for MockHw {
    fn enable(&mut self, line: IrqLine) {
        let mut state = self.bench.state();
        if !state.lines.contains(&line) {
            state.lines.push(line);
        }
    }

    fn disable(&mut self, line: IrqLine) {
        self.bench.state().lines.retain(|l| *l != line);
    }

    fn set_handler(&mut self, _line: IrqLine, handler: fn()) {
        self.bench.state().handler = Some(handler);
    }
}

impl ClockCfg for MockHw {
    fn sysclk(&self) -> u32 {
        SYSCLK
    }
}
