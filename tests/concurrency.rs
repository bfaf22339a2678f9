//! The completion handler and the reader running at the same time, on separate threads.

mod common;

use std::{sync::mpsc, thread, time::Duration};

use common::{MockHw, config, hardware, init_logging};
use pdm_capture::{
    CaptureStore, ChannelError, ChannelId, Error, FilterParams, FilterTransform, MicReader,
    MicRegistry, PdmFilter, access_global, init_globals, interrupt::DMA_IRQ_0, make_globals,
};

make_globals!((MICS, MicRegistry<'static, MockHw>));

static STORE: CaptureStore = CaptureStore::new();

/// Stops in its first `apply` until told to continue.
#[derive(Default)]
struct HeldFilter {
    inner: PdmFilter,
    hold: Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>,
}

impl HeldFilter {
    /// The filter, a receiver signalled once it's held, and a sender that releases it.
    fn held() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let filter = Self {
            inner: PdmFilter::new(),
            hold: Some((entered_tx, release_rx)),
        };
        (filter, entered_rx, release_tx)
    }
}

impl FilterTransform for HeldFilter {
    fn init(&mut self, params: &FilterParams) {
        self.inner.init(params);
    }

    fn apply(&mut self, raw: &[u8], out: &mut [i16], volume: u16, params: &FilterParams) {
        if let Some((entered, release)) = self.hold.take() {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        self.inner.apply(raw, out, volume, params);
    }
}

fn dma_irq() -> Option<ChannelId> {
    critical_section::with(|cs| {
        access_global!(MICS, mics, cs, None);
        mics.on_dma_irq()
    })
}

/// Run the completion handler on its own thread, as an interrupt would preempt the reader.
fn dma_irq_elsewhere() -> Result<Option<ChannelId>, mpsc::RecvTimeoutError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(dma_irq());
    });
    rx.recv_timeout(Duration::from_secs(2))
}

fn deinit(id: ChannelId) {
    critical_section::with(|cs| {
        access_global!(MICS, mics, cs);
        mics.deinit(id);
    });
}

fn init(id: ChannelId) -> pdm_capture::Result<()> {
    critical_section::with(|cs| {
        access_global!(MICS, mics, cs, Err(Error::ChannelError(ChannelError::NotInitialized)));
        mics.init(config(id.index() as u8, 16_000, 160), id)
    })
}

// One test: the globals and store are shared.
#[test]
fn handler_runs_during_decimation() {
    init_logging();
    let (hw, bench) = hardware(3);
    let mut mics: MicRegistry<'static, MockHw> = MicRegistry::new(hw, DMA_IRQ_0, &STORE);
    for id in [ChannelId::C0, ChannelId::C1] {
        mics.init(config(id.index() as u8, 16_000, 160), id).unwrap();
        mics.start(id).unwrap();
    }
    init_globals!((MICS, mics));

    bench.complete(0, &[0x55; 1_280]);
    assert_eq!(dma_irq(), Some(ChannelId::C0));

    let (held, entered, release) = HeldFilter::held();
    let mut reader = MicReader::with_filters(
        &STORE,
        [held, HeldFilter::default(), HeldFilter::default()],
    );
    let worker = thread::spawn(move || {
        let result = reader.read(ChannelId::C0, &mut [0; 160]);
        (reader, result)
    });
    entered
        .recv_timeout(Duration::from_secs(2))
        .expect("reader never reached the filter");

    // C0 is mid-decimation: a completion on C1 is still handled, and re-arms C1's DMA.
    bench.complete(1, &[]);
    let handled = dma_irq_elsewhere();
    let c1_rearmed = bench.dma(1).armed.is_some();

    // Tearing down C0 while it's being read leaves its buffers to the reader.
    deinit(ChannelId::C0);
    assert_eq!(init(ChannelId::C0), Err(Error::ChannelError(ChannelError::Busy)));

    release.send(()).unwrap();
    let (mut reader, result) = worker.join().unwrap();

    assert_eq!(handled, Ok(Some(ChannelId::C1)));
    assert!(c1_rearmed);
    assert_eq!(result, Ok(160));
    assert_eq!(reader.read(ChannelId::C1, &mut [0; 160]), Ok(160));

    // The reader has let go: C0 can come back.
    assert_eq!(
        reader.read(ChannelId::C0, &mut [0; 160]),
        Err(Error::ChannelError(ChannelError::NotInitialized))
    );
    assert_eq!(init(ChannelId::C0), Ok(()));
}
