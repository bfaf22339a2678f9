//! The multi-channel dispatch loop: a worker context (eg the second core) that waits for capture
//! channels to report a completed raw buffer, reads it, and hands the PCM samples to a
//! per-channel [`Processor`].
//!
//! Handler-to-worker signalling uses [`ReadyFlags`]: one word-sized counter per channel, bumped by
//! the completion handler and never written by the worker. The worker copies a counter into a local
//! before acting on it, then records it as seen; a notification arriving in between shows up as a
//! changed counter on the next check instead of being lost.

use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::{
    MAX_CHANNELS,
    error::{Error, Result},
    filter::FilterTransform,
    reader::MicReader,
    registry::ChannelId,
    traits::{Park, ReadyObserver},
};

/// Per-channel count of raw buffers the completion handler has published. Register it as each
/// channel's ready observer.
pub struct ReadyFlags {
    notified: [AtomicU32; MAX_CHANNELS],
}

impl ReadyFlags {
    pub const fn new() -> Self {
        Self {
            notified: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    /// Notifications received for `channel`. Wraps.
    pub fn count(&self, channel: ChannelId) -> u32 {
        self.notified[channel.index()].load(Ordering::Acquire)
    }
}

impl Default for ReadyFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyObserver for ReadyFlags {
    fn notify(&self, channel: ChannelId) {
        // Interrupt context is the only writer, so a plain load and store is enough. (No RMW
        // atomics on Cortex-M0.)
        let counter = &self.notified[channel.index()];
        let n = counter.load(Ordering::Relaxed);
        counter.store(n.wrapping_add(1), Ordering::Release);
    }
}

/// Somewhere to read decimated samples from.
pub trait SampleSource {
    /// Read channel `id`'s latest raw buffer into `out`. `Ok(0)` if there's nothing new.
    fn read(&mut self, id: ChannelId, out: &mut [i16]) -> Result<usize>;
}

impl<F: FilterTransform> SampleSource for MicReader<'_, F> {
    fn read(&mut self, id: ChannelId, out: &mut [i16]) -> Result<usize> {
        MicReader::read(self, id, out)
    }
}

/// Consumes one channel's PCM samples. Runs in the dispatch loop's context.
pub trait Processor {
    fn process(&mut self, channel: ChannelId, samples: &[i16]);

    /// Called when reading `channel` failed, or its data may have been overwritten
    /// (`Error::BufferCorruption`). The default ignores it.
    fn fault(&mut self, channel: ChannelId, error: Error) {
        let _ = (channel, error);
    }
}

impl<P: Processor + ?Sized> Processor for Box<P> {
    fn process(&mut self, channel: ChannelId, samples: &[i16]) {
        (**self).process(channel, samples)
    }

    fn fault(&mut self, channel: ChannelId, error: Error) {
        (**self).fault(channel, error)
    }
}

/// Cooperative round-robin over the channels with an attached processor.
pub struct DispatchLoop<'a, P> {
    flags: &'a ReadyFlags,
    /// The last count acted on, per channel.
    seen: [u32; MAX_CHANNELS],
    processors: [Option<P>; MAX_CHANNELS],
    pcm: Vec<i16>,
}

impl<'a, P: Processor> DispatchLoop<'a, P> {
    /// `pcm_len` is the largest number of samples read at once; normally the channels'
    /// `sample_buffer_size`.
    pub fn new(flags: &'a ReadyFlags, pcm_len: usize) -> Result<Self> {
        let mut pcm = Vec::new();
        pcm.try_reserve_exact(pcm_len)
            .map_err(|_| Error::AllocationError)?;
        pcm.resize(pcm_len, 0);

        Ok(Self {
            flags,
            seen: [0; MAX_CHANNELS],
            processors: [None, None, None],
            pcm,
        })
    }

    /// Process `channel`'s samples with `processor` from now on. Notifications that arrived
    /// earlier are skipped. Returns the processor this replaces, if any.
    pub fn attach(&mut self, channel: ChannelId, processor: P) -> Option<P> {
        self.seen[channel.index()] = self.flags.count(channel);
        self.processors[channel.index()].replace(processor)
    }

    pub fn detach(&mut self, channel: ChannelId) -> Option<P> {
        self.processors[channel.index()].take()
    }

    pub fn processor(&self, channel: ChannelId) -> Option<&P> {
        self.processors[channel.index()].as_ref()
    }

    pub fn processor_mut(&mut self, channel: ChannelId) -> Option<&mut P> {
        self.processors[channel.index()].as_mut()
    }

    /// One pass over the channels in ascending order: each one with a new notification is read
    /// from `source` and processed before moving on. Returns the number of channels processed.
    pub fn poll_once<S: SampleSource + ?Sized>(&mut self, source: &mut S) -> usize {
        let mut processed = 0;

        for id in ChannelId::ALL {
            let i = id.index();
            let Some(processor) = self.processors[i].as_mut() else {
                continue;
            };

            let count = self.flags.count(id);
            let fresh = count.wrapping_sub(self.seen[i]);
            if fresh == 0 {
                continue;
            }
            self.seen[i] = count;

            if fresh > 1 {
                // The handler published a buffer we never got to.
                processor.fault(id, Error::BufferCorruption);
            }

            let written = match source.read(id, &mut self.pcm) {
                Ok(n) => n,
                Err(e) => {
                    processor.fault(id, e);
                    continue;
                }
            };

            // A completion during the read means the DMA moved on to the buffer being decimated.
            if self.flags.count(id) != count {
                warn!("Buffer corruption detected on channel {}", i);
                processor.fault(id, Error::BufferCorruption);
            }

            if written > 0 {
                processor.process(id, &self.pcm[..written]);
                processed += 1;
            }
        }

        processed
    }

    /// Poll forever, parking whenever a pass finds nothing to do. `park` must return once the
    /// completion handler may have run, eg on the next interrupt or event.
    pub fn run<S: SampleSource + ?Sized>(&mut self, source: &mut S, park: &impl Park) -> ! {
        loop {
            if self.poll_once(source) == 0 {
                park.park();
            }
        }
    }
}
