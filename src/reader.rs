//! The read path: decimates each channel's completed raw buffers into PCM.
//!
//! A [`MicReader`] shares a [`CaptureStore`] with the `MicRegistry`, but not the registry itself:
//! reading runs in thread context (eg the second core) while the completion handler keeps running,
//! and holds no critical section while it filters. Filter state, volume and overrun accounting live
//! here, since only the reader uses them.

use core::array;

use crate::{
    DECIMATION, MAX_CHANNELS,
    channel::CaptureStore,
    error::Result,
    filter::{FilterParams, FilterTransform, PdmFilter},
    registry::ChannelId,
};

struct ReaderChannel<F> {
    filter: F,
    params: FilterParams,
    volume: u16,
    /// The start the filter was last initialized for.
    generation: u32,
    /// Buffers completed as of the last read.
    consumed: u32,
    overruns: u32,
}

impl<F> ReaderChannel<F> {
    fn new(filter: F) -> Self {
        let params = FilterParams::for_sample_rate(0);
        Self {
            filter,
            volume: u16::from(params.max_volume),
            params,
            generation: 0,
            consumed: 0,
            overruns: 0,
        }
    }
}

/// Reads PCM from every channel of one [`CaptureStore`].
pub struct MicReader<'a, F = PdmFilter> {
    store: &'a CaptureStore,
    channels: [ReaderChannel<F>; MAX_CHANNELS],
}

impl<'a, F: FilterTransform> MicReader<'a, F> {
    /// A reader with the default filter on each channel.
    pub fn new(store: &'a CaptureStore) -> Self
    where
        F: Default,
    {
        Self::with_filters(store, array::from_fn(|_| F::default()))
    }

    pub fn with_filters(store: &'a CaptureStore, filters: [F; MAX_CHANNELS]) -> Self {
        Self {
            store,
            channels: filters.map(ReaderChannel::new),
        }
    }

    /// Filter parameters for `id`. The sample rate is that of the latest start read from.
    pub fn filter_params(&self, id: ChannelId) -> &FilterParams {
        &self.channels[id.index()].params
    }

    pub fn volume(&self, id: ChannelId) -> u16 {
        self.channels[id.index()].volume
    }

    /// Raw buffers of `id` that were overwritten before being read, since this reader was created.
    pub fn overruns(&self, id: ChannelId) -> u32 {
        self.channels[id.index()].overruns
    }

    pub fn set_filter_max_volume(&mut self, id: ChannelId, max_volume: u8) {
        self.channels[id.index()].params.max_volume = max_volume;
    }

    pub fn set_filter_gain(&mut self, id: ChannelId, gain: u8) {
        self.channels[id.index()].params.gain = gain;
    }

    pub fn set_filter_volume(&mut self, id: ChannelId, volume: u16) {
        self.channels[id.index()].volume = volume;
    }

    /// Decimate channel `id`'s most recently completed raw buffer into `out`. Writes at most
    /// `out.len()` samples, rounded down to whole 1ms frames and capped at the configured buffer
    /// size, and returns how many were written. `Ok(0)` means no buffer has completed since the
    /// last read.
    ///
    /// The first read after each start resets the filter.
    pub fn read(&mut self, id: ChannelId, out: &mut [i16]) -> Result<usize> {
        let store = self.store;
        let slot = store.slot(id);
        let Some(pending) = slot.begin_read()? else {
            debug!("Null read on channel {}", id.index());
            return Ok(0);
        };

        let ch = &mut self.channels[id.index()];
        let raw = pending.raw;

        if pending.generation != ch.generation {
            ch.params = FilterParams {
                max_volume: ch.params.max_volume,
                gain: ch.params.gain,
                ..FilterParams::for_sample_rate(raw.sample_rate)
            };
            ch.filter.init(&ch.params);
            ch.generation = pending.generation;
            ch.consumed = 0;
        }

        let missed = pending
            .published
            .wrapping_sub(ch.consumed)
            .saturating_sub(1);
        if missed > 0 {
            ch.overruns = ch.overruns.saturating_add(missed);
            warn!(
                "Buffer corruption on channel {}: {} raw buffer(s) overwritten before being read",
                id.index(),
                missed
            );
        }
        ch.consumed = pending.published;

        let stride = (raw.sample_rate / 1_000) as usize;
        let samples = if stride == 0 {
            0
        } else {
            ((out.len() / stride) * stride).min(raw.sample_buffer_size)
        };

        let chunk_len = stride * (DECIMATION / 8);
        if samples > 0 {
            for (chunk, pcm) in raw.bufs[usize::from(pending.index)]
                .chunks_exact(chunk_len)
                .zip(out[..samples].chunks_exact_mut(stride))
            {
                ch.filter.apply(chunk, pcm, ch.volume, &ch.params);
            }
        }

        slot.end_read();
        Ok(samples)
    }
}
