//! Amplitude-threshold impact ("bounce") detection over PCM blocks. A bounce is a run of
//! consecutive loud samples longer than a detection height. Detections closer together than the
//! hold-off window are folded into the first.

use core::time::Duration;

use crate::{
    dispatch::Processor, error::Error, instant::Instant, registry::ChannelId, traits::TimeSource,
};

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BounceConfig {
    /// A sample is loud when its magnitude exceeds this.
    pub amplitude: u16,
    /// A bounce needs a run of more than this many consecutive loud samples.
    pub peak_height: u32,
    /// Minimum time between reported bounces, in microseconds.
    pub holdoff_us: u64,
}

impl Default for BounceConfig {
    fn default() -> Self {
        Self {
            amplitude: 10_000,
            peak_height: 20,
            holdoff_us: 50_000,
        }
    }
}

/// A detected bounce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bounce {
    /// When the block containing it was processed.
    pub at: Instant,
    /// Length of the longest run of loud samples in the block.
    pub run_length: u32,
    /// Index of the sample where that run peaked, counted from the first sample fed.
    pub sample_index: u64,
}

pub struct BounceDetector<T> {
    cfg: BounceConfig,
    clock: T,
    /// Consecutive loud samples so far. Carries over between blocks.
    run: u32,
    samples_seen: u64,
    last_reported: Option<Instant>,
    detections: u32,
    reported: Option<Bounce>,
}

impl<T: TimeSource> BounceDetector<T> {
    pub fn new(cfg: BounceConfig, clock: T) -> Self {
        Self {
            cfg,
            clock,
            run: 0,
            samples_seen: 0,
            last_reported: None,
            detections: 0,
            reported: None,
        }
    }

    pub fn config(&self) -> &BounceConfig {
        &self.cfg
    }

    /// Blocks that contained a bounce, including ones suppressed by the hold-off.
    pub fn detections(&self) -> u32 {
        self.detections
    }

    /// The most recently reported bounce.
    pub fn last_bounce(&self) -> Option<Bounce> {
        self.reported
    }

    /// Scan one block of samples. Returns a bounce if the block contains one and the hold-off since
    /// the last reported bounce has elapsed.
    pub fn feed(&mut self, samples: &[i16]) -> Option<Bounce> {
        let mut highest = 0;
        let mut peak_index = 0;

        for &sample in samples {
            self.samples_seen += 1;

            if sample.unsigned_abs() > self.cfg.amplitude {
                self.run += 1;
                if self.run > highest {
                    highest = self.run;
                    peak_index = self.samples_seen;
                }
            } else {
                self.run = 0;
            }
        }

        if highest <= self.cfg.peak_height {
            return None;
        }
        self.detections += 1;

        let now = self.clock.now();
        let holdoff = Duration::from_micros(self.cfg.holdoff_us);
        if let Some(last) = self.last_reported
            && now.saturating_duration_since(last) <= holdoff
        {
            return None;
        }

        let bounce = Bounce {
            at: now,
            run_length: highest,
            sample_index: peak_index,
        };
        self.last_reported = Some(now);
        self.reported = Some(bounce);
        Some(bounce)
    }
}

impl<T: TimeSource> Processor for BounceDetector<T> {
    fn process(&mut self, channel: ChannelId, samples: &[i16]) {
        if let Some(bounce) = self.feed(samples) {
            info!(
                "Bounce on channel {}: at {} us, run {}, sample {}",
                channel.index(),
                bounce.at.as_micros(),
                bounce.run_length,
                bounce.sample_index
            );
        }
    }

    fn fault(&mut self, channel: ChannelId, error: Error) {
        warn!("Channel {} fault: {:?}", channel.index(), error);
    }
}
