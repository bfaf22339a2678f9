//! PDM to PCM decimation filter. The capture code treats the filter as an opaque transform from
//! a chunk of raw PDM bytes to a chunk of PCM samples; [`PdmFilter`] is the default.
//!
//! `PdmFilter` is a third-order sinc (CIC) decimator, followed by a one-pole DC-blocking high-pass,
//! a one-pole low-pass, and volume/gain scaling to 16 bits. It uses integer math only, so output is
//! bit-exact across targets.

use crate::DECIMATION;

/// Sinc filter order.
const SINC_ORDER: usize = 3;

/// Fractional bits of the filter coefficients.
const COEF_BITS: u32 = 15;
const COEF_ONE: i64 = 1 << COEF_BITS;

/// `gain` value that applies no gain.
pub const UNITY_GAIN: u8 = 16;

// 2π is approximated as 2 * 355 / 113 when deriving coefficients.
const PI_NUM: u64 = 355;
const PI_DEN: u64 = 113;

/// Filter parameters. Owned by a capture channel; changed only through its setters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterParams {
    /// Output sample rate, in Hz.
    pub fs: u32,
    /// Low-pass cutoff, in Hz. 0 disables the low-pass.
    pub lp_hz: u32,
    /// High-pass cutoff, in Hz.
    pub hp_hz: u32,
    /// PDM bits per PCM sample. Also known as the oversampling ratio.
    pub decimation: usize,
    /// The volume at which output is at full scale for the given gain.
    pub max_volume: u8,
    /// Output gain in 1/16 steps; 16 is unity.
    pub gain: u8,
}

impl FilterParams {
    pub fn for_sample_rate(fs: u32) -> Self {
        Self {
            fs,
            lp_hz: fs / 2,
            hp_hz: 10,
            decimation: DECIMATION,
            max_volume: 64,
            gain: UNITY_GAIN,
        }
    }

    /// Raw bytes consumed per output sample.
    pub fn bytes_per_sample(&self) -> usize {
        (self.decimation / 8).max(1)
    }
}

/// Decimates raw PDM bytes into PCM samples.
pub trait FilterTransform {
    /// Derive coefficients from `params` and reset the running state. Called before the first
    /// buffer of each start is decimated.
    fn init(&mut self, params: &FilterParams);

    /// Convert `out.len()` samples' worth of raw data: `raw` holds
    /// `out.len() * params.bytes_per_sample()` bytes, oldest bit first (MSB first in each byte).
    fn apply(&mut self, raw: &[u8], out: &mut [i16], volume: u16, params: &FilterParams);
}

/// The default filter. See the module docs.
#[derive(Clone, Debug, Default)]
pub struct PdmFilter {
    integrators: [i32; SINC_ORDER],
    combs: [i32; SINC_ORDER],
    hp_alpha: i64,
    lp_beta: i64,
    hp_prev_in: i64,
    hp_prev_out: i64,
    lp_prev: i64,
    /// Right shift from the sinc filter's bit growth down to 16 bits.
    shift: u32,
}

impl PdmFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-pole coefficient for `cutoff_hz`, as `2π * fc / fs` in Q15, capped at 1.
    fn coefficient(cutoff_hz: u32, fs: u32) -> i64 {
        let num = (2 * PI_NUM * u64::from(cutoff_hz)) << COEF_BITS;
        let den = PI_DEN * u64::from(fs.max(1));
        (num / den).min(COEF_ONE as u64) as i64
    }

    /// Run one output sample's worth of bits through the sinc filter. Integrators and combs wrap;
    /// the result is exact as long as it fits in 32 bits.
    fn decimate(&mut self, chunk: &[u8]) -> i32 {
        for &byte in chunk {
            for bit in (0..8).rev() {
                let mut x = if (byte >> bit) & 1 == 1 { 1 } else { -1 };
                for acc in self.integrators.iter_mut() {
                    *acc = acc.wrapping_add(x);
                    x = *acc;
                }
            }
        }

        let mut y = self.integrators[SINC_ORDER - 1];
        for comb in self.combs.iter_mut() {
            let diff = y.wrapping_sub(*comb);
            *comb = y;
            y = diff;
        }
        y
    }
}

impl FilterTransform for PdmFilter {
    fn init(&mut self, params: &FilterParams) {
        *self = Self::default();

        self.hp_alpha = COEF_ONE - Self::coefficient(params.hp_hz, params.fs);
        self.lp_beta = if params.lp_hz == 0 {
            COEF_ONE
        } else {
            Self::coefficient(params.lp_hz, params.fs)
        };

        let bit_growth = SINC_ORDER as u32 * params.decimation.max(1).ilog2();
        self.shift = bit_growth.saturating_sub(15);
    }

    fn apply(&mut self, raw: &[u8], out: &mut [i16], volume: u16, params: &FilterParams) {
        let scale = i64::from(volume) * i64::from(params.gain);
        let norm = i64::from(params.max_volume.max(1)) * i64::from(UNITY_GAIN);

        for (chunk, sample) in raw
            .chunks_exact(params.bytes_per_sample())
            .zip(out.iter_mut())
        {
            let x = i64::from(self.decimate(chunk));

            // DC blocker: y[n] = x[n] - x[n-1] + α * y[n-1]
            let hp = x - self.hp_prev_in + ((self.hp_alpha * self.hp_prev_out) >> COEF_BITS);
            self.hp_prev_in = x;
            self.hp_prev_out = hp;

            self.lp_prev += ((hp - self.lp_prev) * self.lp_beta) >> COEF_BITS;

            let scaled = (self.lp_prev * scale / norm) >> self.shift;
            *sample = scaled.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
        }
    }
}
