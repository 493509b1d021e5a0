//! Polyphase rational resampling with a Kaiser-windowed low-pass FIR.
//!
//! Output follows the usual `resample_poly` convention: the ratio is reduced
//! by its gcd, the filter has `2 * 10 * max(up, down) + 1` taps with cutoff
//! `1 / max(up, down)` of Nyquist and DC gain `up`, the output holds
//! `ceil(len * up / down)` samples and the filter delay is removed.

use std::f64::consts::PI;

const FILTER_HALF_LENGTH_FACTOR: usize = 10;
const BESSEL_SERIES_TOLERANCE: f64 = 1.0e-17;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResampleError {
    #[error("resampling factors must be > 0, got up={up}, down={down}")]
    InvalidRatio { up: u64, down: u64 },
    #[error("cannot resample an empty signal")]
    EmptySignal,
    #[error("signal value must be finite at index {index}, got {value}")]
    NonFiniteSample { index: usize, value: f64 },
    #[error("kaiser beta must be finite and >= 0, got {value}")]
    InvalidBeta { value: f64 },
}

pub fn greatest_common_divisor(mut lhs: u64, mut rhs: u64) -> u64 {
    while rhs != 0 {
        let remainder = lhs % rhs;
        lhs = rhs;
        rhs = remainder;
    }
    lhs
}

/// Modified Bessel function of the first kind, order zero (power series).
pub fn bessel_i0(x: f64) -> f64 {
    let quarter_x_squared = 0.25 * x * x;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut k = 1.0;
    loop {
        term *= quarter_x_squared / (k * k);
        sum += term;
        if term <= sum * BESSEL_SERIES_TOLERANCE {
            return sum;
        }
        k += 1.0;
    }
}

/// Symmetric Kaiser window of `length` points.
pub fn kaiser_window(length: usize, beta: f64) -> Vec<f64> {
    match length {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let alpha = 0.5 * (length - 1) as f64;
            let normalizer = bessel_i0(beta);
            (0..length)
                .map(|index| {
                    let ratio = (index as f64 - alpha) / alpha;
                    bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / normalizer
                })
                .collect()
        }
    }
}

fn normalized_sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let argument = PI * x;
        argument.sin() / argument
    }
}

/// Linear-phase low-pass FIR, cutoff relative to Nyquist, scaled to unit DC gain.
pub fn firwin_lowpass(taps: usize, cutoff: f64, beta: f64) -> Vec<f64> {
    let alpha = 0.5 * taps.saturating_sub(1) as f64;
    let window = kaiser_window(taps, beta);
    let mut filter: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(index, weight)| {
            let offset = index as f64 - alpha;
            cutoff * normalized_sinc(cutoff * offset) * weight
        })
        .collect();

    let gain: f64 = filter.iter().sum();
    if gain != 0.0 {
        filter.iter_mut().for_each(|tap| *tap /= gain);
    }
    filter
}

pub fn resample_poly(
    signal: &[f64],
    up: u64,
    down: u64,
    kaiser_beta: f64,
) -> Result<Vec<f64>, ResampleError> {
    if up == 0 || down == 0 {
        return Err(ResampleError::InvalidRatio { up, down });
    }
    if signal.is_empty() {
        return Err(ResampleError::EmptySignal);
    }
    if !kaiser_beta.is_finite() || kaiser_beta < 0.0 {
        return Err(ResampleError::InvalidBeta { value: kaiser_beta });
    }
    if let Some((index, value)) = signal
        .iter()
        .copied()
        .enumerate()
        .find(|(_, value)| !value.is_finite())
    {
        return Err(ResampleError::NonFiniteSample { index, value });
    }

    let divisor = greatest_common_divisor(up, down);
    let up = (up / divisor) as usize;
    let down = (down / divisor) as usize;
    if up == 1 && down == 1 {
        return Ok(signal.to_vec());
    }

    let max_rate = up.max(down);
    let half_length = FILTER_HALF_LENGTH_FACTOR * max_rate;
    let mut filter = firwin_lowpass(2 * half_length + 1, 1.0 / max_rate as f64, kaiser_beta);
    filter.iter_mut().for_each(|tap| *tap *= up as f64);

    let output_len = (signal.len() * up).div_ceil(down);
    let pre_pad = down - half_length % down;
    let pre_remove = (half_length + pre_pad) / down;

    let filter_len = filter.len() as i64;
    let up_i = up as i64;
    let last_input = signal.len() as i64 - 1;

    let output = (0..output_len)
        .map(|index| {
            // Index into the (unpadded) filter for input sample zero.
            let tap_origin = ((pre_remove + index) * down) as i64 - pre_pad as i64;
            if tap_origin < 0 {
                return 0.0;
            }
            let lowest_tap = (tap_origin - filter_len + 1).max(0);
            let first = (lowest_tap + up_i - 1) / up_i;
            let last = (tap_origin / up_i).min(last_input);
            (first..=last)
                .map(|input| signal[input as usize] * filter[(tap_origin - input * up_i) as usize])
                .sum()
        })
        .collect();

    Ok(output)
}
