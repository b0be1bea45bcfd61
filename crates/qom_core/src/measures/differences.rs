use anyhow::{bail, Result};
use std::f64::consts::{PI, TAU};
use tracing::warn;

/// Evenly spaced points from `a` to `b`, both included.
fn ramp(a: f64, b: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![a],
        _ => (0..num)
            .map(|i| a + (b - a) * i as f64 / (num - 1) as f64)
            .collect(),
    }
}

/// Unwrapped phase of an oscillating signal, one value per sample.
///
/// Every detected maximum closes a cycle and adds 2π; samples in between are
/// interpolated linearly. The partial cycle before the first maximum ramps
/// from 3π/2 to 2π and the partial cycle after the last maximum repeats the
/// previous cycle shifted by 2π.
///
/// Maxima are found by comparing neighbouring samples only, starting from the
/// first sample, so the result does not change when a constant is added to
/// the signal. Implementations that compare the first sample against zero
/// instead can place the first maximum differently for signals that start
/// negative and falling.
pub fn unwrapped_phase(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }

    let mut phase = vec![0.0];
    let mut maxima = vec![0usize];
    let mut increasing = true;
    let mut prev = signal[0];
    for (k, &curr) in signal.iter().enumerate().skip(1) {
        if prev > curr && increasing {
            increasing = false;
            let cycles = maxima.len() as f64;
            let last = maxima[maxima.len() - 1];
            phase.extend(ramp((cycles - 1.0) * TAU, cycles * TAU, k - last + 1).into_iter().skip(1));
            maxima.push(k);
        } else if prev <= curr && !increasing {
            increasing = true;
        }
        prev = curr;
    }

    if maxima.len() < 2 {
        warn!(samples = n, "signal has no maximum, phase taken as zero");
        return vec![0.0; n];
    }

    let (first, second) = (maxima[0], maxima[1]);
    for (slot, value) in phase[first..second]
        .iter_mut()
        .zip(ramp(3.0 * PI / 2.0, TAU, second - first + 1))
    {
        *slot = value;
    }

    let last = maxima[maxima.len() - 1];
    let period = last - maxima[maxima.len() - 2];
    for idx in last + 1..n {
        let value = phase[idx - period] + TAU;
        phase.push(value);
    }
    phase
}

/// Wrapped phase difference `φ_j − φ_i` in degrees, in `[0, 360)`.
pub fn phase_difference(signal_i: &[f64], signal_j: &[f64]) -> Result<Vec<f64>> {
    if signal_i.len() != signal_j.len() {
        bail!(
            "Phase difference needs signals of equal length, got {} and {}.",
            signal_i.len(),
            signal_j.len()
        );
    }
    let phase_i = unwrapped_phase(signal_i);
    let phase_j = unwrapped_phase(signal_j);
    Ok(phase_i
        .iter()
        .zip(&phase_j)
        .map(|(a, b)| (b - a).rem_euclid(TAU).to_degrees())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{phase_difference, unwrapped_phase};
    use std::f64::consts::TAU;

    fn cosine(n: usize, per_period: usize, delay: usize) -> Vec<f64> {
        (0..n)
            .map(|k| (TAU * (k as f64 - delay as f64) / per_period as f64).cos())
            .collect()
    }

    #[test]
    fn identical_signals_are_in_phase() {
        let s = cosine(200, 40, 7);
        let diff = phase_difference(&s, &s).unwrap();
        assert_eq!(diff.len(), 200);
        assert!(diff.iter().all(|d| *d == 0.0));
    }

    #[test]
    fn quarter_period_lag_is_270_degrees() {
        let lead = cosine(200, 40, 0);
        let lag = cosine(200, 40, 10);
        let diff = phase_difference(&lead, &lag).unwrap();
        for d in &diff[11..] {
            assert!((d - 270.0).abs() < 1e-9, "{d}");
        }
    }

    #[test]
    fn phase_grows_one_turn_per_period() {
        let phase = unwrapped_phase(&cosine(120, 20, 5));
        assert_eq!(phase.len(), 120);
        // Maxima at 5, 25, ... are detected one sample later.
        assert!((phase[6] - TAU).abs() < 1e-12);
        assert!((phase[26] - 2.0 * TAU).abs() < 1e-12);
        assert!((phase[0] - 1.5 * std::f64::consts::PI).abs() < 1e-12);
        assert!(phase.windows(2).all(|w| w[1] > w[0]));
        assert!((phase[119] - phase[99] - TAU).abs() < 1e-9);
    }

    #[test]
    fn phase_ignores_a_constant_offset() {
        for delay in [0, 5, 13] {
            let s = cosine(120, 20, delay);
            let reference = unwrapped_phase(&s);
            for offset in [-5.0, 3.0] {
                let shifted: Vec<f64> = s.iter().map(|v| v + offset).collect();
                assert_eq!(unwrapped_phase(&shifted), reference, "delay {delay}, offset {offset}");
            }
        }
    }

    #[test]
    fn flat_signal_has_zero_phase() {
        assert_eq!(unwrapped_phase(&[1.0; 10]), vec![0.0; 10]);
        assert!(phase_difference(&[1.0, 2.0], &[1.0]).is_err());
    }
}
