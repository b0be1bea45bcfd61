//! Numerical gradients of sampled curves and the monotonic-run helpers used
//! to decide where a gradient is read off.

use crate::system::{GradientMode, GradientOptions};
use anyhow::{anyhow, bail, Result};

/// Gradient of `f` sampled at `x`: second-order central differences in the
/// interior (non-uniform spacing allowed) and first-order one-sided at the edges.
pub fn gradient(f: &[f64], x: &[f64]) -> Result<Vec<f64>> {
    let n = f.len();
    if x.len() != n {
        bail!(
            "Gradient needs matching lengths, got {} values and {} positions.",
            n,
            x.len()
        );
    }
    if n < 2 {
        bail!("Gradient needs at least two samples, got {}.", n);
    }

    let mut out = vec![0.0; n];
    out[0] = (f[1] - f[0]) / (x[1] - x[0]);
    out[n - 1] = (f[n - 1] - f[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n - 1 {
        let hs = x[i] - x[i - 1];
        let hd = x[i + 1] - x[i];
        out[i] = (hs * hs * f[i + 1] + (hd * hd - hs * hs) * f[i] - hd * hd * f[i - 1])
            / (hs * hd * (hd + hs));
    }
    Ok(out)
}

/// Half-open index ranges over which `values` keeps its sign (zero counts as positive).
fn sign_runs(values: &[f64]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    if values.is_empty() {
        return runs;
    }
    let positive = |v: f64| v >= 0.0;
    let mut start = 0;
    let mut sign = positive(values[0]);
    for (j, v) in values.iter().enumerate().skip(1) {
        if positive(*v) != sign {
            runs.push((start, j));
            sign = positive(*v);
            start = j;
        }
    }
    runs.push((start, values.len()));
    runs
}

/// Midpoint index of each same-sign run.
pub fn monotonic_mean_indices(values: &[f64]) -> Vec<usize> {
    sign_runs(values)
        .into_iter()
        .map(|(i, j)| (i + j - 1) / 2)
        .collect()
}

/// Index of the largest magnitude inside each same-sign run.
pub fn monotonic_max_min_indices(values: &[f64]) -> Vec<usize> {
    sign_runs(values)
        .into_iter()
        .map(|(i, j)| {
            let mut best = i;
            for k in i..j {
                if values[k].abs() > values[best].abs() {
                    best = k;
                }
            }
            best
        })
        .collect()
}

fn nearest_index(xs: &[f64], position: f64) -> usize {
    let mut best = 0;
    for (i, x) in xs.iter().enumerate() {
        if (x - position).abs() < (xs[best] - position).abs() {
            best = i;
        }
    }
    best
}

fn nth_run(indices: &[usize], mono_id: usize) -> Result<usize> {
    if mono_id == 0 {
        bail!("mono_id is 1-based, got 0.");
    }
    indices.get(mono_id - 1).copied().ok_or_else(|| {
        anyhow!(
            "mono_id {} requested but the curve has only {} monotonic runs.",
            mono_id,
            indices.len()
        )
    })
}

/// Gradient of `ys` over `xs` read off where `options` asks, divided by the divisor.
pub fn gradient_at(ys: &[f64], xs: &[f64], options: &GradientOptions) -> Result<f64> {
    if options.divisor == 0.0 {
        bail!("Gradient divisor must be non-zero.");
    }
    let grads = gradient(ys, xs)?;
    let index = match options.mode {
        GradientMode::AtPosition => nearest_index(xs, options.position),
        GradientMode::NearPosition => {
            let mids = monotonic_mean_indices(&grads);
            let target = nearest_index(xs, options.position);
            let mut best = mids[0];
            for m in &mids {
                if m.abs_diff(target) < best.abs_diff(target) {
                    best = *m;
                }
            }
            best
        }
        GradientMode::AtMonoMid => nth_run(&monotonic_mean_indices(&grads), options.mono_id)?,
        GradientMode::AtMonoMaxMin => {
            nth_run(&monotonic_max_min_indices(&grads), options.mono_id)?
        }
    };
    Ok(grads[index] / options.divisor)
}
