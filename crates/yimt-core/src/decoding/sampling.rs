//! Candidate selection for a single decoding step.

use ndarray::{Array1, ArrayBase, DataMut, Ix1};
use rand::Rng;

/// How next-token candidates are drawn from a step distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampler {
    /// Highest scoring tokens.
    Best,
    /// Random draws from the `top_k` most likely tokens (0 means the whole
    /// vocabulary) after dividing log probabilities by `temperature`.
    Random { top_k: usize, temperature: f32 },
}

impl Sampler {
    /// `sampling_topk == 1` selects [`Sampler::Best`].
    pub fn from_params(sampling_topk: usize, sampling_temperature: f32) -> Self {
        if sampling_topk == 1 {
            Sampler::Best
        } else {
            Sampler::Random {
                top_k: sampling_topk,
                temperature: sampling_temperature,
            }
        }
    }

    /// Proposes `(token, log_prob)` continuations for one hypothesis.
    ///
    /// [`Sampler::Best`] returns the `2 * beam_size` best tokens so that
    /// hypotheses ending with `</s>` leave enough live continuations.
    /// [`Sampler::Random`] draws `beam_size` distinct tokens.
    pub fn candidates<R: Rng + ?Sized>(
        &self,
        log_probs: &Array1<f32>,
        beam_size: usize,
        rng: &mut R,
    ) -> Vec<(u32, f32)> {
        match *self {
            Sampler::Best => get_top_k_from_log_probs(log_probs, beam_size * 2),
            Sampler::Random { top_k, temperature } => {
                let temperature = if temperature < 1e-5 { 1.0 } else { temperature };
                let mut probs = log_probs / temperature;
                if top_k > 0 && top_k < probs.len() {
                    probs = top_k_filtering(probs, top_k);
                }
                softmax_1d_inplace(&mut probs);

                let mut drawn = Vec::with_capacity(beam_size);
                while drawn.len() < beam_size {
                    let Some(token) = sample_from_probs(&probs, rng) else {
                        break;
                    };
                    probs[token as usize] = 0.0;
                    drawn.push((token, log_probs[token as usize]));
                }
                drawn
            }
        }
    }
}

pub fn log_softmax_1d(logits: &Array1<f32>) -> Array1<f32> {
    let max_val = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    if max_val == f32::NEG_INFINITY {
        return logits.clone();
    }
    let scaled_logits = logits - max_val;
    let exp_sum = scaled_logits.mapv(f32::exp).sum();
    scaled_logits - exp_sum.ln()
}

pub fn softmax_1d_inplace<S>(logits: &mut ArrayBase<S, Ix1>)
where
    S: DataMut<Elem = f32>,
{
    let max_val = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    if max_val == f32::NEG_INFINITY {
        logits.fill(0.0);
        return;
    }
    logits.mapv_inplace(|x| (x - max_val).exp());
    let sum = logits.sum();
    *logits /= sum;
}

pub fn top_k_filtering(mut logits: Array1<f32>, k: usize) -> Array1<f32> {
    let mut indices: Vec<usize> = (0..logits.len()).collect();
    indices.sort_by(|&a, &b| logits[b].total_cmp(&logits[a]));
    for &idx in indices.iter().skip(k) {
        logits[idx] = f32::NEG_INFINITY;
    }
    logits
}

/// Draws an index from unnormalized non-negative weights.
///
/// Returns `None` when every weight is zero.
pub fn sample_from_probs<R: Rng + ?Sized>(probs: &Array1<f32>, rng: &mut R) -> Option<u32> {
    let total: f32 = probs.sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let threshold = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    let mut last_valid = None;
    for (idx, &prob) in probs.iter().enumerate() {
        if prob <= 0.0 {
            continue;
        }
        cumulative += prob;
        last_valid = Some(idx as u32);
        if cumulative > threshold {
            return last_valid;
        }
    }
    last_valid
}

pub fn get_top_k_from_log_probs(log_probs: &Array1<f32>, k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = log_probs
        .iter()
        .enumerate()
        .map(|(i, &lp)| (i as u32, lp))
        .collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}
